//! Text segmentation: document blocks -> ordered, non-overlapping chunks.
//!
//! Two strategies:
//!   - `Words`: fixed word-count partition; the chunk count is derived from the
//!     document's word count and clamped to `[min_chunks, max_chunks]`.
//!   - `Paragraphs`: greedy accumulation over paragraph blocks, flushed once
//!     `target_chars` is reached, never growing past `max_chars` (paragraphs are
//!     never split).

use std::collections::BTreeSet;

use serde::Deserialize;

use crate::extract::Block;

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
  #[default]
  Words,
  Paragraphs,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
  pub strategy: ChunkStrategy,
  pub words_per_chunk: usize,
  pub min_chunks: usize,
  pub max_chunks: usize,
  pub target_chars: usize,
  pub max_chars: usize,
}

impl Default for SegmentConfig {
  fn default() -> Self {
    Self {
      strategy: ChunkStrategy::Words,
      words_per_chunk: 500,
      min_chunks: 3,
      max_chunks: 15,
      target_chars: 800,
      max_chars: 1200,
    }
  }
}

/// One chunk of document text and the pages it spans.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
  pub text: String,
  pub pages: Vec<u32>,
}

/// `max(min, min(max, word_count / words_per_chunk))`.
pub fn chunk_count_for(word_count: usize, cfg: &SegmentConfig) -> usize {
  let per = cfg.words_per_chunk.max(1);
  let lo = cfg.min_chunks.max(1);
  let hi = cfg.max_chunks.max(lo);
  (word_count / per).clamp(lo, hi)
}

pub fn segment(blocks: &[Block], cfg: &SegmentConfig) -> Vec<Segment> {
  match cfg.strategy {
    ChunkStrategy::Words => segment_by_words(blocks, cfg),
    ChunkStrategy::Paragraphs => segment_by_paragraphs(blocks, cfg),
  }
}

pub fn segment_by_words(blocks: &[Block], cfg: &SegmentConfig) -> Vec<Segment> {
  let word_count: usize = blocks.iter().map(|b| b.text.split_whitespace().count()).sum();
  if word_count == 0 {
    return Vec::new();
  }
  if word_count < cfg.words_per_chunk {
    return split_words(blocks, 1);
  }
  split_words(blocks, chunk_count_for(word_count, cfg))
}

/// Partition the words into `n` groups of `len / n` words; the last group
/// absorbs the remainder. `n` is capped at the number of words.
pub fn split_words(blocks: &[Block], n: usize) -> Vec<Segment> {
  let words: Vec<(u32, &str)> = blocks
    .iter()
    .flat_map(|b| b.text.split_whitespace().map(move |w| (b.page, w)))
    .collect();
  if words.is_empty() {
    return Vec::new();
  }
  let n = n.clamp(1, words.len());
  let size = words.len() / n;

  let mut out = Vec::with_capacity(n);
  for i in 0..n {
    let start = i * size;
    let end = if i + 1 < n { start + size } else { words.len() };
    let slice = &words[start..end];
    let pages: BTreeSet<u32> = slice.iter().map(|(p, _)| *p).collect();
    out.push(Segment {
      text: slice.iter().map(|(_, w)| *w).collect::<Vec<_>>().join(" "),
      pages: pages.into_iter().collect(),
    });
  }
  out
}

pub fn segment_by_paragraphs(blocks: &[Block], cfg: &SegmentConfig) -> Vec<Segment> {
  let mut out = Vec::new();
  let mut cur: Vec<&Block> = Vec::new();
  let mut cur_len = 0usize;

  fn flush(cur: &mut Vec<&Block>, cur_len: &mut usize, out: &mut Vec<Segment>) {
    if cur.is_empty() {
      return;
    }
    let pages: BTreeSet<u32> = cur.iter().map(|b| b.page).collect();
    out.push(Segment {
      text: cur.iter().map(|b| b.text.as_str()).collect::<Vec<_>>().join("\n"),
      pages: pages.into_iter().collect(),
    });
    cur.clear();
    *cur_len = 0;
  }

  for b in blocks {
    let len = b.text.chars().count();
    if len == 0 {
      continue;
    }
    // Joined with "\n", so every block after the first costs one extra char.
    let added = if cur.is_empty() { len } else { len + 1 };
    if cur_len + added > cfg.max_chars {
      flush(&mut cur, &mut cur_len, &mut out);
      cur.push(b);
      cur_len = len;
    } else {
      cur.push(b);
      cur_len += added;
    }
    if cur_len >= cfg.target_chars {
      flush(&mut cur, &mut cur_len, &mut out);
    }
  }
  flush(&mut cur, &mut cur_len, &mut out);
  out
}
