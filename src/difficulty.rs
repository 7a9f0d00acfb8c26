//! Chunk difficulty from surface features.
//!
//! score = fkgl / 12 + 2 * jargon_ratio + min(entities, 10) / 10
//! Easy when score <= 0.9, Medium when <= 1.6, Hard above.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::{ChunkFeatures, Difficulty};
use crate::util::sentences;

const EASY_MAX: f64 = 0.9;
const MEDIUM_MAX: f64 = 1.6;
const ENTITY_CAP: u32 = 10;
/// Graded in place of empty input.
const NEUTRAL_TEXT: &str = "a.";

static ALPHA_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z]+").expect("alpha regex"));
static CAMEL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z][a-z]+[A-Z][A-Za-z]+").expect("camel regex"));
static ENTITY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Z][a-zA-Z]+\b").expect("entity regex"));

#[derive(Clone, Debug, PartialEq)]
pub struct DifficultyReport {
  pub features: ChunkFeatures,
  pub difficulty: Difficulty,
}

pub fn estimate(text: &str) -> DifficultyReport {
  let fkgl = flesch_kincaid_grade(if text.trim().is_empty() { NEUTRAL_TEXT } else { text });
  let jargon = jargon_ratio(text);
  let entities = entity_count(text);
  let score = fkgl / 12.0 + jargon * 2.0 + f64::from(entities.min(ENTITY_CAP)) / 10.0;
  let difficulty = if score <= EASY_MAX {
    Difficulty::Easy
  } else if score <= MEDIUM_MAX {
    Difficulty::Medium
  } else {
    Difficulty::Hard
  };
  DifficultyReport { features: ChunkFeatures { fkgl, jargon, entities, score }, difficulty }
}

/// 0.39 * words/sentences + 11.8 * syllables/words - 15.59
pub fn flesch_kincaid_grade(text: &str) -> f64 {
  let words: Vec<&str> = ALPHA_RE.find_iter(text).map(|m| m.as_str()).collect();
  if words.is_empty() {
    return 0.0;
  }
  let sentence_count = sentences(text).len().max(1) as f64;
  let word_count = words.len() as f64;
  let syllable_count: usize = words.iter().map(|w| syllables(w)).sum();
  0.39 * (word_count / sentence_count) + 11.8 * (syllable_count as f64 / word_count) - 15.59
}

/// Vowel-group count with a silent trailing 'e'; never below one.
fn syllables(word: &str) -> usize {
  let w = word.to_ascii_lowercase();
  let mut count = 0;
  let mut prev_vowel = false;
  for ch in w.chars() {
    let vowel = matches!(ch, 'a' | 'e' | 'i' | 'o' | 'u' | 'y');
    if vowel && !prev_vowel {
      count += 1;
    }
    prev_vowel = vowel;
  }
  if w.len() > 2 && w.ends_with('e') && !w.ends_with("le") && count > 1 {
    count -= 1;
  }
  count.max(1)
}

/// Fraction of alphabetic tokens that look technical: long (>= 10 letters),
/// CamelCase, or ALLCAPS acronyms.
pub fn jargon_ratio(text: &str) -> f64 {
  let toks: Vec<&str> = ALPHA_RE.find_iter(text).map(|m| m.as_str()).collect();
  if toks.is_empty() {
    return 0.0;
  }
  let hard = toks
    .iter()
    .filter(|t| t.len() >= 10 || CAMEL_RE.is_match(t) || (t.len() >= 2 && t.chars().all(|c| c.is_ascii_uppercase())))
    .count();
  hard as f64 / toks.len() as f64
}

/// Capitalised words, a cheap proxy for named entities.
pub fn entity_count(text: &str) -> u32 {
  ENTITY_RE.find_iter(text).count() as u32
}

#[cfg(test)]
mod tests {
  use super::*;

  const SIMPLE: &str = "The cat sat on the mat. It was a sunny day. The dog ran to the park.";
  const TECHNICAL: &str = "Transformer architectures leverage MultiHeadAttention with BERT and GPT \
    representations; parameterization via LayerNormalization stabilizes backpropagation throughout \
    Google DeepMind OpenAI Anthropic Microsoft experimentation.";

  #[test]
  fn simple_prose_is_easy() {
    let r = estimate(SIMPLE);
    assert_eq!(r.difficulty, Difficulty::Easy, "{:?}", r.features);
  }

  #[test]
  fn dense_technical_prose_is_hard() {
    let r = estimate(TECHNICAL);
    assert_eq!(r.difficulty, Difficulty::Hard, "{:?}", r.features);
    assert!(r.features.jargon > 0.3);
    assert!(r.features.entities >= 10);
  }

  #[test]
  fn estimate_is_deterministic() {
    assert_eq!(estimate(TECHNICAL), estimate(TECHNICAL));
    assert_eq!(estimate(SIMPLE), estimate(SIMPLE));
  }

  #[test]
  fn empty_input_defaults_to_neutral_grade() {
    let r = estimate("");
    assert_eq!(r.features.fkgl, flesch_kincaid_grade(NEUTRAL_TEXT));
    assert_eq!(r.features.jargon, 0.0);
    assert_eq!(r.features.entities, 0);
    assert_eq!(r.difficulty, Difficulty::Easy);
  }

  #[test]
  fn syllable_heuristic() {
    assert_eq!(syllables("cat"), 1);
    assert_eq!(syllables("make"), 1);
    assert_eq!(syllables("table"), 2);
    assert_eq!(syllables("reading"), 2);
    assert_eq!(syllables("rhythm"), 1);
  }

  #[test]
  fn jargon_detects_acronyms_camel_and_long_words() {
    assert_eq!(jargon_ratio("API"), 1.0);
    assert_eq!(jargon_ratio("JavaScript"), 1.0);
    assert_eq!(jargon_ratio("internationalization"), 1.0);
    assert_eq!(jargon_ratio("I am here"), 0.0);
  }
}
