//! PDF text extraction.
//!
//! `pdf-extract` returns the whole document as one string; pages are recovered
//! from the form feeds it inserts between them. Paragraph blocks are split on
//! blank lines and feed the segmenter.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
  #[error("could not read PDF: {0}")]
  Parse(String),
  #[error("document contains no extractable text")]
  Empty,
}

/// A paragraph-level block of text and the page it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
  pub page: u32,
  pub text: String,
}

#[derive(Clone, Debug, Default)]
pub struct ExtractedText {
  pub pages: Vec<String>,
}

impl ExtractedText {
  /// Build from raw extractor output, splitting on form feeds (or triple
  /// newlines when the extractor emitted none).
  pub fn from_raw(raw: &str) -> Self {
    let pages: Vec<String> = if raw.contains('\x0C') {
      raw.split('\x0C').map(str::to_string).collect()
    } else {
      raw.split("\n\n\n").map(str::to_string).collect()
    };
    Self { pages }
  }

  /// Paragraph blocks in reading order with 1-based page numbers.
  pub fn blocks(&self) -> Vec<Block> {
    let mut out = Vec::new();
    for (pno, page) in self.pages.iter().enumerate() {
      for para in page.split("\n\n") {
        let text = para.split_whitespace().collect::<Vec<_>>().join(" ");
        if !text.is_empty() {
          out.push(Block { page: pno as u32 + 1, text });
        }
      }
    }
    out
  }

  pub fn word_count(&self) -> usize {
    self.pages.iter().map(|p| p.split_whitespace().count()).sum()
  }

  pub fn char_count(&self) -> usize {
    self.pages.iter().map(|p| p.trim().chars().count()).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.pages.iter().all(|p| p.trim().is_empty())
  }
}

/// Turns uploaded bytes into text. Implementations must be cheap to share
/// across requests; extraction runs on a blocking thread.
pub trait TextExtractor: Send + Sync {
  fn extract(&self, bytes: &[u8]) -> Result<ExtractedText, ExtractError>;
}

/// Extractor backed by the `pdf-extract` crate.
pub struct PdfExtractor;

impl TextExtractor for PdfExtractor {
  fn extract(&self, bytes: &[u8]) -> Result<ExtractedText, ExtractError> {
    let raw = pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Parse(e.to_string()))?;
    let text = ExtractedText::from_raw(&raw);
    if text.is_empty() {
      return Err(ExtractError::Empty);
    }
    Ok(text)
  }
}

/// Reads uploads as UTF-8 text; form feeds separate pages. Stands in for the
/// PDF library in tests.
#[cfg(test)]
pub struct PlainTextExtractor;

#[cfg(test)]
impl TextExtractor for PlainTextExtractor {
  fn extract(&self, bytes: &[u8]) -> Result<ExtractedText, ExtractError> {
    let raw = std::str::from_utf8(bytes).map_err(|e| ExtractError::Parse(e.to_string()))?;
    let text = ExtractedText::from_raw(raw);
    if text.is_empty() {
      return Err(ExtractError::Empty);
    }
    Ok(text)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pages_split_on_form_feed_and_blocks_on_blank_lines() {
    let text = ExtractedText::from_raw("Intro para.\n\nSecond   para\nwraps.\x0CPage two.");
    assert_eq!(text.pages.len(), 2);
    let blocks = text.blocks();
    assert_eq!(
      blocks,
      vec![
        Block { page: 1, text: "Intro para.".into() },
        Block { page: 1, text: "Second para wraps.".into() },
        Block { page: 2, text: "Page two.".into() },
      ]
    );
    assert_eq!(text.word_count(), 7);
  }

  #[test]
  fn whitespace_only_is_empty() {
    assert!(ExtractedText::from_raw("  \n\x0C\t").is_empty());
    assert!(matches!(PlainTextExtractor.extract(b"   "), Err(ExtractError::Empty)));
  }
}
