//! Small utility helpers used across modules.

use once_cell::sync::Lazy;
use regex::Regex;

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{L}\p{N}]+(?:['-][\p{L}\p{N}]+)*").expect("word regex"));

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
/// This is intentionally simple (no nested/conditional logic).
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = tpl.to_string();
  for (k, v) in pairs {
    let needle = format!("{{{}}}", k);
    out = out.replace(&needle, v);
  }
  out
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with huge request/response payloads.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  let mut end = max;
  while !s.is_char_boundary(end) {
    end -= 1;
  }
  format!("{}… ({} bytes total)", &s[..end], s.len())
}

/// Hex BLAKE3 digest of a chunk's text. Stable across processes, so it doubles
/// as the cache key and the seed for option shuffling.
pub fn content_hash(text: &str) -> String {
  blake3::hash(text.as_bytes()).to_hex().to_string()
}

/// First 64 bits of a hex digest. Anything unparsable seeds with 0.
pub fn seed_from_hash(hash: &str) -> u64 {
  let head: String = hash.chars().take(16).collect();
  u64::from_str_radix(&head, 16).unwrap_or(0)
}

/// Lower-cased word tokens (letters/digits, inner apostrophes and hyphens kept).
pub fn word_tokens(text: &str) -> Vec<String> {
  WORD_RE.find_iter(text).map(|m| m.as_str().to_lowercase()).collect()
}

/// Split text into sentences on terminal punctuation followed by whitespace.
pub fn sentences(text: &str) -> Vec<String> {
  let mut out = Vec::new();
  let mut cur = String::new();
  let mut chars = text.chars().peekable();
  while let Some(ch) = chars.next() {
    cur.push(ch);
    if matches!(ch, '.' | '!' | '?') && chars.peek().map_or(true, |n| n.is_whitespace()) {
      let s = cur.split_whitespace().collect::<Vec<_>>().join(" ");
      if !s.is_empty() {
        out.push(s);
      }
      cur.clear();
    }
  }
  let rest = cur.split_whitespace().collect::<Vec<_>>().join(" ");
  if !rest.is_empty() {
    out.push(rest);
  }
  out
}
