//! Deterministic task templates used when the generation service is off or
//! returns something unusable.
//!
//! Every builder here returns a payload that passes `TaskPayload::check()`,
//! whatever the input text looks like. Options come out unshuffled with the
//! correct answer first; the caller shuffles.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::{ChoicePayload, MatchPair, TaskKind, TaskPayload, BLANK};
use crate::util::{sentences, word_tokens};

const MAX_PROMPT_WORDS: usize = 25;
const MAX_STATEMENT_WORDS: usize = 40;
const SUMMARY_WORDS: usize = 25;
const MATCHING_PAIRS: usize = 4;

static KEYWORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z]+(?:-[A-Za-z]+)*").expect("keyword regex"));
static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d+\b").expect("number regex"));

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
  [
    "about", "above", "after", "again", "against", "also", "although", "among", "another", "because", "been",
    "before", "being", "below", "between", "both", "could", "does", "doing", "down", "during", "each", "either",
    "else", "even", "every", "from", "further", "have", "having", "here", "however", "into", "itself", "just",
    "like", "made", "make", "many", "more", "most", "much", "must", "neither", "only", "other", "over", "same",
    "should", "since", "some", "such", "than", "that", "their", "them", "themselves", "then", "there", "these",
    "they", "this", "those", "through", "thus", "under", "until", "upon", "used", "using", "very", "were",
    "what", "when", "where", "whether", "which", "while", "whom", "whose", "will", "with", "within", "without",
    "would", "your",
  ]
  .into_iter()
  .collect()
});

/// Antonym swaps tried, in order, to turn a true statement into a false one.
static SWAPS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
  [
    ("increases", "decreases"),
    ("increased", "decreased"),
    ("increase", "decrease"),
    ("decreases", "increases"),
    ("decreased", "increased"),
    ("decrease", "increase"),
    ("always", "never"),
    ("never", "always"),
    ("before", "after"),
    ("after", "before"),
    ("more", "less"),
    ("less", "more"),
  ]
  .into_iter()
  .filter_map(|(from, to)| Regex::new(&format!(r"(?i)\b{from}\b")).ok().map(|re| (re, to)))
  .collect()
});

const GENERIC_DISTRACTORS: [&str; 6] = ["process", "structure", "evidence", "pattern", "method", "system"];

pub fn generate(kind: TaskKind, text: &str) -> TaskPayload {
  match kind {
    TaskKind::Cloze => cloze(text),
    TaskKind::BinaryChoice => TaskPayload::BinaryChoice(binary_choice(text)),
    TaskKind::MultipleChoice => TaskPayload::MultipleChoice(multiple_choice(text)),
    TaskKind::Matching => matching(text),
    TaskKind::Summary => summary(text),
    TaskKind::Open => open(text),
  }
}

/// Most frequent content words (lowercase, longer than three letters, not a
/// stopword). Ties go to the longer word, then to the earlier one.
pub fn keywords(text: &str, limit: usize) -> Vec<String> {
  let mut stats: HashMap<String, (usize, usize)> = HashMap::new();
  for (pos, m) in KEYWORD_RE.find_iter(text).enumerate() {
    let w = m.as_str().to_lowercase();
    if w.len() <= 3 || STOPWORDS.contains(w.as_str()) {
      continue;
    }
    stats.entry(w).or_insert((0, pos)).0 += 1;
  }
  let mut ranked: Vec<(String, usize, usize)> = stats.into_iter().map(|(w, (count, first))| (w, count, first)).collect();
  ranked.sort_by(|a, b| b.1.cmp(&a.1).then(b.0.len().cmp(&a.0.len())).then(a.2.cmp(&b.2)));
  ranked.into_iter().take(limit).map(|(w, _, _)| w).collect()
}

/// Blank out the first whole-word occurrence of `word` in the best sentence
/// that contains it. Returns `(prompt, answer as written in the text)`.
fn blank_in_sentence(text: &str, word: &str) -> Option<(String, String)> {
  let re = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(word))).ok()?;
  let sents = sentences(text);
  let sentence = sents
    .iter()
    .filter(|s| !s.contains(BLANK) && re.is_match(s))
    .min_by_key(|s| (s.split_whitespace().count() < 5, s.len()))?;
  let m = re.find(sentence)?;
  let blanked = format!("{}{}{}", &sentence[..m.start()], BLANK, &sentence[m.end()..]);
  Some((window_around_blank(&blanked, MAX_PROMPT_WORDS), m.as_str().to_string()))
}

fn window_around_blank(s: &str, max: usize) -> String {
  let words: Vec<&str> = s.split_whitespace().collect();
  if words.len() <= max {
    return words.join(" ");
  }
  let i = words.iter().position(|w| w.contains(BLANK)).unwrap_or(0);
  let end = (i.saturating_sub(max / 2) + max).min(words.len());
  let start = end - max;
  let mut out = words[start..end].join(" ");
  if start > 0 {
    out = format!("... {out}");
  }
  if end < words.len() {
    out.push_str(" ...");
  }
  out
}

fn clip_words(s: &str, max: usize) -> String {
  s.split_whitespace().take(max).collect::<Vec<_>>().join(" ")
}

/// Keywords first, then any word at all.
fn blank_candidates(text: &str) -> impl Iterator<Item = String> {
  keywords(text, 8).into_iter().chain(word_tokens(text))
}

fn first_blank(text: &str) -> Option<(String, String)> {
  blank_candidates(text).find_map(|w| blank_in_sentence(text, &w))
}

pub fn cloze(text: &str) -> TaskPayload {
  match first_blank(text) {
    Some((prompt, answer)) => TaskPayload::Cloze { prompt, answer },
    None => TaskPayload::Cloze { prompt: format!("Type the word \"next\" to continue: {BLANK}"), answer: "next".into() },
  }
}

pub fn multiple_choice(text: &str) -> ChoicePayload {
  let Some((prompt, answer)) = first_blank(text) else {
    let mut options = vec![summary_reference(text)];
    pad_options(&mut options, 4);
    return ChoicePayload {
      question: "Which of these appears in this section?".into(),
      options,
      correct: 0,
      explanation: "It is taken directly from the text.".into(),
    };
  };
  let mut options = vec![answer.clone()];
  for k in keywords(text, 8) {
    if options.len() == 4 {
      break;
    }
    if !options.iter().any(|o| o.eq_ignore_ascii_case(&k)) {
      options.push(k);
    }
  }
  pad_options(&mut options, 4);
  ChoicePayload {
    question: format!("Which word completes the sentence? {prompt}"),
    explanation: format!("The text reads: \"{}\"", prompt.replacen(BLANK, &answer, 1)),
    options,
    correct: 0,
  }
}

fn pad_options(options: &mut Vec<String>, n: usize) {
  for d in GENERIC_DISTRACTORS {
    if options.len() >= n {
      break;
    }
    if !options.iter().any(|o| o.trim().eq_ignore_ascii_case(d)) {
      options.push(d.to_string());
    }
  }
}

pub fn binary_choice(text: &str) -> ChoicePayload {
  let truth = sentences(text)
    .into_iter()
    .max_by_key(|s| s.len())
    .map(|s| clip_words(&s, MAX_STATEMENT_WORDS))
    .unwrap_or_else(|| "This section contains no readable text.".into());
  let falsehood = falsify(&truth);
  ChoicePayload {
    question: "Which statement is correct?".into(),
    explanation: format!("The text states: \"{truth}\""),
    options: vec![truth, falsehood],
    correct: 0,
  }
}

/// Minimal edit that makes the statement false: an antonym swap, else a bumped
/// number, else an explicit negation.
pub fn falsify(statement: &str) -> String {
  for (re, to) in SWAPS.iter() {
    if re.is_match(statement) {
      let out = re.replacen(statement, 1, *to).into_owned();
      if !out.eq_ignore_ascii_case(statement) {
        return out;
      }
    }
  }
  if let Some(m) = NUMBER_RE.find(statement) {
    if let Some(bumped) = m.as_str().parse::<u64>().ok().and_then(|n| n.checked_add(1)) {
      return format!("{}{}{}", &statement[..m.start()], bumped, &statement[m.end()..]);
    }
  }
  let mut chars = statement.chars();
  let lowered = match chars.next() {
    Some(first) => first.to_lowercase().chain(chars).collect::<String>(),
    None => String::new(),
  };
  format!("It is not true that {lowered}")
}

pub fn matching(text: &str) -> TaskPayload {
  let pairs: Vec<MatchPair> = keywords(text, MATCHING_PAIRS * 2)
    .into_iter()
    .filter_map(|k| blank_in_sentence(text, &k))
    .map(|(definition, term)| MatchPair { term, definition })
    .take(MATCHING_PAIRS)
    .collect();
  if pairs.is_empty() {
    return TaskPayload::Matching {
      pairs: vec![MatchPair { term: "this section".into(), definition: summary_reference(text) }],
    };
  }
  TaskPayload::Matching { pairs }
}

/// First sentence, clipped to 25 words.
pub fn summary_reference(text: &str) -> String {
  sentences(text)
    .first()
    .map(|s| clip_words(s, SUMMARY_WORDS))
    .filter(|s| !s.is_empty())
    .unwrap_or_else(|| "This section contains no readable text.".into())
}

pub fn summary(text: &str) -> TaskPayload {
  TaskPayload::Summary { prompt: "Write a one-line summary of this section.".into(), reference: summary_reference(text) }
}

pub fn open(text: &str) -> TaskPayload {
  match first_blank(text) {
    Some((prompt, answer)) => TaskPayload::Open { question: format!("Which word completes the sentence? {prompt}"), answer },
    None => TaskPayload::Open { question: "What is this section about?".into(), answer: summary_reference(text) },
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const TEXT: &str = "Photosynthesis converts light energy into chemical energy. \
    Chlorophyll absorbs light mostly in the blue and red wavelengths. \
    When light intensity increases, the rate of photosynthesis increases until another factor limits it. \
    Plants store the chemical energy as glucose.";

  const ALL_KINDS: [TaskKind; 6] = [
    TaskKind::Cloze,
    TaskKind::BinaryChoice,
    TaskKind::MultipleChoice,
    TaskKind::Matching,
    TaskKind::Summary,
    TaskKind::Open,
  ];

  #[test]
  fn keywords_rank_by_frequency() {
    assert_eq!(keywords(TEXT, 3), vec!["energy", "light", "photosynthesis"]);
    assert!(keywords("a an the of", 5).is_empty());
  }

  #[test]
  fn every_kind_passes_its_own_check() {
    for text in [TEXT, "", "   ", "!!! ???", "Short.", "a b c", "The 3 cats ran 12 laps."] {
      for kind in ALL_KINDS {
        let p = generate(kind, text);
        assert_eq!(p.kind(), kind);
        assert!(p.check().is_ok(), "kind={kind} text={text:?} payload={p:?} err={:?}", p.check());
      }
    }
  }

  #[test]
  fn cloze_blanks_a_keyword_from_the_text() {
    match cloze(TEXT) {
      TaskPayload::Cloze { prompt, answer } => {
        assert!(prompt.contains(BLANK));
        assert_eq!(answer, "energy");
        assert_eq!(prompt, format!("Plants store the chemical {BLANK} as glucose."));
        assert!(TEXT.contains(&prompt.replace(BLANK, &answer)));
      }
      other => panic!("unexpected payload {other:?}"),
    }
  }

  #[test]
  fn long_sentences_are_windowed_around_the_blank() {
    let long = format!("{} keyword {}.", "filler ".repeat(40).trim(), "tail ".repeat(40).trim());
    let (prompt, answer) = blank_in_sentence(&long, "keyword").unwrap();
    assert_eq!(answer, "keyword");
    assert!(prompt.contains(BLANK));
    assert!(prompt.split_whitespace().filter(|w| *w != "...").count() <= MAX_PROMPT_WORDS);
  }

  #[test]
  fn multiple_choice_puts_the_answer_first() {
    let c = multiple_choice(TEXT);
    assert_eq!(c.correct, 0);
    assert_eq!(c.options.len(), 4);
    assert_eq!(c.options[..3], ["energy", "light", "photosynthesis"]);
  }

  #[test]
  fn falsify_prefers_antonyms_then_numbers() {
    assert_eq!(falsify("Pressure increases with depth."), "Pressure decreases with depth.");
    assert_eq!(falsify("The bridge has 12 spans."), "The bridge has 13 spans.");
    assert_eq!(falsify("Water is wet."), "It is not true that water is wet.");
  }

  #[test]
  fn binary_choice_uses_the_longest_sentence() {
    let c = binary_choice(TEXT);
    assert!(c.options[0].starts_with("When light intensity"));
    assert!(c.options[1].contains("decreases"));
  }

  #[test]
  fn summary_reference_is_clipped() {
    let text = format!("{}. Second sentence.", "word ".repeat(60).trim());
    assert_eq!(summary_reference(&text).split_whitespace().count(), SUMMARY_WORDS);
  }

  #[test]
  fn matching_pairs_use_terms_from_the_text() {
    match matching(TEXT) {
      TaskPayload::Matching { pairs } => {
        assert!(!pairs.is_empty() && pairs.len() <= MATCHING_PAIRS);
        for p in &pairs {
          assert!(p.definition.contains(BLANK));
          assert!(TEXT.to_lowercase().contains(&p.term.to_lowercase()));
        }
      }
      other => panic!("unexpected payload {other:?}"),
    }
  }

  #[test]
  fn output_is_deterministic() {
    for kind in ALL_KINDS {
      assert_eq!(generate(kind, TEXT), generate(kind, TEXT));
    }
  }
}
