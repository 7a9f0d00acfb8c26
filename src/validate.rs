//! Answer validation. Every validator is total: malformed answers are graded
//! as incorrect with a readable message, never an error.

use std::collections::HashSet;

use serde_json::Value;
use tracing::{instrument, warn};

use crate::config::Prompts;
use crate::domain::{BossBattle, ChoicePayload, MatchPair, TaskPayload};
use crate::openai::{GenerationError, LlmClient};
use crate::util::{fill_template, word_tokens};

const MATCHING_PASS: u8 = 70;
const SUMMARY_PASS: f64 = 0.5;
const VALIDATION_TEMPERATURE: f32 = 0.3;

#[derive(Clone, Debug, PartialEq)]
pub struct Verdict {
  pub is_correct: bool,
  /// 0..=100
  pub score: u8,
  pub feedback: String,
  pub explanation: String,
}

impl Verdict {
  fn new(is_correct: bool, score: u8, feedback: impl Into<String>, explanation: impl Into<String>) -> Self {
    Self { is_correct, score: score.min(100), feedback: feedback.into(), explanation: explanation.into() }
  }
}

pub struct Validator<'a> {
  llm: Option<&'a dyn LlmClient>,
  prompts: &'a Prompts,
}

impl<'a> Validator<'a> {
  pub fn new(llm: Option<&'a dyn LlmClient>, prompts: &'a Prompts) -> Self {
    Self { llm, prompts }
  }

  #[instrument(level = "debug", skip_all, fields(kind = %payload.kind()))]
  pub async fn validate(&self, payload: &TaskPayload, chunk_text: &str, answer: &Value) -> Verdict {
    match payload {
      TaskPayload::BinaryChoice(c) | TaskPayload::MultipleChoice(c) => validate_choice(c, answer),
      TaskPayload::Cloze { answer: expected, .. } => validate_cloze(expected, answer),
      TaskPayload::Matching { pairs } => validate_matching(pairs, answer),
      TaskPayload::Summary { reference, .. } => validate_summary(reference, answer),
      TaskPayload::Open { question, answer: expected } => {
        match self.validate_open_with_llm(chunk_text, question, expected, answer).await {
          Ok(v) => v,
          Err(GenerationError::Disabled) => validate_open_locally(expected, answer),
          Err(e) => {
            warn!(target: "hurdle", error = %e, "LLM validation failed; using containment check");
            validate_open_locally(expected, answer)
          }
        }
      }
    }
  }

  async fn validate_open_with_llm(&self, chunk: &str, question: &str, expected: &str, answer: &Value) -> Result<Verdict, GenerationError> {
    let llm = self.llm.ok_or(GenerationError::Disabled)?;
    let given = answer_text(answer);
    let user = fill_template(
      &self.prompts.validation_user_template,
      &[("chunk", chunk), ("question", question), ("expected", expected), ("answer", &given)],
    );
    let v = llm.chat_json(&self.prompts.validation_system, &user, VALIDATION_TEMPERATURE).await?;
    parse_llm_verdict(&v, expected)
  }
}

fn parse_llm_verdict(v: &Value, expected: &str) -> Result<Verdict, GenerationError> {
  let is_correct = match v.get("is_correct") {
    Some(Value::Bool(b)) => *b,
    Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("true"),
    _ => return Err(GenerationError::Schema("validation: missing 'is_correct'".into())),
  };
  let score = v
    .get("score")
    .and_then(Value::as_f64)
    .map(|s| s.clamp(0.0, 100.0).round() as u8)
    .unwrap_or(if is_correct { 100 } else { 0 });
  let text = |k: &str| v.get(k).and_then(Value::as_str).map(str::to_string);
  Ok(Verdict::new(
    is_correct,
    score,
    text("feedback").unwrap_or_else(|| if is_correct { "Good job!".into() } else { "Try again!".into() }),
    text("explanation").unwrap_or_else(|| format!("The correct answer is: {expected}")),
  ))
}

/// Answer as plain text: strings as-is, null as empty, anything else as JSON.
pub fn answer_text(v: &Value) -> String {
  match v {
    Value::String(s) => s.clone(),
    Value::Null => String::new(),
    other => other.to_string(),
  }
}

/// Selected index from a number or numeric string.
fn selected_index(v: &Value) -> Option<i64> {
  match v {
    Value::Number(n) => n.as_i64().or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

pub fn validate_choice(c: &ChoicePayload, answer: &Value) -> Verdict {
  let correct_text = c.options.get(c.correct).map(String::as_str).unwrap_or_default();
  let explanation = format!("The correct answer is: {correct_text}");
  let Some(idx) = selected_index(answer) else {
    return Verdict::new(false, 0, "Please select a valid option.", explanation);
  };
  if idx < 0 || idx as usize >= c.options.len() {
    return Verdict::new(false, 0, "That option does not exist.", explanation);
  }
  if idx as usize == c.correct {
    let feedback = if c.explanation.is_empty() { "Correct!".to_string() } else { c.explanation.clone() };
    Verdict::new(true, 100, feedback, explanation)
  } else {
    Verdict::new(false, 0, format!("Incorrect. {}", c.explanation).trim_end().to_string(), explanation)
  }
}

pub fn validate_cloze(expected: &str, answer: &Value) -> Verdict {
  let given = answer_text(answer);
  let explanation = format!("The missing word is: {expected}");
  if given.trim().is_empty() {
    return Verdict::new(false, 0, "Please type an answer.", explanation);
  }
  if given.trim().to_lowercase() == expected.trim().to_lowercase() {
    Verdict::new(true, 100, "Correct!", explanation)
  } else {
    Verdict::new(false, 0, "Not quite.", explanation)
  }
}

/// The answer maps term -> chosen definition, as an object or as a string
/// holding a JSON object.
pub fn validate_matching(pairs: &[MatchPair], answer: &Value) -> Verdict {
  let explanation = format!(
    "Correct matches: {}",
    pairs.iter().map(|p| format!("{} = {}", p.term, p.definition)).collect::<Vec<_>>().join("; ")
  );
  let parsed;
  let map = match answer {
    Value::Object(m) => m,
    Value::String(s) => match serde_json::from_str::<Value>(s) {
      Ok(Value::Object(m)) => {
        parsed = m;
        &parsed
      }
      _ => return Verdict::new(false, 0, "Could not read your matches.", explanation),
    },
    _ => return Verdict::new(false, 0, "Could not read your matches.", explanation),
  };
  if pairs.is_empty() {
    return Verdict::new(false, 0, "Nothing to match.", explanation);
  }

  let norm = |s: &str| s.trim().to_lowercase();
  let matched = pairs
    .iter()
    .filter(|p| {
      map
        .iter()
        .find(|(term, _)| norm(term) == norm(&p.term))
        .and_then(|(_, chosen)| chosen.as_str())
        .is_some_and(|chosen| norm(chosen) == norm(&p.definition))
    })
    .count();
  let score = ((matched as f64 / pairs.len() as f64) * 100.0).round() as u8;
  Verdict::new(score >= MATCHING_PASS, score, format!("You got {matched}/{} matches correct!", pairs.len()), explanation)
}

/// Jaccard similarity of the two word sets; 0 when both are empty.
pub fn jaccard(a: &str, b: &str) -> f64 {
  let a: HashSet<String> = word_tokens(a).into_iter().collect();
  let b: HashSet<String> = word_tokens(b).into_iter().collect();
  let union = a.union(&b).count();
  if union == 0 {
    return 0.0;
  }
  a.intersection(&b).count() as f64 / union as f64
}

/// Word-set similarity against the reference. A reference without any word
/// tokens is compared as trimmed, case-insensitive text instead.
pub fn validate_summary(reference: &str, answer: &Value) -> Verdict {
  let given = answer_text(answer);
  let sim = if word_tokens(reference).is_empty() {
    let same = !given.trim().is_empty() && given.trim().to_lowercase() == reference.trim().to_lowercase();
    if same { 1.0 } else { 0.0 }
  } else {
    jaccard(&given, reference)
  };
  let score = (sim * 100.0).round() as u8;
  let explanation = format!("Reference summary: {reference}");
  if sim >= SUMMARY_PASS {
    Verdict::new(true, score, "Nice summary!", explanation)
  } else {
    Verdict::new(false, score, "Your summary misses some key points.", explanation)
  }
}

/// Case-insensitive containment in either direction; blank answers never pass.
pub fn validate_open_locally(expected: &str, answer: &Value) -> Verdict {
  let given = answer_text(answer).trim().to_lowercase();
  let want = expected.trim().to_lowercase();
  let ok = !given.is_empty() && !want.is_empty() && (want.contains(&given) || given.contains(&want));
  Verdict::new(
    ok,
    if ok { 100 } else { 0 },
    if ok { "Good job!" } else { "Try again!" },
    format!("The correct answer is: {expected}"),
  )
}

/// The answer is an array with one selected index per question.
pub fn validate_boss(battle: &BossBattle, answer: &Value) -> Verdict {
  let total = battle.questions.len();
  let needed = format!("You need {:.0}% to win.", battle.min_score * 100.0);
  let Some(selected) = answer.as_array() else {
    return Verdict::new(false, 0, "Answer every question, one option each.", needed);
  };
  if total == 0 {
    return Verdict::new(false, 0, "This battle has no questions.", needed);
  }
  let right = battle
    .questions
    .iter()
    .enumerate()
    .filter(|(i, q)| selected.get(*i).and_then(selected_index) == Some(q.correct as i64))
    .count();
  let fraction = right as f64 / total as f64;
  let won = fraction >= battle.min_score;
  let explanation = if won { "Boss defeated!".to_string() } else { needed };
  Verdict::new(won, (fraction * 100.0).round() as u8, format!("You got {right}/{total} right!"), explanation)
}
