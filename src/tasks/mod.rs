//! Task generation: one comprehension task per chunk.
//!
//! The generation service is asked first; anything it returns is parsed into a
//! typed payload and checked. Any failure (service off, transport error, bad
//! JSON, schema violation) is logged and answered by the deterministic
//! templates in [`fallback`]. Choice options are shuffled by the chunk's
//! content hash on both paths, so the same chunk always shows the same order.

pub mod fallback;

use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::config::Prompts;
use crate::domain::{ChoicePayload, MatchPair, TaskKind, TaskPayload, TaskSource, BLANK};
use crate::openai::{GenerationError, LlmClient};
use crate::util::{fill_template, seed_from_hash};

const TASK_TEMPERATURE: f32 = 0.4;

static BLANK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"_{3,}").expect("blank regex"));

#[derive(Clone, Debug, PartialEq)]
pub struct GeneratedTask {
  pub payload: TaskPayload,
  pub source: TaskSource,
}

pub struct TaskGenerator<'a> {
  llm: Option<&'a dyn LlmClient>,
  prompts: &'a Prompts,
}

impl<'a> TaskGenerator<'a> {
  pub fn new(llm: Option<&'a dyn LlmClient>, prompts: &'a Prompts) -> Self {
    Self { llm, prompts }
  }

  /// Never fails: the fallback covers every error.
  #[instrument(level = "debug", skip_all, fields(kind = %kind, text_len = text.len()))]
  pub async fn generate(&self, kind: TaskKind, text: &str, hash: &str, previous: &[String]) -> GeneratedTask {
    let (payload, source) = match self.generate_with_llm(kind, text, previous).await {
      Ok(p) => (p, TaskSource::Llm),
      Err(GenerationError::Disabled) => {
        debug!(target: "hurdle", %kind, "LLM disabled; using template task");
        (fallback::generate(kind, text), TaskSource::Auto)
      }
      Err(e) => {
        warn!(target: "hurdle", %kind, error = %e, "LLM task generation failed; using template task");
        (fallback::generate(kind, text), TaskSource::Auto)
      }
    };
    GeneratedTask { payload: shuffle_choices(payload, seed_from_hash(hash)), source }
  }

  async fn generate_with_llm(&self, kind: TaskKind, text: &str, previous: &[String]) -> Result<TaskPayload, GenerationError> {
    let llm = self.llm.ok_or(GenerationError::Disabled)?;
    let previous = if previous.is_empty() { "(none)".to_string() } else { previous.join("\n") };
    let user = fill_template(
      &self.prompts.task_user_template,
      &[("instructions", self.prompts.instructions_for(kind)), ("chunk", text), ("previous", &previous)],
    );
    let v = llm.chat_json(&self.prompts.task_system, &user, TASK_TEMPERATURE).await?;
    let payload = parse_payload(kind, &v)?;
    payload.check().map_err(GenerationError::Schema)?;
    Ok(payload)
  }
}

/// Map a service response onto the payload for `kind`. Common field aliases
/// are accepted; structure is checked separately.
pub fn parse_payload(kind: TaskKind, v: &Value) -> Result<TaskPayload, GenerationError> {
  let missing = |field: &str| GenerationError::Schema(format!("{kind}: missing '{field}'"));
  match kind {
    TaskKind::Cloze => {
      let prompt = str_field(v, &["prompt", "question", "sentence"]).ok_or_else(|| missing("prompt"))?;
      let answer = str_field(v, &["answer"]).ok_or_else(|| missing("answer"))?;
      Ok(TaskPayload::Cloze { prompt: BLANK_RE.replace_all(&prompt, BLANK).into_owned(), answer })
    }
    TaskKind::BinaryChoice => Ok(TaskPayload::BinaryChoice(parse_choice(v).map_err(GenerationError::Schema)?)),
    TaskKind::MultipleChoice => Ok(TaskPayload::MultipleChoice(parse_choice(v).map_err(GenerationError::Schema)?)),
    TaskKind::Matching => {
      let arr = v
        .get("pairs")
        .or_else(|| v.get("concepts"))
        .and_then(Value::as_array)
        .ok_or_else(|| missing("pairs"))?;
      let pairs = arr
        .iter()
        .map(|p| {
          Some(MatchPair {
            term: str_field(p, &["term"])?,
            definition: str_field(p, &["definition", "meaning"])?,
          })
        })
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| GenerationError::Schema("matching pair without term/definition".into()))?;
      Ok(TaskPayload::Matching { pairs })
    }
    TaskKind::Summary => Ok(TaskPayload::Summary {
      prompt: str_field(v, &["prompt", "question"]).unwrap_or_else(|| "Write a one-line summary of this section.".into()),
      reference: str_field(v, &["reference", "summary", "answer"]).ok_or_else(|| missing("reference"))?,
    }),
    TaskKind::Open => Ok(TaskPayload::Open {
      question: str_field(v, &["question", "prompt"]).ok_or_else(|| missing("question"))?,
      answer: str_field(v, &["answer"]).ok_or_else(|| missing("answer"))?,
    }),
  }
}

/// `{question, options, correct, explanation}` with the usual index aliases.
pub fn parse_choice(v: &Value) -> Result<ChoicePayload, String> {
  let question = str_field(v, &["question", "prompt"]).ok_or("missing 'question'")?;
  let options = v
    .get("options")
    .and_then(Value::as_array)
    .ok_or("missing 'options'")?
    .iter()
    .map(|o| o.as_str().map(|s| s.trim().to_string()))
    .collect::<Option<Vec<_>>>()
    .ok_or("non-string option")?;
  let correct = ["correct", "correct_index", "answer_idx", "answer_index"]
    .iter()
    .find_map(|k| v.get(*k).and_then(index_value))
    .ok_or("missing 'correct' index")?;
  Ok(ChoicePayload {
    question,
    options,
    correct,
    explanation: str_field(v, &["explanation"]).unwrap_or_default(),
  })
}

fn str_field(v: &Value, keys: &[&str]) -> Option<String> {
  keys
    .iter()
    .find_map(|k| v.get(*k).and_then(Value::as_str))
    .map(|s| s.trim().to_string())
    .filter(|s| !s.is_empty())
}

/// Index as a JSON number or a numeric string.
pub fn index_value(v: &Value) -> Option<usize> {
  match v {
    Value::Number(n) => n.as_u64().map(|n| n as usize),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

/// Stable permutation of `0..n` for a seed.
pub fn shuffled_order(n: usize, seed: u64) -> Vec<usize> {
  let mut order: Vec<usize> = (0..n).collect();
  order.shuffle(&mut StdRng::seed_from_u64(seed));
  order
}

/// Reorder options by `shuffled_order` and follow the correct index.
pub fn shuffle_choice(c: ChoicePayload, seed: u64) -> ChoicePayload {
  let order = shuffled_order(c.options.len(), seed);
  let correct = order.iter().position(|&i| i == c.correct).unwrap_or(c.correct);
  let options = order.iter().map(|&i| c.options[i].clone()).collect();
  ChoicePayload { options, correct, ..c }
}

fn shuffle_choices(payload: TaskPayload, seed: u64) -> TaskPayload {
  match payload {
    TaskPayload::BinaryChoice(c) => TaskPayload::BinaryChoice(shuffle_choice(c, seed)),
    TaskPayload::MultipleChoice(c) => TaskPayload::MultipleChoice(shuffle_choice(c, seed)),
    other => other,
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;
  use crate::testing::CannedLlm;
  use crate::util::content_hash;

  const TEXT: &str = "Mitochondria produce most of the chemical energy needed by the cell. \
    This energy is stored in a molecule called ATP.";

  fn correct_option(p: &TaskPayload) -> &str {
    match p {
      TaskPayload::BinaryChoice(c) | TaskPayload::MultipleChoice(c) => &c.options[c.correct],
      other => panic!("not a choice payload: {other:?}"),
    }
  }

  #[tokio::test]
  async fn llm_payload_is_used_when_valid() {
    let llm = CannedLlm::new(vec![Ok(json!({
      "question": "What do mitochondria produce?",
      "options": ["Energy", "Proteins", "Lipids", "DNA"],
      "correct_index": "0",
      "explanation": "They produce chemical energy."
    }))]);
    let prompts = Prompts::default();
    let gen = TaskGenerator::new(Some(&llm), &prompts);
    let t = gen.generate(TaskKind::MultipleChoice, TEXT, &content_hash(TEXT), &[]).await;
    assert_eq!(t.source, TaskSource::Llm);
    assert_eq!(correct_option(&t.payload), "Energy");
    assert!(t.payload.check().is_ok());
  }

  #[tokio::test]
  async fn invalid_llm_payload_falls_back() {
    // Three options for a four-option kind.
    let llm = CannedLlm::new(vec![Ok(json!({"question": "Q?", "options": ["a", "b", "c"], "correct": 0}))]);
    let prompts = Prompts::default();
    let gen = TaskGenerator::new(Some(&llm), &prompts);
    let t = gen.generate(TaskKind::MultipleChoice, TEXT, &content_hash(TEXT), &[]).await;
    assert_eq!(t.source, TaskSource::Auto);
    assert!(t.payload.check().is_ok());
  }

  #[tokio::test]
  async fn service_errors_fall_back() {
    let llm = CannedLlm::new(vec![Err(GenerationError::Timeout)]);
    let prompts = Prompts::default();
    let gen = TaskGenerator::new(Some(&llm), &prompts);
    let t = gen.generate(TaskKind::Cloze, TEXT, &content_hash(TEXT), &[]).await;
    assert_eq!(t.source, TaskSource::Auto);
    assert_eq!(t.payload.kind(), TaskKind::Cloze);
  }

  #[tokio::test]
  async fn no_client_means_template_tasks() {
    let prompts = Prompts::default();
    let gen = TaskGenerator::new(None, &prompts);
    let t = gen.generate(TaskKind::Summary, TEXT, &content_hash(TEXT), &[]).await;
    assert_eq!(t.source, TaskSource::Auto);
    assert!(t.payload.check().is_ok());
  }

  #[tokio::test]
  async fn previous_questions_reach_the_prompt() {
    let llm = CannedLlm::new(vec![Ok(json!({"prompt": "The cell uses ___ for energy.", "answer": "ATP"}))]);
    let prompts = Prompts::default();
    let gen = TaskGenerator::new(Some(&llm), &prompts);
    let prev = vec!["What do mitochondria produce?".to_string()];
    let t = gen.generate(TaskKind::Cloze, TEXT, &content_hash(TEXT), &prev).await;
    assert_eq!(t.payload, TaskPayload::Cloze { prompt: format!("The cell uses {BLANK} for energy."), answer: "ATP".into() });
    let seen = llm.prompts();
    assert!(seen[0].contains("What do mitochondria produce?"));
    assert!(seen[0].contains(TEXT));
  }

  #[tokio::test]
  async fn shuffle_is_deterministic_per_chunk() {
    let prompts = Prompts::default();
    let gen = TaskGenerator::new(None, &prompts);
    let hash = content_hash(TEXT);
    let a = gen.generate(TaskKind::MultipleChoice, TEXT, &hash, &[]).await;
    let b = gen.generate(TaskKind::MultipleChoice, TEXT, &hash, &[]).await;
    assert_eq!(a, b);
    let unshuffled = fallback::multiple_choice(TEXT);
    assert_eq!(correct_option(&a.payload), unshuffled.options[0]);
  }

  #[test]
  fn shuffle_choice_tracks_the_correct_option() {
    let c = ChoicePayload {
      question: "q".into(),
      options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
      correct: 2,
      explanation: String::new(),
    };
    for seed in 0..50u64 {
      let s = shuffle_choice(c.clone(), seed);
      assert_eq!(s.options[s.correct], "c");
      let mut sorted = s.options.clone();
      sorted.sort();
      assert_eq!(sorted, c.options);
    }
    assert_eq!(shuffled_order(4, 7), shuffled_order(4, 7));
  }

  #[test]
  fn matching_accepts_concepts_alias() {
    let v = json!({"concepts": [{"term": "ATP", "definition": "energy carrier"}]});
    let p = parse_payload(TaskKind::Matching, &v).unwrap();
    assert_eq!(p, TaskPayload::Matching { pairs: vec![MatchPair { term: "ATP".into(), definition: "energy carrier".into() }] });
    assert!(parse_payload(TaskKind::Matching, &json!({"pairs": [{"term": "x"}]})).is_err());
  }

  #[test]
  fn index_accepts_numbers_and_numeric_strings() {
    assert_eq!(index_value(&json!(2)), Some(2));
    assert_eq!(index_value(&json!(" 3 ")), Some(3));
    assert_eq!(index_value(&json!(-1)), None);
    assert_eq!(index_value(&json!("B")), None);
  }
}
