//! Public HTTP request/response structs (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{BossBattle, Difficulty, DocId, Progress, TaskPayload};
use crate::tasks::shuffled_order;
use crate::util::seed_from_hash;

#[derive(Debug, Serialize)]
pub struct HealthOut {
  pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct UploadOut {
  pub doc_id: DocId,
  pub num_chunks: usize,
  pub title: String,
}

/// Learner-facing view of a task: everything needed to answer it, nothing
/// that gives the answer away.
#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskOut {
  Cloze { prompt: String },
  BinaryChoice { question: String, options: Vec<String> },
  MultipleChoice { question: String, options: Vec<String> },
  Matching { terms: Vec<String>, definitions: Vec<String> },
  Summary { prompt: String },
  Open { question: String },
  Boss { title: String, questions: Vec<BossQuestionOut>, covers: Vec<u32>, min_score: f64 },
}

#[derive(Debug, Serialize, PartialEq)]
pub struct BossQuestionOut {
  pub question: String,
  pub options: Vec<String>,
}

/// Strip answers. Matching definitions are reordered by the chunk hash so
/// their position gives nothing away and stays stable across requests.
pub fn task_to_out(payload: &TaskPayload, chunk_hash: &str) -> TaskOut {
  match payload {
    TaskPayload::Cloze { prompt, .. } => TaskOut::Cloze { prompt: prompt.clone() },
    TaskPayload::BinaryChoice(c) => TaskOut::BinaryChoice { question: c.question.clone(), options: c.options.clone() },
    TaskPayload::MultipleChoice(c) => TaskOut::MultipleChoice { question: c.question.clone(), options: c.options.clone() },
    TaskPayload::Matching { pairs } => {
      let order = shuffled_order(pairs.len(), seed_from_hash(chunk_hash));
      TaskOut::Matching {
        terms: pairs.iter().map(|p| p.term.clone()).collect(),
        definitions: order.into_iter().map(|i| pairs[i].definition.clone()).collect(),
      }
    }
    TaskPayload::Summary { prompt, .. } => TaskOut::Summary { prompt: prompt.clone() },
    TaskPayload::Open { question, .. } => TaskOut::Open { question: question.clone() },
  }
}

pub fn boss_to_out(b: &BossBattle) -> TaskOut {
  TaskOut::Boss {
    title: b.title.clone(),
    questions: b
      .questions
      .iter()
      .map(|q| BossQuestionOut { question: q.question.clone(), options: q.options.clone() })
      .collect(),
    covers: b.covers.clone(),
    min_score: b.min_score,
  }
}

#[derive(Debug, Serialize)]
pub struct HurdleOut {
  pub chunk: String,
  pub task: TaskOut,
  pub task_type: String,
  pub is_boss: bool,
  pub idx: u32,
  pub total: u32,
  pub difficulty: Difficulty,
  pub hearts: u32,
  pub document_title: String,
}

#[derive(Debug, Serialize)]
pub struct DoneOut {
  pub done: bool,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum HurdleResponse {
  Done(DoneOut),
  Hurdle(Box<HurdleOut>),
}

#[derive(Debug, Default, Deserialize)]
pub struct AnswerIn {
  /// Index, text, or term -> definition object depending on the task kind.
  #[serde(default)]
  pub answer: Value,
  /// Informational; the stored task decides how the answer is checked.
  #[serde(default)]
  pub task_type: Option<String>,
  #[serde(default)]
  pub skip: bool,
  #[serde(default)]
  pub elapsed_ms: Option<u64>,
  /// Self-reported confidence, 1..=5.
  #[serde(default)]
  pub confidence: Option<u8>,
}

#[derive(Debug, Serialize)]
pub struct SubmitOut {
  pub correct: bool,
  pub score: u8,
  pub points_earned: u64,
  pub xp: u64,
  pub streak: u32,
  pub combo: u32,
  pub hearts: u32,
  pub current: u32,
  pub feedback: String,
  pub explanation: String,
  pub skipped: bool,
  pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ProgressOut {
  pub current: u32,
  pub total: u32,
  pub xp: u64,
  pub streak: u32,
  pub combo: u32,
  pub hearts: u32,
  pub done: bool,
}

pub fn progress_to_out(p: &Progress, total: u32) -> ProgressOut {
  ProgressOut {
    current: p.cleared,
    total,
    xp: p.xp,
    streak: p.streak,
    combo: p.combo,
    hearts: p.hearts,
    done: p.cleared >= total,
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;
  use crate::domain::{ChoicePayload, MatchPair};

  #[test]
  fn choice_view_hides_the_answer() {
    let payload = TaskPayload::MultipleChoice(ChoicePayload {
      question: "Q?".into(),
      options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
      correct: 2,
      explanation: "because c".into(),
    });
    let v = serde_json::to_value(task_to_out(&payload, "00")).unwrap();
    assert_eq!(v, json!({"type": "multiple_choice", "question": "Q?", "options": ["a", "b", "c", "d"]}));
  }

  #[test]
  fn matching_view_keeps_every_definition_in_stable_order() {
    let pairs: Vec<MatchPair> = (0..4)
      .map(|i| MatchPair { term: format!("t{i}"), definition: format!("d{i}") })
      .collect();
    let payload = TaskPayload::Matching { pairs };
    let hash = crate::util::content_hash("some chunk");
    let a = task_to_out(&payload, &hash);
    assert_eq!(a, task_to_out(&payload, &hash));
    match a {
      TaskOut::Matching { terms, mut definitions } => {
        assert_eq!(terms, vec!["t0", "t1", "t2", "t3"]);
        definitions.sort();
        assert_eq!(definitions, vec!["d0", "d1", "d2", "d3"]);
      }
      other => panic!("unexpected view {other:?}"),
    }
  }

  #[test]
  fn done_serializes_flat() {
    let v = serde_json::to_value(HurdleResponse::Done(DoneOut { done: true })).unwrap();
    assert_eq!(v, json!({"done": true}));
  }

  #[test]
  fn answer_defaults() {
    let a: AnswerIn = serde_json::from_value(json!({"answer": 2})).unwrap();
    assert_eq!(a.answer, json!(2));
    assert!(!a.skip);
    assert!(a.elapsed_ms.is_none());
  }
}
