//! Domain models used by the backend: documents, chunks, tasks, attempts, progress
//! and boss battles.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type DocId = i64;

/// Marker used by cloze prompts for the missing word.
pub const BLANK: &str = "_____";

/// Difficulty label of a chunk or task. Serialized as the single-letter codes
/// the frontend already understands.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Difficulty {
  #[serde(rename = "E", alias = "easy")]
  Easy,
  #[default]
  #[serde(rename = "M", alias = "medium")]
  Medium,
  #[serde(rename = "H", alias = "hard")]
  Hard,
}

impl Difficulty {
  /// Scoring weight on the 1..=5 scale.
  pub fn weight(self) -> u32 {
    match self {
      Difficulty::Easy => 1,
      Difficulty::Medium => 3,
      Difficulty::Hard => 5,
    }
  }

  pub fn code(self) -> &'static str {
    match self {
      Difficulty::Easy => "E",
      Difficulty::Medium => "M",
      Difficulty::Hard => "H",
    }
  }

  pub fn from_code(code: &str) -> Self {
    match code {
      "E" => Difficulty::Easy,
      "H" => Difficulty::Hard,
      _ => Difficulty::Medium,
    }
  }
}

/// Which kind of question a task asks.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
  Cloze,
  BinaryChoice,
  MultipleChoice,
  Matching,
  Summary,
  /// Free short answer; validated by the LLM with a containment fallback.
  Open,
}

impl TaskKind {
  pub fn as_str(self) -> &'static str {
    match self {
      TaskKind::Cloze => "cloze",
      TaskKind::BinaryChoice => "binary_choice",
      TaskKind::MultipleChoice => "multiple_choice",
      TaskKind::Matching => "matching",
      TaskKind::Summary => "summary",
      TaskKind::Open => "open",
    }
  }

  /// Number of options a choice task must carry.
  pub fn option_count(self) -> Option<usize> {
    match self {
      TaskKind::BinaryChoice => Some(2),
      TaskKind::MultipleChoice => Some(4),
      _ => None,
    }
  }
}

impl fmt::Display for TaskKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for TaskKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "cloze" => Ok(TaskKind::Cloze),
      "binary_choice" | "check2" | "true_false" => Ok(TaskKind::BinaryChoice),
      "multiple_choice" | "choice" => Ok(TaskKind::MultipleChoice),
      "matching" => Ok(TaskKind::Matching),
      "summary" | "summary1" => Ok(TaskKind::Summary),
      "open" => Ok(TaskKind::Open),
      other => Err(format!("unknown task kind '{other}'")),
    }
  }
}

/// Where did the task payload come from?
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskSource {
  /// Deterministic template generator.
  Auto,
  /// External text-generation service.
  Llm,
}

impl TaskSource {
  pub fn as_str(self) -> &'static str {
    match self {
      TaskSource::Auto => "auto",
      TaskSource::Llm => "llm",
    }
  }

  pub fn from_code(code: &str) -> Self {
    if code == "llm" { TaskSource::Llm } else { TaskSource::Auto }
  }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChoicePayload {
  pub question: String,
  pub options: Vec<String>,
  pub correct: usize,
  #[serde(default)]
  pub explanation: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchPair {
  pub term: String,
  pub definition: String,
}

/// Kind-specific task body, including the stored answer.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskPayload {
  Cloze { prompt: String, answer: String },
  BinaryChoice(ChoicePayload),
  MultipleChoice(ChoicePayload),
  Matching { pairs: Vec<MatchPair> },
  Summary { prompt: String, reference: String },
  Open { question: String, answer: String },
}

impl TaskPayload {
  pub fn kind(&self) -> TaskKind {
    match self {
      TaskPayload::Cloze { .. } => TaskKind::Cloze,
      TaskPayload::BinaryChoice(_) => TaskKind::BinaryChoice,
      TaskPayload::MultipleChoice(_) => TaskKind::MultipleChoice,
      TaskPayload::Matching { .. } => TaskKind::Matching,
      TaskPayload::Summary { .. } => TaskKind::Summary,
      TaskPayload::Open { .. } => TaskKind::Open,
    }
  }

  /// Question text shown to the learner, used as anti-repetition context.
  pub fn question_text(&self) -> &str {
    match self {
      TaskPayload::Cloze { prompt, .. } | TaskPayload::Summary { prompt, .. } => prompt,
      TaskPayload::BinaryChoice(c) | TaskPayload::MultipleChoice(c) => &c.question,
      TaskPayload::Matching { pairs } => pairs.first().map(|p| p.term.as_str()).unwrap_or(""),
      TaskPayload::Open { question, .. } => question,
    }
  }

  /// Structural invariants every payload of a kind must satisfy before it is
  /// stored or served.
  pub fn check(&self) -> Result<(), String> {
    match self {
      TaskPayload::Cloze { prompt, answer } => {
        if prompt.matches(BLANK).count() != 1 {
          return Err(format!("cloze prompt must contain exactly one '{BLANK}'"));
        }
        if answer.trim().is_empty() {
          return Err("cloze answer is empty".into());
        }
        Ok(())
      }
      TaskPayload::BinaryChoice(c) => check_choice(c, 2),
      TaskPayload::MultipleChoice(c) => check_choice(c, 4),
      TaskPayload::Matching { pairs } => {
        if pairs.is_empty() {
          return Err("matching needs at least one pair".into());
        }
        let mut terms = HashSet::new();
        for p in pairs {
          if p.term.trim().is_empty() || p.definition.trim().is_empty() {
            return Err("matching pair with empty term or definition".into());
          }
          if !terms.insert(p.term.trim().to_lowercase()) {
            return Err(format!("duplicate matching term '{}'", p.term));
          }
        }
        Ok(())
      }
      TaskPayload::Summary { prompt, reference } => {
        if prompt.trim().is_empty() || reference.trim().is_empty() {
          return Err("summary needs a prompt and a reference".into());
        }
        Ok(())
      }
      TaskPayload::Open { question, answer } => {
        if question.trim().is_empty() || answer.trim().is_empty() {
          return Err("open task needs a question and an answer".into());
        }
        Ok(())
      }
    }
  }
}

impl ChoicePayload {
  /// Exactly `n` distinct, non-empty options and an in-range correct index.
  pub fn check(&self, n: usize) -> Result<(), String> {
    check_choice(self, n)
  }
}

fn check_choice(c: &ChoicePayload, n: usize) -> Result<(), String> {
  if c.question.trim().is_empty() {
    return Err("choice question is empty".into());
  }
  if c.options.len() != n {
    return Err(format!("expected exactly {n} options, got {}", c.options.len()));
  }
  if c.correct >= n {
    return Err(format!("correct index {} out of range 0..{n}", c.correct));
  }
  let mut seen = HashSet::new();
  for o in &c.options {
    if o.trim().is_empty() {
      return Err("empty option".into());
    }
    if !seen.insert(o.trim().to_lowercase()) {
      return Err(format!("duplicate option '{o}'"));
    }
  }
  Ok(())
}

/// Surface features the difficulty estimator derived for a chunk.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkFeatures {
  pub fkgl: f64,
  pub jargon: f64,
  pub entities: u32,
  pub score: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Document {
  pub id: DocId,
  pub title: String,
  pub source_kind: String,
  pub storage_ref: String,
  #[serde(default)]
  pub meta: BTreeMap<String, serde_json::Value>,
  pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Chunk {
  pub id: i64,
  pub doc_id: DocId,
  pub idx: u32,
  pub text: String,
  /// 1-based pages the chunk's text came from.
  pub pages: Vec<u32>,
  pub features: ChunkFeatures,
  pub difficulty: Difficulty,
  pub hash: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
  pub id: i64,
  pub doc_id: DocId,
  pub chunk_id: i64,
  pub payload: TaskPayload,
  pub difficulty: Difficulty,
  pub source: TaskSource,
  pub created_at: DateTime<Utc>,
}

impl Task {
  pub fn kind(&self) -> TaskKind {
    self.payload.kind()
  }
}

/// One recorded answer submission. Append-only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Attempt {
  pub id: i64,
  pub learner: String,
  pub doc_id: DocId,
  pub chunk_idx: u32,
  /// None for boss battles, which have no stored task row.
  pub task_id: Option<i64>,
  pub kind: String,
  pub answer: serde_json::Value,
  pub correct: bool,
  pub score: u8,
  pub time_ms: u64,
  pub confidence: Option<u8>,
  pub created_at: DateTime<Utc>,
}

/// Per (learner, document) counters. The only entity updated in place.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Progress {
  pub learner: String,
  pub doc_id: DocId,
  pub cleared: u32,
  pub hearts: u32,
  pub xp: u64,
  pub streak: u32,
  pub combo: u32,
  pub updated_at: DateTime<Utc>,
}

impl Progress {
  pub fn new(learner: &str, doc_id: DocId, hearts: u32) -> Self {
    Self {
      learner: learner.to_string(),
      doc_id,
      cleared: 0,
      hearts,
      xp: 0,
      streak: 0,
      combo: 0,
      updated_at: Utc::now(),
    }
  }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BossQuestion {
  pub question: String,
  pub options: Vec<String>,
  pub correct: usize,
  #[serde(default)]
  pub explanation: String,
}

impl From<ChoicePayload> for BossQuestion {
  fn from(c: ChoicePayload) -> Self {
    Self { question: c.question, options: c.options, correct: c.correct, explanation: c.explanation }
  }
}

impl From<BossQuestion> for ChoicePayload {
  fn from(q: BossQuestion) -> Self {
    Self { question: q.question, options: q.options, correct: q.correct, explanation: q.explanation }
  }
}

/// Periodic review quiz covering the preceding section of chunks.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BossBattle {
  pub section: u32,
  pub title: String,
  /// Chunk indices this battle reviews.
  pub covers: Vec<u32>,
  pub questions: Vec<BossQuestion>,
  pub min_score: f64,
  pub source: TaskSource,
}
