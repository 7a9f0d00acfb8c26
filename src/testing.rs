//! Test doubles shared by unit and router tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::boss::{is_boss_hurdle, section_of};
use crate::config::AppConfig;
use crate::domain::{DocId, TaskPayload};
use crate::extract::PlainTextExtractor;
use crate::openai::{GenerationError, LlmClient};
use crate::state::AppState;
use crate::store::MemoryStore;

/// Answers `chat_json` from a fixed queue; an empty queue is a malformed reply.
pub struct CannedLlm {
  replies: Mutex<VecDeque<Result<Value, GenerationError>>>,
  seen: Mutex<Vec<String>>,
}

impl CannedLlm {
  pub fn new(replies: Vec<Result<Value, GenerationError>>) -> Self {
    Self { replies: Mutex::new(replies.into()), seen: Mutex::new(Vec::new()) }
  }

  /// User prompts received so far, oldest first.
  pub fn prompts(&self) -> Vec<String> {
    self.seen.lock().unwrap().clone()
  }
}

#[async_trait]
impl LlmClient for CannedLlm {
  fn model(&self) -> &str {
    "canned"
  }

  async fn chat_json(&self, _system: &str, user: &str, _temperature: f32) -> Result<Value, GenerationError> {
    self.seen.lock().unwrap().push(user.to_string());
    self
      .replies
      .lock()
      .unwrap()
      .pop_front()
      .unwrap_or_else(|| Err(GenerationError::Malformed("no canned reply left".into())))
  }
}

/// App state over the in-memory store and plain-text extraction, uploads in a
/// temp dir. Keep the `TempDir` alive for the test's duration.
pub fn test_state(llm: Option<Arc<dyn LlmClient>>) -> (Arc<AppState>, TempDir) {
  let dir = TempDir::new().unwrap();
  let mut config = AppConfig::default();
  config.upload_dir = dir.path().join("uploads");
  config.database_url = "memory".into();
  let state = AppState::new(config, Arc::new(MemoryStore::new()), llm, Arc::new(PlainTextExtractor));
  (Arc::new(state), dir)
}

pub const BOUNDARY: &str = "hurdle-test-boundary";

/// A `multipart/form-data` body with one file part.
pub fn multipart_body(field: &str, filename: &str, contents: &[u8]) -> Vec<u8> {
  let mut body = format!(
    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/pdf\r\n\r\n"
  )
  .into_bytes();
  body.extend_from_slice(contents);
  body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
  body
}

/// "word1 word2 ... wordN".
pub fn numbered_words(n: usize) -> String {
  (1..=n).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ")
}

/// The answer that passes the stored task at `idx`. A boss hurdle must have
/// been served first so its battle is cached.
pub async fn correct_answer(state: &AppState, learner: &str, doc_id: DocId, idx: u32) -> Value {
  let every = state.config.game.boss_every;
  if is_boss_hurdle(idx, every) {
    let battle = state.store.load_boss(learner, doc_id, section_of(idx, every)).await.unwrap().expect("boss served");
    return json!(battle.questions.iter().map(|q| q.correct).collect::<Vec<_>>());
  }
  let chunk = state.store.chunk_at(doc_id, idx).await.unwrap().expect("chunk");
  let task = state.store.tasks_for_chunk(chunk.id).await.unwrap().remove(0);
  match task.payload {
    TaskPayload::Cloze { answer, .. } | TaskPayload::Open { answer, .. } => json!(answer),
    TaskPayload::BinaryChoice(c) | TaskPayload::MultipleChoice(c) => json!(c.correct),
    TaskPayload::Matching { pairs } => Value::Object(pairs.into_iter().map(|p| (p.term, Value::String(p.definition))).collect()),
    TaskPayload::Summary { reference, .. } => json!(reference),
  }
}
