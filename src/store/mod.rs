//! Storage capability: documents, chunks, tasks, attempts, progress and cached
//! boss battles behind one async trait.
//!
//! Two implementations:
//!   - [`MemoryStore`] keeps everything in process (tests, `DATABASE_URL=memory`).
//!   - [`SqliteStore`] persists through sqlx; tables are created on start.
//!
//! Multi-row writes (`create_document`, `commit_attempt`) are atomic in both.

mod memory;
mod sqlite;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::domain::{
  Attempt, BossBattle, Chunk, ChunkFeatures, DocId, Difficulty, Document, Progress, Task, TaskPayload, TaskSource,
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("database error: {0}")]
  Sqlx(#[from] sqlx::Error),

  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("corrupt row: {0}")]
  Corrupt(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Document fields known before it has an id.
#[derive(Clone, Debug)]
pub struct NewDocument {
  pub title: String,
  pub source_kind: String,
  pub storage_ref: String,
  pub meta: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone, Debug)]
pub struct NewTask {
  pub payload: TaskPayload,
  pub difficulty: Difficulty,
  pub source: TaskSource,
}

/// A chunk and the tasks generated for it, inserted together.
#[derive(Clone, Debug)]
pub struct NewChunk {
  pub idx: u32,
  pub text: String,
  pub pages: Vec<u32>,
  pub features: ChunkFeatures,
  pub difficulty: Difficulty,
  pub hash: String,
  pub tasks: Vec<NewTask>,
}

#[derive(Clone, Debug)]
pub struct NewAttempt {
  pub learner: String,
  pub doc_id: DocId,
  pub chunk_idx: u32,
  pub task_id: Option<i64>,
  pub kind: String,
  pub answer: serde_json::Value,
  pub correct: bool,
  pub score: u8,
  pub time_ms: u64,
  pub confidence: Option<u8>,
}

#[async_trait]
pub trait Store: Send + Sync {
  /// Insert the document, its chunks and their tasks in one unit.
  async fn create_document(&self, doc: NewDocument, chunks: Vec<NewChunk>) -> StoreResult<Document>;

  async fn get_document(&self, id: DocId) -> StoreResult<Option<Document>>;

  /// Chunks in reading order.
  async fn list_chunks(&self, doc_id: DocId) -> StoreResult<Vec<Chunk>>;

  async fn count_chunks(&self, doc_id: DocId) -> StoreResult<u32>;

  async fn chunk_at(&self, doc_id: DocId, idx: u32) -> StoreResult<Option<Chunk>>;

  async fn tasks_for_chunk(&self, chunk_id: i64) -> StoreResult<Vec<Task>>;

  async fn load_progress(&self, learner: &str, doc_id: DocId) -> StoreResult<Option<Progress>>;

  /// Insert or replace the (learner, document) row.
  async fn save_progress(&self, progress: &Progress) -> StoreResult<()>;

  /// Save progress, append the attempt and drop the cached boss of
  /// `clear_boss` (if any) in one unit.
  async fn commit_attempt(&self, progress: &Progress, attempt: NewAttempt, clear_boss: Option<u32>) -> StoreResult<Attempt>;

  /// Attempts in submission order.
  async fn attempts_for(&self, learner: &str, doc_id: DocId) -> StoreResult<Vec<Attempt>>;

  async fn load_boss(&self, learner: &str, doc_id: DocId, section: u32) -> StoreResult<Option<BossBattle>>;

  async fn save_boss(&self, learner: &str, doc_id: DocId, battle: &BossBattle) -> StoreResult<()>;
}

/// `memory` selects the in-process store; anything else is a sqlx SQLite URL.
pub async fn open_store(database_url: &str) -> StoreResult<Arc<dyn Store>> {
  if database_url.trim().eq_ignore_ascii_case("memory") {
    info!(target: "hurdle_reader", "Using in-memory store");
    return Ok(Arc::new(MemoryStore::new()));
  }
  let store = SqliteStore::connect(database_url).await?;
  Ok(Arc::new(store))
}

#[cfg(test)]
pub(crate) mod contract {
  //! Behaviour every `Store` must show; run against both implementations.

  use serde_json::json;

  use super::*;
  use crate::domain::{ChoicePayload, TaskKind};

  pub fn sample_chunks(n: u32) -> Vec<NewChunk> {
    (0..n)
      .map(|idx| NewChunk {
        idx,
        text: format!("Chunk number {idx} talks about topic {idx}."),
        pages: vec![idx + 1],
        features: ChunkFeatures { fkgl: 4.5, jargon: 0.1, entities: 2, score: 0.7 },
        difficulty: Difficulty::Easy,
        hash: format!("{idx:064x}"),
        tasks: vec![NewTask {
          payload: TaskPayload::MultipleChoice(ChoicePayload {
            question: format!("Question {idx}?"),
            options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            correct: 2,
            explanation: "because".into(),
          }),
          difficulty: Difficulty::Easy,
          source: TaskSource::Auto,
        }],
      })
      .collect()
  }

  pub fn sample_document() -> NewDocument {
    let mut meta = BTreeMap::new();
    meta.insert("original_filename".to_string(), json!("notes.pdf"));
    NewDocument { title: "notes".into(), source_kind: "pdf".into(), storage_ref: "/tmp/x.pdf".into(), meta }
  }

  fn attempt(doc_id: DocId, chunk_idx: u32, correct: bool) -> NewAttempt {
    NewAttempt {
      learner: "ann".into(),
      doc_id,
      chunk_idx,
      task_id: None,
      kind: "boss".into(),
      answer: json!([0, 1]),
      correct,
      score: if correct { 100 } else { 0 },
      time_ms: 1234,
      confidence: Some(3),
    }
  }

  fn battle(section: u32) -> BossBattle {
    BossBattle {
      section,
      title: "Boss".into(),
      covers: vec![0, 1, 2, 3, 4],
      questions: vec![],
      min_score: 0.75,
      source: TaskSource::Auto,
    }
  }

  pub async fn documents_round_trip(store: &dyn Store) {
    let doc = store.create_document(sample_document(), sample_chunks(3)).await.unwrap();
    let loaded = store.get_document(doc.id).await.unwrap().expect("document");
    assert_eq!(loaded.title, "notes");
    assert_eq!(loaded.meta["original_filename"], "notes.pdf");
    assert!(store.get_document(doc.id + 100).await.unwrap().is_none());

    assert_eq!(store.count_chunks(doc.id).await.unwrap(), 3);
    let chunks = store.list_chunks(doc.id).await.unwrap();
    assert_eq!(chunks.iter().map(|c| c.idx).collect::<Vec<_>>(), vec![0, 1, 2]);
    assert_eq!(chunks[1].pages, vec![2]);
    assert_eq!(chunks[1].features.entities, 2);

    let c2 = store.chunk_at(doc.id, 2).await.unwrap().expect("chunk 2");
    assert_eq!(c2.text, "Chunk number 2 talks about topic 2.");
    assert!(store.chunk_at(doc.id, 3).await.unwrap().is_none());

    let tasks = store.tasks_for_chunk(c2.id).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].kind(), TaskKind::MultipleChoice);
    assert_eq!(tasks[0].chunk_id, c2.id);
    assert_eq!(tasks[0].doc_id, doc.id);

    let other = store.create_document(sample_document(), sample_chunks(1)).await.unwrap();
    assert_ne!(other.id, doc.id);
    assert_eq!(store.count_chunks(other.id).await.unwrap(), 1);
  }

  pub async fn progress_and_attempts(store: &dyn Store) {
    let doc = store.create_document(sample_document(), sample_chunks(5)).await.unwrap();
    assert!(store.load_progress("ann", doc.id).await.unwrap().is_none());

    let mut p = Progress::new("ann", doc.id, 5);
    store.save_progress(&p).await.unwrap();
    p.cleared = 1;
    p.xp = 30;
    store.save_progress(&p).await.unwrap();
    let loaded = store.load_progress("ann", doc.id).await.unwrap().expect("progress");
    assert_eq!((loaded.cleared, loaded.xp, loaded.hearts), (1, 30, 5));
    assert!(store.load_progress("bob", doc.id).await.unwrap().is_none());

    store.save_boss("ann", doc.id, &battle(0)).await.unwrap();
    store.save_boss("ann", doc.id, &battle(1)).await.unwrap();
    assert_eq!(store.load_boss("ann", doc.id, 0).await.unwrap(), Some(battle(0)));
    assert!(store.load_boss("bob", doc.id, 0).await.unwrap().is_none());

    p.cleared = 2;
    p.streak = 1;
    let a = store.commit_attempt(&p, attempt(doc.id, 1, true), Some(0)).await.unwrap();
    assert_eq!(a.chunk_idx, 1);
    assert_eq!(a.answer, json!([0, 1]));
    assert_eq!(a.confidence, Some(3));
    assert!(a.task_id.is_none());
    assert!(store.load_boss("ann", doc.id, 0).await.unwrap().is_none(), "section 0 cache dropped");
    assert!(store.load_boss("ann", doc.id, 1).await.unwrap().is_some(), "other sections kept");
    assert_eq!(store.load_progress("ann", doc.id).await.unwrap().expect("progress").cleared, 2);

    store.commit_attempt(&p, attempt(doc.id, 2, false), None).await.unwrap();
    let all = store.attempts_for("ann", doc.id).await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(all[0].correct && !all[1].correct);
    assert!(all[0].id < all[1].id);
    assert!(store.attempts_for("bob", doc.id).await.unwrap().is_empty());
  }
}
