//! In-process store: one `RwLock` over all tables, so every operation is atomic.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{NewAttempt, NewChunk, NewDocument, Store, StoreResult};
use crate::domain::{Attempt, BossBattle, Chunk, DocId, Document, Progress, Task};

#[derive(Default)]
struct Tables {
  next_id: i64,
  documents: BTreeMap<DocId, Document>,
  /// Per document, ordered by idx.
  chunks: HashMap<DocId, Vec<Chunk>>,
  /// Keyed by chunk id.
  tasks: HashMap<i64, Vec<Task>>,
  attempts: Vec<Attempt>,
  progress: HashMap<(String, DocId), Progress>,
  bosses: HashMap<(String, DocId, u32), BossBattle>,
}

impl Tables {
  fn id(&mut self) -> i64 {
    self.next_id += 1;
    self.next_id
  }
}

#[derive(Default)]
pub struct MemoryStore {
  tables: RwLock<Tables>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl Store for MemoryStore {
  async fn create_document(&self, doc: NewDocument, chunks: Vec<NewChunk>) -> StoreResult<Document> {
    let mut t = self.tables.write().await;
    let now = Utc::now();
    let document = Document {
      id: t.id(),
      title: doc.title,
      source_kind: doc.source_kind,
      storage_ref: doc.storage_ref,
      meta: doc.meta,
      created_at: now,
    };

    let mut rows = Vec::with_capacity(chunks.len());
    for nc in chunks {
      let chunk_id = t.id();
      let mut tasks = Vec::with_capacity(nc.tasks.len());
      for nt in nc.tasks {
        tasks.push(Task {
          id: t.id(),
          doc_id: document.id,
          chunk_id,
          payload: nt.payload,
          difficulty: nt.difficulty,
          source: nt.source,
          created_at: now,
        });
      }
      t.tasks.insert(chunk_id, tasks);
      rows.push(Chunk {
        id: chunk_id,
        doc_id: document.id,
        idx: nc.idx,
        text: nc.text,
        pages: nc.pages,
        features: nc.features,
        difficulty: nc.difficulty,
        hash: nc.hash,
      });
    }
    rows.sort_by_key(|c| c.idx);
    t.chunks.insert(document.id, rows);
    t.documents.insert(document.id, document.clone());
    Ok(document)
  }

  async fn get_document(&self, id: DocId) -> StoreResult<Option<Document>> {
    Ok(self.tables.read().await.documents.get(&id).cloned())
  }

  async fn list_chunks(&self, doc_id: DocId) -> StoreResult<Vec<Chunk>> {
    Ok(self.tables.read().await.chunks.get(&doc_id).cloned().unwrap_or_default())
  }

  async fn count_chunks(&self, doc_id: DocId) -> StoreResult<u32> {
    Ok(self.tables.read().await.chunks.get(&doc_id).map_or(0, |c| c.len() as u32))
  }

  async fn chunk_at(&self, doc_id: DocId, idx: u32) -> StoreResult<Option<Chunk>> {
    let t = self.tables.read().await;
    Ok(t.chunks.get(&doc_id).and_then(|cs| cs.iter().find(|c| c.idx == idx)).cloned())
  }

  async fn tasks_for_chunk(&self, chunk_id: i64) -> StoreResult<Vec<Task>> {
    Ok(self.tables.read().await.tasks.get(&chunk_id).cloned().unwrap_or_default())
  }

  async fn load_progress(&self, learner: &str, doc_id: DocId) -> StoreResult<Option<Progress>> {
    Ok(self.tables.read().await.progress.get(&(learner.to_string(), doc_id)).cloned())
  }

  async fn save_progress(&self, progress: &Progress) -> StoreResult<()> {
    let mut t = self.tables.write().await;
    t.progress.insert((progress.learner.clone(), progress.doc_id), progress.clone());
    Ok(())
  }

  async fn commit_attempt(&self, progress: &Progress, attempt: NewAttempt, clear_boss: Option<u32>) -> StoreResult<Attempt> {
    let mut t = self.tables.write().await;
    let row = Attempt {
      id: t.id(),
      learner: attempt.learner,
      doc_id: attempt.doc_id,
      chunk_idx: attempt.chunk_idx,
      task_id: attempt.task_id,
      kind: attempt.kind,
      answer: attempt.answer,
      correct: attempt.correct,
      score: attempt.score,
      time_ms: attempt.time_ms,
      confidence: attempt.confidence,
      created_at: Utc::now(),
    };
    t.attempts.push(row.clone());
    t.progress.insert((progress.learner.clone(), progress.doc_id), progress.clone());
    if let Some(section) = clear_boss {
      t.bosses.remove(&(progress.learner.clone(), progress.doc_id, section));
    }
    Ok(row)
  }

  async fn attempts_for(&self, learner: &str, doc_id: DocId) -> StoreResult<Vec<Attempt>> {
    let t = self.tables.read().await;
    Ok(t.attempts.iter().filter(|a| a.learner == learner && a.doc_id == doc_id).cloned().collect())
  }

  async fn load_boss(&self, learner: &str, doc_id: DocId, section: u32) -> StoreResult<Option<BossBattle>> {
    Ok(self.tables.read().await.bosses.get(&(learner.to_string(), doc_id, section)).cloned())
  }

  async fn save_boss(&self, learner: &str, doc_id: DocId, battle: &BossBattle) -> StoreResult<()> {
    let mut t = self.tables.write().await;
    t.bosses.insert((learner.to_string(), doc_id, battle.section), battle.clone());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::contract;

  #[tokio::test]
  async fn documents_round_trip() {
    contract::documents_round_trip(&MemoryStore::new()).await;
  }

  #[tokio::test]
  async fn progress_and_attempts() {
    contract::progress_and_attempts(&MemoryStore::new()).await;
  }
}
