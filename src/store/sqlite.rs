//! SQLite-backed store (sqlx). JSON columns are TEXT, timestamps RFC 3339.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite};
use tracing::info;

use super::{NewAttempt, NewChunk, NewDocument, Store, StoreError, StoreResult};
use crate::domain::{Attempt, BossBattle, Chunk, DocId, Difficulty, Document, Progress, Task, TaskSource};

#[derive(Clone)]
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Open (creating if needed) the database at `url` and make sure every
  /// table exists.
  pub async fn connect(url: &str) -> StoreResult<Self> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    if !url.contains(":memory:") {
      if let Some(parent) = options.get_filename().parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
      }
    }
    let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;
    let store = Self { pool };
    store.ensure_schema().await?;
    info!(target: "hurdle_reader", %url, "SQLite store ready");
    Ok(store)
  }

  /// Private in-memory database on a single connection.
  #[cfg(test)]
  pub async fn in_memory() -> StoreResult<Self> {
    let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await?;
    let store = Self { pool };
    store.ensure_schema().await?;
    Ok(store)
  }

  async fn ensure_schema(&self) -> StoreResult<()> {
    let statements = [
      r#"CREATE TABLE IF NOT EXISTS documents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        source_kind TEXT NOT NULL,
        storage_ref TEXT NOT NULL,
        meta TEXT NOT NULL,
        created_at TEXT NOT NULL
      )"#,
      r#"CREATE TABLE IF NOT EXISTS chunks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        doc_id INTEGER NOT NULL REFERENCES documents(id),
        idx INTEGER NOT NULL,
        text TEXT NOT NULL,
        pages TEXT NOT NULL,
        features TEXT NOT NULL,
        difficulty TEXT NOT NULL,
        hash TEXT NOT NULL,
        UNIQUE(doc_id, idx)
      )"#,
      r#"CREATE TABLE IF NOT EXISTS tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        doc_id INTEGER NOT NULL REFERENCES documents(id),
        chunk_id INTEGER NOT NULL REFERENCES chunks(id),
        kind TEXT NOT NULL,
        payload TEXT NOT NULL,
        difficulty TEXT NOT NULL,
        source TEXT NOT NULL,
        created_at TEXT NOT NULL
      )"#,
      r#"CREATE TABLE IF NOT EXISTS attempts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        learner TEXT NOT NULL,
        doc_id INTEGER NOT NULL REFERENCES documents(id),
        chunk_idx INTEGER NOT NULL,
        task_id INTEGER REFERENCES tasks(id),
        kind TEXT NOT NULL,
        answer TEXT NOT NULL,
        correct INTEGER NOT NULL,
        score INTEGER NOT NULL,
        time_ms INTEGER NOT NULL,
        confidence INTEGER,
        created_at TEXT NOT NULL
      )"#,
      "CREATE INDEX IF NOT EXISTS idx_attempts_learner_doc ON attempts(learner, doc_id)",
      r#"CREATE TABLE IF NOT EXISTS progress (
        learner TEXT NOT NULL,
        doc_id INTEGER NOT NULL REFERENCES documents(id),
        cleared INTEGER NOT NULL,
        hearts INTEGER NOT NULL,
        xp INTEGER NOT NULL,
        streak INTEGER NOT NULL,
        combo INTEGER NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (learner, doc_id)
      )"#,
      r#"CREATE TABLE IF NOT EXISTS boss_battles (
        learner TEXT NOT NULL,
        doc_id INTEGER NOT NULL REFERENCES documents(id),
        section INTEGER NOT NULL,
        battle TEXT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (learner, doc_id, section)
      )"#,
    ];
    for sql in statements {
      sqlx::query(sql).execute(&self.pool).await?;
    }
    Ok(())
  }
}

async fn upsert_progress<'e, E>(exec: E, p: &Progress) -> StoreResult<()>
where
  E: sqlx::Executor<'e, Database = Sqlite>,
{
  sqlx::query(
    r#"
    INSERT INTO progress (learner, doc_id, cleared, hearts, xp, streak, combo, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(learner, doc_id) DO UPDATE SET
      cleared = excluded.cleared,
      hearts = excluded.hearts,
      xp = excluded.xp,
      streak = excluded.streak,
      combo = excluded.combo,
      updated_at = excluded.updated_at
    "#,
  )
  .bind(&p.learner)
  .bind(p.doc_id)
  .bind(i64::from(p.cleared))
  .bind(i64::from(p.hearts))
  .bind(p.xp as i64)
  .bind(i64::from(p.streak))
  .bind(i64::from(p.combo))
  .bind(p.updated_at.to_rfc3339())
  .execute(exec)
  .await?;
  Ok(())
}

fn int<T: TryFrom<i64>>(row: &SqliteRow, col: &str) -> StoreResult<T> {
  let v: i64 = row.try_get(col)?;
  T::try_from(v).map_err(|_| StoreError::Corrupt(format!("{col} out of range: {v}")))
}

fn timestamp(row: &SqliteRow, col: &str) -> StoreResult<DateTime<Utc>> {
  let s: String = row.try_get(col)?;
  DateTime::parse_from_rfc3339(&s)
    .map(|d| d.with_timezone(&Utc))
    .map_err(|e| StoreError::Corrupt(format!("{col}: {e}")))
}

fn json<T: serde::de::DeserializeOwned>(row: &SqliteRow, col: &str) -> StoreResult<T> {
  let s: String = row.try_get(col)?;
  Ok(serde_json::from_str(&s)?)
}

fn row_to_document(row: &SqliteRow) -> StoreResult<Document> {
  Ok(Document {
    id: row.try_get("id")?,
    title: row.try_get("title")?,
    source_kind: row.try_get("source_kind")?,
    storage_ref: row.try_get("storage_ref")?,
    meta: json(row, "meta")?,
    created_at: timestamp(row, "created_at")?,
  })
}

fn row_to_chunk(row: &SqliteRow) -> StoreResult<Chunk> {
  let difficulty: String = row.try_get("difficulty")?;
  Ok(Chunk {
    id: row.try_get("id")?,
    doc_id: row.try_get("doc_id")?,
    idx: int(row, "idx")?,
    text: row.try_get("text")?,
    pages: json(row, "pages")?,
    features: json(row, "features")?,
    difficulty: Difficulty::from_code(&difficulty),
    hash: row.try_get("hash")?,
  })
}

fn row_to_task(row: &SqliteRow) -> StoreResult<Task> {
  let difficulty: String = row.try_get("difficulty")?;
  let source: String = row.try_get("source")?;
  Ok(Task {
    id: row.try_get("id")?,
    doc_id: row.try_get("doc_id")?,
    chunk_id: row.try_get("chunk_id")?,
    payload: json(row, "payload")?,
    difficulty: Difficulty::from_code(&difficulty),
    source: TaskSource::from_code(&source),
    created_at: timestamp(row, "created_at")?,
  })
}

fn row_to_progress(row: &SqliteRow) -> StoreResult<Progress> {
  Ok(Progress {
    learner: row.try_get("learner")?,
    doc_id: row.try_get("doc_id")?,
    cleared: int(row, "cleared")?,
    hearts: int(row, "hearts")?,
    xp: int(row, "xp")?,
    streak: int(row, "streak")?,
    combo: int(row, "combo")?,
    updated_at: timestamp(row, "updated_at")?,
  })
}

fn row_to_attempt(row: &SqliteRow) -> StoreResult<Attempt> {
  let confidence: Option<i64> = row.try_get("confidence")?;
  Ok(Attempt {
    id: row.try_get("id")?,
    learner: row.try_get("learner")?,
    doc_id: row.try_get("doc_id")?,
    chunk_idx: int(row, "chunk_idx")?,
    task_id: row.try_get("task_id")?,
    kind: row.try_get("kind")?,
    answer: json(row, "answer")?,
    correct: row.try_get("correct")?,
    score: int(row, "score")?,
    time_ms: int(row, "time_ms")?,
    confidence: confidence.and_then(|c| u8::try_from(c).ok()),
    created_at: timestamp(row, "created_at")?,
  })
}

const CHUNK_COLUMNS: &str = "id, doc_id, idx, text, pages, features, difficulty, hash";

#[async_trait]
impl Store for SqliteStore {
  async fn create_document(&self, doc: NewDocument, chunks: Vec<NewChunk>) -> StoreResult<Document> {
    let now = Utc::now();
    let created_at = now.to_rfc3339();
    let mut tx = self.pool.begin().await?;

    let doc_id = sqlx::query("INSERT INTO documents (title, source_kind, storage_ref, meta, created_at) VALUES (?, ?, ?, ?, ?)")
      .bind(&doc.title)
      .bind(&doc.source_kind)
      .bind(&doc.storage_ref)
      .bind(serde_json::to_string(&doc.meta)?)
      .bind(&created_at)
      .execute(&mut *tx)
      .await?
      .last_insert_rowid();

    for c in &chunks {
      let chunk_id = sqlx::query(
        "INSERT INTO chunks (doc_id, idx, text, pages, features, difficulty, hash) VALUES (?, ?, ?, ?, ?, ?, ?)",
      )
      .bind(doc_id)
      .bind(i64::from(c.idx))
      .bind(&c.text)
      .bind(serde_json::to_string(&c.pages)?)
      .bind(serde_json::to_string(&c.features)?)
      .bind(c.difficulty.code())
      .bind(&c.hash)
      .execute(&mut *tx)
      .await?
      .last_insert_rowid();

      for t in &c.tasks {
        sqlx::query(
          "INSERT INTO tasks (doc_id, chunk_id, kind, payload, difficulty, source, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(doc_id)
        .bind(chunk_id)
        .bind(t.payload.kind().as_str())
        .bind(serde_json::to_string(&t.payload)?)
        .bind(t.difficulty.code())
        .bind(t.source.as_str())
        .bind(&created_at)
        .execute(&mut *tx)
        .await?;
      }
    }
    tx.commit().await?;

    Ok(Document {
      id: doc_id,
      title: doc.title,
      source_kind: doc.source_kind,
      storage_ref: doc.storage_ref,
      meta: doc.meta,
      created_at: now,
    })
  }

  async fn get_document(&self, id: DocId) -> StoreResult<Option<Document>> {
    let row = sqlx::query("SELECT id, title, source_kind, storage_ref, meta, created_at FROM documents WHERE id = ?")
      .bind(id)
      .fetch_optional(&self.pool)
      .await?;
    row.as_ref().map(row_to_document).transpose()
  }

  async fn list_chunks(&self, doc_id: DocId) -> StoreResult<Vec<Chunk>> {
    let rows = sqlx::query(&format!("SELECT {CHUNK_COLUMNS} FROM chunks WHERE doc_id = ? ORDER BY idx"))
      .bind(doc_id)
      .fetch_all(&self.pool)
      .await?;
    rows.iter().map(row_to_chunk).collect()
  }

  async fn count_chunks(&self, doc_id: DocId) -> StoreResult<u32> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM chunks WHERE doc_id = ?")
      .bind(doc_id)
      .fetch_one(&self.pool)
      .await?;
    int(&row, "n")
  }

  async fn chunk_at(&self, doc_id: DocId, idx: u32) -> StoreResult<Option<Chunk>> {
    let row = sqlx::query(&format!("SELECT {CHUNK_COLUMNS} FROM chunks WHERE doc_id = ? AND idx = ?"))
      .bind(doc_id)
      .bind(i64::from(idx))
      .fetch_optional(&self.pool)
      .await?;
    row.as_ref().map(row_to_chunk).transpose()
  }

  async fn tasks_for_chunk(&self, chunk_id: i64) -> StoreResult<Vec<Task>> {
    let rows = sqlx::query(
      "SELECT id, doc_id, chunk_id, payload, difficulty, source, created_at FROM tasks WHERE chunk_id = ? ORDER BY id",
    )
    .bind(chunk_id)
    .fetch_all(&self.pool)
    .await?;
    rows.iter().map(row_to_task).collect()
  }

  async fn load_progress(&self, learner: &str, doc_id: DocId) -> StoreResult<Option<Progress>> {
    let row = sqlx::query(
      "SELECT learner, doc_id, cleared, hearts, xp, streak, combo, updated_at FROM progress WHERE learner = ? AND doc_id = ?",
    )
    .bind(learner)
    .bind(doc_id)
    .fetch_optional(&self.pool)
    .await?;
    row.as_ref().map(row_to_progress).transpose()
  }

  async fn save_progress(&self, progress: &Progress) -> StoreResult<()> {
    upsert_progress(&self.pool, progress).await
  }

  async fn commit_attempt(&self, progress: &Progress, attempt: NewAttempt, clear_boss: Option<u32>) -> StoreResult<Attempt> {
    let created_at = Utc::now();
    let mut tx = self.pool.begin().await?;

    upsert_progress(&mut *tx, progress).await?;

    let id = sqlx::query(
      r#"
      INSERT INTO attempts (learner, doc_id, chunk_idx, task_id, kind, answer, correct, score, time_ms, confidence, created_at)
      VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
      "#,
    )
    .bind(&attempt.learner)
    .bind(attempt.doc_id)
    .bind(i64::from(attempt.chunk_idx))
    .bind(attempt.task_id)
    .bind(&attempt.kind)
    .bind(serde_json::to_string(&attempt.answer)?)
    .bind(attempt.correct)
    .bind(i64::from(attempt.score))
    .bind(attempt.time_ms as i64)
    .bind(attempt.confidence.map(i64::from))
    .bind(created_at.to_rfc3339())
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    if let Some(section) = clear_boss {
      sqlx::query("DELETE FROM boss_battles WHERE learner = ? AND doc_id = ? AND section = ?")
        .bind(&progress.learner)
        .bind(progress.doc_id)
        .bind(i64::from(section))
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    Ok(Attempt {
      id,
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
      created_at,
    })
  }

  async fn attempts_for(&self, learner: &str, doc_id: DocId) -> StoreResult<Vec<Attempt>> {
    let rows = sqlx::query(
      r#"
      SELECT id, learner, doc_id, chunk_idx, task_id, kind, answer, correct, score, time_ms, confidence, created_at
      FROM attempts WHERE learner = ? AND doc_id = ? ORDER BY id
      "#,
    )
    .bind(learner)
    .bind(doc_id)
    .fetch_all(&self.pool)
    .await?;
    rows.iter().map(row_to_attempt).collect()
  }

  async fn load_boss(&self, learner: &str, doc_id: DocId, section: u32) -> StoreResult<Option<BossBattle>> {
    let row = sqlx::query("SELECT battle FROM boss_battles WHERE learner = ? AND doc_id = ? AND section = ?")
      .bind(learner)
      .bind(doc_id)
      .bind(i64::from(section))
      .fetch_optional(&self.pool)
      .await?;
    row.as_ref().map(|r| json(r, "battle")).transpose()
  }

  async fn save_boss(&self, learner: &str, doc_id: DocId, battle: &BossBattle) -> StoreResult<()> {
    sqlx::query(
      r#"
      INSERT INTO boss_battles (learner, doc_id, section, battle, created_at)
      VALUES (?, ?, ?, ?, ?)
      ON CONFLICT(learner, doc_id, section) DO UPDATE SET
        battle = excluded.battle,
        created_at = excluded.created_at
      "#,
    )
    .bind(learner)
    .bind(doc_id)
    .bind(i64::from(battle.section))
    .bind(serde_json::to_string(battle)?)
    .bind(Utc::now().to_rfc3339())
    .execute(&self.pool)
    .await?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use tempfile::TempDir;

  use super::*;
  use crate::store::contract;

  fn database_file_exists(url: &str) -> bool {
    SqliteConnectOptions::from_str(url).map(|o| o.get_filename().exists()).unwrap_or(false)
  }

  #[tokio::test]
  async fn documents_round_trip() {
    let store = SqliteStore::in_memory().await.unwrap();
    contract::documents_round_trip(&store).await;
  }

  #[tokio::test]
  async fn progress_and_attempts() {
    let store = SqliteStore::in_memory().await.unwrap();
    contract::progress_and_attempts(&store).await;
  }

  #[tokio::test]
  async fn file_database_creates_parent_dirs_and_persists() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("nested").join("hurdle.db");
    let url = format!("sqlite:{}?mode=rwc", path.display());
    assert!(!database_file_exists(&url));

    let doc_id = {
      let store = SqliteStore::connect(&url).await.unwrap();
      let doc = store.create_document(contract::sample_document(), contract::sample_chunks(2)).await.unwrap();
      store.pool.close().await;
      doc.id
    };
    assert!(database_file_exists(&url));

    let reopened = SqliteStore::connect(&url).await.unwrap();
    assert_eq!(reopened.count_chunks(doc_id).await.unwrap(), 2);
  }
}
