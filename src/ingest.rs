//! Upload pipeline: multipart file -> stored PDF -> text -> chunks -> tasks.
//!
//! Everything derived from the file is persisted in one `create_document`
//! call; the uploader starts with a fresh progress row. A stored file whose
//! document was never created is removed again.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use axum::extract::Multipart;
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::difficulty;
use crate::domain::{Document, Progress};
use crate::error::{AppError, AppResult};
use crate::segment::{segment, ChunkStrategy};
use crate::state::AppState;
use crate::store::{NewChunk, NewDocument, NewTask};
use crate::tasks::TaskGenerator;
use crate::util::content_hash;

/// Multipart field carrying the document.
pub const FILE_FIELD: &str = "file";

#[derive(Debug)]
pub struct Upload {
  pub filename: String,
  pub bytes: Vec<u8>,
}

#[derive(Debug)]
pub struct Ingested {
  pub document: Document,
  pub num_chunks: usize,
}

/// Pull the `file` part out of the form and validate it.
pub async fn read_upload(mut multipart: Multipart) -> AppResult<Upload> {
  while let Some(field) = multipart
    .next_field()
    .await
    .map_err(|e| AppError::bad_request(format!("Malformed upload: {e}")))?
  {
    if field.name() != Some(FILE_FIELD) {
      continue;
    }
    let filename = field.file_name().unwrap_or_default().trim().to_string();
    let bytes = field
      .bytes()
      .await
      .map_err(|e| AppError::bad_request(format!("Could not read upload: {e}")))?;
    return validate_upload(filename, bytes.to_vec());
  }
  Err(AppError::bad_request("No file part"))
}

pub fn validate_upload(filename: String, bytes: Vec<u8>) -> AppResult<Upload> {
  if filename.is_empty() {
    return Err(AppError::bad_request("No selected file"));
  }
  let is_pdf = Path::new(&filename)
    .extension()
    .and_then(|e| e.to_str())
    .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
  if !is_pdf {
    return Err(AppError::bad_request("Only PDF files are supported"));
  }
  if bytes.is_empty() {
    return Err(AppError::bad_request("Uploaded file is empty"));
  }
  Ok(Upload { filename, bytes })
}

/// Title shown to learners: the file name without its extension.
pub fn title_for(filename: &str) -> String {
  Path::new(filename)
    .file_stem()
    .and_then(|s| s.to_str())
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .unwrap_or("Untitled")
    .to_string()
}

#[instrument(level = "info", skip_all, fields(%learner, filename = %upload.filename, size = upload.bytes.len()))]
pub async fn ingest(state: &AppState, learner: &str, upload: Upload) -> AppResult<Ingested> {
  let cfg = &state.config;
  tokio::fs::create_dir_all(&cfg.upload_dir).await?;
  let path = cfg.upload_dir.join(format!("{}.pdf", Uuid::new_v4()));
  tokio::fs::write(&path, &upload.bytes).await?;

  let (document, num_chunks) = match build_document(state, upload, &path).await {
    Ok(built) => built,
    Err(e) => {
      discard_upload(&path).await;
      return Err(e);
    }
  };
  state.store.save_progress(&Progress::new(learner, document.id, cfg.game.max_hearts)).await?;

  info!(target: "hurdle", doc_id = document.id, num_chunks, "Document ingested");
  Ok(Ingested { document, num_chunks })
}

async fn discard_upload(path: &Path) {
  if let Err(e) = tokio::fs::remove_file(path).await {
    warn!(target: "hurdle", path = %path.display(), error = %e, "Could not remove orphaned upload");
  }
}

/// Extract, segment, generate and persist. Returns the document and its chunk count.
async fn build_document(state: &AppState, upload: Upload, path: &Path) -> AppResult<(Document, usize)> {
  let cfg = &state.config;
  let size_bytes = upload.bytes.len();
  let extractor = Arc::clone(&state.extractor);
  let text = tokio::task::spawn_blocking(move || extractor.extract(&upload.bytes))
    .await
    .map_err(|e| AppError::Internal(format!("extraction task failed: {e}")))??;

  let segments = segment(&text.blocks(), &cfg.chunking);
  if segments.is_empty() {
    return Err(AppError::Unprocessable(crate::extract::ExtractError::Empty));
  }

  let generator = TaskGenerator::new(state.llm(), &cfg.prompts);
  let mut chunks = Vec::with_capacity(segments.len());
  let mut previous: Vec<String> = Vec::new();
  for (i, seg) in segments.into_iter().enumerate() {
    let idx = i as u32;
    let report = difficulty::estimate(&seg.text);
    let hash = content_hash(&seg.text);
    let generated = generator.generate(cfg.game.kind_for(idx), &seg.text, &hash, &previous).await;
    previous = vec![generated.payload.question_text().to_string()];
    chunks.push(NewChunk {
      idx,
      text: seg.text,
      pages: seg.pages,
      features: report.features,
      difficulty: report.difficulty,
      hash,
      tasks: vec![NewTask { payload: generated.payload, difficulty: report.difficulty, source: generated.source }],
    });
  }
  let num_chunks = chunks.len();

  let mut meta = BTreeMap::new();
  meta.insert("original_filename".to_string(), json!(upload.filename));
  meta.insert("size_bytes".to_string(), json!(size_bytes));
  meta.insert("pages".to_string(), json!(text.pages.len()));
  meta.insert("word_count".to_string(), json!(text.word_count()));
  meta.insert("text_length".to_string(), json!(text.char_count()));
  meta.insert(
    "strategy".to_string(),
    json!(match cfg.chunking.strategy {
      ChunkStrategy::Words => "words",
      ChunkStrategy::Paragraphs => "paragraphs",
    }),
  );

  let document = state
    .store
    .create_document(
      NewDocument {
        title: title_for(&upload.filename),
        source_kind: "pdf".into(),
        storage_ref: path.to_string_lossy().into_owned(),
        meta,
      },
      chunks,
    )
    .await?;
  Ok((document, num_chunks))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::TaskKind;
  use crate::testing::{numbered_words, test_state};

  fn upload(text: &str) -> Upload {
    Upload { filename: "Cell Biology.pdf".into(), bytes: text.as_bytes().to_vec() }
  }

  #[test]
  fn upload_validation() {
    assert!(matches!(validate_upload(String::new(), b"x".to_vec()), Err(AppError::BadRequest(_))));
    assert!(matches!(validate_upload("notes.txt".into(), b"x".to_vec()), Err(AppError::BadRequest(_))));
    assert!(matches!(validate_upload("notes.pdf".into(), Vec::new()), Err(AppError::BadRequest(_))));
    assert!(validate_upload("NOTES.PDF".into(), b"x".to_vec()).is_ok());
  }

  #[test]
  fn titles_drop_the_extension() {
    assert_eq!(title_for("Cell Biology.pdf"), "Cell Biology");
    assert_eq!(title_for(".pdf"), ".pdf");
  }

  #[tokio::test]
  async fn ingest_persists_chunks_tasks_and_progress() {
    let (state, _dir) = test_state(None);
    let out = ingest(&state, "ann", upload(&numbered_words(3000))).await.unwrap();
    assert_eq!(out.num_chunks, 6);
    assert_eq!(out.document.title, "Cell Biology");
    assert_eq!(out.document.meta["word_count"], 3000);
    assert_eq!(out.document.meta["strategy"], "words");
    assert!(Path::new(&out.document.storage_ref).exists());

    let chunks = state.store.list_chunks(out.document.id).await.unwrap();
    assert_eq!(chunks.len(), 6);
    assert!(chunks.iter().all(|c| c.text.split_whitespace().count() == 500));

    let kinds = [TaskKind::MultipleChoice, TaskKind::Cloze, TaskKind::BinaryChoice, TaskKind::Matching, TaskKind::Summary];
    for (chunk, kind) in chunks.iter().zip(kinds) {
      let tasks = state.store.tasks_for_chunk(chunk.id).await.unwrap();
      assert_eq!(tasks.len(), 1);
      assert_eq!(tasks[0].kind(), kind);
      tasks[0].payload.check().unwrap();
    }

    let p = state.store.load_progress("ann", out.document.id).await.unwrap().expect("progress");
    assert_eq!((p.cleared, p.hearts), (0, state.config.game.max_hearts));
  }

  #[tokio::test]
  async fn unreadable_upload_is_rejected() {
    let (state, _dir) = test_state(None);
    let err = ingest(&state, "ann", upload("   \n  ")).await.unwrap_err();
    assert!(matches!(err, AppError::Unprocessable(_)));
  }

  #[tokio::test]
  async fn rejected_uploads_leave_no_file_behind() {
    let (state, _dir) = test_state(None);
    let blank = ingest(&state, "ann", upload("   \n  ")).await;
    assert!(matches!(blank, Err(AppError::Unprocessable(_))));
    let garbled = Upload { filename: "scan.pdf".into(), bytes: vec![0xff, 0xfe, 0x00, 0x9f] };
    assert!(ingest(&state, "ann", garbled).await.is_err());

    let left = std::fs::read_dir(&state.config.upload_dir).unwrap().count();
    assert_eq!(left, 0);
  }
}
