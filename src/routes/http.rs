//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented and logs ids and basic result info.

use std::sync::Arc;

use axum::{
  extract::{Multipart, Path, State},
  http::HeaderMap,
  response::IntoResponse,
  Json,
};
use tracing::{info, instrument};

use crate::domain::DocId;
use crate::error::AppResult;
use crate::ingest::{ingest, read_upload};
use crate::logic::*;
use crate::protocol::*;
use crate::roadmap::Roadmap;
use crate::state::AppState;

/// Header naming the learner; authentication lives outside this service.
pub const LEARNER_HEADER: &str = "x-learner-id";
pub const DEFAULT_LEARNER: &str = "anonymous";

pub fn learner_from(headers: &HeaderMap) -> String {
  headers
    .get(LEARNER_HEADER)
    .and_then(|v| v.to_str().ok())
    .map(str::trim)
    .filter(|v| !v.is_empty())
    .unwrap_or(DEFAULT_LEARNER)
    .to_string()
}

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse {
  Json(HealthOut { ok: true })
}

#[instrument(level = "info", skip_all)]
pub async fn http_upload(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  multipart: Multipart,
) -> AppResult<Json<UploadOut>> {
  let learner = learner_from(&headers);
  let upload = read_upload(multipart).await?;
  let out = ingest(&state, &learner, upload).await?;
  info!(target: "hurdle", %learner, doc_id = out.document.id, num_chunks = out.num_chunks, "HTTP upload ingested");
  Ok(Json(UploadOut { doc_id: out.document.id, num_chunks: out.num_chunks, title: out.document.title }))
}

#[instrument(level = "info", skip(state, headers))]
pub async fn http_get_hurdle(
  State(state): State<Arc<AppState>>,
  Path(doc_id): Path<DocId>,
  headers: HeaderMap,
) -> AppResult<Json<HurdleResponse>> {
  let learner = learner_from(&headers);
  Ok(Json(current_hurdle(&state, &learner, doc_id).await?))
}

#[instrument(level = "info", skip(state, headers, body), fields(skip = body.skip))]
pub async fn http_post_hurdle(
  State(state): State<Arc<AppState>>,
  Path(doc_id): Path<DocId>,
  headers: HeaderMap,
  Json(body): Json<AnswerIn>,
) -> AppResult<Json<SubmitOut>> {
  let learner = learner_from(&headers);
  let out = submit_answer(&state, &learner, doc_id, body).await?;
  info!(target: "hurdle", %learner, doc_id, correct = out.correct, current = out.current, "HTTP answer evaluated");
  Ok(Json(out))
}

#[instrument(level = "info", skip(state, headers))]
pub async fn http_get_progress(
  State(state): State<Arc<AppState>>,
  Path(doc_id): Path<DocId>,
  headers: HeaderMap,
) -> AppResult<Json<ProgressOut>> {
  let learner = learner_from(&headers);
  Ok(Json(progress_for(&state, &learner, doc_id).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_roadmap(
  State(state): State<Arc<AppState>>,
  Path(doc_id): Path<DocId>,
) -> AppResult<Json<Roadmap>> {
  Ok(Json(roadmap_for(&state, doc_id).await?))
}
