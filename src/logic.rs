//! Core hurdle flow shared by the HTTP handlers.
//!
//! This includes:
//!   - Serving the learner's current hurdle (chunk + public task, or a boss battle)
//!   - Validating a submission, applying it to the ledger and recording the attempt
//!   - Progress counters and the roadmap graph
//!
//! Reads and writes of one learner's progress on one document run under that
//! pair's lock, so concurrent submissions apply one after the other.

use tracing::{info, instrument, warn};

use crate::boss::{is_boss_hurdle, section_of, section_range, BossBuilder};
use crate::domain::{BossBattle, Chunk, Difficulty, DocId, Document, Progress, Task};
use crate::error::{AppError, AppResult};
use crate::progress::{apply_attempt, apply_skip, AttemptOutcome};
use crate::protocol::{
  boss_to_out, progress_to_out, task_to_out, AnswerIn, DoneOut, HurdleOut, HurdleResponse, ProgressOut, SubmitOut,
};
use crate::roadmap::{build_linear_roadmap, Roadmap};
use crate::state::AppState;
use crate::store::{NewAttempt, StoreError};
use crate::validate::{validate_boss, Validator, Verdict};

const CORRECT_MESSAGE: &str = "Excellent! 🎉";
const INCORRECT_MESSAGE: &str = "Keep learning! 💪";
const SKIP_EXPLANATION: &str = "Question skipped. Try to answer the next one!";

#[instrument(level = "info", skip(state))]
pub async fn current_hurdle(state: &AppState, learner: &str, doc_id: DocId) -> AppResult<HurdleResponse> {
  let _guard = state.locks.acquire(learner, doc_id).await;
  let doc = document(state, doc_id).await?;
  let total = state.store.count_chunks(doc_id).await?;
  let progress = progress_or_start(state, learner, doc_id).await?;
  if progress.cleared >= total {
    return Ok(HurdleResponse::Done(DoneOut { done: true }));
  }

  let idx = progress.cleared;
  let every = state.config.game.boss_every;
  let out = if is_boss_hurdle(idx, every) {
    let battle = boss_for(state, learner, doc_id, section_of(idx, every)).await?;
    HurdleOut {
      chunk: format!("Boss Battle Time! 🏆\n\n{}", battle.title),
      task: boss_to_out(&battle),
      task_type: "boss".into(),
      is_boss: true,
      idx,
      total,
      difficulty: Difficulty::Hard,
      hearts: progress.hearts,
      document_title: doc.title,
    }
  } else {
    let chunk = chunk(state, doc_id, idx).await?;
    let task = task_for(state, &chunk).await?;
    HurdleOut {
      task: task_to_out(&task.payload, &chunk.hash),
      task_type: task.kind().as_str().to_string(),
      is_boss: false,
      idx,
      total,
      difficulty: chunk.difficulty,
      hearts: progress.hearts,
      document_title: doc.title,
      chunk: chunk.text,
    }
  };
  info!(target: "hurdle", %learner, doc_id, idx, is_boss = out.is_boss, task_type = %out.task_type, "Hurdle served");
  Ok(HurdleResponse::Hurdle(Box::new(out)))
}

#[instrument(level = "info", skip(state, body), fields(skip = body.skip))]
pub async fn submit_answer(state: &AppState, learner: &str, doc_id: DocId, body: AnswerIn) -> AppResult<SubmitOut> {
  let _guard = state.locks.acquire(learner, doc_id).await;
  document(state, doc_id).await?;
  let total = state.store.count_chunks(doc_id).await?;
  let mut progress = progress_or_start(state, learner, doc_id).await?;
  if progress.cleared >= total {
    return Err(AppError::bad_request("All chunks completed"));
  }

  let idx = progress.cleared;
  let game = &state.config.game;
  let boss_section = is_boss_hurdle(idx, game.boss_every).then(|| section_of(idx, game.boss_every));
  let confidence = body.confidence.filter(|c| (1..=5).contains(c));

  if body.skip {
    apply_skip(&mut progress, total);
    let task_id = match boss_section {
      Some(_) => None,
      None => Some(task_for(state, &chunk(state, doc_id, idx).await?).await?.id),
    };
    let attempt = NewAttempt {
      learner: learner.to_string(),
      doc_id,
      chunk_idx: idx,
      task_id,
      kind: "skip".into(),
      answer: body.answer,
      correct: false,
      score: 0,
      time_ms: body.elapsed_ms.unwrap_or(0),
      confidence,
    };
    state.store.commit_attempt(&progress, attempt, boss_section).await?;
    info!(target: "hurdle", %learner, doc_id, idx, "Hurdle skipped");
    return Ok(SubmitOut {
      correct: false,
      score: 0,
      points_earned: 0,
      xp: progress.xp,
      streak: progress.streak,
      combo: progress.combo,
      hearts: progress.hearts,
      current: progress.cleared,
      feedback: "Skipped.".into(),
      explanation: SKIP_EXPLANATION.into(),
      skipped: true,
      message: INCORRECT_MESSAGE.into(),
    });
  }

  let (verdict, difficulty, task_id, kind) = match boss_section {
    Some(section) => {
      let battle = boss_for(state, learner, doc_id, section).await?;
      (validate_boss(&battle, &body.answer), Difficulty::Hard, None, "boss".to_string())
    }
    None => {
      let chunk = chunk(state, doc_id, idx).await?;
      let task = task_for(state, &chunk).await?;
      if let Some(claimed) = body.task_type.as_deref() {
        if claimed != task.kind().as_str() {
          warn!(target: "hurdle", %learner, doc_id, idx, claimed, actual = %task.kind(), "Submitted task_type differs from stored task");
        }
      }
      let verdict = Validator::new(state.llm(), &state.config.prompts)
        .validate(&task.payload, &chunk.text, &body.answer)
        .await;
      (verdict, task.difficulty, Some(task.id), task.kind().as_str().to_string())
    }
  };

  let elapsed_ms = body.elapsed_ms.unwrap_or(0);
  let outcome = AttemptOutcome { correct: verdict.is_correct, score: verdict.score, elapsed_ms, difficulty };
  let effect = apply_attempt(&mut progress, outcome, game, total);
  let attempt = NewAttempt {
    learner: learner.to_string(),
    doc_id,
    chunk_idx: idx,
    task_id,
    kind,
    answer: body.answer,
    correct: verdict.is_correct,
    score: verdict.score,
    time_ms: elapsed_ms,
    confidence,
  };
  state.store.commit_attempt(&progress, attempt, effect.cleared_section).await?;

  info!(
    target: "hurdle",
    %learner, doc_id, idx,
    correct = verdict.is_correct,
    score = verdict.score,
    points = effect.points,
    current = progress.cleared,
    "Answer evaluated"
  );
  Ok(submit_out(verdict, effect.points, &progress))
}

#[instrument(level = "debug", skip(state))]
pub async fn progress_for(state: &AppState, learner: &str, doc_id: DocId) -> AppResult<ProgressOut> {
  document(state, doc_id).await?;
  let total = state.store.count_chunks(doc_id).await?;
  let progress = progress_or_start(state, learner, doc_id).await?;
  Ok(progress_to_out(&progress, total))
}

#[instrument(level = "debug", skip(state))]
pub async fn roadmap_for(state: &AppState, doc_id: DocId) -> AppResult<Roadmap> {
  document(state, doc_id).await?;
  let pairs: Vec<(u32, Difficulty)> = state
    .store
    .list_chunks(doc_id)
    .await?
    .iter()
    .map(|c| (c.idx, c.difficulty))
    .collect();
  Ok(build_linear_roadmap(&pairs, state.config.game.boss_every, state.config.game.boss_min_score))
}

fn submit_out(v: Verdict, points: u64, p: &Progress) -> SubmitOut {
  SubmitOut {
    correct: v.is_correct,
    score: v.score,
    points_earned: points,
    xp: p.xp,
    streak: p.streak,
    combo: p.combo,
    hearts: p.hearts,
    current: p.cleared,
    message: if v.is_correct { CORRECT_MESSAGE } else { INCORRECT_MESSAGE }.into(),
    feedback: v.feedback,
    explanation: v.explanation,
    skipped: false,
  }
}

async fn document(state: &AppState, doc_id: DocId) -> AppResult<Document> {
  state
    .store
    .get_document(doc_id)
    .await?
    .ok_or_else(|| AppError::not_found("Document not found"))
}

/// Learners without a row start fresh; the row is written by their first attempt.
async fn progress_or_start(state: &AppState, learner: &str, doc_id: DocId) -> AppResult<Progress> {
  Ok(
    state
      .store
      .load_progress(learner, doc_id)
      .await?
      .unwrap_or_else(|| Progress::new(learner, doc_id, state.config.game.max_hearts)),
  )
}

async fn chunk(state: &AppState, doc_id: DocId, idx: u32) -> AppResult<Chunk> {
  state
    .store
    .chunk_at(doc_id, idx)
    .await?
    .ok_or_else(|| StoreError::Corrupt(format!("document {doc_id} has no chunk {idx}")).into())
}

async fn task_for(state: &AppState, chunk: &Chunk) -> AppResult<Task> {
  state
    .store
    .tasks_for_chunk(chunk.id)
    .await?
    .into_iter()
    .next()
    .ok_or_else(|| StoreError::Corrupt(format!("chunk {} has no task", chunk.id)).into())
}

/// Cached per (learner, document, section) until the boss is passed.
async fn boss_for(state: &AppState, learner: &str, doc_id: DocId, section: u32) -> AppResult<BossBattle> {
  if let Some(b) = state.store.load_boss(learner, doc_id, section).await? {
    return Ok(b);
  }
  let range = section_range(section, state.config.game.boss_every);
  let chunks: Vec<Chunk> = state
    .store
    .list_chunks(doc_id)
    .await?
    .into_iter()
    .filter(|c| range.contains(&c.idx))
    .collect();
  let game = &state.config.game;
  let battle = BossBuilder::new(state.llm(), &state.config.prompts, game.boss_min_score)
    .build(section, &chunks)
    .await;
  state.store.save_boss(learner, doc_id, &battle).await?;
  Ok(battle)
}
