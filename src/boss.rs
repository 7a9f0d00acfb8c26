//! Boss battles: a short review quiz at every Nth hurdle covering the section
//! that ends there.

use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::config::Prompts;
use crate::domain::{BossBattle, BossQuestion, Chunk, TaskSource};
use crate::openai::{GenerationError, LlmClient};
use crate::tasks::{fallback, parse_choice, shuffle_choice};
use crate::util::{content_hash, fill_template, seed_from_hash};

const BOSS_TEMPERATURE: f32 = 0.6;
const MIN_QUESTIONS: usize = 3;
const MAX_QUESTIONS: usize = 5;
const OPTIONS: usize = 4;
/// Per-chunk text budget inside the boss prompt.
const CHUNK_PROMPT_CHARS: usize = 1500;

pub fn is_boss_hurdle(idx: u32, every: u32) -> bool {
  every > 0 && (idx + 1) % every == 0
}

pub fn section_of(idx: u32, every: u32) -> u32 {
  if every == 0 { 0 } else { idx / every }
}

/// Chunk indices reviewed by the boss that closes `section`.
pub fn section_range(section: u32, every: u32) -> std::ops::Range<u32> {
  let start = section * every;
  start..start + every
}

pub struct BossBuilder<'a> {
  llm: Option<&'a dyn LlmClient>,
  prompts: &'a Prompts,
  min_score: f64,
}

impl<'a> BossBuilder<'a> {
  pub fn new(llm: Option<&'a dyn LlmClient>, prompts: &'a Prompts, min_score: f64) -> Self {
    Self { llm, prompts, min_score }
  }

  /// Build the battle for `section` from the chunks it covers. Never fails.
  #[instrument(level = "info", skip_all, fields(section = section, chunks = chunks.len()))]
  pub async fn build(&self, section: u32, chunks: &[Chunk]) -> BossBattle {
    let covers = chunks.iter().map(|c| c.idx).collect();
    let seed = seed_from_hash(&content_hash(&chunks.iter().map(|c| c.hash.as_str()).collect::<String>()));

    let (title, questions, source) = match self.build_with_llm(chunks).await {
      Ok((title, questions)) => (title, questions, TaskSource::Llm),
      Err(e) => {
        if matches!(e, GenerationError::Disabled) {
          debug!(target: "hurdle", section, "LLM disabled; using template boss");
        } else {
          warn!(target: "hurdle", section, error = %e, "LLM boss generation failed; using template boss");
        }
        ("Boss Battle: Comprehension Check".to_string(), fallback_questions(chunks), TaskSource::Auto)
      }
    };

    let questions = questions
      .into_iter()
      .enumerate()
      .map(|(i, q)| shuffle_question(q, seed.wrapping_add(i as u64)))
      .collect();

    BossBattle { section, title, covers, questions, min_score: self.min_score, source }
  }

  async fn build_with_llm(&self, chunks: &[Chunk]) -> Result<(String, Vec<BossQuestion>), GenerationError> {
    let llm = self.llm.ok_or(GenerationError::Disabled)?;
    let joined = chunks
      .iter()
      .map(|c| format!("Section {}:\n{}", c.idx + 1, clip_chars(&c.text, CHUNK_PROMPT_CHARS)))
      .collect::<Vec<_>>()
      .join("\n\n");
    let count = chunks.len().clamp(MIN_QUESTIONS, MAX_QUESTIONS).to_string();
    let user = fill_template(&self.prompts.boss_user_template, &[("count", &count), ("chunks", &joined)]);
    let v = llm.chat_json(&self.prompts.boss_system, &user, BOSS_TEMPERATURE).await?;
    parse_battle(&v)
  }
}

/// `{title, questions: [{question, options[4], correct, explanation}]}`; at
/// least three valid questions, extras beyond five dropped.
pub fn parse_battle(v: &Value) -> Result<(String, Vec<BossQuestion>), GenerationError> {
  let title = v
    .get("title")
    .and_then(Value::as_str)
    .map(str::trim)
    .filter(|t| !t.is_empty())
    .unwrap_or("Boss Battle")
    .to_string();
  let raw = v
    .get("questions")
    .and_then(Value::as_array)
    .ok_or_else(|| GenerationError::Schema("boss: missing 'questions'".into()))?;

  let mut questions: Vec<BossQuestion> = Vec::with_capacity(raw.len());
  for q in raw.iter().take(MAX_QUESTIONS) {
    let choice = parse_choice(q).map_err(GenerationError::Schema)?;
    choice.check(OPTIONS).map_err(GenerationError::Schema)?;
    questions.push(choice.into());
  }
  if questions.len() < MIN_QUESTIONS {
    return Err(GenerationError::Schema(format!("boss: {} questions, need {MIN_QUESTIONS}", questions.len())));
  }
  Ok((title, questions))
}

/// One template multiple-choice question per covered chunk.
pub fn fallback_questions(chunks: &[Chunk]) -> Vec<BossQuestion> {
  chunks
    .iter()
    .map(|c| fallback::multiple_choice(&c.text).into())
    .collect()
}

fn shuffle_question(q: BossQuestion, seed: u64) -> BossQuestion {
  shuffle_choice(q.into(), seed).into()
}

fn clip_chars(s: &str, max: usize) -> &str {
  match s.char_indices().nth(max) {
    Some((end, _)) => &s[..end],
    None => s,
  }
}
