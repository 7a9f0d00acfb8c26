//! Configuration: environment variables plus an optional TOML file.
//!
//! The TOML file (HURDLE_CONFIG_PATH) may contain `[prompts]`, `[chunking]`,
//! `[game]` and `[llm]` tables; every key is optional. Environment variables win
//! over the file for the settings they cover.

use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info};

use crate::domain::TaskKind;
use crate::progress::GameRules;
use crate::segment::SegmentConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read {path}: {source}")]
  Read { path: String, source: std::io::Error },
  #[error("failed to parse {path}: {source}")]
  Parse { path: String, source: toml::de::Error },
}

/// Shape of the optional TOML file.
#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
  pub prompts: Prompts,
  pub chunking: SegmentConfig,
  pub game: GameRules,
  pub llm: LlmSettings,
}

/// External text-generation settings. The API key only ever comes from the
/// environment.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
  #[serde(skip)]
  pub api_key: Option<String>,
  pub enabled: bool,
  pub base_url: String,
  pub model: String,
  pub timeout_secs: u64,
  pub max_retries: u32,
}

impl Default for LlmSettings {
  fn default() -> Self {
    Self {
      api_key: None,
      enabled: true,
      base_url: "https://api.openai.com/v1".into(),
      model: "gpt-4o-mini".into(),
      timeout_secs: 20,
      max_retries: 1,
    }
  }
}

/// Prompts used for task generation, open-answer validation and boss battles.
/// Override them in TOML to tune tone/structure.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub task_system: String,
  /// Placeholders: {instructions}, {chunk}, {previous}.
  pub task_user_template: String,
  pub cloze_instructions: String,
  pub binary_choice_instructions: String,
  pub multiple_choice_instructions: String,
  pub matching_instructions: String,
  pub summary_instructions: String,
  pub open_instructions: String,
  pub validation_system: String,
  /// Placeholders: {chunk}, {question}, {expected}, {answer}.
  pub validation_user_template: String,
  pub boss_system: String,
  /// Placeholders: {count}, {chunks}.
  pub boss_user_template: String,
}

impl Prompts {
  pub fn instructions_for(&self, kind: TaskKind) -> &str {
    match kind {
      TaskKind::Cloze => &self.cloze_instructions,
      TaskKind::BinaryChoice => &self.binary_choice_instructions,
      TaskKind::MultipleChoice => &self.multiple_choice_instructions,
      TaskKind::Matching => &self.matching_instructions,
      TaskKind::Summary => &self.summary_instructions,
      TaskKind::Open => &self.open_instructions,
    }
  }
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      task_system: "You write short reading-comprehension questions for a study app. Use only facts stated in the text. Respond ONLY with strict JSON.".into(),
      task_user_template: "{instructions}\n\nText:\n{chunk}\n\nDo not repeat these earlier questions:\n{previous}".into(),
      cloze_instructions: "Create ONE fill-in-the-blank sentence (max 20 words) taken from the text, with exactly one blank written as _____. The answer is one or two words. Return JSON {\"prompt\": string, \"answer\": string}.".into(),
      binary_choice_instructions: "Create ONE true/false style question: two statements, exactly one of which the text supports. Return JSON {\"question\": string, \"options\": [string, string], \"correct\": 0 or 1, \"explanation\": string}.".into(),
      multiple_choice_instructions: "Create ONE multiple choice question (max 15 words) about a specific, important detail of the text. Exactly 4 plausible options of similar length, one correct. Return JSON {\"question\": string, \"options\": [4 strings], \"correct\": index 0-3, \"explanation\": string}.".into(),
      matching_instructions: "Extract 4 key terms and their short definitions from the text. Return JSON {\"pairs\": [{\"term\": string, \"definition\": string}]}.".into(),
      summary_instructions: "Ask the learner to summarise the text in one sentence and give a reference summary (max 25 words). Return JSON {\"prompt\": string, \"reference\": string}.".into(),
      open_instructions: "Ask ONE short-answer question answerable in a few words from the text. Return JSON {\"question\": string, \"answer\": string}.".into(),
      validation_system: "You grade short answers against a passage. Be fair about wording, strict about facts. Reply as compact JSON.".into(),
      validation_user_template: "Passage: {chunk}\nQuestion: {question}\nExpected answer: {expected}\nStudent answer: {answer}\nReturn JSON {\"is_correct\": boolean, \"score\": 0-100, \"feedback\": string, \"explanation\": string}.".into(),
      boss_system: "You write review quizzes for a study app. Respond ONLY with strict JSON.".into(),
      boss_user_template: "Create a boss battle review with {count} questions mixing why/how/compare, answerable from these sections.\n\n{chunks}\n\nReturn JSON {\"title\": string, \"questions\": [{\"question\": string, \"options\": [4 strings], \"correct\": index 0-3, \"explanation\": string}]}.".into(),
    }
  }
}

/// Fully resolved process configuration.
#[derive(Clone, Debug)]
pub struct AppConfig {
  pub port: u16,
  pub upload_dir: PathBuf,
  /// sqlx URL, or "memory" for the in-process store.
  pub database_url: String,
  pub max_upload_bytes: usize,
  pub prompts: Prompts,
  pub chunking: SegmentConfig,
  pub game: GameRules,
  pub llm: LlmSettings,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self::from_file_and_lookup(FileConfig::default(), |_| None)
  }
}

impl AppConfig {
  /// Read `.env`-populated process environment and the optional TOML file.
  /// A broken TOML file is logged and ignored.
  pub fn from_env() -> Self {
    let file = match std::env::var("HURDLE_CONFIG_PATH") {
      Ok(path) => match load_file_config(&path) {
        Ok(cfg) => {
          info!(target: "hurdle_reader", %path, "Loaded config file (TOML)");
          cfg
        }
        Err(e) => {
          error!(target: "hurdle_reader", error = %e, "Ignoring config file");
          FileConfig::default()
        }
      },
      Err(_) => FileConfig::default(),
    };
    Self::from_file_and_lookup(file, |k| std::env::var(k).ok())
  }

  pub fn from_file_and_lookup(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
    let mut llm = file.llm;
    llm.api_key = env("OPENAI_API_KEY").filter(|k| !k.trim().is_empty());
    if let Some(url) = env("OPENAI_BASE_URL") {
      llm.base_url = url;
    }
    if let Some(model) = env("OPENAI_MODEL") {
      llm.model = model;
    }
    if let Some(flag) = env("LLM_ENABLED") {
      llm.enabled = parse_flag(&flag).unwrap_or(llm.enabled);
    }

    let max_upload_mb = env("MAX_UPLOAD_MB").and_then(|v| v.parse::<usize>().ok()).unwrap_or(25);

    Self {
      port: env("PORT").and_then(|p| p.parse::<u16>().ok()).unwrap_or(3000),
      upload_dir: PathBuf::from(env("UPLOAD_DIR").unwrap_or_else(|| "./uploads".into())),
      database_url: env("DATABASE_URL").unwrap_or_else(|| "sqlite:./instance/hurdle.db?mode=rwc".into()),
      max_upload_bytes: max_upload_mb * 1024 * 1024,
      prompts: file.prompts,
      chunking: file.chunking,
      game: file.game,
      llm,
    }
  }
}

pub fn load_file_config(path: &str) -> Result<FileConfig, ConfigError> {
  let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_string(), source })?;
  parse_file_config(&s).map_err(|source| ConfigError::Parse { path: path.to_string(), source })
}

pub fn parse_file_config(s: &str) -> Result<FileConfig, toml::de::Error> {
  toml::from_str::<FileConfig>(s)
}

fn parse_flag(v: &str) -> Option<bool> {
  match v.trim().to_ascii_lowercase().as_str() {
    "1" | "true" | "yes" | "on" => Some(true),
    "0" | "false" | "no" | "off" => Some(false),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use super::*;
  use crate::progress::Scoring;
  use crate::segment::ChunkStrategy;

  fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    move |k| map.get(k).cloned()
  }

  #[test]
  fn defaults_without_environment() {
    let cfg = AppConfig::from_file_and_lookup(FileConfig::default(), lookup(&[]));
    assert_eq!(cfg.port, 3000);
    assert_eq!(cfg.upload_dir, PathBuf::from("./uploads"));
    assert!(cfg.llm.api_key.is_none());
    assert_eq!(cfg.game.boss_every, 5);
    assert_eq!(cfg.chunking.words_per_chunk, 500);
    assert_eq!(cfg.max_upload_bytes, 25 * 1024 * 1024);
  }

  #[test]
  fn environment_overrides() {
    let cfg = AppConfig::from_file_and_lookup(
      FileConfig::default(),
      lookup(&[
        ("PORT", "8081"),
        ("UPLOAD_DIR", "/tmp/up"),
        ("DATABASE_URL", "memory"),
        ("OPENAI_API_KEY", "sk-1"),
        ("OPENAI_MODEL", "gpt-x"),
        ("LLM_ENABLED", "off"),
      ]),
    );
    assert_eq!(cfg.port, 8081);
    assert_eq!(cfg.database_url, "memory");
    assert_eq!(cfg.llm.api_key.as_deref(), Some("sk-1"));
    assert_eq!(cfg.llm.model, "gpt-x");
    assert!(!cfg.llm.enabled);
  }

  #[test]
  fn blank_api_key_counts_as_missing() {
    let cfg = AppConfig::from_file_and_lookup(FileConfig::default(), lookup(&[("OPENAI_API_KEY", "  ")]));
    assert!(cfg.llm.api_key.is_none());
  }

  #[test]
  fn toml_sections_are_partial() {
    let file = parse_file_config(
      r#"
      [chunking]
      strategy = "paragraphs"
      max_chars = 900

      [game]
      boss_every = 4
      scoring = "speed_combo"
      task_rotation = ["cloze", "multiple_choice"]

      [prompts]
      task_system = "custom"
      "#,
    )
    .expect("parse");
    assert_eq!(file.chunking.strategy, ChunkStrategy::Paragraphs);
    assert_eq!(file.chunking.max_chars, 900);
    assert_eq!(file.chunking.target_chars, 800);
    assert_eq!(file.game.boss_every, 4);
    assert_eq!(file.game.scoring, Scoring::SpeedCombo);
    assert_eq!(file.game.task_rotation, vec![TaskKind::Cloze, TaskKind::MultipleChoice]);
    assert_eq!(file.prompts.task_system, "custom");
    assert!(!file.prompts.boss_system.is_empty());
  }

  #[test]
  fn missing_file_is_a_read_error() {
    assert!(matches!(load_file_config("/definitely/not/here.toml"), Err(ConfigError::Read { .. })));
  }
}
