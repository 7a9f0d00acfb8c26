//! Progress ledger: the per (learner, document) counters and how an attempt
//! moves them.

use chrono::Utc;
use serde::Deserialize;

use crate::boss::section_of;
use crate::domain::{Difficulty, Progress, TaskKind};

/// How points are computed for a correct answer. Chosen once per process.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Scoring {
  /// `round(score / 100 * difficulty_weight * 10)`.
  #[default]
  DifficultyWeighted,
  /// `10 + speed bonus (up to 10, gone after 5s) + combo / 3`.
  SpeedCombo,
}

impl Scoring {
  pub fn points(self, score: u8, elapsed_ms: u64, difficulty: Difficulty, combo: u32) -> u64 {
    match self {
      Scoring::DifficultyWeighted => {
        let raw = f64::from(score.min(100)) / 100.0 * f64::from(difficulty.weight()) * 10.0;
        raw.round() as u64
      }
      Scoring::SpeedCombo => {
        let seconds = elapsed_ms as f64 / 1000.0;
        let speed_bonus = ((5.0 - seconds).max(0.0) * 2.0) as u64;
        10 + speed_bonus + u64::from(combo / 3)
      }
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GameRules {
  /// Every Nth hurdle is a boss battle; 0 disables bosses.
  pub boss_every: u32,
  pub boss_min_score: f64,
  pub max_hearts: u32,
  pub scoring: Scoring,
  /// Task kind for chunk i is `task_rotation[i % len]`.
  pub task_rotation: Vec<TaskKind>,
}

impl Default for GameRules {
  fn default() -> Self {
    Self {
      boss_every: 5,
      boss_min_score: 0.75,
      max_hearts: 5,
      scoring: Scoring::DifficultyWeighted,
      task_rotation: vec![
        TaskKind::MultipleChoice,
        TaskKind::Cloze,
        TaskKind::BinaryChoice,
        TaskKind::Matching,
        TaskKind::Summary,
      ],
    }
  }
}

impl GameRules {
  pub fn kind_for(&self, idx: u32) -> TaskKind {
    if self.task_rotation.is_empty() {
      return TaskKind::MultipleChoice;
    }
    self.task_rotation[idx as usize % self.task_rotation.len()]
  }
}

/// What the validator decided about one submission.
#[derive(Clone, Copy, Debug)]
pub struct AttemptOutcome {
  pub correct: bool,
  pub score: u8,
  pub elapsed_ms: u64,
  pub difficulty: Difficulty,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttemptEffect {
  pub points: u64,
  /// Section whose cached boss battle must be dropped.
  pub cleared_section: Option<u32>,
}

/// Apply one validated attempt. `total` is the document's chunk count and caps
/// `cleared`.
pub fn apply_attempt(progress: &mut Progress, outcome: AttemptOutcome, rules: &GameRules, total: u32) -> AttemptEffect {
  let effect = if outcome.correct {
    let points = rules.scoring.points(outcome.score, outcome.elapsed_ms, outcome.difficulty, progress.combo);
    let passed_idx = progress.cleared;
    if progress.cleared < total {
      progress.cleared += 1;
    }
    progress.streak += 1;
    progress.combo += 1;
    progress.xp += points;
    let cleared_section = (rules.boss_every > 0).then(|| section_of(passed_idx, rules.boss_every));
    AttemptEffect { points, cleared_section }
  } else {
    progress.streak = 0;
    progress.combo = 0;
    progress.hearts = progress.hearts.saturating_sub(1);
    AttemptEffect { points: 0, cleared_section: None }
  };
  progress.updated_at = Utc::now();
  effect
}

/// Skipping moves on without XP and breaks the streak; hearts are kept.
pub fn apply_skip(progress: &mut Progress, total: u32) {
  if progress.cleared < total {
    progress.cleared += 1;
  }
  progress.streak = 0;
  progress.combo = 0;
  progress.updated_at = Utc::now();
}

#[cfg(test)]
mod tests {
  use super::*;

  fn outcome(correct: bool, score: u8) -> AttemptOutcome {
    AttemptOutcome { correct, score, elapsed_ms: 2_000, difficulty: Difficulty::Medium }
  }

  #[test]
  fn correct_attempt_advances_everything() {
    let rules = GameRules::default();
    let mut p = Progress::new("ann", 1, 5);
    p.streak = 2;
    p.combo = 2;
    let before = p.clone();
    let effect = apply_attempt(&mut p, outcome(true, 100), &rules, 10);
    assert_eq!(p.cleared, before.cleared + 1);
    assert_eq!(p.streak, 3);
    assert_eq!(p.combo, 3);
    assert_eq!(p.hearts, 5);
    assert_eq!(effect.points, 30);
    assert_eq!(p.xp, 30);
    assert_eq!(effect.cleared_section, Some(0));
  }

  #[test]
  fn incorrect_attempt_resets_and_costs_a_heart() {
    let rules = GameRules::default();
    let mut p = Progress::new("ann", 1, 1);
    p.cleared = 3;
    p.streak = 4;
    p.combo = 4;
    p.xp = 70;
    let effect = apply_attempt(&mut p, outcome(false, 40), &rules, 10);
    assert_eq!(effect.points, 0);
    assert_eq!(p.cleared, 3);
    assert_eq!((p.streak, p.combo), (0, 0));
    assert_eq!(p.hearts, 0);
    assert_eq!(p.xp, 70);

    apply_attempt(&mut p, outcome(false, 0), &rules, 10);
    assert_eq!(p.hearts, 0, "hearts never go negative");
  }

  #[test]
  fn cleared_never_exceeds_total() {
    let rules = GameRules::default();
    let mut p = Progress::new("ann", 1, 5);
    p.cleared = 4;
    apply_attempt(&mut p, outcome(true, 100), &rules, 4);
    assert_eq!(p.cleared, 4);
    apply_skip(&mut p, 4);
    assert_eq!(p.cleared, 4);
  }

  #[test]
  fn xp_is_monotonic_over_mixed_attempts() {
    let rules = GameRules::default();
    let mut p = Progress::new("ann", 1, 5);
    let mut last = 0;
    for (i, correct) in [true, false, true, true, false, true].into_iter().enumerate() {
      apply_attempt(&mut p, outcome(correct, (i * 20) as u8), &rules, 100);
      assert!(p.xp >= last);
      last = p.xp;
    }
  }

  #[test]
  fn difficulty_weighted_points() {
    let s = Scoring::DifficultyWeighted;
    assert_eq!(s.points(100, 0, Difficulty::Easy, 0), 10);
    assert_eq!(s.points(100, 0, Difficulty::Hard, 0), 50);
    assert_eq!(s.points(75, 0, Difficulty::Medium, 0), 23);
    assert_eq!(s.points(0, 0, Difficulty::Hard, 0), 0);
  }

  #[test]
  fn speed_combo_points() {
    let s = Scoring::SpeedCombo;
    assert_eq!(s.points(100, 0, Difficulty::Easy, 0), 20);
    assert_eq!(s.points(100, 2_500, Difficulty::Easy, 0), 15);
    assert_eq!(s.points(100, 60_000, Difficulty::Easy, 7), 12);
  }

  #[test]
  fn section_follows_boss_interval() {
    let rules = GameRules { boss_every: 5, ..GameRules::default() };
    let mut p = Progress::new("ann", 1, 5);
    p.cleared = 7;
    let effect = apply_attempt(&mut p, outcome(true, 100), &rules, 20);
    assert_eq!(effect.cleared_section, Some(1));

    let no_boss = GameRules { boss_every: 0, ..GameRules::default() };
    let effect = apply_attempt(&mut p, outcome(true, 100), &no_boss, 20);
    assert_eq!(effect.cleared_section, None);
  }

  #[test]
  fn skip_breaks_streak_but_keeps_hearts() {
    let mut p = Progress::new("ann", 1, 3);
    p.streak = 5;
    p.combo = 5;
    apply_skip(&mut p, 10);
    assert_eq!(p.cleared, 1);
    assert_eq!((p.streak, p.combo, p.hearts, p.xp), (0, 0, 3, 0));
  }

  #[test]
  fn rotation_cycles_kinds() {
    let rules = GameRules::default();
    assert_eq!(rules.kind_for(0), TaskKind::MultipleChoice);
    assert_eq!(rules.kind_for(1), TaskKind::Cloze);
    assert_eq!(rules.kind_for(5), TaskKind::MultipleChoice);
    let empty = GameRules { task_rotation: vec![], ..GameRules::default() };
    assert_eq!(empty.kind_for(3), TaskKind::MultipleChoice);
  }
}
