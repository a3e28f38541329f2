use std::time::Duration;

use chrono::{DateTime, Utc};
use formpilot_core_types::duration_str;
use serde::{Deserialize, Serialize};

/// Escalating repair strategies, cheapest first.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryLevel {
    Soft,
    Hard,
    Nuclear,
}

impl RecoveryLevel {
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Soft => Some(Self::Hard),
            Self::Hard => Some(Self::Nuclear),
            Self::Nuclear => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Soft => "soft",
            Self::Hard => "hard",
            Self::Nuclear => "nuclear",
        }
    }
}

/// Orchestrator state. `CriticallyFailed` is terminal until an external reset.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeeperState {
    Idle,
    Recovering,
    CriticallyFailed,
}

/// One recovery attempt, success or failure. Diagnostics only; the attempt
/// counters are the sole control input.
#[derive(Clone, Debug, Serialize)]
pub struct RecoveryAttempt {
    pub level: RecoveryLevel,
    pub success: bool,
    pub reason: String,
    pub at: DateTime<Utc>,
}

impl RecoveryAttempt {
    pub fn new(level: RecoveryLevel, success: bool, reason: impl Into<String>) -> Self {
        Self {
            level,
            success,
            reason: reason.into(),
            at: Utc::now(),
        }
    }
}

/// Bounded attempt counter for one level. `count` never exceeds `max`.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct LevelBudget {
    pub count: u32,
    pub max: u32,
}

impl LevelBudget {
    pub fn new(max: u32) -> Self {
        Self { count: 0, max }
    }

    pub fn exhausted(&self) -> bool {
        self.count >= self.max
    }

    /// Consume one attempt. Callers check `exhausted` first.
    pub fn charge(&mut self) {
        debug_assert!(!self.exhausted());
        self.count = (self.count + 1).min(self.max);
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}

/// All three level counters. Any success resets the whole set.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct Budgets {
    pub soft: LevelBudget,
    pub hard: LevelBudget,
    pub nuclear: LevelBudget,
}

impl Budgets {
    pub fn from_config(config: &RecoveryConfig) -> Self {
        Self {
            soft: LevelBudget::new(config.soft_attempts),
            hard: LevelBudget::new(config.hard_attempts),
            nuclear: LevelBudget::new(config.nuclear_attempts),
        }
    }

    pub fn level_mut(&mut self, level: RecoveryLevel) -> &mut LevelBudget {
        match level {
            RecoveryLevel::Soft => &mut self.soft,
            RecoveryLevel::Hard => &mut self.hard,
            RecoveryLevel::Nuclear => &mut self.nuclear,
        }
    }

    pub fn level(&self, level: RecoveryLevel) -> &LevelBudget {
        match level {
            RecoveryLevel::Soft => &self.soft,
            RecoveryLevel::Hard => &self.hard,
            RecoveryLevel::Nuclear => &self.nuclear,
        }
    }

    pub fn reset_all(&mut self) {
        self.soft.reset();
        self.hard.reset();
        self.nuclear.reset();
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub soft_attempts: u32,
    pub hard_attempts: u32,
    pub nuclear_attempts: u32,
    #[serde(with = "duration_str")]
    pub probe_timeout: Duration,
    /// Upper bound for one full login round trip, challenge solving included.
    #[serde(with = "duration_str")]
    pub login_timeout: Duration,
    /// How long a portal session survives after authentication.
    #[serde(with = "duration_str")]
    pub session_lifetime: Duration,
    /// Fraction of the lifetime past which the monitor emits a warning.
    pub warn_ratio: f64,
    /// Fraction of the lifetime past which the monitor refreshes proactively.
    pub refresh_ratio: f64,
    /// Age of `last_verified_at` past which a job must re-probe before acquire.
    #[serde(with = "duration_str")]
    pub staleness_threshold: Duration,
    #[serde(with = "duration_str")]
    pub monitor_interval: Duration,
    pub history_limit: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            soft_attempts: 3,
            hard_attempts: 2,
            nuclear_attempts: 1,
            probe_timeout: Duration::from_secs(15),
            login_timeout: Duration::from_secs(90),
            session_lifetime: Duration::from_secs(8 * 60 * 60),
            warn_ratio: 0.8,
            refresh_ratio: 0.9,
            staleness_threshold: Duration::from_secs(10 * 60),
            monitor_interval: Duration::from_secs(5 * 60),
            history_limit: 50,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_escalate_in_order() {
        assert_eq!(RecoveryLevel::Soft.next(), Some(RecoveryLevel::Hard));
        assert_eq!(RecoveryLevel::Hard.next(), Some(RecoveryLevel::Nuclear));
        assert_eq!(RecoveryLevel::Nuclear.next(), None);
    }

    #[test]
    fn budget_never_exceeds_max() {
        let mut budget = LevelBudget::new(2);
        budget.charge();
        budget.charge();
        assert!(budget.exhausted());
        assert_eq!(budget.count, 2);
    }

    #[test]
    fn reset_all_clears_every_level() {
        let mut budgets = Budgets::from_config(&RecoveryConfig::default());
        budgets.soft.charge();
        budgets.hard.charge();
        budgets.reset_all();
        assert_eq!(budgets.soft.count, 0);
        assert_eq!(budgets.hard.count, 0);
        assert_eq!(budgets.nuclear.count, 0);
    }
}
