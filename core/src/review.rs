//! Spaced-repetition scheduling for vocabulary items.
//!
//! An SM-2 variant that keeps the ease factor as an integer scaled by 100.
//! Scheduling is date-only: the due date is the UTC calendar date of the
//! review plus the new interval.

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SchedulerConfig;
use crate::error::{EngineError, EngineResult};

/// Recall quality reported by the learner: 0 is a total blackout, 5 is
/// perfect recall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "u8")]
pub struct Quality(u8);

impl Quality {
    pub const MAX: u8 = 5;

    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<i32> for Quality {
    type Error = EngineError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        if (0..=Self::MAX as i32).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(EngineError::InvalidQuality(value))
        }
    }
}

impl From<Quality> for u8 {
    fn from(quality: Quality) -> Self {
        quality.0
    }
}

/// Review schedule for one user and one vocabulary item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewState {
    pub ease_factor: i32,
    pub interval_days: i32,
    pub next_review_date: NaiveDate,
    pub review_count: i32,
    pub last_reviewed: Option<DateTime<Utc>>,
    pub is_memorized: bool,
}

impl ReviewState {
    /// A never-reviewed item, due immediately.
    pub fn new(created_on: NaiveDate) -> Self {
        Self::with_ease(created_on, SchedulerConfig::default().default_ease)
    }

    pub fn with_ease(created_on: NaiveDate, ease_factor: i32) -> Self {
        Self {
            ease_factor,
            interval_days: 0,
            next_review_date: created_on,
            review_count: 0,
            last_reviewed: None,
            is_memorized: false,
        }
    }

    pub fn is_due(&self, today: NaiveDate) -> bool {
        self.next_review_date <= today
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReviewScheduler {
    config: SchedulerConfig,
}

impl ReviewScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects configurations `schedule` could not apply, such as a negative
    /// ease step or an interval ceiling below one day.
    pub fn with_config(config: SchedulerConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn new_state(&self, created_on: NaiveDate) -> ReviewState {
        ReviewState::with_ease(created_on, self.config.default_ease)
    }

    /// Apply one review and return the rescheduled state.
    ///
    /// Fails only when `quality` is outside `0..=5`. Calling this twice for
    /// the same review applies it twice; de-duplication is up to the caller.
    pub fn schedule(
        &self,
        state: &ReviewState,
        quality: i32,
        now: DateTime<Utc>,
    ) -> EngineResult<ReviewState> {
        let quality = Quality::try_from(quality)?;
        let cfg = &self.config;
        let mut next = state.clone();

        if quality.value() < cfg.pass_threshold {
            next.interval_days = 1;
            next.ease_factor = state
                .ease_factor
                .saturating_sub(cfg.lapse_penalty)
                .max(cfg.min_ease);
        } else {
            next.interval_days = match state.review_count {
                0 => 1,
                1 => 6,
                _ => grow_interval(state.interval_days, state.ease_factor),
            };
            next.ease_factor = state
                .ease_factor
                .saturating_add(self.ease_delta(quality))
                .max(cfg.min_ease);
        }
        next.interval_days = next.interval_days.clamp(1, cfg.max_interval_days);

        let today = now.date_naive();
        next.next_review_date = today
            .checked_add_days(Days::new(next.interval_days as u64))
            .unwrap_or(NaiveDate::MAX);
        next.review_count = state.review_count.saturating_add(1);
        next.last_reviewed = Some(now);
        next.is_memorized = quality.value() >= cfg.memorized_threshold;

        debug!(
            quality = quality.value(),
            ease_before = state.ease_factor,
            ease_after = next.ease_factor,
            interval_before = state.interval_days,
            interval_after = next.interval_days,
            due = %next.next_review_date,
            "rescheduled review"
        );

        Ok(next)
    }

    /// Ease change for a passing review. Zero at perfect recall with the
    /// default bonus, growing more negative as recall gets harder.
    fn ease_delta(&self, quality: Quality) -> i32 {
        let miss = (Quality::MAX - quality.value()) as i32;
        let raw = self.config.perfect_recall_bonus - miss * (8 + miss * 2);
        raw.clamp(-self.config.max_ease_step, self.config.max_ease_step)
    }
}

/// `round(interval * ease / 100)`, computed in integers so ties round up.
fn grow_interval(interval_days: i32, ease_factor: i32) -> i32 {
    let grown = (interval_days.max(0) as i64 * ease_factor.max(0) as i64 + 50) / 100;
    grown.min(i32::MAX as i64) as i32
}
