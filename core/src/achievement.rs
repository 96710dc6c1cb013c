//! Achievement progress and one-time unlocks.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::EngineError;

/// The metric an achievement is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Criteria {
    Streak,
    WordsReviewed,
    WordsMemorized,
    Exercises,
}

impl Criteria {
    pub const ALL: [Criteria; 4] = [
        Criteria::Streak,
        Criteria::WordsReviewed,
        Criteria::WordsMemorized,
        Criteria::Exercises,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Criteria::Streak => "STREAK",
            Criteria::WordsReviewed => "WORDS_REVIEWED",
            Criteria::WordsMemorized => "WORDS_MEMORIZED",
            Criteria::Exercises => "EXERCISES",
        }
    }
}

impl fmt::Display for Criteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Criteria {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        Criteria::ALL
            .into_iter()
            .find(|criteria| criteria.as_str() == wanted)
            .ok_or_else(|| EngineError::UnknownCriteria(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementDefinition {
    pub id: Uuid,
    pub code: String,
    pub title: String,
    pub criteria: Criteria,
    /// Achievements without a target are only ever unlocked by hand.
    pub target_value: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AchievementProgress {
    /// Last observed metric value, not a percentage.
    pub progress: Option<f64>,
    pub is_unlocked: bool,
    pub unlocked_at: Option<DateTime<Utc>>,
}

impl AchievementProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub state: AchievementProgress,
    pub just_unlocked: bool,
}

/// Feed a new metric value into a progress record.
///
/// Unlocked records are returned as-is. Otherwise progress is overwritten and
/// the record unlocks when a target exists and has been reached.
pub fn update_progress(
    state: &AchievementProgress,
    current_value: f64,
    target: Option<f64>,
    now: DateTime<Utc>,
) -> ProgressUpdate {
    if state.is_unlocked {
        return ProgressUpdate {
            state: state.clone(),
            just_unlocked: false,
        };
    }

    let mut next = state.clone();
    next.progress = Some(current_value);

    let reached = target.is_some_and(|target| current_value >= target);
    if reached {
        next.is_unlocked = true;
        next.unlocked_at = Some(now);
        info!(value = current_value, ?target, "achievement unlocked");
    } else {
        debug!(value = current_value, ?target, "achievement progress updated");
    }

    ProgressUpdate {
        state: next,
        just_unlocked: reached,
    }
}

pub fn progress_percent(state: &AchievementProgress, target: Option<f64>) -> f64 {
    if state.is_unlocked {
        return 100.0;
    }
    match (state.progress, target) {
        (Some(progress), Some(target)) if target != 0.0 => (progress / target * 100.0).min(100.0),
        _ => 0.0,
    }
}

pub fn is_locked(state: &AchievementProgress) -> bool {
    !state.is_unlocked
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn progress_below_target_stays_locked() {
        let update = update_progress(&AchievementProgress::new(), 4.0, Some(10.0), now());
        assert!(!update.just_unlocked);
        assert!(is_locked(&update.state));
        assert_eq!(update.state.progress, Some(4.0));
        assert_eq!(update.state.unlocked_at, None);
        assert_eq!(progress_percent(&update.state, Some(10.0)), 40.0);
    }

    #[test]
    fn reaching_target_unlocks_once() {
        let first = update_progress(&AchievementProgress::new(), 10.0, Some(10.0), now());
        assert!(first.just_unlocked);
        assert_eq!(first.state.unlocked_at, Some(now()));

        let later = now() + chrono::Duration::days(3);
        let second = update_progress(&first.state, 25.0, Some(10.0), later);
        assert!(!second.just_unlocked);
        assert_eq!(second.state, first.state);
    }

    #[test]
    fn missing_target_never_unlocks() {
        let update = update_progress(&AchievementProgress::new(), 1_000.0, None, now());
        assert!(!update.just_unlocked);
        assert_eq!(update.state.progress, Some(1_000.0));
        assert_eq!(progress_percent(&update.state, None), 0.0);
    }

    #[test]
    fn progress_may_go_down_while_locked() {
        let state = update_progress(&AchievementProgress::new(), 6.0, Some(10.0), now()).state;
        let state = update_progress(&state, 2.0, Some(10.0), now()).state;
        assert_eq!(state.progress, Some(2.0));
    }

    #[test]
    fn percent_edge_cases() {
        let unlocked = AchievementProgress {
            progress: Some(1.0),
            is_unlocked: true,
            unlocked_at: Some(now()),
        };
        assert_eq!(progress_percent(&unlocked, None), 100.0);
        assert_eq!(progress_percent(&AchievementProgress::new(), Some(5.0)), 0.0);

        let partial = AchievementProgress {
            progress: Some(3.0),
            ..AchievementProgress::new()
        };
        assert_eq!(progress_percent(&partial, Some(0.0)), 0.0);
        assert_eq!(progress_percent(&partial, Some(2.0)), 100.0);
    }

    #[test]
    fn criteria_parse_case_insensitively() {
        assert_eq!("streak".parse::<Criteria>(), Ok(Criteria::Streak));
        assert_eq!(
            " words_memorized ".parse::<Criteria>(),
            Ok(Criteria::WordsMemorized)
        );
        assert!(matches!(
            "chapters".parse::<Criteria>(),
            Err(EngineError::UnknownCriteria(_))
        ));
        assert_eq!(Criteria::WordsReviewed.to_string(), "WORDS_REVIEWED");
    }
}
