//! Learner engagement engine: review scheduling, daily streaks and
//! achievement unlocks.
//!
//! Every transition here is a pure function of its inputs, including the
//! clock: callers pass `now` or the activity date explicitly. Loading and
//! persisting the records is left to the caller.

pub mod achievement;
pub mod config;
pub mod error;
pub mod review;
pub mod streak;

pub use achievement::{
    AchievementDefinition, AchievementProgress, Criteria, ProgressUpdate, is_locked,
    progress_percent, update_progress,
};
pub use config::{EngineConfig, SchedulerConfig};
pub use error::{EngineError, EngineResult};
pub use review::{Quality, ReviewScheduler, ReviewState};
pub use streak::{
    StreakState, StreakUpdate, has_studied_today, is_new_record, is_streak_active, local_date,
    needs_study_today, record_activity, start_of_day,
};
