//! Read-modify-write orchestration around the engagement engine.
//!
//! Each operation loads the learner's record, applies the pure transition
//! from `engagement_core`, and writes it back under the version it loaded.
//! A concurrent writer shows up as [`DbError::StaleWrite`]; the whole
//! load-apply-save cycle is then repeated with the same clock value.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use engagement_core::{
    AchievementDefinition, AchievementProgress, Criteria, EngineConfig, EngineError, Quality,
    ReviewScheduler, StreakState, has_studied_today, is_new_record, is_streak_active, local_date,
    needs_study_today, progress_percent, record_activity, update_progress,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{Db, DbError};

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("metric value must be a finite, non-negative number, got {0}")]
    InvalidMetric(f64),
}

impl ServiceError {
    pub fn is_stale_write(&self) -> bool {
        matches!(self, ServiceError::Db(DbError::StaleWrite { .. }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockedAchievement {
    pub id: Uuid,
    pub code: String,
    pub title: String,
    pub unlocked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewOutcome {
    pub word_id: Uuid,
    pub ease_factor: i32,
    pub interval_days: i32,
    pub next_review_date: NaiveDate,
    pub review_count: i32,
    pub is_memorized: bool,
    pub unlocked: Vec<UnlockedAchievement>,
}

/// Per-learner vocabulary counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewStatistics {
    pub reviewed: i64,
    pub memorized: i64,
    pub due_today: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyOutcome {
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_study_date: Option<DateTime<Utc>>,
    /// False when the day had already been counted.
    pub updated: bool,
    pub new_record: bool,
    pub unlocked: Vec<UnlockedAchievement>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakStatus {
    pub current_streak: u32,
    pub longest_streak: u32,
    pub studied_today: bool,
    pub active: bool,
    pub needs_study_today: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementView {
    pub id: Uuid,
    pub code: String,
    pub title: String,
    pub criteria: Criteria,
    pub target_value: Option<f64>,
    pub progress: Option<f64>,
    pub percent: f64,
    pub is_unlocked: bool,
    pub unlocked_at: Option<DateTime<Utc>>,
}

pub struct EngagementService {
    db: Arc<dyn Db>,
    scheduler: ReviewScheduler,
    retry: RetryPolicy,
}

impl EngagementService {
    pub fn new(db: Arc<dyn Db>, config: EngineConfig, retry: RetryPolicy) -> ServiceResult<Self> {
        Ok(Self {
            db,
            scheduler: ReviewScheduler::with_config(config.scheduler)?,
            retry,
        })
    }

    /// Apply one review of `word_id`, then refresh the vocabulary achievements.
    pub fn review_word(
        &self,
        user_id: &str,
        word_id: Uuid,
        quality: i32,
        now: DateTime<Utc>,
    ) -> ServiceResult<ReviewOutcome> {
        Quality::try_from(quality)?;

        let state = self.with_retry("review_word", || {
            let loaded = self.db.load_review(user_id, word_id)?;
            let (current, version) = match loaded {
                Some(loaded) => (loaded.record, Some(loaded.version)),
                None => (self.scheduler.new_state(now.date_naive()), None),
            };
            let next = self.scheduler.schedule(&current, quality, now)?;
            self.db.save_review(user_id, word_id, &next, version)?;
            Ok(next)
        })?;

        let mut unlocked = Vec::new();
        let reviewed = self.db.count_reviewed_words(user_id)?;
        unlocked.extend(self.evaluate(user_id, Criteria::WordsReviewed, reviewed as f64, now)?);
        let memorized = self.db.count_memorized_words(user_id)?;
        unlocked.extend(self.evaluate(user_id, Criteria::WordsMemorized, memorized as f64, now)?);

        Ok(ReviewOutcome {
            word_id,
            ease_factor: state.ease_factor,
            interval_days: state.interval_days,
            next_review_date: state.next_review_date,
            review_count: state.review_count,
            is_memorized: state.is_memorized,
            unlocked,
        })
    }

    pub fn due_words(&self, user_id: &str, today: NaiveDate) -> ServiceResult<Vec<Uuid>> {
        Ok(self.db.list_due_words(user_id, today)?)
    }

    pub fn review_statistics(
        &self,
        user_id: &str,
        today: NaiveDate,
    ) -> ServiceResult<ReviewStatistics> {
        Ok(ReviewStatistics {
            reviewed: self.db.count_reviewed_words(user_id)?,
            memorized: self.db.count_memorized_words(user_id)?,
            due_today: self.db.list_due_words(user_id, today)?.len(),
        })
    }

    /// Count `now` as a study day in `tz`.
    pub fn record_study<Tz: TimeZone>(
        &self,
        user_id: &str,
        tz: &Tz,
        now: DateTime<Utc>,
    ) -> ServiceResult<StudyOutcome> {
        let activity_date = local_date(now, tz);

        let (state, updated) = self.with_retry("record_study", || {
            let loaded = self.db.load_streak(user_id)?;
            let (current, version) = match loaded {
                Some(loaded) => (loaded.record, Some(loaded.version)),
                None => (StreakState::new(), None),
            };
            let update = record_activity(&current, activity_date, tz);
            if update.updated {
                self.db.save_streak(user_id, &update.state, version)?;
            }
            Ok((update.state, update.updated))
        })?;

        let unlocked = if updated {
            info!(
                user_id,
                %activity_date,
                current = state.current_streak,
                longest = state.longest_streak,
                "study day recorded"
            );
            self.evaluate(user_id, Criteria::Streak, f64::from(state.current_streak), now)?
        } else {
            debug!(user_id, %activity_date, "study day already counted");
            Vec::new()
        };

        Ok(StudyOutcome {
            current_streak: state.current_streak,
            longest_streak: state.longest_streak,
            last_study_date: state.last_study_date,
            updated,
            new_record: updated && is_new_record(&state),
            unlocked,
        })
    }

    pub fn current_streak(&self, user_id: &str) -> ServiceResult<u32> {
        Ok(self.streak(user_id)?.current_streak)
    }

    pub fn longest_streak(&self, user_id: &str) -> ServiceResult<u32> {
        Ok(self.streak(user_id)?.longest_streak)
    }

    pub fn streak_status<Tz: TimeZone>(
        &self,
        user_id: &str,
        tz: &Tz,
        now: DateTime<Utc>,
    ) -> ServiceResult<StreakStatus> {
        let state = self.streak(user_id)?;
        Ok(StreakStatus {
            current_streak: state.current_streak,
            longest_streak: state.longest_streak,
            studied_today: has_studied_today(&state, now, tz),
            active: is_streak_active(&state, now, tz),
            needs_study_today: needs_study_today(&state, now, tz),
        })
    }

    /// Feed an externally produced metric (exercise counts and the like)
    /// into every achievement measured by `criteria`.
    pub fn report_metric(
        &self,
        user_id: &str,
        criteria: Criteria,
        value: f64,
        now: DateTime<Utc>,
    ) -> ServiceResult<Vec<UnlockedAchievement>> {
        if !value.is_finite() || value < 0.0 {
            return Err(ServiceError::InvalidMetric(value));
        }
        self.evaluate(user_id, criteria, value, now)
    }

    pub fn achievement_overview(&self, user_id: &str) -> ServiceResult<Vec<AchievementView>> {
        let definitions = self.db.list_achievements(None)?;
        let progress: HashMap<Uuid, AchievementProgress> = self
            .db
            .list_user_achievements(user_id)?
            .into_iter()
            .map(|(id, versioned)| (id, versioned.record))
            .collect();

        Ok(definitions
            .into_iter()
            .map(|definition| {
                let state = progress.get(&definition.id).cloned().unwrap_or_default();
                AchievementView {
                    percent: progress_percent(&state, definition.target_value),
                    id: definition.id,
                    code: definition.code,
                    title: definition.title,
                    criteria: definition.criteria,
                    target_value: definition.target_value,
                    progress: state.progress,
                    is_unlocked: state.is_unlocked,
                    unlocked_at: state.unlocked_at,
                }
            })
            .collect())
    }

    fn streak(&self, user_id: &str) -> ServiceResult<StreakState> {
        Ok(self
            .db
            .load_streak(user_id)?
            .map(|loaded| loaded.record)
            .unwrap_or_default())
    }

    fn evaluate(
        &self,
        user_id: &str,
        criteria: Criteria,
        value: f64,
        now: DateTime<Utc>,
    ) -> ServiceResult<Vec<UnlockedAchievement>> {
        let mut unlocked = Vec::new();
        for definition in self.db.list_achievements(Some(criteria))? {
            if let Some(achievement) = self.evaluate_one(user_id, &definition, value, now)? {
                unlocked.push(achievement);
            }
        }
        Ok(unlocked)
    }

    fn evaluate_one(
        &self,
        user_id: &str,
        definition: &AchievementDefinition,
        value: f64,
        now: DateTime<Utc>,
    ) -> ServiceResult<Option<UnlockedAchievement>> {
        self.with_retry("evaluate_achievement", || {
            let loaded = self.db.load_user_achievement(user_id, definition.id)?;
            let (current, version) = match loaded {
                Some(loaded) if loaded.record.is_unlocked => return Ok(None),
                Some(loaded) => (loaded.record, Some(loaded.version)),
                None => (AchievementProgress::new(), None),
            };

            let update = update_progress(&current, value, definition.target_value, now);
            if version.is_none() || update.state != current {
                self.db
                    .save_user_achievement(user_id, definition.id, &update.state, version)?;
            }

            Ok(update.just_unlocked.then(|| {
                info!(user_id, code = %definition.code, "achievement unlocked for user");
                UnlockedAchievement {
                    id: definition.id,
                    code: definition.code.clone(),
                    title: definition.title.clone(),
                    unlocked_at: now,
                }
            }))
        })
    }

    fn with_retry<T, F>(&self, operation: &'static str, mut attempt: F) -> ServiceResult<T>
    where
        F: FnMut() -> ServiceResult<T>,
    {
        let mut tries = 1;
        loop {
            match attempt() {
                Err(err) if err.is_stale_write() && tries < self.retry.max_attempts => {
                    warn!(operation, attempt = tries, "stale write, retrying");
                    std::thread::sleep(self.retry.backoff);
                    tries += 1;
                }
                Err(err) if err.is_stale_write() => {
                    warn!(operation, attempts = tries, "giving up after repeated stale writes");
                    return Err(err);
                }
                result => return result,
            }
        }
    }
}
