mod postgres;
mod sqlite;

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use engagement_core::{
    AchievementDefinition, AchievementProgress, Criteria, ReviewState, StreakState,
};
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::config::Backend;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Postgres(#[from] ::postgres::Error),

    #[error("{0}")]
    Config(String),

    /// The row changed (or appeared) between read and write.
    #[error("stale write to {record}")]
    StaleWrite { record: &'static str },

    #[error("corrupt value '{value}' in column {column}")]
    Corrupt { column: &'static str, value: String },
}

/// A stored record together with its optimistic concurrency token.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub record: T,
    pub version: i64,
}

/// Record store for the engagement engine.
///
/// Every `save_*` takes the version the caller loaded, or `None` when the
/// record did not exist yet, and returns the new version. A concurrent change
/// in between is reported as [`DbError::StaleWrite`].
pub trait Db: Send + Sync {
    fn init(&self) -> DbResult<()>;

    fn load_review(&self, user_id: &str, word_id: Uuid)
        -> DbResult<Option<Versioned<ReviewState>>>;
    fn save_review(
        &self,
        user_id: &str,
        word_id: Uuid,
        state: &ReviewState,
        expected_version: Option<i64>,
    ) -> DbResult<i64>;
    fn list_due_words(&self, user_id: &str, today: NaiveDate) -> DbResult<Vec<Uuid>>;
    fn count_reviewed_words(&self, user_id: &str) -> DbResult<i64>;
    fn count_memorized_words(&self, user_id: &str) -> DbResult<i64>;

    fn load_streak(&self, user_id: &str) -> DbResult<Option<Versioned<StreakState>>>;
    fn save_streak(
        &self,
        user_id: &str,
        state: &StreakState,
        expected_version: Option<i64>,
    ) -> DbResult<i64>;

    fn insert_achievement(&self, definition: &AchievementDefinition) -> DbResult<()>;
    fn list_achievements(&self, criteria: Option<Criteria>)
        -> DbResult<Vec<AchievementDefinition>>;
    fn load_user_achievement(
        &self,
        user_id: &str,
        achievement_id: Uuid,
    ) -> DbResult<Option<Versioned<AchievementProgress>>>;
    fn save_user_achievement(
        &self,
        user_id: &str,
        achievement_id: Uuid,
        state: &AchievementProgress,
        expected_version: Option<i64>,
    ) -> DbResult<i64>;
    fn list_user_achievements(
        &self,
        user_id: &str,
    ) -> DbResult<Vec<(Uuid, Versioned<AchievementProgress>)>>;
}

pub fn get_db_backend(backend: &Backend) -> DbResult<Arc<dyn Db>> {
    match backend {
        Backend::Sqlite { path } => Ok(Arc::new(SqliteDb::open(path)?)),
        Backend::Postgres { url } => {
            let connector = TlsConnector::new()
                .map_err(|err| DbError::Config(format!("Failed to create TLS connector: {err}")))?;
            let connector = MakeTlsConnector::new(connector);
            Ok(Arc::new(PostgresDb::connect(url, connector)?))
        }
    }
}

/// Insert the built-in achievement catalogue when no definitions exist yet.
/// Returns the number of definitions inserted.
pub fn seed_default_achievements(db: &dyn Db) -> DbResult<usize> {
    if !db.list_achievements(None)?.is_empty() {
        return Ok(0);
    }
    let defaults = default_achievements();
    for definition in &defaults {
        db.insert_achievement(definition)?;
    }
    info!(count = defaults.len(), "seeded default achievements");
    Ok(defaults.len())
}

pub fn default_achievements() -> Vec<AchievementDefinition> {
    [
        ("STREAK_3", "Warming Up", Criteria::Streak, Some(3.0)),
        ("STREAK_7", "One Week Strong", Criteria::Streak, Some(7.0)),
        ("STREAK_30", "Habit Formed", Criteria::Streak, Some(30.0)),
        ("REVIEWED_10", "First Steps", Criteria::WordsReviewed, Some(10.0)),
        ("REVIEWED_100", "Word Collector", Criteria::WordsReviewed, Some(100.0)),
        ("MEMORIZED_50", "Sharp Memory", Criteria::WordsMemorized, Some(50.0)),
        ("EXERCISES_25", "Practice Makes Perfect", Criteria::Exercises, Some(25.0)),
        ("COMMUNITY_HERO", "Community Hero", Criteria::Exercises, None),
    ]
    .into_iter()
    .map(|(code, title, criteria, target_value)| AchievementDefinition {
        id: Uuid::new_v4(),
        code: code.to_string(),
        title: title.to_string(),
        criteria,
        target_value,
    })
    .collect()
}

pub(crate) fn format_instant(at: Option<DateTime<Utc>>) -> Option<String> {
    at.map(|at| at.to_rfc3339())
}

pub(crate) fn parse_instant(
    column: &'static str,
    value: Option<String>,
) -> DbResult<Option<DateTime<Utc>>> {
    value
        .map(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| DbError::Corrupt { column, value: raw })
        })
        .transpose()
}

pub(crate) fn parse_date(column: &'static str, raw: String) -> DbResult<NaiveDate> {
    raw.parse::<NaiveDate>()
        .map_err(|_| DbError::Corrupt { column, value: raw })
}

pub(crate) fn parse_uuid(column: &'static str, raw: String) -> DbResult<Uuid> {
    Uuid::parse_str(&raw).map_err(|_| DbError::Corrupt { column, value: raw })
}

pub(crate) fn parse_criteria(raw: String) -> DbResult<Criteria> {
    raw.parse::<Criteria>().map_err(|_| DbError::Corrupt {
        column: "criteria",
        value: raw,
    })
}

pub(crate) fn parse_count(column: &'static str, raw: i64) -> DbResult<u32> {
    u32::try_from(raw).map_err(|_| DbError::Corrupt {
        column,
        value: raw.to_string(),
    })
}

/// Rows as read from either backend, before decoding.
pub(crate) struct ReviewRow {
    pub ease_factor: i32,
    pub interval_days: i32,
    pub next_review_date: String,
    pub review_count: i32,
    pub last_reviewed: Option<String>,
    pub is_memorized: bool,
    pub version: i64,
}

impl ReviewRow {
    pub fn decode(self) -> DbResult<Versioned<ReviewState>> {
        Ok(Versioned {
            record: ReviewState {
                ease_factor: self.ease_factor,
                interval_days: self.interval_days,
                next_review_date: parse_date("next_review_date", self.next_review_date)?,
                review_count: self.review_count,
                last_reviewed: parse_instant("last_reviewed", self.last_reviewed)?,
                is_memorized: self.is_memorized,
            },
            version: self.version,
        })
    }
}

pub(crate) struct StreakRow {
    pub current_streak: i64,
    pub longest_streak: i64,
    pub last_study_date: Option<String>,
    pub version: i64,
}

impl StreakRow {
    pub fn decode(self) -> DbResult<Versioned<StreakState>> {
        Ok(Versioned {
            record: StreakState {
                current_streak: parse_count("current_streak", self.current_streak)?,
                longest_streak: parse_count("longest_streak", self.longest_streak)?,
                last_study_date: parse_instant("last_study_date", self.last_study_date)?,
            },
            version: self.version,
        })
    }
}

pub(crate) struct AchievementRow {
    pub id: String,
    pub code: String,
    pub title: String,
    pub criteria: String,
    pub target_value: Option<f64>,
}

impl AchievementRow {
    pub fn decode(self) -> DbResult<AchievementDefinition> {
        Ok(AchievementDefinition {
            id: parse_uuid("achievements.id", self.id)?,
            code: self.code,
            title: self.title,
            criteria: parse_criteria(self.criteria)?,
            target_value: self.target_value,
        })
    }
}

pub(crate) struct ProgressRow {
    pub achievement_id: String,
    pub progress: Option<f64>,
    pub is_unlocked: bool,
    pub unlocked_at: Option<String>,
    pub version: i64,
}

impl ProgressRow {
    pub fn decode(self) -> DbResult<(Uuid, Versioned<AchievementProgress>)> {
        Ok((
            parse_uuid("achievement_id", self.achievement_id)?,
            Versioned {
                record: AchievementProgress {
                    progress: self.progress,
                    is_unlocked: self.is_unlocked,
                    unlocked_at: parse_instant("unlocked_at", self.unlocked_at)?,
                },
                version: self.version,
            },
        ))
    }
}

pub use postgres::PostgresDb;
pub use sqlite::SqliteDb;
