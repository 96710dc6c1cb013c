use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDate;
use engagement_core::{
    AchievementDefinition, AchievementProgress, Criteria, ReviewState, StreakState,
};
use postgres::{Client, Row};
use postgres_native_tls::MakeTlsConnector;
use uuid::Uuid;

use crate::db::{
    AchievementRow, Db, DbError, DbResult, ProgressRow, ReviewRow, StreakRow, Versioned,
    format_instant, parse_uuid,
};

pub struct PostgresDb {
    client: Mutex<Client>,
}

impl PostgresDb {
    pub fn connect(url: &str, tls: MakeTlsConnector) -> DbResult<Self> {
        let client = Client::connect(url, tls)?;
        Ok(Self {
            client: Mutex::new(client),
        })
    }

    fn client(&self) -> DbResult<MutexGuard<'_, Client>> {
        self.client
            .lock()
            .map_err(|_| DbError::Config("Postgres client lock poisoned".to_string()))
    }
}

fn versioned_write(
    affected: u64,
    expected_version: Option<i64>,
    record: &'static str,
) -> DbResult<i64> {
    if affected == 0 {
        return Err(DbError::StaleWrite { record });
    }
    Ok(expected_version.map_or(1, |version| version + 1))
}

fn review_row(row: &Row) -> ReviewRow {
    ReviewRow {
        ease_factor: row.get(0),
        interval_days: row.get(1),
        next_review_date: row.get(2),
        review_count: row.get(3),
        last_reviewed: row.get(4),
        is_memorized: row.get(5),
        version: row.get(6),
    }
}

fn progress_row(row: &Row) -> ProgressRow {
    ProgressRow {
        achievement_id: row.get(0),
        progress: row.get(1),
        is_unlocked: row.get(2),
        unlocked_at: row.get(3),
        version: row.get(4),
    }
}

impl Db for PostgresDb {
    fn init(&self) -> DbResult<()> {
        self.client()?.batch_execute(
            "CREATE TABLE IF NOT EXISTS review_states (
                user_id TEXT NOT NULL,
                word_id TEXT NOT NULL,
                ease_factor INTEGER NOT NULL,
                interval_days INTEGER NOT NULL,
                next_review_date TEXT NOT NULL,
                review_count INTEGER NOT NULL,
                last_reviewed TEXT,
                is_memorized BOOLEAN NOT NULL DEFAULT FALSE,
                version BIGINT NOT NULL,
                PRIMARY KEY (user_id, word_id)
            );
            CREATE INDEX IF NOT EXISTS review_states_due
                ON review_states (user_id, next_review_date);
            CREATE TABLE IF NOT EXISTS learning_streaks (
                user_id TEXT PRIMARY KEY,
                current_streak BIGINT NOT NULL,
                longest_streak BIGINT NOT NULL,
                last_study_date TEXT,
                version BIGINT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS achievements (
                id TEXT PRIMARY KEY,
                code TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                criteria TEXT NOT NULL,
                target_value DOUBLE PRECISION
            );
            CREATE TABLE IF NOT EXISTS user_achievements (
                user_id TEXT NOT NULL,
                achievement_id TEXT NOT NULL REFERENCES achievements(id),
                progress DOUBLE PRECISION,
                is_unlocked BOOLEAN NOT NULL DEFAULT FALSE,
                unlocked_at TEXT,
                version BIGINT NOT NULL,
                PRIMARY KEY (user_id, achievement_id)
            );",
        )?;
        Ok(())
    }

    fn load_review(
        &self,
        user_id: &str,
        word_id: Uuid,
    ) -> DbResult<Option<Versioned<ReviewState>>> {
        let row = self.client()?.query_opt(
            "SELECT ease_factor, interval_days, next_review_date, review_count, last_reviewed, is_memorized, version
             FROM review_states
             WHERE user_id = $1 AND word_id = $2",
            &[&user_id, &word_id.to_string()],
        )?;
        row.as_ref().map(review_row).map(ReviewRow::decode).transpose()
    }

    fn save_review(
        &self,
        user_id: &str,
        word_id: Uuid,
        state: &ReviewState,
        expected_version: Option<i64>,
    ) -> DbResult<i64> {
        let mut client = self.client()?;
        let word_id = word_id.to_string();
        let next_review_date = state.next_review_date.to_string();
        let last_reviewed = format_instant(state.last_reviewed);
        let affected = match expected_version {
            None => client.execute(
                "INSERT INTO review_states (user_id, word_id, ease_factor, interval_days, next_review_date, review_count, last_reviewed, is_memorized, version)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 1)
                 ON CONFLICT (user_id, word_id) DO NOTHING",
                &[
                    &user_id,
                    &word_id,
                    &state.ease_factor,
                    &state.interval_days,
                    &next_review_date,
                    &state.review_count,
                    &last_reviewed,
                    &state.is_memorized,
                ],
            )?,
            Some(version) => client.execute(
                "UPDATE review_states
                 SET ease_factor = $3, interval_days = $4, next_review_date = $5, review_count = $6,
                     last_reviewed = $7, is_memorized = $8, version = version + 1
                 WHERE user_id = $1 AND word_id = $2 AND version = $9",
                &[
                    &user_id,
                    &word_id,
                    &state.ease_factor,
                    &state.interval_days,
                    &next_review_date,
                    &state.review_count,
                    &last_reviewed,
                    &state.is_memorized,
                    &version,
                ],
            )?,
        };
        versioned_write(affected, expected_version, "review_states")
    }

    fn list_due_words(&self, user_id: &str, today: NaiveDate) -> DbResult<Vec<Uuid>> {
        let rows = self.client()?.query(
            "SELECT word_id
             FROM review_states
             WHERE user_id = $1 AND next_review_date <= $2
             ORDER BY next_review_date, word_id",
            &[&user_id, &today.to_string()],
        )?;
        rows.iter()
            .map(|row| parse_uuid("word_id", row.get(0)))
            .collect()
    }

    fn count_reviewed_words(&self, user_id: &str) -> DbResult<i64> {
        let row = self.client()?.query_one(
            "SELECT COUNT(*) FROM review_states WHERE user_id = $1 AND review_count > 0",
            &[&user_id],
        )?;
        Ok(row.get(0))
    }

    fn count_memorized_words(&self, user_id: &str) -> DbResult<i64> {
        let row = self.client()?.query_one(
            "SELECT COUNT(*) FROM review_states WHERE user_id = $1 AND is_memorized",
            &[&user_id],
        )?;
        Ok(row.get(0))
    }

    fn load_streak(&self, user_id: &str) -> DbResult<Option<Versioned<StreakState>>> {
        let row = self.client()?.query_opt(
            "SELECT current_streak, longest_streak, last_study_date, version
             FROM learning_streaks
             WHERE user_id = $1",
            &[&user_id],
        )?;
        row.map(|row| StreakRow {
            current_streak: row.get(0),
            longest_streak: row.get(1),
            last_study_date: row.get(2),
            version: row.get(3),
        })
        .map(StreakRow::decode)
        .transpose()
    }

    fn save_streak(
        &self,
        user_id: &str,
        state: &StreakState,
        expected_version: Option<i64>,
    ) -> DbResult<i64> {
        let mut client = self.client()?;
        let current = i64::from(state.current_streak);
        let longest = i64::from(state.longest_streak);
        let last_study_date = format_instant(state.last_study_date);
        let affected = match expected_version {
            None => client.execute(
                "INSERT INTO learning_streaks (user_id, current_streak, longest_streak, last_study_date, version)
                 VALUES ($1, $2, $3, $4, 1)
                 ON CONFLICT (user_id) DO NOTHING",
                &[&user_id, &current, &longest, &last_study_date],
            )?,
            Some(version) => client.execute(
                "UPDATE learning_streaks
                 SET current_streak = $2, longest_streak = $3, last_study_date = $4,
                     version = version + 1
                 WHERE user_id = $1 AND version = $5",
                &[&user_id, &current, &longest, &last_study_date, &version],
            )?,
        };
        versioned_write(affected, expected_version, "learning_streaks")
    }

    fn insert_achievement(&self, definition: &AchievementDefinition) -> DbResult<()> {
        self.client()?.execute(
            "INSERT INTO achievements (id, code, title, criteria, target_value) VALUES ($1, $2, $3, $4, $5)",
            &[
                &definition.id.to_string(),
                &definition.code,
                &definition.title,
                &definition.criteria.as_str(),
                &definition.target_value,
            ],
        )?;
        Ok(())
    }

    fn list_achievements(
        &self,
        criteria: Option<Criteria>,
    ) -> DbResult<Vec<AchievementDefinition>> {
        let criteria = criteria.map(Criteria::as_str);
        let rows = self.client()?.query(
            "SELECT id, code, title, criteria, target_value
             FROM achievements
             WHERE $1::TEXT IS NULL OR criteria = $1::TEXT
             ORDER BY criteria, target_value, code",
            &[&criteria],
        )?;
        rows.iter()
            .map(|row| {
                AchievementRow {
                    id: row.get(0),
                    code: row.get(1),
                    title: row.get(2),
                    criteria: row.get(3),
                    target_value: row.get(4),
                }
                .decode()
            })
            .collect()
    }

    fn load_user_achievement(
        &self,
        user_id: &str,
        achievement_id: Uuid,
    ) -> DbResult<Option<Versioned<AchievementProgress>>> {
        let row = self.client()?.query_opt(
            "SELECT achievement_id, progress, is_unlocked, unlocked_at, version
             FROM user_achievements
             WHERE user_id = $1 AND achievement_id = $2",
            &[&user_id, &achievement_id.to_string()],
        )?;
        Ok(row
            .as_ref()
            .map(progress_row)
            .map(ProgressRow::decode)
            .transpose()?
            .map(|(_, progress)| progress))
    }

    fn save_user_achievement(
        &self,
        user_id: &str,
        achievement_id: Uuid,
        state: &AchievementProgress,
        expected_version: Option<i64>,
    ) -> DbResult<i64> {
        let mut client = self.client()?;
        let achievement_id = achievement_id.to_string();
        let unlocked_at = format_instant(state.unlocked_at);
        let affected = match expected_version {
            None => client.execute(
                "INSERT INTO user_achievements (user_id, achievement_id, progress, is_unlocked, unlocked_at, version)
                 VALUES ($1, $2, $3, $4, $5, 1)
                 ON CONFLICT (user_id, achievement_id) DO NOTHING",
                &[
                    &user_id,
                    &achievement_id,
                    &state.progress,
                    &state.is_unlocked,
                    &unlocked_at,
                ],
            )?,
            Some(version) => client.execute(
                "UPDATE user_achievements
                 SET progress = $3, is_unlocked = $4, unlocked_at = $5, version = version + 1
                 WHERE user_id = $1 AND achievement_id = $2 AND version = $6",
                &[
                    &user_id,
                    &achievement_id,
                    &state.progress,
                    &state.is_unlocked,
                    &unlocked_at,
                    &version,
                ],
            )?,
        };
        versioned_write(affected, expected_version, "user_achievements")
    }

    fn list_user_achievements(
        &self,
        user_id: &str,
    ) -> DbResult<Vec<(Uuid, Versioned<AchievementProgress>)>> {
        let rows = self.client()?.query(
            "SELECT achievement_id, progress, is_unlocked, unlocked_at, version
             FROM user_achievements
             WHERE user_id = $1",
            &[&user_id],
        )?;
        rows.iter().map(|row| progress_row(row).decode()).collect()
    }
}
