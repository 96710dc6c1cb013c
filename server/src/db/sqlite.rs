use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDate;
use engagement_core::{
    AchievementDefinition, AchievementProgress, Criteria, ReviewState, StreakState,
};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::db::{
    AchievementRow, Db, DbError, DbResult, ProgressRow, ReviewRow, StreakRow, Versioned,
    format_instant,
};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS review_states (
        user_id TEXT NOT NULL,
        word_id TEXT NOT NULL,
        ease_factor INTEGER NOT NULL,
        interval_days INTEGER NOT NULL,
        next_review_date TEXT NOT NULL,
        review_count INTEGER NOT NULL,
        last_reviewed TEXT,
        is_memorized INTEGER NOT NULL DEFAULT 0,
        version INTEGER NOT NULL,
        PRIMARY KEY (user_id, word_id)
    );
    CREATE INDEX IF NOT EXISTS review_states_due ON review_states (user_id, next_review_date);
    CREATE TABLE IF NOT EXISTS learning_streaks (
        user_id TEXT PRIMARY KEY,
        current_streak INTEGER NOT NULL,
        longest_streak INTEGER NOT NULL,
        last_study_date TEXT,
        version INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS achievements (
        id TEXT PRIMARY KEY,
        code TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        criteria TEXT NOT NULL,
        target_value REAL
    );
    CREATE TABLE IF NOT EXISTS user_achievements (
        user_id TEXT NOT NULL,
        achievement_id TEXT NOT NULL,
        progress REAL,
        is_unlocked INTEGER NOT NULL DEFAULT 0,
        unlocked_at TEXT,
        version INTEGER NOT NULL,
        PRIMARY KEY (user_id, achievement_id),
        FOREIGN KEY (achievement_id) REFERENCES achievements(id)
    );";

pub struct SqliteDb {
    conn: Mutex<Connection>,
}

impl SqliteDb {
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DbError::Config("SQLite connection lock poisoned".to_string()))
    }
}

/// Turn an affected-row count from a versioned write into the new version.
fn versioned_write(
    affected: usize,
    expected_version: Option<i64>,
    record: &'static str,
) -> DbResult<i64> {
    if affected == 0 {
        return Err(DbError::StaleWrite { record });
    }
    Ok(expected_version.map_or(1, |version| version + 1))
}

impl Db for SqliteDb {
    fn init(&self) -> DbResult<()> {
        self.conn()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn load_review(
        &self,
        user_id: &str,
        word_id: Uuid,
    ) -> DbResult<Option<Versioned<ReviewState>>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT ease_factor, interval_days, next_review_date, review_count, last_reviewed, is_memorized, version
                 FROM review_states
                 WHERE user_id = ?1 AND word_id = ?2",
                params![user_id, word_id.to_string()],
                |row| {
                    Ok(ReviewRow {
                        ease_factor: row.get(0)?,
                        interval_days: row.get(1)?,
                        next_review_date: row.get(2)?,
                        review_count: row.get(3)?,
                        last_reviewed: row.get(4)?,
                        is_memorized: row.get(5)?,
                        version: row.get(6)?,
                    })
                },
            )
            .optional()?;
        row.map(ReviewRow::decode).transpose()
    }

    fn save_review(
        &self,
        user_id: &str,
        word_id: Uuid,
        state: &ReviewState,
        expected_version: Option<i64>,
    ) -> DbResult<i64> {
        let conn = self.conn()?;
        let next_review_date = state.next_review_date.to_string();
        let last_reviewed = format_instant(state.last_reviewed);
        let affected = match expected_version {
            None => conn.execute(
                "INSERT INTO review_states (user_id, word_id, ease_factor, interval_days, next_review_date, review_count, last_reviewed, is_memorized, version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1)
                 ON CONFLICT (user_id, word_id) DO NOTHING",
                params![
                    user_id,
                    word_id.to_string(),
                    state.ease_factor,
                    state.interval_days,
                    next_review_date,
                    state.review_count,
                    last_reviewed,
                    state.is_memorized
                ],
            )?,
            Some(version) => conn.execute(
                "UPDATE review_states
                 SET ease_factor = ?3, interval_days = ?4, next_review_date = ?5, review_count = ?6,
                     last_reviewed = ?7, is_memorized = ?8, version = version + 1
                 WHERE user_id = ?1 AND word_id = ?2 AND version = ?9",
                params![
                    user_id,
                    word_id.to_string(),
                    state.ease_factor,
                    state.interval_days,
                    next_review_date,
                    state.review_count,
                    last_reviewed,
                    state.is_memorized,
                    version
                ],
            )?,
        };
        versioned_write(affected, expected_version, "review_states")
    }

    fn list_due_words(&self, user_id: &str, today: NaiveDate) -> DbResult<Vec<Uuid>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT word_id
             FROM review_states
             WHERE user_id = ?1 AND next_review_date <= ?2
             ORDER BY next_review_date, word_id",
        )?;
        let rows = stmt.query_map(params![user_id, today.to_string()], |row| {
            row.get::<_, String>(0)
        })?;
        let mut words = Vec::new();
        for row in rows {
            words.push(crate::db::parse_uuid("word_id", row?)?);
        }
        Ok(words)
    }

    fn count_reviewed_words(&self, user_id: &str) -> DbResult<i64> {
        let count = self.conn()?.query_row(
            "SELECT COUNT(*) FROM review_states WHERE user_id = ?1 AND review_count > 0",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn count_memorized_words(&self, user_id: &str) -> DbResult<i64> {
        let count = self.conn()?.query_row(
            "SELECT COUNT(*) FROM review_states WHERE user_id = ?1 AND is_memorized = 1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn load_streak(&self, user_id: &str) -> DbResult<Option<Versioned<StreakState>>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT current_streak, longest_streak, last_study_date, version
                 FROM learning_streaks
                 WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(StreakRow {
                        current_streak: row.get(0)?,
                        longest_streak: row.get(1)?,
                        last_study_date: row.get(2)?,
                        version: row.get(3)?,
                    })
                },
            )
            .optional()?;
        row.map(StreakRow::decode).transpose()
    }

    fn save_streak(
        &self,
        user_id: &str,
        state: &StreakState,
        expected_version: Option<i64>,
    ) -> DbResult<i64> {
        let conn = self.conn()?;
        let last_study_date = format_instant(state.last_study_date);
        let affected = match expected_version {
            None => conn.execute(
                "INSERT INTO learning_streaks (user_id, current_streak, longest_streak, last_study_date, version)
                 VALUES (?1, ?2, ?3, ?4, 1)
                 ON CONFLICT (user_id) DO NOTHING",
                params![
                    user_id,
                    state.current_streak,
                    state.longest_streak,
                    last_study_date
                ],
            )?,
            Some(version) => conn.execute(
                "UPDATE learning_streaks
                 SET current_streak = ?2, longest_streak = ?3, last_study_date = ?4,
                     version = version + 1
                 WHERE user_id = ?1 AND version = ?5",
                params![
                    user_id,
                    state.current_streak,
                    state.longest_streak,
                    last_study_date,
                    version
                ],
            )?,
        };
        versioned_write(affected, expected_version, "learning_streaks")
    }

    fn insert_achievement(&self, definition: &AchievementDefinition) -> DbResult<()> {
        self.conn()?.execute(
            "INSERT INTO achievements (id, code, title, criteria, target_value) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                definition.id.to_string(),
                definition.code,
                definition.title,
                definition.criteria.as_str(),
                definition.target_value
            ],
        )?;
        Ok(())
    }

    fn list_achievements(
        &self,
        criteria: Option<Criteria>,
    ) -> DbResult<Vec<AchievementDefinition>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, code, title, criteria, target_value
             FROM achievements
             WHERE ?1 IS NULL OR criteria = ?1
             ORDER BY criteria, target_value, code",
        )?;
        let rows = stmt.query_map(params![criteria.map(Criteria::as_str)], |row| {
            Ok(AchievementRow {
                id: row.get(0)?,
                code: row.get(1)?,
                title: row.get(2)?,
                criteria: row.get(3)?,
                target_value: row.get(4)?,
            })
        })?;
        let mut definitions = Vec::new();
        for row in rows {
            definitions.push(row?.decode()?);
        }
        Ok(definitions)
    }

    fn load_user_achievement(
        &self,
        user_id: &str,
        achievement_id: Uuid,
    ) -> DbResult<Option<Versioned<AchievementProgress>>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT achievement_id, progress, is_unlocked, unlocked_at, version
                 FROM user_achievements
                 WHERE user_id = ?1 AND achievement_id = ?2",
                params![user_id, achievement_id.to_string()],
                progress_row,
            )
            .optional()?;
        Ok(row.map(ProgressRow::decode).transpose()?.map(|(_, progress)| progress))
    }

    fn save_user_achievement(
        &self,
        user_id: &str,
        achievement_id: Uuid,
        state: &AchievementProgress,
        expected_version: Option<i64>,
    ) -> DbResult<i64> {
        let conn = self.conn()?;
        let unlocked_at = format_instant(state.unlocked_at);
        let affected = match expected_version {
            None => conn.execute(
                "INSERT INTO user_achievements (user_id, achievement_id, progress, is_unlocked, unlocked_at, version)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1)
                 ON CONFLICT (user_id, achievement_id) DO NOTHING",
                params![
                    user_id,
                    achievement_id.to_string(),
                    state.progress,
                    state.is_unlocked,
                    unlocked_at
                ],
            )?,
            Some(version) => conn.execute(
                "UPDATE user_achievements
                 SET progress = ?3, is_unlocked = ?4, unlocked_at = ?5, version = version + 1
                 WHERE user_id = ?1 AND achievement_id = ?2 AND version = ?6",
                params![
                    user_id,
                    achievement_id.to_string(),
                    state.progress,
                    state.is_unlocked,
                    unlocked_at,
                    version
                ],
            )?,
        };
        versioned_write(affected, expected_version, "user_achievements")
    }

    fn list_user_achievements(
        &self,
        user_id: &str,
    ) -> DbResult<Vec<(Uuid, Versioned<AchievementProgress>)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT achievement_id, progress, is_unlocked, unlocked_at, version
             FROM user_achievements
             WHERE user_id = ?1",
        )?;
        let rows = stmt.query_map(params![user_id], progress_row)?;
        let mut progress = Vec::new();
        for row in rows {
            progress.push(row?.decode()?);
        }
        Ok(progress)
    }
}

fn progress_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProgressRow> {
    Ok(ProgressRow {
        achievement_id: row.get(0)?,
        progress: row.get(1)?,
        is_unlocked: row.get(2)?,
        unlocked_at: row.get(3)?,
        version: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn db() -> SqliteDb {
        let db = SqliteDb::open_in_memory().unwrap();
        db.init().unwrap();
        db
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn review_round_trip_and_version_check() {
        let db = db();
        let word = Uuid::new_v4();
        let mut state = ReviewState::new(day(2024, 4, 1));
        state.last_reviewed = Some(Utc.with_ymd_and_hms(2024, 4, 1, 8, 0, 0).unwrap());

        assert_eq!(db.save_review("ana", word, &state, None).unwrap(), 1);
        let loaded = db.load_review("ana", word).unwrap().unwrap();
        assert_eq!(loaded.record, state);
        assert_eq!(loaded.version, 1);

        assert_eq!(db.save_review("ana", word, &state, Some(1)).unwrap(), 2);
        assert!(matches!(
            db.save_review("ana", word, &state, Some(1)),
            Err(DbError::StaleWrite { .. })
        ));
        assert!(matches!(
            db.save_review("ana", word, &state, None),
            Err(DbError::StaleWrite { .. })
        ));
    }

    #[test]
    fn due_words_and_counts() {
        let db = db();
        let due = Uuid::new_v4();
        let later = Uuid::new_v4();

        let mut due_state = ReviewState::new(day(2024, 4, 1));
        due_state.review_count = 1;
        due_state.is_memorized = true;
        db.save_review("ana", due, &due_state, None).unwrap();
        db.save_review("ana", later, &ReviewState::new(day(2024, 4, 9)), None)
            .unwrap();
        db.save_review("ben", Uuid::new_v4(), &ReviewState::new(day(2024, 4, 1)), None)
            .unwrap();

        assert_eq!(db.list_due_words("ana", day(2024, 4, 5)).unwrap(), vec![due]);
        assert_eq!(db.count_reviewed_words("ana").unwrap(), 1);
        assert_eq!(db.count_memorized_words("ana").unwrap(), 1);
        assert_eq!(db.count_memorized_words("ben").unwrap(), 0);
    }

    #[test]
    fn streak_round_trip() {
        let db = db();
        assert!(db.load_streak("ana").unwrap().is_none());

        let state = StreakState {
            current_streak: 4,
            longest_streak: 9,
            last_study_date: Some(Utc.with_ymd_and_hms(2024, 4, 1, 22, 0, 0).unwrap()),
        };
        db.save_streak("ana", &state, None).unwrap();
        let loaded = db.load_streak("ana").unwrap().unwrap();
        assert_eq!(loaded.record, state);
        assert!(matches!(
            db.save_streak("ana", &state, Some(7)),
            Err(DbError::StaleWrite { .. })
        ));
    }

    #[test]
    fn achievements_filter_by_criteria() {
        let db = db();
        assert_eq!(crate::db::seed_default_achievements(&db).unwrap(), 8);
        assert_eq!(crate::db::seed_default_achievements(&db).unwrap(), 0);

        let streaks = db.list_achievements(Some(Criteria::Streak)).unwrap();
        assert_eq!(streaks.len(), 3);
        assert!(streaks.iter().all(|d| d.criteria == Criteria::Streak));
        assert_eq!(db.list_achievements(None).unwrap().len(), 8);

        let id = streaks[0].id;
        let progress = AchievementProgress {
            progress: Some(2.0),
            ..AchievementProgress::new()
        };
        db.save_user_achievement("ana", id, &progress, None).unwrap();
        let loaded = db.load_user_achievement("ana", id).unwrap().unwrap();
        assert_eq!(loaded.record, progress);
        assert_eq!(db.list_user_achievements("ana").unwrap().len(), 1);
        assert!(db.list_user_achievements("ben").unwrap().is_empty());
    }
}
