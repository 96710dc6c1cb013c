//! Daily learning streaks.
//!
//! Day boundaries are those of the learner's timezone. The last activity is
//! kept as an absolute instant (local midnight of the study day) so the record
//! stays meaningful if the learner later reports a different zone.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakState {
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_study_date: Option<DateTime<Utc>>,
}

impl StreakState {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreakUpdate {
    pub state: StreakState,
    pub updated: bool,
}

/// Record one day of study activity.
///
/// Same-day and backdated activity leave the state untouched and report
/// `updated == false`; a one-day gap extends the streak; anything longer
/// restarts it at 1.
pub fn record_activity<Tz: TimeZone>(
    state: &StreakState,
    activity_date: NaiveDate,
    tz: &Tz,
) -> StreakUpdate {
    let last_date = state.last_study_date.map(|at| local_date(at, tz));

    let current_streak = match last_date {
        None => 1,
        Some(last) => match (activity_date - last).num_days() {
            0 => {
                debug!(%activity_date, "activity already recorded for this day");
                return unchanged(state);
            }
            gap if gap < 0 => {
                debug!(%activity_date, %last, "ignoring activity older than last study day");
                return unchanged(state);
            }
            1 => state.current_streak.saturating_add(1),
            _ => 1,
        },
    };

    let next = StreakState {
        current_streak,
        longest_streak: state.longest_streak.max(current_streak),
        last_study_date: Some(start_of_day(activity_date, tz)),
    };
    debug!(
        %activity_date,
        current = next.current_streak,
        longest = next.longest_streak,
        "streak updated"
    );

    StreakUpdate {
        state: next,
        updated: true,
    }
}

pub fn has_studied_today<Tz: TimeZone>(state: &StreakState, now: DateTime<Utc>, tz: &Tz) -> bool {
    state
        .last_study_date
        .is_some_and(|at| local_date(at, tz) == local_date(now, tz))
}

/// True while the streak can still be extended: the last study day is today
/// or yesterday.
pub fn is_streak_active<Tz: TimeZone>(state: &StreakState, now: DateTime<Utc>, tz: &Tz) -> bool {
    state
        .last_study_date
        .is_some_and(|at| (local_date(now, tz) - local_date(at, tz)).num_days() <= 1)
}

pub fn needs_study_today<Tz: TimeZone>(state: &StreakState, now: DateTime<Utc>, tz: &Tz) -> bool {
    !has_studied_today(state, now, tz)
}

pub fn is_new_record(state: &StreakState) -> bool {
    state.current_streak != 0 && state.current_streak == state.longest_streak
}

/// The first instant of `date` in `tz`, as UTC.
///
/// Where a DST transition skips local midnight, the first valid local time of
/// the day is used instead.
pub fn start_of_day<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    if let Some(at) = tz.from_local_datetime(&midnight).earliest() {
        return at.with_timezone(&Utc);
    }
    (1..=96)
        .find_map(|step| {
            tz.from_local_datetime(&(midnight + Duration::minutes(15 * step)))
                .earliest()
        })
        .map(|at| at.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
}

pub fn local_date<Tz: TimeZone>(at: DateTime<Utc>, tz: &Tz) -> NaiveDate {
    at.with_timezone(tz).date_naive()
}

fn unchanged(state: &StreakState) -> StreakUpdate {
    StreakUpdate {
        state: state.clone(),
        updated: false,
    }
}
