//! Property tests for the engagement engine
//!
//! - Streak: longest never decreases and never falls below current
//! - Streak: recording the same day twice is a no-op
//! - Streak: an active streak never reads 0
//! - Review: ease factor never falls below the floor, interval never below 1
//! - Achievement: once unlocked, further updates change nothing

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use proptest::prelude::*;

use engagement_core::{
    AchievementProgress, ReviewScheduler, ReviewState, StreakState, record_activity,
    update_progress,
};

// ============================================================================
// Generators
// ============================================================================

fn base_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

fn base_instant() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
}

/// Day offsets, including repeats and out-of-order entries.
fn arb_day_offsets() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(0i64..120, 1..60)
}

fn arb_offset() -> impl Strategy<Value = FixedOffset> {
    (-12i32..=14).prop_map(|hours| FixedOffset::east_opt(hours * 3600).unwrap())
}

// ============================================================================
// Streak
// ============================================================================

proptest! {
    #[test]
    fn longest_streak_is_monotonic(offsets in arb_day_offsets(), tz in arb_offset()) {
        let mut state = StreakState::new();
        for offset in offsets {
            let before = state.longest_streak;
            state = record_activity(&state, base_day() + Duration::days(offset), &tz).state;
            prop_assert!(state.longest_streak >= before);
            prop_assert!(state.longest_streak >= state.current_streak);
        }
    }

    #[test]
    fn repeat_same_day_is_idempotent(offsets in arb_day_offsets(), tz in arb_offset()) {
        let mut state = StreakState::new();
        for offset in offsets {
            let date = base_day() + Duration::days(offset);
            state = record_activity(&state, date, &tz).state;
            let again = record_activity(&state, date, &tz);
            prop_assert!(!again.updated);
            prop_assert_eq!(&again.state, &state);
        }
    }

    #[test]
    fn recorded_streak_never_reads_zero(offsets in arb_day_offsets()) {
        let mut state = StreakState::new();
        for offset in offsets {
            state = record_activity(&state, base_day() + Duration::days(offset), &Utc).state;
            prop_assert!(state.current_streak >= 1);
        }
    }

    #[test]
    fn gap_of_two_or_more_resets_to_one(current in 1u32..500, gap in 2i64..400) {
        let state = StreakState {
            current_streak: current,
            longest_streak: current,
            last_study_date: Some(Utc.from_utc_datetime(&base_day().and_hms_opt(0, 0, 0).unwrap())),
        };
        let update = record_activity(&state, base_day() + Duration::days(gap), &Utc);
        prop_assert!(update.updated);
        prop_assert_eq!(update.state.current_streak, 1);
        prop_assert_eq!(update.state.longest_streak, current);
    }
}

// ============================================================================
// Review
// ============================================================================

proptest! {
    #[test]
    fn ease_and_interval_stay_in_bounds(qualities in prop::collection::vec(0i32..=5, 1..40)) {
        let scheduler = ReviewScheduler::new();
        let mut state = ReviewState::new(base_day());
        for (i, quality) in qualities.into_iter().enumerate() {
            let now = base_instant() + Duration::days(i as i64);
            state = scheduler.schedule(&state, quality, now).unwrap();
            prop_assert!(state.ease_factor >= 130);
            prop_assert!(state.interval_days >= 1);
            prop_assert_eq!(
                state.next_review_date,
                now.date_naive() + Duration::days(state.interval_days as i64)
            );
            prop_assert_eq!(state.last_reviewed, Some(now));
        }
    }

    #[test]
    fn poor_recall_always_resets_interval(
        interval in 0i32..5_000,
        count in 0i32..50,
        quality in 0i32..3,
    ) {
        let scheduler = ReviewScheduler::new();
        let state = ReviewState {
            interval_days: interval,
            review_count: count,
            ..ReviewState::new(base_day())
        };
        let next = scheduler.schedule(&state, quality, base_instant()).unwrap();
        prop_assert_eq!(next.interval_days, 1);
        prop_assert_eq!(next.review_count, count + 1);
    }

    #[test]
    fn out_of_range_quality_is_rejected(quality in prop_oneof![i32::MIN..0, 6..i32::MAX]) {
        let scheduler = ReviewScheduler::new();
        let state = ReviewState::new(base_day());
        prop_assert!(scheduler.schedule(&state, quality, base_instant()).is_err());
    }
}

// ============================================================================
// Achievement
// ============================================================================

proptest! {
    #[test]
    fn unlocked_records_are_frozen(
        target in 1.0f64..1_000.0,
        values in prop::collection::vec(0.0f64..2_000.0, 1..30),
    ) {
        let fresh = AchievementProgress::new();
        let unlocked = update_progress(&fresh, target, Some(target), base_instant());
        prop_assert!(unlocked.just_unlocked);

        let mut state = unlocked.state.clone();
        for (i, value) in values.into_iter().enumerate() {
            let now = base_instant() + Duration::hours(i as i64 + 1);
            let update = update_progress(&state, value, Some(target), now);
            prop_assert!(!update.just_unlocked);
            prop_assert_eq!(&update.state, &unlocked.state);
            state = update.state;
        }
    }

    #[test]
    fn unlock_fires_exactly_once(values in prop::collection::vec(0.0f64..200.0, 1..40)) {
        let target = 100.0;
        let mut state = AchievementProgress::new();
        let mut unlocks = 0;
        for value in &values {
            let update = update_progress(&state, *value, Some(target), base_instant());
            if update.just_unlocked {
                unlocks += 1;
            }
            state = update.state;
        }
        let expected = usize::from(values.iter().any(|value| *value >= target));
        prop_assert_eq!(unlocks, expected);
    }
}
