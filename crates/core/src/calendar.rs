//! Calendar arithmetic for backup ages.
//!
//! Ages are measured either in plain elapsed time or in "relevant" time,
//! where Saturdays and Sundays do not count. Everything here is pure: the
//! reference instant is always an argument, never the wall clock.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Weekday};

pub const SECONDS_PER_DAY: i64 = 86_400;

/// Whether the date falls on a Saturday or Sunday.
pub fn is_weekend_day(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

pub fn is_weekend(timestamp: NaiveDateTime) -> bool {
    is_weekend_day(timestamp.date())
}

/// Midnight of the first Monday strictly after `date`.
pub fn next_monday(date: NaiveDate) -> NaiveDateTime {
    let days_ahead = 7 - i64::from(date.weekday().num_days_from_monday());
    (date + TimeDelta::days(days_ahead)).and_time(NaiveTime::MIN)
}

/// Moves a weekend instant to the start of the following Monday.
fn skip_weekend(timestamp: NaiveDateTime) -> NaiveDateTime {
    if is_weekend(timestamp) {
        next_monday(timestamp.date())
    } else {
        timestamp
    }
}

/// Signed time elapsed between `from` and `to`.
///
/// With `exclude_weekends` only time on Monday to Friday counts; an endpoint
/// on a weekend behaves as if it were the end of the preceding Friday.
pub fn relevant_duration(from: NaiveDateTime, to: NaiveDateTime, exclude_weekends: bool) -> TimeDelta {
    if !exclude_weekends {
        return to - from;
    }
    if to < from {
        return -relevant_duration(to, from, true);
    }

    let start = skip_weekend(from);
    let end = skip_weekend(to);
    if end <= start {
        return TimeDelta::zero();
    }

    // Both endpoints are now on weekdays, so every weekend in between is
    // crossed completely.
    let span_days = (end.date() - start.date()).num_days();
    let offset = i64::from(start.weekday().num_days_from_monday());
    let weekends = (offset + span_days) / 7;

    (end - start) - TimeDelta::days(2 * weekends)
}

/// Whole relevant days from `from` to `to`, floored. Negative when `to` is
/// earlier than `from`.
pub fn age_in_relevant_days(from: NaiveDateTime, to: NaiveDateTime, exclude_weekends: bool) -> i64 {
    relevant_duration(from, to, exclude_weekends)
        .num_seconds()
        .div_euclid(SECONDS_PER_DAY)
}
