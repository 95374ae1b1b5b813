//! Reminder throttling.
//!
//! Decides whether a user should be mailed now. The decision is a pure
//! function of the classification and the last send time handed in by the
//! caller; nothing is remembered here.

use crate::classifier::ClassificationResult;
use chrono::{NaiveDateTime, TimeDelta};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderReason {
    FirstOccurrence,
    IntervalElapsed,
    WeekendSuppressed,
    NotDue,
    /// Current or empty backups are never reminded.
    NotEligible,
}

impl fmt::Display for ReminderReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ReminderReason::FirstOccurrence => "first occurrence",
            ReminderReason::IntervalElapsed => "interval elapsed",
            ReminderReason::WeekendSuppressed => "suppressed on weekends",
            ReminderReason::NotDue => "not due",
            ReminderReason::NotEligible => "not eligible",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReminderDecision {
    pub username: String,
    pub should_send: bool,
    pub reason: ReminderReason,
}

impl ReminderDecision {
    fn new(username: &str, reason: ReminderReason) -> Self {
        let should_send = matches!(
            reason,
            ReminderReason::FirstOccurrence | ReminderReason::IntervalElapsed
        );
        Self {
            username: username.to_string(),
            should_send,
            reason,
        }
    }
}

pub fn should_remind(
    result: &ClassificationResult,
    last_sent: Option<NaiveDateTime>,
    now: NaiveDateTime,
    interval: TimeDelta,
    is_weekend_today: bool,
    exclude_weekends: bool,
) -> ReminderDecision {
    let username = result.username.as_str();

    if !result.classification.is_actionable() {
        return ReminderDecision::new(username, ReminderReason::NotEligible);
    }
    if exclude_weekends && is_weekend_today {
        return ReminderDecision::new(username, ReminderReason::WeekendSuppressed);
    }

    let reason = match last_sent {
        None => ReminderReason::FirstOccurrence,
        Some(sent) if now - sent >= interval => ReminderReason::IntervalElapsed,
        Some(_) => ReminderReason::NotDue,
    };
    ReminderDecision::new(username, reason)
}
