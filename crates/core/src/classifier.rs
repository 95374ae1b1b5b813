//! Backup recency classification.

use crate::calendar::age_in_relevant_days;
use crate::config::Tolerances;
use crate::scanner::NewestFile;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Current,
    Outdated,
    FutureDated,
    NoFiles,
}

impl Classification {
    /// Whether users in this state are reminded by mail.
    pub fn is_actionable(self) -> bool {
        matches!(self, Classification::Outdated | Classification::FutureDated)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Current => write!(f, "current"),
            Classification::Outdated => write!(f, "outdated"),
            Classification::FutureDated => write!(f, "future-dated"),
            Classification::NoFiles => write!(f, "no files"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassificationResult {
    pub username: String,
    pub newest_path: Option<PathBuf>,
    pub newest_mtime: Option<NaiveDateTime>,
    pub classification: Classification,
    /// Relevant days since the newest file, or until it for future-dated
    /// backups.
    pub age_days: Option<i64>,
}

/// Classify one user's backup against the tolerances.
///
/// Future-dating is checked first: a far-future timestamp has a large
/// negative age and would otherwise pass as current. Both thresholds are
/// inclusive, i.e. a backup exactly at a threshold has not crossed it yet.
pub fn classify(
    username: &str,
    newest: Option<&NewestFile>,
    now: NaiveDateTime,
    tolerances: &Tolerances,
) -> ClassificationResult {
    let Some(newest) = newest else {
        return ClassificationResult {
            username: username.to_string(),
            newest_path: None,
            newest_mtime: None,
            classification: Classification::NoFiles,
            age_days: None,
        };
    };

    let exclude_weekends = tolerances.exclude_weekends;
    let (classification, age_days) = if newest.mtime - now > tolerances.future_tolerance {
        (
            Classification::FutureDated,
            age_in_relevant_days(now, newest.mtime, exclude_weekends),
        )
    } else {
        let age = age_in_relevant_days(newest.mtime, now, exclude_weekends);
        if age > tolerances.outdated_tolerance.num_days() {
            (Classification::Outdated, age)
        } else {
            (Classification::Current, age)
        }
    };

    ClassificationResult {
        username: username.to_string(),
        newest_path: Some(newest.path.clone()),
        newest_mtime: Some(newest.mtime),
        classification,
        age_days: Some(age_days),
    }
}
