//! Reminder history supplied to the throttle.
//!
//! The checker itself keeps no state between runs. Hosts either start from
//! an empty [`MemoryHistory`] every run or point the checker at a
//! [`SendLog`]: an append-only JSON lines log with one entry per delivered
//! or cleared reminder.

use crate::classifier::Classification;
use crate::{BackupWatchError, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub trait ReminderHistory {
    fn last_sent(&self, username: &str) -> Option<NaiveDateTime>;

    fn record_sent(&mut self, username: &str, at: NaiveDateTime, kind: Classification) -> Result<()>;

    /// Forget a user whose backup is healthy again.
    fn clear(&mut self, username: &str, at: NaiveDateTime) -> Result<()>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryHistory {
    sent: HashMap<String, NaiveDateTime>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReminderHistory for MemoryHistory {
    fn last_sent(&self, username: &str) -> Option<NaiveDateTime> {
        self.sent.get(username).copied()
    }

    fn record_sent(&mut self, username: &str, at: NaiveDateTime, _kind: Classification) -> Result<()> {
        self.sent.insert(username.to_string(), at);
        Ok(())
    }

    fn clear(&mut self, username: &str, _at: NaiveDateTime) -> Result<()> {
        self.sent.remove(username);
        Ok(())
    }
}

/// One line of the send log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendLogEntry {
    pub at: NaiveDateTime,
    pub username: String,
    pub event: SendEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendEvent {
    Sent(Classification),
    Cleared,
}

/// Send history backed by a JSON lines file, one [`SendLogEntry`] per line.
/// The latest entry per user wins.
#[derive(Debug)]
pub struct SendLog {
    path: PathBuf,
    latest: MemoryHistory,
}

impl SendLog {
    /// Open the log, reading existing entries. A missing file is an empty
    /// history.
    pub fn open(path: &Path) -> Result<Self> {
        let mut latest = MemoryHistory::new();

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(BackupWatchError::History(format!(
                    "Failed to read send log {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SendLogEntry>(line) {
                Ok(entry) => match entry.event {
                    SendEvent::Sent(_) => {
                        latest.sent.insert(entry.username, entry.at);
                    }
                    SendEvent::Cleared => {
                        debug!("History cleared for {} at {}", entry.username, entry.at);
                        latest.sent.remove(&entry.username);
                    }
                },
                Err(e) => warn!("Ignoring malformed line {} in {}: {}", number + 1, path.display(), e),
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            latest,
        })
    }

    fn append(&self, entry: &SendLogEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let line = serde_json::to_string(entry)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                BackupWatchError::History(format!(
                    "Failed to open send log {}: {}",
                    self.path.display(),
                    e
                ))
            })?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// In-memory copy of the current state; writes to it never reach the file.
    pub fn snapshot(&self) -> MemoryHistory {
        self.latest.clone()
    }
}

impl ReminderHistory for SendLog {
    fn last_sent(&self, username: &str) -> Option<NaiveDateTime> {
        self.latest.last_sent(username)
    }

    fn record_sent(&mut self, username: &str, at: NaiveDateTime, kind: Classification) -> Result<()> {
        self.append(&SendLogEntry {
            at,
            username: username.to_string(),
            event: SendEvent::Sent(kind),
        })?;
        self.latest.record_sent(username, at, kind)
    }

    fn clear(&mut self, username: &str, at: NaiveDateTime) -> Result<()> {
        if self.latest.last_sent(username).is_none() {
            return Ok(());
        }
        self.append(&SendLogEntry {
            at,
            username: username.to_string(),
            event: SendEvent::Cleared,
        })?;
        self.latest.clear(username, at)
    }
}
