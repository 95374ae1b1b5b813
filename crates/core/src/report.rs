//! Administrator report.
//!
//! Groups per-user outcomes so that every discovered user appears in
//! exactly one group, and renders the groups as text or JSON.

use crate::classifier::{Classification, ClassificationResult};
use crate::error::ScanFailure;
use crate::Result;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt::Write;
use std::path::PathBuf;

const SECTION_SEPARATOR: &str = "\n\n\n";

/// Result of checking one user. Scan failures stay attached to the user
/// instead of aborting the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserOutcome {
    pub username: String,
    pub backup_dir: PathBuf,
    pub result: std::result::Result<ClassificationResult, ScanFailure>,
}

impl UserOutcome {
    pub fn classification(&self) -> Option<Classification> {
        self.result.as_ref().ok().map(|r| r.classification)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportGroups {
    pub outdated: Vec<String>,
    /// Users without any file in their backup directory. Reported together
    /// with `outdated`.
    pub no_files: Vec<String>,
    pub future_dated: Vec<String>,
    pub ok: Vec<String>,
    pub unreadable: Vec<String>,
}

impl ReportGroups {
    /// Outdated users including those without any backup, sorted.
    pub fn outdated_with_missing(&self) -> Vec<&str> {
        let mut users: Vec<&str> = self
            .outdated
            .iter()
            .chain(self.no_files.iter())
            .map(String::as_str)
            .collect();
        users.sort_unstable();
        users
    }

    pub fn total(&self) -> usize {
        self.outdated.len()
            + self.no_files.len()
            + self.future_dated.len()
            + self.ok.len()
            + self.unreadable.len()
    }
}

pub fn assemble(outcomes: &[UserOutcome]) -> ReportGroups {
    let mut groups = ReportGroups::default();

    for outcome in outcomes {
        let name = outcome.username.clone();
        match outcome.classification() {
            Some(Classification::Current) => groups.ok.push(name),
            Some(Classification::Outdated) => groups.outdated.push(name),
            Some(Classification::NoFiles) => groups.no_files.push(name),
            Some(Classification::FutureDated) => groups.future_dated.push(name),
            None => groups.unreadable.push(name),
        }
    }

    for group in [
        &mut groups.outdated,
        &mut groups.no_files,
        &mut groups.future_dated,
        &mut groups.ok,
        &mut groups.unreadable,
    ] {
        group.sort();
    }
    groups
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    pub username: String,
    pub status: String,
    pub backup_dir: PathBuf,
    pub newest_mtime: Option<NaiveDateTime>,
    pub age_days: Option<i64>,
    pub error: Option<String>,
}

impl ReportEntry {
    fn from_outcome(outcome: &UserOutcome) -> Self {
        match &outcome.result {
            Ok(result) => Self {
                username: outcome.username.clone(),
                status: result.classification.to_string(),
                backup_dir: outcome.backup_dir.clone(),
                newest_mtime: result.newest_mtime,
                age_days: result.age_days,
                error: None,
            },
            Err(failure) => Self {
                username: outcome.username.clone(),
                status: "unreadable".to_string(),
                backup_dir: outcome.backup_dir.clone(),
                newest_mtime: None,
                age_days: None,
                error: Some(failure.to_string()),
            },
        }
    }

    /// Text shown in parentheses behind the username.
    fn detail(&self) -> String {
        if let Some(error) = &self.error {
            return error.clone();
        }
        match self.newest_mtime {
            Some(mtime) => mtime.format("%Y-%m-%d").to_string(),
            None => "no files".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub generated_at: NaiveDateTime,
    pub groups: ReportGroups,
    pub users: Vec<ReportEntry>,
    pub notes: Vec<String>,
}

impl StatusReport {
    pub fn new(generated_at: NaiveDateTime, outcomes: &[UserOutcome], notes: Vec<String>) -> Self {
        let mut users: Vec<ReportEntry> = outcomes.iter().map(ReportEntry::from_outcome).collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));

        Self {
            generated_at,
            groups: assemble(outcomes),
            users,
            notes,
        }
    }

    fn entry(&self, username: &str) -> Option<&ReportEntry> {
        self.users.iter().find(|e| e.username == username)
    }

    fn render_section(&self, out: &mut String, title: &str, names: &[&str], width: usize) {
        let _ = writeln!(out, "{}:", title);
        if names.is_empty() {
            out.push_str("[None]");
            return;
        }
        let lines: Vec<String> = names
            .iter()
            .filter_map(|name| self.entry(name))
            .map(|entry| format!("- {:<width$}({})", entry.username, entry.detail(), width = width))
            .collect();
        out.push_str(&lines.join("\n"));
    }

    /// Plain-text protocol for administrators.
    pub fn render_text(&self) -> String {
        let width = self
            .users
            .iter()
            .map(|e| e.username.chars().count())
            .max()
            .unwrap_or(0)
            + 2;

        fn as_str(names: &[String]) -> Vec<&str> {
            names.iter().map(String::as_str).collect()
        }

        let mut out = String::new();

        self.render_section(&mut out, "Outdated users", &self.groups.outdated_with_missing(), width);
        out.push_str(SECTION_SEPARATOR);
        self.render_section(&mut out, "Users with future files", &as_str(&self.groups.future_dated), width);
        out.push_str(SECTION_SEPARATOR);
        self.render_section(&mut out, "OK users", &as_str(&self.groups.ok), width);
        out.push_str(SECTION_SEPARATOR);
        self.render_section(&mut out, "Unreadable users", &as_str(&self.groups.unreadable), width);

        if !self.notes.is_empty() {
            out.push_str(SECTION_SEPARATOR);
            out.push_str("Log:\n");
            let notes: Vec<String> = self.notes.iter().map(|n| format!("- {}", n)).collect();
            out.push_str(&notes.join("\n"));
        }

        out.push('\n');
        out
    }

    pub fn render_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
