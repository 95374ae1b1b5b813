//! One complete check: resolve users, scan and classify their backups,
//! decide and deliver reminders, and build the administrator report.

use crate::calendar::is_weekend;
use crate::classifier::classify;
use crate::clock::Clock;
use crate::config::{CheckerConfig, Tolerances};
use crate::error::NotifyError;
use crate::history::ReminderHistory;
use crate::notify::{reminder_message, AddressBook, MailTemplates, Notifier};
use crate::report::{StatusReport, UserOutcome};
use crate::resolver::{resolve, FsGlobExpander, GlobExpander, Resolution, UserRecord};
use crate::scanner::NewestFileScan;
use crate::throttle::{should_remind, ReminderDecision};
use crate::Result;
use chrono::NaiveDateTime;
use rayon::prelude::*;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of [`BackupChecker::check`].
#[derive(Debug, Clone)]
pub struct CheckRun {
    pub now: NaiveDateTime,
    pub users: Vec<UserRecord>,
    /// One outcome per user, sorted by username.
    pub outcomes: Vec<UserOutcome>,
    pub notes: Vec<String>,
}

impl CheckRun {
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Throttled,
    NoAddress,
    Failed(String),
    /// Delivered, but the send could not be written to the history.
    Unrecorded(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReminderDelivery {
    pub decision: ReminderDecision,
    pub recipient: Option<String>,
    pub status: DeliveryStatus,
}

pub struct BackupChecker {
    config: CheckerConfig,
    tolerances: Tolerances,
    scanner: Box<dyn NewestFileScan>,
    expander: Box<dyn GlobExpander>,
    clock: Arc<dyn Clock>,
    addresses: AddressBook,
    templates: MailTemplates,
}

impl BackupChecker {
    pub fn new(
        config: CheckerConfig,
        scanner: Box<dyn NewestFileScan>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            tolerances: config.tolerances(),
            addresses: AddressBook::new(
                config.notify.addresses.clone(),
                config.notify.mail_domain.clone(),
            ),
            templates: MailTemplates::from(&config.notify),
            config,
            scanner,
            expander: Box::new(FsGlobExpander::new()),
            clock,
        })
    }

    pub fn with_expander(mut self, expander: Box<dyn GlobExpander>) -> Self {
        self.expander = expander;
        self
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    pub fn resolve(&self) -> Result<Resolution> {
        resolve(
            &self.config.rules(),
            &self.tolerances.excluded_usernames,
            self.expander.as_ref(),
        )
    }

    pub fn check(&self) -> Result<CheckRun> {
        let now = self.clock.now();
        let resolution = self.resolve()?;
        let users: Vec<UserRecord> = resolution.users.into_values().collect();

        info!("Checking backups of {} users", users.len());

        let outcomes: Vec<UserOutcome> = if self.config.scan.parallel {
            users.par_iter().map(|user| self.check_user(user, now)).collect()
        } else {
            users.iter().map(|user| self.check_user(user, now)).collect()
        };

        let run = CheckRun {
            now,
            users,
            outcomes,
            notes: resolution.notes,
        };
        self.log_summary(&run);
        Ok(run)
    }

    fn check_user(&self, user: &UserRecord, now: NaiveDateTime) -> UserOutcome {
        debug!("Scanning {} ({})", user.username, user.backup_dir.display());

        let result = self
            .scanner
            .newest_file(&user.backup_dir)
            .map(|newest| classify(&user.username, newest.as_ref(), now, &self.tolerances));

        match &result {
            Ok(classified) => debug!("{}: {}", user.username, classified.classification),
            Err(failure) => warn!("Scan failed for user '{}': {}", user.username, failure),
        }

        UserOutcome {
            username: user.username.clone(),
            backup_dir: user.backup_dir.clone(),
            result,
        }
    }

    fn log_summary(&self, run: &CheckRun) {
        let groups = crate::report::assemble(&run.outcomes);
        info!(
            "Check finished: {} ok, {} outdated, {} without files, {} future-dated, {} unreadable",
            groups.ok.len(),
            groups.outdated.len(),
            groups.no_files.len(),
            groups.future_dated.len(),
            groups.unreadable.len()
        );
    }

    /// Decide and deliver reminders for every outdated or future-dated user.
    ///
    /// Template, delivery and history failures are reported on the affected
    /// user's delivery and never stop the loop.
    pub fn remind(
        &self,
        run: &CheckRun,
        history: &mut dyn ReminderHistory,
        notifier: &dyn Notifier,
    ) -> Vec<ReminderDelivery> {
        let weekend_today = is_weekend(run.now);
        let mut deliveries = Vec::new();

        for outcome in &run.outcomes {
            let Ok(result) = &outcome.result else {
                continue;
            };

            if !result.classification.is_actionable() {
                if let Err(e) = history.clear(&result.username, run.now) {
                    warn!("Could not clear reminder history of {}: {}", result.username, e);
                }
                continue;
            }

            let decision = should_remind(
                result,
                history.last_sent(&result.username),
                run.now,
                self.tolerances.reminder_interval,
                weekend_today,
                self.tolerances.exclude_weekends,
            );

            if !decision.should_send {
                debug!("No reminder for {}: {}", decision.username, decision.reason);
                deliveries.push(ReminderDelivery {
                    decision,
                    recipient: None,
                    status: DeliveryStatus::Throttled,
                });
                continue;
            }

            let Some(recipient) = self.addresses.address_for(&result.username) else {
                warn!("{}", NotifyError::MissingAddress(result.username.clone()));
                deliveries.push(ReminderDelivery {
                    decision,
                    recipient: None,
                    status: DeliveryStatus::NoAddress,
                });
                continue;
            };

            let sent = reminder_message(result, &self.templates, self.tolerances.exclude_weekends)
                .and_then(|(subject, body)| notifier.send(&recipient, &subject, &body));

            let status = match sent {
                Ok(()) => {
                    info!(
                        "Reminded {} via {} ({})",
                        result.username,
                        notifier.channel_name(),
                        decision.reason
                    );
                    match history.record_sent(&result.username, run.now, result.classification) {
                        Ok(()) => DeliveryStatus::Sent,
                        Err(e) => {
                            warn!("Reminder to {} sent but not recorded: {}", recipient, e);
                            DeliveryStatus::Unrecorded(e.to_string())
                        }
                    }
                }
                Err(e) => {
                    warn!("Reminder to {} failed: {}", recipient, e);
                    DeliveryStatus::Failed(e.to_string())
                }
            };

            deliveries.push(ReminderDelivery {
                decision,
                recipient: Some(recipient),
                status,
            });
        }

        deliveries
    }

    pub fn report(&self, run: &CheckRun) -> StatusReport {
        StatusReport::new(run.now, &run.outcomes, run.notes.clone())
    }

    /// Mail the text report to every configured admin recipient. Returns the
    /// number of successful deliveries.
    pub fn send_admin_report(&self, report: &StatusReport, notifier: &dyn Notifier) -> usize {
        let subject = format!(
            "Backup status report {}",
            report.generated_at.format("%Y-%m-%d")
        );
        let body = report.render_text();

        self.config
            .notify
            .admin_recipients
            .iter()
            .filter(|recipient| match notifier.send(recipient, &subject, &body) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Admin report to {} failed: {}", recipient, e);
                    false
                }
            })
            .count()
    }
}
