//! Outgoing reminder mail.
//!
//! The checker only decides who is mailed and with which text; delivery
//! goes through a [`Notifier`].

pub mod email;
pub mod templating;

pub use email::SmtpNotifier;
pub use templating::{reminder_message, render, MailTemplates, ReminderContext};

use crate::error::NotifyError;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

pub trait Notifier {
    fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), NotifyError>;

    fn channel_name(&self) -> &str;
}

/// Maps usernames to mail addresses.
#[derive(Debug, Clone, Default)]
pub struct AddressBook {
    addresses: BTreeMap<String, String>,
    mail_domain: Option<String>,
}

impl AddressBook {
    pub fn new(addresses: BTreeMap<String, String>, mail_domain: Option<String>) -> Self {
        Self {
            addresses,
            mail_domain,
        }
    }

    /// Explicit address first, then `<username>@<mail_domain>`.
    pub fn address_for(&self, username: &str) -> Option<String> {
        if let Some(address) = self.addresses.get(username) {
            return Some(address.clone());
        }
        self.mail_domain
            .as_ref()
            .map(|domain| format!("{}@{}", username, domain.trim_start_matches('@')))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// Keeps messages in memory instead of delivering them. Used for dry runs
/// and tests.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentMessage>>,
    failing: BTreeSet<String>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliveries to these recipients fail with an SMTP error.
    pub fn failing_for<I, S>(recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: recipients.into_iter().map(Into::into).collect(),
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        if self.failing.contains(recipient) {
            return Err(NotifyError::Smtp(format!("delivery to {} refused", recipient)));
        }
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| NotifyError::Smtp("recording notifier poisoned".to_string()))?;
        sent.push(SentMessage {
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "recording"
    }
}
