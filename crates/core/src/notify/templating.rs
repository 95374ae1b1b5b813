//! Minijinja rendering of reminder mails.
//!
//! Templates come from configuration, so a fresh environment is built per
//! render. Placeholders are `{{ username }}`, `{{ date }}`,
//! `{{ outdated_days }}` and `{{ path }}`.

use crate::classifier::{Classification, ClassificationResult};
use crate::config::NotifyConfig;
use crate::error::NotifyError;
use serde::Serialize;

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailTemplates {
    pub subject_outdated: String,
    pub subject_future: String,
    pub body_outdated: String,
    pub body_future: String,
}

impl From<&NotifyConfig> for MailTemplates {
    fn from(config: &NotifyConfig) -> Self {
        Self {
            subject_outdated: config.subject_outdated.clone(),
            subject_future: config.subject_future.clone(),
            body_outdated: config.template_outdated.clone(),
            body_future: config.template_future.clone(),
        }
    }
}

impl Default for MailTemplates {
    fn default() -> Self {
        Self::from(&NotifyConfig::default())
    }
}

/// Values available to reminder templates.
#[derive(Debug, Clone, Serialize)]
pub struct ReminderContext {
    pub username: String,
    pub date: String,
    pub outdated_days: String,
    pub path: String,
}

impl ReminderContext {
    pub fn new(result: &ClassificationResult, exclude_weekends: bool) -> Self {
        let unit = if exclude_weekends { "weekdays" } else { "days" };
        Self {
            username: result.username.clone(),
            date: result
                .newest_mtime
                .map(|mtime| mtime.format(DATE_FORMAT).to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            outdated_days: format!("{} {}", result.age_days.unwrap_or_default(), unit),
            path: result
                .newest_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        }
    }
}

fn build_env() -> minijinja::Environment<'static> {
    let mut env = minijinja::Environment::new();
    env.set_keep_trailing_newline(true);
    env
}

/// Render a template string with the given context.
pub fn render<S: Serialize>(template: &str, ctx: &S) -> Result<String, NotifyError> {
    build_env()
        .render_str(template, ctx)
        .map_err(|e| NotifyError::Template(e.to_string()))
}

/// Check template syntax without rendering it.
pub fn validate(template: &str) -> Result<(), NotifyError> {
    build_env()
        .template_from_str(template)
        .map_err(|e| NotifyError::Template(e.to_string()))?;
    Ok(())
}

/// Subject and body of the reminder for an outdated or future-dated user.
pub fn reminder_message(
    result: &ClassificationResult,
    templates: &MailTemplates,
    exclude_weekends: bool,
) -> Result<(String, String), NotifyError> {
    let (subject, body) = match result.classification {
        Classification::Outdated => (&templates.subject_outdated, &templates.body_outdated),
        Classification::FutureDated => (&templates.subject_future, &templates.body_future),
        other @ (Classification::Current | Classification::NoFiles) => {
            return Err(NotifyError::Template(format!(
                "no reminder template for {} backups",
                other
            )))
        }
    };

    let ctx = ReminderContext::new(result, exclude_weekends);
    Ok((render(subject, &ctx)?, render(body, &ctx)?))
}
