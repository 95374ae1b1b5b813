use crate::notify::templating;
use crate::resolver::{LookupRule, UserType};
use crate::{BackupWatchError, Result};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use wax::Glob;

/// Upper bound for every tolerance, keeping day counts within `TimeDelta` range.
pub const MAX_TOLERANCE_DAYS: i64 = 36_500;

pub const DEFAULT_SUBJECT_OUTDATED: &str = "Your backup is outdated";
pub const DEFAULT_SUBJECT_FUTURE: &str = "Your backup contains files from the future";

pub const DEFAULT_TEMPLATE_OUTDATED: &str = "Dear {{ username }},

Your backup is outdated.

- Date of last backup:  {{ date }}  ({{ outdated_days }} outdated)

Best regards,
backupwatch
";

pub const DEFAULT_TEMPLATE_FUTURE: &str = "Dear {{ username }},

Your backup contains at least one file whose modification time lies in the future.

- File:  {{ path }}
- Modification Time:  {{ date }}

Because of this file, your backup can not be validated correctly.

Best regards,
backupwatch
";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckerConfig {
    pub lookup_rules: Vec<LookupRuleConfig>,
    #[serde(default)]
    pub excluded_usernames: BTreeSet<String>,
    pub tolerances: ToleranceConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    /// Send log used as reminder history; in-memory history when unset.
    #[serde(default)]
    pub history_log: Option<PathBuf>,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LookupRuleConfig {
    pub user_type: String,
    pub home_dir_glob: String,
    pub backup_subdir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToleranceConfig {
    pub future_tolerance_days: i64,
    pub outdated_tolerance_days: i64,
    pub reminder_interval_days: i64,
    pub exclude_weekends: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    pub parallel: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    pub enabled: bool,
    pub smtp_host: String,
    pub smtp_port: Option<u16>,
    pub tls: bool,
    pub from: String,
    /// `<username>@<mail_domain>` is used for users missing from `addresses`.
    pub mail_domain: Option<String>,
    pub addresses: BTreeMap<String, String>,
    pub admin_recipients: Vec<String>,
    pub subject_outdated: String,
    pub subject_future: String,
    pub template_outdated: String,
    pub template_future: String,
}

/// Thresholds and switches that stay fixed for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tolerances {
    pub future_tolerance: TimeDelta,
    pub outdated_tolerance: TimeDelta,
    pub reminder_interval: TimeDelta,
    pub exclude_weekends: bool,
    pub excluded_usernames: BTreeSet<String>,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            future_tolerance: TimeDelta::days(1),
            outdated_tolerance: TimeDelta::days(5),
            reminder_interval: TimeDelta::days(1),
            exclude_weekends: true,
            excluded_usernames: BTreeSet::new(),
        }
    }
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            future_tolerance_days: 1,
            outdated_tolerance_days: 5,
            reminder_interval_days: 1,
            exclude_weekends: true,
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self { parallel: true }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: "localhost".to_string(),
            smtp_port: None,
            tls: true,
            from: "backupwatch <backupwatch@localhost>".to_string(),
            mail_domain: None,
            addresses: BTreeMap::new(),
            admin_recipients: Vec::new(),
            subject_outdated: DEFAULT_SUBJECT_OUTDATED.to_string(),
            subject_future: DEFAULT_SUBJECT_FUTURE.to_string(),
            template_outdated: DEFAULT_TEMPLATE_OUTDATED.to_string(),
            template_future: DEFAULT_TEMPLATE_FUTURE.to_string(),
        }
    }
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            lookup_rules: vec![
                LookupRuleConfig {
                    user_type: "local".to_string(),
                    home_dir_glob: "/volume1/homes/[!@.]*/".to_string(),
                    backup_subdir: PathBuf::from("Drive"),
                },
                // Synology names domain homes @DH-<domain>/<id>/<user>
                LookupRuleConfig {
                    user_type: "domain".to_string(),
                    home_dir_glob: "/volume1/homes/@DH-D/*/*/".to_string(),
                    backup_subdir: PathBuf::from("Drive"),
                },
            ],
            excluded_usernames: BTreeSet::new(),
            tolerances: ToleranceConfig::default(),
            scan: ScanConfig::default(),
            history_log: None,
            notify: NotifyConfig::default(),
        }
    }
}

/// Out-of-range counts saturate instead of panicking; `validate` rejects them.
fn days(count: i64) -> TimeDelta {
    TimeDelta::try_days(count).unwrap_or(TimeDelta::MAX)
}

impl CheckerConfig {
    /// Load config from the default location, writing defaults there if it
    /// does not exist yet
    pub fn load() -> Result<Self> {
        let config_path = Self::default_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            debug!("Config file not found, creating default");
            let config = Self::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    /// Load and validate config from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        debug!("Loading config from {}", path.display());
        let content = fs::read_to_string(path).map_err(|e| {
            BackupWatchError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let config: Self = serde_yaml::from_str(&content)
            .map_err(|e| BackupWatchError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                BackupWatchError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = serde_yaml::to_string(self)?;
        fs::write(path, content)
            .map_err(|e| BackupWatchError::Config(format!("Failed to write config file: {}", e)))?;

        debug!("Config saved to {}", path.display());
        Ok(())
    }

    /// `<config_dir>/backupwatch/config.yaml`
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            BackupWatchError::Config("Could not determine config directory".to_string())
        })?;

        Ok(config_dir.join("backupwatch").join("config.yaml"))
    }

    pub fn tolerances(&self) -> Tolerances {
        Tolerances {
            future_tolerance: days(self.tolerances.future_tolerance_days),
            outdated_tolerance: days(self.tolerances.outdated_tolerance_days),
            reminder_interval: days(self.tolerances.reminder_interval_days),
            exclude_weekends: self.tolerances.exclude_weekends,
            excluded_usernames: self.excluded_usernames.clone(),
        }
    }

    pub fn rules(&self) -> Vec<LookupRule> {
        self.lookup_rules
            .iter()
            .map(|rule| LookupRule {
                user_type: UserType::from(rule.user_type.as_str()),
                home_dir_glob: rule.home_dir_glob.clone(),
                backup_subdir: rule.backup_subdir.clone(),
            })
            .collect()
    }

    /// Validate config settings
    pub fn validate(&self) -> Result<()> {
        if self.lookup_rules.is_empty() {
            return Err(BackupWatchError::Config(
                "At least one lookup rule is required".to_string(),
            ));
        }

        let mut seen_types = BTreeSet::new();
        for rule in &self.lookup_rules {
            if !seen_types.insert(rule.user_type.to_lowercase()) {
                return Err(BackupWatchError::Config(format!(
                    "User type '{}' has more than one lookup rule",
                    rule.user_type
                )));
            }
            if rule.home_dir_glob.trim().is_empty() {
                return Err(BackupWatchError::Config(format!(
                    "Lookup rule for '{}' has an empty home_dir_glob",
                    rule.user_type
                )));
            }
            if rule.backup_subdir.is_absolute() {
                return Err(BackupWatchError::Config(format!(
                    "backup_subdir of '{}' must be relative: {}",
                    rule.user_type,
                    rule.backup_subdir.display()
                )));
            }
            let trimmed = rule.home_dir_glob.trim_end_matches('/');
            Glob::new(trimmed.trim_start_matches('/')).map_err(|e| BackupWatchError::InvalidGlob {
                pattern: rule.home_dir_glob.clone(),
                reason: e.to_string(),
            })?;
        }

        let tol = &self.tolerances;
        if tol.future_tolerance_days < 0 || tol.outdated_tolerance_days < 0 {
            return Err(BackupWatchError::Config(
                "Tolerances must not be negative".to_string(),
            ));
        }
        if tol.reminder_interval_days <= 0 {
            return Err(BackupWatchError::Config(
                "Reminder interval must be greater than 0".to_string(),
            ));
        }
        let largest = tol
            .future_tolerance_days
            .max(tol.outdated_tolerance_days)
            .max(tol.reminder_interval_days);
        if largest > MAX_TOLERANCE_DAYS {
            return Err(BackupWatchError::Config(format!(
                "Tolerances must not exceed {} days",
                MAX_TOLERANCE_DAYS
            )));
        }

        for (name, template) in [
            ("subject_outdated", &self.notify.subject_outdated),
            ("subject_future", &self.notify.subject_future),
            ("template_outdated", &self.notify.template_outdated),
            ("template_future", &self.notify.template_future),
        ] {
            templating::validate(template).map_err(|e| {
                BackupWatchError::Config(format!("Invalid mail template {}: {}", name, e))
            })?;
        }

        if self.notify.enabled {
            if self.notify.smtp_host.trim().is_empty() {
                return Err(BackupWatchError::Config(
                    "Notifications enabled but smtp_host is empty".to_string(),
                ));
            }
            if self.notify.from.parse::<lettre::message::Mailbox>().is_err() {
                return Err(BackupWatchError::Config(format!(
                    "Invalid sender address: {}",
                    self.notify.from
                )));
            }
            if self.notify.mail_domain.is_none() && self.notify.addresses.is_empty() {
                warn!("Notifications enabled but neither mail_domain nor addresses are configured");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = CheckerConfig::default();
        assert_eq!(config.lookup_rules.len(), 2);
        assert!(config.tolerances.exclude_weekends);
        assert!(!config.notify.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tolerances_from_config() {
        let mut config = CheckerConfig::default();
        config.excluded_usernames.insert("admin".to_string());
        let tolerances = config.tolerances();

        assert_eq!(tolerances.future_tolerance, TimeDelta::days(1));
        assert_eq!(tolerances.outdated_tolerance, TimeDelta::days(5));
        assert_eq!(tolerances.reminder_interval, TimeDelta::days(1));
        assert!(tolerances.excluded_usernames.contains("admin"));
    }

    #[test]
    fn test_save_and_load_round_trip() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("nested").join("config.yaml");

        let mut config = CheckerConfig::default();
        config.tolerances.outdated_tolerance_days = 10;
        config.history_log = Some(PathBuf::from("/var/log/backupwatch/sent.log"));
        config.save_to(&path)?;

        let loaded = CheckerConfig::load_from(&path)?;
        assert_eq!(loaded.tolerances.outdated_tolerance_days, 10);
        assert_eq!(loaded.lookup_rules, config.lookup_rules);
        assert_eq!(loaded.history_log, config.history_log);
        Ok(())
    }

    #[test]
    fn test_minimal_yaml_uses_defaults() -> Result<()> {
        let yaml = r#"
lookup_rules:
  - user_type: local
    home_dir_glob: /srv/homes/*
    backup_subdir: Backup
tolerances:
  future_tolerance_days: 2
  outdated_tolerance_days: 7
  reminder_interval_days: 3
  exclude_weekends: false
"#;
        let config: CheckerConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;

        assert!(config.scan.parallel);
        assert!(config.history_log.is_none());
        assert!(!config.notify.enabled);
        assert_eq!(config.rules()[0].user_type, UserType::Local);
        Ok(())
    }

    #[test]
    fn test_duplicate_rule_type_rejected() {
        let mut config = CheckerConfig::default();
        config.lookup_rules[1].user_type = "local".to_string();
        assert!(matches!(config.validate(), Err(BackupWatchError::Config(_))));
    }

    #[test]
    fn test_invalid_glob_rejected() {
        let mut config = CheckerConfig::default();
        config.lookup_rules[0].home_dir_glob = "/volume1/homes/[*".to_string();
        assert!(matches!(
            config.validate(),
            Err(BackupWatchError::InvalidGlob { .. })
        ));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = CheckerConfig::default();
        config.tolerances.reminder_interval_days = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_huge_tolerance_rejected() {
        let mut config = CheckerConfig::default();
        config.tolerances.outdated_tolerance_days = i64::MAX;
        assert!(matches!(config.validate(), Err(BackupWatchError::Config(_))));
        assert_eq!(config.tolerances().outdated_tolerance, TimeDelta::MAX);

        config.tolerances.outdated_tolerance_days = MAX_TOLERANCE_DAYS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_broken_template_rejected() {
        let mut config = CheckerConfig::default();
        config.notify.template_future = "File: {{ path".to_string();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("template_future"), "got: {err}");
    }

    #[test]
    fn test_absolute_backup_subdir_rejected() {
        let mut config = CheckerConfig::default();
        config.lookup_rules[0].backup_subdir = PathBuf::from("/Drive");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_sender_rejected_when_enabled() {
        let mut config = CheckerConfig::default();
        config.notify.enabled = true;
        config.notify.from = "not-an-address".to_string();
        assert!(config.validate().is_err());
    }
}
