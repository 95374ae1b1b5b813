//! User discovery: turns lookup rules into one record per user.

use crate::error::{ScanFailure, ScanFailureKind};
use crate::{BackupWatchError, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;
use wax::{CandidatePath, Glob, Pattern};

const GLOB_META: &[char] = &['*', '?', '[', ']', '{', '}', '<', '>'];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(into = "String")]
pub enum UserType {
    Local,
    Domain,
    Other(String),
}

impl From<&str> for UserType {
    fn from(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "local" => UserType::Local,
            "domain" => UserType::Domain,
            _ => UserType::Other(value.to_string()),
        }
    }
}

impl From<UserType> for String {
    fn from(value: UserType) -> Self {
        value.to_string()
    }
}

impl fmt::Display for UserType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserType::Local => write!(f, "local"),
            UserType::Domain => write!(f, "domain"),
            UserType::Other(name) => write!(f, "{}", name),
        }
    }
}

/// How to find the home directories of one kind of user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupRule {
    pub user_type: UserType,
    /// Matches home directories; the last path component is the username.
    pub home_dir_glob: String,
    pub backup_subdir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRecord {
    pub username: String,
    pub user_type: UserType,
    pub home_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub backup_dir_state: BackupDirState,
}

/// What the resolver saw at a user's backup directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupDirState {
    Present,
    Missing,
    Unreadable(ScanFailure),
}

impl BackupDirState {
    pub fn of(dir: &Path) -> Self {
        match ScanFailure::check_dir(dir) {
            Ok(true) => BackupDirState::Present,
            Ok(false) => BackupDirState::Missing,
            Err(failure) => BackupDirState::Unreadable(failure),
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, BackupDirState::Present)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedRule {
    pub user_type: UserType,
    pub pattern: String,
    pub failure: ScanFailure,
}

/// Outcome of user discovery.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub users: BTreeMap<String, UserRecord>,
    /// Rules whose home directories could not be listed at all.
    pub failed_rules: Vec<FailedRule>,
    /// Human readable remarks for the admin report.
    pub notes: Vec<String>,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

pub trait GlobExpander: Sync {
    /// Returns the directories matching `pattern`.
    fn expand(&self, pattern: &str) -> std::result::Result<Vec<PathBuf>, ScanFailure>;
}

/// Expands patterns against the local filesystem.
///
/// The literal leading components of a pattern name the directory to walk;
/// the remaining components are matched with `wax` at exactly their depth.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsGlobExpander;

impl FsGlobExpander {
    pub fn new() -> Self {
        Self
    }

    /// Splits a pattern into its literal base directory and glob remainder.
    fn partition(pattern: &str) -> (PathBuf, Vec<&str>) {
        let trimmed = pattern.trim_end_matches('/');
        let mut base = if trimmed.starts_with('/') {
            PathBuf::from("/")
        } else {
            PathBuf::new()
        };

        let components: Vec<&str> = trimmed.split('/').filter(|c| !c.is_empty()).collect();
        let literal_len = components
            .iter()
            .take_while(|c| !c.contains(GLOB_META))
            .count();

        for component in &components[..literal_len] {
            base.push(component);
        }
        if base.as_os_str().is_empty() {
            base.push(".");
        }

        (base, components[literal_len..].to_vec())
    }
}

impl GlobExpander for FsGlobExpander {
    fn expand(&self, pattern: &str) -> std::result::Result<Vec<PathBuf>, ScanFailure> {
        let (base, remainder) = Self::partition(pattern);

        if !ScanFailure::check_dir(&base)? {
            debug!("Base directory {} does not exist", base.display());
            return Ok(Vec::new());
        }
        if remainder.is_empty() {
            return Ok(vec![base]);
        }

        let expression = remainder.join("/");
        let glob = Glob::new(&expression).map_err(|e| ScanFailure {
            path: PathBuf::from(pattern),
            kind: ScanFailureKind::Io(format!("invalid glob: {}", e)),
        })?;

        let depth = remainder.len();
        let mut matches = Vec::new();

        for entry in WalkDir::new(&base).min_depth(depth).max_depth(depth) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => return Err(ScanFailure::from_walkdir(&base, e)),
                Err(e) => {
                    warn!("Skipping unreadable entry while expanding {}: {}", pattern, e);
                    continue;
                }
            };

            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Ok(relative) = path.strip_prefix(&base) else {
                continue;
            };
            let relative = relative.to_string_lossy().replace('\\', "/");
            if glob.matched(&CandidatePath::from(relative.as_str())).is_some() {
                matches.push(path.to_path_buf());
            }
        }

        matches.sort();
        Ok(matches)
    }
}

fn username_of(home_dir: &Path) -> Option<String> {
    home_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

/// Resolve every rule and merge the users into one map keyed by username.
///
/// A username found twice aborts the resolution: two accounts sharing a
/// name would let one hide the other's missing backup.
pub fn resolve(
    rules: &[LookupRule],
    excluded: &BTreeSet<String>,
    expander: &dyn GlobExpander,
) -> Result<Resolution> {
    let mut resolution = Resolution::default();

    for rule in rules {
        debug!("Resolving {} users from {}", rule.user_type, rule.home_dir_glob);

        let home_dirs = match expander.expand(&rule.home_dir_glob) {
            Ok(dirs) => dirs,
            Err(failure) => {
                warn!("Lookup for {} users failed: {}", rule.user_type, failure);
                resolution.notes.push(format!(
                    "Lookup failed ({} users): {}",
                    rule.user_type, failure
                ));
                resolution.failed_rules.push(FailedRule {
                    user_type: rule.user_type.clone(),
                    pattern: rule.home_dir_glob.clone(),
                    failure,
                });
                continue;
            }
        };

        for home_dir in home_dirs {
            let Some(username) = username_of(&home_dir) else {
                continue;
            };

            if let Some(existing) = resolution.users.get(&username) {
                return Err(BackupWatchError::DuplicateUser {
                    username,
                    first: existing.user_type.to_string(),
                    second: rule.user_type.to_string(),
                });
            }

            let backup_dir = home_dir.join(&rule.backup_subdir);
            let backup_dir_state = BackupDirState::of(&backup_dir);

            resolution.users.insert(
                username.clone(),
                UserRecord {
                    username,
                    user_type: rule.user_type.clone(),
                    home_dir,
                    backup_dir,
                    backup_dir_state,
                },
            );
        }
    }

    resolution.users.retain(|username, _| !excluded.contains(username));

    for record in resolution.users.values() {
        let note = match &record.backup_dir_state {
            BackupDirState::Present => continue,
            BackupDirState::Missing => format!(
                "Backup dir not found (user '{}'): '{}'",
                record.username,
                record.backup_dir.display()
            ),
            BackupDirState::Unreadable(failure) => {
                format!("Backup dir unreadable (user '{}'): {}", record.username, failure)
            }
        };
        warn!("{}", note);
        resolution.notes.push(note);
    }

    debug!("Resolved {} users", resolution.users.len());
    Ok(resolution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    struct StaticExpander {
        results: HashMap<String, std::result::Result<Vec<PathBuf>, ScanFailure>>,
    }

    impl GlobExpander for StaticExpander {
        fn expand(&self, pattern: &str) -> std::result::Result<Vec<PathBuf>, ScanFailure> {
            self.results.get(pattern).cloned().unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    /// Mock Synology tree: local homes under `volume1/homes/<user>` and
    /// domain homes under `volume1/homes/@DH-D/<id>/<user>`.
    struct MockSyno {
        root: TempDir,
    }

    impl MockSyno {
        fn new() -> Self {
            let root = TempDir::new().unwrap();
            fs::create_dir_all(root.path().join("volume1/homes/@DH-D")).unwrap();
            Self { root }
        }

        fn homes(&self) -> PathBuf {
            self.root.path().join("volume1/homes")
        }

        fn local_user(&self, name: &str) -> PathBuf {
            let backup = self.homes().join(name).join("Drive/Backup");
            fs::create_dir_all(&backup).unwrap();
            backup
        }

        fn domain_user(&self, id: &str, name: &str) -> PathBuf {
            let backup = self.homes().join("@DH-D").join(id).join(name).join("Drive/Backup");
            fs::create_dir_all(&backup).unwrap();
            backup
        }

        fn rules(&self) -> Vec<LookupRule> {
            let root = self.root.path().display();
            vec![
                LookupRule {
                    user_type: UserType::Local,
                    home_dir_glob: format!("{}/volume1/homes/[!@.]*/", root),
                    backup_subdir: PathBuf::from("Drive/Backup/"),
                },
                LookupRule {
                    user_type: UserType::Domain,
                    home_dir_glob: format!("{}/volume1/homes/@DH-D/*/*/", root),
                    backup_subdir: PathBuf::from("Drive/Backup/"),
                },
            ]
        }
    }

    #[test]
    fn test_user_type_parsing() {
        assert_eq!(UserType::from("local"), UserType::Local);
        assert_eq!(UserType::from("Domain"), UserType::Domain);
        assert_eq!(UserType::from("ldap"), UserType::Other("ldap".to_string()));
        assert_eq!(UserType::Other("ldap".to_string()).to_string(), "ldap");
    }

    #[test]
    fn test_partition_pattern() {
        let (base, rest) = FsGlobExpander::partition("/volume1/homes/@DH-D/*/*/");
        assert_eq!(base, PathBuf::from("/volume1/homes/@DH-D"));
        assert_eq!(rest, vec!["*", "*"]);

        let (base, rest) = FsGlobExpander::partition("/volume1/homes/[!@.]*");
        assert_eq!(base, PathBuf::from("/volume1/homes"));
        assert_eq!(rest, vec!["[!@.]*"]);

        let (base, rest) = FsGlobExpander::partition("homes/alice");
        assert_eq!(base, PathBuf::from("homes/alice"));
        assert!(rest.is_empty());
    }

    #[test]
    fn test_expand_skips_system_directories() {
        let syno = MockSyno::new();
        syno.local_user("alice");
        fs::create_dir_all(syno.homes().join(".hidden")).unwrap();
        fs::write(syno.homes().join("notes.txt"), "not a home").unwrap();

        let pattern = format!("{}/[!@.]*/", syno.homes().display());
        let found = FsGlobExpander::new().expand(&pattern).unwrap();

        assert_eq!(found, vec![syno.homes().join("alice")]);
    }

    #[test]
    fn test_expand_missing_base_is_empty() {
        let syno = MockSyno::new();
        let pattern = format!("{}/does-not-exist/*", syno.homes().display());
        assert!(FsGlobExpander::new().expand(&pattern).unwrap().is_empty());
    }

    #[test]
    fn test_resolve_local_and_domain_users() -> Result<()> {
        let syno = MockSyno::new();
        let alice = syno.local_user("alice");
        syno.local_user("bob");
        let carol = syno.domain_user("3", "carol");
        syno.domain_user("8", "dave");

        let resolution = resolve(&syno.rules(), &BTreeSet::new(), &FsGlobExpander::new())?;

        let names: Vec<&str> = resolution.users.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["alice", "bob", "carol", "dave"]);
        assert_eq!(resolution.users["alice"].backup_dir, alice);
        assert_eq!(resolution.users["alice"].user_type, UserType::Local);
        assert_eq!(resolution.users["carol"].backup_dir, carol);
        assert_eq!(resolution.users["carol"].user_type, UserType::Domain);
        assert!(resolution.users.values().all(|u| u.backup_dir_state.is_present()));
        assert!(resolution.notes.is_empty());
        Ok(())
    }

    #[test]
    fn test_resolve_missing_backup_dir_is_not_an_error() -> Result<()> {
        let syno = MockSyno::new();
        syno.local_user("alice");
        fs::create_dir_all(syno.homes().join("@DH-D/8/broken/Drive")).unwrap();

        let resolution = resolve(&syno.rules(), &BTreeSet::new(), &FsGlobExpander::new())?;

        let broken = &resolution.users["broken"];
        assert_eq!(broken.backup_dir_state, BackupDirState::Missing);
        assert_eq!(resolution.notes.len(), 1);
        assert!(resolution.notes[0].starts_with("Backup dir not found (user 'broken')"));
        Ok(())
    }

    #[test]
    fn test_resolve_blocked_backup_dir_is_unreadable_not_missing() -> Result<()> {
        let syno = MockSyno::new();
        syno.local_user("alice");
        fs::create_dir_all(syno.homes().join("frank")).unwrap();
        fs::write(syno.homes().join("frank/Drive"), "not a directory").unwrap();

        let resolution = resolve(&syno.rules(), &BTreeSet::new(), &FsGlobExpander::new())?;

        let frank = &resolution.users["frank"];
        assert!(matches!(frank.backup_dir_state, BackupDirState::Unreadable(_)));
        assert_eq!(resolution.notes.len(), 1);
        assert!(resolution.notes[0].starts_with("Backup dir unreadable (user 'frank')"));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_locked_home_is_unreadable() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let syno = MockSyno::new();
        syno.local_user("alice");
        let home = syno.homes().join("alice");

        fs::set_permissions(&home, fs::Permissions::from_mode(0o000))?;
        let privileged = fs::read_dir(&home).is_ok();
        let resolution = resolve(&syno.rules(), &BTreeSet::new(), &FsGlobExpander::new());
        fs::set_permissions(&home, fs::Permissions::from_mode(0o755))?;

        // Permission bits do not apply to a privileged user.
        if privileged {
            return Ok(());
        }
        let alice = &resolution?.users["alice"];
        match &alice.backup_dir_state {
            BackupDirState::Unreadable(failure) => {
                assert_eq!(failure.kind, ScanFailureKind::PermissionDenied)
            }
            other => panic!("expected unreadable backup dir, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_expand_base_below_file_fails() {
        let syno = MockSyno::new();
        fs::write(syno.homes().join("notes.txt"), "not a home").unwrap();

        let pattern = format!("{}/notes.txt/*/", syno.homes().display());
        assert!(FsGlobExpander::new().expand(&pattern).is_err());
    }

    #[test]
    fn test_resolve_duplicate_across_types_fails() {
        let syno = MockSyno::new();
        syno.local_user("alice");
        syno.domain_user("3", "alice");

        let result = resolve(&syno.rules(), &BTreeSet::new(), &FsGlobExpander::new());

        match result {
            Err(BackupWatchError::DuplicateUser { username, first, second }) => {
                assert_eq!(username, "alice");
                assert_eq!(first, "local");
                assert_eq!(second, "domain");
            }
            other => panic!("Expected duplicate user error, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_excludes_users() -> Result<()> {
        let syno = MockSyno::new();
        syno.local_user("alice");
        syno.local_user("admin");
        syno.domain_user("3", "guest");

        let excluded: BTreeSet<String> = ["admin", "guest"].iter().map(|s| s.to_string()).collect();
        let resolution = resolve(&syno.rules(), &excluded, &FsGlobExpander::new())?;

        assert_eq!(resolution.users.len(), 1);
        assert!(resolution.users.contains_key("alice"));
        Ok(())
    }

    #[test]
    fn test_resolve_failed_rule_is_isolated() -> Result<()> {
        let rules = vec![
            LookupRule {
                user_type: UserType::Local,
                home_dir_glob: "/homes/*".to_string(),
                backup_subdir: PathBuf::from("Drive"),
            },
            LookupRule {
                user_type: UserType::Domain,
                home_dir_glob: "/homes/@DH-D/*/*".to_string(),
                backup_subdir: PathBuf::from("Drive"),
            },
        ];
        let failure = ScanFailure {
            path: PathBuf::from("/homes/@DH-D"),
            kind: ScanFailureKind::PermissionDenied,
        };
        let mut results = HashMap::new();
        results.insert("/homes/*".to_string(), Ok(vec![PathBuf::from("/homes/alice")]));
        results.insert("/homes/@DH-D/*/*".to_string(), Err(failure.clone()));
        let expander = StaticExpander { results };

        let resolution = resolve(&rules, &BTreeSet::new(), &expander)?;

        assert_eq!(resolution.users.len(), 1);
        assert_eq!(resolution.users["alice"].backup_dir, PathBuf::from("/homes/alice/Drive"));
        assert_eq!(
            resolution.failed_rules,
            vec![FailedRule {
                user_type: UserType::Domain,
                pattern: "/homes/@DH-D/*/*".to_string(),
                failure,
            }]
        );
        Ok(())
    }
}
