use crate::clock::Clock;
use crate::error::ScanFailure;
use chrono::{DateTime, Local, NaiveDateTime};
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use walkdir::WalkDir;

/// The most recently modified file of a backup tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewestFile {
    pub path: PathBuf,
    pub mtime: NaiveDateTime,
}

pub trait NewestFileScan: Sync {
    /// `Ok(None)` for a missing or empty directory; `Err` only when the tree
    /// could not be read.
    fn newest_file(&self, dir: &Path) -> Result<Option<NewestFile>, ScanFailure>;
}

pub struct WalkdirScanner {
    clock: Arc<dyn Clock>,
}

impl WalkdirScanner {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// A file removed between listing and stat means the client is syncing
    /// right now, so the tree counts as modified at this instant.
    fn vanished(&self, path: PathBuf) -> NewestFile {
        debug!("File vanished during scan: {}", path.display());
        NewestFile {
            path,
            mtime: self.clock.now(),
        }
    }
}

impl NewestFileScan for WalkdirScanner {
    fn newest_file(&self, dir: &Path) -> Result<Option<NewestFile>, ScanFailure> {
        if !ScanFailure::check_dir(dir)? {
            debug!("Directory {} does not exist", dir.display());
            return Ok(None);
        }

        let mut newest: Option<NewestFile> = None;
        let mut files_seen = 0usize;

        for entry in WalkDir::new(dir).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let vanished = e.io_error().map_or(false, |io| io.kind() == ErrorKind::NotFound);
                    if vanished && e.depth() > 0 {
                        let path = e.path().map_or_else(|| dir.to_path_buf(), Path::to_path_buf);
                        return Ok(Some(self.vanished(path)));
                    }
                    return Err(ScanFailure::from_walkdir(dir, e));
                }
            };

            if entry.file_type().is_dir() {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    let vanished = e.io_error().map_or(false, |io| io.kind() == ErrorKind::NotFound);
                    if vanished {
                        return Ok(Some(self.vanished(entry.path().to_path_buf())));
                    }
                    return Err(ScanFailure::from_walkdir(entry.path(), e));
                }
            };

            let modified = metadata
                .modified()
                .map_err(|e| ScanFailure::from_io(entry.path().to_path_buf(), &e))?;
            let mtime = DateTime::<Local>::from(modified).naive_local();
            files_seen += 1;

            if newest.as_ref().map_or(true, |n| mtime > n.mtime) {
                newest = Some(NewestFile {
                    path: entry.path().to_path_buf(),
                    mtime,
                });
            }
        }

        debug!("Scanned {} files in {}", files_seen, dir.display());
        Ok(newest)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::clock::FixedClock;
    use crate::error::ScanFailureKind;
    use tempfile::TempDir;

    fn scanner() -> WalkdirScanner {
        WalkdirScanner::new(Arc::new(FixedClock(date(2024, 1, 1))))
    }

    #[test]
    fn test_newest_file_discovery() {
        let temp_dir = TempDir::new().unwrap();
        init_mock_files(temp_dir.path());

        let newest = scanner().newest_file(temp_dir.path()).unwrap().unwrap();

        assert_eq!(newest.mtime, date(2020, 1, 15));
        assert_eq!(newest.path, temp_dir.path().join("Documents/newest_file.txt"));
    }

    #[test]
    fn test_newest_file_in_hidden_subdirectory() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write_file_at(&root.join("Downloads/old_file_1.txt"), "f1", date(2020, 8, 1));
        write_file_at(&root.join(".hidden/newest_file.txt"), "f3", date(2023, 1, 3));
        write_file_at(&root.join(".hidden/test/old_file_2.txt"), "f2", date(2020, 1, 15));

        let newest = scanner().newest_file(root).unwrap().unwrap();

        assert_eq!(newest.mtime, date(2023, 1, 3));
        assert_eq!(newest.path, root.join(".hidden/newest_file.txt"));
    }

    #[test]
    fn test_empty_directory_has_no_files() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("Documents")).unwrap();

        assert_eq!(scanner().newest_file(temp_dir.path()).unwrap(), None);
    }

    #[test]
    fn test_missing_directory_has_no_files() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("Drive");

        assert_eq!(scanner().newest_file(&missing).unwrap(), None);
    }

    #[test]
    fn test_path_below_a_file_is_a_failure() {
        let temp_dir = TempDir::new().unwrap();
        write_file_at(&temp_dir.path().join("home"), "not a directory", date(2020, 1, 1));

        let result = scanner().newest_file(&temp_dir.path().join("home/Drive"));

        let failure = result.unwrap_err();
        assert_eq!(failure.path, temp_dir.path().join("home/Drive"));
        assert!(matches!(failure.kind, ScanFailureKind::Io(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_tree_is_a_failure() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let home = temp_dir.path().join("bob");
        let drive = home.join("Drive");
        write_file_at(&drive.join("file.txt"), "b", date(2020, 1, 1));

        let set_mode = |path: &Path, mode: u32| {
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).unwrap()
        };

        set_mode(&drive, 0o000);
        let inside = scanner().newest_file(&drive);
        set_mode(&drive, 0o755);

        set_mode(&home, 0o000);
        let below = scanner().newest_file(&drive);
        let privileged = std::fs::read_dir(&home).is_ok();
        set_mode(&home, 0o755);

        // Permission bits do not apply to a privileged user.
        if privileged {
            return;
        }
        assert_eq!(inside.unwrap_err().kind, ScanFailureKind::PermissionDenied);
        assert_eq!(below.unwrap_err().kind, ScanFailureKind::PermissionDenied);
    }
}
