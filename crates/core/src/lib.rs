pub mod calendar;
pub mod checker;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod error;
pub mod history;
pub mod notify;
pub mod report;
pub mod resolver;
pub mod scanner;
pub mod throttle;

pub use checker::{BackupChecker, CheckRun, DeliveryStatus, ReminderDelivery};
pub use config::CheckerConfig;
pub use error::{BackupWatchError, NotifyError, Result, ScanFailure};
