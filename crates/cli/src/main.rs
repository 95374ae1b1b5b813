use anyhow::{bail, Context, Result};
use backupwatch_core::{
    clock::{Clock, FixedClock, SystemClock},
    history::{MemoryHistory, ReminderHistory, SendLog},
    notify::{RecordingNotifier, SmtpNotifier},
    resolver::BackupDirState,
    scanner::WalkdirScanner,
    BackupChecker, CheckerConfig, DeliveryStatus, ReminderDelivery,
};
use chrono::NaiveDateTime;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Exit status when no user could be resolved.
const EXIT_NO_USERS: u8 = 2;
const NOW_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Parser)]
#[command(name = "backupwatch")]
#[command(about = "Checks how recent the cloud backups of NAS users are and reminds them")]
#[command(version, author)]
struct Cli {
    /// Config file (default: <config dir>/backupwatch/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// More log output on stderr (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify every user's backup and print the report
    Check {
        /// Send reminder mails to outdated and future-dated users
        #[arg(long)]
        notify: bool,
        /// Decide and print reminders without sending or recording them
        #[arg(long, requires = "notify")]
        dry_run: bool,
        /// Pretend the check runs at this local time ("YYYY-MM-DD HH:MM:SS")
        #[arg(long)]
        now: Option<String>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// List resolved users and their backup directories
    Users,
    /// Configuration file operations
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
    /// Print the configuration file path
    Path,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Check {
            notify,
            dry_run,
            now,
            format,
        } => handle_check_command(cli.config.as_deref(), notify, dry_run, now.as_deref(), format),
        Commands::Users => handle_users_command(cli.config.as_deref()),
        Commands::Config { command } => handle_config_command(cli.config.as_deref(), command),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so the report on stdout stays clean.
fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(CheckerConfig::default_path()?),
    }
}

fn load_config(explicit: Option<&Path>) -> Result<CheckerConfig> {
    let config = match explicit {
        Some(path) => CheckerConfig::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => CheckerConfig::load().context("Failed to load config")?,
    };
    Ok(config)
}

fn parse_now(value: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, NOW_FORMAT)
        .with_context(|| format!("Invalid --now '{}', expected YYYY-MM-DD HH:MM:SS", value))
}

fn build_checker(config: CheckerConfig, clock: Arc<dyn Clock>) -> Result<BackupChecker> {
    let scanner = WalkdirScanner::new(clock.clone());
    Ok(BackupChecker::new(config, Box::new(scanner), clock)?)
}

fn open_history(log: Option<&Path>, dry_run: bool) -> Result<Box<dyn ReminderHistory>> {
    let Some(path) = log else {
        return Ok(Box::new(MemoryHistory::new()));
    };
    let send_log = SendLog::open(path)?;
    if dry_run {
        Ok(Box::new(send_log.snapshot()))
    } else {
        Ok(Box::new(send_log))
    }
}

fn handle_check_command(
    config_file: Option<&Path>,
    notify: bool,
    dry_run: bool,
    now: Option<&str>,
    format: OutputFormat,
) -> Result<ExitCode> {
    let config = load_config(config_file)?;
    let clock: Arc<dyn Clock> = match now {
        Some(value) => Arc::new(FixedClock(parse_now(value)?)),
        None => Arc::new(SystemClock),
    };

    let checker = build_checker(config, clock)?;
    let run = checker.check()?;

    if run.is_empty() {
        eprintln!("No users found");
        return Ok(ExitCode::from(EXIT_NO_USERS));
    }

    let report = checker.report(&run);
    match format {
        OutputFormat::Text => print!("{}", report.render_text()),
        OutputFormat::Json => println!("{}", report.render_json()?),
    }

    if !notify {
        return Ok(ExitCode::SUCCESS);
    }

    let mut history = open_history(checker.config().history_log.as_deref(), dry_run)?;

    let deliveries = if dry_run {
        let notifier = RecordingNotifier::new();
        let deliveries = checker.remind(&run, history.as_mut(), &notifier);
        checker.send_admin_report(&report, &notifier);
        if format == OutputFormat::Text {
            println!("\nDry run, nothing was sent:");
            for message in notifier.sent() {
                println!("  - {} \"{}\"", message.recipient, message.subject);
            }
        }
        deliveries
    } else {
        if !checker.config().notify.enabled {
            bail!("Notifications are disabled, set notify.enabled in the config");
        }
        let notifier = SmtpNotifier::from_config(&checker.config().notify)?;
        let deliveries = checker.remind(&run, history.as_mut(), &notifier);
        let admins = checker.send_admin_report(&report, &notifier);
        info!("Admin report delivered to {} recipients", admins);
        deliveries
    };

    if format == OutputFormat::Text {
        print_deliveries(&deliveries);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_deliveries(deliveries: &[ReminderDelivery]) {
    if deliveries.is_empty() {
        println!("\nNo reminders due.");
        return;
    }

    println!("\nReminders:");
    println!("{:<20} {:<25} {:<30} {}", "User", "Reason", "Recipient", "Status");
    println!("{}", "-".repeat(90));

    for delivery in deliveries {
        let status = match &delivery.status {
            DeliveryStatus::Sent => "sent".to_string(),
            DeliveryStatus::Throttled => "not sent".to_string(),
            DeliveryStatus::NoAddress => "no address".to_string(),
            DeliveryStatus::Failed(e) => format!("failed: {}", e),
            DeliveryStatus::Unrecorded(e) => format!("sent, not logged: {}", e),
        };
        println!(
            "{:<20} {:<25} {:<30} {}",
            delivery.decision.username,
            delivery.decision.reason.to_string(),
            delivery.recipient.as_deref().unwrap_or("-"),
            status
        );
    }
}

fn handle_users_command(config_file: Option<&Path>) -> Result<ExitCode> {
    let config = load_config(config_file)?;
    let checker = build_checker(config, Arc::new(SystemClock))?;
    let resolution = checker.resolve()?;

    if resolution.is_empty() {
        eprintln!("No users found");
        return Ok(ExitCode::from(EXIT_NO_USERS));
    }

    println!("{:<20} {:<10} {}", "User", "Type", "Backup directory");
    println!("{}", "-".repeat(80));
    for user in resolution.users.values() {
        let missing = match &user.backup_dir_state {
            BackupDirState::Present => String::new(),
            BackupDirState::Missing => "  (missing)".to_string(),
            BackupDirState::Unreadable(failure) => format!("  ({})", failure),
        };
        println!(
            "{:<20} {:<10} {}{}",
            user.username,
            user.user_type.to_string(),
            user.backup_dir.display(),
            missing
        );
    }

    if !resolution.notes.is_empty() {
        println!("\nNotes:");
        for note in &resolution.notes {
            println!("  - {}", note);
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn handle_config_command(config_file: Option<&Path>, command: ConfigCommands) -> Result<ExitCode> {
    match command {
        ConfigCommands::Init { force } => {
            let path = config_path(config_file)?;
            init_config(&path, force)?;
            println!("Wrote default configuration to {}", path.display());
        }
        ConfigCommands::Show => {
            let config = load_config(config_file)?;
            print!("{}", serde_yaml::to_string(&config)?);
        }
        ConfigCommands::Path => {
            println!("{}", config_path(config_file)?.display());
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists, use --force to overwrite", path.display());
    }
    CheckerConfig::default().save_to(path)?;
    Ok(())
}
