//! `tapestore-recover`: run the bootstrap recovery of a tape offer once and
//! report what was rescheduled.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use tapestore_core::{BootstrapRecovery, RecoveryMode, RecoveryReport, TapeStoreConfig};
use tapestore_error::{Result, TapeError};
use tapestore_queue::DirectoryWriteOrderQueue;
use tapestore_referential::JsonFileTarReferential;
use tapestore_tar::TarRepairer;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Exit code for malformed command lines.
pub const USAGE_EXIT_CODE: u8 = 2;

const HELP: &str = "\
tapestore-recover: reschedule tars left on disk by a previous run

USAGE:
    tapestore-recover --config <PATH> [OPTIONS]

OPTIONS:
    --config <PATH>            TOML configuration of the tape offer (required)
    --referential-dir <PATH>   Override the tar referential directory
    --queue-dir <PATH>         Override the write order queue directory
    --parallel                 Recover file buckets concurrently
    --json                     Emit the recovery report and logs as JSON
    -h, --help                 Show this help

Log verbosity follows RUST_LOG (default: info).
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliOptions {
    pub config: PathBuf,
    pub referential_dir: Option<PathBuf>,
    pub queue_dir: Option<PathBuf>,
    pub parallel: bool,
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Recover(CliOptions),
    Help,
}

pub fn parse_args(args: &[String]) -> std::result::Result<Command, String> {
    let mut config = None;
    let mut referential_dir = None;
    let mut queue_dir = None;
    let mut parallel = false;
    let mut json = false;

    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            flag @ ("--config" | "--referential-dir" | "--queue-dir") => {
                index += 1;
                let value = args
                    .get(index)
                    .map(PathBuf::from)
                    .ok_or_else(|| format!("{flag} requires a value"))?;
                match flag {
                    "--config" => config = Some(value),
                    "--referential-dir" => referential_dir = Some(value),
                    _ => queue_dir = Some(value),
                }
            }
            "--parallel" => parallel = true,
            "--json" => json = true,
            "-h" | "--help" => return Ok(Command::Help),
            unknown => return Err(format!("unknown option: {unknown}")),
        }
        index += 1;
    }

    let config = config.ok_or_else(|| "--config is required".to_owned())?;
    Ok(Command::Recover(CliOptions {
        config,
        referential_dir,
        queue_dir,
        parallel,
        json,
    }))
}

/// Install the global subscriber. Logs go to stderr so that stdout only
/// carries the report.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_names(true);
    // A subscriber may already be installed (tests); keep it.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Load the configuration, open the file-backed referential and queue, and
/// run one recovery pass.
pub fn recover(options: &CliOptions) -> Result<RecoveryReport> {
    let mut config = TapeStoreConfig::load(&options.config)?;
    if options.referential_dir.is_some() {
        config.referential_dir.clone_from(&options.referential_dir);
    }
    if options.queue_dir.is_some() {
        config.queue_dir.clone_from(&options.queue_dir);
    }
    if options.parallel {
        config.recovery_mode = RecoveryMode::Parallel;
    }

    let referential_dir = config
        .referential_dir
        .clone()
        .ok_or_else(|| TapeError::config("no referential_dir configured"))?;
    let queue_dir = config
        .queue_dir
        .clone()
        .ok_or_else(|| TapeError::config("no queue_dir configured"))?;

    info!(
        config = %options.config.display(),
        referential = %referential_dir.display(),
        queue = %queue_dir.display(),
        "opening tape offer stores"
    );
    let referential = Arc::new(JsonFileTarReferential::open(referential_dir)?);
    let queue = Arc::new(DirectoryWriteOrderQueue::open(queue_dir)?);

    BootstrapRecovery::new(
        config.input_tar_storage_folder.clone(),
        referential,
        config.topology()?,
        queue,
        TarRepairer::new(config.digest_type),
    )
    .with_mode(config.recovery_mode)
    .initialize_on_bootstrap()
}

pub fn render_text_report(report: &RecoveryReport) -> String {
    let mut out = String::new();
    for bucket in &report.buckets {
        let _ = writeln!(
            out,
            "{} ({}): {} write orders, {} on-tape deleted, {} stale deleted, {} repaired, {} re-verified",
            bucket.file_bucket,
            bucket.bucket,
            bucket.write_orders.len(),
            bucket.on_tape_files_deleted.len(),
            bucket.stale_files_deleted.len(),
            bucket.repaired.len(),
            bucket.reverified.len(),
        );
        for order in &bucket.write_orders {
            let _ = writeln!(out, "  {} {} bytes", order.file_path, order.size);
        }
    }
    for file_bucket in &report.skipped_file_buckets {
        let _ = writeln!(out, "{file_bucket}: no directory, skipped");
    }
    let _ = write!(
        out,
        "total: {} write orders",
        report.counters.write_orders_submitted
    );
    out
}

/// Parse, recover, print. Returns the process exit code.
pub fn run_cli(args: &[String]) -> u8 {
    let options = match parse_args(args) {
        Ok(Command::Recover(options)) => options,
        Ok(Command::Help) => {
            println!("{HELP}");
            return 0;
        }
        Err(message) => {
            eprintln!("error: {message}\n\n{HELP}");
            return USAGE_EXIT_CODE;
        }
    };
    init_tracing(options.json);

    match recover(&options) {
        Ok(report) => {
            if options.json {
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => println!("{json}"),
                    Err(err) => {
                        eprintln!("error: cannot serialize recovery report: {err}");
                        return 1;
                    }
                }
            } else {
                println!("{}", render_text_report(&report));
            }
            0
        }
        Err(err) => {
            eprintln!("error: {err}");
            if let Some(suggestion) = err.suggestion() {
                eprintln!("hint: {suggestion}");
            }
            u8::try_from(err.exit_code()).unwrap_or(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fmt::Write as _;
    use std::fs;
    use std::path::Path;

    use chrono::Utc;
    use tapestore_referential::TarReferential;
    use tapestore_types::{DigestType, DigestWithSize, TarId, TarReferentialEntry};

    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|arg| (*arg).to_owned()).collect()
    }

    fn write_config(root: &Path, with_stores: bool) -> PathBuf {
        let mut raw = format!(
            "input_tar_storage_folder = \"{}\"\n",
            root.join("inputTars").display()
        );
        if with_stores {
            let _ = writeln!(raw, "referential_dir = \"{}\"", root.join("referential").display());
            let _ = writeln!(raw, "queue_dir = \"{}\"", root.join("queue").display());
        }
        raw.push_str("\n[[buckets]]\nname = \"test\"\nfile_buckets = [\"test-objects\"]\n");
        let path = root.join("tapestore.toml");
        fs::write(&path, raw).expect("write config");
        path
    }

    #[test]
    fn test_parse_full_command_line() {
        let parsed = parse_args(&args(&[
            "--config",
            "/etc/tapestore.toml",
            "--referential-dir",
            "/var/ref",
            "--queue-dir",
            "/var/queue",
            "--parallel",
            "--json",
        ]))
        .expect("parse");
        assert_eq!(
            parsed,
            Command::Recover(CliOptions {
                config: PathBuf::from("/etc/tapestore.toml"),
                referential_dir: Some(PathBuf::from("/var/ref")),
                queue_dir: Some(PathBuf::from("/var/queue")),
                parallel: true,
                json: true,
            })
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            parse_args(&args(&["--config"])).expect_err("missing value"),
            "--config requires a value"
        );
        assert_eq!(
            parse_args(&args(&["--parallel"])).expect_err("no config"),
            "--config is required"
        );
        assert!(parse_args(&args(&["--frobnicate"])).is_err());
        assert_eq!(parse_args(&args(&["-h"])).expect("help"), Command::Help);
    }

    #[test]
    fn test_usage_and_config_exit_codes() {
        assert_eq!(run_cli(&args(&["--bogus"])), USAGE_EXIT_CODE);
        assert_eq!(run_cli(&args(&["--help"])), 0);

        let root = tempfile::tempdir().expect("tempdir");
        let missing = root.path().join("absent.toml");
        let code = run_cli(&args(&["--config", missing.to_str().expect("utf-8")]));
        assert_eq!(i32::from(code), TapeError::config("x").exit_code());
    }

    #[test]
    fn test_recover_requires_stores() {
        let root = tempfile::tempdir().expect("tempdir");
        let options = CliOptions {
            config: write_config(root.path(), false),
            referential_dir: None,
            queue_dir: None,
            parallel: false,
            json: false,
        };
        let err = recover(&options).expect_err("no referential");
        assert!(matches!(err, TapeError::Config { .. }), "{err}");
    }

    #[test]
    fn test_recover_reschedules_ready_tar() {
        let root = tempfile::tempdir().expect("tempdir");
        let tar_id = TarId::parse("20190625115513001-abc.tar").expect("id");
        let bucket_dir = root.path().join("inputTars").join("test-objects");
        fs::create_dir_all(&bucket_dir).expect("mkdir");
        fs::write(bucket_dir.join(tar_id.file_name()), b"archive").expect("write");

        let referential = JsonFileTarReferential::open(root.path().join("ref")).expect("open");
        let digest = DigestWithSize::new(7, "abcd", DigestType::Sha512);
        referential
            .insert(TarReferentialEntry::ready(tar_id.clone(), &digest, Utc::now()))
            .expect("insert");

        let options = CliOptions {
            config: write_config(root.path(), true),
            referential_dir: Some(root.path().join("ref")),
            queue_dir: None,
            parallel: true,
            json: false,
        };
        let report = recover(&options).expect("recover");

        assert_eq!(report.write_orders().count(), 1);
        let queue = DirectoryWriteOrderQueue::open(root.path().join("queue")).expect("open");
        let pending = queue.pending().expect("pending");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].order.tar_id, tar_id);
        assert_eq!(pending[0].order.digest, "abcd");

        let text = render_text_report(&report);
        assert!(text.contains("test-objects (test): 1 write orders"), "{text}");
        assert!(text.ends_with("total: 1 write orders"), "{text}");
    }
}
