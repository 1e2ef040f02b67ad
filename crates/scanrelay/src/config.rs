//! Service configuration.
//!
//! Every setting is a command-line flag that falls back to an environment
//! variable of the same meaning. Required values are checked here rather than
//! by clap so that a missing key is a [`ConfigError`] with exit code 1.

use chrono::NaiveTime;
use scanrelay_box::BoxSettings;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_ROTATION_TIME: &str = "00:00";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Required environment variable {0} is not set")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("Box config file problem: {0}")]
    BoxSettings(String),

    #[error("Failed to create directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(clap::Parser, Debug, Clone)]
#[command(
    name = "scanrelay",
    about = "Log keyboard-wedge barcode scans to daily files and upload them to Box"
)]
pub struct Args {
    /// Box service-account settings file (JSON)
    #[arg(long, env = "BOX_CONFIG_PATH")]
    pub box_config_path: Option<PathBuf>,

    /// Box folder receiving the daily files
    #[arg(long, env = "TARGET_FOLDER_ID")]
    pub target_folder_id: Option<String>,

    /// Account the target folder is shared with
    #[arg(long, env = "COLLABORATOR_EMAIL")]
    pub collaborator_email: Option<String>,

    /// Directory for the daily scan logs
    #[arg(long, env = "BASE_DIR", default_value = "./data")]
    pub base_dir: PathBuf,

    /// Directory for the diagnostic log
    #[arg(long, env = "LOG_DIR", default_value = "./logs")]
    pub log_dir: PathBuf,

    /// Seconds of keyboard silence before a partial barcode is finalized
    #[arg(long, env = "BARCODE_TIMEOUT", default_value_t = 5)]
    pub barcode_timeout: u64,

    /// Attempts per upload, and per startup authentication
    #[arg(long, env = "MAX_RETRIES", default_value_t = 3)]
    pub max_retries: u32,

    /// Base delay in seconds between retries
    #[arg(long, env = "RETRY_DELAY", default_value_t = 5)]
    pub retry_delay: u64,

    /// Diagnostic log verbosity (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Local wall-clock time of the daily rotation, HH:MM
    #[arg(long, env = "ROTATION_TIME", default_value = DEFAULT_ROTATION_TIME)]
    pub rotation_time: String,
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub box_config_path: PathBuf,
    pub target_folder_id: String,
    pub collaborator_email: String,
    pub base_dir: PathBuf,
    pub log_dir: PathBuf,
    pub barcode_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub log_level: String,
    pub rotation_time: NaiveTime,
}

impl Config {
    /// Validate arguments, check the Box settings file and create the data
    /// and log directories.
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let box_config_path = required(args.box_config_path, "BOX_CONFIG_PATH")?;
        let target_folder_id = required(args.target_folder_id, "TARGET_FOLDER_ID")?;
        let collaborator_email = required(args.collaborator_email, "COLLABORATOR_EMAIL")?;

        if args.max_retries == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_RETRIES",
                message: "must be at least 1".into(),
            });
        }
        if args.barcode_timeout == 0 {
            return Err(ConfigError::Invalid {
                key: "BARCODE_TIMEOUT",
                message: "must be at least 1 second".into(),
            });
        }
        let rotation_time = parse_rotation_time(&args.rotation_time)?;
        let log_level = normalize_level(&args.log_level)?;

        if !box_config_path.exists() {
            return Err(ConfigError::BoxSettings(format!(
                "Box config file not found: {}",
                box_config_path.display()
            )));
        }
        BoxSettings::from_file(&box_config_path)
            .map_err(|e| ConfigError::BoxSettings(e.to_string()))?;

        for dir in [&args.base_dir, &args.log_dir] {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Directory {
                path: dir.clone(),
                source,
            })?;
        }

        Ok(Self {
            box_config_path,
            target_folder_id,
            collaborator_email,
            base_dir: args.base_dir,
            log_dir: args.log_dir,
            barcode_timeout: Duration::from_secs(args.barcode_timeout),
            max_retries: args.max_retries,
            retry_delay: Duration::from_secs(args.retry_delay),
            log_level,
            rotation_time,
        })
    }
}

fn required<T>(value: Option<T>, key: &'static str) -> Result<T, ConfigError>
where
    T: AsRef<std::ffi::OsStr>,
{
    match value {
        Some(v) if !v.as_ref().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(key)),
    }
}

/// Parse `HH:MM` (24-hour).
pub fn parse_rotation_time(raw: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(|e| ConfigError::Invalid {
        key: "ROTATION_TIME",
        message: format!("expected HH:MM, got {raw:?} ({e})"),
    })
}

fn normalize_level(raw: &str) -> Result<String, ConfigError> {
    let level = raw.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(level),
        "warning" => Ok("warn".to_string()),
        "critical" => Ok("error".to_string()),
        _ => Err(ConfigError::Invalid {
            key: "LOG_LEVEL",
            message: format!("unknown level {raw:?}"),
        }),
    }
}
