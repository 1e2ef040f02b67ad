//! Diagnostic logging for the scanrelay service.
//!
//! Everything goes through `tracing`. The subscriber writes to two places: a
//! size-capped log file under the configured log directory and stderr.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const LOGGED_CRATES: &[&str] = &["scanrelay", "scanrelay_box", "scanrelay_logging"];
const MAX_LOG_FILES: usize = 5;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Logging configuration for the service binary.
pub struct LogConfig<'a> {
    /// Base name of the diagnostic file (`<file_name>.log`).
    pub file_name: &'a str,
    /// Directory holding the diagnostic file and its rotations.
    pub log_dir: &'a Path,
    /// Verbosity applied to the scanrelay crates when `RUST_LOG` is unset.
    pub level: &'a str,
    /// The terminal is in raw mode; keep stderr to warnings and above.
    pub raw_terminal: bool,
}

/// Install the global subscriber: rolling file writer plus stderr.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    fs::create_dir_all(config.log_dir).with_context(|| {
        format!(
            "Failed to create log directory: {}",
            config.log_dir.display()
        )
    })?;
    let file_log = SizeCappedLog::open(
        config.log_dir,
        config.file_name,
        MAX_LOG_FILES,
        MAX_LOG_FILE_SIZE,
    )
    .with_context(|| format!("Failed to open log file for {}", config.file_name))?;

    let file_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(config.level)));

    let console_filter = if config.raw_terminal {
        EnvFilter::new("warn")
    } else {
        file_filter.clone()
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file_log))
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    Ok(())
}

/// Filter directives that apply `level` to every scanrelay crate.
pub fn default_directives(level: &str) -> String {
    let level = level.trim().to_ascii_lowercase();
    LOGGED_CRATES
        .iter()
        .map(|krate| format!("{krate}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// `<name>.log` plus numbered archives, `<name>.log.1` newest.
///
/// Once a write would push the live file past `limit`, every archive moves one
/// slot older, the oldest falls off, and the live file becomes `.1`.
struct SizeCappedLog {
    live: PathBuf,
    archives: Vec<PathBuf>,
    limit: u64,
    file: File,
    len: u64,
}

impl SizeCappedLog {
    /// `files` counts the live file; `files == 1` keeps no archives.
    fn open(dir: &Path, name: &str, files: usize, limit: u64) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let name = sanitize_name(name);
        let live = dir.join(format!("{name}.log"));
        let archives = (1..files.max(1))
            .map(|slot| dir.join(format!("{name}.log.{slot}")))
            .collect();
        let (file, len) = open_append(&live)?;

        let mut log = Self {
            live,
            archives,
            limit,
            file,
            len,
        };
        if log.len > log.limit {
            log.roll()?;
        }
        Ok(log)
    }

    fn roll(&mut self) -> io::Result<()> {
        self.file.flush()?;
        match self.archives.last() {
            None => remove_if_present(&self.live)?,
            Some(oldest) => {
                remove_if_present(oldest)?;
                for pair in self.archives.windows(2).rev() {
                    rename_if_present(&pair[0], &pair[1])?;
                }
                rename_if_present(&self.live, &self.archives[0])?;
            }
        }
        let (file, len) = open_append(&self.live)?;
        self.file = file;
        self.len = len;
        Ok(())
    }
}

impl Write for SizeCappedLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.len > 0 && self.len + buf.len() as u64 > self.limit {
            self.roll()?;
        }
        let written = self.file.write(buf)?;
        self.len += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn open_append(path: &Path) -> io::Result<(File, u64)> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let len = file.metadata()?.len();
    Ok((file, len))
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

fn rename_if_present(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
