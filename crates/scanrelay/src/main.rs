//! scanrelay binary: capture scans from the terminal until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use scanrelay::config::{Args, Config};
use scanrelay::schedule::SystemClock;
use scanrelay::service;
use scanrelay_logging::{init_logging, LogConfig};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

const LOG_FILE_NAME: &str = "barcode_scanner";

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            // --help and --version land here too
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let config = match Config::from_args(args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Configuration error: {}", err);
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = init_logging(LogConfig {
        file_name: LOG_FILE_NAME,
        log_dir: &config.log_dir,
        level: &config.log_level,
        raw_terminal: true,
    }) {
        eprintln!("Failed to initialize logging: {:#}", err);
        return ExitCode::FAILURE;
    }

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("Fatal error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(config: Config) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    install_signal_handlers(Arc::clone(&running))?;

    service::run(&config, running, Arc::new(SystemClock)).context("Barcode relay failed")
}

fn install_signal_handlers(running: Arc<AtomicBool>) -> Result<()> {
    #[cfg(unix)]
    {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals =
            Signals::new([SIGINT, SIGTERM]).context("Failed to register signal handlers")?;
        std::thread::Builder::new()
            .name("signals".to_string())
            .spawn(move || {
                if let Some(sig) = signals.forever().next() {
                    info!("Received signal {}, initiating shutdown...", sig);
                    running.store(false, Ordering::SeqCst);
                }
            })
            .context("Failed to spawn signal thread")?;
    }

    #[cfg(windows)]
    {
        ctrlc::set_handler(move || {
            info!("Received Ctrl+C, initiating shutdown...");
            running.store(false, Ordering::SeqCst);
        })
        .context("Failed to install Ctrl+C handler")?;
    }

    Ok(())
}
