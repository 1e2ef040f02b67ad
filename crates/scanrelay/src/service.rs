//! Service wiring: scanner, main loop and lifecycle.
//!
//! Threads:
//! - key input (see [`crate::input`]) feeds [`Scanner::handle_key`]
//! - the main loop ticks every 100 ms: idle-timeout check, then rotation trigger
//! - the upload worker owned by [`UploadPipeline`]
//!
//! Shutdown order: stop input, drain the pipeline, then one synchronous
//! delivery of the current log if it holds scans.

use crate::config::Config;
use crate::daily_log::{has_data, AppendOutcome, DailyLog, LogError};
use crate::input::{self, TerminalKeySource};
use crate::record::ScanRecord;
use crate::remote::{connect_with_retry, ensure_collaborator, BoxStore, ConnectPolicy, RemoteStore};
use crate::rotation::{self, RotationReport};
use crate::schedule::{Clock, DailyTrigger};
use crate::tokenizer::{KeyEvent, Token, Tokenizer, TIMEOUT_POLL_INTERVAL};
use crate::upload::{PipelineConfig, RetryPolicy, UploadOutcome, UploadPipeline, Uploader};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Failed to open scan log: {0}")]
    Log(#[from] LogError),

    #[error("Failed to start upload worker: {0}")]
    Worker(#[source] io::Error),

    #[error("Failed to start key input: {0}")]
    Input(#[source] io::Error),
}

// ============================================================================
// Scanner
// ============================================================================

/// Tokenizer plus the log it writes to.
///
/// Shared between the input thread and the main loop. The tokenizer lock is
/// held through the append, so barcodes reach the log in the order they were
/// finalized.
pub struct Scanner {
    tokenizer: Mutex<Tokenizer>,
    log: Arc<DailyLog>,
    clock: Arc<dyn Clock>,
}

impl Scanner {
    pub fn new(tokenizer: Tokenizer, log: Arc<DailyLog>, clock: Arc<dyn Clock>) -> Self {
        Self {
            tokenizer: Mutex::new(tokenizer),
            log,
            clock,
        }
    }

    pub fn log(&self) -> &Arc<DailyLog> {
        &self.log
    }

    pub fn handle_key(&self, event: &KeyEvent) -> Option<AppendOutcome> {
        self.handle_key_at(event, Instant::now())
    }

    /// Feed one key; returns what happened to the barcode it completed, if any.
    pub fn handle_key_at(&self, event: &KeyEvent, now: Instant) -> Option<AppendOutcome> {
        let mut tokenizer = self.tokenizer();
        let token = tokenizer.on_key(event, now)?;
        Some(self.record(token))
    }

    pub fn check_timeout(&self) -> Option<AppendOutcome> {
        self.check_timeout_at(Instant::now())
    }

    pub fn check_timeout_at(&self, now: Instant) -> Option<AppendOutcome> {
        let mut tokenizer = self.tokenizer();
        let token = tokenizer.check_timeout(now)?;
        Some(self.record(token))
    }

    fn tokenizer(&self) -> std::sync::MutexGuard<'_, Tokenizer> {
        self.tokenizer.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn record(&self, token: Token) -> AppendOutcome {
        let record = ScanRecord::stamped(token.barcode, self.clock.now(), token.status);
        self.log.append(&record)
    }
}

// ============================================================================
// Service
// ============================================================================

/// Authenticate with retries and share the target folder.
///
/// Returns `None` (degraded mode) when every attempt fails.
pub fn connect(config: &Config) -> Option<Arc<dyn RemoteStore>> {
    let policy = ConnectPolicy {
        settings_path: config.box_config_path.clone(),
        max_retries: config.max_retries,
        retry_delay: config.retry_delay,
    };
    let store = connect_with_retry(&policy, |path| {
        BoxStore::authenticate(path).map(|store| Arc::new(store) as Arc<dyn RemoteStore>)
    })?;
    ensure_collaborator(
        store.as_ref(),
        &config.target_folder_id,
        &config.collaborator_email,
    );
    Some(store)
}

/// A running relay minus its input source.
pub struct RelayService {
    scanner: Arc<Scanner>,
    log: Arc<DailyLog>,
    uploader: Arc<Uploader>,
    pipeline: UploadPipeline,
    trigger: DailyTrigger,
    clock: Arc<dyn Clock>,
}

impl RelayService {
    pub fn start(
        config: &Config,
        store: Option<Arc<dyn RemoteStore>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ServiceError> {
        Self::start_with(config, store, clock, PipelineConfig::default())
    }

    /// Open today's log, start the upload worker and arm the rotation trigger.
    pub fn start_with(
        config: &Config,
        store: Option<Arc<dyn RemoteStore>>,
        clock: Arc<dyn Clock>,
        pipeline_config: PipelineConfig,
    ) -> Result<Self, ServiceError> {
        let now = clock.now();
        let log = Arc::new(DailyLog::open(&config.base_dir, now.date())?);

        let uploader = Arc::new(Uploader::new(
            store,
            config.target_folder_id.clone(),
            RetryPolicy {
                max_retries: config.max_retries,
                retry_delay: config.retry_delay,
            },
        ));
        if uploader.is_degraded() {
            warn!("Running without remote store; scans are logged locally only");
        }
        let pipeline = UploadPipeline::start(Arc::clone(&uploader), pipeline_config)
            .map_err(ServiceError::Worker)?;

        let trigger = DailyTrigger::new(config.rotation_time, now);
        info!(
            "Next rotation at {}",
            trigger.next_fire().format("%Y-%m-%d %H:%M")
        );

        let scanner = Arc::new(Scanner::new(
            Tokenizer::new(config.barcode_timeout),
            Arc::clone(&log),
            Arc::clone(&clock),
        ));

        Ok(Self {
            scanner,
            log,
            uploader,
            pipeline,
            trigger,
            clock,
        })
    }

    pub fn scanner(&self) -> Arc<Scanner> {
        Arc::clone(&self.scanner)
    }

    pub fn log(&self) -> &DailyLog {
        &self.log
    }

    pub fn pipeline(&self) -> &UploadPipeline {
        &self.pipeline
    }

    pub fn tick(&mut self) -> Option<RotationReport> {
        self.tick_at(Instant::now())
    }

    /// One main-loop iteration. Returns the rotation report when the trigger fired.
    pub fn tick_at(&mut self, instant: Instant) -> Option<RotationReport> {
        self.scanner.check_timeout_at(instant);

        let now = self.clock.now();
        if !self.trigger.poll(now) {
            return None;
        }
        let report = rotation::rotate(&self.log, now, &self.pipeline);
        info!(
            "Rotation done ({:?}); next at {}",
            report.seal,
            self.trigger.next_fire().format("%Y-%m-%d %H:%M")
        );
        Some(report)
    }

    /// Tick until `running` goes false.
    pub fn run_until(&mut self, running: &AtomicBool) {
        while running.load(Ordering::SeqCst) {
            self.tick();
            thread::sleep(TIMEOUT_POLL_INTERVAL);
        }
    }

    /// Drain uploads, then try once to deliver the current log.
    ///
    /// Returns the outcome of that final delivery, or `None` when the
    /// current log had nothing to send.
    pub fn shutdown(mut self) -> Option<UploadOutcome> {
        info!("Shutting down upload pipeline");
        self.pipeline.shutdown();

        let current = self.log.current_path();
        if !has_data(&current) {
            return None;
        }
        info!("Uploading current log before exit: {}", current.display());
        let outcome = self.uploader.deliver(&current);
        match &outcome {
            UploadOutcome::Delivered { .. } => info!("Final upload of {} done", current.display()),
            other => warn!("Final upload of {} ended {:?}", current.display(), other),
        }
        Some(outcome)
    }
}

/// Run the relay against the terminal until `running` is cleared.
///
/// Fails up front without a terminal, and after shutdown if terminal input
/// broke while running. Scans already logged are still flushed either way.
pub fn run(
    config: &Config,
    running: Arc<AtomicBool>,
    clock: Arc<dyn Clock>,
) -> Result<(), ServiceError> {
    input::ensure_terminal().map_err(ServiceError::Input)?;

    info!("Starting barcode relay");
    info!("Data directory: {}", config.base_dir.display());

    let store = connect(config);
    let mut service = RelayService::start(config, store, clock)?;

    let scanner = service.scanner();
    let input = TerminalKeySource::spawn(Arc::clone(&running), move |event| {
        scanner.handle_key(&event);
    })
    .map_err(ServiceError::Input)?;
    info!("Ready to scan. Press Ctrl+C to stop.");

    service.run_until(&running);

    let input_result = input
        .join()
        .unwrap_or_else(|_| Err(io::Error::other("key input thread panicked")));
    service.shutdown();

    input_result.map_err(ServiceError::Input)?;
    info!("Barcode relay stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daily_log::read_records;
    use crate::record::ScanStatus;
    use crate::schedule::ManualClock;
    use chrono::NaiveDate;
    use std::time::Duration;

    fn scanner(dir: &std::path::Path) -> Scanner {
        let clock = Arc::new(ManualClock::new(
            NaiveDate::from_ymd_opt(2024, 6, 2)
                .unwrap()
                .and_hms_opt(9, 30, 0)
                .unwrap(),
        ));
        let log = Arc::new(DailyLog::open(dir, clock.now().date()).unwrap());
        Scanner::new(Tokenizer::new(Duration::from_secs(5)), log, clock)
    }

    fn type_keys(scanner: &Scanner, keys: &[&str], at: Instant) -> Option<AppendOutcome> {
        let mut last = None;
        for key in keys {
            last = scanner.handle_key_at(&KeyEvent::down(*key), at);
        }
        last
    }

    #[test]
    fn enter_logs_barcode_with_clock_timestamp() {
        let tmp = tempfile::tempdir().unwrap();
        let scanner = scanner(tmp.path());
        let start = Instant::now();

        let outcome = type_keys(&scanner, &["A", "B", "C", "1", "enter"], start);
        assert_eq!(outcome, Some(AppendOutcome::Appended));

        let records = read_records(&scanner.log().current_path()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].barcode, "ABC1");
        assert_eq!(records[0].status, ScanStatus::Success);
        assert_eq!(
            records[0].timestamp.format("%H:%M:%S").to_string(),
            "09:30:00"
        );
    }

    #[test]
    fn run_without_terminal_is_an_input_error() {
        use std::io::IsTerminal;
        if std::io::stdin().is_terminal() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let config = Config {
            box_config_path: tmp.path().join("box_config.json"),
            target_folder_id: "987654".to_string(),
            collaborator_email: "owner@example.com".to_string(),
            base_dir: tmp.path().join("data"),
            log_dir: tmp.path().join("logs"),
            barcode_timeout: Duration::from_secs(5),
            max_retries: 1,
            retry_delay: Duration::from_millis(1),
            log_level: "info".to_string(),
            rotation_time: chrono::NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
        };
        let running = Arc::new(AtomicBool::new(true));
        let clock = Arc::new(ManualClock::new(
            NaiveDate::from_ymd_opt(2024, 6, 2)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap(),
        ));

        let err = run(&config, running, clock).unwrap_err();
        assert!(matches!(err, ServiceError::Input(_)));
        // nothing started, nothing created
        assert!(!config.base_dir.exists());
    }

    #[test]
    fn idle_buffer_is_logged_as_timeout() {
        let tmp = tempfile::tempdir().unwrap();
        let scanner = scanner(tmp.path());
        let start = Instant::now();

        type_keys(&scanner, &["9", "8"], start);
        assert_eq!(scanner.check_timeout_at(start + Duration::from_secs(2)), None);
        assert_eq!(
            scanner.check_timeout_at(start + Duration::from_secs(6)),
            Some(AppendOutcome::Appended)
        );

        let records = read_records(&scanner.log().current_path()).unwrap();
        assert_eq!(records[0].barcode, "98");
        assert_eq!(records[0].status, ScanStatus::Timeout);
    }

    #[test]
    fn timeouts_racing_keys_keep_log_in_key_order() {
        let tmp = tempfile::tempdir().unwrap();
        let scanner = Arc::new(scanner(tmp.path()));
        let start = Instant::now();
        let typed: String = (1..=50).map(|n| format!("K{n:03}")).collect();

        let typist = {
            let scanner = Arc::clone(&scanner);
            let typed = typed.clone();
            std::thread::spawn(move || {
                for (i, c) in typed.chars().enumerate() {
                    scanner.handle_key_at(&KeyEvent::down(c.to_string()), start);
                    if i % 4 == 3 {
                        scanner.handle_key_at(&KeyEvent::down("enter"), start);
                    }
                }
            })
        };
        let late = start + Duration::from_secs(3600);
        while !typist.is_finished() {
            scanner.check_timeout_at(late);
        }
        typist.join().unwrap();
        scanner.check_timeout_at(late);

        let records = read_records(&scanner.log().current_path()).unwrap();
        let logged: String = records.iter().map(|r| r.barcode.as_str()).collect();
        assert_eq!(logged, typed);
    }

    #[test]
    fn short_barcode_is_logged_invalid() {
        let tmp = tempfile::tempdir().unwrap();
        let scanner = scanner(tmp.path());
        type_keys(&scanner, &["X", "space", "enter"], Instant::now());

        let records = read_records(&scanner.log().current_path()).unwrap();
        assert_eq!(records[0].barcode, "X");
        assert_eq!(records[0].status, ScanStatus::Invalid);
    }
}
