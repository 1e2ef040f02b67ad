//! Append-only daily scan log.
//!
//! One CSV file per calendar day, `scanned_barcodes_<YYYY-MM-DD>.csv`, whose
//! first row is always [`HEADER`]. Every append re-reads the file and checks
//! it before writing, so a truncated or foreign file is caught on the next scan
//! rather than silently extended.
//!
//! Corruption never reaches the caller of [`DailyLog::append`]: the bad file is
//! renamed aside with a `_CORRUPTED_<timestamp>` tag and a new log is started
//! holding the barcode that hit the problem, tagged RECOVERED.

use crate::record::{ScanRecord, ScanStatus, HEADER};
use chrono::{Local, NaiveDate, NaiveDateTime};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const FILE_PREFIX: &str = "scanned_barcodes_";
pub const FILE_EXTENSION: &str = "csv";
const CORRUPTED_TAG: &str = "_CORRUPTED_";

/// Why a log file could not be read or written.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Malformed log {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Unexpected header in {path}: {found:?}")]
    Header { path: PathBuf, found: Vec<String> },
}

impl LogError {
    fn io(path: &Path, source: io::Error) -> Self {
        LogError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn csv(path: &Path, source: csv::Error) -> Self {
        LogError::Csv {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Canonical path of the log for `date`.
pub fn canonical_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!(
        "{}{}.{}",
        FILE_PREFIX,
        date.format("%Y-%m-%d"),
        FILE_EXTENSION
    ))
}

/// Name a corrupted log is moved to, tagged with when the corruption was found.
pub fn corrupted_path(path: &Path, detected_at: NaiveDateTime) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(
        "{}{}{}.{}",
        stem,
        CORRUPTED_TAG,
        detected_at.format("%Y%m%d_%H%M%S"),
        FILE_EXTENSION
    ))
}

/// Read and verify every record in a log file.
pub fn read_records(path: &Path) -> Result<Vec<ScanRecord>, LogError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| LogError::csv(path, e))?;

    let headers = reader.headers().map_err(|e| LogError::csv(path, e))?;
    if headers.iter().ne(HEADER.iter().copied()) {
        return Err(LogError::Header {
            path: path.to_path_buf(),
            found: headers.iter().map(str::to_string).collect(),
        });
    }

    reader
        .deserialize::<ScanRecord>()
        .map(|row| row.map_err(|e| LogError::csv(path, e)))
        .collect()
}

/// Number of records after the header, verifying the file on the way.
pub fn count_records(path: &Path) -> Result<usize, LogError> {
    read_records(path).map(|records| records.len())
}

/// Whether the log holds at least one record beyond the header.
///
/// Unreadable or malformed files report `false`.
pub fn has_data(path: &Path) -> bool {
    match count_records(path) {
        Ok(count) => count > 0,
        Err(err) => {
            error!("Error checking scan data in {}: {}", path.display(), err);
            false
        }
    }
}

/// Write a complete log (header plus `records`) and move it into place.
fn write_fresh(path: &Path, records: &[ScanRecord]) -> Result<(), LogError> {
    let staging = path.with_extension(format!("{FILE_EXTENSION}.tmp"));
    {
        let file = File::create(&staging).map_err(|e| LogError::io(&staging, e))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer
            .write_record(HEADER)
            .map_err(|e| LogError::csv(&staging, e))?;
        for record in records {
            writer
                .serialize(record)
                .map_err(|e| LogError::csv(&staging, e))?;
        }
        let file = writer
            .into_inner()
            .map_err(|e| LogError::io(&staging, e.into_error()))?;
        file.sync_all().map_err(|e| LogError::io(&staging, e))?;
    }
    fs::rename(&staging, path).map_err(|e| LogError::io(path, e))
}

fn append_row(path: &Path, record: &ScanRecord) -> Result<(), LogError> {
    let file = OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|e| LogError::io(path, e))?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    writer
        .serialize(record)
        .map_err(|e| LogError::csv(path, e))?;
    let mut file = writer
        .into_inner()
        .map_err(|e| LogError::io(path, e.into_error()))?;
    file.flush().map_err(|e| LogError::io(path, e))?;
    file.sync_data().map_err(|e| LogError::io(path, e))
}

/// Move a bad log out of the way. Best effort: failures are logged only.
fn quarantine(path: &Path) -> Option<PathBuf> {
    if !path.exists() {
        return None;
    }
    let tagged = corrupted_path(path, Local::now().naive_local());
    let stem = tagged
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    // Two corruptions within the same second must not overwrite each other.
    let mut target = tagged.clone();
    let mut suffix = 1;
    while target.exists() {
        target = tagged.with_file_name(format!("{stem}-{suffix}.{FILE_EXTENSION}"));
        suffix += 1;
    }
    match fs::rename(path, &target) {
        Ok(()) => {
            warn!("Renamed corrupt file to: {}", target.display());
            Some(target)
        }
        Err(err) => {
            error!("Could not rename corrupted file {}: {}", path.display(), err);
            None
        }
    }
}

/// What [`DailyLog::append`] did with a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Row added to the existing log.
    Appended,
    /// Log was corrupt; a new log was started with the barcode as RECOVERED.
    Recovered { quarantined: Option<PathBuf> },
    /// Neither the append nor the recovery could be written.
    Lost,
}

/// What rotation did with the current log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SealOutcome {
    /// Renamed to the dated artifact path.
    Sealed { artifact: PathBuf },
    /// Had no records and was removed.
    DeletedEmpty,
    /// The artifact path was already taken; the file was left alone.
    TargetOccupied,
    /// The current file is not today's file (for example a midnight rotation).
    NotToday,
    /// No current file on disk.
    Missing,
    /// Filesystem error while renaming or deleting.
    Failed,
}

#[derive(Debug)]
struct LogState {
    path: PathBuf,
    scan_count: usize,
}

/// The log currently receiving scans.
///
/// A single mutex covers the file and the in-memory counter, so concurrent
/// callers (key input and the idle-timeout check) cannot interleave writes.
#[derive(Debug)]
pub struct DailyLog {
    dir: PathBuf,
    state: Mutex<LogState>,
}

impl DailyLog {
    /// Create the data directory if needed and open (or create) today's log.
    pub fn open(dir: impl Into<PathBuf>, today: NaiveDate) -> Result<Self, LogError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| LogError::io(&dir, e))?;
        let log = Self {
            state: Mutex::new(LogState {
                path: canonical_path(&dir, today),
                scan_count: 0,
            }),
            dir,
        };
        log.initialize(today)?;
        Ok(log)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn current_path(&self) -> PathBuf {
        self.lock().path.clone()
    }

    /// Records in the current log, as of the last initialize/append.
    pub fn scan_count(&self) -> usize {
        self.lock().scan_count
    }

    /// Point at today's log, creating it if absent. Idempotent.
    pub fn initialize(&self, today: NaiveDate) -> Result<(), LogError> {
        let mut state = self.lock();
        self.initialize_locked(&mut state, today)
    }

    /// Append a record. Corruption is handled here and never returned.
    pub fn append(&self, record: &ScanRecord) -> AppendOutcome {
        let mut state = self.lock();
        let path = state.path.clone();

        let result = count_records(&path).and_then(|existing| {
            append_row(&path, record)?;
            Ok(existing + 1)
        });

        match result {
            Ok(count) => {
                state.scan_count = count;
                info!(
                    "Logged barcode: {} (Status: {}). Total scans: {}",
                    record.barcode, record.status, count
                );
                AppendOutcome::Appended
            }
            Err(err) => {
                error!("Failed to log barcode {:?}: {}", record.barcode, err);
                self.recover_locked(&mut state, record)
            }
        }
    }

    /// Seal the current log for rotation, then make sure today's log exists.
    ///
    /// Both steps run under the log lock, so no scan can land in a file
    /// between it being renamed and its replacement being created.
    /// A failure to create the new log is logged only; the next append
    /// recreates it through corruption recovery.
    pub fn rotate(&self, today: NaiveDate, yesterday: NaiveDate) -> SealOutcome {
        let mut state = self.lock();
        let outcome = self.seal_locked(&state, today, yesterday);
        if let Err(err) = self.initialize_locked(&mut state, today) {
            error!("Failed to initialize log for {}: {}", today, err);
        }
        outcome
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn initialize_locked(&self, state: &mut LogState, today: NaiveDate) -> Result<(), LogError> {
        let path = canonical_path(&self.dir, today);
        if path.exists() {
            match count_records(&path) {
                Ok(count) => {
                    state.scan_count = count;
                    info!(
                        "Using existing log file: {} with {} existing scans",
                        path.display(),
                        count
                    );
                }
                Err(err) => {
                    warn!("Existing log failed verification: {}", err);
                    quarantine(&path);
                    write_fresh(&path, &[])?;
                    state.scan_count = 0;
                    info!("Created new log file after corruption: {}", path.display());
                }
            }
        } else {
            write_fresh(&path, &[])?;
            state.scan_count = 0;
            info!("Created new log file: {}", path.display());
        }
        state.path = path;
        Ok(())
    }

    fn recover_locked(&self, state: &mut LogState, record: &ScanRecord) -> AppendOutcome {
        let quarantined = quarantine(&state.path);
        let recovered = ScanRecord::new(
            record.barcode.clone(),
            record.timestamp,
            ScanStatus::Recovered,
        );
        match write_fresh(&state.path, std::slice::from_ref(&recovered)) {
            Ok(()) => {
                state.scan_count = 1;
                info!(
                    "Created new log file after corruption: {}",
                    state.path.display()
                );
                AppendOutcome::Recovered { quarantined }
            }
            Err(err) => {
                error!("Failed to create new log file: {}", err);
                AppendOutcome::Lost
            }
        }
    }

    fn seal_locked(&self, state: &LogState, today: NaiveDate, yesterday: NaiveDate) -> SealOutcome {
        let current = &state.path;
        if !current.exists() {
            debug!("No current log at {}", current.display());
            return SealOutcome::Missing;
        }
        let is_today = *current == canonical_path(&self.dir, today);
        let is_yesterday = *current == canonical_path(&self.dir, yesterday);

        // Midnight rotations find yesterday's file still current.
        if (is_today || is_yesterday) && !has_data(current) {
            info!("Current file has no scan data, deleting instead of rotating");
            return match fs::remove_file(current) {
                Ok(()) => SealOutcome::DeletedEmpty,
                Err(err) => {
                    error!("Failed to delete empty log {}: {}", current.display(), err);
                    SealOutcome::Failed
                }
            };
        }
        if !is_today {
            info!(
                "Current log {} is not today's file, leaving it in place",
                current.display()
            );
            return SealOutcome::NotToday;
        }

        let artifact = canonical_path(&self.dir, yesterday);
        if artifact.exists() {
            warn!(
                "Rotation target {} already exists, not rotating {}",
                artifact.display(),
                current.display()
            );
            return SealOutcome::TargetOccupied;
        }
        match fs::rename(current, &artifact) {
            Ok(()) => {
                info!("Rotated file: {} -> {}", current.display(), artifact.display());
                SealOutcome::Sealed { artifact }
            }
            Err(err) => {
                error!("File rotation failed: {}", err);
                SealOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn record(barcode: &str) -> ScanRecord {
        ScanRecord::new(
            barcode,
            day(2024, 6, 1).and_hms_opt(9, 30, 0).unwrap(),
            ScanStatus::Success,
        )
    }

    #[test]
    fn canonical_path_is_date_derived() {
        let path = canonical_path(Path::new("/data"), day(2024, 1, 5));
        assert_eq!(path, PathBuf::from("/data/scanned_barcodes_2024-01-05.csv"));
    }

    #[test]
    fn corrupted_path_keeps_stem_and_adds_tag() {
        let at = day(2024, 1, 5).and_hms_opt(13, 4, 59).unwrap();
        let path = corrupted_path(Path::new("/data/scanned_barcodes_2024-01-05.csv"), at);
        assert_eq!(
            path,
            PathBuf::from("/data/scanned_barcodes_2024-01-05_CORRUPTED_20240105_130459.csv")
        );
    }

    #[test]
    fn open_creates_header_only_file() {
        let tmp = tempfile::tempdir().unwrap();
        let log = DailyLog::open(tmp.path().join("data"), day(2024, 6, 1)).unwrap();

        let contents = fs::read_to_string(log.current_path()).unwrap();
        assert_eq!(contents, "Barcode,Timestamp,Status\n");
        assert_eq!(log.scan_count(), 0);
        assert!(!has_data(&log.current_path()));
    }

    #[test]
    fn initialize_restores_scan_count() {
        let tmp = tempfile::tempdir().unwrap();
        let today = day(2024, 6, 1);
        {
            let log = DailyLog::open(tmp.path(), today).unwrap();
            log.append(&record("AAA111"));
            log.append(&record("BBB222"));
        }
        let reopened = DailyLog::open(tmp.path(), today).unwrap();
        assert_eq!(reopened.scan_count(), 2);
        reopened.initialize(today).unwrap();
        assert_eq!(reopened.scan_count(), 2);
    }

    #[test]
    fn append_preserves_order() {
        let tmp = tempfile::tempdir().unwrap();
        let log = DailyLog::open(tmp.path(), day(2024, 6, 1)).unwrap();
        for code in ["ONE", "TWO", "THREE"] {
            assert_eq!(log.append(&record(code)), AppendOutcome::Appended);
        }
        let barcodes: Vec<_> = read_records(&log.current_path())
            .unwrap()
            .into_iter()
            .map(|r| r.barcode)
            .collect();
        assert_eq!(barcodes, ["ONE", "TWO", "THREE"]);
        assert_eq!(log.scan_count(), 3);
    }

    #[test]
    fn barcodes_with_commas_and_quotes_survive() {
        let tmp = tempfile::tempdir().unwrap();
        let log = DailyLog::open(tmp.path(), day(2024, 6, 1)).unwrap();
        log.append(&record("A,\"B\""));
        let records = read_records(&log.current_path()).unwrap();
        assert_eq!(records[0].barcode, "A,\"B\"");
    }

    #[test]
    fn garbage_file_is_quarantined_on_append() {
        let tmp = tempfile::tempdir().unwrap();
        let log = DailyLog::open(tmp.path(), day(2024, 6, 1)).unwrap();
        let path = log.current_path();
        fs::write(&path, b"PK\x03\x04 definitely not csv\xff\xfe").unwrap();

        let outcome = log.append(&record("ZZZ999"));
        let quarantined = match outcome {
            AppendOutcome::Recovered {
                quarantined: Some(q),
            } => q,
            other => panic!("expected recovery, got {other:?}"),
        };
        assert!(quarantined
            .file_name()
            .unwrap()
            .to_string_lossy()
            .contains("_CORRUPTED_"));
        assert_eq!(
            fs::read(&quarantined).unwrap(),
            b"PK\x03\x04 definitely not csv\xff\xfe"
        );

        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].barcode, "ZZZ999");
        assert_eq!(records[0].status, ScanStatus::Recovered);
        assert_eq!(log.scan_count(), 1);
    }

    #[test]
    fn deleted_file_is_recreated_on_append() {
        let tmp = tempfile::tempdir().unwrap();
        let log = DailyLog::open(tmp.path(), day(2024, 6, 1)).unwrap();
        fs::remove_file(log.current_path()).unwrap();

        let outcome = log.append(&record("AFTER"));
        assert_eq!(outcome, AppendOutcome::Recovered { quarantined: None });
        let records = read_records(&log.current_path()).unwrap();
        assert_eq!(records[0].status, ScanStatus::Recovered);
    }

    #[test]
    fn corrupt_file_at_initialize_is_replaced() {
        let tmp = tempfile::tempdir().unwrap();
        let today = day(2024, 6, 1);
        let path = canonical_path(tmp.path(), today);
        fs::write(&path, "Wrong,Columns\nx,y\n").unwrap();

        let log = DailyLog::open(tmp.path(), today).unwrap();
        assert_eq!(log.scan_count(), 0);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "Barcode,Timestamp,Status\n"
        );
        let quarantined = fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("_CORRUPTED_"))
            .count();
        assert_eq!(quarantined, 1);
    }

    #[test]
    fn truncated_row_counts_as_corruption() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("partial.csv");
        fs::write(
            &path,
            "Barcode,Timestamp,Status\nABC,2024-06-01 09:30:00,SUCCESS\nDEF,2024-06-0",
        )
        .unwrap();
        assert!(count_records(&path).is_err());
        assert!(!has_data(&path));
    }

    #[test]
    fn unknown_status_counts_as_corruption() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("status.csv");
        fs::write(
            &path,
            "Barcode,Timestamp,Status\nABC,2024-06-01 09:30:00,MAYBE\n",
        )
        .unwrap();
        assert!(matches!(count_records(&path), Err(LogError::Csv { .. })));
    }

    #[test]
    fn concurrent_appends_are_not_interleaved() {
        let tmp = tempfile::tempdir().unwrap();
        let log = Arc::new(DailyLog::open(tmp.path(), day(2024, 6, 1)).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|writer| {
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    for i in 0..25 {
                        let outcome = log.append(&record(&format!("W{writer}-{i:02}")));
                        assert_eq!(outcome, AppendOutcome::Appended);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let records = read_records(&log.current_path()).unwrap();
        assert_eq!(records.len(), 100);
        assert_eq!(log.scan_count(), 100);
        for writer in 0..4 {
            let mine: Vec<_> = records
                .iter()
                .filter(|r| r.barcode.starts_with(&format!("W{writer}-")))
                .map(|r| r.barcode.clone())
                .collect();
            let expected: Vec<_> = (0..25).map(|i| format!("W{writer}-{i:02}")).collect();
            assert_eq!(mine, expected);
        }
    }

    #[test]
    fn rotate_seals_file_with_data() {
        let tmp = tempfile::tempdir().unwrap();
        let today = day(2024, 6, 2);
        let yesterday = day(2024, 6, 1);
        let log = DailyLog::open(tmp.path(), today).unwrap();
        log.append(&record("SEALME"));

        let outcome = log.rotate(today, yesterday);
        let artifact = canonical_path(tmp.path(), yesterday);
        assert_eq!(outcome, SealOutcome::Sealed { artifact: artifact.clone() });
        assert_eq!(count_records(&artifact).unwrap(), 1);

        assert_eq!(log.current_path(), canonical_path(tmp.path(), today));
        assert_eq!(count_records(&log.current_path()).unwrap(), 0);
        assert_eq!(log.scan_count(), 0);
    }

    #[test]
    fn rotate_deletes_empty_file() {
        let tmp = tempfile::tempdir().unwrap();
        let today = day(2024, 6, 2);
        let log = DailyLog::open(tmp.path(), today).unwrap();

        let outcome = log.rotate(today, day(2024, 6, 1));
        assert_eq!(outcome, SealOutcome::DeletedEmpty);
        assert!(!canonical_path(tmp.path(), day(2024, 6, 1)).exists());
        assert!(log.current_path().exists());
    }

    #[test]
    fn rotate_never_clobbers_existing_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let today = day(2024, 6, 2);
        let yesterday = day(2024, 6, 1);
        let artifact = canonical_path(tmp.path(), yesterday);
        fs::write(&artifact, "Barcode,Timestamp,Status\nOLD,2024-06-01 08:00:00,SUCCESS\n").unwrap();

        let log = DailyLog::open(tmp.path(), today).unwrap();
        log.append(&record("NEW"));
        assert_eq!(log.rotate(today, yesterday), SealOutcome::TargetOccupied);

        assert_eq!(read_records(&artifact).unwrap()[0].barcode, "OLD");
        assert_eq!(log.scan_count(), 1);
    }

    #[test]
    fn rotate_after_midnight_leaves_previous_day_file() {
        let tmp = tempfile::tempdir().unwrap();
        let yesterday = day(2024, 6, 1);
        let today = day(2024, 6, 2);
        let log = DailyLog::open(tmp.path(), yesterday).unwrap();
        log.append(&record("LATE"));

        assert_eq!(log.rotate(today, yesterday), SealOutcome::NotToday);
        assert!(has_data(&canonical_path(tmp.path(), yesterday)));
        assert_eq!(log.current_path(), canonical_path(tmp.path(), today));
    }

    #[test]
    fn rotate_after_midnight_deletes_empty_previous_day_file() {
        let tmp = tempfile::tempdir().unwrap();
        let yesterday = day(2024, 6, 1);
        let today = day(2024, 6, 2);
        let log = DailyLog::open(tmp.path(), yesterday).unwrap();

        assert_eq!(log.rotate(today, yesterday), SealOutcome::DeletedEmpty);
        assert!(!canonical_path(tmp.path(), yesterday).exists());
        assert_eq!(log.current_path(), canonical_path(tmp.path(), today));
        assert!(canonical_path(tmp.path(), today).exists());
    }
}
