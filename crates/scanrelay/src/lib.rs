//! scanrelay: keyboard-wedge barcode scans to daily CSV logs, uploaded to Box.
//!
//! Pipeline, leaves first:
//! - [`tokenizer`]: key events to barcodes, with idle-timeout finalization
//! - [`daily_log`]: append-only daily CSV with corruption recovery
//! - [`rotation`] and [`schedule`]: daily seal of the log into an upload artifact
//! - [`upload`]: bounded queue and retrying upload worker
//! - [`remote`]: remote store contract and its Box implementation

pub mod config;
pub mod daily_log;
pub mod input;
pub mod record;
pub mod remote;
pub mod rotation;
pub mod schedule;
pub mod service;
pub mod tokenizer;
pub mod upload;

pub use config::{Args, Config, ConfigError};
pub use daily_log::{AppendOutcome, DailyLog, LogError, SealOutcome};
pub use record::{ScanRecord, ScanStatus};
pub use remote::{RemoteError, RemoteItem, RemoteStore};
pub use rotation::{ArtifactSink, RotationReport};
pub use schedule::{Clock, DailyTrigger, ManualClock, SystemClock};
pub use service::{RelayService, Scanner, ServiceError};
pub use tokenizer::{KeyEvent, Token, Tokenizer};
pub use upload::{QueueError, UploadOutcome, UploadPipeline, UploadTask, Uploader};
