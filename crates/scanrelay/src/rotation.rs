//! Daily rotation: seal yesterday's scans and queue them for upload.

use crate::daily_log::{canonical_path, has_data, DailyLog, SealOutcome};
use crate::upload::{QueueError, UploadPipeline, UploadTask};
use chrono::{Duration as ChronoDuration, NaiveDateTime};
use std::fs;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Where rotation hands sealed artifacts.
pub trait ArtifactSink {
    fn enqueue(&self, task: UploadTask) -> Result<(), QueueError>;
}

impl ArtifactSink for UploadPipeline {
    fn enqueue(&self, task: UploadTask) -> Result<(), QueueError> {
        UploadPipeline::enqueue(self, task)
    }
}

/// What one rotation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationReport {
    pub seal: SealOutcome,
    /// Artifact handed to the sink, if any.
    pub enqueued: Option<PathBuf>,
}

/// Rotate `log` as of `now`:
///
/// 1. yesterday is the calendar day before `now`;
/// 2. today's file is sealed to yesterday's name if it has data, deleted if not;
/// 3. any artifact at yesterday's name (from this run or an interrupted one)
///    is queued for upload, or deleted if it holds no scans;
/// 4. a fresh log for today is in place.
///
/// Steps 2 and 4 happen together under the log lock; see [`DailyLog::rotate`].
/// Enqueueing is bounded and a full queue only costs a log line, since the
/// artifact stays on disk.
pub fn rotate(log: &DailyLog, now: NaiveDateTime, sink: &dyn ArtifactSink) -> RotationReport {
    let today = now.date();
    let yesterday = (now - ChronoDuration::days(1)).date();
    info!("Rotating scan log for {}", today);

    let seal = log.rotate(today, yesterday);

    let artifact = canonical_path(log.dir(), yesterday);
    let enqueued = if artifact.exists() && !has_data(&artifact) {
        info!("Artifact {} has no scan data, deleting", artifact.display());
        if let Err(err) = fs::remove_file(&artifact) {
            warn!("Could not delete empty artifact {}: {}", artifact.display(), err);
        }
        None
    } else if artifact.exists() {
        match sink.enqueue(UploadTask::new(artifact.clone())) {
            Ok(()) => Some(artifact),
            Err(err) => {
                error!("{}", err);
                None
            }
        }
    } else {
        None
    };

    RotationReport { seal, enqueued }
}
