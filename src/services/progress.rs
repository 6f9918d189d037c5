//! Progress reporting service
//!
//! This module separates status reporting from the pipeline itself, so the
//! calling application can log progress, poll it, or ignore it.

use crate::types::ProcessingTimings;
use instant::Instant;
use tokio::sync::watch;

/// Pipeline status, updated at every stage boundary
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PipelineStatus {
    /// No invocation has started yet
    #[default]
    Idle,
    /// Decoding, normalizing and waiting for the model
    Loading,
    /// Waiting for the oracle reply
    Segmenting,
    /// Converting the probability mask to alpha
    Refining,
    /// Applying alpha and encoding the output
    Compositing,
    /// Output blob produced
    Done,
    /// The invocation failed
    Failed { message: String },
}

impl PipelineStatus {
    /// Get a human-readable description of the status
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            PipelineStatus::Idle => "Waiting for input",
            PipelineStatus::Loading => "Loading image and model",
            PipelineStatus::Segmenting => "Running segmentation",
            PipelineStatus::Refining => "Refining mask",
            PipelineStatus::Compositing => "Compositing transparent image",
            PipelineStatus::Done => "Processing completed",
            PipelineStatus::Failed { .. } => "Processing failed",
        }
    }

    /// Get the typical progress percentage for this status
    #[must_use]
    pub fn progress_percentage(&self) -> u8 {
        match self {
            PipelineStatus::Idle => 0,
            PipelineStatus::Loading => 10,
            PipelineStatus::Segmenting => 40,
            PipelineStatus::Refining => 75,
            PipelineStatus::Compositing => 90,
            PipelineStatus::Done | PipelineStatus::Failed { .. } => 100,
        }
    }

    /// Whether no further status will follow in this invocation
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStatus::Done | PipelineStatus::Failed { .. })
    }
}

/// Progress update containing status and timing information
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Current pipeline status
    pub status: PipelineStatus,
    /// Progress percentage (0-100)
    pub progress: u8,
    /// Human-readable status description
    pub description: String,
    /// Elapsed time since the invocation started (milliseconds)
    pub elapsed_ms: u64,
}

impl ProgressUpdate {
    /// Create a new progress update
    #[must_use]
    pub fn new(status: PipelineStatus, start_time: Instant) -> Self {
        Self {
            progress: status.progress_percentage(),
            description: status.description().to_string(),
            elapsed_ms: start_time.elapsed().as_millis() as u64,
            status,
        }
    }
}

/// Trait for reporting progress during background removal
pub trait ProgressReporter: Send + Sync {
    /// Report a progress update
    fn report_progress(&self, update: &ProgressUpdate);

    /// Report successful completion with final timings
    fn report_completion(&self, timings: &ProcessingTimings);

    /// Report an error; `status` is the last status reached before failing
    fn report_error(&self, status: &PipelineStatus, error: &str);
}

/// No-op progress reporter that discards all progress updates
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _update: &ProgressUpdate) {}

    fn report_completion(&self, _timings: &ProcessingTimings) {}

    fn report_error(&self, _status: &PipelineStatus, _error: &str) {}
}

/// Console progress reporter that logs progress
pub struct ConsoleProgressReporter {
    verbose: bool,
}

impl ConsoleProgressReporter {
    /// Create a new console progress reporter
    ///
    /// # Arguments
    /// * `verbose` - Whether to show elapsed times and per-stage timings
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn report_progress(&self, update: &ProgressUpdate) {
        if self.verbose {
            log::info!(
                "[{}%] {} ({}ms elapsed)",
                update.progress,
                update.description,
                update.elapsed_ms
            );
        } else {
            log::info!("[{}%] {}", update.progress, update.description);
        }
    }

    fn report_completion(&self, timings: &ProcessingTimings) {
        log::info!("Background removal completed in {}ms", timings.total_ms);

        if self.verbose {
            log::info!("  Detailed timings:");
            log::info!("    decode: {}ms", timings.decode_ms);
            log::info!("    normalize: {}ms", timings.normalize_ms);
            log::info!("    model load: {}ms", timings.model_load_ms);
            log::info!("    segmentation: {}ms", timings.segmentation_ms);
            log::info!("    refine: {}ms", timings.refine_ms);
            log::info!("    composite: {}ms", timings.composite_ms);
            log::info!("    encode: {}ms", timings.encode_ms);
        }
    }

    fn report_error(&self, status: &PipelineStatus, error: &str) {
        log::error!("Error while {}: {}", status.description().to_lowercase(), error);
    }
}

/// Poll-able status published through a `tokio::sync::watch` channel
///
/// Every subscriber sees the latest status. When several invocations share
/// one watcher the most recent update wins.
pub struct StatusWatcher {
    sender: watch::Sender<PipelineStatus>,
}

impl StatusWatcher {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _receiver) = watch::channel(PipelineStatus::Idle);
        Self { sender }
    }

    /// Subscribe to status changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PipelineStatus> {
        self.sender.subscribe()
    }

    /// The latest published status
    #[must_use]
    pub fn current(&self) -> PipelineStatus {
        self.sender.borrow().clone()
    }
}

impl Default for StatusWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for StatusWatcher {
    fn report_progress(&self, update: &ProgressUpdate) {
        self.sender.send_replace(update.status.clone());
    }

    fn report_completion(&self, _timings: &ProcessingTimings) {}

    fn report_error(&self, _status: &PipelineStatus, error: &str) {
        self.sender.send_replace(PipelineStatus::Failed {
            message: error.to_string(),
        });
    }
}

/// Per-invocation tracker that timestamps and forwards status changes
pub struct ProgressTracker<'a> {
    reporter: &'a dyn ProgressReporter,
    start_time: Instant,
    current: PipelineStatus,
}

impl<'a> ProgressTracker<'a> {
    /// Create a new progress tracker with the specified reporter
    #[must_use]
    pub fn new(reporter: &'a dyn ProgressReporter) -> Self {
        Self {
            reporter,
            start_time: Instant::now(),
            current: PipelineStatus::Idle,
        }
    }

    /// Move to `status` and report it
    pub fn report_status(&mut self, status: PipelineStatus) {
        self.current = status.clone();
        let update = ProgressUpdate::new(status, self.start_time);
        self.reporter.report_progress(&update);
    }

    /// Report completion with final timings
    pub fn report_completion(&mut self, timings: &ProcessingTimings) {
        self.report_status(PipelineStatus::Done);
        self.reporter.report_completion(timings);
    }

    /// Report a failure at the current status
    pub fn report_error(&mut self, error: &str) {
        self.reporter.report_error(&self.current, error);
        self.current = PipelineStatus::Failed {
            message: error.to_string(),
        };
    }

    /// Get the elapsed time since tracking started
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// Get the current status
    #[must_use]
    pub fn current_status(&self) -> &PipelineStatus {
        &self.current
    }
}
