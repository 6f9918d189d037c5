//! Services that keep encoding, compositing and progress concerns out of the
//! processor

pub mod compositing;
pub mod format;
pub mod progress;

pub use compositing::Compositor;
pub use format::ImageEncoder;
pub use progress::{
    ConsoleProgressReporter, NoOpProgressReporter, PipelineStatus, ProgressReporter,
    ProgressTracker, ProgressUpdate, StatusWatcher,
};
