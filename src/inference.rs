//! Segmentation oracle abstraction
//!
//! The oracle is an external foreground/background segmentation service. The
//! pipeline only knows its input/output contract: encoded image bytes and a
//! confidence threshold in, an ordered list of labelled masks out.

use crate::error::Result;
use async_trait::async_trait;

/// One entry of a raw oracle reply, before validation
#[derive(Debug, Clone, PartialEq)]
pub struct OracleSegment {
    pub label: String,
    /// Detection confidence, when the oracle reports one
    pub score: Option<f32>,
    /// Row-major background probabilities, one per pixel of the submitted image
    pub mask: Option<Vec<f32>>,
}

impl OracleSegment {
    /// Segment carrying a mask and no score
    pub fn with_mask<S: Into<String>>(label: S, mask: Vec<f32>) -> Self {
        Self {
            label: label.into(),
            score: None,
            mask: Some(mask),
        }
    }
}

/// Trait for segmentation oracles
///
/// Implementations must tolerate concurrent calls through a shared reference;
/// an oracle that cannot must serialize internally.
#[async_trait]
pub trait SegmentationOracle: Send + Sync {
    /// Segment an encoded image
    ///
    /// # Arguments
    /// * `image` - Compressed intermediate produced by the segmentation invoker
    /// * `threshold` - Minimum confidence for a detection to be reported
    ///
    /// # Errors
    /// - Network, model-load or inference failures inside the oracle
    async fn segment(&self, image: &[u8], threshold: f32) -> Result<Vec<OracleSegment>>;

    /// Short identifier for logs
    fn name(&self) -> &str;
}

/// Constructs an oracle; driven at most once at a time by the model cache
#[async_trait]
pub trait OracleLoader: Send + Sync + 'static {
    type Oracle: SegmentationOracle + 'static;

    /// Download or construct the oracle
    ///
    /// # Errors
    /// - Any failure while preparing the oracle; the cache discards it and a
    ///   later call may try again
    async fn load(&self) -> Result<Self::Oracle>;
}
