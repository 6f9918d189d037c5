//! Mock segmentation oracle for testing and benchmarking
//!
//! Needs no network or model files. The mock decodes the intermediate it is
//! sent, so generated masks always match the submitted raster size.

use crate::error::{BgCutError, Result};
use crate::inference::{OracleLoader, OracleSegment, SegmentationOracle};
use async_trait::async_trait;
use instant::Duration;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type MaskFn = dyn Fn(u32, u32, u32, u32) -> f32 + Send + Sync;

#[derive(Clone)]
enum MockReply {
    /// Reply verbatim
    Fixed(Vec<OracleSegment>),
    /// One segment per entry, masks computed from `(x, y, width, height)`
    Generated(Vec<(String, Arc<MaskFn>)>),
    /// Fail every call
    Fail(String),
}

/// Record of one `segment` call
#[derive(Debug, Clone)]
pub struct OracleCall {
    pub threshold: f32,
    pub image_len: usize,
    /// First two bytes of the submitted image (the format signature)
    pub image_header: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Scriptable [`SegmentationOracle`]
///
/// Clones share call history.
#[derive(Clone)]
pub struct MockOracle {
    reply: MockReply,
    delay: Option<Duration>,
    calls: Arc<Mutex<Vec<OracleCall>>>,
}

impl std::fmt::Debug for MockOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockOracle")
            .field("delay", &self.delay)
            .field("calls", &self.call_count())
            .finish_non_exhaustive()
    }
}

impl MockOracle {
    fn from_reply(reply: MockReply) -> Self {
        Self {
            reply,
            delay: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every pixel is foreground
    #[must_use]
    pub fn foreground() -> Self {
        Self::with_mask_fn("person", |_, _, _, _| 0.0)
    }

    /// Every pixel is background
    #[must_use]
    pub fn background() -> Self {
        Self::with_mask_fn("wall", |_, _, _, _| 1.0)
    }

    /// Foreground rectangle covering the middle half of the image
    #[must_use]
    pub fn centered_subject() -> Self {
        Self::with_mask_fn("person", |x, y, width, height| {
            let inside_x = x >= width / 4 && x < width - width / 4;
            let inside_y = y >= height / 4 && y < height - height / 4;
            if inside_x && inside_y {
                0.0
            } else {
                1.0
            }
        })
    }

    /// Single segment with a mask computed from `(x, y, width, height)`
    pub fn with_mask_fn<F>(label: &str, mask: F) -> Self
    where
        F: Fn(u32, u32, u32, u32) -> f32 + Send + Sync + 'static,
    {
        Self::from_reply(MockReply::Generated(vec![(label.to_string(), Arc::new(mask))]))
    }

    /// Add another generated segment after the existing ones
    #[must_use]
    pub fn and_segment<F>(mut self, label: &str, mask: F) -> Self
    where
        F: Fn(u32, u32, u32, u32) -> f32 + Send + Sync + 'static,
    {
        if let MockReply::Generated(segments) = &mut self.reply {
            segments.push((label.to_string(), Arc::new(mask)));
        }
        self
    }

    /// Return `segments` verbatim, regardless of the image
    #[must_use]
    pub fn with_reply(segments: Vec<OracleSegment>) -> Self {
        Self::from_reply(MockReply::Fixed(segments))
    }

    /// Fail every call with an oracle error
    #[must_use]
    pub fn failing(message: &str) -> Self {
        Self::from_reply(MockReply::Fail(message.to_string()))
    }

    /// Sleep before replying
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Calls observed so far, oldest first
    #[must_use]
    pub fn calls(&self) -> Vec<OracleCall> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl SegmentationOracle for MockOracle {
    async fn segment(&self, image: &[u8], threshold: f32) -> Result<Vec<OracleSegment>> {
        let decoded = image::load_from_memory(image)
            .map_err(|e| BgCutError::oracle("segment", format!("Mock could not decode input: {}", e)))?;
        let (width, height) = (decoded.width(), decoded.height());

        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(OracleCall {
                threshold,
                image_len: image.len(),
                image_header: image.iter().take(2).copied().collect(),
                width,
                height,
            });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.reply {
            MockReply::Fixed(segments) => Ok(segments.clone()),
            MockReply::Fail(message) => Err(BgCutError::oracle("segment", message.clone())),
            MockReply::Generated(generators) => Ok(generators
                .iter()
                .map(|(label, mask_fn)| {
                    let mask = (0..height)
                        .flat_map(|y| (0..width).map(move |x| (x, y)))
                        .map(|(x, y)| mask_fn(x, y, width, height))
                        .collect();
                    OracleSegment::with_mask(label.clone(), mask)
                })
                .collect()),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// [`OracleLoader`] handing out clones of a [`MockOracle`]
///
/// Counts loads so tests can observe how often the model cache initializes.
pub struct MockOracleLoader {
    oracle: MockOracle,
    delay: Option<Duration>,
    failures_remaining: AtomicUsize,
    loads: AtomicUsize,
}

impl MockOracleLoader {
    #[must_use]
    pub fn new(oracle: MockOracle) -> Self {
        Self {
            oracle,
            delay: None,
            failures_remaining: AtomicUsize::new(0),
            loads: AtomicUsize::new(0),
        }
    }

    /// Sleep inside `load`, widening the window for racing callers
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the first `count` loads
    #[must_use]
    pub fn failing_first(self, count: usize) -> Self {
        self.failures_remaining.store(count, Ordering::SeqCst);
        self
    }

    /// Number of `load` calls so far, failed ones included
    #[must_use]
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// The oracle template; shares call history with every loaded clone
    #[must_use]
    pub fn oracle(&self) -> &MockOracle {
        &self.oracle
    }
}

#[async_trait]
impl OracleLoader for MockOracleLoader {
    type Oracle = MockOracle;

    async fn load(&self) -> Result<MockOracle> {
        self.loads.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let should_fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(BgCutError::oracle("load", "Mock oracle failed to load"));
        }

        Ok(self.oracle.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ImageEncoder;
    use image::{ImageBuffer, Rgba};

    fn encoded(width: u32, height: u32) -> Vec<u8> {
        let image = ImageBuffer::from_pixel(width, height, Rgba([10, 20, 30, 255]));
        ImageEncoder::encode_intermediate(&image, 80).unwrap()
    }

    #[tokio::test]
    async fn test_generated_mask_matches_image() {
        let oracle = MockOracle::centered_subject();
        let reply = oracle.segment(&encoded(8, 4), 0.5).await.unwrap();

        assert_eq!(reply.len(), 1);
        let mask = reply[0].mask.as_ref().unwrap();
        assert_eq!(mask.len(), 32);
        // Row 1, column 2 is inside the middle half
        assert_eq!(mask[8 + 2], 0.0);
        assert_eq!(mask[0], 1.0);
        assert_eq!(oracle.call_count(), 1);
    }

    #[tokio::test]
    async fn test_and_segment_appends() {
        let oracle = MockOracle::foreground().and_segment("sky", |_, _, _, _| 1.0);
        let reply = oracle.segment(&encoded(4, 4), 0.5).await.unwrap();
        let labels: Vec<_> = reply.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["person", "sky"]);
    }

    #[tokio::test]
    async fn test_failing_oracle() {
        let oracle = MockOracle::failing("offline");
        let error = oracle.segment(&encoded(4, 4), 0.5).await.unwrap_err();
        assert!(error.to_string().contains("offline"));
    }

    #[tokio::test]
    async fn test_loader_failures_then_success() {
        let loader = MockOracleLoader::new(MockOracle::foreground()).failing_first(2);
        assert!(loader.load().await.is_err());
        assert!(loader.load().await.is_err());
        assert!(loader.load().await.is_ok());
        assert_eq!(loader.load_count(), 3);
    }

    #[tokio::test]
    async fn test_loaded_clones_share_history() {
        let loader = MockOracleLoader::new(MockOracle::foreground());
        let oracle = loader.load().await.unwrap();
        oracle.segment(&encoded(4, 4), 0.3).await.unwrap();
        assert_eq!(loader.oracle().call_count(), 1);
    }
}
