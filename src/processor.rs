//! Background removal processor
//!
//! `BackgroundRemovalProcessor` runs one invocation through every stage:
//! decode, normalize, model load, segmentation, refinement, compositing and
//! encoding. Only model load and the oracle call suspend; everything else is
//! synchronous CPU work executed strictly in order.

use crate::{
    config::PipelineConfig,
    error::{BgCutError, Result},
    inference::OracleLoader,
    model_cache::ModelCache,
    refine::MaskRefiner,
    segmentation::SegmentationInvoker,
    services::{
        Compositor, ImageEncoder, NoOpProgressReporter, PipelineStatus, ProgressReporter,
        ProgressTracker,
    },
    types::{ProcessingTimings, RasterImage, RemovalResult},
    utils::DimensionNormalizer,
};
use image::DynamicImage;
use instant::Instant;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, span, Instrument, Level};

enum PipelineInput<'a> {
    Bytes(&'a [u8]),
    Image(&'a DynamicImage),
}

/// Runs the background removal pipeline against a shared model cache
///
/// The processor holds no per-invocation state, so one instance can serve
/// many concurrent invocations through `&self`.
pub struct BackgroundRemovalProcessor<L: OracleLoader> {
    config: PipelineConfig,
    model_cache: Arc<ModelCache<L>>,
    reporter: Arc<dyn ProgressReporter>,
}

impl<L: OracleLoader> BackgroundRemovalProcessor<L> {
    /// Create a processor owning a fresh model cache around `loader`
    ///
    /// # Errors
    /// - `config` fails validation
    pub fn new(config: PipelineConfig, loader: L) -> Result<Self> {
        Self::with_model_cache(config, Arc::new(ModelCache::new(loader)))
    }

    /// Create a processor sharing an existing model cache
    ///
    /// # Errors
    /// - `config` fails validation
    pub fn with_model_cache(config: PipelineConfig, model_cache: Arc<ModelCache<L>>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            model_cache,
            reporter: Arc::new(NoOpProgressReporter),
        })
    }

    /// Replace the progress reporter
    ///
    /// The reporter is shared by every invocation of this processor.
    #[must_use]
    pub fn with_progress_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn model_cache(&self) -> &Arc<ModelCache<L>> {
        &self.model_cache
    }

    /// Initialize the oracle ahead of the first invocation
    pub async fn warm_up(&self) -> Result<()> {
        self.model_cache.get_model().await.map(|_| ())
    }

    /// Remove the background from encoded image bytes
    ///
    /// # Errors
    /// - `InvalidInput` for undecodable bytes
    /// - `Oracle` when model loading or the oracle call fails
    /// - `InvalidSegmentationResult` for unusable oracle replies
    /// - `EncodingFailed` when the PNG blob cannot be produced
    pub async fn process(&self, image_bytes: &[u8]) -> Result<RemovalResult> {
        self.run(PipelineInput::Bytes(image_bytes), None).await
    }

    /// Like [`process`](Self::process), aborting at the next suspension
    /// point once `cancel` fires
    ///
    /// # Errors
    /// - `Cancelled` naming the interrupted stage
    /// - Everything [`process`](Self::process) returns
    pub async fn process_with_cancellation(
        &self,
        image_bytes: &[u8],
        cancel: &CancellationToken,
    ) -> Result<RemovalResult> {
        self.run(PipelineInput::Bytes(image_bytes), Some(cancel)).await
    }

    /// Remove the background from an already decoded image
    pub async fn process_image(&self, image: &DynamicImage) -> Result<RemovalResult> {
        self.run(PipelineInput::Image(image), None).await
    }

    /// Cancellable form of [`process_image`](Self::process_image)
    pub async fn process_image_with_cancellation(
        &self,
        image: &DynamicImage,
        cancel: &CancellationToken,
    ) -> Result<RemovalResult> {
        self.run(PipelineInput::Image(image), Some(cancel)).await
    }

    /// Read an image file and remove its background
    ///
    /// # Errors
    /// - `Io` when the file cannot be read
    /// - Everything [`process`](Self::process) returns
    pub async fn process_file<P: AsRef<Path>>(&self, input_path: P) -> Result<RemovalResult> {
        let path = input_path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| BgCutError::file_io_error("read input image", path, &e))?;
        self.process(&bytes).await
    }

    /// Drain an async reader and remove the background from its contents
    pub async fn process_reader<R: tokio::io::AsyncRead + Unpin>(
        &self,
        mut reader: R,
    ) -> Result<RemovalResult> {
        use tokio::io::AsyncReadExt;

        let mut buffer = Vec::new();
        reader
            .read_to_end(&mut buffer)
            .await
            .map_err(|e| BgCutError::processing(format!("Failed to read from stream: {}", e)))?;
        self.process(&buffer).await
    }

    async fn run(
        &self,
        input: PipelineInput<'_>,
        cancel: Option<&CancellationToken>,
    ) -> Result<RemovalResult> {
        let mut tracker = ProgressTracker::new(self.reporter.as_ref());
        let result = self.run_stages(input, cancel, &mut tracker).await;
        if let Err(ref e) = result {
            tracker.report_error(&e.to_string());
        }
        result
    }

    #[instrument(skip_all, fields(cancellable = cancel.is_some()))]
    async fn run_stages(
        &self,
        input: PipelineInput<'_>,
        cancel: Option<&CancellationToken>,
        tracker: &mut ProgressTracker<'_>,
    ) -> Result<RemovalResult> {
        let total_start = Instant::now();
        let mut timings = ProcessingTimings::default();
        let config = &self.config;

        tracker.report_status(PipelineStatus::Loading);
        check_cancelled(cancel, "decode")?;

        let decode_start = Instant::now();
        let image = {
            let _span = span!(Level::DEBUG, "decode").entered();
            decode(input)?
        };
        timings.decode_ms = decode_start.elapsed().as_millis() as u64;
        let original_dimensions = image.dimensions();

        let normalize_start = Instant::now();
        let (normalized, resized) = {
            let _span = span!(
                Level::DEBUG,
                "normalize",
                original_width = original_dimensions.0,
                original_height = original_dimensions.1
            )
            .entered();
            DimensionNormalizer::normalize(&image, &config.constraints, config.resize_filter)?
        };
        drop(image);
        timings.normalize_ms = normalize_start.elapsed().as_millis() as u64;
        let (width, height) = normalized.dimensions();
        debug!(width, height, resized, "Normalized input raster");

        let load_start = Instant::now();
        let oracle = cancellable(
            self.model_cache
                .get_model()
                .instrument(span!(Level::DEBUG, "model_load")),
            cancel,
            "model initialization",
        )
        .await?;
        timings.model_load_ms = load_start.elapsed().as_millis() as u64;

        tracker.report_status(PipelineStatus::Segmenting);
        let segmentation_start = Instant::now();
        let segmentation = cancellable(
            SegmentationInvoker::segment(
                oracle.as_ref(),
                &normalized,
                config.threshold,
                config.jpeg_quality(),
                &config.segment_selection,
            )
            .instrument(span!(Level::INFO, "segmentation", width, height)),
            cancel,
            "segmentation",
        )
        .await?;
        timings.segmentation_ms = segmentation_start.elapsed().as_millis() as u64;
        let segment = segmentation.into_primary();

        tracker.report_status(PipelineStatus::Refining);
        let refine_start = Instant::now();
        let alpha = {
            let _span = span!(Level::DEBUG, "refine", label = %segment.label).entered();
            MaskRefiner::refine(&segment.mask, &config.refinement)
        };
        timings.refine_ms = refine_start.elapsed().as_millis() as u64;

        if config.debug {
            let opaque = alpha.as_array().iter().filter(|&&a| a == u8::MAX).count();
            let transparent = alpha.as_array().iter().filter(|&&a| a == 0).count();
            debug!(
                label = %segment.label,
                score = ?segment.score,
                opaque,
                transparent,
                total = alpha.len(),
                "Refined alpha statistics"
            );
        }

        tracker.report_status(PipelineStatus::Compositing);
        let composite_start = Instant::now();
        let composited = {
            let _span = span!(Level::DEBUG, "composite").entered();
            Compositor::composite(&normalized, &alpha)?
        };
        timings.composite_ms = composite_start.elapsed().as_millis() as u64;

        let encode_start = Instant::now();
        let blob = {
            let _span = span!(Level::DEBUG, "encode").entered();
            ImageEncoder::encode_png(&composited)?
        };
        timings.encode_ms = encode_start.elapsed().as_millis() as u64;
        timings.total_ms = total_start.elapsed().as_millis() as u64;

        info!(
            width,
            height,
            resized,
            label = %segment.label,
            blob_bytes = blob.len(),
            total_ms = timings.total_ms,
            "Background removed"
        );
        tracker.report_completion(&timings);

        Ok(RemovalResult {
            blob,
            width,
            height,
            original_dimensions,
            resized,
            segment_label: segment.label,
            timings,
        })
    }
}

fn decode(input: PipelineInput<'_>) -> Result<RasterImage> {
    match input {
        PipelineInput::Bytes(bytes) => ImageEncoder::decode_input(bytes),
        PipelineInput::Image(image) => Ok(image.to_rgba8()),
    }
}

fn check_cancelled(cancel: Option<&CancellationToken>, stage: &str) -> Result<()> {
    match cancel {
        Some(token) if token.is_cancelled() => Err(BgCutError::cancelled(stage)),
        _ => Ok(()),
    }
}

/// Race `future` against the cancellation token, if any
async fn cancellable<T, F>(future: F, cancel: Option<&CancellationToken>, stage: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match cancel {
        None => future.await,
        Some(token) => {
            tokio::select! {
                biased;
                () = token.cancelled() => {
                    debug!(stage, "Invocation cancelled");
                    Err(BgCutError::cancelled(stage))
                },
                result = future => result,
            }
        },
    }
}
