#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # bgcut
//!
//! Background removal around an external segmentation oracle.
//!
//! The crate does not run a segmentation model itself. It prepares the input
//! raster, asks an oracle (an HTTP inference endpoint by default) which
//! pixels belong to the background, turns the reply into an alpha channel
//! and returns the photo as a transparent PNG.
//!
//! ## Pipeline
//!
//! 1. **Dimension normalization**: the decoded raster is scaled into
//!    `[min_dimension, max_dimension]`, keeping the aspect ratio
//! 2. **Segmentation**: the raster is sent to the oracle as a JPEG; the model
//!    handle comes from a lazily initialized [`ModelCache`]
//! 3. **Refinement**: background probabilities become alpha values, with
//!    optional edge smoothing
//! 4. **Compositing**: alpha replaces the raster's alpha channel, RGB stays
//!    untouched
//! 5. **Encoding**: the result is written as a lossless PNG
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # #[cfg(feature = "http")]
//! # async fn example() -> anyhow::Result<()> {
//! use bgcut::{
//!     remove_background_from_bytes, BackgroundRemovalProcessor, HttpOracleConfig,
//!     HttpOracleLoader, PipelineConfig,
//! };
//!
//! let loader = HttpOracleLoader::new(HttpOracleConfig::default()
//!     .with_token(std::env::var("HF_TOKEN").ok()));
//! let processor = BackgroundRemovalProcessor::new(PipelineConfig::default(), loader)?;
//!
//! let input = tokio::fs::read("photo.jpg").await?;
//! let result = remove_background_from_bytes(&input, &processor).await?;
//! result.save("photo_nobg.png")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing without a network
//!
//! [`MockOracle`] produces deterministic masks sized to whatever it is sent:
//!
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> bgcut::Result<()> {
//! use bgcut::{BackgroundRemovalProcessor, MockOracle, MockOracleLoader, PipelineConfig};
//!
//! let processor = BackgroundRemovalProcessor::new(
//!     PipelineConfig::default(),
//!     MockOracleLoader::new(MockOracle::centered_subject()),
//! )?;
//!
//! let image = image::RgbaImage::from_pixel(64, 64, image::Rgba([200, 80, 40, 255]));
//! let bytes = bgcut::services::ImageEncoder::encode_png(&image)?;
//! let result = processor.process(&bytes).await?;
//! assert_eq!(result.dimensions(), (64, 64));
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `http` (default): HTTP oracle backend (`reqwest`)
//! - `cli` (default): `bgcut` command-line tool and tracing setup
//! - `webp-support` (default): WebP input decoding
//! - `tracing-json`: JSON log output for the CLI

pub mod backends;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod inference;
pub mod model_cache;
pub mod processor;
pub mod refine;
pub mod segmentation;
pub mod services;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod utils;

use tokio::io::AsyncRead;

// Public API exports
pub use backends::*;
pub use config::{
    DimensionConstraints, PipelineConfig, PipelineConfigBuilder, RefinementConfig,
    RefinementPolicy, ResizeFilter, SmoothingConfig, SmoothingKernel,
};
pub use error::{BgCutError, Result};
pub use inference::{OracleLoader, OracleSegment, SegmentationOracle};
pub use model_cache::ModelCache;
pub use processor::BackgroundRemovalProcessor;
pub use refine::MaskRefiner;
pub use segmentation::{SegmentSelection, SegmentationInvoker};
pub use services::{
    Compositor, ConsoleProgressReporter, ImageEncoder, NoOpProgressReporter, PipelineStatus,
    ProgressReporter, ProgressTracker, ProgressUpdate, StatusWatcher,
};
pub use types::{
    AlphaBuffer, ForegroundMask, ProcessingTimings, RasterImage, RemovalResult, Segment,
    SegmentationResult,
};
pub use utils::{DimensionNormalizer, NumericValidator};

#[cfg(feature = "cli")]
pub use tracing_config::{TracingConfig, TracingFormat};

/// Remove the background from encoded image bytes
///
/// The one-call entry point for applications that only need the PNG blob:
/// `result.blob` holds the transparent image.
///
/// # Arguments
///
/// * `image_bytes` - Encoded input (JPEG, PNG, TIFF, WebP)
/// * `processor` - Processor carrying the configuration and shared model cache
pub async fn remove_background_from_bytes<L: OracleLoader>(
    image_bytes: &[u8],
    processor: &BackgroundRemovalProcessor<L>,
) -> Result<RemovalResult> {
    processor.process(image_bytes).await
}

/// Remove the background from everything an async reader yields
pub async fn remove_background_from_reader<R: AsyncRead + Unpin, L: OracleLoader>(
    reader: R,
    processor: &BackgroundRemovalProcessor<L>,
) -> Result<RemovalResult> {
    processor.process_reader(reader).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[tokio::test]
    async fn test_remove_background_from_bytes() {
        let processor = BackgroundRemovalProcessor::new(
            PipelineConfig::default(),
            MockOracleLoader::new(MockOracle::background()),
        )
        .unwrap();

        let image = RgbaImage::from_pixel(30, 30, Rgba([10, 20, 30, 255]));
        let bytes = ImageEncoder::encode_png(&image).unwrap();

        let result = remove_background_from_bytes(&bytes, &processor).await.unwrap();
        let decoded = result.decode().unwrap();
        assert!(decoded.pixels().all(|p| p[3] == 0 && p[0] == 10));

        let from_reader = remove_background_from_reader(bytes.as_slice(), &processor)
            .await
            .unwrap();
        assert_eq!(from_reader.blob, result.blob);
    }
}
