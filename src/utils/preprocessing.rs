//! Dimension normalization applied before segmentation
//!
//! The oracle works best within a bounded size range, so the input raster is
//! rescaled (aspect ratio preserved) until both sides fall inside
//! [`DimensionConstraints`].

use crate::{
    config::{DimensionConstraints, ResizeFilter},
    error::{BgCutError, Result},
    types::RasterImage,
};

/// Rescales rasters into the configured dimension bounds
pub struct DimensionNormalizer;

impl DimensionNormalizer {
    /// Compute the normalized size for a `width` x `height` raster
    ///
    /// - Either side above `max_dimension`: scale down so the larger side
    ///   equals `max_dimension`.
    /// - Otherwise either side below `min_dimension`: scale up so the smaller
    ///   side equals `min_dimension`.
    /// - Otherwise unchanged.
    ///
    /// The other side is rounded to the nearest integer and never drops
    /// below one pixel.
    ///
    /// # Errors
    /// - `width` or `height` is zero
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn target_dimensions(
        width: u32,
        height: u32,
        constraints: &DimensionConstraints,
    ) -> Result<(u32, u32)> {
        if width == 0 || height == 0 {
            return Err(BgCutError::invalid_input(format!(
                "Cannot normalize a zero-sized image ({}x{})",
                width, height
            )));
        }

        let max = constraints.max_dimension;
        let min = constraints.min_dimension;
        let scale_side = |side: u32, numerator: u32, denominator: u32| -> u32 {
            let scaled = (f64::from(side) * f64::from(numerator) / f64::from(denominator)).round();
            (scaled as u32).max(1)
        };

        if width > max || height > max {
            if width >= height {
                Ok((max, scale_side(height, max, width)))
            } else {
                Ok((scale_side(width, max, height), max))
            }
        } else if width < min || height < min {
            if width <= height {
                Ok((min, scale_side(height, min, width)))
            } else {
                Ok((scale_side(width, min, height), min))
            }
        } else {
            Ok((width, height))
        }
    }

    /// Whether an upscaled size ends with its long side above `max_dimension`
    #[must_use]
    pub fn upscale_overshoots(
        target_width: u32,
        target_height: u32,
        constraints: &DimensionConstraints,
    ) -> bool {
        target_width.max(target_height) > constraints.max_dimension
    }

    /// Resample `image` into the constraint bounds
    ///
    /// Returns the normalized raster and whether any rescaling happened.
    /// An image already inside the bounds is returned as an identical copy.
    pub fn normalize(
        image: &RasterImage,
        constraints: &DimensionConstraints,
        filter: ResizeFilter,
    ) -> Result<(RasterImage, bool)> {
        let (width, height) = image.dimensions();
        let (target_width, target_height) =
            Self::target_dimensions(width, height, constraints)?;

        if (target_width, target_height) == (width, height) {
            return Ok((image.clone(), false));
        }

        tracing::debug!(
            from = %format!("{}x{}", width, height),
            to = %format!("{}x{}", target_width, target_height),
            "Rescaling input raster"
        );
        if Self::upscale_overshoots(target_width, target_height, constraints) {
            tracing::warn!(
                from = %format!("{}x{}", width, height),
                to = %format!("{}x{}", target_width, target_height),
                max_dimension = constraints.max_dimension,
                "Upscaling a narrow image past max_dimension; the raster may need a large allocation"
            );
        }

        let resized =
            image::imageops::resize(image, target_width, target_height, filter.into());
        Ok((resized, true))
    }
}
