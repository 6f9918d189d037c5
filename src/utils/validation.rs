//! Numeric validation of oracle output
//!
//! Oracle replies are untrusted: masks may be the wrong length or carry NaN
//! and out-of-range values. These helpers reject what cannot be used and
//! clamp what can.

use crate::error::{BgCutError, Result};

/// Validator for probability buffers and pixel arithmetic
pub struct NumericValidator;

impl NumericValidator {
    /// Pixel count of a `width` x `height` raster, checking for overflow
    pub fn pixel_count(width: u32, height: u32) -> Result<usize> {
        (width as usize).checked_mul(height as usize).ok_or_else(|| {
            BgCutError::processing(format!("Pixel count overflow: {} * {}", width, height))
        })
    }

    /// Validate a probability buffer against the expected pixel count
    ///
    /// Finite values are clamped into `[0, 1]`.
    ///
    /// # Errors
    /// - Length differs from `expected_len`
    /// - Any value is NaN or infinite
    pub fn validate_probabilities(values: Vec<f32>, expected_len: usize) -> Result<Vec<f32>> {
        if values.len() != expected_len {
            return Err(BgCutError::invalid_segmentation(format!(
                "Mask length {} does not match pixel count {}",
                values.len(),
                expected_len
            )));
        }

        if let Some(index) = values.iter().position(|value| !value.is_finite()) {
            return Err(BgCutError::invalid_segmentation(format!(
                "Mask value at index {} is not finite",
                index
            )));
        }

        let out_of_range = values
            .iter()
            .filter(|value| !(0.0..=1.0).contains(*value))
            .count();
        if out_of_range > 0 {
            tracing::warn!(
                out_of_range,
                "Clamping mask values outside [0, 1]"
            );
        }

        Ok(values
            .into_iter()
            .map(|value| value.clamp(0.0, 1.0))
            .collect())
    }
}
