//! Core data types flowing through the pipeline

use crate::error::{BgCutError, Result};
use crate::services::ImageEncoder;
use image::RgbaImage;
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// RGBA8 raster owned by one pipeline invocation
pub type RasterImage = RgbaImage;

/// Per-pixel background probability reported by the oracle
///
/// Values lie in `[0, 1]`; higher means more likely background. The array is
/// shaped `(height, width)` and always matches the normalized raster.
#[derive(Debug, Clone, PartialEq)]
pub struct ForegroundMask {
    data: Array2<f32>,
}

impl ForegroundMask {
    /// Build a mask from row-major values
    ///
    /// # Errors
    /// - `values.len()` differs from `width * height`
    pub fn from_vec(width: u32, height: u32, values: Vec<f32>) -> Result<Self> {
        let expected = width as usize * height as usize;
        if values.len() != expected {
            return Err(BgCutError::invalid_segmentation(format!(
                "Mask has {} values, expected {} for {}x{}",
                values.len(),
                expected,
                width,
                height
            )));
        }
        let data = Array2::from_shape_vec((height as usize, width as usize), values)
            .map_err(|e| BgCutError::invalid_segmentation(format!("Mask shape error: {}", e)))?;
        Ok(Self { data })
    }

    /// Mask with the same probability everywhere
    #[must_use]
    pub fn uniform(width: u32, height: u32, value: f32) -> Self {
        Self {
            data: Array2::from_elem((height as usize, width as usize), value),
        }
    }

    /// Mask computed per pixel from `(x, y)`
    pub fn from_fn<F: Fn(u32, u32) -> f32>(width: u32, height: u32, f: F) -> Self {
        Self {
            data: Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
                f(x as u32, y as u32)
            }),
        }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.data.ncols() as u32
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.data.nrows() as u32
    }

    /// `(width, height)`
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Probability at `(x, y)`
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Option<f32> {
        self.data.get((y as usize, x as usize)).copied()
    }

    #[must_use]
    pub fn as_array(&self) -> &Array2<f32> {
        &self.data
    }

    /// Number of pixels whose background probability is below `cutoff`
    #[must_use]
    pub fn foreground_pixels(&self, cutoff: f32) -> usize {
        self.data.iter().filter(|&&value| value < cutoff).count()
    }

    /// Per-pixel minimum of two masks, keeping foreground from either
    ///
    /// # Errors
    /// - The masks differ in size
    pub fn union(&self, other: &Self) -> Result<Self> {
        if self.dimensions() != other.dimensions() {
            return Err(BgCutError::invalid_segmentation(format!(
                "Cannot merge a {}x{} mask with a {}x{} mask",
                self.width(),
                self.height(),
                other.width(),
                other.height()
            )));
        }
        let data = Zip::from(&self.data)
            .and(&other.data)
            .map_collect(|&a, &b| a.min(b));
        Ok(Self { data })
    }
}

/// Per-pixel alpha derived from a `ForegroundMask`
///
/// 0 is fully transparent (background), 255 fully opaque (foreground).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlphaBuffer {
    data: Array2<u8>,
}

impl AlphaBuffer {
    pub(crate) fn from_array(data: Array2<u8>) -> Self {
        Self { data }
    }

    /// Build an alpha buffer from row-major values
    ///
    /// # Errors
    /// - `values.len()` differs from `width * height`
    pub fn from_vec(width: u32, height: u32, values: Vec<u8>) -> Result<Self> {
        let data = Array2::from_shape_vec((height as usize, width as usize), values)
            .map_err(|e| BgCutError::processing(format!("Alpha buffer shape error: {}", e)))?;
        Ok(Self { data })
    }

    /// Alpha buffer with the same value everywhere
    #[must_use]
    pub fn uniform(width: u32, height: u32, value: u8) -> Self {
        Self {
            data: Array2::from_elem((height as usize, width as usize), value),
        }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.data.ncols() as u32
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.data.nrows() as u32
    }

    /// `(width, height)`
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Alpha at `(x, y)`
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Option<u8> {
        self.data.get((y as usize, x as usize)).copied()
    }

    #[must_use]
    pub fn as_array(&self) -> &Array2<u8> {
        &self.data
    }

    /// Row-major copy of the alpha values
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.iter().copied().collect()
    }
}

/// One segment of an oracle reply after validation
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub label: String,
    pub score: Option<f32>,
    pub mask: ForegroundMask,
}

/// Validated, non-empty oracle reply
///
/// The segment at index 0 is the one the pipeline cuts out.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationResult {
    segments: Vec<Segment>,
}

impl SegmentationResult {
    /// # Errors
    /// - `segments` is empty
    pub fn new(segments: Vec<Segment>) -> Result<Self> {
        if segments.is_empty() {
            return Err(BgCutError::invalid_segmentation(
                "Segmentation result contains no segments",
            ));
        }
        Ok(Self { segments })
    }

    /// The selected segment
    #[must_use]
    #[allow(clippy::indexing_slicing)]
    pub fn primary(&self) -> &Segment {
        // Non-empty by construction
        &self.segments[0]
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Consume the result, keeping only the selected segment
    #[must_use]
    pub fn into_primary(self) -> Segment {
        let mut segments = self.segments;
        segments.swap_remove(0)
    }
}

/// Per-stage timings of one invocation, in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTimings {
    pub decode_ms: u64,
    pub normalize_ms: u64,
    pub model_load_ms: u64,
    pub segmentation_ms: u64,
    pub refine_ms: u64,
    pub composite_ms: u64,
    pub encode_ms: u64,
    pub total_ms: u64,
}

/// Output of one pipeline invocation
#[derive(Debug, Clone)]
pub struct RemovalResult {
    /// PNG encoded RGBA8 image with the background made transparent
    pub blob: Vec<u8>,
    /// Width of the output raster (after normalization)
    pub width: u32,
    /// Height of the output raster (after normalization)
    pub height: u32,
    /// Dimensions of the decoded input before normalization
    pub original_dimensions: (u32, u32),
    /// Whether the normalizer rescaled the input
    pub resized: bool,
    /// Label of the segment used for the cutout
    pub segment_label: String,
    pub timings: ProcessingTimings,
}

impl RemovalResult {
    /// `(width, height)` of the output raster
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Decode the PNG blob back into a raster
    pub fn decode(&self) -> Result<RasterImage> {
        ImageEncoder::decode_png(&self.blob)
    }

    /// Write the PNG blob to `path`
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, &self.blob)
            .map_err(|e| BgCutError::file_io_error("write output image", path, &e))
    }

    /// Take ownership of the PNG blob
    #[must_use]
    pub fn into_blob(self) -> Vec<u8> {
        self.blob
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_from_vec_layout() {
        let mask = ForegroundMask::from_vec(3, 2, vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.5]).unwrap();
        assert_eq!(mask.dimensions(), (3, 2));
        assert_eq!(mask.get(2, 0), Some(0.2));
        assert_eq!(mask.get(0, 1), Some(0.3));
        assert_eq!(mask.get(3, 0), None);
    }

    #[test]
    fn test_mask_length_mismatch() {
        let result = ForegroundMask::from_vec(4, 4, vec![0.0; 15]);
        assert!(matches!(
            result,
            Err(BgCutError::InvalidSegmentationResult(_))
        ));
    }

    #[test]
    fn test_foreground_pixel_count() {
        let mask = ForegroundMask::from_fn(10, 10, |x, _| if x < 4 { 0.1 } else { 0.9 });
        assert_eq!(mask.foreground_pixels(0.5), 40);
    }

    #[test]
    fn test_mask_union_takes_minimum() {
        let left = ForegroundMask::from_fn(4, 2, |x, _| if x < 2 { 0.1 } else { 0.8 });
        let right = ForegroundMask::from_fn(4, 2, |x, _| if x < 2 { 0.6 } else { 0.3 });
        let merged = left.union(&right).unwrap();
        assert_eq!(merged.get(0, 0), Some(0.1));
        assert_eq!(merged.get(3, 1), Some(0.3));

        let other_size = ForegroundMask::uniform(2, 2, 0.0);
        assert!(left.union(&other_size).is_err());
    }

    #[test]
    fn test_alpha_buffer_row_major() {
        let alpha = AlphaBuffer::from_vec(2, 2, vec![1, 2, 3, 4]).unwrap();
        assert_eq!(alpha.get(1, 0), Some(2));
        assert_eq!(alpha.get(0, 1), Some(3));
        assert_eq!(alpha.to_vec(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_empty_segmentation_result_rejected() {
        assert!(SegmentationResult::new(Vec::new()).is_err());
    }

    #[test]
    fn test_primary_segment() {
        let result = SegmentationResult::new(vec![
            Segment {
                label: "person".to_string(),
                score: Some(0.98),
                mask: ForegroundMask::uniform(2, 2, 0.0),
            },
            Segment {
                label: "wall".to_string(),
                score: Some(0.7),
                mask: ForegroundMask::uniform(2, 2, 1.0),
            },
        ])
        .unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result.primary().label, "person");
        assert_eq!(result.into_primary().label, "person");
    }
}
