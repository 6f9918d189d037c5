//! Configuration types for background removal operations

use crate::error::{BgCutError, Result};
use crate::segmentation::SegmentSelection;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Bounds enforced on the raster before it is handed to the oracle
///
/// The bounds are applied one rule at a time, so a very narrow image that is
/// scaled up to `min_dimension` can end with its long side far above
/// `max_dimension`. With `min_dimension == max_dimension` a 1x1024 input
/// becomes 1024x1048576, a raster of roughly 4 GiB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionConstraints {
    /// Largest allowed side, larger images are scaled down
    pub max_dimension: u32,
    /// Smallest allowed side, smaller images are scaled up
    pub min_dimension: u32,
}

impl Default for DimensionConstraints {
    fn default() -> Self {
        Self {
            max_dimension: 1024,
            min_dimension: 24,
        }
    }
}

impl DimensionConstraints {
    /// Create validated constraints
    ///
    /// # Errors
    /// - Either bound is zero
    /// - `min_dimension` exceeds `max_dimension`
    pub fn new(max_dimension: u32, min_dimension: u32) -> Result<Self> {
        let constraints = Self {
            max_dimension,
            min_dimension,
        };
        constraints.validate()?;
        Ok(constraints)
    }

    /// Check `0 < min_dimension <= max_dimension`
    pub fn validate(&self) -> Result<()> {
        if self.min_dimension == 0 || self.max_dimension == 0 {
            return Err(BgCutError::invalid_config(format!(
                "Dimension bounds must be positive (min: {}, max: {})",
                self.min_dimension, self.max_dimension
            )));
        }
        if self.min_dimension > self.max_dimension {
            return Err(BgCutError::invalid_config(format!(
                "min_dimension ({}) must not exceed max_dimension ({})",
                self.min_dimension, self.max_dimension
            )));
        }
        Ok(())
    }
}

/// Resampling filter used by the dimension normalizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeFilter {
    Nearest,
    #[default]
    Triangle,
    CatmullRom,
    Gaussian,
    Lanczos3,
}

impl From<ResizeFilter> for FilterType {
    fn from(filter: ResizeFilter) -> Self {
        match filter {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Triangle => FilterType::Triangle,
            ResizeFilter::CatmullRom => FilterType::CatmullRom,
            ResizeFilter::Gaussian => FilterType::Gaussian,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// How background probabilities are mapped to alpha
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RefinementPolicy {
    /// Single cutoff, no soft edge: below is opaque, otherwise transparent
    Binary { cutoff: f32 },
    /// Opaque below `low`, transparent above `high`, linear ramp in between
    SoftBand { low: f32, high: f32 },
}

impl Default for RefinementPolicy {
    fn default() -> Self {
        Self::SoftBand {
            low: 0.3,
            high: 0.7,
        }
    }
}

/// Neighbourhood averaged by the edge smoothing pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmoothingKernel {
    /// The pixel and its four orthogonal neighbours
    #[default]
    Cross,
    /// The full 3x3 neighbourhood
    Box3x3,
}

/// Edge smoothing settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    pub enabled: bool,
    /// Smoothing runs only when `width * height` exceeds this value
    pub min_pixels: u64,
    pub kernel: SmoothingKernel,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_pixels: 10_000,
            kernel: SmoothingKernel::default(),
        }
    }
}

/// Mask refinement settings
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementConfig {
    pub policy: RefinementPolicy,
    pub smoothing: SmoothingConfig,
}

/// Configuration for the background removal pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Raster size bounds applied before segmentation
    pub constraints: DimensionConstraints,

    /// Minimum confidence for the oracle to report a segment (0.0-1.0)
    pub threshold: f32,

    /// Quality of the intermediate image sent to the oracle (0.0-1.0]
    pub encode_quality: f32,

    /// Probability mask to alpha conversion
    pub refinement: RefinementConfig,

    /// Which oracle segment becomes the cutout
    pub segment_selection: SegmentSelection,

    /// Filter used when the normalizer rescales the input
    pub resize_filter: ResizeFilter,

    /// Enable debug mode (additional logging)
    pub debug: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            constraints: DimensionConstraints::default(),
            threshold: 0.5,
            encode_quality: 0.8,
            refinement: RefinementConfig::default(),
            segment_selection: SegmentSelection::default(),
            resize_filter: ResizeFilter::default(),
            debug: false,
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder for fluent API construction
    ///
    /// # Examples
    ///
    /// ```rust
    /// use bgcut::{PipelineConfig, RefinementPolicy};
    ///
    /// let config = PipelineConfig::builder()
    ///     .max_dimension(800)
    ///     .threshold(0.4)
    ///     .refinement_policy(RefinementPolicy::Binary { cutoff: 0.5 })
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.constraints.max_dimension, 800);
    /// ```
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Validate all configuration parameters
    ///
    /// # Validation Rules
    ///
    /// - Dimension bounds: `0 < min_dimension <= max_dimension`
    /// - Threshold: 0.0-1.0 (inclusive)
    /// - Encode quality: greater than 0.0, at most 1.0
    /// - Binary cutoff: 0.0-1.0; soft band: `0.0 <= low <= high <= 1.0`
    /// - Label allowlist: at least one label
    ///
    /// # Errors
    /// Returns `BgCutError::InvalidConfig` naming the first offending value.
    ///
    /// ```rust
    /// use bgcut::PipelineConfig;
    ///
    /// let mut config = PipelineConfig::default();
    /// assert!(config.validate().is_ok());
    ///
    /// config.threshold = 1.5;
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<()> {
        self.constraints.validate()?;

        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(BgCutError::config_value_error(
                "threshold",
                self.threshold,
                "0.0-1.0",
                Some(0.5),
            ));
        }

        if !(self.encode_quality > 0.0 && self.encode_quality <= 1.0) {
            return Err(BgCutError::config_value_error(
                "encode quality",
                self.encode_quality,
                "(0.0-1.0]",
                Some(0.8),
            ));
        }

        match self.refinement.policy {
            RefinementPolicy::Binary { cutoff } => {
                if !(0.0..=1.0).contains(&cutoff) {
                    return Err(BgCutError::config_value_error(
                        "binary cutoff",
                        cutoff,
                        "0.0-1.0",
                        Some(0.5),
                    ));
                }
            },
            RefinementPolicy::SoftBand { low, high } => {
                if !(0.0..=1.0).contains(&low) || !(0.0..=1.0).contains(&high) || low > high {
                    return Err(BgCutError::invalid_config(format!(
                        "Soft band requires 0.0 <= low <= high <= 1.0, got low={} high={}",
                        low, high
                    )));
                }
            },
        }

        if let Some(labels) = self.segment_selection.labels() {
            if labels.iter().all(|label| label.trim().is_empty()) {
                return Err(BgCutError::invalid_config(
                    "Label selection must contain at least one non-empty label",
                ));
            }
        }

        Ok(())
    }

    /// JPEG quality (1-100) derived from `encode_quality`
    #[must_use]
    pub fn jpeg_quality(&self) -> u8 {
        (self.encode_quality * 100.0).round().clamp(1.0, 100.0) as u8
    }

    /// Parse and validate a JSON configuration
    ///
    /// Missing fields fall back to their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| BgCutError::invalid_config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| BgCutError::file_io_error("read config file", path, &e))?;
        Self::from_json_str(&contents)
    }

    /// Serialize to pretty-printed JSON
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| BgCutError::invalid_config(format!("Failed to serialize config: {}", e)))
    }
}

/// Builder for `PipelineConfig` with fluent API
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// Set the largest allowed side
    #[must_use]
    pub fn max_dimension(mut self, max_dimension: u32) -> Self {
        self.config.constraints.max_dimension = max_dimension;
        self
    }

    /// Set the smallest allowed side
    #[must_use]
    pub fn min_dimension(mut self, min_dimension: u32) -> Self {
        self.config.constraints.min_dimension = min_dimension;
        self
    }

    /// Set both dimension bounds at once
    #[must_use]
    pub fn constraints(mut self, constraints: DimensionConstraints) -> Self {
        self.config.constraints = constraints;
        self
    }

    /// Set oracle detection threshold (clamped to 0.0-1.0)
    #[must_use]
    pub fn threshold(mut self, threshold: f32) -> Self {
        self.config.threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Set intermediate encode quality (clamped to 0.01-1.0)
    #[must_use]
    pub fn encode_quality(mut self, quality: f32) -> Self {
        self.config.encode_quality = quality.clamp(0.01, 1.0);
        self
    }

    /// Set the probability to alpha policy
    #[must_use]
    pub fn refinement_policy(mut self, policy: RefinementPolicy) -> Self {
        self.config.refinement.policy = policy;
        self
    }

    /// Enable or disable edge smoothing
    #[must_use]
    pub fn smoothing(mut self, enabled: bool) -> Self {
        self.config.refinement.smoothing.enabled = enabled;
        self
    }

    /// Set the smoothing neighbourhood
    #[must_use]
    pub fn smoothing_kernel(mut self, kernel: SmoothingKernel) -> Self {
        self.config.refinement.smoothing.kernel = kernel;
        self
    }

    /// Set the pixel count above which smoothing runs
    #[must_use]
    pub fn smoothing_min_pixels(mut self, min_pixels: u64) -> Self {
        self.config.refinement.smoothing.min_pixels = min_pixels;
        self
    }

    /// Set the segment selection policy
    #[must_use]
    pub fn segment_selection(mut self, selection: SegmentSelection) -> Self {
        self.config.segment_selection = selection;
        self
    }

    /// Set the resampling filter
    #[must_use]
    pub fn resize_filter(mut self, filter: ResizeFilter) -> Self {
        self.config.resize_filter = filter;
        self
    }

    /// Enable debug mode
    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    /// - Any value rejected by [`PipelineConfig::validate`]
    pub fn build(self) -> Result<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.constraints.max_dimension, 1024);
        assert_eq!(config.constraints.min_dimension, 24);
        assert!((config.threshold - 0.5).abs() < f32::EPSILON);
        assert!((config.encode_quality - 0.8).abs() < f32::EPSILON);
        assert_eq!(config.segment_selection, SegmentSelection::First);
        assert!(config.refinement.smoothing.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = PipelineConfig::builder()
            .max_dimension(512)
            .min_dimension(32)
            .threshold(0.4)
            .encode_quality(0.9)
            .smoothing(false)
            .debug(true)
            .build()
            .unwrap();

        assert_eq!(config.constraints.max_dimension, 512);
        assert_eq!(config.constraints.min_dimension, 32);
        assert!((config.threshold - 0.4).abs() < f32::EPSILON);
        assert!(!config.refinement.smoothing.enabled);
        assert!(config.debug);
    }

    #[test]
    fn test_builder_clamping() {
        let config = PipelineConfig::builder()
            .threshold(3.0)
            .encode_quality(0.0)
            .build()
            .unwrap();
        assert!((config.threshold - 1.0).abs() < f32::EPSILON);
        assert!((config.encode_quality - 0.01).abs() < f32::EPSILON);
        assert_eq!(config.jpeg_quality(), 1);
    }

    #[test]
    fn test_constraint_validation() {
        assert!(DimensionConstraints::new(1024, 24).is_ok());
        assert!(DimensionConstraints::new(64, 64).is_ok());
        assert!(DimensionConstraints::new(16, 24).is_err());
        assert!(DimensionConstraints::new(0, 0).is_err());

        let result = PipelineConfig::builder()
            .max_dimension(10)
            .min_dimension(20)
            .build();
        assert!(matches!(result, Err(BgCutError::InvalidConfig(_))));
    }

    #[test]
    fn test_refinement_validation() {
        let mut config = PipelineConfig::default();
        config.refinement.policy = RefinementPolicy::SoftBand {
            low: 0.8,
            high: 0.2,
        };
        assert!(config.validate().is_err());

        config.refinement.policy = RefinementPolicy::Binary { cutoff: 1.2 };
        let error = config.validate().unwrap_err();
        assert!(error.to_string().contains("binary cutoff"));

        config.refinement.policy = RefinementPolicy::Binary { cutoff: 0.5 };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_allowlist_rejected() {
        let mut config = PipelineConfig::default();
        config.segment_selection = SegmentSelection::LabelAllowlist(vec![String::new()]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_jpeg_quality_mapping() {
        let mut config = PipelineConfig::default();
        assert_eq!(config.jpeg_quality(), 80);
        config.encode_quality = 0.92;
        assert_eq!(config.jpeg_quality(), 92);
        config.encode_quality = 1.0;
        assert_eq!(config.jpeg_quality(), 100);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = PipelineConfig::from_json_str(
            r#"{ "threshold": 0.45, "constraints": { "max_dimension": 640, "min_dimension": 16 } }"#,
        )
        .unwrap();
        assert!((config.threshold - 0.45).abs() < f32::EPSILON);
        assert_eq!(config.constraints.max_dimension, 640);
        assert!((config.encode_quality - 0.8).abs() < f32::EPSILON);
        assert_eq!(config.refinement, RefinementConfig::default());
    }

    #[test]
    fn test_json_round_trip_of_tagged_enums() {
        let config = PipelineConfig::builder()
            .refinement_policy(RefinementPolicy::Binary { cutoff: 0.6 })
            .smoothing_kernel(SmoothingKernel::Box3x3)
            .segment_selection(SegmentSelection::LabelAllowlist(vec!["person".to_string()]))
            .build()
            .unwrap();

        let json = config.to_json_string().unwrap();
        assert!(json.contains("\"kind\": \"binary\""));
        assert!(json.contains("box3x3"));

        let parsed = PipelineConfig::from_json_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let result = PipelineConfig::from_json_str("{ not json");
        assert!(matches!(result, Err(BgCutError::InvalidConfig(_))));

        let result = PipelineConfig::from_json_str(r#"{ "threshold": 7.0 }"#);
        assert!(matches!(result, Err(BgCutError::InvalidConfig(_))));
    }

    #[test]
    fn test_config_file_loading() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bgcut.json");
        std::fs::write(&path, r#"{ "encode_quality": 0.9 }"#).unwrap();

        let config = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.jpeg_quality(), 90);

        let missing = PipelineConfig::from_json_file(dir.path().join("missing.json"));
        assert!(matches!(missing, Err(BgCutError::Io(_))));
    }

    #[test]
    fn test_resize_filter_conversion() {
        assert_eq!(FilterType::from(ResizeFilter::Triangle), FilterType::Triangle);
        assert_eq!(FilterType::from(ResizeFilter::Lanczos3), FilterType::Lanczos3);
    }
}
