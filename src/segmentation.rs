//! Oracle invocation and reply validation

use crate::error::{BgCutError, Result};
use crate::inference::{OracleSegment, SegmentationOracle};
use crate::services::ImageEncoder;
use crate::types::{ForegroundMask, RasterImage, Segment, SegmentationResult};
use crate::utils::NumericValidator;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

/// Mask value below which a pixel counts as foreground for area comparisons
const FOREGROUND_CUTOFF: f32 = 0.5;

/// Labels kept by [`SegmentSelection::default_allowlist`]
const DEFAULT_ALLOWED_LABELS: &[&str] = &[
    "person",
    "dog",
    "cat",
    "bird",
    "car",
    "bicycle",
    "motorcycle",
    "airplane",
    "potted plant",
    "flower",
];

/// Policy choosing which oracle segment becomes the cutout
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentSelection {
    /// Trust the oracle's ordering and take the first segment
    #[default]
    First,
    /// Take the segment with the most foreground pixels
    LargestArea,
    /// Take the first segment whose label contains one of the terms
    /// (case-insensitive)
    LabelAllowlist(Vec<String>),
    /// Merge every segment whose label contains one of the terms into a
    /// single cutout
    LabelUnion(Vec<String>),
}

impl SegmentSelection {
    /// Allowlist of common photo subjects
    #[must_use]
    pub fn default_allowlist() -> Self {
        Self::LabelAllowlist(default_labels())
    }

    /// Union of all common photo subjects found in the reply
    #[must_use]
    pub fn default_union() -> Self {
        Self::LabelUnion(default_labels())
    }

    /// Label terms of the allowlist and union policies
    #[must_use]
    pub fn labels(&self) -> Option<&[String]> {
        match self {
            SegmentSelection::LabelAllowlist(terms) | SegmentSelection::LabelUnion(terms) => {
                Some(terms)
            },
            SegmentSelection::First | SegmentSelection::LargestArea => None,
        }
    }

    /// Index of the selected segment, or `None` when nothing qualifies
    fn select(&self, segments: &[Segment]) -> Option<usize> {
        match self {
            SegmentSelection::First => (!segments.is_empty()).then_some(0),
            SegmentSelection::LargestArea => segments
                .iter()
                .enumerate()
                // Ties keep the earlier segment
                .rev()
                .max_by_key(|(_, segment)| segment.mask.foreground_pixels(FOREGROUND_CUTOFF))
                .map(|(index, _)| index),
            SegmentSelection::LabelAllowlist(terms) | SegmentSelection::LabelUnion(terms) => {
                let terms = lowercase_terms(terms);
                segments
                    .iter()
                    .position(|segment| label_matches(&terms, &segment.label))
            },
        }
    }
}

fn default_labels() -> Vec<String> {
    DEFAULT_ALLOWED_LABELS
        .iter()
        .map(ToString::to_string)
        .collect()
}

fn lowercase_terms(terms: &[String]) -> Vec<String> {
    terms.iter().map(|t| t.to_lowercase()).collect()
}

fn label_matches(lowercase_terms: &[String], label: &str) -> bool {
    let label = label.to_lowercase();
    lowercase_terms.iter().any(|term| label.contains(term.as_str()))
}

/// Encodes the raster, calls the oracle and validates what comes back
pub struct SegmentationInvoker;

impl SegmentationInvoker {
    /// Segment `image` with `oracle`
    ///
    /// The selected segment is moved to index 0 of the result.
    ///
    /// # Arguments
    /// * `threshold` - Minimum detection confidence, forwarded to the oracle
    /// * `jpeg_quality` - Quality (1-100) of the intermediate sent to the oracle
    /// * `selection` - Which segment to put first
    ///
    /// # Errors
    /// - `BgCutError::Oracle` when the oracle call fails
    /// - `BgCutError::InvalidSegmentationResult` for an empty reply, a
    ///   selected segment without a usable mask, or no segment matching the
    ///   selection policy
    #[instrument(skip(oracle, image, selection), fields(oracle = oracle.name(), width = image.width(), height = image.height()))]
    pub async fn segment<O: SegmentationOracle + ?Sized>(
        oracle: &O,
        image: &RasterImage,
        threshold: f32,
        jpeg_quality: u8,
        selection: &SegmentSelection,
    ) -> Result<SegmentationResult> {
        let encoded = ImageEncoder::encode_intermediate(image, jpeg_quality)?;
        debug!(bytes = encoded.len(), "Encoded intermediate for oracle");

        let reply = oracle
            .segment(&encoded, threshold)
            .await
            .map_err(|e| match e {
                BgCutError::Oracle { .. } | BgCutError::InvalidSegmentationResult(_) => e,
                other => BgCutError::oracle("segment", other.to_string()),
            })?;
        debug!(segments = reply.len(), "Oracle replied");

        Self::validate_reply(reply, image.width(), image.height(), selection)
    }

    /// Validate a raw oracle reply against the submitted raster size
    ///
    /// Segments other than the selected one are dropped when their mask is
    /// missing or malformed.
    pub fn validate_reply(
        reply: Vec<OracleSegment>,
        width: u32,
        height: u32,
        selection: &SegmentSelection,
    ) -> Result<SegmentationResult> {
        if reply.is_empty() {
            return Err(BgCutError::invalid_segmentation(
                "Oracle returned no segments",
            ));
        }

        // First selects before looking at any mask, so a missing mask on the
        // leading segment is reported rather than skipped
        if *selection == SegmentSelection::First {
            let first = reply.into_iter().next().ok_or_else(|| {
                BgCutError::invalid_segmentation("Oracle returned no segments")
            })?;
            let segment = Self::lift_segment(first, width, height)?;
            return SegmentationResult::new(vec![segment]);
        }

        let expected = NumericValidator::pixel_count(width, height)?;
        let mut segments = Vec::with_capacity(reply.len());
        for raw in reply {
            let label = raw.label.clone();
            match Self::lift_segment(raw, width, height) {
                Ok(segment) => segments.push(segment),
                Err(e) => warn!(label = %label, expected, error = %e, "Dropping unusable segment"),
            }
        }

        let Some(index) = selection.select(&segments) else {
            return Err(BgCutError::invalid_segmentation(format!(
                "No segment matches selection policy {:?} ({} usable segments)",
                selection,
                segments.len()
            )));
        };

        if let SegmentSelection::LabelUnion(terms) = selection {
            let merged = Self::merge_matching(&segments, terms)?;
            debug!(label = %merged.label, "Merged matching segments");
            segments.insert(0, merged);
            return SegmentationResult::new(segments);
        }

        let selected = segments.remove(index);
        segments.insert(0, selected);
        SegmentationResult::new(segments)
    }

    /// Combine every segment matching `terms` into one; a pixel is as
    /// foreground as the most confident matching mask says
    fn merge_matching(segments: &[Segment], terms: &[String]) -> Result<Segment> {
        let terms = lowercase_terms(terms);
        let mut matching = segments
            .iter()
            .filter(|segment| label_matches(&terms, &segment.label));

        let first = matching.next().ok_or_else(|| {
            BgCutError::invalid_segmentation("No segment matches the label union")
        })?;
        let mut merged = Segment {
            label: first.label.clone(),
            score: first.score,
            mask: first.mask.clone(),
        };
        for segment in matching {
            merged.mask = merged.mask.union(&segment.mask)?;
            merged.label = format!("{}+{}", merged.label, segment.label);
            merged.score = match (merged.score, segment.score) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
        }

        Ok(merged)
    }

    fn lift_segment(raw: OracleSegment, width: u32, height: u32) -> Result<Segment> {
        let values = raw.mask.ok_or_else(|| {
            BgCutError::invalid_segmentation(format!("Segment '{}' has no mask", raw.label))
        })?;
        let expected = NumericValidator::pixel_count(width, height)?;
        let values = NumericValidator::validate_probabilities(values, expected)?;
        let mask = ForegroundMask::from_vec(width, height, values)?;

        Ok(Segment {
            label: raw.label,
            score: raw.score,
            mask,
        })
    }
}
