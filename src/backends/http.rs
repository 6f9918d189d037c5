//! HTTP segmentation oracle
//!
//! Talks to a Hugging Face style image-segmentation inference endpoint. The
//! request carries the base64 encoded intermediate and the threshold; the
//! reply is a JSON array of `{ label, score, mask }` where `mask` is a base64
//! PNG painting the segment white on black.

use crate::error::{BgCutError, Result};
use crate::inference::{OracleLoader, OracleSegment, SegmentationOracle};
use async_trait::async_trait;
use image::imageops::{self, FilterType};
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};
use std::io::Cursor;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Hosted inference API prefix
pub const HUGGINGFACE_INFERENCE_URL: &str = "https://api-inference.huggingface.co/models";

/// Panoptic segmentation model used when none is configured
pub const DEFAULT_MODEL: &str = "facebook/detr-resnet-50-panoptic";

/// Connection settings for [`HttpOracle`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpOracleConfig {
    pub endpoint: String,
    pub api_token: Option<String>,
    pub timeout: Duration,
    /// Probe the endpoint with a `GET` while loading
    pub health_check: bool,
}

impl HttpOracleConfig {
    pub fn new<S: Into<String>>(endpoint: S) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_token: None,
            timeout: Duration::from_secs(60),
            health_check: false,
        }
    }

    /// Endpoint of a model on the hosted inference API
    #[must_use]
    pub fn huggingface(model: &str, api_token: Option<String>) -> Self {
        Self {
            api_token,
            ..Self::new(format!("{}/{}", HUGGINGFACE_INFERENCE_URL, model))
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.api_token = token;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_health_check(mut self, enabled: bool) -> Self {
        self.health_check = enabled;
        self
    }

    fn validate(&self) -> Result<()> {
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(BgCutError::invalid_config(format!(
                "Oracle endpoint must be an http(s) URL, got '{}'",
                self.endpoint
            )));
        }
        if self.timeout.is_zero() {
            return Err(BgCutError::invalid_config("Oracle timeout must be non-zero"));
        }
        Ok(())
    }
}

impl Default for HttpOracleConfig {
    fn default() -> Self {
        Self::huggingface(DEFAULT_MODEL, None)
    }
}

#[serde_as]
#[derive(Serialize)]
struct SegmentationRequest<'a> {
    #[serde_as(as = "Base64")]
    inputs: &'a [u8],
    parameters: RequestParameters,
}

#[derive(Serialize)]
struct RequestParameters {
    threshold: f32,
}

#[serde_as]
#[derive(Deserialize, Debug)]
struct ReplySegment {
    label: String,
    #[serde(default)]
    score: Option<f32>,
    #[serde_as(as = "Option<Base64>")]
    mask: Option<Vec<u8>>,
}

/// [`SegmentationOracle`] backed by an HTTP inference endpoint
pub struct HttpOracle {
    client: Client,
    config: HttpOracleConfig,
}

impl HttpOracle {
    /// Build the HTTP client without contacting the endpoint
    ///
    /// # Errors
    /// - Invalid endpoint or timeout
    /// - The HTTP client cannot be constructed
    pub fn new(config: HttpOracleConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BgCutError::oracle("load", format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    async fn health_check(&self) -> Result<()> {
        let mut request = self.client.get(&self.config.endpoint);
        if let Some(token) = &self.config.api_token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| BgCutError::oracle("load", format!("Endpoint unreachable: {}", e)))?;

        if response.status().is_server_error() {
            return Err(BgCutError::oracle(
                "load",
                format!("HTTP error {} for {}", response.status(), self.config.endpoint),
            ));
        }
        Ok(())
    }

    /// Turn a reply body into oracle segments sized `width` x `height`
    ///
    /// Masks that cannot be decoded are reported as missing; the invoker
    /// decides whether that is fatal.
    ///
    /// # Errors
    /// - `BgCutError::InvalidSegmentationResult` when the body is not a JSON
    ///   array of segments
    pub fn parse_reply(body: &[u8], width: u32, height: u32) -> Result<Vec<OracleSegment>> {
        let segments: Vec<ReplySegment> = serde_json::from_slice(body).map_err(|e| {
            BgCutError::invalid_segmentation(format!("Oracle reply is not a segment list: {}", e))
        })?;

        Ok(segments
            .into_iter()
            .map(|segment| OracleSegment {
                mask: segment
                    .mask
                    .as_deref()
                    .and_then(|png| decode_mask(png, width, height)),
                label: segment.label,
                score: segment.score,
            })
            .collect())
    }
}

/// Decode a white-on-black PNG mask into background likelihood
fn decode_mask(png: &[u8], width: u32, height: u32) -> Option<Vec<f32>> {
    let decoded = match image::load_from_memory(png) {
        Ok(image) => image.to_luma8(),
        Err(e) => {
            debug!(error = %e, "Undecodable mask in oracle reply");
            return None;
        },
    };

    let luma = if decoded.dimensions() == (width, height) {
        decoded
    } else {
        imageops::resize(&decoded, width, height, FilterType::Triangle)
    };

    Some(
        luma.pixels()
            .map(|pixel| 1.0 - f32::from(pixel[0]) / 255.0)
            .collect(),
    )
}

#[async_trait]
impl SegmentationOracle for HttpOracle {
    #[instrument(skip(self, image), fields(endpoint = %self.config.endpoint, bytes = image.len()))]
    async fn segment(&self, image: &[u8], threshold: f32) -> Result<Vec<OracleSegment>> {
        let (width, height) = image::ImageReader::new(Cursor::new(image))
            .with_guessed_format()
            .map_err(|e| BgCutError::oracle("segment", e.to_string()))?
            .into_dimensions()
            .map_err(|e| BgCutError::oracle("segment", format!("Unreadable intermediate: {}", e)))?;

        let body = serde_json::to_vec(&SegmentationRequest {
            inputs: image,
            parameters: RequestParameters { threshold },
        })
        .map_err(|e| BgCutError::oracle("segment", format!("Failed to build request: {}", e)))?;

        let mut request = self
            .client
            .post(&self.config.endpoint)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(token) = &self.config.api_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BgCutError::oracle("segment", format!("Request failed: {}", e)))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| BgCutError::oracle("segment", format!("Failed to read reply: {}", e)))?;

        if !status.is_success() {
            return Err(BgCutError::oracle(
                "segment",
                format!("HTTP error {}: {}", status, String::from_utf8_lossy(&bytes)),
            ));
        }

        debug!(reply_bytes = bytes.len(), "Received oracle reply");
        Self::parse_reply(&bytes, width, height)
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// [`OracleLoader`] constructing an [`HttpOracle`]
pub struct HttpOracleLoader {
    config: HttpOracleConfig,
}

impl HttpOracleLoader {
    #[must_use]
    pub fn new(config: HttpOracleConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &HttpOracleConfig {
        &self.config
    }
}

#[async_trait]
impl OracleLoader for HttpOracleLoader {
    type Oracle = HttpOracle;

    async fn load(&self) -> Result<HttpOracle> {
        let oracle = HttpOracle::new(self.config.clone())?;
        if self.config.health_check {
            oracle.health_check().await?;
        }
        info!(endpoint = %oracle.endpoint(), "HTTP oracle configured");
        Ok(oracle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ImageEncoder;
    use image::{GrayImage, Luma, Rgba, RgbaImage};

    fn mask_png(width: u32, height: u32, subject_columns: u32) -> String {
        let gray = GrayImage::from_fn(width, height, |x, _| {
            if x < subject_columns {
                Luma([255])
            } else {
                Luma([0])
            }
        });
        let rgba = RgbaImage::from_fn(width, height, |x, y| {
            let v = gray.get_pixel(x, y)[0];
            Rgba([v, v, v, 255])
        });
        let png = ImageEncoder::encode_png(&rgba).unwrap();
        let request = serde_json::to_value(SegmentationRequest {
            inputs: &png,
            parameters: RequestParameters { threshold: 0.0 },
        })
        .unwrap();
        request["inputs"].as_str().unwrap().to_string()
    }

    #[test]
    fn test_parse_reply_inverts_mask() {
        let body = format!(
            r#"[{{ "label": "person", "score": 0.98, "mask": "{}" }}]"#,
            mask_png(4, 2, 2)
        );
        let segments = HttpOracle::parse_reply(body.as_bytes(), 4, 2).unwrap();

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].label, "person");
        assert_eq!(segments[0].score, Some(0.98));
        let mask = segments[0].mask.as_ref().unwrap();
        assert_eq!(mask, &vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_parse_reply_resizes_mask() {
        let body = format!(r#"[{{ "label": "cat", "mask": "{}" }}]"#, mask_png(8, 8, 8));
        let segments = HttpOracle::parse_reply(body.as_bytes(), 4, 4).unwrap();
        let mask = segments[0].mask.as_ref().unwrap();
        assert_eq!(mask.len(), 16);
        assert!(mask.iter().all(|&m| m < 0.01));
        assert_eq!(segments[0].score, None);
    }

    #[test]
    fn test_parse_reply_missing_or_broken_mask() {
        let body = br#"[{ "label": "a" }, { "label": "b", "mask": "bm90IGEgcG5n" }]"#;
        let segments = HttpOracle::parse_reply(body, 4, 4).unwrap();
        assert_eq!(segments.len(), 2);
        assert!(segments.iter().all(|s| s.mask.is_none()));
    }

    #[test]
    fn test_parse_reply_rejects_non_list() {
        let bodies: [&[u8]; 3] = [br#"{ "error": "Model is loading" }"#, b"<html>", b""];
        for body in bodies {
            assert!(matches!(
                HttpOracle::parse_reply(body, 4, 4),
                Err(BgCutError::InvalidSegmentationResult(_))
            ));
        }
    }

    #[test]
    fn test_request_body_shape() {
        let body = serde_json::to_value(SegmentationRequest {
            inputs: b"jpeg",
            parameters: RequestParameters { threshold: 0.5 },
        })
        .unwrap();
        assert_eq!(body["inputs"], "anBlZw==");
        assert_eq!(body["parameters"]["threshold"], 0.5);
    }

    #[test]
    fn test_config_validation() {
        assert!(HttpOracle::new(HttpOracleConfig::new("ftp://example.com")).is_err());
        assert!(
            HttpOracle::new(HttpOracleConfig::new("https://example.com").with_timeout(Duration::ZERO))
                .is_err()
        );

        let default = HttpOracleConfig::default();
        assert!(default.endpoint.ends_with(DEFAULT_MODEL));
        assert!(HttpOracle::new(default).is_ok());
    }

    #[tokio::test]
    async fn test_loader_without_health_check_does_not_connect() {
        let loader = HttpOracleLoader::new(HttpOracleConfig::new("http://127.0.0.1:9"));
        let oracle = loader.load().await.unwrap();
        assert_eq!(oracle.name(), "http");
    }
}
