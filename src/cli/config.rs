//! Configuration conversion utilities for CLI arguments

use crate::backends::http::{HttpOracleConfig, DEFAULT_MODEL};
use crate::cli::main_impl::{Cli, SelectionArg};
use crate::config::{PipelineConfig, RefinementPolicy};
use crate::segmentation::SegmentSelection;
use anyhow::{Context, Result};
use std::time::Duration;

/// Environment variable consulted when `--token` is absent
pub(crate) const TOKEN_ENV_VAR: &str = "HF_TOKEN";

/// Convert CLI arguments into library configuration
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build the pipeline configuration
    ///
    /// Starts from `--config` when given, then applies individual flags.
    pub(crate) fn from_cli(cli: &Cli) -> Result<PipelineConfig> {
        let base = match &cli.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config file {}", path.display()))?,
            None => PipelineConfig::default(),
        };

        let mut builder = PipelineConfig::builder()
            .constraints(base.constraints)
            .threshold(base.threshold)
            .encode_quality(base.encode_quality)
            .refinement_policy(base.refinement.policy)
            .smoothing(base.refinement.smoothing.enabled)
            .smoothing_kernel(base.refinement.smoothing.kernel)
            .smoothing_min_pixels(base.refinement.smoothing.min_pixels)
            .segment_selection(base.segment_selection)
            .resize_filter(base.resize_filter)
            .debug(base.debug || cli.verbose >= 2);

        if let Some(max_dimension) = cli.max_dimension {
            builder = builder.max_dimension(max_dimension);
        }
        if let Some(min_dimension) = cli.min_dimension {
            builder = builder.min_dimension(min_dimension);
        }
        if let Some(threshold) = cli.threshold {
            builder = builder.threshold(threshold);
        }
        if let Some(quality) = cli.encode_quality {
            builder = builder.encode_quality(quality);
        }
        if let Some(cutoff) = cli.binary_cutoff {
            builder = builder.refinement_policy(RefinementPolicy::Binary { cutoff });
        }
        if cli.no_smoothing {
            builder = builder.smoothing(false);
        }
        if let Some(selection) = cli.select {
            builder = builder.segment_selection(Self::selection(selection, &cli.labels));
        }

        builder.build().context("Invalid configuration")
    }

    /// Build the HTTP oracle settings
    pub(crate) fn oracle_config(cli: &Cli) -> HttpOracleConfig {
        let token = cli
            .token
            .clone()
            .or_else(|| std::env::var(TOKEN_ENV_VAR).ok())
            .filter(|token| !token.is_empty());

        let config = match &cli.endpoint {
            Some(endpoint) => HttpOracleConfig::new(endpoint.clone()),
            None => HttpOracleConfig::huggingface(cli.model.as_deref().unwrap_or(DEFAULT_MODEL), None),
        };

        config
            .with_token(token)
            .with_timeout(Duration::from_secs(cli.timeout))
            .with_health_check(cli.health_check)
    }

    fn selection(selection: SelectionArg, labels: &[String]) -> SegmentSelection {
        match selection {
            SelectionArg::First => SegmentSelection::First,
            SelectionArg::Largest => SegmentSelection::LargestArea,
            SelectionArg::Labels if labels.is_empty() => SegmentSelection::default_allowlist(),
            SelectionArg::Labels => SegmentSelection::LabelAllowlist(labels.to_vec()),
            SelectionArg::Union if labels.is_empty() => SegmentSelection::default_union(),
            SelectionArg::Union => SegmentSelection::LabelUnion(labels.to_vec()),
        }
    }

    /// Validate CLI arguments for consistency
    pub(crate) fn validate_cli(cli: &Cli) -> Result<()> {
        if cli.jobs == 0 {
            anyhow::bail!("--jobs must be at least 1");
        }
        if cli.timeout == 0 {
            anyhow::bail!("--timeout must be at least 1 second");
        }
        if !cli.labels.is_empty()
            && !matches!(cli.select, Some(SelectionArg::Labels | SelectionArg::Union))
        {
            anyhow::bail!("--label requires --select labels or --select union");
        }
        if cli.endpoint.is_some() && cli.model.is_some() {
            anyhow::bail!("--endpoint and --model are mutually exclusive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("bgcut").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults_match_library() {
        let cli = parse(&["photo.jpg"]);
        let config = CliConfigBuilder::from_cli(&cli).unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_flags_override_config() {
        let cli = parse(&[
            "photo.jpg",
            "--max-dimension",
            "512",
            "--threshold",
            "0.3",
            "--binary-cutoff",
            "0.6",
            "--no-smoothing",
            "--select",
            "labels",
            "--label",
            "dog",
        ]);
        let config = CliConfigBuilder::from_cli(&cli).unwrap();

        assert_eq!(config.constraints.max_dimension, 512);
        assert!((config.threshold - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.refinement.policy, RefinementPolicy::Binary { cutoff: 0.6 });
        assert!(!config.refinement.smoothing.enabled);
        assert_eq!(
            config.segment_selection,
            SegmentSelection::LabelAllowlist(vec!["dog".to_string()])
        );
    }

    #[test]
    fn test_union_selection() {
        let cli = parse(&["photo.jpg", "--select", "union", "--label", "person", "--label", "dog"]);
        CliConfigBuilder::validate_cli(&cli).unwrap();
        let config = CliConfigBuilder::from_cli(&cli).unwrap();
        assert_eq!(
            config.segment_selection,
            SegmentSelection::LabelUnion(vec!["person".to_string(), "dog".to_string()])
        );

        let cli = parse(&["photo.jpg", "--select", "union"]);
        let config = CliConfigBuilder::from_cli(&cli).unwrap();
        assert_eq!(config.segment_selection, SegmentSelection::default_union());
    }

    #[test]
    fn test_config_file_then_flags() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bgcut.json");
        std::fs::write(&path, r#"{ "threshold": 0.7, "encode_quality": 0.5 }"#).unwrap();

        let cli = parse(&["photo.jpg", "--config", path.to_str().unwrap(), "--threshold", "0.2"]);
        let config = CliConfigBuilder::from_cli(&cli).unwrap();
        assert!((config.threshold - 0.2).abs() < f32::EPSILON);
        assert_eq!(config.jpeg_quality(), 50);
    }

    #[test]
    fn test_invalid_dimensions_rejected() {
        let cli = parse(&["photo.jpg", "--max-dimension", "16", "--min-dimension", "32"]);
        assert!(CliConfigBuilder::from_cli(&cli).is_err());
    }

    #[test]
    fn test_oracle_config() {
        let cli = parse(&["photo.jpg", "--endpoint", "http://localhost:8080/segment", "--token", "abc"]);
        let oracle = CliConfigBuilder::oracle_config(&cli);
        assert_eq!(oracle.endpoint, "http://localhost:8080/segment");
        assert_eq!(oracle.api_token.as_deref(), Some("abc"));
        assert_eq!(oracle.timeout, Duration::from_secs(60));

        let cli = parse(&["photo.jpg", "--model", "org/other-model"]);
        assert!(CliConfigBuilder::oracle_config(&cli).endpoint.ends_with("/org/other-model"));
    }

    #[test]
    fn test_cli_validation() {
        assert!(CliConfigBuilder::validate_cli(&parse(&["a.jpg"])).is_ok());
        assert!(CliConfigBuilder::validate_cli(&parse(&["a.jpg", "-j", "0"])).is_err());
        assert!(CliConfigBuilder::validate_cli(&parse(&["a.jpg", "--label", "cat"])).is_err());
        assert!(CliConfigBuilder::validate_cli(&parse(&[
            "a.jpg",
            "--endpoint",
            "http://x",
            "--model",
            "m"
        ]))
        .is_err());
    }
}
