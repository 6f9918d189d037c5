//! Background removal CLI tool
//!
//! Sends each input to an HTTP segmentation oracle and writes transparent PNGs.

use super::config::CliConfigBuilder;
use crate::{
    backends::http::HttpOracleLoader,
    inference::OracleLoader,
    processor::BackgroundRemovalProcessor,
    services::{ConsoleProgressReporter, ProgressReporter},
    tracing_config::{init_cli_tracing, spans, TracingFormat},
    types::RemovalResult,
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "webp", "tiff", "tif"];

/// Background removal CLI tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "bgcut")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Input image files or directories (use "-" for stdin)
    #[arg(value_name = "INPUT", required = true)]
    pub input: Vec<String>,

    /// Output file (single input) or directory (batch processing). Use "-" for stdout.
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: Option<String>,

    /// JSON pipeline configuration; individual flags override its values
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Segmentation endpoint URL
    #[arg(long, value_name = "URL")]
    pub endpoint: Option<String>,

    /// Hugging Face model id used when no endpoint is given
    #[arg(short, long)]
    pub model: Option<String>,

    /// API token (defaults to the HF_TOKEN environment variable)
    #[arg(long)]
    pub token: Option<String>,

    /// Oracle request timeout in seconds
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,

    /// Probe the endpoint before the first request
    #[arg(long)]
    pub health_check: bool,

    /// Largest allowed side after normalization
    #[arg(long)]
    pub max_dimension: Option<u32>,

    /// Smallest allowed side after normalization
    #[arg(long)]
    pub min_dimension: Option<u32>,

    /// Oracle detection threshold (0.0-1.0)
    #[arg(long)]
    pub threshold: Option<f32>,

    /// JPEG quality of the image sent to the oracle (0.0-1.0]
    #[arg(long)]
    pub encode_quality: Option<f32>,

    /// Hard alpha cutoff instead of the soft band
    #[arg(long, value_name = "CUTOFF")]
    pub binary_cutoff: Option<f32>,

    /// Disable edge smoothing
    #[arg(long)]
    pub no_smoothing: bool,

    /// Which oracle segment to cut out
    #[arg(long, value_enum)]
    pub select: Option<SelectionArg>,

    /// Allowed segment label for `--select labels` or `union` (repeatable)
    #[arg(long = "label", value_name = "LABEL")]
    pub labels: Vec<String>,

    /// Process directory recursively
    #[arg(short, long)]
    pub recursive: bool,

    /// Pattern for batch processing (e.g., "*.jpg")
    #[arg(long)]
    pub pattern: Option<String>,

    /// Number of images processed concurrently
    #[arg(short, long, default_value_t = 1)]
    pub jobs: usize,

    /// Report pipeline status changes per image
    #[arg(long)]
    pub progress: bool,

    /// Compact log output without colors
    #[arg(long)]
    pub compact_logs: bool,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE and debug statistics)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Segment selection policy names accepted on the command line
#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum SelectionArg {
    /// First segment of the reply
    First,
    /// Segment with the most foreground pixels
    Largest,
    /// First segment whose label matches `--label` (or the built-in list)
    Labels,
    /// Every segment whose label matches `--label` (or the built-in list)
    Union,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    let format = if cli.compact_logs {
        TracingFormat::Compact
    } else {
        TracingFormat::Console
    };
    let session_id =
        init_cli_tracing(cli.verbose, format).context("Failed to initialize tracing")?;

    CliConfigBuilder::validate_cli(&cli).context("Invalid CLI arguments")?;
    let config = CliConfigBuilder::from_cli(&cli).context("Failed to build configuration")?;
    let oracle_config = CliConfigBuilder::oracle_config(&cli);

    if oracle_config.api_token.is_none() {
        warn!(
            "No API token given (--token or {}); the endpoint may reject requests",
            super::config::TOKEN_ENV_VAR
        );
    }

    info!("Input(s): {}", cli.input.join(", "));
    info!("Oracle endpoint: {}", oracle_config.endpoint);

    let session_span = spans::session(&session_id, &oracle_config.endpoint);
    let mut processor = BackgroundRemovalProcessor::new(config, HttpOracleLoader::new(oracle_config))
        .context("Failed to create background removal processor")?;
    if cli.progress {
        let reporter: Arc<dyn ProgressReporter> =
            Arc::new(ConsoleProgressReporter::new(cli.verbose > 0));
        processor = processor.with_progress_reporter(reporter);
    }

    let start_time = Instant::now();
    let summary = process_inputs(&cli, &processor).instrument(session_span).await?;

    info!(
        "Processed {} image(s) in {:.2}s",
        summary.processed,
        start_time.elapsed().as_secs_f64()
    );

    if summary.failed > 0 {
        anyhow::bail!("{} of {} image(s) failed", summary.failed, summary.total());
    }

    Ok(())
}

/// Outcome counts of one CLI run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BatchSummary {
    pub(crate) processed: usize,
    pub(crate) failed: usize,
}

impl BatchSummary {
    pub(crate) fn total(self) -> usize {
        self.processed + self.failed
    }
}

/// Process every input, running up to `--jobs` pipelines at once
pub(crate) async fn process_inputs<L: OracleLoader>(
    cli: &Cli,
    processor: &BackgroundRemovalProcessor<L>,
) -> Result<BatchSummary> {
    if cli.input.len() == 1 && cli.input.first().is_some_and(|s| s == "-") {
        process_stdin(cli.output.as_deref(), processor).await?;
        return Ok(BatchSummary {
            processed: 1,
            failed: 0,
        });
    }

    let all_files = collect_input_files(cli)?;
    if all_files.is_empty() {
        warn!("No supported image files found in the provided inputs");
        return Ok(BatchSummary::default());
    }

    let file_count = all_files.len();
    info!("Found {} image file(s) to process", file_count);

    let output_dir = prepare_output_dir(cli.output.as_deref(), file_count)?;

    let progress_bar = if file_count > 1 && !cli.progress {
        let pb = ProgressBar::new(file_count as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        Some(pb)
    } else {
        None
    };

    let batch_span = spans::batch_processing(file_count);
    let batch_start_time = Instant::now();

    let outcomes: Vec<bool> = stream::iter(all_files.iter())
        .map(|input_file| {
            let output_path = if file_count == 1 {
                cli.output.as_ref().map(PathBuf::from)
            } else {
                output_dir
                    .as_deref()
                    .map(|dir| generate_output_path_with_dir(input_file, dir))
            };
            let progress_bar = progress_bar.clone();

            async move {
                let outcome = process_single_file(processor, input_file, output_path.as_deref())
                    .instrument(spans::file_processing(input_file))
                    .await;

                if let Some(pb) = &progress_bar {
                    pb.set_message(format!("{}", input_file.display()));
                    pb.inc(1);
                }

                match outcome {
                    Ok(()) => true,
                    Err(e) => {
                        error!("Failed to process {}: {:#}", input_file.display(), e);
                        false
                    },
                }
            }
        })
        .buffer_unordered(cli.jobs.max(1))
        .collect()
        .instrument(batch_span)
        .await;

    let processed = outcomes.iter().filter(|ok| **ok).count();
    let summary = BatchSummary {
        processed,
        failed: outcomes.len() - processed,
    };

    if let Some(pb) = progress_bar {
        pb.finish_with_message(format!(
            "Completed! Processed: {}, Failed: {}",
            summary.processed, summary.failed
        ));
    }

    if file_count > 1 {
        let batch_total_time = batch_start_time.elapsed().as_secs_f64();
        info!("Batch processing summary:");
        info!("  files processed: {}", summary.processed);
        info!("  files failed: {}", summary.failed);
        info!("  total time: {:.2}s", batch_total_time);
        if summary.processed > 0 {
            info!(
                "  average per file: {:.2}s",
                batch_total_time / summary.processed as f64
            );
        }
    }

    Ok(summary)
}

/// Expand the positional inputs into a sorted list of image files
fn collect_input_files(cli: &Cli) -> Result<Vec<PathBuf>> {
    let mut all_files = Vec::new();

    for input in &cli.input {
        let path = PathBuf::from(input);

        if path.is_file() {
            if is_image_file(&path) {
                all_files.push(path);
            } else {
                warn!("Skipping unsupported file: {}", path.display());
            }
        } else if path.is_dir() {
            all_files.extend(find_image_files(&path, cli.recursive, cli.pattern.as_deref())?);
        } else {
            anyhow::bail!(
                "Input path does not exist or is not accessible: {}",
                path.display()
            );
        }
    }

    all_files.sort();
    all_files.dedup();
    Ok(all_files)
}

/// Resolve the batch output directory, creating it when missing
fn prepare_output_dir(output: Option<&str>, file_count: usize) -> Result<Option<PathBuf>> {
    let Some(output) = output else {
        return Ok(None);
    };
    if file_count <= 1 {
        return Ok(None);
    }
    if output == "-" {
        anyhow::bail!("Cannot use stdout (-) as output when processing multiple files");
    }

    let output_path = PathBuf::from(output);
    if output_path.is_file() {
        anyhow::bail!(
            "Output path exists and is a file, not a directory: {}",
            output_path.display()
        );
    }
    std::fs::create_dir_all(&output_path).with_context(|| {
        format!(
            "Failed to create output directory: {}",
            output_path.display()
        )
    })?;
    Ok(Some(output_path))
}

/// Remove the background from stdin; output defaults to stdout
async fn process_stdin<L: OracleLoader>(
    output_target: Option<&str>,
    processor: &BackgroundRemovalProcessor<L>,
) -> Result<()> {
    info!("Reading image from stdin");

    let image_data = read_stdin()?;
    let result = processor
        .process(&image_data)
        .await
        .context("Failed to remove background")?;
    log_timings("stdin", &result);

    match output_target {
        Some(target) if target != "-" => {
            result.save(target).context("Failed to save result")?;
            info!("Image saved to: {}", target);
        },
        _ => {
            write_stdout(&result.blob)?;
            info!("Image written to stdout");
        },
    }

    Ok(())
}

/// Process one image file and write its PNG
async fn process_single_file<L: OracleLoader>(
    processor: &BackgroundRemovalProcessor<L>,
    input_path: &Path,
    output_path: Option<&Path>,
) -> Result<()> {
    let result = processor
        .process_file(input_path)
        .await
        .context("Failed to remove background")?;

    log_timings(&input_path.display().to_string(), &result);

    match output_path {
        Some(target) if target == Path::new("-") => {
            write_stdout(&result.blob)?;
            info!("  output written to stdout");
        },
        Some(target) => {
            result.save(target).context("Failed to save result")?;
            info!("  output: {}", target.display());
        },
        None => {
            let target = generate_output_path(input_path);
            result.save(&target).context("Failed to save result")?;
            info!("  output: {}", target.display());
        },
    }

    Ok(())
}

fn log_timings(source: &str, result: &RemovalResult) {
    let timings = &result.timings;
    info!(
        "Processed {} ({}x{}, segment '{}')",
        source, result.width, result.height, result.segment_label
    );
    if result.resized {
        info!(
            "  resized from {}x{}",
            result.original_dimensions.0, result.original_dimensions.1
        );
    }
    if timings.model_load_ms > 0 {
        info!("  model load: {}ms", timings.model_load_ms);
    }
    info!(
        "  decode {}ms, normalize {}ms, segmentation {}ms, refine {}ms, composite {}ms, encode {}ms",
        timings.decode_ms,
        timings.normalize_ms,
        timings.segmentation_ms,
        timings.refine_ms,
        timings.composite_ms,
        timings.encode_ms
    );
    info!("  total: {}ms", timings.total_ms);
}

/// Read image data from stdin
fn read_stdin() -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    io::stdin()
        .read_to_end(&mut buffer)
        .context("Failed to read image data from stdin")?;

    if buffer.is_empty() {
        anyhow::bail!("No data received from stdin");
    }

    Ok(buffer)
}

/// Write image data to stdout
fn write_stdout(data: &[u8]) -> Result<()> {
    let mut stdout = io::stdout().lock();
    stdout
        .write_all(data)
        .context("Failed to write image data to stdout")?;
    stdout.flush().context("Failed to flush stdout")?;
    Ok(())
}

/// Find image files in a directory
fn find_image_files(dir: &Path, recursive: bool, pattern: Option<&str>) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    if recursive {
        for entry in walkdir::WalkDir::new(dir) {
            let entry = entry?;
            if entry.file_type().is_file() {
                let path = entry.path();
                if is_image_file(path) && matches_pattern(path, pattern) {
                    files.push(path.to_path_buf());
                }
            }
        }
    } else {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                let path = entry.path();
                if is_image_file(&path) && matches_pattern(&path, pattern) {
                    files.push(path);
                }
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Check if file is an image based on extension
fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// Check if the file name matches the given glob
fn matches_pattern(path: &Path, pattern: Option<&str>) -> bool {
    match pattern {
        Some(pat) => path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|filename| {
                glob::Pattern::new(pat)
                    .map(|p| p.matches(filename))
                    .unwrap_or(false)
            }),
        None => true,
    }
}

/// `<dir>/<stem>_nobg.png` next to the input
fn generate_output_path(input_path: &Path) -> PathBuf {
    let dir = input_path.parent().unwrap_or(Path::new("."));
    generate_output_path_with_dir(input_path, dir)
}

/// `<output_dir>/<stem>_nobg.png`
fn generate_output_path_with_dir(input_path: &Path, output_dir: &Path) -> PathBuf {
    let stem = input_path.file_stem().unwrap_or_default();
    output_dir.join(format!("{}_nobg.png", stem.to_string_lossy()))
}
