//! bgcut background removal CLI
//!
//! Sends images to a segmentation endpoint and writes transparent PNGs.

#[cfg(feature = "cli")]
use bgcut::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    panic!("CLI feature not enabled. Please rebuild with --features cli");
}
