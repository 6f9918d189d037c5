//! Segmentation oracle implementations
//!
//! - HTTP oracle (Hugging Face style inference endpoints)
//! - Mock oracle (deterministic masks for tests and benchmarks)

#[cfg(feature = "http")]
pub mod http;

pub mod mock;

#[cfg(feature = "http")]
pub use self::http::{HttpOracle, HttpOracleConfig, HttpOracleLoader};

pub use self::mock::{MockOracle, MockOracleLoader, OracleCall};
