//! Shared utilities for preprocessing and validation

pub mod preprocessing;
pub mod validation;

pub use preprocessing::DimensionNormalizer;
pub use validation::NumericValidator;
