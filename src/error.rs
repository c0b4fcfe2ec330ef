//! Error types for the analysis pipelines.

use thiserror::Error;

/// Result type alias for analysis operations.
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Failures surfaced by the return builder, risk estimators, sampler and optimizer.
///
/// Data-source failures (`NoData`, `AmbiguousField`) are kept distinct so callers
/// can tell an unknown symbol apart from a payload missing its price field.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    /// Too few observations for the requested computation.
    #[error("Insufficient data: need at least {required} observations, got {available}")]
    InsufficientData { required: usize, available: usize },

    /// Parameter outside its domain.
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// The market-data source returned nothing for the symbol.
    #[error("No data returned for '{symbol}'")]
    NoData { symbol: String },

    /// The market-data payload lacks a usable price field.
    #[error("Couldn't find 'Adj Close' or 'Close' for '{symbol}'. Available fields: {available:?}")]
    AmbiguousField {
        symbol: String,
        available: Vec<String>,
    },

    /// The constrained optimizer stopped without meeting its tolerances.
    #[error("Optimization did not converge after {iterations} iterations: {message}")]
    OptimizationDidNotConverge { iterations: usize, message: String },
}

impl AnalysisError {
    pub fn insufficient_data(required: usize, available: usize) -> Self {
        Self::InsufficientData {
            required,
            available,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn no_data(symbol: impl Into<String>) -> Self {
        Self::NoData {
            symbol: symbol.into(),
        }
    }

    pub fn ambiguous_field(symbol: impl Into<String>, available: Vec<String>) -> Self {
        Self::AmbiguousField {
            symbol: symbol.into(),
            available,
        }
    }

    pub fn did_not_converge(iterations: usize, message: impl Into<String>) -> Self {
        Self::OptimizationDidNotConverge {
            iterations,
            message: message.into(),
        }
    }
}
