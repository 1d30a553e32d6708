//! Unified error types for the NetGraph ecosystem
//!
//! This module provides a common error type [`NetGraphError`] that can
//! represent errors from any part of the system. Domain-specific error types
//! can be converted to `NetGraphError` for uniform error handling at API
//! boundaries.
//!
//! # Example
//!
//! ```ignore
//! use netgraph_core::{NetGraphError, NetGraphResult};
//!
//! fn analyze_network(network: &Network) -> NetGraphResult<()> {
//!     network.validate()?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Unified error type for all NetGraph operations.
///
/// This enum provides a common error representation for the NetGraph
/// ecosystem, allowing errors from parsing, selection, placement, and
/// result validation to be handled uniformly.
#[derive(Error, Debug)]
pub enum NetGraphError {
    /// I/O errors (file access, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing/deserialization errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration errors (undefined references, cycles, duplicate names)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Node/link selection errors (empty selections, no expansion)
    #[error("Selection error: {0}")]
    Selection(String),

    /// Out-of-range or inconsistent parameters
    #[error("Parameter error: {0}")]
    Parameter(String),

    /// Result-container invariant violations
    #[error("Result error: {0}")]
    ResultInvariant(String),

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using NetGraphError.
pub type NetGraphResult<T> = Result<T, NetGraphError>;

// Conversion from anyhow::Error
impl From<anyhow::Error> for NetGraphError {
    fn from(err: anyhow::Error) -> Self {
        NetGraphError::Other(err.to_string())
    }
}

// Conversion from string-like types for convenience
impl From<String> for NetGraphError {
    fn from(s: String) -> Self {
        NetGraphError::Other(s)
    }
}

impl From<&str> for NetGraphError {
    fn from(s: &str) -> Self {
        NetGraphError::Other(s.to_string())
    }
}

// JSON parsing errors
impl From<serde_json::Error> for NetGraphError {
    fn from(err: serde_json::Error) -> Self {
        NetGraphError::Parse(err.to_string())
    }
}

// Invalid selector/policy regexes surface as configuration errors
impl From<regex::Error> for NetGraphError {
    fn from(err: regex::Error) -> Self {
        NetGraphError::Config(format!("invalid regex: {err}"))
    }
}
