//! Common error types for OPML nodes
//!
//! This module defines the error type shared by the worker crate.
//! Every error maps onto a wire result code so HTTP handlers can render it
//! without knowing where it came from.

use opml_proto::{CODE_JOBS_EXCEEDED, CODE_MALFORMED, CODE_UNKNOWN};
use thiserror::Error;

/// Main error type for OPML nodes
#[derive(Error, Debug)]
pub enum NodeError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// YAML config parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Request is missing required fields
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Engine has no free slot
    #[error("Jobs exceeded on {0} engine")]
    AdmissionExceeded(String),
}

impl NodeError {
    /// Convert error to the wire result code
    pub fn result_code(&self) -> i32 {
        match self {
            NodeError::AdmissionExceeded(_) => CODE_JOBS_EXCEEDED,
            NodeError::InvalidInput(_) => CODE_MALFORMED,
            NodeError::Config(_) | NodeError::Yaml(_) => CODE_UNKNOWN,
        }
    }

    /// Whether the caller caused the error (as opposed to the node)
    pub fn is_client_error(&self) -> bool {
        matches!(self, NodeError::AdmissionExceeded(_) | NodeError::InvalidInput(_))
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        NodeError::Config(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        NodeError::InvalidInput(msg.into())
    }

    /// Create an admission error for the named engine
    pub fn admission_exceeded(engine: impl Into<String>) -> Self {
        NodeError::AdmissionExceeded(engine.into())
    }
}

/// Result type alias for OPML operations
pub type Result<T> = std::result::Result<T, NodeError>;
