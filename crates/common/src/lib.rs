//! OPML common library
//!
//! This crate contains configuration, error and metrics code shared by OPML nodes.

pub mod config;
pub mod error;
pub mod metrics;

// Re-export commonly used types
pub use config::NodeConfig;
pub use error::{NodeError, Result};
pub use metrics::{MetricsRegistry, METRICS};
