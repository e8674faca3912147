//! # inbox-inference
//!
//! Extraction oracle clients for inbox-collab.
//!
//! This crate provides:
//! - [`HttpOracle`]: posts masked mail bodies to an external message parser
//! - [`PassthroughOracle`]: keeps every body as a single message
//!
//! # Example
//!
//! ```rust,no_run
//! use inbox_core::config::OracleConfig;
//! use inbox_inference::oracle_from_config;
//!
//! let oracle = oracle_from_config(&OracleConfig::default()).unwrap();
//! assert_eq!(oracle.name(), "http");
//! ```

pub mod http;
pub mod passthrough;

use std::sync::Arc;

use inbox_core::config::OracleConfig;
use inbox_core::{ExtractionOracle, Result};
use tracing::info;

pub use http::{HttpOracle, HTTP_PLACEHOLDER};
pub use passthrough::PassthroughOracle;

/// Build the oracle selected by the configuration.
pub fn oracle_from_config(config: &OracleConfig) -> Result<Arc<dyn ExtractionOracle>> {
    if config.passthrough {
        info!(
            subsystem = "oracle",
            component = "factory",
            "Using passthrough oracle"
        );
        return Ok(Arc::new(PassthroughOracle::new()));
    }
    info!(
        subsystem = "oracle",
        component = "factory",
        url = %config.url,
        "Using HTTP oracle"
    );
    Ok(Arc::new(HttpOracle::from_config(config)?))
}
