//! Output formats for command plans and run reports.

use thiserror::Error;

pub mod dot;
pub mod run_result;
pub mod yaml;

/// Serialization failures while emitting a document.
#[derive(Debug, Error)]
pub enum EmitError {
    #[error("yaml serialization failed: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}
