//! Harness error type.

use exitfn_core::RegisterError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("registration failed: {0}")]
    Register(#[from] RegisterError),
    #[error("unknown scenario '{0}'")]
    UnknownScenario(String),
    #[error("invalid stress configuration: {0}")]
    InvalidConfig(String),
    #[error("stress worker {0} panicked")]
    WorkerPanicked(usize),
    #[error("{invalid} invalid line(s) in {path}")]
    InvalidLog { path: String, invalid: usize },
}
