//! Error types for kubesight-analysis

use thiserror::Error;

/// Failures of one analysis call
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Client could not be built from configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport failure talking to the reasoning service
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status from the reasoning service
    #[error("{provider} returned {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },

    /// The service reported an error inside the stream
    #[error("upstream error: {0}")]
    Upstream(String),

    /// A stream frame could not be understood
    #[error("malformed stream frame: {0}")]
    Decode(#[from] serde_json::Error),

    /// Analysis is switched off in the configuration
    #[error("analysis is disabled")]
    Disabled,
}

/// Result type alias for kubesight-analysis
pub type Result<T> = std::result::Result<T, AnalysisError>;
