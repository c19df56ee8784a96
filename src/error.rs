//! Error types for the admission pipeline.
//!
//! Errors are classified so the namespace augmenter can tell a not-found
//! (retried once against the API server) from everything else (fatal for the
//! request).

use thiserror::Error;

/// Error type for webhook operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Object not present in the store that was asked
    #[error("{0} not found")]
    NotFound(String),

    /// Policy engine rejected or failed the call
    #[error("policy engine error: {0}")]
    Engine(String),

    /// Transport error talking to the policy engine
    #[error("policy engine request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A collaborator required for this call was not configured
    #[error("no client available to {0}")]
    MissingClient(&'static str),

    /// The caller cancelled the request
    #[error("request cancelled")]
    Cancelled,

    /// The request deadline elapsed before the call finished
    #[error("request deadline exceeded")]
    DeadlineExceeded,
}

impl Error {
    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Kube(kube::Error::Api(e)) => e.code == 404,
            _ => false,
        }
    }
}

/// Result type alias for webhook operations
pub type Result<T> = std::result::Result<T, Error>;
