//! Error types for viewser.
//!
//! A single crate-wide [`Error`] covers configuration, data, drift-check,
//! self-test and remote failures. Library code returns [`Result`]; only the
//! binary wraps errors in `anyhow` for context.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad settings, drift overrides, or partition lengths.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Input data cannot be tensorized (sentinel collision, bad index, shape mismatch).
    #[error("Data error: {0}")]
    Data(String),

    /// A single integrity check could not be evaluated.
    #[error("Check error: {0}")]
    Check(String),

    /// One or more checks did not fire on their perturbed reference data.
    #[error("drift-detection self test failed: {}", failures.join("; "))]
    SelfTest { failures: Vec<String> },

    #[error("Not found: {0}")]
    NotFound(String),

    /// The remote is still compiling the requested data.
    #[error("Operation pending: {0}")]
    Pending(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(Box<serde_json::Error>),

    #[error("Dataframe error: {0}")]
    Polars(Box<polars::error::PolarsError>),

    #[error("Request error: {0}")]
    Request(Box<reqwest::Error>),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::Data(message.into())
    }

    pub fn check(message: impl Into<String>) -> Self {
        Self::Check(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn pending(message: impl Into<String>) -> Self {
        Self::Pending(message.into())
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote(message.into())
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Whether the error came from the remote service rather than local code.
    #[must_use]
    pub const fn is_remote(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::Pending(_)
                | Self::Http { .. }
                | Self::Remote(_)
                | Self::Request(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(Box::new(err))
    }
}

impl From<polars::error::PolarsError> for Error {
    fn from(err: polars::error::PolarsError) -> Self {
        Self::Polars(Box::new(err))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Request(Box::new(err))
    }
}
