//! Application error types
//!
//! Top-level error for the gateway binary. Library crates keep their own error enums and are
//! folded into this one at the process boundary.

use crate::config::ConfigError;

/// Application-wide error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Configuration errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    // Gateway metadata could not be fetched
    #[error("Metadata error: {0}")]
    Metadata(String),

    // Gateway session errors that reached the caller
    #[error("Gateway error: {0}")]
    Gateway(String),

    // Telemetry setup
    #[error("Telemetry error: {0}")]
    Telemetry(String),

    // Internal errors
    #[error("Internal error")]
    Internal(#[source] anyhow::Error),
}

impl AppError {
    /// Get a stable error code for logs
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Metadata(_) => "METADATA_ERROR",
            Self::Gateway(_) => "GATEWAY_ERROR",
            Self::Telemetry(_) => "TELEMETRY_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Process exit code for this error
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 78,
            Self::Metadata(_) | Self::Gateway(_) => 69,
            Self::Telemetry(_) | Self::Internal(_) => 70,
        }
    }

    /// Create a gateway error from anything displayable
    #[must_use]
    pub fn gateway(err: impl std::fmt::Display) -> Self {
        Self::Gateway(err.to_string())
    }

    /// Create an internal error from any error
    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        Self::Internal(err.into())
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;
