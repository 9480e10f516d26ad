//! Error types shared across the Pulse SDK

use thiserror::Error;

/// Errors raised by the SDK's internal plumbing.
///
/// None of these surface through the public measurement API: input
/// validation there is reported through sentinel return values, and
/// configuration or transport failures are advisory log output that the
/// refresh cycle recovers from.
#[derive(Debug, Error)]
pub enum PulseError {
    /// The transport could not complete a request.
    #[error("transport request failed: {0}")]
    Transport(String),

    /// The configuration response body was not valid JSON.
    #[error("configuration could not be parsed: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// The configuration response parsed but was not a JSON object.
    #[error("configuration is not a JSON object")]
    ConfigShape,
}

/// Convenience alias used throughout the workspace.
pub type PulseResult<T> = Result<T, PulseError>;
