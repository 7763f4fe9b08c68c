//! Error types for the breath_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for breath_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Catalog validation error
    #[error("Catalog validation error: {0}")]
    CatalogValidation(String),

    /// A bound pattern has no phase with a positive duration
    #[error("Malformed pattern '{0}': every phase duration is zero")]
    MalformedPattern(String),

    /// Pattern is inside a safety lock window
    #[error("Pattern '{pattern_id}' is safety-locked until {until:.0}")]
    PatternLocked { pattern_id: String, until: f64 },

    /// Pattern tier has not been unlocked yet
    #[error("Pattern '{pattern_id}' is not available: {reason}")]
    TierLocked { pattern_id: String, reason: String },

    /// Subscriber or middleware reported a failure
    #[error("Callback error: {0}")]
    Callback(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
