//! Error types for repub-core.

use thiserror::Error;

/// Result type alias using repub-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving the republishing pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad input: empty content, unknown article id, invalid status transition
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced row is absent
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// A unique key collided on insert
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// A stage or call exceeded its time budget
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Outbound HTTP/network failure
    #[error("Transport error{}: {body}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Transport { status: Option<u16>, body: String },

    /// The detector identity is used up for the day
    #[error("Detector quota exceeded for profile {profile_id}")]
    QuotaExceeded { profile_id: u64 },

    /// The detector demanded re-verification
    #[error("Detector verification failed ({failures} consecutive failures)")]
    VerificationFailed { failures: u32 },

    /// The LLM returned no usable text
    #[error("LLM failure: {0}")]
    Llm(String),

    /// The detect-optimise loop exhausted its attempts above threshold
    #[error("AI probability {probability}% above threshold {threshold}%")]
    DetectionNotPassed { probability: f64, threshold: f64 },

    /// Cooperative cancellation was observed
    #[error("Cancelled")]
    Cancelled,

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected invariant violation; never recovered
    #[error("Fatal: {0}")]
    Fatal(String),
}

impl Error {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a not-found error for an entity/key pair.
    pub fn not_found(entity: &'static str, key: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// Create a transport error without an HTTP status.
    pub fn transport(body: impl Into<String>) -> Self {
        Self::Transport {
            status: None,
            body: body.into(),
        }
    }

    /// Create a transport error carrying an HTTP status.
    pub fn transport_status(status: u16, body: impl Into<String>) -> Self {
        Self::Transport {
            status: Some(status),
            body: body.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Whether this error is recoverable inside the detector driver by
    /// rotating the current identity.
    pub fn is_identity_recoverable(&self) -> bool {
        matches!(
            self,
            Self::QuotaExceeded { .. } | Self::VerificationFailed { .. }
        )
    }

    /// One-line reason suitable for `tasks.last_error` / user display.
    pub fn reason(&self) -> String {
        self.to_string()
            .lines()
            .next()
            .unwrap_or_default()
            .to_string()
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, Some(msg))
                if err.code == rusqlite::ErrorCode::ConstraintViolation
                    && msg.contains("UNIQUE") =>
            {
                Self::DuplicateKey(msg.clone())
            }
            _ => Self::Storage(e.to_string()),
        }
    }
}
