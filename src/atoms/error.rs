// ── Qualibot Atoms: Error Types ─────────────────────────────────────────────
// Single canonical error enum, built with `thiserror`.
//
// Design rules:
//   • Variants follow the error taxonomy: a caller-facing "kind" (Validation,
//     NotFound, ConstraintViolation, TransientDependency, PermanentDependency,
//     Internal) rather than one variant per underlying library.
//   • The `#[from]` attribute wires std/external error conversions into the
//     taxonomy so call sites can use `?` without manual mapping.
//   • No variant carries secret material (API keys, tokens) in its message.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input from an external caller (webhook payload, RPC request).
    #[error("validation error: {0}")]
    Validation(String),

    /// Target entity absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// An invariant from the data model would be violated by this write.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// A dependency call failed in a way that is expected to succeed on retry
    /// (network error, 5xx, 429, timeout). Retried per the caller's policy;
    /// once the retry budget is exhausted this becomes `PermanentDependency`.
    #[error("transient dependency error ({dependency}): {message}")]
    TransientDependency { dependency: String, message: String },

    /// A dependency call failed in a way retrying cannot fix (4xx other than
    /// 429, signature mismatch, auth failure).
    #[error("dependency error ({dependency}): {message}")]
    PermanentDependency { dependency: String, message: String },

    /// I/O failure underlying a store or config read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// SQLite / rusqlite database failure not already classified above.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Unexpected failure with no more specific classification.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self::ConstraintViolation(message.into())
    }

    pub fn transient(dependency: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransientDependency { dependency: dependency.into(), message: message.into() }
    }

    pub fn permanent(dependency: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PermanentDependency { dependency: dependency.into(), message: message.into() }
    }

    /// Classify a reqwest transport error as transient (network/timeout) —
    /// HTTP status classification happens separately once a response arrives.
    pub fn from_reqwest(dependency: impl Into<String>, err: reqwest::Error) -> Self {
        Self::TransientDependency { dependency: dependency.into(), message: err.to_string() }
    }

    /// Maps this error to the HTTP status an external REST caller should see.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound(_) => 404,
            Self::ConstraintViolation(_) => 409,
            Self::TransientDependency { .. } => 503,
            Self::PermanentDependency { .. } => 502,
            Self::Io(_) | Self::Serialization(_) | Self::Database(_) | Self::Internal(_) => 500,
        }
    }
}

// ── Migration bridge: String → EngineError ─────────────────────────────────
// Lets call sites still threading plain strings use `?` against EngineResult.

impl From<String> for EngineError {
    fn from(s: String) -> Self {
        EngineError::Internal(s)
    }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        EngineError::Internal(s.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

impl From<EngineError> for String {
    fn from(e: EngineError) -> Self {
        e.to_string()
    }
}
