//! Error taxonomy surfaced to the orchestrator
//!
//! Every compute client failure is classified exactly once, at the driver
//! boundary, into one of these codes. Lower layers never retry; only the
//! list-before-create idempotency check and delete's missing-means-success
//! rule suppress errors.

use thiserror::Error;

/// Driver error, one variant per orchestrator error code.
///
/// `Clone` is required so a failed client construction can be replayed to
/// every later call on the same driver (the failure is sticky, see
/// [`crate::driver::client_cell`]).
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// The spec failed validation, an identifier is malformed, or a required
    /// credential field is missing. The caller must fix its input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No identifier exists yet, or the provider reported 404 on a get.
    #[error("not found: {0}")]
    NotFound(String),

    /// The credential material is unusable (bad key document, bad PEM).
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// The provider rejected a create for quota or capacity reasons.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Transient provider or transport failure; safe to retry later.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Ambiguous idempotency state, spec decode failure, or an unclassified
    /// provider failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an invalid-argument error with the given message
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a not-found error with the given message
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an unauthenticated error with the given message
    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        Self::Unauthenticated(msg.into())
    }

    /// Create a resource-exhausted error with the given message
    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhausted(msg.into())
    }

    /// Create an unavailable error with the given message
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable code string for this error, matching the orchestrator taxonomy
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::NotFound(_) => "NotFound",
            Self::Unauthenticated(_) => "Unauthenticated",
            Self::ResourceExhausted(_) => "ResourceExhausted",
            Self::Unavailable(_) => "Unavailable",
            Self::Internal(_) => "Internal",
        }
    }
}
