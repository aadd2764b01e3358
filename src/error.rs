//! Error taxonomy for the fan-out core.
//!
//! Nothing here is process-fatal: authentication and dispatch errors are
//! reported back to the originating client, and per-connection delivery
//! failures are swallowed at the broadcast site.

use thiserror::Error;

/// Failures from the persistence adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("record not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(String),
}

/// Authentication failures. Recoverable — the client may retry `authenticate`.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authentication failed: missing token")]
    MissingToken,
    #[error("authentication failed: unknown user")]
    UnknownIdentity,
    #[error("authentication failed: unknown connection")]
    UnknownConnection,
    #[error("authentication failed: identity lookup error")]
    Lookup(#[from] AdapterError),
}

/// Room membership failures.
#[derive(Debug, Error)]
pub enum JoinError {
    /// `user:*` rooms may only be joined by their owner.
    #[error("forbidden: cannot join another user's room")]
    Forbidden,
    #[error("unknown connection")]
    UnknownConnection,
}

/// Failures terminal for a single dispatched event. No partial effects:
/// a validation error means no write and no broadcast, a persistence error
/// means the write failed and no broadcast was attempted.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid event: {0}")]
    Invalid(&'static str),
    #[error("persistence error: {0}")]
    Persistence(#[from] AdapterError),
}
