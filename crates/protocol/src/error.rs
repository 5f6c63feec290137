use serde::{Deserialize, Serialize};

/// Stable machine-readable error codes surfaced at the connection boundary.
///
/// Internal errors are logged with full context and crossed the wire only as
/// `INTERNAL_ERROR` plus a generic message.
pub mod error_codes {
    /// Operation requires an authenticated chat session.
    pub const NOT_AUTHENTICATED: &str = "NOT_AUTHENTICATED";
    /// Credential token malformed, expired or tampered.
    pub const INVALID_TOKEN: &str = "INVALID_TOKEN";
    /// Token was valid but no persisted user matches its subject.
    pub const USER_NOT_FOUND: &str = "USER_NOT_FOUND";
    /// Agent handshake missing one or more required fields.
    pub const MISSING_FIELDS: &str = "MISSING_FIELDS";
    /// Agent handshake signature did not verify.
    pub const INVALID_SIGNATURE: &str = "INVALID_SIGNATURE";
    /// Agent handshake timestamp outside the replay window.
    pub const TIMESTAMP_EXPIRED: &str = "TIMESTAMP_EXPIRED";
    /// No registered agent with that id.
    pub const AGENT_NOT_FOUND: &str = "AGENT_NOT_FOUND";
    /// Agent is registered but its live connection handle is stale.
    pub const AGENT_UNREACHABLE: &str = "AGENT_UNREACHABLE";
    /// No command in the correlation table with that id.
    pub const COMMAND_NOT_FOUND: &str = "COMMAND_NOT_FOUND";
    /// Reaction targeted a message id not present in the store.
    pub const MESSAGE_NOT_FOUND: &str = "MESSAGE_NOT_FOUND";
    /// Persistence collaborator failed; reported to the caller only.
    pub const PERSISTENCE_FAILED: &str = "PERSISTENCE_FAILED";
    /// Frame could not be parsed or failed boundary validation.
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    /// Unexpected server-side failure; details stay in the logs.
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// Error payload sent to a remote peer: stable code plus human-readable
/// message. Never carries stack traces or internals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ErrorShape {
    pub code: String,
    pub message: String,
}

impl ErrorShape {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}
