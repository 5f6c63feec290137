use beacon_protocol::error_codes;

/// Agent handshake rejection. Each variant maps to a distinct wire code but
/// carries nothing beyond the category — the peer never learns which byte
/// of a signature mismatched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("Missing authentication fields")]
    MissingFields,
    #[error("Authentication timestamp expired")]
    StaleTimestamp,
    #[error("Invalid authentication signature")]
    InvalidSignature,
}

impl HandshakeError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingFields => error_codes::MISSING_FIELDS,
            Self::StaleTimestamp => error_codes::TIMESTAMP_EXPIRED,
            Self::InvalidSignature => error_codes::INVALID_SIGNATURE,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// No registry entry for the target agent.
    #[error("agent not found: {0}")]
    AgentNotFound(String),
    /// Registry entry exists but its live connection handle is stale.
    /// Distinct from [`Self::AgentNotFound`] so callers can decide to
    /// retry once the agent reconnects.
    #[error("agent unreachable: {0}")]
    AgentUnreachable(String),
    /// No command in the correlation table with that id.
    #[error("command not found: {0}")]
    CommandNotFound(String),
    #[error("serialize frame: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl DispatchError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::AgentNotFound(_) => error_codes::AGENT_NOT_FOUND,
            Self::AgentUnreachable(_) => error_codes::AGENT_UNREACHABLE,
            Self::CommandNotFound(_) => error_codes::COMMAND_NOT_FOUND,
            Self::Serialize(_) => error_codes::INTERNAL_ERROR,
        }
    }
}
