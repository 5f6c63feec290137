//! Collaborator seams for persistence and credential verification.
//!
//! The hub never owns storage semantics: users, messages and token
//! verification are consulted through these traits. Production deployments
//! wire real backends; the in-memory implementations in `memory.rs` back
//! the default binary and the test suite.

use std::sync::Arc;

use async_trait::async_trait;

use beacon_protocol::{ChatMessage, UserProfile};

/// Failure of a persistence collaborator. Reported to the immediate caller
/// only, never broadcast.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ServiceError(pub String);

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Decoded chat credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub user_id: String,
    pub username: String,
    pub issued_at: i64,
}

#[async_trait]
pub trait UserService: Send + Sync {
    async fn find_by_id(&self, user_id: &str) -> ServiceResult<Option<UserProfile>>;
    async fn set_online(&self, user_id: &str, online: bool) -> ServiceResult<()>;
    /// Presence list source: every user whose persisted online flag is set.
    async fn online_users(&self) -> ServiceResult<Vec<UserProfile>>;
}

#[async_trait]
pub trait MessageService: Send + Sync {
    async fn save(&self, message: &ChatMessage) -> ServiceResult<()>;
    /// Most recent messages in chronological order.
    async fn recent(&self, limit: usize) -> ServiceResult<Vec<ChatMessage>>;
    /// Apply a reaction under the one-reaction-per-user rule. Returns the
    /// updated message, or `None` when the id is unknown.
    async fn apply_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> ServiceResult<Option<ChatMessage>>;
}

/// Verifies chat credential tokens. Verification is pure, hence sync.
pub trait TokenService: Send + Sync {
    /// `None` on any malformed, tampered or expired token; the caller maps
    /// this to `INVALID_TOKEN` without learning which check failed.
    fn verify(&self, token: &str) -> Option<TokenClaims>;
}

/// Bundle of collaborator services handed to the gateway at startup.
#[derive(Clone)]
pub struct GatewayServices {
    pub users: Arc<dyn UserService>,
    pub messages: Arc<dyn MessageService>,
    pub tokens: Arc<dyn TokenService>,
}
