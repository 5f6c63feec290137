//! In-memory collaborator implementations.
//!
//! These back the default binary and the test suite; they implement the
//! same contracts a database-backed deployment would.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use {
    async_trait::async_trait,
    base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD as BASE64},
    subtle::ConstantTimeEq,
    tokio::sync::RwLock,
};

use {
    beacon_dispatch::handshake::sign,
    beacon_protocol::{ChatMessage, UserProfile, now_ms},
};

use crate::services::{
    GatewayServices, MessageService, ServiceError, ServiceResult, TokenClaims, TokenService,
    UserService,
};

// ── Users ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct StoredUser {
    profile: UserProfile,
}

#[derive(Default)]
pub struct InMemoryUserService {
    users: RwLock<HashMap<String, StoredUser>>,
}

impl InMemoryUserService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, profile: UserProfile) {
        self.users
            .write()
            .await
            .insert(profile.user_id.clone(), StoredUser { profile });
    }
}

#[async_trait]
impl UserService for InMemoryUserService {
    async fn find_by_id(&self, user_id: &str) -> ServiceResult<Option<UserProfile>> {
        Ok(self
            .users
            .read()
            .await
            .get(user_id)
            .map(|u| u.profile.clone()))
    }

    async fn set_online(&self, user_id: &str, online: bool) -> ServiceResult<()> {
        if let Some(user) = self.users.write().await.get_mut(user_id) {
            user.profile.is_online = online;
        }
        Ok(())
    }

    async fn online_users(&self) -> ServiceResult<Vec<UserProfile>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .filter(|u| u.profile.is_online)
            .map(|u| u.profile.clone())
            .collect())
    }
}

// ── Messages ─────────────────────────────────────────────────────────────────

/// Ring buffer of recent messages.
pub struct InMemoryMessageService {
    messages: RwLock<VecDeque<ChatMessage>>,
    capacity: usize,
}

impl InMemoryMessageService {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: RwLock::new(VecDeque::new()),
            capacity,
        }
    }
}

impl Default for InMemoryMessageService {
    fn default() -> Self {
        Self::new(500)
    }
}

#[async_trait]
impl MessageService for InMemoryMessageService {
    async fn save(&self, message: &ChatMessage) -> ServiceResult<()> {
        let mut messages = self.messages.write().await;
        if messages.len() == self.capacity {
            messages.pop_front();
        }
        messages.push_back(message.clone());
        Ok(())
    }

    async fn recent(&self, limit: usize) -> ServiceResult<Vec<ChatMessage>> {
        let messages = self.messages.read().await;
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.iter().skip(skip).cloned().collect())
    }

    async fn apply_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> ServiceResult<Option<ChatMessage>> {
        let mut messages = self.messages.write().await;
        let Some(message) = messages.iter_mut().find(|m| m.id == message_id) else {
            return Ok(None);
        };
        message.add_reaction(user_id, emoji);
        Ok(Some(message.clone()))
    }
}

/// A collaborator that fails every persistence call; used to exercise the
/// caller-only error reporting paths in tests.
pub struct FailingMessageService;

#[async_trait]
impl MessageService for FailingMessageService {
    async fn save(&self, _message: &ChatMessage) -> ServiceResult<()> {
        Err(ServiceError("storage unavailable".into()))
    }

    async fn recent(&self, _limit: usize) -> ServiceResult<Vec<ChatMessage>> {
        Err(ServiceError("storage unavailable".into()))
    }

    async fn apply_reaction(
        &self,
        _message_id: &str,
        _user_id: &str,
        _emoji: &str,
    ) -> ServiceResult<Option<ChatMessage>> {
        Err(ServiceError("storage unavailable".into()))
    }
}

// ── Tokens ───────────────────────────────────────────────────────────────────

/// Signed-claims credential: `base64(claims_json) . base64(hmac)`.
///
/// Verification checks the signature in constant time before looking at the
/// claims, then enforces the issue-time TTL.
pub struct HmacTokenService {
    secret: String,
    ttl_ms: i64,
}

impl HmacTokenService {
    pub fn new(secret: impl Into<String>, ttl_ms: i64) -> Self {
        Self {
            secret: secret.into(),
            ttl_ms,
        }
    }

    pub fn issue(&self, user_id: &str, username: &str, issued_at: i64) -> String {
        let claims = serde_json::json!({
            "userId": user_id,
            "username": username,
            "issuedAt": issued_at,
        });
        let body = BASE64.encode(claims.to_string());
        let sig = sign(&self.secret, &body);
        format!("{body}.{sig}")
    }
}

impl TokenService for HmacTokenService {
    fn verify(&self, token: &str) -> Option<TokenClaims> {
        let (body, sig) = token.split_once('.')?;
        let expected = sign(&self.secret, body);
        if expected.as_bytes().ct_eq(sig.as_bytes()).unwrap_u8() != 1 {
            return None;
        }

        let raw = BASE64.decode(body).ok()?;
        let claims: serde_json::Value = serde_json::from_slice(&raw).ok()?;
        let user_id = claims.get("userId")?.as_str()?.to_string();
        let username = claims.get("username")?.as_str()?.to_string();
        let issued_at = claims.get("issuedAt")?.as_i64()?;

        if now_ms() - issued_at > self.ttl_ms {
            return None;
        }
        Some(TokenClaims {
            user_id,
            username,
            issued_at,
        })
    }
}

impl GatewayServices {
    /// Default wiring: in-memory stores plus HMAC token verification.
    pub fn in_memory(token_secret: &str, token_ttl_ms: i64) -> Self {
        Self {
            users: Arc::new(InMemoryUserService::new()),
            messages: Arc::new(InMemoryMessageService::default()),
            tokens: Arc::new(HmacTokenService::new(token_secret, token_ttl_ms)),
        }
    }
}
