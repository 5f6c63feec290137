use serde::{Deserialize, Serialize};

use beacon_protocol::{
    AGENT_IDLE_TIMEOUT_MS, COMMAND_RETENTION_MS, DEFAULT_HISTORY_LIMIT, DEFAULT_ROOM,
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    pub gateway: GatewayConfig,
    pub auth: AuthConfig,
    pub chat: ChatConfig,
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 18920,
        }
    }
}

/// Shared secrets for the two authentication paths. Usually provided via
/// `${BEACON_AGENT_SECRET}` / `${BEACON_TOKEN_SECRET}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret shared with remote agent processes.
    pub agent_secret: String,
    /// Secret used to sign and verify chat credential tokens.
    pub token_secret: String,
    /// Chat token lifetime in seconds.
    pub token_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            agent_secret: String::new(),
            token_secret: String::new(),
            token_ttl_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub default_room: String,
    /// Recent messages pushed to a newly authenticated connection.
    pub history_limit: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_room: DEFAULT_ROOM.into(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Seconds a command stays in the live correlation table.
    pub command_retention_secs: u64,
    /// Seconds of silence after which an agent entry is swept.
    pub agent_idle_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            command_retention_secs: (COMMAND_RETENTION_MS / 1_000) as u64,
            agent_idle_timeout_secs: (AGENT_IDLE_TIMEOUT_MS / 1_000) as u64,
        }
    }
}

impl DispatchConfig {
    pub fn command_retention_ms(&self) -> i64 {
        (self.command_retention_secs * 1_000) as i64
    }

    pub fn agent_idle_timeout_ms(&self) -> i64 {
        (self.agent_idle_timeout_secs * 1_000) as i64
    }
}
