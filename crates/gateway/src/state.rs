//! Shared gateway state.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use tokio::sync::RwLock;

use {beacon_config::BeaconConfig, beacon_dispatch::Engine};

use crate::{services::GatewayServices, sessions::SessionRegistry};

/// Everything the connection handlers and HTTP routes share.
///
/// The session registry and the dispatch engine each live behind one
/// `RwLock`; handlers take the write guard for the duration of a mutation so
/// every state transition is observed atomically.
pub struct GatewayState {
    pub sessions: RwLock<SessionRegistry>,
    pub engine: RwLock<Engine>,
    pub services: GatewayServices,
    /// Gateway-wide monotonic event counter.
    seq: AtomicU64,
    pub version: &'static str,
    pub hostname: String,
    pub started_at: i64,
    pub default_room: String,
    pub history_limit: usize,
}

impl GatewayState {
    pub fn new(config: &BeaconConfig, services: GatewayServices) -> Arc<Self> {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());

        Arc::new(Self {
            sessions: RwLock::new(SessionRegistry::new()),
            engine: RwLock::new(Engine::new(
                &config.auth.agent_secret,
                config.dispatch.command_retention_ms(),
                config.dispatch.agent_idle_timeout_ms(),
            )),
            services,
            seq: AtomicU64::new(0),
            version: env!("CARGO_PKG_VERSION"),
            hostname,
            started_at: beacon_protocol::now_ms(),
            default_room: config.chat.default_room.clone(),
            history_limit: config.chat.history_limit,
        })
    }

    /// Allocate the next event sequence number.
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seq_is_monotonic() {
        let state = GatewayState::new(
            &BeaconConfig::default(),
            GatewayServices::in_memory("test-secret", 86_400_000),
        );
        let a = state.next_seq();
        let b = state.next_seq();
        assert!(b > a);
        assert_eq!(state.session_count().await, 0);
    }
}
