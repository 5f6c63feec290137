use std::collections::HashMap;

use {
    serde::Serialize,
    tokio::sync::mpsc,
    tracing::{debug, info},
};

/// Lifecycle of an agent entry. `CommandSent` is reached only through the
/// HTTP dispatch branch; the live path moves `Authenticated -> Active` when
/// the first response or ping arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Authenticated,
    Active,
    CommandSent,
    Disconnected,
}

/// A remote agent known to the gateway. Ephemeral: dies with the process.
#[derive(Debug)]
pub struct AgentConnection {
    pub agent_id: String,
    pub platform: String,
    /// Write half of the agent's live connection; `None` once it dropped.
    pub sender: Option<mpsc::UnboundedSender<String>>,
    pub connected_at: i64,
    pub last_seen: i64,
    pub status: AgentStatus,
}

impl AgentConnection {
    /// Whether the transport handle can still accept frames.
    pub fn is_reachable(&self) -> bool {
        self.sender.as_ref().is_some_and(|s| !s.is_closed())
    }

    /// Push a serialized frame to the agent. Returns false when the handle
    /// is missing or the connection's write loop has gone away.
    pub fn send(&self, frame: &str) -> bool {
        match &self.sender {
            Some(s) => s.send(frame.to_string()).is_ok(),
            None => false,
        }
    }
}

/// Registry of agent connections, keyed by `agent_id`.
///
/// A new handshake for an existing id overwrites the prior entry
/// (last-writer-wins; there is no dual-session protection).
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: HashMap<String, AgentConnection>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        agent_id: &str,
        platform: &str,
        sender: mpsc::UnboundedSender<String>,
        now: i64,
    ) {
        if self.agents.contains_key(agent_id) {
            debug!(agent_id, "re-authentication replaces existing agent entry");
        }
        self.agents.insert(agent_id.to_string(), AgentConnection {
            agent_id: agent_id.to_string(),
            platform: platform.to_string(),
            sender: Some(sender),
            connected_at: now,
            last_seen: now,
            status: AgentStatus::Authenticated,
        });
    }

    pub fn get(&self, agent_id: &str) -> Option<&AgentConnection> {
        self.agents.get(agent_id)
    }

    pub fn get_mut(&mut self, agent_id: &str) -> Option<&mut AgentConnection> {
        self.agents.get_mut(agent_id)
    }

    /// Refresh liveness for an agent, optionally advancing its status.
    pub fn touch(&mut self, agent_id: &str, now: i64, status: Option<AgentStatus>) {
        if let Some(agent) = self.agents.get_mut(agent_id) {
            agent.last_seen = now;
            if let Some(status) = status {
                agent.status = status;
            }
        }
    }

    /// Mark an agent's connection as gone. The entry itself stays until the
    /// idle sweep so history endpoints can still see it.
    pub fn mark_disconnected(&mut self, agent_id: &str) {
        if let Some(agent) = self.agents.get_mut(agent_id) {
            agent.sender = None;
            agent.status = AgentStatus::Disconnected;
        }
    }

    /// Connection-scoped teardown: mark the agent disconnected only when
    /// `sender` is still the registered channel. A newer handshake may have
    /// overwritten the entry (last-writer-wins); the stale connection's
    /// close must not clobber the winner.
    pub fn disconnect_channel(&mut self, agent_id: &str, sender: &mpsc::UnboundedSender<String>) {
        if let Some(agent) = self.agents.get_mut(agent_id)
            && agent.sender.as_ref().is_some_and(|s| s.same_channel(sender))
        {
            agent.sender = None;
            agent.status = AgentStatus::Disconnected;
        }
    }

    /// Remove agents whose `last_seen` is older than `idle_timeout_ms`.
    /// Called on demand from the dispatch paths, never from a timer.
    pub fn sweep_idle(&mut self, now: i64, idle_timeout_ms: i64) -> usize {
        let before = self.agents.len();
        self.agents
            .retain(|_, a| now - a.last_seen <= idle_timeout_ms);
        let removed = before - self.agents.len();
        if removed > 0 {
            info!(removed, "swept idle agents");
        }
        removed
    }

    pub fn list(&self) -> impl Iterator<Item = &AgentConnection> {
        self.agents.values()
    }

    /// Agents eligible for broadcast fan-out.
    pub fn broadcast_targets(&self) -> Vec<String> {
        self.agents
            .values()
            .filter(|a| {
                matches!(a.status, AgentStatus::Authenticated | AgentStatus::Active)
            })
            .map(|a| a.agent_id.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.agents.len()
    }
}
