//! Command dispatch and response correlation.
//!
//! Commands are created here, pushed to the owning agent's connection on a
//! channel named after their module, and retained for a fixed window so a
//! later response can be matched back by id. Eviction is time-based and
//! unconditional: a command that never hears back simply vanishes from the
//! live table when the window closes.

use std::collections::HashMap;

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tracing::{debug, info, warn},
};

use beacon_protocol::{
    EventFrame, events,
    frames::{AgentAuthPayload, CommandResponsePayload},
};

use crate::{
    error::{DispatchError, HandshakeError},
    handshake::{HandshakeAck, HandshakeRequest, sign, verify_handshake},
    registry::{AgentRegistry, AgentStatus},
};

// ── Types ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Sent,
    Completed,
    Error,
}

/// A command addressed to one agent. Status advances monotonically
/// (`Pending -> Sent -> Completed|Error`) and is never rolled back.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub id: String,
    pub agent_id: String,
    pub module: String,
    pub action: String,
    pub params: Value,
    pub priority: Priority,
    pub timestamp: i64,
    pub status: CommandStatus,
    /// HMAC over `id + action` under the shared secret. Binds the command
    /// to the channel but not to its params or timestamp — agents verify
    /// this exact scheme, so it is kept bit-compatible.
    pub auth_hash: String,
}

impl Command {
    /// The payload pushed on `command:<module>`. Matches what agents
    /// expect on the wire; the bookkeeping `status` field stays server-side.
    pub fn wire_payload(&self) -> Value {
        serde_json::json!({
            "id": self.id,
            "agentId": self.agent_id,
            "module": self.module,
            "action": self.action,
            "params": self.params,
            "priority": self.priority,
            "timestamp": self.timestamp,
            "authHash": self.auth_hash,
        })
    }
}

/// A response correlated to exactly one command. At most one is retained
/// per command; a duplicate overwrites the first.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub command_id: String,
    pub agent_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<i64>,
    pub received_at: i64,
}

/// Per-agent outcome of a broadcast fan-out.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastDelivery {
    pub agent_id: String,
    pub command_id: String,
    pub delivered: bool,
}

// ── Engine ───────────────────────────────────────────────────────────────────

/// Owns the agent registry, command table and response table. Single-writer:
/// the gateway serializes all mutation behind one lock, so a command is
/// inserted already `Sent` and no caller observes an intermediate state.
pub struct Engine {
    secret: String,
    retention_ms: i64,
    idle_timeout_ms: i64,
    pub registry: AgentRegistry,
    commands: HashMap<String, Command>,
    responses: HashMap<String, CommandResponse>,
}

impl Engine {
    pub fn new(secret: impl Into<String>, retention_ms: i64, idle_timeout_ms: i64) -> Self {
        Self {
            secret: secret.into(),
            retention_ms,
            idle_timeout_ms,
            registry: AgentRegistry::new(),
            commands: HashMap::new(),
            responses: HashMap::new(),
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Verify an agent handshake and register (or overwrite) its entry.
    pub fn handshake(
        &mut self,
        payload: AgentAuthPayload,
        sender: tokio::sync::mpsc::UnboundedSender<String>,
        now: i64,
    ) -> Result<HandshakeAck, HandshakeError> {
        let req = HandshakeRequest::try_from(payload)?;
        verify_handshake(&self.secret, &req, now)?;
        self.registry
            .register(&req.agent_id, &req.platform, sender, now);
        info!(agent_id = %req.agent_id, platform = %req.platform, "agent authenticated");
        Ok(HandshakeAck::new(&self.secret, &req.agent_id, now))
    }

    fn build_command(
        &self,
        agent_id: &str,
        module: &str,
        action: &str,
        params: Value,
        priority: Priority,
        now: i64,
    ) -> Command {
        let id = uuid::Uuid::new_v4().to_string();
        let auth_hash = sign(&self.secret, &format!("{id}{action}"));
        Command {
            id,
            agent_id: agent_id.to_string(),
            module: module.to_string(),
            action: action.to_string(),
            params,
            priority,
            timestamp: now,
            status: CommandStatus::Pending,
            auth_hash,
        }
    }

    /// Dispatch a command to one agent over its live connection.
    ///
    /// Fails with `AgentNotFound` when no registry entry exists and with
    /// `AgentUnreachable` when the entry is there but its transport handle
    /// is stale — distinguishable so callers can decide whether to retry.
    /// Neither failure mutates the command table.
    pub fn dispatch(
        &mut self,
        agent_id: &str,
        module: &str,
        action: &str,
        params: Value,
        priority: Priority,
        seq: u64,
        now: i64,
    ) -> Result<String, DispatchError> {
        let Some(agent) = self.registry.get(agent_id) else {
            return Err(DispatchError::AgentNotFound(agent_id.to_string()));
        };
        if !agent.is_reachable() {
            return Err(DispatchError::AgentUnreachable(agent_id.to_string()));
        }

        let mut command = self.build_command(agent_id, module, action, params, priority, now);
        let frame =
            EventFrame::new(events::command_channel(module), command.wire_payload(), seq)
                .to_json()?;

        let sent = self
            .registry
            .get(agent_id)
            .is_some_and(|a| a.send(&frame));
        if !sent {
            return Err(DispatchError::AgentUnreachable(agent_id.to_string()));
        }

        command.status = CommandStatus::Sent;
        let id = command.id.clone();
        debug!(agent_id, module, action, command_id = %id, "command dispatched");
        self.commands.insert(id.clone(), command);
        Ok(id)
    }

    /// The HTTP-route branch of dispatch: same delivery, but the agent's
    /// status moves to `command_sent` instead of staying where it was.
    pub fn dispatch_from_request(
        &mut self,
        agent_id: &str,
        module: &str,
        action: &str,
        params: Value,
        priority: Priority,
        seq: u64,
        now: i64,
    ) -> Result<String, DispatchError> {
        let id = self.dispatch(agent_id, module, action, params, priority, seq, now)?;
        self.registry
            .touch(agent_id, now, Some(AgentStatus::CommandSent));
        Ok(id)
    }

    /// Fan one command template out to every authenticated or active agent.
    ///
    /// Each recipient gets its own command id. A delivery failure on one
    /// target never aborts the remaining sends; the per-agent outcome is
    /// returned and undelivered commands are recorded with `Error` status.
    pub fn broadcast(
        &mut self,
        module: &str,
        action: &str,
        params: Value,
        priority: Priority,
        mut next_seq: impl FnMut() -> u64,
        now: i64,
    ) -> Vec<BroadcastDelivery> {
        let targets = self.registry.broadcast_targets();
        let mut deliveries = Vec::with_capacity(targets.len());

        for agent_id in targets {
            let mut command =
                self.build_command(&agent_id, module, action, params.clone(), priority, now);
            let delivered = EventFrame::new(
                events::command_channel(module),
                command.wire_payload(),
                next_seq(),
            )
            .to_json()
            .map(|frame| {
                self.registry
                    .get(&agent_id)
                    .is_some_and(|a| a.send(&frame))
            })
            .unwrap_or(false);

            command.status = if delivered {
                CommandStatus::Sent
            } else {
                warn!(agent_id = %agent_id, command_id = %command.id, "broadcast delivery failed");
                CommandStatus::Error
            };
            deliveries.push(BroadcastDelivery {
                agent_id: agent_id.clone(),
                command_id: command.id.clone(),
                delivered,
            });
            self.commands.insert(command.id.clone(), command);
        }

        info!(
            module,
            action,
            total = deliveries.len(),
            failed = deliveries.iter().filter(|d| !d.delivered).count(),
            "broadcast fan-out complete"
        );
        deliveries
    }

    /// Correlate a response back to its command.
    ///
    /// Unknown ids fail with `CommandNotFound` on every ingestion path; the
    /// REST route surfaces it as 404, the live route logs and drops it.
    /// A known command moves to the reported terminal status and the
    /// agent's liveness is refreshed.
    pub fn record_response(
        &mut self,
        payload: &CommandResponsePayload,
        now: i64,
    ) -> Result<(), DispatchError> {
        let Some(command) = self.commands.get_mut(&payload.command_id) else {
            return Err(DispatchError::CommandNotFound(payload.command_id.clone()));
        };

        command.status = if payload.status == "error" {
            CommandStatus::Error
        } else {
            CommandStatus::Completed
        };

        // Last write wins on duplicate responses.
        self.responses
            .insert(payload.command_id.clone(), CommandResponse {
                command_id: payload.command_id.clone(),
                agent_id: payload.agent_id.clone(),
                status: payload.status.clone(),
                data: payload.data.clone(),
                error: payload.error.clone(),
                execution_time: payload.execution_time,
                received_at: now,
            });

        self.registry
            .touch(&payload.agent_id, now, Some(AgentStatus::Active));
        Ok(())
    }

    /// Liveness-only update from an agent ping.
    pub fn record_ping(&mut self, agent_id: &str, now: i64) {
        self.registry.touch(agent_id, now, None);
    }

    pub fn get_command(&self, id: &str) -> Option<(&Command, Option<&CommandResponse>)> {
        self.commands.get(id).map(|c| (c, self.responses.get(id)))
    }

    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    /// Time-based eviction, called on demand from the dispatch paths.
    ///
    /// Commands older than the retention window disappear from the live
    /// correlation table whether or not a response ever arrived; idle
    /// agents are purged in the same pass.
    pub fn sweep(&mut self, now: i64) {
        let retention = self.retention_ms;
        let before = self.commands.len();
        self.commands.retain(|_, c| now - c.timestamp <= retention);
        let commands = &self.commands;
        self.responses.retain(|id, _| commands.contains_key(id));
        let evicted = before - self.commands.len();
        if evicted > 0 {
            debug!(evicted, "evicted expired commands");
        }
        self.registry.sweep_idle(now, self.idle_timeout_ms);
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    const SECRET: &str = "engine-test-secret";
    const NOW: i64 = 1_700_000_000_000;

    fn engine() -> Engine {
        Engine::new(SECRET, 600_000, 1_800_000)
    }

    fn connect(engine: &mut Engine, agent_id: &str) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        engine.registry.register(agent_id, "linux", tx, NOW);
        rx
    }

    fn response(command_id: &str, agent_id: &str, status: &str) -> CommandResponsePayload {
        serde_json::from_value(serde_json::json!({
            "commandId": command_id,
            "agentId": agent_id,
            "status": status,
        }))
        .unwrap()
    }

    #[test]
    fn handshake_registers_agent_and_returns_signed_ack() {
        let mut engine = engine();
        let (tx, _rx) = mpsc::unbounded_channel();
        let payload: AgentAuthPayload = serde_json::from_value(serde_json::json!({
            "agentId": "ag-1",
            "platform": "linux",
            "timestamp": NOW - 1_000,
            "signature": crate::handshake::sign_handshake(SECRET, "ag-1", "linux", NOW - 1_000),
        }))
        .unwrap();

        let ack = engine.handshake(payload, tx, NOW).unwrap();
        assert_eq!(ack.status, "authenticated");
        assert_eq!(ack.agent_id, "ag-1");
        assert_eq!(
            engine.registry.get("ag-1").unwrap().status,
            AgentStatus::Authenticated
        );
    }

    #[test]
    fn handshake_outside_window_rejected_before_registration() {
        let mut engine = engine();
        let (tx, _rx) = mpsc::unbounded_channel();
        let stale = NOW - 400_000;
        let payload: AgentAuthPayload = serde_json::from_value(serde_json::json!({
            "agentId": "ag-1",
            "platform": "linux",
            "timestamp": stale,
            "signature": crate::handshake::sign_handshake(SECRET, "ag-1", "linux", stale),
        }))
        .unwrap();

        let err = engine.handshake(payload, tx, NOW).unwrap_err();
        assert_eq!(err, HandshakeError::StaleTimestamp);
        assert_eq!(err.to_string(), "Authentication timestamp expired");
        assert!(engine.registry.get("ag-1").is_none());
    }

    #[test]
    fn dispatch_to_unknown_agent_never_mutates_command_table() {
        let mut engine = engine();
        let err = engine
            .dispatch("ghost", "fs", "listFiles", serde_json::json!({}), Priority::Normal, 1, NOW)
            .unwrap_err();
        assert!(matches!(err, DispatchError::AgentNotFound(_)));
        assert_eq!(engine.command_count(), 0);
    }

    #[test]
    fn dispatch_to_stale_transport_is_unreachable_not_missing() {
        let mut engine = engine();
        let rx = connect(&mut engine, "ag-1");
        drop(rx);
        let err = engine
            .dispatch("ag-1", "fs", "listFiles", serde_json::json!({}), Priority::Normal, 1, NOW)
            .unwrap_err();
        assert!(matches!(err, DispatchError::AgentUnreachable(_)));
        assert_eq!(engine.command_count(), 0);
    }

    #[test]
    fn dispatched_command_reaches_agent_on_module_channel() {
        let mut engine = engine();
        let mut rx = connect(&mut engine, "ag-1");

        let id = engine
            .dispatch(
                "ag-1",
                "fs",
                "listFiles",
                serde_json::json!({"path": "/tmp"}),
                Priority::High,
                42,
                NOW,
            )
            .unwrap();

        let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["event"], "command:fs");
        assert_eq!(frame["seq"], 42);
        assert_eq!(frame["data"]["id"], id.as_str());
        assert_eq!(frame["data"]["action"], "listFiles");
        assert_eq!(frame["data"]["priority"], "high");
        // Wire payload carries the auth hash but not server-side status.
        assert!(frame["data"]["authHash"].is_string());
        assert!(frame["data"].get("status").is_none());

        let (stored, resp) = engine.get_command(&id).unwrap();
        assert_eq!(stored.status, CommandStatus::Sent);
        assert!(resp.is_none());
    }

    #[test]
    fn auth_hash_binds_id_and_action() {
        let mut engine = engine();
        let mut rx = connect(&mut engine, "ag-1");
        let id = engine
            .dispatch("ag-1", "fs", "listFiles", serde_json::json!({}), Priority::Normal, 1, NOW)
            .unwrap();
        let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(
            frame["data"]["authHash"],
            sign(SECRET, &format!("{id}listFiles"))
        );
    }

    #[test]
    fn request_path_dispatch_marks_agent_command_sent() {
        let mut engine = engine();
        let _rx = connect(&mut engine, "ag-1");
        engine
            .dispatch_from_request(
                "ag-1",
                "system",
                "reboot",
                serde_json::json!({}),
                Priority::Normal,
                1,
                NOW,
            )
            .unwrap();
        assert_eq!(
            engine.registry.get("ag-1").unwrap().status,
            AgentStatus::CommandSent
        );
    }

    #[test]
    fn broadcast_survives_individual_delivery_failure() {
        let mut engine = engine();
        let mut rx_a = connect(&mut engine, "a");
        let rx_b = connect(&mut engine, "b");
        let mut rx_c = connect(&mut engine, "c");
        drop(rx_b); // b's write loop is gone

        let mut seq = 0_u64;
        let deliveries = engine.broadcast(
            "system",
            "ping",
            serde_json::json!({}),
            Priority::Normal,
            || {
                seq += 1;
                seq
            },
            NOW,
        );

        assert_eq!(deliveries.len(), 3);
        let ids: std::collections::HashSet<_> =
            deliveries.iter().map(|d| d.command_id.clone()).collect();
        assert_eq!(ids.len(), 3, "every recipient gets a distinct command id");

        let failed: Vec<_> = deliveries.iter().filter(|d| !d.delivered).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].agent_id, "b");

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_c.try_recv().is_ok());
    }

    #[test]
    fn unknown_response_is_command_not_found() {
        let mut engine = engine();
        let err = engine
            .record_response(&response("nope", "ag-1", "completed"), NOW)
            .unwrap_err();
        assert!(matches!(err, DispatchError::CommandNotFound(_)));
    }

    #[test]
    fn response_completes_command_and_activates_agent() {
        let mut engine = engine();
        let _rx = connect(&mut engine, "ag-1");
        let id = engine
            .dispatch("ag-1", "fs", "listFiles", serde_json::json!({}), Priority::Normal, 1, NOW)
            .unwrap();

        engine
            .record_response(&response(&id, "ag-1", "completed"), NOW + 500)
            .unwrap();

        let (cmd, resp) = engine.get_command(&id).unwrap();
        assert_eq!(cmd.status, CommandStatus::Completed);
        assert_eq!(resp.unwrap().received_at, NOW + 500);

        let agent = engine.registry.get("ag-1").unwrap();
        assert_eq!(agent.status, AgentStatus::Active);
        assert_eq!(agent.last_seen, NOW + 500);
    }

    #[test]
    fn error_response_marks_command_error() {
        let mut engine = engine();
        let _rx = connect(&mut engine, "ag-1");
        let id = engine
            .dispatch("ag-1", "fs", "listFiles", serde_json::json!({}), Priority::Normal, 1, NOW)
            .unwrap();
        engine
            .record_response(&response(&id, "ag-1", "error"), NOW + 1)
            .unwrap();
        let (cmd, _) = engine.get_command(&id).unwrap();
        assert_eq!(cmd.status, CommandStatus::Error);
    }

    #[test]
    fn duplicate_response_overwrites_first() {
        let mut engine = engine();
        let _rx = connect(&mut engine, "ag-1");
        let id = engine
            .dispatch("ag-1", "fs", "listFiles", serde_json::json!({}), Priority::Normal, 1, NOW)
            .unwrap();

        engine
            .record_response(&response(&id, "ag-1", "completed"), NOW + 1)
            .unwrap();
        engine
            .record_response(&response(&id, "ag-1", "error"), NOW + 2)
            .unwrap();

        let (cmd, resp) = engine.get_command(&id).unwrap();
        assert_eq!(cmd.status, CommandStatus::Error);
        let resp = resp.unwrap();
        assert_eq!(resp.status, "error");
        assert_eq!(resp.received_at, NOW + 2);
    }

    #[test]
    fn sweep_evicts_commands_past_retention_even_when_completed() {
        let mut engine = engine();
        let _rx = connect(&mut engine, "ag-1");
        let id = engine
            .dispatch("ag-1", "fs", "listFiles", serde_json::json!({}), Priority::Normal, 1, NOW)
            .unwrap();
        engine
            .record_response(&response(&id, "ag-1", "completed"), NOW + 1)
            .unwrap();

        engine.sweep(NOW + 600_001);
        assert!(engine.get_command(&id).is_none());
        assert_eq!(engine.command_count(), 0);
    }

    #[test]
    fn sweep_keeps_commands_inside_retention() {
        let mut engine = engine();
        let _rx = connect(&mut engine, "ag-1");
        let id = engine
            .dispatch("ag-1", "fs", "listFiles", serde_json::json!({}), Priority::Normal, 1, NOW)
            .unwrap();
        engine.sweep(NOW + 599_999);
        assert!(engine.get_command(&id).is_some());
    }

    #[test]
    fn ping_updates_liveness_without_status_change() {
        let mut engine = engine();
        let _rx = connect(&mut engine, "ag-1");
        engine.record_ping("ag-1", NOW + 10_000);
        let agent = engine.registry.get("ag-1").unwrap();
        assert_eq!(agent.last_seen, NOW + 10_000);
        assert_eq!(agent.status, AgentStatus::Authenticated);
    }
}
