//! Fan-out helpers for chat sessions.
//!
//! Every outbound event goes through here so the envelope is serialized
//! once and the sequence counter is allocated exactly once per event. Send
//! failures mean the target's write loop has gone away; the disconnect path
//! will clean the session up, so failures here are logged and skipped.

use {serde_json::Value, tracing::warn};

use {beacon_protocol::EventFrame, tokio::sync::mpsc};

use crate::state::GatewayState;

/// Scope of a broadcast.
#[derive(Debug, Default)]
pub struct BroadcastOpts {
    /// Deliver only to sessions in this room; `None` reaches every session.
    pub room: Option<String>,
    /// Connection id to skip, typically the originator.
    pub exclude_conn: Option<String>,
}

impl BroadcastOpts {
    pub fn room(room: impl Into<String>) -> Self {
        Self {
            room: Some(room.into()),
            ..Self::default()
        }
    }

    pub fn excluding(mut self, conn_id: impl Into<String>) -> Self {
        self.exclude_conn = Some(conn_id.into());
        self
    }
}

/// Emit one event to every matching session. Returns the number of sessions
/// the frame was handed to.
pub async fn broadcast(
    state: &GatewayState,
    event: &str,
    data: Value,
    opts: BroadcastOpts,
) -> usize {
    let frame = match EventFrame::new(event, data, state.next_seq()).to_json() {
        Ok(frame) => frame,
        Err(err) => {
            warn!(event, error = %err, "failed to serialize broadcast frame");
            return 0;
        }
    };

    let sessions = state.sessions.read().await;
    let mut delivered = 0;
    for session in sessions.iter() {
        if opts
            .exclude_conn
            .as_deref()
            .is_some_and(|c| c == session.conn_id)
        {
            continue;
        }
        if let Some(room) = opts.room.as_deref()
            && !session.in_room(room)
        {
            continue;
        }
        if session.send(&frame) {
            delivered += 1;
        }
    }
    delivered
}

/// Deliver one event to every session a user holds. Returns false when the
/// user has no live session, which callers treat as a silent drop.
pub async fn send_to_user(state: &GatewayState, user_id: &str, event: &str, data: Value) -> bool {
    let frame = match EventFrame::new(event, data, state.next_seq()).to_json() {
        Ok(frame) => frame,
        Err(err) => {
            warn!(event, error = %err, "failed to serialize unicast frame");
            return false;
        }
    };

    let sessions = state.sessions.read().await;
    let targets = sessions.sessions_for_user(user_id);
    if targets.is_empty() {
        return false;
    }
    let mut delivered = false;
    for session in targets {
        delivered |= session.send(&frame);
    }
    delivered
}

/// Send directly to a write handle, for connections not yet registered as a
/// session (pre-auth errors, agent frames).
pub fn emit_direct(
    state: &GatewayState,
    sender: &mpsc::UnboundedSender<String>,
    event: &str,
    data: Value,
) -> bool {
    match EventFrame::new(event, data, state.next_seq()).to_json() {
        Ok(frame) => sender.send(frame).is_ok(),
        Err(err) => {
            warn!(event, error = %err, "failed to serialize direct frame");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use serde_json::json;

    use beacon_config::BeaconConfig;

    use super::*;
    use crate::{services::GatewayServices, sessions::Session};

    async fn state_with_sessions(
        entries: &[(&str, &str, &str)],
    ) -> (
        std::sync::Arc<GatewayState>,
        Vec<mpsc::UnboundedReceiver<String>>,
    ) {
        let state = GatewayState::new(
            &BeaconConfig::default(),
            GatewayServices::in_memory("test-secret", 86_400_000),
        );
        let mut receivers = Vec::new();
        for (conn_id, user_id, room) in entries {
            let (tx, rx) = mpsc::unbounded_channel();
            state.sessions.write().await.register(Session {
                conn_id: (*conn_id).into(),
                user_id: (*user_id).into(),
                username: format!("user-{user_id}"),
                sender: tx,
                rooms: HashSet::from([(*room).to_string()]),
                connected_at: 0,
            });
            receivers.push(rx);
        }
        (state, receivers)
    }

    #[tokio::test]
    async fn room_broadcast_skips_other_rooms_and_excluded_conn() {
        let (state, mut rxs) = state_with_sessions(&[
            ("c1", "u1", "general"),
            ("c2", "u2", "general"),
            ("c3", "u3", "dev"),
        ])
        .await;

        let delivered = broadcast(
            &state,
            "newMessage",
            json!({"content": "hi"}),
            BroadcastOpts::room("general").excluding("c1"),
        )
        .await;

        assert_eq!(delivered, 1);
        assert!(rxs[0].try_recv().is_err());
        assert!(rxs[1].try_recv().is_ok());
        assert!(rxs[2].try_recv().is_err());
    }

    #[tokio::test]
    async fn unicast_reaches_every_session_of_user() {
        let (state, mut rxs) =
            state_with_sessions(&[("c1", "u1", "general"), ("c2", "u1", "general")]).await;

        assert!(send_to_user(&state, "u1", "incomingCall", json!({})).await);
        assert!(rxs[0].try_recv().is_ok());
        assert!(rxs[1].try_recv().is_ok());
    }

    #[tokio::test]
    async fn unicast_to_absent_user_is_false() {
        let (state, _rxs) = state_with_sessions(&[("c1", "u1", "general")]).await;
        assert!(!send_to_user(&state, "nobody", "incomingCall", json!({})).await);
    }
}
