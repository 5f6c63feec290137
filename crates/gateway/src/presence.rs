//! Chat authentication and presence transitions.

use std::collections::HashSet;

use {serde_json::json, tokio::sync::mpsc, tracing::{info, warn}};

use beacon_protocol::{error_codes, events, now_ms};

use crate::{
    broadcast::{BroadcastOpts, broadcast},
    sessions::Session,
    state::GatewayState,
};

/// Chat authentication rejection. All variants surface the same generic
/// message; the code alone tells the client which category failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Authentication failed")]
    InvalidToken,
    #[error("Authentication failed")]
    UserNotFound,
    #[error("Authentication failed")]
    Persistence,
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidToken => error_codes::INVALID_TOKEN,
            Self::UserNotFound => error_codes::USER_NOT_FOUND,
            Self::Persistence => error_codes::PERSISTENCE_FAILED,
        }
    }
}

/// Authenticate a connection with a chat token and register its session.
///
/// On success the three join events are emitted in order: `userJoined` to
/// everyone else, then `activeUsers` and `messageHistory` to the new
/// connection. The caller emits the returned error as `authError` and
/// terminates the connection on failure.
pub async fn handle_authenticate(
    state: &GatewayState,
    conn_id: &str,
    sender: &mpsc::UnboundedSender<String>,
    token: &str,
) -> Result<(), AuthError> {
    let Some(claims) = state.services.tokens.verify(token) else {
        return Err(AuthError::InvalidToken);
    };

    let profile = match state.services.users.find_by_id(&claims.user_id).await {
        Ok(Some(profile)) => profile,
        Ok(None) => return Err(AuthError::UserNotFound),
        Err(err) => {
            warn!(user_id = %claims.user_id, error = %err, "user lookup failed during auth");
            return Err(AuthError::Persistence);
        }
    };

    // A connection that re-authenticates sheds its previous identity first,
    // so the old user's presence winds down exactly as on disconnect.
    handle_disconnect(state, conn_id).await;

    if let Err(err) = state.services.users.set_online(&profile.user_id, true).await {
        warn!(user_id = %profile.user_id, error = %err, "failed to persist online flag");
    }

    state.sessions.write().await.register(Session {
        conn_id: conn_id.to_string(),
        user_id: profile.user_id.clone(),
        username: profile.username.clone(),
        sender: sender.clone(),
        rooms: HashSet::from([state.default_room.clone()]),
        connected_at: now_ms(),
    });
    info!(conn_id, user_id = %profile.user_id, "chat session authenticated");

    // Join sequence, in order: userJoined to peers, then the presence list
    // and history to the new connection. The list includes the joiner.
    let mut joined = profile.clone();
    joined.is_online = true;
    broadcast(
        state,
        events::USER_JOINED,
        json!(joined),
        BroadcastOpts::default().excluding(conn_id),
    )
    .await;

    let active = state
        .services
        .users
        .online_users()
        .await
        .unwrap_or_else(|err| {
            warn!(error = %err, "failed to load presence list");
            Vec::new()
        });
    crate::broadcast::emit_direct(state, sender, events::ACTIVE_USERS, json!(active));

    let history = state
        .services
        .messages
        .recent(state.history_limit)
        .await
        .unwrap_or_else(|err| {
            warn!(error = %err, "failed to load message history");
            Vec::new()
        });
    crate::broadcast::emit_direct(state, sender, events::MESSAGE_HISTORY, json!(history));

    Ok(())
}

/// Tear down a connection's session, if any. Safe to call more than once
/// for the same connection; repeat calls are no-ops.
///
/// The persisted online flag drops and `userLeft` goes out only when the
/// user's last session disconnects.
pub async fn handle_disconnect(state: &GatewayState, conn_id: &str) {
    let session = {
        let mut sessions = state.sessions.write().await;
        sessions.remove(conn_id)
    };
    let Some(session) = session else {
        return;
    };

    let remaining = state
        .sessions
        .read()
        .await
        .user_session_count(&session.user_id);
    if remaining > 0 {
        info!(conn_id, user_id = %session.user_id, remaining, "session closed, user still online");
        return;
    }

    if let Err(err) = state
        .services
        .users
        .set_online(&session.user_id, false)
        .await
    {
        warn!(user_id = %session.user_id, error = %err, "failed to clear online flag");
    }

    broadcast(
        state,
        events::USER_LEFT,
        json!({
            "userId": session.user_id,
            "username": session.username,
        }),
        BroadcastOpts::default(),
    )
    .await;
    info!(conn_id, user_id = %session.user_id, "user went offline");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::Value;

    use {
        beacon_config::BeaconConfig,
        beacon_protocol::UserProfile,
    };

    use super::*;
    use crate::{
        memory::{HmacTokenService, InMemoryUserService},
        services::GatewayServices,
    };

    async fn fixture() -> (Arc<GatewayState>, String, String) {
        let users = Arc::new(InMemoryUserService::new());
        users
            .seed(UserProfile {
                user_id: "u1".into(),
                username: "alice".into(),
                avatar: None,
                is_online: false,
            })
            .await;
        users
            .seed(UserProfile {
                user_id: "u2".into(),
                username: "bob".into(),
                avatar: None,
                is_online: false,
            })
            .await;

        let tokens = HmacTokenService::new("test-secret", 86_400_000);
        let alice = tokens.issue("u1", "alice", now_ms());
        let bob = tokens.issue("u2", "bob", now_ms());

        let services = GatewayServices {
            users,
            messages: Arc::new(crate::memory::InMemoryMessageService::default()),
            tokens: Arc::new(tokens),
        };
        let state = GatewayState::new(&BeaconConfig::default(), services);
        (state, alice, bob)
    }

    fn recv_event(rx: &mut mpsc::UnboundedReceiver<String>) -> Value {
        serde_json::from_str(&rx.try_recv().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn join_sequence_is_ordered_and_list_includes_self() {
        let (state, alice, bob) = fixture().await;

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        handle_authenticate(&state, "c1", &tx1, &alice)
            .await
            .unwrap();

        let (tx2, mut rx2) = mpsc::unbounded_channel();
        handle_authenticate(&state, "c2", &tx2, &bob).await.unwrap();

        // The new connection receives activeUsers then messageHistory,
        // never its own userJoined.
        let first = recv_event(&mut rx2);
        assert_eq!(first["event"], "activeUsers");
        let listed: Vec<&str> = first["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|u| u["userId"].as_str().unwrap())
            .collect();
        assert!(listed.contains(&"u2"), "presence list includes the joiner");
        assert!(listed.contains(&"u1"));
        assert_eq!(recv_event(&mut rx2)["event"], "messageHistory");
        assert!(rx2.try_recv().is_err());

        // The existing peer saw bob's userJoined.
        // (Skip alice's own join sequence first.)
        let mut saw_joined = false;
        while let Ok(raw) = rx1.try_recv() {
            let frame: Value = serde_json::from_str(&raw).unwrap();
            if frame["event"] == "userJoined" {
                assert_eq!(frame["data"]["userId"], "u2");
                assert_eq!(frame["data"]["isOnline"], true);
                saw_joined = true;
            }
        }
        assert!(saw_joined);
    }

    #[tokio::test]
    async fn bad_token_and_unknown_user_are_rejected() {
        let (state, alice, _) = fixture().await;
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = handle_authenticate(&state, "c1", &tx, "garbage")
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::InvalidToken);
        assert_eq!(err.code(), error_codes::INVALID_TOKEN);

        let tokens = HmacTokenService::new("test-secret", 86_400_000);
        let ghost = tokens.issue("u404", "ghost", now_ms());
        let err = handle_authenticate(&state, "c1", &tx, &ghost)
            .await
            .unwrap_err();
        assert_eq!(err.code(), error_codes::USER_NOT_FOUND);

        // Failed auth never registers a session.
        assert_eq!(state.session_count().await, 0);
        let _ = alice;
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_and_scopes_user_left_to_last_session() {
        let (state, alice, bob) = fixture().await;

        let (tx1, _rx1) = mpsc::unbounded_channel();
        handle_authenticate(&state, "c1", &tx1, &alice)
            .await
            .unwrap();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        handle_authenticate(&state, "c2", &tx2, &alice)
            .await
            .unwrap();
        let (tx3, mut rx3) = mpsc::unbounded_channel();
        handle_authenticate(&state, "c3", &tx3, &bob).await.unwrap();
        while rx3.try_recv().is_ok() {}

        // First tab closes: no userLeft, still online.
        handle_disconnect(&state, "c1").await;
        assert!(rx3.try_recv().is_err());
        assert_eq!(
            state.services.users.online_users().await.unwrap().len(),
            2
        );

        // Last tab closes: userLeft broadcast, flag cleared.
        handle_disconnect(&state, "c2").await;
        let frame = recv_event(&mut rx3);
        assert_eq!(frame["event"], "userLeft");
        assert_eq!(frame["data"]["userId"], "u1");
        let online = state.services.users.online_users().await.unwrap();
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].user_id, "u2");

        // Repeat disconnects for the same connection are no-ops.
        handle_disconnect(&state, "c1").await;
        handle_disconnect(&state, "c2").await;
        assert!(rx3.try_recv().is_err());
        assert_eq!(state.session_count().await, 1);
    }

    #[tokio::test]
    async fn reauthentication_as_another_user_releases_the_first() {
        let (state, alice, bob) = fixture().await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        handle_authenticate(&state, "c1", &tx, &alice)
            .await
            .unwrap();
        while rx.try_recv().is_ok() {}

        handle_authenticate(&state, "c1", &tx, &bob).await.unwrap();

        // alice is offline, bob owns the connection.
        let online = state.services.users.online_users().await.unwrap();
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].user_id, "u2");

        let sessions = state.sessions.read().await;
        assert!(sessions.sessions_for_user("u1").is_empty());
        assert_eq!(sessions.user_session_count("u2"), 1);
        assert_eq!(sessions.count(), 1);
    }

    #[tokio::test]
    async fn disconnect_of_unknown_connection_is_noop() {
        let (state, _, _) = fixture().await;
        handle_disconnect(&state, "never-registered").await;
        assert_eq!(state.session_count().await, 0);
    }
}
