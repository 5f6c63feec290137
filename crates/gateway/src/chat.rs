//! Chat message, typing, reaction and call-signaling handlers.
//!
//! Messages are persisted before they fan out, so broadcast order follows
//! persistence completion rather than submission order. Typing and call
//! signaling are ephemeral and never touch storage; a missing target is a
//! silent drop.

use {
    serde_json::json,
    tokio::sync::mpsc,
    tracing::{debug, warn},
};

use beacon_protocol::{
    ChatMessage, ErrorShape, SendMessagePayload, error_codes, events, UserProfile,
};

use crate::{
    broadcast::{BroadcastOpts, broadcast, emit_direct, send_to_user},
    state::GatewayState,
};

struct SessionIdentity {
    user_id: String,
    username: String,
}

async fn identity(state: &GatewayState, conn_id: &str) -> Option<SessionIdentity> {
    let sessions = state.sessions.read().await;
    sessions.get(conn_id).map(|s| SessionIdentity {
        user_id: s.user_id.clone(),
        username: s.username.clone(),
    })
}

fn not_authenticated(state: &GatewayState, sender: &mpsc::UnboundedSender<String>) {
    emit_direct(
        state,
        sender,
        events::ERROR,
        json!(ErrorShape::new(
            error_codes::NOT_AUTHENTICATED,
            "Authenticate before sending chat events",
        )),
    );
}

/// Persist and fan out a chat message.
///
/// An unauthenticated connection gets an `error` frame but stays open. A
/// persistence failure is reported to the sender only and nothing is
/// broadcast.
pub async fn handle_send_message(
    state: &GatewayState,
    conn_id: &str,
    sender: &mpsc::UnboundedSender<String>,
    payload: SendMessagePayload,
) {
    let Some(who) = identity(state, conn_id).await else {
        not_authenticated(state, sender);
        return;
    };

    let room = payload
        .room
        .clone()
        .unwrap_or_else(|| state.default_room.clone());

    // Hydrate the sender profile from the store so avatar and flags are
    // current; fall back to the session's identity if lookup fails.
    let profile = match state.services.users.find_by_id(&who.user_id).await {
        Ok(Some(profile)) => profile,
        _ => UserProfile {
            user_id: who.user_id.clone(),
            username: who.username.clone(),
            avatar: None,
            is_online: true,
        },
    };

    let mut message = ChatMessage::new(profile, payload.content, &room)
        .with_kind(payload.kind)
        .with_reply_to(payload.reply_to);
    if let Some(file) = payload.file {
        message = message.with_file(file);
    }

    if let Err(err) = state.services.messages.save(&message).await {
        warn!(user_id = %who.user_id, error = %err, "failed to persist message");
        emit_direct(
            state,
            sender,
            events::ERROR,
            json!(ErrorShape::new(
                error_codes::PERSISTENCE_FAILED,
                "Message could not be saved",
            )),
        );
        return;
    }

    broadcast(
        state,
        events::NEW_MESSAGE,
        json!(message),
        BroadcastOpts::room(room),
    )
    .await;
}

/// Relay a typing indicator to everyone except the typist. Unauthenticated
/// connections are ignored.
pub async fn handle_typing(state: &GatewayState, conn_id: &str, is_typing: bool) {
    let Some(who) = identity(state, conn_id).await else {
        return;
    };
    broadcast(
        state,
        events::USER_TYPING,
        json!({
            "userId": who.user_id,
            "username": who.username,
            "isTyping": is_typing,
        }),
        BroadcastOpts::default().excluding(conn_id),
    )
    .await;
}

/// Apply a reaction and fan the updated reaction set out to the message's
/// room. A user's repeat reaction replaces the earlier one.
pub async fn handle_add_reaction(
    state: &GatewayState,
    conn_id: &str,
    sender: &mpsc::UnboundedSender<String>,
    message_id: &str,
    emoji: &str,
) {
    let Some(who) = identity(state, conn_id).await else {
        not_authenticated(state, sender);
        return;
    };

    match state
        .services
        .messages
        .apply_reaction(message_id, &who.user_id, emoji)
        .await
    {
        Ok(Some(message)) => {
            broadcast(
                state,
                events::MESSAGE_REACTION,
                json!({
                    "messageId": message.id,
                    "reactions": message.reactions,
                }),
                BroadcastOpts::room(message.room),
            )
            .await;
        }
        Ok(None) => {
            emit_direct(
                state,
                sender,
                events::ERROR,
                json!(ErrorShape::new(
                    error_codes::MESSAGE_NOT_FOUND,
                    "No message with that id",
                )),
            );
        }
        Err(err) => {
            warn!(message_id, error = %err, "failed to apply reaction");
            emit_direct(
                state,
                sender,
                events::ERROR,
                json!(ErrorShape::new(
                    error_codes::PERSISTENCE_FAILED,
                    "Reaction could not be saved",
                )),
            );
        }
    }
}

/// Route a call invitation to the callee's sessions. If the callee has no
/// live session the request is dropped; the caller learns nothing.
pub async fn handle_call_request(
    state: &GatewayState,
    conn_id: &str,
    target_user_id: &str,
    call_type: &str,
) {
    let Some(who) = identity(state, conn_id).await else {
        return;
    };
    let delivered = send_to_user(
        state,
        target_user_id,
        events::INCOMING_CALL,
        json!({
            "callerId": who.user_id,
            "callerName": who.username,
            "callType": call_type,
        }),
    )
    .await;
    if !delivered {
        debug!(target_user_id, "call request target has no live session");
    }
}

/// Route an accept/decline back to the original caller.
pub async fn handle_call_response(
    state: &GatewayState,
    conn_id: &str,
    caller_id: &str,
    accepted: bool,
) {
    let Some(who) = identity(state, conn_id).await else {
        return;
    };
    send_to_user(
        state,
        caller_id,
        events::CALL_RESPONSE,
        json!({
            "responderId": who.user_id,
            "responderName": who.username,
            "accepted": accepted,
        }),
    )
    .await;
}

/// Relay an opaque WebRTC signaling blob to the target user.
pub async fn handle_webrtc_signal(
    state: &GatewayState,
    conn_id: &str,
    target_user_id: &str,
    signal: serde_json::Value,
) {
    let Some(who) = identity(state, conn_id).await else {
        return;
    };
    send_to_user(
        state,
        target_user_id,
        events::WEBRTC_SIGNAL,
        json!({
            "fromUserId": who.user_id,
            "signal": signal,
        }),
    )
    .await;
}
