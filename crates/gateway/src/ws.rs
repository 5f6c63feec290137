//! WebSocket connection lifecycle.
//!
//! One task per connection reads frames and dispatches to the chat and
//! agent handlers; a second task drains the outbound channel into the
//! socket. A connection may authenticate as a chat session, an agent, or
//! both over its lifetime; cleanup runs both teardown paths and each is
//! idempotent.

use {
    axum::extract::ws::{Message, WebSocket},
    futures::{SinkExt, StreamExt},
    serde_json::json,
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use beacon_protocol::{ClientFrame, ErrorShape, error_codes, events, now_ms};

use crate::{broadcast::emit_direct, chat, presence, state::GatewayState};

pub async fn handle_connection(socket: WebSocket, state: std::sync::Arc<GatewayState>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    debug!(conn_id, "websocket connected");

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // Set once this connection completes an agent handshake.
    let mut agent_id: Option<String> = None;

    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        let frame: ClientFrame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(conn_id, error = %err, "unparseable frame");
                emit_direct(
                    &state,
                    &tx,
                    events::ERROR,
                    json!(ErrorShape::new(
                        error_codes::INVALID_REQUEST,
                        "Malformed frame",
                    )),
                );
                continue;
            }
        };

        match frame {
            ClientFrame::Authenticate { token } => {
                if let Err(err) = presence::handle_authenticate(&state, &conn_id, &tx, &token).await
                {
                    emit_direct(
                        &state,
                        &tx,
                        events::AUTH_ERROR,
                        json!({"error": err.to_string(), "code": err.code()}),
                    );
                    // Failed chat auth terminates the connection.
                    break;
                }
            }

            ClientFrame::SendMessage(payload) => {
                chat::handle_send_message(&state, &conn_id, &tx, payload).await;
            }
            ClientFrame::Typing { is_typing } => {
                chat::handle_typing(&state, &conn_id, is_typing).await;
            }
            ClientFrame::AddReaction { message_id, emoji } => {
                chat::handle_add_reaction(&state, &conn_id, &tx, &message_id, &emoji).await;
            }
            ClientFrame::CallRequest {
                target_user_id,
                call_type,
            } => {
                chat::handle_call_request(&state, &conn_id, &target_user_id, &call_type).await;
            }
            ClientFrame::CallResponse {
                caller_id,
                accepted,
            } => {
                chat::handle_call_response(&state, &conn_id, &caller_id, accepted).await;
            }
            ClientFrame::WebrtcSignal {
                target_user_id,
                signal,
            } => {
                chat::handle_webrtc_signal(&state, &conn_id, &target_user_id, signal).await;
            }

            ClientFrame::AgentAuthenticate(payload) => {
                let now = now_ms();
                let mut engine = state.engine.write().await;
                engine.sweep(now);
                match engine.handshake(payload, tx.clone(), now) {
                    Ok(ack) => {
                        agent_id = Some(ack.agent_id.clone());
                        drop(engine);
                        emit_direct(&state, &tx, events::AGENT_AUTHENTICATED, json!(ack));
                    }
                    Err(err) => {
                        drop(engine);
                        // Failed handshakes do not terminate the connection;
                        // the agent may retry with a fresh timestamp.
                        emit_direct(
                            &state,
                            &tx,
                            events::AGENT_AUTH_FAILED,
                            json!({"message": err.to_string(), "code": err.code()}),
                        );
                    }
                }
            }
            ClientFrame::CommandResponse(payload) => {
                let result = state.engine.write().await.record_response(&payload, now_ms());
                if let Err(err) = result {
                    // Late responses for evicted or unknown commands are
                    // dropped without an acknowledgment frame.
                    warn!(
                        conn_id,
                        command_id = %payload.command_id,
                        error = %err,
                        "dropped uncorrelatable command response"
                    );
                }
            }
            ClientFrame::AgentPing {
                agent_id: pinger, ..
            } => {
                state.engine.write().await.record_ping(&pinger, now_ms());
            }
        }
    }

    presence::handle_disconnect(&state, &conn_id).await;
    if let Some(agent_id) = agent_id {
        // Only tear down the registry entry if it still belongs to this
        // connection; a re-handshake elsewhere has already superseded it.
        state
            .engine
            .write()
            .await
            .registry
            .disconnect_channel(&agent_id, &tx);
        info!(conn_id, agent_id, "agent connection closed");
    }
    writer.abort();
    debug!(conn_id, "websocket closed");
}
