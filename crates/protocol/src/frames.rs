use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

use crate::message::{FileDescriptor, MessageKind};

/// Outbound event names emitted by the gateway.
pub mod events {
    pub const AUTH_ERROR: &str = "authError";
    pub const ACTIVE_USERS: &str = "activeUsers";
    pub const MESSAGE_HISTORY: &str = "messageHistory";
    pub const USER_JOINED: &str = "userJoined";
    pub const USER_LEFT: &str = "userLeft";
    pub const NEW_MESSAGE: &str = "newMessage";
    pub const MESSAGE_REACTION: &str = "messageReaction";
    pub const USER_TYPING: &str = "userTyping";
    pub const INCOMING_CALL: &str = "incomingCall";
    pub const CALL_RESPONSE: &str = "callResponse";
    pub const WEBRTC_SIGNAL: &str = "webrtc-signal";
    pub const AGENT_AUTHENTICATED: &str = "agent:authenticated";
    pub const AGENT_AUTH_FAILED: &str = "agent:auth_failed";
    pub const ERROR: &str = "error";

    /// Commands are pushed on a channel named after their module.
    pub fn command_channel(module: &str) -> String {
        format!("command:{module}")
    }
}

// ── Inbound frames ───────────────────────────────────────────────────────────

/// A frame received from a connection, chat or agent. Unknown events and
/// malformed payloads fail deserialization and are answered with an
/// `INVALID_REQUEST` error frame; they never reach a handler.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientFrame {
    #[serde(rename = "authenticate")]
    Authenticate { token: String },

    #[serde(rename = "sendMessage")]
    SendMessage(SendMessagePayload),

    #[serde(rename = "typing", rename_all = "camelCase")]
    Typing { is_typing: bool },

    #[serde(rename = "callRequest", rename_all = "camelCase")]
    CallRequest {
        target_user_id: String,
        call_type: String,
    },

    #[serde(rename = "callResponse", rename_all = "camelCase")]
    CallResponse { caller_id: String, accepted: bool },

    #[serde(rename = "webrtc-signal", rename_all = "camelCase")]
    WebrtcSignal {
        target_user_id: String,
        signal: Value,
    },

    #[serde(rename = "addReaction", rename_all = "camelCase")]
    AddReaction { message_id: String, emoji: String },

    /// Agent handshake. Fields are optional so an incomplete attempt is
    /// rejected with `MISSING_FIELDS` rather than an opaque parse error.
    #[serde(rename = "agent:authenticate")]
    AgentAuthenticate(AgentAuthPayload),

    #[serde(rename = "response:command")]
    CommandResponse(CommandResponsePayload),

    #[serde(rename = "response:ping", rename_all = "camelCase")]
    AgentPing {
        agent_id: String,
        timestamp: i64,
        #[serde(default)]
        status: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub content: String,
    #[serde(default, rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub file: Option<FileDescriptor>,
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub reply_to: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentAuthPayload {
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub signature: Option<String>,
}

/// Asynchronous result an agent reports for a previously dispatched command.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponsePayload {
    pub command_id: String,
    pub agent_id: String,
    #[serde(default)]
    pub module: Option<String>,
    pub status: String,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub execution_time: Option<i64>,
}

// ── Outbound envelope ────────────────────────────────────────────────────────

/// Envelope for every server-emitted event. `seq` is a gateway-wide
/// monotonic counter so clients can detect reordering across channels.
#[derive(Debug, Clone, Serialize)]
pub struct EventFrame {
    pub event: String,
    pub data: Value,
    pub seq: u64,
}

impl EventFrame {
    pub fn new(event: impl Into<String>, data: Value, seq: u64) -> Self {
        Self {
            event: event.into(),
            data,
            seq,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
