//! Wire protocol shared by the gateway, chat clients and remote agents.
//!
//! Everything that crosses a connection boundary is defined here: inbound
//! frames (validated at the edge, never duck-typed), the outbound event
//! envelope, stable error codes, and the chat message model. Transport and
//! registry logic live in `beacon-gateway` / `beacon-dispatch`.

pub mod error;
pub mod frames;
pub mod message;

pub use {
    error::{ErrorShape, error_codes},
    frames::{
        AgentAuthPayload, ClientFrame, CommandResponsePayload, EventFrame, SendMessagePayload,
        events,
    },
    message::{ChatMessage, FileDescriptor, MessageKind, Reaction, UserProfile},
};

/// Protocol revision advertised on `/health` and in the startup banner.
pub const PROTOCOL_VERSION: u32 = 2;

/// Maximum allowed skew between a signed handshake timestamp and server
/// time, in milliseconds. Both stale and future-dated handshakes outside
/// this window are rejected regardless of signature validity.
pub const REPLAY_WINDOW_MS: i64 = 300_000;

/// How long a command (and its retained response) stays in the live
/// correlation table, measured from creation. Eviction ignores whether a
/// response ever arrived.
pub const COMMAND_RETENTION_MS: i64 = 600_000;

/// Agents whose `last_seen` is older than this are purged by the
/// on-demand sweep.
pub const AGENT_IDLE_TIMEOUT_MS: i64 = 1_800_000;

/// Default number of recent messages pushed to a freshly authenticated
/// chat connection.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Room a chat session joins on authentication when none is given.
pub const DEFAULT_ROOM: &str = "general";

/// Current wall-clock time as milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
