//! Real-time session hub and agent command gateway.
//!
//! A single websocket endpoint serves two kinds of peers. Chat clients
//! authenticate with a signed token and get presence, room fan-out
//! messaging, reactions, typing indicators and call signaling. Agents
//! authenticate with an HMAC handshake and receive dispatched commands,
//! reporting results asynchronously by command id. A small REST surface
//! drives agent dispatch and command inspection.
//!
//! Lifecycle of a connection:
//!
//! 1. The socket upgrades at `/ws` and gets an outbound write channel.
//! 2. The first meaningful frame is a chat `authenticate` or an
//!    `agent:authenticate` handshake; until then only errors flow.
//! 3. Frames are handled in arrival order per connection; every outbound
//!    event carries a gateway-wide sequence number.
//! 4. On close, chat teardown and agent teardown both run; each is a
//!    no-op when the connection never held that role.

pub mod broadcast;
pub mod chat;
pub mod memory;
pub mod presence;
pub mod server;
pub mod services;
pub mod sessions;
pub mod state;
pub mod ws;

pub use {
    server::{build_gateway_app, start_gateway},
    services::{GatewayServices, MessageService, TokenService, UserService},
    state::GatewayState,
};
