//! Agent authentication and command dispatch.
//!
//! Transport-agnostic: the gateway hands each authenticated agent's write
//! channel to the [`Engine`], which owns the agent registry, the command
//! table and the response correlation table. The engine is single-writer —
//! the gateway wraps it in one lock and every mutation happens behind it,
//! so no operation ever observes a half-applied command.

pub mod engine;
pub mod error;
pub mod handshake;
pub mod registry;

pub use {
    engine::{BroadcastDelivery, Command, CommandResponse, CommandStatus, Engine, Priority},
    error::{DispatchError, HandshakeError},
    handshake::{HandshakeAck, HandshakeRequest, sign_handshake, verify_handshake},
    registry::{AgentConnection, AgentRegistry, AgentStatus},
};
