//! Chat session registry.
//!
//! One [`Session`] per authenticated socket. A user may hold several
//! concurrent sessions (multiple tabs); the registry tracks the mapping in
//! both directions so presence transitions can tell "last tab closed" apart
//! from "one of several closed".

use std::collections::{HashMap, HashSet};

use {tokio::sync::mpsc, tracing::trace};

/// An authenticated chat connection.
#[derive(Debug)]
pub struct Session {
    pub conn_id: String,
    pub user_id: String,
    pub username: String,
    /// Write half of the connection's outbound channel.
    pub sender: mpsc::UnboundedSender<String>,
    pub rooms: HashSet<String>,
    pub connected_at: i64,
}

impl Session {
    /// Push a serialized frame to this session. Returns false when the
    /// connection's write loop has gone away.
    pub fn send(&self, frame: &str) -> bool {
        self.sender.send(frame.to_string()).is_ok()
    }

    pub fn in_room(&self, room: &str) -> bool {
        self.rooms.contains(room)
    }
}

/// All live chat sessions, keyed by connection id, with a reverse index
/// from user id to that user's connection ids.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, Session>,
    by_user: HashMap<String, HashSet<String>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, session: Session) {
        // A connection may re-authenticate; drop any session it already
        // holds so the reverse index never points at the wrong user.
        self.remove(&session.conn_id);
        trace!(conn_id = %session.conn_id, user_id = %session.user_id, "session registered");
        self.by_user
            .entry(session.user_id.clone())
            .or_default()
            .insert(session.conn_id.clone());
        self.sessions.insert(session.conn_id.clone(), session);
    }

    /// Remove a session by connection id. Returns the removed session, or
    /// `None` when the id was never registered or already removed.
    pub fn remove(&mut self, conn_id: &str) -> Option<Session> {
        let session = self.sessions.remove(conn_id)?;
        if let Some(conns) = self.by_user.get_mut(&session.user_id) {
            conns.remove(conn_id);
            if conns.is_empty() {
                self.by_user.remove(&session.user_id);
            }
        }
        Some(session)
    }

    pub fn get(&self, conn_id: &str) -> Option<&Session> {
        self.sessions.get(conn_id)
    }

    pub fn sessions_for_user(&self, user_id: &str) -> Vec<&Session> {
        self.by_user
            .get(user_id)
            .into_iter()
            .flatten()
            .filter_map(|conn_id| self.sessions.get(conn_id))
            .collect()
    }

    /// How many live connections a user currently holds.
    pub fn user_session_count(&self, user_id: &str) -> usize {
        self.by_user.get(user_id).map_or(0, HashSet::len)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}
