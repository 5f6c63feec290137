use serde::{Deserialize, Serialize};

use crate::now_ms;

/// Public profile fields embedded in broadcast envelopes. Never carries
/// credentials or other private columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub is_online: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Video,
    Audio,
    File,
    Document,
}

/// Upload descriptor attached to non-text messages. Storage itself is the
/// upload service's concern; only the reference travels here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub user: String,
    pub emoji: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub sender: UserProfile,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileDescriptor>,
    pub room: String,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<i64>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    pub created_at: i64,
}

impl ChatMessage {
    pub fn new(sender: UserProfile, content: impl Into<String>, room: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender,
            content: content.into(),
            kind: MessageKind::Text,
            file: None,
            room: room.into(),
            is_edited: false,
            edited_at: None,
            is_deleted: false,
            deleted_at: None,
            reactions: Vec::new(),
            reply_to: None,
            created_at: now_ms(),
        }
    }

    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_file(mut self, file: FileDescriptor) -> Self {
        self.file = Some(file);
        self
    }

    pub fn with_reply_to(mut self, reply_to: Option<String>) -> Self {
        self.reply_to = reply_to;
        self
    }

    /// Apply a reaction, replacing any prior reaction by the same user.
    /// Invariant: at most one reaction per user per message.
    pub fn add_reaction(&mut self, user: &str, emoji: &str) {
        self.reactions.retain(|r| r.user != user);
        self.reactions.push(Reaction {
            user: user.to_string(),
            emoji: emoji.to_string(),
        });
    }

    pub fn mark_edited(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.is_edited = true;
        self.edited_at = Some(now_ms());
    }

    pub fn mark_deleted(&mut self) {
        self.is_deleted = true;
        self.deleted_at = Some(now_ms());
    }
}
