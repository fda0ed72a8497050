//! Row types for the application message store (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A conversation, keyed by its opaque JID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub jid: String,
    pub name: String,
    pub last_message_time: DateTime<Utc>,
}

/// Kind of media attached to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Document => "document",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(MediaKind::Image),
            "video" => Some(MediaKind::Video),
            "audio" => Some(MediaKind::Audio),
            "document" => Some(MediaKind::Document),
            _ => None,
        }
    }
}

/// The cryptographic bundle needed to re-fetch and decrypt a previously-sent
/// media blob (§3). Byte fields are stored as raw `BLOB`s, never re-encoded.
#[derive(Debug, Clone)]
pub struct MediaDescriptor {
    pub kind: MediaKind,
    pub filename: String,
    pub url: Option<String>,
    pub media_key: Option<Vec<u8>>,
    pub file_sha256: Option<Vec<u8>>,
    pub file_enc_sha256: Option<Vec<u8>>,
    pub file_length: Option<i64>,
}

impl MediaDescriptor {
    /// A descriptor is complete iff url/media_key/both hashes and a non-zero
    /// file_length are all present — download requires completeness (§3).
    pub fn is_complete(&self) -> bool {
        self.url.as_ref().is_some_and(|u| !u.is_empty())
            && self.media_key.as_ref().is_some_and(|k| !k.is_empty())
            && self.file_sha256.is_some()
            && self.file_enc_sha256.is_some()
            && self.file_length.is_some_and(|n| n > 0)
    }
}

/// A stored message row (§3). Primary key is (id, chat_jid).
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub chat_jid: String,
    pub sender: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub is_from_me: bool,
    pub media: Option<MediaDescriptor>,
    pub transcription: Option<String>,
}

/// A row as returned by `get_recent_messages` — joined with the chat's display
/// name, shaped for direct JSON serialization over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentMessage {
    pub id: String,
    pub chat_jid: String,
    pub chat_name: String,
    pub sender: String,
    pub content: String,
    /// ISO-8601 UTC timestamp.
    pub timestamp: String,
    pub is_from_me: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<String>,
}
