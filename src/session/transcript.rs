use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Its turn is still accumulating fragments
    Open,
    Closed,
}

/// One entry of the conversation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub role: Role,

    pub content: String,

    /// Built from recognised speech rather than final content
    pub is_transcript: bool,

    /// When the first fragment arrived
    pub timestamp: DateTime<Utc>,

    pub status: MessageStatus,
}

impl TranscriptMessage {
    pub fn is_open(&self) -> bool {
        self.status == MessageStatus::Open
    }
}

/// Append `fragment` to `content`, keeping words apart
///
/// A single space is inserted only when neither side already has whitespace at
/// the seam.
pub fn merge_fragment(content: &mut String, fragment: &str) {
    if fragment.is_empty() {
        return;
    }

    let needs_space = !content.is_empty()
        && !content.ends_with(char::is_whitespace)
        && !fragment.starts_with(char::is_whitespace);

    if needs_space {
        content.push(' ');
    }
    content.push_str(fragment);
}
