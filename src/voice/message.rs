//! Chat message model and the speakable fragments a message turns into.

use chrono::{DateTime, Utc};

use super::language::LanguageCode;

// ── Chat message ─────────────────────────────────────────────────

/// Who wrote a chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    /// Platform-side user identifier.
    pub id: String,
    /// Display name (possibly replaced by a configured nickname).
    pub name: String,
    /// Platform the message came from (e.g. "youtube", "twitch").
    pub platform: String,
}

/// One content item of a chat message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    /// Plain text fragment.
    Text(String),
    /// Platform emote, identified by its alt text.
    Emote { alt: String },
    /// Any other payload the aggregator forwards (stickers, links, ...).
    Opaque(serde_json::Value),
}

/// A chat message as owned by the ledger.
///
/// Only `deleted` ever changes after creation, and only through an update
/// event referencing the same `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub author: Author,
    pub contents: Vec<MessageContent>,
    pub deleted: bool,
    pub received_at: DateTime<Utc>,
    pub published_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Text of the message, or `None` when it carries no readable text.
    pub fn text(&self) -> Option<String> {
        let text = self
            .contents
            .iter()
            .filter_map(|c| match c {
                MessageContent::Text(t) if !t.trim().is_empty() => Some(t.trim()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(" ");

        (!text.is_empty()).then_some(text)
    }

    /// Number of non-text content items.
    pub fn emote_count(&self) -> usize {
        self.contents
            .iter()
            .filter(|c| !matches!(c, MessageContent::Text(_)))
            .count()
    }
}

#[cfg(test)]
impl ChatMessage {
    /// A live message from `author` on youtube carrying `contents`.
    pub(crate) fn fixture(id: &str, author: &str, contents: Vec<MessageContent>) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            author: Author {
                id: format!("uid-{author}"),
                name: author.to_string(),
                platform: "youtube".to_string(),
            },
            contents,
            deleted: false,
            received_at: now,
            published_at: now,
        }
    }

    pub(crate) fn text_fixture(id: &str, author: &str, text: &str) -> Self {
        Self::fixture(id, author, vec![MessageContent::Text(text.to_string())])
    }
}

// ── Speakable parts ──────────────────────────────────────────────

/// A language-homogeneous fragment of speech.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakableMessagePart {
    pub text: String,
    pub language: LanguageCode,
    /// Whose voice accent to use. Never spoken.
    pub speaker: Option<String>,
}

impl SpeakableMessagePart {
    pub fn new(text: impl Into<String>, language: LanguageCode) -> Self {
        Self {
            text: text.into(),
            language,
            speaker: None,
        }
    }

    pub fn spoken_by(mut self, speaker: impl Into<String>) -> Self {
        self.speaker = Some(speaker.into());
        self
    }
}

/// Merge adjacent parts that share a language.
///
/// Merged text is joined with a single space; the merged part keeps the
/// first speaker attribution it finds.
pub fn merge_parts(parts: Vec<SpeakableMessagePart>) -> Vec<SpeakableMessagePart> {
    let mut merged: Vec<SpeakableMessagePart> = Vec::with_capacity(parts.len());

    for part in parts {
        match merged.last_mut() {
            Some(last) if last.language == part.language => {
                last.text.push(' ');
                last.text.push_str(&part.text);
                if last.speaker.is_none() {
                    last.speaker = part.speaker;
                }
            }
            _ => merged.push(part),
        }
    }

    merged
}

// ── Tests ────────────────────────────────────────────────────────
