//! Wire schema of the chat aggregator's WebSocket feed.
//!
//! ## Protocol
//!
//! ```text
//! chatvoice ──HELLO──▸ aggregator
//!           ◂── NEW_MESSAGES_RECEIVED { messages: [..] }
//!           ◂── MESSAGES_CHANGED      { messages: [..] }
//!           ◂── CLEAR_MESSAGES
//! ```
//!
//! Every frame is a JSON text envelope `{ "type": .., "data": .. }`. Event
//! types other than the three above are ignored.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::config::AppConfig;
use crate::voice::message::{Author, ChatMessage, MessageContent};

/// Client type announced in the HELLO handshake.
const CLIENT_TYPE: &str = "MAIN_WEBSOCKETCLIENT";

// ── Events ───────────────────────────────────────────────────────

/// A decoded feed frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    NewMessages(Vec<ChatMessage>),
    MessagesChanged(Vec<ChatMessage>),
    ClearMessages,
    /// Any other event type; carries the type for logging.
    Other(String),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct MessageBatch {
    messages: Vec<WireMessage>,
}

impl FeedEvent {
    /// Decode one text frame.
    pub fn parse(frame: &str) -> anyhow::Result<Self> {
        let envelope: Envelope = serde_json::from_str(frame)?;
        let batch = |data: Value| -> anyhow::Result<Vec<ChatMessage>> {
            let batch: MessageBatch = serde_json::from_value(data)?;
            Ok(batch.messages.into_iter().map(ChatMessage::from).collect())
        };

        Ok(match envelope.kind.as_str() {
            "NEW_MESSAGES_RECEIVED" => Self::NewMessages(batch(envelope.data)?),
            "MESSAGES_CHANGED" => Self::MessagesChanged(batch(envelope.data)?),
            "CLEAR_MESSAGES" => Self::ClearMessages,
            _ => Self::Other(envelope.kind),
        })
    }
}

/// The HELLO frame that opens a feed session.
pub fn hello_frame(app: &AppConfig) -> String {
    serde_json::json!({
        "type": "HELLO",
        "data": {
            "client": {
                "name": app.name,
                "version": app.version,
                "type": CLIENT_TYPE,
            }
        }
    })
    .to_string()
}

// ── Messages ─────────────────────────────────────────────────────

/// A chat message as sent by the aggregator. Unused fields are dropped.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    id: String,
    author: WireAuthor,
    #[serde(default)]
    contents: Vec<WireContent>,
    #[serde(default)]
    deleted_on_platform: bool,
    #[serde(default)]
    marked_as_deleted: bool,
    #[serde(deserialize_with = "timestamp")]
    received_at: DateTime<Utc>,
    #[serde(deserialize_with = "timestamp")]
    published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAuthor {
    #[serde(default)]
    id: String,
    name: String,
    service_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum WireContent {
    Text { data: TextData },
    Emote { data: EmoteData },
    Other(Value),
}

#[derive(Debug, Clone, Deserialize)]
struct TextData {
    text: String,
}

#[derive(Debug, Clone, Deserialize)]
struct EmoteData {
    alt: String,
}

impl From<WireMessage> for ChatMessage {
    fn from(wire: WireMessage) -> Self {
        Self {
            id: wire.id,
            author: Author {
                id: wire.author.id,
                name: wire.author.name,
                platform: wire.author.service_id,
            },
            contents: wire
                .contents
                .into_iter()
                .map(|c| match c {
                    WireContent::Text { data } => MessageContent::Text(data.text),
                    WireContent::Emote { data } => MessageContent::Emote { alt: data.alt },
                    WireContent::Other(raw) => MessageContent::Opaque(raw),
                })
                .collect(),
            deleted: wire.deleted_on_platform || wire.marked_as_deleted,
            received_at: wire.received_at,
            published_at: wire.published_at,
        }
    }
}

/// RFC 3339, or an ISO timestamp without offset in local time.
fn timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| serde::de::Error::custom(format!("bad timestamp: {raw}")))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| Some(naive.and_utc()))
}
