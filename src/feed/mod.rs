//! Chat aggregator feed: WebSocket listener and admission rules.
//!
//! The listener is the ledger's only producer. New messages pass the
//! [`FeedFilter`] before they are queued; deletions and clears go straight
//! to the ledger.

pub mod events;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, ConfigHandle};
use crate::voice::ledger::MessageLedger;
use crate::voice::message::ChatMessage;

#[allow(unused_imports)]
pub use events::{hello_frame, FeedEvent};

// ── Admission rules ──────────────────────────────────────────────

/// What the filter decided for one incoming message.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Queue it (author possibly renamed).
    Accept(ChatMessage),
    /// Received before the freshness window (history replay).
    Stale,
    /// Author is on the platform's ignore list.
    Ignored,
    /// Text matched the given filter pattern.
    Filtered(String),
}

/// Applies freshness, per-platform author rules and text filters.
///
/// Compiled filters are cached per config snapshot.
#[derive(Default)]
pub struct FeedFilter {
    compiled: Mutex<Option<(Arc<Config>, Arc<Vec<Regex>>)>>,
}

impl FeedFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, mut message: ChatMessage, config: &Arc<Config>, now: DateTime<Utc>) -> Verdict {
        let oldest = chrono::Duration::from_std(Duration::from_secs(config.feed.freshness_window_secs))
            .ok()
            .and_then(|window| now.checked_sub_signed(window));
        if oldest.is_some_and(|oldest| message.received_at < oldest) {
            return Verdict::Stale;
        }

        if let Some(rules) = config.rules_for(&message.author.platform) {
            let username = message.author.name.to_lowercase();
            if rules.ignored_users.iter().any(|u| u.to_lowercase() == username) {
                return Verdict::Ignored;
            }
            if let Some(nickname) = rules
                .nicknames
                .iter()
                .find(|(name, _)| name.to_lowercase() == username)
                .map(|(_, nick)| nick.clone())
            {
                message.author.name = nickname;
            }
        }

        if let Some(text) = message.text() {
            if let Some(pattern) = self.filters(config).iter().find(|re| re.is_match(&text)) {
                return Verdict::Filtered(pattern.as_str().to_string());
            }
        }

        Verdict::Accept(message)
    }

    fn filters(&self, config: &Arc<Config>) -> Arc<Vec<Regex>> {
        let mut cache = self.compiled.lock();
        if let Some((snapshot, filters)) = cache.as_ref() {
            if Arc::ptr_eq(snapshot, config) {
                return Arc::clone(filters);
            }
        }

        // Snapshots are validated on load, so every pattern compiles.
        let filters = Arc::new(config.compiled_filters().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Ignoring text filters");
            Vec::new()
        }));
        *cache = Some((Arc::clone(config), Arc::clone(&filters)));
        filters
    }
}

// ── Client ───────────────────────────────────────────────────────

/// Listens to the aggregator and feeds the ledger, reconnecting forever.
pub struct FeedClient {
    url_override: Option<String>,
    config: Arc<ConfigHandle>,
    ledger: Arc<MessageLedger>,
    filter: FeedFilter,
}

impl FeedClient {
    /// `url_override` replaces `feed.url` from the config file.
    pub fn new(
        url_override: Option<String>,
        config: Arc<ConfigHandle>,
        ledger: Arc<MessageLedger>,
    ) -> Self {
        Self {
            url_override,
            config,
            ledger,
            filter: FeedFilter::new(),
        }
    }

    fn url(&self, config: &Config) -> String {
        self.url_override
            .clone()
            .unwrap_or_else(|| config.feed.url.clone())
    }

    /// Connect, listen and reconnect until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        loop {
            let config = self.config.snapshot();
            let url = self.url(&config);
            let delay = Duration::from_secs(config.feed.reconnect_delay_secs);

            tokio::select! {
                () = shutdown.cancelled() => break,
                result = self.session(&url) => match result {
                    Ok(()) => tracing::warn!(url = %url, "Feed connection closed"),
                    Err(e) => tracing::error!(url = %url, error = %e, "Feed connection error"),
                },
            }

            tracing::info!(delay_secs = delay.as_secs(), "Reconnecting to feed");
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }
        tracing::info!("Feed listener stopped");
    }

    /// One connection: handshake, then dispatch frames until it drops.
    async fn session(&self, url: &str) -> anyhow::Result<()> {
        let (mut ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to {url}: {e}"))?;

        let hello = hello_frame(&self.config.snapshot().app);
        ws.send(WsMessage::Text(hello.into()))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send HELLO: {e}"))?;
        tracing::info!(url = %url, "Listening to chat feed");

        while let Some(frame) = ws.next().await {
            match frame? {
                WsMessage::Text(text) => self.handle_frame(text.as_str()),
                WsMessage::Binary(data) => match std::str::from_utf8(&data) {
                    Ok(text) => self.handle_frame(text),
                    Err(_) => tracing::debug!(len = data.len(), "Ignoring binary frame"),
                },
                WsMessage::Close(frame) => {
                    tracing::info!(close_frame = ?frame, "Feed closed by server");
                    break;
                }
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
            }
        }
        Ok(())
    }

    /// Decode one text frame and apply it. Malformed frames are logged.
    pub fn handle_frame(&self, frame: &str) {
        match FeedEvent::parse(frame) {
            Ok(event) => self.dispatch(event, Utc::now()),
            Err(e) => tracing::warn!(error = %e, "Skipping malformed feed frame"),
        }
    }

    fn dispatch(&self, event: FeedEvent, now: DateTime<Utc>) {
        match event {
            FeedEvent::NewMessages(messages) => {
                let config = self.config.snapshot();
                for message in messages {
                    let id = message.id.clone();
                    let author = message.author.name.clone();
                    let platform = message.author.platform.clone();
                    match self.filter.check(message, &config, now) {
                        Verdict::Accept(message) => self.ledger.enqueue(message),
                        Verdict::Stale => {
                            tracing::debug!(message_id = %id, "Skipping message from history");
                        }
                        Verdict::Ignored => {
                            tracing::info!(author = %author, platform = %platform, "Ignored user");
                        }
                        Verdict::Filtered(pattern) => {
                            tracing::info!(
                                author = %author,
                                platform = %platform,
                                filter = %pattern,
                                "Message filtered"
                            );
                        }
                    }
                }
            }
            FeedEvent::MessagesChanged(messages) => {
                for message in messages.iter().filter(|m| m.deleted) {
                    self.ledger.mark_deleted(&message.id);
                }
            }
            FeedEvent::ClearMessages => {
                let discarded = self.ledger.clear();
                tracing::info!(discarded, "Chat cleared");
            }
            FeedEvent::Other(kind) => {
                tracing::trace!(kind = %kind, "Ignoring feed event");
            }
        }
    }
}
