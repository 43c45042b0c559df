//! TOML configuration schema.
//!
//! ```toml
//! filter = ["^!"]
//!
//! [app]
//! name = "chatvoice"
//!
//! [tts]
//! playback_volume = 0.5
//! playback_speed = 1.2
//! allowed_languages = ["en", "ja"]
//!
//! [feed]
//! url = "ws://127.0.0.1:8356"
//!
//! [platform_rules.twitch]
//! ignored_users = ["nightbot"]
//! nicknames = { xx_gamer_xx = "gamer" }
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::ConfigError;
use crate::voice::language::LanguageCode;

/// Top-level domains accepted by the speech endpoint as English accents.
pub const KNOWN_ENGLISH_ACCENTS: &[&str] = &[
    "com", "us", "com.au", "co.uk", "ca", "co.in", "ie", "co.za", "com.ng", "com.ph", "co.nz",
];

// ── Root ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app: AppConfig,
    pub tts: TtsConfig,
    pub feed: FeedConfig,
    /// Keyed by lowercase platform id (e.g. "youtube").
    pub platform_rules: HashMap<String, PlatformRules>,
    /// Regexes; a message whose text matches any of them is never queued.
    pub filter: Vec<String>,
}

impl Config {
    /// Check every value against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tts.validate()?;
        self.feed.validate()?;
        self.compiled_filters()?;
        Ok(())
    }

    /// Compile the `filter` list.
    pub fn compiled_filters(&self) -> Result<Vec<Regex>, ConfigError> {
        self.filter
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| ConfigError::Invalid {
                    field: "filter",
                    reason: format!("`{pattern}` is not a valid regex: {e}"),
                })
            })
            .collect()
    }

    /// Rules for a platform, matched case-insensitively.
    pub fn rules_for(&self, platform: &str) -> Option<&PlatformRules> {
        self.platform_rules.get(&platform.to_lowercase())
    }
}

// ── [app] ────────────────────────────────────────────────────────

/// Identity announced to the feed in the HELLO handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub version: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// ── [tts] ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Linear volume factor, > 0. Applied as `20·log10(v)` dB.
    pub playback_volume: f64,
    /// Speed-up factor, >= 1 (1 = unchanged).
    pub playback_speed: f64,
    /// Languages spoken as-is instead of being translated to English.
    pub allowed_languages: Vec<LanguageCode>,
    /// Accent for unattributed English speech (intros).
    pub default_english_accent: String,
    /// Accents a speaker's name is hashed into.
    pub random_user_english_accents: Vec<String>,
    /// Detection confidence (0..=1) above which a detected language is trusted.
    pub translation_confidence_threshold: f64,
    /// Longest pause between two messages, in seconds.
    pub max_time_between_messages: f64,
    /// Backlog size at which the pause between messages reaches zero.
    pub no_wait_queue_size: usize,
    /// Whether messages made only of emotes are announced.
    pub read_emote_only_message: bool,
    /// Minimum emote count for an emote-only message to be announced.
    pub emote_only_reading_threshold: usize,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            playback_volume: 0.5,
            playback_speed: 1.2,
            allowed_languages: vec![LanguageCode::En, LanguageCode::Ja],
            default_english_accent: "ca".to_string(),
            random_user_english_accents: ["com", "co.uk", "com.au", "ca", "co.in", "ie", "co.za"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            translation_confidence_threshold: 0.5,
            max_time_between_messages: 2.0,
            no_wait_queue_size: 5,
            read_emote_only_message: true,
            emote_only_reading_threshold: 1,
        }
    }
}

impl TtsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.playback_volume > 0.0) {
            return Err(invalid("tts.playback_volume", "must be greater than 0"));
        }
        if !(self.playback_speed >= 1.0) {
            return Err(invalid("tts.playback_speed", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.translation_confidence_threshold) {
            return Err(invalid(
                "tts.translation_confidence_threshold",
                "must be between 0 and 1",
            ));
        }
        if !(self.max_time_between_messages >= 0.0) || !self.max_time_between_messages.is_finite()
        {
            return Err(invalid(
                "tts.max_time_between_messages",
                "must be a finite number of seconds >= 0",
            ));
        }
        if self.no_wait_queue_size == 0 {
            return Err(invalid("tts.no_wait_queue_size", "must be at least 1"));
        }
        if !KNOWN_ENGLISH_ACCENTS.contains(&self.default_english_accent.as_str()) {
            return Err(invalid(
                "tts.default_english_accent",
                format!("invalid accent code: {}", self.default_english_accent),
            ));
        }
        if self.random_user_english_accents.is_empty() {
            return Err(invalid(
                "tts.random_user_english_accents",
                "must list at least one accent",
            ));
        }
        if let Some(bad) = self
            .random_user_english_accents
            .iter()
            .find(|a| !KNOWN_ENGLISH_ACCENTS.contains(&a.as_str()))
        {
            return Err(invalid(
                "tts.random_user_english_accents",
                format!("invalid accent code: {bad}"),
            ));
        }
        Ok(())
    }

    /// Pacing parameters for the playback scheduler.
    pub fn pacing(&self) -> Pacing {
        Pacing {
            max_pause: Duration::try_from_secs_f64(self.max_time_between_messages)
                .unwrap_or_default(),
            no_wait_threshold: self.no_wait_queue_size.max(1),
        }
    }

    pub fn is_allowed(&self, language: LanguageCode) -> bool {
        self.allowed_languages.contains(&language)
    }
}

/// Inter-message pause parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pacing {
    pub max_pause: Duration,
    pub no_wait_threshold: usize,
}

// ── [feed] ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// WebSocket endpoint of the chat aggregator.
    pub url: String,
    /// Messages received longer ago than this are dropped (history replay).
    pub freshness_window_secs: u64,
    /// Delay before reconnecting after the feed connection drops.
    pub reconnect_delay_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8356".to_string(),
            freshness_window_secs: 10,
            reconnect_delay_secs: 5,
        }
    }
}

impl FeedConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(invalid("feed.url", "must be a ws:// or wss:// URL"));
        }
        Ok(())
    }
}

// ── [platform_rules.*] ───────────────────────────────────────────

/// Per-platform author rules, applied before a message is queued.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformRules {
    /// Lowercase user names whose messages are never read.
    pub ignored_users: Vec<String>,
    /// Lowercase user name → name to speak instead.
    pub nicknames: HashMap<String, String>,
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}
