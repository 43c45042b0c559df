//! Speech pipeline for chatvoice.
//!
//! Turns queued chat messages into speech, one message at a time.
//!
//! ## Design
//! - Ledger of pending / deleted / in-flight messages, shared with the feed
//! - Trait-driven backends (`LanguageDetector`, `Translator`,
//!   `SpeechSynthesizer`, `AudioOutput`) with Google and rodio defaults
//! - Per-message language decision: intro, translation, allow-listed languages
//! - Deterministic per-speaker English accents
//! - Adaptive pacing that shortens pauses as the backlog grows
//! - Deletion cancels a message at any stage, including mid-playback

pub mod audio;
pub mod backends;
pub mod composer;
pub mod decision;
pub mod google;
pub mod language;
pub mod ledger;
pub mod message;
pub mod pipeline;
pub mod scheduler;

use crate::config::ConfigError;

/// Failure of one pipeline stage for one message.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("language detection failed: {0:#}")]
    Detection(anyhow::Error),
    #[error("translation failed: {0:#}")]
    Translation(anyhow::Error),
    #[error("speech synthesis failed: {0:#}")]
    Synthesis(anyhow::Error),
    #[error("playback failed: {0:#}")]
    Playback(anyhow::Error),
    /// The message was deleted or the ledger cleared.
    #[error("message cancelled")]
    Cancelled,
}

#[allow(unused_imports)]
pub use audio::{AudioClip, RodioOutput};
#[allow(unused_imports)]
pub use backends::{AudioOutput, LanguageDetector, PlaybackEnd, SpeechSynthesizer, Translator};
#[allow(unused_imports)]
pub use composer::AudioComposer;
#[allow(unused_imports)]
pub use decision::DecisionEngine;
#[allow(unused_imports)]
pub use google::{GoogleTranslate, GoogleTts};
#[allow(unused_imports)]
pub use language::LanguageCode;
#[allow(unused_imports)]
pub use ledger::{MessageLease, MessageLedger};
#[allow(unused_imports)]
pub use message::{Author, ChatMessage, MessageContent, SpeakableMessagePart};
#[allow(unused_imports)]
pub use pipeline::{Outcome, SpeechPipeline, Stage};
#[allow(unused_imports)]
pub use scheduler::PlaybackScheduler;
