//! Collaborator contracts consumed by the speech pipeline.
//!
//! Concrete backends (Google endpoints, the default audio device) live in
//! [`super::google`] and [`super::audio`]; tests plug in fakes.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::audio::AudioClip;
use super::language::LanguageCode;

/// Result of language detection.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Raw language code as reported by the backend (may be outside the
    /// supported vocabulary).
    pub language: String,
    /// Reliability of `language`, in `0.0..=1.0`.
    pub confidence: f64,
}

/// Result of a translation request.
#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub text: String,
    /// Latin-script reading of the *source* text, when the backend has one.
    pub pronunciation: Option<String>,
}

#[async_trait]
pub trait LanguageDetector: Send + Sync {
    async fn detect(&self, text: &str) -> anyhow::Result<Detection>;
}

#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `text` from `source` to `dest` (raw language codes).
    async fn translate(&self, text: &str, source: &str, dest: &str)
        -> anyhow::Result<Translation>;
}

/// Renders text to audio.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// `accent` selects a regional English voice; other languages ignore it.
    async fn synthesize(
        &self,
        text: &str,
        language: LanguageCode,
        accent: &str,
    ) -> anyhow::Result<AudioClip>;
}

/// How a playback ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEnd {
    Finished,
    Stopped,
}

/// The audio output device.
///
/// `play` resolves when the clip has finished or, after `stop` fires, once
/// the device is silent.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    async fn play(&self, clip: AudioClip, stop: CancellationToken) -> anyhow::Result<PlaybackEnd>;
}
