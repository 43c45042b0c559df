//! Renders a message's speakable parts into one playable clip.

use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::audio::AudioClip;
use super::backends::SpeechSynthesizer;
use super::language::LanguageCode;
use super::message::SpeakableMessagePart;
use super::PipelineError;
use crate::config::TtsConfig;

/// Cut from the start of every composed clip (synthesis click).
const LEAD_TRIM: Duration = Duration::from_millis(100);

/// Cut from the end of every composed clip (synthesis tail).
const TRAIL_TRIM: Duration = Duration::from_millis(200);

/// English accent for a speaker.
///
/// Unattributed speech uses the default accent. A named speaker is hashed
/// with SHA-256 into the random accent list, so the same name always gets
/// the same voice.
pub fn english_accent(speaker: Option<&str>, tts: &TtsConfig) -> String {
    let accents = &tts.random_user_english_accents;
    match speaker {
        Some(name) if !accents.is_empty() => {
            let digest = Sha256::digest(name.as_bytes());
            let n = accents.len() as u128;
            // Big-endian digest modulo n, folded one byte at a time.
            let index = digest
                .iter()
                .fold(0u128, |acc, &b| (acc * 256 + u128::from(b)) % n);
            accents[index as usize].clone()
        }
        _ => tts.default_english_accent.clone(),
    }
}

pub struct AudioComposer {
    synth: Arc<dyn SpeechSynthesizer>,
}

impl AudioComposer {
    pub fn new(synth: Arc<dyn SpeechSynthesizer>) -> Self {
        Self { synth }
    }

    /// Synthesize every part in order and post-process the result.
    ///
    /// Returns [`PipelineError::Cancelled`] as soon as `cancel` fires, even
    /// mid-request.
    pub async fn compose(
        &self,
        parts: &[SpeakableMessagePart],
        tts: &TtsConfig,
        cancel: &CancellationToken,
    ) -> Result<AudioClip, PipelineError> {
        let mut clip = AudioClip::empty();

        for part in parts {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let accent = if part.language == LanguageCode::En {
                english_accent(part.speaker.as_deref(), tts)
            } else {
                tts.default_english_accent.clone()
            };

            tracing::debug!(
                language = %part.language,
                accent = %accent,
                chars = part.text.chars().count(),
                "Synthesizing part"
            );

            let rendered = tokio::select! {
                () = cancel.cancelled() => return Err(PipelineError::Cancelled),
                result = self.synth.synthesize(&part.text, part.language, &accent) => {
                    result.map_err(PipelineError::Synthesis)?
                }
            };
            clip.append(rendered);
        }

        if tts.playback_speed > 1.0 {
            clip = clip.speedup(tts.playback_speed);
        }
        clip.apply_gain_db(20.0 * tts.playback_volume.log10());

        Ok(clip.trim(LEAD_TRIM, TRAIL_TRIM))
    }
}
