//! Language decision engine.
//!
//! Decides, per message, what is spoken and in which language: an English
//! intro naming the author, followed by the body either in its own language,
//! translated to English, or read as-is with an English voice.

use std::sync::Arc;

use super::backends::{LanguageDetector, Translator};
use super::language::{detected_language_name, LanguageCode};
use super::message::{merge_parts, SpeakableMessagePart};
use super::PipelineError;
use crate::config::TtsConfig;

pub struct DecisionEngine {
    detector: Arc<dyn LanguageDetector>,
    translator: Arc<dyn Translator>,
}

impl DecisionEngine {
    pub fn new(detector: Arc<dyn LanguageDetector>, translator: Arc<dyn Translator>) -> Self {
        Self {
            detector,
            translator,
        }
    }

    /// Build the speakable parts for a message with text.
    ///
    /// `speaker` is the name as it should be spoken (see
    /// [`Self::speakable_name`]); it also selects the body's English accent.
    pub async fn decide(
        &self,
        text: &str,
        speaker: &str,
        platform: &str,
        tts: &TtsConfig,
    ) -> Result<Vec<SpeakableMessagePart>, PipelineError> {
        let detection = self
            .detector
            .detect(text)
            .await
            .map_err(PipelineError::Detection)?;

        let detected = detection.language.as_str();
        let confident = detection.confidence > tts.translation_confidence_threshold;
        // Codes unknown to the detector's vocabulary are read as English.
        let foreign = match detected_language_name(detected) {
            Some(_) if LanguageCode::from_str_code(detected) == Some(LanguageCode::En) => None,
            Some(name) => Some(name),
            None => {
                tracing::debug!(detected = %detected, "Unknown language, reading as English");
                None
            }
        };

        tracing::debug!(
            language = %detected,
            confidence = detection.confidence,
            confident,
            "Detected message language"
        );

        let mut intro = format!("{speaker} from {platform} said");
        if let (Some(name), true) = (foreign, confident) {
            intro.push_str(" in ");
            intro.push_str(name);
        }
        let intro = SpeakableMessagePart::new(intro, LanguageCode::En);

        let allowed_voice = LanguageCode::from_str_code(detected).filter(|l| tts.is_allowed(*l));
        let body = match (foreign, allowed_voice) {
            (None, _) => SpeakableMessagePart::new(text, LanguageCode::En),
            (Some(_), Some(voice)) => SpeakableMessagePart::new(text, voice),
            (Some(_), None) if confident => {
                let translation = self
                    .translator
                    .translate(text, detected, LanguageCode::En.google_code())
                    .await
                    .map_err(PipelineError::Translation)?;
                SpeakableMessagePart::new(translation.text, LanguageCode::En)
            }
            (Some(_), None) => SpeakableMessagePart::new(text, LanguageCode::En),
        };

        Ok(merge_parts(vec![intro, body.spoken_by(speaker)]))
    }

    /// Name to speak for an author.
    ///
    /// Names outside ASCII are romanized by translating them into their own
    /// language and taking the backend's pronunciation. Any failure falls
    /// back to the original name.
    pub async fn speakable_name(&self, name: &str) -> String {
        if name.is_ascii() {
            return name.to_string();
        }

        match self.romanize(name).await {
            Ok(Some(reading)) => {
                tracing::debug!(name = %name, reading = %reading, "Romanized author name");
                reading
            }
            Ok(None) => {
                tracing::warn!(name = %name, "No pronunciation available for author name");
                name.to_string()
            }
            Err(e) => {
                tracing::warn!(name = %name, error = %e, "Failed to romanize author name");
                name.to_string()
            }
        }
    }

    async fn romanize(&self, name: &str) -> anyhow::Result<Option<String>> {
        let detection = self.detector.detect(name).await?;
        let translation = self
            .translator
            .translate(name, &detection.language, &detection.language)
            .await?;
        Ok(translation
            .pronunciation
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty()))
    }

    /// Whether a message with no text but `emote_count` emotes is read.
    pub fn reads_emote_only(emote_count: usize, tts: &TtsConfig) -> bool {
        tts.read_emote_only_message && emote_count >= tts.emote_only_reading_threshold
    }

    /// Parts for a message without text, or `None` when it is not read.
    pub fn emote_only_parts(
        &self,
        speaker: &str,
        platform: &str,
        emote_count: usize,
        tts: &TtsConfig,
    ) -> Option<Vec<SpeakableMessagePart>> {
        if !Self::reads_emote_only(emote_count, tts) {
            return None;
        }

        let what = if emote_count == 1 {
            "an emote".to_string()
        } else {
            format!("{emote_count} emotes")
        };
        Some(vec![SpeakableMessagePart::new(
            format!("{speaker} from {platform} sent {what}"),
            LanguageCode::En,
        )
        .spoken_by(speaker)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::backends::{Detection, Translation};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct FixedDetector {
        language: &'static str,
        confidence: f64,
    }

    #[async_trait]
    impl LanguageDetector for FixedDetector {
        async fn detect(&self, _text: &str) -> anyhow::Result<Detection> {
            Ok(Detection {
                language: self.language.to_string(),
                confidence: self.confidence,
            })
        }
    }

    struct BrokenDetector;

    #[async_trait]
    impl LanguageDetector for BrokenDetector {
        async fn detect(&self, _text: &str) -> anyhow::Result<Detection> {
            anyhow::bail!("detector offline")
        }
    }

    /// Uppercases text and reports `reading` as the pronunciation.
    #[derive(Default)]
    struct UpperTranslator {
        reading: Option<&'static str>,
        calls: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl Translator for UpperTranslator {
        async fn translate(
            &self,
            text: &str,
            source: &str,
            dest: &str,
        ) -> anyhow::Result<Translation> {
            self.calls
                .lock()
                .push((text.to_string(), source.to_string(), dest.to_string()));
            Ok(Translation {
                text: text.to_uppercase(),
                pronunciation: self.reading.map(str::to_string),
            })
        }
    }

    fn engine(
        language: &'static str,
        confidence: f64,
    ) -> (DecisionEngine, Arc<UpperTranslator>) {
        let translator = Arc::new(UpperTranslator::default());
        let engine = DecisionEngine::new(
            Arc::new(FixedDetector {
                language,
                confidence,
            }),
            translator.clone(),
        );
        (engine, translator)
    }

    fn tts_allowing(languages: &[LanguageCode]) -> TtsConfig {
        TtsConfig {
            allowed_languages: languages.to_vec(),
            translation_confidence_threshold: 0.5,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn confident_foreign_text_is_translated() {
        let (engine, translator) = engine("es", 0.9);
        let tts = tts_allowing(&[LanguageCode::En, LanguageCode::Ja]);

        let parts = engine.decide("hola", "alice", "youtube", &tts).await.unwrap();

        // intro and translated body share English and merge
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].text, "alice from youtube said in Spanish HOLA");
        assert_eq!(parts[0].language, LanguageCode::En);
        assert_eq!(parts[0].speaker.as_deref(), Some("alice"));
        assert_eq!(
            translator.calls.lock().as_slice(),
            &[("hola".to_string(), "es".to_string(), "en".to_string())]
        );
    }

    #[tokio::test]
    async fn allowed_language_is_spoken_untranslated() {
        let (engine, translator) = engine("es", 0.9);
        let tts = tts_allowing(&[LanguageCode::En, LanguageCode::Es]);

        let parts = engine.decide("hola", "alice", "youtube", &tts).await.unwrap();

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].text, "alice from youtube said in Spanish");
        assert_eq!(parts[0].speaker, None);
        assert_eq!(parts[1].text, "hola");
        assert_eq!(parts[1].language, LanguageCode::Es);
        assert!(translator.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn low_confidence_is_read_as_english() {
        let (engine, translator) = engine("es", 0.3);
        let tts = tts_allowing(&[LanguageCode::En]);

        let parts = engine.decide("hola", "bob", "twitch", &tts).await.unwrap();

        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].text, "bob from twitch said hola");
        assert!(translator.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn confidence_at_threshold_is_not_confident() {
        let (engine, translator) = engine("es", 0.5);
        let tts = tts_allowing(&[LanguageCode::En]);

        let parts = engine.decide("hola", "bob", "twitch", &tts).await.unwrap();
        assert_eq!(parts[0].text, "bob from twitch said hola");
        assert!(translator.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn unsupported_language_falls_back_to_english() {
        let (engine, translator) = engine("xx", 0.99);
        let tts = tts_allowing(&[LanguageCode::Ja]);

        let parts = engine.decide("blorp", "carol", "youtube", &tts).await.unwrap();

        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].text, "carol from youtube said blorp");
        assert_eq!(parts[0].language, LanguageCode::En);
        assert!(translator.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn languages_without_a_voice_are_still_translated() {
        for (code, name) in [("fa", "Persian"), ("lt", "Lithuanian"), ("gu", "Gujarati")] {
            let (engine, translator) = engine(code, 0.95);
            let tts = tts_allowing(&[LanguageCode::En]);

            let parts = engine.decide("salam", "ali", "youtube", &tts).await.unwrap();

            assert_eq!(parts.len(), 1);
            assert_eq!(parts[0].text, format!("ali from youtube said in {name} SALAM"));
            assert_eq!(parts[0].language, LanguageCode::En);
            assert_eq!(
                translator.calls.lock().as_slice(),
                &[("salam".to_string(), code.to_string(), "en".to_string())]
            );
        }
    }

    #[tokio::test]
    async fn low_confidence_voiceless_language_is_read_as_english() {
        let (engine, translator) = engine("sl", 0.2);
        let tts = tts_allowing(&[LanguageCode::En]);

        let parts = engine.decide("zdravo", "eva", "twitch", &tts).await.unwrap();
        assert_eq!(parts[0].text, "eva from twitch said zdravo");
        assert!(translator.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn detection_failure_is_reported() {
        let engine = DecisionEngine::new(
            Arc::new(BrokenDetector),
            Arc::new(UpperTranslator::default()),
        );
        let err = engine
            .decide("hi", "a", "youtube", &TtsConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Detection(_)));
    }

    #[tokio::test]
    async fn ascii_name_is_spoken_as_is() {
        let (engine, translator) = engine("ja", 0.9);
        assert_eq!(engine.speakable_name("alice").await, "alice");
        assert!(translator.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn non_ascii_name_uses_pronunciation() {
        let translator = Arc::new(UpperTranslator {
            reading: Some("Tanaka"),
            ..Default::default()
        });
        let engine = DecisionEngine::new(
            Arc::new(FixedDetector {
                language: "ja",
                confidence: 0.9,
            }),
            translator.clone(),
        );

        assert_eq!(engine.speakable_name("田中").await, "Tanaka");
        assert_eq!(
            translator.calls.lock().as_slice(),
            &[("田中".to_string(), "ja".to_string(), "ja".to_string())]
        );
    }

    #[tokio::test]
    async fn name_falls_back_without_pronunciation() {
        let (engine, _) = engine("ja", 0.9);
        assert_eq!(engine.speakable_name("田中").await, "田中");

        let broken = DecisionEngine::new(
            Arc::new(BrokenDetector),
            Arc::new(UpperTranslator::default()),
        );
        assert_eq!(broken.speakable_name("田中").await, "田中");
    }

    #[test]
    fn emote_only_threshold() {
        let (engine, _) = engine("en", 1.0);
        let mut tts = TtsConfig {
            emote_only_reading_threshold: 2,
            ..Default::default()
        };

        let parts = engine.emote_only_parts("dave", "twitch", 3, &tts).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].text, "dave from twitch sent 3 emotes");
        assert_eq!(parts[0].language, LanguageCode::En);
        assert_eq!(parts[0].speaker.as_deref(), Some("dave"));

        tts.emote_only_reading_threshold = 5;
        assert!(engine.emote_only_parts("dave", "twitch", 3, &tts).is_none());
    }

    #[test]
    fn single_emote_and_disabled_reading() {
        let (engine, _) = engine("en", 1.0);
        let mut tts = TtsConfig::default();

        let parts = engine.emote_only_parts("erin", "youtube", 1, &tts).unwrap();
        assert_eq!(parts[0].text, "erin from youtube sent an emote");

        tts.read_emote_only_message = false;
        assert!(engine.emote_only_parts("erin", "youtube", 10, &tts).is_none());
    }
}
