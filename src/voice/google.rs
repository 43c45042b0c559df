//! Google Translate backends: language detection, translation and speech.
//!
//! Both endpoints are the keyless ones used by the web widget. They are
//! unofficial and may throttle; every failure surfaces as an error and the
//! pipeline abandons the message.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use super::audio::{decode_audio, AudioClip};
use super::backends::{Detection, LanguageDetector, SpeechSynthesizer, Translation, Translator};
use super::language::LanguageCode;

const TRANSLATE_BASE_URL: &str = "https://translate.googleapis.com";

/// Longest text the speech endpoint accepts per request.
const TTS_MAX_CHARS: usize = 100;

/// Characters after which a speech chunk may end.
const CHUNK_BREAKS: &[char] = &[
    '.', ',', '!', '?', ';', ':', '¿', '¡', '…', '。', '、', '，', '！', '？', '；', '：', '\n',
];

fn http_client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(5))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

// ── Translate ────────────────────────────────────────────────────

/// Detector and translator backed by `translate_a/single`.
pub struct GoogleTranslate {
    client: reqwest::Client,
    base_url: String,
}

impl Default for GoogleTranslate {
    fn default() -> Self {
        Self::new()
    }
}

impl GoogleTranslate {
    pub fn new() -> Self {
        Self::with_base_url(TRANSLATE_BASE_URL)
    }

    /// Point at another host (tests, proxies).
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: http_client(10),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn query(&self, text: &str, source: &str, dest: &str) -> anyhow::Result<TranslateResponse> {
        let url = format!("{}/translate_a/single", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("client", "gtx"),
                ("ie", "UTF-8"),
                ("oe", "UTF-8"),
                ("sl", source),
                ("tl", dest),
                ("dt", "t"),
                ("dt", "rm"),
                ("q", text),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            anyhow::bail!("Translate endpoint returned status {}", resp.status());
        }

        let body: Value = resp.json().await?;
        TranslateResponse::parse(&body)
    }
}

#[async_trait]
impl LanguageDetector for GoogleTranslate {
    async fn detect(&self, text: &str) -> anyhow::Result<Detection> {
        let resp = self.query(text, "auto", "en").await?;
        Ok(Detection {
            language: resp.language,
            confidence: resp.confidence,
        })
    }
}

#[async_trait]
impl Translator for GoogleTranslate {
    async fn translate(&self, text: &str, source: &str, dest: &str) -> anyhow::Result<Translation> {
        let resp = self.query(text, source, dest).await?;
        Ok(Translation {
            text: resp.text,
            pronunciation: resp.pronunciation,
        })
    }
}

/// The useful bits of a `translate_a/single` reply.
///
/// The reply is positional JSON: `[0]` holds translated segments
/// (`[translated, original, ..]`) followed by an optional romanization
/// entry (`[null, null, target_reading, source_reading]`), `[2]` is the
/// source language and `[6]` the detection confidence.
#[derive(Debug, Clone, PartialEq)]
struct TranslateResponse {
    text: String,
    pronunciation: Option<String>,
    language: String,
    confidence: f64,
}

impl TranslateResponse {
    fn parse(body: &Value) -> anyhow::Result<Self> {
        let segments = body
            .get(0)
            .and_then(Value::as_array)
            .ok_or_else(|| anyhow::anyhow!("Translate reply has no segment list"))?;

        let text: String = segments
            .iter()
            .filter_map(|seg| seg.get(0).and_then(Value::as_str))
            .collect();

        let pronunciation = segments
            .iter()
            .filter(|seg| seg.get(0).is_some_and(Value::is_null))
            .find_map(|seg| {
                seg.get(3)
                    .and_then(Value::as_str)
                    .or_else(|| seg.get(2).and_then(Value::as_str))
            })
            .map(str::to_string);

        let language = body
            .get(2)
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("Translate reply has no source language"))?
            .to_string();

        let confidence = body.get(6).and_then(Value::as_f64).unwrap_or(0.0);

        Ok(Self {
            text,
            pronunciation,
            language,
            confidence,
        })
    }
}

// ── Speech ───────────────────────────────────────────────────────

/// Synthesizer backed by `translate_tts`.
///
/// English accents select the regional host (`translate.google.<accent>`).
pub struct GoogleTts {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl Default for GoogleTts {
    fn default() -> Self {
        Self::new()
    }
}

impl GoogleTts {
    pub fn new() -> Self {
        Self {
            client: http_client(15),
            base_url: None,
        }
    }

    /// Send every request to `base_url` regardless of accent.
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: http_client(15),
            base_url: Some(base_url.trim_end_matches('/').to_string()),
        }
    }

    fn endpoint(&self, accent: &str) -> String {
        match &self.base_url {
            Some(base) => format!("{base}/translate_tts"),
            None => format!("https://translate.google.{accent}/translate_tts"),
        }
    }

    async fn fetch_chunk(
        &self,
        url: &str,
        chunk: &str,
        language: LanguageCode,
        idx: usize,
        total: usize,
    ) -> anyhow::Result<Vec<u8>> {
        let total = total.to_string();
        let idx = idx.to_string();
        let textlen = chunk.chars().count().to_string();
        let resp = self
            .client
            .get(url)
            .query(&[
                ("ie", "UTF-8"),
                ("client", "tw-ob"),
                ("tl", language.google_code()),
                ("q", chunk),
                ("total", total.as_str()),
                ("idx", idx.as_str()),
                ("textlen", textlen.as_str()),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            anyhow::bail!("Speech endpoint returned status {}", resp.status());
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

#[async_trait]
impl SpeechSynthesizer for GoogleTts {
    async fn synthesize(
        &self,
        text: &str,
        language: LanguageCode,
        accent: &str,
    ) -> anyhow::Result<AudioClip> {
        let chunks = split_text(text, TTS_MAX_CHARS);
        if chunks.is_empty() {
            anyhow::bail!("Nothing to synthesize");
        }

        let url = self.endpoint(accent);
        let mut clip = AudioClip::empty();
        for (idx, chunk) in chunks.iter().enumerate() {
            let bytes = self
                .fetch_chunk(&url, chunk, language, idx, chunks.len())
                .await?;
            let decoded = tokio::task::spawn_blocking(move || decode_audio(bytes)).await??;
            clip.append(decoded);
        }
        Ok(clip)
    }
}

/// Split `text` into chunks of at most `max` characters.
///
/// Chunks end after whitespace or punctuation where possible; a run with
/// no break point longer than `max` is cut hard.
pub fn split_text(text: &str, max: usize) -> Vec<String> {
    let max = max.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for piece in text.split_inclusive(|c: char| c.is_whitespace() || CHUNK_BREAKS.contains(&c)) {
        let piece_len = piece.chars().count();

        if current_len + piece_len > max {
            flush(&mut current, &mut chunks);
            current_len = 0;
        }

        if piece_len > max {
            let chars: Vec<char> = piece.chars().collect();
            for hard in chars.chunks(max) {
                let mut part: String = hard.iter().collect();
                flush(&mut part, &mut chunks);
            }
            continue;
        }

        current.push_str(piece);
        current_len += piece_len;
    }
    flush(&mut current, &mut chunks);

    chunks
}

fn flush(chunk: &mut String, chunks: &mut Vec<String>) {
    let trimmed = chunk.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
    chunk.clear();
}
