//! Consumer loop: dequeue, decide, compose, pace, play.
//!
//! One message moves through the stages at a time, while the previous one
//! may still be sounding. Every stage boundary re-checks the message's
//! lease, so a deletion arriving before playback starts produces no audio.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::composer::AudioComposer;
use super::decision::DecisionEngine;
use super::ledger::{MessageLease, MessageLedger};
use super::message::{ChatMessage, SpeakableMessagePart};
use super::scheduler::PlaybackScheduler;
use super::PipelineError;
use crate::config::{ConfigHandle, TtsConfig};

/// Pause after a configuration error before the next message is taken.
const CONFIG_ERROR_COOLDOWN: Duration = Duration::from_secs(5);

// ── Stages ───────────────────────────────────────────────────────

/// Where a message is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Waiting for a message.
    Idle,
    /// Dequeued, nothing decided yet.
    Fetched,
    /// Speakable parts are known.
    Decided,
    /// Audio is rendered.
    Composed,
    /// The scheduler let it through.
    Paced,
    /// Handed to the output device.
    Playing,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Fetched => "fetched",
            Self::Decided => "decided",
            Self::Composed => "composed",
            Self::Paced => "paced",
            Self::Playing => "playing",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How processing one message ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Playback started.
    Played,
    /// Nothing to say (emote-only below the reading threshold).
    Skipped,
    /// Deleted or cleared after reaching the given stage.
    Cancelled(Stage),
}

// ── Statistics ───────────────────────────────────────────────────

/// Counters since startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    pub played: u64,
    pub skipped: u64,
    pub cancelled: u64,
    pub failed: u64,
    /// Average time from dequeue to playback start, in milliseconds.
    pub avg_prepare_ms: f64,
}

impl PipelineStats {
    fn record(&mut self, outcome: Outcome, prepare: Duration) {
        match outcome {
            Outcome::Played => {
                self.played += 1;
                // Running average over played messages
                let prev_total = self.avg_prepare_ms * (self.played - 1) as f64;
                self.avg_prepare_ms =
                    (prev_total + prepare.as_secs_f64() * 1000.0) / self.played as f64;
            }
            Outcome::Skipped => self.skipped += 1,
            Outcome::Cancelled(_) => self.cancelled += 1,
        }
    }
}

// ── Pipeline ─────────────────────────────────────────────────────

pub struct SpeechPipeline {
    ledger: Arc<MessageLedger>,
    config: Arc<ConfigHandle>,
    decision: DecisionEngine,
    composer: AudioComposer,
    scheduler: PlaybackScheduler,
    stats: Mutex<PipelineStats>,
}

impl SpeechPipeline {
    pub fn new(
        ledger: Arc<MessageLedger>,
        config: Arc<ConfigHandle>,
        decision: DecisionEngine,
        composer: AudioComposer,
        scheduler: PlaybackScheduler,
    ) -> Self {
        Self {
            ledger,
            config,
            decision,
            composer,
            scheduler,
            stats: Mutex::new(PipelineStats::default()),
        }
    }

    pub fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.lock().clone()
    }

    /// Run the consumer loop until `shutdown` fires.
    ///
    /// Each message is processed in its own task; errors and panics are
    /// logged and the loop moves on. A configuration error additionally
    /// pauses the loop for a short cooldown.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        tracing::info!("Speech pipeline started");

        loop {
            tracing::trace!(stage = %Stage::Idle, backlog = self.ledger.len(), "Waiting for message");
            let lease = tokio::select! {
                () = shutdown.cancelled() => break,
                lease = self.ledger.dequeue() => lease,
            };
            let message_id = lease.id().to_string();

            let worker = {
                let this = Arc::clone(&self);
                tokio::spawn(async move { this.process(lease).await })
            };
            let abort = worker.abort_handle();
            let joined = tokio::select! {
                () = shutdown.cancelled() => {
                    abort.abort();
                    break;
                }
                joined = worker => joined,
            };

            match joined {
                Ok(Ok(outcome)) => {
                    tracing::debug!(message_id = %message_id, outcome = ?outcome, "Message done");
                }
                Ok(Err(PipelineError::Config(e))) => {
                    self.stats.lock().failed += 1;
                    tracing::error!(
                        message_id = %message_id,
                        error = %e,
                        cooldown_secs = CONFIG_ERROR_COOLDOWN.as_secs(),
                        "Configuration error, pausing"
                    );
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep(CONFIG_ERROR_COOLDOWN) => {}
                    }
                }
                Ok(Err(e)) => {
                    self.stats.lock().failed += 1;
                    tracing::warn!(message_id = %message_id, error = %e, "Message abandoned");
                }
                Err(e) if e.is_panic() => {
                    self.stats.lock().failed += 1;
                    tracing::error!(message_id = %message_id, "Message processing panicked");
                }
                Err(e) => {
                    tracing::warn!(message_id = %message_id, error = %e, "Message task ended");
                }
            }
        }

        self.scheduler.cancel();
        tracing::info!("Speech pipeline stopped");
    }

    /// Take one leased message through every stage.
    ///
    /// Returns once playback has started; the lease then lives on in the
    /// playback task.
    pub async fn process(&self, lease: MessageLease) -> Result<Outcome, PipelineError> {
        let started = Instant::now();
        let message_id = lease.id().to_string();
        let cancel = lease.token().clone();
        let message = lease.message().clone();
        tracing::debug!(
            message_id = %message_id,
            author = %message.author.name,
            platform = %message.author.platform,
            stage = %Stage::Fetched,
            "Processing message"
        );

        let config = self.config.reload()?;
        let tts = &config.tts;

        // Fetched → Decided
        let parts = match until_cancelled(&cancel, self.speakable_parts(&message, tts)).await {
            Ok(Some(parts)) => parts,
            Ok(None) => {
                tracing::debug!(message_id = %message_id, "Nothing to read, skipping");
                return Ok(self.finish(Outcome::Skipped, started));
            }
            Err(PipelineError::Cancelled) => {
                return Ok(self.cancelled(&message_id, Stage::Fetched, started))
            }
            Err(e) => return Err(e),
        };
        if cancel.is_cancelled() {
            return Ok(self.cancelled(&message_id, Stage::Decided, started));
        }
        tracing::debug!(message_id = %message_id, parts = parts.len(), stage = %Stage::Decided);

        // Decided → Composed
        let clip = match self.composer.compose(&parts, tts, &cancel).await {
            Ok(clip) => clip,
            Err(PipelineError::Cancelled) => {
                return Ok(self.cancelled(&message_id, Stage::Decided, started))
            }
            Err(e) => return Err(e),
        };
        if cancel.is_cancelled() {
            return Ok(self.cancelled(&message_id, Stage::Composed, started));
        }

        // Composed → Paced
        let pacing = tts.pacing();
        match self
            .scheduler
            .wait_turn(&cancel, || self.ledger.len(), &pacing)
            .await
        {
            Ok(turn) => {
                tracing::debug!(message_id = %message_id, turn = ?turn, stage = %Stage::Paced);
            }
            Err(PipelineError::Cancelled) => {
                return Ok(self.cancelled(&message_id, Stage::Composed, started))
            }
            Err(e) => return Err(e),
        }
        if cancel.is_cancelled() {
            return Ok(self.cancelled(&message_id, Stage::Paced, started));
        }

        // Paced → Playing
        tracing::info!(
            message_id = %message_id,
            author = %message.author.name,
            backlog = self.ledger.len(),
            "Reading message"
        );
        self.scheduler.play(clip, lease);
        Ok(self.finish(Outcome::Played, started))
    }

    async fn speakable_parts(
        &self,
        message: &ChatMessage,
        tts: &TtsConfig,
    ) -> Result<Option<Vec<SpeakableMessagePart>>, PipelineError> {
        let platform = &message.author.platform;

        match message.text() {
            Some(text) => {
                let speaker = self.decision.speakable_name(&message.author.name).await;
                let parts = self.decision.decide(&text, &speaker, platform, tts).await?;
                Ok(Some(parts))
            }
            None => {
                let count = message.emote_count();
                if !DecisionEngine::reads_emote_only(count, tts) {
                    return Ok(None);
                }
                let speaker = self.decision.speakable_name(&message.author.name).await;
                Ok(self
                    .decision
                    .emote_only_parts(&speaker, platform, count, tts))
            }
        }
    }

    fn cancelled(&self, message_id: &str, stage: Stage, started: Instant) -> Outcome {
        tracing::info!(message_id = %message_id, stage = %stage, "Message deleted before playback");
        self.finish(Outcome::Cancelled(stage), started)
    }

    fn finish(&self, outcome: Outcome, started: Instant) -> Outcome {
        self.stats.lock().record(outcome, started.elapsed());
        outcome
    }
}

/// Drive `fut` unless `cancel` fires first.
async fn until_cancelled<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, PipelineError>>,
) -> Result<T, PipelineError> {
    tokio::select! {
        () = cancel.cancelled() => Err(PipelineError::Cancelled),
        result = fut => result,
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::voice::audio::AudioClip;
    use crate::voice::backends::{
        AudioOutput, Detection, LanguageDetector, PlaybackEnd, SpeechSynthesizer, Translation,
        Translator,
    };
    use crate::voice::language::LanguageCode;
    use crate::voice::message::MessageContent;
    use async_trait::async_trait;
    use std::collections::HashMap;

    // ── Fakes ────────────────────────────────────────────────────

    /// Reports English unless a text is mapped. "boom" panics, "bad" fails.
    #[derive(Default)]
    struct FakeDetector {
        languages: HashMap<&'static str, (&'static str, f64)>,
        delay: Duration,
    }

    #[async_trait]
    impl LanguageDetector for FakeDetector {
        async fn detect(&self, text: &str) -> anyhow::Result<Detection> {
            if text == "boom" {
                panic!("detector exploded");
            }
            if text == "bad" {
                anyhow::bail!("detector returned garbage");
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let (language, confidence) = self.languages.get(text).copied().unwrap_or(("en", 0.99));
            Ok(Detection {
                language: language.to_string(),
                confidence,
            })
        }
    }

    #[derive(Default)]
    struct FakeTranslator {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Translator for FakeTranslator {
        async fn translate(&self, text: &str, _: &str, _: &str) -> anyhow::Result<Translation> {
            self.calls.lock().push(text.to_string());
            Ok(Translation {
                text: format!("translated {text}"),
                pronunciation: None,
            })
        }
    }

    /// Renders one second per call.
    #[derive(Default)]
    struct FakeSynth {
        calls: Mutex<Vec<(String, LanguageCode)>>,
        delay: Duration,
    }

    impl FakeSynth {
        fn texts(&self) -> Vec<String> {
            self.calls.lock().iter().map(|(t, _)| t.clone()).collect()
        }
    }

    #[async_trait]
    impl SpeechSynthesizer for FakeSynth {
        async fn synthesize(
            &self,
            text: &str,
            language: LanguageCode,
            _accent: &str,
        ) -> anyhow::Result<AudioClip> {
            self.calls.lock().push((text.to_string(), language));
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(AudioClip::new(vec![0.5; 24_000], 1, 24_000))
        }
    }

    #[derive(Default)]
    struct FakeOutput {
        starts: Mutex<Vec<tokio::time::Instant>>,
        ends: Mutex<Vec<PlaybackEnd>>,
    }

    #[async_trait]
    impl AudioOutput for FakeOutput {
        async fn play(
            &self,
            clip: AudioClip,
            stop: CancellationToken,
        ) -> anyhow::Result<PlaybackEnd> {
            self.starts.lock().push(tokio::time::Instant::now());
            let end = tokio::select! {
                () = stop.cancelled() => PlaybackEnd::Stopped,
                () = tokio::time::sleep(clip.duration()) => PlaybackEnd::Finished,
            };
            self.ends.lock().push(end);
            Ok(end)
        }
    }

    // ── Harness ──────────────────────────────────────────────────

    struct Harness {
        ledger: Arc<MessageLedger>,
        pipeline: Arc<SpeechPipeline>,
        translator: Arc<FakeTranslator>,
        synth: Arc<FakeSynth>,
        output: Arc<FakeOutput>,
    }

    /// Unity speed and volume so composed clips are 0.7 s.
    fn plain_tts() -> TtsConfig {
        TtsConfig {
            playback_speed: 1.0,
            playback_volume: 1.0,
            ..Default::default()
        }
    }

    fn harness_with(config: Arc<ConfigHandle>, detector: FakeDetector, synth: FakeSynth) -> Harness {
        let ledger = MessageLedger::new();
        let translator = Arc::new(FakeTranslator::default());
        let synth = Arc::new(synth);
        let output = Arc::new(FakeOutput::default());

        let pipeline = Arc::new(SpeechPipeline::new(
            Arc::clone(&ledger),
            config,
            DecisionEngine::new(Arc::new(detector), translator.clone()),
            AudioComposer::new(synth.clone()),
            PlaybackScheduler::new(output.clone()),
        ));

        Harness {
            ledger,
            pipeline,
            translator,
            synth,
            output,
        }
    }

    fn harness(tts: TtsConfig) -> Harness {
        let config = Config {
            tts,
            ..Default::default()
        };
        harness_with(
            Arc::new(ConfigHandle::fixed(config)),
            FakeDetector::default(),
            FakeSynth::default(),
        )
    }

    impl Harness {
        fn say(&self, id: &str, text: &str) {
            self.ledger
                .enqueue(ChatMessage::text_fixture(id, "alice", text));
        }

        async fn next(&self) -> Outcome {
            let lease = self.ledger.dequeue().await;
            self.pipeline.process(lease).await.unwrap()
        }

        /// Process the next message in a background task.
        async fn next_in_background(&self) -> tokio::task::JoinHandle<Outcome> {
            let lease = self.ledger.dequeue().await;
            let pipeline = Arc::clone(&self.pipeline);
            tokio::spawn(async move { pipeline.process(lease).await.unwrap() })
        }
    }

    fn emotes(n: usize) -> Vec<MessageContent> {
        (0..n)
            .map(|i| MessageContent::Emote {
                alt: format!("emote{i}"),
            })
            .collect()
    }

    // ── Ordering and deletion ────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn messages_are_read_in_arrival_order() {
        let h = harness(plain_tts());
        h.say("m1", "one");
        h.say("m2", "two");
        h.say("m3", "three");

        for _ in 0..3 {
            assert_eq!(h.next().await, Outcome::Played);
        }
        h.pipeline.scheduler().wait_idle().await;

        assert_eq!(
            h.synth.texts(),
            [
                "alice from youtube said one",
                "alice from youtube said two",
                "alice from youtube said three",
            ]
        );
        assert_eq!(h.output.starts.lock().len(), 3);
        assert_eq!(h.pipeline.stats().played, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn deleted_pending_message_is_never_read() {
        let h = harness(plain_tts());
        h.say("m1", "one");
        h.say("m2", "two");
        h.ledger.mark_deleted("m1");

        assert_eq!(h.next().await, Outcome::Played);
        assert_eq!(h.synth.texts(), ["alice from youtube said two"]);
        assert!(h.ledger.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deletion_during_detection_skips_synthesis() {
        let config = Arc::new(ConfigHandle::fixed(Config {
            tts: plain_tts(),
            ..Default::default()
        }));
        let detector = FakeDetector {
            delay: Duration::from_secs(1),
            ..Default::default()
        };
        let h = harness_with(config, detector, FakeSynth::default());
        h.say("m1", "one");

        let worker = h.next_in_background().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.ledger.mark_deleted("m1"));

        assert_eq!(worker.await.unwrap(), Outcome::Cancelled(Stage::Fetched));
        assert!(h.synth.calls.lock().is_empty());
        assert!(h.output.starts.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deletion_during_synthesis_produces_no_audio() {
        let config = Arc::new(ConfigHandle::fixed(Config {
            tts: plain_tts(),
            ..Default::default()
        }));
        let synth = FakeSynth {
            delay: Duration::from_secs(1),
            ..Default::default()
        };
        let h = harness_with(config, FakeDetector::default(), synth);
        h.say("m1", "one");

        let worker = h.next_in_background().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.ledger.mark_deleted("m1");

        assert_eq!(worker.await.unwrap(), Outcome::Cancelled(Stage::Decided));
        assert!(h.output.starts.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deletion_while_waiting_for_turn_produces_no_audio() {
        let h = harness(plain_tts());
        h.say("m1", "one");
        h.say("m2", "two");

        assert_eq!(h.next().await, Outcome::Played);
        let worker = h.next_in_background().await;

        // m1 ends at 0.7 s, m2 would start at 2.7 s
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.ledger.mark_deleted("m2");

        assert_eq!(worker.await.unwrap(), Outcome::Cancelled(Stage::Composed));
        h.pipeline.scheduler().wait_idle().await;
        assert_eq!(h.output.starts.lock().len(), 1);
        assert_eq!(h.output.ends.lock().as_slice(), &[PlaybackEnd::Finished]);
    }

    #[tokio::test(start_paused = true)]
    async fn deletion_while_playing_stops_audio() {
        let h = harness(plain_tts());
        h.say("m1", "one");

        assert_eq!(h.next().await, Outcome::Played);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.ledger.current().as_deref(), Some("m1"));
        assert!(h.ledger.mark_deleted("m1"));

        h.pipeline.scheduler().wait_idle().await;
        assert_eq!(h.output.ends.lock().as_slice(), &[PlaybackEnd::Stopped]);
        assert_eq!(h.ledger.current(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_stops_playback_and_drops_backlog() {
        let h = harness(plain_tts());
        h.say("m1", "one");
        h.say("m2", "two");
        h.say("m3", "three");

        assert_eq!(h.next().await, Outcome::Played);
        assert_eq!(h.ledger.clear(), 2);

        h.pipeline.scheduler().wait_idle().await;
        assert_eq!(h.output.ends.lock().as_slice(), &[PlaybackEnd::Stopped]);
        assert!(h.ledger.try_dequeue().is_none());
    }

    // ── Pacing ───────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn next_message_waits_for_clip_and_pause() {
        let h = harness(TtsConfig {
            max_time_between_messages: 5.0,
            no_wait_queue_size: 10,
            ..plain_tts()
        });
        h.say("m1", "one");
        h.say("m2", "two");

        assert_eq!(h.next().await, Outcome::Played);
        assert_eq!(h.next().await, Outcome::Played);
        h.pipeline.scheduler().wait_idle().await;

        let starts = h.output.starts.lock().clone();
        assert_eq!(starts.len(), 2);
        // 0.7 s clip, then an empty backlog means the full 5 s pause
        let gap = starts[1] - starts[0];
        assert!(
            gap >= Duration::from_millis(5700) && gap < Duration::from_millis(5710),
            "gap was {gap:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn idle_pipeline_reads_without_pause() {
        let h = harness(TtsConfig {
            max_time_between_messages: 5.0,
            ..plain_tts()
        });
        let start = tokio::time::Instant::now();
        h.say("m1", "one");

        assert_eq!(h.next().await, Outcome::Played);
        tokio::time::sleep(Duration::from_millis(1)).await;
        let starts = h.output.starts.lock().clone();
        assert_eq!(starts.len(), 1);
        assert!(starts[0] - start < Duration::from_millis(10));
    }

    // ── Language decisions ───────────────────────────────────────

    fn spanish_harness(allowed: Vec<LanguageCode>) -> Harness {
        let config = Arc::new(ConfigHandle::fixed(Config {
            tts: TtsConfig {
                allowed_languages: allowed,
                translation_confidence_threshold: 0.5,
                ..plain_tts()
            },
            ..Default::default()
        }));
        let detector = FakeDetector {
            languages: HashMap::from([("hola", ("es", 0.9))]),
            ..Default::default()
        };
        harness_with(config, detector, FakeSynth::default())
    }

    #[tokio::test(start_paused = true)]
    async fn foreign_text_outside_allow_list_is_translated() {
        let h = spanish_harness(vec![LanguageCode::En, LanguageCode::Ja]);
        h.say("m1", "hola");

        assert_eq!(h.next().await, Outcome::Played);
        assert_eq!(
            h.synth.calls.lock().as_slice(),
            &[(
                "alice from youtube said in Spanish translated hola".to_string(),
                LanguageCode::En
            )]
        );
        assert_eq!(h.translator.calls.lock().as_slice(), &["hola".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn allowed_language_is_read_in_its_own_voice() {
        let h = spanish_harness(vec![LanguageCode::En, LanguageCode::Es]);
        h.say("m1", "hola");

        assert_eq!(h.next().await, Outcome::Played);
        assert_eq!(
            h.synth.calls.lock().as_slice(),
            &[
                (
                    "alice from youtube said in Spanish".to_string(),
                    LanguageCode::En
                ),
                ("hola".to_string(), LanguageCode::Es),
            ]
        );
        assert!(h.translator.calls.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn emote_only_message_above_threshold_is_announced() {
        let h = harness(TtsConfig {
            emote_only_reading_threshold: 2,
            ..plain_tts()
        });
        h.ledger
            .enqueue(ChatMessage::fixture("m1", "alice", emotes(3)));

        assert_eq!(h.next().await, Outcome::Played);
        assert_eq!(h.synth.texts(), ["alice from youtube sent 3 emotes"]);
    }

    #[tokio::test(start_paused = true)]
    async fn emote_only_message_below_threshold_is_dropped() {
        let h = harness(TtsConfig {
            emote_only_reading_threshold: 5,
            ..plain_tts()
        });
        h.ledger
            .enqueue(ChatMessage::fixture("m1", "alice", emotes(3)));

        assert_eq!(h.next().await, Outcome::Skipped);
        assert!(h.synth.calls.lock().is_empty());
        assert_eq!(h.pipeline.stats().skipped, 1);
    }

    // ── Errors ───────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn invalid_config_abandons_message() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "[tts]\nplayback_speed = 1.0\n").unwrap();
        let config = Arc::new(ConfigHandle::load(Some(file.path())).unwrap());
        let h = harness_with(config, FakeDetector::default(), FakeSynth::default());

        std::fs::write(file.path(), "[tts]\nplayback_speed = 0.5\n").unwrap();
        h.say("m1", "one");
        let lease = h.ledger.dequeue().await;
        let err = h.pipeline.process(lease).await.unwrap_err();

        assert!(matches!(err, PipelineError::Config(_)));
        assert!(h.synth.calls.lock().is_empty());
        assert_eq!(h.ledger.current(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_cools_down_after_config_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let good = "[tts]\nplayback_speed = 1.0\nplayback_volume = 1.0\n";
        std::fs::write(file.path(), good).unwrap();
        let config = Arc::new(ConfigHandle::load(Some(file.path())).unwrap());
        let h = harness_with(config, FakeDetector::default(), FakeSynth::default());

        let shutdown = CancellationToken::new();
        let runner = tokio::spawn(Arc::clone(&h.pipeline).run(shutdown.clone()));

        std::fs::write(file.path(), "[tts]\nplayback_volume = 0\n").unwrap();
        h.say("m1", "one");
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(h.synth.calls.lock().is_empty());

        std::fs::write(file.path(), good).unwrap();
        h.say("m2", "two");
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(h.synth.calls.lock().is_empty(), "still cooling down");

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(h.synth.texts(), ["alice from youtube said two"]);
        assert_eq!(h.pipeline.stats().failed, 1);

        shutdown.cancel();
        runner.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn loop_survives_backend_errors_and_panics() {
        let h = harness(plain_tts());
        let shutdown = CancellationToken::new();
        let runner = tokio::spawn(Arc::clone(&h.pipeline).run(shutdown.clone()));

        h.say("m1", "bad");
        h.say("m2", "boom");
        h.say("m3", "fine");
        // m3's 0.7 s clip is still playing
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(h.synth.texts(), ["alice from youtube said fine"]);
        let stats = h.pipeline.stats();
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.played, 1);
        assert_eq!(h.ledger.current().as_deref(), Some("m3"));

        shutdown.cancel();
        runner.await.unwrap();
        h.pipeline.scheduler().wait_idle().await;
        assert_eq!(h.output.ends.lock().as_slice(), &[PlaybackEnd::Stopped]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_an_idle_loop() {
        let h = harness(plain_tts());
        let shutdown = CancellationToken::new();
        let runner = tokio::spawn(Arc::clone(&h.pipeline).run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.cancel();
        runner.await.unwrap();
        assert!(!h.pipeline.scheduler().is_busy());
    }

    #[test]
    fn stats_average_prepare_time() {
        let mut stats = PipelineStats::default();
        stats.record(Outcome::Played, Duration::from_millis(100));
        stats.record(Outcome::Played, Duration::from_millis(300));
        stats.record(Outcome::Cancelled(Stage::Composed), Duration::from_millis(900));
        assert_eq!(stats.played, 2);
        assert_eq!(stats.cancelled, 1);
        assert!((stats.avg_prepare_ms - 200.0).abs() < 1e-9);
    }
}
