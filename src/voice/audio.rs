//! PCM audio clips and the default-device audio output.
//!
//! Clips are interleaved `f32` samples in `-1.0..=1.0`. All editing
//! (concatenation, speed-up, gain, trimming) happens in memory before a
//! clip is handed to the output device.

use async_trait::async_trait;
use rodio::Source;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::backends::{AudioOutput, PlaybackEnd};

/// Sample rate of the speech endpoint's MP3 output.
const DEFAULT_SAMPLE_RATE: u32 = 24_000;

/// Speed-up chunk length (ms), see [`AudioClip::speedup`].
const SPEEDUP_CHUNK_MS: f64 = 150.0;

/// Crossfade between kept speed-up chunks (ms).
const SPEEDUP_CROSSFADE_MS: f64 = 25.0;

// ── Clip ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    samples: Vec<f32>,
    channels: u16,
    sample_rate: u32,
}

impl Default for AudioClip {
    fn default() -> Self {
        Self::empty()
    }
}

impl AudioClip {
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        Self {
            samples,
            channels: channels.max(1),
            sample_rate: sample_rate.max(1),
        }
    }

    /// A clip with no samples. Appending to it adopts the other clip's format.
    pub fn empty() -> Self {
        Self::new(Vec::new(), 1, DEFAULT_SAMPLE_RATE)
    }

    pub fn silence(duration: Duration, channels: u16, sample_rate: u32) -> Self {
        let frames = (duration.as_secs_f64() * f64::from(sample_rate)).round() as usize;
        Self::new(
            vec![0.0; frames * usize::from(channels.max(1))],
            channels,
            sample_rate,
        )
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of sample frames (one sample per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames() as f64 / f64::from(self.sample_rate))
    }

    fn ms_to_frames(&self, ms: f64) -> usize {
        (ms * f64::from(self.sample_rate) / 1000.0).round().max(0.0) as usize
    }

    fn slice_frames(&self, start: usize, end: usize) -> AudioClip {
        let ch = usize::from(self.channels);
        let end = end.min(self.frames());
        let start = start.min(end);
        Self::new(
            self.samples[start * ch..end * ch].to_vec(),
            self.channels,
            self.sample_rate,
        )
    }

    /// Append `other`, converting it to this clip's format when they differ.
    pub fn append(&mut self, other: AudioClip) {
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            *self = other;
            return;
        }
        let other = other.conform(self.channels, self.sample_rate);
        self.samples.extend_from_slice(&other.samples);
    }

    /// Convert to the given channel count and sample rate.
    ///
    /// Channel changes go through a mono mix-down; rate changes use linear
    /// interpolation.
    pub fn conform(self, channels: u16, sample_rate: u32) -> AudioClip {
        let channels = channels.max(1);
        let sample_rate = sample_rate.max(1);
        if self.channels == channels && self.sample_rate == sample_rate {
            return self;
        }

        let src_ch = usize::from(self.channels);
        let mono: Vec<f32> = self
            .samples
            .chunks_exact(src_ch)
            .map(|frame| frame.iter().sum::<f32>() / src_ch as f32)
            .collect();

        let resampled = if self.sample_rate == sample_rate || mono.is_empty() {
            mono
        } else {
            let ratio = f64::from(self.sample_rate) / f64::from(sample_rate);
            let out_frames = (mono.len() as f64 / ratio).round() as usize;
            (0..out_frames)
                .map(|i| {
                    let pos = i as f64 * ratio;
                    let idx = pos.floor() as usize;
                    let frac = (pos - idx as f64) as f32;
                    let a = mono[idx.min(mono.len() - 1)];
                    let b = mono[(idx + 1).min(mono.len() - 1)];
                    a + (b - a) * frac
                })
                .collect()
        };

        let dst_ch = usize::from(channels);
        let samples = resampled
            .into_iter()
            .flat_map(|s| std::iter::repeat(s).take(dst_ch))
            .collect();

        Self::new(samples, channels, sample_rate)
    }

    /// Scale loudness by `db` decibels, clipping to full scale.
    pub fn apply_gain_db(&mut self, db: f64) {
        let factor = 10f64.powf(db / 20.0) as f32;
        for s in &mut self.samples {
            *s = (*s * factor).clamp(-1.0, 1.0);
        }
    }

    /// Speed up playback by `factor` without changing pitch.
    ///
    /// Cuts the clip into short windows, drops the tail of each window and
    /// crossfades the kept heads. Clips too short to hold two windows are
    /// returned unchanged.
    pub fn speedup(&self, factor: f64) -> AudioClip {
        if !(factor > 1.0) || self.is_empty() {
            return self.clone();
        }

        let atk = 1.0 / factor;
        let (chunk_ms, remove_ms) = if factor < 2.0 {
            (
                SPEEDUP_CHUNK_MS,
                (SPEEDUP_CHUNK_MS * (1.0 - atk) / atk).floor(),
            )
        } else {
            (atk * SPEEDUP_CHUNK_MS / (1.0 - atk), SPEEDUP_CHUNK_MS)
        };
        let crossfade_ms = SPEEDUP_CROSSFADE_MS.min(remove_ms - 1.0).max(0.0);

        let window = self.ms_to_frames(chunk_ms + remove_ms);
        let remove = self.ms_to_frames(remove_ms);
        let crossfade = self.ms_to_frames(crossfade_ms);
        if window == 0 || remove == 0 {
            return self.clone();
        }

        let total = self.frames();
        let chunk_count = total.div_ceil(window);
        if chunk_count < 2 {
            return self.clone();
        }

        let keep = window - (remove - crossfade.min(remove));
        let mut out = self.slice_frames(0, keep);
        for i in 1..chunk_count - 1 {
            let start = i * window;
            let chunk = self.slice_frames(start, start + keep);
            out.append_crossfaded(&chunk, crossfade);
        }
        let last = self.slice_frames((chunk_count - 1) * window, total);
        out.samples.extend_from_slice(&last.samples);
        out
    }

    /// Append a clip of the same format, linearly crossfading `frames` frames.
    fn append_crossfaded(&mut self, next: &AudioClip, frames: usize) {
        let ch = usize::from(self.channels);
        let fade = frames.min(self.frames()).min(next.frames());
        if fade == 0 {
            self.samples.extend_from_slice(&next.samples);
            return;
        }

        let tail_start = (self.frames() - fade) * ch;
        for f in 0..fade {
            let t = (f + 1) as f32 / (fade + 1) as f32;
            for c in 0..ch {
                let out = &mut self.samples[tail_start + f * ch + c];
                *out = *out * (1.0 - t) + next.samples[f * ch + c] * t;
            }
        }
        self.samples.extend_from_slice(&next.samples[fade * ch..]);
    }

    /// Cut `lead` from the start and `trail` from the end.
    ///
    /// A clip shorter than `lead + trail` becomes empty.
    pub fn trim(&self, lead: Duration, trail: Duration) -> AudioClip {
        let start = self.ms_to_frames(lead.as_secs_f64() * 1000.0);
        let cut = self.ms_to_frames(trail.as_secs_f64() * 1000.0);
        let end = self.frames().saturating_sub(cut);
        if start >= end {
            return Self::new(Vec::new(), self.channels, self.sample_rate);
        }
        self.slice_frames(start, end)
    }
}

/// Decode an MP3 (or any format rodio can probe) into a clip.
pub fn decode_audio(bytes: Vec<u8>) -> anyhow::Result<AudioClip> {
    let decoder = rodio::Decoder::new(std::io::Cursor::new(bytes))
        .map_err(|e| anyhow::anyhow!("Failed to decode speech audio: {e}"))?;
    let channels = decoder.channels();
    let sample_rate = decoder.sample_rate();
    let samples: Vec<f32> = decoder.collect();
    Ok(AudioClip::new(samples, channels, sample_rate))
}

// ── Default output device ────────────────────────────────────────

/// Plays clips on the system's default output device.
///
/// Each clip gets its own blocking thread and output stream, so a hung
/// device never stalls the async runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct RodioOutput;

#[async_trait]
impl AudioOutput for RodioOutput {
    async fn play(&self, clip: AudioClip, stop: CancellationToken) -> anyhow::Result<PlaybackEnd> {
        if clip.is_empty() {
            return Ok(PlaybackEnd::Finished);
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let mut worker = tokio::task::spawn_blocking(move || play_blocking(clip, stop_rx));

        tokio::select! {
            joined = &mut worker => joined?,
            () = stop.cancelled() => {
                let _ = stop_tx.send(());
                worker.await??;
                Ok(PlaybackEnd::Stopped)
            }
        }
    }
}

fn play_blocking(clip: AudioClip, stop_rx: mpsc::Receiver<()>) -> anyhow::Result<PlaybackEnd> {
    let mut stream = rodio::OutputStreamBuilder::open_default_stream()
        .map_err(|e| anyhow::anyhow!("Failed to open default audio output: {e}"))?;
    stream.log_on_drop(false);
    let sink = rodio::Sink::connect_new(stream.mixer());

    let duration = clip.duration();
    sink.append(rodio::buffer::SamplesBuffer::new(
        clip.channels,
        clip.sample_rate,
        clip.samples,
    ));

    // Sleep for the clip's length unless a stop arrives first. A dropped
    // sender means the owning task was aborted.
    match stop_rx.recv_timeout(duration) {
        Ok(()) | Err(RecvTimeoutError::Disconnected) => {
            sink.stop();
            Ok(PlaybackEnd::Stopped)
        }
        Err(RecvTimeoutError::Timeout) => {
            sink.sleep_until_end();
            Ok(PlaybackEnd::Finished)
        }
    }
}
