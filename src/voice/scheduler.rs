//! Playback scheduler: one clip at a time, paced against the backlog.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::audio::AudioClip;
use super::backends::{AudioOutput, PlaybackEnd};
use super::ledger::MessageLease;
use super::PipelineError;
use crate::config::Pacing;

/// Pause before the next clip for a given backlog depth.
///
/// Shrinks linearly from `max_pause` at an empty backlog to zero once the
/// backlog reaches `no_wait_threshold`.
pub fn pause_for(backlog: usize, pacing: &Pacing) -> Duration {
    let threshold = pacing.no_wait_threshold.max(1) as f64;
    let factor = (1.0 - backlog as f64 / threshold).max(0.0);
    pacing.max_pause.mul_f64(factor)
}

/// How the scheduler let the next clip through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Turn {
    /// Nothing was playing.
    Immediate,
    /// Waited for the previous clip, then paused this long.
    Paced(Duration),
}

struct ActivePlayback {
    message_id: String,
    stop: CancellationToken,
    /// Cancelled when the playback task exits, however it exits.
    finished: CancellationToken,
}

pub struct PlaybackScheduler {
    output: Arc<dyn AudioOutput>,
    active: Mutex<Option<ActivePlayback>>,
}

impl PlaybackScheduler {
    pub fn new(output: Arc<dyn AudioOutput>) -> Self {
        Self {
            output,
            active: Mutex::new(None),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|a| !a.finished.is_cancelled())
    }

    /// Wait until the next clip may start.
    ///
    /// When a clip is playing, waits for it to end and then for the pause
    /// computed from the backlog at that moment. Both waits abort with
    /// [`PipelineError::Cancelled`] when `cancel` fires.
    pub async fn wait_turn(
        &self,
        cancel: &CancellationToken,
        backlog: impl Fn() -> usize,
        pacing: &Pacing,
    ) -> Result<Turn, PipelineError> {
        if !self.is_busy() {
            return Ok(Turn::Immediate);
        }

        tokio::select! {
            () = cancel.cancelled() => return Err(PipelineError::Cancelled),
            () = self.wait_idle() => {}
        }

        let depth = backlog();
        let pause = pause_for(depth, pacing);
        tracing::debug!(backlog = depth, pause_ms = pause.as_millis() as u64, "Pacing next message");

        tokio::select! {
            () = cancel.cancelled() => Err(PipelineError::Cancelled),
            () = tokio::time::sleep(pause) => Ok(Turn::Paced(pause)),
        }
    }

    /// Start playing `clip` in the background and return immediately.
    ///
    /// The lease travels with the playback task, so deleting the message
    /// stops the audio. A clip still playing from before is stopped.
    pub fn play(&self, clip: AudioClip, lease: MessageLease) {
        let stop = lease.token().child_token();
        let finished = CancellationToken::new();
        let message_id = lease.id().to_string();

        let output = Arc::clone(&self.output);
        let task_stop = stop.clone();
        let done = finished.clone().drop_guard();
        let duration = clip.duration();

        tracing::info!(
            message_id = %message_id,
            duration_ms = duration.as_millis() as u64,
            "Playback started"
        );

        tokio::spawn(async move {
            let _done = done;
            let id = lease.id().to_string();
            match output.play(clip, task_stop).await {
                Ok(PlaybackEnd::Finished) => {
                    tracing::debug!(message_id = %id, "Playback finished");
                }
                Ok(PlaybackEnd::Stopped) => {
                    tracing::info!(message_id = %id, "Playback stopped");
                }
                Err(e) => {
                    let err = PipelineError::Playback(e);
                    tracing::error!(message_id = %id, error = %err, "Audio output error");
                }
            }
            drop(lease);
        });

        let previous = self.active.lock().replace(ActivePlayback {
            message_id,
            stop,
            finished,
        });
        if let Some(prev) = previous.filter(|p| !p.finished.is_cancelled()) {
            tracing::warn!(message_id = %prev.message_id, "Stopping overlapped playback");
            prev.stop.cancel();
        }
    }

    /// Stop the active clip, if any.
    pub fn cancel(&self) {
        if let Some(active) = self.active.lock().as_ref() {
            if !active.stop.is_cancelled() && !active.finished.is_cancelled() {
                tracing::info!(message_id = %active.message_id, "Cancelling playback");
            }
            active.stop.cancel();
        }
    }

    /// Resolves once nothing is playing.
    pub async fn wait_idle(&self) {
        let finished = self.active.lock().as_ref().map(|a| a.finished.clone());
        if let Some(finished) = finished {
            finished.cancelled().await;
        }
    }
}
