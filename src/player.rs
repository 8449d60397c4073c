//! Snippet playback: play a preview URL for a fixed duration, then stop.
//!
//! Audio decoding lives behind [`AudioOutput`]. [`ScheduledPlayer`] owns the
//! timing: every `play` or `stop` cancels the pending stop timer, and a
//! generation counter keeps a timer that already fired from halting a newer
//! snippet.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::PlayerError;

/// Contract the game session plays snippets through.
pub trait SnippetPlayer: Send + Sync {
    /// Starts `url`, replacing anything already playing, and stops after `duration`.
    fn play(&self, url: &str, duration: Duration) -> Result<(), PlayerError>;
    fn stop(&self);
    fn volume(&self) -> f32;
    /// Clamped to `0.0..=1.0`.
    fn set_volume(&self, volume: f32);
    fn is_playing(&self) -> bool;
    /// Observes `is_playing` transitions.
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Device-level audio sink.
pub trait AudioOutput: Send + Sync + 'static {
    fn start(&self, url: &str) -> Result<(), PlayerError>;
    fn halt(&self);
    fn set_volume(&self, volume: f32);
}

struct PlayerState {
    generation: u64,
    timer: Option<JoinHandle<()>>,
    volume: f32,
}

struct PlayerInner<A> {
    output: A,
    state: Mutex<PlayerState>,
    playing: watch::Sender<bool>,
}

impl<A: AudioOutput> PlayerInner<A> {
    fn lock(&self) -> MutexGuard<'_, PlayerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Invalidates any pending timer and silences the output.
    fn cancel(&self, state: &mut PlayerState) {
        state.generation += 1;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        if *self.playing.borrow() {
            self.output.halt();
        }
        self.playing.send_replace(false);
    }

    fn finish(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation != generation {
            debug!(generation, current = state.generation, "Ignoring stale snippet timer");
            return;
        }
        state.timer = None;
        self.output.halt();
        self.playing.send_replace(false);
    }
}

pub struct ScheduledPlayer<A> {
    inner: Arc<PlayerInner<A>>,
}

impl<A: AudioOutput> ScheduledPlayer<A> {
    pub fn new(output: A) -> Self {
        let (playing, _) = watch::channel(false);
        Self {
            inner: Arc::new(PlayerInner {
                output,
                state: Mutex::new(PlayerState {
                    generation: 0,
                    timer: None,
                    volume: 1.0,
                }),
                playing,
            }),
        }
    }
}

impl<A: AudioOutput> SnippetPlayer for ScheduledPlayer<A> {
    fn play(&self, url: &str, duration: Duration) -> Result<(), PlayerError> {
        let mut state = self.inner.lock();
        self.inner.cancel(&mut state);

        if url.trim().is_empty() {
            return Err(PlayerError::MissingUrl);
        }
        if let Err(e) = self.inner.output.start(url) {
            warn!(url = %url, error = %e, "Audio playback failed");
            return Err(e);
        }
        self.inner.playing.send_replace(true);

        let generation = state.generation;
        let inner = Arc::clone(&self.inner);
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            inner.finish(generation);
        }));
        let duration_ms = duration.as_millis() as u64;
        debug!(url = %url, duration_ms, generation, "Snippet started");
        Ok(())
    }

    fn stop(&self) {
        let mut state = self.inner.lock();
        self.inner.cancel(&mut state);
    }

    fn volume(&self) -> f32 {
        self.inner.lock().volume
    }

    fn set_volume(&self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        self.inner.lock().volume = volume;
        self.inner.output.set_volume(volume);
    }

    fn is_playing(&self) -> bool {
        *self.inner.playing.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.playing.subscribe()
    }
}

impl<A> Drop for ScheduledPlayer<A> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.generation += 1;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }
}

/// Prints what would be played; used by the interactive CLI.
#[derive(Debug, Default)]
pub struct ConsoleOutput;

impl AudioOutput for ConsoleOutput {
    fn start(&self, url: &str) -> Result<(), PlayerError> {
        println!("[audio] playing {}", url);
        Ok(())
    }

    fn halt(&self) {
        println!("[audio] stopped");
    }

    fn set_volume(&self, volume: f32) {
        println!("[audio] volume {:.0}%", volume * 100.0);
    }
}
