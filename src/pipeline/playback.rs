//! Playback queue with a single drain task

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;

use super::FaultSender;
use crate::audio::AudioSink;

#[derive(Default)]
struct State {
    frames: VecDeque<Bytes>,
    draining: bool,
    drains_started: u64,
}

/// Ordered buffer of inbound audio rendered to one sink
///
/// At most one drain task exists at a time. `enqueue` never waits for the
/// sink; it starts a drain only when none is running, and the drain exits
/// once the queue is empty.
pub struct PlaybackQueue {
    state: Mutex<State>,
    sink: Mutex<Box<dyn AudioSink>>,
    faults: FaultSender,
}

impl PlaybackQueue {
    /// Create a queue rendering to `sink`
    #[must_use]
    pub fn new(sink: Box<dyn AudioSink>, faults: FaultSender) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
            sink: Mutex::new(sink),
            faults,
        })
    }

    /// Append a frame, starting a drain if none is running
    pub fn enqueue(self: &Arc<Self>, pcm: Bytes) {
        if pcm.is_empty() {
            return;
        }

        let start_drain = {
            let mut state = self.lock_state();
            state.frames.push_back(pcm);
            if state.draining {
                false
            } else {
                state.draining = true;
                state.drains_started += 1;
                true
            }
        };

        if start_drain {
            let queue = Arc::clone(self);
            tokio::task::spawn_blocking(move || queue.drain());
        }
    }

    /// Abandon every queued frame
    ///
    /// A running drain finishes the frame it is writing and then exits.
    pub fn clear(&self) {
        let mut state = self.lock_state();
        let dropped = state.frames.len();
        state.frames.clear();
        if dropped > 0 {
            tracing::debug!(dropped, "abandoned queued playback");
        }
    }

    /// Number of frames waiting to be played
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_state().frames.len()
    }

    /// Whether nothing is waiting to be played
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock_state().frames.is_empty()
    }

    /// Whether a drain task is running
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.lock_state().draining
    }

    /// How many drain tasks have been started
    #[must_use]
    pub fn drains_started(&self) -> u64 {
        self.lock_state().drains_started
    }

    fn drain(&self) {
        loop {
            let next = {
                let mut state = self.lock_state();
                let next = state.frames.pop_front();
                if next.is_none() {
                    state.draining = false;
                }
                next
            };
            let Some(pcm) = next else {
                return;
            };

            let result = self
                .sink
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .write(&pcm);

            if let Err(e) = result {
                tracing::error!(error = %e, "playback failed");
                let mut state = self.lock_state();
                state.frames.clear();
                state.draining = false;
                drop(state);
                let _ = self.faults.send(e);
                return;
            }
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
