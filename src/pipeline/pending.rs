//! Pending-audio queue
//!
//! Holds captured frames until the server acknowledges the conversation,
//! then hands them to a drain in capture order. Frames captured while the
//! drain runs join the back of the queue, so nothing overtakes older audio.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use crate::audio::AudioFrame;

/// Routing phase of the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No acknowledgement yet; every frame is queued
    Buffering,
    /// The backlog is being flushed; new frames are queued behind it
    Draining,
    /// Backlog flushed; frames go straight to the transport
    Direct,
}

#[derive(Debug)]
struct Inner {
    phase: Phase,
    frames: VecDeque<AudioFrame>,
}

/// FIFO buffer gating outbound audio behind the conversation ack
#[derive(Debug)]
pub struct PendingAudio {
    inner: Mutex<Inner>,
}

impl Default for PendingAudio {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingAudio {
    /// Create an empty queue in the buffering phase
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                phase: Phase::Buffering,
                frames: VecDeque::new(),
            }),
        }
    }

    /// Queue `frame` unless frames may go straight out
    ///
    /// Returns the frame back when the caller should send it directly.
    pub fn route(&self, frame: AudioFrame) -> Option<AudioFrame> {
        let mut inner = self.lock();
        if inner.phase == Phase::Direct {
            return Some(frame);
        }
        inner.frames.push_back(frame);
        None
    }

    /// Leave the buffering phase and start draining
    ///
    /// Returns `false` if a drain already started or finished.
    pub fn begin_drain(&self) -> bool {
        let mut inner = self.lock();
        if inner.phase != Phase::Buffering {
            return false;
        }
        inner.phase = Phase::Draining;
        true
    }

    /// Pop the oldest queued frame for the drain
    ///
    /// When the queue is empty the phase switches to direct under the same
    /// lock, so no frame can slip in between the last pop and the switch.
    pub fn next_for_drain(&self) -> Option<AudioFrame> {
        let mut inner = self.lock();
        let frame = inner.frames.pop_front();
        if frame.is_none() {
            inner.phase = Phase::Direct;
        }
        frame
    }

    /// Drop every queued frame and return to buffering
    pub fn clear(&self) {
        let mut inner = self.lock();
        let dropped = inner.frames.len();
        inner.frames.clear();
        inner.phase = Phase::Buffering;
        if dropped > 0 {
            tracing::debug!(dropped, "cleared pending audio");
        }
    }

    /// Current routing phase
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    /// Number of queued frames
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    /// Whether no frames are queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().frames.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
