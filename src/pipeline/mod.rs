//! Audio pipelines between the devices and the transport
//!
//! - [`Uplink`] owns the outbound path: the pending-audio gate, the sequence
//!   counter and the currently attached transport.
//! - [`capture`] reads microphone frames on a blocking task and submits them.
//! - [`PlaybackQueue`] renders inbound audio with a single drain task.
//!
//! Pipelines never end the session themselves; fatal errors are reported on
//! a [`FaultSender`] and the session tears everything down in one place.

pub mod capture;
mod pending;
mod playback;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;

pub use capture::{CaptureHandle, spawn_capture};
pub use pending::{Phase, PendingAudio};
pub use playback::PlaybackQueue;

use crate::audio::AudioFrame;
use crate::protocol::ClientMessage;
use crate::transport::Transport;
use crate::{Error, Result};

/// Channel on which pipelines report session-fatal errors
pub type FaultSender = mpsc::UnboundedSender<Error>;

/// Outbound path shared by the capture pipeline and the session
#[derive(Default)]
pub struct Uplink {
    transport: RwLock<Option<Arc<dyn Transport>>>,
    pending: PendingAudio,
    sent: AtomicU64,
}

impl Uplink {
    /// Create an uplink with no transport attached
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Route outgoing frames through `transport` from now on
    pub fn attach(&self, transport: Arc<dyn Transport>) {
        *self
            .transport
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(transport);
    }

    /// Detach and return the current transport
    pub fn detach(&self) -> Option<Arc<dyn Transport>> {
        self.transport
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Whether a transport is attached
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.transport
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Queue or send one captured frame
    ///
    /// # Errors
    ///
    /// Returns `Error::StreamSend` if the frame had to be sent directly and
    /// the transport refused it
    pub fn submit(&self, frame: AudioFrame) -> Result<()> {
        match self.pending.route(frame) {
            Some(frame) => self.send_frame(frame),
            None => Ok(()),
        }
    }

    /// Flush the pending backlog in capture order, then switch to direct sends
    ///
    /// Returns the number of frames flushed. Calling this again after the
    /// first drain has started does nothing.
    ///
    /// # Errors
    ///
    /// Returns `Error::StreamSend` if the transport refused a frame
    pub fn drain(&self) -> Result<usize> {
        if !self.pending.begin_drain() {
            return Ok(0);
        }

        let mut flushed = 0;
        while let Some(frame) = self.pending.next_for_drain() {
            self.send_frame(frame)?;
            flushed += 1;
        }

        tracing::debug!(flushed, "pending audio drained");
        Ok(flushed)
    }

    /// Send a control message
    ///
    /// # Errors
    ///
    /// Returns error if encoding fails or the transport refused the frame
    pub fn send_control(&self, message: &ClientMessage) -> Result<()> {
        let text = message.to_json()?;
        let transport = self.current()?;
        tracing::debug!(message = message.kind(), "sending control message");
        transport.send_text(text)
    }

    /// Number of audio frames sent this session
    #[must_use]
    pub fn frames_sent(&self) -> u64 {
        self.sent.load(Ordering::Acquire)
    }

    /// The pending-audio gate
    #[must_use]
    pub const fn pending(&self) -> &PendingAudio {
        &self.pending
    }

    /// Forget the transport, the backlog and the sequence count
    pub fn reset(&self) {
        self.detach();
        self.pending.clear();
        self.sent.store(0, Ordering::Release);
    }

    fn send_frame(&self, frame: AudioFrame) -> Result<()> {
        let transport = self.current()?;
        transport.send_binary(frame.data)?;
        let sent = self.sent.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::trace!(capture_seq = frame.seq, sent, "audio frame sent");
        Ok(())
    }

    fn current(&self) -> Result<Arc<dyn Transport>> {
        self.transport
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| Error::StreamSend("no transport attached".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;

    use super::*;

    #[derive(Default)]
    struct RecordingTransport {
        binary: Mutex<Vec<Bytes>>,
        text: Mutex<Vec<String>>,
        refuse: bool,
    }

    impl Transport for RecordingTransport {
        fn send_text(&self, text: String) -> Result<()> {
            self.text.lock().unwrap().push(text);
            Ok(())
        }

        fn send_binary(&self, data: Bytes) -> Result<()> {
            if self.refuse {
                return Err(Error::StreamSend("refused".to_string()));
            }
            self.binary.lock().unwrap().push(data);
            Ok(())
        }

        fn close(&self) {}
    }

    fn frame(seq: u64) -> AudioFrame {
        AudioFrame::new(seq, seq.to_le_bytes().to_vec())
    }

    #[test]
    fn backlog_precedes_live_frames() {
        let uplink = Uplink::new();
        let transport = Arc::new(RecordingTransport::default());
        uplink.attach(transport.clone());

        for seq in 0..3 {
            uplink.submit(frame(seq)).unwrap();
        }
        assert!(transport.binary.lock().unwrap().is_empty());

        assert_eq!(uplink.drain().unwrap(), 3);
        uplink.submit(frame(3)).unwrap();

        let sent: Vec<Bytes> = transport.binary.lock().unwrap().clone();
        let expected: Vec<Bytes> = (0..4u64).map(|s| Bytes::from(s.to_le_bytes().to_vec())).collect();
        assert_eq!(sent, expected);
        assert_eq!(uplink.frames_sent(), 4);
    }

    #[test]
    fn second_drain_is_a_no_op() {
        let uplink = Uplink::new();
        uplink.attach(Arc::new(RecordingTransport::default()));
        uplink.submit(frame(0)).unwrap();

        assert_eq!(uplink.drain().unwrap(), 1);
        assert_eq!(uplink.drain().unwrap(), 0);
    }

    #[test]
    fn direct_send_without_transport_fails() {
        let uplink = Uplink::new();
        uplink.attach(Arc::new(RecordingTransport::default()));
        uplink.drain().unwrap();
        uplink.detach();

        assert!(matches!(uplink.submit(frame(0)), Err(Error::StreamSend(_))));
    }

    #[test]
    fn refused_frame_is_reported() {
        let uplink = Uplink::new();
        uplink.attach(Arc::new(RecordingTransport {
            refuse: true,
            ..RecordingTransport::default()
        }));
        uplink.submit(frame(0)).unwrap();

        assert!(matches!(uplink.drain(), Err(Error::StreamSend(_))));
        assert_eq!(uplink.frames_sent(), 0);
    }

    #[test]
    fn control_messages_are_json_text() {
        let uplink = Uplink::new();
        let transport = Arc::new(RecordingTransport::default());
        uplink.attach(transport.clone());

        uplink
            .send_control(&ClientMessage::AudioEnded { last_seq_no: 9 })
            .unwrap();

        assert_eq!(
            transport.text.lock().unwrap().as_slice(),
            [r#"{"message":"AudioEnded","last_seq_no":9}"#.to_string()]
        );
    }

    #[test]
    fn reset_clears_backlog_and_count() {
        let uplink = Uplink::new();
        uplink.attach(Arc::new(RecordingTransport::default()));
        uplink.drain().unwrap();
        uplink.submit(frame(0)).unwrap();
        assert_eq!(uplink.frames_sent(), 1);

        uplink.reset();

        assert_eq!(uplink.frames_sent(), 0);
        assert!(!uplink.is_attached());
        assert_eq!(uplink.pending().phase(), Phase::Buffering);
    }
}
