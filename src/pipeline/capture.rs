//! Capture pipeline: microphone frames into the uplink

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{FaultSender, Uplink};
use crate::audio::{AudioDevices, AudioFrame, CaptureSource, EchoSuppressor};
use crate::config::AudioConfig;

/// Running capture loop
pub struct CaptureHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl CaptureHandle {
    /// Stop the loop and wait for it to release the device
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "capture task did not exit cleanly");
        }
    }

    /// Whether the loop has exited
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Open the microphone and start feeding `uplink` on a blocking task
///
/// The loop checks `cancel` once per frame or idle poll. Device errors and
/// refused sends are reported on `faults` and end the loop; errors seen after
/// cancellation are expected and dropped.
pub fn spawn_capture(
    devices: Arc<dyn AudioDevices>,
    audio: AudioConfig,
    filter: Option<EchoSuppressor>,
    uplink: Arc<Uplink>,
    faults: FaultSender,
    cancel: CancellationToken,
) -> CaptureHandle {
    let token = cancel.clone();
    let task = tokio::task::spawn_blocking(move || {
        match devices.open_capture(audio.sample_rate, audio.frame_bytes) {
            Ok(source) => run_capture(source, filter.as_ref(), &uplink, &faults, &token),
            Err(e) => {
                tracing::error!(error = %e, "failed to open microphone");
                let _ = faults.send(e);
            }
        }
    });

    CaptureHandle { cancel, task }
}

fn run_capture(
    mut source: Box<dyn CaptureSource>,
    filter: Option<&EchoSuppressor>,
    uplink: &Uplink,
    faults: &FaultSender,
    cancel: &CancellationToken,
) {
    tracing::info!("capture started");
    let mut seq = 0u64;

    while !cancel.is_cancelled() {
        let pcm = match source.read_frame() {
            Ok(Some(pcm)) => pcm,
            Ok(None) => continue,
            Err(e) => {
                if !cancel.is_cancelled() {
                    tracing::error!(error = %e, "microphone read failed");
                    let _ = faults.send(e);
                }
                break;
            }
        };

        let mut frame = AudioFrame::new(seq, pcm);
        seq += 1;
        if let Some(filter) = filter {
            frame = filter.apply(frame);
        }

        if let Err(e) = uplink.submit(frame) {
            if !cancel.is_cancelled() {
                tracing::error!(error = %e, "failed to send audio frame");
                let _ = faults.send(e);
            }
            break;
        }
    }

    tracing::info!(frames = seq, "capture stopped");
}
