//! Audio capture from microphone

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use super::{CaptureSource, f32_to_pcm16};
use crate::{Error, Result};

/// How long `read_frame` waits before reporting an idle poll
const POLL_INTERVAL: Duration = Duration::from_millis(100);

enum CaptureEvent {
    Samples(Vec<u8>),
    Failed(String),
}

/// Captures PCM16 frames from the default input device
///
/// The cpal stream lives on a dedicated thread since streams are not `Send`
/// on every host. Samples cross over a channel and are re-chunked into
/// fixed-size frames by [`CaptureSource::read_frame`].
pub struct CpalCapture {
    events: mpsc::Receiver<CaptureEvent>,
    pending: Vec<u8>,
    frame_bytes: usize,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CpalCapture {
    /// Open the default input device and start capturing
    ///
    /// # Errors
    ///
    /// Returns error if no input device supports mono capture at `sample_rate`
    pub fn open(sample_rate: u32, frame_bytes: usize) -> Result<Self> {
        let (tx, events) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name("flow-capture".to_string())
            .spawn(move || {
                let stream = match build_stream(sample_rate, tx) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                while !stop_flag.load(Ordering::Acquire) {
                    std::thread::park_timeout(POLL_INTERVAL);
                }

                drop(stream);
                tracing::debug!("audio capture stopped");
            })?;

        ready_rx
            .recv()
            .map_err(|_| Error::Device("capture thread exited during setup".to_string()))??;

        Ok(Self {
            events,
            pending: Vec::with_capacity(frame_bytes * 2),
            frame_bytes,
            stop,
            thread: Some(thread),
        })
    }
}

fn build_stream(sample_rate: u32, tx: mpsc::Sender<CaptureEvent>) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Device("no input device available".to_string()))?;

    let supports_rate = |c: &cpal::SupportedStreamConfigRange| {
        c.min_sample_rate() <= SampleRate(sample_rate)
            && c.max_sample_rate() >= SampleRate(sample_rate)
    };

    let supported_config = device
        .supported_input_configs()
        .map_err(|e| Error::Device(e.to_string()))?
        .find(|c| c.channels() == 1 && supports_rate(c))
        .or_else(|| {
            // Fallback: any channel count, downmixed in the callback
            device
                .supported_input_configs()
                .ok()?
                .find(|c| supports_rate(c))
        })
        .ok_or_else(|| Error::Device("no suitable audio config found".to_string()))?;

    let config: StreamConfig = supported_config
        .with_sample_rate(SampleRate(sample_rate))
        .config();
    let channels = usize::from(config.channels.max(1));

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels,
        "audio capture initialized"
    );

    let err_tx = tx.clone();
    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let pcm = if channels == 1 {
                    f32_to_pcm16(data)
                } else {
                    #[allow(clippy::cast_precision_loss)]
                    let mono: Vec<f32> = data
                        .chunks(channels)
                        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                        .collect();
                    f32_to_pcm16(&mono)
                };
                let _ = tx.send(CaptureEvent::Samples(pcm));
            },
            move |err| {
                tracing::error!(error = %err, "audio capture error");
                let _ = err_tx.send(CaptureEvent::Failed(err.to_string()));
            },
            None,
        )
        .map_err(|e| Error::Device(e.to_string()))?;

    stream.play().map_err(|e| Error::Device(e.to_string()))?;
    tracing::debug!("audio capture started");

    Ok(stream)
}

impl CaptureSource for CpalCapture {
    fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        while self.pending.len() < self.frame_bytes {
            match self.events.recv_timeout(POLL_INTERVAL) {
                Ok(CaptureEvent::Samples(pcm)) => self.pending.extend_from_slice(&pcm),
                Ok(CaptureEvent::Failed(reason)) => return Err(Error::Device(reason)),
                Err(mpsc::RecvTimeoutError::Timeout) => return Ok(None),
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(Error::Device("capture stream ended".to_string()));
                }
            }
        }

        let rest = self.pending.split_off(self.frame_bytes);
        Ok(Some(std::mem::replace(&mut self.pending, rest)))
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            let _ = thread.join();
        }
    }
}

/// Convert f32 samples to WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Device(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Device(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Device(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_has_riff_header_and_sample_count() {
        let wav = samples_to_wav(&[0.0, 0.5, -0.5, 1.0], 16000).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");

        let reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.len(), 4);
    }
}
