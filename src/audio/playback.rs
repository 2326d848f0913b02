//! Audio playback to speakers

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use super::{AudioDevices, AudioSink, CaptureSource, CpalCapture, pcm16_to_f32};
use crate::{Error, Result};

/// Poll interval while waiting for the device to consume buffered audio
const WAIT_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Default)]
struct SharedOutput {
    samples: VecDeque<f32>,
    failure: Option<String>,
}

/// Plays PCM16 frames to the default output device
///
/// `write` blocks once more than `high_water` samples are queued, so a
/// producer cannot run ahead of the speaker by more than a fraction of a
/// second.
pub struct CpalPlayback {
    shared: Arc<Mutex<SharedOutput>>,
    high_water: usize,
    sample_rate: u32,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CpalPlayback {
    /// Open the default output device at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if no output device supports `sample_rate`
    pub fn open(sample_rate: u32) -> Result<Self> {
        let shared = Arc::new(Mutex::new(SharedOutput::default()));
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel();

        let stream_shared = Arc::clone(&shared);
        let stop_flag = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("flow-playback".to_string())
            .spawn(move || {
                let stream = match build_stream(sample_rate, stream_shared) {
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
                    std::thread::park_timeout(Duration::from_millis(100));
                }

                drop(stream);
                tracing::debug!("audio playback stopped");
            })?;

        ready_rx
            .recv()
            .map_err(|_| Error::Device("playback thread exited during setup".to_string()))??;

        Ok(Self {
            shared,
            high_water: (sample_rate / 4) as usize,
            sample_rate,
            stop,
            thread: Some(thread),
        })
    }

    /// Block until everything written so far has been played
    ///
    /// # Errors
    ///
    /// Returns error if the output device failed
    pub fn finish(&self) -> Result<()> {
        self.wait_until(0)?;
        // Let the device flush its own buffer
        std::thread::sleep(Duration::from_millis(100));
        Ok(())
    }

    /// Sample rate the device was opened at
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn wait_until(&self, max_queued: usize) -> Result<()> {
        loop {
            {
                let shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(reason) = &shared.failure {
                    return Err(Error::Device(reason.clone()));
                }
                if shared.samples.len() <= max_queued {
                    return Ok(());
                }
            }
            std::thread::sleep(WAIT_INTERVAL);
        }
    }
}

fn build_stream(sample_rate: u32, shared: Arc<Mutex<SharedOutput>>) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Device("no output device available".to_string()))?;

    let supported_config = device
        .supported_output_configs()
        .map_err(|e| Error::Device(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .or_else(|| {
            // Fallback: try stereo
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
        })
        .ok_or_else(|| Error::Device("no suitable output config found".to_string()))?;

    let config: StreamConfig = supported_config
        .with_sample_rate(SampleRate(sample_rate))
        .config();
    let channels = usize::from(config.channels.max(1));

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels,
        "audio playback initialized"
    );

    let err_shared = Arc::clone(&shared);
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut out = shared.lock().unwrap_or_else(PoisonError::into_inner);
                for frame in data.chunks_mut(channels) {
                    let sample = out.samples.pop_front().unwrap_or(0.0);
                    frame.fill(sample);
                }
            },
            move |err| {
                tracing::error!(error = %err, "audio playback error");
                err_shared
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .failure = Some(err.to_string());
            },
            None,
        )
        .map_err(|e| Error::Device(e.to_string()))?;

    stream.play().map_err(|e| Error::Device(e.to_string()))?;

    Ok(stream)
}

impl AudioSink for CpalPlayback {
    fn write(&mut self, pcm: &[u8]) -> Result<()> {
        self.wait_until(self.high_water)?;

        let samples = pcm16_to_f32(pcm);
        self.shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .samples
            .extend(samples);

        Ok(())
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            let _ = thread.join();
        }
    }
}

/// Opens the host's default microphone and speaker through cpal
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalDevices;

impl AudioDevices for CpalDevices {
    fn open_capture(
        &self,
        sample_rate: u32,
        frame_bytes: usize,
    ) -> Result<Box<dyn CaptureSource>> {
        Ok(Box::new(CpalCapture::open(sample_rate, frame_bytes)?))
    }

    fn open_sink(&self, sample_rate: u32) -> Result<Box<dyn AudioSink>> {
        Ok(Box::new(CpalPlayback::open(sample_rate)?))
    }
}
