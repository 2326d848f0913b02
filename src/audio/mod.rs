//! Audio frames and device abstractions
//!
//! Audio travels as raw PCM16LE mono in both directions. Devices sit behind
//! [`CaptureSource`], [`AudioSink`] and [`AudioDevices`] so the pipelines can
//! run against the real hardware or against test doubles.

mod capture;
mod echo;
mod playback;

use bytes::Bytes;

pub use capture::{CpalCapture, samples_to_wav};
pub use echo::{EchoSuppressor, EchoSuppressorConfig};
pub use playback::{CpalDevices, CpalPlayback};

use crate::Result;

/// An immutable chunk of PCM16LE samples and its ordinal position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Position in the stream it was captured from or received on
    pub seq: u64,
    /// Raw PCM16LE bytes
    pub data: Bytes,
}

impl AudioFrame {
    /// Create a frame at position `seq`
    #[must_use]
    pub fn new(seq: u64, data: impl Into<Bytes>) -> Self {
        Self {
            seq,
            data: data.into(),
        }
    }

    /// Number of bytes in the frame
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the frame carries no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Blocking source of fixed-size capture frames
pub trait CaptureSource: Send {
    /// Read the next frame
    ///
    /// Returns `Ok(None)` when no frame arrived within the source's poll
    /// interval, letting the caller check for cancellation.
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if the device stopped delivering audio
    fn read_frame(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Blocking sink that renders PCM16LE frames
pub trait AudioSink: Send {
    /// Render one frame, blocking until the device has accepted it
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if the output device failed
    fn write(&mut self, pcm: &[u8]) -> Result<()>;
}

/// Factory for capture sources and playback sinks
pub trait AudioDevices: Send + Sync {
    /// Open the microphone at `sample_rate`, delivering frames of `frame_bytes`
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if no suitable input device is available
    fn open_capture(&self, sample_rate: u32, frame_bytes: usize)
    -> Result<Box<dyn CaptureSource>>;

    /// Open the speaker at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if no suitable output device is available
    fn open_sink(&self, sample_rate: u32) -> Result<Box<dyn AudioSink>>;
}

/// Decode PCM16LE bytes into normalized f32 samples
///
/// A trailing odd byte is ignored.
#[must_use]
pub fn pcm16_to_f32(pcm: &[u8]) -> Vec<f32> {
    pcm.chunks_exact(2)
        .map(|c| f32::from(i16::from_le_bytes([c[0], c[1]])) / 32768.0)
        .collect()
}

/// Encode normalized f32 samples as PCM16LE bytes
#[must_use]
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| {
            #[allow(clippy::cast_possible_truncation)]
            let v = (s * 32767.0).clamp(-32768.0, 32767.0) as i16;
            v.to_le_bytes()
        })
        .collect()
}

/// Root-mean-square level of normalized samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm16_conversion_keeps_extremes() {
        let pcm = [i16::MIN, 0, i16::MAX]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect::<Vec<u8>>();
        let samples = pcm16_to_f32(&pcm);

        assert_eq!(samples.len(), 3);
        assert!((samples[0] + 1.0).abs() < f32::EPSILON);
        assert!(samples[1].abs() < f32::EPSILON);
        assert!(samples[2] > 0.999);
    }

    #[test]
    fn odd_trailing_byte_is_ignored() {
        assert_eq!(pcm16_to_f32(&[0, 0, 7]).len(), 1);
    }

    #[test]
    fn f32_to_pcm16_clamps() {
        let pcm = f32_to_pcm16(&[2.0, -2.0]);
        assert_eq!(i16::from_le_bytes([pcm[0], pcm[1]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([pcm[2], pcm[3]]), i16::MIN);
    }

    #[test]
    fn rms_of_silence_is_zero() {
        assert!(rms(&[]).abs() < f32::EPSILON);
        assert!(rms(&[0.0; 64]).abs() < f32::EPSILON);
    }

    #[test]
    fn rms_of_constant_signal() {
        assert!((rms(&[0.5; 128]) - 0.5).abs() < 1e-6);
    }
}
