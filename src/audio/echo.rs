//! Frequency-domain echo suppression
//!
//! A heuristic filter for speakerphone use. Each analysis window is run
//! through a naive DFT and, when most of its energy sits in the band where
//! the agent's synthesized voice bleeds back into the microphone, the window
//! is attenuated before it is sent upstream. It reduces bleed-through but
//! does not eliminate it.

use std::f32::consts::PI;

use super::{AudioFrame, f32_to_pcm16, pcm16_to_f32, rms};

/// Tuning for [`EchoSuppressor`]
#[derive(Debug, Clone, Copy)]
pub struct EchoSuppressorConfig {
    /// Samples per analysis window
    pub window: usize,
    /// Lower edge of the suppressed band in Hz
    pub band_low_hz: f32,
    /// Upper edge of the suppressed band in Hz
    pub band_high_hz: f32,
    /// Band-to-total energy ratio above which a window is attenuated
    pub ratio_threshold: f32,
    /// Gain applied to attenuated windows
    pub attenuation: f32,
    /// Windows quieter than this RMS level pass untouched
    pub noise_floor: f32,
}

impl Default for EchoSuppressorConfig {
    fn default() -> Self {
        Self {
            window: 256,
            band_low_hz: 1000.0,
            band_high_hz: 2500.0,
            ratio_threshold: 0.7,
            attenuation: 0.2,
            noise_floor: 0.01,
        }
    }
}

/// Pure `AudioFrame -> AudioFrame` echo filter
#[derive(Debug, Clone)]
pub struct EchoSuppressor {
    config: EchoSuppressorConfig,
    sample_rate: u32,
}

impl EchoSuppressor {
    /// Create a suppressor for audio at `sample_rate`
    #[must_use]
    pub fn new(sample_rate: u32, config: EchoSuppressorConfig) -> Self {
        Self {
            config: EchoSuppressorConfig {
                window: config.window.max(2),
                ..config
            },
            sample_rate,
        }
    }

    /// Filter one frame
    ///
    /// Frames with no flagged window are returned unchanged.
    #[must_use]
    pub fn apply(&self, frame: AudioFrame) -> AudioFrame {
        let mut samples = pcm16_to_f32(&frame.data);
        let mut attenuated = false;

        for window in samples.chunks_mut(self.config.window) {
            if self
                .band_ratio(window)
                .is_some_and(|ratio| ratio > self.config.ratio_threshold)
            {
                for s in window.iter_mut() {
                    *s *= self.config.attenuation;
                }
                attenuated = true;
            }
        }

        if !attenuated {
            return frame;
        }

        tracing::trace!(seq = frame.seq, "attenuated echo in frame");
        AudioFrame::new(frame.seq, f32_to_pcm16(&samples))
    }

    /// Fraction of a window's energy inside the suppressed band
    ///
    /// Returns `None` for windows below the noise floor.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn band_ratio(&self, window: &[f32]) -> Option<f32> {
        let n = window.len();
        if n < 2 || rms(window) < self.config.noise_floor {
            return None;
        }

        let bin_hz = self.sample_rate as f32 / n as f32;
        let mut band = 0.0f32;
        let mut total = 0.0f32;

        // Skip DC; bins above n/2 mirror the lower half
        for k in 1..=n / 2 {
            let (mut re, mut im) = (0.0f32, 0.0f32);
            for (i, &x) in window.iter().enumerate() {
                let phase = 2.0 * PI * (k * i) as f32 / n as f32;
                re += x * phase.cos();
                im -= x * phase.sin();
            }
            let power = re.mul_add(re, im * im);
            total += power;

            let freq = k as f32 * bin_hz;
            if freq >= self.config.band_low_hz && freq <= self.config.band_high_hz {
                band += power;
            }
        }

        (total > 0.0).then(|| band / total)
    }
}
