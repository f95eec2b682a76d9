//! Monophonic pitch detection (YIN).
//!
//! The detector runs on the render path in real-time capture mode, so all
//! scratch memory is allocated in [`PitchDetector::new`] and `detect` performs
//! no heap work, no locking and no logging.
//!
//! Steps per block:
//! 1. gate on RMS (silence) and on non-finite input,
//! 2. squared difference function `d(τ)` over the lag range,
//! 3. cumulative-mean-normalised difference `d'(τ)`,
//! 4. first dip under the threshold, walked down to its local minimum
//!    (global minimum when no dip exists),
//! 5. parabolic interpolation around the chosen lag.
//!
//! Confidence is `1 - d'(τ*)`, clamped to `[0, 1]`. `d'` is normalised by the
//! running energy of the difference function, so the score measures how
//! periodic the block is relative to its own energy.

use serde::{Deserialize, Serialize};
use voxpluck_core::dsp::rms;

/// Result of analysing one audio block.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PitchFrame {
    /// Fundamental frequency in Hz, `None` when the block is silent or aperiodic.
    pub frequency: Option<f32>,
    /// Periodicity strength in `[0, 1]`; 0 whenever `frequency` is `None`.
    pub confidence: f32,
    /// Linear RMS amplitude of the analysed samples.
    pub volume: f32,
    /// Capture-clock time of the block start, in seconds.
    pub capture_time: f64,
}

impl PitchFrame {
    #[inline]
    pub const fn unvoiced(volume: f32, capture_time: f64) -> Self {
        Self { frequency: None, confidence: 0.0, volume, capture_time }
    }

    #[inline]
    pub fn is_voiced(&self) -> bool {
        self.frequency.is_some()
    }
}

/// Detector tuning. The defaults cover the sung/hummed range.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Lowest reported fundamental (Hz).
    pub min_frequency: f32,
    /// Highest reported fundamental (Hz).
    pub max_frequency: f32,
    /// Absolute threshold on `d'(τ)` for the first-dip search.
    pub threshold: f32,
    /// Blocks with RMS below this are silent.
    pub silence_rms: f32,
    /// Analysis window in samples. Longer blocks are analysed over their leading window.
    pub window: usize,
}

/// Upper bound on the analysis window, in samples.
pub const MAX_WINDOW: usize = 16_384;

impl DetectorConfig {
    /// Widen `window` so two periods of `min_frequency` fit at `sample_rate`.
    ///
    /// The result is a power of two and never smaller than the configured
    /// window. Capped at [`MAX_WINDOW`].
    #[must_use]
    pub fn for_sample_rate(self, sample_rate: u32) -> Self {
        if !(self.min_frequency.is_finite() && self.min_frequency > 0.0) {
            return self;
        }
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let needed = (2.0 * sample_rate as f32 / self.min_frequency).ceil() as usize + 2;
        let window = self.window.max(needed.next_power_of_two()).min(MAX_WINDOW);
        Self { window, ..self }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_frequency: 50.0,
            max_frequency: 2000.0,
            threshold: 0.15,
            silence_rms: 0.01,
            window: 2048,
        }
    }
}

/// YIN pitch detector with preallocated scratch buffers.
#[derive(Clone, Debug)]
pub struct PitchDetector {
    config: DetectorConfig,
    diff: Vec<f32>,
    cmnd: Vec<f32>,
}

impl PitchDetector {
    pub fn new(config: DetectorConfig) -> Self {
        let window = config.window.max(64);
        let config = DetectorConfig { window, ..config };
        let lags = window / 2 + 1;
        Self { config, diff: vec![0.0; lags], cmnd: vec![1.0; lags] }
    }

    #[inline] pub fn config(&self) -> &DetectorConfig { &self.config }

    /// Estimate the fundamental of `samples`. Never fails; degenerate input
    /// yields an unvoiced frame. Identical blocks give identical frames.
    pub fn detect(&mut self, samples: &[f32], sample_rate: f32, capture_time: f64) -> PitchFrame {
        let block = &samples[..samples.len().min(self.config.window)];

        let volume = rms(block);
        if !volume.is_finite() {
            return PitchFrame::unvoiced(0.0, capture_time);
        }
        if volume < self.config.silence_rms || !(sample_rate.is_finite() && sample_rate > 0.0) {
            return PitchFrame::unvoiced(volume, capture_time);
        }

        let half = block.len() / 2;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let min_lag = ((sample_rate / self.config.max_frequency).ceil() as usize).max(2);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let max_lag = ((sample_rate / self.config.min_frequency).floor() as usize).min(half.saturating_sub(1));
        if min_lag >= max_lag {
            return PitchFrame::unvoiced(volume, capture_time);
        }

        self.difference(block, half, max_lag);
        self.normalise(max_lag);

        let Some((tau, value)) = self.pick_lag(min_lag, max_lag) else {
            return PitchFrame::unvoiced(volume, capture_time);
        };

        let confidence = (1.0 - value).clamp(0.0, 1.0);
        if confidence <= 0.0 {
            return PitchFrame::unvoiced(volume, capture_time);
        }

        let refined = self.interpolate(tau, max_lag);
        let frequency = sample_rate / refined;
        if !frequency.is_finite()
            || frequency < self.config.min_frequency
            || frequency > self.config.max_frequency
        {
            return PitchFrame::unvoiced(volume, capture_time);
        }

        PitchFrame { frequency: Some(frequency), confidence, volume, capture_time }
    }

    /// `d(τ) = Σ_{j<W} (x[j] - x[j+τ])²` for `τ` in `1..=max_lag`.
    fn difference(&mut self, x: &[f32], width: usize, max_lag: usize) {
        self.diff[0] = 0.0;
        for tau in 1..=max_lag {
            let mut acc = 0.0f32;
            for (a, b) in x[..width].iter().zip(&x[tau..tau + width]) {
                let d = a - b;
                acc += d * d;
            }
            self.diff[tau] = acc;
        }
    }

    /// `d'(0) = 1`, `d'(τ) = d(τ) · τ / Σ_{k≤τ} d(k)`.
    fn normalise(&mut self, max_lag: usize) {
        self.cmnd[0] = 1.0;
        let mut running = 0.0f32;
        for tau in 1..=max_lag {
            running += self.diff[tau];
            #[allow(clippy::cast_precision_loss)]
            let scaled = self.diff[tau] * tau as f32;
            self.cmnd[tau] = if running > 0.0 { scaled / running } else { 1.0 };
        }
    }

    fn pick_lag(&self, min_lag: usize, max_lag: usize) -> Option<(usize, f32)> {
        let cmnd = &self.cmnd;
        let mut tau = min_lag;
        while tau <= max_lag {
            if cmnd[tau] < self.config.threshold {
                while tau < max_lag && cmnd[tau + 1] < cmnd[tau] {
                    tau += 1;
                }
                return Some((tau, cmnd[tau]));
            }
            tau += 1;
        }

        // No dip under the threshold: settle for the global minimum, but only
        // an interior one. A minimum on the range edge means the period lies
        // outside the supported range.
        let mut best = min_lag;
        for t in min_lag..=max_lag {
            if cmnd[t] < cmnd[best] {
                best = t;
            }
        }
        if best == min_lag || best == max_lag || cmnd[best] >= 1.0 {
            return None;
        }
        Some((best, cmnd[best]))
    }

    #[allow(clippy::cast_precision_loss)]
    fn interpolate(&self, tau: usize, max_lag: usize) -> f32 {
        if tau == 0 || tau >= max_lag {
            return tau as f32;
        }
        let (a, b, c) = (self.cmnd[tau - 1], self.cmnd[tau], self.cmnd[tau + 1]);
        let denom = a - 2.0 * b + c;
        if denom.abs() < 1e-12 {
            return tau as f32;
        }
        let shift = (0.5 * (a - c) / denom).clamp(-1.0, 1.0);
        tau as f32 + shift
    }
}

impl Default for PitchDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxpluck_core::dsp::{sine, TAU};

    fn tone(freq: f32, sr: f32, len: usize, amp: f32) -> Vec<f32> {
        (0..len).map(|i| amp * sine(TAU * freq * i as f32 / sr)).collect()
    }

    fn noise(len: usize, seed: u32) -> Vec<f32> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 8) as f32 / (1u32 << 24) as f32 - 0.5
            })
            .collect()
    }

    #[test]
    fn detects_a3_sine() {
        let mut det = PitchDetector::default();
        let frame = det.detect(&tone(220.0, 44_100.0, 2048, 0.5), 44_100.0, 1.5);
        let f = frame.frequency.expect("voiced");
        assert!((f - 220.0).abs() < 1.0, "f={f}");
        assert!(frame.confidence > 0.9, "confidence={}", frame.confidence);
        assert_eq!(frame.capture_time, 1.5);
        assert!((frame.volume - 0.5 * core::f32::consts::FRAC_1_SQRT_2).abs() < 0.01);
    }

    #[test]
    fn detects_high_and_low_voices() {
        let mut det = PitchDetector::default();
        for freq in [82.4, 146.8, 440.0, 987.8] {
            let frame = det.detect(&tone(freq, 48_000.0, 2048, 0.3), 48_000.0, 0.0);
            let f = frame.frequency.unwrap_or(0.0);
            assert!((f - freq).abs() / freq < 0.01, "expected {freq}, got {f}");
        }
    }

    #[test]
    fn window_grows_with_sample_rate() {
        let base = DetectorConfig::default();
        assert_eq!(base.for_sample_rate(44_100).window, 2048);
        assert_eq!(base.for_sample_rate(48_000).window, 2048);
        assert_eq!(base.for_sample_rate(96_000).window, 4096);
        assert_eq!(base.for_sample_rate(192_000).window, 8192);
        let wide = DetectorConfig { window: 8192, ..base };
        assert_eq!(wide.for_sample_rate(44_100).window, 8192);
    }

    #[test]
    fn low_voices_at_96k() {
        let sr = 96_000.0;
        let mut det = PitchDetector::new(DetectorConfig::default().for_sample_rate(96_000));
        for freq in [55.0, 70.0, 98.0] {
            let frame = det.detect(&tone(freq, sr, det.config().window, 0.5), sr, 0.0);
            let f = frame.frequency.unwrap_or(0.0);
            assert!((f - freq).abs() / freq < 0.01, "expected {freq}, got {f}");
        }
    }

    #[test]
    fn silence_is_unvoiced() {
        let mut det = PitchDetector::default();
        let frame = det.detect(&[0.0; 2048], 44_100.0, 0.0);
        assert_eq!(frame.frequency, None);
        assert_eq!(frame.confidence, 0.0);

        let quiet = det.detect(&tone(220.0, 44_100.0, 2048, 0.001), 44_100.0, 0.0);
        assert_eq!(quiet.frequency, None);
    }

    #[test]
    fn non_finite_input_is_unvoiced() {
        let mut det = PitchDetector::default();
        let mut block = tone(220.0, 44_100.0, 2048, 0.5);
        block[100] = f32::NAN;
        let frame = det.detect(&block, 44_100.0, 0.0);
        assert_eq!(frame, PitchFrame::unvoiced(0.0, 0.0));
    }

    #[test]
    fn below_vocal_range_is_unvoiced() {
        let mut det = PitchDetector::default();
        let frame = det.detect(&tone(30.0, 44_100.0, 2048, 0.5), 44_100.0, 0.0);
        assert_eq!(frame.frequency, None, "{frame:?}");
        assert_eq!(frame.confidence, 0.0);
    }

    #[test]
    fn noise_has_low_confidence() {
        let mut det = PitchDetector::default();
        let frame = det.detect(&noise(2048, 7), 44_100.0, 0.0);
        assert!(frame.confidence < 0.5, "noise confidence {}", frame.confidence);
    }

    #[test]
    fn deterministic_and_uses_leading_window() {
        let mut det = PitchDetector::default();
        let mut long = tone(330.0, 44_100.0, 2048, 0.4);
        long.extend(noise(2048, 3));
        let a = det.detect(&long, 44_100.0, 0.0);
        let b = det.detect(&long, 44_100.0, 0.0);
        let c = det.detect(&long[..2048], 44_100.0, 0.0);
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn short_and_empty_blocks_do_not_panic() {
        let mut det = PitchDetector::default();
        assert_eq!(det.detect(&[], 44_100.0, 0.0).frequency, None);
        assert_eq!(det.detect(&[0.5; 16], 44_100.0, 0.0).frequency, None);
        assert_eq!(det.detect(&tone(220.0, 44_100.0, 2048, 0.5), 0.0, 0.0).frequency, None);
    }
}
