//! Fractional delay line with linear interpolation.
//!
//! The buffer is allocated once at construction; `read`/`write` never allocate.
//! Requested delays are clamped to `[MIN_DELAY_SAMPLES, capacity - INTERP_MARGIN]`.

use alloc::vec;
use alloc::vec::Vec;

use crate::dsp::floor;

/// Shortest delay the line will produce, in samples.
pub const MIN_DELAY_SAMPLES: f32 = 2.0;

/// Slack kept at the end of the buffer for the interpolation neighbour.
const INTERP_MARGIN: usize = 2;

#[derive(Clone, Debug)]
pub struct FractionalDelay {
    buffer: Vec<f32>,
    write_pos: usize,
    max_delay: f32,
}

impl FractionalDelay {
    /// Create a line able to hold `capacity` samples of history.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let len = capacity.max(MIN_DELAY_SAMPLES as usize + INTERP_MARGIN + 1);
        #[allow(clippy::cast_precision_loss)]
        let max_delay = (len - INTERP_MARGIN) as f32;
        Self { buffer: vec![0.0; len], write_pos: 0, max_delay }
    }

    #[inline] pub fn capacity(&self) -> usize { self.buffer.len() }

    /// Longest delay this line can produce, in samples.
    #[inline] pub fn max_delay_samples(&self) -> f32 { self.max_delay }

    /// Clamp a requested delay into the supported range. NaN maps to the minimum.
    #[inline]
    pub fn clamp_delay(&self, delay_samples: f32) -> f32 {
        if delay_samples.is_nan() || delay_samples < MIN_DELAY_SAMPLES {
            MIN_DELAY_SAMPLES
        } else if delay_samples > self.max_delay {
            self.max_delay
        } else {
            delay_samples
        }
    }

    /// Read the sample written `delay_samples` writes ago (interpolated).
    #[inline]
    pub fn read(&self, delay_samples: f32) -> f32 {
        let d = self.clamp_delay(delay_samples);
        #[allow(clippy::cast_precision_loss)]
        let len = self.buffer.len() as f32;
        #[allow(clippy::cast_precision_loss)]
        let mut pos = self.write_pos as f32 - d;
        if pos < 0.0 {
            pos += len;
        }
        let base = floor(pos);
        let frac = pos - base;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let i0 = (base as usize) % self.buffer.len();
        let i1 = (i0 + 1) % self.buffer.len();
        let a = self.buffer[i0];
        let b = self.buffer[i1];
        a + frac * (b - a)
    }

    /// Push one sample into the line.
    #[inline]
    pub fn write(&mut self, x: f32) {
        self.buffer[self.write_pos] = x;
        self.write_pos += 1;
        if self.write_pos >= self.buffer.len() {
            self.write_pos = 0;
        }
    }

    /// Zero the history without reallocating.
    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_delay_returns_impulse_on_time() {
        let mut d = FractionalDelay::new(64);
        let mut seen_at = None;
        for n in 0..32 {
            let y = d.read(10.0);
            if y > 0.5 { seen_at = Some(n); }
            d.write(if n == 0 { 1.0 } else { 0.0 });
        }
        assert_eq!(seen_at, Some(10));
    }

    #[test]
    fn fractional_delay_interpolates() {
        let mut d = FractionalDelay::new(16);
        for n in 0..8 { d.write(n as f32); }
        // last write was 7; 2.5 writes ago lies between 5 and 6
        let y = d.read(2.5);
        assert!((y - 5.5).abs() < 1e-6, "y={y}");
    }

    #[test]
    fn delay_is_clamped_to_buffer() {
        let d = FractionalDelay::new(100);
        assert_eq!(d.clamp_delay(0.1), MIN_DELAY_SAMPLES);
        assert_eq!(d.clamp_delay(1.0e9), d.max_delay_samples());
        assert_eq!(d.clamp_delay(f32::NAN), MIN_DELAY_SAMPLES);
        assert_eq!(d.max_delay_samples(), 98.0);
    }
}
