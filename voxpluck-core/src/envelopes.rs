//! Automatable parameters and the pluck excitation envelope.
//!
//! - `Param`         : a scalar with explicit `set_immediate` / `ramp_to` operations
//! - `PluckEnvelope` : short linear attack to a peak, then exponential decay to silence
//!
//! Both are `no_std` friendly, allocation free and advance one sample per `next()`.

use crate::dsp::{clamp, floor, one_pole_coeff_ms, seconds_to_samples};

#[inline]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn sample_count(secs: f32, sr: f32) -> u32 {
    let n = floor(seconds_to_samples(secs, sr) + 0.5);
    if n >= u32::MAX as f32 { u32::MAX } else { n as u32 }
}

// ----------------------------------- Param ----------------------------------------

#[derive(Copy, Clone, Debug, PartialEq)]
enum Segment {
    Hold,
    Linear { step: f32, remaining: u32 },
}

/// A parameter value that can jump or ramp linearly.
///
/// Every ramp starts from the *current* value, so a ramp issued mid-ramp
/// continues without a discontinuity.
#[derive(Copy, Clone, Debug)]
pub struct Param {
    value: f32,
    target: f32,
    segment: Segment,
    sr: f32,
}

impl Param {
    #[inline]
    pub fn new(value: f32, sr: f32) -> Self {
        Self { value, target: value, segment: Segment::Hold, sr: sr.max(1.0) }
    }

    /// Changes the time base of future ramps. A ramp in flight keeps its step size.
    #[inline]
    pub fn set_sample_rate(&mut self, sr: f32) { self.sr = sr.max(1.0); }

    /// Jump to `value` now, cancelling any ramp in flight.
    #[inline]
    pub fn set_immediate(&mut self, value: f32) {
        self.value = value;
        self.target = value;
        self.segment = Segment::Hold;
    }

    /// Linear ramp from the current value to `value` over `secs` seconds.
    /// A zero (or invalid) duration behaves like [`Param::set_immediate`].
    #[inline]
    pub fn ramp_to(&mut self, value: f32, secs: f32) {
        let n = sample_count(secs, self.sr);
        if n == 0 {
            self.set_immediate(value);
            return;
        }
        #[allow(clippy::cast_precision_loss)]
        let step = (value - self.value) / n as f32;
        self.target = value;
        self.segment = Segment::Linear { step, remaining: n };
    }

    /// Advance by one sample and return the new value.
    #[inline]
    pub fn next(&mut self) -> f32 {
        match self.segment {
            Segment::Hold => {}
            Segment::Linear { step, remaining } => {
                if remaining <= 1 {
                    self.value = self.target;
                    self.segment = Segment::Hold;
                } else {
                    // Anchored on the target so rounding never accumulates.
                    #[allow(clippy::cast_precision_loss)]
                    let left = (remaining - 1) as f32;
                    self.value = self.target - step * left;
                    self.segment = Segment::Linear { step, remaining: remaining - 1 };
                }
            }
        }
        self.value
    }

    #[inline] pub fn value(&self) -> f32 { self.value }
}

// ------------------------------- Pluck envelope -----------------------------------

#[derive(Copy, Clone, Debug, PartialEq)]
enum PluckStage {
    Idle,
    Attack { step: f32, remaining: u32 },
    Decay,
}

/// Excitation gate for one pluck: linear attack to `velocity`, then an
/// exponential decay that is ~0 (e^-5 of the peak) after `decay_ms`.
#[derive(Copy, Clone, Debug)]
pub struct PluckEnvelope {
    attack_ms: f32,
    decay_ms: f32,
    sr: f32,
    env: f32,
    peak: f32,
    stage: PluckStage,
    a_decay: f32,
}

impl PluckEnvelope {
    #[inline]
    pub fn new(attack_ms: f32, decay_ms: f32, sr: f32) -> Self {
        let mut s = Self {
            attack_ms: attack_ms.max(0.0),
            decay_ms: decay_ms.max(0.0),
            sr: sr.max(1.0),
            env: 0.0,
            peak: 0.0,
            stage: PluckStage::Idle,
            a_decay: 0.0,
        };
        s.recalc();
        s
    }

    #[inline]
    pub fn set_sample_rate(&mut self, sr: f32) {
        self.sr = sr.max(1.0);
        self.recalc();
    }

    #[inline]
    fn recalc(&mut self) {
        self.a_decay = one_pole_coeff_ms(self.decay_ms / 5.0, self.sr);
    }

    /// Start a pluck from the current level towards `velocity` (clamped to [0,1]).
    #[inline]
    pub fn trigger(&mut self, velocity: f32) {
        let peak = clamp(velocity, 0.0, 1.0);
        self.peak = peak;
        let n = sample_count(self.attack_ms * 0.001, self.sr);
        if n == 0 {
            self.env = peak;
            self.stage = PluckStage::Decay;
            return;
        }
        #[allow(clippy::cast_precision_loss)]
        let step = (peak - self.env) / n as f32;
        self.stage = PluckStage::Attack { step, remaining: n };
    }

    #[inline]
    pub fn next(&mut self) -> f32 {
        match self.stage {
            PluckStage::Idle => {}
            PluckStage::Attack { step, remaining } => {
                #[allow(clippy::cast_precision_loss)]
                let left = (remaining - 1) as f32;
                self.env = self.peak - step * left;
                self.stage = if remaining <= 1 {
                    PluckStage::Decay
                } else {
                    PluckStage::Attack { step, remaining: remaining - 1 }
                };
            }
            PluckStage::Decay => {
                self.env *= self.a_decay;
                if self.env <= 1e-5 {
                    self.env = 0.0;
                    self.stage = PluckStage::Idle;
                }
            }
        }
        self.env
    }

    #[inline] pub fn value(&self) -> f32 { self.env }
}

// ------------------------------------ Tests --------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_reaches_target_in_time() {
        let sr = 48000.0;
        let mut p = Param::new(1.0, sr);
        p.ramp_to(0.0, 0.1);
        for _ in 0..4799 { p.next(); }
        assert!(p.value() > 0.0 && p.value() < 0.01, "v={}", p.value());
        p.next();
        assert_eq!(p.value(), 0.0);
        assert_eq!(p.next(), 0.0);
    }

    #[test]
    fn ramp_is_monotonic_and_bounded_per_step() {
        let sr = 1000.0;
        let mut p = Param::new(0.0, sr);
        p.ramp_to(10.0, 0.01);
        let mut prev = p.value();
        for _ in 0..20 {
            let v = p.next();
            assert!(v >= prev && v - prev <= 1.0 + 1e-5, "prev={prev} v={v}");
            prev = v;
        }
        assert_eq!(prev, 10.0);
    }

    #[test]
    fn set_immediate_cancels_ramp() {
        let mut p = Param::new(0.0, 48000.0);
        p.ramp_to(1.0, 1.0);
        p.next();
        p.set_immediate(0.5);
        assert_eq!(p.next(), 0.5);
        assert_eq!(p.next(), 0.5);
    }

    #[test]
    fn zero_duration_ramp_jumps() {
        let mut p = Param::new(0.0, 48000.0);
        p.ramp_to(0.7, 0.0);
        assert_eq!(p.value(), 0.7);
    }

    #[test]
    fn pluck_peaks_at_velocity_then_dies() {
        let sr = 48000.0;
        let mut e = PluckEnvelope::new(5.0, 50.0, sr);
        e.trigger(0.8);
        let mut peak: f32 = 0.0;
        for _ in 0..240 { peak = peak.max(e.next()); }
        assert!((peak - 0.8).abs() < 1e-3, "peak={peak}");
        for _ in 0..2400 { e.next(); }
        assert!(e.value() < 0.01, "tail={}", e.value());
        for _ in 0..48_000 { e.next(); }
        assert_eq!(e.value(), 0.0);
    }

    #[test]
    fn pluck_retrigger_starts_from_current_level() {
        let mut e = PluckEnvelope::new(5.0, 50.0, 48000.0);
        e.trigger(1.0);
        for _ in 0..300 { e.next(); }
        let before = e.value();
        e.trigger(1.0);
        let after = e.next();
        assert!((after - before).abs() < 0.01, "jump {before} -> {after}");
    }
}
