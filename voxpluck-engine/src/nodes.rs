//! Building blocks (nodes) for the plucked-string voice.
//!
//! These are zero-allocation, per-sample components designed for realtime use.
//! Buffers are sized at construction (or on a sample-rate change); processing
//! never allocates, locks or logs.
//!
//! Contents:
//! - `NoiseBurst` : white noise source for the excitation
//! - `StringLoop` : Karplus-Strong loop (fractional delay + damping + feedback)
//! - `Node`       : the closed set of stages a voice graph is built from
//!
//! Notes:
//! - Frequencies are **Hz**, times are **seconds**.
//! - Delay length is always `1/frequency` seconds, clamped by the delay line to
//!   `[MIN_DELAY_SAMPLES, capacity - 2]` samples; capacity covers a 20 Hz fundamental.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use voxpluck_core::delay::FractionalDelay;
use voxpluck_core::envelopes::{Param, PluckEnvelope};
use voxpluck_core::filters::{DcBlock, OnePoleLP, SvfTpt};

use crate::graph::Stage;

/// Lowest fundamental the string loop can hold.
pub const MIN_STRING_HZ: f32 = 20.0;

/// Uniform white noise in `[-1, 1)`. Ignores its input.
#[derive(Clone, Debug)]
pub struct NoiseBurst {
    rng: SmallRng,
}

impl NoiseBurst {
    pub fn new(seed: u64) -> Self {
        Self { rng: SmallRng::seed_from_u64(seed) }
    }

    #[inline]
    pub fn next(&mut self) -> f32 {
        self.rng.gen_range(-1.0f32..1.0)
    }
}

/// Karplus-Strong string: `y[n] = x[n] + g * LP(y[n - N])`, `N = delay * sr`.
///
/// Delay length and feedback are [`Param`]s so both can ramp; the damping
/// low-pass sets brightness. A DC blocker on the output keeps the loop centred.
#[derive(Clone, Debug)]
pub struct StringLoop {
    line: FractionalDelay,
    delay: Param,
    feedback: Param,
    damping: OnePoleLP,
    dc: DcBlock,
    sr: f32,
}

impl StringLoop {
    pub fn new(frequency: f32, feedback: f32, damping_hz: f32, sr: f32) -> Self {
        let sr = sr.max(1.0);
        let frequency = if frequency > 0.0 { frequency } else { 220.0 };
        Self {
            line: FractionalDelay::new(capacity_for(sr)),
            delay: Param::new(1.0 / frequency, sr),
            feedback: Param::new(feedback, sr),
            damping: OnePoleLP::new(damping_hz, sr),
            dc: DcBlock::new(10.0, sr),
            sr,
        }
    }

    /// Delay length parameter, in seconds (`1/frequency`).
    #[inline] pub fn delay(&mut self) -> &mut Param { &mut self.delay }

    /// Loop feedback gain (resonance).
    #[inline] pub fn feedback(&mut self) -> &mut Param { &mut self.feedback }

    #[inline] pub fn set_damping_hz(&mut self, hz: f32) { self.damping.set_cutoff_hz(hz); }
    #[inline] pub fn damping_hz(&self) -> f32 { self.damping.cutoff_hz() }
    #[inline] pub fn delay_secs(&self) -> f32 { self.delay.value() }
    #[inline] pub fn feedback_gain(&self) -> f32 { self.feedback.value() }

    /// Longest delay the loop can produce, in seconds.
    #[inline]
    pub fn max_delay_secs(&self) -> f32 {
        self.line.max_delay_samples() / self.sr
    }

    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        let delayed = self.line.read(self.delay.next() * self.sr);
        let y = x + self.feedback.next() * self.damping.process(delayed);
        self.line.write(y);
        self.dc.process(y)
    }
}

#[inline]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn capacity_for(sr: f32) -> usize {
    (sr / MIN_STRING_HZ).ceil() as usize + 4
}

impl Stage for StringLoop {
    fn reset(&mut self, sr: f32) {
        let sr = sr.max(1.0);
        if (sr - self.sr).abs() > f32::EPSILON {
            self.line = FractionalDelay::new(capacity_for(sr));
        } else {
            self.line.clear();
        }
        self.sr = sr;
        self.delay.set_sample_rate(sr);
        self.feedback.set_sample_rate(sr);
        self.damping.set_sample_rate(sr);
        self.damping.clear();
        self.dc.set_sample_rate(sr);
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        StringLoop::process(self, input)
    }
}

/// The stages a voice graph is built from.
#[derive(Clone, Debug)]
pub enum Node {
    /// Excitation source.
    Noise(NoiseBurst),
    /// One-pole low-pass (excitation dulling).
    Lowpass(OnePoleLP),
    /// Gain driven by a pluck envelope.
    Gate(PluckEnvelope),
    String(StringLoop),
    /// Fixed body low-pass.
    Body(SvfTpt),
    /// Gain driven by an automatable parameter.
    Gain(Param),
}

impl Stage for Node {
    fn reset(&mut self, sr: f32) {
        match self {
            Node::Noise(_) => {}
            Node::Lowpass(lp) => {
                lp.set_sample_rate(sr);
                lp.clear();
            }
            Node::Gate(env) => env.set_sample_rate(sr),
            Node::String(s) => Stage::reset(s, sr),
            Node::Body(svf) => svf.set_sample_rate(sr),
            Node::Gain(p) => p.set_sample_rate(sr),
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        match self {
            Node::Noise(n) => n.next(),
            Node::Lowpass(lp) => lp.process(input),
            Node::Gate(env) => input * env.next(),
            Node::String(s) => s.process(input),
            Node::Body(svf) => svf.process_lp(input),
            Node::Gain(p) => input * p.next(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noise_is_bounded_and_seeded() {
        let mut a = NoiseBurst::new(1);
        let mut b = NoiseBurst::new(1);
        for _ in 0..1000 {
            let x = a.next();
            assert!((-1.0..1.0).contains(&x));
            assert_eq!(x, b.next());
        }
    }

    #[test]
    fn string_rings_at_its_period() {
        let sr = 48_000.0;
        let mut s = StringLoop::new(480.0, 0.99, 20_000.0, sr);
        // one impulse, then watch for the echo 100 samples later
        let first = s.process(1.0);
        assert!(first > 0.9);
        let mut echo_at = None;
        for n in 1..150 {
            let y = s.process(0.0);
            if y > 0.5 && echo_at.is_none() {
                echo_at = Some(n);
            }
        }
        assert_eq!(echo_at, Some(100));
    }

    #[test]
    fn zero_feedback_kills_the_loop() {
        let mut s = StringLoop::new(440.0, 0.0, 8000.0, 48_000.0);
        s.process(1.0);
        let tail = (0..500).map(|_| s.process(0.0).abs()).fold(0.0f32, f32::max);
        assert!(tail < 0.01, "tail={tail}");
    }

    #[test]
    fn capacity_covers_twenty_hertz() {
        let s = StringLoop::new(440.0, 0.9, 5000.0, 44_100.0);
        assert!(s.max_delay_secs() >= 1.0 / MIN_STRING_HZ);
    }

    #[test]
    fn gate_node_follows_envelope() {
        let mut gate = Node::Gate(PluckEnvelope::new(0.0, 50.0, 48_000.0));
        assert_eq!(gate.process(1.0), 0.0);
        if let Node::Gate(env) = &mut gate {
            env.trigger(0.5);
        }
        let y = gate.process(1.0);
        assert!(y > 0.4 && y <= 0.5, "y={y}");
    }
}
