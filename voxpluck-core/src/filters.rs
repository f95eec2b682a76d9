//! Filters used by the plucked-string voice.
//!
//! Contents
//! - `OnePoleLP` : “RC-style” one-pole low-pass (excitation dulling, loop damping)
//! - `DcBlock`   : one-pole high-pass at a very low cutoff, keeps the string loop centred
//! - `SvfTpt`    : State-Variable Filter via Topology Preserving Transform (body resonance)
//!
//! `OnePoleLP` uses the inexpensive `y += a * (x - y)` form with
//! `a = 1 - exp(-2π fc / sr)`. `SvfTpt` uses `g = tan(π fc / sr)`, `R = 1/(2Q)`
//! and stays stable under parameter modulation.

use crate::dsp::{kill_denormals, one_pole_coeff_hz, tpt_g};

/// One-pole low-pass `y += a * (x - y)`.
#[derive(Copy, Clone, Debug)]
pub struct OnePoleLP {
    a: f32,
    y: f32,
    sr: f32,
    fc: f32,
}

impl OnePoleLP {
    /// Create a low-pass with cutoff `cut_hz` and sample rate `sr`.
    #[inline]
    pub fn new(cut_hz: f32, sr: f32) -> Self {
        let mut s = Self {
            a: 0.0,
            y: 0.0,
            sr: sr.max(1.0),
            fc: cut_hz.max(0.0),
        };
        s.update_coeffs();
        s
    }

    #[inline]
    pub fn set_sample_rate(&mut self, sr: f32) {
        self.sr = sr.max(1.0);
        self.update_coeffs();
    }

    #[inline]
    pub fn set_cutoff_hz(&mut self, cut_hz: f32) {
        self.fc = cut_hz.max(0.0);
        self.update_coeffs();
    }

    #[inline] pub fn cutoff_hz(&self) -> f32 { self.fc }

    #[inline]
    fn update_coeffs(&mut self) {
        self.a = 1.0 - one_pole_coeff_hz(self.fc, self.sr);
    }

    /// Process one sample.
    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        self.y += self.a * (x - self.y);
        self.y = kill_denormals(self.y);
        self.y
    }

    /// Clear the filter memory without touching the coefficient.
    #[inline] pub fn clear(&mut self) { self.y = 0.0; }

    #[inline] pub fn value(&self) -> f32 { self.y }
}

/// DC blocker: `y[n] = x[n] - x[n-1] + b * y[n-1]`, `b = exp(-2π fc / sr)`.
#[derive(Copy, Clone, Debug)]
pub struct DcBlock {
    b: f32,
    x1: f32,
    y1: f32,
    sr: f32,
    fc: f32,
}

impl DcBlock {
    /// `cut_hz` default recommendation: 20 Hz or lower.
    #[inline]
    pub fn new(cut_hz: f32, sr: f32) -> Self {
        let mut s = Self { b: 0.0, x1: 0.0, y1: 0.0, sr: sr.max(1.0), fc: cut_hz.max(0.0) };
        s.b = one_pole_coeff_hz(s.fc, s.sr);
        s
    }

    #[inline]
    pub fn set_sample_rate(&mut self, sr: f32) {
        self.sr = sr.max(1.0);
        self.b = one_pole_coeff_hz(self.fc, self.sr);
    }

    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        let y = x - self.x1 + self.b * self.y1;
        self.x1 = x;
        self.y1 = kill_denormals(y);
        self.y1
    }

    #[inline] pub fn value(&self) -> f32 { self.y1 }
}

/// Topology-Preserving Transform SVF (Zavalishin).
///
/// - `g = tan(π fc / sr)`
/// - `R = 1 / (2Q)`
#[derive(Copy, Clone, Debug)]
pub struct SvfTpt {
    sr: f32,
    cut: f32,
    q: f32,
    g: f32,
    r: f32,
    ic1eq: f32,
    ic2eq: f32,
}

impl SvfTpt {
    #[inline]
    pub fn new(cut_hz: f32, q: f32, sr: f32) -> Self {
        let mut s = Self {
            sr: sr.max(1.0),
            cut: cut_hz.max(0.0),
            q: q.max(1e-4),
            g: 0.0,
            r: 0.0,
            ic1eq: 0.0,
            ic2eq: 0.0,
        };
        s.recalc();
        s
    }

    #[inline] pub fn set_sample_rate(&mut self, sr: f32) { self.sr = sr.max(1.0); self.recalc(); }
    #[inline] pub fn set_cutoff_hz(&mut self, cut_hz: f32) { self.cut = cut_hz.max(0.0); self.recalc(); }

    #[inline]
    fn recalc(&mut self) {
        self.g = tpt_g(self.cut, self.sr);
        self.r = 1.0 / (2.0 * self.q);
    }

    /// Process one sample, returning the `(lowpass, bandpass, highpass)` taps.
    #[inline]
    pub fn process_all(&mut self, x: f32) -> (f32, f32, f32) {
        // hp = (x - (2R + g) s1 - s2) / (1 + 2Rg + g^2); bp = g*hp + s1; lp = g*bp + s2
        let v0 = (x - (2.0 * self.r + self.g) * self.ic1eq - self.ic2eq)
            / (1.0 + 2.0 * self.r * self.g + self.g * self.g);
        let v1 = self.g * v0 + self.ic1eq;
        let v2 = self.g * v1 + self.ic2eq;

        self.ic1eq = kill_denormals(self.g * v0 + v1);
        self.ic2eq = kill_denormals(self.g * v1 + v2);

        (v2, v1, v0)
    }

    #[inline] pub fn process_lp(&mut self, x: f32) -> f32 { self.process_all(x).0 }
}

// ------------------------------------ Tests --------------------------------------
