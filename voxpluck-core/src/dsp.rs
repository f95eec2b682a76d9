//! Generic DSP utilities and math helpers.
//!
//! Design goals:
//! - `no_std` ready (guarded by the crate feature `no-std`)
//! - Math backend selection that works in both `std` and `no_std` contexts
//! - Optional `fast-math` approximations for coefficient computation
//! - Side-effect free helpers that are easy to test
//!
//! Conventions:
//! - All functions are `#[inline]` where useful to help the optimizer.
//! - Argument and return domains are documented per function.

#![allow(clippy::excessive_precision)]

use core::f32::consts::PI;

use cfg_if::cfg_if;

// ----------------------------- Math backend selection -----------------------------

cfg_if! {
    // micromath preferred if explicitly requested (works in no_std)
    if #[cfg(feature = "micromath")] {
        use micromath::F32Ext as _;
        #[inline] pub(crate) fn m_sin(x: f32) -> f32 { x.sin() }
        #[inline] pub(crate) fn m_exp(x: f32) -> f32 { x.exp() }
        #[inline] pub(crate) fn m_sqrt(x: f32) -> f32 { x.sqrt() }
        #[inline] pub(crate) fn m_abs(x: f32) -> f32 { x.abs() }
        #[inline] pub(crate) fn m_floor(x: f32) -> f32 { x.floor() }
        #[inline] pub(crate) fn m_tanh(x: f32) -> f32 { x.tanh() }
        #[inline] pub(crate) fn m_tan(x: f32) -> f32 { (x.sin()) / (x.cos()) }
    // libm (C math) in no_std
    } else if #[cfg(feature = "no-std")] {
        #[inline] pub(crate) fn m_sin(x: f32) -> f32 { libm::sinf(x) }
        #[inline] pub(crate) fn m_exp(x: f32) -> f32 { libm::expf(x) }
        #[inline] pub(crate) fn m_sqrt(x: f32) -> f32 { libm::sqrtf(x) }
        #[inline] pub(crate) fn m_abs(x: f32) -> f32 { libm::fabsf(x) }
        #[inline] pub(crate) fn m_floor(x: f32) -> f32 { libm::floorf(x) }
        #[inline] pub(crate) fn m_tanh(x: f32) -> f32 { libm::tanhf(x) }
        #[inline] pub(crate) fn m_tan(x: f32) -> f32 { libm::tanf(x) }
    // std backend
    } else {
        #[inline] pub(crate) fn m_sin(x: f32) -> f32 { x.sin() }
        #[inline] pub(crate) fn m_exp(x: f32) -> f32 { x.exp() }
        #[inline] pub(crate) fn m_sqrt(x: f32) -> f32 { x.sqrt() }
        #[inline] pub(crate) fn m_abs(x: f32) -> f32 { x.abs() }
        #[inline] pub(crate) fn m_floor(x: f32) -> f32 { x.floor() }
        #[inline] pub(crate) fn m_tanh(x: f32) -> f32 { x.tanh() }
        #[inline] pub(crate) fn m_tan(x: f32) -> f32 { x.tan() }
    }
}

// --------------------------------- Constants -------------------------------------

/// 2π (commonly useful)
pub const TAU: f32 = 2.0 * PI;

/// A very small epsilon used in denormal handling and safe divisions.
pub const EPS_SMALL: f32 = 1.0e-20;

// --------------------------------- Utilities -------------------------------------

/// Clamp `x` into `[lo, hi]`. NaN passes through unchanged.
#[inline]
pub fn clamp(x: f32, lo: f32, hi: f32) -> f32 {
    if x < lo { lo } else if x > hi { hi } else { x }
}

/// Kill denormal/subnormal values. Returns 0.0 if |x| < EPS_SMALL.
#[inline]
pub fn kill_denormals(x: f32) -> f32 {
    if m_abs(x) < EPS_SMALL { 0.0 } else { x }
}

/// Convert a duration in seconds to a (fractional) sample count. Negative and
/// non-finite durations map to zero.
#[inline]
pub fn seconds_to_samples(secs: f32, sr: f32) -> f32 {
    if secs.is_finite() && secs > 0.0 { secs * sr } else { 0.0 }
}

// --------------------------------- Nonlinearities --------------------------------

/// Soft clip via tanh. If `fast-math` is enabled, uses a stable rational approximation.
///
/// Approximation used when `fast-math`:
/// `tanh(x) ≈ x * (27 + x^2) / (27 + 9 x^2)`, with `x` clamped to `[-3, 3]`
/// where the approximation reaches ±1.
#[inline]
pub fn soft_clip(x: f32) -> f32 {
    #[cfg(feature = "fast-math")]
    {
        let x = clamp(x, -3.0, 3.0);
        let x2 = x * x;
        let num = x * (27.0 + x2);
        let den = 27.0 + 9.0 * x2;
        return num / den;
    }
    #[cfg(not(feature = "fast-math"))]
    m_tanh(x)
}

// --------------------------------- Exponentials / smoothing ----------------------

/// One-pole smoothing coefficient for a time constant `t_ms` (milliseconds).
///
/// `a = exp(-1/(tau * sr))`; `t_ms` is the time to reach ~63% of a step.
#[inline]
pub fn one_pole_coeff_ms(t_ms: f32, sr: f32) -> f32 {
    if t_ms <= 0.0 { return 0.0; }
    let tau = t_ms * 0.001;
    m_exp(-1.0 / (tau * sr))
}

/// Convert cutoff in Hz to a simple one-pole (non-TPT) coefficient `exp(-2π fc / sr)`.
/// The cutoff is limited to just below Nyquist.
#[inline]
pub fn one_pole_coeff_hz(cut_hz: f32, sr: f32) -> f32 {
    let fc = cut_hz.max(0.0).min(0.499 * sr);
    m_exp(-2.0 * PI * fc / sr)
}

/// TPT `g = tan(π fc / sr)` helper for state-variable filters.
///
/// With `fast-math` the tangent is computed as a ratio of short polynomials,
/// which is accurate enough well below Nyquist.
#[inline]
pub fn tpt_g(cut_hz: f32, sr: f32) -> f32 {
    let x = PI * (cut_hz.max(0.0).min(0.49 * sr) / sr);
    cfg_if! {
        if #[cfg(feature = "fast-math")] {
            let x2 = x * x;
            let s = x * (0.999_979_313_3 + x2 * (-0.166_624_432_0 + x2 * 0.008_308_978_98));
            let c = 1.0 + x2 * (-0.499_999_9 + x2 * 0.041_655_4);
            s / c
        } else {
            m_tan(x)
        }
    }
}

// --------------------------------- Block measures ---------------------------------

/// Root-mean-square of a block. Empty blocks yield 0; a block containing a
/// non-finite sample yields a non-finite result, which callers treat as invalid.
#[inline]
pub fn rms(block: &[f32]) -> f32 {
    if block.is_empty() {
        return 0.0;
    }
    let mut acc = 0.0f64;
    for &s in block {
        acc += f64::from(s) * f64::from(s);
    }
    #[allow(clippy::cast_precision_loss)]
    let mean = (acc / block.len() as f64) as f32;
    m_sqrt(mean)
}

/// Sine at `phase` radians. Exposed for test-signal generation in downstream crates.
#[inline]
pub fn sine(phase: f32) -> f32 {
    m_sin(phase)
}

#[inline]
pub(crate) fn floor(x: f32) -> f32 {
    m_floor(x)
}

// --------------------------------- Tests (std only) ------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_limits_both_sides() {
        assert_eq!(clamp(2.0, 0.0, 1.0), 1.0);
        assert_eq!(clamp(-2.0, 0.0, 1.0), 0.0);
        assert_eq!(clamp(0.25, 0.0, 1.0), 0.25);
    }

    #[test]
    fn soft_clip_is_bounded() {
        for x in [-10.0, -2.0, 0.0, 2.0, 10.0] {
            let y = soft_clip(x);
            assert!((-1.0 - 1e-4..=1.0 + 1e-4).contains(&y), "x={x} y={y}");
        }
    }

    #[test]
    fn rms_of_full_scale_sine() {
        let block: Vec<f32> = (0..4800).map(|i| sine(TAU * 100.0 * i as f32 / 48_000.0)).collect();
        let v = rms(&block);
        assert!((v - core::f32::consts::FRAC_1_SQRT_2).abs() < 1e-3, "rms={v}");
    }

    #[test]
    fn rms_flags_non_finite() {
        assert!(!rms(&[0.1, f32::NAN, 0.2]).is_finite());
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn seconds_to_samples_rejects_garbage() {
        assert_eq!(seconds_to_samples(-1.0, 48_000.0), 0.0);
        assert_eq!(seconds_to_samples(f32::NAN, 48_000.0), 0.0);
        assert_eq!(seconds_to_samples(0.5, 48_000.0), 24_000.0);
    }
}
