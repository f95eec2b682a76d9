#![cfg_attr(not(feature = "std"), no_std)]
//! voxpluck core: no_std-ready DSP primitives for the hum-to-string engine.
//!
//! Features
//! - `std`      : (default) use the Rust standard library
//! - `no-std`   : build with `#![no_std]` (+ `alloc`) and use `libm` for math
//! - `micromath`: use `micromath` instead of `libm`
//! - `fast-math`: enable approximations for tanh/tan
//!
//! Modules
//! - [`dsp`]       : math backend, utils (db/lin, coefficients, block RMS)
//! - [`envelopes`] : automatable `Param`, `PluckEnvelope`
//! - [`filters`]   : one-pole LP, DC blocker, TPT SVF
//! - [`delay`]     : fractional delay line with documented clamp bounds
//!
//! Everything here is sample-by-sample and allocation free after construction.

extern crate alloc;

pub mod delay;
pub mod dsp;
pub mod envelopes;
pub mod filters;

/// Commonly used types/functions for convenience:
pub mod prelude {
    pub use crate::delay::{FractionalDelay, MIN_DELAY_SAMPLES};
    pub use crate::dsp::{
        clamp, kill_denormals, one_pole_coeff_hz, one_pole_coeff_ms,
        rms, seconds_to_samples, soft_clip, tpt_g, TAU,
    };
    pub use crate::envelopes::{Param, PluckEnvelope};
    pub use crate::filters::{DcBlock, OnePoleLP, SvfTpt};
}

#[cfg(test)]
mod smoke {

    #[test]
    fn prelude_exists() {
        use crate::prelude::*;
        let _ = soft_clip(0.5);
        let mut p = Param::new(0.0, 48000.0);
        p.ramp_to(1.0, 0.01);
        let mut lp = OnePoleLP::new(1000.0, 48000.0);
        let _ = lp.process(p.next());
        let d = FractionalDelay::new(128);
        assert!(d.max_delay_samples() > MIN_DELAY_SAMPLES);
    }
}
