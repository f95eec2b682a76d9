//! Latency budget reporting.
//!
//! `current_latency()` is a pure function of the session's capture mode, its
//! sample rate and the last hardware latency the output callback reported.
//! It is meant for observability and is never called from the render path.
//! The render path only stores into the shared [`HardwareLatencyProbe`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::capture::CaptureMode;

/// End-to-end latency the system aims for.
pub const TARGET_LATENCY_SECS: f64 = 0.090;
/// Latency above which the session is considered broken.
pub const CEILING_LATENCY_SECS: f64 = 0.180;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LatencyBudget {
    WithinTarget,
    OverTarget,
    OverCeiling,
}

/// Snapshot of the latency breakdown. Times are in seconds.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LatencyInfo {
    pub mode: CaptureMode,
    /// `block_size / sample_rate`.
    pub buffer_latency: f64,
    /// Platform-reported output latency.
    pub hardware_latency: f64,
    pub total_latency: f64,
    pub sample_rate: u32,
}

impl LatencyInfo {
    #[inline] pub fn buffer_ms(&self) -> f64 { self.buffer_latency * 1000.0 }
    #[inline] pub fn hardware_ms(&self) -> f64 { self.hardware_latency * 1000.0 }
    #[inline] pub fn total_ms(&self) -> f64 { self.total_latency * 1000.0 }

    pub fn budget(&self) -> LatencyBudget {
        if self.total_latency > CEILING_LATENCY_SECS {
            LatencyBudget::OverCeiling
        } else if self.total_latency > TARGET_LATENCY_SECS {
            LatencyBudget::OverTarget
        } else {
            LatencyBudget::WithinTarget
        }
    }
}

/// Render-side writer for the hardware latency (lock free, one atomic store).
#[derive(Clone, Debug)]
pub struct HardwareLatencyProbe {
    micros: Arc<AtomicU64>,
}

impl HardwareLatencyProbe {
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub fn report(&self, latency: Duration) {
        self.micros.store(latency.as_micros() as u64, Ordering::Relaxed);
    }
}

#[derive(Clone, Debug)]
pub struct LatencyCoordinator {
    mode: CaptureMode,
    sample_rate: u32,
    hardware_micros: Arc<AtomicU64>,
}

impl LatencyCoordinator {
    pub fn new(mode: CaptureMode, sample_rate: u32) -> Self {
        Self { mode, sample_rate: sample_rate.max(1), hardware_micros: Arc::new(AtomicU64::new(0)) }
    }

    pub fn probe(&self) -> HardwareLatencyProbe {
        HardwareLatencyProbe { micros: Arc::clone(&self.hardware_micros) }
    }

    /// Set the hardware latency from the control path (hosts without callback timestamps).
    pub fn set_hardware_latency(&self, latency: Duration) {
        self.probe().report(latency);
    }

    #[inline] pub fn mode(&self) -> CaptureMode { self.mode }
    #[inline] pub fn sample_rate(&self) -> u32 { self.sample_rate }

    #[allow(clippy::cast_precision_loss)]
    pub fn current_latency(&self) -> LatencyInfo {
        let buffer_latency = self.mode.block_size() as f64 / f64::from(self.sample_rate);
        let hardware_latency = self.hardware_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        LatencyInfo {
            mode: self.mode,
            buffer_latency,
            hardware_latency,
            total_latency: buffer_latency + hardware_latency,
            sample_rate: self.sample_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realtime_block_at_44k1_is_about_2_9_ms() {
        let lc = LatencyCoordinator::new(CaptureMode::RealTime, 44_100);
        let a = lc.current_latency();
        assert!((a.buffer_ms() - 2.90).abs() < 0.01, "buffer {} ms", a.buffer_ms());
        assert_eq!(a.hardware_latency, 0.0);
        assert_eq!(a.total_latency, a.buffer_latency);
        let b = lc.current_latency();
        assert_eq!(a, b);
    }

    #[test]
    fn fallback_block_is_longer() {
        let lc = LatencyCoordinator::new(CaptureMode::Fallback, 48_000);
        let info = lc.current_latency();
        assert!((info.buffer_ms() - 42.67).abs() < 0.01);
        assert_eq!(info.mode, CaptureMode::Fallback);
    }

    #[test]
    fn hardware_latency_adds_up_and_classifies() {
        let lc = LatencyCoordinator::new(CaptureMode::RealTime, 48_000);
        let probe = lc.probe();
        probe.report(Duration::from_millis(20));
        let info = lc.current_latency();
        assert!((info.total_ms() - (20.0 + info.buffer_ms())).abs() < 1e-6);
        assert_eq!(info.budget(), LatencyBudget::WithinTarget);

        lc.set_hardware_latency(Duration::from_millis(120));
        assert_eq!(lc.current_latency().budget(), LatencyBudget::OverTarget);
        probe.report(Duration::from_millis(200));
        assert_eq!(lc.current_latency().budget(), LatencyBudget::OverCeiling);
    }
}
