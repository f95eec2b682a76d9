//! Capture scheduling: how microphone samples become frames on the control path.
//!
//! The mode is chosen once per session from what the platform can do:
//!
//! - **real-time**: 128-sample blocks, one [`PitchFrame`] per block. The
//!   capture side runs the detector itself over a sliding analysis window every
//!   [`ANALYSIS_HOP`] samples; the blocks in between carry the latest estimate
//!   with a fresh volume and their own capture time.
//! - **fallback**: 2048-sample blocks. The capture side ships raw sample
//!   buffers and the control path runs the detector.
//!
//! The analysis window follows [`DetectorConfig::for_sample_rate`], so it can
//! be longer than a fallback block at high sample rates. The control side then
//! keeps its own sliding history of raw blocks.
//!
//! Both sides talk over SPSC rings. Raw buffers are preallocated and cycle
//! through a return ring, so the capture callback never allocates. When the
//! control path falls behind, frames are dropped and counted; the capture
//! callback never blocks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ringbuf::traits::{Consumer as _, Observer as _, Producer as _, Split as _};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use voxpluck_core::dsp::rms;

use crate::detector::{DetectorConfig, PitchDetector, PitchFrame};

/// Samples between two detections in real-time mode at the default window.
/// Longer windows scale the hop with them.
pub const ANALYSIS_HOP: usize = 512;
/// Default capacity of the frame ring (and size of the raw buffer pool).
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CaptureMode {
    RealTime,
    Fallback,
}

impl CaptureMode {
    #[inline]
    pub const fn block_size(self) -> usize {
        match self {
            CaptureMode::RealTime => 128,
            CaptureMode::Fallback => 2048,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            CaptureMode::RealTime => "real-time",
            CaptureMode::Fallback => "fallback",
        }
    }
}

/// What the audio host offers for this session.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PlatformCapabilities {
    /// The input device accepts a fixed 128-frame callback buffer.
    pub small_fixed_blocks: bool,
    pub sample_rate: u32,
}

/// One unit of work crossing from capture to control.
#[derive(Debug)]
pub enum CaptureFrame {
    /// Real-time mode: pitch already estimated on the capture side.
    Pitch(PitchFrame),
    /// Fallback mode: raw samples for the control path to analyse.
    Raw(RawBlock),
}

#[derive(Debug)]
pub struct RawBlock {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Capture time of the first sample, seconds since the session started.
    pub timestamp: f64,
}

/// Session-wide capture decision.
#[derive(Clone, Debug)]
pub struct CaptureScheduler {
    mode: CaptureMode,
    sample_rate: u32,
    detector: DetectorConfig,
    queue_capacity: usize,
}

impl CaptureScheduler {
    /// Choose the capture mode for a session. Called once; the mode never changes afterwards.
    pub fn select(caps: &PlatformCapabilities, detector: DetectorConfig) -> Self {
        let mode = if caps.small_fixed_blocks { CaptureMode::RealTime } else { CaptureMode::Fallback };
        tracing::info!(
            mode = mode.name(),
            block = mode.block_size(),
            sample_rate = caps.sample_rate,
            "capture mode selected"
        );
        Self::with_mode(mode, caps.sample_rate, detector)
    }

    /// Force a mode (offline processing, tests).
    pub fn with_mode(mode: CaptureMode, sample_rate: u32, detector: DetectorConfig) -> Self {
        let sample_rate = sample_rate.max(1);
        let mut detector = detector.for_sample_rate(sample_rate);
        detector.window = detector.window.max(mode.block_size());
        Self {
            mode,
            sample_rate,
            detector,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    #[inline] pub fn mode(&self) -> CaptureMode { self.mode }
    #[inline] pub fn sample_rate(&self) -> u32 { self.sample_rate }
    #[inline] pub fn block_size(&self) -> usize { self.mode.block_size() }
    /// Detector settings with the window sized for this session's sample rate.
    #[inline] pub fn detector_config(&self) -> &DetectorConfig { &self.detector }

    /// Allocate the rings, the buffer pool and (in real-time mode) the
    /// capture-side detector. Returns the capture half and the control half.
    pub fn build(&self) -> (CaptureRenderer, CaptureReceiver) {
        let (frames_tx, frames_rx) = HeapRb::<CaptureFrame>::new(self.queue_capacity).split();
        let (mut free_tx, free_rx) = HeapRb::<Vec<f32>>::new(self.queue_capacity).split();
        let dropped = Arc::new(AtomicU64::new(0));

        let window = self.detector.window;
        let block = self.mode.block_size();
        let state = match self.mode {
            CaptureMode::RealTime => {
                let hop = analysis_hop(window).max(block);
                CaptureState::RealTime {
                    history: vec![0.0; window],
                    staging: vec![0.0; block],
                    staged: 0,
                    blocks_per_analysis: (hop / block).max(1),
                    since_analysis: 0,
                    latest: PitchFrame::unvoiced(0.0, 0.0),
                    detector: PitchDetector::new(self.detector),
                }
            }
            CaptureMode::Fallback => {
                while !free_tx.is_full() {
                    if free_tx.try_push(vec![0.0; block]).is_err() {
                        break;
                    }
                }
                CaptureState::Fallback { current: None, filled: 0, block_start: 0 }
            }
        };

        let renderer = CaptureRenderer {
            mode: self.mode,
            sample_rate: self.sample_rate,
            frames: frames_tx,
            free: free_rx,
            state,
            samples_seen: 0,
            dropped: Arc::clone(&dropped),
        };
        let history = if self.mode == CaptureMode::Fallback && window > block {
            vec![0.0; window]
        } else {
            Vec::new()
        };
        let receiver = CaptureReceiver {
            mode: self.mode,
            frames: frames_rx,
            free: free_tx,
            history,
            dropped,
            reported: 0,
        };
        (renderer, receiver)
    }
}

/// Hop between detections for a window: a quarter window, 512 at 2048.
#[inline]
fn analysis_hop(window: usize) -> usize {
    (window / 4).max(ANALYSIS_HOP)
}

// ------------------------------- Capture side -------------------------------------

enum CaptureState {
    RealTime {
        history: Vec<f32>,
        staging: Vec<f32>,
        staged: usize,
        blocks_per_analysis: usize,
        since_analysis: usize,
        /// Last full detection; reused until the next one.
        latest: PitchFrame,
        detector: PitchDetector,
    },
    Fallback {
        current: Option<Vec<f32>>,
        filled: usize,
        block_start: u64,
    },
}

/// Capture-callback half. Never allocates, locks or logs.
pub struct CaptureRenderer {
    mode: CaptureMode,
    sample_rate: u32,
    frames: HeapProd<CaptureFrame>,
    free: HeapCons<Vec<f32>>,
    state: CaptureState,
    samples_seen: u64,
    dropped: Arc<AtomicU64>,
}

impl CaptureRenderer {
    #[inline] pub fn mode(&self) -> CaptureMode { self.mode }

    /// Samples consumed since the session started.
    #[inline] pub fn captured_samples(&self) -> u64 { self.samples_seen }

    /// Feed mono samples in capture order.
    pub fn push_samples<I: IntoIterator<Item = f32>>(&mut self, samples: I) {
        for x in samples {
            self.push_sample(x);
        }
    }

    #[inline]
    #[allow(clippy::cast_precision_loss)]
    pub fn push_sample(&mut self, x: f32) {
        let sr = self.sample_rate;
        match &mut self.state {
            CaptureState::RealTime {
                history,
                staging,
                staged,
                blocks_per_analysis,
                since_analysis,
                latest,
                detector,
            } => {
                staging[*staged] = x;
                *staged += 1;
                if *staged == staging.len() {
                    let block = staging.len();
                    let w = history.len();
                    history.copy_within(block.., 0);
                    history[w - block..].copy_from_slice(staging);
                    *staged = 0;

                    let block_start = (self.samples_seen + 1).saturating_sub(block as u64);
                    let time = block_start as f64 / f64::from(sr);
                    *since_analysis += 1;
                    let frame = if *since_analysis >= *blocks_per_analysis {
                        *since_analysis = 0;
                        *latest = detector.detect(history, sr as f32, time);
                        *latest
                    } else {
                        let volume = rms(history);
                        if volume.is_finite() && volume >= detector.config().silence_rms {
                            PitchFrame { volume, capture_time: time, ..*latest }
                        } else {
                            PitchFrame::unvoiced(if volume.is_finite() { volume } else { 0.0 }, time)
                        }
                    };
                    if self.frames.try_push(CaptureFrame::Pitch(frame)).is_err() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            CaptureState::Fallback { current, filled, block_start } => {
                if *filled == 0 {
                    *block_start = self.samples_seen;
                    if current.is_none() {
                        *current = self.free.try_pop();
                        if current.is_none() {
                            self.dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                if let Some(slot) = current.as_mut().and_then(|buf| buf.get_mut(*filled)) {
                    *slot = x;
                }
                *filled += 1;
                if *filled == CaptureMode::Fallback.block_size() {
                    *filled = 0;
                    if let Some(samples) = current.take() {
                        let block = RawBlock {
                            samples,
                            sample_rate: sr,
                            timestamp: *block_start as f64 / f64::from(sr),
                        };
                        if let Err(CaptureFrame::Raw(back)) = self.frames.try_push(CaptureFrame::Raw(block)) {
                            *current = Some(back.samples);
                            self.dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            }
        }
        self.samples_seen += 1;
    }
}

// ------------------------------- Control side -------------------------------------

/// Control-path half: pops frames and returns raw buffers to the pool.
pub struct CaptureReceiver {
    mode: CaptureMode,
    frames: HeapCons<CaptureFrame>,
    free: HeapProd<Vec<f32>>,
    /// Sliding window over raw blocks; empty when one block fills the window.
    history: Vec<f32>,
    dropped: Arc<AtomicU64>,
    reported: u64,
}

impl CaptureReceiver {
    #[inline] pub fn mode(&self) -> CaptureMode { self.mode }

    /// Next raw frame, if any. Raw buffers should go back through [`recycle`](Self::recycle).
    pub fn pop_frame(&mut self) -> Option<CaptureFrame> {
        self.frames.try_pop()
    }

    /// Return a raw buffer to the capture side's pool.
    pub fn recycle(&mut self, samples: Vec<f32>) {
        if samples.len() == CaptureMode::Fallback.block_size() {
            // a full pool just lets the buffer drop
            let _ = self.free.try_push(samples);
        }
    }

    /// Next frame as a [`PitchFrame`], running `detector` on raw blocks.
    pub fn next_frame(&mut self, detector: &mut PitchDetector) -> Option<PitchFrame> {
        match self.pop_frame()? {
            CaptureFrame::Pitch(frame) => Some(frame),
            CaptureFrame::Raw(block) => {
                #[allow(clippy::cast_precision_loss)]
                let sr = block.sample_rate as f32;
                let frame = if self.history.is_empty() {
                    detector.detect(&block.samples, sr, block.timestamp)
                } else {
                    let (w, n) = (self.history.len(), block.samples.len().min(self.history.len()));
                    self.history.copy_within(n.., 0);
                    self.history[w - n..].copy_from_slice(&block.samples[block.samples.len() - n..]);
                    let start = w.saturating_sub(detector.config().window);
                    detector.detect(&self.history[start..], sr, block.timestamp)
                };
                self.recycle(block.samples);
                Some(frame)
            }
        }
    }

    /// Frames waiting in the ring.
    pub fn pending(&self) -> usize {
        self.frames.occupied_len()
    }

    /// Frames (or raw blocks) lost because the control path fell behind.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Log newly dropped frames since the last call. Returns the new count.
    pub fn report_drops(&mut self) -> u64 {
        let total = self.dropped_frames();
        let fresh = total.saturating_sub(self.reported);
        if fresh > 0 {
            tracing::warn!(dropped = fresh, total, mode = self.mode.name(), "capture frames dropped");
            self.reported = total;
        }
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::TAU;

    const SR: u32 = 44_100;

    fn sine(freq: f32, n: usize) -> impl Iterator<Item = f32> {
        (0..n).map(move |i| 0.5 * (TAU * freq * i as f32 / SR as f32).sin())
    }

    #[test]
    fn mode_follows_capabilities() {
        let rt = CaptureScheduler::select(
            &PlatformCapabilities { small_fixed_blocks: true, sample_rate: SR },
            DetectorConfig::default(),
        );
        assert_eq!(rt.mode(), CaptureMode::RealTime);
        assert_eq!(rt.block_size(), 128);

        let fb = CaptureScheduler::select(
            &PlatformCapabilities { small_fixed_blocks: false, sample_rate: 48_000 },
            DetectorConfig::default(),
        );
        assert_eq!(fb.mode(), CaptureMode::Fallback);
        assert_eq!(fb.block_size(), 2048);
        assert_eq!(fb.sample_rate(), 48_000);
    }

    #[test]
    fn realtime_frames_carry_pitch() {
        let sched = CaptureScheduler::with_mode(CaptureMode::RealTime, SR, DetectorConfig::default());
        let (mut tx, mut rx) = sched.build();
        let n = 128 * 32;
        tx.push_samples(sine(220.0, n));
        assert_eq!(rx.pending(), 32);

        let mut det = PitchDetector::default();
        let mut last = None;
        while let Some(frame) = rx.next_frame(&mut det) {
            last = Some(frame);
        }
        let last = last.expect("frames");
        let f = last.frequency.expect("voiced");
        assert!((f - 220.0).abs() < 2.0, "f={f}");
        // start of the last block
        let expected = (n - 128) as f64 / f64::from(SR);
        assert!((last.capture_time - expected).abs() < 1e-9, "t={}", last.capture_time);
        assert_eq!(rx.dropped_frames(), 0);
    }

    #[test]
    fn realtime_emits_one_frame_per_block() {
        let sched = CaptureScheduler::with_mode(CaptureMode::RealTime, SR, DetectorConfig::default());
        let (mut tx, mut rx) = sched.build();
        tx.push_samples(sine(330.0, 128 * 16 + 50));
        assert_eq!(rx.pending(), 16);

        let mut det = PitchDetector::default();
        let mut times = Vec::new();
        let mut voiced = 0;
        while let Some(frame) = rx.next_frame(&mut det) {
            times.push(frame.capture_time);
            voiced += usize::from(frame.is_voiced());
        }
        assert_eq!(times.len(), 16);
        for (i, t) in times.iter().enumerate() {
            assert!((t - (i * 128) as f64 / f64::from(SR)).abs() < 1e-9, "block {i} at {t}");
        }
        // blocks after the first full-window analysis carry its estimate
        assert!(voiced >= 1, "no voiced frames");
    }

    #[test]
    fn realtime_blocks_between_analyses_follow_the_level() {
        let sched =
            CaptureScheduler::with_mode(CaptureMode::RealTime, SR, DetectorConfig::default()).with_queue_capacity(64);
        let (mut tx, mut rx) = sched.build();
        tx.push_samples(sine(220.0, 4096));
        // flushes the window and ends two blocks after an analysis
        tx.push_samples(std::iter::repeat(0.0).take(2048 + 256));
        assert_eq!(rx.pending(), 50);
        let mut det = PitchDetector::default();
        let mut last = None;
        while let Some(frame) = rx.next_frame(&mut det) {
            last = Some(frame);
        }
        let last = last.expect("frames");
        assert_eq!(last.frequency, None);
        assert_eq!(last.volume, 0.0);
    }

    #[test]
    fn fallback_keeps_a_window_longer_than_a_block() {
        let sr = 96_000;
        let sched = CaptureScheduler::with_mode(CaptureMode::Fallback, sr, DetectorConfig::default());
        assert_eq!(sched.detector_config().window, 4096);
        let (mut tx, mut rx) = sched.build();
        let tone = (0..2048 * 3).map(|i| 0.5 * (TAU * 60.0 * i as f32 / sr as f32).sin());
        tx.push_samples(tone);

        let mut det = PitchDetector::new(*sched.detector_config());
        let mut last = None;
        while let Some(frame) = rx.next_frame(&mut det) {
            last = Some(frame);
        }
        let last = last.expect("frames");
        let f = last.frequency.expect("60 Hz reaches the detector at 96 kHz");
        assert!((f - 60.0).abs() < 1.0, "f={f}");
        assert!((last.capture_time - 4096.0 / f64::from(sr)).abs() < 1e-9);
    }

    #[test]
    fn realtime_silence_is_unvoiced() {
        let sched = CaptureScheduler::with_mode(CaptureMode::RealTime, SR, DetectorConfig::default());
        let (mut tx, mut rx) = sched.build();
        tx.push_samples(std::iter::repeat(0.0).take(ANALYSIS_HOP * 2));
        assert_eq!(rx.pending(), ANALYSIS_HOP * 2 / 128);
        let mut det = PitchDetector::default();
        while let Some(frame) = rx.next_frame(&mut det) {
            assert_eq!(frame.frequency, None);
            assert_eq!(frame.confidence, 0.0);
        }
    }

    #[test]
    fn fallback_ships_raw_blocks() {
        let sched = CaptureScheduler::with_mode(CaptureMode::Fallback, SR, DetectorConfig::default());
        let (mut tx, mut rx) = sched.build();
        tx.push_samples(sine(330.0, 2048 * 2 + 100));
        assert_eq!(rx.pending(), 2);

        match rx.pop_frame() {
            Some(CaptureFrame::Raw(block)) => {
                assert_eq!(block.samples.len(), 2048);
                assert_eq!(block.sample_rate, SR);
                assert_eq!(block.timestamp, 0.0);
                rx.recycle(block.samples);
            }
            other => panic!("expected raw block, got {other:?}"),
        }

        let mut det = PitchDetector::default();
        let frame = rx.next_frame(&mut det).expect("second block");
        let f = frame.frequency.expect("voiced");
        assert!((f - 330.0).abs() < 3.0, "f={f}");
        assert!((frame.capture_time - 2048.0 / f64::from(SR)).abs() < 1e-9);
    }

    #[test]
    fn slow_consumer_drops_then_recovers() {
        let sched =
            CaptureScheduler::with_mode(CaptureMode::Fallback, SR, DetectorConfig::default()).with_queue_capacity(4);
        let (mut tx, mut rx) = sched.build();
        tx.push_samples(std::iter::repeat(0.1).take(2048 * 6));
        assert_eq!(rx.pending(), 4);
        assert_eq!(rx.dropped_frames(), 2);
        assert_eq!(rx.report_drops(), 2);
        assert_eq!(rx.report_drops(), 0);

        let mut det = PitchDetector::default();
        while rx.next_frame(&mut det).is_some() {}
        tx.push_samples(std::iter::repeat(0.1).take(2048 * 3));
        assert_eq!(rx.pending(), 3, "recycled buffers are reused");
        assert_eq!(rx.dropped_frames(), 2);
    }
}
