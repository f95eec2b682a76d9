//! Control-path glue: frame -> correction -> voice events -> readings.
//!
//! [`FrameProcessor`] is what the control thread of a live session runs for
//! every frame. [`HumPipeline`] bundles a whole session without audio devices:
//! the host pushes microphone samples and pulls rendered audio (offline
//! processing, the C ABI, tests).

use crate::capture::{CaptureMode, CaptureReceiver, CaptureRenderer, CaptureScheduler};
use crate::config::{ConfigStore, ResolvedConfig};
use crate::controller::{VoiceController, VoiceState};
use crate::corrector::{CorrectionResult, PitchCorrector, MIN_CORRECTION_CONFIDENCE};
use crate::detector::{DetectorConfig, PitchDetector, PitchFrame};
use crate::error::GraphError;
use crate::latency::{LatencyCoordinator, LatencyInfo};
use crate::notes::{NoteEvent, NoteRecorder};
use crate::synth::{SynthSink, SynthesisEngine};

/// Per-frame pitch report for displays and hosts.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PitchReading {
    /// Corrected frequency, `None` when unvoiced.
    pub frequency: Option<f32>,
    /// Frequency of the scale target the corrector chose.
    pub target_frequency: Option<f32>,
    /// Pitch-class label (`""` when unvoiced).
    pub note: &'static str,
    pub octave: i32,
    pub cents: f32,
    pub confidence: f32,
    pub volume: f32,
    /// Capture time of the analysed audio, seconds.
    pub time: f64,
}

impl PitchReading {
    fn from_parts(frame: &PitchFrame, result: &CorrectionResult) -> Self {
        let voiced = !result.is_null();
        Self {
            frequency: voiced.then_some(result.frequency),
            target_frequency: voiced.then_some(result.target_frequency),
            note: result.note,
            octave: result.octave,
            cents: result.cents,
            confidence: frame.confidence,
            volume: frame.volume,
            time: frame.capture_time,
        }
    }

    #[inline]
    pub fn is_voiced(&self) -> bool {
        self.frequency.is_some()
    }
}

/// Everything that happens to a frame on the control path.
pub struct FrameProcessor {
    detector: PitchDetector,
    corrector: PitchCorrector,
    controller: VoiceController,
    recorder: NoteRecorder,
}

impl FrameProcessor {
    /// Processor whose corrector follows `store`. `detector` should be the
    /// capture scheduler's settings so both sides agree on the window.
    pub fn new(config: &ResolvedConfig, store: &ConfigStore, detector: DetectorConfig) -> Self {
        Self {
            detector: PitchDetector::new(detector),
            corrector: PitchCorrector::new(store.corrector_handle()),
            controller: VoiceController::new(config.controller),
            recorder: NoteRecorder::new(config.controller.min_note_duration, config.corrector.reference_frequency),
        }
    }

    /// Pull at most one frame from `receiver` and handle it.
    pub fn poll<S: SynthSink + ?Sized>(&mut self, receiver: &mut CaptureReceiver, sink: &mut S) -> Option<PitchReading> {
        let frame = receiver.next_frame(&mut self.detector)?;
        Some(self.handle(&frame, sink))
    }

    /// Correct one frame, drive the voice and record notes.
    pub fn handle<S: SynthSink + ?Sized>(&mut self, frame: &PitchFrame, sink: &mut S) -> PitchReading {
        let result = match frame.frequency {
            Some(f) => self.corrector.correct(f, frame.confidence),
            None => CorrectionResult::NULL,
        };
        let voiced = !result.is_null();

        self.controller.update(
            voiced.then_some(result.frequency),
            frame.confidence,
            frame.volume,
            frame.capture_time,
            sink,
        );

        let quantized = voiced && frame.confidence >= MIN_CORRECTION_CONFIDENCE;
        self.recorder.set_reference(self.corrector.config().reference_frequency);
        self.recorder.observe(quantized.then_some(result.target_frequency), frame.capture_time);

        PitchReading::from_parts(frame, &result)
    }

    /// Release the voice and close the note in progress.
    pub fn stop<S: SynthSink + ?Sized>(&mut self, time: f64, sink: &mut S) {
        self.controller.force_release(sink);
        self.recorder.finish(time);
    }

    #[inline] pub fn voice_state(&self) -> VoiceState { self.controller.state() }
    #[inline] pub fn corrector(&self) -> &PitchCorrector { &self.corrector }
    #[inline] pub fn corrector_mut(&mut self) -> &mut PitchCorrector { &mut self.corrector }
    #[inline] pub fn recorder(&self) -> &NoteRecorder { &self.recorder }

    pub fn take_note_events(&mut self) -> Vec<NoteEvent> {
        self.recorder.take_events()
    }
}

/// A complete session without audio devices.
pub struct HumPipeline {
    latency: LatencyCoordinator,
    capture: CaptureRenderer,
    receiver: CaptureReceiver,
    processor: FrameProcessor,
    synth: SynthesisEngine,
    store: ConfigStore,
}

impl HumPipeline {
    pub fn new(sample_rate: u32, mode: CaptureMode, config: &ResolvedConfig) -> Result<Self, GraphError> {
        let store = ConfigStore::from_resolved(config);
        let scheduler = CaptureScheduler::with_mode(mode, sample_rate, config.detector);
        let (capture, receiver) = scheduler.build();
        #[allow(clippy::cast_precision_loss)]
        let synth = SynthesisEngine::with_shared_params(sample_rate as f32, store.synth_handle())?;
        Ok(Self {
            latency: LatencyCoordinator::new(mode, scheduler.sample_rate()),
            capture,
            receiver,
            processor: FrameProcessor::new(config, &store, *scheduler.detector_config()),
            synth,
            store,
        })
    }

    /// Feed mono microphone samples. Frames become available through [`poll_reading`](Self::poll_reading).
    pub fn push_input(&mut self, samples: &[f32]) {
        self.capture.push_samples(samples.iter().copied());
    }

    /// Handle the next captured frame, driving the voice. `None` when no frame is pending.
    pub fn poll_reading(&mut self) -> Option<PitchReading> {
        let reading = self.processor.poll(&mut self.receiver, &mut self.synth);
        self.receiver.report_drops();
        reading
    }

    /// Handle every pending frame; returns the last reading.
    pub fn drain_readings(&mut self) -> Option<PitchReading> {
        let mut last = None;
        while let Some(r) = self.poll_reading() {
            last = Some(r);
        }
        last
    }

    /// Render mono output.
    pub fn render(&mut self, out: &mut [f32]) {
        self.synth.render(out);
    }

    /// Manual pluck, bypassing the controller.
    pub fn attack(&mut self, frequency: f32, velocity: f32) {
        self.synth.attack(frequency, velocity);
    }

    pub fn release(&mut self) {
        self.synth.release();
    }

    /// Release the voice and close the recorded note.
    pub fn stop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let time = self.capture.captured_samples() as f64 / f64::from(self.latency.sample_rate());
        self.processor.stop(time, &mut self.synth);
    }

    pub fn latency(&self) -> LatencyInfo {
        self.latency.current_latency()
    }

    #[inline] pub fn latency_coordinator(&self) -> &LatencyCoordinator { &self.latency }
    #[inline] pub fn config_store(&self) -> &ConfigStore { &self.store }
    #[inline] pub fn synth(&self) -> &SynthesisEngine { &self.synth }
    #[inline] pub fn processor(&self) -> &FrameProcessor { &self.processor }
    #[inline] pub fn mode(&self) -> CaptureMode { self.latency.mode() }

    pub fn take_note_events(&mut self) -> Vec<NoteEvent> {
        self.processor.take_note_events()
    }

    pub fn dispose(self) {
        self.synth.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::scale::{ScaleDefinition, ScaleKind};
    use std::f32::consts::TAU;

    const SR: u32 = 44_100;

    fn hum(freq: f32, secs: f32) -> Vec<f32> {
        let n = (secs * SR as f32) as usize;
        (0..n).map(|i| 0.3 * (TAU * freq * i as f32 / SR as f32).sin()).collect()
    }

    fn pipeline(mode: CaptureMode) -> HumPipeline {
        HumPipeline::new(SR, mode, &EngineConfig::default().resolve()).expect("pipeline")
    }

    #[test]
    fn hum_plucks_the_string() {
        for mode in [CaptureMode::RealTime, CaptureMode::Fallback] {
            let mut p = pipeline(mode);
            p.push_input(&hum(432.0, 0.5));
            let reading = p.drain_readings().expect("readings");
            assert_eq!(reading.note, "A", "{mode:?}");
            assert_eq!(reading.octave, 4);
            let f = reading.frequency.expect("voiced");
            assert!((f - 440.0).abs() < 0.5, "{mode:?}: corrected to {f}");
            assert!(p.processor().voice_state().is_sounding());

            let mut out = vec![0.0; 4096];
            p.render(&mut out);
            assert!(out.iter().any(|x| x.abs() > 0.01), "{mode:?}: silent output");
            assert!((p.synth().voice().current_frequency - 440.0).abs() < 1.0);
        }
    }

    #[test]
    fn silence_keeps_the_voice_idle() {
        let mut p = pipeline(CaptureMode::Fallback);
        p.push_input(&vec![0.0; 8192]);
        let reading = p.drain_readings().expect("readings");
        assert!(!reading.is_voiced());
        assert_eq!(reading.note, "");
        assert!(!p.processor().voice_state().is_sounding());
        let mut out = vec![0.0; 1024];
        p.render(&mut out);
        assert!(out.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn scale_change_applies_to_next_frame() {
        let mut p = pipeline(CaptureMode::Fallback);
        p.config_store().update_corrector(|c| {
            c.scale = ScaleDefinition::catalog(ScaleKind::PentatonicMajor);
            c.key_offset = 2;
        });
        p.push_input(&hum(392.0, 0.1));
        let reading = p.drain_readings().expect("readings");
        assert_eq!(reading.note, "F#");
    }

    #[test]
    fn note_events_follow_the_sung_line() {
        let mut p = pipeline(CaptureMode::Fallback);
        p.push_input(&hum(220.0, 0.6));
        p.push_input(&hum(330.0, 0.6));
        p.drain_readings();
        p.stop();
        let events = p.take_note_events();
        let pitches: Vec<u8> = events.iter().map(|e| e.pitch).collect();
        assert_eq!(pitches, vec![57, 64], "{events:?}");
        assert!(events[0].end_time <= events[1].start_time);
        assert!(!p.processor().voice_state().is_sounding());
    }

    #[test]
    fn latency_reflects_mode() {
        let p = pipeline(CaptureMode::RealTime);
        assert!((p.latency().buffer_ms() - 2.90).abs() < 0.01);
        let p = pipeline(CaptureMode::Fallback);
        assert_eq!(p.latency().mode, CaptureMode::Fallback);
    }
}
