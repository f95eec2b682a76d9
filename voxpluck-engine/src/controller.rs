//! Voice controller: turns per-frame pitch estimates into voice events.
//!
//! Idle -> Sounding on a confident, loud enough onset (attack).
//! Sounding follows the pitch with short glides and releases the voice once
//! the input has been unvoiced for `release_hold` seconds. Frames below the
//! sustain confidence count as unvoiced. Short dropouts (consonants, breaths)
//! inside the hold keep the string ringing.

use crate::corrector::MIN_CORRECTION_CONFIDENCE;
use crate::synth::SynthSink;
use crate::tuning::is_valid_frequency;

/// Input RMS mapped to full pluck velocity.
const FULL_VELOCITY_RMS: f32 = 0.25;
/// Lowest velocity an onset produces.
const MIN_VELOCITY: f32 = 0.1;
/// Confidence a sounding note needs to follow the pitch. Weaker frames are
/// passed through uncorrected and must not bend the string.
const SUSTAIN_CONFIDENCE: f32 = MIN_CORRECTION_CONFIDENCE;
/// Pitch changes smaller than this (ratio) do not produce a glide. About 1 cent.
const GLIDE_EPSILON: f32 = 5.8e-4;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ControllerConfig {
    /// Detector confidence needed to pluck.
    pub onset_confidence: f32,
    /// Input RMS needed to pluck. Sounding notes sustain down to half of it.
    pub gate_volume: f32,
    /// Seconds of unvoiced input before release.
    pub release_hold: f32,
    /// Glide time between sung pitches, seconds.
    pub glide_time: f32,
    /// Recorded notes shorter than this are dropped, seconds.
    pub min_note_duration: f32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            onset_confidence: 0.6,
            gate_volume: 0.02,
            release_hold: 0.12,
            glide_time: 0.03,
            min_note_duration: 0.08,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum VoiceState {
    Idle,
    Sounding { frequency: f32 },
}

impl VoiceState {
    #[inline]
    pub fn is_sounding(&self) -> bool {
        matches!(self, VoiceState::Sounding { .. })
    }
}

#[derive(Clone, Debug)]
pub struct VoiceController {
    config: ControllerConfig,
    state: VoiceState,
    last_voiced: f64,
}

impl VoiceController {
    pub fn new(config: ControllerConfig) -> Self {
        Self { config, state: VoiceState::Idle, last_voiced: 0.0 }
    }

    #[inline] pub fn config(&self) -> &ControllerConfig { &self.config }
    #[inline] pub fn state(&self) -> VoiceState { self.state }

    pub fn set_config(&mut self, config: ControllerConfig) {
        self.config = config;
    }

    /// Feed one frame. `frequency` is the corrected pitch (`None` when unvoiced),
    /// `time` the frame's capture time in seconds.
    pub fn update<S: SynthSink + ?Sized>(
        &mut self,
        frequency: Option<f32>,
        confidence: f32,
        volume: f32,
        time: f64,
        sink: &mut S,
    ) -> VoiceState {
        let pitch = frequency.filter(|f| is_valid_frequency(*f));
        match (self.state, pitch) {
            (VoiceState::Idle, Some(f)) => {
                if confidence >= self.config.onset_confidence && volume >= self.config.gate_volume {
                    sink.attack(f, velocity(volume));
                    self.state = VoiceState::Sounding { frequency: f };
                    self.last_voiced = time;
                }
            }
            (VoiceState::Sounding { frequency: current }, Some(f))
                if confidence >= SUSTAIN_CONFIDENCE.min(self.config.onset_confidence)
                    && volume >= self.config.gate_volume * 0.5 =>
            {
                if (f / current - 1.0).abs() > GLIDE_EPSILON {
                    sink.glide(f, self.config.glide_time);
                    self.state = VoiceState::Sounding { frequency: f };
                }
                self.last_voiced = time;
            }
            (VoiceState::Sounding { .. }, _) => {
                if time - self.last_voiced >= f64::from(self.config.release_hold) {
                    sink.release();
                    self.state = VoiceState::Idle;
                }
            }
            (VoiceState::Idle, None) => {}
        }
        self.state
    }

    /// Release immediately if sounding (session stop).
    pub fn force_release<S: SynthSink + ?Sized>(&mut self, sink: &mut S) {
        if self.state.is_sounding() {
            sink.release();
            self.state = VoiceState::Idle;
        }
    }
}

impl Default for VoiceController {
    fn default() -> Self {
        Self::new(ControllerConfig::default())
    }
}

#[inline]
fn velocity(volume: f32) -> f32 {
    (volume / FULL_VELOCITY_RMS).sqrt().clamp(MIN_VELOCITY, 1.0)
}
