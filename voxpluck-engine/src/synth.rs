//! Karplus-Strong plucked-string voice.
//!
//! Signal path (built once as a [`StageGraph`]):
//!
//! ```text
//! noise -> excitation LP -> gate (pluck envelope) -> string loop -> body LP -> output gain
//! ```
//!
//! The graph output is soft-clipped before the master volume, which bounds
//! the voice when repeated plucks pile up near full resonance.
//!
//! The engine runs on the render path. It is driven either directly (offline
//! rendering, tests, the C ABI) or through a [`SynthControl`] handle that
//! pushes [`SynthCommand`]s over an SPSC ring. Continuous parameters
//! (resonance, damping, volume) live in an atomically swapped [`SynthParams`]
//! that the engine reads once at the start of every block, and again when an
//! attack is triggered so the pluck starts at the configured resonance.
//!
//! Timed events (`trigger_attack`, `trigger_release`) carry engine time in
//! seconds. Events at or before the current time apply immediately; later ones
//! wait in a fixed-capacity schedule, so rendering never allocates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use ringbuf::traits::{Consumer as _, Producer as _, Split as _};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use voxpluck_core::delay::MIN_DELAY_SAMPLES;
use voxpluck_core::dsp::soft_clip;
use voxpluck_core::envelopes::{Param, PluckEnvelope};
use voxpluck_core::filters::{OnePoleLP, SvfTpt};

use crate::config::{update_shared, SharedConfig};
use crate::error::GraphError;
use crate::graph::{Generator, StageGraph, StageId};
use crate::nodes::{Node, NoiseBurst, StringLoop};
use crate::tuning::is_valid_frequency;

/// Excitation attack to `velocity`.
pub const ATTACK_MS: f32 = 5.0;
/// Excitation decay to ~0 after the attack.
pub const PLUCK_DECAY_MS: f32 = 50.0;
/// `trigger_release`: feedback ramp to 0.
pub const RELEASE_FEEDBACK_SECS: f32 = 0.1;
/// `trigger_release`: output gain ramp to 0.
pub const RELEASE_OUTPUT_SECS: f32 = 0.2;
/// Pending timed events the engine can hold.
pub const SCHEDULE_CAPACITY: usize = 32;

const EXCITATION_LOWPASS_HZ: f32 = 3000.0;
const BODY_LOWPASS_HZ: f32 = 5000.0;
const PARAM_SMOOTHING_SECS: f32 = 0.02;
const NOISE_SEED: u64 = 0x5EED_CAFE;

/// Continuous voice parameters, replaced as a whole value.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SynthParams {
    /// Loop feedback gain, `[0, 0.9999]`.
    pub resonance: f32,
    /// Damping low-pass cutoff (brightness), Hz.
    pub damping_hz: f32,
    /// Master volume, `[0, 1]`.
    pub volume: f32,
}

impl SynthParams {
    pub const MAX_RESONANCE: f32 = 0.9999;

    pub fn sanitized(self) -> Self {
        let d = Self::default();
        let pick = |v: f32, lo: f32, hi: f32, fallback: f32| if v.is_finite() { v.clamp(lo, hi) } else { fallback };
        Self {
            resonance: pick(self.resonance, 0.0, Self::MAX_RESONANCE, d.resonance),
            damping_hz: pick(self.damping_hz, 100.0, 20_000.0, d.damping_hz),
            volume: pick(self.volume, 0.0, 1.0, d.volume),
        }
    }
}

impl Default for SynthParams {
    fn default() -> Self {
        Self { resonance: 0.995, damping_hz: 6000.0, volume: 0.8 }
    }
}

/// Observable state of the voice.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SynthVoice {
    /// Frequency implied by the current delay length (`1/delay`).
    pub current_frequency: f32,
    /// Loop feedback (resonance) right now.
    pub feedback_gain: f32,
    pub output_gain: f32,
    pub damping_cutoff: f32,
}

/// Messages from the control path to the render path.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum SynthCommand {
    Attack { frequency: f32, time: f64, velocity: f32 },
    Release { time: f64 },
    Glide { frequency: f32, ramp: f32 },
}

/// Anything that accepts voice events: the engine itself or a remote control handle.
pub trait SynthSink {
    fn attack(&mut self, frequency: f32, velocity: f32);
    fn release(&mut self);
    fn glide(&mut self, frequency: f32, ramp_secs: f32);
}

// ------------------------------- Event schedule -----------------------------------

#[derive(Copy, Clone, Debug, PartialEq)]
enum TimedEvent {
    Attack { frequency: f32, velocity: f32 },
    Release,
}

#[derive(Copy, Clone, Debug)]
struct Pending {
    at: u64,
    seq: u64,
    event: TimedEvent,
}

/// Fixed-capacity list of future events, popped in `(time, arrival)` order.
#[derive(Clone, Debug)]
struct EventSchedule {
    slots: [Option<Pending>; SCHEDULE_CAPACITY],
    seq: u64,
    next_due: u64,
}

impl EventSchedule {
    fn new() -> Self {
        Self { slots: [None; SCHEDULE_CAPACITY], seq: 0, next_due: u64::MAX }
    }

    fn push(&mut self, at: u64, event: TimedEvent) -> bool {
        let Some(slot) = self.slots.iter_mut().find(|s| s.is_none()) else {
            return false;
        };
        *slot = Some(Pending { at, seq: self.seq, event });
        self.seq += 1;
        self.next_due = self.next_due.min(at);
        true
    }

    #[inline]
    fn pop_due(&mut self, now: u64) -> Option<TimedEvent> {
        if now < self.next_due {
            return None;
        }
        let mut best: Option<usize> = None;
        for (i, p) in self.slots.iter().enumerate() {
            let Some(p) = p else { continue };
            if p.at > now {
                continue;
            }
            let earlier = match best.and_then(|b| self.slots[b]) {
                Some(b) => (p.at, p.seq) < (b.at, b.seq),
                None => true,
            };
            if earlier {
                best = Some(i);
            }
        }
        let event = best.and_then(|i| self.slots[i].take()).map(|p| p.event);
        self.next_due = self.slots.iter().flatten().map(|p| p.at).min().unwrap_or(u64::MAX);
        event
    }

    fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }
}

// ------------------------------- Engine -------------------------------------------

#[derive(Copy, Clone, Debug)]
struct VoiceStages {
    gate: StageId,
    string: StageId,
    out: StageId,
}

pub struct SynthesisEngine {
    graph: StageGraph<Node>,
    stages: VoiceStages,
    params: SharedConfig<SynthParams>,
    applied: SynthParams,
    volume: Param,
    schedule: EventSchedule,
    commands: Option<HeapCons<SynthCommand>>,
    clock: Arc<AtomicU64>,
    frequency: f32,
    held: bool,
    sample_index: u64,
    sr: f32,
    dropped_events: u64,
}

impl SynthesisEngine {
    /// Engine with private parameters.
    pub fn new(sr: f32, params: SynthParams) -> Result<Self, GraphError> {
        Self::with_shared_params(sr, Arc::new(ArcSwap::from_pointee(params.sanitized())))
    }

    /// Engine reading its parameters from a shared handle (see [`ConfigStore`](crate::config::ConfigStore)).
    pub fn with_shared_params(sr: f32, params: SharedConfig<SynthParams>) -> Result<Self, GraphError> {
        let sr = sr.max(1.0);
        let initial = params.load().sanitized();
        let (graph, stages) = build_voice(sr, &initial)?;
        Ok(Self {
            graph,
            stages,
            params,
            applied: initial,
            volume: Param::new(initial.volume, sr),
            schedule: EventSchedule::new(),
            commands: None,
            clock: Arc::new(AtomicU64::new(0)),
            frequency: 220.0,
            held: false,
            sample_index: 0,
            sr,
            dropped_events: 0,
        })
    }

    /// Create the command ring and return the control-side handle. Replaces any
    /// previous handle; commands still queued on the old ring are discarded.
    pub fn control(&mut self, capacity: usize) -> SynthControl {
        let (tx, rx) = HeapRb::<SynthCommand>::new(capacity.max(1)).split();
        self.commands = Some(rx);
        SynthControl {
            commands: tx,
            params: Arc::clone(&self.params),
            clock: Arc::clone(&self.clock),
            sr: self.sr,
            dropped: 0,
        }
    }

    /// Pluck: feedback := resonance and output gain := 1 unconditionally,
    /// delay := `1/frequency`, excitation envelope to `velocity`.
    /// Invalid frequencies are ignored.
    pub fn trigger_attack(&mut self, frequency: f32, time: f64, velocity: f32) {
        if !is_valid_frequency(frequency) {
            return;
        }
        let velocity = if velocity.is_finite() { velocity.clamp(0.0, 1.0) } else { 1.0 };
        self.refresh_params();
        self.dispatch(time, TimedEvent::Attack { frequency, velocity });
    }

    /// Ramp feedback to 0 over 100 ms and output gain to 0 over 200 ms.
    /// Filter and delay state are kept so the next attack revives the string.
    pub fn trigger_release(&mut self, time: f64) {
        self.dispatch(time, TimedEvent::Release);
    }

    /// Glide the delay length to `1/frequency` over `ramp_time` seconds without
    /// re-exciting the string or touching the gains. Invalid frequencies are ignored.
    pub fn set_frequency(&mut self, frequency: f32, ramp_time: f32) {
        if !is_valid_frequency(frequency) {
            return;
        }
        let secs = self.clamp_delay_secs(1.0 / frequency);
        if let Some(s) = self.string_mut() {
            s.delay().ramp_to(secs, ramp_time);
        }
        self.frequency = 1.0 / secs;
    }

    pub fn set_resonance(&self, resonance: f32) {
        update_shared(&self.params, |p| p.resonance = resonance);
    }

    pub fn set_damping(&self, damping_hz: f32) {
        update_shared(&self.params, |p| p.damping_hz = damping_hz);
    }

    pub fn set_volume(&self, volume: f32) {
        update_shared(&self.params, |p| p.volume = volume);
    }

    pub fn params(&self) -> SynthParams {
        **self.params.load()
    }

    /// Change the sample rate. Clears the string and pending events.
    pub fn set_sample_rate(&mut self, sr: f32) {
        let sr = sr.max(1.0);
        let t = self.time();
        self.sr = sr;
        self.graph.reset(sr);
        self.volume.set_sample_rate(sr);
        self.schedule = EventSchedule::new();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            self.sample_index = (t * f64::from(sr)).round() as u64;
        }
        self.clock.store(self.sample_index, Ordering::Release);
    }

    /// Engine time in seconds (samples rendered / sample rate).
    #[inline]
    #[allow(clippy::cast_precision_loss)]
    pub fn time(&self) -> f64 {
        self.sample_index as f64 / f64::from(self.sr)
    }

    #[inline] pub fn sample_rate(&self) -> f32 { self.sr }

    /// Timed events refused because the schedule was full.
    #[inline] pub fn dropped_events(&self) -> u64 { self.dropped_events }

    /// Timed events waiting for their start time.
    #[inline] pub fn pending_events(&self) -> usize { self.schedule.len() }

    pub fn voice(&self) -> SynthVoice {
        let (delay, feedback, damping) = match self.graph.stage(self.stages.string) {
            Some(Node::String(s)) => (s.delay_secs(), s.feedback_gain(), s.damping_hz()),
            _ => (1.0 / self.frequency, 0.0, self.applied.damping_hz),
        };
        let output_gain = match self.graph.stage(self.stages.out) {
            Some(Node::Gain(p)) => p.value(),
            _ => 0.0,
        };
        SynthVoice {
            current_frequency: if delay > 0.0 { 1.0 / delay } else { 0.0 },
            feedback_gain: feedback,
            output_gain,
            damping_cutoff: damping,
        }
    }

    /// Render one mono block. Reads the parameters and drains the command ring
    /// once, then applies due events sample-accurately.
    pub fn render(&mut self, out: &mut [f32]) {
        self.begin_block();
        for s in out.iter_mut() {
            while let Some(event) = self.schedule.pop_due(self.sample_index) {
                self.apply(event);
            }
            *s = soft_clip(self.graph.next()) * self.volume.next();
            self.sample_index += 1;
        }
        self.clock.store(self.sample_index, Ordering::Release);
    }

    /// Tear the voice down. The engine cannot be used afterwards.
    pub fn dispose(self) {
        tracing::debug!(
            time = self.time(),
            pending = self.schedule.len(),
            "synthesis engine disposed"
        );
    }

    fn begin_block(&mut self) {
        if let Some(mut rx) = self.commands.take() {
            while let Some(cmd) = rx.try_pop() {
                match cmd {
                    SynthCommand::Attack { frequency, time, velocity } => self.trigger_attack(frequency, time, velocity),
                    SynthCommand::Release { time } => self.trigger_release(time),
                    SynthCommand::Glide { frequency, ramp } => self.set_frequency(frequency, ramp),
                }
            }
            self.commands = Some(rx);
        }
        self.refresh_params();
    }

    fn refresh_params(&mut self) {
        let params = **self.params.load();
        if params != self.applied {
            self.apply_params(params);
        }
    }

    fn apply_params(&mut self, params: SynthParams) {
        let held = self.held;
        if let Some(s) = self.string_mut() {
            s.set_damping_hz(params.damping_hz);
            if held {
                s.feedback().ramp_to(params.resonance, PARAM_SMOOTHING_SECS);
            }
        }
        self.volume.ramp_to(params.volume, PARAM_SMOOTHING_SECS);
        self.applied = params;
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn dispatch(&mut self, time: f64, event: TimedEvent) {
        let at = if time.is_finite() && time > 0.0 {
            (time * f64::from(self.sr)).round() as u64
        } else {
            0
        };
        if at <= self.sample_index {
            self.apply(event);
        } else if !self.schedule.push(at, event) {
            self.dropped_events += 1;
        }
    }

    fn apply(&mut self, event: TimedEvent) {
        match event {
            TimedEvent::Attack { frequency, velocity } => {
                let resonance = self.applied.resonance;
                let secs = self.clamp_delay_secs(1.0 / frequency);
                if let Some(s) = self.string_mut() {
                    s.feedback().set_immediate(resonance);
                    s.delay().set_immediate(secs);
                }
                if let Some(Node::Gain(out)) = self.graph.stage_mut(self.stages.out) {
                    out.set_immediate(1.0);
                }
                if let Some(Node::Gate(env)) = self.graph.stage_mut(self.stages.gate) {
                    env.trigger(velocity);
                }
                self.frequency = 1.0 / secs;
                self.held = true;
            }
            TimedEvent::Release => {
                if let Some(s) = self.string_mut() {
                    s.feedback().ramp_to(0.0, RELEASE_FEEDBACK_SECS);
                }
                if let Some(Node::Gain(out)) = self.graph.stage_mut(self.stages.out) {
                    out.ramp_to(0.0, RELEASE_OUTPUT_SECS);
                }
                self.held = false;
            }
        }
    }

    fn clamp_delay_secs(&self, secs: f32) -> f32 {
        let min = MIN_DELAY_SAMPLES / self.sr;
        let max = match self.graph.stage(self.stages.string) {
            Some(Node::String(s)) => s.max_delay_secs(),
            _ => min,
        };
        secs.clamp(min, max.max(min))
    }

    fn string_mut(&mut self) -> Option<&mut StringLoop> {
        match self.graph.stage_mut(self.stages.string) {
            Some(Node::String(s)) => Some(s),
            _ => None,
        }
    }
}

impl SynthSink for SynthesisEngine {
    fn attack(&mut self, frequency: f32, velocity: f32) {
        let now = self.time();
        self.trigger_attack(frequency, now, velocity);
    }

    fn release(&mut self) {
        let now = self.time();
        self.trigger_release(now);
    }

    fn glide(&mut self, frequency: f32, ramp_secs: f32) {
        self.set_frequency(frequency, ramp_secs);
    }
}

fn build_voice(sr: f32, params: &SynthParams) -> Result<(StageGraph<Node>, VoiceStages), GraphError> {
    let mut graph = StageGraph::new(sr);
    let noise = graph.add_stage(Node::Noise(NoiseBurst::new(NOISE_SEED)));
    let excite = graph.add_stage(Node::Lowpass(OnePoleLP::new(EXCITATION_LOWPASS_HZ, sr)));
    let gate = graph.add_stage(Node::Gate(PluckEnvelope::new(ATTACK_MS, PLUCK_DECAY_MS, sr)));
    let string = graph.add_stage(Node::String(StringLoop::new(220.0, 0.0, params.damping_hz, sr)));
    let body = graph.add_stage(Node::Body(SvfTpt::new(BODY_LOWPASS_HZ, core::f32::consts::FRAC_1_SQRT_2, sr)));
    let out = graph.add_stage(Node::Gain(Param::new(0.0, sr)));

    graph.connect(noise, excite)?;
    graph.connect(excite, gate)?;
    graph.connect(gate, string)?;
    graph.connect(string, body)?;
    graph.connect(body, out)?;
    graph.set_output(out)?;
    Ok((graph, VoiceStages { gate, string, out }))
}

// ------------------------------- Control handle -----------------------------------

/// Control-path handle for a [`SynthesisEngine`] living on the render path.
pub struct SynthControl {
    commands: HeapProd<SynthCommand>,
    params: SharedConfig<SynthParams>,
    clock: Arc<AtomicU64>,
    sr: f32,
    dropped: u64,
}

impl SynthControl {
    /// Engine time as of the last rendered block.
    #[allow(clippy::cast_precision_loss)]
    pub fn now(&self) -> f64 {
        self.clock.load(Ordering::Acquire) as f64 / f64::from(self.sr)
    }

    /// Queue a command. Returns `false` (and counts a drop) when the ring is full.
    pub fn send(&mut self, command: SynthCommand) -> bool {
        if self.commands.try_push(command).is_ok() {
            true
        } else {
            self.dropped += 1;
            false
        }
    }

    pub fn set_resonance(&self, resonance: f32) {
        update_shared(&self.params, |p| p.resonance = resonance);
    }

    pub fn set_damping(&self, damping_hz: f32) {
        update_shared(&self.params, |p| p.damping_hz = damping_hz);
    }

    pub fn set_volume(&self, volume: f32) {
        update_shared(&self.params, |p| p.volume = volume);
    }

    pub fn params(&self) -> SynthParams {
        **self.params.load()
    }

    #[inline] pub fn dropped_commands(&self) -> u64 { self.dropped }
}

impl SynthSink for SynthControl {
    fn attack(&mut self, frequency: f32, velocity: f32) {
        if is_valid_frequency(frequency) {
            let time = self.now();
            self.send(SynthCommand::Attack { frequency, time, velocity });
        }
    }

    fn release(&mut self) {
        let time = self.now();
        self.send(SynthCommand::Release { time });
    }

    fn glide(&mut self, frequency: f32, ramp_secs: f32) {
        if is_valid_frequency(frequency) {
            self.send(SynthCommand::Glide { frequency, ramp: ramp_secs });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 44_100.0;

    fn engine() -> SynthesisEngine {
        SynthesisEngine::new(SR, SynthParams::default()).expect("voice graph")
    }

    fn render_secs(e: &mut SynthesisEngine, secs: f32) -> f32 {
        let mut buf = vec![0.0; (secs * SR) as usize];
        e.render(&mut buf);
        buf.iter().fold(0.0f32, |m, x| m.max(x.abs()))
    }

    #[test]
    fn attack_release_attack_revives_the_voice() {
        let mut e = engine();
        let resonance = e.params().resonance;

        e.trigger_attack(220.0, e.time(), 1.0);
        assert!(render_secs(&mut e, 0.1) > 0.01);

        e.trigger_release(e.time());
        render_secs(&mut e, 0.3);
        let released = e.voice();
        assert_eq!(released.feedback_gain, 0.0);
        assert_eq!(released.output_gain, 0.0);

        e.trigger_attack(220.0, e.time(), 1.0);
        let v = e.voice();
        assert_eq!(v.feedback_gain, resonance);
        assert_eq!(v.output_gain, 1.0);
        assert!(render_secs(&mut e, 0.05) > 0.01, "second pluck is silent");
    }

    #[test]
    fn release_keeps_delay_and_damping() {
        let mut e = engine();
        e.trigger_attack(330.0, 0.0, 0.8);
        render_secs(&mut e, 0.05);
        let before = e.voice();
        e.trigger_release(e.time());
        render_secs(&mut e, 0.3);
        let after = e.voice();
        assert_eq!(before.current_frequency, after.current_frequency);
        assert_eq!(before.damping_cutoff, after.damping_cutoff);
    }

    #[test]
    fn glide_is_continuous_and_bounded_in_time() {
        let mut e = engine();
        e.trigger_attack(220.0, 0.0, 1.0);
        let from = 1.0 / 220.0f32;
        let to = 1.0 / 330.0f32;
        let ramp = 0.05;
        let n = (ramp * SR).round() as usize;
        e.set_frequency(330.0, ramp);

        let max_step = (from - to).abs() / n as f32 * 1.01 + 1e-7;
        let mut prev = 1.0 / e.voice().current_frequency;
        let mut one = [0.0f32; 1];
        for i in 0..n {
            e.render(&mut one);
            let d = 1.0 / e.voice().current_frequency;
            assert!((d - prev).abs() <= max_step, "step {i}: {prev} -> {d}");
            prev = d;
        }
        assert!((prev - to).abs() < 1e-6, "glide did not land: {prev} vs {to}");
        assert_eq!(e.voice().output_gain, 1.0, "glide must not touch gains");
    }

    #[test]
    fn invalid_frequency_is_a_no_op() {
        let mut e = engine();
        e.trigger_attack(220.0, 0.0, 1.0);
        let before = e.voice();
        e.set_frequency(0.0, 0.1);
        e.set_frequency(-5.0, 0.1);
        e.set_frequency(f32::NAN, 0.1);
        e.trigger_attack(f32::INFINITY, 0.0, 1.0);
        assert_eq!(e.voice(), before);
    }

    #[test]
    fn delay_is_clamped_to_line() {
        let mut e = engine();
        e.trigger_attack(5.0, 0.0, 1.0);
        assert!(e.voice().current_frequency > 19.9, "{:?}", e.voice());
        e.trigger_attack(40_000.0, 0.0, 1.0);
        assert!((e.voice().current_frequency - SR / MIN_DELAY_SAMPLES).abs() < 1.0);
    }

    #[test]
    fn future_attack_waits_for_its_time() {
        let mut e = engine();
        e.trigger_attack(220.0, 0.05, 1.0);
        assert_eq!(e.pending_events(), 1);
        assert_eq!(render_secs(&mut e, 0.04), 0.0);
        assert!(render_secs(&mut e, 0.05) > 0.01);
        assert_eq!(e.pending_events(), 0);
    }

    #[test]
    fn full_schedule_drops_events() {
        let mut e = engine();
        for i in 0..(SCHEDULE_CAPACITY + 8) {
            e.trigger_release(1.0 + i as f64);
        }
        assert_eq!(e.pending_events(), SCHEDULE_CAPACITY);
        assert_eq!(e.dropped_events(), 8);
    }

    #[test]
    fn params_apply_at_block_start() {
        let mut e = engine();
        e.set_damping(2500.0);
        assert_eq!(e.voice().damping_cutoff, SynthParams::default().damping_hz);
        render_secs(&mut e, 0.001);
        assert_eq!(e.voice().damping_cutoff, 2500.0);

        e.set_resonance(5.0);
        assert_eq!(e.params().resonance, SynthParams::MAX_RESONANCE);
    }

    #[test]
    fn attack_uses_resonance_set_just_before() {
        let mut e = engine();
        e.set_resonance(0.5);
        e.trigger_attack(220.0, e.time(), 1.0);
        assert_eq!(e.voice().feedback_gain, 0.5);

        let mut ctl = e.control(4);
        ctl.set_resonance(0.7);
        ctl.attack(220.0, 1.0);
        render_secs(&mut e, 0.001);
        assert_eq!(e.voice().feedback_gain, 0.7);
    }

    #[test]
    fn output_stays_bounded_at_full_resonance() {
        let mut e = SynthesisEngine::new(SR, SynthParams { resonance: 1.0, damping_hz: 20_000.0, volume: 1.0 })
            .expect("voice graph");
        let mut peak: f32 = 0.0;
        for _ in 0..20 {
            e.trigger_attack(110.0, e.time(), 1.0);
            peak = peak.max(render_secs(&mut e, 0.02));
        }
        assert!(peak.is_finite() && peak <= 1.0, "peak={peak}");
        assert!(peak > 0.01);
    }

    #[test]
    fn control_handle_drives_the_engine() {
        let mut e = engine();
        let mut ctl = e.control(16);
        ctl.attack(440.0, 1.0);
        ctl.attack(-1.0, 1.0);
        ctl.set_volume(0.5);
        assert!(render_secs(&mut e, 0.05) > 0.0);
        let v = e.voice();
        assert!((v.current_frequency - 440.0).abs() < 0.5, "{v:?}");
        assert_eq!(v.output_gain, 1.0);
        assert!((ctl.now() - 0.05).abs() < 1e-3);

        ctl.release();
        render_secs(&mut e, 0.25);
        assert_eq!(e.voice().output_gain, 0.0);
        assert_eq!(ctl.dropped_commands(), 0);
    }
}
