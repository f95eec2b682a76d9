//! Live audio session on top of CPAL.
//!
//! An [`AudioContext`] is constructed and owned by the caller; there is no
//! process-wide audio singleton. Lifecycle:
//!
//! ```text
//! Created --init--> Ready --start--> Running --stop--> Stopped --start--> Running
//!                                                      \--dispose (any state)
//! ```
//!
//! - `init` acquires the output device, builds the voice and starts the
//!   output stream (silent until something plucks).
//! - `start` opens the input stream and spawns the control thread that turns
//!   captured frames into voice commands and [`PitchReading`]s.
//! - `stop` drops the input stream synchronously and releases the voice. The
//!   output keeps running so the release tail is heard.
//! - `dispose` tears everything down.
//!
//! A failing `init` or `start` leaves the context in its previous state with
//! no device resources held.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};

use crate::capture::{CaptureReceiver, CaptureRenderer, CaptureScheduler, PlatformCapabilities, CaptureMode};
use crate::config::{ConfigStore, ResolvedConfig};
use crate::error::{ContextError, DeviceError};
use crate::latency::{HardwareLatencyProbe, LatencyBudget, LatencyCoordinator, LatencyInfo};
use crate::notes::NoteEvent;
use crate::pipeline::{FrameProcessor, PitchReading};
use crate::synth::{SynthControl, SynthSink, SynthesisEngine};

/// Queued synth commands between control and render.
const COMMAND_CAPACITY: usize = 256;
/// Readings buffered for the consumer before new ones are dropped.
const READING_CAPACITY: usize = 512;
/// Longest chunk the output callback renders at once.
const MAX_RENDER_FRAMES: usize = 4096;
/// Control thread idle sleep when no frame is pending.
const CONTROL_IDLE: Duration = Duration::from_millis(2);
/// How often the control thread reports drops and latency.
const HEALTH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ContextState {
    Created,
    Ready,
    Running,
    Stopped,
}

impl ContextState {
    pub const fn name(self) -> &'static str {
        match self {
            ContextState::Created => "created",
            ContextState::Ready => "ready",
            ContextState::Running => "running",
            ContextState::Stopped => "stopped",
        }
    }
}

/// Which devices to open. `None` picks the host default.
#[derive(Clone, Debug, Default)]
pub struct DeviceSelection {
    pub input: Option<String>,
    pub output: Option<String>,
    pub sample_rate: Option<u32>,
}

/// Device names known to the default host.
#[derive(Clone, Debug, Default)]
pub struct DeviceList {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub default_input: Option<String>,
    pub default_output: Option<String>,
}

pub fn list_devices() -> Result<DeviceList, DeviceError> {
    let host = cpal::default_host();
    let mut list = DeviceList::default();
    for d in host.input_devices()? {
        list.inputs.push(d.name()?);
    }
    for d in host.output_devices()? {
        list.outputs.push(d.name()?);
    }
    list.default_input = host.default_input_device().and_then(|d| d.name().ok());
    list.default_output = host.default_output_device().and_then(|d| d.name().ok());
    Ok(list)
}

// ------------------------------- Device selection ---------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Direction {
    Input,
    Output,
}

impl Direction {
    const fn name(self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

fn pick_device(host: &cpal::Host, dir: Direction, name: Option<&str>) -> Result<cpal::Device, DeviceError> {
    if let Some(name) = name {
        let devices: Box<dyn Iterator<Item = cpal::Device>> = match dir {
            Direction::Input => Box::new(host.input_devices()?),
            Direction::Output => Box::new(host.output_devices()?),
        };
        for d in devices {
            if d.name()? == name {
                return Ok(d);
            }
        }
        return Err(DeviceError::NotFound { kind: dir.name(), name: name.to_string() });
    }
    let default = match dir {
        Direction::Input => host.default_input_device(),
        Direction::Output => host.default_output_device(),
    };
    default.ok_or(DeviceError::NoDefaultDevice(dir.name()))
}

/// Default config, or the supported range closest to `req_sr` (mono preferred for input).
fn choose_config(
    device: &cpal::Device,
    dir: Direction,
    req_sr: Option<u32>,
) -> Result<cpal::SupportedStreamConfig, DeviceError> {
    let default = match dir {
        Direction::Input => device.default_input_config()?,
        Direction::Output => device.default_output_config()?,
    };
    let Some(sr) = req_sr else {
        return Ok(default);
    };
    if default.sample_rate().0 == sr {
        return Ok(default);
    }

    let ranges: Vec<cpal::SupportedStreamConfigRange> = match dir {
        Direction::Input => device.supported_input_configs()?.collect(),
        Direction::Output => device.supported_output_configs()?.collect(),
    };
    let mut best: Option<(u64, cpal::SupportedStreamConfigRange)> = None;
    for range in ranges {
        let sr_min = range.min_sample_rate().0;
        let sr_max = range.max_sample_rate().0;
        let sr_pen = if (sr_min..=sr_max).contains(&sr) {
            0
        } else {
            u64::from(sr_min.abs_diff(sr).min(sr_max.abs_diff(sr)))
        };
        let ch_pen = match dir {
            Direction::Input => u64::from(range.channels().saturating_sub(1)),
            Direction::Output => u64::from(range.channels().abs_diff(default.channels())),
        };
        let fmt_pen = u64::from(range.sample_format() != cpal::SampleFormat::F32);
        let score = sr_pen.saturating_mul(1000) + ch_pen * 10 + fmt_pen;
        if best.as_ref().map_or(true, |(s, _)| score < *s) {
            best = Some((score, range));
        }
    }

    let (_, range) = best.ok_or(DeviceError::NoConfig(dir.name()))?;
    let pick = sr.clamp(range.min_sample_rate().0, range.max_sample_rate().0);
    Ok(range.with_sample_rate(cpal::SampleRate(pick)))
}

/// Can the device run the fixed 128-frame callbacks real-time capture needs?
fn supports_small_blocks(config: &cpal::SupportedStreamConfig) -> bool {
    let block = u32::try_from(CaptureMode::RealTime.block_size()).unwrap_or(u32::MAX);
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => (*min..=*max).contains(&block),
        cpal::SupportedBufferSize::Unknown => false,
    }
}

// ------------------------------- Streams ------------------------------------------

fn build_output<T>(
    device: &cpal::Device,
    cfg: &cpal::StreamConfig,
    mut synth: SynthesisEngine,
    probe: HardwareLatencyProbe,
) -> Result<cpal::Stream, DeviceError>
where
    T: cpal::Sample + cpal::FromSample<f32> + cpal::SizedSample + Send + 'static,
{
    let channels = usize::from(cfg.channels.max(1));
    let mut scratch = vec![0.0f32; MAX_RENDER_FRAMES];

    let stream = device.build_output_stream(
        cfg,
        move |output: &mut [T], info: &cpal::OutputCallbackInfo| {
            let ts = info.timestamp();
            if let Some(latency) = ts.playback.duration_since(&ts.callback) {
                probe.report(latency);
            }
            for chunk in output.chunks_mut(channels * MAX_RENDER_FRAMES) {
                let mono = &mut scratch[..chunk.len() / channels];
                synth.render(mono);
                for (frame, s) in chunk.chunks_mut(channels).zip(mono.iter()) {
                    let v = T::from_sample((*s).clamp(-1.0, 1.0));
                    for ch in frame.iter_mut() {
                        *ch = v;
                    }
                }
            }
        },
        |e| tracing::error!(error = %e, "output stream error"),
        None,
    )?;
    Ok(stream)
}

fn build_input<T>(
    device: &cpal::Device,
    cfg: &cpal::StreamConfig,
    mut capture: CaptureRenderer,
) -> Result<cpal::Stream, DeviceError>
where
    T: cpal::Sample + cpal::SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    let channels = usize::from(cfg.channels.max(1));
    #[allow(clippy::cast_precision_loss)]
    let norm = 1.0 / channels as f32;

    let stream = device.build_input_stream(
        cfg,
        move |input: &[T], _: &cpal::InputCallbackInfo| {
            // downmix to mono
            capture.push_samples(
                input
                    .chunks(channels)
                    .map(|frame| frame.iter().map(|x| <f32 as cpal::Sample>::from_sample(*x)).sum::<f32>() * norm),
            );
        },
        |e| tracing::error!(error = %e, "input stream error"),
        None,
    )?;
    Ok(stream)
}

// ------------------------------- Control thread -----------------------------------

fn lock(control: &Mutex<SynthControl>) -> MutexGuard<'_, SynthControl> {
    control.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ControlLoop {
    receiver: CaptureReceiver,
    processor: FrameProcessor,
    control: Arc<Mutex<SynthControl>>,
    stop: Arc<AtomicBool>,
    readings: Sender<PitchReading>,
    notes: Sender<NoteEvent>,
    latency: LatencyCoordinator,
}

impl ControlLoop {
    fn run(mut self) {
        let mut last_health = Instant::now();
        let mut last_budget = LatencyBudget::WithinTarget;
        let mut last_time = 0.0;

        while !self.stop.load(Ordering::Acquire) {
            let mut handled = 0usize;
            {
                let mut ctl = lock(&self.control);
                while let Some(reading) = self.processor.poll(&mut self.receiver, &mut *ctl) {
                    last_time = reading.time;
                    // nobody listening or consumer behind: readings are advisory
                    let _ = self.readings.try_send(reading);
                    handled += 1;
                }
            }
            self.flush_notes();

            if last_health.elapsed() >= HEALTH_INTERVAL {
                self.receiver.report_drops();
                let info = self.latency.current_latency();
                let budget = info.budget();
                if budget != last_budget {
                    match budget {
                        LatencyBudget::WithinTarget => tracing::info!(total_ms = info.total_ms(), "latency back within target"),
                        LatencyBudget::OverTarget => tracing::warn!(total_ms = info.total_ms(), "latency over target"),
                        LatencyBudget::OverCeiling => tracing::error!(total_ms = info.total_ms(), "latency over ceiling"),
                    }
                    last_budget = budget;
                }
                last_health = Instant::now();
            }

            if handled == 0 {
                std::thread::sleep(CONTROL_IDLE);
            }
        }

        self.processor.stop(last_time, &mut *lock(&self.control));
        self.flush_notes();
        tracing::debug!(stats = ?self.processor.corrector().stats(), "control loop finished");
    }

    fn flush_notes(&mut self) {
        for note in self.processor.take_note_events() {
            let _ = self.notes.send(note);
        }
    }
}

// ------------------------------- Context ------------------------------------------

struct Session {
    input_device: cpal::Device,
    input_config: cpal::StreamConfig,
    input_format: cpal::SampleFormat,
    scheduler: CaptureScheduler,
    latency: LatencyCoordinator,
    control: Arc<Mutex<SynthControl>>,
    // dropped last: keeps playing through stop for the release tail
    _output: cpal::Stream,
}

struct Running {
    input: cpal::Stream,
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

pub struct AudioContext {
    config: ResolvedConfig,
    selection: DeviceSelection,
    store: ConfigStore,
    state: ContextState,
    session: Option<Session>,
    running: Option<Running>,
    readings_tx: Sender<PitchReading>,
    readings_rx: Receiver<PitchReading>,
    notes_tx: Sender<NoteEvent>,
    notes_rx: Receiver<NoteEvent>,
}

impl AudioContext {
    pub fn new(config: ResolvedConfig, selection: DeviceSelection) -> Self {
        for issue in &config.issues {
            tracing::warn!(%issue, "configuration");
        }
        let (readings_tx, readings_rx) = crossbeam_channel::bounded(READING_CAPACITY);
        let (notes_tx, notes_rx) = crossbeam_channel::unbounded();
        Self {
            store: ConfigStore::from_resolved(&config),
            config,
            selection,
            state: ContextState::Created,
            session: None,
            running: None,
            readings_tx,
            readings_rx,
            notes_tx,
            notes_rx,
        }
    }

    #[inline] pub fn state(&self) -> ContextState { self.state }

    /// Runtime configuration (scale, key, amount, resonance, damping, volume).
    #[inline] pub fn config_store(&self) -> &ConfigStore { &self.store }

    /// Stream of per-frame readings. Readings are dropped while the channel is full.
    pub fn readings(&self) -> Receiver<PitchReading> {
        self.readings_rx.clone()
    }

    /// Completed notes so far.
    pub fn take_note_events(&self) -> Vec<NoteEvent> {
        self.notes_rx.try_iter().collect()
    }

    pub fn mode(&self) -> Option<CaptureMode> {
        self.session.as_ref().map(|s| s.scheduler.mode())
    }

    /// Latency breakdown; `None` before `init`.
    pub fn latency(&self) -> Option<LatencyInfo> {
        self.session.as_ref().map(|s| s.latency.current_latency())
    }

    /// Acquire devices, build the voice and start the output stream.
    pub fn init(&mut self) -> Result<(), ContextError> {
        self.expect_state(&[ContextState::Created], "created")?;

        let host = cpal::default_host();
        let out_dev = pick_device(&host, Direction::Output, self.selection.output.as_deref())?;
        let out_sup = choose_config(&out_dev, Direction::Output, self.selection.sample_rate)?;
        let out_sr = out_sup.sample_rate().0;
        let in_dev = pick_device(&host, Direction::Input, self.selection.input.as_deref())?;
        let in_sup = choose_config(&in_dev, Direction::Input, Some(out_sr))?;

        let caps = PlatformCapabilities {
            small_fixed_blocks: supports_small_blocks(&in_sup),
            sample_rate: in_sup.sample_rate().0,
        };
        let scheduler = CaptureScheduler::select(&caps, self.config.detector);
        let latency = LatencyCoordinator::new(scheduler.mode(), caps.sample_rate);

        let mut input_config = in_sup.config();
        if scheduler.mode() == CaptureMode::RealTime {
            #[allow(clippy::cast_possible_truncation)]
            let block = scheduler.block_size() as u32;
            input_config.buffer_size = cpal::BufferSize::Fixed(block);
        }
        let out_cfg = out_sup.config();

        #[allow(clippy::cast_precision_loss)]
        let mut synth = SynthesisEngine::with_shared_params(out_sr as f32, self.store.synth_handle())?;
        let control = synth.control(COMMAND_CAPACITY);
        let probe = latency.probe();

        let output = match out_sup.sample_format() {
            cpal::SampleFormat::F32 => build_output::<f32>(&out_dev, &out_cfg, synth, probe)?,
            cpal::SampleFormat::I16 => build_output::<i16>(&out_dev, &out_cfg, synth, probe)?,
            cpal::SampleFormat::U16 => build_output::<u16>(&out_dev, &out_cfg, synth, probe)?,
            other => return Err(DeviceError::UnsupportedFormat(other).into()),
        };
        output.play().map_err(DeviceError::from)?;

        tracing::info!(
            output = %out_dev.name().unwrap_or_default(),
            input = %in_dev.name().unwrap_or_default(),
            sample_rate = out_sr,
            mode = scheduler.mode().name(),
            "audio context ready"
        );

        self.session = Some(Session {
            input_device: in_dev,
            input_format: in_sup.sample_format(),
            input_config,
            scheduler,
            latency,
            control: Arc::new(Mutex::new(control)),
            _output: output,
        });
        self.state = ContextState::Ready;
        Ok(())
    }

    /// Open the microphone and start the control thread.
    pub fn start(&mut self) -> Result<(), ContextError> {
        self.expect_state(&[ContextState::Ready, ContextState::Stopped], "ready or stopped")?;
        let Some(session) = self.session.as_ref() else {
            return Err(self.invalid("ready or stopped"));
        };

        let (capture, receiver) = session.scheduler.build();
        let dev = &session.input_device;
        let cfg = &session.input_config;
        let input = match session.input_format {
            cpal::SampleFormat::F32 => build_input::<f32>(dev, cfg, capture)?,
            cpal::SampleFormat::I16 => build_input::<i16>(dev, cfg, capture)?,
            cpal::SampleFormat::U16 => build_input::<u16>(dev, cfg, capture)?,
            other => return Err(DeviceError::UnsupportedFormat(other).into()),
        };

        let stop = Arc::new(AtomicBool::new(false));
        let worker = ControlLoop {
            receiver,
            processor: FrameProcessor::new(&self.config, &self.store, *session.scheduler.detector_config()),
            control: Arc::clone(&session.control),
            stop: Arc::clone(&stop),
            readings: self.readings_tx.clone(),
            notes: self.notes_tx.clone(),
            latency: session.latency.clone(),
        };
        let thread = std::thread::Builder::new()
            .name("voxpluck-control".into())
            .spawn(move || worker.run())
            .map_err(DeviceError::ControlThread)?;

        if let Err(e) = input.play() {
            stop.store(true, Ordering::Release);
            let _ = thread.join();
            return Err(DeviceError::from(e).into());
        }

        tracing::info!(mode = session.scheduler.mode().name(), "capture started");
        self.running = Some(Running { input, stop, thread });
        self.state = ContextState::Running;
        Ok(())
    }

    /// Stop capturing and release the voice. The output keeps playing the tail.
    pub fn stop(&mut self) -> Result<(), ContextError> {
        self.expect_state(&[ContextState::Running], "running")?;
        self.halt();
        self.state = ContextState::Stopped;
        Ok(())
    }

    /// Manual pluck on the live voice.
    pub fn attack(&self, frequency: f32, velocity: f32) -> Result<(), ContextError> {
        let session = self.session.as_ref().ok_or_else(|| self.invalid("initialised"))?;
        lock(&session.control).attack(frequency, velocity);
        Ok(())
    }

    pub fn release(&self) -> Result<(), ContextError> {
        let session = self.session.as_ref().ok_or_else(|| self.invalid("initialised"))?;
        lock(&session.control).release();
        Ok(())
    }

    /// Tear the session down. The context cannot be used afterwards.
    pub fn dispose(mut self) {
        self.shutdown();
    }

    fn halt(&mut self) {
        let Some(running) = self.running.take() else { return };
        drop(running.input);
        running.stop.store(true, Ordering::Release);
        if running.thread.join().is_err() {
            tracing::error!("control thread panicked");
        }
        if let Some(session) = &self.session {
            lock(&session.control).release();
        }
        tracing::info!("capture stopped");
    }

    fn shutdown(&mut self) {
        self.halt();
        if self.session.take().is_some() {
            tracing::info!("audio context disposed");
        }
    }

    fn expect_state(&self, allowed: &[ContextState], expected: &'static str) -> Result<(), ContextError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(self.invalid(expected))
        }
    }

    fn invalid(&self, expected: &'static str) -> ContextError {
        ContextError::InvalidState { expected, actual: self.state.name() }
    }
}

impl Drop for AudioContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
