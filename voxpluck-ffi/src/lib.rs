//! C ABI wrapper for the voxpluck engine.
//!
//! Exposes a device-free session: the host pushes microphone samples, polls
//! pitch readings and renders the plucked-string output.
//!
//! ABI notes
//! - All functions are `extern "C"` and `#[no_mangle]`.
//! - Opaque handle type: `VoxpluckEngine` (heap-allocated; you own/delete it).
//! - Input is downmixed to mono; output is mono duplicated to N channels.
//! - Null handles and null buffers are ignored (functions return 0/false).
//!
//! Threading
//! - The object is NOT thread-safe; call `push_input`/`poll_reading` and
//!   `render` from one thread, or serialise access yourself.

use std::ffi::{c_char, CStr};
use std::time::Duration;

use voxpluck_engine::{CaptureMode, EngineConfig, HumPipeline, NoteEvent, PitchReading, ResolvedConfig};

/// Longest chunk rendered per internal call.
const SCRATCH_FRAMES: usize = 4096;

/// `mode` argument of the constructors.
pub const VOXPLUCK_MODE_REALTIME: u32 = 0;
pub const VOXPLUCK_MODE_FALLBACK: u32 = 1;

/// Opaque engine wrapper we hand to C.
pub struct VoxpluckEngine {
    inner: HumPipeline,
    scratch: Vec<f32>,
    notes: Vec<NoteEvent>,
}

/// One pitch reading. `note` is a NUL-terminated pitch-class label (`""` when unvoiced).
#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct VoxpluckReading {
    pub voiced: bool,
    pub frequency: f32,
    pub target_frequency: f32,
    pub note: [c_char; 4],
    pub octave: i32,
    pub cents: f32,
    pub confidence: f32,
    pub volume: f32,
    pub time: f64,
}

impl From<&PitchReading> for VoxpluckReading {
    fn from(r: &PitchReading) -> Self {
        let mut note = [0 as c_char; 4];
        for (dst, src) in note.iter_mut().zip(r.note.bytes().take(3)) {
            *dst = src as c_char;
        }
        Self {
            voiced: r.is_voiced(),
            frequency: r.frequency.unwrap_or(0.0),
            target_frequency: r.target_frequency.unwrap_or(0.0),
            note,
            octave: r.octave,
            cents: r.cents,
            confidence: r.confidence,
            volume: r.volume,
            time: r.time,
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct VoxpluckLatency {
    /// `VOXPLUCK_MODE_*`.
    pub mode: u32,
    pub buffer_ms: f64,
    pub hardware_ms: f64,
    pub total_ms: f64,
    pub sample_rate: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct VoxpluckNoteEvent {
    /// MIDI note number.
    pub pitch: u8,
    pub start_time: f64,
    pub end_time: f64,
}

impl VoxpluckEngine {
    fn new(sample_rate: u32, mode: u32, config: &ResolvedConfig) -> Option<Self> {
        let mode = match mode {
            VOXPLUCK_MODE_REALTIME => CaptureMode::RealTime,
            VOXPLUCK_MODE_FALLBACK => CaptureMode::Fallback,
            other => {
                tracing::warn!(mode = other, "unknown capture mode");
                return None;
            }
        };
        match HumPipeline::new(sample_rate, mode, config) {
            Ok(inner) => Some(Self { inner, scratch: vec![0.0; SCRATCH_FRAMES], notes: Vec::new() }),
            Err(e) => {
                tracing::warn!(error = %e, "failed to build pipeline");
                None
            }
        }
    }
}

#[inline]
fn engine_mut<'a>(engine: *mut VoxpluckEngine) -> Option<&'a mut VoxpluckEngine> {
    unsafe { engine.as_mut() }
}

fn c_str<'a>(s: *const c_char) -> Option<&'a str> {
    if s.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(s) }.to_str().ok()
}

// --- Creation / destruction -------------------------------------------------------

/// Create an engine with the default configuration.
/// Returns null if `mode` is unknown.
#[no_mangle]
pub extern "C" fn voxpluck_create(sample_rate: u32, mode: u32) -> *mut VoxpluckEngine {
    match VoxpluckEngine::new(sample_rate, mode, &ResolvedConfig::default()) {
        Some(e) => Box::into_raw(Box::new(e)),
        None => std::ptr::null_mut(),
    }
}

/// Create an engine from a JSON configuration (same schema as the CLI's config file).
/// Returns null on malformed JSON or unknown `mode`. Unknown names fall back and are logged.
#[no_mangle]
pub extern "C" fn voxpluck_create_with_config(sample_rate: u32, mode: u32, json: *const c_char) -> *mut VoxpluckEngine {
    let Some(json) = c_str(json) else { return std::ptr::null_mut() };
    let config = match EngineConfig::from_json_str(json) {
        Ok(c) => c.resolve(),
        Err(e) => {
            tracing::warn!(error = %e, "rejecting configuration");
            return std::ptr::null_mut();
        }
    };
    for issue in &config.issues {
        tracing::warn!(%issue, "configuration");
    }
    match VoxpluckEngine::new(sample_rate, mode, &config) {
        Some(e) => Box::into_raw(Box::new(e)),
        None => std::ptr::null_mut(),
    }
}

/// Destroy an engine previously returned by `voxpluck_create*`.
#[no_mangle]
pub extern "C" fn voxpluck_destroy(engine: *mut VoxpluckEngine) {
    if !engine.is_null() {
        let e = unsafe { *Box::from_raw(engine) };
        e.inner.dispose();
    }
}

// --- Input / readings -------------------------------------------------------------

/// Push `frames` of interleaved microphone input with `channels` channels.
#[no_mangle]
pub extern "C" fn voxpluck_push_input(engine: *mut VoxpluckEngine, input: *const f32, frames: u32, channels: u32) {
    let Some(e) = engine_mut(engine) else { return };
    if input.is_null() || frames == 0 || channels == 0 {
        return;
    }
    let ch = channels as usize;
    let data = unsafe { std::slice::from_raw_parts(input, frames as usize * ch) };
    if ch == 1 {
        e.inner.push_input(data);
        return;
    }
    #[allow(clippy::cast_precision_loss)]
    let norm = 1.0 / ch as f32;
    for chunk in data.chunks(ch * SCRATCH_FRAMES) {
        let mono = &mut e.scratch[..chunk.len() / ch];
        for (m, frame) in mono.iter_mut().zip(chunk.chunks(ch)) {
            *m = frame.iter().sum::<f32>() * norm;
        }
        e.inner.push_input(mono);
    }
}

/// Handle the next captured frame (drives the voice) and write its reading.
/// Returns false when no frame is pending.
#[no_mangle]
pub extern "C" fn voxpluck_poll_reading(engine: *mut VoxpluckEngine, out: *mut VoxpluckReading) -> bool {
    let Some(e) = engine_mut(engine) else { return false };
    match e.inner.poll_reading() {
        Some(r) => {
            if let Some(out) = unsafe { out.as_mut() } {
                *out = VoxpluckReading::from(&r);
            }
            true
        }
        None => false,
    }
}

// --- Rendering -------------------------------------------------------------------

/// Render `frames` of audio into an interleaved f32 buffer with `channels` channels.
/// Returns the number of frames rendered (0 on error).
#[no_mangle]
pub extern "C" fn voxpluck_render_interleaved_f32(
    engine: *mut VoxpluckEngine,
    out_interleaved: *mut f32,
    frames: u32,
    channels: u32,
) -> u32 {
    let Some(e) = engine_mut(engine) else { return 0 };
    if out_interleaved.is_null() || frames == 0 || channels == 0 {
        return 0;
    }
    let ch = channels as usize;
    let out = unsafe { std::slice::from_raw_parts_mut(out_interleaved, frames as usize * ch) };
    for chunk in out.chunks_mut(ch * SCRATCH_FRAMES) {
        let mono = &mut e.scratch[..chunk.len() / ch];
        e.inner.render(mono);
        for (frame, s) in chunk.chunks_mut(ch).zip(mono.iter()) {
            frame.fill(*s);
        }
    }
    frames
}

// --- Voice / configuration --------------------------------------------------------

#[no_mangle]
pub extern "C" fn voxpluck_attack(engine: *mut VoxpluckEngine, frequency: f32, velocity: f32) {
    if let Some(e) = engine_mut(engine) {
        e.inner.attack(frequency, velocity);
    }
}

#[no_mangle]
pub extern "C" fn voxpluck_release(engine: *mut VoxpluckEngine) {
    if let Some(e) = engine_mut(engine) {
        e.inner.release();
    }
}

/// Select a scale by name. Returns 0 on success, 1 if the name was unknown and
/// chromatic was selected instead, -1 on bad arguments.
#[no_mangle]
pub extern "C" fn voxpluck_set_scale(engine: *mut VoxpluckEngine, name: *const c_char) -> i32 {
    let (Some(e), Some(name)) = (engine_mut(engine), c_str(name)) else { return -1 };
    match e.inner.config_store().set_scale_by_name(name, None) {
        None => 0,
        Some(_) => 1,
    }
}

/// Select a custom scale from `len` pitch classes. Returns 0 on success, 1 if
/// the set was malformed and chromatic was selected instead, -1 on bad arguments.
#[no_mangle]
pub extern "C" fn voxpluck_set_custom_scale(engine: *mut VoxpluckEngine, classes: *const u8, len: u32) -> i32 {
    let Some(e) = engine_mut(engine) else { return -1 };
    if classes.is_null() {
        return -1;
    }
    let classes = unsafe { std::slice::from_raw_parts(classes, len as usize) };
    match e.inner.config_store().set_scale_by_name("custom", Some(classes)) {
        None => 0,
        Some(_) => 1,
    }
}

/// Select the key (`"C"`, `"F#"`, `"Bb"`, `"0"`..`"11"`). Same return codes as `voxpluck_set_scale`.
#[no_mangle]
pub extern "C" fn voxpluck_set_key(engine: *mut VoxpluckEngine, name: *const c_char) -> i32 {
    let (Some(e), Some(name)) = (engine_mut(engine), c_str(name)) else { return -1 };
    match e.inner.config_store().set_key_by_name(name) {
        None => 0,
        Some(_) => 1,
    }
}

/// Correction strength, clamped to [0, 1].
#[no_mangle]
pub extern "C" fn voxpluck_set_correction_amount(engine: *mut VoxpluckEngine, amount: f32) {
    if let Some(e) = engine_mut(engine) {
        e.inner.config_store().set_correction_amount(amount);
    }
}

/// String feedback, clamped to [0, 0.9999].
#[no_mangle]
pub extern "C" fn voxpluck_set_resonance(engine: *mut VoxpluckEngine, resonance: f32) {
    if let Some(e) = engine_mut(engine) {
        e.inner.config_store().update_synth(|p| p.resonance = resonance);
    }
}

/// Damping cutoff in Hz, clamped to [100, 20000].
#[no_mangle]
pub extern "C" fn voxpluck_set_damping(engine: *mut VoxpluckEngine, hz: f32) {
    if let Some(e) = engine_mut(engine) {
        e.inner.config_store().update_synth(|p| p.damping_hz = hz);
    }
}

/// Output volume, clamped to [0, 1].
#[no_mangle]
pub extern "C" fn voxpluck_set_volume(engine: *mut VoxpluckEngine, volume: f32) {
    if let Some(e) = engine_mut(engine) {
        e.inner.config_store().update_synth(|p| p.volume = volume);
    }
}

// --- Latency / notes --------------------------------------------------------------

/// Report the host's output latency so `voxpluck_get_latency` can include it.
#[no_mangle]
pub extern "C" fn voxpluck_set_hardware_latency_ms(engine: *mut VoxpluckEngine, ms: f64) {
    if let Some(e) = engine_mut(engine) {
        let ms = if ms.is_finite() { ms.max(0.0) } else { 0.0 };
        e.inner.latency_coordinator().set_hardware_latency(Duration::from_secs_f64(ms / 1000.0));
    }
}

#[no_mangle]
pub extern "C" fn voxpluck_get_latency(engine: *mut VoxpluckEngine, out: *mut VoxpluckLatency) -> bool {
    let Some(e) = engine_mut(engine) else { return false };
    let Some(out) = (unsafe { out.as_mut() }) else { return false };
    let info = e.inner.latency();
    *out = VoxpluckLatency {
        mode: match info.mode {
            CaptureMode::RealTime => VOXPLUCK_MODE_REALTIME,
            CaptureMode::Fallback => VOXPLUCK_MODE_FALLBACK,
        },
        buffer_ms: info.buffer_ms(),
        hardware_ms: info.hardware_ms(),
        total_ms: info.total_ms(),
        sample_rate: info.sample_rate,
    };
    true
}

/// Copy up to `capacity` completed note events into `out`, oldest first.
/// Returns the number written; call again until it returns 0.
#[no_mangle]
pub extern "C" fn voxpluck_take_note_events(engine: *mut VoxpluckEngine, out: *mut VoxpluckNoteEvent, capacity: u32) -> u32 {
    let Some(e) = engine_mut(engine) else { return 0 };
    if out.is_null() || capacity == 0 {
        return 0;
    }
    let fresh = e.inner.take_note_events();
    e.notes.extend(fresh);
    let n = e.notes.len().min(capacity as usize);
    let out = unsafe { std::slice::from_raw_parts_mut(out, n) };
    for (dst, ev) in out.iter_mut().zip(e.notes.drain(..n)) {
        *dst = VoxpluckNoteEvent { pitch: ev.pitch, start_time: ev.start_time, end_time: ev.end_time };
    }
    u32::try_from(n).unwrap_or(capacity)
}
