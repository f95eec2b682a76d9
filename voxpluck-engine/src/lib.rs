//! Voxpluck Engine: hum in, plucked string out.
//!
//! Crate layout:
//! - [`detector`]   : YIN pitch detector producing [`PitchFrame`]s
//! - [`scale`]      : scale catalog, custom scales, key parsing
//! - [`corrector`]  : scale snapping with adjustable strength
//! - [`graph`]      : `Generator`/`Stage` traits and the arena `StageGraph`
//! - [`nodes`]      : stages the string voice is built from
//! - [`synth`]      : Karplus-Strong voice, timed events, control handle
//! - [`capture`]    : real-time / fallback capture scheduling
//! - [`latency`]    : latency budget reporting
//! - [`controller`] : frames to attack/glide/release decisions
//! - [`notes`]      : note events for the backing-track sidechain
//! - [`pipeline`]   : control-path glue and a device-free session
//! - [`config`]     : serde configuration and the runtime config store
//! - [`context`]    : CPAL audio session (feature `realtime`)
//!
//! Nothing on the render path allocates, locks or logs. Buffers are sized up
//! front, parameters cross threads through atomic swaps and commands through
//! SPSC rings.

pub mod capture;
pub mod config;
pub mod controller;
pub mod corrector;
pub mod detector;
pub mod error;
pub mod graph;
pub mod latency;
pub mod nodes;
pub mod notes;
pub mod pipeline;
pub mod scale;
pub mod synth;
pub mod tuning;

cfg_if::cfg_if! {
    if #[cfg(feature = "realtime")] {
        pub mod context;
        pub use context::{AudioContext, ContextState, DeviceSelection};
        pub use error::{ContextError, DeviceError};
    }
}

// Re-export some commonly used items to make downstream imports ergonomic.
pub use capture::{CaptureMode, CaptureScheduler, PlatformCapabilities};
pub use config::{ConfigStore, EngineConfig, ResolvedConfig};
pub use corrector::{CorrectionResult, CorrectorConfig, PitchCorrector};
pub use detector::{DetectorConfig, PitchDetector, PitchFrame};
pub use error::{ConfigError, ConfigIssue, GraphError};
pub use graph::{Generator, Stage, StageGraph};
pub use latency::{LatencyCoordinator, LatencyInfo};
pub use notes::NoteEvent;
pub use pipeline::{HumPipeline, PitchReading};
pub use scale::{ScaleDefinition, ScaleKind};
pub use synth::{SynthParams, SynthVoice, SynthesisEngine};
