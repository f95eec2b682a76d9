//! Error and diagnostic types.
//!
//! Per-block operations (detect, correct, render) never fail; everything here
//! belongs to the control path: graph edits, configuration and device sessions.

use std::path::PathBuf;

use thiserror::Error;

/// Rejected edits on a [`StageGraph`](crate::graph::StageGraph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("unknown stage id {0}")]
    UnknownStage(usize),
    #[error("unknown edge id {0}")]
    UnknownEdge(usize),
    #[error("stage {0} cannot feed itself")]
    SelfLoop(usize),
    #[error("edge {from} -> {to} already exists")]
    DuplicateEdge { from: usize, to: usize },
    #[error("edge {from} -> {to} would close a cycle")]
    Cycle { from: usize, to: usize },
}

/// Failure to load a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Non-fatal configuration diagnostic. The value it refers to has already been
/// replaced by a safe fallback when one of these is produced.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigIssue {
    #[error("unknown scale '{0}', using chromatic")]
    UnknownScale(String),
    #[error("unknown key '{0}', using C")]
    UnknownKey(String),
    #[error("malformed custom scale: {0}; using chromatic")]
    MalformedCustomScale(String),
    #[error("{field} = {value} is out of range, clamped to {clamped}")]
    OutOfRange {
        field: &'static str,
        value: f32,
        clamped: f32,
    },
}

/// Audio device acquisition and stream failures. Fatal to the session.
#[cfg(feature = "realtime")]
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no default {0} device available")]
    NoDefaultDevice(&'static str),
    #[error("requested {kind} device not found: {name}")]
    NotFound { kind: &'static str, name: String },
    #[error("failed to enumerate devices: {0}")]
    Devices(#[from] cpal::DevicesError),
    #[error("failed to query device name: {0}")]
    Name(#[from] cpal::DeviceNameError),
    #[error("failed to query default stream config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),
    #[error("failed to query supported stream configs: {0}")]
    SupportedConfigs(#[from] cpal::SupportedStreamConfigsError),
    #[error("device offers no usable {0} stream config")]
    NoConfig(&'static str),
    #[error("failed to build stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),
    #[error("failed to start stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
    #[error("unsupported device sample format {0:?}")]
    UnsupportedFormat(cpal::SampleFormat),
    #[error("failed to spawn control thread: {0}")]
    ControlThread(#[source] std::io::Error),
}

/// Lifecycle misuse or device failure reported by [`AudioContext`](crate::context::AudioContext).
#[cfg(feature = "realtime")]
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("audio context is {actual}, operation requires {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("failed to build the voice graph: {0}")]
    Graph(#[from] GraphError),
}
