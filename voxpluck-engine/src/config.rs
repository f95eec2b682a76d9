//! Session configuration.
//!
//! Two layers:
//! - [`EngineConfig`]: the serde-facing description (JSON file, CLI overrides),
//!   with scales and keys given by name and every field defaulted.
//! - [`ResolvedConfig`]: typed values produced by [`EngineConfig::resolve`].
//!   Unknown names and out-of-range numbers never fail; they are replaced by a
//!   safe value and reported as [`ConfigIssue`]s.
//!
//! At runtime the corrector and synth configurations live behind
//! [`SharedConfig`] handles owned by a [`ConfigStore`]. Writers replace the
//! whole value; readers load it once per block.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::controller::ControllerConfig;
use crate::corrector::CorrectorConfig;
use crate::detector::DetectorConfig;
use crate::error::{ConfigError, ConfigIssue};
use crate::scale::{resolve_key, ScaleDefinition};
use crate::synth::SynthParams;
use crate::tuning::DEFAULT_REFERENCE_HZ;

/// Whole-value configuration shared between the control and render paths.
pub type SharedConfig<T> = Arc<ArcSwap<T>>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub detector: DetectorConfig,
    pub corrector: CorrectorSection,
    pub synth: SynthSection,
    pub controller: ControllerSection,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectorSection {
    /// Scale name (`chromatic`, `major`, `pentatonic-minor`, `custom`...).
    pub scale: String,
    /// Tonic: `C`, `F#`, `Bb` or `0..=11`.
    pub key: String,
    pub amount: f32,
    pub reference_frequency: f32,
    /// Pitch classes for `scale = "custom"`.
    pub custom_scale: Option<Vec<u8>>,
}

impl Default for CorrectorSection {
    fn default() -> Self {
        Self {
            scale: "chromatic".into(),
            key: "C".into(),
            amount: 1.0,
            reference_frequency: DEFAULT_REFERENCE_HZ,
            custom_scale: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthSection {
    pub resonance: f32,
    pub damping_hz: f32,
    pub volume: f32,
    /// Glide (portamento) between sung notes, seconds.
    pub glide_time: f32,
}

impl Default for SynthSection {
    fn default() -> Self {
        let p = SynthParams::default();
        Self {
            resonance: p.resonance,
            damping_hz: p.damping_hz,
            volume: p.volume,
            glide_time: ControllerConfig::default().glide_time,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSection {
    /// Detector confidence needed to pluck a new note.
    pub onset_confidence: f32,
    /// Input RMS needed to pluck a new note.
    pub gate_volume: f32,
    /// Unvoiced time before the voice is released, seconds.
    pub release_hold: f32,
    /// Recorded notes shorter than this are dropped, seconds.
    pub min_note_duration: f32,
}

impl Default for ControllerSection {
    fn default() -> Self {
        let c = ControllerConfig::default();
        Self {
            onset_confidence: c.onset_confidence,
            gate_volume: c.gate_volume,
            release_hold: c.release_hold,
            min_note_duration: c.min_note_duration,
        }
    }
}

/// Typed configuration plus the diagnostics produced while resolving it.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedConfig {
    pub detector: DetectorConfig,
    pub corrector: CorrectorConfig,
    pub synth: SynthParams,
    pub controller: ControllerConfig,
    pub issues: Vec<ConfigIssue>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        EngineConfig::default().resolve()
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|source| ConfigError::Parse { origin: "<string>".into(), source })
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse { origin: path.display().to_string(), source })
    }

    /// Turn names into typed values. Never fails.
    pub fn resolve(&self) -> ResolvedConfig {
        let mut issues = Vec::new();

        let (scale, issue) = ScaleDefinition::resolve(&self.corrector.scale, self.corrector.custom_scale.as_deref());
        issues.extend(issue);
        let (key_offset, issue) = resolve_key(&self.corrector.key);
        issues.extend(issue);

        let corrector = CorrectorConfig {
            correction_amount: clamp_field("corrector.amount", self.corrector.amount, 0.0, 1.0, 1.0, &mut issues),
            scale,
            key_offset,
            reference_frequency: clamp_field(
                "corrector.reference_frequency",
                self.corrector.reference_frequency,
                200.0,
                1000.0,
                DEFAULT_REFERENCE_HZ,
                &mut issues,
            ),
        };

        let sd = SynthParams::default();
        let synth = SynthParams {
            resonance: clamp_field("synth.resonance", self.synth.resonance, 0.0, SynthParams::MAX_RESONANCE, sd.resonance, &mut issues),
            damping_hz: clamp_field("synth.damping_hz", self.synth.damping_hz, 100.0, 20_000.0, sd.damping_hz, &mut issues),
            volume: clamp_field("synth.volume", self.synth.volume, 0.0, 1.0, sd.volume, &mut issues),
        };

        let cd = ControllerConfig::default();
        let controller = ControllerConfig {
            onset_confidence: clamp_field("controller.onset_confidence", self.controller.onset_confidence, 0.0, 1.0, cd.onset_confidence, &mut issues),
            gate_volume: clamp_field("controller.gate_volume", self.controller.gate_volume, 0.0, 1.0, cd.gate_volume, &mut issues),
            release_hold: clamp_field("controller.release_hold", self.controller.release_hold, 0.0, 5.0, cd.release_hold, &mut issues),
            glide_time: clamp_field("synth.glide_time", self.synth.glide_time, 0.0, 1.0, cd.glide_time, &mut issues),
            min_note_duration: clamp_field("controller.min_note_duration", self.controller.min_note_duration, 0.0, 5.0, cd.min_note_duration, &mut issues),
        };

        let mut detector = self.detector;
        detector.min_frequency =
            clamp_field("detector.min_frequency", detector.min_frequency, 20.0, 1000.0, 50.0, &mut issues);
        detector.max_frequency = clamp_field(
            "detector.max_frequency",
            detector.max_frequency,
            detector.min_frequency * 2.0,
            5000.0,
            2000.0,
            &mut issues,
        );
        detector.threshold = clamp_field("detector.threshold", detector.threshold, 0.01, 1.0, 0.15, &mut issues);
        detector.silence_rms = clamp_field("detector.silence_rms", detector.silence_rms, 0.0, 1.0, 0.01, &mut issues);
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            detector.window = clamp_field("detector.window", detector.window as f32, 256.0, 16_384.0, 2048.0, &mut issues) as usize;
        }

        ResolvedConfig { detector, corrector, synth, controller, issues }
    }
}

/// Clamp `value` into `[lo, hi]`; non-finite values take `fallback`. Any change is recorded.
fn clamp_field(field: &'static str, value: f32, lo: f32, hi: f32, fallback: f32, issues: &mut Vec<ConfigIssue>) -> f32 {
    let clamped = if value.is_finite() { value.clamp(lo, hi) } else { fallback };
    if clamped != value {
        issues.push(ConfigIssue::OutOfRange { field, value, clamped });
    }
    clamped
}

// ------------------------------- Runtime store ------------------------------------

/// Owner of the runtime-mutable configuration handles.
///
/// Cloning the store clones the handles, so every clone edits the same values.
#[derive(Clone, Debug)]
pub struct ConfigStore {
    corrector: SharedConfig<CorrectorConfig>,
    synth: SharedConfig<SynthParams>,
    version: Arc<AtomicU64>,
}

impl ConfigStore {
    pub fn new(corrector: CorrectorConfig, synth: SynthParams) -> Self {
        Self {
            corrector: Arc::new(ArcSwap::from_pointee(corrector.sanitized())),
            synth: Arc::new(ArcSwap::from_pointee(synth.sanitized())),
            version: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn from_resolved(resolved: &ResolvedConfig) -> Self {
        Self::new(resolved.corrector, resolved.synth)
    }

    /// Handle for a [`PitchCorrector`](crate::corrector::PitchCorrector).
    pub fn corrector_handle(&self) -> SharedConfig<CorrectorConfig> {
        Arc::clone(&self.corrector)
    }

    /// Handle for a [`SynthesisEngine`](crate::synth::SynthesisEngine).
    pub fn synth_handle(&self) -> SharedConfig<SynthParams> {
        Arc::clone(&self.synth)
    }

    pub fn corrector(&self) -> CorrectorConfig {
        **self.corrector.load()
    }

    pub fn synth(&self) -> SynthParams {
        **self.synth.load()
    }

    /// Bumped on every write.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn set_corrector(&self, config: CorrectorConfig) {
        self.corrector.store(Arc::new(config.sanitized()));
        self.bump();
    }

    /// Read-modify-write of the corrector config. Concurrent updates retry
    /// against the latest value, so `f` may run more than once.
    pub fn update_corrector(&self, f: impl Fn(&mut CorrectorConfig)) {
        self.corrector.rcu(|current| {
            let mut next = **current;
            f(&mut next);
            next.sanitized()
        });
        self.bump();
    }

    pub fn set_synth(&self, params: SynthParams) {
        self.synth.store(Arc::new(params.sanitized()));
        self.bump();
    }

    /// Read-modify-write of the synth parameters; see [`update_corrector`](Self::update_corrector).
    pub fn update_synth(&self, f: impl Fn(&mut SynthParams)) {
        update_shared(&self.synth, f);
        self.bump();
    }

    pub fn set_correction_amount(&self, amount: f32) {
        self.update_corrector(|c| c.correction_amount = amount);
    }

    /// Switch scale by name. Unknown names select chromatic and return the diagnostic.
    pub fn set_scale_by_name(&self, name: &str, custom: Option<&[u8]>) -> Option<ConfigIssue> {
        let (scale, issue) = ScaleDefinition::resolve(name, custom);
        if let Some(issue) = &issue {
            tracing::warn!(%issue, "scale change");
        }
        self.update_corrector(|c| c.scale = scale);
        issue
    }

    /// Switch key by name. Unknown names select C and return the diagnostic.
    pub fn set_key_by_name(&self, name: &str) -> Option<ConfigIssue> {
        let (key, issue) = resolve_key(name);
        if let Some(issue) = &issue {
            tracing::warn!(%issue, "key change");
        }
        self.update_corrector(|c| c.key_offset = key);
        issue
    }

    fn bump(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
    }
}

/// Atomic read-modify-write of a shared parameter value.
pub(crate) fn update_shared(shared: &ArcSwap<SynthParams>, f: impl Fn(&mut SynthParams)) {
    shared.rcu(|current| {
        let mut next = **current;
        f(&mut next);
        next.sanitized()
    });
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(CorrectorConfig::default(), SynthParams::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scale::ScaleKind;

    #[test]
    fn empty_json_gives_defaults() {
        let cfg = EngineConfig::from_json_str("{}").expect("parse");
        assert_eq!(cfg, EngineConfig::default());
        let r = cfg.resolve();
        assert!(r.issues.is_empty(), "{:?}", r.issues);
        assert_eq!(r.corrector, CorrectorConfig::default());
        assert_eq!(r.synth, SynthParams::default());
        assert_eq!(r.detector, DetectorConfig::default());
        assert_eq!(r.controller, ControllerConfig::default());
    }

    #[test]
    fn partial_json_overrides_named_fields() {
        let cfg = EngineConfig::from_json_str(
            r#"{ "corrector": { "scale": "Pentatonic_Minor", "key": "Eb", "amount": 0.5 },
                 "synth": { "volume": 0.3 } }"#,
        )
        .expect("parse");
        let r = cfg.resolve();
        assert!(r.issues.is_empty(), "{:?}", r.issues);
        assert_eq!(r.corrector.scale.kind(), ScaleKind::PentatonicMinor);
        assert_eq!(r.corrector.key_offset, 3);
        assert_eq!(r.corrector.correction_amount, 0.5);
        assert_eq!(r.synth.volume, 0.3);
        assert_eq!(r.synth.resonance, SynthParams::default().resonance);
    }

    #[test]
    fn bad_names_fall_back_with_issues() {
        let mut cfg = EngineConfig::default();
        cfg.corrector.scale = "lydian-dominant".into();
        cfg.corrector.key = "H".into();
        let r = cfg.resolve();
        assert_eq!(r.corrector.scale, ScaleDefinition::CHROMATIC);
        assert_eq!(r.corrector.key_offset, 0);
        assert_eq!(
            r.issues,
            vec![
                ConfigIssue::UnknownScale("lydian-dominant".into()),
                ConfigIssue::UnknownKey("H".into()),
            ]
        );
    }

    #[test]
    fn custom_scale_from_config() {
        let mut cfg = EngineConfig::default();
        cfg.corrector.scale = "custom".into();
        cfg.corrector.custom_scale = Some(vec![0, 3, 7]);
        let r = cfg.resolve();
        assert_eq!(r.corrector.scale.pitch_classes(), &[0, 3, 7]);

        cfg.corrector.custom_scale = Some(vec![0, 14]);
        let r = cfg.resolve();
        assert_eq!(r.corrector.scale, ScaleDefinition::CHROMATIC);
        assert!(matches!(r.issues.as_slice(), [ConfigIssue::MalformedCustomScale(_)]));
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let mut cfg = EngineConfig::default();
        cfg.corrector.amount = 3.0;
        cfg.synth.resonance = 1.5;
        cfg.synth.volume = f32::NAN;
        let r = cfg.resolve();
        assert_eq!(r.corrector.correction_amount, 1.0);
        assert_eq!(r.synth.resonance, SynthParams::MAX_RESONANCE);
        assert_eq!(r.synth.volume, SynthParams::default().volume);
        assert_eq!(r.issues.len(), 3, "{:?}", r.issues);
        assert!(r.issues.iter().all(|i| matches!(i, ConfigIssue::OutOfRange { .. })));
    }

    #[test]
    fn parse_errors_are_reported() {
        let err = EngineConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        let err = EngineConfig::from_json_file("/definitely/missing/voxpluck.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn store_swaps_whole_values() {
        let store = ConfigStore::default();
        let handle = store.corrector_handle();
        assert_eq!(store.version(), 0);

        store.set_correction_amount(0.25);
        assert_eq!(handle.load().correction_amount, 0.25);

        assert_eq!(store.set_scale_by_name("blues", None), None);
        assert_eq!(handle.load().scale.kind(), ScaleKind::Blues);
        assert_eq!(handle.load().correction_amount, 0.25, "other fields survive");

        let issue = store.set_key_by_name("X#");
        assert_eq!(issue, Some(ConfigIssue::UnknownKey("X#".into())));
        assert_eq!(handle.load().key_offset, 0);

        store.update_synth(|p| p.damping_hz = 1.0);
        assert_eq!(store.synth_handle().load().damping_hz, 100.0);
        assert_eq!(store.version(), 4);
    }

    #[test]
    fn concurrent_updates_keep_every_field() {
        let store = ConfigStore::default();
        std::thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..500 {
                    store.set_key_by_name("D");
                    store.update_synth(|p| p.volume = 0.4);
                }
            });
            s.spawn(|| {
                for _ in 0..500 {
                    store.set_scale_by_name("blues", None);
                    store.update_synth(|p| p.damping_hz = 3000.0);
                }
            });
        });
        let c = store.corrector();
        assert_eq!(c.key_offset, 2);
        assert_eq!(c.scale.kind(), ScaleKind::Blues);
        let p = store.synth();
        assert_eq!(p.volume, 0.4);
        assert_eq!(p.damping_hz, 3000.0);
        assert_eq!(store.version(), 2000);
    }
}
