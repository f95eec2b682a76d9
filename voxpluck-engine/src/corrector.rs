//! Scale-aware pitch correction.
//!
//! `correct` is a pure function of `(frequency, confidence, CorrectorConfig)`;
//! [`PitchCorrector`] wraps it with a shared, atomically swapped config and
//! running statistics that never feed back into the output.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::SharedConfig;
use crate::scale::ScaleDefinition;
use crate::tuning::{
    frequency_to_semitone, is_valid_frequency, nearest_semitone, note_name, octave, pitch_class,
    semitone_to_frequency, DEFAULT_REFERENCE_HZ,
};

/// Below this detector confidence the corrector passes the input through.
pub const MIN_CORRECTION_CONFIDENCE: f32 = 0.3;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CorrectorConfig {
    /// Blend between input (0) and scale target (1).
    pub correction_amount: f32,
    pub scale: ScaleDefinition,
    /// Tonic pitch class, `0..=11` (0 = C).
    pub key_offset: u8,
    /// Frequency of semitone 69 (A4).
    pub reference_frequency: f32,
}

impl CorrectorConfig {
    /// Bring every field into its legal range: amount to `[0,1]` (NaN -> 0),
    /// key modulo 12, invalid reference -> 440 Hz.
    pub fn sanitized(self) -> Self {
        let correction_amount = if self.correction_amount.is_nan() {
            0.0
        } else {
            self.correction_amount.clamp(0.0, 1.0)
        };
        let reference_frequency = if is_valid_frequency(self.reference_frequency) {
            self.reference_frequency
        } else {
            DEFAULT_REFERENCE_HZ
        };
        Self { correction_amount, key_offset: self.key_offset % 12, reference_frequency, ..self }
    }
}

impl Default for CorrectorConfig {
    fn default() -> Self {
        Self {
            correction_amount: 1.0,
            scale: ScaleDefinition::CHROMATIC,
            key_offset: 0,
            reference_frequency: DEFAULT_REFERENCE_HZ,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CorrectionResult {
    /// Output frequency, blended between input and target.
    pub frequency: f32,
    /// Pitch-class label of the target (`""` for the null result).
    pub note: &'static str,
    pub octave: i32,
    /// Deviation of the input from its nearest chromatic semitone, in cents.
    pub cents: f32,
    pub target_frequency: f32,
    pub correction_applied: bool,
}

impl CorrectionResult {
    /// Returned for zero, negative or non-finite input.
    pub const NULL: Self = Self {
        frequency: 0.0,
        note: "",
        octave: 0,
        cents: 0.0,
        target_frequency: 0.0,
        correction_applied: false,
    };

    #[inline]
    pub fn is_null(&self) -> bool {
        self.frequency == 0.0 && self.note.is_empty()
    }
}

/// Correct one detected frequency against `config`.
///
/// The returned `cents` is measured against the rounded input semitone, not
/// against the scale target.
#[allow(clippy::cast_possible_truncation)]
pub fn correct_with(config: &CorrectorConfig, input_frequency: f32, confidence: f32) -> CorrectionResult {
    if !is_valid_frequency(input_frequency) {
        return CorrectionResult::NULL;
    }
    let reference = f64::from(config.reference_frequency);

    if !(confidence >= MIN_CORRECTION_CONFIDENCE) {
        let rounded = nearest_semitone(input_frequency, config.reference_frequency).unwrap_or(69);
        return CorrectionResult {
            frequency: input_frequency,
            note: note_name(rounded),
            octave: octave(rounded),
            cents: 0.0,
            target_frequency: input_frequency,
            correction_applied: false,
        };
    }

    let continuous = frequency_to_semitone(f64::from(input_frequency), reference);
    let rounded = continuous.round() as i32;
    let rel = (i32::from(pitch_class(rounded)) - i32::from(config.key_offset)).rem_euclid(12);
    #[allow(clippy::cast_sign_loss)]
    let member = config.scale.nearest_member(rel as u8);
    let target = rounded + (i32::from(member) - rel);
    let target_frequency = semitone_to_frequency(f64::from(target), reference) as f32;

    let amount = config.correction_amount;
    CorrectionResult {
        frequency: input_frequency + (target_frequency - input_frequency) * amount,
        note: note_name(target),
        octave: octave(target),
        cents: ((continuous - f64::from(rounded)) * 100.0) as f32,
        target_frequency,
        correction_applied: amount > 0.0,
    }
}

/// Snapshot of the corrector's running statistics.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct CorrectorStats {
    /// Calls with a valid input frequency.
    pub frames_processed: u64,
    /// Calls that returned `correction_applied = true`.
    pub frames_corrected: u64,
    /// Mean `|cents|` over frames that went through quantisation.
    pub mean_abs_cents: f32,
}

pub struct PitchCorrector {
    config: SharedConfig<CorrectorConfig>,
    processed: u64,
    corrected: u64,
    quantized: u64,
    abs_cents_sum: f64,
}

impl PitchCorrector {
    /// Corrector reading its configuration from a shared handle.
    pub fn new(config: SharedConfig<CorrectorConfig>) -> Self {
        Self { config, processed: 0, corrected: 0, quantized: 0, abs_cents_sum: 0.0 }
    }

    /// Corrector owning a private configuration.
    pub fn with_config(config: CorrectorConfig) -> Self {
        Self::new(Arc::new(ArcSwap::from_pointee(config.sanitized())))
    }

    /// Replace the whole configuration; takes effect on the next `correct`.
    pub fn set_config(&self, config: CorrectorConfig) {
        self.config.store(Arc::new(config.sanitized()));
    }

    pub fn config(&self) -> CorrectorConfig {
        **self.config.load()
    }

    /// Correct one frame. The configuration is read once per call.
    pub fn correct(&mut self, input_frequency: f32, confidence: f32) -> CorrectionResult {
        let config = self.config();
        let result = correct_with(&config, input_frequency, confidence);
        if !result.is_null() {
            self.processed += 1;
            if result.correction_applied {
                self.corrected += 1;
            }
            if confidence >= MIN_CORRECTION_CONFIDENCE {
                self.quantized += 1;
                self.abs_cents_sum += f64::from(result.cents.abs());
            }
        }
        result
    }

    pub fn stats(&self) -> CorrectorStats {
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        let mean_abs_cents = if self.quantized == 0 {
            0.0
        } else {
            (self.abs_cents_sum / self.quantized as f64) as f32
        };
        CorrectorStats {
            frames_processed: self.processed,
            frames_corrected: self.corrected,
            mean_abs_cents,
        }
    }

    pub fn reset_stats(&mut self) {
        self.processed = 0;
        self.corrected = 0;
        self.quantized = 0;
        self.abs_cents_sum = 0.0;
    }
}

impl Default for PitchCorrector {
    fn default() -> Self {
        Self::with_config(CorrectorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scale::ScaleKind;

    fn config(kind: ScaleKind, key: u8, amount: f32) -> CorrectorConfig {
        CorrectorConfig {
            correction_amount: amount,
            scale: ScaleDefinition::catalog(kind),
            key_offset: key,
            reference_frequency: 440.0,
        }
    }

    #[test]
    fn snaps_432_to_a4_in_c_major() {
        let r = correct_with(&config(ScaleKind::Major, 0, 1.0), 432.0, 1.0);
        assert_eq!(r.frequency, 440.0);
        assert_eq!(r.target_frequency, 440.0);
        assert_eq!(r.note, "A");
        assert_eq!(r.octave, 4);
        assert!(r.correction_applied);
        // 432 Hz is ~31.8 cents flat of A4
        assert!((r.cents + 31.77).abs() < 0.1, "cents={}", r.cents);
    }

    #[test]
    fn non_positive_input_returns_null() {
        let cfg = CorrectorConfig::default();
        for f in [0.0, -10.0, f32::NAN, f32::INFINITY] {
            let r = correct_with(&cfg, f, 1.0);
            assert_eq!(r, CorrectionResult::NULL, "input {f}");
        }
        assert_eq!(CorrectionResult::NULL.note, "");
        assert!(!CorrectionResult::NULL.correction_applied);
    }

    #[test]
    fn zero_amount_is_identity() {
        for kind in ScaleKind::CATALOG {
            let cfg = config(kind, 3, 0.0);
            for f in [55.0, 97.3, 261.0, 432.0, 1234.5, 1999.0] {
                let r = correct_with(&cfg, f, 1.0);
                assert!((r.frequency - f).abs() < 1e-3, "{kind:?} f={f} -> {}", r.frequency);
                assert!(!r.correction_applied);
            }
        }
    }

    #[test]
    fn chromatic_full_correction_lands_on_semitones() {
        let cfg = config(ScaleKind::Chromatic, 0, 1.0);
        let mut f = 60.0f32;
        while f < 1900.0 {
            let r = correct_with(&cfg, f, 0.9);
            let n = frequency_to_semitone(f64::from(r.frequency), 440.0);
            assert!((n - n.round()).abs() < 1e-4, "f={f} -> {} ({n})", r.frequency);
            f *= 1.037;
        }
    }

    #[test]
    fn low_confidence_passes_through() {
        let cfg = config(ScaleKind::Major, 0, 1.0);
        for conf in [0.0, 0.1, 0.29, f32::NAN] {
            let r = correct_with(&cfg, 432.0, conf);
            assert_eq!(r.frequency, 432.0);
            assert_eq!(r.cents, 0.0);
            assert!(!r.correction_applied);
            assert_eq!(r.note, "A");
        }
    }

    #[test]
    fn snapped_pitch_class_is_always_in_scale() {
        for kind in ScaleKind::CATALOG {
            let scale = ScaleDefinition::catalog(kind);
            for key in 0..12u8 {
                let cfg = config(kind, key, 1.0);
                let mut f = 55.0f32;
                while f < 2000.0 {
                    let r = correct_with(&cfg, f, 1.0);
                    let target = nearest_semitone(r.target_frequency, 440.0).expect("valid target");
                    let rel = (i32::from(pitch_class(target)) - i32::from(key)).rem_euclid(12) as u8;
                    assert!(scale.contains(rel), "{kind:?} key {key} f={f}: rel {rel}");
                    f *= 1.019;
                }
            }
        }
    }

    #[test]
    fn key_offset_shifts_the_scale() {
        // D pentatonic major is D E F# A B; G is closer to F# than to A
        let r = correct_with(&config(ScaleKind::PentatonicMajor, 2, 1.0), 392.0, 1.0);
        assert_eq!(r.note, "F#");
        assert_eq!(r.octave, 4);

        // D major: C sits between B and C#, the earlier member (B) wins
        let r = correct_with(&config(ScaleKind::Major, 2, 1.0), 261.63, 1.0);
        assert_eq!(r.note, "B");
        assert_eq!(r.octave, 3);
    }

    #[test]
    fn stats_count_and_reset() {
        let mut c = PitchCorrector::with_config(config(ScaleKind::Major, 0, 1.0));
        c.correct(432.0, 1.0);
        c.correct(440.0, 0.1);
        c.correct(0.0, 1.0);
        let s = c.stats();
        assert_eq!(s.frames_processed, 2);
        assert_eq!(s.frames_corrected, 1);
        assert!((s.mean_abs_cents - 31.77).abs() < 0.1, "{s:?}");
        c.reset_stats();
        assert_eq!(c.stats(), CorrectorStats::default());
    }

    #[test]
    fn config_swap_applies_to_next_call() {
        let mut c = PitchCorrector::default();
        let before = c.correct(432.0, 1.0);
        c.set_config(CorrectorConfig { correction_amount: 0.0, ..c.config() });
        let after = c.correct(432.0, 1.0);
        assert_eq!(before.frequency, 440.0);
        assert_eq!(after.frequency, 432.0);
    }

    #[test]
    fn sanitize_clamps_fields() {
        let cfg = CorrectorConfig {
            correction_amount: 3.0,
            key_offset: 14,
            reference_frequency: -1.0,
            ..CorrectorConfig::default()
        }
        .sanitized();
        assert_eq!(cfg.correction_amount, 1.0);
        assert_eq!(cfg.key_offset, 2);
        assert_eq!(cfg.reference_frequency, 440.0);
    }
}
