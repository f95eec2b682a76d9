//! Equal-temperament helpers shared by the corrector, controller and note recorder.
//!
//! Semitone numbers follow the MIDI convention: 69 is the reference pitch
//! (A4 at 440 Hz by default), 60 is middle C, octave = `floor(n / 12) - 1`.

use num_traits::Float;

/// Semitone number of the reference pitch.
pub const REFERENCE_SEMITONE: i32 = 69;

/// Default reference frequency (A4).
pub const DEFAULT_REFERENCE_HZ: f32 = 440.0;

/// Pitch-class labels, sharps only.
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// `true` for frequencies that may flow into correction or synthesis.
#[inline]
pub fn is_valid_frequency(hz: f32) -> bool {
    hz.is_finite() && hz > 0.0
}

/// Continuous semitone number of `hz`: `69 + 12 * log2(hz / reference)`.
#[inline]
pub fn frequency_to_semitone<F: Float + From<f32>>(hz: F, reference: F) -> F {
    let base: F = From::from(69.0);
    let twelve: F = From::from(12.0);
    base + twelve * (hz / reference).log2()
}

/// Frequency of (possibly fractional) semitone `n`: `reference * 2^((n - 69) / 12)`.
#[inline]
pub fn semitone_to_frequency<F: Float + From<f32>>(semitone: F, reference: F) -> F {
    let base: F = From::from(69.0);
    let twelve: F = From::from(12.0);
    let two: F = From::from(2.0);
    reference * two.powf((semitone - base) / twelve)
}

/// Pitch class (0 = C) of an integer semitone.
#[inline]
#[allow(clippy::cast_sign_loss)]
pub fn pitch_class(semitone: i32) -> u8 {
    semitone.rem_euclid(12) as u8
}

/// Octave number of an integer semitone (60 -> 4).
#[inline]
pub fn octave(semitone: i32) -> i32 {
    semitone.div_euclid(12) - 1
}

#[inline]
pub fn note_name(semitone: i32) -> &'static str {
    NOTE_NAMES[pitch_class(semitone) as usize]
}

/// Nearest integer semitone of a valid frequency.
#[inline]
#[allow(clippy::cast_possible_truncation)]
pub fn nearest_semitone(hz: f32, reference: f32) -> Option<i32> {
    if !is_valid_frequency(hz) || !is_valid_frequency(reference) {
        return None;
    }
    let n = frequency_to_semitone(f64::from(hz), f64::from(reference)).round();
    n.is_finite().then_some(n as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_maps_to_a4() {
        assert_eq!(frequency_to_semitone(440.0f64, 440.0), 69.0);
        assert_eq!(note_name(69), "A");
        assert_eq!(octave(69), 4);
    }

    #[test]
    fn middle_c() {
        let hz = semitone_to_frequency(60.0f64, 440.0);
        assert!((hz - 261.625_565).abs() < 1e-3, "hz={hz}");
        assert_eq!(nearest_semitone(262.0, 440.0), Some(60));
        assert_eq!(note_name(60), "C");
        assert_eq!(octave(60), 4);
    }

    #[test]
    fn negative_semitones_wrap() {
        assert_eq!(pitch_class(-1), 11);
        assert_eq!(octave(-1), -2);
        assert_eq!(octave(0), -1);
    }

    #[test]
    fn invalid_frequencies_have_no_semitone() {
        assert_eq!(nearest_semitone(0.0, 440.0), None);
        assert_eq!(nearest_semitone(-3.0, 440.0), None);
        assert_eq!(nearest_semitone(f32::NAN, 440.0), None);
        assert_eq!(nearest_semitone(f32::INFINITY, 440.0), None);
    }
}
