//! Note events for the backing-track sidechain.
//!
//! The recorder watches the corrected target pitch frame by frame and cuts it
//! into `NoteEvent`s: a note starts when a new target semitone appears and
//! ends when the semitone changes or the input goes unvoiced.

use serde::{Deserialize, Serialize};

use crate::tuning::{nearest_semitone, DEFAULT_REFERENCE_HZ};

/// One quantized note. `pitch` is a MIDI note number; times are seconds.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub pitch: u8,
    pub start_time: f64,
    pub end_time: f64,
}

impl NoteEvent {
    #[inline]
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

#[derive(Clone, Debug)]
pub struct NoteRecorder {
    min_duration: f64,
    reference: f32,
    current: Option<(u8, f64)>,
    events: Vec<NoteEvent>,
}

impl NoteRecorder {
    pub fn new(min_duration: f32, reference_frequency: f32) -> Self {
        Self {
            min_duration: f64::from(min_duration.max(0.0)),
            reference: reference_frequency,
            current: None,
            events: Vec::new(),
        }
    }

    pub fn set_reference(&mut self, reference_frequency: f32) {
        self.reference = reference_frequency;
    }

    /// Observe the target frequency of one frame (`None` when unvoiced).
    pub fn observe(&mut self, target_frequency: Option<f32>, time: f64) {
        let pitch = target_frequency
            .and_then(|f| nearest_semitone(f, self.reference))
            .filter(|s| (0..=127).contains(s));
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let pitch = pitch.map(|s| s as u8);

        match (self.current, pitch) {
            (Some((held, _)), Some(p)) if held == p => {}
            (_, next) => {
                self.close(time);
                self.current = next.map(|p| (p, time));
            }
        }
    }

    /// Close the note in progress (end of session).
    pub fn finish(&mut self, time: f64) {
        self.close(time);
    }

    /// Completed notes since the last call, oldest first.
    pub fn take_events(&mut self) -> Vec<NoteEvent> {
        std::mem::take(&mut self.events)
    }

    #[inline] pub fn pending_events(&self) -> usize { self.events.len() }

    /// The note currently held, if any.
    #[inline] pub fn current_pitch(&self) -> Option<u8> { self.current.map(|(p, _)| p) }

    fn close(&mut self, time: f64) {
        if let Some((pitch, start_time)) = self.current.take() {
            let event = NoteEvent { pitch, start_time, end_time: time };
            if event.duration() >= self.min_duration {
                self.events.push(event);
            }
        }
    }
}

impl Default for NoteRecorder {
    fn default() -> Self {
        Self::new(0.08, DEFAULT_REFERENCE_HZ)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(rec: &mut NoteRecorder, freq: Option<f32>, from: f64, to: f64) {
        let mut t = from;
        while t < to - 1e-9 {
            rec.observe(freq, t);
            t += 0.01;
        }
    }

    #[test]
    fn notes_split_on_change_and_silence() {
        let mut rec = NoteRecorder::default();
        feed(&mut rec, Some(440.0), 0.0, 0.5);
        feed(&mut rec, Some(493.88), 0.5, 0.8);
        feed(&mut rec, None, 0.8, 1.0);
        let events = rec.take_events();
        assert_eq!(events.len(), 2, "{events:?}");
        assert_eq!(events[0].pitch, 69);
        assert!((events[0].start_time - 0.0).abs() < 1e-9);
        assert!((events[0].end_time - 0.5).abs() < 1e-6);
        assert_eq!(events[1].pitch, 71);
        assert!((events[1].end_time - 0.8).abs() < 1e-6);
        assert!(rec.take_events().is_empty());
    }

    #[test]
    fn short_blips_are_dropped() {
        let mut rec = NoteRecorder::new(0.1, 440.0);
        feed(&mut rec, Some(440.0), 0.0, 0.05);
        feed(&mut rec, Some(261.63), 0.05, 0.5);
        rec.finish(0.5);
        let events = rec.take_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].pitch, 60);
        assert_eq!(rec.current_pitch(), None);
    }

    #[test]
    fn invalid_frequency_counts_as_silence() {
        let mut rec = NoteRecorder::new(0.0, 440.0);
        rec.observe(Some(220.0), 0.0);
        rec.observe(Some(-1.0), 0.2);
        rec.observe(Some(f32::NAN), 0.3);
        assert_eq!(rec.take_events(), vec![NoteEvent { pitch: 57, start_time: 0.0, end_time: 0.2 }]);
    }
}
