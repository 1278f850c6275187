//! Harmonizer
//!
//! Expands a tracked note into a major triad. The root is snapped to the
//! nearest equal-tempered note and the third and fifth are stacked on top of
//! it, so the note-off for a chord always names the same three notes as the
//! note-on that started it.

use std::ops::Index;

use crate::note::{midi_to_freq, nearest_midi_note, NoteEvent};

/// Number of voices in a chord.
pub const CHORD_SIZE: usize = 3;

/// Intervals (in semitones) above the root: root, major third, perfect fifth.
pub const MAJOR_TRIAD: [u8; CHORD_SIZE] = [0, 4, 7];

/// The three events making up one harmonized transition.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Chord {
    events: [NoteEvent; CHORD_SIZE],
}

impl Chord {
    /// Events ordered root, third, fifth.
    pub fn events(&self) -> &[NoteEvent; CHORD_SIZE] {
        &self.events
    }

    /// The root event.
    pub fn root(&self) -> &NoteEvent {
        &self.events[0]
    }

    /// Iterate over the events, root first.
    pub fn iter(&self) -> std::slice::Iter<'_, NoteEvent> {
        self.events.iter()
    }
}

impl Index<usize> for Chord {
    type Output = NoteEvent;

    fn index(&self, index: usize) -> &NoteEvent {
        &self.events[index]
    }
}

impl<'a> IntoIterator for &'a Chord {
    type Item = &'a NoteEvent;
    type IntoIter = std::slice::Iter<'a, NoteEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Fixed major-triad voicing.
#[derive(Debug, Copy, Clone, Default)]
pub struct Harmonizer;

impl Harmonizer {
    /// Create a harmonizer.
    pub fn new() -> Self {
        Harmonizer
    }

    /// Chord pitches in Hz for a root frequency.
    ///
    /// Roots without a MIDI note (silence, out of range) are repeated
    /// unchanged for every voice.
    pub fn voicing(&self, root_hz: f32) -> [f32; CHORD_SIZE] {
        match nearest_midi_note(root_hz) {
            Some(root) => MAJOR_TRIAD.map(|interval| midi_to_freq(f32::from(root + interval))),
            None => [root_hz; CHORD_SIZE],
        }
    }

    /// Expand one tracked transition into a chord of the same kind and
    /// velocity.
    pub fn harmonize(&self, event: NoteEvent) -> Chord {
        let events = self.voicing(event.pitch_hz).map(|pitch_hz| NoteEvent { pitch_hz, ..event });
        Chord { events }
    }
}
