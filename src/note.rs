//! Notes
//!
//! Note events exchanged between the tracker, the harmonizer and event sinks,
//! plus frequency ↔ MIDI note conversion.

use std::fmt::Display;

const SEMITONES: usize = 12;

/// MIDI note number of A4.
const A4_NOTE: f32 = 69.0;

/// Frequency of A4 in Hz.
const A4_FREQUENCY: f32 = 440.0;

/// Converts a frequency in Hz to a fractional MIDI note number.
///
/// Non-positive or non-finite frequencies have no note number and return
/// `None`.
pub fn freq_to_midi(freq_hz: f32) -> Option<f32> {
    if !freq_hz.is_finite() || freq_hz <= 0.0 {
        return None;
    }
    Some(12.0 * (freq_hz / A4_FREQUENCY).log2() + A4_NOTE)
}

/// Converts a (possibly fractional) MIDI note number to a frequency in Hz.
pub fn midi_to_freq(note: f32) -> f32 {
    A4_FREQUENCY * 2f32.powf((note - A4_NOTE) / 12.0)
}

/// Rounds a frequency to the nearest MIDI note in `0..=127`.
pub fn nearest_midi_note(freq_hz: f32) -> Option<u8> {
    let note = (0.5 + freq_to_midi(freq_hz)?).floor();
    if (0.0..=127.0).contains(&note) {
        Some(note as u8)
    } else {
        None
    }
}

/// Whether an event starts or ends a note.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NoteKind {
    /// A note starts sounding.
    On,
    /// A note stops sounding.
    Off,
}

/// A single note transition.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NoteEvent {
    /// Note on or note off.
    pub kind: NoteKind,
    /// Pitch of the note in Hz. Note-offs may carry `0.0` when no note was
    /// sounding.
    pub pitch_hz: f32,
    /// Velocity in `0..=127`.
    pub velocity: u8,
}

impl NoteEvent {
    /// A note-on at `pitch_hz`.
    pub fn on(pitch_hz: f32, velocity: u8) -> Self {
        NoteEvent {
            kind: NoteKind::On,
            pitch_hz,
            velocity: velocity.min(127),
        }
    }

    /// A note-off at `pitch_hz`.
    pub fn off(pitch_hz: f32, velocity: u8) -> Self {
        NoteEvent {
            kind: NoteKind::Off,
            pitch_hz,
            velocity: velocity.min(127),
        }
    }

    /// Nearest MIDI note, if the pitch maps to one.
    pub fn midi_note(&self) -> Option<u8> {
        nearest_midi_note(self.pitch_hz)
    }

    /// Returns `true` for note-ons.
    pub fn is_on(&self) -> bool {
        self.kind == NoteKind::On
    }
}

impl Display for NoteEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            NoteKind::On => "on",
            NoteKind::Off => "off",
        };
        match self.midi_note() {
            Some(note) => write!(
                f,
                "note {kind} {}{} ({:.1} Hz) vel {}",
                NoteName::from_midi(note),
                octave(note),
                self.pitch_hz,
                self.velocity
            ),
            None => write!(f, "note {kind} ({:.1} Hz) vel {}", self.pitch_hz, self.velocity),
        }
    }
}

/// A note event tagged with the sample offset inside the processing block
/// that produced it.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimedNoteEvent {
    /// Offset in samples from the start of the current block.
    pub offset: u32,
    /// The note transition.
    pub event: NoteEvent,
}

/// Twelve chromatic pitch classes
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum NoteName {
    /// C
    C,
    /// C sharp / D flat
    Cs,
    /// D
    D,
    /// D sharp / E flat
    Ds,
    /// E
    E,
    /// F
    F,
    /// F sharp / G flat
    Fs,
    /// G
    G,
    /// G sharp / A flat
    Gs,
    /// A
    A,
    /// A sharp / B flat
    As,
    /// B
    B,
}

impl NoteName {
    const NAMES: [NoteName; SEMITONES] = [
        NoteName::C,
        NoteName::Cs,
        NoteName::D,
        NoteName::Ds,
        NoteName::E,
        NoteName::F,
        NoteName::Fs,
        NoteName::G,
        NoteName::Gs,
        NoteName::A,
        NoteName::As,
        NoteName::B,
    ];

    /// Pitch class of a MIDI note number.
    pub const fn from_midi(note: u8) -> NoteName {
        Self::NAMES[note as usize % SEMITONES]
    }
}

impl Display for NoteName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NoteName::C => "C",
            NoteName::Cs => "C#",
            NoteName::D => "D",
            NoteName::Ds => "D#",
            NoteName::E => "E",
            NoteName::F => "F",
            NoteName::Fs => "F#",
            NoteName::G => "G",
            NoteName::Gs => "G#",
            NoteName::A => "A",
            NoteName::As => "A#",
            NoteName::B => "B",
        };
        f.write_str(name)
    }
}

/// Scientific pitch octave, MIDI 60 being C4.
fn octave(note: u8) -> i32 {
    note as i32 / SEMITONES as i32 - 1
}
