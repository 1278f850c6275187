//! Event sinks
//!
//! Consumers of the timed note events produced by a pipeline. A harmonized
//! chord is always handed over in one [`EventSink::on_chord`] call.
//!
//! Sinks must tolerate note-offs that have no matching note-on, including
//! note-offs at `0.0` Hz: a confirmed note always releases its predecessor,
//! even when nothing was sounding.

use crate::note::{freq_to_midi, NoteEvent, NoteKind, TimedNoteEvent};

/// Number of MIDI channels.
const MIDI_CHANNELS: u8 = 16;

const NOTE_OFF: u8 = 0x80;
const NOTE_ON: u8 = 0x90;
const CONTROL_CHANGE: u8 = 0xb0;
const CC_SUSTAIN: u8 = 0x40;
const CC_ALL_NOTES_OFF: u8 = 0x7b;

/// Receives note events from a pipeline.
pub trait EventSink {
    /// Handle one event.
    fn on_note(&mut self, event: TimedNoteEvent);

    /// Handle all events of one harmonized transition.
    fn on_chord(&mut self, chord: &[TimedNoteEvent]) {
        for event in chord {
            self.on_note(*event);
        }
    }
}

impl EventSink for Vec<TimedNoteEvent> {
    fn on_note(&mut self, event: TimedNoteEvent) {
        self.push(event);
    }

    fn on_chord(&mut self, chord: &[TimedNoteEvent]) {
        self.extend_from_slice(chord);
    }
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn on_note(&mut self, event: TimedNoteEvent) {
        (**self).on_note(event)
    }

    fn on_chord(&mut self, chord: &[TimedNoteEvent]) {
        (**self).on_chord(chord)
    }
}

/// A raw three-byte MIDI message at a sample offset.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MidiMessage {
    /// Offset in samples from the start of the block.
    pub offset: u32,
    /// Status, data 1, data 2.
    pub bytes: [u8; 3],
}

/// Pre-allocated MIDI output for one processing block.
///
/// Call [`MidiBuffer::clear`] at the start of every block. Events that do not
/// map to a MIDI note are skipped; events arriving when the buffer is full are
/// dropped. Both are counted.
#[derive(Debug, Clone)]
pub struct MidiBuffer {
    channel: u8,
    capacity: usize,
    messages: Vec<MidiMessage>,
    skipped: u64,
    dropped: u64,
}

impl MidiBuffer {
    /// A buffer for up to `capacity` messages per block on MIDI channel
    /// `channel` (0-15, higher values wrap).
    pub fn with_capacity(capacity: usize, channel: u8) -> Self {
        MidiBuffer {
            channel: channel % MIDI_CHANNELS,
            capacity,
            messages: Vec::with_capacity(capacity),
            skipped: 0,
            dropped: 0,
        }
    }

    /// MIDI channel used for note messages.
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Messages written since the last [`clear`](Self::clear).
    pub fn messages(&self) -> &[MidiMessage] {
        &self.messages
    }

    /// Events without a MIDI note that were ignored.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Messages lost because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Empty the buffer for the next block.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Release sustain and silence every note on all channels.
    pub fn panic(&mut self, offset: u32) {
        for channel in 0..MIDI_CHANNELS {
            let status = CONTROL_CHANGE | channel;
            self.push(MidiMessage {
                offset,
                bytes: [status, CC_SUSTAIN, 0],
            });
            self.push(MidiMessage {
                offset,
                bytes: [status, CC_ALL_NOTES_OFF, 0],
            });
        }
    }

    fn push(&mut self, message: MidiMessage) {
        if self.messages.len() >= self.capacity {
            self.dropped += 1;
            return;
        }
        self.messages.push(message);
    }
}

impl MidiBuffer {
    fn note_message(&self, timed: &TimedNoteEvent) -> Option<MidiMessage> {
        let note = timed.event.midi_note()?;
        let status = match timed.event.kind {
            NoteKind::On => NOTE_ON,
            NoteKind::Off => NOTE_OFF,
        } | self.channel;
        Some(MidiMessage {
            offset: timed.offset,
            bytes: [status, note, timed.event.velocity],
        })
    }
}

impl EventSink for MidiBuffer {
    fn on_note(&mut self, timed: TimedNoteEvent) {
        match self.note_message(&timed) {
            Some(message) => self.push(message),
            None => self.skipped += 1,
        }
    }

    /// A chord is written whole or not at all: if any voice has no MIDI
    /// note every voice is skipped, and if the chord does not fit every
    /// voice is dropped.
    fn on_chord(&mut self, chord: &[TimedNoteEvent]) {
        if chord.iter().any(|timed| timed.event.midi_note().is_none()) {
            self.skipped += chord.len() as u64;
            return;
        }
        if self.messages.len() + chord.len() > self.capacity {
            self.dropped += chord.len() as u64;
            return;
        }
        for timed in chord {
            if let Some(message) = self.note_message(timed) {
                self.messages.push(message);
            }
        }
    }
}

/// A multi-voice sound source driven by note numbers.
pub trait Instrument {
    /// Start a voice. `note` is a fractional MIDI note number, `velocity`
    /// is normalized to `0.0..=1.0`.
    fn note_on(&mut self, note: f32, velocity: f32);

    /// Release the voice playing `note`.
    fn note_off(&mut self, note: f32, velocity: f32);
}

/// Forwards note events to an [`Instrument`].
///
/// Offsets are ignored; events take effect when the instrument next renders.
#[derive(Debug)]
pub struct InstrumentSink<I> {
    instrument: I,
}

impl<I: Instrument> InstrumentSink<I> {
    /// Wrap `instrument`.
    pub fn new(instrument: I) -> Self {
        InstrumentSink { instrument }
    }

    /// The wrapped instrument.
    pub fn instrument(&self) -> &I {
        &self.instrument
    }

    /// The wrapped instrument, mutably (for rendering).
    pub fn instrument_mut(&mut self) -> &mut I {
        &mut self.instrument
    }

    /// Unwrap the instrument.
    pub fn into_inner(self) -> I {
        self.instrument
    }
}

impl<I: Instrument> EventSink for InstrumentSink<I> {
    fn on_note(&mut self, timed: TimedNoteEvent) {
        let NoteEvent {
            kind,
            pitch_hz,
            velocity,
        } = timed.event;
        let Some(note) = freq_to_midi(pitch_hz) else {
            return;
        };
        let velocity = f32::from(velocity) / 127.0;
        match kind {
            NoteKind::On => self.instrument.note_on(note, velocity),
            NoteKind::Off => self.instrument.note_off(note, velocity),
        }
    }
}
