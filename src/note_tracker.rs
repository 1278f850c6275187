//! Note tracker
//!
//! Turns the per-hop stream of onset flags, raw pitch estimates and levels
//! into stable note-on/note-off transitions.
//!
//! An onset on a loud frame starts a confirmation count. After `N`
//! consecutive hops without a further onset the note is confirmed: the
//! previous note is released and the median of the last `N` raw pitches is
//! started. An onset on a silent frame releases the sounding note at once.

use thiserror::Error;

use crate::analysis::AnalysisResult;
use crate::note::NoteEvent;

/// Smallest usable median window. With a window of one the count is already
/// past the confirmation point on the first hop after the onset.
pub const MIN_MEDIAN_WINDOW: usize = 2;

/// Largest supported median window.
pub const MAX_MEDIAN_WINDOW: usize = 32;

pub(crate) const DEFAULT_MEDIAN_WINDOW: usize = 6;

/// Errors when configuring a note tracker.
#[derive(Debug, Error, PartialEq)]
pub enum TrackerError {
    /// The median window is outside the supported range.
    #[error("median window must be within {min}..={max}, got {got}")]
    InvalidWindow {
        /// Requested window.
        got: usize,
        /// Smallest supported window.
        min: usize,
        /// Largest supported window.
        max: usize,
    },

    /// The minimum frequency is negative or not finite.
    #[error("minimum frequency must be a finite, non-negative value, got {0}")]
    InvalidMinFrequency(f32),
}

/// Fixed-length FIFO of raw pitch estimates.
#[derive(Debug, Clone)]
pub struct PitchHistory {
    values: Box<[f32]>,
    scratch: Box<[f32]>,
}

impl PitchHistory {
    /// A zero-filled history of `len` estimates.
    pub fn new(len: usize) -> Self {
        PitchHistory {
            values: vec![0.0; len].into_boxed_slice(),
            scratch: vec![0.0; len].into_boxed_slice(),
        }
    }

    /// Drop the oldest estimate and append `pitch_hz`.
    pub fn push(&mut self, pitch_hz: f32) {
        if let Some(last) = self.values.len().checked_sub(1) {
            self.values.rotate_left(1);
            self.values[last] = pitch_hz;
        }
    }

    /// Estimates, oldest first.
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Number of stored estimates.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` for a zero-length history.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Median of the stored estimates.
    ///
    /// For an even length this is the lower of the two middle values, so the
    /// result is always one of the observed estimates.
    pub fn median(&mut self) -> f32 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.scratch.copy_from_slice(&self.values);
        let middle = (self.scratch.len() - 1) / 2;
        let (_, median, _) = self.scratch.select_nth_unstable_by(middle, f32::total_cmp);
        *median
    }

    /// Zero every estimate.
    pub fn clear(&mut self) {
        self.values.fill(0.0);
    }
}

/// Where the tracker is in its note cycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TrackerPhase {
    /// No confirmed note.
    Idle,
    /// Counting hops since the last onset.
    Confirming {
        /// Hops counted so far, starting at 1 on the onset hop.
        hops: usize,
    },
    /// A confirmed note is sounding.
    Sounding,
}

/// Mutable state carried from hop to hop.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TrackerState {
    /// Current phase.
    pub phase: TrackerPhase,
    /// Pitch of the last confirmed note, `0.0` when none is sounding.
    pub current_note_hz: f32,
    /// Level of the most recent hop.
    pub current_level: f32,
}

impl Default for TrackerState {
    fn default() -> Self {
        TrackerState {
            phase: TrackerPhase::Idle,
            current_note_hz: 0.0,
            current_level: 0.0,
        }
    }
}

/// Up to two events produced by a single hop, stored inline.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Emission {
    events: [NoteEvent; 2],
    len: usize,
}

impl Emission {
    fn new() -> Self {
        Emission {
            events: [NoteEvent::off(0.0, 0); 2],
            len: 0,
        }
    }

    fn push(&mut self, event: NoteEvent) {
        self.events[self.len] = event;
        self.len += 1;
    }

    /// The emitted events, in order.
    pub fn as_slice(&self) -> &[NoteEvent] {
        &self.events[..self.len]
    }

    /// Iterate over the emitted events.
    pub fn iter(&self) -> std::slice::Iter<'_, NoteEvent> {
        self.as_slice().iter()
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` when the hop produced nothing.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<'a> IntoIterator for &'a Emission {
    type Item = &'a NoteEvent;
    type IntoIter = std::slice::Iter<'a, NoteEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Map a level in dB to a MIDI velocity.
///
/// `127 + floor(level)`, clamped to `0..=127`.
pub fn velocity_from_level(level: f32) -> u8 {
    if level.is_nan() {
        return 0;
    }
    (127.0 + level.floor()).clamp(0.0, 127.0) as u8
}

/// Builder for a [`NoteTracker`].
pub struct NoteTrackerBuilder {
    median_window: usize,
    min_frequency: f32,
}

impl NoteTrackerBuilder {
    /// Defaults: median window = 6, no minimum frequency.
    pub fn new() -> Self {
        NoteTrackerBuilder {
            median_window: DEFAULT_MEDIAN_WINDOW,
            min_frequency: 0.0,
        }
    }

    /// Hops needed to confirm a note, also the median window length.
    pub fn median_window(mut self, hops: usize) -> Self {
        self.median_window = hops;
        self
    }

    /// Confirmed pitches below this frequency are treated as unvoiced.
    pub fn min_frequency(mut self, hz: f32) -> Self {
        self.min_frequency = hz;
        self
    }

    /// Validate and create the tracker.
    pub fn build(self) -> Result<NoteTracker, TrackerError> {
        if !(MIN_MEDIAN_WINDOW..=MAX_MEDIAN_WINDOW).contains(&self.median_window) {
            return Err(TrackerError::InvalidWindow {
                got: self.median_window,
                min: MIN_MEDIAN_WINDOW,
                max: MAX_MEDIAN_WINDOW,
            });
        }
        if !self.min_frequency.is_finite() || self.min_frequency < 0.0 {
            return Err(TrackerError::InvalidMinFrequency(self.min_frequency));
        }
        Ok(NoteTracker {
            median_window: self.median_window,
            min_frequency: self.min_frequency,
            history: PitchHistory::new(self.median_window),
            state: TrackerState::default(),
        })
    }
}

impl Default for NoteTrackerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Onset-gated, median-filtered note state machine.
#[derive(Debug, Clone)]
pub struct NoteTracker {
    median_window: usize,
    min_frequency: f32,
    history: PitchHistory,
    state: TrackerState,
}

impl NoteTracker {
    /// Start customizing with a builder.
    pub fn builder() -> NoteTrackerBuilder {
        NoteTrackerBuilder::new()
    }

    /// Hops needed to confirm a note.
    pub fn median_window(&self) -> usize {
        self.median_window
    }

    /// Current state.
    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    /// Raw pitch estimates, oldest first.
    pub fn history(&self) -> &[f32] {
        self.history.as_slice()
    }

    /// Pitch of the sounding note, `0.0` when silent.
    pub fn current_note_hz(&self) -> f32 {
        self.state.current_note_hz
    }

    /// Returns `true` while a confirmed note is sounding.
    pub fn is_sounding(&self) -> bool {
        self.state.current_note_hz > 0.0
    }

    /// Feed one hop of analysis output.
    pub fn update(&mut self, result: &AnalysisResult) -> Emission {
        let mut emission = Emission::new();

        self.history.push(result.pitch_hz);
        self.state.current_level = result.level;

        if result.onset {
            if result.is_silent() {
                if self.is_sounding() {
                    let off = NoteEvent::off(self.state.current_note_hz, 0);
                    log::debug!("{off} (silence)");
                    emission.push(off);
                }
                self.state.current_note_hz = 0.0;
                self.state.phase = TrackerPhase::Idle;
            } else {
                self.state.phase = TrackerPhase::Confirming { hops: 1 };
            }
            return emission;
        }

        let TrackerPhase::Confirming { hops } = self.state.phase else {
            return emission;
        };
        let hops = hops + 1;
        if hops < self.median_window {
            self.state.phase = TrackerPhase::Confirming { hops };
            return emission;
        }

        // Any previous note is superseded, sounding or not.
        emission.push(NoteEvent::off(self.state.current_note_hz, 0));

        let candidate = self.history.median();
        if candidate > 0.0 && candidate >= self.min_frequency {
            let on = NoteEvent::on(candidate, velocity_from_level(result.level));
            log::debug!("{on}");
            emission.push(on);
            self.state.current_note_hz = candidate;
            self.state.phase = TrackerPhase::Sounding;
        } else {
            self.state.current_note_hz = 0.0;
            self.state.phase = TrackerPhase::Idle;
        }
        emission
    }

    /// Release the sounding note, if any, and return to idle.
    pub fn release(&mut self) -> Option<NoteEvent> {
        let off = self.is_sounding().then(|| NoteEvent::off(self.state.current_note_hz, 0));
        self.state.current_note_hz = 0.0;
        self.state.phase = TrackerPhase::Idle;
        off
    }

    /// Forget all history and state without emitting anything.
    pub fn reset(&mut self) {
        self.history.clear();
        self.state = TrackerState::default();
    }
}
