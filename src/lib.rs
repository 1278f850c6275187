//! # pitch_harmonizer
//!
//! Real-time monophonic note tracking: turn a live audio stream into stable
//! note-on/note-off events, harmonize each note into a major triad and hand
//! the result to an event sink (MIDI bytes, a synth voice pool, ...).
//!
//! Onset detection and pitch estimation are provided by an external analysis
//! library through [`AnalysisBackend`]; this crate decides *when* a note
//! starts and stops and *which* pitch it has.
//!
//! ## Example
//! ```rust
//! use pitch_harmonizer::{
//!     AnalysisBackend, AnalysisError, AnalysisSetup, ChannelPipeline, Controls, MidiBuffer,
//!     OnsetDetector, OnsetMethod, PitchDetector, PitchMethod,
//! };
//!
//! // Stand-ins for a real analysis library.
//! struct NeverOnset;
//! impl OnsetDetector for NeverOnset {
//!     fn set_threshold(&mut self, _: f32) {}
//!     fn set_silence(&mut self, _: f32) {}
//!     fn detect(&mut self, _: &[f32]) -> bool { false }
//! }
//!
//! struct Unvoiced;
//! impl PitchDetector for Unvoiced {
//!     fn set_tolerance(&mut self, _: f32) {}
//!     fn set_silence(&mut self, _: f32) {}
//!     fn detect(&mut self, _: &[f32]) -> f32 { 0.0 }
//! }
//!
//! struct Backend;
//! impl AnalysisBackend for Backend {
//!     fn onset(&mut self, _: OnsetMethod, _: &AnalysisSetup)
//!         -> Result<Box<dyn OnsetDetector>, AnalysisError> { Ok(Box::new(NeverOnset)) }
//!     fn pitch(&mut self, _: PitchMethod, _: &AnalysisSetup)
//!         -> Result<Box<dyn PitchDetector>, AnalysisError> { Ok(Box::new(Unvoiced)) }
//! }
//!
//! fn run() -> Result<(), Box<dyn std::error::Error>> {
//!     // 1) Build a pipeline; every control parameter must be provided.
//!     let mut pipeline = ChannelPipeline::builder()
//!         .sample_rate(48_000.0)
//!         .hop_size(256)
//!         .controls(Controls::default())
//!         .build(&mut Backend)?;
//!
//!     // 2) In your audio callback:
//!     let mut midi = MidiBuffer::with_capacity(64, 0);
//!     let block = vec![0.0f32; 128]; // host-sized block
//!     midi.clear();
//!     pipeline.process(&block, &mut midi);
//!     for message in midi.messages() {
//!         println!("{} {:?}", message.offset, message.bytes);
//!     }
//!     Ok(())
//! }
//! # run().unwrap();
//! ```
//!
//! ## Features
//! - `serde`: `Serialize`/`Deserialize` for events, controls and method
//!   selectors.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rust_2018_idioms)]
#![deny(clippy::all)]

/// Ring buffer decoupling host blocks from analysis hops.
pub use ring_buffer::{FrameRingBuffer, RingBufferError};

/// External detector seams and per-hop analysis.
pub use analysis::{
    db_spl, level_detection, sanitize_pitch, AnalysisAdapter, AnalysisBackend, AnalysisError,
    AnalysisResult, AnalysisSetup, OnsetDetector, OnsetMethod, PitchDetector, PitchMethod,
    SILENT_LEVEL,
};

/// Note tracking state machine.
pub use note_tracker::{
    velocity_from_level, Emission, NoteTracker, NoteTrackerBuilder, PitchHistory, TrackerError,
    TrackerPhase, TrackerState,
};

/// Triad voicing.
pub use harmonizer::{Chord, Harmonizer, MAJOR_TRIAD};

/// Event sinks.
pub use event::{EventSink, Instrument, InstrumentSink, MidiBuffer, MidiMessage};

/// Note events and conversions.
pub use note::{
    freq_to_midi, midi_to_freq, nearest_midi_note, NoteEvent, NoteKind, NoteName, TimedNoteEvent,
};

/// Per-channel and multi-channel pipelines.
pub use pipeline::{
    ChannelPipeline, ControlPort, Controls, MultiChannelPipeline, PipelineBuilder, PipelineError,
    DEFAULT_RING_CAPACITY,
};

/// Analysis adapter module.
pub mod analysis;

/// Event sink module.
pub mod event;

/// Harmonizer module.
pub mod harmonizer;

/// Note event module.
pub mod note;

/// Note tracker module.
pub mod note_tracker;

/// Pipeline module.
pub mod pipeline;

/// Frame ring buffer module.
pub mod ring_buffer;
