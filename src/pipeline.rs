//! Pipeline
//!
//! Wires ring buffer, analysis, tracker and harmonizer together for one audio
//! channel, and coordinates one independent pipeline per channel for
//! multi-channel input.
//!
//! Everything is allocated by [`PipelineBuilder`]; [`ChannelPipeline::process`]
//! only copies samples and calls into the detectors and the sink.

use std::fmt::Display;

use thiserror::Error;

use crate::analysis::{
    AnalysisAdapter, AnalysisBackend, AnalysisError, AnalysisSetup, OnsetMethod, PitchMethod,
};
use crate::event::EventSink;
use crate::harmonizer::{Harmonizer, CHORD_SIZE};
use crate::note::{NoteEvent, TimedNoteEvent};
use crate::note_tracker::{NoteTracker, TrackerError, DEFAULT_MEDIAN_WINDOW};
use crate::ring_buffer::{FrameRingBuffer, RingBufferError};

/// Number of control ports.
pub const NUM_CONTROL_PORTS: usize = 5;

/// Default ring buffer capacity in samples.
pub const DEFAULT_RING_CAPACITY: usize = 16_384;

/// Errors returned when building or driving a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required control parameter was never set.
    #[error("missing control parameter `{0}`")]
    MissingControl(ControlPort),

    /// A control value is out of range for its port.
    #[error("invalid value {value} for control `{port}`")]
    InvalidControl {
        /// The port being set.
        port: ControlPort,
        /// The rejected value.
        value: f32,
    },

    /// Sizes or rates are unusable.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Inputs or sinks do not match the number of channels.
    #[error("expected {expected} channels, got {inputs} inputs and {sinks} sinks")]
    ChannelMismatch {
        /// Number of channel pipelines.
        expected: usize,
        /// Number of input buffers given.
        inputs: usize,
        /// Number of sinks given.
        sinks: usize,
    },

    /// Ring buffer setup failed.
    #[error(transparent)]
    RingBuffer(#[from] RingBufferError),

    /// Detector setup failed.
    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    /// Tracker setup failed.
    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

/// Control inputs, numbered as the plugin's control ports.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ControlPort {
    /// Onset method selector.
    OnsetMethod = 0,
    /// Onset peak-picking threshold.
    OnsetThreshold = 1,
    /// Silence threshold in dB.
    SilenceThreshold = 2,
    /// Pitch method selector.
    PitchMethod = 3,
    /// Pitch estimator tolerance.
    PitchTolerance = 4,
}

impl ControlPort {
    /// Every port, in index order.
    pub const ALL: [ControlPort; NUM_CONTROL_PORTS] = [
        ControlPort::OnsetMethod,
        ControlPort::OnsetThreshold,
        ControlPort::SilenceThreshold,
        ControlPort::PitchMethod,
        ControlPort::PitchTolerance,
    ];

    /// Port index.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The port at `index`, if any.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Port symbol.
    pub const fn name(self) -> &'static str {
        match self {
            ControlPort::OnsetMethod => "onset_method",
            ControlPort::OnsetThreshold => "onset_threshold",
            ControlPort::SilenceThreshold => "silence_threshold",
            ControlPort::PitchMethod => "pitch_method",
            ControlPort::PitchTolerance => "pitch_tolerance",
        }
    }
}

impl Display for ControlPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Validated control values read by the analysis stage every hop.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Controls {
    /// Selected onset detector.
    pub onset_method: OnsetMethod,
    /// Onset peak-picking threshold.
    pub onset_threshold: f32,
    /// Silence threshold in dB.
    pub silence_threshold: f32,
    /// Selected pitch estimator.
    pub pitch_method: PitchMethod,
    /// Pitch estimator tolerance.
    pub pitch_tolerance: f32,
}

impl Controls {
    /// Resolve a full set of port values, failing on the first missing one.
    pub fn from_ports(values: &[Option<f32>; NUM_CONTROL_PORTS]) -> Result<Self, PipelineError> {
        let mut controls = Controls::default();
        for port in ControlPort::ALL {
            let value = values[port.index()].ok_or(PipelineError::MissingControl(port))?;
            controls.set(port, value)?;
        }
        Ok(controls)
    }

    /// Current value of `port` as a raw control value.
    pub fn get(&self, port: ControlPort) -> f32 {
        match port {
            ControlPort::OnsetMethod => self.onset_method.index() as f32,
            ControlPort::OnsetThreshold => self.onset_threshold,
            ControlPort::SilenceThreshold => self.silence_threshold,
            ControlPort::PitchMethod => self.pitch_method.index() as f32,
            ControlPort::PitchTolerance => self.pitch_tolerance,
        }
    }

    /// Set `port` from a raw control value. Invalid values leave the
    /// previous setting in place.
    pub fn set(&mut self, port: ControlPort, value: f32) -> Result<(), PipelineError> {
        let invalid = PipelineError::InvalidControl { port, value };
        match port {
            ControlPort::OnsetMethod => {
                self.onset_method = OnsetMethod::from_control(value).ok_or(invalid)?;
            }
            ControlPort::PitchMethod => {
                self.pitch_method = PitchMethod::from_control(value).ok_or(invalid)?;
            }
            _ if !value.is_finite() => return Err(invalid),
            ControlPort::OnsetThreshold => self.onset_threshold = value,
            ControlPort::SilenceThreshold => self.silence_threshold = value,
            ControlPort::PitchTolerance => self.pitch_tolerance = value,
        }
        Ok(())
    }
}

impl Default for Controls {
    /// Default methods, backend-default thresholds and a -90 dB silence gate.
    fn default() -> Self {
        Controls {
            onset_method: OnsetMethod::Default,
            onset_threshold: 0.0,
            silence_threshold: -90.0,
            pitch_method: PitchMethod::Default,
            pitch_tolerance: 0.0,
        }
    }
}

/// Builder for [`ChannelPipeline`] and [`MultiChannelPipeline`].
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    sample_rate: f32,
    window_size: usize,
    hop_size: usize,
    median_window: usize,
    min_frequency: f32,
    ring_capacity: usize,
    controls: [Option<f32>; NUM_CONTROL_PORTS],
}

impl PipelineBuilder {
    /// Start with default parameters:
    /// sample_rate = 44_100, window_size = 512, hop_size = 256,
    /// median_window = 6, min_frequency = 0, ring_capacity = 16_384.
    ///
    /// No control parameter has a value yet; all five must be set before
    /// building.
    pub fn new() -> Self {
        let setup = AnalysisSetup::default();
        PipelineBuilder {
            sample_rate: setup.sample_rate,
            window_size: setup.window_size,
            hop_size: setup.hop_size,
            median_window: DEFAULT_MEDIAN_WINDOW,
            min_frequency: 0.0,
            ring_capacity: DEFAULT_RING_CAPACITY,
            controls: [None; NUM_CONTROL_PORTS],
        }
    }

    /// Set the sample rate of the input.
    pub fn sample_rate(mut self, rate: f32) -> Self {
        self.sample_rate = rate;
        self
    }

    /// Set the analysis window handed to the detectors.
    pub fn window_size(mut self, size: usize) -> Self {
        self.window_size = size;
        self
    }

    /// Set the number of samples per analysis pass.
    pub fn hop_size(mut self, size: usize) -> Self {
        self.hop_size = size;
        self
    }

    /// Set the note confirmation / median window in hops.
    pub fn median_window(mut self, hops: usize) -> Self {
        self.median_window = hops;
        self
    }

    /// Ignore confirmed pitches below `hz`.
    pub fn min_frequency(mut self, hz: f32) -> Self {
        self.min_frequency = hz;
        self
    }

    /// Set the ring buffer capacity in samples. Must exceed the largest host
    /// block by a comfortable margin.
    pub fn ring_capacity(mut self, samples: usize) -> Self {
        self.ring_capacity = samples;
        self
    }

    /// Set one control parameter.
    pub fn control(mut self, port: ControlPort, value: f32) -> Self {
        self.controls[port.index()] = Some(value);
        self
    }

    /// Set all control parameters at once.
    pub fn controls(mut self, controls: Controls) -> Self {
        for port in ControlPort::ALL {
            self.controls[port.index()] = Some(controls.get(port));
        }
        self
    }

    fn setup(&self) -> AnalysisSetup {
        AnalysisSetup {
            window_size: self.window_size,
            hop_size: self.hop_size,
            sample_rate: self.sample_rate,
        }
    }

    /// Validate and create a single-channel pipeline whose detectors come
    /// from `backend`.
    pub fn build<B: AnalysisBackend + ?Sized>(
        &self,
        backend: &mut B,
    ) -> Result<ChannelPipeline, PipelineError> {
        let controls = Controls::from_ports(&self.controls)?;

        if self.hop_size == 0 {
            return Err(PipelineError::Configuration("hop_size cannot be zero".into()));
        }
        if self.ring_capacity < 2 * self.hop_size {
            return Err(PipelineError::Configuration(format!(
                "ring_capacity {} must hold at least two hops of {}",
                self.ring_capacity, self.hop_size
            )));
        }

        let tracker = NoteTracker::builder()
            .median_window(self.median_window)
            .min_frequency(self.min_frequency)
            .build()?;
        let ring = FrameRingBuffer::new(self.ring_capacity)?;
        let analysis = AnalysisAdapter::new(backend, self.setup())?;

        Ok(ChannelPipeline {
            ring,
            frame: vec![0.0; self.hop_size].into_boxed_slice(),
            analysis,
            tracker,
            harmonizer: Harmonizer::new(),
            controls,
        })
    }

    /// Create `channels` independent pipelines sharing one backend.
    pub fn build_multi<B: AnalysisBackend + ?Sized>(
        &self,
        channels: usize,
        backend: &mut B,
    ) -> Result<MultiChannelPipeline, PipelineError> {
        if channels == 0 {
            return Err(PipelineError::Configuration("channel count cannot be zero".into()));
        }
        let channels = (0..channels)
            .map(|_| self.build(backend))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(MultiChannelPipeline { channels })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Audio-to-chord pipeline for one channel.
#[derive(Debug)]
pub struct ChannelPipeline {
    ring: FrameRingBuffer,
    frame: Box<[f32]>,
    analysis: AnalysisAdapter,
    tracker: NoteTracker,
    harmonizer: Harmonizer,
    controls: Controls,
}

impl ChannelPipeline {
    /// Start customizing with a builder.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Samples per analysis pass.
    pub fn hop_size(&self) -> usize {
        self.frame.len()
    }

    /// Current control values.
    pub fn controls(&self) -> &Controls {
        &self.controls
    }

    /// Change a control parameter between callbacks.
    pub fn set_control(&mut self, port: ControlPort, value: f32) -> Result<(), PipelineError> {
        self.controls.set(port, value).inspect_err(|err| log::warn!("{err}"))
    }

    /// The note tracker.
    pub fn tracker(&self) -> &NoteTracker {
        &self.tracker
    }

    /// Samples dropped by the ring buffer so far.
    pub fn overruns(&self) -> u64 {
        self.ring.overruns()
    }

    /// Samples waiting for the next hop.
    pub fn pending(&self) -> usize {
        self.ring.read_available()
    }

    /// Process one host block, returning the number of hops analysed.
    ///
    /// Events are tagged with the offset of the last sample of the hop that
    /// produced them, relative to the start of `input`.
    pub fn process<S: EventSink + ?Sized>(&mut self, input: &[f32], sink: &mut S) -> usize {
        let pending = self.ring.read_available();
        self.ring.write(input);

        let hop_size = self.frame.len();
        let last_index = input.len().saturating_sub(1);
        let mut hops = 0;
        while self.ring.read_available() >= hop_size {
            if self.ring.read(&mut self.frame).is_err() {
                break;
            }
            hops += 1;
            let offset = (hops * hop_size).saturating_sub(pending + 1).min(last_index);

            let result = self.analysis.analyze(&self.frame, &self.controls);
            if !result.is_silent() {
                log::trace!("pitch {:.2} Hz, level {:.2} dB", result.pitch_hz, result.level);
            }
            let emission = self.tracker.update(&result);
            for event in &emission {
                self.emit(*event, offset, sink);
            }
        }
        hops
    }

    /// Release the sounding note, e.g. when the host deactivates the plugin.
    pub fn flush<S: EventSink + ?Sized>(&mut self, sink: &mut S) {
        if let Some(off) = self.tracker.release() {
            self.emit(off, 0, sink);
        }
    }

    /// Drop buffered audio and all tracking state. Emits nothing.
    pub fn reset(&mut self) {
        self.ring.clear();
        self.analysis.reset();
        self.tracker.reset();
    }

    fn emit<S: EventSink + ?Sized>(&self, event: NoteEvent, offset: usize, sink: &mut S) {
        let offset = u32::try_from(offset).unwrap_or(u32::MAX);
        let chord = self.harmonizer.harmonize(event);
        let timed: [TimedNoteEvent; CHORD_SIZE] =
            chord.events().map(|event| TimedNoteEvent { offset, event });
        sink.on_chord(&timed);
    }
}

/// One independent [`ChannelPipeline`] per audio channel.
#[derive(Debug)]
pub struct MultiChannelPipeline {
    channels: Vec<ChannelPipeline>,
}

impl MultiChannelPipeline {
    /// Number of channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Returns `true` when there are no channels; never the case for a
    /// built coordinator.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// The pipeline of channel `index`.
    pub fn channel(&self, index: usize) -> Option<&ChannelPipeline> {
        self.channels.get(index)
    }

    /// The pipeline of channel `index`, mutably.
    pub fn channel_mut(&mut self, index: usize) -> Option<&mut ChannelPipeline> {
        self.channels.get_mut(index)
    }

    /// Apply a control value to every channel. Nothing changes if the value
    /// is invalid.
    pub fn set_control(&mut self, port: ControlPort, value: f32) -> Result<(), PipelineError> {
        Controls::default()
            .set(port, value)
            .inspect_err(|err| log::warn!("{err}"))?;
        for channel in &mut self.channels {
            channel.controls.set(port, value)?;
        }
        Ok(())
    }

    /// Total samples dropped across channels.
    pub fn overruns(&self) -> u64 {
        self.channels.iter().map(ChannelPipeline::overruns).sum()
    }

    /// Process one block per channel, each channel reporting to its own sink.
    /// Returns the total number of hops analysed.
    pub fn process<S: EventSink>(
        &mut self,
        inputs: &[&[f32]],
        sinks: &mut [S],
    ) -> Result<usize, PipelineError> {
        self.check_channels(inputs.len(), sinks.len())?;
        Ok(self
            .channels
            .iter_mut()
            .zip(inputs)
            .zip(sinks.iter_mut())
            .map(|((channel, input), sink)| channel.process(input, sink))
            .sum())
    }

    /// Release sounding notes on every channel.
    pub fn flush<S: EventSink>(&mut self, sinks: &mut [S]) -> Result<(), PipelineError> {
        self.check_channels(self.channels.len(), sinks.len())?;
        for (channel, sink) in self.channels.iter_mut().zip(sinks.iter_mut()) {
            channel.flush(sink);
        }
        Ok(())
    }

    /// Reset every channel.
    pub fn reset(&mut self) {
        self.channels.iter_mut().for_each(ChannelPipeline::reset);
    }

    fn check_channels(&self, inputs: usize, sinks: usize) -> Result<(), PipelineError> {
        let expected = self.channels.len();
        if inputs != expected || sinks != expected {
            return Err(PipelineError::ChannelMismatch {
                expected,
                inputs,
                sinks,
            });
        }
        Ok(())
    }
}
