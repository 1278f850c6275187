//! Analysis adapter
//!
//! Drives the external onset detector and pitch estimator on every hop and
//! packages their output into an [`AnalysisResult`]. The estimators
//! themselves are supplied by an [`AnalysisBackend`]; one instance per
//! method variant is created up front so the method can be switched between
//! hops without allocating.

use std::fmt::Display;
use std::str::FromStr;

use thiserror::Error;

use crate::pipeline::Controls;

/// Level reported for frames below the silence threshold.
pub const SILENT_LEVEL: f32 = 1.0;

/// Number of onset detection methods.
const NUM_ONSET_METHODS: usize = 9;

/// Number of pitch detection methods.
const NUM_PITCH_METHODS: usize = 6;

/// Errors raised while setting up the analysis stage.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The backend could not create a detector.
    #[error("backend failed to create `{method}` detector: {msg}")]
    Backend {
        /// Name of the method that failed.
        method: &'static str,
        /// Backend-specific description.
        msg: String,
    },

    /// The window/hop/sample rate combination is unusable.
    #[error("invalid analysis setup: {0}")]
    InvalidSetup(String),

    /// A method name did not match any known method.
    #[error("unknown {kind} method `{name}`")]
    UnknownMethod {
        /// "onset" or "pitch".
        kind: &'static str,
        /// The name that was looked up.
        name: String,
    },
}

/// Onset detection functions, in control-port order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OnsetMethod {
    /// Backend default.
    Default,
    /// Local energy.
    Energy,
    /// High frequency content.
    Hfc,
    /// Complex domain.
    Complex,
    /// Phase deviation.
    Phase,
    /// Spectral difference.
    SpecDiff,
    /// Kullback-Liebler.
    Kl,
    /// Modified Kullback-Liebler.
    Mkl,
    /// Spectral flux.
    SpecFlux,
}

/// (method, name) in control-port order
const ONSET_METHODS: [(OnsetMethod, &str); NUM_ONSET_METHODS] = [
    (OnsetMethod::Default, "default"),
    (OnsetMethod::Energy, "energy"),
    (OnsetMethod::Hfc, "hfc"),
    (OnsetMethod::Complex, "complex"),
    (OnsetMethod::Phase, "phase"),
    (OnsetMethod::SpecDiff, "specdiff"),
    (OnsetMethod::Kl, "kl"),
    (OnsetMethod::Mkl, "mkl"),
    (OnsetMethod::SpecFlux, "specflux"),
];

impl OnsetMethod {
    /// Every method, in control-port order.
    pub const ALL: [OnsetMethod; NUM_ONSET_METHODS] = [
        OnsetMethod::Default,
        OnsetMethod::Energy,
        OnsetMethod::Hfc,
        OnsetMethod::Complex,
        OnsetMethod::Phase,
        OnsetMethod::SpecDiff,
        OnsetMethod::Kl,
        OnsetMethod::Mkl,
        OnsetMethod::SpecFlux,
    ];

    /// Position of the method in [`OnsetMethod::ALL`].
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The method at `index`, if any.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Decode a method selector control value.
    pub fn from_control(value: f32) -> Option<Self> {
        control_index(value).and_then(Self::from_index)
    }

    /// Backend name of the method.
    pub const fn name(self) -> &'static str {
        ONSET_METHODS[self as usize].1
    }
}

impl Display for OnsetMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OnsetMethod {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ONSET_METHODS
            .iter()
            .find(|(_, name)| *name == s)
            .map(|&(method, _)| method)
            .ok_or_else(|| AnalysisError::UnknownMethod {
                kind: "onset",
                name: s.to_string(),
            })
    }
}

/// Pitch detection functions, in control-port order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PitchMethod {
    /// Backend default.
    Default,
    /// Schmitt trigger.
    Schmitt,
    /// Fast harmonic comb.
    Fcomb,
    /// Multiple-comb filter.
    Mcomb,
    /// YIN.
    Yin,
    /// Spectral YIN.
    YinFft,
}

/// (method, name) in control-port order
const PITCH_METHODS: [(PitchMethod, &str); NUM_PITCH_METHODS] = [
    (PitchMethod::Default, "default"),
    (PitchMethod::Schmitt, "schmitt"),
    (PitchMethod::Fcomb, "fcomb"),
    (PitchMethod::Mcomb, "mcomb"),
    (PitchMethod::Yin, "yin"),
    (PitchMethod::YinFft, "yinfft"),
];

impl PitchMethod {
    /// Every method, in control-port order.
    pub const ALL: [PitchMethod; NUM_PITCH_METHODS] = [
        PitchMethod::Default,
        PitchMethod::Schmitt,
        PitchMethod::Fcomb,
        PitchMethod::Mcomb,
        PitchMethod::Yin,
        PitchMethod::YinFft,
    ];

    /// Position of the method in [`PitchMethod::ALL`].
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The method at `index`, if any.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Decode a method selector control value.
    pub fn from_control(value: f32) -> Option<Self> {
        control_index(value).and_then(Self::from_index)
    }

    /// Backend name of the method.
    pub const fn name(self) -> &'static str {
        PITCH_METHODS[self as usize].1
    }
}

impl Display for PitchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PitchMethod {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PITCH_METHODS
            .iter()
            .find(|(_, name)| *name == s)
            .map(|&(method, _)| method)
            .ok_or_else(|| AnalysisError::UnknownMethod {
                kind: "pitch",
                name: s.to_string(),
            })
    }
}

/// Selector values are floats; truncate toward zero like a C cast.
fn control_index(value: f32) -> Option<usize> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some(value.trunc() as usize)
}

/// Onset detector supplied by an external analysis library.
pub trait OnsetDetector: Send {
    /// Peak-picking threshold.
    fn set_threshold(&mut self, threshold: f32);

    /// Silence threshold in dB.
    fn set_silence(&mut self, silence_db: f32);

    /// Consume one hop and report whether an onset occurred in it.
    fn detect(&mut self, frame: &[f32]) -> bool;

    /// Forget any internal history.
    fn reset(&mut self) {}
}

/// Pitch estimator supplied by an external analysis library.
pub trait PitchDetector: Send {
    /// Estimator tolerance (meaning is method specific).
    fn set_tolerance(&mut self, tolerance: f32);

    /// Silence threshold in dB; quieter frames report no pitch.
    fn set_silence(&mut self, silence_db: f32);

    /// Consume one hop and return the fundamental frequency in Hz.
    fn detect(&mut self, frame: &[f32]) -> f32;

    /// Forget any internal history.
    fn reset(&mut self) {}
}

/// Sizes handed to the backend when detectors are created.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct AnalysisSetup {
    /// Analysis window in samples.
    pub window_size: usize,
    /// Samples per hop.
    pub hop_size: usize,
    /// Sample rate in Hz.
    pub sample_rate: f32,
}

impl AnalysisSetup {
    /// Pitch estimators analyse a longer window than onset detectors.
    pub fn pitch_window_size(&self) -> usize {
        4 * self.window_size
    }

    fn validate(&self) -> Result<(), AnalysisError> {
        if self.hop_size == 0 || self.window_size == 0 {
            return Err(AnalysisError::InvalidSetup(
                "window and hop size must be greater than zero".into(),
            ));
        }
        if self.hop_size > self.window_size {
            return Err(AnalysisError::InvalidSetup(format!(
                "hop size {} exceeds window size {}",
                self.hop_size, self.window_size
            )));
        }
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(AnalysisError::InvalidSetup(format!(
                "sample rate {} is not positive",
                self.sample_rate
            )));
        }
        Ok(())
    }
}

impl Default for AnalysisSetup {
    fn default() -> Self {
        AnalysisSetup {
            window_size: 512,
            hop_size: 256,
            sample_rate: 44_100.0,
        }
    }
}

/// Factory for the external detectors.
pub trait AnalysisBackend {
    /// Create an onset detector running `method`.
    fn onset(
        &mut self,
        method: OnsetMethod,
        setup: &AnalysisSetup,
    ) -> Result<Box<dyn OnsetDetector>, AnalysisError>;

    /// Create a pitch detector running `method`.
    fn pitch(
        &mut self,
        method: PitchMethod,
        setup: &AnalysisSetup,
    ) -> Result<Box<dyn PitchDetector>, AnalysisError>;
}

/// Output of one analysis pass.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct AnalysisResult {
    /// An onset occurred in this hop.
    pub onset: bool,
    /// Estimated fundamental in Hz, `0.0` when unvoiced.
    pub pitch_hz: f32,
    /// Level in dB SPL, or [`SILENT_LEVEL`] below the silence threshold.
    pub level: f32,
}

impl AnalysisResult {
    /// Returns `true` when the frame was below the silence threshold.
    #[inline]
    pub fn is_silent(&self) -> bool {
        self.level == SILENT_LEVEL
    }
}

/// Owns one detector per method and runs the selected pair each hop.
pub struct AnalysisAdapter {
    setup: AnalysisSetup,
    onsets: Vec<Box<dyn OnsetDetector>>,
    pitches: Vec<Box<dyn PitchDetector>>,
}

impl AnalysisAdapter {
    /// Instantiate every onset and pitch method through `backend`.
    ///
    /// If any detector fails to build, those already created are dropped
    /// before the error is returned.
    pub fn new<B: AnalysisBackend + ?Sized>(
        backend: &mut B,
        setup: AnalysisSetup,
    ) -> Result<Self, AnalysisError> {
        setup.validate()?;

        let onsets = OnsetMethod::ALL
            .iter()
            .map(|&method| backend.onset(method, &setup))
            .collect::<Result<Vec<_>, _>>()?;
        let pitches = PitchMethod::ALL
            .iter()
            .map(|&method| backend.pitch(method, &setup))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(AnalysisAdapter {
            setup,
            onsets,
            pitches,
        })
    }

    /// Sizes the detectors were created with.
    pub fn setup(&self) -> &AnalysisSetup {
        &self.setup
    }

    /// Reset every detector, selected or not.
    pub fn reset(&mut self) {
        self.onsets.iter_mut().for_each(|detector| detector.reset());
        self.pitches.iter_mut().for_each(|detector| detector.reset());
    }

    /// Analyse one hop with the methods and thresholds in `controls`.
    pub fn analyze(&mut self, frame: &[f32], controls: &Controls) -> AnalysisResult {
        let onset_detector = &mut self.onsets[controls.onset_method.index()];
        onset_detector.set_silence(controls.silence_threshold);
        onset_detector.set_threshold(controls.onset_threshold);
        let onset = onset_detector.detect(frame);

        let pitch_detector = &mut self.pitches[controls.pitch_method.index()];
        pitch_detector.set_tolerance(controls.pitch_tolerance);
        pitch_detector.set_silence(controls.silence_threshold);
        let pitch_hz = sanitize_pitch(pitch_detector.detect(frame));

        AnalysisResult {
            onset,
            pitch_hz,
            level: level_detection(frame, controls.silence_threshold),
        }
    }
}

impl std::fmt::Debug for AnalysisAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisAdapter")
            .field("setup", &self.setup)
            .field("onset_detectors", &self.onsets.len())
            .field("pitch_detectors", &self.pitches.len())
            .finish()
    }
}

/// Map unusable estimates to "no pitch".
#[inline]
pub fn sanitize_pitch(pitch_hz: f32) -> f32 {
    if pitch_hz.is_finite() && pitch_hz > 0.0 {
        pitch_hz
    } else {
        0.0
    }
}

/// Sound pressure level of `frame` in dB (full scale = 0 dB).
pub fn db_spl(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return f32::NEG_INFINITY;
    }
    let energy = frame.iter().map(|x| x * x).sum::<f32>() / frame.len() as f32;
    10.0 * energy.log10()
}

/// Level of `frame` in dB, or [`SILENT_LEVEL`] when below `silence_threshold`.
pub fn level_detection(frame: &[f32], silence_threshold: f32) -> f32 {
    let level = db_spl(frame);
    if level < silence_threshold || level.is_nan() {
        SILENT_LEVEL
    } else {
        level
    }
}
