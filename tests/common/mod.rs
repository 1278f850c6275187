//! Scripted detectors shared by the integration tests.
//!
//! The onset and pitch answers for every hop come from a script instead of
//! real signal analysis; the audio itself only decides the level.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pitch_harmonizer::{
    AnalysisBackend, AnalysisError, AnalysisSetup, Controls, OnsetDetector, OnsetMethod,
    PitchDetector, PitchMethod,
};

/// Sample value of a loud hop. 0.25 mean energy, about -6.02 dB.
pub const LOUD: f32 = 0.5;

/// Velocity produced by a [`LOUD`] hop: 127 + floor(-6.02).
pub const LOUD_VELOCITY: u8 = 120;

/// What the detectors report for one hop, and whether the hop is audible.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Hop {
    pub onset: bool,
    pub pitch_hz: f32,
    pub loud: bool,
}

/// Loud hop with a pitch, optionally an onset.
pub fn tone(onset: bool, pitch_hz: f32) -> Hop {
    Hop {
        onset,
        pitch_hz,
        loud: true,
    }
}

/// Silent hop, optionally flagged as an onset.
pub fn silence(onset: bool) -> Hop {
    Hop {
        onset,
        pitch_hz: 0.0,
        loud: false,
    }
}

/// Audio matching a script: constant [`LOUD`] for loud hops, zeros otherwise.
pub fn render(script: &[Hop], hop_size: usize) -> Vec<f32> {
    script
        .iter()
        .flat_map(|hop| {
            let value = if hop.loud { LOUD } else { 0.0 };
            std::iter::repeat(value).take(hop_size)
        })
        .collect()
}

/// Controls used by most tests: -60 dB silence gate, default methods.
pub fn test_controls() -> Controls {
    Controls {
        silence_threshold: -60.0,
        ..Controls::default()
    }
}

struct Cursor {
    script: Arc<[Hop]>,
    clock: Arc<AtomicUsize>,
}

impl Cursor {
    fn current(&self) -> Hop {
        let index = self.clock.load(Ordering::SeqCst).saturating_sub(1);
        self.script.get(index).copied().unwrap_or(silence(false))
    }
}

struct ScriptedOnset {
    method: OnsetMethod,
    cursor: Arc<Cursor>,
    last_used: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
}

impl OnsetDetector for ScriptedOnset {
    fn set_threshold(&mut self, _: f32) {}

    fn set_silence(&mut self, _: f32) {}

    fn detect(&mut self, _: &[f32]) -> bool {
        self.cursor.clock.fetch_add(1, Ordering::SeqCst);
        self.last_used.store(self.method.index(), Ordering::SeqCst);
        self.cursor.current().onset
    }
}

impl Drop for ScriptedOnset {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ScriptedPitch {
    method: PitchMethod,
    cursor: Arc<Cursor>,
    last_used: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
}

impl PitchDetector for ScriptedPitch {
    fn set_tolerance(&mut self, _: f32) {}

    fn set_silence(&mut self, _: f32) {}

    fn detect(&mut self, _: &[f32]) -> f32 {
        self.last_used.store(self.method.index(), Ordering::SeqCst);
        self.cursor.current().pitch_hz
    }
}

impl Drop for ScriptedPitch {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Hands out scripted detectors. Every channel built from the backend gets
/// the next script in turn and its own hop clock.
pub struct ScriptedBackend {
    scripts: Vec<Arc<[Hop]>>,
    channels_built: usize,
    cursor: Option<Arc<Cursor>>,
    fail_on: Option<PitchMethod>,
    /// Index of the onset method used for the most recent hop.
    pub last_onset: Arc<AtomicUsize>,
    /// Index of the pitch method used for the most recent hop.
    pub last_pitch: Arc<AtomicUsize>,
    /// Detectors currently alive.
    pub live: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Hop>) -> Self {
        Self::per_channel(vec![script])
    }

    pub fn per_channel(scripts: Vec<Vec<Hop>>) -> Self {
        ScriptedBackend {
            scripts: scripts.into_iter().map(Arc::from).collect(),
            channels_built: 0,
            cursor: None,
            fail_on: None,
            last_onset: Arc::new(AtomicUsize::new(usize::MAX)),
            last_pitch: Arc::new(AtomicUsize::new(usize::MAX)),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make creation of `method` fail.
    pub fn failing_on(mut self, method: PitchMethod) -> Self {
        self.fail_on = Some(method);
        self
    }

    fn cursor(&self, method: &'static str) -> Result<Arc<Cursor>, AnalysisError> {
        self.cursor.clone().ok_or(AnalysisError::Backend {
            method,
            msg: "no channel started".into(),
        })
    }
}

impl AnalysisBackend for ScriptedBackend {
    fn onset(
        &mut self,
        method: OnsetMethod,
        _: &AnalysisSetup,
    ) -> Result<Box<dyn OnsetDetector>, AnalysisError> {
        if method == OnsetMethod::Default {
            let script = self.scripts[self.channels_built % self.scripts.len()].clone();
            self.channels_built += 1;
            self.cursor = Some(Arc::new(Cursor {
                script,
                clock: Arc::new(AtomicUsize::new(0)),
            }));
        }
        let cursor = self.cursor(method.name())?;
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedOnset {
            method,
            cursor,
            last_used: self.last_onset.clone(),
            live: self.live.clone(),
        }))
    }

    fn pitch(
        &mut self,
        method: PitchMethod,
        _: &AnalysisSetup,
    ) -> Result<Box<dyn PitchDetector>, AnalysisError> {
        if self.fail_on == Some(method) {
            return Err(AnalysisError::Backend {
                method: method.name(),
                msg: "refused".into(),
            });
        }
        let cursor = self.cursor(method.name())?;
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedPitch {
            method,
            cursor,
            last_used: self.last_pitch.clone(),
            live: self.live.clone(),
        }))
    }
}
