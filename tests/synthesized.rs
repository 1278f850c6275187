//! End-to-end tracking of a synthesized tone with simple FFT-based detectors.

use std::f32::consts::PI;
use std::sync::Arc;

use lazy_static::lazy_static;
use pitch_harmonizer::{
    db_spl, AnalysisBackend, AnalysisError, AnalysisSetup, ChannelPipeline, Controls, MidiBuffer,
    OnsetDetector, OnsetMethod, PitchDetector, PitchMethod,
};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use rustfft::{num_complex::Complex, Fft, FftPlanner};

const SAMPLE_RATE: f32 = 44_100.0;
const HOP: usize = 1024;
const FFT_SIZE: usize = 8 * HOP;
const TONE_HZ: f32 = 220.0;
const TONE_START_HOP: usize = 8;
const TONE_END_HOP: usize = 40;
const TOTAL_HOPS: usize = 56;

lazy_static! {
    /// Silence, a 220 Hz sine at half scale, silence again.
    static ref SIGNAL: Vec<f32> = (0..TOTAL_HOPS * HOP)
        .map(|i| {
            if (TONE_START_HOP * HOP..TONE_END_HOP * HOP).contains(&i) {
                0.5 * (2.0 * PI * TONE_HZ * i as f32 / SAMPLE_RATE).sin()
            } else {
                0.0
            }
        })
        .collect();
}

/// Flags sudden energy jumps (up or down) by a factor of four.
struct EnergyOnset {
    previous: f32,
}

impl OnsetDetector for EnergyOnset {
    fn set_threshold(&mut self, _: f32) {}

    fn set_silence(&mut self, _: f32) {}

    fn detect(&mut self, frame: &[f32]) -> bool {
        let energy = frame.iter().map(|x| x * x).sum::<f32>() / frame.len() as f32;
        let previous = std::mem::replace(&mut self.previous, energy);
        (energy > 1e-6 && energy > 4.0 * previous) || (previous > 1e-6 && energy < previous / 4.0)
    }

    fn reset(&mut self) {
        self.previous = 0.0;
    }
}

/// Strongest spectral peak between 50 Hz and 2 kHz, refined by parabolic
/// interpolation.
struct SpectralPeak {
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
    window: Vec<f32>,
    sample_rate: f32,
    silence: f32,
}

impl SpectralPeak {
    fn new(setup: &AnalysisSetup) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let n = setup.hop_size;
        SpectralPeak {
            fft: planner.plan_fft_forward(FFT_SIZE),
            buffer: vec![Complex { re: 0.0, im: 0.0 }; FFT_SIZE],
            window: (0..n)
                .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / n as f32).cos())
                .collect(),
            sample_rate: setup.sample_rate,
            silence: -90.0,
        }
    }
}

impl PitchDetector for SpectralPeak {
    fn set_tolerance(&mut self, _: f32) {}

    fn set_silence(&mut self, silence_db: f32) {
        self.silence = silence_db;
    }

    fn detect(&mut self, frame: &[f32]) -> f32 {
        if db_spl(frame) < self.silence {
            return 0.0;
        }

        self.buffer.fill(Complex { re: 0.0, im: 0.0 });
        for ((slot, &x), &w) in self.buffer.iter_mut().zip(frame).zip(&self.window) {
            slot.re = x * w;
        }
        self.fft.process(&mut self.buffer);

        let bin_hz = self.sample_rate / FFT_SIZE as f32;
        let low = (50.0 / bin_hz) as usize;
        let high = (2000.0 / bin_hz) as usize;
        let magnitude = |k: usize| self.buffer[k].norm();

        let Some(peak) = (low..=high).max_by(|&a, &b| magnitude(a).total_cmp(&magnitude(b)))
        else {
            return 0.0;
        };
        let (alpha, beta, gamma) = (magnitude(peak - 1), magnitude(peak), magnitude(peak + 1));
        let denominator = alpha - 2.0 * beta + gamma;
        let shift = if denominator.abs() > f32::EPSILON {
            0.5 * (alpha - gamma) / denominator
        } else {
            0.0
        };
        (peak as f32 + shift) * bin_hz
    }
}

struct SpectralBackend;

impl AnalysisBackend for SpectralBackend {
    fn onset(
        &mut self,
        _: OnsetMethod,
        _: &AnalysisSetup,
    ) -> Result<Box<dyn OnsetDetector>, AnalysisError> {
        Ok(Box::new(EnergyOnset { previous: 0.0 }))
    }

    fn pitch(
        &mut self,
        _: PitchMethod,
        setup: &AnalysisSetup,
    ) -> Result<Box<dyn PitchDetector>, AnalysisError> {
        Ok(Box::new(SpectralPeak::new(setup)))
    }
}

/// Run the signal through a pipeline in blocks of `block_len` and return
/// every MIDI message with its absolute sample position.
fn track(block_len: usize) -> Vec<(usize, [u8; 3])> {
    let mut pipeline = ChannelPipeline::builder()
        .sample_rate(SAMPLE_RATE)
        .window_size(HOP)
        .hop_size(HOP)
        .controls(Controls {
            silence_threshold: -60.0,
            ..Controls::default()
        })
        .build(&mut SpectralBackend)
        .expect("pipeline should build");

    let mut midi = MidiBuffer::with_capacity(32, 0);
    let mut out = Vec::new();
    for (index, block) in SIGNAL.chunks(block_len).enumerate() {
        midi.clear();
        pipeline.process(block, &mut midi);
        out.extend(
            midi.messages()
                .iter()
                .map(|m| (index * block_len + m.offset as usize, m.bytes)),
        );
    }
    assert_eq!(midi.dropped(), 0);
    out
}

#[test]
fn test_tone_becomes_one_a3_major_chord() {
    let _ = env_logger::builder().is_test(true).try_init();

    // Default median window of 6: confirmed at the end of the sixth hop of
    // the tone, released at the end of the first silent hop.
    let on_at = (TONE_START_HOP + 6) * HOP - 1;
    let off_at = (TONE_END_HOP + 1) * HOP - 1;

    let block_sizes = [64, 300, 1024, 4096];
    let results: Vec<_> = block_sizes.par_iter().map(|&len| (len, track(len))).collect();

    for (block_len, messages) in results {
        assert_eq!(messages.len(), 6, "block size {block_len}: {messages:?}");

        let (ons, offs) = messages.split_at(3);
        for ((position, bytes), note) in ons.iter().zip([57, 61, 64]) {
            assert_eq!(*position, on_at, "block size {block_len}");
            assert_eq!(bytes[0], 0x90);
            assert_eq!(bytes[1], note);
            assert!((117..=118).contains(&bytes[2]), "velocity {}", bytes[2]);
        }
        for ((position, bytes), note) in offs.iter().zip([57, 61, 64]) {
            assert_eq!(*position, off_at, "block size {block_len}");
            assert_eq!(bytes, &[0x80, note, 0]);
        }
    }
}
