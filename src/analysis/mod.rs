//! Live signal analysis: spectrum, scalar features, MFCC, pitch and beat.
//!
//! The [`Analyzer`] runs on the rendering clock against the master mix and
//! writes into preallocated [`AnalysisSnapshot`]s; consumers get a copy and
//! never see a snapshot being written.

pub mod beat;
pub mod features;
pub mod pitch;

use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use serde::Serialize;

use crate::config::{AnalysisConfig, BeatConfig};
use crate::dsp::curves::{DctTable, MelFilter, blackman_window, mel_filter_bank};
use crate::error::Result;

pub use beat::{BeatDetector, BeatInfo};
pub use features::{SpectralFeatures, TimeFeatures};
pub use pitch::{PitchEstimate, detect_pitch};

/// Byte-scale range of the analyser (`getByteFrequencyData`), dB.
const BYTE_RANGE_DB: (f32, f32) = (features::MIN_DECIBELS, -30.0);

/// Liveness thresholds for `is_active`.
const ACTIVE_VOLUME: f64 = 0.01;
const ACTIVE_RMS: f64 = 0.001;

const MEL_MIN_HZ: f64 = 20.0;
const MEL_MAX_HZ: f64 = 8000.0;

/// Latest analysis of the master output.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSnapshot {
    /// Smoothed magnitude per bin in dB, `fft_size / 2` bins.
    pub frequency_data: Vec<f32>,
    /// Most recent `fft_size` samples, oldest first.
    pub time_data: Vec<f32>,
    pub sample_rate: f64,
    pub rms: f64,
    pub peak: f64,
    pub zero_crossing_rate: f64,
    pub spectral_centroid: f64,
    pub spectral_spread: f64,
    pub spectral_rolloff: f64,
    /// Mean byte-scaled spectrum level, 0..1.
    pub volume: f64,
    pub is_active: bool,
    pub mfcc: Vec<f32>,
    pub beat: BeatInfo,
    /// Render-clock time at the end of the window, seconds.
    pub time: f64,
}

impl AnalysisSnapshot {
    /// Empty snapshot with buffers sized for `config`.
    pub fn with_capacity(config: &AnalysisConfig, sample_rate: f64) -> Self {
        AnalysisSnapshot {
            frequency_data: vec![features::MIN_DECIBELS; config.fft_size / 2],
            time_data: vec![0.0; config.fft_size],
            sample_rate,
            mfcc: vec![0.0; config.mfcc_coefficients],
            ..AnalysisSnapshot::default()
        }
    }

    /// Centre frequency of bin `index`.
    pub fn bin_frequency(&self, index: usize) -> f64 {
        if self.time_data.is_empty() {
            return 0.0;
        }
        index as f64 * self.sample_rate / self.time_data.len() as f64
    }

    /// Autocorrelation pitch of the time window.
    pub fn pitch(&self, min_frequency: f64, max_frequency: f64) -> PitchEstimate {
        detect_pitch(&self.time_data, self.sample_rate, min_frequency, max_frequency)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Spectrum and feature extraction with all buffers allocated up front.
pub struct Analyzer {
    config: AnalysisConfig,
    sample_rate: f64,
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    input: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
    primed: bool,
    magnitudes: Vec<f32>,
    power: Vec<f32>,
    mel_filters: Vec<MelFilter>,
    mel_energies: Vec<f32>,
    dct: DctTable,
    beat: BeatDetector,
}

impl std::fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyzer")
            .field("fft_size", &self.config.fft_size)
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

impl Analyzer {
    /// Assumes a validated `config`.
    pub fn new(config: &AnalysisConfig, beat: &BeatConfig, sample_rate: f64) -> Self {
        let n = config.fft_size;
        let fft = RealFftPlanner::<f32>::new().plan_fft_forward(n);
        let input = fft.make_input_vec();
        let spectrum = fft.make_output_vec();
        let scratch = fft.make_scratch_vec();
        let bins = n / 2 + 1;
        Analyzer {
            config: config.clone(),
            sample_rate,
            window: blackman_window(n),
            input,
            spectrum,
            scratch,
            smoothed: vec![0.0; bins],
            primed: false,
            magnitudes: vec![0.0; n / 2],
            power: vec![0.0; bins],
            mel_filters: mel_filter_bank(config.mel_bands, n, sample_rate, MEL_MIN_HZ, MEL_MAX_HZ),
            mel_energies: vec![0.0; config.mel_bands],
            dct: DctTable::new(config.mel_bands, config.mfcc_coefficients),
            beat: BeatDetector::new(beat.clone()),
            fft,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.config.fft_size
    }

    /// Samples between snapshots.
    pub fn interval_samples(&self) -> usize {
        ((self.config.interval_ms * self.sample_rate / 1000.0).round() as usize).max(1)
    }

    /// Analyse `window` (the last `fft_size` samples, oldest first) into `out`.
    ///
    /// Shorter windows are zero-padded at the front. Does not allocate when
    /// `out` was built by [`AnalysisSnapshot::with_capacity`] with the same config.
    pub fn analyze(&mut self, window: &[f32], time: f64, out: &mut AnalysisSnapshot) {
        let n = self.config.fft_size;
        let window = &window[window.len().saturating_sub(n)..];
        let pad = n - window.len();

        out.time_data.resize(n, 0.0);
        out.time_data[..pad].fill(0.0);
        out.time_data[pad..].copy_from_slice(window);
        out.sample_rate = self.sample_rate;
        out.time = time;

        let t = features::time_features(&out.time_data);
        out.rms = t.rms;
        out.peak = t.peak;
        out.zero_crossing_rate = t.zero_crossing_rate;

        for ((x, s), w) in self.input.iter_mut().zip(&out.time_data).zip(&self.window) {
            *x = s * w;
        }
        let _ = self
            .fft
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch);

        let smoothing = if self.primed { self.config.smoothing as f32 } else { 0.0 };
        self.primed = true;
        let scale = 1.0 / n as f32;
        for ((sm, c), p) in self.smoothed.iter_mut().zip(&self.spectrum).zip(self.power.iter_mut()) {
            let mag = c.norm() * scale;
            *sm = smoothing * *sm + (1.0 - smoothing) * mag;
            *p = mag * mag;
        }

        out.frequency_data.resize(n / 2, features::MIN_DECIBELS);
        let (lo, hi) = BYTE_RANGE_DB;
        let mut byte_sum = 0.0f64;
        for ((db, m), sm) in out
            .frequency_data
            .iter_mut()
            .zip(self.magnitudes.iter_mut())
            .zip(&self.smoothed)
        {
            *db = features::linear_to_db(*sm);
            *m = features::db_to_linear(*db);
            byte_sum += ((*db - lo) / (hi - lo)).clamp(0.0, 1.0) as f64;
        }
        out.volume = byte_sum / (n / 2) as f64;

        let bin_hz = self.sample_rate / n as f64;
        let s = features::spectral_features(&self.magnitudes, bin_hz, self.config.rolloff_percent);
        out.spectral_centroid = s.centroid;
        out.spectral_spread = s.spread;
        out.spectral_rolloff = s.rolloff;

        for (e, filter) in self.mel_energies.iter_mut().zip(&self.mel_filters) {
            *e = (filter.apply(&self.power) + 1e-10).ln();
        }
        out.mfcc.resize(self.dct.outputs(), 0.0);
        self.dct.apply(&self.mel_energies, &mut out.mfcc);

        out.is_active = out.volume > ACTIVE_VOLUME || out.rms > ACTIVE_RMS;
        out.beat = self.beat.process(out.rms, time);
    }

    pub fn reset(&mut self) {
        self.smoothed.fill(0.0);
        self.primed = false;
        self.beat.reset();
    }
}

/// One-off analysis of an arbitrary buffer (its last `fft_size` samples).
pub fn analyze_samples(samples: &[f32], sample_rate: f64, config: &AnalysisConfig) -> AnalysisSnapshot {
    let mut analyzer = Analyzer::new(config, &BeatConfig::default(), sample_rate);
    let mut snapshot = AnalysisSnapshot::with_capacity(config, sample_rate);
    let time = samples.len() as f64 / sample_rate;
    analyzer.analyze(samples, time, &mut snapshot);
    snapshot
}
