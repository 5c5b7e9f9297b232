//! Compressor effect: dynamics processing for audio leveling.
//!
//! Implements a feed-forward compressor with threshold, ratio, knee,
//! attack, and release parameters matching the WebAudio DynamicsCompressorNode,
//! and a three-band variant built from it.

use crate::dsp::effect::ParamMap;
use crate::dsp::filter::{BiquadFilter, FilterType};

/// A stereo dynamics compressor.
#[derive(Debug, Clone)]
pub struct Compressor {
    sample_rate: f64,

    /// Threshold in dB (typical: -50 to 0).
    pub threshold: f64,
    /// Compression ratio (e.g., 4.0 = 4:1 compression).
    pub ratio: f64,
    /// Knee width in dB (0 = hard knee, higher = softer transition).
    pub knee: f64,
    /// Attack time in seconds.
    pub attack: f64,
    /// Release time in seconds.
    pub release: f64,
    /// Makeup gain in dB.
    pub makeup_gain: f64,

    // Internal state
    envelope: f64, // Current envelope level (linear)
    attack_coef: f64,
    release_coef: f64,
}

impl Compressor {
    /// Create a new compressor with default settings.
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            threshold: -24.0,
            ratio: 4.0,
            knee: 6.0,
            attack: 0.003,   // 3ms
            release: 0.25,   // 250ms
            makeup_gain: 0.0,
            envelope: 0.0,
            attack_coef: 0.0,
            release_coef: 0.0,
        }
        .with_coefficients()
    }

    pub fn from_params(params: &ParamMap, sample_rate: f64) -> Self {
        let mut c = Self::new(sample_rate);
        for id in ["threshold", "ratio", "knee", "attack", "release", "makeup"] {
            c.set_param(id, params.get(id));
        }
        c
    }

    pub fn set_param(&mut self, id: &str, value: f64) {
        match id {
            "threshold" => self.threshold = value.clamp(-100.0, 0.0),
            "ratio" => self.ratio = value.max(1.0),
            "knee" => self.knee = value.max(0.0),
            "attack" => {
                self.attack = value.max(1e-5);
                self.update_coefficients();
            }
            "release" => {
                self.release = value.max(1e-5);
                self.update_coefficients();
            }
            "makeup" => self.makeup_gain = value,
            _ => {}
        }
    }

    fn with_coefficients(mut self) -> Self {
        self.update_coefficients();
        self
    }

    /// Recompute the envelope follower smoothing after attack/release changes.
    pub fn update_coefficients(&mut self) {
        self.attack_coef = (-1.0 / (self.attack * self.sample_rate)).exp();
        self.release_coef = (-1.0 / (self.release * self.sample_rate)).exp();
    }

    /// Convert linear amplitude to dB.
    #[inline]
    fn linear_to_db(linear: f64) -> f64 {
        if linear <= 0.0 {
            -120.0
        } else {
            20.0 * linear.log10()
        }
    }

    /// Convert dB to linear amplitude.
    #[inline]
    fn db_to_linear(db: f64) -> f64 {
        10.0_f64.powf(db / 20.0)
    }

    /// Compute gain reduction for a given input level (in dB).
    #[inline]
    fn compute_gain(&self, input_db: f64) -> f64 {
        let threshold = self.threshold;
        let ratio = self.ratio;
        let knee = self.knee;

        if knee <= 0.0 {
            // Hard knee
            if input_db <= threshold {
                0.0 // No gain reduction
            } else {
                // Gain reduction = (input - threshold) * (1 - 1/ratio)
                (threshold - input_db) * (1.0 - 1.0 / ratio)
            }
        } else {
            // Soft knee
            let half_knee = knee / 2.0;
            let knee_start = threshold - half_knee;
            let knee_end = threshold + half_knee;

            if input_db <= knee_start {
                0.0 // Below knee, no compression
            } else if input_db >= knee_end {
                // Above knee, full compression
                (threshold - input_db) * (1.0 - 1.0 / ratio)
            } else {
                // In the knee region - quadratic interpolation
                let x = input_db - knee_start;
                let knee_factor = x / knee;
                -knee_factor * knee_factor * (1.0 - 1.0 / ratio) * half_knee
            }
        }
    }

    /// Process a stereo sample pair.
    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        // Compute input level (peak of L/R)
        let input_level = (left.abs()).max(right.abs()) as f64;

        // Envelope follower (peak detection with attack/release)
        let coef = if input_level > self.envelope {
            self.attack_coef
        } else {
            self.release_coef
        };
        self.envelope = coef * self.envelope + (1.0 - coef) * input_level;

        // Convert envelope to dB
        let envelope_db = Self::linear_to_db(self.envelope);

        // Compute gain reduction
        let gain_reduction_db = self.compute_gain(envelope_db);

        // Apply makeup gain and convert to linear
        let total_gain_db = gain_reduction_db + self.makeup_gain;
        let gain = Self::db_to_linear(total_gain_db) as f32;

        (left * gain, right * gain)
    }

    /// Process a block of stereo audio in-place.
    pub fn process_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            (*l, *r) = self.process(*l, *r);
        }
    }
}

/// One crossover band: a filter per channel feeding its own compressor.
#[derive(Debug, Clone)]
struct Band {
    filter_l: BiquadFilter,
    filter_r: BiquadFilter,
    compressor: Compressor,
}

impl Band {
    fn new(filter_type: FilterType, sample_rate: f64) -> Self {
        Self {
            filter_l: BiquadFilter::new(filter_type, sample_rate),
            filter_r: BiquadFilter::new(filter_type, sample_rate),
            compressor: Compressor::new(sample_rate),
        }
    }

    fn tune(&mut self, frequency: f64, q: f64) {
        for f in [&mut self.filter_l, &mut self.filter_r] {
            f.set_frequency(frequency);
            f.set_q(q);
        }
    }
}

/// Three-band compressor: lowpass / bandpass / highpass split, each band
/// compressed independently, then summed.
#[derive(Debug, Clone)]
pub struct MultibandCompressor {
    bands: [Band; 3],
    pub low_crossover: f64,
    pub high_crossover: f64,
}

impl MultibandCompressor {
    pub fn new(sample_rate: f64) -> Self {
        let mut m = Self {
            bands: [
                Band::new(FilterType::Lowpass, sample_rate),
                Band::new(FilterType::Bandpass, sample_rate),
                Band::new(FilterType::Highpass, sample_rate),
            ],
            low_crossover: 200.0,
            high_crossover: 3000.0,
        };
        m.retune();
        m
    }

    pub fn from_params(params: &ParamMap, sample_rate: f64) -> Self {
        let mut m = Self::new(sample_rate);
        for spec in params.kind().params() {
            m.set_param(spec.id, params.get(spec.id));
        }
        m
    }

    pub fn set_param(&mut self, id: &str, value: f64) {
        match id {
            "lowCrossover" => {
                self.low_crossover = value.max(1.0);
                self.retune();
            }
            "highCrossover" => {
                self.high_crossover = value.max(1.0);
                self.retune();
            }
            _ => {
                for band in &mut self.bands {
                    band.compressor.set_param(id, value);
                }
            }
        }
    }

    fn retune(&mut self) {
        let lo = self.low_crossover.min(self.high_crossover);
        let hi = self.high_crossover.max(lo * 1.01);
        let centre = (lo * hi).sqrt();
        let [low, mid, high] = &mut self.bands;
        low.tune(lo, 0.707);
        mid.tune(centre, centre / (hi - lo));
        high.tune(hi, 0.707);
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let mut out_l = 0.0f32;
        let mut out_r = 0.0f32;
        for band in &mut self.bands {
            let l = band.filter_l.process(left as f64) as f32;
            let r = band.filter_r.process(right as f64) as f32;
            let (cl, cr) = band.compressor.process(l, r);
            out_l += cl;
            out_r += cr;
        }
        (out_l, out_r)
    }

    pub fn process_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            (*l, *r) = self.process(*l, *r);
        }
    }

}
