//! Curve and buffer math: waveshaper transfer curves, synthetic impulse
//! responses, mel filter banks, DCT tables and analysis windows.
//!
//! Everything here is pure: the same arguments always produce bit-identical
//! buffers, so units can regenerate curves freely without drifting.

use std::f64::consts::PI;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Default waveshaper table resolution.
pub const DEFAULT_CURVE_SIZE: usize = 4096;

/// Seed for impulse-response noise, fixed so a given room always sounds the same.
pub const IMPULSE_SEED: u64 = 0x5eed_0f_7e11;

/// Early-reflection tap pattern: (offset in seconds, gain).
pub const EARLY_REFLECTIONS: [(f64, f32); 6] = [
    (0.011, 0.72),
    (0.023, 0.58),
    (0.041, 0.46),
    (0.059, 0.35),
    (0.083, 0.26),
    (0.109, 0.18),
];

/// Selectable nonlinear transfer curves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistortionCurve {
    /// `tanh`-based soft clipping.
    Soft,
    /// Linear gain into a hard clamp.
    Hard,
    /// Asymmetric exponential saturation.
    Tube,
    /// Sign-preserving power law.
    Fuzz,
    /// Amplitude quantisation.
    Bitcrush,
}

impl DistortionCurve {
    pub const ALL: [DistortionCurve; 5] = [
        DistortionCurve::Soft,
        DistortionCurve::Hard,
        DistortionCurve::Tube,
        DistortionCurve::Fuzz,
        DistortionCurve::Bitcrush,
    ];

    /// Map a discrete parameter value onto a curve type (rounded, clamped).
    pub fn from_index(value: f32) -> Self {
        let idx = value.round().clamp(0.0, 4.0) as usize;
        Self::ALL[idx]
    }

    pub fn index(self) -> usize {
        Self::ALL.iter().position(|&c| c == self).unwrap_or(0)
    }
}

/// Generate a waveshaper lookup table.
///
/// `amount` is in [0, 100]; `size` is clamped to at least 2 entries.
pub fn distortion_curve(kind: DistortionCurve, amount: f32, size: usize) -> Vec<f32> {
    let mut curve = vec![0.0; size.max(2)];
    fill_distortion_curve(kind, amount, &mut curve);
    curve
}

/// Regenerate a waveshaper table in place (no allocation).
pub fn fill_distortion_curve(kind: DistortionCurve, amount: f32, curve: &mut [f32]) {
    let n = curve.len();
    if n < 2 {
        return;
    }
    let amount = amount.clamp(0.0, 100.0) as f64;
    let k = 1.0 + amount / 10.0;

    for (i, slot) in curve.iter_mut().enumerate() {
        let x = i as f64 * 2.0 / (n - 1) as f64 - 1.0;
        let y = match kind {
            DistortionCurve::Soft => (k * x).tanh() / k.tanh(),
            DistortionCurve::Hard => (x * k).clamp(-1.0, 1.0),
            DistortionCurve::Tube => {
                if x >= 0.0 {
                    (1.0 - (-k * x).exp()) / (1.0 - (-k).exp())
                } else {
                    // Negative half saturates later than the positive one.
                    let kn = k * 0.6;
                    -(1.0 - (kn * x).exp()) / (1.0 - (-kn).exp())
                }
            }
            DistortionCurve::Fuzz => {
                let exponent = 1.0 / (1.0 + amount / 20.0);
                x.signum() * x.abs().powf(exponent)
            }
            DistortionCurve::Bitcrush => {
                let levels = 2.0_f64.powf(8.0 - amount / 12.0).max(1.0);
                (x * levels).round() / levels
            }
        };
        *slot = y.clamp(-1.0, 1.0) as f32;
    }
}

/// Look up a sample in a transfer curve with linear interpolation.
///
/// Inputs outside [-1, 1] saturate at the table ends.
#[inline]
pub fn apply_curve(curve: &[f32], x: f32) -> f32 {
    let n = curve.len();
    if n == 0 {
        return x;
    }
    if n == 1 {
        return curve[0];
    }
    let pos = ((x.clamp(-1.0, 1.0) + 1.0) * 0.5) * (n - 1) as f32;
    let idx = pos as usize;
    if idx >= n - 1 {
        return curve[n - 1];
    }
    let frac = pos - idx as f32;
    curve[idx] + frac * (curve[idx + 1] - curve[idx])
}

/// Generate a stereo impulse response of `(1 - i/len)^exponent` shaped noise.
///
/// Returns `[left, right]`; both channels share the envelope but use
/// independent noise so the tail decorrelates.
pub fn impulse_response(sample_rate: f64, seconds: f64, exponent: f64, seed: u64) -> [Vec<f32>; 2] {
    let len = ((sample_rate * seconds.max(0.0)) as usize).max(1);
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut left = Vec::with_capacity(len);
    let mut right = Vec::with_capacity(len);
    for i in 0..len {
        let env = (1.0 - i as f64 / len as f64).powf(exponent) as f32;
        left.push(rng.gen_range(-1.0f32..1.0) * env);
        right.push(rng.gen_range(-1.0f32..1.0) * env);
    }
    [left, right]
}

/// Blackman window coefficients (the Web-Audio analyser window).
pub fn blackman_window(n: usize) -> Vec<f32> {
    if n < 2 {
        return vec![1.0; n];
    }
    let a0 = 0.42;
    let a1 = 0.5;
    let a2 = 0.08;
    (0..n)
        .map(|i| {
            let t = i as f64 / n as f64;
            (a0 - a1 * (2.0 * PI * t).cos() + a2 * (4.0 * PI * t).cos()) as f32
        })
        .collect()
}

pub fn hz_to_mel(hz: f64) -> f64 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

pub fn mel_to_hz(mel: f64) -> f64 {
    700.0 * (10.0_f64.powf(mel / 2595.0) - 1.0)
}

/// One triangular mel filter, stored sparsely from `start` bin.
#[derive(Debug, Clone)]
pub struct MelFilter {
    pub start: usize,
    pub weights: Vec<f32>,
}

impl MelFilter {
    /// Weighted sum of a power spectrum under this filter.
    #[inline]
    pub fn apply(&self, spectrum: &[f32]) -> f32 {
        self.weights
            .iter()
            .zip(spectrum.iter().skip(self.start))
            .map(|(w, s)| w * s)
            .sum()
    }
}

/// Build a triangular mel filter bank over `fft_size / 2 + 1` bins.
pub fn mel_filter_bank(
    num_filters: usize,
    fft_size: usize,
    sample_rate: f64,
    min_hz: f64,
    max_hz: f64,
) -> Vec<MelFilter> {
    let bins = fft_size / 2 + 1;
    let max_hz = max_hz.min(sample_rate / 2.0);
    let mel_lo = hz_to_mel(min_hz);
    let mel_hi = hz_to_mel(max_hz);
    let bin_width = sample_rate / fft_size as f64;

    let edges: Vec<f64> = (0..num_filters + 2)
        .map(|i| mel_to_hz(mel_lo + (mel_hi - mel_lo) * i as f64 / (num_filters + 1) as f64))
        .collect();

    (0..num_filters)
        .map(|m| {
            let (lo, center, hi) = (edges[m], edges[m + 1], edges[m + 2]);
            let start = ((lo / bin_width).floor() as usize).min(bins - 1);
            let end = ((hi / bin_width).ceil() as usize).min(bins - 1);
            let weights = (start..=end)
                .map(|b| {
                    let f = b as f64 * bin_width;
                    let w = if f < lo || f > hi {
                        0.0
                    } else if f <= center {
                        (f - lo) / (center - lo).max(f64::EPSILON)
                    } else {
                        (hi - f) / (hi - center).max(f64::EPSILON)
                    };
                    w as f32
                })
                .collect();
            MelFilter { start, weights }
        })
        .collect()
}

/// Precomputed orthonormal DCT-II basis.
#[derive(Debug, Clone)]
pub struct DctTable {
    inputs: usize,
    outputs: usize,
    basis: Vec<f32>,
}

impl DctTable {
    pub fn new(inputs: usize, outputs: usize) -> Self {
        let mut basis = Vec::with_capacity(inputs * outputs);
        for k in 0..outputs {
            let scale = if k == 0 {
                (1.0 / inputs as f64).sqrt()
            } else {
                (2.0 / inputs as f64).sqrt()
            };
            for n in 0..inputs {
                let v = scale * (PI * k as f64 * (n as f64 + 0.5) / inputs as f64).cos();
                basis.push(v as f32);
            }
        }
        Self {
            inputs,
            outputs,
            basis,
        }
    }

    /// Transform `input` (len = inputs) into `output` (len = outputs).
    pub fn apply(&self, input: &[f32], output: &mut [f32]) {
        for (k, out) in output.iter_mut().enumerate().take(self.outputs) {
            let row = &self.basis[k * self.inputs..(k + 1) * self.inputs];
            *out = row.iter().zip(input).map(|(b, x)| b * x).sum();
        }
    }

    pub fn outputs(&self) -> usize {
        self.outputs
    }
}

/// `count` logarithmically spaced frequencies from `lo` to `hi` inclusive.
pub fn log_spaced(count: usize, lo: f64, hi: f64) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![(lo * hi).sqrt()],
        _ => {
            let ratio = (hi / lo).ln();
            (0..count)
                .map(|i| lo * (ratio * i as f64 / (count - 1) as f64).exp())
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn curves_are_deterministic() {
        for kind in DistortionCurve::ALL {
            for amount in [0.0, 13.0, 50.0, 99.5] {
                let a = distortion_curve(kind, amount, 1024);
                let b = distortion_curve(kind, amount, 1024);
                let same = a.iter().zip(&b).all(|(x, y)| x.to_bits() == y.to_bits());
                assert!(same, "{kind:?}/{amount} curve not bit-identical");
            }
        }
    }

    #[test]
    fn curves_stay_in_range_and_pass_zero() {
        for kind in DistortionCurve::ALL {
            let c = distortion_curve(kind, 40.0, 1025);
            assert!(c.iter().all(|&v| (-1.0..=1.0).contains(&v)), "{kind:?} out of range");
            assert_abs_diff_eq!(c[512], 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn tube_is_asymmetric() {
        let c = distortion_curve(DistortionCurve::Tube, 30.0, 1001);
        let pos = c[750];
        let neg = c[250];
        assert!((pos + neg).abs() > 0.01, "tube should be asymmetric: {pos} vs {neg}");
    }

    #[test]
    fn bitcrush_quantises() {
        // amount 84 -> 2^(8-7) = 2 levels per unit
        let c = distortion_curve(DistortionCurve::Bitcrush, 84.0, 257);
        for &v in &c {
            let scaled = v * 2.0;
            assert_abs_diff_eq!(scaled, scaled.round(), epsilon = 1e-6);
        }
    }

    #[test]
    fn hard_clip_saturates() {
        let c = distortion_curve(DistortionCurve::Hard, 100.0, 101);
        assert_eq!(c[0], -1.0);
        assert_eq!(c[100], 1.0);
        assert_eq!(c[80], 1.0);
    }

    #[test]
    fn apply_curve_interpolates() {
        let identity = [-1.0, 0.0, 1.0];
        assert_abs_diff_eq!(apply_curve(&identity, 0.5), 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(apply_curve(&identity, 3.0), 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(apply_curve(&identity, -0.25), -0.25, epsilon = 1e-6);
    }

    #[test]
    fn impulse_response_decays_and_is_seeded() {
        let [l, r] = impulse_response(8000.0, 0.5, 3.0, IMPULSE_SEED);
        assert_eq!(l.len(), 4000);
        assert_eq!(r.len(), 4000);
        let head: f32 = l[..400].iter().map(|x| x.abs()).sum();
        let tail: f32 = l[3600..].iter().map(|x| x.abs()).sum();
        assert!(head > tail * 10.0, "IR should decay: head={head} tail={tail}");
        assert_ne!(l, r, "channels should decorrelate");

        let [l2, _] = impulse_response(8000.0, 0.5, 3.0, IMPULSE_SEED);
        assert_eq!(l, l2);
    }

    #[test]
    fn mel_round_trip() {
        for hz in [80.0, 440.0, 1000.0, 8000.0] {
            assert_abs_diff_eq!(mel_to_hz(hz_to_mel(hz)), hz, epsilon = 1e-6);
        }
    }

    #[test]
    fn mel_filters_cover_band() {
        let bank = mel_filter_bank(26, 2048, 44100.0, 0.0, 22050.0);
        assert_eq!(bank.len(), 26);
        for f in &bank {
            let peak = f.weights.iter().cloned().fold(0.0f32, f32::max);
            assert!(peak > 0.3, "each filter needs a non-trivial peak");
        }
    }

    #[test]
    fn dct_of_constant_is_dc_only() {
        let dct = DctTable::new(8, 4);
        let mut out = [0.0f32; 4];
        dct.apply(&[1.0; 8], &mut out);
        assert_abs_diff_eq!(out[0], 8.0f32.sqrt(), epsilon = 1e-5);
        for &c in &out[1..] {
            assert_abs_diff_eq!(c, 0.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn log_spacing_hits_endpoints() {
        let f = log_spaced(16, 80.0, 8000.0);
        assert_eq!(f.len(), 16);
        assert_abs_diff_eq!(f[0], 80.0, epsilon = 1e-9);
        assert_abs_diff_eq!(f[15], 8000.0, epsilon = 1e-6);
        assert!(f.windows(2).all(|w| w[1] > w[0]));
    }
}
