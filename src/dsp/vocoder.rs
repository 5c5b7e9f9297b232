//! Channel vocoder: the modulator's band envelopes shape the carrier's bands.
//!
//! Carrier and modulator go through the same bank of log-spaced bandpass
//! filters (80 Hz – 8 kHz). Each modulator band drives an envelope follower
//! (full-wave rectify, then one-pole smoothing) that sets the gain of the
//! matching carrier band.

use std::f64::consts::FRAC_PI_2;

use crate::dsp::curves::log_spaced;
use crate::dsp::effect::ParamMap;
use crate::dsp::filter::{BiquadFilter, FilterType, OnePole};

pub const LOWEST_BAND_HZ: f64 = 80.0;
pub const HIGHEST_BAND_HZ: f64 = 8000.0;

#[derive(Debug, Clone)]
struct VocoderBand {
    carrier_l: BiquadFilter,
    carrier_r: BiquadFilter,
    modulator: BiquadFilter,
    follower: OnePole,
}

#[derive(Debug, Clone)]
pub struct Vocoder {
    bands: Vec<VocoderBand>,
    sample_rate: f64,
}

impl Vocoder {
    pub fn new(sample_rate: f64, bands: usize, q: f64, smoothing: f64) -> Self {
        let top = HIGHEST_BAND_HZ.min(sample_rate * 0.45);
        let bands = log_spaced(bands.max(1), LOWEST_BAND_HZ, top)
            .into_iter()
            .map(|freq| VocoderBand {
                carrier_l: BiquadFilter::with_params(FilterType::Bandpass, sample_rate, freq, q),
                carrier_r: BiquadFilter::with_params(FilterType::Bandpass, sample_rate, freq, q),
                modulator: BiquadFilter::with_params(FilterType::Bandpass, sample_rate, freq, q),
                follower: OnePole::new(smoothing, sample_rate),
            })
            .collect();
        Self { bands, sample_rate }
    }

    pub fn from_params(params: &ParamMap, sample_rate: f64) -> Self {
        Self::new(
            sample_rate,
            params.get("bands") as usize,
            params.get("q"),
            params.get("smoothing"),
        )
    }

    pub fn set_param(&mut self, id: &str, value: f64) {
        match id {
            "q" => {
                for band in &mut self.bands {
                    band.carrier_l.set_q(value);
                    band.carrier_r.set_q(value);
                    band.modulator.set_q(value);
                }
            }
            "smoothing" => {
                for band in &mut self.bands {
                    band.follower.set_time_constant(value, self.sample_rate);
                }
            }
            _ => {}
        }
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// Centre frequencies of the filter bank.
    pub fn band_frequencies(&self) -> Vec<f64> {
        self.bands.iter().map(|b| b.modulator.frequency).collect()
    }

    /// Carrier in `left`/`right` is replaced by the vocoded signal.
    /// Samples past the end of `modulator` count as silence.
    pub fn process_block(&mut self, left: &mut [f32], right: &mut [f32], modulator: &[f32]) {
        for (i, (l, r)) in left.iter_mut().zip(right.iter_mut()).enumerate() {
            let m = modulator.get(i).copied().unwrap_or(0.0) as f64;
            let mut out_l = 0.0;
            let mut out_r = 0.0;
            for band in &mut self.bands {
                let env = band.follower.process(band.modulator.process(m).abs());
                out_l += band.carrier_l.process(*l as f64) * env;
                out_r += band.carrier_r.process(*r as f64) * env;
            }
            // undo the rectified-sine mean (2/π)
            *l = (out_l * FRAC_PI_2) as f32;
            *r = (out_r * FRAC_PI_2) as f32;
        }
    }
}
