//! Three-band parametric EQ: low shelf, peaking mid, high shelf.

use crate::dsp::effect::ParamMap;
use crate::dsp::filter::{BiquadFilter, FilterType};

#[derive(Debug, Clone)]
pub struct ParametricEq {
    // [low, mid, high] per channel
    left: [BiquadFilter; 3],
    right: [BiquadFilter; 3],
}

impl ParametricEq {
    pub fn new(sample_rate: f64) -> Self {
        let bank = || {
            [
                BiquadFilter::with_params(FilterType::Lowshelf, sample_rate, 250.0, 0.707),
                BiquadFilter::with_params(FilterType::Peaking, sample_rate, 1000.0, 1.0),
                BiquadFilter::with_params(FilterType::Highshelf, sample_rate, 4000.0, 0.707),
            ]
        };
        Self {
            left: bank(),
            right: bank(),
        }
    }

    pub fn from_params(params: &ParamMap, sample_rate: f64) -> Self {
        let mut eq = Self::new(sample_rate);
        for spec in params.kind().params() {
            eq.set_param(spec.id, params.get(spec.id));
        }
        eq
    }

    pub fn set_param(&mut self, id: &str, value: f64) {
        let (band, apply): (usize, fn(&mut BiquadFilter, f64)) = match id {
            "lowGain" => (0, BiquadFilter::set_gain_db),
            "midGain" => (1, BiquadFilter::set_gain_db),
            "highGain" => (2, BiquadFilter::set_gain_db),
            "lowFrequency" => (0, BiquadFilter::set_frequency),
            "midFrequency" => (1, BiquadFilter::set_frequency),
            "highFrequency" => (2, BiquadFilter::set_frequency),
            "midQ" => (1, BiquadFilter::set_q),
            _ => return,
        };
        apply(&mut self.left[band], value);
        apply(&mut self.right[band], value);
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let mut l = left as f64;
        let mut r = right as f64;
        for f in &mut self.left {
            l = f.process(l);
        }
        for f in &mut self.right {
            r = f.process(r);
        }
        (l as f32, r as f32)
    }

    pub fn process_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            (*l, *r) = self.process(*l, *r);
        }
    }
}
