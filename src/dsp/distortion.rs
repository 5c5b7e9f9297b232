//! Distortion: table-lookup waveshaper followed by a tone lowpass.

use crate::dsp::curves::{self, DistortionCurve, DEFAULT_CURVE_SIZE};
use crate::dsp::effect::ParamMap;
use crate::dsp::filter::{BiquadFilter, FilterType};

#[derive(Debug, Clone)]
pub struct Distortion {
    curve: Vec<f32>,
    curve_kind: DistortionCurve,
    amount: f32,
    tone_l: BiquadFilter,
    tone_r: BiquadFilter,
}

impl Distortion {
    pub fn new(sample_rate: f64, table_size: usize) -> Self {
        let curve_kind = DistortionCurve::Soft;
        let amount = 20.0;
        Self {
            curve: curves::distortion_curve(curve_kind, amount, table_size.max(2)),
            curve_kind,
            amount,
            tone_l: BiquadFilter::with_params(FilterType::Lowpass, sample_rate, 12000.0, 0.707),
            tone_r: BiquadFilter::with_params(FilterType::Lowpass, sample_rate, 12000.0, 0.707),
        }
    }

    pub fn from_params(params: &ParamMap, sample_rate: f64) -> Self {
        let mut d = Self::new(sample_rate, DEFAULT_CURVE_SIZE);
        for id in ["type", "amount", "tone"] {
            d.set_param(id, params.get(id));
        }
        d
    }

    /// Changing `type` or `amount` regenerates the table in place.
    pub fn set_param(&mut self, id: &str, value: f64) {
        match id {
            "type" => {
                let kind = DistortionCurve::from_index(value as f32);
                if kind != self.curve_kind {
                    self.curve_kind = kind;
                    self.regenerate();
                }
            }
            "amount" => {
                let amount = value as f32;
                if amount != self.amount {
                    self.amount = amount;
                    self.regenerate();
                }
            }
            "tone" => {
                self.tone_l.set_frequency(value);
                self.tone_r.set_frequency(value);
            }
            _ => {}
        }
    }

    fn regenerate(&mut self) {
        curves::fill_distortion_curve(self.curve_kind, self.amount, &mut self.curve);
    }

    pub fn curve(&self) -> &[f32] {
        &self.curve
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let l = curves::apply_curve(&self.curve, left);
        let r = curves::apply_curve(&self.curve, right);
        (
            self.tone_l.process(l as f64) as f32,
            self.tone_r.process(r as f64) as f32,
        )
    }

    pub fn process_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            (*l, *r) = self.process(*l, *r);
        }
    }
}
