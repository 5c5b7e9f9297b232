//! Phaser: LFO-swept allpass cascade with feedback.
//!
//! The unit outputs the phase-shifted signal only. Notches appear where the
//! return meets the dry path at the master bus.

use crate::dsp::effect::ParamMap;
use crate::dsp::filter::{BiquadFilter, FilterType};
use crate::dsp::oscillator::Lfo;

/// Allpass coefficients are recomputed every this many samples.
const SWEEP_INTERVAL: usize = 16;

/// Sweep range in octaves either side of the base frequency at full depth.
const SWEEP_OCTAVES: f64 = 2.0;

#[derive(Debug, Clone)]
struct Cascade {
    stages: Vec<BiquadFilter>,
    lfo: Lfo,
    last_out: f64,
}

impl Cascade {
    fn new(stages: usize, lfo_phase: f64, sample_rate: f64) -> Self {
        Self {
            stages: (0..stages)
                .map(|_| BiquadFilter::with_params(FilterType::Allpass, sample_rate, 700.0, 0.5))
                .collect(),
            lfo: Lfo::new(0.5, lfo_phase, sample_rate),
            last_out: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Phaser {
    channels: [Cascade; 2],
    counter: usize,

    pub rate: f64,
    pub depth: f64,
    pub feedback: f64,
    pub base_frequency: f64,
}

impl Phaser {
    pub fn new(sample_rate: f64, stages: usize) -> Self {
        let stages = stages.clamp(2, 12);
        Self {
            // right channel sweeps a quarter cycle behind the left
            channels: [
                Cascade::new(stages, 0.0, sample_rate),
                Cascade::new(stages, 0.25, sample_rate),
            ],
            counter: 0,
            rate: 0.5,
            depth: 0.7,
            feedback: 0.3,
            base_frequency: 700.0,
        }
    }

    pub fn from_params(params: &ParamMap, sample_rate: f64) -> Self {
        let mut p = Self::new(sample_rate, params.get("stages") as usize);
        for id in ["rate", "depth", "feedback", "baseFrequency"] {
            p.set_param(id, params.get(id));
        }
        p
    }

    pub fn set_param(&mut self, id: &str, value: f64) {
        match id {
            "rate" => {
                self.rate = value.max(0.0);
                for ch in &mut self.channels {
                    ch.lfo.rate = self.rate;
                }
            }
            "depth" => self.depth = value.clamp(0.0, 1.0),
            "feedback" => self.feedback = value.clamp(0.0, 0.95),
            "baseFrequency" => self.base_frequency = value.max(1.0),
            _ => {}
        }
    }

    pub fn stages(&self) -> usize {
        self.channels[0].stages.len()
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let sweep = self.counter == 0;
        self.counter = (self.counter + 1) % SWEEP_INTERVAL;

        let mut out = [0.0f32; 2];
        for (ch, (input, o)) in self
            .channels
            .iter_mut()
            .zip([left, right].into_iter().zip(out.iter_mut()))
        {
            let lfo = ch.lfo.next_sample();
            if sweep {
                let freq = self.base_frequency * 2.0_f64.powf(self.depth * SWEEP_OCTAVES * lfo);
                for stage in &mut ch.stages {
                    stage.set_frequency(freq);
                }
            }
            // feedback uses the previous output sample, never the current one
            let mut x = input as f64 + ch.last_out * self.feedback;
            for stage in &mut ch.stages {
                x = stage.process(x);
            }
            ch.last_out = x;
            *o = x as f32;
        }
        (out[0], out[1])
    }

    pub fn process_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            (*l, *r) = self.process(*l, *r);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::effect::EffectKind;

    #[test]
    fn stage_count_is_structural() {
        let mut params = ParamMap::defaults(EffectKind::Phaser);
        params.set("stages", 8.0).unwrap();
        assert_eq!(Phaser::from_params(&params, 44100.0).stages(), 8);
        assert_eq!(Phaser::new(44100.0, 40).stages(), 12);
    }

    #[test]
    fn without_feedback_the_cascade_preserves_level() {
        let mut phaser = Phaser::new(44100.0, 4);
        phaser.set_param("feedback", 0.0);
        phaser.set_param("depth", 0.0);
        let mut peak = 0.0f32;
        for i in 0..44100 {
            let x = (2.0 * std::f32::consts::PI * 300.0 * i as f32 / 44100.0).sin();
            let (l, _) = phaser.process(x, x);
            if i > 22050 {
                peak = peak.max(l.abs());
            }
        }
        assert!((peak - 1.0).abs() < 0.05, "allpass cascade changed level: {peak}");
    }

    #[test]
    fn dry_plus_wet_produces_a_notch() {
        // two 2nd-order stages (Q 0.5) each shift -90° at (√2 - 1)·f0
        let mut phaser = Phaser::new(44100.0, 2);
        phaser.set_param("feedback", 0.0);
        phaser.set_param("depth", 0.0);
        phaser.set_param("baseFrequency", 1000.0);
        let level_at = |phaser: &mut Phaser, freq: f32| {
            let mut peak = 0.0f32;
            for i in 0..22050 {
                let x = (2.0 * std::f32::consts::PI * freq * i as f32 / 44100.0).sin();
                let (wet, _) = phaser.process(x, x);
                if i > 11025 {
                    peak = peak.max((x + wet).abs());
                }
            }
            peak
        };
        let far = level_at(&mut phaser, 100.0);
        let near = level_at(&mut phaser, 414.2);
        assert!(near < far * 0.2, "expected cancellation at the notch: {near} vs {far}");
    }
}
