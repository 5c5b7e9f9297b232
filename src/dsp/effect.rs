//! Effect catalogue: kinds, parameter metadata, and the `EffectUnit` sum type.
//!
//! Every unit is a send/return bus: it reads the summed sends of the voices
//! routed to it and writes a purely wet signal. The return level (`mix`)
//! is applied by the render graph, not by the unit.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::dsp::chorus::Chorus;
use crate::dsp::compressor::{Compressor, MultibandCompressor};
use crate::dsp::delay::Delay;
use crate::dsp::distortion::Distortion;
use crate::dsp::eq::ParametricEq;
use crate::dsp::phaser::Phaser;
use crate::dsp::pitch_shift::PitchShifter;
use crate::dsp::reverb::Reverb;
use crate::dsp::vocoder::Vocoder;
use crate::error::{EngineError, Result};

/// Effect unit types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EffectKind {
    Reverb,
    Delay,
    Distortion,
    Chorus,
    Flanger,
    Phaser,
    Compressor,
    MultibandCompressor,
    Eq,
    Vocoder,
    PitchShifter,
}

impl EffectKind {
    pub const ALL: [EffectKind; 11] = [
        EffectKind::Reverb,
        EffectKind::Delay,
        EffectKind::Distortion,
        EffectKind::Chorus,
        EffectKind::Flanger,
        EffectKind::Phaser,
        EffectKind::Compressor,
        EffectKind::MultibandCompressor,
        EffectKind::Eq,
        EffectKind::Vocoder,
        EffectKind::PitchShifter,
    ];

    /// Position in [`EffectKind::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// Name used in effect ids (`delay-1`) and JSON.
    pub fn as_str(self) -> &'static str {
        match self {
            EffectKind::Reverb => "reverb",
            EffectKind::Delay => "delay",
            EffectKind::Distortion => "distortion",
            EffectKind::Chorus => "chorus",
            EffectKind::Flanger => "flanger",
            EffectKind::Phaser => "phaser",
            EffectKind::Compressor => "compressor",
            EffectKind::MultibandCompressor => "multibandCompressor",
            EffectKind::Eq => "eq",
            EffectKind::Vocoder => "vocoder",
            EffectKind::PitchShifter => "pitchShifter",
        }
    }

    /// Declared parameters, in index order.
    pub fn params(self) -> &'static [ParamSpec] {
        match self {
            EffectKind::Reverb => REVERB_PARAMS,
            EffectKind::Delay => DELAY_PARAMS,
            EffectKind::Distortion => DISTORTION_PARAMS,
            EffectKind::Chorus => CHORUS_PARAMS,
            EffectKind::Flanger => FLANGER_PARAMS,
            EffectKind::Phaser => PHASER_PARAMS,
            EffectKind::Compressor => COMPRESSOR_PARAMS,
            EffectKind::MultibandCompressor => MULTIBAND_PARAMS,
            EffectKind::Eq => EQ_PARAMS,
            EffectKind::Vocoder => VOCODER_PARAMS,
            EffectKind::PitchShifter => PITCH_SHIFTER_PARAMS,
        }
    }

    pub fn param_index(self, id: &str) -> Option<usize> {
        self.params().iter().position(|p| p.id == id)
    }

    /// Insert kinds process the whole mix in routing order instead of a send bus.
    pub fn is_insert(self) -> bool {
        matches!(
            self,
            EffectKind::Compressor | EffectKind::MultibandCompressor | EffectKind::Eq
        )
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EffectKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        EffectKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| EngineError::UnknownEffect(s.to_string()))
    }
}

/// How a parameter's range is meant to be traversed by a control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamCurve {
    Linear,
    Exponential,
    Discrete,
}

/// Static description of one effect parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    pub id: &'static str,
    pub min: f64,
    pub max: f64,
    pub default: f64,
    pub unit: &'static str,
    pub curve: ParamCurve,
    /// Changing this parameter requires constructing a fresh unit.
    pub rebuild: bool,
}

impl ParamSpec {
    const fn new(id: &'static str, default: f64) -> Self {
        ParamSpec {
            id,
            min: 0.0,
            max: 1.0,
            default,
            unit: "",
            curve: ParamCurve::Linear,
            rebuild: false,
        }
    }

    const fn range(mut self, min: f64, max: f64) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    const fn unit(mut self, unit: &'static str) -> Self {
        self.unit = unit;
        self
    }

    const fn exponential(mut self) -> Self {
        self.curve = ParamCurve::Exponential;
        self
    }

    const fn discrete(mut self) -> Self {
        self.curve = ParamCurve::Discrete;
        self
    }

    const fn rebuilds(mut self) -> Self {
        self.rebuild = true;
        self
    }

    /// Saturate a requested value into the declared range.
    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.default;
        }
        let v = value.clamp(self.min, self.max);
        match self.curve {
            ParamCurve::Discrete => v.round(),
            _ => v,
        }
    }
}

const MIX: ParamSpec = ParamSpec::new("mix", 1.0);

const REVERB_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("mix", 0.3),
    ParamSpec::new("roomSize", 0.5).rebuilds(),
    ParamSpec::new("damping", 0.5),
    ParamSpec::new("predelay", 0.01).range(0.0, 0.5).unit("s").rebuilds(),
    ParamSpec::new("decay", 2.0).range(0.1, 10.0).rebuilds(),
];

const DELAY_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("mix", 0.3),
    ParamSpec::new("time", 0.25).range(0.001, 1.0).unit("s"),
    ParamSpec::new("feedback", 0.4).range(0.0, 0.95),
];

const DISTORTION_PARAMS: &[ParamSpec] = &[
    MIX,
    ParamSpec::new("type", 0.0).range(0.0, 4.0).discrete(),
    ParamSpec::new("amount", 20.0).range(0.0, 100.0),
    ParamSpec::new("tone", 12000.0)
        .range(200.0, 20000.0)
        .unit("Hz")
        .exponential(),
];

const CHORUS_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("mix", 0.5),
    ParamSpec::new("rate", 1.5).range(0.05, 10.0).unit("Hz").exponential(),
    ParamSpec::new("depth", 0.002).range(0.0, 0.01).unit("s"),
    ParamSpec::new("delay", 0.012).range(0.001, 0.03).unit("s"),
    ParamSpec::new("feedback", 0.0).range(0.0, 0.9),
    ParamSpec::new("voices", 3.0).range(3.0, 8.0).discrete().rebuilds(),
];

const FLANGER_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("mix", 0.5),
    ParamSpec::new("rate", 0.5).range(0.05, 10.0).unit("Hz").exponential(),
    ParamSpec::new("depth", 0.0015).range(0.0, 0.01).unit("s"),
    ParamSpec::new("delay", 0.003).range(0.001, 0.03).unit("s"),
    ParamSpec::new("feedback", 0.5).range(0.0, 0.9),
    ParamSpec::new("voices", 3.0).range(3.0, 8.0).discrete().rebuilds(),
];

const PHASER_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("mix", 0.5),
    ParamSpec::new("rate", 0.5).range(0.05, 10.0).unit("Hz").exponential(),
    ParamSpec::new("depth", 0.7),
    ParamSpec::new("feedback", 0.3).range(0.0, 0.9),
    ParamSpec::new("stages", 4.0).range(2.0, 12.0).discrete().rebuilds(),
    ParamSpec::new("baseFrequency", 700.0)
        .range(100.0, 4000.0)
        .unit("Hz")
        .exponential(),
];

const COMPRESSOR_PARAMS: &[ParamSpec] = &[
    MIX,
    ParamSpec::new("threshold", -24.0).range(-60.0, 0.0).unit("dB"),
    ParamSpec::new("ratio", 4.0).range(1.0, 20.0),
    ParamSpec::new("knee", 6.0).range(0.0, 40.0).unit("dB"),
    ParamSpec::new("attack", 0.003).range(0.0001, 1.0).unit("s").exponential(),
    ParamSpec::new("release", 0.25).range(0.001, 5.0).unit("s").exponential(),
    ParamSpec::new("makeup", 0.0).range(0.0, 24.0).unit("dB"),
];

const MULTIBAND_PARAMS: &[ParamSpec] = &[
    MIX,
    ParamSpec::new("lowCrossover", 200.0)
        .range(40.0, 1000.0)
        .unit("Hz")
        .exponential(),
    ParamSpec::new("highCrossover", 3000.0)
        .range(1000.0, 16000.0)
        .unit("Hz")
        .exponential(),
    ParamSpec::new("threshold", -24.0).range(-60.0, 0.0).unit("dB"),
    ParamSpec::new("ratio", 4.0).range(1.0, 20.0),
    ParamSpec::new("attack", 0.003).range(0.0001, 1.0).unit("s").exponential(),
    ParamSpec::new("release", 0.25).range(0.001, 5.0).unit("s").exponential(),
    ParamSpec::new("makeup", 0.0).range(0.0, 24.0).unit("dB"),
];

const EQ_PARAMS: &[ParamSpec] = &[
    MIX,
    ParamSpec::new("lowGain", 0.0).range(-24.0, 24.0).unit("dB"),
    ParamSpec::new("midGain", 0.0).range(-24.0, 24.0).unit("dB"),
    ParamSpec::new("highGain", 0.0).range(-24.0, 24.0).unit("dB"),
    ParamSpec::new("lowFrequency", 250.0)
        .range(20.0, 1000.0)
        .unit("Hz")
        .exponential(),
    ParamSpec::new("midFrequency", 1000.0)
        .range(200.0, 8000.0)
        .unit("Hz")
        .exponential(),
    ParamSpec::new("midQ", 1.0).range(0.1, 10.0),
    ParamSpec::new("highFrequency", 4000.0)
        .range(1000.0, 16000.0)
        .unit("Hz")
        .exponential(),
];

const VOCODER_PARAMS: &[ParamSpec] = &[
    MIX,
    ParamSpec::new("bands", 16.0).range(4.0, 32.0).discrete().rebuilds(),
    ParamSpec::new("smoothing", 0.01).range(0.001, 0.1).unit("s"),
    ParamSpec::new("q", 6.0).range(1.0, 30.0),
];

const PITCH_SHIFTER_PARAMS: &[ParamSpec] = &[
    MIX,
    ParamSpec::new("semitones", 0.0).range(-24.0, 24.0).unit("st"),
    ParamSpec::new("grainSize", 0.05).range(0.01, 0.2).unit("s"),
];

/// Parameter values of one effect, aligned with `kind.params()`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamMap {
    kind: EffectKind,
    values: Vec<f64>,
}

impl ParamMap {
    pub fn defaults(kind: EffectKind) -> Self {
        ParamMap {
            kind,
            values: kind.params().iter().map(|p| p.default).collect(),
        }
    }

    pub fn kind(&self) -> EffectKind {
        self.kind
    }

    /// Current value; unknown ids read as 0.
    pub fn get(&self, id: &str) -> f64 {
        self.kind
            .param_index(id)
            .map(|i| self.values[i])
            .unwrap_or(0.0)
    }

    pub fn value_at(&self, index: usize) -> f64 {
        self.values.get(index).copied().unwrap_or(0.0)
    }

    /// Clamp and store a value. Returns the parameter index and the stored value.
    pub fn set(&mut self, id: &str, value: f64) -> Result<(usize, f64)> {
        let index = self
            .kind
            .param_index(id)
            .ok_or_else(|| EngineError::InvalidParameter {
                effect: self.kind.to_string(),
                param: id.to_string(),
            })?;
        let stored = self.kind.params()[index].clamp(value);
        self.values[index] = stored;
        Ok((index, stored))
    }

    /// Full parameter listing with metadata.
    pub fn info(&self) -> Vec<ParameterInfo> {
        self.kind
            .params()
            .iter()
            .zip(&self.values)
            .map(|(spec, &value)| ParameterInfo {
                id: spec.id,
                value,
                min: spec.min,
                max: spec.max,
                default: spec.default,
                unit: spec.unit,
                curve: spec.curve,
            })
            .collect()
    }
}

/// A parameter as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterInfo {
    pub id: &'static str,
    pub value: f64,
    pub min: f64,
    pub max: f64,
    pub default: f64,
    pub unit: &'static str,
    pub curve: ParamCurve,
}

/// One instantiated effect, rendering a wet-only signal in place.
#[derive(Debug)]
pub enum EffectUnit {
    Reverb(Reverb),
    Delay(Delay),
    Distortion(Distortion),
    Chorus(Chorus),
    Flanger(Chorus),
    Phaser(Phaser),
    Compressor(Compressor),
    MultibandCompressor(MultibandCompressor),
    Eq(ParametricEq),
    Vocoder(Vocoder),
    PitchShifter(PitchShifter),
}

impl EffectUnit {
    /// Construct a fresh unit from a full parameter set. Allocates.
    pub fn build(params: &ParamMap, sample_rate: f64) -> Self {
        match params.kind() {
            EffectKind::Reverb => EffectUnit::Reverb(Reverb::from_params(params, sample_rate)),
            EffectKind::Delay => EffectUnit::Delay(Delay::from_params(params, sample_rate)),
            EffectKind::Distortion => {
                EffectUnit::Distortion(Distortion::from_params(params, sample_rate))
            }
            EffectKind::Chorus => EffectUnit::Chorus(Chorus::from_params(params, sample_rate)),
            EffectKind::Flanger => EffectUnit::Flanger(Chorus::from_params(params, sample_rate)),
            EffectKind::Phaser => EffectUnit::Phaser(Phaser::from_params(params, sample_rate)),
            EffectKind::Compressor => {
                EffectUnit::Compressor(Compressor::from_params(params, sample_rate))
            }
            EffectKind::MultibandCompressor => {
                EffectUnit::MultibandCompressor(MultibandCompressor::from_params(params, sample_rate))
            }
            EffectKind::Eq => EffectUnit::Eq(ParametricEq::from_params(params, sample_rate)),
            EffectKind::Vocoder => EffectUnit::Vocoder(Vocoder::from_params(params, sample_rate)),
            EffectKind::PitchShifter => {
                EffectUnit::PitchShifter(PitchShifter::from_params(params, sample_rate))
            }
        }
    }

    pub fn kind(&self) -> EffectKind {
        match self {
            EffectUnit::Reverb(_) => EffectKind::Reverb,
            EffectUnit::Delay(_) => EffectKind::Delay,
            EffectUnit::Distortion(_) => EffectKind::Distortion,
            EffectUnit::Chorus(_) => EffectKind::Chorus,
            EffectUnit::Flanger(_) => EffectKind::Flanger,
            EffectUnit::Phaser(_) => EffectKind::Phaser,
            EffectUnit::Compressor(_) => EffectKind::Compressor,
            EffectUnit::MultibandCompressor(_) => EffectKind::MultibandCompressor,
            EffectUnit::Eq(_) => EffectKind::Eq,
            EffectUnit::Vocoder(_) => EffectKind::Vocoder,
            EffectUnit::PitchShifter(_) => EffectKind::PitchShifter,
        }
    }

    /// Apply a live parameter change. Must not allocate.
    pub fn set_param(&mut self, id: &str, value: f64) {
        match self {
            EffectUnit::Reverb(u) => u.set_param(id, value),
            EffectUnit::Delay(u) => u.set_param(id, value),
            EffectUnit::Distortion(u) => u.set_param(id, value),
            EffectUnit::Chorus(u) | EffectUnit::Flanger(u) => u.set_param(id, value),
            EffectUnit::Phaser(u) => u.set_param(id, value),
            EffectUnit::Compressor(u) => u.set_param(id, value),
            EffectUnit::MultibandCompressor(u) => u.set_param(id, value),
            EffectUnit::Eq(u) => u.set_param(id, value),
            EffectUnit::Vocoder(u) => u.set_param(id, value),
            EffectUnit::PitchShifter(u) => u.set_param(id, value),
        }
    }

    /// Replace the send bus contents with the wet signal.
    ///
    /// `modulator` is the engine's external input; only the vocoder reads it.
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32], modulator: &[f32]) {
        match self {
            EffectUnit::Reverb(u) => u.process_block(left, right),
            EffectUnit::Delay(u) => u.process_block(left, right),
            EffectUnit::Distortion(u) => u.process_block(left, right),
            EffectUnit::Chorus(u) | EffectUnit::Flanger(u) => u.process_block(left, right),
            EffectUnit::Phaser(u) => u.process_block(left, right),
            EffectUnit::Compressor(u) => u.process_block(left, right),
            EffectUnit::MultibandCompressor(u) => u.process_block(left, right),
            EffectUnit::Eq(u) => u.process_block(left, right),
            EffectUnit::Vocoder(u) => u.process_block(left, right, modulator),
            EffectUnit::PitchShifter(u) => u.process_block(left, right),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_declares_mix_first() {
        for kind in EffectKind::ALL {
            let params = kind.params();
            assert_eq!(params[0].id, "mix", "{kind} must expose its return level");
            for p in params {
                assert!(p.min <= p.default && p.default <= p.max, "{kind}.{} default", p.id);
            }
        }
    }

    #[test]
    fn kind_names_round_trip() {
        for kind in EffectKind::ALL {
            assert_eq!(kind.as_str().parse::<EffectKind>(), Ok(kind));
        }
        assert!(matches!(
            "wah".parse::<EffectKind>(),
            Err(EngineError::UnknownEffect(_))
        ));
        let json = serde_json::to_string(&EffectKind::MultibandCompressor).unwrap();
        assert_eq!(json, "\"multibandCompressor\"");
    }

    #[test]
    fn set_clamps_to_declared_range() {
        let mut params = ParamMap::defaults(EffectKind::Delay);
        let (index, stored) = params.set("time", 5.0).unwrap();
        assert_eq!(index, 1);
        assert_eq!(stored, 1.0);
        assert_eq!(params.get("time"), 1.0);
        let (_, stored) = params.set("feedback", -3.0).unwrap();
        assert_eq!(stored, 0.0);
    }

    #[test]
    fn discrete_params_round() {
        let mut params = ParamMap::defaults(EffectKind::Distortion);
        let (_, stored) = params.set("type", 2.6).unwrap();
        assert_eq!(stored, 3.0);
        let (_, stored) = params.set("type", f64::NAN).unwrap();
        assert_eq!(stored, 0.0);
    }

    #[test]
    fn unknown_param_is_reported() {
        let mut params = ParamMap::defaults(EffectKind::Reverb);
        let err = params.set("speed", 1.0).unwrap_err();
        assert_eq!(
            err,
            EngineError::InvalidParameter {
                effect: "reverb".into(),
                param: "speed".into()
            }
        );
    }

    #[test]
    fn info_lists_metadata() {
        let info = ParamMap::defaults(EffectKind::Distortion).info();
        let tone = info.iter().find(|p| p.id == "tone").unwrap();
        assert_eq!(tone.unit, "Hz");
        assert_eq!(tone.curve, ParamCurve::Exponential);
        assert_eq!(tone.value, 12000.0);
    }

    #[test]
    fn every_unit_renders_finite_audio() {
        let sr = 8000.0;
        let input: Vec<f32> = (0..256).map(|i| ((i as f32) * 0.3).sin() * 0.5).collect();
        for kind in EffectKind::ALL {
            let mut unit = EffectUnit::build(&ParamMap::defaults(kind), sr);
            assert_eq!(unit.kind(), kind);
            let mut left = input.clone();
            let mut right = input.clone();
            unit.process(&mut left, &mut right, &input);
            assert!(
                left.iter().chain(&right).all(|s| s.is_finite()),
                "{kind} produced non-finite output"
            );
        }
    }
}
