//! Trigger-time voice descriptions handed over by the UI layer.
//!
//! Both configs are plain serde values (camelCase JSON). They are snapshots:
//! a voice copies what it needs at trigger time and never looks back.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::dsp::effect::EffectKind;
use crate::dsp::envelope::Adsr;
use crate::dsp::filter::FilterType;
use crate::dsp::oscillator::Waveform;
use crate::error::{EngineError, Result};

/// Harmonic partials beyond this are ignored.
pub const MAX_PARTIALS: usize = 8;

/// Velocity → amplitude mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VelocityCurve {
    #[default]
    Linear,
    Exponential,
    Logarithmic,
}

impl VelocityCurve {
    /// Map a velocity in [0, 1] to a gain in [0, 1].
    ///
    /// `sensitivity` blends between a fixed full gain (0) and the full curve (1).
    /// This is the only place velocity becomes amplitude.
    pub fn apply(self, velocity: f64, sensitivity: f64) -> f64 {
        let v = velocity.clamp(0.0, 1.0);
        let s = sensitivity.clamp(0.0, 1.0);
        let shaped = match self {
            VelocityCurve::Linear => v,
            VelocityCurve::Exponential => v * v,
            VelocityCurve::Logarithmic => (1.0 + 9.0 * v).log10(),
        };
        1.0 - s + s * shaped
    }
}

/// One additional oscillator at a multiple of the note frequency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Partial {
    #[serde(rename = "type")]
    pub waveform: Waveform,
    pub ratio: f64,
    pub gain: f64,
}

impl Default for Partial {
    fn default() -> Self {
        Self {
            waveform: Waveform::Sine,
            ratio: 2.0,
            gain: 0.5,
        }
    }
}

/// Per-voice filter with envelope-driven cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FilterConfig {
    #[serde(rename = "type")]
    pub filter_type: FilterType,
    pub cutoff: f64,
    pub resonance: f64,
    /// Scales the amplitude envelope into Hz added to `cutoff`.
    pub envelope_amount: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            filter_type: FilterType::Lowpass,
            cutoff: 2000.0,
            resonance: 1.0,
            envelope_amount: 0.0,
        }
    }
}

/// A synth voice description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimbreConfig {
    pub waveform: Waveform,
    /// Detune of the main oscillator in cents.
    pub detune: f64,
    pub partials: Vec<Partial>,
    pub envelope: Adsr,
    pub filter: Option<FilterConfig>,
    /// Send level (0..1) into every active unit of each kind. Insert kinds
    /// (compressor, multiband, EQ) ignore it.
    pub sends: BTreeMap<EffectKind, f64>,
    pub velocity_curve: VelocityCurve,
    pub velocity_sensitivity: f64,
    /// Overall voice level before velocity.
    pub gain: f64,
}

impl Default for TimbreConfig {
    fn default() -> Self {
        Self {
            waveform: Waveform::Triangle,
            detune: 0.0,
            partials: Vec::new(),
            envelope: Adsr::default(),
            filter: None,
            sends: BTreeMap::new(),
            velocity_curve: VelocityCurve::Linear,
            velocity_sensitivity: 1.0,
            gain: 0.5,
        }
    }
}

fn check_finite(what: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(EngineError::InvalidConfig(format!("{what} must be finite, got {value}")))
    }
}

fn check_sends(sends: impl IntoIterator<Item = (String, f64)>) -> Result<()> {
    for (kind, level) in sends {
        if !level.is_finite() || level < 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "send to {kind} must be >= 0, got {level}"
            )));
        }
    }
    Ok(())
}

impl TimbreConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| EngineError::InvalidConfig(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        self.envelope.validate()?;
        check_finite("detune", self.detune)?;
        check_finite("gain", self.gain)?;
        check_finite("velocitySensitivity", self.velocity_sensitivity)?;
        for (i, p) in self.partials.iter().enumerate() {
            if !p.ratio.is_finite() || p.ratio <= 0.0 {
                return Err(EngineError::InvalidConfig(format!(
                    "partial {i} ratio must be > 0, got {}",
                    p.ratio
                )));
            }
            check_finite("partial gain", p.gain)?;
        }
        if let Some(f) = &self.filter {
            if !f.cutoff.is_finite() || f.cutoff <= 0.0 {
                return Err(EngineError::InvalidConfig(format!(
                    "filter cutoff must be > 0, got {}",
                    f.cutoff
                )));
            }
            if !f.resonance.is_finite() || f.resonance <= 0.0 {
                return Err(EngineError::InvalidConfig(format!(
                    "filter resonance must be > 0, got {}",
                    f.resonance
                )));
            }
            check_finite("filter envelopeAmount", f.envelope_amount)?;
        }
        check_sends(self.sends.iter().map(|(k, v)| (k.to_string(), *v)))
    }

    /// Partials actually rendered.
    pub fn active_partials(&self) -> &[Partial] {
        &self.partials[..self.partials.len().min(MAX_PARTIALS)]
    }

    pub fn send(&self, kind: EffectKind) -> f64 {
        self.sends.get(&kind).copied().unwrap_or(0.0).clamp(0.0, 1.0)
    }
}

/// Broadband noise layered onto a drum hit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NoiseBurst {
    /// Level relative to the tonal body, 0..1.
    pub amount: f64,
    /// Highpass cutoff applied to the noise, Hz.
    pub highpass: f64,
}

impl Default for NoiseBurst {
    fn default() -> Self {
        Self {
            amount: 0.5,
            highpass: 1000.0,
        }
    }
}

/// A one-shot percussion hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DrumHitConfig {
    pub oscillator: Waveform,
    /// Frequency the pitch sweep settles at.
    pub base_frequency: f64,
    /// The sweep starts at `base_frequency × pitch_multiplier`.
    pub pitch_multiplier: f64,
    /// Time constant of the pitch sweep, seconds.
    pub pitch_decay: f64,
    /// Q of the lowpass that tracks the swept pitch.
    pub resonance: f64,
    pub noise: Option<NoiseBurst>,
    pub envelope: Adsr,
    pub distortion: Option<f64>,
    pub reverb: Option<f64>,
    pub velocity: f64,
}

impl Default for DrumHitConfig {
    fn default() -> Self {
        Self {
            oscillator: Waveform::Sine,
            base_frequency: 60.0,
            pitch_multiplier: 3.0,
            pitch_decay: 0.03,
            resonance: 1.0,
            noise: None,
            envelope: Adsr::new(0.001, 0.15, 0.0, 0.1),
            distortion: None,
            reverb: None,
            velocity: 1.0,
        }
    }
}

impl DrumHitConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| EngineError::InvalidConfig(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        self.envelope.validate()?;
        if !self.base_frequency.is_finite() || self.base_frequency <= 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "drum baseFrequency must be > 0, got {}",
                self.base_frequency
            )));
        }
        if !self.pitch_multiplier.is_finite() || self.pitch_multiplier <= 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "drum pitchMultiplier must be > 0, got {}",
                self.pitch_multiplier
            )));
        }
        if !self.resonance.is_finite() || self.resonance <= 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "drum resonance must be > 0, got {}",
                self.resonance
            )));
        }
        check_finite("drum pitchDecay", self.pitch_decay)?;
        check_finite("drum velocity", self.velocity)?;
        if let Some(n) = &self.noise {
            check_finite("noise amount", n.amount)?;
            if !n.highpass.is_finite() || n.highpass <= 0.0 {
                return Err(EngineError::InvalidConfig(format!(
                    "noise highpass must be > 0, got {}",
                    n.highpass
                )));
            }
        }
        check_sends(
            [("distortion", self.distortion), ("reverb", self.reverb)]
                .into_iter()
                .filter_map(|(k, v)| v.map(|v| (k.to_string(), v))),
        )
    }

    /// Seconds from trigger until the hit is silent.
    pub fn length(&self) -> f64 {
        self.envelope.one_shot_length()
    }

    pub fn send(&self, kind: EffectKind) -> f64 {
        let level = match kind {
            EffectKind::Distortion => self.distortion,
            EffectKind::Reverb => self.reverb,
            _ => None,
        };
        level.unwrap_or(0.0).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn velocity_curves() {
        assert_abs_diff_eq!(VelocityCurve::Linear.apply(0.5, 1.0), 0.5);
        assert_abs_diff_eq!(VelocityCurve::Exponential.apply(0.5, 1.0), 0.25);
        assert_abs_diff_eq!(VelocityCurve::Logarithmic.apply(1.0, 1.0), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(VelocityCurve::Logarithmic.apply(0.0, 1.0), 0.0);
        // no sensitivity: every velocity plays at full level
        assert_abs_diff_eq!(VelocityCurve::Exponential.apply(0.1, 0.0), 1.0);
        assert_abs_diff_eq!(VelocityCurve::Linear.apply(0.0, 0.5), 0.5);
    }

    #[test]
    fn curves_are_monotonic() {
        for curve in [
            VelocityCurve::Linear,
            VelocityCurve::Exponential,
            VelocityCurve::Logarithmic,
        ] {
            let mut prev = -1.0;
            for i in 0..=100 {
                let g = curve.apply(i as f64 / 100.0, 1.0);
                assert!(g >= prev && (0.0..=1.0).contains(&g));
                prev = g;
            }
        }
    }

    #[test]
    fn parses_camel_case_json() {
        let config = TimbreConfig::from_json(
            r#"{
                "waveform": "sawtooth",
                "partials": [{ "type": "sine", "ratio": 2, "gain": 0.3 }],
                "envelope": { "attack": 0.02, "decay": 0.1, "sustain": 0.6, "release": 0.4 },
                "filter": { "type": "lowpass", "cutoff": 1200, "resonance": 2, "envelopeAmount": 0.5 },
                "sends": { "reverb": 0.4, "delay": 0.2 },
                "velocityCurve": "exponential",
                "velocitySensitivity": 0.8
            }"#,
        )
        .unwrap();
        assert_eq!(config.waveform, Waveform::Sawtooth);
        assert_eq!(config.partials.len(), 1);
        assert_eq!(config.filter.unwrap().envelope_amount, 0.5);
        assert_eq!(config.send(EffectKind::Reverb), 0.4);
        assert_eq!(config.send(EffectKind::Chorus), 0.0);
        assert_eq!(config.velocity_curve, VelocityCurve::Exponential);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_malformed_timbres() {
        let mut config = TimbreConfig::default();
        config.envelope.attack = -1.0;
        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));

        let mut config = TimbreConfig::default();
        config.partials.push(Partial { ratio: 0.0, ..Partial::default() });
        assert!(config.validate().is_err());

        let mut config = TimbreConfig::default();
        config.sends.insert(EffectKind::Delay, f64::NAN);
        assert!(config.validate().is_err());

        assert!(TimbreConfig::from_json(r#"{ "waveform": "organ" }"#).is_err());
    }

    #[test]
    fn partials_are_capped() {
        let config = TimbreConfig {
            partials: vec![Partial::default(); 12],
            ..TimbreConfig::default()
        };
        assert_eq!(config.active_partials().len(), MAX_PARTIALS);
    }

    #[test]
    fn drum_defaults_and_length() {
        let drum = DrumHitConfig::from_json(r#"{ "baseFrequency": 50, "reverb": 0.3 }"#).unwrap();
        assert_eq!(drum.base_frequency, 50.0);
        assert_eq!(drum.send(EffectKind::Reverb), 0.3);
        assert_eq!(drum.send(EffectKind::Delay), 0.0);
        assert_abs_diff_eq!(drum.length(), 0.001 + 0.15 + 0.1);
        assert!(drum.validate().is_ok());

        let bad = DrumHitConfig {
            base_frequency: 0.0,
            ..DrumHitConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
