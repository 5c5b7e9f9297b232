//! ADSR envelope evaluated against the rendering clock.
//!
//! Attack is a linear ramp 0 → 1, decay and release are exponential ramps.
//! Exponential targets are clamped to [`ENVELOPE_FLOOR`] because an
//! exponential ramp never reaches zero.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Smallest level an exponential segment ramps towards.
pub const ENVELOPE_FLOOR: f64 = 1e-4;

/// Hz added to a filter cutoff per unit of envelope × envelope amount.
pub const FILTER_ENVELOPE_SCALE_HZ: f64 = 4000.0;

/// Envelope stages, as seen at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
    Finished,
}

/// Attack/decay/release in seconds, sustain as a level in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Adsr {
    pub attack: f64,
    pub decay: f64,
    pub sustain: f64,
    pub release: f64,
}

impl Default for Adsr {
    fn default() -> Self {
        Adsr {
            attack: 0.01,
            decay: 0.1,
            sustain: 0.7,
            release: 0.3,
        }
    }
}

impl Adsr {
    pub fn new(attack: f64, decay: f64, sustain: f64, release: f64) -> Self {
        Adsr {
            attack,
            decay,
            sustain,
            release,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, v) in [
            ("attack", self.attack),
            ("decay", self.decay),
            ("release", self.release),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(EngineError::InvalidConfig(format!(
                    "envelope {name} must be a finite value >= 0, got {v}"
                )));
            }
        }
        if !self.sustain.is_finite() || !(0.0..=1.0).contains(&self.sustain) {
            return Err(EngineError::InvalidConfig(format!(
                "envelope sustain must be within [0, 1], got {}",
                self.sustain
            )));
        }
        Ok(())
    }

    fn sustain_target(&self) -> f64 {
        self.sustain.max(ENVELOPE_FLOOR)
    }

    /// Level `elapsed` seconds after note-on with the gate still held.
    pub fn held_value(&self, elapsed: f64) -> f64 {
        if elapsed < 0.0 {
            return 0.0;
        }
        if elapsed < self.attack {
            return elapsed / self.attack;
        }
        let t = elapsed - self.attack;
        if t < self.decay {
            return self.sustain_target().powf(t / self.decay);
        }
        self.sustain_target()
    }

    /// Level `elapsed` seconds after note-on, released at `released_at`
    /// seconds after note-on (if released).
    pub fn value_at(&self, elapsed: f64, released_at: Option<f64>) -> f64 {
        let Some(released_at) = released_at else {
            return self.held_value(elapsed);
        };
        if elapsed < released_at {
            return self.held_value(elapsed);
        }
        let t = elapsed - released_at;
        if t >= self.release {
            return 0.0;
        }
        let start = self.held_value(released_at).max(ENVELOPE_FLOOR);
        start * (ENVELOPE_FLOOR / start).powf(t / self.release)
    }

    /// Which stage the envelope is in at `elapsed`.
    pub fn stage_at(&self, elapsed: f64, released_at: Option<f64>) -> Stage {
        if elapsed < 0.0 {
            return Stage::Idle;
        }
        match released_at {
            Some(r) if elapsed >= r => {
                if elapsed - r >= self.release {
                    Stage::Finished
                } else {
                    Stage::Release
                }
            }
            _ if elapsed < self.attack => Stage::Attack,
            _ if elapsed < self.attack + self.decay => Stage::Decay,
            _ => Stage::Sustain,
        }
    }

    /// Seconds from note-on until a one-shot (auto-released after decay) is silent.
    pub fn one_shot_length(&self) -> f64 {
        self.attack + self.decay + self.release
    }
}

/// Filter cutoff under envelope modulation, clamped below Nyquist.
pub fn modulated_cutoff(base_hz: f64, envelope_amount: f64, env: f64, sample_rate: f64) -> f64 {
    let hz = base_hz + envelope_amount * env * FILTER_ENVELOPE_SCALE_HZ;
    hz.clamp(10.0, sample_rate * 0.49)
}
