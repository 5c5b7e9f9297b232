//! Engine configuration.
//!
//! Every field has a default, so `{}` is a complete configuration and
//! callers only spell out what they change.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Top-level engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Concurrent note voices; a trigger beyond this steals the oldest one.
    pub max_voices: usize,
    /// Slots in the control → render command ring.
    pub command_queue_capacity: usize,
    /// Initial master volume, 0..1.
    pub master_volume: f64,
    pub analysis: AnalysisConfig,
    pub beat: BeatConfig,
    /// Seconds of stereo audio the recording ring holds between drains.
    pub record_ring_seconds: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_voices: 64,
            command_queue_capacity: 1024,
            master_volume: 0.8,
            analysis: AnalysisConfig::default(),
            beat: BeatConfig::default(),
            record_ring_seconds: 10.0,
        }
    }
}

/// Analyser tap settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnalysisConfig {
    /// FFT length; also the time-domain window. Power of two.
    pub fft_size: usize,
    /// Snapshot period in milliseconds.
    pub interval_ms: f64,
    /// Exponential smoothing of magnitudes between snapshots, 0..1.
    pub smoothing: f64,
    /// Fraction of spectral energy below the rolloff frequency.
    pub rolloff_percent: f64,
    pub mfcc_coefficients: usize,
    pub mel_bands: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            interval_ms: 16.0,
            smoothing: 0.8,
            rolloff_percent: 0.85,
            mfcc_coefficients: 13,
            mel_bands: 26,
        }
    }
}

/// Onset detector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BeatConfig {
    /// Onset when RMS exceeds the previous RMS times this factor.
    pub sensitivity: f64,
    /// Refractory period after an onset.
    pub min_interval_ms: f64,
    /// Absolute RMS floor an onset must exceed.
    pub energy_floor: f64,
    /// Inter-onset intervals averaged for the BPM estimate.
    pub history_size: usize,
}

impl Default for BeatConfig {
    fn default() -> Self {
        Self {
            sensitivity: 1.5,
            min_interval_ms: 300.0,
            energy_floor: 0.01,
            history_size: 8,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(EngineError::Config(msg));
        if self.max_voices == 0 {
            return fail("maxVoices must be at least 1".into());
        }
        if self.command_queue_capacity < 16 {
            return fail(format!(
                "commandQueueCapacity must be at least 16, got {}",
                self.command_queue_capacity
            ));
        }
        if !(0.0..=1.0).contains(&self.master_volume) {
            return fail(format!("masterVolume must be within [0, 1], got {}", self.master_volume));
        }
        let a = &self.analysis;
        if !a.fft_size.is_power_of_two() || a.fft_size < 32 {
            return fail(format!("analysis.fftSize must be a power of two >= 32, got {}", a.fft_size));
        }
        if a.interval_ms <= 0.0 {
            return fail("analysis.intervalMs must be positive".into());
        }
        if !(0.0..1.0).contains(&a.smoothing) {
            return fail(format!("analysis.smoothing must be within [0, 1), got {}", a.smoothing));
        }
        if !(0.5..=1.0).contains(&a.rolloff_percent) {
            return fail(format!(
                "analysis.rolloffPercent must be within [0.5, 1], got {}",
                a.rolloff_percent
            ));
        }
        if a.mel_bands == 0 || a.mfcc_coefficients == 0 || a.mfcc_coefficients > a.mel_bands {
            return fail("analysis needs 0 < mfccCoefficients <= melBands".into());
        }
        if self.beat.history_size == 0 || self.beat.sensitivity < 1.0 {
            return fail("beat needs historySize >= 1 and sensitivity >= 1".into());
        }
        if self.record_ring_seconds <= 0.0 {
            return fail("recordRingSeconds must be positive".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_the_default() {
        assert_eq!(EngineConfig::from_json("{}").unwrap(), EngineConfig::default());
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let config = EngineConfig::from_json(
            r#"{ "maxVoices": 8, "analysis": { "fftSize": 1024 }, "beat": { "minIntervalMs": 250 } }"#,
        )
        .unwrap();
        assert_eq!(config.max_voices, 8);
        assert_eq!(config.analysis.fft_size, 1024);
        assert_eq!(config.analysis.mel_bands, 26);
        assert_eq!(config.beat.min_interval_ms, 250.0);
        assert_eq!(config.beat.history_size, 8);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            EngineConfig::from_json(r#"{ "analysis": { "fftSize": 1000 } }"#),
            Err(EngineError::Config(_))
        ));
        assert!(EngineConfig::from_json(r#"{ "masterVolume": 2 }"#).is_err());
        assert!(EngineConfig::from_json("not json").is_err());
    }
}
