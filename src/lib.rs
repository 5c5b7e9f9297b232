pub mod analysis;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod note;
pub mod timbre;

use wasm_bindgen::prelude::*;

pub use analysis::{AnalysisSnapshot, BeatInfo, PitchEstimate};
pub use config::{AnalysisConfig, BeatConfig, EngineConfig};
pub use dsp::effect::{EffectKind, ParameterInfo};
pub use engine::{AudioBackend, ContextState, EffectInfo, Engine, OfflineBackend};
pub use error::{EngineError, Result};
pub use timbre::{DrumHitConfig, TimbreConfig};

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WASM-exposed: return the resonance-core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

/// Render one note to a stereo WAV without an initialised engine.
pub fn render_note_wav(
    config: &TimbreConfig,
    frequency: f64,
    velocity: f64,
    hold_seconds: f64,
    sample_rate: u32,
) -> Result<Vec<u8>> {
    dsp::renderer::render_note_wav(config, frequency, velocity, hold_seconds, sample_rate)
}

/// Analyse a mono buffer with the default analysis settings.
pub fn analyze_samples(samples: &[f32], sample_rate: f64) -> AnalysisSnapshot {
    analysis::analyze_samples(samples, sample_rate, &AnalysisConfig::default())
}

/// WASM-exposed: render a note from a JSON `TimbreConfig` to a WAV byte array.
#[wasm_bindgen(js_name = renderNoteWav)]
pub fn render_note_wav_js(
    config_json: &str,
    frequency: f64,
    velocity: f64,
    hold_seconds: f64,
    sample_rate: u32,
) -> std::result::Result<Vec<u8>, JsValue> {
    let config = TimbreConfig::from_json(config_json).map_err(|e| JsValue::from_str(&format!("{e}")))?;
    render_note_wav(&config, frequency, velocity, hold_seconds, sample_rate)
        .map_err(|e| JsValue::from_str(&format!("{e}")))
}

/// WASM-exposed: analyse mono f32 samples into an analysis snapshot object.
#[wasm_bindgen(js_name = analyzeSamples)]
pub fn analyze_samples_js(samples: &[f32], sample_rate: f64) -> std::result::Result<JsValue, JsValue> {
    let snapshot = analyze_samples(samples, sample_rate);
    serde_wasm_bindgen::to_value(&snapshot).map_err(|e| JsValue::from_str(&format!("{e}")))
}

/// WASM-exposed: frequency of a note name such as `"F#3"`, or `NaN` if it does not parse.
#[wasm_bindgen(js_name = noteToFrequency)]
pub fn note_to_frequency_js(note: &str) -> f64 {
    note::note_to_frequency(note).unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert_eq!(core_version(), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn renders_from_json_config() {
        let config = TimbreConfig::from_json(
            r#"{"waveform":"square","envelope":{"attack":0.01,"decay":0.05,"sustain":0.5,"release":0.1}}"#,
        )
        .unwrap();
        let wav = render_note_wav(&config, 220.0, 0.9, 0.2, 22050).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert!(wav.len() > 44 + (0.2 * 22050.0 * 4.0) as usize);
    }

    #[test]
    fn analyses_a_plain_buffer() {
        let sr = 44100.0;
        let samples: Vec<f32> = (0..4096)
            .map(|i| (0.5 * (std::f64::consts::TAU * 440.0 * i as f64 / sr).sin()) as f32)
            .collect();
        let snapshot = analyze_samples(&samples, sr);
        assert!(snapshot.is_active);
        let pitch = snapshot.pitch(50.0, 2000.0);
        assert!(pitch.is_detected());
        assert_eq!(pitch.midi_note, 69);
    }
}
