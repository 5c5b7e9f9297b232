//! Autocorrelation pitch detection.

use serde::Serialize;

use crate::note::frequency_to_midi_cents;

/// Normalised correlation below this reports no pitch.
pub const CONFIDENCE_THRESHOLD: f64 = 0.3;

/// Candidate peaks within this fraction of the best peak are preferred
/// at shorter lags, which avoids reporting a sub-octave.
const OCTAVE_TOLERANCE: f64 = 0.9;

/// Reference tuning for the reported MIDI note.
pub const A4_FREQUENCY: f64 = 440.0;

/// A detected fundamental.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PitchEstimate {
    /// Hz; 0 when no pitch was found.
    pub frequency: f64,
    /// Normalised correlation at the chosen lag, 0..1.
    pub confidence: f64,
    pub midi_note: u8,
    /// Offset from `midi_note` in cents, -50..50.
    pub cents: f64,
}

impl PitchEstimate {
    pub fn is_detected(&self) -> bool {
        self.frequency > 0.0
    }
}

fn normalized_correlation(samples: &[f32], lag: usize) -> f64 {
    let n = samples.len() - lag;
    let (mut xy, mut xx, mut yy) = (0.0f64, 0.0f64, 0.0f64);
    for i in 0..n {
        let x = samples[i] as f64;
        let y = samples[i + lag] as f64;
        xy += x * y;
        xx += x * x;
        yy += y * y;
    }
    let denom = (xx * yy).sqrt();
    if denom <= f64::EPSILON { 0.0 } else { xy / denom }
}

/// Estimate the fundamental of `samples` within `[min_frequency, max_frequency]`.
///
/// Every correlation overlaps by at least the shortest period in range,
/// so a window of two periods is enough at the top of the range.
pub fn detect_pitch(
    samples: &[f32],
    sample_rate: f64,
    min_frequency: f64,
    max_frequency: f64,
) -> PitchEstimate {
    if samples.len() < 4 || min_frequency <= 0.0 || max_frequency <= min_frequency {
        return PitchEstimate::default();
    }
    let min_lag = ((sample_rate / max_frequency).floor() as usize).max(2);
    let max_overlap_lag = samples.len().saturating_sub(min_lag);
    let max_lag = ((sample_rate / min_frequency).ceil() as usize).min(max_overlap_lag);
    if max_lag < min_lag {
        return PitchEstimate::default();
    }

    // one extra lag on each side so the end points can be local maxima
    let lo = min_lag - 1;
    let corr: Vec<f64> = (lo..=max_lag + 1)
        .map(|lag| {
            if lag <= max_overlap_lag {
                normalized_correlation(samples, lag)
            } else {
                0.0
            }
        })
        .collect();

    let (best_idx, best) = (1..corr.len() - 1)
        .map(|i| (i, corr[i]))
        .fold((0, f64::NEG_INFINITY), |acc, x| if x.1 > acc.1 { x } else { acc });
    if best < CONFIDENCE_THRESHOLD {
        return PitchEstimate::default();
    }

    // a period sitting right at the window limit may not form a local maximum
    let idx = (1..corr.len() - 1)
        .find(|&i| {
            corr[i] >= best * OCTAVE_TOLERANCE && corr[i] >= corr[i - 1] && corr[i] >= corr[i + 1]
        })
        .unwrap_or(best_idx);

    // parabolic interpolation around the peak
    let (a, b, c) = (corr[idx - 1], corr[idx], corr[idx + 1]);
    let denom = a - 2.0 * b + c;
    let shift = if denom.abs() > f64::EPSILON {
        (0.5 * (a - c) / denom).clamp(-0.5, 0.5)
    } else {
        0.0
    };
    let lag = (lo + idx) as f64 + shift;

    let frequency = sample_rate / lag;
    let (midi_note, cents) = frequency_to_midi_cents(frequency, A4_FREQUENCY);
    PitchEstimate {
        frequency,
        confidence: b.clamp(0.0, 1.0),
        midi_note,
        cents,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::TAU;

    fn sine(freq: f64, sr: f64, len: usize) -> Vec<f32> {
        (0..len).map(|i| (TAU * freq * i as f64 / sr).sin() as f32).collect()
    }

    #[test]
    fn sine_within_one_percent() {
        let sr = 44100.0;
        for freq in [100.0, 130.8, 220.0, 440.0, 777.0, 1000.0, 1500.0, 2000.0] {
            let est = detect_pitch(&sine(freq, sr, 2048), sr, 50.0, 4000.0);
            let err = (est.frequency - freq).abs() / freq;
            assert!(err < 0.01, "{freq} Hz detected as {} Hz", est.frequency);
            assert!(est.confidence > 0.9);
        }
    }

    #[test]
    fn two_period_window() {
        let sr = 44100.0;
        let freq: f64 = 200.0;
        let len = (2.0 * sr / freq).ceil() as usize;
        let est = detect_pitch(&sine(freq, sr, len), sr, 100.0, 2000.0);
        assert!((est.frequency - freq).abs() / freq < 0.01, "{}", est.frequency);
    }

    #[test]
    fn two_period_windows_across_the_range() {
        let sr = 44100.0;
        let sweep = (0..)
            .map(|step| 100.0 + 7.3 * step as f64)
            .take_while(|f| *f < 2000.0)
            .chain([2000.0]);
        for freq in sweep {
            let len = (2.0 * sr / freq).ceil() as usize;
            let est = detect_pitch(&sine(freq, sr, len), sr, 80.0, 2000.0);
            let err = (est.frequency - freq).abs() / freq;
            assert!(err < 0.01, "{freq:.1} Hz over {len} samples detected as {:.2} Hz", est.frequency);
        }
    }

    #[test]
    fn harmonic_rich_signal_reports_fundamental() {
        let sr = 44100.0;
        let samples: Vec<f32> = (0..2048)
            .map(|i| {
                let t = i as f64 / sr;
                ((TAU * 220.0 * t).sin() + 0.6 * (TAU * 440.0 * t).sin() + 0.3 * (TAU * 660.0 * t).sin())
                    as f32
            })
            .collect();
        let est = detect_pitch(&samples, sr, 60.0, 2000.0);
        assert!((est.frequency - 220.0).abs() < 2.2, "{}", est.frequency);
        assert_eq!(est.midi_note, 57);
    }

    #[test]
    fn noise_and_silence_report_nothing() {
        let silent = vec![0.0f32; 2048];
        assert!(!detect_pitch(&silent, 44100.0, 80.0, 1000.0).is_detected());

        let mut rng = crate::dsp::oscillator::NoiseSource::new(9);
        let noise: Vec<f32> = (0..2048).map(|_| rng.next_sample() as f32).collect();
        let est = detect_pitch(&noise, 44100.0, 80.0, 1000.0);
        assert!(!est.is_detected(), "noise gave {}", est.frequency);
        assert_eq!(est.confidence, 0.0);
    }

    #[test]
    fn window_too_short_for_range() {
        let est = detect_pitch(&sine(100.0, 44100.0, 64), 44100.0, 50.0, 200.0);
        assert!(!est.is_detected());
    }
}
