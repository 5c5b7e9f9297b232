//! Anti-aliased oscillators using PolyBLEP, plus noise and LFO sources.

use std::f64::consts::PI;
use std::str::FromStr;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Supported waveform shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    Sine,
    Square,
    #[serde(alias = "saw")]
    Sawtooth,
    #[default]
    Triangle,
}

impl FromStr for Waveform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sine" => Ok(Waveform::Sine),
            "square" => Ok(Waveform::Square),
            "sawtooth" | "saw" => Ok(Waveform::Sawtooth),
            "triangle" => Ok(Waveform::Triangle),
            other => Err(format!("unknown waveform '{other}'")),
        }
    }
}

/// A band-limited oscillator with anti-aliasing (PolyBLEP).
#[derive(Debug, Clone)]
pub struct Oscillator {
    pub waveform: Waveform,
    pub frequency: f64,
    pub detune: f64, // in cents
    phase: f64,
    sample_rate: f64,
}

impl Oscillator {
    pub fn new(waveform: Waveform, sample_rate: f64) -> Self {
        Oscillator {
            waveform,
            frequency: 440.0,
            detune: 0.0,
            phase: 0.0,
            sample_rate,
        }
    }

    /// Effective frequency accounting for detune (in cents).
    fn effective_freq(&self) -> f64 {
        self.frequency * (2.0_f64).powf(self.detune / 1200.0)
    }

    /// Phase increment per sample.
    fn phase_inc(&self) -> f64 {
        self.effective_freq() / self.sample_rate
    }

    /// Generate the next sample.
    pub fn next_sample(&mut self) -> f64 {
        let inc = self.phase_inc();
        let sample = match self.waveform {
            Waveform::Sine => self.sine(),
            Waveform::Sawtooth => self.sawtooth(inc),
            Waveform::Square => self.square(inc),
            Waveform::Triangle => self.triangle(),
        };

        self.phase += inc;
        if self.phase >= 1.0 {
            self.phase -= self.phase.floor();
        }

        sample
    }

    fn sine(&self) -> f64 {
        (2.0 * PI * self.phase).sin()
    }

    /// Naive sawtooth: rises from -1 to +1, then drops.
    /// PolyBLEP corrects the discontinuity at the wrap.
    fn sawtooth(&self, inc: f64) -> f64 {
        let naive = 2.0 * self.phase - 1.0;
        naive - poly_blep(self.phase, inc)
    }

    fn square(&self, inc: f64) -> f64 {
        let mut value = if self.phase < 0.5 { 1.0 } else { -1.0 };
        value += poly_blep(self.phase, inc);
        value -= poly_blep((self.phase + 0.5) % 1.0, inc);
        value
    }

    /// Piecewise linear, -1→+1 in [0, 0.5], +1→-1 in [0.5, 1].
    /// No discontinuity to correct, so no PolyBLEP.
    fn triangle(&self) -> f64 {
        if self.phase < 0.5 {
            4.0 * self.phase - 1.0
        } else {
            3.0 - 4.0 * self.phase
        }
    }

    /// Reset oscillator phase.
    pub fn reset(&mut self) {
        self.phase = 0.0;
    }
}

/// PolyBLEP (Polynomial Band-Limited Step) anti-aliasing correction.
///
/// `t` is the phase [0, 1), `dt` is the phase increment per sample.
fn poly_blep(t: f64, dt: f64) -> f64 {
    if t < dt {
        let t = t / dt;
        2.0 * t - t * t - 1.0
    } else if t > 1.0 - dt {
        let t = (t - 1.0) / dt;
        t * t + 2.0 * t + 1.0
    } else {
        0.0
    }
}

/// Uniform white noise in [-1, 1) from a seeded generator.
#[derive(Debug, Clone)]
pub struct NoiseSource {
    rng: SmallRng,
}

impl NoiseSource {
    pub fn new(seed: u64) -> Self {
        NoiseSource {
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    #[inline]
    pub fn next_sample(&mut self) -> f64 {
        self.rng.gen_range(-1.0..1.0)
    }
}

/// Sine low-frequency oscillator with a phase offset, output in [-1, 1].
#[derive(Debug, Clone)]
pub struct Lfo {
    pub rate: f64,
    phase: f64,
    sample_rate: f64,
}

impl Lfo {
    pub fn new(rate: f64, phase: f64, sample_rate: f64) -> Self {
        Lfo {
            rate,
            phase: phase.rem_euclid(1.0),
            sample_rate,
        }
    }

    #[inline]
    pub fn next_sample(&mut self) -> f64 {
        let out = (2.0 * PI * self.phase).sin();
        self.phase = (self.phase + self.rate / self.sample_rate).rem_euclid(1.0);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sine_zero_at_start() {
        let mut osc = Oscillator::new(Waveform::Sine, 44100.0);
        osc.frequency = 440.0;
        let sample = osc.next_sample();
        assert!(sample.abs() < 1e-10, "Sine should start near 0, got {sample}");
    }

    #[test]
    fn waveform_ranges() {
        for (wave, bound) in [
            (Waveform::Sine, 1.0),
            (Waveform::Triangle, 1.0),
            (Waveform::Sawtooth, 1.5),
            (Waveform::Square, 1.5),
        ] {
            let mut osc = Oscillator::new(wave, 44100.0);
            osc.frequency = 440.0;
            for _ in 0..44100 {
                let s = osc.next_sample();
                assert!(s.abs() <= bound, "{wave:?} out of range: {s}");
            }
        }
    }

    #[test]
    fn detune_shifts_frequency() {
        let mut osc1 = Oscillator::new(Waveform::Sine, 44100.0);
        osc1.frequency = 440.0;

        let mut osc2 = Oscillator::new(Waveform::Sine, 44100.0);
        osc2.frequency = 440.0;
        osc2.detune = 1200.0;

        let inc1 = osc1.phase_inc();
        let inc2 = osc2.phase_inc();
        assert!(
            (inc2 - 2.0 * inc1).abs() < 1e-10,
            "1200 cents detune should double frequency"
        );
    }

    #[test]
    fn parses_waveform_names() {
        assert_eq!("saw".parse::<Waveform>(), Ok(Waveform::Sawtooth));
        assert_eq!("sine".parse::<Waveform>(), Ok(Waveform::Sine));
        assert!("organ".parse::<Waveform>().is_err());
        let w: Waveform = serde_json::from_str("\"square\"").unwrap();
        assert_eq!(w, Waveform::Square);
    }

    #[test]
    fn noise_is_seeded_and_bounded() {
        let mut a = NoiseSource::new(7);
        let mut b = NoiseSource::new(7);
        for _ in 0..1000 {
            let x = a.next_sample();
            assert_eq!(x, b.next_sample());
            assert!((-1.0..1.0).contains(&x));
        }
    }

    #[test]
    fn lfo_completes_cycles() {
        let mut lfo = Lfo::new(1.0, 0.25, 100.0);
        let first = lfo.next_sample();
        assert!((first - 1.0).abs() < 1e-9, "quarter phase starts at the peak");
        for _ in 0..99 {
            lfo.next_sample();
        }
        assert!((lfo.next_sample() - 1.0).abs() < 1e-6);
    }
}
