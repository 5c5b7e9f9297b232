//! Voices: one sounding note or drum hit.
//!
//! Voices are built on the control side from a config snapshot and handed
//! to the render graph fully formed. Time inside a voice is counted in
//! samples since note-on on the rendering clock.

use crate::dsp::effect::EffectKind;
use crate::dsp::envelope::{self, Adsr};
use crate::dsp::filter::{BiquadFilter, FilterType};
use crate::dsp::oscillator::{NoiseSource, Oscillator};
use crate::timbre::{DrumHitConfig, FilterConfig, TimbreConfig, VelocityCurve};

/// Identifies a voice across the command and deallocation queues.
pub type VoiceId = u64;

/// Registry key for a note frequency, in millihertz.
pub type NoteKey = i64;

/// Per-kind send levels, indexed by [`EffectKind::index`].
pub type Sends = [f32; EffectKind::ALL.len()];

/// Cutoff modulation is recomputed every this many samples.
const FILTER_UPDATE_INTERVAL: u64 = 32;

/// Registry key for a frequency: two notes share a key when they are
/// within half a millihertz of each other.
pub fn note_key(frequency: f64) -> NoteKey {
    (frequency * 1000.0).round() as NoteKey
}

#[derive(Debug, Clone)]
struct VoiceFilter {
    filter: BiquadFilter,
    config: FilterConfig,
}

/// One synth note: main oscillator plus partials, optional filter, envelope.
#[derive(Debug, Clone)]
pub struct NoteVoice {
    pub id: VoiceId,
    pub key: NoteKey,
    pub frequency: f64,
    oscillators: Vec<(Oscillator, f64)>,
    envelope: Adsr,
    filter: Option<VoiceFilter>,
    /// Peak gain after velocity mapping.
    amplitude: f64,
    sends: Sends,
    elapsed: u64,
    released_at: Option<u64>,
    sample_rate: f64,
}

impl NoteVoice {
    /// Build a voice. Assumes `config` has been validated.
    pub fn new(
        id: VoiceId,
        config: &TimbreConfig,
        frequency: f64,
        velocity: f64,
        sample_rate: f64,
    ) -> Self {
        let mut main = Oscillator::new(config.waveform, sample_rate);
        main.frequency = frequency;
        main.detune = config.detune;

        let partials = config.active_partials();
        // normalise so the summed oscillators stay within [-1, 1]
        let total = 1.0 + partials.iter().map(|p| p.gain.abs()).sum::<f64>();
        let mut oscillators = Vec::with_capacity(1 + partials.len());
        oscillators.push((main, 1.0 / total));
        for p in partials {
            let mut osc = Oscillator::new(p.waveform, sample_rate);
            osc.frequency = frequency * p.ratio;
            oscillators.push((osc, p.gain / total));
        }

        let filter = config.filter.map(|cfg| VoiceFilter {
            filter: BiquadFilter::with_params(cfg.filter_type, sample_rate, cfg.cutoff, cfg.resonance),
            config: cfg,
        });

        let mut sends = [0.0; EffectKind::ALL.len()];
        for kind in EffectKind::ALL {
            sends[kind.index()] = config.send(kind) as f32;
        }

        Self {
            id,
            key: note_key(frequency),
            frequency,
            oscillators,
            envelope: config.envelope,
            filter,
            amplitude: config.gain
                * config
                    .velocity_curve
                    .apply(velocity, config.velocity_sensitivity),
            sends,
            elapsed: 0,
            released_at: None,
            sample_rate,
        }
    }

    /// Enter the release stage now. Repeated calls keep the first release point.
    pub fn release(&mut self) {
        if self.released_at.is_none() {
            self.released_at = Some(self.elapsed);
        }
    }

    pub fn is_released(&self) -> bool {
        self.released_at.is_some()
    }

    /// Seconds since note-on.
    pub fn age(&self) -> f64 {
        self.elapsed as f64 / self.sample_rate
    }

    /// Seconds from now until the release stage reaches silence.
    pub fn release_seconds(&self) -> f64 {
        self.envelope.release
    }

    fn released_secs(&self) -> Option<f64> {
        self.released_at.map(|s| s as f64 / self.sample_rate)
    }

    /// Envelope × amplitude at the current position.
    pub fn level(&self) -> f64 {
        self.amplitude * self.envelope.value_at(self.age(), self.released_secs())
    }

    pub fn is_finished(&self) -> bool {
        match self.released_at {
            Some(r) => {
                let since = (self.elapsed - r) as f64 / self.sample_rate;
                since >= self.envelope.release
            }
            None => false,
        }
    }

    pub fn sends(&self) -> &Sends {
        &self.sends
    }

    /// Render mono output into `out`, overwriting it.
    pub fn render(&mut self, out: &mut [f32]) {
        let released = self.released_secs();
        for o in out.iter_mut() {
            let t = self.elapsed as f64 / self.sample_rate;
            let env = self.envelope.value_at(t, released);

            let mut s = 0.0;
            for (osc, gain) in &mut self.oscillators {
                s += osc.next_sample() * *gain;
            }

            if let Some(vf) = &mut self.filter {
                if vf.config.envelope_amount != 0.0 && self.elapsed % FILTER_UPDATE_INTERVAL == 0 {
                    vf.filter.set_frequency(envelope::modulated_cutoff(
                        vf.config.cutoff,
                        vf.config.envelope_amount,
                        env,
                        self.sample_rate,
                    ));
                }
                s = vf.filter.process(s);
            }

            *o = (s * env * self.amplitude) as f32;
            self.elapsed += 1;
        }
    }
}

/// A one-shot percussion voice: pitch-swept body plus optional noise burst.
#[derive(Debug, Clone)]
pub struct DrumVoice {
    pub id: VoiceId,
    body: Oscillator,
    body_filter: BiquadFilter,
    base_frequency: f64,
    start_frequency: f64,
    pitch_decay: f64,
    noise: Option<(NoiseSource, BiquadFilter, f64)>,
    envelope: Adsr,
    amplitude: f64,
    sends: Sends,
    elapsed: u64,
    sample_rate: f64,
}

impl DrumVoice {
    /// Build a hit. Assumes `config` has been validated.
    pub fn new(id: VoiceId, config: &DrumHitConfig, sample_rate: f64) -> Self {
        let start_frequency = config.base_frequency * config.pitch_multiplier;
        let mut body = Oscillator::new(config.oscillator, sample_rate);
        body.frequency = start_frequency;

        let noise = config.noise.map(|n| {
            (
                NoiseSource::new(id),
                BiquadFilter::with_params(FilterType::Highpass, sample_rate, n.highpass, 0.707),
                n.amount.clamp(0.0, 1.0),
            )
        });

        let mut sends = [0.0; EffectKind::ALL.len()];
        for kind in EffectKind::ALL {
            sends[kind.index()] = config.send(kind) as f32;
        }

        let level = 1.0 + noise.as_ref().map_or(0.0, |n| n.2);
        Self {
            id,
            body,
            body_filter: BiquadFilter::with_params(
                FilterType::Lowpass,
                sample_rate,
                start_frequency * 4.0,
                config.resonance,
            ),
            base_frequency: config.base_frequency,
            start_frequency,
            pitch_decay: config.pitch_decay.max(0.0),
            noise,
            envelope: config.envelope,
            amplitude: VelocityCurve::Linear.apply(config.velocity, 1.0) / level,
            sends,
            elapsed: 0,
            sample_rate,
        }
    }

    /// Seconds from trigger until silence.
    pub fn length(&self) -> f64 {
        self.envelope.one_shot_length()
    }

    /// Swept oscillator frequency `t` seconds after the hit.
    pub fn frequency_at(&self, t: f64) -> f64 {
        if self.pitch_decay <= 0.0 {
            return self.base_frequency;
        }
        self.base_frequency
            + (self.start_frequency - self.base_frequency) * (-t / self.pitch_decay).exp()
    }

    pub fn is_finished(&self) -> bool {
        self.elapsed as f64 / self.sample_rate >= self.length()
    }

    pub fn sends(&self) -> &Sends {
        &self.sends
    }

    pub fn render(&mut self, out: &mut [f32]) {
        // the gate closes on its own once attack and decay have run
        let gate = self.envelope.attack + self.envelope.decay;
        for o in out.iter_mut() {
            let t = self.elapsed as f64 / self.sample_rate;
            let env = self.envelope.value_at(t, Some(gate));

            if self.elapsed % FILTER_UPDATE_INTERVAL == 0 {
                let f = self.frequency_at(t);
                self.body.frequency = f;
                self.body_filter.set_frequency(f * 4.0);
            }
            let mut s = self.body_filter.process(self.body.next_sample());
            if let Some((source, highpass, amount)) = &mut self.noise {
                s += highpass.process(source.next_sample()) * *amount;
            }

            *o = (s * env * self.amplitude) as f32;
            self.elapsed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::oscillator::Waveform;
    use crate::timbre::{NoiseBurst, Partial};

    fn timbre(waveform: Waveform) -> TimbreConfig {
        TimbreConfig {
            waveform,
            gain: 1.0,
            envelope: Adsr::new(0.001, 0.001, 0.5, 0.01),
            ..TimbreConfig::default()
        }
    }

    #[test]
    fn voice_produces_sound() {
        let mut v = NoteVoice::new(1, &timbre(Waveform::Triangle), 440.0, 0.8, 44100.0);
        let mut buf = vec![0.0f32; 4410];
        v.render(&mut buf);
        assert!(buf.iter().any(|s| s.abs() > 0.001), "Voice should produce output");
    }

    #[test]
    fn voice_silent_after_release() {
        let mut v = NoteVoice::new(1, &timbre(Waveform::Sine), 440.0, 1.0, 44100.0);
        let mut buf = vec![0.0f32; 500];
        v.render(&mut buf);
        v.release();
        let mut tail = vec![0.0f32; 2000];
        v.render(&mut tail);
        assert!(v.is_finished(), "Voice should be finished after release");
        v.render(&mut buf);
        assert!(buf.iter().all(|s| *s == 0.0));
        assert_eq!(v.level(), 0.0);
    }

    #[test]
    fn partials_stay_in_range() {
        let mut config = timbre(Waveform::Square);
        config.partials = vec![
            Partial {
                waveform: Waveform::Sawtooth,
                ratio: 2.0,
                gain: 0.8,
            },
            Partial {
                waveform: Waveform::Square,
                ratio: 3.0,
                gain: 0.6,
            },
        ];
        config.envelope = Adsr::new(0.0, 0.0, 1.0, 0.1);
        let mut v = NoteVoice::new(1, &config, 220.0, 1.0, 44100.0);
        let mut buf = vec![0.0f32; 44100];
        v.render(&mut buf);
        assert!(buf.iter().all(|s| s.abs() <= 1.3), "PolyBLEP overshoot only");
    }

    #[test]
    fn velocity_mapped_once() {
        let mut config = timbre(Waveform::Sine);
        config.velocity_curve = VelocityCurve::Exponential;
        config.envelope = Adsr::new(0.0, 0.0, 1.0, 0.1);
        let v = NoteVoice::new(1, &config, 440.0, 0.5, 44100.0);
        assert!((v.level() - 0.25).abs() < 1e-9, "{}", v.level());
    }

    #[test]
    fn release_is_sticky() {
        let mut v = NoteVoice::new(1, &timbre(Waveform::Sine), 440.0, 1.0, 44100.0);
        let mut buf = vec![0.0f32; 100];
        v.render(&mut buf);
        v.release();
        v.render(&mut buf);
        v.release();
        assert!(v.is_released());
        assert!((v.age() - 200.0 / 44100.0).abs() < 1e-12);
    }

    #[test]
    fn filter_envelope_opens_the_filter() {
        let energy = |amount: f64| {
            let mut config = timbre(Waveform::Sawtooth);
            config.envelope = Adsr::new(0.0, 0.0, 1.0, 0.1);
            config.filter = Some(FilterConfig {
                filter_type: FilterType::Lowpass,
                cutoff: 300.0,
                resonance: 0.707,
                envelope_amount: amount,
            });
            let mut v = NoteVoice::new(1, &config, 110.0, 1.0, 44100.0);
            let mut buf = vec![0.0f32; 8820];
            v.render(&mut buf);
            // high-frequency content via first difference
            buf.windows(2).map(|w| (w[1] - w[0]).powi(2)).sum::<f32>()
        };
        assert!(energy(1.0) > energy(0.0) * 2.0);
    }

    #[test]
    fn keys_match_within_half_a_millihertz() {
        assert_eq!(note_key(440.0), note_key(440.0004));
        assert_ne!(note_key(440.0), note_key(440.001));
    }

    #[test]
    fn drum_sweeps_down_to_base() {
        let config = DrumHitConfig {
            base_frequency: 50.0,
            pitch_multiplier: 4.0,
            pitch_decay: 0.02,
            ..DrumHitConfig::default()
        };
        let drum = DrumVoice::new(7, &config, 44100.0);
        assert!((drum.frequency_at(0.0) - 200.0).abs() < 1e-9);
        assert!((drum.frequency_at(0.5) - 50.0).abs() < 1e-3);
        assert!(drum.frequency_at(0.01) > drum.frequency_at(0.02));
    }

    #[test]
    fn drum_finishes_after_its_length() {
        let config = DrumHitConfig {
            noise: Some(NoiseBurst::default()),
            envelope: Adsr::new(0.001, 0.05, 0.0, 0.05),
            ..DrumHitConfig::default()
        };
        let mut drum = DrumVoice::new(3, &config, 44100.0);
        let len = (drum.length() * 44100.0).ceil() as usize;
        let mut buf = vec![0.0f32; len];
        drum.render(&mut buf);
        assert!(buf.iter().any(|s| s.abs() > 0.01));
        assert!(buf.iter().all(|s| s.abs() <= 1.5));
        assert!(drum.is_finished());
        let mut after = vec![0.0f32; 64];
        drum.render(&mut after);
        assert!(after.iter().all(|s| *s == 0.0));
    }
}
