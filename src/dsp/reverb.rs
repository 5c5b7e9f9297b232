//! Reverb: early-reflection taps plus a convolution tail.
//!
//! The mono input passes through a predelay line. Six taps read early
//! reflections from it, and a stereo convolver renders the late tail from
//! a synthetic noise impulse. A lowpass after the convolution models damping.

use crate::dsp::convolver::Convolver;
use crate::dsp::curves::{self, EARLY_REFLECTIONS, IMPULSE_SEED};
use crate::dsp::effect::ParamMap;
use crate::dsp::filter::{BiquadFilter, FilterType};

/// Shortest and longest tail lengths mapped from `roomSize` 0..1.
const MIN_TAIL_SECONDS: f64 = 0.3;
const MAX_TAIL_SECONDS: f64 = 4.0;

/// Level of the early reflections relative to the tail.
const EARLY_GAIN: f32 = 0.5;

/// Map `damping` 0..1 onto a lowpass cutoff (20 kHz → 500 Hz).
pub fn damping_cutoff(damping: f64) -> f64 {
    500.0 * 40.0_f64.powf(1.0 - damping.clamp(0.0, 1.0))
}

/// Tail length in seconds for a room size.
pub fn tail_seconds(room_size: f64) -> f64 {
    MIN_TAIL_SECONDS + room_size.clamp(0.0, 1.0) * (MAX_TAIL_SECONDS - MIN_TAIL_SECONDS)
}

/// Stereo convolution reverb producing only the reverberant signal.
#[derive(Debug)]
pub struct Reverb {
    line: Vec<f32>,
    write_pos: usize,
    predelay_samples: usize,
    taps: [(usize, f32); 6],
    tail_l: Convolver,
    tail_r: Convolver,
    damp_l: BiquadFilter,
    damp_r: BiquadFilter,

    pub room_size: f64,
    pub damping: f64,
    pub predelay: f64,
    /// Impulse envelope exponent.
    pub decay: f64,
}

impl Reverb {
    /// Build a reverb; generates and transforms the impulse response.
    pub fn new(sample_rate: f64, room_size: f64, decay: f64, predelay: f64) -> Self {
        let predelay = predelay.clamp(0.0, 0.5);
        let predelay_samples = (predelay * sample_rate).round() as usize;

        let mut taps = [(0usize, 0.0f32); 6];
        for (tap, &(offset, gain)) in taps.iter_mut().zip(EARLY_REFLECTIONS.iter()) {
            *tap = (predelay_samples + (offset * sample_rate).round() as usize, gain);
        }
        let longest = taps.iter().map(|t| t.0).max().unwrap_or(0);

        let [mut ir_l, mut ir_r] =
            curves::impulse_response(sample_rate, tail_seconds(room_size), decay, IMPULSE_SEED);
        normalize_energy(&mut ir_l);
        normalize_energy(&mut ir_r);

        let damping = 0.5;
        let cutoff = damping_cutoff(damping);
        Self {
            line: vec![0.0; longest + 1],
            write_pos: 0,
            predelay_samples,
            taps,
            tail_l: Convolver::new(&ir_l),
            tail_r: Convolver::new(&ir_r),
            damp_l: BiquadFilter::with_params(FilterType::Lowpass, sample_rate, cutoff, 0.707),
            damp_r: BiquadFilter::with_params(FilterType::Lowpass, sample_rate, cutoff, 0.707),
            room_size,
            damping,
            predelay,
            decay,
        }
    }

    pub fn from_params(params: &ParamMap, sample_rate: f64) -> Self {
        let mut r = Self::new(
            sample_rate,
            params.get("roomSize"),
            params.get("decay"),
            params.get("predelay"),
        );
        r.set_param("damping", params.get("damping"));
        r
    }

    /// Only `damping` is live; the other parameters rebuild the unit.
    pub fn set_param(&mut self, id: &str, value: f64) {
        if id == "damping" {
            self.damping = value.clamp(0.0, 1.0);
            let cutoff = damping_cutoff(self.damping);
            self.damp_l.set_frequency(cutoff);
            self.damp_r.set_frequency(cutoff);
        }
    }

    #[inline]
    fn read(&self, delay: usize) -> f32 {
        let len = self.line.len();
        self.line[(self.write_pos + len - delay) % len]
    }

    /// Process a stereo sample pair, returning the wet signal.
    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        self.line[self.write_pos] = 0.5 * (left + right);

        let mut early_l = 0.0f32;
        let mut early_r = 0.0f32;
        for (i, &(delay, gain)) in self.taps.iter().enumerate() {
            let s = self.read(delay) * gain;
            // alternate taps between channels for width
            if i % 2 == 0 {
                early_l += s;
                early_r += 0.6 * s;
            } else {
                early_l += 0.6 * s;
                early_r += s;
            }
        }

        let delayed = self.read(self.predelay_samples);
        let late_l = self.damp_l.process(self.tail_l.process(delayed) as f64) as f32;
        let late_r = self.damp_r.process(self.tail_r.process(delayed) as f64) as f32;

        self.write_pos = (self.write_pos + 1) % self.line.len();

        (early_l * EARLY_GAIN + late_l, early_r * EARLY_GAIN + late_r)
    }

    /// Process a block of stereo audio in-place.
    pub fn process_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            (*l, *r) = self.process(*l, *r);
        }
    }

    /// Clear all internal buffers.
    pub fn clear(&mut self) {
        self.line.fill(0.0);
        self.tail_l.reset();
        self.tail_r.reset();
        self.damp_l.reset();
        self.damp_r.reset();
    }
}

/// Scale an impulse to unit energy so tails of any length sit at similar levels.
fn normalize_energy(ir: &mut [f32]) {
    let energy: f32 = ir.iter().map(|s| s * s).sum();
    if energy > 0.0 {
        let scale = energy.sqrt().recip();
        ir.iter_mut().for_each(|s| *s *= scale);
    }
}
