//! Grain-based pitch shifter.
//!
//! Two read heads sweep through a delay line at `2^(semitones/12)` times the
//! write speed, half a grain apart. Each head fades in and out with a sin²
//! window, so their gains always sum to one and the jump when a head wraps
//! is never heard. Artifacts at extreme shifts are expected.

use std::f64::consts::PI;

use crate::dsp::effect::ParamMap;

const MAX_GRAIN_SECONDS: f64 = 0.2;

#[derive(Debug, Clone)]
pub struct PitchShifter {
    buffer_l: Vec<f32>,
    buffer_r: Vec<f32>,
    write_pos: usize,
    sample_rate: f64,
    /// Delay of the first head in samples, within [0, grain).
    phase: f64,
    grain: f64,
    rate: f64,

    pub semitones: f64,
}

impl PitchShifter {
    pub fn new(sample_rate: f64) -> Self {
        let size = (sample_rate * MAX_GRAIN_SECONDS) as usize + 4;
        let mut p = Self {
            buffer_l: vec![0.0; size],
            buffer_r: vec![0.0; size],
            write_pos: 0,
            sample_rate,
            phase: 0.0,
            grain: 0.05 * sample_rate,
            rate: 1.0,
            semitones: 0.0,
        };
        p.set_param("semitones", 0.0);
        p
    }

    pub fn from_params(params: &ParamMap, sample_rate: f64) -> Self {
        let mut p = Self::new(sample_rate);
        p.set_param("semitones", params.get("semitones"));
        p.set_param("grainSize", params.get("grainSize"));
        p
    }

    pub fn set_param(&mut self, id: &str, value: f64) {
        match id {
            "semitones" => {
                self.semitones = value;
                self.rate = playback_rate(value);
            }
            "grainSize" => {
                let max = (self.buffer_l.len() - 4) as f64;
                self.grain = (value * self.sample_rate).clamp(4.0, max);
                self.phase = self.phase.rem_euclid(self.grain);
            }
            _ => {}
        }
    }

    /// Read with linear interpolation `delay` samples behind the write head.
    #[inline]
    fn read(buffer: &[f32], write_pos: usize, delay: f64) -> f32 {
        let len = buffer.len();
        let delay_int = delay as usize;
        let frac = (delay - delay_int as f64) as f32;
        let i0 = (write_pos + len - delay_int) % len;
        let i1 = (i0 + len - 1) % len;
        buffer[i0] + frac * (buffer[i1] - buffer[i0])
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        self.buffer_l[self.write_pos] = left;
        self.buffer_r[self.write_pos] = right;

        let mut out_l = 0.0f32;
        let mut out_r = 0.0f32;
        for offset in [0.0, 0.5] {
            let d = (self.phase + offset * self.grain).rem_euclid(self.grain);
            let gain = (PI * d / self.grain).sin().powi(2) as f32;
            // one extra sample keeps every head strictly behind the write head
            let delay = d + 1.0;
            out_l += gain * Self::read(&self.buffer_l, self.write_pos, delay);
            out_r += gain * Self::read(&self.buffer_r, self.write_pos, delay);
        }

        self.phase = (self.phase + 1.0 - self.rate).rem_euclid(self.grain);
        self.write_pos = (self.write_pos + 1) % self.buffer_l.len();
        (out_l, out_r)
    }

    pub fn process_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            (*l, *r) = self.process(*l, *r);
        }
    }
}

/// Resampling ratio for a shift in semitones.
pub fn playback_rate(semitones: f64) -> f64 {
    2.0_f64.powf(semitones / 12.0)
}
