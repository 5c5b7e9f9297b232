//! Chorus / flanger: several LFO-modulated delay lines summed to a wet bus.
//!
//! Each line has its own sine LFO at a slightly offset rate. The wet sum
//! can be fed back into the first line, which gives the flanger its
//! resonance. Every read is at least [`MIN_DELAY_SAMPLES`] behind the write
//! head, so the feedback loop always contains a real delay.

use crate::dsp::effect::ParamMap;
use crate::dsp::oscillator::Lfo;

/// Buffer length per line, in seconds (max delay + max depth + margin).
const MAX_LINE_SECONDS: f64 = 0.05;

/// Shortest modulated delay, in samples.
pub const MIN_DELAY_SAMPLES: f64 = 1.0;

/// Rate spread between successive lines.
const RATE_OFFSET: f64 = 0.13;

#[derive(Debug, Clone)]
struct ModulatedLine {
    buffer: Vec<f32>,
    lfo: Lfo,
    rate_scale: f64,
    pan: f32,
}

/// A multi-voice chorus or flanger producing only the modulated signal.
#[derive(Debug, Clone)]
pub struct Chorus {
    lines: Vec<ModulatedLine>,
    write_pos: usize,
    sample_rate: f64,
    last_wet: f32,

    /// LFO rate in Hz of the first line.
    pub rate: f64,
    /// Modulation depth in seconds.
    pub depth: f64,
    /// Base delay time in seconds.
    pub delay: f64,
    /// Wet sum fed back into the first line.
    pub feedback: f64,
}

impl Chorus {
    /// Create a chorus with `voices` lines (at least 3).
    pub fn new(sample_rate: f64, voices: usize) -> Self {
        let voices = voices.max(3);
        let buffer_size = (sample_rate * MAX_LINE_SECONDS) as usize + 2;
        let rate = 1.5;
        let lines = (0..voices)
            .map(|i| {
                let rate_scale = 1.0 + RATE_OFFSET * i as f64;
                ModulatedLine {
                    buffer: vec![0.0; buffer_size],
                    lfo: Lfo::new(rate * rate_scale, i as f64 / voices as f64, sample_rate),
                    rate_scale,
                    pan: i as f32 / (voices - 1) as f32,
                }
            })
            .collect();

        Self {
            lines,
            write_pos: 0,
            sample_rate,
            last_wet: 0.0,
            rate,
            depth: 0.002,
            delay: 0.012,
            feedback: 0.0,
        }
    }

    pub fn from_params(params: &ParamMap, sample_rate: f64) -> Self {
        let mut c = Self::new(sample_rate, params.get("voices") as usize);
        for id in ["rate", "depth", "delay", "feedback"] {
            c.set_param(id, params.get(id));
        }
        c
    }

    pub fn set_param(&mut self, id: &str, value: f64) {
        match id {
            "rate" => {
                self.rate = value.clamp(0.01, 20.0);
                for line in &mut self.lines {
                    line.lfo.rate = self.rate * line.rate_scale;
                }
            }
            "depth" => self.depth = value.clamp(0.0, 0.01),
            "delay" => self.delay = value.clamp(0.0, 0.03),
            "feedback" => self.feedback = value.clamp(0.0, 0.95),
            _ => {}
        }
    }

    pub fn voices(&self) -> usize {
        self.lines.len()
    }

    /// Read from a delay buffer with fractional (linear interpolation) delay.
    #[inline]
    fn read_interpolated(buffer: &[f32], write_pos: usize, delay_samples: f64) -> f32 {
        let buffer_len = buffer.len();
        let delay_int = delay_samples as usize;
        let frac = (delay_samples - delay_int as f64) as f32;

        let read_pos_0 = (write_pos + buffer_len - delay_int) % buffer_len;
        let read_pos_1 = (read_pos_0 + buffer_len - 1) % buffer_len;

        let s0 = buffer[read_pos_0];
        let s1 = buffer[read_pos_1];

        s0 + frac * (s1 - s0)
    }

    /// Process a stereo sample pair.
    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let input = 0.5 * (left + right);
        let max_delay = (self.lines[0].buffer.len() - 2) as f64;
        let feedback_in = self.last_wet * self.feedback as f32;

        let mut wet_l = 0.0f32;
        let mut wet_r = 0.0f32;
        let mut wet_sum = 0.0f32;
        for (i, line) in self.lines.iter_mut().enumerate() {
            line.buffer[self.write_pos] = if i == 0 { input + feedback_in } else { input };

            let lfo = line.lfo.next_sample();
            let delay = ((self.delay + self.depth * lfo) * self.sample_rate)
                .clamp(MIN_DELAY_SAMPLES, max_delay);
            let out = Self::read_interpolated(&line.buffer, self.write_pos, delay);

            wet_sum += out;
            wet_l += out * (1.0 - line.pan);
            wet_r += out * line.pan;
        }

        let n = self.lines.len() as f32;
        self.last_wet = wet_sum / n;
        self.write_pos = (self.write_pos + 1) % self.lines[0].buffer.len();

        (2.0 * wet_l / n, 2.0 * wet_r / n)
    }

    /// Process a block of stereo audio in-place.
    pub fn process_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            (*l, *r) = self.process(*l, *r);
        }
    }

    /// Clear internal buffers.
    pub fn clear(&mut self) {
        for line in &mut self.lines {
            line.buffer.fill(0.0);
        }
        self.write_pos = 0;
        self.last_wet = 0.0;
    }
}
