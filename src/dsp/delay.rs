//! Delay effect: stereo delay line with feedback.

use crate::dsp::effect::ParamMap;

/// Longest delay a unit can hold, in seconds.
pub const MAX_DELAY_SECONDS: f64 = 1.0;

/// Shortest delay in samples. The feedback edge always crosses at least one
/// sample, so the loop can never become a zero-delay cycle.
pub const MIN_DELAY_SAMPLES: usize = 1;

/// A stereo feedback delay producing only the echoes.
#[derive(Debug, Clone)]
pub struct Delay {
    buffer_l: Vec<f32>,
    buffer_r: Vec<f32>,
    write_pos: usize,
    sample_rate: f64,
    delay_samples: usize,

    /// Delay time in seconds.
    pub delay_time: f64,
    /// Feedback amount (0.0 = single echo).
    pub feedback: f64,
}

impl Delay {
    /// Create a new delay effect.
    ///
    /// # Arguments
    /// - `sample_rate`: Audio sample rate in Hz.
    /// - `max_delay_seconds`: Maximum supported delay time.
    pub fn new(sample_rate: f64, max_delay_seconds: f64) -> Self {
        let buffer_size = (sample_rate * max_delay_seconds) as usize + MIN_DELAY_SAMPLES + 1;
        let mut d = Self {
            buffer_l: vec![0.0; buffer_size],
            buffer_r: vec![0.0; buffer_size],
            write_pos: 0,
            sample_rate,
            delay_samples: MIN_DELAY_SAMPLES,
            delay_time: 0.25,
            feedback: 0.4,
        };
        d.set_time(d.delay_time);
        d
    }

    pub fn from_params(params: &ParamMap, sample_rate: f64) -> Self {
        let mut d = Self::new(sample_rate, MAX_DELAY_SECONDS);
        d.set_time(params.get("time"));
        d.feedback = params.get("feedback");
        d
    }

    pub fn set_param(&mut self, id: &str, value: f64) {
        match id {
            "time" => self.set_time(value),
            "feedback" => self.feedback = value.clamp(0.0, 0.99),
            _ => {}
        }
    }

    pub fn set_time(&mut self, seconds: f64) {
        self.delay_time = seconds.max(0.0);
        let samples = (self.delay_time * self.sample_rate).round() as usize;
        self.delay_samples = samples.clamp(MIN_DELAY_SAMPLES, self.buffer_l.len() - 1);
    }

    /// Delay currently applied, in samples.
    pub fn delay_samples(&self) -> usize {
        self.delay_samples
    }

    /// Process a stereo sample pair, returning the delayed (wet) signal.
    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let buffer_len = self.buffer_l.len();
        let read_pos = (self.write_pos + buffer_len - self.delay_samples) % buffer_len;

        let delayed_l = self.buffer_l[read_pos];
        let delayed_r = self.buffer_r[read_pos];

        let fb = self.feedback as f32;
        self.buffer_l[self.write_pos] = left + delayed_l * fb;
        self.buffer_r[self.write_pos] = right + delayed_r * fb;

        self.write_pos = (self.write_pos + 1) % buffer_len;

        (delayed_l, delayed_r)
    }

    /// Process a block of stereo audio in-place.
    pub fn process_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            (*l, *r) = self.process(*l, *r);
        }
    }

    /// Clear the delay buffers.
    pub fn clear(&mut self) {
        self.buffer_l.fill(0.0);
        self.buffer_r.fill(0.0);
        self.write_pos = 0;
    }
}
