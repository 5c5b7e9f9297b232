//! Uniformly partitioned FFT convolution (overlap-save).
//!
//! The impulse response is cut into blocks of [`BLOCK_SIZE`] samples, each
//! transformed once at construction. Input is gathered one block at a time;
//! every full block costs one forward FFT, a multiply-accumulate over the
//! frequency-domain delay line, and one inverse FFT. Latency is exactly one
//! block.

use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

/// Partition length in samples.
pub const BLOCK_SIZE: usize = 128;
const FFT_SIZE: usize = 2 * BLOCK_SIZE;

pub struct Convolver {
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    /// Transformed IR partitions.
    partitions: Vec<Vec<Complex<f32>>>,
    /// Spectra of past input blocks, newest at `fdl_pos`.
    fdl: Vec<Vec<Complex<f32>>>,
    fdl_pos: usize,
    /// Previous block followed by the block being gathered.
    window: Vec<f32>,
    time_buf: Vec<f32>,
    accum: Vec<Complex<f32>>,
    scratch_fwd: Vec<Complex<f32>>,
    scratch_inv: Vec<Complex<f32>>,
    output: Vec<f32>,
    pos: usize,
}

impl std::fmt::Debug for Convolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Convolver")
            .field("partitions", &self.partitions.len())
            .finish()
    }
}

impl Convolver {
    pub fn new(impulse: &[f32]) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(FFT_SIZE);
        let inverse = planner.plan_fft_inverse(FFT_SIZE);
        let mut scratch_fwd = forward.make_scratch_vec();

        let count = impulse.len().div_ceil(BLOCK_SIZE).max(1);
        let mut partitions = Vec::with_capacity(count);
        let mut padded = vec![0.0f32; FFT_SIZE];
        for p in 0..count {
            padded.fill(0.0);
            let start = p * BLOCK_SIZE;
            let end = (start + BLOCK_SIZE).min(impulse.len());
            if start < end {
                padded[..end - start].copy_from_slice(&impulse[start..end]);
            }
            let mut spectrum = forward.make_output_vec();
            // Sizes come from the plan itself, so the transform cannot fail.
            let _ = forward.process_with_scratch(&mut padded, &mut spectrum, &mut scratch_fwd);
            partitions.push(spectrum);
        }

        let bins = FFT_SIZE / 2 + 1;
        Self {
            fdl: vec![vec![Complex::new(0.0, 0.0); bins]; count],
            fdl_pos: 0,
            window: vec![0.0; FFT_SIZE],
            time_buf: vec![0.0; FFT_SIZE],
            accum: vec![Complex::new(0.0, 0.0); bins],
            scratch_inv: inverse.make_scratch_vec(),
            scratch_fwd,
            output: vec![0.0; BLOCK_SIZE],
            pos: 0,
            partitions,
            forward,
            inverse,
        }
    }

    /// Samples of delay between input and the first output of the IR.
    pub fn latency(&self) -> usize {
        BLOCK_SIZE
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        self.window[BLOCK_SIZE + self.pos] = input;
        let out = self.output[self.pos];
        self.pos += 1;
        if self.pos == BLOCK_SIZE {
            self.pos = 0;
            self.convolve_block();
        }
        out
    }

    fn convolve_block(&mut self) {
        let count = self.partitions.len();
        self.fdl_pos = (self.fdl_pos + 1) % count;

        self.time_buf.copy_from_slice(&self.window);
        let _ = self.forward.process_with_scratch(
            &mut self.time_buf,
            &mut self.fdl[self.fdl_pos],
            &mut self.scratch_fwd,
        );

        self.accum.fill(Complex::new(0.0, 0.0));
        for (p, h) in self.partitions.iter().enumerate() {
            let x = &self.fdl[(self.fdl_pos + count - p) % count];
            for ((acc, &xv), &hv) in self.accum.iter_mut().zip(x).zip(h) {
                *acc += xv * hv;
            }
        }
        // The inverse real transform requires purely real DC and Nyquist bins.
        self.accum[0].im = 0.0;
        if let Some(last) = self.accum.last_mut() {
            last.im = 0.0;
        }

        let _ = self.inverse.process_with_scratch(
            &mut self.accum,
            &mut self.time_buf,
            &mut self.scratch_inv,
        );
        let scale = 1.0 / FFT_SIZE as f32;
        for (o, &t) in self.output.iter_mut().zip(&self.time_buf[BLOCK_SIZE..]) {
            *o = t * scale;
        }

        self.window.copy_within(BLOCK_SIZE.., 0);
    }

    pub fn reset(&mut self) {
        for spectrum in &mut self.fdl {
            spectrum.fill(Complex::new(0.0, 0.0));
        }
        self.window.fill(0.0);
        self.output.fill(0.0);
        self.pos = 0;
    }
}
