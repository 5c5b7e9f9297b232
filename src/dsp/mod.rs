//! DSP: synthesis voices, effect units and the render graph.
//!
//! Everything under here runs on the rendering clock or is built by the
//! control side for it. Units allocate in their constructors only; the
//! per-block paths write into caller-provided buffers.

pub mod chorus;
pub mod compressor;
pub mod convolver;
pub mod curves;
pub mod delay;
pub mod distortion;
pub mod effect;
pub mod engine;
pub mod envelope;
pub mod eq;
pub mod filter;
pub mod mixer;
pub mod oscillator;
pub mod phaser;
pub mod pitch_shift;
pub mod renderer;
pub mod reverb;
pub mod schedule;
pub mod vocoder;
pub mod voice;
