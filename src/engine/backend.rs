//! Audio backend seam.
//!
//! A backend owns the host's rendering clock. The engine builds a
//! [`RenderGraph`] and hands it over with [`AudioBackend::attach`]; from then
//! on the backend pulls audio from it. Teardown takes the graph back with
//! [`AudioBackend::detach`] so it can be stopped before it is dropped.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::dsp::engine::{QUANTUM_FRAMES, RenderGraph};
use crate::error::{EngineError, Result};

/// What the host clock runs at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamConfig {
    pub sample_rate: f64,
    /// Frames the host pulls per callback.
    pub quantum_frames: usize,
}

pub trait AudioBackend: Send + Sync {
    /// Report the stream format, or `UnsupportedPlatform` when there is no audio subsystem.
    fn probe(&self) -> Result<StreamConfig>;

    /// Take ownership of the graph and start pulling from it.
    fn attach(&self, graph: RenderGraph) -> Result<()>;

    /// Stop pulling and hand the graph back.
    fn detach(&self) -> Option<RenderGraph>;

    fn resume_stream(&self) -> Result<()> {
        Ok(())
    }

    fn suspend_stream(&self) -> Result<()> {
        Ok(())
    }
}

/// Pull-driven backend: audio is rendered only when asked for.
///
/// Used for offline rendering and by tests in place of a device.
#[derive(Debug)]
pub struct OfflineBackend {
    sample_rate: f64,
    graph: Mutex<Option<RenderGraph>>,
}

impl OfflineBackend {
    pub fn new(sample_rate: f64) -> Self {
        OfflineBackend {
            sample_rate,
            graph: Mutex::new(None),
        }
    }

    fn graph(&self) -> MutexGuard<'_, Option<RenderGraph>> {
        self.graph.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_attached(&self) -> bool {
        self.graph().is_some()
    }

    /// Render `frames` frames of stereo output. Silent when nothing is attached.
    pub fn render(&self, frames: usize) -> (Vec<f32>, Vec<f32>) {
        self.render_with_input(&vec![0.0; frames])
    }

    /// Render one output frame per `input` sample, feeding `input` as the live signal.
    pub fn render_with_input(&self, input: &[f32]) -> (Vec<f32>, Vec<f32>) {
        let mut left = vec![0.0; input.len()];
        let mut right = vec![0.0; input.len()];
        if let Some(graph) = self.graph().as_mut() {
            graph.process(&mut left, &mut right, input);
        }
        (left, right)
    }
}

impl AudioBackend for OfflineBackend {
    fn probe(&self) -> Result<StreamConfig> {
        if !(self.sample_rate.is_finite() && self.sample_rate >= 8000.0) {
            return Err(EngineError::UnsupportedPlatform(format!(
                "unusable sample rate {}",
                self.sample_rate
            )));
        }
        Ok(StreamConfig {
            sample_rate: self.sample_rate,
            quantum_frames: QUANTUM_FRAMES,
        })
    }

    fn attach(&self, graph: RenderGraph) -> Result<()> {
        let mut slot = self.graph();
        if slot.is_some() {
            return Err(EngineError::InitializationFailed(
                "a render graph is already attached".into(),
            ));
        }
        *slot = Some(graph);
        Ok(())
    }

    fn detach(&self) -> Option<RenderGraph> {
        self.graph().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::command::channels;

    fn graph(sr: f64) -> RenderGraph {
        let config = EngineConfig::default();
        let (g, _c) = channels(&config, sr);
        RenderGraph::new(&config, sr, g)
    }

    #[test]
    fn probe_reports_format() {
        let backend = OfflineBackend::new(48000.0);
        let stream = backend.probe().unwrap();
        assert_eq!(stream.sample_rate, 48000.0);
        assert_eq!(stream.quantum_frames, QUANTUM_FRAMES);

        let broken = OfflineBackend::new(0.0);
        assert!(matches!(broken.probe(), Err(EngineError::UnsupportedPlatform(_))));
    }

    #[test]
    fn attach_is_exclusive() {
        let backend = OfflineBackend::new(44100.0);
        backend.attach(graph(44100.0)).unwrap();
        assert!(backend.is_attached());
        assert!(matches!(
            backend.attach(graph(44100.0)),
            Err(EngineError::InitializationFailed(_))
        ));
        assert!(backend.detach().is_some());
        assert!(backend.detach().is_none());
    }

    #[test]
    fn renders_silence_when_detached() {
        let backend = OfflineBackend::new(44100.0);
        let (l, r) = backend.render(256);
        assert_eq!(l.len(), 256);
        assert!(l.iter().chain(&r).all(|s| *s == 0.0));
    }
}
