//! Engine: the control plane callers talk to.
//!
//! `Engine` is an explicit handle, not a global: several engines can live
//! side by side, each with its own backend and context. Control calls may
//! come from any thread; they validate, build what needs allocating, and
//! queue a command for the rendering clock. They never wait on it.
//!
//! Lifecycle: `init()` builds a context in the suspended state, `resume()`
//! starts rendering (call it from a user gesture where the platform
//! requires one), `suspend()` pauses, `destroy()` stops every voice and
//! effect and closes the context. Triggers while not running are dropped
//! and reported with an error for which [`EngineError::is_not_ready`] holds.

pub mod backend;
pub mod command;
pub mod context;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, error, info, warn};

use crate::analysis::AnalysisSnapshot;
use crate::config::EngineConfig;
use crate::dsp::effect::{EffectKind, ParameterInfo};
use crate::dsp::engine::RenderGraph;
use crate::dsp::voice::{DrumVoice, NoteVoice, note_key};
use crate::error::{EngineError, Result};
use crate::timbre::{DrumHitConfig, TimbreConfig};

pub use backend::{AudioBackend, OfflineBackend, StreamConfig};
pub use command::{Command, GraphStatus};
pub use context::{ContextState, EffectInfo, EngineContext, StateCell};

pub struct Engine {
    config: EngineConfig,
    backend: Arc<dyn AudioBackend>,
    init_lock: tokio::sync::Mutex<()>,
    context: Mutex<Option<EngineContext>>,
    state: StateCell,
    next_voice: AtomicU64,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state.get())
            .field("config", &self.config)
            .finish()
    }
}

impl Engine {
    /// Build an engine on `backend`. Nothing is allocated on the host until `init()`.
    pub fn new(config: EngineConfig, backend: Arc<dyn AudioBackend>) -> Result<Self> {
        config.validate()?;
        Ok(Engine {
            config,
            backend,
            init_lock: tokio::sync::Mutex::new(()),
            context: Mutex::new(None),
            state: StateCell::new(ContextState::Closed),
            next_voice: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn context(&self) -> MutexGuard<'_, Option<EngineContext>> {
        self.context.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` on the live context, after collecting returned garbage.
    fn with_context<T>(&self, f: impl FnOnce(&mut EngineContext) -> Result<T>) -> Result<T> {
        let mut guard = self.context();
        let ctx = guard.as_mut().ok_or(EngineError::NotInitialized)?;
        ctx.housekeeping();
        f(ctx)
    }

    /// Like [`Engine::with_context`], but also requires the context to be running.
    fn with_running<T>(&self, what: &str, f: impl FnOnce(&mut EngineContext) -> Result<T>) -> Result<T> {
        let result = match self.state.get() {
            ContextState::Running => self.with_context(f),
            ContextState::Suspended => Err(EngineError::SuspendedContext),
            ContextState::Closed => Err(EngineError::NotInitialized),
        };
        if let Err(e) = &result {
            warn!("{what} dropped: {e}");
        }
        result
    }

    // ── lifecycle ────────────────────────────────────────────────────

    /// Create the audio context. Concurrent callers share one initialisation;
    /// calling again once initialised is a no-op.
    pub async fn init(&self) -> Result<()> {
        let _guard = self.init_lock.lock().await;
        if self.context().is_some() {
            return Ok(());
        }

        let stream = match self.backend.probe() {
            Ok(stream) => stream,
            Err(e @ EngineError::UnsupportedPlatform(_)) => {
                error!("audio unavailable: {e}");
                return Err(e);
            }
            Err(e) => return Err(EngineError::InitializationFailed(e.to_string())),
        };

        let (graph_channels, control_channels) = command::channels(&self.config, stream.sample_rate);
        let graph = RenderGraph::new(&self.config, stream.sample_rate, graph_channels);
        if let Err(e) = self.backend.attach(graph) {
            // the graph was either consumed or never attached; nothing partial survives
            let _ = self.backend.detach();
            warn!("initialisation failed: {e}");
            return Err(match e {
                EngineError::InitializationFailed(_) => e,
                other => EngineError::InitializationFailed(other.to_string()),
            });
        }

        *self.context() = Some(EngineContext::new(
            control_channels,
            stream.sample_rate,
            self.config.master_volume,
        ));
        self.state.set(ContextState::Suspended);
        info!(
            "audio context initialised at {} Hz ({} frame quanta), suspended",
            stream.sample_rate, stream.quantum_frames
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.context().is_some()
    }

    pub fn context_state(&self) -> ContextState {
        self.state.get()
    }

    /// Start rendering. Call from a user-interaction handler on platforms that gate audio.
    pub fn resume(&self) -> Result<()> {
        self.with_context(|ctx| {
            self.backend.resume_stream()?;
            ctx.status().set_running(true);
            Ok(())
        })?;
        if self.state.get() != ContextState::Running {
            self.state.set(ContextState::Running);
            info!("audio context running");
        }
        Ok(())
    }

    pub fn suspend(&self) -> Result<()> {
        self.with_context(|ctx| {
            ctx.status().set_running(false);
            self.backend.suspend_stream()
        })?;
        if self.state.get() != ContextState::Suspended {
            self.state.set(ContextState::Suspended);
            info!("audio context suspended");
        }
        Ok(())
    }

    /// Stop every voice, release every effect and close the context. Idempotent.
    pub fn destroy(&self) {
        let Some(mut ctx) = self.context().take() else {
            return;
        };
        ctx.status().set_running(false);
        if let Some(mut graph) = self.backend.detach() {
            graph.shutdown();
            drop(graph);
        }
        ctx.housekeeping();
        drop(ctx);
        self.state.set(ContextState::Closed);
        info!("audio context closed");
    }

    // ── voices ───────────────────────────────────────────────────────

    fn next_voice_id(&self) -> u64 {
        self.next_voice.fetch_add(1, Ordering::Relaxed)
    }

    /// Start a note. A note already sounding at the same frequency is stopped first.
    pub fn trigger_note(&self, config: &TimbreConfig, frequency: f64, velocity: f64) -> Result<()> {
        self.with_running("note", |ctx| {
            if !frequency.is_finite() || frequency <= 0.0 {
                return Err(EngineError::InvalidConfig(format!(
                    "frequency must be > 0, got {frequency}"
                )));
            }
            if !(0.0..=1.0).contains(&velocity) {
                return Err(EngineError::InvalidConfig(format!(
                    "velocity must be within [0, 1], got {velocity}"
                )));
            }
            config.validate()?;
            let id = self.next_voice_id();
            let voice = NoteVoice::new(id, config, frequency, velocity, ctx.sample_rate());
            ctx.send(Command::NoteOn(Box::new(voice)))?;
            debug!("voice {id} on at {frequency:.2} Hz, velocity {velocity:.2}");
            Ok(())
        })
    }

    /// Begin the release of the note sounding at `frequency`. No-op when none is.
    pub fn release_note(&self, frequency: f64) -> Result<()> {
        self.with_context(|ctx| {
            ctx.send(Command::NoteOff {
                key: note_key(frequency),
            })
        })
    }

    /// Fire a one-shot drum hit. It cleans itself up after its envelope.
    pub fn trigger_drum(&self, config: &DrumHitConfig) -> Result<()> {
        self.with_running("drum hit", |ctx| {
            config.validate()?;
            let id = self.next_voice_id();
            let drum = DrumVoice::new(id, config, ctx.sample_rate());
            ctx.send(Command::Drum(Box::new(drum)))?;
            debug!("drum {id} at {:.1} Hz, {:.3} s", config.base_frequency, config.length());
            Ok(())
        })
    }

    /// Drop every voice immediately.
    pub fn stop_all(&self) -> Result<()> {
        self.with_context(|ctx| ctx.send(Command::StopAll))
    }

    /// Release every held voice.
    pub fn release_all(&self) -> Result<()> {
        self.with_context(|ctx| ctx.send(Command::ReleaseAll))
    }

    /// Live voices and drum hits as of the last rendered quantum.
    pub fn active_voice_count(&self) -> usize {
        self.context()
            .as_ref()
            .map_or(0, |ctx| ctx.status().voice_count())
    }

    /// Seconds on the rendering clock.
    pub fn render_time(&self) -> f64 {
        self.context().as_ref().map_or(0.0, |ctx| ctx.status().time())
    }

    // ── effects ──────────────────────────────────────────────────────

    /// Add a unit with default parameters; returns its id (`"delay-1"`).
    pub fn add_effect(&self, kind: EffectKind) -> Result<String> {
        let id = self.with_context(|ctx| ctx.add_effect(kind))?;
        debug!("effect {id} activated");
        Ok(id)
    }

    pub fn remove_effect(&self, id: &str) -> Result<()> {
        self.with_context(|ctx| ctx.remove_effect(id))?;
        debug!("effect {id} removed");
        Ok(())
    }

    pub fn set_effect_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        self.with_context(|ctx| ctx.set_effect_enabled(id, enabled))
    }

    /// Clamp `value` into the parameter's range and apply it to the live unit.
    /// Returns the stored value.
    pub fn set_parameter(&self, effect_id: &str, param_id: &str, value: f64) -> Result<f64> {
        let stored = self.with_context(|ctx| ctx.set_parameter(effect_id, param_id, value))?;
        if stored != value {
            debug!("{effect_id}.{param_id} = {value} clamped to {stored}");
        }
        Ok(stored)
    }

    pub fn parameter(&self, effect_id: &str, param_id: &str) -> Result<f64> {
        self.with_context(|ctx| ctx.parameter(effect_id, param_id))
    }

    pub fn effect_parameters(&self, effect_id: &str) -> Result<Vec<ParameterInfo>> {
        self.with_context(|ctx| ctx.effect_parameters(effect_id))
    }

    /// Effects in routing order.
    pub fn active_effects(&self) -> Vec<EffectInfo> {
        self.context().as_ref().map_or_else(Vec::new, |ctx| ctx.effects())
    }

    // ── master, analysis, recording ──────────────────────────────────

    /// Returns the stored (clamped) volume.
    pub fn set_master_volume(&self, volume: f64) -> Result<f64> {
        self.with_context(|ctx| ctx.set_master_volume(volume))
    }

    /// Latest analysis of the master output, if one has been published.
    pub fn analysis_snapshot(&self) -> Option<AnalysisSnapshot> {
        self.context().as_mut().and_then(|ctx| {
            ctx.housekeeping();
            ctx.snapshot()
        })
    }

    pub fn start_recording(&self) -> Result<()> {
        self.with_context(|ctx| {
            ctx.start_recording();
            Ok(())
        })?;
        info!("recording started");
        Ok(())
    }

    /// Finish the take and return it as a 16-bit stereo WAV blob.
    pub fn stop_recording(&self) -> Result<Vec<u8>> {
        match self.with_context(|ctx| ctx.stop_recording()) {
            Ok(blob) => {
                info!("recording stopped, {} bytes", blob.len());
                Ok(blob)
            }
            Err(e) => {
                warn!("stop recording: {e}");
                Err(e)
            }
        }
    }

    pub fn is_recording(&self) -> bool {
        self.context().as_ref().is_some_and(|ctx| ctx.is_recording())
    }

    /// Frames of the current or last take lost because the recording ring
    /// filled up. Every control call drains the ring, so polling
    /// [`Engine::analysis_snapshot`] during a long take keeps this at zero.
    pub fn recording_dropped_frames(&self) -> u64 {
        self.context().as_mut().map_or(0, |ctx| {
            ctx.housekeeping();
            ctx.dropped_frames()
        })
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::envelope::Adsr;
    use crate::dsp::oscillator::Waveform;
    use std::sync::atomic::AtomicUsize;

    const SR: f64 = 44100.0;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Offline backend that counts attachments and can be told to fail.
    struct CountingBackend {
        inner: OfflineBackend,
        attaches: AtomicUsize,
        fail_next: std::sync::atomic::AtomicBool,
    }

    impl CountingBackend {
        fn new() -> Self {
            CountingBackend {
                inner: OfflineBackend::new(SR),
                attaches: AtomicUsize::new(0),
                fail_next: std::sync::atomic::AtomicBool::new(false),
            }
        }
    }

    impl AudioBackend for CountingBackend {
        fn probe(&self) -> Result<StreamConfig> {
            self.inner.probe()
        }

        fn attach(&self, graph: RenderGraph) -> Result<()> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(EngineError::InitializationFailed("device busy".into()));
            }
            self.attaches.fetch_add(1, Ordering::SeqCst);
            self.inner.attach(graph)
        }

        fn detach(&self) -> Option<RenderGraph> {
            self.inner.detach()
        }
    }

    async fn running_engine() -> (Engine, Arc<OfflineBackend>) {
        init_logging();
        let backend = Arc::new(OfflineBackend::new(SR));
        let engine = Engine::new(EngineConfig::default(), backend.clone()).unwrap();
        engine.init().await.unwrap();
        engine.resume().unwrap();
        (engine, backend)
    }

    fn saw() -> TimbreConfig {
        TimbreConfig {
            waveform: Waveform::Sawtooth,
            envelope: Adsr::new(0.01, 0.1, 0.7, 0.3),
            ..TimbreConfig::default()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_init_creates_one_context() {
        init_logging();
        let backend = Arc::new(CountingBackend::new());
        let engine = Arc::new(Engine::new(EngineConfig::default(), backend.clone()).unwrap());
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { engine.init().await })
            })
            .collect();
        for t in tasks {
            t.await.unwrap().unwrap();
        }
        assert_eq!(backend.attaches.load(Ordering::SeqCst), 1);
        assert!(engine.is_initialized());
        assert_eq!(engine.context_state(), ContextState::Suspended);
    }

    #[tokio::test]
    async fn failed_init_can_be_retried() {
        init_logging();
        let backend = Arc::new(CountingBackend::new());
        backend.fail_next.store(true, Ordering::SeqCst);
        let engine = Engine::new(EngineConfig::default(), backend.clone()).unwrap();
        let err = engine.init().await.unwrap_err();
        assert!(matches!(err, EngineError::InitializationFailed(_)));
        assert!(err.is_recoverable());
        assert!(!engine.is_initialized());
        assert_eq!(engine.context_state(), ContextState::Closed);

        engine.init().await.unwrap();
        assert!(engine.is_initialized());
        assert_eq!(backend.attaches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsupported_platform_is_fatal() {
        let engine = Engine::new(EngineConfig::default(), Arc::new(OfflineBackend::new(0.0))).unwrap();
        let err = engine.init().await.unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedPlatform(_)));
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn triggers_need_a_running_context() {
        init_logging();
        let backend = Arc::new(OfflineBackend::new(SR));
        let engine = Engine::new(EngineConfig::default(), backend.clone()).unwrap();
        let err = engine.trigger_note(&saw(), 440.0, 1.0).unwrap_err();
        assert!(matches!(err, EngineError::NotInitialized));

        engine.init().await.unwrap();
        let err = engine.trigger_note(&saw(), 440.0, 1.0).unwrap_err();
        assert!(matches!(err, EngineError::SuspendedContext));
        assert!(err.is_not_ready());
        assert!(engine.trigger_drum(&DrumHitConfig::default()).is_err());

        engine.resume().unwrap();
        assert_eq!(engine.context_state(), ContextState::Running);
        engine.trigger_note(&saw(), 440.0, 1.0).unwrap();
        backend.render(256);
        assert_eq!(engine.active_voice_count(), 1);
    }

    #[tokio::test]
    async fn malformed_trigger_is_dropped_without_harm() {
        let (engine, backend) = running_engine().await;
        engine.trigger_note(&saw(), 220.0, 1.0).unwrap();
        let mut bad = saw();
        bad.envelope.sustain = 4.0;
        assert!(matches!(
            engine.trigger_note(&bad, 330.0, 1.0),
            Err(EngineError::InvalidConfig(_))
        ));
        assert!(engine.trigger_note(&saw(), -5.0, 1.0).is_err());
        assert!(engine.trigger_note(&saw(), 330.0, 1.5).is_err());
        let (l, _) = backend.render(512);
        assert_eq!(engine.active_voice_count(), 1);
        assert!(l.iter().any(|s| s.abs() > 0.01));
    }

    #[tokio::test]
    async fn retrigger_leaves_one_voice() {
        let (engine, backend) = running_engine().await;
        engine.trigger_note(&saw(), 440.0, 1.0).unwrap();
        backend.render(512);
        engine.trigger_note(&saw(), 440.0, 0.5).unwrap();
        backend.render(512);
        assert_eq!(engine.active_voice_count(), 1);
    }

    #[tokio::test]
    async fn release_scenario_removes_the_voice() {
        let (engine, backend) = running_engine().await;
        engine.trigger_note(&saw(), 440.0, 1.0).unwrap();
        backend.render((0.2 * SR) as usize);
        engine.release_note(440.0).unwrap();

        // release is 0.3 s; render it plus one quantum
        let (l, _) = backend.render((0.3 * SR) as usize + 128);
        let last = &l[l.len() - 128..];
        assert!(last.iter().all(|s| s.abs() < 1e-3), "gain must reach ~0 within release");

        backend.render((0.05 * SR) as usize + 256);
        assert_eq!(engine.active_voice_count(), 0);
        // releasing an unknown note is a no-op
        engine.release_note(1234.5).unwrap();
    }

    #[tokio::test]
    async fn set_parameter_clamps_live_delay_time() {
        let (engine, backend) = running_engine().await;
        let id = engine.add_effect(EffectKind::Delay).unwrap();
        assert_eq!(id, "delay-1");
        assert_eq!(engine.set_parameter("delay-1", "time", 5.0).unwrap(), 1.0);
        assert_eq!(engine.parameter("delay-1", "time").unwrap(), 1.0);
        assert!(matches!(
            engine.set_parameter("chorus-9", "rate", 1.0),
            Err(EngineError::UnknownEffect(_))
        ));
        backend.render(256);
        assert_eq!(engine.active_effects().len(), 1);
    }

    #[tokio::test]
    async fn suspend_freezes_the_clock() {
        let (engine, backend) = running_engine().await;
        backend.render(1024);
        let t = engine.render_time();
        assert!(t > 0.0);
        engine.suspend().unwrap();
        let (l, _) = backend.render(1024);
        assert!(l.iter().all(|s| *s == 0.0));
        assert_eq!(engine.render_time(), t);
        assert_eq!(engine.context_state(), ContextState::Suspended);
    }

    #[tokio::test]
    async fn drums_and_analysis() {
        let (engine, backend) = running_engine().await;
        engine.trigger_drum(&DrumHitConfig::default()).unwrap();
        backend.render(4096);
        let snap = engine.analysis_snapshot().expect("snapshot");
        assert!(snap.is_active);
        assert!(snap.rms > 0.0);
        backend.render((0.5 * SR) as usize);
        assert_eq!(engine.active_voice_count(), 0);
    }

    #[tokio::test]
    async fn vocoder_uses_the_live_input() {
        let (engine, backend) = running_engine().await;
        engine.add_effect(EffectKind::Vocoder).unwrap();
        let mut config = saw();
        config.sends.insert(EffectKind::Vocoder, 1.0);
        config.gain = 0.3;
        engine.trigger_note(&config, 110.0, 1.0).unwrap();
        let silent_input = backend.render(8192).0;

        engine.stop_all().unwrap();
        engine.trigger_note(&config, 110.0, 1.0).unwrap();
        let speech: Vec<f32> = (0..8192)
            .map(|i| (0.5 * (std::f64::consts::TAU * 600.0 * i as f64 / SR).sin()) as f32)
            .collect();
        let driven = backend.render_with_input(&speech).0;

        // identical dry voice both times, so the difference is the vocoded return
        let difference: f32 = silent_input[4096..]
            .iter()
            .zip(&driven[4096..])
            .map(|(a, b)| (a - b) * (a - b))
            .sum();
        assert!(difference > 1e-2, "difference energy {difference}");
    }

    #[tokio::test]
    async fn recording_round_trip() {
        let (engine, backend) = running_engine().await;
        assert!(matches!(engine.stop_recording(), Err(EngineError::RecordingNotActive)));
        engine.start_recording().unwrap();
        assert!(engine.is_recording());
        engine.trigger_note(&saw(), 330.0, 1.0).unwrap();
        backend.render(2048);
        let wav = engine.stop_recording().unwrap();
        assert_eq!(wav.len(), 44 + 2048 * 4);
        assert!(!engine.is_recording());
        assert_eq!(engine.recording_dropped_frames(), 0);
    }

    #[tokio::test]
    async fn destroy_closes_everything() {
        let (engine, backend) = running_engine().await;
        engine.trigger_note(&saw(), 440.0, 1.0).unwrap();
        engine.add_effect(EffectKind::Reverb).unwrap();
        backend.render(256);
        engine.destroy();
        engine.destroy();
        assert!(!engine.is_initialized());
        assert!(!backend.is_attached());
        assert_eq!(engine.context_state(), ContextState::Closed);
        assert_eq!(engine.active_voice_count(), 0);
        assert!(matches!(engine.resume(), Err(EngineError::NotInitialized)));
        assert!(engine.active_effects().is_empty());

        // a fresh context can be built afterwards
        engine.init().await.unwrap();
        assert_eq!(engine.context_state(), ContextState::Suspended);
    }

    #[tokio::test]
    async fn master_volume_is_clamped() {
        let (engine, _backend) = running_engine().await;
        assert_eq!(engine.set_master_volume(1.7).unwrap(), 1.0);
        assert_eq!(engine.set_master_volume(0.25).unwrap(), 0.25);
    }
}
