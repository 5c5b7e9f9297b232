//! Lock-free channels between the control plane and the rendering clock.
//!
//! The control side pushes [`Command`]s; the rendering side drains them at
//! the start of every quantum. Everything the rendering side lets go of
//! (finished voices, replaced effect units) travels back as [`Garbage`]
//! so no deallocation happens on the audio clock. Analysis snapshots
//! circulate between a fixed pool of boxes.
//!
//! Payloads are boxed to keep the enums pointer-sized in the rings.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use rtrb::{Consumer, Producer, RingBuffer};

use crate::analysis::AnalysisSnapshot;
use crate::config::EngineConfig;
use crate::dsp::effect::EffectUnit;
use crate::dsp::engine::EffectSlot;
use crate::dsp::voice::{DrumVoice, NoteKey, NoteVoice};

/// Render-side handle of an active effect.
pub type SlotId = u32;

/// Snapshot boxes in circulation.
pub const SNAPSHOT_POOL: usize = 4;

/// Control → render messages. Applied at the start of the next quantum.
pub enum Command {
    /// Start a voice; a sounding voice with the same key is stopped first.
    NoteOn(Box<NoteVoice>),
    /// Enter the release stage of the voice sounding at `key`.
    NoteOff { key: NoteKey },
    Drum(Box<DrumVoice>),
    /// Append a fresh effect to the routing list.
    ActivateEffect(Box<EffectSlot>),
    /// Swap the unit behind a slot, keeping its bus and return level.
    ReplaceEffect { slot: SlotId, unit: Box<EffectUnit> },
    DeactivateEffect { slot: SlotId },
    /// Live parameter change; `index` follows the kind's parameter table.
    SetParam { slot: SlotId, index: usize, value: f64 },
    SetMasterVolume(f64),
    /// Drop every voice immediately.
    StopAll,
    /// Release every held voice.
    ReleaseAll,
}

/// Render → control: objects to be dropped off the audio clock.
pub enum Garbage {
    Voice(Box<NoteVoice>),
    Drum(Box<DrumVoice>),
    Slot(Box<EffectSlot>),
    Unit(Box<EffectUnit>),
}

/// State shared through atomics, readable from either side without locking.
#[derive(Debug)]
pub struct GraphStatus {
    running: AtomicBool,
    recording: AtomicBool,
    voices: AtomicUsize,
    clock: AtomicU64,
    dropped_frames: AtomicU64,
    sample_rate: f64,
}

impl GraphStatus {
    pub fn new(sample_rate: f64) -> Self {
        GraphStatus {
            running: AtomicBool::new(false),
            recording: AtomicBool::new(false),
            voices: AtomicUsize::new(0),
            clock: AtomicU64::new(0),
            dropped_frames: AtomicU64::new(0),
            sample_rate,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    pub fn set_recording(&self, recording: bool) {
        self.recording.store(recording, Ordering::Release);
    }

    pub fn voice_count(&self) -> usize {
        self.voices.load(Ordering::Relaxed)
    }

    pub(crate) fn store_voice_count(&self, count: usize) {
        self.voices.store(count, Ordering::Relaxed);
    }

    /// Samples rendered since the graph was built.
    pub fn clock(&self) -> u64 {
        self.clock.load(Ordering::Relaxed)
    }

    pub(crate) fn store_clock(&self, clock: u64) {
        self.clock.store(clock, Ordering::Relaxed);
    }

    pub(crate) fn add_dropped_frames(&self, frames: u64) {
        self.dropped_frames.fetch_add(frames, Ordering::Relaxed);
    }

    /// Recorded frames lost to a full recording ring since the last call.
    pub fn take_dropped_frames(&self) -> u64 {
        self.dropped_frames.swap(0, Ordering::Relaxed)
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Rendering-clock time in seconds.
    pub fn time(&self) -> f64 {
        self.clock() as f64 / self.sample_rate
    }
}

/// Ends of the rings owned by the rendering side.
pub struct GraphChannels {
    pub commands: Consumer<Command>,
    pub garbage: Producer<Garbage>,
    pub free_snapshots: Consumer<Box<AnalysisSnapshot>>,
    pub snapshots: Producer<Box<AnalysisSnapshot>>,
    pub recording: Producer<f32>,
    pub status: Arc<GraphStatus>,
}

/// Ends of the rings owned by the control plane.
pub struct ControlChannels {
    pub commands: Producer<Command>,
    pub garbage: Consumer<Garbage>,
    pub free_snapshots: Producer<Box<AnalysisSnapshot>>,
    pub snapshots: Consumer<Box<AnalysisSnapshot>>,
    pub recording: Consumer<f32>,
    pub status: Arc<GraphStatus>,
}

impl ControlChannels {
    /// Drop everything the rendering side has handed back.
    pub fn collect_garbage(&mut self) -> usize {
        let mut n = 0;
        while let Ok(item) = self.garbage.pop() {
            drop(item);
            n += 1;
        }
        n
    }

    /// Newest published snapshot, returning older ones to the pool.
    pub fn latest_snapshot(&mut self) -> Option<Box<AnalysisSnapshot>> {
        let mut latest = None;
        while let Ok(snapshot) = self.snapshots.pop() {
            if let Some(old) = latest.replace(snapshot) {
                self.recycle_snapshot(old);
            }
        }
        latest
    }

    /// Hand a snapshot box back to the rendering side.
    pub fn recycle_snapshot(&mut self, snapshot: Box<AnalysisSnapshot>) {
        // the pool is sized so this only fails after a teardown
        let _ = self.free_snapshots.push(snapshot);
    }

    /// Move pending recorded samples into `out`.
    pub fn drain_recording(&mut self, out: &mut Vec<f32>) -> usize {
        let available = self.recording.slots();
        match self.recording.read_chunk(available) {
            Ok(chunk) => {
                let (a, b) = chunk.as_slices();
                out.extend_from_slice(a);
                out.extend_from_slice(b);
                chunk.commit_all();
                available
            }
            Err(_) => 0,
        }
    }
}

/// Build the rings for one engine context.
pub fn channels(config: &EngineConfig, sample_rate: f64) -> (GraphChannels, ControlChannels) {
    let (command_tx, command_rx) = RingBuffer::new(config.command_queue_capacity);
    // room for everything that can be live at once plus the commands in flight
    let (garbage_tx, garbage_rx) =
        RingBuffer::new(config.max_voices * 2 + config.command_queue_capacity);
    let (mut free_tx, free_rx) = RingBuffer::new(SNAPSHOT_POOL);
    let (snap_tx, snap_rx) = RingBuffer::new(SNAPSHOT_POOL);
    let record_len = (config.record_ring_seconds * sample_rate).ceil() as usize * 2;
    let (record_tx, record_rx) = RingBuffer::new(record_len.max(2));

    for _ in 0..SNAPSHOT_POOL {
        let _ = free_tx.push(Box::new(AnalysisSnapshot::with_capacity(
            &config.analysis,
            sample_rate,
        )));
    }

    let status = Arc::new(GraphStatus::new(sample_rate));
    (
        GraphChannels {
            commands: command_rx,
            garbage: garbage_tx,
            free_snapshots: free_rx,
            snapshots: snap_tx,
            recording: record_tx,
            status: Arc::clone(&status),
        },
        ControlChannels {
            commands: command_tx,
            garbage: garbage_rx,
            free_snapshots: free_tx,
            snapshots: snap_rx,
            recording: record_rx,
            status,
        },
    )
}
