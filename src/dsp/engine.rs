//! Render graph: the rendering-clock side of the engine.
//!
//! Owns every live voice and effect slot exclusively. Control messages
//! arrive through the command ring and are applied at quantum boundaries;
//! nothing here blocks, logs or (past construction) allocates.
//!
//! Signal flow per quantum:
//! voices → dry master bus (unity) and, scaled by their sends, the input
//! bus of each active send effect of the matching kind → each send effect
//! renders its bus wet in place → buses are summed into the master at
//! their `mix` return level → insert effects (dynamics, EQ) process the
//! whole mix in routing order, blended by `mix` → master volume and soft
//! clip → output, analysis tap and recording tap.

use crate::analysis::{AnalysisSnapshot, Analyzer};
use crate::config::EngineConfig;
use crate::dsp::effect::{EffectKind, EffectUnit};
use crate::dsp::mixer::MasterBus;
use crate::dsp::schedule::{DeallocQueue, RELEASE_GRACE_SECONDS, due_after};
use crate::dsp::voice::{DrumVoice, NoteVoice};
use crate::engine::command::{Command, Garbage, GraphChannels, SlotId};

/// Frames per rendering quantum.
pub const QUANTUM_FRAMES: usize = 128;

/// Effect slots the routing list can hold without reallocating.
pub const MAX_EFFECTS: usize = 32;

/// Commands applied per quantum at most, so a flood cannot stall a callback.
const MAX_COMMANDS_PER_QUANTUM: usize = 256;

/// One active effect: its unit, its bus and its return level.
///
/// Send slots render their bus and return it at `mix`. Insert slots copy
/// the master mix into the bus and crossfade it back in at `mix`.
#[derive(Debug)]
pub struct EffectSlot {
    pub id: SlotId,
    unit: Box<EffectUnit>,
    kind: EffectKind,
    insert: bool,
    mix: f32,
    bus_left: Vec<f32>,
    bus_right: Vec<f32>,
}

impl EffectSlot {
    /// Built on the control side; allocates the bus buffers.
    pub fn new(id: SlotId, unit: EffectUnit, mix: f64) -> Self {
        EffectSlot {
            id,
            kind: unit.kind(),
            insert: unit.kind().is_insert(),
            unit: Box::new(unit),
            mix: mix.clamp(0.0, 1.0) as f32,
            bus_left: vec![0.0; QUANTUM_FRAMES],
            bus_right: vec![0.0; QUANTUM_FRAMES],
        }
    }

    pub fn kind(&self) -> EffectKind {
        self.kind
    }

    pub fn mix(&self) -> f64 {
        self.mix as f64
    }

    fn set_param(&mut self, index: usize, value: f64) {
        if index == 0 {
            self.mix = value.clamp(0.0, 1.0) as f32;
        } else if let Some(spec) = self.kind.params().get(index) {
            self.unit.set_param(spec.id, value);
        }
    }
}

/// The rendering side of one engine context.
pub struct RenderGraph {
    sample_rate: f64,
    channels: GraphChannels,
    voices: Vec<Box<NoteVoice>>,
    drums: Vec<Box<DrumVoice>>,
    max_voices: usize,
    effects: Vec<Box<EffectSlot>>,
    dealloc: DeallocQueue,
    master: MasterBus,
    clock: u64,
    voice_buf: Vec<f32>,
    analyzer: Analyzer,
    history: Vec<f32>,
    history_pos: usize,
    window: Vec<f32>,
    since_snapshot: usize,
    spare_snapshot: Option<Box<AnalysisSnapshot>>,
}

impl std::fmt::Debug for RenderGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderGraph")
            .field("sample_rate", &self.sample_rate)
            .field("voices", &self.voices.len())
            .field("drums", &self.drums.len())
            .field("effects", &self.effects.len())
            .field("clock", &self.clock)
            .finish()
    }
}

impl RenderGraph {
    pub fn new(config: &EngineConfig, sample_rate: f64, channels: GraphChannels) -> Self {
        let fft_size = config.analysis.fft_size;
        let max_voices = config.max_voices;
        RenderGraph {
            sample_rate,
            channels,
            voices: Vec::with_capacity(max_voices),
            drums: Vec::with_capacity(max_voices),
            max_voices,
            effects: Vec::with_capacity(MAX_EFFECTS),
            dealloc: DeallocQueue::with_capacity(max_voices * 4),
            master: MasterBus::new(config.master_volume),
            clock: 0,
            voice_buf: vec![0.0; QUANTUM_FRAMES],
            analyzer: Analyzer::new(&config.analysis, &config.beat, sample_rate),
            history: vec![0.0; fft_size],
            history_pos: 0,
            window: vec![0.0; fft_size],
            since_snapshot: 0,
            spare_snapshot: None,
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Samples rendered so far.
    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Live note voices plus sounding drum hits.
    pub fn voice_count(&self) -> usize {
        self.voices.len() + self.drums.len()
    }

    pub fn effect_count(&self) -> usize {
        self.effects.len()
    }

    /// Fill `left`/`right` with the next block of output.
    ///
    /// `input` is the external live signal (the vocoder's modulator); it may
    /// be shorter than the block or empty. While the context is suspended
    /// the output is silent and the clock stands still.
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32], input: &[f32]) {
        let frames = left.len().min(right.len());
        let mut start = 0;
        while start < frames {
            let end = (start + QUANTUM_FRAMES).min(frames);
            let modulator = input.get(start..end.min(input.len())).unwrap_or(&[]);
            self.render_quantum(&mut left[start..end], &mut right[start..end], modulator);
            start = end;
        }
    }

    fn render_quantum(&mut self, left: &mut [f32], right: &mut [f32], modulator: &[f32]) {
        self.drain_commands();
        left.fill(0.0);
        right.fill(0.0);
        if !self.channels.status.is_running() {
            return;
        }
        let n = left.len();

        for slot in self.effects.iter_mut() {
            slot.bus_left[..n].fill(0.0);
            slot.bus_right[..n].fill(0.0);
        }

        let buf = &mut self.voice_buf[..n];
        for voice in self.voices.iter_mut() {
            voice.render(buf);
            mix_voice(buf, voice.sends(), &mut self.effects, left, right);
        }
        for drum in self.drums.iter_mut() {
            drum.render(buf);
            mix_voice(buf, drum.sends(), &mut self.effects, left, right);
        }

        for slot in self.effects.iter_mut().filter(|s| !s.insert) {
            let (bl, br) = (&mut slot.bus_left[..n], &mut slot.bus_right[..n]);
            slot.unit.process(bl, br, modulator);
            let mix = slot.mix;
            for i in 0..n {
                left[i] += bl[i] * mix;
                right[i] += br[i] * mix;
            }
        }

        for slot in self.effects.iter_mut().filter(|s| s.insert) {
            let (bl, br) = (&mut slot.bus_left[..n], &mut slot.bus_right[..n]);
            bl.copy_from_slice(left);
            br.copy_from_slice(right);
            slot.unit.process(bl, br, modulator);
            let mix = slot.mix;
            for i in 0..n {
                left[i] += (bl[i] - left[i]) * mix;
                right[i] += (br[i] - right[i]) * mix;
            }
        }

        self.master.process(left, right);
        self.clock += n as u64;
        self.tap(left, right);
        self.retire_voices();

        let status = &self.channels.status;
        status.store_clock(self.clock);
        status.store_voice_count(self.voice_count());
    }

    fn drain_commands(&mut self) {
        for _ in 0..MAX_COMMANDS_PER_QUANTUM {
            let Ok(command) = self.channels.commands.pop() else {
                break;
            };
            self.apply(command);
        }
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::NoteOn(voice) => {
                if let Some(i) = self.voices.iter().position(|v| v.key == voice.key) {
                    self.drop_voice(i);
                }
                // voices stay in trigger order, so the front is the oldest
                if self.voices.len() >= self.max_voices && !self.voices.is_empty() {
                    self.drop_voice(0);
                }
                self.voices.push(voice);
            }
            Command::NoteOff { key } => {
                let (clock, sr) = (self.clock, self.sample_rate);
                if let Some(voice) = self.voices.iter_mut().find(|v| v.key == key && !v.is_released()) {
                    voice.release();
                    let due = due_after(clock, voice.release_seconds() + RELEASE_GRACE_SECONDS, sr);
                    self.dealloc.schedule(due, voice.id);
                }
            }
            Command::Drum(drum) => {
                if self.drums.len() >= self.max_voices && !self.drums.is_empty() {
                    let oldest = self.drums.remove(0);
                    self.dealloc.cancel(oldest.id);
                    self.discard(Garbage::Drum(oldest));
                }
                let due = due_after(self.clock, drum.length() + RELEASE_GRACE_SECONDS, self.sample_rate);
                self.dealloc.schedule(due, drum.id);
                self.drums.push(drum);
            }
            Command::ActivateEffect(slot) => {
                if self.effects.len() < MAX_EFFECTS {
                    self.effects.push(slot);
                } else {
                    self.discard(Garbage::Slot(slot));
                }
            }
            Command::ReplaceEffect { slot, unit } => {
                match self.effects.iter_mut().find(|s| s.id == slot) {
                    Some(s) => {
                        let old = std::mem::replace(&mut s.unit, unit);
                        self.discard(Garbage::Unit(old));
                    }
                    None => self.discard(Garbage::Unit(unit)),
                }
            }
            Command::DeactivateEffect { slot } => {
                if let Some(i) = self.effects.iter().position(|s| s.id == slot) {
                    let old = self.effects.remove(i);
                    self.discard(Garbage::Slot(old));
                }
            }
            Command::SetParam { slot, index, value } => {
                if let Some(s) = self.effects.iter_mut().find(|s| s.id == slot) {
                    s.set_param(index, value);
                }
            }
            Command::SetMasterVolume(volume) => self.master.set_volume(volume),
            Command::StopAll => self.stop_all(),
            Command::ReleaseAll => {
                let (clock, sr) = (self.clock, self.sample_rate);
                for voice in self.voices.iter_mut().filter(|v| !v.is_released()) {
                    voice.release();
                    let due = due_after(clock, voice.release_seconds() + RELEASE_GRACE_SECONDS, sr);
                    self.dealloc.schedule(due, voice.id);
                }
            }
        }
    }

    fn stop_all(&mut self) {
        while let Some(v) = self.voices.pop() {
            self.discard(Garbage::Voice(v));
        }
        while let Some(d) = self.drums.pop() {
            self.discard(Garbage::Drum(d));
        }
        self.dealloc.clear();
    }

    /// Remove the note voice at `i` along with its pending cleanup entry.
    fn drop_voice(&mut self, i: usize) {
        let voice = self.voices.remove(i);
        self.dealloc.cancel(voice.id);
        self.discard(Garbage::Voice(voice));
    }

    /// Drop voices whose scheduled cleanup time has come.
    fn retire_voices(&mut self) {
        while let Some(id) = self.dealloc.pop_due(self.clock) {
            // `remove`, not `swap_remove`: trigger order decides who is stolen
            if let Some(i) = self.voices.iter().position(|v| v.id == id) {
                let v = self.voices.remove(i);
                self.discard(Garbage::Voice(v));
            } else if let Some(i) = self.drums.iter().position(|d| d.id == id) {
                let d = self.drums.remove(i);
                self.discard(Garbage::Drum(d));
            }
        }
    }

    fn discard(&mut self, item: Garbage) {
        // a full ring means the control side stopped collecting; drop here
        let _ = self.channels.garbage.push(item);
    }

    /// Feed the analysis and recording taps with the finished quantum.
    fn tap(&mut self, left: &[f32], right: &[f32]) {
        let len = self.history.len();
        for (l, r) in left.iter().zip(right) {
            self.history[self.history_pos] = 0.5 * (l + r);
            self.history_pos = (self.history_pos + 1) % len;
        }

        if self.channels.status.is_recording() {
            let frames = left.len();
            let room = self.channels.recording.slots().min(frames * 2) & !1;
            let mut written = 0;
            if let Ok(chunk) = self.channels.recording.write_chunk_uninit(room) {
                let samples = left.iter().zip(right).flat_map(|(l, r)| [*l, *r]);
                written = chunk.fill_from_iter(samples) / 2;
            }
            if written < frames {
                self.channels.status.add_dropped_frames((frames - written) as u64);
            }
        }

        self.since_snapshot += left.len();
        if self.since_snapshot < self.analyzer.interval_samples() {
            return;
        }
        self.since_snapshot = 0;

        let snapshot = match self.spare_snapshot.take() {
            Some(s) => Some(s),
            None => self.channels.free_snapshots.pop().ok(),
        };
        let Some(mut snapshot) = snapshot else {
            return;
        };
        let (older, newer) = self.history.split_at(self.history_pos);
        self.window[..newer.len()].copy_from_slice(newer);
        self.window[newer.len()..].copy_from_slice(older);
        let time = self.clock as f64 / self.sample_rate;
        self.analyzer.analyze(&self.window, time, &mut snapshot);
        if let Err(rtrb::PushError::Full(s)) = self.channels.snapshots.push(snapshot) {
            self.spare_snapshot = Some(s);
        }
    }

    /// Stop every voice and take down every effect. Used at teardown.
    pub fn shutdown(&mut self) {
        self.channels.status.set_running(false);
        self.stop_all();
        while let Some(slot) = self.effects.pop() {
            self.discard(Garbage::Slot(slot));
        }
        while let Ok(command) = self.channels.commands.pop() {
            drop(command);
        }
        self.channels.status.store_voice_count(0);
    }
}

/// Add one voice block to the dry bus and to the bus of every matching send effect.
fn mix_voice(
    buf: &[f32],
    sends: &[f32],
    effects: &mut [Box<EffectSlot>],
    left: &mut [f32],
    right: &mut [f32],
) {
    for (i, &s) in buf.iter().enumerate() {
        left[i] += s;
        right[i] += s;
    }
    for slot in effects.iter_mut().filter(|s| !s.insert) {
        let send = sends[slot.kind.index()];
        if send <= 0.0 {
            continue;
        }
        for (i, &s) in buf.iter().enumerate() {
            slot.bus_left[i] += s * send;
            slot.bus_right[i] += s * send;
        }
    }
}
