//! Control-plane state of one live audio context.
//!
//! An [`EngineContext`] exists between a successful `init()` and `destroy()`.
//! It owns the control ends of the rings, the effect registry (ids, stored
//! parameter values, enabled flags) and the recording buffer. The matching
//! render side lives in the backend.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use log::warn;
use serde::Serialize;

use crate::analysis::AnalysisSnapshot;
use crate::dsp::effect::{EffectKind, EffectUnit, ParamMap, ParameterInfo};
use crate::dsp::engine::{EffectSlot, MAX_EFFECTS};
use crate::dsp::renderer::encode_wav;
use crate::engine::command::{Command, ControlChannels, GraphStatus, SlotId};
use crate::error::{EngineError, Result};

/// Lifecycle state as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextState {
    Suspended,
    Running,
    Closed,
}

impl ContextState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ContextState::Suspended,
            1 => ContextState::Running,
            _ => ContextState::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ContextState::Suspended => 0,
            ContextState::Running => 1,
            ContextState::Closed => 2,
        }
    }
}

/// Atomic holder for [`ContextState`].
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: ContextState) -> Self {
        StateCell(AtomicU8::new(state.as_u8()))
    }

    pub fn get(&self) -> ContextState {
        ContextState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: ContextState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }
}

/// An effect as listed in the routing order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectInfo {
    pub id: String,
    pub kind: EffectKind,
    pub enabled: bool,
}

#[derive(Debug)]
struct EffectEntry {
    id: String,
    slot: SlotId,
    params: ParamMap,
    enabled: bool,
}

pub struct EngineContext {
    channels: ControlChannels,
    sample_rate: f64,
    effects: Vec<EffectEntry>,
    counters: BTreeMap<EffectKind, u32>,
    next_slot: SlotId,
    latest: Option<Box<AnalysisSnapshot>>,
    recording: Option<Vec<f32>>,
    dropped_frames: u64,
    master_volume: f64,
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("sample_rate", &self.sample_rate)
            .field("effects", &self.effects)
            .field("recording", &self.recording.is_some())
            .finish()
    }
}

impl EngineContext {
    pub fn new(channels: ControlChannels, sample_rate: f64, master_volume: f64) -> Self {
        EngineContext {
            channels,
            sample_rate,
            effects: Vec::new(),
            counters: BTreeMap::new(),
            next_slot: 1,
            latest: None,
            recording: None,
            dropped_frames: 0,
            master_volume,
        }
    }

    pub fn status(&self) -> &Arc<GraphStatus> {
        &self.channels.status
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Queue a command for the next quantum.
    pub fn send(&mut self, command: Command) -> Result<()> {
        self.channels
            .commands
            .push(command)
            .map_err(|_| EngineError::QueueFull)
    }

    /// Drop returned garbage and move pending recorded audio out of the ring.
    pub fn housekeeping(&mut self) {
        self.channels.collect_garbage();
        if let Some(buf) = self.recording.as_mut() {
            self.channels.drain_recording(buf);
            self.count_dropped_frames();
        }
    }

    fn count_dropped_frames(&mut self) {
        let dropped = self.channels.status.take_dropped_frames();
        if dropped > 0 {
            warn!("recording ring full, {dropped} frames lost; drain it more often or raise record_ring_seconds");
            self.dropped_frames += dropped;
        }
    }

    // ── effects ──────────────────────────────────────────────────────

    fn entry(&self, id: &str) -> Result<&EffectEntry> {
        self.effects
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| EngineError::UnknownEffect(id.to_string()))
    }

    fn entry_mut(&mut self, id: &str) -> Result<&mut EffectEntry> {
        self.effects
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| EngineError::UnknownEffect(id.to_string()))
    }

    fn fresh_slot(&mut self, params: &ParamMap) -> (SlotId, Box<EffectSlot>) {
        let slot = self.next_slot;
        self.next_slot += 1;
        let unit = EffectUnit::build(params, self.sample_rate);
        (slot, Box::new(EffectSlot::new(slot, unit, params.get("mix"))))
    }

    fn enabled_count(&self) -> usize {
        self.effects.iter().filter(|e| e.enabled).count()
    }

    /// Instantiate a unit with default parameters at the end of the routing list.
    pub fn add_effect(&mut self, kind: EffectKind) -> Result<String> {
        if self.enabled_count() >= MAX_EFFECTS {
            return Err(EngineError::InvalidConfig(format!(
                "at most {MAX_EFFECTS} effects can be active"
            )));
        }
        let params = ParamMap::defaults(kind);
        let (slot, unit) = self.fresh_slot(&params);
        self.send(Command::ActivateEffect(unit))?;

        let n = self.counters.entry(kind).or_insert(0);
        *n += 1;
        let id = format!("{kind}-{n}");
        self.effects.push(EffectEntry {
            id: id.clone(),
            slot,
            params,
            enabled: true,
        });
        Ok(id)
    }

    pub fn remove_effect(&mut self, id: &str) -> Result<()> {
        let index = self
            .effects
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| EngineError::UnknownEffect(id.to_string()))?;
        if self.effects[index].enabled {
            let slot = self.effects[index].slot;
            self.send(Command::DeactivateEffect { slot })?;
        }
        self.effects.remove(index);
        Ok(())
    }

    /// Disabling takes the unit out of the graph; enabling builds a fresh one
    /// from the stored parameter values.
    pub fn set_effect_enabled(&mut self, id: &str, enabled: bool) -> Result<()> {
        let entry = self.entry(id)?;
        if entry.enabled == enabled {
            return Ok(());
        }
        if enabled {
            if self.enabled_count() >= MAX_EFFECTS {
                return Err(EngineError::InvalidConfig(format!(
                    "at most {MAX_EFFECTS} effects can be active"
                )));
            }
            let params = entry.params.clone();
            let (slot, unit) = self.fresh_slot(&params);
            self.send(Command::ActivateEffect(unit))?;
            let entry = self.entry_mut(id)?;
            entry.slot = slot;
            entry.enabled = true;
        } else {
            let slot = entry.slot;
            self.send(Command::DeactivateEffect { slot })?;
            self.entry_mut(id)?.enabled = false;
        }
        Ok(())
    }

    /// Clamp and store a parameter, then apply it to the live unit.
    ///
    /// Structural parameters swap in a freshly built unit. Returns the stored value.
    pub fn set_parameter(&mut self, id: &str, param: &str, value: f64) -> Result<f64> {
        let sample_rate = self.sample_rate;
        let entry = self.entry_mut(id)?;
        let (index, stored) = entry.params.set(param, value)?;
        if !entry.enabled {
            return Ok(stored);
        }
        let slot = entry.slot;
        let spec = entry.params.kind().params()[index];
        if spec.rebuild {
            let unit = Box::new(EffectUnit::build(&entry.params, sample_rate));
            self.send(Command::ReplaceEffect { slot, unit })?;
        } else {
            self.send(Command::SetParam {
                slot,
                index,
                value: stored,
            })?;
        }
        Ok(stored)
    }

    pub fn parameter(&self, id: &str, param: &str) -> Result<f64> {
        let entry = self.entry(id)?;
        let index = entry.params.kind().param_index(param).ok_or_else(|| {
            EngineError::InvalidParameter {
                effect: id.to_string(),
                param: param.to_string(),
            }
        })?;
        Ok(entry.params.value_at(index))
    }

    pub fn effect_parameters(&self, id: &str) -> Result<Vec<ParameterInfo>> {
        Ok(self.entry(id)?.params.info())
    }

    pub fn effects(&self) -> Vec<EffectInfo> {
        self.effects
            .iter()
            .map(|e| EffectInfo {
                id: e.id.clone(),
                kind: e.params.kind(),
                enabled: e.enabled,
            })
            .collect()
    }

    // ── master, analysis, recording ─────────────────────────────────

    pub fn set_master_volume(&mut self, volume: f64) -> Result<f64> {
        let v = if volume.is_nan() { self.master_volume } else { volume.clamp(0.0, 1.0) };
        self.send(Command::SetMasterVolume(v))?;
        self.master_volume = v;
        Ok(v)
    }

    pub fn master_volume(&self) -> f64 {
        self.master_volume
    }

    /// Copy of the newest snapshot the rendering side has published.
    pub fn snapshot(&mut self) -> Option<AnalysisSnapshot> {
        if let Some(new) = self.channels.latest_snapshot() {
            if let Some(old) = self.latest.replace(new) {
                self.channels.recycle_snapshot(old);
            }
        }
        self.latest.as_deref().cloned()
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    pub fn start_recording(&mut self) {
        // samples left over from an earlier take
        let mut stale = Vec::new();
        self.channels.drain_recording(&mut stale);
        self.channels.status.take_dropped_frames();
        self.dropped_frames = 0;
        self.recording = Some(Vec::new());
        self.channels.status.set_recording(true);
    }

    /// Frames of the current or last take lost to a full recording ring.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    /// Stop the take and encode it as a 16-bit stereo WAV.
    ///
    /// Frames the rendering side could not fit into the ring are missing
    /// from the blob; [`EngineContext::dropped_frames`] reports how many.
    pub fn stop_recording(&mut self) -> Result<Vec<u8>> {
        let Some(mut samples) = self.recording.take() else {
            return Err(EngineError::RecordingNotActive);
        };
        self.channels.status.set_recording(false);
        self.channels.drain_recording(&mut samples);
        self.count_dropped_frames();
        if self.dropped_frames > 0 {
            warn!(
                "recording stopped with {} of {} frames lost",
                self.dropped_frames,
                self.dropped_frames + samples.len() as u64 / 2
            );
        }
        encode_wav(&samples, self.sample_rate.round() as u32, 2)
    }
}
