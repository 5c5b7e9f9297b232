//! Energy-based onset detection and tempo estimation.

use std::collections::VecDeque;

use serde::Serialize;

use crate::config::BeatConfig;

/// Beat state published with every snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeatInfo {
    /// 0 until two onsets have been seen.
    pub bpm: f64,
    /// An onset was detected in this frame.
    pub is_beat: bool,
    /// Regularity of recent inter-onset intervals, 0..1.
    pub confidence: f64,
    /// Render-clock time of the latest onset, seconds.
    pub last_onset: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct BeatDetector {
    config: BeatConfig,
    previous_rms: f64,
    last_onset: Option<f64>,
    intervals: VecDeque<f64>,
}

impl BeatDetector {
    pub fn new(config: BeatConfig) -> Self {
        let history = config.history_size.max(1);
        BeatDetector {
            config,
            previous_rms: 0.0,
            last_onset: None,
            intervals: VecDeque::with_capacity(history),
        }
    }

    /// Feed the RMS of the frame ending at `time` seconds.
    pub fn process(&mut self, rms: f64, time: f64) -> BeatInfo {
        let refractory = self.config.min_interval_ms / 1000.0;
        let rising = rms > self.previous_rms * self.config.sensitivity && rms > self.config.energy_floor;
        let settled = self.last_onset.is_none_or(|last| time - last >= refractory);
        self.previous_rms = rms;

        let is_beat = rising && settled;
        if is_beat {
            if let Some(last) = self.last_onset {
                if self.intervals.len() == self.config.history_size.max(1) {
                    self.intervals.pop_front();
                }
                self.intervals.push_back(time - last);
            }
            self.last_onset = Some(time);
        }

        BeatInfo {
            bpm: self.bpm(),
            is_beat,
            confidence: self.confidence(),
            last_onset: self.last_onset,
        }
    }

    fn mean_interval(&self) -> Option<f64> {
        if self.intervals.is_empty() {
            return None;
        }
        Some(self.intervals.iter().sum::<f64>() / self.intervals.len() as f64)
    }

    pub fn bpm(&self) -> f64 {
        match self.mean_interval() {
            Some(mean) if mean > 0.0 => 60.0 / mean,
            _ => 0.0,
        }
    }

    /// 1 − coefficient of variation of the interval history.
    fn confidence(&self) -> f64 {
        let Some(mean) = self.mean_interval() else {
            return 0.0;
        };
        if self.intervals.len() < 2 || mean <= 0.0 {
            return 0.0;
        }
        let var = self.intervals.iter().map(|i| (i - mean).powi(2)).sum::<f64>()
            / self.intervals.len() as f64;
        (1.0 - var.sqrt() / mean).clamp(0.0, 1.0)
    }

    pub fn reset(&mut self) {
        self.previous_rms = 0.0;
        self.last_onset = None;
        self.intervals.clear();
    }
}
