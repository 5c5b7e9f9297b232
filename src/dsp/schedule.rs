//! Deallocation queue keyed by the rendering clock.
//!
//! Transient voices are retired at a sample position rather than by a
//! wall-clock timer, so cleanup lands at the same point of the audio
//! timeline regardless of how fast the host pulls quanta.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::dsp::voice::VoiceId;

/// Extra time after a release before the voice is dropped, seconds.
pub const RELEASE_GRACE_SECONDS: f64 = 0.05;

/// Min-heap of `(due sample, voice)` entries.
///
/// Every voice holds at most one entry, and entries of voices that leave
/// early are cancelled, so the heap never outgrows its initial capacity.
#[derive(Debug, Default)]
pub struct DeallocQueue {
    heap: BinaryHeap<Reverse<(u64, VoiceId)>>,
}

impl DeallocQueue {
    /// Queue with room for `capacity` entries before it reallocates.
    pub fn with_capacity(capacity: usize) -> Self {
        DeallocQueue {
            heap: BinaryHeap::with_capacity(capacity),
        }
    }

    /// Schedule `voice` at `due`, replacing any earlier entry for it.
    pub fn schedule(&mut self, due: u64, voice: VoiceId) {
        self.cancel(voice);
        self.heap.push(Reverse((due, voice)));
    }

    /// Forget `voice`. Used when it is dropped before its entry is due.
    pub fn cancel(&mut self, voice: VoiceId) {
        self.heap.retain(|Reverse((_, id))| *id != voice);
    }

    /// Pop the next entry due at or before `now`.
    pub fn pop_due(&mut self, now: u64) -> Option<VoiceId> {
        match self.heap.peek() {
            Some(Reverse((due, _))) if *due <= now => self.heap.pop().map(|Reverse((_, id))| id),
            _ => None,
        }
    }

    /// Sample position of the earliest entry.
    pub fn next_due(&self) -> Option<u64> {
        self.heap.peek().map(|Reverse((due, _))| *due)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

/// Sample position `seconds` after `now`, rounded up.
///
/// Saturates at `u64::MAX`: an entry that far out is simply never due.
pub fn due_after(now: u64, seconds: f64, sample_rate: f64) -> u64 {
    // float-to-int casts saturate, and NaN becomes 0
    let samples = (seconds.max(0.0) * sample_rate).ceil() as u64;
    now.saturating_add(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_clock_order() {
        let mut q = DeallocQueue::with_capacity(4);
        q.schedule(300, 3);
        q.schedule(100, 1);
        q.schedule(200, 2);
        assert_eq!(q.next_due(), Some(100));
        assert_eq!(q.pop_due(50), None);
        assert_eq!(q.pop_due(250), Some(1));
        assert_eq!(q.pop_due(250), Some(2));
        assert_eq!(q.pop_due(250), None);
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop_due(300), Some(3));
        assert!(q.is_empty());
    }

    #[test]
    fn due_rounds_up() {
        assert_eq!(due_after(10, 0.5, 100.0), 60);
        assert_eq!(due_after(10, 0.001, 44100.0), 10 + 45);
        assert_eq!(due_after(10, -1.0, 44100.0), 10);
    }

    #[test]
    fn due_saturates_for_endless_releases() {
        assert_eq!(due_after(1_000, 1e300, 44100.0), u64::MAX);
        assert_eq!(due_after(u64::MAX - 1, 1.0, 44100.0), u64::MAX);
        assert_eq!(due_after(10, f64::INFINITY, 44100.0), u64::MAX);
    }

    #[test]
    fn cancel_and_reschedule_keep_one_entry_per_voice() {
        let mut q = DeallocQueue::with_capacity(2);
        q.schedule(100, 1);
        q.schedule(50, 1);
        assert_eq!(q.len(), 1);
        assert_eq!(q.next_due(), Some(50));
        q.schedule(70, 2);
        q.cancel(1);
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop_due(100), Some(2));
        assert!(q.is_empty());
        q.cancel(3);
        assert!(q.is_empty());
    }
}
