// crates/dualcast-core/src/ring.rs
//
// Bounded FIFO of raw audio frames kept per source for seamless switch-over
// (spec.md §3, §4.4). Capped at AUDIO_RING_CAPACITY entries (60 s at the
// 20 ms grain); entries evicted past that cap are released, never dropped
// silently.

use std::collections::VecDeque;

use crate::constants::AUDIO_RING_CAPACITY;
use crate::frame::RawAudioFrame;

pub struct AudioRing<H> {
    entries: VecDeque<RawAudioFrame<H>>,
    capacity: usize,
}

impl<H> AudioRing<H> {
    pub fn new() -> Self {
        Self { entries: VecDeque::with_capacity(AUDIO_RING_CAPACITY), capacity: AUDIO_RING_CAPACITY }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Push a newly-ingested frame (already a duplicate — see
    /// `RawAudioFrame::duplicate`). Evicts and releases the oldest entry if
    /// the ring is at capacity.
    pub fn push(&mut self, frame: RawAudioFrame<H>) {
        if self.entries.len() >= self.capacity {
            if let Some(evicted) = self.entries.pop_front() {
                evicted.release();
            }
        }
        self.entries.push_back(frame);
    }

    /// Index of the entry whose start is closest to `from_us`, using the
    /// fixed 20 ms grid (spec.md §4.4: `floor(t_now / 20_000us)`), clamped
    /// into `[0, len-1]`.
    pub fn index_for_time(&self, from_us: i64) -> usize {
        if self.entries.is_empty() {
            return 0;
        }
        let grid = (from_us / crate::constants::AUDIO_GRAIN_US).max(0) as usize;
        grid.min(self.entries.len() - 1)
    }

    /// Drain entries from `start_index` to the end, in order, for the switch
    /// protocol's re-submission to the new audio muxer. Caller is responsible
    /// for assigning new monotonic PTS to each before encoding and for
    /// releasing them once submitted.
    pub fn consume_from(&mut self, start_index: usize) -> Vec<RawAudioFrame<H>> {
        let mut tail = self.entries.split_off(start_index.min(self.entries.len()));
        // Entries before start_index are never played — release them too,
        // they're being superseded by the switch.
        self.drain_all();
        tail.drain(..).collect()
    }

    /// Release every entry currently in the ring (used on switch, on
    /// shutdown, and after `consume_from` has taken the tail it needs).
    pub fn drain_all(&mut self) {
        while let Some(entry) = self.entries.pop_front() {
            entry.release();
        }
    }
}

impl<H> Default for AudioRing<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> Drop for AudioRing<H> {
    fn drop(&mut self) {
        self.drain_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(pts: i64) -> RawAudioFrame<u8> {
        RawAudioFrame::new(0u8, pts, 20_000)
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut ring: AudioRing<u8> = AudioRing::new();
        for i in 0..(AUDIO_RING_CAPACITY + 50) {
            ring.push(frame(i as i64 * 20_000));
        }
        assert_eq!(ring.len(), AUDIO_RING_CAPACITY);
    }

    #[test]
    fn index_for_time_matches_20ms_grid() {
        let mut ring: AudioRing<u8> = AudioRing::new();
        for i in 0..200 {
            ring.push(frame(i * 20_000));
        }
        // 3.0s / 20ms = 150
        assert_eq!(ring.index_for_time(3_000_000), 150);
    }

    #[test]
    fn consume_from_releases_everything() {
        let mut ring: AudioRing<u8> = AudioRing::new();
        for i in 0..10 {
            ring.push(frame(i * 20_000));
        }
        let tail = ring.consume_from(5);
        assert_eq!(tail.len(), 5);
        for f in tail {
            f.release();
        }
        assert_eq!(ring.len(), 0);
    }
}
