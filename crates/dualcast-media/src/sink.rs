// crates/dualcast-media/src/sink.rs
//
// Playback sink abstraction and feeder (spec.md §4.5, §6): the host's
// Media-Source-Extensions-style append target is out of scope to implement
// (spec.md §1 — "host DOM/MSE binding is an external collaborator"), so this
// only defines the trait the feeder drives and the feeder's own
// back-pressure/look-ahead/trim/autoplay policy.

use std::collections::VecDeque;

use dualcast_core::chunk::ContainerChunk;
use dualcast_core::constants::{MAX_BEHIND_S, MAX_LOOKAHEAD_S, SINK_REJECT_RETRY_LIMIT};
use dualcast_core::ids::Track;
use dualcast_core::PipelineError;

/// One buffered byte range, in seconds, as the sink reports it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SinkRange {
    pub start_s: f64,
    pub end_s: f64,
}

/// One MSE-like append target. The pipeline holds one of these for video and
/// one for audio.
pub trait PlaybackSink: Send {
    /// Returns `false` if the sink rejected the append (e.g. still updating,
    /// or a host-side decode error) — becomes `PipelineError::SinkRejected`.
    fn append(&mut self, bytes: &[u8]) -> bool;
    fn remove(&mut self, start_s: f64, end_s: f64);
    fn buffered(&self) -> Vec<SinkRange>;
    fn updating(&self) -> bool;
    fn current_time_s(&self) -> f64;
    /// Request playback start. Returns `false` if the host denies it.
    fn play(&mut self) -> bool;
}

fn buffered_ahead(ranges: &[SinkRange], current_time_s: f64) -> f64 {
    ranges.iter().map(|r| r.end_s).fold(current_time_s, f64::max) - current_time_s
}

/// Per-track queue + retry/look-ahead/trim policy driving one `PlaybackSink`.
pub struct SinkFeeder {
    track: Track,
    pending: VecDeque<ContainerChunk>,
    reject_attempts: u32,
    autoplay_attempted: bool,
}

impl SinkFeeder {
    pub fn new(track: Track) -> Self {
        Self { track, pending: VecDeque::new(), reject_attempts: 0, autoplay_attempted: false }
    }

    pub fn enqueue(&mut self, chunk: ContainerChunk) {
        self.pending.push_back(chunk);
    }

    /// Call on both new-chunk arrival and `updateend`. Pops and appends at
    /// most one chunk if the sink isn't updating, isn't over the look-ahead
    /// cap, and has something queued.
    pub fn try_feed(&mut self, sink: &mut dyn PlaybackSink) -> Result<(), PipelineError> {
        if sink.updating() {
            return Ok(());
        }
        let Some(chunk) = self.pending.front() else { return Ok(()) };

        let ahead = buffered_ahead(&sink.buffered(), sink.current_time_s());
        if ahead > MAX_LOOKAHEAD_S {
            return Ok(());
        }

        if sink.append(&chunk.bytes) {
            self.pending.pop_front();
            self.reject_attempts = 0;
            Ok(())
        } else {
            self.reject_attempts += 1;
            let attempt = self.reject_attempts;
            eprintln!("[feeder] sink rejected {:?} append, attempt {attempt}", self.track);
            if attempt >= SINK_REJECT_RETRY_LIMIT {
                Err(PipelineError::SinkRejected { track: self.track, attempt })
            } else {
                Ok(())
            }
        }
    }

    /// Call on every `updateend`: slide the retained window behind the
    /// playhead, and — for video only — request autoplay once past 0.5s
    /// buffered.
    pub fn on_updateend(&mut self, sink: &mut dyn PlaybackSink) {
        let current = sink.current_time_s();
        let threshold = current - MAX_BEHIND_S;
        if threshold > 0.0 {
            if let Some(earliest) = sink.buffered().iter().map(|r| r.start_s).reduce(f64::min) {
                if earliest < threshold {
                    sink.remove(0.0, threshold);
                }
            }
        }

        if self.track == Track::Video && !self.autoplay_attempted {
            if let Some(first) = sink.buffered().first() {
                if first.end_s > 0.5 {
                    self.autoplay_attempted = true;
                    if !sink.play() {
                        eprintln!("[feeder] autoplay request denied by host policy");
                    }
                }
            }
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeSink {
        buffered: Vec<SinkRange>,
        updating: bool,
        current_time_s: f64,
        reject_next: bool,
        removed: Vec<(f64, f64)>,
        play_calls: u32,
    }

    impl PlaybackSink for FakeSink {
        fn append(&mut self, bytes: &[u8]) -> bool {
            if self.reject_next {
                return false;
            }
            self.buffered = vec![SinkRange { start_s: 0.0, end_s: self.current_time_s + bytes.len() as f64 * 0.0 + 1.0 }];
            true
        }
        fn remove(&mut self, start_s: f64, end_s: f64) {
            self.removed.push((start_s, end_s));
        }
        fn buffered(&self) -> Vec<SinkRange> {
            self.buffered.clone()
        }
        fn updating(&self) -> bool {
            self.updating
        }
        fn current_time_s(&self) -> f64 {
            self.current_time_s
        }
        fn play(&mut self) -> bool {
            self.play_calls += 1;
            true
        }
    }

    #[test]
    fn does_not_feed_while_updating() {
        let mut feeder = SinkFeeder::new(Track::Video);
        feeder.enqueue(ContainerChunk { bytes: vec![1, 2, 3] });
        let mut sink = FakeSink {
            buffered: vec![],
            updating: true,
            current_time_s: 0.0,
            reject_next: false,
            removed: vec![],
            play_calls: 0,
        };
        feeder.try_feed(&mut sink).unwrap();
        assert_eq!(feeder.pending_len(), 1);
    }

    #[test]
    fn defers_beyond_lookahead_cap() {
        let mut feeder = SinkFeeder::new(Track::Video);
        feeder.enqueue(ContainerChunk { bytes: vec![1] });
        let mut sink = FakeSink {
            buffered: vec![SinkRange { start_s: 0.0, end_s: 40.0 }],
            updating: false,
            current_time_s: 5.0,
            reject_next: false,
            removed: vec![],
            play_calls: 0,
        };
        feeder.try_feed(&mut sink).unwrap();
        assert_eq!(feeder.pending_len(), 1, "35s ahead exceeds the 30s cap");
    }

    #[test]
    fn surfaces_fatal_after_three_consecutive_rejections() {
        let mut feeder = SinkFeeder::new(Track::Audio);
        let mut sink = FakeSink {
            buffered: vec![],
            updating: false,
            current_time_s: 0.0,
            reject_next: true,
            removed: vec![],
            play_calls: 0,
        };
        for attempt in 1..3 {
            feeder.enqueue(ContainerChunk { bytes: vec![0] });
            let result = feeder.try_feed(&mut sink);
            assert!(result.is_ok(), "attempt {attempt} should not be fatal yet");
        }
        feeder.enqueue(ContainerChunk { bytes: vec![0] });
        let err = feeder.try_feed(&mut sink).unwrap_err();
        assert!(matches!(err, PipelineError::SinkRejected { attempt: 3, .. }));
    }

    #[test]
    fn trims_behind_playhead_past_ten_seconds() {
        let mut feeder = SinkFeeder::new(Track::Audio);
        let mut sink = FakeSink {
            buffered: vec![SinkRange { start_s: 0.0, end_s: 25.0 }],
            updating: false,
            current_time_s: 15.0,
            reject_next: false,
            removed: vec![],
            play_calls: 0,
        };
        feeder.on_updateend(&mut sink);
        assert_eq!(sink.removed, vec![(0.0, 5.0)]);
    }

    #[test]
    fn autoplay_fires_once_past_half_second_buffered() {
        let mut feeder = SinkFeeder::new(Track::Video);
        let mut sink = FakeSink {
            buffered: vec![SinkRange { start_s: 0.0, end_s: 0.6 }],
            updating: false,
            current_time_s: 0.0,
            reject_next: false,
            removed: vec![],
            play_calls: 0,
        };
        feeder.on_updateend(&mut sink);
        feeder.on_updateend(&mut sink);
        assert_eq!(sink.play_calls, 1);
    }
}
