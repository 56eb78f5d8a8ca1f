// crates/dualcast-media/src/demux/mod.rs
//
// Demultiplexer (spec.md §4.2): one instance per (source, track). Consumes
// `SegmentRecord`s from the Segment Producer in order, decodes the init
// segment's codec configuration once, then emits batches of `EncodedUnit`
// for every media segment. Mirrors the teacher's preference for a small
// stateful struct over a free function — see `decode.rs`'s `LiveDecoder`.

mod esds;
mod mp4;

use dualcast_core::chunk::EncodedUnit;
use dualcast_core::constants::{DEMUX_AUDIO_BATCH, DEMUX_VIDEO_BATCH};
use dualcast_core::ids::{SourceId, Track};
use dualcast_core::segment::{SegmentKind, SegmentRecord};
use dualcast_core::PipelineError;

pub use mp4::TrackConfig;

/// Demuxer state for one (source, track) pair.
pub struct Demuxer {
    source: SourceId,
    track: Track,
    config: Option<TrackConfig>,
    pending: Vec<EncodedUnit>,
    batch_size: usize,
}

impl Demuxer {
    pub fn new(source: SourceId, track: Track) -> Self {
        let batch_size = match track {
            Track::Video => DEMUX_VIDEO_BATCH,
            Track::Audio => DEMUX_AUDIO_BATCH,
        };
        Self { source, track, config: None, pending: Vec::new(), batch_size }
    }

    pub fn is_ready(&self) -> bool {
        self.config.is_some()
    }

    pub fn config(&self) -> Option<&TrackConfig> {
        self.config.as_ref()
    }

    /// Append one arrived `SegmentRecord`. Returns any `EncodedUnit` batches
    /// that reached `batch_size` as a result (spec.md §4.2: "invokes
    /// `on_samples(units)` in batches").
    ///
    /// On `DemuxMalformed`, the caller is responsible for tearing down just
    /// this (source, track) pipeline — the sibling track continues.
    pub fn append(&mut self, record: SegmentRecord) -> Result<Vec<Vec<EncodedUnit>>, PipelineError> {
        debug_assert_eq!(record.track, self.track);

        match record.kind {
            SegmentKind::Init => {
                let config = mp4::parse_init_segment(&record.bytes, self.track).map_err(|e| {
                    PipelineError::DemuxMalformed {
                        source: self.source,
                        track: self.track,
                        message: format!("init segment: {e}"),
                    }
                })?;
                self.config = Some(config);
                Ok(Vec::new())
            }
            SegmentKind::Media => {
                let Some(config) = &self.config else {
                    return Err(PipelineError::DemuxMalformed {
                        source: self.source,
                        track: self.track,
                        message: "media segment before init segment was ready".into(),
                    });
                };
                let units = mp4::parse_media_segment(&record.bytes, self.track, config.track_id, config.timescale)
                    .map_err(|e| PipelineError::DemuxMalformed {
                        source: self.source,
                        track: self.track,
                        message: format!("media segment: {e}"),
                    })?;
                self.pending.extend(units);

                let mut batches = Vec::new();
                while self.pending.len() >= self.batch_size {
                    let rest = self.pending.split_off(self.batch_size);
                    batches.push(std::mem::replace(&mut self.pending, rest));
                }
                Ok(batches)
            }
        }
    }

    /// Flush whatever partial batch remains (EOF or teardown).
    pub fn flush(&mut self) -> Vec<EncodedUnit> {
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_media_segment_before_init() {
        let mut demux = Demuxer::new(SourceId::A, Track::Video);
        let record = SegmentRecord {
            kind: SegmentKind::Media,
            track: Track::Video,
            bytes: vec![0u8; 16],
            pts_us: 0,
            duration_us: 0,
        };
        let err = demux.append(record).unwrap_err();
        assert!(matches!(err, PipelineError::DemuxMalformed { .. }));
    }

    #[test]
    fn rejects_malformed_init_bytes() {
        let mut demux = Demuxer::new(SourceId::B, Track::Audio);
        let record = SegmentRecord {
            kind: SegmentKind::Init,
            track: Track::Audio,
            bytes: vec![0xff; 4],
            pts_us: 0,
            duration_us: 0,
        };
        let err = demux.append(record).unwrap_err();
        assert!(matches!(err, PipelineError::DemuxMalformed { .. }));
        assert!(!demux.is_ready());
    }
}
