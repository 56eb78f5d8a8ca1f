// crates/dualcast-core/src/error.rs
//
// Typed error surface for the policies in spec.md §7. The teacher has no
// equivalent — `MediaResult::Error { id, msg: String }` is stringly typed —
// but a closed set of recoverable-vs-fatal kinds is exactly what
// `thiserror` is for, and it lets each pipeline stage match on `PipelineError`
// to apply its policy instead of sniffing a message string.

use thiserror::Error;

use crate::ids::{SourceId, Track};

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Segment transport failed before the abort signal. Policy: retry once
    /// immediately, then surface and mark the source degraded; the other
    /// source continues.
    #[error("network failure fetching {track:?} segment for source {source:?}: {message}")]
    NetworkFailure { source: SourceId, track: Track, message: String },

    /// The demuxer rejected malformed container bytes for one track. Policy:
    /// tear down that track only; the sibling track on the same source
    /// continues.
    #[error("malformed {track:?} container data for source {source:?}: {message}")]
    DemuxMalformed { source: SourceId, track: Track, message: String },

    /// The decoder rejected the codec configuration at `configure()` time.
    /// Policy: fatal for video, audio-pipeline-only for audio.
    #[error("unsupported {track:?} codec for source {source:?}: {message}")]
    CodecUnsupported { source: SourceId, track: Track, message: String },

    /// The video encoder's in-flight queue exceeded its depth. Policy: drop
    /// the current composited frame.
    #[error("video encoder saturated, frame dropped")]
    EncoderSaturation,

    /// The sink rejected an append. Policy: retry after the next
    /// `updateend`; fatal after `SINK_REJECT_RETRY_LIMIT` consecutive
    /// rejections.
    #[error("sink rejected {track:?} append (attempt {attempt})")]
    SinkRejected { track: Track, attempt: u32 },

    /// A muxer received a non-monotonic timestamp. Unreachable by
    /// construction per the switch protocol (spec.md §4.4) — if observed,
    /// policy is to recreate the muxer and resume.
    #[error("muxer received out-of-order {track:?} timestamp: {message}")]
    MuxerOutOfOrder { track: Track, message: String },

    /// The abort token was observed; unwind silently to teardown.
    #[error("aborted")]
    Aborted,
}

impl PipelineError {
    /// Whether this error, on its own, should end the whole load (as
    /// opposed to degrading one source or one track).
    pub fn is_fatal_to_load(&self) -> bool {
        matches!(
            self,
            PipelineError::CodecUnsupported { track: Track::Video, .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_codec_unsupported_is_fatal_audio_is_not() {
        let video_err = PipelineError::CodecUnsupported {
            source: SourceId::A,
            track: Track::Video,
            message: "no decoder".into(),
        };
        assert!(video_err.is_fatal_to_load());

        let audio_err = PipelineError::CodecUnsupported {
            source: SourceId::B,
            track: Track::Audio,
            message: "mp4a.40.34 unsupported".into(),
        };
        assert!(!audio_err.is_fatal_to_load());
    }
}
