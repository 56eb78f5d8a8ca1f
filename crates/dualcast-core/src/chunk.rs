// crates/dualcast-core/src/chunk.rs
//
// The three byte-carrying record types downstream of the demuxer: an
// encoded access unit handed to a decoder, an encoded chunk produced by the
// re-encoder, and a container chunk produced by the muxer for the feeder.

use crate::ids::Track;

/// One encoded, independently-batchable access unit emitted by the
/// Demultiplexer and accepted by a Decoder.
pub struct EncodedUnit {
    pub track: Track,
    pub is_keyframe: bool,
    pub pts_us: i64,
    pub duration_us: i64,
    pub bytes: Vec<u8>,
}

/// One encoded frame/grain produced by the Compositor's re-encoder and
/// consumed by a streaming Muxer.
pub struct EncodedChunk {
    pub is_keyframe: bool,
    pub pts_us: i64,
    pub bytes: Vec<u8>,
}

/// One container byte range produced by a Muxer and consumed by the Sink
/// Feeder.
pub struct ContainerChunk {
    pub bytes: Vec<u8>,
}
