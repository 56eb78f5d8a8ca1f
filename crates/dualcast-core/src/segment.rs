// crates/dualcast-core/src/segment.rs

use crate::ids::Track;

/// Whether a `SegmentRecord` is the one-time initialization segment for a
/// track or an ordinary media segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentKind {
    Init,
    Media,
}

/// One fetched byte range, produced by the Segment Producer and consumed by
/// the Demultiplexer. Owns its bytes; dropped after the demuxer has appended
/// them (spec.md §3).
pub struct SegmentRecord {
    pub kind: SegmentKind,
    pub track: Track,
    pub bytes: Vec<u8>,
    /// Presentation timestamp in microseconds, as declared by the manifest.
    pub pts_us: i64,
    pub duration_us: i64,
}
