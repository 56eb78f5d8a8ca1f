// crates/dualcast-media/src/manifest.rs
//
// Shape of the upstream manifest source (spec.md §6). The manifest grammar
// parser itself is an out-of-scope external collaborator — the core only
// consumes its already-decoded output.

/// One fetchable media segment entry, in the manifest's declared timescale
/// already converted to microseconds by the (external) manifest parser.
#[derive(Clone, Debug)]
pub struct SegmentDescriptor {
    pub url: String,
    pub pts_us: i64,
    pub duration_us: i64,
}

/// Everything the Segment Producer needs to drive one source.
#[derive(Clone, Debug)]
pub struct ManifestDescriptor {
    pub video_init_url: String,
    pub audio_init_url: String,
    pub video_segments: Vec<SegmentDescriptor>,
    pub audio_segments: Vec<SegmentDescriptor>,
    /// e.g. "mp4a.40.2" (AAC-LC) or "mp4a.40.34" (unsupported by design, used
    /// to exercise the CodecUnsupported teardown path in end-to-end scenario 6).
    pub audio_codec_fourcc: String,
}

/// Resolves a `load()` URL into a `ManifestDescriptor`. The manifest grammar
/// itself is out of scope (spec.md §1) — this is the seam a host plugs its
/// parser into.
pub trait ManifestSource: Send + Sync + 'static {
    fn resolve(&self, url: &str) -> anyhow::Result<ManifestDescriptor>;
}
