// crates/dualcast-media/src/lib.rs

pub mod canvas;
pub mod compositor;
pub mod decode;
pub mod demux;
pub mod encode;
pub mod manifest;
pub mod mux;
pub mod pipeline;
pub mod producer;
pub mod sink;

pub use manifest::{ManifestDescriptor, SegmentDescriptor};
pub use pipeline::Player;
pub use sink::{PlaybackSink, SinkRange};
