// crates/dualcast-core/src/lib.rs

pub mod active_audio;
pub mod chunk;
pub mod commands;
pub mod constants;
pub mod error;
pub mod events;
pub mod frame;
pub mod geometry;
pub mod ids;
pub mod ring;
pub mod segment;
pub mod time;

pub use active_audio::ActiveAudio;
pub use chunk::{ContainerChunk, EncodedChunk, EncodedUnit};
pub use commands::PlayerCommand;
pub use error::PipelineError;
pub use events::HostEvent;
pub use frame::{RawAudioFrame, RawVideoFrame};
pub use geometry::PipGeometry;
pub use ids::{SourceId, Track};
pub use ring::AudioRing;
pub use segment::{SegmentKind, SegmentRecord};
