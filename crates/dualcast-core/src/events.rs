// crates/dualcast-core/src/events.rs
//
// The host-provided event stream (spec.md §6), delivered in this order per
// occurrence: BufferUpdate after every successful append, ActiveSourceChanged
// during the switch protocol, TimeUpdate whenever the sink reports a time
// change, and a terminal Error for user-visible failures.

use crate::error::PipelineError;
use crate::ids::SourceId;

#[derive(Debug)]
pub enum HostEvent {
    BufferUpdate { video_ranges: Vec<(f64, f64)>, audio_ranges: Vec<(f64, f64)> },
    ActiveSourceChanged { source: SourceId },
    TimeUpdate { current_time_s: f64 },
    /// Terminal — delivered once, ends the load.
    Error(PipelineError),
}
