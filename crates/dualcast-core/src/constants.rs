// crates/dualcast-core/src/constants.rs
//
// Bit-exact defaults (spec.md §6). Module-level constants, not config —
// per spec.md §9 ("Global mutable state"), URLs and sink bindings are
// constructor arguments; these are the fixed shape of the pipeline itself.

/// Default canvas width in pixels.
pub const CANVAS_WIDTH: u32 = 640;
/// Default canvas height in pixels.
pub const CANVAS_HEIGHT: u32 = 480;

/// Output audio sample rate for the re-encoder (Opus, 48 kHz).
pub const AUDIO_SAMPLE_RATE_HZ: u32 = 48_000;
/// Audio ring / switch-over grid, in microseconds (20 ms).
pub const AUDIO_GRAIN_US: i64 = 20_000;

/// Compositor tick period in microseconds (30 fps).
pub const FRAME_PERIOD_US: i64 = 33_333;
/// Compositor target frame rate.
pub const TARGET_FPS: u32 = 30;

/// Minimum PiP inset size in pixels (width or height).
pub const MIN_PIP_SIZE: u32 = 80;
/// Size of the resize-handle affordance drawn at the PiP's bottom-right corner.
pub const RESIZE_HANDLE_SIZE: u32 = 15;

/// Force a video keyframe every this many encoded frames (5 s at 30 fps).
pub const KEYFRAME_INTERVAL_FRAMES: u64 = 150;

/// Video encoder target bitrate (VP8), bits per second.
pub const VIDEO_BITRATE_BPS: u32 = 2_000_000;
/// Audio encoder target bitrate (Opus), bits per second.
pub const AUDIO_BITRATE_BPS: u32 = 128_000;
/// Opus output channel count.
pub const AUDIO_CHANNELS: u16 = 2;

/// Maximum sink buffer look-ahead, in seconds, before the feeder defers.
pub const MAX_LOOKAHEAD_S: f64 = 30.0;
/// Maximum sink buffer retained behind the playhead, in seconds.
pub const MAX_BEHIND_S: f64 = 10.0;

/// Audio ring capacity in entries (60 s of PCM at the 20 ms grain).
pub const AUDIO_RING_CAPACITY: usize = 3_000;

/// Segment producer prefetch window: max post-demux records queued per track.
pub const SEGMENT_PREFETCH: usize = 4;

/// Video decoder in-flight queue depth before frames are dropped at the
/// encoder input rather than the decoder input (spec.md §4.3).
pub const VIDEO_DECODER_QUEUE_DEPTH: usize = 10;
/// Video encoder in-flight queue depth before EncoderSaturation triggers a drop.
pub const VIDEO_ENCODER_QUEUE_DEPTH: usize = 10;

/// Batch size for demuxer-emitted video access units.
pub const DEMUX_VIDEO_BATCH: usize = 50;
/// Batch size for demuxer-emitted audio access units.
pub const DEMUX_AUDIO_BATCH: usize = 100;

/// Audio-switch splice delay applied to the sink's current time (100 ms).
pub const SWITCH_SPLICE_DELAY_US: i64 = 100_000;

/// Consecutive `SinkRejected` retries before the append is surfaced as fatal.
pub const SINK_REJECT_RETRY_LIMIT: u32 = 3;

/// Compositor sleep when waking too early for the next tick.
pub const EARLY_SLEEP_MS: u64 = 5;
/// Compositor sleep when both decoder queues are empty but neither source is EOF.
pub const IDLE_SLEEP_MS: u64 = 10;
