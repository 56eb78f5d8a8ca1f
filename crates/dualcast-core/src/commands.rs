// crates/dualcast-core/src/commands.rs
//
// Every host-issued action against the core is a PlayerCommand. The pipeline
// processes these sequentially on its single cooperative task (spec.md §5) —
// mirrors the teacher's EditorCommand enum (`commands.rs`), where every user
// action is an enum variant dispatched by one match in `app.rs`.

use crate::ids::SourceId;

#[derive(Debug, Clone)]
pub enum PlayerCommand {
    /// `load(url_A, url_B)` — idempotent, rejects if already loaded.
    Load { manifest_url_a: String, manifest_url_b: String },
    /// `destroy()` — idempotent teardown.
    Destroy,
    /// Swap which source is background vs. PiP, and drive the audio switch.
    SetSwapped(bool),
    /// Directly select the active audio source (used by tests and by hosts
    /// that decouple audio selection from the background/PiP swap).
    SetActiveAudio(SourceId),
    SetPipPosition { x: u32, y: u32 },
    SetPipSize { w: u32, h: u32 },
}
