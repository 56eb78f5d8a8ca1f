// crates/dualcast-core/src/frame.rs
//
// Exclusively-owned raw media frames. Both video and audio handles are
// "GPU/image"-class resources in the sense spec.md §3 means it: the backing
// storage (a decoder-owned buffer, a textured surface) is released through an
// explicit call, not through Rust's ordinary `Drop` alone — the real release
// is a codec-engine operation (spec.md treats codec engines as external
// configure/feed/output boxes), and this wrapper's job is to make it
// impossible to forget that call or call it twice.
//
// `release()` consumes `self` and hands back the inner handle for the caller
// to feed to the engine's real close/free path. Dropping without releasing
// is the "leak" spec.md §3 calls a bug — in debug builds that panics instead
// of silently freeing, so property test #1 (every dequeued frame released
// exactly once) catches it immediately instead of relying on an external
// leak detector.

use std::mem::ManuallyDrop;
use std::sync::atomic::{AtomicI64, Ordering};

/// Test/diagnostic instrumentation — live frame counts, used by property
/// test #1 ("every RawVideoFrame/RawAudioFrame dequeued is released exactly
/// once") to assert the count returns to zero at the end of a run.
pub mod accounting {
    use super::*;

    pub static LIVE_VIDEO_FRAMES: AtomicI64 = AtomicI64::new(0);
    pub static LIVE_AUDIO_FRAMES: AtomicI64 = AtomicI64::new(0);

    pub fn live_video_frames() -> i64 {
        LIVE_VIDEO_FRAMES.load(Ordering::SeqCst)
    }

    pub fn live_audio_frames() -> i64 {
        LIVE_AUDIO_FRAMES.load(Ordering::SeqCst)
    }
}

/// An exclusively-owned, GPU/image-backed decoded video frame.
///
/// `H` is the concrete decoder-engine handle type (an FFmpeg frame, a
/// platform texture, …) — the core never inspects it, only moves it and
/// eventually releases it.
pub struct RawVideoFrame<H> {
    handle: ManuallyDrop<H>,
    pub pts: i64,
    released: bool,
}

impl<H> RawVideoFrame<H> {
    pub fn new(handle: H, pts: i64) -> Self {
        accounting::LIVE_VIDEO_FRAMES.fetch_add(1, Ordering::SeqCst);
        Self { handle: ManuallyDrop::new(handle), pts, released: false }
    }

    /// Consume the frame and hand back the inner handle for the caller to
    /// actually free. This is the one release path every frame must go
    /// through exactly once.
    pub fn release(mut self) -> H {
        self.released = true;
        accounting::LIVE_VIDEO_FRAMES.fetch_sub(1, Ordering::SeqCst);
        // SAFETY: `self` is immediately forgotten below, so `handle` is
        // never touched again through `self.handle`.
        let handle = unsafe { ManuallyDrop::take(&mut self.handle) };
        std::mem::forget(self);
        handle
    }
}

impl<H> Drop for RawVideoFrame<H> {
    fn drop(&mut self) {
        if !self.released {
            debug_assert!(
                false,
                "RawVideoFrame dropped without release() — leaked decoder handle at pts={}",
                self.pts
            );
            accounting::LIVE_VIDEO_FRAMES.fetch_sub(1, Ordering::SeqCst);
            // SAFETY: this Drop impl only runs once per value and `handle`
            // is not accessed again afterward.
            unsafe { ManuallyDrop::drop(&mut self.handle) };
        }
    }
}

/// An exclusively-owned decoded PCM audio frame.
///
/// Clonable only via [`RawAudioFrame::duplicate`], never via `derive(Clone)`
/// — spec.md §3 requires every duplicate to be an explicit, counted
/// allocation (the `AudioRing` ingestion path clones into the ring, then
/// releases the original it was handed).
pub struct RawAudioFrame<H> {
    handle: ManuallyDrop<H>,
    pub pts: i64,
    pub duration_us: i64,
    released: bool,
}

impl<H> RawAudioFrame<H> {
    pub fn new(handle: H, pts: i64, duration_us: i64) -> Self {
        accounting::LIVE_AUDIO_FRAMES.fetch_add(1, Ordering::SeqCst);
        Self { handle: ManuallyDrop::new(handle), pts, duration_us, released: false }
    }

    pub fn release(mut self) -> H {
        self.released = true;
        accounting::LIVE_AUDIO_FRAMES.fetch_sub(1, Ordering::SeqCst);
        let handle = unsafe { ManuallyDrop::take(&mut self.handle) };
        std::mem::forget(self);
        handle
    }

    /// Explicit duplication: produce a new, independently-owned frame that
    /// bumps the live-frame count, using `dup` to clone the underlying
    /// handle. Used when ingesting into an `AudioRing` while also feeding
    /// the active-source re-encoder from the same decoded frame.
    pub fn duplicate(&self, dup: impl FnOnce(&H) -> H) -> Self {
        let handle = dup(&self.handle);
        Self::new(handle, self.pts, self.duration_us)
    }
}

impl<H> Drop for RawAudioFrame<H> {
    fn drop(&mut self) {
        if !self.released {
            debug_assert!(
                false,
                "RawAudioFrame dropped without release() — leaked PCM handle at pts={}",
                self.pts
            );
            accounting::LIVE_AUDIO_FRAMES.fetch_sub(1, Ordering::SeqCst);
            unsafe { ManuallyDrop::drop(&mut self.handle) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_returns_handle_and_decrements_count() {
        let before = accounting::live_video_frames();
        let f = RawVideoFrame::new(42u32, 1_000);
        assert_eq!(accounting::live_video_frames(), before + 1);
        let handle = f.release();
        assert_eq!(handle, 42);
        assert_eq!(accounting::live_video_frames(), before);
    }

    #[test]
    fn duplicate_produces_independent_audio_frame() {
        let before = accounting::live_audio_frames();
        let original = RawAudioFrame::new(vec![1.0f32, 2.0], 500, 20_000);
        let dup = original.duplicate(|h| h.clone());
        assert_eq!(accounting::live_audio_frames(), before + 2);
        assert_eq!(dup.pts, original.pts);
        original.release();
        dup.release();
        assert_eq!(accounting::live_audio_frames(), before);
    }
}
