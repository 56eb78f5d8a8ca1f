// crates/dualcast-media/src/producer.rs
//
// Segment Producer (spec.md §4.1): one instance per source. Fetches bytes
// for the manifest's init + media segment URLs, in order, and hands each
// arrival to `on_segment`. Runs its own thread, the way the teacher's
// MediaWorker runs a dedicated playback decode thread in `worker.rs` —
// `start()`/`stop()` here mirror `start_playback`/`stop_playback` there.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;

use dualcast_core::ids::{SourceId, Track};
use dualcast_core::segment::{SegmentKind, SegmentRecord};
use dualcast_core::PipelineError;

use crate::manifest::ManifestDescriptor;

/// Transport abstraction — the manifest grammar parser and the actual HTTP
/// fetch are both out-of-scope external collaborators (spec.md §1); the
/// producer only needs something that turns a URL into bytes.
pub trait SegmentFetcher: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>>;
}

/// The tick period driving producer progress (spec.md §4.1).
const TICK: Duration = Duration::from_millis(100);

enum QueueTarget {
    Video(Sender<SegmentRecord>),
    Audio(Sender<SegmentRecord>),
}

struct PendingSegment {
    url: String,
    kind: SegmentKind,
    track: Track,
    pts_us: i64,
    duration_us: i64,
}

pub struct SegmentProducer {
    source: SourceId,
    abort: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SegmentProducer {
    /// Start fetching immediately. `video_tx`/`audio_tx` are the bounded
    /// (capacity `SEGMENT_PREFETCH`) post-demux channels the demuxer reads
    /// from — a full channel is exactly the back-pressure signal spec.md
    /// §4.1 describes as "do not schedule the next fetch".
    pub fn start<F: SegmentFetcher>(
        source: SourceId,
        manifest: ManifestDescriptor,
        fetcher: Arc<F>,
        video_tx: Sender<SegmentRecord>,
        audio_tx: Sender<SegmentRecord>,
        on_error: impl Fn(PipelineError) + Send + 'static,
    ) -> Self {
        let abort = Arc::new(AtomicBool::new(false));
        let thread_abort = Arc::clone(&abort);

        let thread = thread::spawn(move || {
            run_producer(source, manifest, fetcher, video_tx, audio_tx, on_error, thread_abort);
        });

        Self { source, abort, thread: Some(thread) }
    }

    /// Abort in-flight fetches. Idempotent.
    pub fn stop(&mut self) {
        self.abort.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    pub fn source(&self) -> SourceId {
        self.source
    }
}

impl Drop for SegmentProducer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_queue(manifest: &ManifestDescriptor) -> Vec<PendingSegment> {
    let mut queue = Vec::with_capacity(2 + manifest.video_segments.len() + manifest.audio_segments.len());

    // Init segments always precede media segments of the same track.
    queue.push(PendingSegment {
        url: manifest.video_init_url.clone(),
        kind: SegmentKind::Init,
        track: Track::Video,
        pts_us: 0,
        duration_us: 0,
    });
    queue.push(PendingSegment {
        url: manifest.audio_init_url.clone(),
        kind: SegmentKind::Init,
        track: Track::Audio,
        pts_us: 0,
        duration_us: 0,
    });

    // Interleave video[i]/audio[i] — both lists are ascending pts already.
    let max_len = manifest.video_segments.len().max(manifest.audio_segments.len());
    for i in 0..max_len {
        if let Some(seg) = manifest.video_segments.get(i) {
            queue.push(PendingSegment {
                url: seg.url.clone(),
                kind: SegmentKind::Media,
                track: Track::Video,
                pts_us: seg.pts_us,
                duration_us: seg.duration_us,
            });
        }
        if let Some(seg) = manifest.audio_segments.get(i) {
            queue.push(PendingSegment {
                url: seg.url.clone(),
                kind: SegmentKind::Media,
                track: Track::Audio,
                pts_us: seg.pts_us,
                duration_us: seg.duration_us,
            });
        }
    }

    queue
}

fn run_producer<F: SegmentFetcher>(
    source: SourceId,
    manifest: ManifestDescriptor,
    fetcher: Arc<F>,
    video_tx: Sender<SegmentRecord>,
    audio_tx: Sender<SegmentRecord>,
    on_error: impl Fn(PipelineError) + Send + 'static,
    abort: Arc<AtomicBool>,
) {
    let mut queue = build_queue(&manifest).into_iter().peekable();

    'outer: loop {
        if abort.load(Ordering::Relaxed) {
            return;
        }

        let Some(next) = queue.peek() else { return };
        let target = match next.track {
            Track::Video => &video_tx,
            Track::Audio => &audio_tx,
        };

        // Back-pressure: don't schedule the next fetch while the post-demux
        // queue for this track is full. try_send fails immediately rather
        // than blocking, so the tick loop can keep checking `abort`.
        let record = fetch_with_one_retry(&*fetcher, &next.url, &abort, source, next.track, &on_error);

        match record {
            FetchOutcome::Aborted => return,
            FetchOutcome::Failed => {
                // NetworkFailure already surfaced by fetch_with_one_retry.
                // Drop this segment and move on — the source's pipeline is
                // marked degraded by the caller via on_error, the other
                // source continues independently.
                queue.next();
                continue 'outer;
            }
            FetchOutcome::Ok(bytes) => {
                let pending = queue.next().expect("peeked above");
                let mut record = SegmentRecord {
                    kind: pending.kind,
                    track: pending.track,
                    bytes,
                    pts_us: pending.pts_us,
                    duration_us: pending.duration_us,
                };
                loop {
                    if abort.load(Ordering::Relaxed) {
                        return;
                    }
                    match target.try_send(record) {
                        Ok(()) => break,
                        Err(crossbeam_channel::TrySendError::Full(rejected)) => {
                            // Queue for this track is at SEGMENT_PREFETCH capacity —
                            // retry the same record next tick rather than fetching ahead.
                            record = rejected;
                            thread::sleep(TICK);
                            continue;
                        }
                        Err(crossbeam_channel::TrySendError::Disconnected(_)) => return,
                    }
                }
            }
        }

        thread::sleep(TICK);
    }
}

enum FetchOutcome {
    Ok(Vec<u8>),
    Failed,
    Aborted,
}

fn fetch_with_one_retry<F: SegmentFetcher>(
    fetcher: &F,
    url: &str,
    abort: &AtomicBool,
    source: SourceId,
    track: Track,
    on_error: &impl Fn(PipelineError),
) -> FetchOutcome {
    for attempt in 0..2 {
        if abort.load(Ordering::Relaxed) {
            return FetchOutcome::Aborted;
        }
        match fetcher.fetch(url) {
            Ok(bytes) => return FetchOutcome::Ok(bytes),
            Err(e) => {
                eprintln!("[producer] fetch attempt {} failed for {url}: {e}", attempt + 1);
                if abort.load(Ordering::Relaxed) {
                    // Failure after abort is a silent drop.
                    return FetchOutcome::Aborted;
                }
            }
        }
    }
    on_error(PipelineError::NetworkFailure {
        source,
        track,
        message: format!("failed to fetch {url} after retry"),
    });
    FetchOutcome::Failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::sync::Mutex;

    struct FixedFetcher {
        fail_urls: Mutex<Vec<String>>,
    }

    impl SegmentFetcher for FixedFetcher {
        fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>> {
            if self.fail_urls.lock().unwrap().contains(&url.to_string()) {
                anyhow::bail!("simulated failure");
            }
            Ok(url.as_bytes().to_vec())
        }
    }

    fn manifest(n: usize) -> ManifestDescriptor {
        ManifestDescriptor {
            video_init_url: "video-init".into(),
            audio_init_url: "audio-init".into(),
            video_segments: (0..n)
                .map(|i| crate::manifest::SegmentDescriptor {
                    url: format!("v{i}"),
                    pts_us: i as i64 * 2_000_000,
                    duration_us: 2_000_000,
                })
                .collect(),
            audio_segments: (0..n)
                .map(|i| crate::manifest::SegmentDescriptor {
                    url: format!("a{i}"),
                    pts_us: i as i64 * 2_000_000,
                    duration_us: 2_000_000,
                })
                .collect(),
            audio_codec_fourcc: "mp4a.40.2".into(),
        }
    }

    #[test]
    fn emits_init_before_media_in_pts_order() {
        let (vtx, vrx) = bounded(64);
        let (atx, arx) = bounded(64);
        let fetcher = Arc::new(FixedFetcher { fail_urls: Mutex::new(vec![]) });

        let mut producer = SegmentProducer::start(
            SourceId::A,
            manifest(3),
            fetcher,
            vtx,
            atx,
            |_e| {},
        );

        let first_video = vrx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(first_video.kind, SegmentKind::Init);

        let first_audio = arx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(first_audio.kind, SegmentKind::Init);

        let mut last_pts = -1i64;
        for _ in 0..3 {
            let rec = vrx.recv_timeout(Duration::from_secs(2)).unwrap();
            assert_eq!(rec.kind, SegmentKind::Media);
            assert!(rec.pts_us > last_pts);
            last_pts = rec.pts_us;
        }

        producer.stop();
    }
}
