// crates/dualcast-media/src/compositor.rs
//
// Compositor & Re-encoder (spec.md §4.4): the single-threaded cooperative
// tick driver. Ties together the per-source decoded-frame queues, the
// canvas, the VP8/Opus re-encoders, the two streaming muxers, and the sink
// feeders — the same "one struct owns every stage, driven by one loop"
// shape as the teacher's `MediaWorker` in `worker.rs`, just with a 30fps
// tick instead of a playback-scrub loop.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use ffmpeg_the_third::util::frame::{Audio as AudioFrame, Video as VideoFrame};

use dualcast_core::constants::{
    AUDIO_SAMPLE_RATE_HZ, CANVAS_HEIGHT, CANVAS_WIDTH, EARLY_SLEEP_MS, FRAME_PERIOD_US,
    IDLE_SLEEP_MS, RESIZE_HANDLE_SIZE, SWITCH_SPLICE_DELAY_US,
};
use dualcast_core::frame::{RawAudioFrame, RawVideoFrame};
use dualcast_core::geometry::PipGeometry;
use dualcast_core::ids::{SourceId, Track};
use dualcast_core::ring::AudioRing;
use dualcast_core::{ActiveAudio, HostEvent};

use crate::canvas::Canvas;
use crate::decode;
use crate::encode::{AudioEncoderEngine, VideoEncoderEngine};
use crate::mux::ContainerMuxer;
use crate::sink::{PlaybackSink, SinkFeeder};

/// The decoded-frame channels one source contributes to the compositor.
pub struct SourceQueues {
    pub video_rx: Receiver<RawVideoFrame<VideoFrame>>,
    pub audio_rx: Receiver<RawAudioFrame<AudioFrame>>,
    pub video_eof: Arc<AtomicBool>,
    pub audio_eof: Arc<AtomicBool>,
    /// Shared with the decoder's own in-flight counter (created by
    /// `SourcePipeline` and passed into `decode::VideoDecoderEngine::configure`)
    /// — the compositor calls `decode::notify_consumed` against it as it
    /// dequeues frames, so saturation reflects real downstream draining
    /// rather than a count the decoder flips up and back down within one
    /// `send_unit` call.
    pub video_in_flight: Arc<AtomicUsize>,
}

impl SourceQueues {
    fn is_fully_drained(&self) -> bool {
        self.video_eof.load(Ordering::Relaxed)
            && self.audio_eof.load(Ordering::Relaxed)
            && self.video_rx.is_empty()
            && self.audio_rx.is_empty()
    }
}

pub struct Compositor {
    sources: [SourceQueues; 2],
    rings: [AudioRing<AudioFrame>; 2],

    geometry: Arc<PipGeometry>,
    swapped: Arc<AtomicBool>,
    active_audio: ActiveAudio,

    canvas: Canvas,
    video_encoder: VideoEncoderEngine,
    audio_encoder: AudioEncoderEngine,
    video_muxer: ContainerMuxer,
    audio_muxer: ContainerMuxer,
    video_feeder: SinkFeeder,
    audio_feeder: SinkFeeder,
    video_sink: Box<dyn PlaybackSink>,
    audio_sink: Box<dyn PlaybackSink>,

    host_tx: crossbeam_channel::Sender<HostEvent>,
}

fn idx(source: SourceId) -> usize {
    match source {
        SourceId::A => 0,
        SourceId::B => 1,
    }
}

/// `swapped=false` → A is background, B is PiP; `swapped=true` → the
/// reverse (spec.md §4.4 step 4).
fn select_background_and_pip<T>(swapped: bool, a: T, b: T) -> (T, T) {
    if swapped {
        (b, a)
    } else {
        (a, b)
    }
}

impl Compositor {
    pub fn new(
        sources: [SourceQueues; 2],
        geometry: Arc<PipGeometry>,
        swapped: Arc<AtomicBool>,
        initial_active_audio: SourceId,
        video_sink: Box<dyn PlaybackSink>,
        audio_sink: Box<dyn PlaybackSink>,
        host_tx: crossbeam_channel::Sender<HostEvent>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            sources,
            rings: [AudioRing::new(), AudioRing::new()],
            geometry,
            swapped,
            active_audio: ActiveAudio::new(initial_active_audio),
            canvas: Canvas::new(CANVAS_WIDTH, CANVAS_HEIGHT),
            video_encoder: VideoEncoderEngine::new(CANVAS_WIDTH, CANVAS_HEIGHT)?,
            audio_encoder: AudioEncoderEngine::new()?,
            video_muxer: ContainerMuxer::new_video(CANVAS_WIDTH, CANVAS_HEIGHT)?,
            audio_muxer: ContainerMuxer::new_audio(AUDIO_SAMPLE_RATE_HZ, 2)?,
            video_feeder: SinkFeeder::new(Track::Video),
            audio_feeder: SinkFeeder::new(Track::Audio),
            video_sink,
            audio_sink,
            host_tx,
        })
    }

    /// Drive ticks at the 30fps cadence until both sources are fully
    /// drained or `abort` is observed.
    pub fn run(&mut self, abort: &AtomicBool) {
        let mut last_frame_at = Instant::now();
        loop {
            if abort.load(Ordering::Relaxed) {
                self.teardown();
                return;
            }

            if last_frame_at.elapsed().as_micros() as i64 < FRAME_PERIOD_US {
                std::thread::sleep(Duration::from_millis(EARLY_SLEEP_MS));
                continue;
            }

            match self.tick() {
                TickOutcome::Continue => last_frame_at = Instant::now(),
                TickOutcome::Idle => std::thread::sleep(Duration::from_millis(IDLE_SLEEP_MS)),
                TickOutcome::Terminated => {
                    self.teardown();
                    return;
                }
            }
        }
    }

    /// One compositor tick (spec.md §4.4's five-step procedure).
    pub fn tick(&mut self) -> TickOutcome {
        self.drain_audio();

        let a_video = self.sources[0].video_rx.try_recv().ok();
        if a_video.is_some() {
            decode::notify_consumed(&self.sources[0].video_in_flight, 1);
        }
        let b_video = self.sources[1].video_rx.try_recv().ok();
        if b_video.is_some() {
            decode::notify_consumed(&self.sources[1].video_in_flight, 1);
        }

        if a_video.is_none() && b_video.is_none() {
            if self.sources[0].is_fully_drained() && self.sources[1].is_fully_drained() {
                return TickOutcome::Terminated;
            }
            return TickOutcome::Idle;
        }

        self.draw_tick(a_video, b_video);

        if let Err(err) = self.encode_and_mux_video() {
            eprintln!("[compositor] video encode/mux failed: {err}");
        }

        TickOutcome::Continue
    }

    fn drain_audio(&mut self) {
        for source in [SourceId::A, SourceId::B] {
            let active = self.active_audio.current() == source;
            let mut to_feed = Vec::new();

            while let Ok(frame) = self.sources[idx(source)].audio_rx.try_recv() {
                let for_ring = frame.duplicate(|h| h.clone());
                self.rings[idx(source)].push(for_ring);
                if active {
                    to_feed.push(frame);
                } else {
                    frame.release();
                }
            }

            if active && !to_feed.is_empty() {
                for frame in to_feed {
                    let pcm = frame.release();
                    self.audio_encoder.push(&pcm);
                }
                self.drain_audio_encoder();
            }
        }
    }

    fn drain_audio_encoder(&mut self) {
        let mut pts = self.active_audio.last_emitted_pts_us();
        match self.audio_encoder.drain_ready(&mut pts) {
            Ok(chunks) => {
                self.active_audio.set_last_emitted_pts_us(pts);
                self.mux_and_feed_audio(chunks);
            }
            Err(e) => eprintln!("[compositor] audio encode failed: {e}"),
        }
    }

    fn mux_and_feed_audio(&mut self, chunks: Vec<dualcast_core::chunk::EncodedChunk>) {
        if chunks.is_empty() {
            return;
        }
        for chunk in &chunks {
            if let Err(e) = self.audio_muxer.write_chunk(chunk) {
                eprintln!("[compositor] audio mux failed: {e}");
            }
        }
        match self.audio_muxer.flush_chunk() {
            Ok(Some(container)) => self.audio_feeder.enqueue(container),
            Ok(None) => {}
            Err(e) => eprintln!("[compositor] audio mux flush failed: {e}"),
        }
        self.feed_and_notify(Track::Audio);
    }

    fn draw_tick(&mut self, a: Option<RawVideoFrame<VideoFrame>>, b: Option<RawVideoFrame<VideoFrame>>) {
        let swapped = self.swapped.load(Ordering::Relaxed);
        let a = a.map(|f| f.release());
        let b = b.map(|f| f.release());
        let (background, pip) = select_background_and_pip(swapped, a, b);
        let rect = self.geometry.snapshot();

        match (&background, &pip) {
            (Some(bg), Some(pip)) => {
                if let Err(e) = self.canvas.draw_background(bg) {
                    eprintln!("[compositor] background draw failed: {e}");
                }
                if let Err(e) = self.canvas.draw_pip(pip, rect) {
                    eprintln!("[compositor] pip draw failed: {e}");
                }
                self.canvas.stroke_border(rect);
                self.canvas.fill_resize_handle(rect, RESIZE_HANDLE_SIZE);
            }
            (Some(bg), None) => {
                if let Err(e) = self.canvas.draw_background(bg) {
                    eprintln!("[compositor] background draw failed: {e}");
                }
            }
            (None, Some(pip)) => {
                // Background source absent: draw the surviving source full
                // canvas and skip the PiP draw (spec.md §8 scenario 4).
                if let Err(e) = self.canvas.draw_background(pip) {
                    eprintln!("[compositor] solo-source draw failed: {e}");
                }
            }
            (None, None) => {}
        }
    }

    fn encode_and_mux_video(&mut self) -> anyhow::Result<()> {
        if self.video_encoder.is_saturated() {
            eprintln!("[compositor] video encoder saturated, dropping frame");
            return Ok(());
        }

        let composite = self.canvas.into_frame()?;
        let wrapped = RawVideoFrame::new(composite, 0);

        let chunks = self.video_encoder.submit(wrapped)?;
        for chunk in &chunks {
            self.video_muxer.write_chunk(chunk)?;
        }
        if !chunks.is_empty() {
            if let Some(container) = self.video_muxer.flush_chunk()? {
                self.video_feeder.enqueue(container);
            }
        }
        self.feed_and_notify(Track::Video);
        Ok(())
    }

    fn feed_and_notify(&mut self, track: Track) {
        let result = match track {
            Track::Video => self.video_feeder.try_feed(self.video_sink.as_mut()),
            Track::Audio => self.audio_feeder.try_feed(self.audio_sink.as_mut()),
        };
        if let Err(e) = result {
            let _ = self.host_tx.send(HostEvent::Error(e));
            return;
        }

        let video_ranges = self.video_sink.buffered().into_iter().map(|r| (r.start_s, r.end_s)).collect();
        let audio_ranges = self.audio_sink.buffered().into_iter().map(|r| (r.start_s, r.end_s)).collect();
        let _ = self.host_tx.send(HostEvent::BufferUpdate { video_ranges, audio_ranges });

        match track {
            Track::Video => self.video_feeder.on_updateend(self.video_sink.as_mut()),
            Track::Audio => self.audio_feeder.on_updateend(self.audio_sink.as_mut()),
        }
        let current_time_s = self.video_sink.current_time_s();
        let _ = self.host_tx.send(HostEvent::TimeUpdate { current_time_s });
    }

    /// Audio switch protocol (spec.md §4.4). No-op if `new` is already
    /// active.
    pub fn set_active_audio(&mut self, new: SourceId) {
        let t_now_us = (self.audio_sink.current_time_s() * 1_000_000.0) as i64;
        if !self.active_audio.switch_to(new, t_now_us, SWITCH_SPLICE_DELAY_US) {
            return;
        }

        let _ = self.host_tx.send(HostEvent::ActiveSourceChanged { source: new });

        let remove_from_s = (t_now_us + SWITCH_SPLICE_DELAY_US) as f64 / 1_000_000.0;
        let end_s = self.audio_sink.buffered().into_iter().map(|r| r.end_s).fold(remove_from_s, f64::max);
        if !self.audio_sink.updating() {
            self.audio_sink.remove(remove_from_s, end_s);
        }

        match ContainerMuxer::new_audio(AUDIO_SAMPLE_RATE_HZ, 2) {
            Ok(muxer) => self.audio_muxer = muxer,
            Err(e) => eprintln!("[compositor] failed to recreate audio muxer on switch: {e}"),
        }

        // Exactly one of the two is `new`; the other is the source being
        // switched away from, whose buffered-ahead ring content is now moot.
        let old_source = new.other();
        self.rings[idx(old_source)].drain_all();

        let start_index = self.rings[idx(new)].index_for_time(t_now_us);
        let tail = self.rings[idx(new)].consume_from(start_index);
        let mut pts = self.active_audio.last_emitted_pts_us();
        for frame in tail {
            let pcm = frame.release();
            self.audio_encoder.push(&pcm);
            match self.audio_encoder.drain_ready(&mut pts) {
                Ok(chunks) => self.mux_and_feed_audio(chunks),
                Err(e) => eprintln!("[compositor] re-splice encode failed: {e}"),
            }
        }
        self.active_audio.set_last_emitted_pts_us(pts);
    }

    fn teardown(&mut self) {
        for ring in &mut self.rings {
            ring.drain_all();
        }
        if let Some(chunk) = self.video_muxer.finalize() {
            self.video_feeder.enqueue(chunk);
        }
        if let Some(chunk) = self.audio_muxer.finalize() {
            self.audio_feeder.enqueue(chunk);
        }
    }
}

pub enum TickOutcome {
    Continue,
    Idle,
    Terminated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idx_maps_source_to_array_slot() {
        assert_eq!(idx(SourceId::A), 0);
        assert_eq!(idx(SourceId::B), 1);
    }

    #[test]
    fn select_background_and_pip_respects_swapped_flag() {
        assert_eq!(select_background_and_pip(false, "a", "b"), ("a", "b"));
        assert_eq!(select_background_and_pip(true, "a", "b"), ("b", "a"));
    }

    fn empty_queues() -> SourceQueues {
        let (_video_tx, video_rx) = crossbeam_channel::bounded(1);
        let (_audio_tx, audio_rx) = crossbeam_channel::bounded(1);
        SourceQueues {
            video_rx,
            audio_rx,
            video_eof: Arc::new(AtomicBool::new(false)),
            audio_eof: Arc::new(AtomicBool::new(false)),
            video_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[test]
    fn is_fully_drained_requires_both_eof_flags_and_empty_channels() {
        let queues = empty_queues();
        assert!(!queues.is_fully_drained());
        queues.video_eof.store(true, Ordering::Relaxed);
        assert!(!queues.is_fully_drained());
        queues.audio_eof.store(true, Ordering::Relaxed);
        assert!(queues.is_fully_drained());
    }
}
