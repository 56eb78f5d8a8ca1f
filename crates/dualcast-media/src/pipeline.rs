// crates/dualcast-media/src/pipeline.rs
//
// Top-level player (spec.md §5): wires two Segment Producers (one dedicated
// thread each, per `producer.rs`), four Demultiplexers, two Decoder Pairs,
// and the Compositor together, driven by one cooperative loop thread that
// processes `PlayerCommand`s and demux/decode/composite work in turn — the
// same "one loop owns everything but the background fetch thread" shape the
// teacher's `App` (`app.rs`) drives its `MediaWorker` with.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};

use ffmpeg_the_third::util::frame::{Audio as AudioFrame, Video as VideoFrame};

use dualcast_core::constants::{EARLY_SLEEP_MS, FRAME_PERIOD_US, IDLE_SLEEP_MS, SEGMENT_PREFETCH};
use dualcast_core::frame::{RawAudioFrame, RawVideoFrame};
use dualcast_core::geometry::PipGeometry;
use dualcast_core::ids::{SourceId, Track};
use dualcast_core::segment::SegmentRecord;
use dualcast_core::{HostEvent, PipelineError, PlayerCommand};

use crate::compositor::{Compositor, SourceQueues, TickOutcome};
use crate::decode::{AudioDecoderEngine, VideoDecoderEngine};
use crate::demux::Demuxer;
use crate::manifest::{ManifestDescriptor, ManifestSource};
use crate::producer::{SegmentFetcher, SegmentProducer};
use crate::sink::PlaybackSink;

/// Demux + decode state for one source, pumped once per loop iteration from
/// the Segment Producer's channels. No dedicated thread of its own — this is
/// the "single cooperative task" half of the split spec.md §5 describes.
struct SourcePipeline {
    source: SourceId,
    producer: SegmentProducer,
    video_seg_rx: Receiver<SegmentRecord>,
    audio_seg_rx: Receiver<SegmentRecord>,
    video_demux: Demuxer,
    audio_demux: Demuxer,
    video_decoder: Option<VideoDecoderEngine>,
    audio_decoder: Option<AudioDecoderEngine>,
    audio_codec_fourcc: String,
    video_out_tx: Sender<RawVideoFrame<VideoFrame>>,
    audio_out_tx: Sender<RawAudioFrame<AudioFrame>>,
    video_eof: Arc<AtomicBool>,
    audio_eof: Arc<AtomicBool>,
    /// Created up front so `queues()` can hand a clone to the compositor
    /// before the decoder itself exists (it's configured lazily once the
    /// first segment's config arrives) — see `decode::VideoDecoderEngine::configure`.
    video_in_flight: Arc<AtomicUsize>,
}

impl SourcePipeline {
    fn start<F: SegmentFetcher>(
        source: SourceId,
        manifest: ManifestDescriptor,
        fetcher: Arc<F>,
        video_out_tx: Sender<RawVideoFrame<VideoFrame>>,
        audio_out_tx: Sender<RawAudioFrame<AudioFrame>>,
        host_tx: Sender<HostEvent>,
    ) -> Self {
        let (video_seg_tx, video_seg_rx) = bounded(SEGMENT_PREFETCH);
        let (audio_seg_tx, audio_seg_rx) = bounded(SEGMENT_PREFETCH);
        let audio_codec_fourcc = manifest.audio_codec_fourcc.clone();

        let error_sink = host_tx;
        let producer = SegmentProducer::start(source, manifest, fetcher, video_seg_tx, audio_seg_tx, move |e| {
            let _ = error_sink.send(HostEvent::Error(e));
        });

        Self {
            source,
            producer,
            video_seg_rx,
            audio_seg_rx,
            video_demux: Demuxer::new(source, Track::Video),
            audio_demux: Demuxer::new(source, Track::Audio),
            video_decoder: None,
            audio_decoder: None,
            audio_codec_fourcc,
            video_out_tx,
            audio_out_tx,
            video_eof: Arc::new(AtomicBool::new(false)),
            audio_eof: Arc::new(AtomicBool::new(false)),
            video_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn queues(
        &self,
        video_rx: Receiver<RawVideoFrame<VideoFrame>>,
        audio_rx: Receiver<RawAudioFrame<AudioFrame>>,
    ) -> SourceQueues {
        SourceQueues {
            video_rx,
            audio_rx,
            video_eof: Arc::clone(&self.video_eof),
            audio_eof: Arc::clone(&self.audio_eof),
            video_in_flight: Arc::clone(&self.video_in_flight),
        }
    }

    /// Pull whatever segments the producer has ready, demux, decode, and
    /// forward to the compositor's input queues. Never blocks.
    fn pump(&mut self, host_tx: &Sender<HostEvent>) {
        self.pump_track(Track::Video, host_tx);
        self.pump_track(Track::Audio, host_tx);
    }

    fn pump_track(&mut self, track: Track, host_tx: &Sender<HostEvent>) {
        loop {
            let record = match track {
                Track::Video => self.video_seg_rx.try_recv(),
                Track::Audio => self.audio_seg_rx.try_recv(),
            };
            match record {
                Ok(record) => {
                    let batches = match track {
                        Track::Video => self.video_demux.append(record),
                        Track::Audio => self.audio_demux.append(record),
                    };
                    match batches {
                        Ok(batches) => {
                            for batch in batches {
                                self.decode_and_forward(track, &batch);
                            }
                            self.maybe_configure_decoder(track, host_tx);
                        }
                        Err(e) => {
                            // Tear down just this track; the sibling track
                            // on the same source continues (spec.md §7).
                            let _ = host_tx.send(HostEvent::Error(e));
                            self.mark_eof(track);
                            return;
                        }
                    }
                }
                Err(crossbeam_channel::TryRecvError::Empty) => return,
                Err(crossbeam_channel::TryRecvError::Disconnected) => {
                    self.flush_track(track);
                    self.mark_eof(track);
                    return;
                }
            }
        }
    }

    fn maybe_configure_decoder(&mut self, track: Track, host_tx: &Sender<HostEvent>) {
        match track {
            Track::Video if self.video_decoder.is_none() => {
                let Some(config) = self.video_demux.config() else { return };
                match VideoDecoderEngine::configure(&config.config_bytes, config.codec_fourcc, Arc::clone(&self.video_in_flight)) {
                    Ok(decoder) => self.video_decoder = Some(decoder),
                    Err(e) => {
                        let _ = host_tx.send(HostEvent::Error(PipelineError::CodecUnsupported {
                            source: self.source,
                            track: Track::Video,
                            message: e.to_string(),
                        }));
                        self.mark_eof(Track::Video);
                    }
                }
            }
            Track::Audio if self.audio_decoder.is_none() => {
                let Some(config) = self.audio_demux.config() else { return };
                // The manifest's declared codec is authoritative for
                // whether this audio track can be decoded at all — the
                // demuxer's own `codec_fourcc` only ever reports AAC-LC.
                match AudioDecoderEngine::configure(&config.config_bytes, &self.audio_codec_fourcc) {
                    Ok(decoder) => self.audio_decoder = Some(decoder),
                    Err(e) => {
                        let _ = host_tx.send(HostEvent::Error(PipelineError::CodecUnsupported {
                            source: self.source,
                            track: Track::Audio,
                            message: e.to_string(),
                        }));
                        self.mark_eof(Track::Audio);
                    }
                }
            }
            _ => {}
        }
    }

    fn decode_and_forward(&mut self, track: Track, batch: &[dualcast_core::chunk::EncodedUnit]) {
        match track {
            Track::Video => {
                let Some(decoder) = &mut self.video_decoder else { return };
                for unit in batch {
                    // No saturation check here: the decoder's in-flight
                    // queue drains as the compositor dequeues frames, and
                    // the only authorized drop point is the video encoder's
                    // own saturation check (spec.md §4.3/§4.4).
                    match decoder.send_unit(unit) {
                        Ok(frames) => send_video_frames(&self.video_out_tx, frames),
                        Err(e) => eprintln!("[pipeline] video decode failed for {:?}: {e}", self.source),
                    }
                }
            }
            Track::Audio => {
                let Some(decoder) = &mut self.audio_decoder else { return };
                for unit in batch {
                    match decoder.send_unit(unit) {
                        Ok(frames) => send_audio_frames(&self.audio_out_tx, frames),
                        Err(e) => eprintln!("[pipeline] audio decode failed for {:?}: {e}", self.source),
                    }
                }
            }
        }
    }

    fn flush_track(&mut self, track: Track) {
        match track {
            Track::Video => {
                let tail = self.video_demux.flush();
                self.decode_and_forward(Track::Video, &tail);
                if let Some(decoder) = &mut self.video_decoder {
                    send_video_frames(&self.video_out_tx, decoder.flush());
                }
            }
            Track::Audio => {
                let tail = self.audio_demux.flush();
                self.decode_and_forward(Track::Audio, &tail);
                if let Some(decoder) = &mut self.audio_decoder {
                    send_audio_frames(&self.audio_out_tx, decoder.flush());
                }
            }
        }
    }

    fn mark_eof(&self, track: Track) {
        match track {
            Track::Video => self.video_eof.store(true, Ordering::Relaxed),
            Track::Audio => self.audio_eof.store(true, Ordering::Relaxed),
        }
    }

    fn stop(&mut self) {
        self.producer.stop();
    }
}

/// Forward decoded video frames to the compositor's input queue, releasing
/// (rather than silently dropping) any frame the channel won't take — a
/// full/disconnected queue is not an authorized drop point (spec.md §4.3),
/// only a sign the compositor has fallen behind or shut down.
fn send_video_frames(tx: &Sender<RawVideoFrame<VideoFrame>>, frames: Vec<RawVideoFrame<VideoFrame>>) {
    for frame in frames {
        if let Err(e) = tx.try_send(frame) {
            match e {
                crossbeam_channel::TrySendError::Full(frame) => frame.release(),
                crossbeam_channel::TrySendError::Disconnected(frame) => frame.release(),
            };
        }
    }
}

fn send_audio_frames(tx: &Sender<RawAudioFrame<AudioFrame>>, frames: Vec<RawAudioFrame<AudioFrame>>) {
    for frame in frames {
        if let Err(e) = tx.try_send(frame) {
            match e {
                crossbeam_channel::TrySendError::Full(frame) => frame.release(),
                crossbeam_channel::TrySendError::Disconnected(frame) => frame.release(),
            };
        }
    }
}

/// The player handle a host holds: send `PlayerCommand`s in, receive
/// `HostEvent`s out. Everything else runs on the cooperative loop thread.
pub struct Player {
    command_tx: Sender<PlayerCommand>,
    abort: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Player {
    /// Spawn the cooperative loop thread. `fetcher`/`manifest_source` are
    /// shared across both sources; `video_sink`/`audio_sink` are the single
    /// pair of MSE-style append targets the compositor feeds once `Load`
    /// fires.
    pub fn spawn<F, M>(
        fetcher: Arc<F>,
        manifest_source: Arc<M>,
        video_sink: Box<dyn PlaybackSink>,
        audio_sink: Box<dyn PlaybackSink>,
    ) -> (Self, Receiver<HostEvent>)
    where
        F: SegmentFetcher,
        M: ManifestSource,
    {
        let (command_tx, command_rx) = bounded::<PlayerCommand>(32);
        let (host_tx, host_rx) = bounded::<HostEvent>(256);
        let abort = Arc::new(AtomicBool::new(false));
        let thread_abort = Arc::clone(&abort);

        let thread = thread::spawn(move || {
            run_loop(command_rx, host_tx, thread_abort, fetcher, manifest_source, video_sink, audio_sink);
        });

        (Self { command_tx, abort, thread: Some(thread) }, host_rx)
    }

    pub fn send(&self, command: PlayerCommand) {
        let _ = self.command_tx.send(command);
    }

    /// A cloneable handle for issuing commands from another thread (e.g. a
    /// host-side scheduler) without holding a reference to `Player` itself.
    pub fn command_sender(&self) -> Sender<PlayerCommand> {
        self.command_tx.clone()
    }

    pub fn destroy(&mut self) {
        self.send(PlayerCommand::Destroy);
        self.abort.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Which source is background once `swapped` is applied — the source the
/// audio switch follows (spec.md glossary: "Swap — exchange of background
/// and PiP sources, which also drives audio-source switching").
fn background_source(swapped: bool) -> SourceId {
    if swapped {
        SourceId::B
    } else {
        SourceId::A
    }
}

fn run_loop<F, M>(
    command_rx: Receiver<PlayerCommand>,
    host_tx: Sender<HostEvent>,
    abort: Arc<AtomicBool>,
    fetcher: Arc<F>,
    manifest_source: Arc<M>,
    video_sink: Box<dyn PlaybackSink>,
    audio_sink: Box<dyn PlaybackSink>,
) where
    F: SegmentFetcher,
    M: ManifestSource,
{
    let geometry = Arc::new(PipGeometry::default());
    let swapped = Arc::new(AtomicBool::new(false));

    let mut pending_sinks = Some((video_sink, audio_sink));
    let mut sources: Option<[SourcePipeline; 2]> = None;
    let mut compositor: Option<Compositor> = None;
    let mut last_frame_at = Instant::now();

    loop {
        if abort.load(Ordering::Relaxed) {
            break;
        }

        while let Ok(command) = command_rx.try_recv() {
            match command {
                PlayerCommand::Load { manifest_url_a, manifest_url_b } => {
                    if sources.is_some() {
                        continue; // idempotent: reject a second load.
                    }
                    let Some((video_sink, audio_sink)) = pending_sinks.take() else { continue };
                    match load(
                        &manifest_url_a,
                        &manifest_url_b,
                        &manifest_source,
                        &fetcher,
                        &host_tx,
                        &geometry,
                        &swapped,
                        video_sink,
                        audio_sink,
                    ) {
                        Some((built_sources, built_compositor)) => {
                            sources = Some(built_sources);
                            compositor = Some(built_compositor);
                        }
                        None => {
                            // Resolution or compositor construction failed;
                            // the error was already surfaced via host_tx.
                            // A second Load attempt is not offered — spec.md
                            // §7 treats load failures as terminal for the run.
                        }
                    }
                }
                PlayerCommand::Destroy => {
                    abort.store(true, Ordering::Relaxed);
                }
                PlayerCommand::SetSwapped(value) => {
                    swapped.store(value, Ordering::Relaxed);
                    if let Some(compositor) = &mut compositor {
                        compositor.set_active_audio(background_source(value));
                    }
                }
                PlayerCommand::SetActiveAudio(source) => {
                    if let Some(compositor) = &mut compositor {
                        compositor.set_active_audio(source);
                    }
                }
                PlayerCommand::SetPipPosition { x, y } => geometry.set_position(x, y),
                PlayerCommand::SetPipSize { w, h } => geometry.set_size(w, h),
            }
        }

        if let Some(pair) = &mut sources {
            for source in pair.iter_mut() {
                source.pump(&host_tx);
            }
        }

        match &mut compositor {
            Some(c) => {
                if last_frame_at.elapsed().as_micros() as i64 < FRAME_PERIOD_US {
                    thread::sleep(Duration::from_millis(EARLY_SLEEP_MS));
                    continue;
                }
                match c.tick() {
                    TickOutcome::Continue => last_frame_at = Instant::now(),
                    TickOutcome::Idle => thread::sleep(Duration::from_millis(IDLE_SLEEP_MS)),
                    TickOutcome::Terminated => break,
                }
            }
            None => thread::sleep(Duration::from_millis(IDLE_SLEEP_MS)),
        }
    }

    if let Some(pair) = &mut sources {
        for source in pair.iter_mut() {
            source.stop();
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn load<F, M>(
    url_a: &str,
    url_b: &str,
    manifest_source: &Arc<M>,
    fetcher: &Arc<F>,
    host_tx: &Sender<HostEvent>,
    geometry: &Arc<PipGeometry>,
    swapped: &Arc<AtomicBool>,
    video_sink: Box<dyn PlaybackSink>,
    audio_sink: Box<dyn PlaybackSink>,
) -> Option<([SourcePipeline; 2], Compositor)>
where
    F: SegmentFetcher,
    M: ManifestSource,
{
    let manifest_a = match manifest_source.resolve(url_a) {
        Ok(m) => m,
        Err(e) => {
            let _ = host_tx.send(HostEvent::Error(PipelineError::NetworkFailure {
                source: SourceId::A,
                track: Track::Video,
                message: e.to_string(),
            }));
            return None;
        }
    };
    let manifest_b = match manifest_source.resolve(url_b) {
        Ok(m) => m,
        Err(e) => {
            let _ = host_tx.send(HostEvent::Error(PipelineError::NetworkFailure {
                source: SourceId::B,
                track: Track::Video,
                message: e.to_string(),
            }));
            return None;
        }
    };

    let (a_video_tx, a_video_rx) = bounded(16);
    let (a_audio_tx, a_audio_rx) = bounded(64);
    let (b_video_tx, b_video_rx) = bounded(16);
    let (b_audio_tx, b_audio_rx) = bounded(64);

    let source_a = SourcePipeline::start(SourceId::A, manifest_a, Arc::clone(fetcher), a_video_tx, a_audio_tx, host_tx.clone());
    let source_b = SourcePipeline::start(SourceId::B, manifest_b, Arc::clone(fetcher), b_video_tx, b_audio_tx, host_tx.clone());

    let queues_a = source_a.queues(a_video_rx, a_audio_rx);
    let queues_b = source_b.queues(b_video_rx, b_audio_rx);

    let compositor = match Compositor::new(
        [queues_a, queues_b],
        Arc::clone(geometry),
        Arc::clone(swapped),
        SourceId::A,
        video_sink,
        audio_sink,
        host_tx.clone(),
    ) {
        Ok(c) => c,
        Err(e) => {
            let _ = host_tx.send(HostEvent::Error(PipelineError::CodecUnsupported {
                source: SourceId::A,
                track: Track::Video,
                message: format!("compositor construction failed: {e}"),
            }));
            return None;
        }
    };

    Some(([source_a, source_b], compositor))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_source_follows_swapped_flag() {
        assert_eq!(background_source(false), SourceId::A);
        assert_eq!(background_source(true), SourceId::B);
    }

    #[test]
    fn send_video_frames_releases_on_full_channel() {
        let (tx, _rx) = bounded::<RawVideoFrame<VideoFrame>>(0);
        let before = dualcast_core::frame::accounting::live_video_frames();
        let frame = RawVideoFrame::new(VideoFrame::empty(), 0);
        send_video_frames(&tx, vec![frame]);
        // The bounded(0) channel can never accept a try_send, so the frame
        // must have been released rather than leaked.
        assert_eq!(dualcast_core::frame::accounting::live_video_frames(), before);
    }

    #[test]
    fn send_audio_frames_releases_on_disconnected_channel() {
        let (tx, rx) = bounded::<RawAudioFrame<AudioFrame>>(1);
        drop(rx);
        let before = dualcast_core::frame::accounting::live_audio_frames();
        let frame = RawAudioFrame::new(AudioFrame::empty(), 0, 0);
        send_audio_frames(&tx, vec![frame]);
        assert_eq!(dualcast_core::frame::accounting::live_audio_frames(), before);
    }
}
