// crates/dualcast-media/src/decode.rs
//
// Decoder Pair (spec.md §4.3): one video decoder, one audio decoder, per
// source. Configured once from the Demultiplexer's `TrackConfig`, then fed
// `EncodedUnit`s. Output frames are wrapped as `RawVideoFrame`/`RawAudioFrame`
// so release discipline is enforced the same way everywhere downstream.
//
// Built the way the teacher's `LiveDecoder` in `decode.rs` drives a
// `ffmpeg_the_third` decoder context directly, including the same raw
// pointer access to set fields the safe API doesn't expose (there,
// `stream.parameters().as_ptr()`; here, setting `extradata` on a freshly
// built codec context before a fragment has ever produced a full demuxer
// stream to copy parameters from).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::codec::context::Context as CodecContext;
use ffmpeg::codec::Id;

use dualcast_core::chunk::EncodedUnit;
use dualcast_core::constants::VIDEO_DECODER_QUEUE_DEPTH;
use dualcast_core::frame::{RawAudioFrame, RawVideoFrame};

/// Build an `AVCodecContext` for `codec_id` with `extradata` installed,
/// bypassing the normal from-stream-parameters path since an init segment
/// has no demuxer stream of its own to copy from.
unsafe fn context_with_extradata(codec_id: Id, extradata: &[u8]) -> anyhow::Result<CodecContext> {
    let ctx = CodecContext::new();
    let ptr = ctx.as_ptr() as *mut ffmpeg_the_third::ffi::AVCodecContext;
    (*ptr).codec_id = codec_id.into();
    if !extradata.is_empty() {
        let buf = ffmpeg_the_third::ffi::av_mallocz(extradata.len() + ffmpeg_the_third::ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize) as *mut u8;
        anyhow::ensure!(!buf.is_null(), "av_mallocz failed for extradata");
        std::ptr::copy_nonoverlapping(extradata.as_ptr(), buf, extradata.len());
        (*ptr).extradata = buf;
        (*ptr).extradata_size = extradata.len() as i32;
    }
    Ok(ctx)
}

fn codec_id_for_fourcc(fourcc: &str) -> anyhow::Result<Id> {
    match fourcc {
        "avc1" => Ok(Id::H264),
        "hev1" | "hvc1" => Ok(Id::HEVC),
        "mp4a.40.2" => Ok(Id::AAC),
        other => anyhow::bail!("no decoder mapping for codec {other}"),
    }
}

/// Decodes video access units into raw frames, bounded at
/// `VIDEO_DECODER_QUEUE_DEPTH` in-flight (spec.md §4.3) — beyond that,
/// frames are dropped at the *encoder* input (§4.4), never here: the
/// decoder queue drains only as the compositor actually dequeues a frame,
/// so `in_flight` is a handle shared with whoever does that dequeuing
/// rather than a count this engine can update on its own.
pub struct VideoDecoderEngine {
    decoder: ffmpeg::decoder::Video,
    in_flight: Arc<AtomicUsize>,
}

impl VideoDecoderEngine {
    /// `in_flight` is created by the caller up front (before a decoder can
    /// even be configured, since that needs the first segment's config) and
    /// shared into `SourceQueues` so the compositor can decrement it via
    /// [`notify_consumed`] the moment it actually dequeues a frame.
    pub fn configure(config_bytes: &[u8], codec_fourcc: &str, in_flight: Arc<AtomicUsize>) -> anyhow::Result<Self> {
        let codec_id = codec_id_for_fourcc(codec_fourcc)?;
        let ctx = unsafe { context_with_extradata(codec_id, config_bytes)? };
        let decoder = ctx.decoder().video()?;
        Ok(Self { decoder, in_flight })
    }

    pub fn is_saturated(&self) -> bool {
        self.in_flight.load(Ordering::Relaxed) >= VIDEO_DECODER_QUEUE_DEPTH
    }

    /// Feed one encoded access unit, draining every frame FFmpeg is willing
    /// to emit for it. `pts_us` is threaded straight from the unit's own
    /// timestamp rather than re-derived from the decoded frame's internal
    /// pts, since CTS already carries the display-order timestamp the
    /// demuxer computed (spec.md §4.2).
    pub fn send_unit(
        &mut self,
        unit: &EncodedUnit,
    ) -> anyhow::Result<Vec<RawVideoFrame<ffmpeg::util::frame::Video>>> {
        let packet = packet_from_bytes(&unit.bytes, unit.pts_us);
        self.decoder.send_packet(&packet)?;

        let mut out = Vec::new();
        let mut decoded = ffmpeg::util::frame::Video::empty();
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            out.push(RawVideoFrame::new(
                std::mem::replace(&mut decoded, ffmpeg::util::frame::Video::empty()),
                unit.pts_us,
            ));
        }
        self.in_flight.fetch_add(out.len(), Ordering::Relaxed);
        Ok(out)
    }

    pub fn flush(&mut self) -> Vec<RawVideoFrame<ffmpeg::util::frame::Video>> {
        let _ = self.decoder.send_eof();
        let mut out = Vec::new();
        let mut decoded = ffmpeg::util::frame::Video::empty();
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            let pts = decoded.pts().unwrap_or(0);
            out.push(RawVideoFrame::new(
                std::mem::replace(&mut decoded, ffmpeg::util::frame::Video::empty()),
                pts,
            ));
        }
        out
    }
}

/// Decodes audio access units into raw PCM frames. Unlike video, the audio
/// decoder has no separate back-pressure policy in spec.md §4.3 — overflow
/// is handled entirely by `AudioRing` eviction downstream.
pub struct AudioDecoderEngine {
    decoder: ffmpeg::decoder::Audio,
}

impl AudioDecoderEngine {
    pub fn configure(config_bytes: &[u8], codec_fourcc: &str) -> anyhow::Result<Self> {
        let codec_id = codec_id_for_fourcc(codec_fourcc)?;
        let ctx = unsafe { context_with_extradata(codec_id, config_bytes)? };
        let decoder = ctx.decoder().audio()?;
        Ok(Self { decoder })
    }

    pub fn send_unit(
        &mut self,
        unit: &EncodedUnit,
    ) -> anyhow::Result<Vec<RawAudioFrame<ffmpeg::util::frame::Audio>>> {
        let packet = packet_from_bytes(&unit.bytes, unit.pts_us);
        self.decoder.send_packet(&packet)?;

        let mut out = Vec::new();
        let mut decoded = ffmpeg::util::frame::Audio::empty();
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            out.push(RawAudioFrame::new(
                std::mem::replace(&mut decoded, ffmpeg::util::frame::Audio::empty()),
                unit.pts_us,
                unit.duration_us,
            ));
        }
        Ok(out)
    }

    pub fn flush(&mut self) -> Vec<RawAudioFrame<ffmpeg::util::frame::Audio>> {
        let _ = self.decoder.send_eof();
        let mut out = Vec::new();
        let mut decoded = ffmpeg::util::frame::Audio::empty();
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            out.push(RawAudioFrame::new(
                std::mem::replace(&mut decoded, ffmpeg::util::frame::Audio::empty()),
                0,
                0,
            ));
        }
        out
    }
}

fn packet_from_bytes(bytes: &[u8], pts_us: i64) -> ffmpeg::codec::packet::Packet {
    let mut packet = ffmpeg::codec::packet::Packet::copy(bytes);
    packet.set_pts(Some(pts_us));
    packet.set_dts(Some(pts_us));
    packet
}

/// Record that `n` decoded video frames have actually been dequeued
/// downstream. Called from the compositor's tick, not the decode path, so
/// `VideoDecoderEngine::is_saturated` reflects real backlog rather than a
/// count that rises and falls within a single `send_unit` call.
pub fn notify_consumed(counter: &AtomicUsize, n: usize) {
    let mut current = counter.load(Ordering::Relaxed);
    loop {
        let next = current.saturating_sub(n);
        match counter.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return,
            Err(observed) => current = observed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_id_maps_known_fourccs() {
        assert!(matches!(codec_id_for_fourcc("avc1"), Ok(Id::H264)));
        assert!(matches!(codec_id_for_fourcc("hev1"), Ok(Id::HEVC)));
        assert!(matches!(codec_id_for_fourcc("hvc1"), Ok(Id::HEVC)));
        assert!(matches!(codec_id_for_fourcc("mp4a.40.2"), Ok(Id::AAC)));
    }

    #[test]
    fn codec_id_rejects_declared_but_unsupported_fourcc() {
        // spec.md §8 scenario 6: the manifest's own declared fourcc, not the
        // demuxer's always-AAC-LC-reported one, decides decodability.
        assert!(codec_id_for_fourcc("mp4a.40.34").is_err());
    }

    #[test]
    fn notify_consumed_decrements_shared_counter() {
        let counter = AtomicUsize::new(3);
        notify_consumed(&counter, 2);
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn notify_consumed_never_underflows() {
        let counter = AtomicUsize::new(1);
        notify_consumed(&counter, 5);
        assert_eq!(counter.load(Ordering::Relaxed), 0);
    }
}
