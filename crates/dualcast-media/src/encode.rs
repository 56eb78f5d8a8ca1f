// crates/dualcast-media/src/encode.rs
//
// Compositor re-encoders (spec.md §4.4): VP8 video at 640x480/2Mbps/30fps
// with a forced keyframe every `KEYFRAME_INTERVAL_FRAMES`, and Opus audio at
// 48kHz/2ch/128kbps fed from a FLTP sample FIFO. Generalizes the teacher's
// `encode.rs` H.264+AAC encoder setup and its `AudioFifo`/`AudioEncState`
// pair down to codecs this spec actually needs, with the in-flight-queue
// accounting the teacher's one-shot export never needed (there's no sink to
// saturate on a finite local MP4 export; here the video encoder must be
// able to report saturation so the compositor can drop a frame instead of
// blocking).

use ffmpeg_the_third as ffmpeg;
use ffmpeg::codec::{self, Id as CodecId};
use ffmpeg::encoder;
use ffmpeg::format::sample::Type as SampleType;
use ffmpeg::format::{Pixel, Sample};
use ffmpeg::util::channel_layout::ChannelLayoutMask;
use ffmpeg::util::frame::Audio as AudioFrame;
use ffmpeg::util::frame::Video as VideoFrame;
use ffmpeg::util::rational::Rational;
use ffmpeg::Packet;

use dualcast_core::chunk::EncodedChunk;
use dualcast_core::constants::{
    AUDIO_BITRATE_BPS, AUDIO_CHANNELS, AUDIO_GRAIN_US, AUDIO_SAMPLE_RATE_HZ, KEYFRAME_INTERVAL_FRAMES,
    TARGET_FPS, VIDEO_BITRATE_BPS, VIDEO_ENCODER_QUEUE_DEPTH,
};
use dualcast_core::frame::RawVideoFrame;

/// VP8 encoder for the composited canvas. Tracks its own in-flight count so
/// the compositor can ask `is_saturated()` before submitting rather than
/// discover saturation only after a failed send.
pub struct VideoEncoderEngine {
    encoder: ffmpeg::encoder::Video,
    in_flight: usize,
    frame_index: u64,
}

impl VideoEncoderEngine {
    pub fn new(width: u32, height: u32) -> anyhow::Result<Self> {
        let vp8 = encoder::find(CodecId::VP8).ok_or_else(|| anyhow::anyhow!("VP8 encoder not found"))?;
        let ctx = codec::context::Context::new_with_codec(vp8);
        let mut enc = ctx.encoder().video()?;

        let tb = Rational::new(1, TARGET_FPS as i32);
        enc.set_width(width);
        enc.set_height(height);
        enc.set_format(Pixel::YUV420P);
        enc.set_time_base(tb);
        enc.set_frame_rate(Some(Rational::new(TARGET_FPS as i32, 1)));
        enc.set_bit_rate(VIDEO_BITRATE_BPS as usize);
        enc.set_gop(KEYFRAME_INTERVAL_FRAMES as u32);

        let encoder = enc.open_as(vp8)?;
        Ok(Self { encoder, in_flight: 0, frame_index: 0 })
    }

    pub fn is_saturated(&self) -> bool {
        self.in_flight >= VIDEO_ENCODER_QUEUE_DEPTH
    }

    /// Submit one composited frame, releasing it either way. Returns the
    /// packets the encoder was willing to emit immediately.
    pub fn submit(&mut self, composite: RawVideoFrame<VideoFrame>) -> anyhow::Result<Vec<EncodedChunk>> {
        let pts = self.frame_index as i64 * 1_000_000 / TARGET_FPS as i64;
        let mut frame = composite.release();
        frame.set_pts(Some(self.frame_index as i64));
        self.frame_index += 1;

        self.encoder.send_frame(&frame)?;
        self.in_flight += 1;

        let mut out = self.drain_packets()?;
        // Stamp our own microsecond pts (frame_index * 1_000_000 / 30) rather
        // than relying on rescaling the encoder's 1/30 timebase — spec.md
        // §4.4 step 5 states the formula directly.
        if let Some(last) = out.last_mut() {
            last.pts_us = pts;
        }
        Ok(std::mem::take(&mut out))
    }

    fn drain_packets(&mut self) -> anyhow::Result<Vec<EncodedChunk>> {
        let mut out = Vec::new();
        let mut pkt = Packet::empty();
        while self.encoder.receive_packet(&mut pkt).is_ok() {
            self.in_flight = self.in_flight.saturating_sub(1);
            out.push(EncodedChunk {
                is_keyframe: pkt.is_key(),
                pts_us: pkt.pts().unwrap_or(0),
                bytes: pkt.data().unwrap_or(&[]).to_vec(),
            });
        }
        Ok(out)
    }

    pub fn flush(&mut self) -> anyhow::Result<Vec<EncodedChunk>> {
        self.encoder.send_eof()?;
        self.drain_packets()
    }
}

/// Stereo FLTP sample FIFO feeding the Opus encoder in fixed 20ms grains —
/// same shape as the teacher's `AudioFifo`, generalized from an `n`-sample
/// AAC frame pop to the spec's fixed `AUDIO_GRAIN_US` Opus frame.
struct AudioFifo {
    left: Vec<f32>,
    right: Vec<f32>,
}

impl AudioFifo {
    fn new() -> Self {
        Self { left: Vec::new(), right: Vec::new() }
    }

    fn len(&self) -> usize {
        self.left.len()
    }

    fn push(&mut self, frame: &AudioFrame) {
        let n = frame.samples();
        if n == 0 {
            return;
        }
        unsafe {
            let l_bytes = frame.data(0);
            let l = std::slice::from_raw_parts(l_bytes.as_ptr() as *const f32, n);
            self.left.extend_from_slice(l);

            let r_bytes = if frame.ch_layout().channels() >= 2 { frame.data(1) } else { frame.data(0) };
            let r = std::slice::from_raw_parts(r_bytes.as_ptr() as *const f32, n);
            self.right.extend_from_slice(r);
        }
    }

    fn pop_frame(&mut self, n: usize, pts: i64) -> AudioFrame {
        let available = self.left.len().min(n);
        let mut frame = AudioFrame::new(Sample::F32(SampleType::Planar), n, ChannelLayoutMask::STEREO);
        frame.set_rate(AUDIO_SAMPLE_RATE_HZ);
        frame.set_pts(Some(pts));

        unsafe {
            let ldst = std::slice::from_raw_parts_mut(frame.data_mut(0).as_mut_ptr() as *mut f32, n);
            ldst[..available].copy_from_slice(&self.left[..available]);
            if available < n {
                ldst[available..].fill(0.0);
            }
            let rdst = std::slice::from_raw_parts_mut(frame.data_mut(1).as_mut_ptr() as *mut f32, n);
            rdst[..available].copy_from_slice(&self.right[..available]);
            if available < n {
                rdst[available..].fill(0.0);
            }
        }

        self.left.drain(..available);
        self.right.drain(..available);
        frame
    }
}

/// Opus encoder driving the active source's audio into 20ms key frames
/// (spec.md §4.4). PTS is supplied by the caller (the switch protocol's
/// `last_emitted_pts_us`) rather than derived from a sample counter, since
/// pts must rebase exactly on a source switch.
pub struct AudioEncoderEngine {
    encoder: ffmpeg::encoder::Audio,
    fifo: AudioFifo,
    grain_samples: usize,
}

impl AudioEncoderEngine {
    pub fn new() -> anyhow::Result<Self> {
        let opus = encoder::find(CodecId::Opus).ok_or_else(|| anyhow::anyhow!("Opus encoder not found"))?;
        let ctx = codec::context::Context::new_with_codec(opus);
        let mut enc = ctx.encoder().audio()?;

        enc.set_rate(AUDIO_SAMPLE_RATE_HZ as i32);
        enc.set_ch_layout(ffmpeg::util::channel_layout::ChannelLayout::STEREO);
        enc.set_format(Sample::F32(SampleType::Planar));
        enc.set_bit_rate(AUDIO_BITRATE_BPS as usize);

        let encoder = enc.open_as(opus)?;
        let grain_samples = (AUDIO_SAMPLE_RATE_HZ as i64 * AUDIO_GRAIN_US / 1_000_000) as usize;
        debug_assert_eq!(AUDIO_CHANNELS, 2, "fifo layout assumes stereo");

        Ok(Self { encoder, fifo: AudioFifo::new(), grain_samples })
    }

    /// Push one decoded PCM frame into the FIFO; the caller releases the
    /// handle immediately after this call (it's been copied out).
    pub fn push(&mut self, pcm: &AudioFrame) {
        self.fifo.push(pcm);
    }

    /// Encode every full 20ms grain currently buffered, stamping each with
    /// `next_pts_us` and advancing it by `AUDIO_GRAIN_US` — the exact
    /// sequence the audio switch protocol needs to stay strictly monotonic.
    pub fn drain_ready(&mut self, next_pts_us: &mut i64) -> anyhow::Result<Vec<EncodedChunk>> {
        let mut out = Vec::new();
        while self.fifo.len() >= self.grain_samples {
            let frame = self.fifo.pop_frame(self.grain_samples, *next_pts_us);
            self.encoder.send_frame(&frame)?;
            *next_pts_us += AUDIO_GRAIN_US;
            out.extend(self.drain_packets()?);
        }
        Ok(out)
    }

    fn drain_packets(&mut self) -> anyhow::Result<Vec<EncodedChunk>> {
        let mut out = Vec::new();
        let mut pkt = Packet::empty();
        while self.encoder.receive_packet(&mut pkt).is_ok() {
            out.push(EncodedChunk {
                is_keyframe: true,
                pts_us: pkt.pts().unwrap_or(0),
                bytes: pkt.data().unwrap_or(&[]).to_vec(),
            });
        }
        Ok(out)
    }

    pub fn flush(&mut self) -> anyhow::Result<Vec<EncodedChunk>> {
        self.encoder.send_eof()?;
        self.drain_packets()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grain_samples_matches_20ms_at_48khz() {
        let grain = (AUDIO_SAMPLE_RATE_HZ as i64 * AUDIO_GRAIN_US / 1_000_000) as usize;
        assert_eq!(grain, 960);
    }
}
