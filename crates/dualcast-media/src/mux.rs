// crates/dualcast-media/src/mux.rs
//
// Streaming WebM/Matroska muxer for one elementary stream (spec.md §4.5):
// two independent instances exist per run, one for the VP8 video track and
// one for the Opus audio track. No crate in this stack exposes a
// "write-to-growable-memory, flush on demand" muxer — libavformat itself
// does, through the `avio_open_dyn_buf`/`avio_close_dyn_buf` dynamic-buffer
// AVIOContext. Dropping to raw FFI for the one thing the safe wrapper
// doesn't cover is exactly the move the teacher makes in `encode.rs` for
// `avcodec_parameters_from_context` — this just leans on it for the whole
// output context instead of one field.

use std::ffi::CString;

use ffmpeg_the_third::ffi as av;
use ffmpeg_the_third::{codec::Id as CodecId, Packet};

use dualcast_core::chunk::{ContainerChunk, EncodedChunk};
use dualcast_core::ids::Track;

/// One streaming muxer instance. `recreate()` is the switch protocol's way
/// of getting a fresh Matroska timeline without backward-timestamp rejection
/// (spec.md §4.4) — it simply drops this and builds a new one.
pub struct ContainerMuxer {
    ctx: *mut av::AVFormatContext,
    track: Track,
    header_written: bool,
    next_packet_index: i64,
}

unsafe impl Send for ContainerMuxer {}

impl ContainerMuxer {
    pub fn new_video(width: u32, height: u32) -> anyhow::Result<Self> {
        Self::new(Track::Video, CodecId::VP8, |par| unsafe {
            (*par).codec_type = av::AVMediaType::AVMEDIA_TYPE_VIDEO;
            (*par).width = width as i32;
            (*par).height = height as i32;
        })
    }

    pub fn new_audio(sample_rate: u32, channels: u16) -> anyhow::Result<Self> {
        Self::new(Track::Audio, CodecId::Opus, |par| unsafe {
            (*par).codec_type = av::AVMediaType::AVMEDIA_TYPE_AUDIO;
            (*par).sample_rate = sample_rate as i32;
            av::av_channel_layout_default(&mut (*par).ch_layout, channels as i32);
        })
    }

    fn new(track: Track, codec_id: CodecId, configure: impl FnOnce(*mut av::AVCodecParameters)) -> anyhow::Result<Self> {
        unsafe {
            let webm = CString::new("webm").unwrap();
            let mut ctx: *mut av::AVFormatContext = std::ptr::null_mut();
            let ret = av::avformat_alloc_output_context2(
                &mut ctx,
                std::ptr::null_mut(),
                webm.as_ptr(),
                std::ptr::null(),
            );
            anyhow::ensure!(ret >= 0 && !ctx.is_null(), "avformat_alloc_output_context2 failed: {ret}");

            let stream = av::avformat_new_stream(ctx, std::ptr::null());
            anyhow::ensure!(!stream.is_null(), "avformat_new_stream failed");
            (*(*stream).codecpar).codec_id = codec_id.into();
            configure((*stream).codecpar);

            let mut muxer = Self { ctx, track, header_written: false, next_packet_index: 0 };
            muxer.open_dyn_buf()?;
            Ok(muxer)
        }
    }

    /// Point `AVFormatContext.pb` at a fresh in-memory dynamic buffer. Called
    /// once at construction and again after every `flush_chunk`.
    fn open_dyn_buf(&mut self) -> anyhow::Result<()> {
        unsafe {
            let mut pb: *mut av::AVIOContext = std::ptr::null_mut();
            let ret = av::avio_open_dyn_buf(&mut pb);
            anyhow::ensure!(ret >= 0, "avio_open_dyn_buf failed: {ret}");
            (*self.ctx).pb = pb;
        }
        Ok(())
    }

    /// Write one encoded chunk's bytes as a packet on this muxer's sole
    /// stream, writing the Matroska header first if this is the first call
    /// since construction or recreation.
    pub fn write_chunk(&mut self, chunk: &EncodedChunk) -> anyhow::Result<()> {
        unsafe {
            if !self.header_written {
                let ret = av::avformat_write_header(self.ctx, std::ptr::null_mut());
                anyhow::ensure!(ret >= 0, "avformat_write_header failed: {ret}");
                self.header_written = true;
            }

            let mut packet = Packet::copy(&chunk.bytes);
            packet.set_stream(0);
            packet.set_pts(Some(chunk.pts_us));
            packet.set_dts(Some(chunk.pts_us));
            if chunk.is_keyframe {
                packet.set_flags(ffmpeg_the_third::codec::packet::Flags::KEY);
            }

            let ret = av::av_interleaved_write_frame(self.ctx, packet.as_mut_ptr());
            anyhow::ensure!(ret >= 0, "av_interleaved_write_frame failed: {ret}");
            self.next_packet_index += 1;
        }
        Ok(())
    }

    /// Drain whatever Matroska bytes have accumulated in the dynamic buffer
    /// since the last flush, handing them out as one `ContainerChunk`, then
    /// reopen a fresh dynamic buffer so the next `write_chunk` keeps
    /// appending instead of starting a new file.
    pub fn flush_chunk(&mut self) -> anyhow::Result<Option<ContainerChunk>> {
        unsafe {
            av::avio_flush((*self.ctx).pb);
            let mut buf: *mut u8 = std::ptr::null_mut();
            let size = av::avio_close_dyn_buf((*self.ctx).pb, &mut buf);
            (*self.ctx).pb = std::ptr::null_mut();

            let chunk = if size > 0 && !buf.is_null() {
                let bytes = std::slice::from_raw_parts(buf, size as usize).to_vec();
                Some(ContainerChunk { bytes })
            } else {
                None
            };
            if !buf.is_null() {
                av::av_free(buf as *mut std::ffi::c_void);
            }

            self.open_dyn_buf()?;
            Ok(chunk)
        }
    }

    /// Finalize the Matroska trailer and return any trailing bytes. Called
    /// on EOF/abort teardown — errors are swallowed per spec.md §5's
    /// "finalize muxers (ignoring errors)".
    pub fn finalize(&mut self) -> Option<ContainerChunk> {
        unsafe {
            if self.header_written {
                let _ = av::av_write_trailer(self.ctx);
            }
        }
        self.flush_chunk().ok().flatten()
    }

    pub fn track(&self) -> Track {
        self.track
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_chunk(pts_us: i64, is_keyframe: bool) -> EncodedChunk {
        EncodedChunk { is_keyframe, pts_us, bytes: vec![0u8; 32] }
    }

    #[test]
    fn video_muxer_reports_its_track() {
        let muxer = ContainerMuxer::new_video(640, 480).expect("video muxer construction");
        assert_eq!(muxer.track(), Track::Video);
    }

    #[test]
    fn audio_muxer_reports_its_track() {
        let muxer = ContainerMuxer::new_audio(48_000, 2).expect("audio muxer construction");
        assert_eq!(muxer.track(), Track::Audio);
    }

    #[test]
    fn video_muxer_produces_a_chunk_after_first_write() {
        let mut muxer = ContainerMuxer::new_video(640, 480).expect("video muxer construction");
        muxer.write_chunk(&fake_chunk(0, true)).expect("write_chunk");
        let chunk = muxer.flush_chunk().expect("flush_chunk");
        assert!(chunk.is_some(), "header + first packet should yield non-empty bytes");
        assert!(!chunk.unwrap().bytes.is_empty());
    }

    #[test]
    fn flush_chunk_without_any_writes_is_none() {
        let mut muxer = ContainerMuxer::new_audio(48_000, 2).expect("audio muxer construction");
        let chunk = muxer.flush_chunk().expect("flush_chunk");
        assert!(chunk.is_none(), "no header written yet, nothing to drain");
    }

    #[test]
    fn finalize_without_any_writes_does_not_panic() {
        let mut muxer = ContainerMuxer::new_video(640, 480).expect("video muxer construction");
        let _ = muxer.finalize();
    }
}

impl Drop for ContainerMuxer {
    fn drop(&mut self) {
        unsafe {
            if !self.ctx.is_null() {
                if !(*self.ctx).pb.is_null() {
                    let mut buf: *mut u8 = std::ptr::null_mut();
                    av::avio_close_dyn_buf((*self.ctx).pb, &mut buf);
                    if !buf.is_null() {
                        av::av_free(buf as *mut std::ffi::c_void);
                    }
                }
                av::avformat_free_context(self.ctx);
            }
        }
    }
}
