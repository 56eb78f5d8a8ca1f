// crates/dualcast-media/src/canvas.rs
//
// Off-screen compositing surface for the Compositor tick (spec.md §4.4):
// packed YUV420P background + inset PiP + chrome (border, resize handle).
// Generalizes the teacher's `helpers/yuv.rs` extract/blend/write trio —
// there it exists to alpha-blend two same-sized frames for a crossfade
// transition; here the same packed-buffer approach draws one frame at full
// size and a second, rescaled, into an inset rectangle.

use ffmpeg_the_third as ffmpeg;
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags};
use ffmpeg::util::format::Pixel;
use ffmpeg::util::frame::Video as VideoFrame;

use dualcast_core::geometry::PipRect;

const WHITE_Y: u8 = 235;
const WHITE_UV: u8 = 128;
const HANDLE_ALPHA: f32 = 0.6;

/// A packed (stride-free) YUV420P canvas: `Y ++ U ++ V`, planes sized
/// `w*h`, `(w/2)*(h/2)`, `(w/2)*(h/2)` — same layout `extract_yuv`/
/// `write_yuv` use, just owned instead of borrowed from a `VideoFrame`.
pub struct Canvas {
    width: usize,
    height: usize,
    y: Vec<u8>,
    u: Vec<u8>,
    v: Vec<u8>,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        let (w, h) = (width as usize, height as usize);
        let (uv_w, uv_h) = (w / 2, h / 2);
        Self {
            width: w,
            height: h,
            y: vec![16u8; w * h],
            u: vec![128u8; uv_w * uv_h],
            v: vec![128u8; uv_w * uv_h],
        }
    }

    pub fn width(&self) -> u32 {
        self.width as u32
    }

    pub fn height(&self) -> u32 {
        self.height as u32
    }

    fn uv_dims(&self) -> (usize, usize) {
        (self.width / 2, self.height / 2)
    }

    /// Draw `frame` (already at canvas resolution) covering the entire
    /// canvas — the background layer of the tick procedure.
    pub fn draw_background(&mut self, frame: &VideoFrame) -> anyhow::Result<()> {
        self.blit(frame, 0, 0, self.width as u32, self.height as u32)
    }

    /// Rescale `frame` to `rect`'s dimensions and draw it at `rect`'s
    /// position — the PiP layer.
    pub fn draw_pip(&mut self, frame: &VideoFrame, rect: PipRect) -> anyhow::Result<()> {
        let mut scaler = SwsContext::get(
            frame.format(),
            frame.width(),
            frame.height(),
            Pixel::YUV420P,
            rect.w,
            rect.h,
            Flags::BILINEAR,
        )?;
        let mut scaled = VideoFrame::empty();
        scaler.run(frame, &mut scaled)?;
        self.blit(&scaled, rect.x as i32, rect.y as i32, rect.w, rect.h)
    }

    /// Blit a YUV420P frame already sized `(w, h)` into the canvas at
    /// `(dst_x, dst_y)`, clipping at the canvas edge.
    fn blit(&mut self, frame: &VideoFrame, dst_x: i32, dst_y: i32, w: u32, h: u32) -> anyhow::Result<()> {
        anyhow::ensure!(frame.format() == Pixel::YUV420P, "canvas blit requires YUV420P input");

        let y_stride = frame.stride(0);
        let y_src = frame.data(0);
        for row in 0..h as i32 {
            let cy = dst_y + row;
            if cy < 0 || cy as usize >= self.height {
                continue;
            }
            for col in 0..w as i32 {
                let cx = dst_x + col;
                if cx < 0 || cx as usize >= self.width {
                    continue;
                }
                self.y[cy as usize * self.width + cx as usize] =
                    y_src[row as usize * y_stride + col as usize];
            }
        }

        let (uv_w, uv_h) = (w / 2, h / 2);
        let (canvas_uv_w, canvas_uv_h) = self.uv_dims();
        for (plane_idx, plane) in [1, 2].into_iter().enumerate() {
            let stride = frame.stride(plane);
            let src = frame.data(plane);
            let dst = if plane_idx == 0 { &mut self.u } else { &mut self.v };
            for row in 0..uv_h as i32 {
                let cy = dst_y / 2 + row;
                if cy < 0 || cy as usize >= canvas_uv_h {
                    continue;
                }
                for col in 0..uv_w as i32 {
                    let cx = dst_x / 2 + col;
                    if cx < 0 || cx as usize >= canvas_uv_w {
                        continue;
                    }
                    dst[cy as usize * canvas_uv_w + cx as usize] = src[row as usize * stride + col as usize];
                }
            }
        }

        Ok(())
    }

    /// Stroke a 2 px white rectangle around `rect`, offset -1/size +2 (spec.md
    /// §4.4's PiP border chrome).
    pub fn stroke_border(&mut self, rect: PipRect) {
        let x0 = rect.x as i32 - 1;
        let y0 = rect.y as i32 - 1;
        let x1 = rect.x as i32 + rect.w as i32 + 1;
        let y1 = rect.y as i32 + rect.h as i32 + 1;

        for x in x0..=x1 {
            self.set_white_px(x, y0);
            self.set_white_px(x, y0 + 1);
            self.set_white_px(x, y1 - 1);
            self.set_white_px(x, y1);
        }
        for y in y0..=y1 {
            self.set_white_px(x0, y);
            self.set_white_px(x0 + 1, y);
            self.set_white_px(x1 - 1, y);
            self.set_white_px(x1, y);
        }
    }

    /// Fill the `RESIZE_HANDLE_SIZE`-square resize affordance at the PiP's
    /// bottom-right corner, blended semi-opaque over whatever is already
    /// drawn there.
    pub fn fill_resize_handle(&mut self, rect: PipRect, handle_size: u32) {
        let x0 = rect.x as i32 + rect.w as i32 - handle_size as i32;
        let y0 = rect.y as i32 + rect.h as i32 - handle_size as i32;
        for dy in 0..handle_size as i32 {
            for dx in 0..handle_size as i32 {
                self.blend_white_px(x0 + dx, y0 + dy, HANDLE_ALPHA);
            }
        }
    }

    fn set_white_px(&mut self, x: i32, y: i32) {
        self.blend_white_px(x, y, 1.0);
    }

    fn blend_white_px(&mut self, x: i32, y: i32, alpha: f32) {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return;
        }
        let idx = y as usize * self.width + x as usize;
        self.y[idx] = blend(self.y[idx], WHITE_Y, alpha);

        let (uv_w, uv_h) = self.uv_dims();
        let (ux, uy) = (x as usize / 2, y as usize / 2);
        if ux < uv_w && uy < uv_h {
            let uv_idx = uy * uv_w + ux;
            self.u[uv_idx] = blend(self.u[uv_idx], WHITE_UV, alpha);
            self.v[uv_idx] = blend(self.v[uv_idx], WHITE_UV, alpha);
        }
    }

    /// Pack into a fresh `VideoFrame` (YUV420P, canvas dimensions) for
    /// submission to the video encoder.
    pub fn into_frame(&self) -> anyhow::Result<VideoFrame> {
        let mut frame = VideoFrame::new(Pixel::YUV420P, self.width as u32, self.height as u32);
        let (uv_w, uv_h) = self.uv_dims();

        let y_stride = frame.stride(0);
        let y_dst = frame.data_mut(0);
        for row in 0..self.height {
            y_dst[row * y_stride..row * y_stride + self.width]
                .copy_from_slice(&self.y[row * self.width..row * self.width + self.width]);
        }

        for (plane, src) in [(1usize, &self.u), (2usize, &self.v)] {
            let stride = frame.stride(plane);
            let dst = frame.data_mut(plane);
            for row in 0..uv_h {
                dst[row * stride..row * stride + uv_w].copy_from_slice(&src[row * uv_w..row * uv_w + uv_w]);
            }
        }

        Ok(frame)
    }
}

fn blend(existing: u8, overlay: u8, alpha: f32) -> u8 {
    ((1.0 - alpha) * existing as f32 + alpha * overlay as f32).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_canvas_is_black() {
        let canvas = Canvas::new(640, 480);
        assert!(canvas.y.iter().all(|&px| px == 16));
        assert!(canvas.u.iter().all(|&px| px == 128));
    }

    #[test]
    fn resize_handle_lightens_pixels_without_full_white() {
        let mut canvas = Canvas::new(640, 480);
        let rect = PipRect { x: 400, y: 300, w: 200, h: 150 };
        canvas.fill_resize_handle(rect, 15);
        let idx = (rect.y as usize + rect.h as usize - 1) * canvas.width + (rect.x as usize + rect.w as usize - 1);
        assert!(canvas.y[idx] > 16 && canvas.y[idx] < WHITE_Y);
    }

    #[test]
    fn border_stroke_stays_in_bounds_at_canvas_edge() {
        let mut canvas = Canvas::new(640, 480);
        let rect = PipRect { x: 0, y: 0, w: 80, h: 80 };
        // Should not panic even though the -1 offset goes off-canvas.
        canvas.stroke_border(rect);
    }
}
