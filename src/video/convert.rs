//! Pixel format conversion
//!
//! Software I420 -> BGRA (BT.601 limited range). Rotated frames are read
//! through the rotated source position of each destination pixel.

use super::frame::{I420Frame, VideoRotation};

#[inline]
fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// BT.601 limited-range YUV to BGRA
#[inline]
fn yuv_to_bgra(y: u8, u: u8, v: u8) -> [u8; 4] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;

    let r = (298 * c + 409 * e + 128) >> 8;
    let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
    let b = (298 * c + 516 * d + 128) >> 8;

    [clamp_u8(b), clamp_u8(g), clamp_u8(r), 255]
}

/// Source pixel shown at display position (`dx`, `dy`) of a clockwise rotation
///
/// `width` and `height` are the source dimensions.
#[inline]
fn source_position(
    rotation: VideoRotation,
    dx: usize,
    dy: usize,
    width: usize,
    height: usize,
) -> (usize, usize) {
    match rotation {
        VideoRotation::Rotate0 => (dx, dy),
        VideoRotation::Rotate90 => (dy, height - 1 - dx),
        VideoRotation::Rotate180 => (width - 1 - dx, height - 1 - dy),
        VideoRotation::Rotate270 => (width - 1 - dy, dx),
    }
}

/// Convert a validated `frame` (rotation applied) into `dst`
///
/// `dst` holds `display_size()` pixels at `dst_stride` bytes per row.
pub(crate) fn write_bgra(frame: &I420Frame, dst: &mut [u8], dst_stride: usize) {
    let (w, h) = (frame.width() as usize, frame.height() as usize);
    let cw = frame.chroma_width() as usize;

    if frame.rotation == VideoRotation::Rotate0 {
        for row in 0..h {
            let y_row = frame.y.row(row, w);
            let u_row = frame.u.row(row / 2, cw);
            let v_row = frame.v.row(row / 2, cw);
            let out = &mut dst[row * dst_stride..row * dst_stride + w * 4];

            for (col, px) in out.chunks_exact_mut(4).enumerate() {
                px.copy_from_slice(&yuv_to_bgra(y_row[col], u_row[col / 2], v_row[col / 2]));
            }
        }
        return;
    }

    let (dw, dh) = frame.display_size();
    let (dw, dh) = (dw as usize, dh as usize);
    let (y_plane, u_plane, v_plane) = (&frame.y, &frame.u, &frame.v);

    for dy in 0..dh {
        let out = &mut dst[dy * dst_stride..dy * dst_stride + dw * 4];
        for (dx, px) in out.chunks_exact_mut(4).enumerate() {
            let (sx, sy) = source_position(frame.rotation, dx, dy, w, h);
            let chroma = (sy / 2) * u_plane.stride + sx / 2;
            let luma = y_plane.data[sy * y_plane.stride + sx];
            let v_chroma = (sy / 2) * v_plane.stride + sx / 2;
            px.copy_from_slice(&yuv_to_bgra(luma, u_plane.data[chroma], v_plane.data[v_chroma]));
        }
    }
}
