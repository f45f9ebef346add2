//! BGRA bitmaps and per-source frame buffers

use super::convert::write_bgra;
use super::frame::I420Frame;

/// Bytes per BGRA pixel
pub const BYTES_PER_PIXEL: usize = 4;

/// Packed 32-bit BGRA image, top-down rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    stride: usize,
    data: Vec<u8>,
}

impl Bitmap {
    /// Opaque black bitmap
    pub fn new(width: u32, height: u32) -> Self {
        let mut bitmap = Self {
            width,
            height,
            stride: width as usize * BYTES_PER_PIXEL,
            data: vec![0u8; width as usize * height as usize * BYTES_PER_PIXEL],
        };
        bitmap.fill([0, 0, 0, 255]);
        bitmap
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per row
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn fill(&mut self, bgra: [u8; 4]) {
        for px in self.data.chunks_exact_mut(BYTES_PER_PIXEL) {
            px.copy_from_slice(&bgra);
        }
    }

    /// Fill a rectangle, clipped to the bitmap
    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, bgra: [u8; 4]) {
        let x_end = x.saturating_add(width).min(self.width);
        let y_end = y.saturating_add(height).min(self.height);
        for row in y..y_end {
            let start = row as usize * self.stride;
            for col in x..x_end {
                let offset = start + col as usize * BYTES_PER_PIXEL;
                self.data[offset..offset + BYTES_PER_PIXEL].copy_from_slice(&bgra);
            }
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = y as usize * self.stride + x as usize * BYTES_PER_PIXEL;
        let mut px = [0u8; 4];
        px.copy_from_slice(&self.data[offset..offset + BYTES_PER_PIXEL]);
        Some(px)
    }

    /// Nearest-neighbour scale of `src` into the given rectangle, clipped
    pub fn blit_scaled(&mut self, src: &Bitmap, x: u32, y: u32, width: u32, height: u32) {
        if width == 0 || height == 0 || src.width == 0 || src.height == 0 {
            return;
        }

        let x_end = x.saturating_add(width).min(self.width);
        let y_end = y.saturating_add(height).min(self.height);
        for dy in y..y_end {
            let sy = ((dy - y) as u64 * src.height as u64 / height as u64) as usize;
            let src_row = sy * src.stride;
            let dst_row = dy as usize * self.stride;
            for dx in x..x_end {
                let sx = ((dx - x) as u64 * src.width as u64 / width as u64) as usize;
                let s = src_row + sx * BYTES_PER_PIXEL;
                let d = dst_row + dx as usize * BYTES_PER_PIXEL;
                self.data[d..d + BYTES_PER_PIXEL].copy_from_slice(&src.data[s..s + BYTES_PER_PIXEL]);
            }
        }
    }
}

/// Latest converted frame of one source
///
/// The backing bitmap is reused while incoming frames keep their size and
/// reallocated exactly once when the size changes.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    bitmap: Option<Bitmap>,
    frames: u64,
    allocations: u64,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Displayed size of the latest frame
    pub fn size(&self) -> Option<(u32, u32)> {
        self.bitmap.as_ref().map(|b| (b.width(), b.height()))
    }

    pub fn bitmap(&self) -> Option<&Bitmap> {
        self.bitmap.as_ref().filter(|_| self.frames > 0)
    }

    /// Frames written so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Times the backing storage was (re)allocated
    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    /// Address of the backing storage
    pub fn data_ptr(&self) -> Option<*const u8> {
        self.bitmap.as_ref().map(|b| b.as_bytes().as_ptr())
    }

    /// Convert a validated `frame` into the buffer. Returns whether storage
    /// was reallocated.
    pub(crate) fn write_frame(&mut self, frame: &I420Frame) -> bool {
        let (width, height) = frame.display_size();
        let reallocated = self.size() != Some((width, height));
        if reallocated {
            self.bitmap = Some(Bitmap::new(width, height));
            self.allocations += 1;
        }

        if let Some(bitmap) = self.bitmap.as_mut() {
            let stride = bitmap.stride();
            write_bgra(frame, bitmap.as_bytes_mut(), stride);
        }
        self.frames += 1;
        reallocated
    }
}
