//! Decoded video frame (planar I420)

use bytes::Bytes;

use crate::error::RenderFailure;

/// Clockwise rotation to apply before display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoRotation {
    #[default]
    Rotate0,
    Rotate90,
    Rotate180,
    Rotate270,
}

impl VideoRotation {
    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees % 360 {
            0 => Some(Self::Rotate0),
            90 => Some(Self::Rotate90),
            180 => Some(Self::Rotate180),
            270 => Some(Self::Rotate270),
            _ => None,
        }
    }

    pub fn degrees(&self) -> u32 {
        match self {
            Self::Rotate0 => 0,
            Self::Rotate90 => 90,
            Self::Rotate180 => 180,
            Self::Rotate270 => 270,
        }
    }

    /// Width and height trade places
    pub fn swaps_dimensions(&self) -> bool {
        matches!(self, Self::Rotate90 | Self::Rotate270)
    }
}

/// One plane of an I420 frame
#[derive(Debug, Clone)]
pub struct Plane {
    pub data: Bytes,
    /// Bytes per row
    pub stride: usize,
}

impl Plane {
    pub fn new(data: impl Into<Bytes>, stride: usize) -> Self {
        Self {
            data: data.into(),
            stride,
        }
    }

    /// Row `y`, `width` bytes long. Caller has validated the plane.
    pub(crate) fn row(&self, y: usize, width: usize) -> &[u8] {
        let start = y * self.stride;
        &self.data[start..start + width]
    }
}

/// Planar 4:2:0 frame: full-size luma, half-size chroma
#[derive(Debug, Clone)]
pub struct I420Frame {
    width: u32,
    height: u32,
    pub y: Plane,
    pub u: Plane,
    pub v: Plane,
    pub rotation: VideoRotation,
}

impl I420Frame {
    pub fn new(width: u32, height: u32, y: Plane, u: Plane, v: Plane) -> Self {
        Self {
            width,
            height,
            y,
            u,
            v,
            rotation: VideoRotation::Rotate0,
        }
    }

    /// Uniformly coloured frame
    pub fn filled(width: u32, height: u32, y: u8, u: u8, v: u8) -> Self {
        let (w, h) = (width as usize, height as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        Self::new(
            width,
            height,
            Plane::new(vec![y; w * h], w),
            Plane::new(vec![u; cw * ch], cw),
            Plane::new(vec![v; cw * ch], cw),
        )
    }

    pub fn with_rotation(mut self, rotation: VideoRotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn chroma_width(&self) -> u32 {
        self.width.div_ceil(2)
    }

    pub fn chroma_height(&self) -> u32 {
        self.height.div_ceil(2)
    }

    /// Size after rotation
    pub fn display_size(&self) -> (u32, u32) {
        if self.rotation.swaps_dimensions() {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }

    /// Reject zero-sized frames and planes too short for their strides
    pub fn validate(&self) -> Result<(), RenderFailure> {
        let invalid = |detail: String| RenderFailure::InvalidFrameDimensions {
            width: self.width,
            height: self.height,
            detail,
        };

        if self.width == 0 || self.height == 0 {
            return Err(invalid("zero-sized frame".to_string()));
        }

        let planes = [
            ("y", &self.y, self.width as usize, self.height as usize),
            ("u", &self.u, self.chroma_width() as usize, self.chroma_height() as usize),
            ("v", &self.v, self.chroma_width() as usize, self.chroma_height() as usize),
        ];
        for (name, plane, width, rows) in planes {
            if plane.stride < width {
                return Err(invalid(format!(
                    "{} stride {} below plane width {}",
                    name, plane.stride, width
                )));
            }
            let needed = plane.stride * (rows - 1) + width;
            if plane.data.len() < needed {
                return Err(invalid(format!(
                    "{} plane has {} bytes, need {}",
                    name,
                    plane.data.len(),
                    needed
                )));
            }
        }

        Ok(())
    }
}
