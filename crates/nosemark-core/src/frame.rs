//! Frame types and pixel operations: quarter-turn rotation, luminance
//! conversion, marker drawing.

use crate::types::{Point, Rect};
use image::{GrayImage, Luma, RgbaImage};
use serde::{Deserialize, Serialize};

const RGBA_CHANNELS: usize = 4;

// Fixed-point BT.601 luma weights, 14 fractional bits.
const LUMA_R: u32 = 4899;
const LUMA_G: u32 = 9617;
const LUMA_B: u32 = 1868;
const LUMA_SHIFT: u32 = 14;

/// An RGBA color.
pub type Rgba = [u8; 4];

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame length for {width}x{height}: expected {expected}, got {actual}")]
    InvalidLength {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// A color frame: RGBA bytes, row-major, four bytes per pixel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * RGBA_CHANNELS;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// A frame with every pixel set to `color`.
    pub fn filled(width: u32, height: u32, color: Rgba) -> Self {
        let pixels = width as usize * height as usize;
        Self {
            data: color.repeat(pixels),
            width,
            height,
        }
    }

    pub fn from_image(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
        }
    }

    pub fn into_image(self) -> Result<RgbaImage, FrameError> {
        let (width, height, actual) = (self.width, self.height, self.data.len());
        RgbaImage::from_raw(width, height, self.data).ok_or(FrameError::InvalidLength {
            width,
            height,
            expected: width as usize * height as usize * RGBA_CHANNELS,
            actual,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Pixel at `(x, y)`, or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = self.offset(x, y);
        Some([
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ])
    }

    /// Set a pixel; coordinates outside the frame are ignored.
    pub fn put_pixel(&mut self, x: i64, y: i64, color: Rgba) {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return;
        }
        let i = self.offset(x as u32, y as u32);
        self.data[i..i + RGBA_CHANNELS].copy_from_slice(&color);
    }

    /// Resize the backing buffer for new dimensions. Contents are unspecified
    /// afterwards; callers overwrite every pixel.
    fn ensure_dims(&mut self, width: u32, height: u32) {
        if self.width != width || self.height != height {
            self.data
                .resize(width as usize * height as usize * RGBA_CHANNELS, 0);
            self.width = width;
            self.height = height;
        }
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * RGBA_CHANNELS
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            width: 0,
            height: 0,
        }
    }
}

/// A single-channel luminance frame.
#[derive(Clone, Debug, Default)]
pub struct GrayFrame {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl GrayFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Borrow the whole frame.
    pub fn view(&self) -> GrayView<'_> {
        GrayView {
            data: &self.data,
            width: self.width,
            height: self.height,
            stride: self.width as usize,
        }
    }

    /// Borrow the part of `rect` that lies inside the frame.
    ///
    /// Returns the clamped rect alongside the view, or `None` when the
    /// intersection is empty.
    pub fn sub_view(&self, rect: &Rect) -> Option<(Rect, GrayView<'_>)> {
        let clamped = rect.clamp_to(self.width, self.height)?;
        let start = clamped.y as usize * self.width as usize + clamped.x as usize;
        Some((
            clamped,
            GrayView {
                data: &self.data[start..],
                width: clamped.width as u32,
                height: clamped.height as u32,
                stride: self.width as usize,
            },
        ))
    }

    fn ensure_dims(&mut self, width: u32, height: u32) {
        if self.width != width || self.height != height {
            self.data.resize(width as usize * height as usize, 0);
            self.width = width;
            self.height = height;
        }
    }
}

/// Borrowed window into a [`GrayFrame`].
#[derive(Clone, Copy, Debug)]
pub struct GrayView<'a> {
    data: &'a [u8],
    width: u32,
    height: u32,
    stride: usize,
}

impl<'a> GrayView<'a> {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row `y` of the view, `width` bytes long.
    pub fn row(&self, y: u32) -> &'a [u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.width as usize]
    }

    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.row(y)[x as usize]
    }

    /// Copy the view into an owned `image` buffer.
    pub fn to_image(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| Luma([self.get(x, y)]))
    }
}

/// Quarter-turn frame rotation, in OpenCV's sense: positive angles turn the
/// picture counter-clockwise on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Rotation {
    Deg0,
    Deg90,
    Deg180,
    /// Sensor-to-portrait turn used by most phone back cameras.
    #[default]
    Deg270,
}

impl Rotation {
    pub fn degrees(self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// (cos θ, sin θ) as exact integers.
    fn cos_sin(self) -> (i64, i64) {
        match self {
            Rotation::Deg0 => (1, 0),
            Rotation::Deg90 => (0, 1),
            Rotation::Deg180 => (-1, 0),
            Rotation::Deg270 => (0, -1),
        }
    }
}

impl TryFrom<u32> for Rotation {
    type Error = String;

    fn try_from(degrees: u32) -> Result<Self, Self::Error> {
        match degrees % 360 {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            other => Err(format!(
                "rotation must be a multiple of 90 degrees, got {other}"
            )),
        }
    }
}

impl From<Rotation> for u32 {
    fn from(rotation: Rotation) -> Self {
        rotation.degrees()
    }
}

/// Rotate `src` about its pixel-grid center into `dst`, keeping the
/// source dimensions.
///
/// Every destination pixel is written; pixels that map outside the source
/// (non-square frames) become transparent black. When width and height
/// differ by an odd amount, quarter turns land between pixels and take the
/// source pixel toward the top-left.
pub fn rotate_into(src: &Frame, dst: &mut Frame, rotation: Rotation) {
    dst.ensure_dims(src.width, src.height);
    if rotation == Rotation::Deg0 {
        dst.data.copy_from_slice(&src.data);
        return;
    }

    let (w, h) = (src.width as i64, src.height as i64);
    let (cos, sin) = rotation.cos_sin();

    // Work in doubled coordinates so the half-pixel center stays integral.
    for y in 0..h {
        let dy = 2 * y - (h - 1);
        for x in 0..w {
            let dx = 2 * x - (w - 1);
            let sx = (cos * dx - sin * dy + (w - 1)).div_euclid(2);
            let sy = (sin * dx + cos * dy + (h - 1)).div_euclid(2);

            let out = ((y * w + x) as usize) * RGBA_CHANNELS;
            if sx < 0 || sy < 0 || sx >= w || sy >= h {
                dst.data[out..out + RGBA_CHANNELS].fill(0);
            } else {
                let inp = ((sy * w + sx) as usize) * RGBA_CHANNELS;
                dst.data[out..out + RGBA_CHANNELS]
                    .copy_from_slice(&src.data[inp..inp + RGBA_CHANNELS]);
            }
        }
    }
}

/// Allocating form of [`rotate_into`].
pub fn rotate(src: &Frame, rotation: Rotation) -> Frame {
    let mut dst = Frame::default();
    rotate_into(src, &mut dst, rotation);
    dst
}

/// Fill `dst` with the luminance of `src`, resizing it when dimensions
/// change. Alpha is ignored.
pub fn grayscale_into(src: &Frame, dst: &mut GrayFrame) {
    dst.ensure_dims(src.width, src.height);
    for (px, out) in src.data.chunks_exact(RGBA_CHANNELS).zip(dst.data.iter_mut()) {
        let y = px[0] as u32 * LUMA_R
            + px[1] as u32 * LUMA_G
            + px[2] as u32 * LUMA_B
            + (1 << (LUMA_SHIFT - 1));
        *out = (y >> LUMA_SHIFT) as u8;
    }
}

/// Allocating form of [`grayscale_into`].
pub fn grayscale(src: &Frame) -> GrayFrame {
    let mut dst = GrayFrame::default();
    grayscale_into(src, &mut dst);
    dst
}

/// Draw a filled circle, clipped to the frame. A radius of zero or less
/// draws nothing.
pub fn fill_circle(frame: &mut Frame, center: Point, radius: i32, color: Rgba) {
    if radius <= 0 {
        return;
    }
    let r = radius as i64;
    let (cx, cy) = (center.x as i64, center.y as i64);
    let y_min = (cy - r).max(0);
    let y_max = (cy + r).min(frame.height as i64 - 1);
    let x_lo = (cx - r).max(0);
    let x_hi = (cx + r).min(frame.width as i64 - 1);

    for y in y_min..=y_max {
        let dy = y - cy;
        for x in x_lo..=x_hi {
            let dx = x - cx;
            if dx * dx + dy * dy <= r * r {
                frame.put_pixel(x, y, color);
            }
        }
    }
}

/// Draw a rectangle outline `thickness` pixels wide, centered on the
/// rect's edges and clipped to the frame.
pub fn draw_rect_outline(frame: &mut Frame, rect: &Rect, thickness: u32, color: Rgba) {
    if rect.is_empty() || thickness == 0 {
        return;
    }
    let t = thickness as i64;
    let half = t / 2;
    let (x0, y0) = (rect.x as i64, rect.y as i64);
    let (x1, y1) = (x0 + rect.width as i64, y0 + rect.height as i64);

    let outer = (x0 - half, y0 - half, x1 + (t - 1 - half), y1 + (t - 1 - half));
    let inner = (x0 - half + t, y0 - half + t, x1 - half - 1, y1 - half - 1);

    let ys = outer.1.max(0)..=outer.3.min(frame.height as i64 - 1);
    for y in ys {
        for x in outer.0.max(0)..=outer.2.min(frame.width as i64 - 1) {
            let inside_inner = x >= inner.0 && x <= inner.2 && y >= inner.1 && y <= inner.3;
            if !inside_inner {
                frame.put_pixel(x, y, color);
            }
        }
    }
}
