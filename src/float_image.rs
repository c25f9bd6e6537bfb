//! # Floating point images
//!
//! A minimal single channel `f32` image used to hold disparity values and intermediate filter
//! responses.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use image::{DynamicImage, GrayImage, ImageBuffer, Luma};

// -----------------------------------------------------------------------------------------------
// TYPES
// -----------------------------------------------------------------------------------------------

/// `image` buffer with the same layout, as taken by `imageproc` filters.
pub type FloatBuffer = ImageBuffer<Luma<f32>, Vec<f32>>;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Row-major single channel floating point image.
#[derive(Clone, Debug, PartialEq)]
pub struct GrayFloatImage {
    width: usize,
    height: usize,
    data: Vec<f32>
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl GrayFloatImage {
    /// Create a new zero-filled image.
    pub fn new(width: usize, height: usize) -> Self {
        Self::filled(width, height, 0.0)
    }

    /// Create a new image with every pixel set to `value`.
    pub fn filled(width: usize, height: usize, value: f32) -> Self {
        GrayFloatImage {
            width,
            height,
            data: vec![value; width * height]
        }
    }

    /// Convert an 8 bit gray image, keeping the 0..255 range.
    pub fn from_luma(img: &GrayImage) -> Self {
        GrayFloatImage {
            width: img.width() as usize,
            height: img.height() as usize,
            data: img.as_raw().iter().map(|&v| v as f32).collect()
        }
    }

    /// Convert any dynamic image through its luma representation.
    pub fn from_dynamic(img: &DynamicImage) -> Self {
        Self::from_luma(&img.to_luma())
    }

    /// Copy into an `image` buffer.
    pub fn to_buffer(&self) -> FloatBuffer {
        ImageBuffer::from_fn(self.width as u32, self.height as u32, |x, y| {
            Luma([self.get(x as usize, y as usize)])
        })
    }

    /// Copy out of an `image` buffer.
    pub fn from_buffer(buffer: &FloatBuffer) -> Self {
        GrayFloatImage {
            width: buffer.width() as usize,
            height: buffer.height() as usize,
            data: buffer.pixels().map(|p| p[0]).collect()
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    pub fn put(&mut self, x: usize, y: usize, val: f32) {
        self.data[y * self.width + x] = val;
    }

    /// Raw row-major pixel data.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Borrow a single row.
    pub fn row(&self, y: usize) -> &[f32] {
        &self.data[y * self.width..(y + 1) * self.width]
    }

    pub fn row_mut(&mut self, y: usize) -> &mut [f32] {
        &mut self.data[y * self.width..(y + 1) * self.width]
    }
}
