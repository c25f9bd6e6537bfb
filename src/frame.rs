//! # Stereo frames
//!
//! The stereo module delivers both eyes as a single side-by-side frame. This module provides the
//! pair types used throughout the crate and the conversions from raw camera buffers.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use image::{imageops, DynamicImage, GrayImage, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::error::*;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// A colour stereo pair.
#[derive(Clone, Debug)]
pub struct StereoFrame {
    pub left: RgbImage,
    pub right: RgbImage,
    pub timestamp_us: u64
}

/// A gray-scaled stereo pair.
#[derive(Clone, Debug)]
pub struct GrayStereoFrame {
    pub left: GrayImage,
    pub right: GrayImage,
    pub timestamp_us: u64
}

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

/// Which half of a side-by-side frame holds the left eye.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EyeOrder {
    LeftFirst,
    RightFirst
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Default for EyeOrder {
    fn default() -> Self {
        EyeOrder::LeftFirst
    }
}

impl StereoFrame {
    /// Build a pair from any two dynamic images.
    pub fn from_dynamic(left: &DynamicImage, right: &DynamicImage) -> Self {
        StereoFrame {
            left: left.to_rgb(),
            right: right.to_rgb(),
            timestamp_us: 0
        }
    }

    pub fn width(&self) -> u32 {
        self.left.width()
    }

    pub fn height(&self) -> u32 {
        self.left.height()
    }

    /// Convert both eyes to gray scale.
    pub fn to_gray(&self) -> GrayStereoFrame {
        GrayStereoFrame {
            left: imageops::grayscale(&self.left),
            right: imageops::grayscale(&self.right),
            timestamp_us: self.timestamp_us
        }
    }
}

impl GrayStereoFrame {
    pub fn new(left: GrayImage, right: GrayImage) -> Self {
        GrayStereoFrame {
            left,
            right,
            timestamp_us: 0
        }
    }

    /// Build a gray pair from any two dynamic images, converting colour images to luma.
    pub fn from_dynamic(left: &DynamicImage, right: &DynamicImage) -> Self {
        GrayStereoFrame::new(left.to_luma(), right.to_luma())
    }

    pub fn width(&self) -> u32 {
        self.left.width()
    }

    pub fn height(&self) -> u32 {
        self.left.height()
    }

    /// Check both eyes have the same, non-empty size.
    pub fn check_dimensions(&self) -> Result<()> {
        if self.left.dimensions() != self.right.dimensions() {
            return Err(Error::DimensionMismatch(format!(
                "left is {:?} but right is {:?}",
                self.left.dimensions(),
                self.right.dimensions()
            )));
        }
        if self.left.width() == 0 || self.left.height() == 0 {
            return Err(Error::DimensionMismatch("empty stereo frame".into()));
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Split a side-by-side frame into a stereo pair at `width / 2`.
pub fn split_side_by_side(frame: &RgbImage, order: EyeOrder) -> Result<StereoFrame> {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 || width % 2 != 0 {
        return Err(Error::DimensionMismatch(format!(
            "side-by-side frame must have a non-zero even width, got {}x{}",
            width, height
        )));
    }

    let delimiter = width / 2;
    let first = imageops::crop_imm(frame, 0, 0, delimiter, height).to_image();
    let second = imageops::crop_imm(frame, delimiter, 0, delimiter, height).to_image();

    let (left, right) = match order {
        EyeOrder::LeftFirst => (first, second),
        EyeOrder::RightFirst => (second, first)
    };

    Ok(StereoFrame {
        left,
        right,
        timestamp_us: 0
    })
}

/// Convert a packed YUYV (YUV 4:2:2) buffer into an RGB image.
pub fn yuyv_to_rgb(buf: &[u8], width: u32, height: u32) -> Result<RgbImage> {
    check_yuyv_len(buf, width, height)?;

    let mut img = RgbImage::new(width, height);
    let row_bytes = width as usize * 2;

    for y in 0..height as usize {
        let row = &buf[y * row_bytes..(y + 1) * row_bytes];
        for (pair, chunk) in row.chunks_exact(4).enumerate() {
            let u = chunk[1] as f32 - 128.0;
            let v = chunk[3] as f32 - 128.0;
            for (i, &luma) in [chunk[0], chunk[2]].iter().enumerate() {
                let l = luma as f32;
                let r = l + 1.402 * v;
                let g = l - 0.344_136 * u - 0.714_136 * v;
                let b = l + 1.772 * u;
                img.put_pixel(
                    (pair * 2 + i) as u32,
                    y as u32,
                    Rgb([clamp_u8(r), clamp_u8(g), clamp_u8(b)])
                );
            }
        }
    }

    Ok(img)
}

/// Extract the luma plane of a packed YUYV buffer.
pub fn yuyv_to_gray(buf: &[u8], width: u32, height: u32) -> Result<GrayImage> {
    check_yuyv_len(buf, width, height)?;

    let luma: Vec<u8> = buf
        .iter()
        .step_by(2)
        .take(width as usize * height as usize)
        .copied()
        .collect();

    GrayImage::from_raw(width, height, luma)
        .ok_or_else(|| Error::DimensionMismatch("YUYV luma plane has the wrong size".into()))
}

fn check_yuyv_len(buf: &[u8], width: u32, height: u32) -> Result<()> {
    let expected = width as usize * height as usize * 2;
    if width % 2 != 0 || buf.len() < expected {
        return Err(Error::Camera(format!(
            "YUYV buffer of {} bytes does not hold a {}x{} frame",
            buf.len(),
            width,
            height
        )));
    }
    Ok(())
}

fn clamp_u8(v: f32) -> u8 {
    v.round().max(0.0).min(255.0) as u8
}
