//! # Thresholding
//!
//! Contrast enhancement and adaptive mean thresholding of stereo pairs, used to inspect how well
//! the board or scene texture survives different lighting before tuning the matcher.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use image::{imageops, GrayImage, Luma, Rgb, RgbImage};
use imageproc::filter::box_filter;
use serde::{Deserialize, Serialize};

use crate::frame::{GrayStereoFrame, StereoFrame};

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Slider positions of the threshold tuner.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdParams {
    /// Contrast position; the enhancement factor is `1 + contrast / 1000`.
    pub contrast: u32,
    /// Neighbourhood size, at least 2 and bumped to the next odd value.
    pub block_size: u32,
    /// Constant subtracted from the neighbourhood mean.
    pub c: i32,
    pub invert: bool
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Default for ThresholdParams {
    fn default() -> Self {
        ThresholdParams {
            contrast: 1,
            block_size: 11,
            c: 1,
            invert: false
        }
    }
}

impl ThresholdParams {
    pub fn contrast_factor(&self) -> f32 {
        1.0 + self.contrast as f32 / 1000.0
    }

    /// Enhance and threshold both eyes of a colour pair.
    pub fn apply(&self, frame: &StereoFrame) -> GrayStereoFrame {
        let factor = self.contrast_factor();
        let block_size = self.block_size.max(2);
        let process = |img: &RgbImage| {
            let enhanced = enhance_contrast_rgb(img, factor);
            adaptive_threshold_mean(&imageops::grayscale(&enhanced), 255, block_size, self.c, self.invert)
        };

        GrayStereoFrame {
            left: process(&frame.left),
            right: process(&frame.right),
            timestamp_us: frame.timestamp_us
        }
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Blend every pixel away from (factor > 1) or towards (factor < 1) the mean intensity.
pub fn enhance_contrast(image: &GrayImage, factor: f32) -> GrayImage {
    let mean = mean_luma(image);
    let mut out = image.clone();
    for p in out.pixels_mut() {
        p.0[0] = blend(mean, p.0[0], factor);
    }
    out
}

/// Colour version of [`enhance_contrast`]; the mean is taken over the luma of the image.
pub fn enhance_contrast_rgb(image: &RgbImage, factor: f32) -> RgbImage {
    let mean = mean_luma(&imageops::grayscale(image));
    let mut out = image.clone();
    for p in out.pixels_mut() {
        let Rgb([r, g, b]) = *p;
        *p = Rgb([blend(mean, r, factor), blend(mean, g, factor), blend(mean, b, factor)]);
    }
    out
}

/// Mean-C adaptive threshold: a pixel is set to `max_value` when it is brighter than the mean of
/// its `block_size` neighbourhood minus `c` (or darker, when `invert` is set).
///
/// An even block size is bumped to the next odd one.
pub fn adaptive_threshold_mean(
    image: &GrayImage,
    max_value: u8,
    block_size: u32,
    c: i32,
    invert: bool
) -> GrayImage {
    let block_size = if block_size % 2 == 0 { block_size + 1 } else { block_size };
    let radius = block_size / 2;
    let means = box_filter(image, radius, radius);

    let mut out = GrayImage::new(image.width(), image.height());
    for (x, y, p) in image.enumerate_pixels() {
        let threshold = means.get_pixel(x, y).0[0] as i32 - c;
        let above = p.0[0] as i32 > threshold;
        let value = if above != invert { max_value } else { 0 };
        out.put_pixel(x, y, Luma([value]));
    }
    out
}

fn mean_luma(image: &GrayImage) -> f32 {
    let count = (image.width() as u64 * image.height() as u64).max(1);
    let sum: u64 = image.as_raw().iter().map(|&v| v as u64).sum();
    (sum as f32 / count as f32 + 0.5).floor()
}

/// Blended values are truncated, not rounded.
fn blend(mean: f32, value: u8, factor: f32) -> u8 {
    (mean + factor * (value as f32 - mean)).max(0.0).min(255.0) as u8
}
