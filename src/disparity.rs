//! # General disparity objects
//!
//! This module provides generic disparity traits and structures for use by different algorithms.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use image::GrayImage;

use crate::error::*;
use crate::float_image::GrayFloatImage;
use crate::frame::GrayStereoFrame;

#[cfg(feature = "statistics")]
use plotters::prelude::*;

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Number of fractional bits in the fixed point disparity representation.
pub const DISPARITY_SHIFT: u32 = 4;

/// Scale between pixel disparity and fixed point disparity.
pub const DISPARITY_SCALE: f32 = (1 << DISPARITY_SHIFT) as f32;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// A generic floating point disparity map, in pixel units.
///
/// Pixels that could not be matched hold `invalid`, which is one less than the minimum disparity
/// searched.
#[derive(Clone, Debug)]
pub struct DisparityMap {
    data: GrayFloatImage,
    invalid: f32,
    pub max_disp: Option<f32>,
    pub min_disp: Option<f32>
}

// -----------------------------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------------------------

pub trait DisparityAlgorithm {
    /// Compute the disparity map of the given stereo frame.
    fn compute(&mut self, frame: &GrayStereoFrame) -> Result<DisparityMap>;
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl DisparityMap {
    /// Create a map where every pixel is invalid.
    pub fn new(width: usize, height: usize, invalid: f32) -> Self {
        DisparityMap {
            data: GrayFloatImage::filled(width, height, invalid),
            invalid,
            min_disp: None,
            max_disp: None
        }
    }

    pub fn width(&self) -> usize {
        self.data.width()
    }

    pub fn height(&self) -> usize {
        self.data.height()
    }

    /// The value marking unmatched pixels.
    pub fn invalid_value(&self) -> f32 {
        self.invalid
    }

    pub fn put(&mut self, x: usize, y: usize, val: f32) {
        self.data.put(x, y, val)
    }

    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data.get(x, y)
    }

    pub fn is_valid(&self, x: usize, y: usize) -> bool {
        self.data.get(x, y) > self.invalid
    }

    /// Mark a pixel as unmatched.
    pub fn invalidate(&mut self, x: usize, y: usize) {
        let invalid = self.invalid;
        self.data.put(x, y, invalid)
    }

    pub fn data(&self) -> &GrayFloatImage {
        &self.data
    }

    /// Number of matched pixels.
    pub fn valid_count(&self) -> usize {
        let invalid = self.invalid;
        self.data.as_slice().iter().filter(|&&d| d > invalid).count()
    }

    /// Recompute `min_disp`/`max_disp` from the matched pixels.
    pub fn update_stats(&mut self) {
        let invalid = self.invalid;
        let (min, max) = self
            .data
            .as_slice()
            .iter()
            .filter(|&&d| d > invalid)
            .fold((None, None), |(min, max): (Option<f32>, Option<f32>), &d| {
                (
                    Some(min.map_or(d, |m| m.min(d))),
                    Some(max.map_or(d, |m| m.max(d)))
                )
            });
        self.min_disp = min;
        self.max_disp = max;
    }

    /// Signed fixed point representation with four fractional bits (disparity * 16), the layout
    /// block matchers conventionally hand out.
    pub fn to_fixed_point(&self) -> Vec<i16> {
        self.data
            .as_slice()
            .iter()
            .map(|&d| {
                (d * DISPARITY_SCALE)
                    .round()
                    .max(i16::MIN as f32)
                    .min(i16::MAX as f32) as i16
            })
            .collect()
    }

    /// Converts the image into a dynamic Luma8 image.
    pub fn to_luma(&self) -> GrayImage {
        self.map_to_luma(|val| val)
    }

    /// Converts the image to a normalised GrayImage.
    ///
    /// Normalises by the maximum observed disparity in the map. If the maximum disparity is not
    /// set then the function is equivalent to `.to_luma()`.
    pub fn to_luma_normalised(&self) -> GrayImage {
        let mult = match self.max_disp {
            Some(d) if d > 0.0 => 255.0 / d,
            _ => 1.0
        };

        self.map_to_luma(|val| val * mult)
    }

    /// Converts the image to a GrayImage scaled by the searched range, so that `min_disparity`
    /// maps to black and `min_disparity + num_disparities` to white.
    pub fn to_luma_range(&self, min_disparity: i32, num_disparities: i32) -> GrayImage {
        let num = num_disparities.max(1) as f32;
        let min = min_disparity as f32;

        self.map_to_luma(|val| (val - min) / num * 255.0)
    }

    fn map_to_luma<F: Fn(f32) -> f32>(&self, f: F) -> GrayImage {
        let mut new = image::GrayImage::new(
            self.data.width() as u32,
            self.data.height() as u32
        );

        for y in 0..new.height() {
            for x in 0..new.width() {
                let raw = self.data.get(x as usize, y as usize);

                let mut val = if raw > self.invalid { f(raw) } else { 0.0 };

                if val < 0.0 {
                    val = 0.0;
                }
                else if val > 255.0 {
                    val = 255.0;
                }

                *new.get_pixel_mut(x, y) = image::Luma([val as u8]);
            }
        }

        new
    }

    /// Count matched pixels per whole-pixel disparity bin, starting from `min_disp`.
    pub fn histogram(&self) -> Vec<(i32, usize)> {
        let (min, max) = match (self.min_disp, self.max_disp) {
            (Some(min), Some(max)) => (min.floor() as i32, max.floor() as i32),
            _ => return Vec::new()
        };

        let mut bins = vec![0usize; (max - min + 1) as usize];
        for &d in self.data.as_slice() {
            if d > self.invalid {
                let idx = (d.floor() as i32 - min).max(0).min(max - min) as usize;
                bins[idx] += 1;
            }
        }

        bins.into_iter()
            .enumerate()
            .map(|(i, count)| (min + i as i32, count))
            .collect()
    }

    /// Plot the disparity histogram to a PNG file.
    #[cfg(feature = "statistics")]
    pub fn plot_histogram<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let hist = self.histogram();
        let (first, last) = match (hist.first(), hist.last()) {
            (Some(f), Some(l)) => (f.0, l.0 + 1),
            _ => return Err(Error::Unsupported("cannot plot an empty disparity map".into()))
        };
        let peak = hist.iter().map(|(_, c)| *c).max().unwrap_or(1);

        let plot_err = |e: &dyn std::fmt::Debug| Error::Unsupported(format!("plotting: {:?}", e));

        let area = BitMapBackend::new(path.as_ref(), (800, 600)).into_drawing_area();
        area.fill(&WHITE).map_err(|e| plot_err(&e))?;

        let mut chart = ChartBuilder::on(&area)
            .caption("Disparity histogram", ("sans-serif", 20).into_font())
            .margin(5)
            .x_label_area_size(30)
            .y_label_area_size(40)
            .build_ranged(first..last, 0..peak + 1)
            .map_err(|e| plot_err(&e))?;

        chart.configure_mesh().draw().map_err(|e| plot_err(&e))?;

        chart
            .draw_series(LineSeries::new(hist, &BLUE))
            .map_err(|e| plot_err(&e))?;

        Ok(())
    }
}
