//! # Block matching disparity computation
//!
//! Sum-of-absolute-differences block matching on a pre-filtered stereo pair, following the
//! conventions of the classic `StereoBM` matcher:
//!
//! - both images are pre-filtered (normalised response or horizontal Sobel), clamped to
//!   `±pre_filter_cap` and offset by `pre_filter_cap`,
//! - costs are aggregated over a square block for every disparity in
//!   `min_disparity..min_disparity + num_disparities`,
//! - matches are rejected for low texture, poor uniqueness and left-right inconsistency,
//! - winners are refined with a parabola fit and small speckles are removed.
//!
//! Unmatched pixels hold `min_disparity - 1`.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::convert::TryFrom;

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::disparity::{DisparityAlgorithm, DisparityMap, DISPARITY_SCALE};
use crate::error::*;
use crate::frame::GrayStereoFrame;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Effective parameters of the block matcher.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StereoBm {
    pub pre_filter_type: PreFilterType,
    pub pre_filter_size: i32,
    pub pre_filter_cap: i32,
    pub block_size: i32,
    pub min_disparity: i32,
    pub num_disparities: i32,
    pub texture_threshold: i32,
    pub uniqueness_ratio: i32,
    pub speckle_range: i32,
    pub speckle_window_size: i32,
    pub disp12_max_diff: i32
}

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreFilterType {
    /// Subtract the local mean over a `pre_filter_size` window.
    NormalizedResponse = 0,
    /// Horizontal Sobel derivative.
    XSobel = 1
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl TryFrom<i32> for PreFilterType {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(PreFilterType::NormalizedResponse),
            1 => Ok(PreFilterType::XSobel),
            _ => Err(Error::BadBlockMatcherArgument {
                parameter: "prefilter_type",
                value,
                reason: "must be 0 (normalised response) or 1 (x-sobel)"
            })
        }
    }
}

impl Default for StereoBm {
    fn default() -> Self {
        StereoBm {
            pre_filter_type: PreFilterType::XSobel,
            pre_filter_size: 9,
            pre_filter_cap: 31,
            block_size: 21,
            min_disparity: 0,
            num_disparities: 64,
            texture_threshold: 10,
            uniqueness_ratio: 15,
            speckle_range: 0,
            speckle_window_size: 0,
            disp12_max_diff: -1
        }
    }
}

impl StereoBm {
    /// Check the parameters are usable, independent of image size.
    pub fn validate(&self) -> Result<()> {
        fn bad(parameter: &'static str, value: i32, reason: &'static str) -> Result<()> {
            Err(Error::BadBlockMatcherArgument { parameter, value, reason })
        }

        if self.pre_filter_size < 5 || self.pre_filter_size > 255 || self.pre_filter_size % 2 == 0 {
            return bad("prefilter_size", self.pre_filter_size, "must be odd and within 5..=255");
        }
        if self.pre_filter_cap < 1 || self.pre_filter_cap > 63 {
            return bad("prefilter_cap", self.pre_filter_cap, "must be within 1..=63");
        }
        if self.block_size < 5 || self.block_size > 255 || self.block_size % 2 == 0 {
            return bad("block_size", self.block_size, "must be odd and within 5..=255");
        }
        if self.num_disparities <= 0 || self.num_disparities % 16 != 0 {
            return bad("num_disp", self.num_disparities, "must be a positive multiple of 16");
        }
        // The invalid marker and the right edge of the search window must both fit an i32.
        let min_d = self.min_disparity as i64;
        let search_end = min_d + self.num_disparities as i64 + (self.block_size / 2) as i64;
        if min_d - 1 < i32::MIN as i64 || search_end > i32::MAX as i64 {
            return bad(
                "min_disparity",
                self.min_disparity,
                "search range must fit within the i32 range"
            );
        }
        if self.texture_threshold < 0 {
            return bad("texture_threshold", self.texture_threshold, "must not be negative");
        }
        if self.uniqueness_ratio < 0 {
            return bad("uniqueness_ratio", self.uniqueness_ratio, "must not be negative");
        }
        if self.speckle_window_size < 0 {
            return bad("speckle_window_size", self.speckle_window_size, "must not be negative");
        }
        Ok(())
    }

    /// Value written to unmatched pixels.
    pub fn invalid_disparity(&self) -> f32 {
        self.min_disparity as f32 - 1.0
    }

    /// Compute the disparity of a rectified gray pair, left image as reference.
    pub fn match_pair(&self, left: &GrayImage, right: &GrayImage) -> Result<DisparityMap> {
        if left.dimensions() != right.dimensions() {
            return Err(Error::DimensionMismatch(format!(
                "left is {:?} but right is {:?}",
                left.dimensions(),
                right.dimensions()
            )));
        }
        self.validate()?;

        let w = left.width() as usize;
        let h = left.height() as usize;
        if (self.block_size as usize) > w.min(h) {
            return Err(Error::BadBlockMatcherArgument {
                parameter: "block_size",
                value: self.block_size,
                reason: "must not exceed the smallest image dimension"
            });
        }

        let lp = self.pre_filter(left);
        let rp = self.pre_filter(right);

        let half = (self.block_size / 2) as usize;
        let min_d = self.min_disparity;
        let num_d = self.num_disparities as usize;
        let max_d = min_d + num_d as i32 - 1;

        let mut map = DisparityMap::new(w, h, self.invalid_disparity());

        // Columns for which every candidate block lies inside the right image.
        let x_lo = half as i32 + max_d.max(0);
        let x_hi = w as i32 - 1 - half as i32 + min_d.min(0);
        if x_lo > x_hi {
            log::debug!(
                "No column of a {}x{} image can be searched over {} disparities",
                w, h, num_d
            );
            return Ok(map);
        }
        let (x_lo, x_hi) = (x_lo as usize, x_hi as usize);

        let cap = self.pre_filter_cap as u8;
        let mut cols = ColumnSums::new(w, num_d);
        for row in 0..2 * half {
            cols.accumulate(&lp, &rp, row, min_d, cap, true);
        }

        let mut hcost = vec![0u32; num_d * w];
        let mut texture = vec![0u32; w];
        let mut winner = vec![i32::MIN; w];
        let mut disp2_cost = vec![u32::MAX; w];
        let mut disp2 = vec![i32::MIN; w];

        for y in half..h - half {
            cols.accumulate(&lp, &rp, y + half, min_d, cap, true);

            // Horizontal aggregation over the block for every disparity.
            for di in 0..num_d {
                let col = &cols.sad[di * w..(di + 1) * w];
                let out = &mut hcost[di * w..(di + 1) * w];
                let mut acc: u32 = col[x_lo - half..=x_lo + half].iter().sum();
                out[x_lo] = acc;
                for x in x_lo + 1..=x_hi {
                    acc = acc + col[x + half] - col[x - half - 1];
                    out[x] = acc;
                }
            }
            {
                let mut acc: u32 = cols.texture[x_lo - half..=x_lo + half].iter().sum();
                texture[x_lo] = acc;
                for x in x_lo + 1..=x_hi {
                    acc = acc + cols.texture[x + half] - cols.texture[x - half - 1];
                    texture[x] = acc;
                }
            }

            for v in disp2_cost.iter_mut() {
                *v = u32::MAX;
            }
            for v in disp2.iter_mut() {
                *v = i32::MIN;
            }

            for x in x_lo..=x_hi {
                winner[x] = i32::MIN;

                let mut best = u32::MAX;
                let mut best_di = 0usize;
                for di in 0..num_d {
                    let c = hcost[di * w + x];
                    if c < best {
                        best = c;
                        best_di = di;
                    }
                }

                let d_int = min_d + best_di as i32;
                let x2 = (x as i32 - d_int) as usize;
                if best < disp2_cost[x2] {
                    disp2_cost[x2] = best;
                    disp2[x2] = d_int;
                }

                if self.texture_threshold > 0 && texture[x] < self.texture_threshold as u32 {
                    continue;
                }

                if self.uniqueness_ratio > 0 {
                    let thresh = best as u64 + best as u64 * self.uniqueness_ratio as u64 / 100;
                    let ambiguous = (0..num_d).any(|di| {
                        (di + 1 < best_di || di > best_di + 1)
                            && (hcost[di * w + x] as u64) <= thresh
                    });
                    if ambiguous {
                        continue;
                    }
                }

                let frac = if best_di > 0 && best_di + 1 < num_d {
                    let n = hcost[(best_di - 1) * w + x] as f32;
                    let p = hcost[(best_di + 1) * w + x] as f32;
                    let c = best as f32;
                    let den = p + n - 2.0 * c + (p - n).abs();
                    if den > 0.0 { (n - p) / den } else { 0.0 }
                }
                else {
                    0.0
                };

                winner[x] = d_int;
                map.put(x, y, d_int as f32 + frac);
            }

            if self.disp12_max_diff >= 0 {
                for x in x_lo..=x_hi {
                    let d = winner[x];
                    if d == i32::MIN || !map.is_valid(x, y) {
                        continue;
                    }
                    let x2 = (x as i32 - d) as usize;
                    if disp2[x2] != i32::MIN && (disp2[x2] - d).abs() > self.disp12_max_diff {
                        map.invalidate(x, y);
                    }
                }
            }

            cols.accumulate(&lp, &rp, y - half, min_d, cap, false);
        }

        if self.speckle_range >= 0 && self.speckle_window_size > 0 {
            filter_speckles(
                &mut map,
                self.speckle_window_size as usize,
                self.speckle_range as f32 / DISPARITY_SCALE
            );
        }

        map.update_stats();

        log::debug!(
            "Block matching on {}x{} matched {} pixels, range {:?}..{:?}",
            w, h, map.valid_count(), map.min_disp, map.max_disp
        );

        Ok(map)
    }

    /// Pre-filter an image into the `0..=2 * pre_filter_cap` range.
    pub fn pre_filter(&self, img: &GrayImage) -> Vec<u8> {
        let cap = self.pre_filter_cap;
        let clamp = |v: i32| (v.max(-cap).min(cap) + cap) as u8;

        match self.pre_filter_type {
            PreFilterType::XSobel => {
                let sobel = imageproc::gradients::horizontal_sobel(img);
                sobel.pixels().map(|p| clamp(p[0] as i32)).collect()
            },
            PreFilterType::NormalizedResponse => {
                let radius = (self.pre_filter_size / 2) as u32;
                let mean = imageproc::filter::box_filter(img, radius, radius);
                img.pixels()
                    .zip(mean.pixels())
                    .map(|(p, m)| clamp(p[0] as i32 - m[0] as i32))
                    .collect()
            }
        }
    }
}

impl DisparityAlgorithm for StereoBm {
    fn compute(&mut self, frame: &GrayStereoFrame) -> Result<DisparityMap> {
        self.match_pair(&frame.left, &frame.right)
    }
}

/// Running vertical sums of the absolute differences for each disparity, and of the texture
/// measure `|left - cap|`.
struct ColumnSums {
    width: usize,
    num_d: usize,
    sad: Vec<u32>,
    texture: Vec<u32>
}

impl ColumnSums {
    fn new(width: usize, num_d: usize) -> Self {
        ColumnSums {
            width,
            num_d,
            sad: vec![0; width * num_d],
            texture: vec![0; width]
        }
    }

    /// Add (or remove) one image row to the column sums.
    fn accumulate(&mut self, lp: &[u8], rp: &[u8], row: usize, min_d: i32, cap: u8, add: bool) {
        let w = self.width;
        let lrow = &lp[row * w..(row + 1) * w];
        let rrow = &rp[row * w..(row + 1) * w];

        for (x, &l) in lrow.iter().enumerate() {
            let t = (l as i32 - cap as i32).abs() as u32;
            if add {
                self.texture[x] += t;
            }
            else {
                self.texture[x] -= t;
            }
        }

        for di in 0..self.num_d {
            let d = min_d + di as i32;
            let col = &mut self.sad[di * w..(di + 1) * w];
            let start = d.max(0) as usize;
            let end = (w as i32 + d).min(w as i32).max(0) as usize;
            for x in start..end {
                let xr = (x as i32 - d) as usize;
                let diff = (lrow[x] as i32 - rrow[xr] as i32).abs() as u32;
                if add {
                    col[x] += diff;
                }
                else {
                    col[x] -= diff;
                }
            }
        }
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Invalidate connected regions of at most `max_speckle_size` pixels, where neighbours belong to
/// the same region when their disparities differ by at most `max_diff` pixels.
pub fn filter_speckles(map: &mut DisparityMap, max_speckle_size: usize, max_diff: f32) {
    let w = map.width();
    let h = map.height();
    let mut labels = vec![0u32; w * h];
    let mut next_label = 1u32;
    let mut stack = Vec::new();
    let mut region = Vec::new();

    for start in 0..w * h {
        let (sx, sy) = (start % w, start / w);
        if labels[start] != 0 || !map.is_valid(sx, sy) {
            continue;
        }

        labels[start] = next_label;
        stack.push(start);
        region.clear();

        while let Some(idx) = stack.pop() {
            region.push(idx);
            let (x, y) = (idx % w, idx / w);
            let d = map.get(x, y);

            let mut visit = |nx: usize, ny: usize| {
                let nidx = ny * w + nx;
                if labels[nidx] == 0
                    && map.is_valid(nx, ny)
                    && (map.get(nx, ny) - d).abs() <= max_diff
                {
                    labels[nidx] = next_label;
                    stack.push(nidx);
                }
            };

            if x > 0 {
                visit(x - 1, y);
            }
            if x + 1 < w {
                visit(x + 1, y);
            }
            if y > 0 {
                visit(x, y - 1);
            }
            if y + 1 < h {
                visit(x, y + 1);
            }
        }

        if region.len() <= max_speckle_size {
            for &idx in &region {
                map.invalidate(idx % w, idx / w);
            }
        }

        next_label += 1;
    }
}
