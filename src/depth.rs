//! # Depth reconstruction
//!
//! Reprojection of disparity maps into 3D through the disparity-to-depth matrix `Q` produced by
//! stereo rectification, and export of the resulting point clouds.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use image::RgbImage;
use nalgebra::{Matrix4, Point3, Vector4};

use crate::disparity::DisparityMap;
use crate::error::*;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Per-pixel 3D points, `None` where the disparity was invalid or the point is at infinity.
#[derive(Clone, Debug)]
pub struct PointCloud {
    pub width: usize,
    pub height: usize,
    pub points: Vec<Option<Point3<f32>>>,
    pub colors: Option<Vec<[u8; 3]>>
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl PointCloud {
    pub fn get(&self, x: usize, y: usize) -> Option<Point3<f32>> {
        self.points[y * self.width + x]
    }

    /// Number of reconstructed points.
    pub fn len(&self) -> usize {
        self.points.iter().filter(|p| p.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attach per-pixel colours, usually the left image of the pair.
    pub fn with_colors(mut self, image: &RgbImage) -> Result<Self> {
        if image.width() as usize != self.width || image.height() as usize != self.height {
            return Err(Error::DimensionMismatch(format!(
                "colour image is {:?} but the cloud is {}x{}",
                image.dimensions(),
                self.width,
                self.height
            )));
        }
        self.colors = Some(image.pixels().map(|p| p.0).collect());
        Ok(self)
    }

    /// Keep only points closer than `max_depth` along the optical axis.
    pub fn clip_depth(&mut self, max_depth: f32) {
        for p in self.points.iter_mut() {
            if matches!(p, Some(pt) if pt.z.abs() > max_depth) {
                *p = None;
            }
        }
    }

    /// Write the valid points as an ASCII PLY file.
    pub fn write_ply<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut out = BufWriter::new(File::create(path.as_ref())?);

        writeln!(out, "ply")?;
        writeln!(out, "format ascii 1.0")?;
        writeln!(out, "element vertex {}", self.len())?;
        writeln!(out, "property float x")?;
        writeln!(out, "property float y")?;
        writeln!(out, "property float z")?;
        if self.colors.is_some() {
            writeln!(out, "property uchar red")?;
            writeln!(out, "property uchar green")?;
            writeln!(out, "property uchar blue")?;
        }
        writeln!(out, "end_header")?;

        for (idx, point) in self.points.iter().enumerate() {
            let pt = match point {
                Some(pt) => pt,
                None => continue
            };
            match &self.colors {
                Some(colors) => {
                    let [r, g, b] = colors[idx];
                    writeln!(out, "{} {} {} {} {} {}", pt.x, pt.y, pt.z, r, g, b)?;
                },
                None => writeln!(out, "{} {} {}", pt.x, pt.y, pt.z)?
            }
        }

        out.flush()?;
        log::info!("Wrote {} points to {}", self.len(), path.as_ref().display());
        Ok(())
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Reproject every matched pixel `(x, y, d)` to `Q * [x, y, d, 1]`.
pub fn reproject_image_to_3d(disparity: &DisparityMap, q: &Matrix4<f64>) -> PointCloud {
    let width = disparity.width();
    let height = disparity.height();
    let mut points = Vec::with_capacity(width * height);

    for y in 0..height {
        for x in 0..width {
            if !disparity.is_valid(x, y) {
                points.push(None);
                continue;
            }

            let d = disparity.get(x, y) as f64;
            let h = q * Vector4::new(x as f64, y as f64, d, 1.0);
            if h.w.abs() < f64::EPSILON {
                points.push(None);
                continue;
            }

            points.push(Some(Point3::new(
                (h.x / h.w) as f32,
                (h.y / h.w) as f32,
                (h.z / h.w) as f32
            )));
        }
    }

    PointCloud {
        width,
        height,
        points,
        colors: None
    }
}
