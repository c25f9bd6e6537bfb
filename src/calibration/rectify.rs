//! # Rectification
//!
//! Bouguet stereo rectification, undistort/rectify lookup tables, image remapping and the point
//! utilities used to check a calibration.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use image::{GrayImage, ImageBuffer, Pixel};
use nalgebra::{Matrix3, Matrix3x4, Matrix4, Point2, Vector2, Vector3, Vector5};
use serde::{Deserialize, Serialize};

use super::geometry::{distort, normalised_from_pixel, rodrigues, rodrigues_inverse,
    undistort_normalised};
use crate::error::*;

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Samples per side of the grid used to find the valid rectangles of a rectified image.
const RECT_GRID: usize = 9;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Integer rectangle of valid pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32
}

/// Output of [`stereo_rectify`].
#[derive(Clone, Debug, PartialEq)]
pub struct Rectification {
    /// Rotation bringing the left camera into the rectified frame.
    pub r1: Matrix3<f64>,
    pub r2: Matrix3<f64>,
    /// Projection matrices of the rectified cameras.
    pub p1: Matrix3x4<f64>,
    pub p2: Matrix3x4<f64>,
    /// Disparity-to-depth mapping matrix.
    pub q: Matrix4<f64>,
    pub roi1: Roi,
    pub roi2: Roi
}

/// Per-pixel source coordinates of a remapped image.
#[derive(Clone, Debug, PartialEq)]
pub struct RemapTable {
    width: u32,
    height: u32,
    map_x: Vec<f32>,
    map_y: Vec<f32>
}

/// Floating point rectangle, as found by sampling the image border.
#[derive(Clone, Copy, Debug)]
struct RectF {
    x: f64,
    y: f64,
    width: f64,
    height: f64
}

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interpolation {
    Nearest,
    Bilinear
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Roi {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Roi { x, y, width, height }
    }

    pub fn area(&self) -> i64 {
        self.width.max(0) as i64 * self.height.max(0) as i64
    }

    pub fn intersect(&self, other: &Roi) -> Roi {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = (self.x + self.width).min(other.x + other.width);
        let y1 = (self.y + self.height).min(other.y + other.height);
        if x1 <= x0 || y1 <= y0 {
            return Roi::default();
        }
        Roi::new(x0, y0, x1 - x0, y1 - y0)
    }

    pub fn to_array(&self) -> [i32; 4] {
        [self.x, self.y, self.width, self.height]
    }
}

impl RemapTable {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Source coordinates of destination pixel `(x, y)`.
    pub fn source(&self, x: u32, y: u32) -> (f32, f32) {
        let idx = (y * self.width + x) as usize;
        (self.map_x[idx], self.map_y[idx])
    }

    pub fn map_x(&self) -> &[f32] {
        &self.map_x
    }

    pub fn map_y(&self) -> &[f32] {
        &self.map_y
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Undistort pixel points, optionally rotating them by `rect` and projecting them with the
/// first three columns of `proj`. Without a projection the normalised coordinates are returned.
pub fn undistort_points(
    points: &[Point2<f64>],
    camera: &Matrix3<f64>,
    dist: &Vector5<f64>,
    rect: Option<&Matrix3<f64>>,
    proj: Option<&Matrix3<f64>>
) -> Vec<Point2<f64>> {
    points
        .iter()
        .map(|p| {
            let n = undistort_normalised(&normalised_from_pixel(camera, p), dist);
            let mut h = Vector3::new(n.x, n.y, 1.0);
            if let Some(r) = rect {
                h = r * h;
            }
            let (x, y) = (h.x / h.z, h.y / h.z);
            match proj {
                Some(k) => Point2::new(
                    k[(0, 0)] * x + k[(0, 1)] * y + k[(0, 2)],
                    k[(1, 0)] * x + k[(1, 1)] * y + k[(1, 2)]
                ),
                None => Point2::new(x, y)
            }
        })
        .collect()
}

/// Epipolar lines in the other image of points seen in image `which_image` (1 or 2).
///
/// Lines `(a, b, c)` are scaled so that `a^2 + b^2 = 1`, making `a x + b y + c` a signed pixel
/// distance.
pub fn compute_correspond_epilines(
    points: &[Point2<f64>],
    which_image: u8,
    fundamental: &Matrix3<f64>
) -> Result<Vec<Vector3<f64>>> {
    let f = match which_image {
        1 => *fundamental,
        2 => fundamental.transpose(),
        other => {
            return Err(Error::Calibration(format!(
                "which_image must be 1 or 2, got {}",
                other
            )))
        }
    };

    Ok(points
        .iter()
        .map(|p| {
            let l = f * Vector3::new(p.x, p.y, 1.0);
            let norm = (l.x * l.x + l.y * l.y).sqrt();
            if norm > f64::EPSILON { l / norm } else { l }
        })
        .collect())
}

/// Lookup tables mapping each pixel of the rectified image back into the distorted source.
pub fn init_undistort_rectify_map(
    camera: &Matrix3<f64>,
    dist: &Vector5<f64>,
    rect: &Matrix3<f64>,
    new_camera: &Matrix3<f64>,
    size: (u32, u32)
) -> Result<RemapTable> {
    let inv = (new_camera * rect).try_inverse().ok_or_else(|| {
        Error::Calibration("rectified projection is not invertible".into())
    })?;

    let (width, height) = size;
    let mut map_x = Vec::with_capacity((width * height) as usize);
    let mut map_y = Vec::with_capacity((width * height) as usize);

    for v in 0..height {
        for u in 0..width {
            let ray = inv * Vector3::new(u as f64, v as f64, 1.0);
            let n = Vector2::new(ray.x / ray.z, ray.y / ray.z);
            let d = distort(&n, dist);
            map_x.push((camera[(0, 0)] * d.x + camera[(0, 1)] * d.y + camera[(0, 2)]) as f32);
            map_y.push((camera[(1, 1)] * d.y + camera[(1, 2)]) as f32);
        }
    }

    Ok(RemapTable {
        width,
        height,
        map_x,
        map_y
    })
}

/// Resample an image through a lookup table. Pixels mapping outside the source are black.
pub fn remap<P>(
    image: &ImageBuffer<P, Vec<u8>>,
    table: &RemapTable,
    interpolation: Interpolation
) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8> + 'static
{
    let channels = P::CHANNEL_COUNT as usize;
    let (sw, sh) = (image.width() as i64, image.height() as i64);
    let src: &[u8] = image.as_raw();

    let mut out = ImageBuffer::<P, Vec<u8>>::new(table.width, table.height);
    let dst: &mut [u8] = &mut out;

    for y in 0..table.height {
        for x in 0..table.width {
            let (fx, fy) = table.source(x, y);
            let base = ((y * table.width + x) as usize) * channels;

            match interpolation {
                Interpolation::Nearest => {
                    let sx = fx.round() as i64;
                    let sy = fy.round() as i64;
                    if sx < 0 || sy < 0 || sx >= sw || sy >= sh {
                        continue;
                    }
                    let s = ((sy * sw + sx) as usize) * channels;
                    dst[base..base + channels].copy_from_slice(&src[s..s + channels]);
                },
                Interpolation::Bilinear => {
                    let x0 = fx.floor() as i64;
                    let y0 = fy.floor() as i64;
                    if x0 < -1 || y0 < -1 || x0 >= sw || y0 >= sh {
                        continue;
                    }
                    let ax = fx - x0 as f32;
                    let ay = fy - y0 as f32;

                    for c in 0..channels {
                        let px = |xx: i64, yy: i64| -> f32 {
                            if xx < 0 || yy < 0 || xx >= sw || yy >= sh {
                                0.0
                            }
                            else {
                                src[((yy * sw + xx) as usize) * channels + c] as f32
                            }
                        };
                        let top = px(x0, y0) * (1.0 - ax) + px(x0 + 1, y0) * ax;
                        let bottom = px(x0, y0 + 1) * (1.0 - ax) + px(x0 + 1, y0 + 1) * ax;
                        let val = top * (1.0 - ay) + bottom * ay;
                        dst[base + c] = val.round().max(0.0).min(255.0) as u8;
                    }
                }
            }
        }
    }

    out
}

/// Remove lens distortion from a gray image, projecting with `new_camera`.
pub fn undistort(
    image: &GrayImage,
    camera: &Matrix3<f64>,
    dist: &Vector5<f64>,
    new_camera: &Matrix3<f64>
) -> Result<GrayImage> {
    let table = init_undistort_rectify_map(
        camera,
        dist,
        &Matrix3::identity(),
        new_camera,
        image.dimensions()
    )?;
    Ok(remap(image, &table, Interpolation::Bilinear))
}

/// Inner and outer rectangles of the undistorted (and optionally rectified) image border.
///
/// The outer rectangle bounds every source pixel, the inner one only contains valid pixels.
fn valid_rectangles(
    camera: &Matrix3<f64>,
    dist: &Vector5<f64>,
    rect: Option<&Matrix3<f64>>,
    proj: Option<&Matrix3<f64>>,
    size: (u32, u32)
) -> (RectF, RectF) {
    let (w, h) = (size.0 as f64, size.1 as f64);
    let mut grid = Vec::with_capacity(RECT_GRID * RECT_GRID);
    for i in 0..RECT_GRID {
        for j in 0..RECT_GRID {
            grid.push(Point2::new(
                j as f64 * (w - 1.0) / (RECT_GRID - 1) as f64,
                i as f64 * (h - 1.0) / (RECT_GRID - 1) as f64
            ));
        }
    }
    let pts = undistort_points(&grid, camera, dist, rect, proj);

    let (mut ox0, mut oy0) = (f64::MAX, f64::MAX);
    let (mut ox1, mut oy1) = (f64::MIN, f64::MIN);
    let (mut ix0, mut iy0) = (f64::MIN, f64::MIN);
    let (mut ix1, mut iy1) = (f64::MAX, f64::MAX);

    for i in 0..RECT_GRID {
        for j in 0..RECT_GRID {
            let p = pts[i * RECT_GRID + j];
            ox0 = ox0.min(p.x);
            ox1 = ox1.max(p.x);
            oy0 = oy0.min(p.y);
            oy1 = oy1.max(p.y);

            if j == 0 {
                ix0 = ix0.max(p.x);
            }
            if j == RECT_GRID - 1 {
                ix1 = ix1.min(p.x);
            }
            if i == 0 {
                iy0 = iy0.max(p.y);
            }
            if i == RECT_GRID - 1 {
                iy1 = iy1.min(p.y);
            }
        }
    }

    let inner = RectF {
        x: ix0,
        y: iy0,
        width: ix1 - ix0,
        height: iy1 - iy0
    };
    let outer = RectF {
        x: ox0,
        y: oy0,
        width: ox1 - ox0,
        height: oy1 - oy0
    };
    (inner, outer)
}

/// Scale an inner rectangle into the image frame of a rescaled projection.
fn scaled_roi(inner: &RectF, c0: (f64, f64), c: (f64, f64), s: f64, size: (u32, u32)) -> Roi {
    let roi = Roi::new(
        ((inner.x - c0.0) * s + c.0).ceil() as i32,
        ((inner.y - c0.1) * s + c.1).ceil() as i32,
        (inner.width * s).floor() as i32,
        (inner.height * s).floor() as i32
    );
    roi.intersect(&Roi::new(0, 0, size.0 as i32, size.1 as i32))
}

/// Camera matrix for undistorted images. `alpha = 0` keeps only valid pixels, `alpha = 1`
/// keeps every source pixel.
pub fn optimal_new_camera_matrix(
    camera: &Matrix3<f64>,
    dist: &Vector5<f64>,
    size: (u32, u32),
    alpha: f64,
    new_size: (u32, u32)
) -> (Matrix3<f64>, Roi) {
    let (inner, outer) = valid_rectangles(camera, dist, None, None, size);
    let (nw, nh) = (new_size.0 as f64, new_size.1 as f64);

    let fx0 = (nw - 1.0) / inner.width;
    let fy0 = (nh - 1.0) / inner.height;
    let cx0 = -fx0 * inner.x;
    let cy0 = -fy0 * inner.y;

    let fx1 = (nw - 1.0) / outer.width;
    let fy1 = (nh - 1.0) / outer.height;
    let cx1 = -fx1 * outer.x;
    let cy1 = -fy1 * outer.y;

    let fx = fx0 * (1.0 - alpha) + fx1 * alpha;
    let fy = fy0 * (1.0 - alpha) + fy1 * alpha;
    let cx = cx0 * (1.0 - alpha) + cx1 * alpha;
    let cy = cy0 * (1.0 - alpha) + cy1 * alpha;

    let roi = Roi::new(
        (inner.x * fx + cx).ceil() as i32,
        (inner.y * fy + cy).ceil() as i32,
        (inner.width * fx).floor() as i32,
        (inner.height * fy).floor() as i32
    )
    .intersect(&Roi::new(0, 0, new_size.0 as i32, new_size.1 as i32));

    (Matrix3::new(fx, 0.0, cx, 0.0, fy, cy, 0.0, 0.0, 1.0), roi)
}

/// Bouguet rectification of a calibrated stereo pair.
///
/// Each camera is rotated half way towards the other so that epipolar lines become horizontal
/// (or vertical, for vertically stacked rigs). `alpha < 0` keeps the default scaling; values in
/// `0..=1` scale between cropping to valid pixels and keeping every source pixel.
#[allow(clippy::too_many_arguments)]
pub fn stereo_rectify(
    camera1: &Matrix3<f64>,
    dist1: &Vector5<f64>,
    camera2: &Matrix3<f64>,
    dist2: &Vector5<f64>,
    size: (u32, u32),
    rot: &Matrix3<f64>,
    trans: &Vector3<f64>,
    alpha: f64
) -> Result<Rectification> {
    let baseline = trans.norm();
    if baseline < f64::EPSILON {
        return Err(Error::Calibration("stereo baseline is zero".into()));
    }

    let om = rodrigues_inverse(rot) * -0.5;
    let r_r = rodrigues(&om);
    let t = r_r * trans;

    let idx = if t.x.abs() > t.y.abs() { 0 } else { 1 };
    let c = t[idx];
    let mut uu = Vector3::zeros();
    uu[idx] = if c > 0.0 { 1.0 } else { -1.0 };

    let mut ww = t.cross(&uu);
    let nw = ww.norm();
    if nw > 0.0 {
        ww *= (c.abs() / baseline).acos() / nw;
    }
    let w_r = rodrigues(&ww);

    let r1 = w_r * r_r.transpose();
    let r2 = w_r * r_r;
    let t_new = r2 * trans;

    let (nx, ny) = (size.0 as f64, size.1 as f64);
    let cameras = [(camera1, dist1, &r1), (camera2, dist2, &r2)];

    // Common focal length, shrunk for barrel distortion.
    let mut fc_new = f64::MAX;
    for (cam, dist, _) in cameras.iter() {
        let mut fc = cam[(idx ^ 1, idx ^ 1)];
        let k1 = dist[0];
        if k1 < 0.0 {
            fc *= 1.0 + k1 * (nx * nx + ny * ny) / (4.0 * fc * fc);
        }
        fc_new = fc_new.min(fc);
    }

    // Principal points centring the undistorted image corners.
    let corners = [
        Point2::new(0.0, 0.0),
        Point2::new(nx - 1.0, 0.0),
        Point2::new(0.0, ny - 1.0),
        Point2::new(nx - 1.0, ny - 1.0)
    ];
    let fc_only = Matrix3::new(fc_new, 0.0, 0.0, 0.0, fc_new, 0.0, 0.0, 0.0, 1.0);
    let mut cc_new = [(0.0, 0.0); 2];
    for (k, (cam, dist, r)) in cameras.iter().enumerate() {
        let pts = undistort_points(&corners, cam, dist, Some(*r), Some(&fc_only));
        let avg_x = pts.iter().map(|p| p.x).sum::<f64>() / 4.0;
        let avg_y = pts.iter().map(|p| p.y).sum::<f64>() / 4.0;
        cc_new[k] = ((nx - 1.0) * 0.5 - avg_x, (ny - 1.0) * 0.5 - avg_y);
    }
    if idx == 0 {
        let cy = 0.5 * (cc_new[0].1 + cc_new[1].1);
        cc_new[0].1 = cy;
        cc_new[1].1 = cy;
    }
    else {
        let cx = 0.5 * (cc_new[0].0 + cc_new[1].0);
        cc_new[0].0 = cx;
        cc_new[1].0 = cx;
    }

    let new_camera = |fc: f64, cc: (f64, f64)| Matrix3::new(fc, 0.0, cc.0, 0.0, fc, cc.1, 0.0, 0.0, 1.0);

    let (inner1, outer1) =
        valid_rectangles(camera1, dist1, Some(&r1), Some(&new_camera(fc_new, cc_new[0])), size);
    let (inner2, outer2) =
        valid_rectangles(camera2, dist2, Some(&r2), Some(&new_camera(fc_new, cc_new[1])), size);

    let c1_0 = cc_new[0];
    let c2_0 = cc_new[1];
    let (c1, c2) = (c1_0, c2_0);

    let mut s = 1.0;
    if alpha >= 0.0 {
        let inner_scale = |c: (f64, f64), c0: (f64, f64), r: &RectF| {
            (c.0 / (c0.0 - r.x))
                .max(c.1 / (c0.1 - r.y))
                .max((nx - 1.0 - c.0) / (r.x + r.width - c0.0))
                .max((ny - 1.0 - c.1) / (r.y + r.height - c0.1))
        };
        let outer_scale = |c: (f64, f64), c0: (f64, f64), r: &RectF| {
            (c.0 / (c0.0 - r.x))
                .min(c.1 / (c0.1 - r.y))
                .min((nx - 1.0 - c.0) / (r.x + r.width - c0.0))
                .min((ny - 1.0 - c.1) / (r.y + r.height - c0.1))
        };

        let s0 = inner_scale(c1, c1_0, &inner1).max(inner_scale(c2, c2_0, &inner2));
        let s1 = outer_scale(c1, c1_0, &outer1).min(outer_scale(c2, c2_0, &outer2));
        s = s0 * (1.0 - alpha) + s1 * alpha;
        if !s.is_finite() || s <= 0.0 {
            log::warn!("Degenerate rectification scale {}, keeping the default", s);
            s = 1.0;
        }
    }

    let fc = fc_new * s;

    let p1 = rectified_projection(fc, c1);
    let mut p2 = rectified_projection(fc, c2);
    p2[(idx, 3)] = t_new[idx] * fc;

    let roi1 = scaled_roi(&inner1, c1_0, c1, s, size);
    let roi2 = scaled_roi(&inner2, c2_0, c2, s, size);

    let tx = t_new[idx];
    let cc_diff = if idx == 0 { c1.0 - c2.0 } else { c1.1 - c2.1 };
    let q = Matrix4::new(
        1.0, 0.0, 0.0, -c1.0,
        0.0, 1.0, 0.0, -c1.1,
        0.0, 0.0, 0.0, fc,
        0.0, 0.0, -1.0 / tx, cc_diff / tx
    );

    Ok(Rectification {
        r1,
        r2,
        p1,
        p2,
        q,
        roi1,
        roi2
    })
}

fn rectified_projection(fc: f64, cc: (f64, f64)) -> Matrix3x4<f64> {
    Matrix3x4::new(fc, 0.0, cc.0, 0.0, 0.0, fc, cc.1, 0.0, 0.0, 0.0, 1.0, 0.0)
}

/// The left 3x3 block of a projection matrix.
pub fn projection_camera(p: &Matrix3x4<f64>) -> Matrix3<f64> {
    p.fixed_view::<3, 3>(0, 0).into_owned()
}
