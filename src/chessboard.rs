//! # Chessboard detection
//!
//! Finds the inner corners of a chessboard pattern and refines them to sub-pixel accuracy.
//!
//! Detection runs in four stages:
//!
//! 1. a saddle-point response (negated determinant of the Hessian of the smoothed image), which
//!    peaks on the X-junctions where four squares meet,
//! 2. non-maximum suppression and a ring test that keeps only points surrounded by two bright
//!    and two dark opposite sectors, rejecting the L- and T-junctions along the board border,
//! 3. grid growing from a seed point along the two lattice directions, extrapolating each step
//!    from the previous one so perspective distortion is followed,
//! 4. gradient-orthogonality sub-pixel refinement.
//!
//! Corners are returned row by row, with `pattern.0` corners per row and `pattern.1` rows,
//! ordered so that the board frame is right-handed in the image.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::collections::{HashMap, VecDeque};

use image::{GrayImage, Rgb, RgbImage};
use imageproc::drawing::{draw_cross_mut, draw_hollow_circle_mut, draw_line_segment_mut};
use imageproc::filter::{filter3x3, gaussian_blur_f32};
use nalgebra::{Point2, Point3, Vector2};
use serde::{Deserialize, Serialize};

use crate::error::*;
use crate::float_image::GrayFloatImage;

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Number of samples taken on the ring around a candidate corner.
const RING_SAMPLES: usize = 16;

/// Central difference kernels, row-major.
const CENTRAL_DIFF_X: [f32; 9] = [0.0, 0.0, 0.0, -0.5, 0.0, 0.5, 0.0, 0.0, 0.0];
const CENTRAL_DIFF_Y: [f32; 9] = [0.0, -0.5, 0.0, 0.0, 0.0, 0.0, 0.0, 0.5, 0.0];

/// Row colours used when drawing a detected pattern.
const ROW_COLOURS: [[u8; 3]; 7] = [
    [255, 0, 0],
    [255, 128, 0],
    [200, 200, 0],
    [0, 255, 0],
    [0, 200, 200],
    [0, 0, 255],
    [255, 0, 255]
];

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Termination criteria of iterative refinements.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TermCriteria {
    pub max_iter: usize,
    pub epsilon: f64
}

/// Tunables of the corner detector.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorParams {
    /// Standard deviation of the smoothing applied before the saddle response.
    pub sigma: f32,
    /// Half size of the non-maximum suppression window.
    pub nms_radius: usize,
    /// Minimum response, as a fraction of the strongest response in the image.
    pub relative_threshold: f32,
    /// Radius of the ring test, in pixels. Must be under half a square.
    pub ring_radius: f32,
    /// Minimum intensity difference between the bright and dark sectors.
    pub min_contrast: f32,
    /// Half size of the sub-pixel refinement window.
    pub sub_pix_window: usize
}

/// Finds chessboard corners in gray images.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChessboardFinder {
    /// Inner corners per row and number of rows.
    pub pattern: (usize, usize),
    pub criteria: TermCriteria,
    pub params: DetectorParams
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    pos: Vector2<f64>,
    response: f32
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl TermCriteria {
    /// Criteria used for single camera corner refinement.
    pub const DEFAULT: TermCriteria = TermCriteria {
        max_iter: 30,
        epsilon: 0.001
    };

    /// Criteria used when refining corners for stereo calibration.
    pub const STEREO: TermCriteria = TermCriteria {
        max_iter: 100,
        epsilon: 1e-5
    };
}

impl Default for TermCriteria {
    fn default() -> Self {
        TermCriteria::DEFAULT
    }
}

impl Default for DetectorParams {
    fn default() -> Self {
        DetectorParams {
            sigma: 1.5,
            nms_radius: 3,
            relative_threshold: 0.1,
            ring_radius: 4.0,
            min_contrast: 20.0,
            sub_pix_window: 5
        }
    }
}

impl ChessboardFinder {
    pub fn new(pattern: (usize, usize)) -> Self {
        ChessboardFinder {
            pattern,
            criteria: TermCriteria::default(),
            params: DetectorParams::default()
        }
    }

    pub fn with_criteria(mut self, criteria: TermCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    pub fn with_params(mut self, params: DetectorParams) -> Self {
        self.params = params;
        self
    }

    /// Number of corners in a complete detection.
    pub fn corner_count(&self) -> usize {
        self.pattern.0 * self.pattern.1
    }

    /// Find the sub-pixel chessboard corners in a gray image.
    pub fn find_corners(&self, image: &GrayImage) -> Result<Vec<Point2<f64>>> {
        let (pw, ph) = self.pattern;
        if pw < 2 || ph < 2 {
            return Err(Error::Calibration(format!(
                "chessboard pattern must be at least 2x2, got {}x{}",
                pw, ph
            )));
        }
        if image.width() < 16 || image.height() < 16 {
            return Err(Error::ChessboardNotFound);
        }

        let raw = GrayFloatImage::from_luma(image);
        let candidates = self.find_candidates(&raw);
        if candidates.len() < self.corner_count() {
            log::debug!(
                "Only {} corner candidates, {} needed",
                candidates.len(),
                self.corner_count()
            );
            return Err(Error::ChessboardNotFound);
        }

        let mut corners = self
            .assemble_grid(&candidates)
            .ok_or(Error::ChessboardNotFound)?;

        corner_sub_pix(&raw, &mut corners, self.params.sub_pix_window, self.criteria);

        Ok(corners)
    }

    /// Saddle point candidates that pass the ring test, strongest first.
    fn find_candidates(&self, raw: &GrayFloatImage) -> Vec<Candidate> {
        let smooth = gaussian_blur(raw, self.params.sigma);
        let (w, h) = (smooth.width(), smooth.height());

        let mut response = GrayFloatImage::new(w, h);
        let mut max_response = 0.0f32;
        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let c = smooth.get(x, y);
                let ixx = smooth.get(x + 1, y) - 2.0 * c + smooth.get(x - 1, y);
                let iyy = smooth.get(x, y + 1) - 2.0 * c + smooth.get(x, y - 1);
                let ixy = (smooth.get(x + 1, y + 1) - smooth.get(x + 1, y - 1)
                    - smooth.get(x - 1, y + 1)
                    + smooth.get(x - 1, y - 1))
                    * 0.25;
                let r = ixy * ixy - ixx * iyy;
                if r > 0.0 {
                    response.put(x, y, r);
                    max_response = max_response.max(r);
                }
            }
        }
        if max_response <= 0.0 {
            return Vec::new();
        }

        let threshold = max_response * self.params.relative_threshold;
        let nms = self.params.nms_radius as isize;
        let margin = (self.params.ring_radius.ceil() as usize + 2).max(self.params.nms_radius);
        let mut candidates = Vec::new();

        for y in margin..h.saturating_sub(margin) {
            for x in margin..w.saturating_sub(margin) {
                let r = response.get(x, y);
                if r <= threshold {
                    continue;
                }

                let mut is_max = true;
                'window: for dy in -nms..=nms {
                    for dx in -nms..=nms {
                        if dx == 0 && dy == 0 {
                            continue;
                        }
                        let nx = (x as isize + dx) as usize;
                        let ny = (y as isize + dy) as usize;
                        let n = response.get(nx, ny);
                        // Ties go to the first pixel in scan order.
                        if n > r || (n == r && (ny, nx) < (y, x)) {
                            is_max = false;
                            break 'window;
                        }
                    }
                }

                if is_max && self.ring_test(raw, x as f32, y as f32) {
                    candidates.push(Candidate {
                        pos: Vector2::new(x as f64, y as f64),
                        response: r
                    });
                }
            }
        }

        candidates.sort_by(|a, b| {
            b.response
                .partial_cmp(&a.response)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(self.corner_count() * 8);

        log::debug!("Found {} X-junction candidates", candidates.len());
        candidates
    }

    /// Check that the ring around `(x, y)` shows two bright and two dark opposite sectors.
    fn ring_test(&self, raw: &GrayFloatImage, x: f32, y: f32) -> bool {
        let radius = self.params.ring_radius;
        let mut samples = [0.0f32; RING_SAMPLES];
        for (k, s) in samples.iter_mut().enumerate() {
            let angle = k as f32 * std::f32::consts::PI * 2.0 / RING_SAMPLES as f32;
            *s = sample_bilinear(raw, x + radius * angle.cos(), y + radius * angle.sin());
        }

        let min = samples.iter().copied().fold(f32::INFINITY, f32::min);
        let max = samples.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        if max - min < self.params.min_contrast {
            return false;
        }

        let mid = 0.5 * (min + max);
        let bright: Vec<bool> = samples.iter().map(|&s| s > mid).collect();

        let changes = (0..RING_SAMPLES)
            .filter(|&k| bright[k] != bright[(k + 1) % RING_SAMPLES])
            .count();
        let symmetric = (0..RING_SAMPLES)
            .filter(|&k| bright[k] == bright[(k + RING_SAMPLES / 2) % RING_SAMPLES])
            .count();

        changes == 4 && symmetric >= RING_SAMPLES * 3 / 4
    }

    /// Grow a lattice of candidates and cut it to the pattern, trying the strongest seeds first.
    fn assemble_grid(&self, candidates: &[Candidate]) -> Option<Vec<Point2<f64>>> {
        let max_seeds = candidates.len().min(12);

        for seed in 0..max_seeds {
            let grid = match grow_grid(candidates, seed) {
                Some(grid) => grid,
                None => continue
            };

            if let Some(corners) = self.order_grid(&grid, candidates) {
                return Some(corners);
            }
        }

        log::debug!("No seed grew into a complete {}x{} grid", self.pattern.0, self.pattern.1);
        None
    }

    /// Check a grown lattice matches the pattern exactly, and order its points.
    fn order_grid(
        &self,
        grid: &HashMap<(i32, i32), usize>,
        candidates: &[Candidate]
    ) -> Option<Vec<Point2<f64>>> {
        let (pw, ph) = self.pattern;
        if grid.len() != pw * ph {
            return None;
        }

        let imin = grid.keys().map(|k| k.0).min()?;
        let imax = grid.keys().map(|k| k.0).max()?;
        let jmin = grid.keys().map(|k| k.1).min()?;
        let jmax = grid.keys().map(|k| k.1).max()?;
        let ni = (imax - imin + 1) as usize;
        let nj = (jmax - jmin + 1) as usize;

        let at = |i: i32, j: i32| candidates[grid[&(i, j)]].pos;

        // Mean step along each lattice axis.
        let mut step_i = Vector2::zeros();
        let mut step_j = Vector2::zeros();
        for (&(i, j), _) in grid.iter() {
            if grid.contains_key(&(i + 1, j)) {
                step_i += at(i + 1, j) - at(i, j);
            }
            if grid.contains_key(&(i, j + 1)) {
                step_j += at(i, j + 1) - at(i, j);
            }
        }

        // Decide which lattice axis runs along the pattern rows.
        let i_is_row = if ni == pw && nj == ph && pw != ph {
            true
        }
        else if ni == ph && nj == pw && pw != ph {
            false
        }
        else if ni == pw && nj == ph {
            step_i.x.abs() >= step_j.x.abs()
        }
        else {
            return None;
        };

        // Map (column, row) of the pattern to lattice coordinates.
        let (mut u_dir, v_dir) = if i_is_row { (step_i, step_j) } else { (step_j, step_i) };
        let flip_u = if u_dir.x.abs() > 0.1 * u_dir.norm() { u_dir.x < 0.0 } else { u_dir.y < 0.0 };
        if flip_u {
            u_dir = -u_dir;
        }
        let flip_v = u_dir.x * v_dir.y - u_dir.y * v_dir.x < 0.0;

        let mut out = Vec::with_capacity(pw * ph);
        for row in 0..ph as i32 {
            for col in 0..pw as i32 {
                let u = if flip_u { pw as i32 - 1 - col } else { col };
                let v = if flip_v { ph as i32 - 1 - row } else { row };
                let (i, j) = if i_is_row { (imin + u, jmin + v) } else { (imin + v, jmin + u) };
                let p = at(i, j);
                out.push(Point2::new(p.x, p.y));
            }
        }

        Some(out)
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Planar board coordinates of the inner corners, in detection order.
pub fn object_points(pattern: (usize, usize), square_size: f64) -> Vec<Point3<f64>> {
    let (pw, ph) = pattern;
    let mut points = Vec::with_capacity(pw * ph);
    for j in 0..ph {
        for i in 0..pw {
            points.push(Point3::new(i as f64 * square_size, j as f64 * square_size, 0.0));
        }
    }
    points
}

/// Refine corner positions so that image gradients in a window around each corner are
/// orthogonal to the vector from the corner.
///
/// Corners that drift further than the window are restored to their starting position.
pub fn corner_sub_pix(
    image: &GrayFloatImage,
    corners: &mut [Point2<f64>],
    half_window: usize,
    criteria: TermCriteria
) {
    let win = half_window.max(1) as i32;
    let sigma2 = (win * win) as f64;

    let buffer = image.to_buffer();
    let grad_x = GrayFloatImage::from_buffer(&filter3x3::<_, f32, f32>(&buffer, &CENTRAL_DIFF_X));
    let grad_y = GrayFloatImage::from_buffer(&filter3x3::<_, f32, f32>(&buffer, &CENTRAL_DIFF_Y));

    for corner in corners.iter_mut() {
        let start = *corner;
        let mut q = start;

        for _ in 0..criteria.max_iter.max(1) {
            let (mut a, mut b, mut c) = (0.0f64, 0.0f64, 0.0f64);
            let (mut bb1, mut bb2) = (0.0f64, 0.0f64);

            for dy in -win..=win {
                for dx in -win..=win {
                    let px = q.x + dx as f64;
                    let py = q.y + dy as f64;
                    let gx = sample_bilinear(&grad_x, px as f32, py as f32) as f64;
                    let gy = sample_bilinear(&grad_y, px as f32, py as f32) as f64;
                    let weight = (-((dx * dx + dy * dy) as f64) / sigma2).exp();

                    let gxx = gx * gx * weight;
                    let gxy = gx * gy * weight;
                    let gyy = gy * gy * weight;

                    a += gxx;
                    b += gxy;
                    c += gyy;
                    bb1 += gxx * px + gxy * py;
                    bb2 += gxy * px + gyy * py;
                }
            }

            let det = a * c - b * b;
            if det.abs() <= f64::EPSILON * a.max(c).max(1.0) {
                break;
            }

            let next = Point2::new((c * bb1 - b * bb2) / det, (a * bb2 - b * bb1) / det);
            let shift = (next - q).norm();
            q = next;
            if shift <= criteria.epsilon {
                break;
            }
        }

        if (q - start).norm() <= win as f64 {
            *corner = q;
        }
    }
}

/// Draw detected corners on a colour image.
///
/// A complete detection is drawn as one coloured polyline per row; an incomplete one as red
/// crosses.
pub fn draw_corners(
    image: &mut RgbImage,
    pattern: (usize, usize),
    corners: &[Point2<f64>],
    found: bool
) {
    if !found || corners.len() != pattern.0 * pattern.1 {
        let red = Rgb([255, 0, 0]);
        for c in corners {
            draw_cross_mut(image, red, c.x.round() as i32, c.y.round() as i32);
            draw_hollow_circle_mut(image, (c.x.round() as i32, c.y.round() as i32), 4, red);
        }
        return;
    }

    let mut previous: Option<Point2<f64>> = None;
    for (row, chunk) in corners.chunks(pattern.0).enumerate() {
        let colour = Rgb(ROW_COLOURS[row % ROW_COLOURS.len()]);
        for c in chunk {
            if let Some(p) = previous {
                draw_line_segment_mut(
                    image,
                    (p.x as f32, p.y as f32),
                    (c.x as f32, c.y as f32),
                    colour
                );
            }
            draw_hollow_circle_mut(image, (c.x.round() as i32, c.y.round() as i32), 4, colour);
            previous = Some(*c);
        }
    }
}

/// Bilinear sample with clamping to the image border.
pub(crate) fn sample_bilinear(image: &GrayFloatImage, x: f32, y: f32) -> f32 {
    let max_x = (image.width() - 1) as f32;
    let max_y = (image.height() - 1) as f32;
    let x = x.max(0.0).min(max_x);
    let y = y.max(0.0).min(max_y);

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(image.width() - 1);
    let y1 = (y0 + 1).min(image.height() - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let top = image.get(x0, y0) * (1.0 - fx) + image.get(x1, y0) * fx;
    let bottom = image.get(x0, y1) * (1.0 - fx) + image.get(x1, y1) * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Gaussian blur with clamped borders.
fn gaussian_blur(image: &GrayFloatImage, sigma: f32) -> GrayFloatImage {
    if sigma <= 0.0 {
        return image.clone();
    }
    GrayFloatImage::from_buffer(&gaussian_blur_f32(&image.to_buffer(), sigma))
}

/// Grow a lattice from `candidates[seed]`, returning lattice coordinates of each member.
fn grow_grid(candidates: &[Candidate], seed: usize) -> Option<HashMap<(i32, i32), usize>> {
    let origin = candidates[seed].pos;

    // Nearest neighbour gives the first lattice direction, the nearest clearly non-parallel
    // neighbour of similar length the second.
    let mut neighbours: Vec<(f64, usize)> = candidates
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != seed)
        .map(|(i, c)| ((c.pos - origin).norm(), i))
        .collect();
    neighbours.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let (first_len, first) = *neighbours.first()?;
    if first_len < 1.0 {
        return None;
    }
    let step_a = candidates[first].pos - origin;
    let step_b = neighbours.iter().skip(1).find_map(|&(len, i)| {
        let v = candidates[i].pos - origin;
        let cos = (v.dot(&step_a) / (len * first_len)).abs();
        if cos < 0.6 && len < first_len * 2.0 {
            Some(v)
        }
        else {
            None
        }
    })?;

    let mut grid: HashMap<(i32, i32), usize> = HashMap::new();
    let mut used = vec![false; candidates.len()];
    let mut queue = VecDeque::new();

    grid.insert((0, 0), seed);
    used[seed] = true;
    queue.push_back((0i32, 0i32));

    while let Some((i, j)) = queue.pop_front() {
        let p = candidates[grid[&(i, j)]].pos;

        for &(di, dj) in &[(1, 0), (-1, 0), (0, 1), (0, -1)] {
            let key = (i + di, j + dj);
            if grid.contains_key(&key) {
                continue;
            }

            // Extrapolate from the point behind us on the same line when there is one.
            let behind = grid.get(&(i - di, j - dj)).map(|&k| candidates[k].pos);
            let step = match behind {
                Some(b) => p - b,
                None => local_step(&grid, candidates, (i, j), (di, dj)).unwrap_or_else(|| {
                    if di != 0 { step_a * di as f64 } else { step_b * dj as f64 }
                })
            };

            let predicted = p + step;
            let tolerance = 0.3 * step.norm();

            let mut best: Option<(f64, usize)> = None;
            for (k, c) in candidates.iter().enumerate() {
                if used[k] {
                    continue;
                }
                let dist = (c.pos - predicted).norm();
                if dist < tolerance && best.map_or(true, |(bd, _)| dist < bd) {
                    best = Some((dist, k));
                }
            }

            if let Some((_, k)) = best {
                used[k] = true;
                grid.insert(key, k);
                queue.push_back(key);
            }
        }
    }

    Some(grid)
}

/// Step along `(di, dj)` measured at a lattice neighbour of `(i, j)` on the perpendicular axis.
fn local_step(
    grid: &HashMap<(i32, i32), usize>,
    candidates: &[Candidate],
    (i, j): (i32, i32),
    (di, dj): (i32, i32)
) -> Option<Vector2<f64>> {
    let across = [(dj, di), (-dj, -di)];
    for &(ai, aj) in &across {
        let from = grid.get(&(i + ai, j + aj));
        let to = grid.get(&(i + ai + di, j + aj + dj));
        if let (Some(&f), Some(&t)) = (from, to) {
            return Some(candidates[t].pos - candidates[f].pos);
        }
        let back = grid.get(&(i + ai - di, j + aj - dj));
        if let (Some(&f), Some(&b)) = (from, back) {
            return Some(candidates[f].pos - candidates[b].pos);
        }
    }
    None
}
