//! Synthetic images shared by the integration tests.
#![allow(dead_code)]

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use cv_stereo_rig::calibration::geometry::{camera_matrix, undistort_normalised, Pose};
use image::{GrayImage, Luma};
use nalgebra::{Matrix3, Vector2, Vector3, Vector5};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

pub const WIDTH: u32 = 640;
pub const HEIGHT: u32 = 480;

/// Inner corners per row and number of rows of the test board.
pub const PATTERN: (usize, usize) = (7, 5);

pub const SQUARE: f64 = 30.0;

const BLACK: f32 = 25.0;
const WHITE: f32 = 225.0;
const BACKGROUND: f32 = 120.0;

/// Subsamples per pixel side when rendering.
const SUPERSAMPLE: usize = 3;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Pinhole camera used to render boards.
#[derive(Clone, Copy, Debug)]
pub struct SyntheticCamera {
    pub matrix: Matrix3<f64>,
    pub dist: Vector5<f64>
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl SyntheticCamera {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        SyntheticCamera {
            matrix: camera_matrix(fx, fy, cx, cy),
            dist: Vector5::zeros()
        }
    }

    pub fn with_dist(mut self, dist: Vector5<f64>) -> Self {
        self.dist = dist;
        self
    }

    /// Render the test board seen through `pose`.
    pub fn render_board(&self, pose: &Pose) -> GrayImage {
        let rot = pose.rotation();
        // Columns r1, r2, t map board (X, Y, 1) to camera rays.
        let plane = Matrix3::from_columns(&[rot.column(0).into_owned(), rot.column(1).into_owned(), pose.tvec]);
        let to_board = plane.try_inverse().expect("board plane seen edge on");

        let (fx, fy) = (self.matrix[(0, 0)], self.matrix[(1, 1)]);
        let (cx, cy) = (self.matrix[(0, 2)], self.matrix[(1, 2)]);
        let (pw, ph) = PATTERN;
        let distorted = self.dist != Vector5::zeros();

        let mut img = GrayImage::new(WIDTH, HEIGHT);
        for y in 0..HEIGHT {
            for x in 0..WIDTH {
                let mut acc = 0.0;
                for sy in 0..SUPERSAMPLE {
                    for sx in 0..SUPERSAMPLE {
                        let u = x as f64 + (sx as f64 + 0.5) / SUPERSAMPLE as f64 - 0.5;
                        let v = y as f64 + (sy as f64 + 0.5) / SUPERSAMPLE as f64 - 0.5;
                        let mut n = Vector2::new((u - cx) / fx, (v - cy) / fy);
                        if distorted {
                            n = undistort_normalised(&n, &self.dist);
                        }
                        let b = to_board * Vector3::new(n.x, n.y, 1.0);
                        if b.z.abs() < 1e-12 {
                            acc += BACKGROUND;
                            continue;
                        }
                        acc += board_intensity(b.x / b.z, b.y / b.z, pw, ph);
                    }
                }
                let value = acc / (SUPERSAMPLE * SUPERSAMPLE) as f32;
                img.put_pixel(x, y, Luma([value.round() as u8]));
            }
        }

        img
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Pose looking at the board centre from `distance`, turned by `rvec` about that centre and
/// shifted by `offset` in the camera frame.
pub fn board_pose(rvec: Vector3<f64>, distance: f64, offset: Vector3<f64>) -> Pose {
    let centre = Vector3::new(
        (PATTERN.0 - 1) as f64 * SQUARE / 2.0,
        (PATTERN.1 - 1) as f64 * SQUARE / 2.0,
        0.0
    );
    let rot = cv_stereo_rig::calibration::geometry::rodrigues(&rvec);
    Pose::new(rvec, Vector3::new(0.0, 0.0, distance) + offset - rot * centre)
}

/// A set of views varied enough to calibrate from.
pub fn calibration_poses() -> Vec<Pose> {
    vec![
        board_pose(Vector3::new(0.35, 0.0, 0.0), 420.0, Vector3::new(0.0, 0.0, 0.0)),
        board_pose(Vector3::new(-0.35, 0.05, 0.0), 430.0, Vector3::new(10.0, -5.0, 0.0)),
        board_pose(Vector3::new(0.0, 0.35, 0.05), 440.0, Vector3::new(-15.0, 0.0, 0.0)),
        board_pose(Vector3::new(0.05, -0.35, -0.05), 410.0, Vector3::new(5.0, 10.0, 0.0)),
        board_pose(Vector3::new(0.25, 0.25, 0.1), 450.0, Vector3::new(0.0, 5.0, 0.0)),
        board_pose(Vector3::new(-0.2, -0.25, -0.1), 430.0, Vector3::new(-5.0, -10.0, 0.0)),
    ]
}

/// Intensity of the board plane at board coordinates `(bx, by)`, with a one square white margin
/// around the squares.
fn board_intensity(bx: f64, by: f64, pw: usize, ph: usize) -> f32 {
    let cx = (bx / SQUARE).floor() as i64;
    let cy = (by / SQUARE).floor() as i64;

    // Squares span -1..pw by -1..ph, the margin one more on each side.
    if cx < -2 || cy < -2 || cx > pw as i64 || cy > ph as i64 {
        return BACKGROUND;
    }
    if cx < -1 || cy < -1 || cx > pw as i64 - 1 || cy > ph as i64 - 1 {
        return WHITE;
    }
    if (cx + cy).rem_euclid(2) == 0 {
        BLACK
    }
    else {
        WHITE
    }
}

/// Deterministic texture for block matching tests.
pub fn random_texture(width: u32, height: u32, seed: u64) -> GrayImage {
    let mut state = seed.max(1);
    let mut img = GrayImage::new(width, height);
    for p in img.pixels_mut() {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        p.0[0] = (state % 256) as u8;
    }
    img
}

/// Left/right pair of a fronto-parallel textured plane at a constant `disparity`.
pub fn shifted_pair(width: u32, height: u32, disparity: u32, seed: u64) -> (GrayImage, GrayImage) {
    let texture = random_texture(width + disparity, height, seed);
    let left = image::imageops::crop_imm(&texture, 0, 0, width, height).to_image();
    let right = image::imageops::crop_imm(&texture, disparity, 0, width, height).to_image();
    (left, right)
}
