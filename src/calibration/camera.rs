//! # Single camera calibration

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::collections::HashMap;

use image::GrayImage;
use nalgebra::{DVector, Matrix3, Point2, Point3, Vector3, Vector5};

use super::geometry::{
    camera_matrix, find_homography, init_camera_matrix, levenberg_marquardt,
    pose_from_homography, reprojection_residuals, Pose
};
use super::rectify::{optimal_new_camera_matrix, undistort, Roi};
use super::{table_from_matrix, matrix_from_table, scalar_from_table, Calibration, Table};
use crate::chessboard::{object_points, ChessboardFinder, TermCriteria};
use crate::error::*;

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Intrinsic parameters refined jointly with the poses: fx, fy, cx, cy and five distortion
/// coefficients.
const INTRINSIC_PARAMS: usize = 9;

/// Refinement criteria of the full calibration.
const REFINE_CRITERIA: TermCriteria = TermCriteria {
    max_iter: 60,
    epsilon: 1e-12
};

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Intrinsics of one camera and the board poses they were estimated from.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraCalibration {
    /// Root mean square reprojection error in pixels.
    pub rmse: f64,
    pub camera_matrix: Matrix3<f64>,
    /// `(k1, k2, p1, p2, k3)`
    pub dist_coeffs: Vector5<f64>,
    pub rvecs: Vec<Vector3<f64>>,
    pub tvecs: Vec<Vector3<f64>>,
    pub image_size: (u32, u32)
}

/// Accumulates chessboard views of a single camera.
#[derive(Clone, Debug)]
pub struct CameraCalibrator {
    finder: ChessboardFinder,
    square_size: f64,
    image_size: (u32, u32),
    image_count: usize,
    corner_coordinates: Vec<Point3<f64>>,
    object_points: Vec<Vec<Point3<f64>>>,
    image_points: Vec<Vec<Point2<f64>>>
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Default for CameraCalibration {
    fn default() -> Self {
        CameraCalibration {
            rmse: 0.0,
            camera_matrix: Matrix3::identity(),
            dist_coeffs: Vector5::zeros(),
            rvecs: Vec::new(),
            tvecs: Vec::new(),
            image_size: (0, 0)
        }
    }
}

impl CameraCalibration {
    /// Camera matrix and valid region for undistorted images, see
    /// [`optimal_new_camera_matrix`].
    pub fn optimal_new_camera_matrix(&self, alpha: f64, new_size: (u32, u32)) -> (Matrix3<f64>, Roi) {
        optimal_new_camera_matrix(
            &self.camera_matrix,
            &self.dist_coeffs,
            self.image_size,
            alpha,
            new_size
        )
    }

    /// Undistort a gray image, keeping the calibrated camera matrix unless another is given.
    pub fn undistort(&self, image: &GrayImage, new_matrix: Option<&Matrix3<f64>>) -> Result<GrayImage> {
        let new_matrix = new_matrix.unwrap_or(&self.camera_matrix);
        undistort(image, &self.camera_matrix, &self.dist_coeffs, new_matrix)
    }

    pub fn poses(&self) -> Vec<Pose> {
        self.rvecs
            .iter()
            .zip(self.tvecs.iter())
            .map(|(r, t)| Pose::new(*r, *t))
            .collect()
    }
}

impl Calibration for CameraCalibration {
    fn keys() -> Vec<String> {
        ["rmse", "mtx", "dist", "rvecs", "tvecs", "image_size"]
            .iter()
            .map(|k| k.to_string())
            .collect()
    }

    fn to_tables(&self) -> Vec<(String, Table)> {
        vec![
            ("rmse".into(), vec![vec![self.rmse]]),
            ("mtx".into(), table_from_matrix(&self.camera_matrix)),
            ("dist".into(), table_from_matrix(&self.dist_coeffs.transpose())),
            ("rvecs".into(), self.rvecs.iter().map(|r| r.iter().copied().collect()).collect()),
            ("tvecs".into(), self.tvecs.iter().map(|t| t.iter().copied().collect()).collect()),
            (
                "image_size".into(),
                vec![vec![self.image_size.0 as f64, self.image_size.1 as f64]]
            ),
        ]
    }

    fn from_tables(tables: &HashMap<String, Table>) -> Result<Self> {
        let vectors = |key: &str| -> Result<Vec<Vector3<f64>>> {
            super::table(tables, key)?
                .iter()
                .map(|row| match row.as_slice() {
                    [x, y, z] => Ok(Vector3::new(*x, *y, *z)),
                    _ => Err(Error::Calibration(format!("{} rows must hold 3 values", key)))
                })
                .collect()
        };

        let dist = matrix_from_table::<1, 5>(tables, "dist")?;
        let size = matrix_from_table::<1, 2>(tables, "image_size")?;

        Ok(CameraCalibration {
            rmse: scalar_from_table(tables, "rmse")?,
            camera_matrix: matrix_from_table::<3, 3>(tables, "mtx")?,
            dist_coeffs: dist.transpose(),
            rvecs: vectors("rvecs")?,
            tvecs: vectors("tvecs")?,
            image_size: (size[0] as u32, size[1] as u32)
        })
    }
}

impl CameraCalibrator {
    /// `pattern` counts inner corners per row and rows, `square_size` is in the unit wanted for
    /// translations.
    pub fn new(pattern: (usize, usize), square_size: f64, image_size: (u32, u32)) -> Self {
        CameraCalibrator {
            finder: ChessboardFinder::new(pattern).with_criteria(TermCriteria::DEFAULT),
            square_size,
            image_size,
            image_count: 0,
            corner_coordinates: object_points(pattern, square_size),
            object_points: Vec::new(),
            image_points: Vec::new()
        }
    }

    pub fn finder(&self) -> &ChessboardFinder {
        &self.finder
    }

    pub fn finder_mut(&mut self) -> &mut ChessboardFinder {
        &mut self.finder
    }

    pub fn image_count(&self) -> usize {
        self.image_count
    }

    pub fn square_size(&self) -> f64 {
        self.square_size
    }

    pub fn image_points(&self) -> &[Vec<Point2<f64>>] {
        &self.image_points
    }

    pub fn object_points(&self) -> &[Vec<Point3<f64>>] {
        &self.object_points
    }

    /// Find the chessboard in `image` and record its corners, which are also returned.
    ///
    /// Nothing is recorded when no board is found.
    pub fn add_corners(&mut self, image: &GrayImage) -> Result<Vec<Point2<f64>>> {
        if image.dimensions() != self.image_size {
            return Err(Error::DimensionMismatch(format!(
                "calibration image is {:?}, expected {:?}",
                image.dimensions(),
                self.image_size
            )));
        }

        let corners = self.finder.find_corners(image)?;
        self.add_points(corners.clone())?;
        Ok(corners)
    }

    /// Record corners found elsewhere, in detection order.
    pub fn add_points(&mut self, corners: Vec<Point2<f64>>) -> Result<()> {
        if corners.len() != self.corner_coordinates.len() {
            return Err(Error::DimensionMismatch(format!(
                "expected {} corners, got {}",
                self.corner_coordinates.len(),
                corners.len()
            )));
        }

        self.image_points.push(corners);
        self.object_points.push(self.corner_coordinates.clone());
        self.image_count += 1;
        log::debug!("Recorded calibration view {}", self.image_count);
        Ok(())
    }

    pub fn calibrate_camera(&self) -> Result<CameraCalibration> {
        calibrate_camera(&self.object_points, &self.image_points, self.image_size)
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Estimate intrinsics, distortion and board poses from at least three planar views.
pub fn calibrate_camera(
    object_points: &[Vec<Point3<f64>>],
    image_points: &[Vec<Point2<f64>>],
    image_size: (u32, u32)
) -> Result<CameraCalibration> {
    let views = object_points.len();
    if views < 3 || image_points.len() != views {
        return Err(Error::Calibration(format!(
            "at least 3 views are needed, got {} object and {} image point sets",
            views,
            image_points.len()
        )));
    }

    let mut homographies = Vec::with_capacity(views);
    for (objects, image) in object_points.iter().zip(image_points.iter()) {
        if objects.len() != image.len() {
            return Err(Error::DimensionMismatch(format!(
                "{} object points but {} image points",
                objects.len(),
                image.len()
            )));
        }
        let plane: Vec<Point2<f64>> = objects.iter().map(|p| Point2::new(p.x, p.y)).collect();
        homographies.push(find_homography(&plane, image).ok_or_else(|| {
            Error::Calibration("degenerate view, no homography".into())
        })?);
    }

    let initial = init_camera_matrix(&homographies, image_size)
        .ok_or_else(|| Error::Calibration("could not initialise the camera matrix".into()))?;
    log::debug!(
        "Initial focal lengths {:.1}, {:.1}",
        initial[(0, 0)],
        initial[(1, 1)]
    );

    let mut params = DVector::zeros(INTRINSIC_PARAMS + 6 * views);
    params[0] = initial[(0, 0)];
    params[1] = initial[(1, 1)];
    params[2] = initial[(0, 2)];
    params[3] = initial[(1, 2)];
    for (v, hom) in homographies.iter().enumerate() {
        let pose = pose_from_homography(&initial, hom)
            .ok_or_else(|| Error::Calibration("degenerate view, no pose".into()))?;
        pose.write_params(&mut params, INTRINSIC_PARAMS + 6 * v);
    }

    let (params, residuals) = levenberg_marquardt(params, REFINE_CRITERIA, |p| {
        let (camera, dist) = intrinsics_from_params(p);
        let mut all = Vec::new();
        for (v, (objects, image)) in object_points.iter().zip(image_points.iter()).enumerate() {
            let pose = Pose::from_params(p, INTRINSIC_PARAMS + 6 * v);
            all.extend(reprojection_residuals(&camera, &dist, &pose, objects, image).iter());
        }
        DVector::from_vec(all)
    });

    let total_points: usize = image_points.iter().map(|v| v.len()).sum();
    let rmse = (residuals.norm_squared() / total_points as f64).sqrt();
    let (camera_matrix, dist_coeffs) = intrinsics_from_params(&params);

    let poses: Vec<Pose> = (0..views)
        .map(|v| Pose::from_params(&params, INTRINSIC_PARAMS + 6 * v))
        .collect();

    log::info!("Calibrated camera from {} views, RMS error {:.4} px", views, rmse);

    Ok(CameraCalibration {
        rmse,
        camera_matrix,
        dist_coeffs,
        rvecs: poses.iter().map(|p| p.rvec).collect(),
        tvecs: poses.iter().map(|p| p.tvec).collect(),
        image_size
    })
}

fn intrinsics_from_params(p: &DVector<f64>) -> (Matrix3<f64>, Vector5<f64>) {
    (
        camera_matrix(p[0], p[1], p[2], p[3]),
        Vector5::new(p[4], p[5], p[6], p[7], p[8])
    )
}
