//! # Stereo calibration
//!
//! Relative pose of the two cameras of the rig, essential and fundamental matrices, and the
//! rectification that aligns their epipolar lines with image rows.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::collections::HashMap;

use image::{GrayImage, RgbImage};
use nalgebra::{DVector, Matrix3, Matrix3x4, Matrix4, Point2, Point3, Vector2, Vector3, Vector5};

use super::camera::{calibrate_camera, CameraCalibration};
use super::geometry::{
    cross_matrix, distort, levenberg_marquardt, median, pixel_from_normalised, rodrigues,
    rodrigues_inverse, solve_planar_pose, Pose
};
use super::rectify::{
    compute_correspond_epilines, init_undistort_rectify_map, projection_camera, remap,
    stereo_rectify, undistort_points, Interpolation, RemapTable, Roi
};
use super::{
    matrix_from_table, scalar_from_table, table_from_matrix, Calibration, Side, Sided, Table
};
use crate::chessboard::{object_points, ChessboardFinder, TermCriteria};
use crate::error::*;
use crate::frame::{GrayStereoFrame, StereoFrame};

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Everything needed to rectify frames of the rig and reproject disparities to 3D.
#[derive(Clone, Debug)]
pub struct StereoCalibration {
    /// Root mean square reprojection error over both cameras, in pixels.
    pub rmse: f64,
    pub cam_mats: Sided<Matrix3<f64>>,
    pub dist_coefs: Sided<Vector5<f64>>,
    /// Rotation from the left to the right camera frame.
    pub rot_mat: Matrix3<f64>,
    /// Translation from the left to the right camera frame, in board units.
    pub trans_vec: Vector3<f64>,
    pub e_mat: Matrix3<f64>,
    pub f_mat: Matrix3<f64>,
    pub rect_trans: Sided<Matrix3<f64>>,
    pub proj_mats: Sided<Matrix3x4<f64>>,
    /// Disparity-to-depth mapping matrix (`Q`).
    pub disp_to_depth_mat: Matrix4<f64>,
    pub valid_boxes: Sided<Roi>,
    pub image_size: (u32, u32),
    maps: Sided<RemapTable>
}

/// Accumulates chessboard views seen by both cameras at once.
#[derive(Clone, Debug)]
pub struct StereoCalibrator {
    finder: ChessboardFinder,
    alpha: f64,
    rows: usize,
    columns: usize,
    square_size: f64,
    image_size: (u32, u32),
    image_count: usize,
    cameras_calibration: Sided<Option<CameraCalibration>>,
    corner_coordinates: Vec<Point3<f64>>,
    object_points: Vec<Vec<Point3<f64>>>,
    image_points: Sided<Vec<Vec<Point2<f64>>>>,
    criteria: TermCriteria
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl StereoCalibration {
    /// Build a calibration from its matrices, computing the remap tables.
    #[allow(clippy::too_many_arguments)]
    fn from_parts(
        rmse: f64,
        cam_mats: Sided<Matrix3<f64>>,
        dist_coefs: Sided<Vector5<f64>>,
        rot_mat: Matrix3<f64>,
        trans_vec: Vector3<f64>,
        e_mat: Matrix3<f64>,
        f_mat: Matrix3<f64>,
        rect_trans: Sided<Matrix3<f64>>,
        proj_mats: Sided<Matrix3x4<f64>>,
        disp_to_depth_mat: Matrix4<f64>,
        valid_boxes: Sided<Roi>,
        image_size: (u32, u32)
    ) -> Result<Self> {
        let maps = Sided::try_from_fn(|side| {
            init_undistort_rectify_map(
                cam_mats.get(side),
                dist_coefs.get(side),
                rect_trans.get(side),
                &projection_camera(proj_mats.get(side)),
                image_size
            )
        })?;

        Ok(StereoCalibration {
            rmse,
            cam_mats,
            dist_coefs,
            rot_mat,
            trans_vec,
            e_mat,
            f_mat,
            rect_trans,
            proj_mats,
            disp_to_depth_mat,
            valid_boxes,
            image_size,
            maps
        })
    }

    /// Undistort/rectify lookup tables of each camera.
    pub fn remap_tables(&self) -> &Sided<RemapTable> {
        &self.maps
    }

    /// Rectify a colour pair. Nearest neighbour interpolation is used for speed.
    pub fn rectify(&self, frame: &StereoFrame) -> Result<StereoFrame> {
        self.check_size(frame.width(), frame.height())?;
        let left: RgbImage = remap(&frame.left, &self.maps.left, Interpolation::Nearest);
        let right: RgbImage = remap(&frame.right, &self.maps.right, Interpolation::Nearest);
        Ok(StereoFrame {
            left,
            right,
            timestamp_us: frame.timestamp_us
        })
    }

    /// Rectify a gray pair. Nearest neighbour interpolation is used for speed.
    pub fn rectify_gray(&self, frame: &GrayStereoFrame) -> Result<GrayStereoFrame> {
        self.check_size(frame.width(), frame.height())?;
        let left: GrayImage = remap(&frame.left, &self.maps.left, Interpolation::Nearest);
        let right: GrayImage = remap(&frame.right, &self.maps.right, Interpolation::Nearest);
        Ok(GrayStereoFrame {
            left,
            right,
            timestamp_us: frame.timestamp_us
        })
    }

    /// Distance between the optical centres, in board units.
    pub fn baseline(&self) -> f64 {
        self.trans_vec.norm()
    }

    fn check_size(&self, width: u32, height: u32) -> Result<()> {
        if (width, height) != self.image_size {
            return Err(Error::DimensionMismatch(format!(
                "frames are {}x{} but the rig was calibrated at {}x{}",
                width, height, self.image_size.0, self.image_size.1
            )));
        }
        Ok(())
    }
}

impl Calibration for StereoCalibration {
    fn keys() -> Vec<String> {
        let mut keys: Vec<String> = [
            "rmse",
            "rot_mat",
            "trans_vec",
            "e_mat",
            "f_mat",
            "disp_to_depth_mat",
            "image_size"
        ]
        .iter()
        .map(|k| k.to_string())
        .collect();

        for base in ["cam_mats", "dist_coefs", "rect_trans", "proj_mats", "valid_boxes"].iter() {
            for side in Side::ALL.iter() {
                keys.push(side.key(base));
            }
        }
        keys
    }

    fn to_tables(&self) -> Vec<(String, Table)> {
        let mut tables = vec![
            ("rmse".to_string(), vec![vec![self.rmse]]),
            ("rot_mat".to_string(), table_from_matrix(&self.rot_mat)),
            ("trans_vec".to_string(), table_from_matrix(&self.trans_vec)),
            ("e_mat".to_string(), table_from_matrix(&self.e_mat)),
            ("f_mat".to_string(), table_from_matrix(&self.f_mat)),
            ("disp_to_depth_mat".to_string(), table_from_matrix(&self.disp_to_depth_mat)),
            (
                "image_size".to_string(),
                vec![vec![self.image_size.0 as f64, self.image_size.1 as f64]]
            ),
        ];

        for &side in Side::ALL.iter() {
            let roi = self.valid_boxes.get(side).to_array();
            tables.push((side.key("cam_mats"), table_from_matrix(self.cam_mats.get(side))));
            tables.push((
                side.key("dist_coefs"),
                table_from_matrix(&self.dist_coefs.get(side).transpose())
            ));
            tables.push((side.key("rect_trans"), table_from_matrix(self.rect_trans.get(side))));
            tables.push((side.key("proj_mats"), table_from_matrix(self.proj_mats.get(side))));
            tables.push((
                side.key("valid_boxes"),
                vec![roi.iter().map(|&v| v as f64).collect()]
            ));
        }

        tables
    }

    fn from_tables(tables: &HashMap<String, Table>) -> Result<Self> {
        let size = matrix_from_table::<1, 2>(tables, "image_size")?;

        let cam_mats = Sided::try_from_fn(|s| matrix_from_table::<3, 3>(tables, &s.key("cam_mats")))?;
        let dist_coefs = Sided::try_from_fn(|s| {
            Ok(matrix_from_table::<1, 5>(tables, &s.key("dist_coefs"))?.transpose())
        })?;
        let rect_trans =
            Sided::try_from_fn(|s| matrix_from_table::<3, 3>(tables, &s.key("rect_trans")))?;
        let proj_mats =
            Sided::try_from_fn(|s| matrix_from_table::<3, 4>(tables, &s.key("proj_mats")))?;
        let valid_boxes = Sided::try_from_fn(|s| {
            let b = matrix_from_table::<1, 4>(tables, &s.key("valid_boxes"))?;
            Ok(Roi::new(b[0] as i32, b[1] as i32, b[2] as i32, b[3] as i32))
        })?;

        Self::from_parts(
            scalar_from_table(tables, "rmse")?,
            cam_mats,
            dist_coefs,
            matrix_from_table::<3, 3>(tables, "rot_mat")?,
            matrix_from_table::<3, 1>(tables, "trans_vec")?,
            matrix_from_table::<3, 3>(tables, "e_mat")?,
            matrix_from_table::<3, 3>(tables, "f_mat")?,
            rect_trans,
            proj_mats,
            matrix_from_table::<4, 4>(tables, "disp_to_depth_mat")?,
            valid_boxes,
            (size[0] as u32, size[1] as u32)
        )
    }
}

impl StereoCalibrator {
    /// `rows` and `columns` count the inner corners of the board, in the order they are passed
    /// to the chessboard finder. Camera calibrations given here are used as fixed intrinsics;
    /// missing ones are estimated from the recorded views. `alpha` is the rectification
    /// scaling, negative for the default.
    pub fn new(
        rows: usize,
        columns: usize,
        square_size: f64,
        image_size: (u32, u32),
        cam_calib_left: Option<CameraCalibration>,
        cam_calib_right: Option<CameraCalibration>,
        alpha: f64
    ) -> Self {
        let pattern = (rows, columns);
        StereoCalibrator {
            finder: ChessboardFinder::new(pattern).with_criteria(TermCriteria::STEREO),
            alpha,
            rows,
            columns,
            square_size,
            image_size,
            image_count: 0,
            cameras_calibration: Sided::new(cam_calib_left, cam_calib_right),
            corner_coordinates: object_points(pattern, square_size),
            object_points: Vec::new(),
            image_points: Sided::default(),
            criteria: TermCriteria::STEREO
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

    pub fn pattern(&self) -> (usize, usize) {
        (self.rows, self.columns)
    }

    pub fn image_points(&self) -> &Sided<Vec<Vec<Point2<f64>>>> {
        &self.image_points
    }

    /// Find the board in both images of a pair and record the corners.
    ///
    /// Both sides must succeed; otherwise nothing is recorded.
    pub fn add_corners(&mut self, pair: &GrayStereoFrame) -> Result<Sided<Vec<Point2<f64>>>> {
        if pair.left.dimensions() != self.image_size || pair.right.dimensions() != self.image_size {
            return Err(Error::DimensionMismatch(format!(
                "calibration pair is {:?}/{:?}, expected {:?}",
                pair.left.dimensions(),
                pair.right.dimensions(),
                self.image_size
            )));
        }

        let left = self.finder.find_corners(&pair.left)?;
        let right = self.finder.find_corners(&pair.right)?;
        let corners = Sided::new(left, right);
        self.add_points(corners.clone())?;
        Ok(corners)
    }

    /// Record corners of both sides found elsewhere.
    pub fn add_points(&mut self, corners: Sided<Vec<Point2<f64>>>) -> Result<()> {
        let expected = self.corner_coordinates.len();
        if corners.left.len() != expected || corners.right.len() != expected {
            return Err(Error::DimensionMismatch(format!(
                "expected {} corners per side, got {} and {}",
                expected,
                corners.left.len(),
                corners.right.len()
            )));
        }

        self.image_points.left.push(corners.left);
        self.image_points.right.push(corners.right);
        self.object_points.push(self.corner_coordinates.clone());
        self.image_count += 1;
        log::debug!("Recorded stereo calibration pair {}", self.image_count);
        Ok(())
    }

    /// Calibrate the rig from the recorded pairs.
    pub fn calibrate_cameras(&self) -> Result<StereoCalibration> {
        if self.image_count == 0 {
            return Err(Error::Calibration("no calibration pairs recorded".into()));
        }

        let intrinsics = Sided::try_from_fn(|side| match self.cameras_calibration.get(side) {
            Some(calib) => Ok(calib.clone()),
            None => {
                log::info!("No intrinsics given for the {} camera, calibrating it", side.name());
                calibrate_camera(&self.object_points, self.image_points.get(side), self.image_size)
            }
        })?;
        let cam_mats = intrinsics.map(|c| c.camera_matrix);
        let dist_coefs = intrinsics.map(|c| c.dist_coeffs);

        let (rmse, rot_mat, trans_vec) = self.estimate_extrinsics(&cam_mats, &dist_coefs)?;
        log::info!(
            "Stereo calibration RMS error {:.4} px, baseline {:.3}",
            rmse,
            trans_vec.norm()
        );

        let e_mat = cross_matrix(&trans_vec) * rot_mat;
        let inv_left = cam_mats
            .left
            .try_inverse()
            .ok_or_else(|| Error::Calibration("left camera matrix is singular".into()))?;
        let inv_right = cam_mats
            .right
            .try_inverse()
            .ok_or_else(|| Error::Calibration("right camera matrix is singular".into()))?;
        let mut f_mat = inv_right.transpose() * e_mat * inv_left;
        if f_mat[(2, 2)].abs() > f64::EPSILON {
            f_mat /= f_mat[(2, 2)];
        }

        let rect = stereo_rectify(
            &cam_mats.left,
            &dist_coefs.left,
            &cam_mats.right,
            &dist_coefs.right,
            self.image_size,
            &rot_mat,
            &trans_vec,
            self.alpha
        )?;

        StereoCalibration::from_parts(
            rmse,
            cam_mats,
            dist_coefs,
            rot_mat,
            trans_vec,
            e_mat,
            f_mat,
            Sided::new(rect.r1, rect.r2),
            Sided::new(rect.p1, rect.p2),
            rect.q,
            Sided::new(rect.roi1, rect.roi2),
            self.image_size
        )
    }

    /// Relative pose of the right camera with both cameras' intrinsics held fixed.
    fn estimate_extrinsics(
        &self,
        cam_mats: &Sided<Matrix3<f64>>,
        dist_coefs: &Sided<Vector5<f64>>
    ) -> Result<(f64, Matrix3<f64>, Vector3<f64>)> {
        let views = self.image_count;
        let mut left_poses = Vec::with_capacity(views);
        let mut om_parts = [Vec::new(), Vec::new(), Vec::new()];
        let mut t_parts = [Vec::new(), Vec::new(), Vec::new()];

        for v in 0..views {
            let objects = &self.object_points[v];
            let pose = |side: Side| {
                solve_planar_pose(
                    cam_mats.get(side),
                    dist_coefs.get(side),
                    objects,
                    &self.image_points.get(side)[v]
                )
                .ok_or_else(|| Error::Calibration(format!("no board pose for view {}", v)))
            };
            let left = pose(Side::Left)?;
            let right = pose(Side::Right)?;

            let r = right.rotation() * left.rotation().transpose();
            let om = rodrigues_inverse(&r);
            let t = right.tvec - r * left.tvec;
            for i in 0..3 {
                om_parts[i].push(om[i]);
                t_parts[i].push(t[i]);
            }
            left_poses.push(left);
        }

        let mut params = DVector::zeros(6 + 6 * views);
        for i in 0..3 {
            params[i] = median(&mut om_parts[i]);
            params[3 + i] = median(&mut t_parts[i]);
        }
        for (v, pose) in left_poses.iter().enumerate() {
            pose.write_params(&mut params, 6 + 6 * v);
        }

        let (params, residuals) = levenberg_marquardt(params, self.criteria, |p| {
            let rot = rodrigues(&Vector3::new(p[0], p[1], p[2]));
            let trans = Vector3::new(p[3], p[4], p[5]);
            let mut r = Vec::new();

            for v in 0..views {
                let left = Pose::from_params(p, 6 + 6 * v);
                let r_left = left.rotation();
                let r_right = rot * r_left;
                let t_right = rot * left.tvec + trans;

                let observed = (&self.image_points.left[v], &self.image_points.right[v]);
                for (k, obj) in self.object_points[v].iter().enumerate() {
                    let pl = project(&cam_mats.left, &dist_coefs.left, &r_left, &left.tvec, obj);
                    let pr = project(&cam_mats.right, &dist_coefs.right, &r_right, &t_right, obj);
                    r.push(pl.x - observed.0[k].x);
                    r.push(pl.y - observed.0[k].y);
                    r.push(pr.x - observed.1[k].x);
                    r.push(pr.y - observed.1[k].y);
                }
            }

            DVector::from_vec(r)
        });

        let total_points: usize = self.object_points.iter().map(|v| v.len()).sum();
        let rmse = (residuals.norm_squared() / (2 * total_points) as f64).sqrt();
        let rot_mat = rodrigues(&Vector3::new(params[0], params[1], params[2]));
        let trans_vec = Vector3::new(params[3], params[4], params[5]);

        Ok((rmse, rot_mat, trans_vec))
    }

    /// Average distance between the undistorted recorded corners of each side and the epipolar
    /// lines of their matches on the other side.
    pub fn check_calibration(&self, calibration: &StereoCalibration) -> Result<f64> {
        let undistorted = Sided::try_from_fn(|side| {
            let points: Vec<Point2<f64>> =
                self.image_points.get(side).iter().flatten().copied().collect();
            let cam = calibration.cam_mats.get(side);
            Ok(undistort_points(
                &points,
                cam,
                calibration.dist_coefs.get(side),
                None,
                Some(cam)
            ))
        })?;

        let lines = Sided::new(
            compute_correspond_epilines(&undistorted.left, 1, &calibration.f_mat)?,
            compute_correspond_epilines(&undistorted.right, 2, &calibration.f_mat)?
        );

        let mut total_error = 0.0;
        let mut count = 0usize;
        for (this_side, other_side) in [(Side::Left, Side::Right), (Side::Right, Side::Left)].iter() {
            for (p, l) in undistorted.get(*this_side).iter().zip(lines.get(*other_side).iter()) {
                total_error += (p.x * l.x + p.y * l.y + l.z).abs();
                count += 1;
            }
        }

        if count == 0 {
            return Err(Error::Calibration("no points recorded to check".into()));
        }
        Ok(total_error / count as f64)
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

fn project(
    camera: &Matrix3<f64>,
    dist: &Vector5<f64>,
    rot: &Matrix3<f64>,
    trans: &Vector3<f64>,
    point: &Point3<f64>
) -> Point2<f64> {
    let pc = rot * point.coords + trans;
    let n = Vector2::new(pc.x / pc.z, pc.y / pc.z);
    pixel_from_normalised(camera, &distort(&n, dist))
}
