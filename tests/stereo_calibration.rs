//! # Stereo calibration
//!
//! A synthetic rig with a known baseline, calibrated from exact corner projections.

mod common;

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use approx::assert_abs_diff_eq;
use cv_stereo_rig::calibration::geometry::{project_points, rodrigues, rodrigues_inverse, Pose};
use cv_stereo_rig::calibration::{
    projection_camera, undistort_points, Calibration, Side, Sided, StereoCalibration,
    StereoCalibrator
};
use cv_stereo_rig::chessboard::object_points;
use cv_stereo_rig::frame::GrayStereoFrame;
use cv_stereo_rig::Error;
use image::GrayImage;
use nalgebra::{Matrix3, Point2, Vector3, Vector4, Vector5};

use common::{SyntheticCamera, HEIGHT, PATTERN, SQUARE, WIDTH};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

const BASELINE: f64 = 60.0;

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

fn rig() -> (Sided<SyntheticCamera>, Matrix3<f64>, Vector3<f64>) {
    let cameras = Sided::new(
        SyntheticCamera::new(520.0, 518.0, 318.0, 242.0)
            .with_dist(Vector5::new(-0.08, 0.02, 0.0, 0.0, 0.0)),
        SyntheticCamera::new(515.0, 512.0, 325.0, 238.0)
            .with_dist(Vector5::new(-0.1, 0.03, 0.0, 0.0, 0.0))
    );
    let rot = rodrigues(&Vector3::new(0.01, -0.02, 0.005));
    let trans = Vector3::new(-BASELINE, 0.4, -0.8);
    (cameras, rot, trans)
}

/// Pose of the board as seen by the right camera.
fn right_pose(left: &Pose, rot: &Matrix3<f64>, trans: &Vector3<f64>) -> Pose {
    Pose::new(
        rodrigues_inverse(&(rot * left.rotation())),
        rot * left.tvec + trans
    )
}

fn calibrated_rig() -> Result<(StereoCalibrator, StereoCalibration), Error> {
    let (cameras, rot, trans) = rig();
    let model = object_points(PATTERN, SQUARE);
    let mut calibrator =
        StereoCalibrator::new(PATTERN.0, PATTERN.1, SQUARE, (WIDTH, HEIGHT), None, None, -1.0);

    for pose in common::calibration_poses() {
        let right = right_pose(&pose, &rot, &trans);
        let corners = Sided::new(
            project_points(&cameras.left.matrix, &cameras.left.dist, &pose, &model),
            project_points(&cameras.right.matrix, &cameras.right.dist, &right, &model)
        );
        calibrator.add_points(corners)?;
    }

    let calibration = calibrator.calibrate_cameras()?;
    Ok((calibrator, calibration))
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[test]
fn recovers_the_rig_geometry() -> Result<(), Box<dyn std::error::Error>> {
    let (_, rot, trans) = rig();
    let (calibrator, calibration) = calibrated_rig()?;

    assert_eq!(calibrator.image_count(), 6);
    assert!(calibration.rmse < 0.01, "rmse {}", calibration.rmse);
    assert_abs_diff_eq!(calibration.baseline(), trans.norm(), epsilon = 0.5);
    assert!(calibration.trans_vec.x < 0.0);
    assert_abs_diff_eq!(calibration.rot_mat, rot, epsilon = 1e-3);

    let epipolar = calibrator.check_calibration(&calibration)?;
    assert!(epipolar < 0.05, "epipolar error {}", epipolar);

    Ok(())
}

#[test]
fn rectified_corners_share_rows() -> Result<(), Box<dyn std::error::Error>> {
    let (calibrator, calibration) = calibrated_rig()?;

    for view in 0..calibrator.image_count() {
        let rectified = Sided::new(
            undistort_points(
                &calibrator.image_points().left[view],
                &calibration.cam_mats.left,
                &calibration.dist_coefs.left,
                Some(&calibration.rect_trans.left),
                Some(&projection_camera(&calibration.proj_mats.left))
            ),
            undistort_points(
                &calibrator.image_points().right[view],
                &calibration.cam_mats.right,
                &calibration.dist_coefs.right,
                Some(&calibration.rect_trans.right),
                Some(&projection_camera(&calibration.proj_mats.right))
            )
        );

        for (l, r) in rectified.left.iter().zip(rectified.right.iter()) {
            assert_abs_diff_eq!(l.y, r.y, epsilon = 0.05);
            assert!(l.x > r.x, "left {:?} is not right of {:?}", l, r);
        }
    }

    Ok(())
}

#[test]
fn reprojected_corners_keep_the_square_size() -> Result<(), Box<dyn std::error::Error>> {
    let (calibrator, calibration) = calibrated_rig()?;
    let rectify = |points: &[Point2<f64>], side: Side| {
        undistort_points(
            points,
            calibration.cam_mats.get(side),
            calibration.dist_coefs.get(side),
            Some(calibration.rect_trans.get(side)),
            Some(&projection_camera(calibration.proj_mats.get(side)))
        )
    };

    let left = rectify(&calibrator.image_points().left[2], Side::Left);
    let right = rectify(&calibrator.image_points().right[2], Side::Right);

    let points: Vec<Vector3<f64>> = left
        .iter()
        .zip(right.iter())
        .map(|(l, r)| {
            let h = calibration.disp_to_depth_mat * Vector4::new(l.x, l.y, l.x - r.x, 1.0);
            Vector3::new(h.x / h.w, h.y / h.w, h.z / h.w)
        })
        .collect();

    for row in 0..PATTERN.1 {
        for col in 0..PATTERN.0 - 1 {
            let i = row * PATTERN.0 + col;
            let step = (points[i + 1] - points[i]).norm();
            assert_abs_diff_eq!(step, SQUARE, epsilon = 0.5);
            assert!(points[i].z > 300.0 && points[i].z < 600.0, "depth {}", points[i].z);
        }
    }

    Ok(())
}

#[test]
fn export_and_load_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let (_, calibration) = calibrated_rig()?;
    let dir = tempfile::tempdir()?;
    calibration.export(dir.path())?;
    assert!(dir.path().join("disp_to_depth_mat.json").exists());
    assert!(dir.path().join("proj_mats_right.json").exists());

    let loaded = StereoCalibration::load(dir.path())?;
    assert_eq!(loaded.image_size, (WIDTH, HEIGHT));
    assert_abs_diff_eq!(loaded.rmse, calibration.rmse, epsilon = 1e-12);
    assert_abs_diff_eq!(loaded.disp_to_depth_mat, calibration.disp_to_depth_mat, epsilon = 1e-9);
    assert_abs_diff_eq!(loaded.cam_mats.right, calibration.cam_mats.right, epsilon = 1e-9);
    assert_eq!(loaded.valid_boxes, calibration.valid_boxes);

    let tables = (loaded.remap_tables(), calibration.remap_tables());
    assert_eq!(tables.0.left.width(), WIDTH);
    let (lx, ly) = tables.0.left.source(100, 100);
    let (cx, cy) = tables.1.left.source(100, 100);
    assert_abs_diff_eq!(lx, cx, epsilon = 1e-3);
    assert_abs_diff_eq!(ly, cy, epsilon = 1e-3);

    Ok(())
}

#[test]
fn rectification_keeps_the_frame_size() -> Result<(), Box<dyn std::error::Error>> {
    let (_, calibration) = calibrated_rig()?;
    let texture = common::random_texture(WIDTH, HEIGHT, 3);
    let frame = GrayStereoFrame::new(texture.clone(), texture);

    let rectified = calibration.rectify_gray(&frame)?;
    assert_eq!(rectified.left.dimensions(), (WIDTH, HEIGHT));
    assert_eq!(rectified.right.dimensions(), (WIDTH, HEIGHT));

    let small = GrayStereoFrame::new(GrayImage::new(320, 240), GrayImage::new(320, 240));
    assert!(matches!(calibration.rectify_gray(&small), Err(Error::DimensionMismatch(_))));

    Ok(())
}

#[test]
fn boards_are_found_in_rendered_pairs() -> Result<(), Box<dyn std::error::Error>> {
    let (cameras, rot, trans) = rig();
    let pose = common::calibration_poses()[0];
    let pair = GrayStereoFrame::new(
        cameras.left.render_board(&pose),
        cameras.right.render_board(&right_pose(&pose, &rot, &trans))
    );

    let mut calibrator =
        StereoCalibrator::new(PATTERN.0, PATTERN.1, SQUARE, (WIDTH, HEIGHT), None, None, -1.0);
    let corners = calibrator.add_corners(&pair)?;
    assert_eq!(corners.left.len(), PATTERN.0 * PATTERN.1);
    assert_eq!(corners.right.len(), PATTERN.0 * PATTERN.1);
    assert_eq!(calibrator.image_count(), 1);

    // Without a board on the right nothing is recorded for the pair.
    let blank = GrayImage::from_pixel(WIDTH, HEIGHT, image::Luma([120]));
    let partial = GrayStereoFrame::new(pair.left.clone(), blank);
    assert!(matches!(calibrator.add_corners(&partial), Err(Error::ChessboardNotFound)));
    assert_eq!(calibrator.image_count(), 1);

    Ok(())
}

#[test]
fn calibrating_without_pairs_fails() {
    let calibrator = StereoCalibrator::new(7, 5, SQUARE, (WIDTH, HEIGHT), None, None, -1.0);
    assert!(matches!(calibrator.calibrate_cameras(), Err(Error::Calibration(_))));
}
