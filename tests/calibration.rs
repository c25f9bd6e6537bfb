//! # Single camera calibration
//!
//! Calibration from rendered board views, undistortion and persistence.

mod common;

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use approx::assert_abs_diff_eq;
use cv_stereo_rig::calibration::geometry::{
    find_homography, levenberg_marquardt, project_point, project_points, rodrigues,
    rodrigues_inverse, solve_planar_pose, Pose
};
use cv_stereo_rig::calibration::{
    calibrate_camera, optimal_new_camera_matrix, undistort_points, Calibration,
    CameraCalibration, CameraCalibrator
};
use cv_stereo_rig::chessboard::{object_points, TermCriteria};
use cv_stereo_rig::Error;
use image::GrayImage;
use nalgebra::{DVector, Matrix3, Point2, Vector3, Vector5};

use common::{SyntheticCamera, HEIGHT, PATTERN, SQUARE, WIDTH};

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

fn test_camera() -> SyntheticCamera {
    SyntheticCamera::new(520.0, 515.0, 322.0, 236.0)
}

/// Exact corner projections of every calibration view.
fn projected_views(camera: &SyntheticCamera) -> (Vec<Vec<nalgebra::Point3<f64>>>, Vec<Vec<Point2<f64>>>) {
    let model = object_points(PATTERN, SQUARE);
    let poses = common::calibration_poses();
    let images = poses
        .iter()
        .map(|pose| project_points(&camera.matrix, &camera.dist, pose, &model))
        .collect();
    (vec![model; poses.len()], images)
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[test]
fn rodrigues_round_trip() {
    let rvec = Vector3::new(0.2, -0.4, 0.1);
    let rot = rodrigues(&rvec);
    assert_abs_diff_eq!(rot.determinant(), 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(rodrigues_inverse(&rot), rvec, epsilon = 1e-12);
}

#[test]
fn homography_maps_plane_to_image() {
    let camera = test_camera();
    let pose = common::calibration_poses()[2];
    let model = object_points(PATTERN, SQUARE);
    let image = project_points(&camera.matrix, &camera.dist, &pose, &model);
    let plane: Vec<Point2<f64>> = model.iter().map(|p| Point2::new(p.x, p.y)).collect();

    let hom = find_homography(&plane, &image).expect("homography");
    for (src, dst) in plane.iter().zip(image.iter()) {
        let h = hom * Vector3::new(src.x, src.y, 1.0);
        assert_abs_diff_eq!(h.x / h.z, dst.x, epsilon = 1e-6);
        assert_abs_diff_eq!(h.y / h.z, dst.y, epsilon = 1e-6);
    }
}

#[test]
fn levenberg_marquardt_fits_a_curve() {
    // y = a * exp(b * x)
    let xs: Vec<f64> = (0..20).map(|i| i as f64 * 0.1).collect();
    let ys: Vec<f64> = xs.iter().map(|x| 2.5 * (0.8 * x).exp()).collect();

    let (params, residuals) = levenberg_marquardt(
        DVector::from_vec(vec![1.0, 0.1]),
        TermCriteria { max_iter: 100, epsilon: 1e-14 },
        |p| DVector::from_iterator(xs.len(), xs.iter().zip(ys.iter()).map(|(x, y)| p[0] * (p[1] * x).exp() - y))
    );

    assert_abs_diff_eq!(params[0], 2.5, epsilon = 1e-6);
    assert_abs_diff_eq!(params[1], 0.8, epsilon = 1e-6);
    assert!(residuals.norm() < 1e-6);
}

#[test]
fn planar_pose_is_recovered() {
    let camera = test_camera().with_dist(Vector5::new(-0.1, 0.02, 0.0, 0.0, 0.0));
    let pose = common::calibration_poses()[4];
    let model = object_points(PATTERN, SQUARE);
    let image = project_points(&camera.matrix, &camera.dist, &pose, &model);

    let solved = solve_planar_pose(&camera.matrix, &camera.dist, &model, &image).expect("pose");
    assert_abs_diff_eq!(solved.rvec, pose.rvec, epsilon = 1e-6);
    assert_abs_diff_eq!(solved.tvec, pose.tvec, epsilon = 1e-4);
}

#[test]
fn exact_projections_calibrate_exactly() -> Result<(), Box<dyn std::error::Error>> {
    let camera = test_camera().with_dist(Vector5::new(-0.12, 0.05, 0.001, -0.0005, 0.0));
    let (objects, images) = projected_views(&camera);

    let calibration = calibrate_camera(&objects, &images, (WIDTH, HEIGHT))?;

    assert!(calibration.rmse < 1e-3, "rmse {}", calibration.rmse);
    assert_abs_diff_eq!(calibration.camera_matrix, camera.matrix, epsilon = 0.5);
    assert_abs_diff_eq!(calibration.dist_coeffs[0], -0.12, epsilon = 5e-3);
    assert_abs_diff_eq!(calibration.dist_coeffs[2], 0.001, epsilon = 5e-4);
    assert_eq!(calibration.rvecs.len(), objects.len());

    for (pose, truth) in calibration.poses().iter().zip(common::calibration_poses().iter()) {
        assert_abs_diff_eq!(pose.tvec, truth.tvec, epsilon = 0.5);
    }

    Ok(())
}

#[test]
fn too_few_views_cannot_calibrate() {
    let (objects, images) = projected_views(&test_camera());
    let result = calibrate_camera(&objects[..2], &images[..2], (WIDTH, HEIGHT));
    assert!(matches!(result, Err(Error::Calibration(_))));
}

#[test]
fn calibrator_calibrates_from_rendered_views() -> Result<(), Box<dyn std::error::Error>> {
    let camera = test_camera();
    let mut calibrator = CameraCalibrator::new(PATTERN, SQUARE, (WIDTH, HEIGHT));

    for pose in common::calibration_poses() {
        let corners = calibrator.add_corners(&camera.render_board(&pose))?;
        assert_eq!(corners.len(), PATTERN.0 * PATTERN.1);
    }

    // Views without a board are not recorded.
    let blank = GrayImage::from_pixel(WIDTH, HEIGHT, image::Luma([128]));
    assert!(matches!(calibrator.add_corners(&blank), Err(Error::ChessboardNotFound)));
    assert_eq!(calibrator.image_count(), 6);
    assert_eq!(calibrator.object_points().len(), calibrator.image_points().len());

    let calibration = calibrator.calibrate_camera()?;
    assert!(calibration.rmse < 0.3, "rmse {}", calibration.rmse);
    assert_abs_diff_eq!(calibration.camera_matrix[(0, 0)], 520.0, epsilon = 520.0 * 0.02);
    assert_abs_diff_eq!(calibration.camera_matrix[(1, 1)], 515.0, epsilon = 515.0 * 0.02);
    assert_abs_diff_eq!(calibration.camera_matrix[(0, 2)], 322.0, epsilon = 8.0);
    assert_abs_diff_eq!(calibration.camera_matrix[(1, 2)], 236.0, epsilon = 8.0);

    Ok(())
}

#[test]
fn wrong_image_size_is_rejected() {
    let mut calibrator = CameraCalibrator::new(PATTERN, SQUARE, (WIDTH, HEIGHT));
    let small = GrayImage::new(320, 240);
    assert!(matches!(calibrator.add_corners(&small), Err(Error::DimensionMismatch(_))));
    assert!(matches!(
        calibrator.add_points(vec![Point2::origin(); 3]),
        Err(Error::DimensionMismatch(_))
    ));
    assert_eq!(calibrator.image_count(), 0);
}

#[test]
fn undistorted_points_fall_on_the_pinhole_projection() {
    let camera = test_camera().with_dist(Vector5::new(-0.2, 0.05, 0.0, 0.0, 0.0));
    let pose = common::calibration_poses()[0];
    let model = object_points(PATTERN, SQUARE);

    let distorted = project_points(&camera.matrix, &camera.dist, &pose, &model);
    let ideal = project_points(&camera.matrix, &Vector5::zeros(), &pose, &model);

    let corrected = undistort_points(&distorted, &camera.matrix, &camera.dist, None, Some(&camera.matrix));
    for (c, i) in corrected.iter().zip(ideal.iter()) {
        assert_abs_diff_eq!(c.x, i.x, epsilon = 1e-3);
        assert_abs_diff_eq!(c.y, i.y, epsilon = 1e-3);
    }
}

#[test]
fn optimal_matrix_keeps_all_pixels_at_alpha_zero() {
    let camera = test_camera().with_dist(Vector5::new(-0.25, 0.08, 0.0, 0.0, 0.0));

    let (tight, roi) = optimal_new_camera_matrix(&camera.matrix, &camera.dist, (WIDTH, HEIGHT), 0.0, (WIDTH, HEIGHT));
    let (loose, _) = optimal_new_camera_matrix(&camera.matrix, &camera.dist, (WIDTH, HEIGHT), 1.0, (WIDTH, HEIGHT));

    // Barrel distortion: only valid pixels are kept at alpha 0, so the focal length grows.
    assert!(tight[(0, 0)] > loose[(0, 0)]);
    assert!(roi.area() > 0);
    assert!(roi.x >= 0 && roi.y >= 0);
    assert!(roi.x + roi.width <= WIDTH as i32 && roi.y + roi.height <= HEIGHT as i32);
}

#[test]
fn undistorting_straightens_the_board() -> Result<(), Box<dyn std::error::Error>> {
    let camera = test_camera().with_dist(Vector5::new(-0.2, 0.0, 0.0, 0.0, 0.0));
    let pose = common::board_pose(Vector3::zeros(), 420.0, Vector3::zeros());
    let distorted = camera.render_board(&pose);

    let calibration = CameraCalibration {
        rmse: 0.0,
        camera_matrix: camera.matrix,
        dist_coeffs: camera.dist,
        rvecs: Vec::new(),
        tvecs: Vec::new(),
        image_size: (WIDTH, HEIGHT)
    };
    let straight = calibration.undistort(&distorted, None)?;
    assert_eq!(straight.dimensions(), (WIDTH, HEIGHT));

    let corners = cv_stereo_rig::chessboard::ChessboardFinder::new(PATTERN).find_corners(&straight)?;
    let truth = project_points(&camera.matrix, &Vector5::zeros(), &pose, &object_points(PATTERN, SQUARE));
    for (c, t) in corners.iter().zip(truth.iter()) {
        assert!((c - t).norm() < 0.6);
    }

    Ok(())
}

#[test]
fn calibration_round_trips_through_json_files() -> Result<(), Box<dyn std::error::Error>> {
    let camera = test_camera().with_dist(Vector5::new(-0.1, 0.01, 0.0, 0.0, 0.0));
    let (objects, images) = projected_views(&camera);
    let calibration = calibrate_camera(&objects, &images, (WIDTH, HEIGHT))?;

    let dir = tempfile::tempdir()?;
    let folder = dir.path().join("ps5_1_left");
    calibration.export(&folder)?;

    for key in CameraCalibration::keys() {
        assert!(folder.join(format!("{}.json", key)).exists(), "{} missing", key);
    }
    let mtx: Vec<Vec<f64>> = serde_json::from_str(&std::fs::read_to_string(folder.join("mtx.json"))?)?;
    assert_eq!(mtx.len(), 3);
    assert_abs_diff_eq!(mtx[0][0], calibration.camera_matrix[(0, 0)], epsilon = 1e-9);

    let loaded = CameraCalibration::load(&folder)?;
    assert_abs_diff_eq!(loaded.camera_matrix, calibration.camera_matrix, epsilon = 1e-9);
    assert_abs_diff_eq!(loaded.dist_coeffs, calibration.dist_coeffs, epsilon = 1e-12);
    assert_abs_diff_eq!(loaded.rmse, calibration.rmse, epsilon = 1e-12);
    assert_eq!(loaded.rvecs.len(), calibration.rvecs.len());
    assert_eq!(loaded.image_size, calibration.image_size);

    Ok(())
}

#[test]
fn default_calibration_round_trips() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    CameraCalibration::default().export(dir.path())?;

    let loaded = CameraCalibration::load(dir.path())?;
    assert_eq!(loaded.rmse, 0.0);
    assert_eq!(loaded.camera_matrix, Matrix3::identity());
    assert!(loaded.rvecs.is_empty());

    let broken = CameraCalibration {
        rmse: f64::NAN,
        ..CameraCalibration::default()
    };
    assert!(matches!(broken.export(dir.path().join("nan")), Err(Error::Calibration(_))));

    Ok(())
}

#[test]
fn loading_an_incomplete_folder_fails() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("mtx.json"), "[[1,0,0],[0,1,0],[0,0,1]]")?;
    assert!(matches!(CameraCalibration::load(dir.path()), Err(Error::Io(_))));
    Ok(())
}

#[test]
fn projection_matches_a_manual_pinhole() {
    let camera = test_camera();
    let pose = Pose::new(Vector3::zeros(), Vector3::new(0.0, 0.0, 100.0));
    let p = project_point(&camera.matrix, &camera.dist, &pose, &nalgebra::Point3::new(10.0, -5.0, 0.0));
    assert_abs_diff_eq!(p.x, 322.0 + 520.0 * 0.1, epsilon = 1e-9);
    assert_abs_diff_eq!(p.y, 236.0 - 515.0 * 0.05, epsilon = 1e-9);

    let identity: Matrix3<f64> = rodrigues(&Vector3::zeros());
    assert_abs_diff_eq!(identity, Matrix3::identity(), epsilon = 1e-15);
}
