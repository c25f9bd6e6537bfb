//! # Chessboard detection
//!
//! Corner finding on rendered boards with known geometry.

mod common;

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use cv_stereo_rig::calibration::geometry::project_points;
use cv_stereo_rig::chessboard::{corner_sub_pix, object_points, ChessboardFinder, TermCriteria};
use cv_stereo_rig::{Error, GrayFloatImage};
use image::{GrayImage, Luma, RgbImage};
use nalgebra::{Point2, Vector3};

use common::{board_pose, SyntheticCamera, PATTERN, SQUARE};

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[test]
fn object_points_run_along_rows() {
    let points = object_points((3, 2), 2.5);
    let coords: Vec<(f64, f64, f64)> = points.iter().map(|p| (p.x, p.y, p.z)).collect();
    assert_eq!(
        coords,
        vec![
            (0.0, 0.0, 0.0),
            (2.5, 0.0, 0.0),
            (5.0, 0.0, 0.0),
            (0.0, 2.5, 0.0),
            (2.5, 2.5, 0.0),
            (5.0, 2.5, 0.0),
        ]
    );
}

#[test]
fn finds_fronto_parallel_board_to_sub_pixel_accuracy() -> Result<(), Box<dyn std::error::Error>> {
    let camera = SyntheticCamera::new(500.0, 500.0, 320.0, 240.0);
    let pose = board_pose(Vector3::zeros(), 400.0, Vector3::new(3.3, -2.7, 0.0));
    let image = camera.render_board(&pose);

    let finder = ChessboardFinder::new(PATTERN);
    let corners = finder.find_corners(&image)?;
    assert_eq!(corners.len(), finder.corner_count());

    let truth = project_points(&camera.matrix, &camera.dist, &pose, &object_points(PATTERN, SQUARE));
    for (found, expected) in corners.iter().zip(truth.iter()) {
        let error = (found - expected).norm();
        assert!(error < 0.25, "corner {:?} is {:.3} px from {:?}", found, error, expected);
    }

    Ok(())
}

#[test]
fn finds_tilted_boards_in_row_order() -> Result<(), Box<dyn std::error::Error>> {
    let camera = SyntheticCamera::new(500.0, 500.0, 320.0, 240.0);
    let finder = ChessboardFinder::new(PATTERN).with_criteria(TermCriteria::STEREO);
    let model = object_points(PATTERN, SQUARE);

    for pose in common::calibration_poses() {
        let image = camera.render_board(&pose);
        let corners = finder.find_corners(&image)?;
        let truth = project_points(&camera.matrix, &camera.dist, &pose, &model);

        let worst = corners
            .iter()
            .zip(truth.iter())
            .map(|(f, e)| (f - e).norm())
            .fold(0.0, f64::max);
        assert!(worst < 0.5, "worst corner error {:.3} px for {:?}", worst, pose);
    }

    Ok(())
}

#[test]
fn sub_pixel_refinement_pulls_corners_back() {
    let camera = SyntheticCamera::new(500.0, 500.0, 320.0, 240.0);
    let pose = board_pose(Vector3::new(0.1, -0.15, 0.0), 400.0, Vector3::zeros());
    let image = GrayFloatImage::from_luma(&camera.render_board(&pose));
    let truth = project_points(&camera.matrix, &camera.dist, &pose, &object_points(PATTERN, SQUARE));

    let mut corners: Vec<Point2<f64>> = truth.iter().map(|p| p + nalgebra::Vector2::new(1.2, -0.8)).collect();
    corner_sub_pix(&image, &mut corners, 5, TermCriteria::STEREO);

    for (refined, expected) in corners.iter().zip(truth.iter()) {
        assert!((refined - expected).norm() < 0.25, "{:?} refined to {:?}", expected, refined);
    }
}

#[test]
fn flat_images_leave_corners_in_place() {
    let image = GrayFloatImage::filled(40, 30, 90.0);
    let start = vec![Point2::new(12.3, 7.8), Point2::new(0.5, 29.0)];

    let mut corners = start.clone();
    corner_sub_pix(&image, &mut corners, 5, TermCriteria::DEFAULT);
    assert_eq!(corners, start);
}

#[test]
fn transposed_pattern_is_not_accepted() {
    let camera = SyntheticCamera::new(500.0, 500.0, 320.0, 240.0);
    let image = camera.render_board(&board_pose(Vector3::zeros(), 400.0, Vector3::zeros()));

    // The board has 7 corners per row; asking for a different count cannot match.
    let finder = ChessboardFinder::new((6, 5));
    assert!(matches!(finder.find_corners(&image), Err(Error::ChessboardNotFound)));
}

#[test]
fn blank_and_tiny_images_have_no_board() {
    let finder = ChessboardFinder::new(PATTERN);

    let blank = GrayImage::from_pixel(320, 240, Luma([128]));
    assert!(matches!(finder.find_corners(&blank), Err(Error::ChessboardNotFound)));

    let tiny = GrayImage::new(8, 8);
    assert!(matches!(finder.find_corners(&tiny), Err(Error::ChessboardNotFound)));
}

#[test]
fn degenerate_patterns_are_rejected() {
    let finder = ChessboardFinder::new((1, 5));
    let blank = GrayImage::new(64, 64);
    assert!(matches!(finder.find_corners(&blank), Err(Error::Calibration(_))));
}

#[test]
fn drawing_marks_the_corners() -> Result<(), Box<dyn std::error::Error>> {
    let camera = SyntheticCamera::new(500.0, 500.0, 320.0, 240.0);
    let gray = camera.render_board(&board_pose(Vector3::zeros(), 400.0, Vector3::zeros()));
    let corners = ChessboardFinder::new(PATTERN).find_corners(&gray)?;

    let mut canvas = RgbImage::new(gray.width(), gray.height());
    cv_stereo_rig::chessboard::draw_corners(&mut canvas, PATTERN, &corners, true);
    assert!(canvas.pixels().any(|p| p.0 != [0, 0, 0]));

    let mut partial = RgbImage::new(gray.width(), gray.height());
    cv_stereo_rig::chessboard::draw_corners(&mut partial, PATTERN, &corners[..3], false);
    assert!(partial.pixels().any(|p| p.0 == [255, 0, 0]));

    Ok(())
}
