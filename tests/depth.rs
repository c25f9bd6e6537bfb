//! # Depth
//!
//! Disparity map conversions and reprojection into point clouds.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::fs;

use approx::assert_abs_diff_eq;
use cv_stereo_rig::depth::reproject_image_to_3d;
use cv_stereo_rig::{DisparityMap, Error};
use image::{Rgb, RgbImage};
use nalgebra::Matrix4;

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// `Q` of an ideal rig: focal length `f`, baseline `b`, principal point `(cx, cy)`.
fn ideal_q(f: f64, b: f64, cx: f64, cy: f64) -> Matrix4<f64> {
    Matrix4::new(
        1.0, 0.0, 0.0, -cx,
        0.0, 1.0, 0.0, -cy,
        0.0, 0.0, 0.0, f,
        0.0, 0.0, 1.0 / b, 0.0
    )
}

fn sample_map() -> DisparityMap {
    let mut map = DisparityMap::new(4, 2, -1.0);
    map.put(1, 0, 8.0);
    map.put(3, 1, 16.0);
    // Zero disparity is a point at infinity.
    map.put(0, 1, 0.0);
    map.update_stats();
    map
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[test]
fn reprojection_follows_the_pinhole_model() {
    let cloud = reproject_image_to_3d(&sample_map(), &ideal_q(500.0, 60.0, 2.0, 1.0));

    assert_eq!((cloud.width, cloud.height), (4, 2));
    assert_eq!(cloud.len(), 2);
    assert!(cloud.get(0, 0).is_none());
    assert!(cloud.get(0, 1).is_none());

    let near = cloud.get(3, 1).expect("matched pixel");
    assert_abs_diff_eq!(near.z, 500.0 * 60.0 / 16.0, epsilon = 1e-3);

    let far = cloud.get(1, 0).expect("matched pixel");
    assert_abs_diff_eq!(far.z, 3750.0, epsilon = 1e-3);
    assert_abs_diff_eq!(far.x, -7.5, epsilon = 1e-4);
    assert_abs_diff_eq!(far.y, -7.5, epsilon = 1e-4);
}

#[test]
fn clipping_drops_distant_points() {
    let mut cloud = reproject_image_to_3d(&sample_map(), &ideal_q(500.0, 60.0, 2.0, 1.0));
    cloud.clip_depth(2000.0);

    assert_eq!(cloud.len(), 1);
    assert!(cloud.get(3, 1).is_some());
    assert!(!cloud.is_empty());
}

#[test]
fn colours_must_match_the_cloud() {
    let cloud = reproject_image_to_3d(&sample_map(), &ideal_q(500.0, 60.0, 2.0, 1.0));
    let wrong = RgbImage::new(3, 2);
    assert!(matches!(cloud.with_colors(&wrong), Err(Error::DimensionMismatch(_))));
}

#[test]
fn ply_export_lists_valid_points() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let image = RgbImage::from_pixel(4, 2, Rgb([10, 20, 30]));
    let cloud = reproject_image_to_3d(&sample_map(), &ideal_q(500.0, 60.0, 2.0, 1.0)).with_colors(&image)?;

    let path = dir.path().join("cloud.ply");
    cloud.write_ply(&path)?;

    let text = fs::read_to_string(&path)?;
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "ply");
    assert!(lines.contains(&"element vertex 2"));
    assert!(lines.contains(&"property uchar red"));

    let body: Vec<&str> = lines.iter().skip_while(|l| **l != "end_header").skip(1).copied().collect();
    assert_eq!(body.len(), 2);
    assert!(body.iter().all(|l| l.ends_with("10 20 30")));

    Ok(())
}

#[test]
fn range_scaling_maps_the_search_window_to_gray() {
    let mut map = DisparityMap::new(3, 1, -9.0);
    map.put(0, 0, -8.0);
    map.put(1, 0, 8.0);

    let luma = map.to_luma_range(-8, 32);
    assert_eq!(luma.get_pixel(0, 0).0[0], 0);
    assert_eq!(luma.get_pixel(1, 0).0[0], 127);
    // Unmatched pixels are black.
    assert_eq!(luma.get_pixel(2, 0).0[0], 0);
}

#[test]
fn histogram_bins_whole_pixels() {
    let mut map = DisparityMap::new(4, 1, -1.0);
    map.put(0, 0, 2.0);
    map.put(1, 0, 2.5);
    map.put(2, 0, 4.0);
    assert!(map.histogram().is_empty());

    map.update_stats();
    assert_eq!(map.min_disp, Some(2.0));
    assert_eq!(map.max_disp, Some(4.0));
    assert_eq!(map.histogram(), vec![(2, 2), (3, 0), (4, 1)]);

    let normalised = map.to_luma_normalised();
    assert_eq!(normalised.get_pixel(2, 0).0[0], 255);
}

#[test]
fn fixed_point_uses_four_fractional_bits() {
    let mut map = DisparityMap::new(2, 1, -1.0);
    map.put(0, 0, 2.5);
    assert_eq!(map.to_fixed_point(), vec![40, -16]);
    assert_eq!(cv_stereo_rig::DISPARITY_SCALE, 16.0);
}
