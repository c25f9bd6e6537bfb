//! # Configuration
//!
//! Defaults, partial files and persistence of the rig configuration.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::fs;
use std::path::PathBuf;

use cv_stereo_rig::camera::CaptureMode;
use cv_stereo_rig::config::RigConfig;
use cv_stereo_rig::frame::EyeOrder;
use cv_stereo_rig::Error;

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[test]
fn defaults_describe_the_rig() -> Result<(), Box<dyn std::error::Error>> {
    let config = RigConfig::default();

    assert_eq!(config.camera.device, 2);
    assert_eq!(config.camera.capture_mode()?, CaptureMode::DEFAULT);
    assert_eq!(config.camera.eye_order, EyeOrder::LeftFirst);
    assert_eq!(config.chessboard.pattern(), (7, 5));
    assert_eq!(config.calibration.left_path(), PathBuf::from("config/ps5_1_left"));
    assert_eq!(config.calibration.stereo_path(), PathBuf::from("config/ps5_1_stereo"));
    assert_eq!(config.motor.address, 20);

    Ok(())
}

#[test]
fn partial_files_keep_the_other_defaults() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("rig.json");
    fs::write(
        &path,
        r#"{ "camera": { "device": 0, "eye_order": "right_first" }, "chessboard": { "square_size": 2.5 } }"#
    )?;

    let config = RigConfig::load(&path)?;
    assert_eq!(config.camera.device, 0);
    assert_eq!(config.camera.eye_order, EyeOrder::RightFirst);
    assert_eq!(config.camera.mode, "default");
    assert_eq!(config.chessboard.square_size, 2.5);
    assert_eq!(config.chessboard.rows, 7);
    assert_eq!(config.threshold, RigConfig::default().threshold);

    Ok(())
}

#[test]
fn saved_configs_load_back() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("nested").join("rig.json");

    let mut config = RigConfig::default();
    config.camera.mode = "hd".into();
    config.camera.frames_dir = Some(PathBuf::from("recorded"));
    config.calibration.alpha = 0.5;
    config.save(&path)?;

    assert_eq!(RigConfig::load(&path)?, config);
    assert_eq!(RigConfig::load_or_default(&path)?, config);

    Ok(())
}

#[test]
fn missing_or_broken_files() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;

    let missing = dir.path().join("absent.json");
    assert_eq!(RigConfig::load_or_default(&missing)?, RigConfig::default());
    assert!(matches!(RigConfig::load(&missing), Err(Error::Io(_))));

    let broken = dir.path().join("broken.json");
    fs::write(&broken, "{ camera: ")?;
    assert!(matches!(RigConfig::load(&broken), Err(Error::Json(_))));

    Ok(())
}

#[test]
fn unknown_capture_modes_are_errors() {
    let mut config = RigConfig::default();
    config.camera.mode = "8k".into();
    assert!(matches!(config.camera.capture_mode(), Err(Error::InvalidMode(_))));
}
