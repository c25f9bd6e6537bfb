//! # Stereo Rig
//!
//! This crate drives a side-by-side stereo camera mounted on a small rover: frame capture,
//! chessboard calibration of each camera and of the pair, rectification, block matching
//! disparity, depth reprojection and the rover's motor controller.

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

pub mod block_matching;
pub mod calibration;
pub mod camera;
pub mod chessboard;
pub mod config;
pub mod depth;
mod disparity;
mod error;
mod float_image;
pub mod frame;
pub mod motor;
pub mod stereo_bm;
pub mod threshold;
pub mod tuner;

// -----------------------------------------------------------------------------------------------
// EXPORTS
// -----------------------------------------------------------------------------------------------

pub use disparity::{DisparityAlgorithm, DisparityMap, DISPARITY_SCALE, DISPARITY_SHIFT};
pub use error::{Error, Result};
pub use float_image::GrayFloatImage;

pub mod prelude {
    pub use crate::block_matching::{BlockMatcher, BmParameter, BmPositions};
    pub use crate::calibration::{
        Calibration, CameraCalibration, CameraCalibrator, Side, Sided, StereoCalibration,
        StereoCalibrator
    };
    pub use crate::camera::{CaptureMode, FileSource, FrameSource, StereoCamera};
    pub use crate::chessboard::{ChessboardFinder, TermCriteria};
    pub use crate::config::RigConfig;
    pub use crate::depth::PointCloud;
    pub use crate::disparity::{DisparityAlgorithm, DisparityMap};
    pub use crate::error::{Error, Result};
    pub use crate::frame::{EyeOrder, GrayStereoFrame, StereoFrame};
    pub use crate::motor::{I2cBus, MotorDriver, Teleop};
    pub use crate::stereo_bm::StereoBm;
    pub use crate::threshold::ThresholdParams;
    pub use crate::tuner::BmTuner;
}
