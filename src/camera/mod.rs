//! # Stereo camera
//!
//! The rig's camera delivers both eyes as one side-by-side frame. A [`FrameSource`] produces
//! those raw frames (a V4L2 device, or a folder of recorded images) and a [`StereoCamera`]
//! splits, converts and optionally rectifies them.

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

mod file;
#[cfg(feature = "v4l")]
mod device;

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use image::{imageops, GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

use crate::block_matching::BlockMatcher;
use crate::calibration::StereoCalibration;
use crate::depth::PointCloud;
use crate::error::*;
use crate::frame::{split_side_by_side, EyeOrder, GrayStereoFrame, StereoFrame};

// -----------------------------------------------------------------------------------------------
// EXPORTS
// -----------------------------------------------------------------------------------------------

pub use file::FileSource;
#[cfg(feature = "v4l")]
pub use device::V4lSource;

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// White balance temperature applied when a device opens, in Kelvin.
pub const DEFAULT_WHITE_BALANCE: u32 = 5200;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Size of the side-by-side frame and frame rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureMode {
    pub width: u32,
    pub height: u32,
    pub fps: u32
}

/// A stereo camera built on a raw frame source.
pub struct StereoCamera<S: FrameSource> {
    source: S,
    eye_order: EyeOrder,
    calibration: Option<StereoCalibration>,
    block_matcher: Option<BlockMatcher>
}

// -----------------------------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------------------------

/// Producer of raw side-by-side frames.
pub trait FrameSource {
    /// Grab the next side-by-side frame.
    fn grab(&mut self) -> Result<RgbImage>;

    /// Current capture mode.
    fn mode(&self) -> CaptureMode;

    fn set_mode(&mut self, mode: CaptureMode) -> Result<()>;

    /// Set the white balance temperature in Kelvin.
    fn set_white_balance(&mut self, temperature: u32) -> Result<()>;
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl CaptureMode {
    /// Full HD, 1920x1080 at 30 fps.
    pub const FHD: CaptureMode = CaptureMode::new(1920, 1080, 30);

    /// 1280x800 at 60 fps.
    pub const HD: CaptureMode = CaptureMode::new(1280, 800, 60);

    /// 2560x800 at 60 fps.
    pub const DCI_2K: CaptureMode = CaptureMode::new(2560, 800, 60);

    /// 1280x376 at 120 fps, the mode the rig runs in.
    pub const DEFAULT: CaptureMode = CaptureMode::new(1280, 376, 120);

    /// A single lens webcam, useful when testing without the stereo module.
    pub const WEBCAM: CaptureMode = CaptureMode::new(640, 480, 30);

    pub const fn new(width: u32, height: u32, fps: u32) -> Self {
        CaptureMode { width, height, fps }
    }

    /// Look up a preset by name: `fhd`, `hd`, `2k`, `default` or `webcam`.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "fhd" => Ok(CaptureMode::FHD),
            "hd" => Ok(CaptureMode::HD),
            "2k" | "dci_2k" => Ok(CaptureMode::DCI_2K),
            "default" => Ok(CaptureMode::DEFAULT),
            "webcam" => Ok(CaptureMode::WEBCAM),
            _ => Err(Error::InvalidMode(name.to_string()))
        }
    }

    /// Width of one eye.
    pub fn delimiter(&self) -> u32 {
        self.width / 2
    }

    /// Size of one eye's image.
    pub fn eye_size(&self) -> (u32, u32) {
        (self.delimiter(), self.height)
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn grab(&mut self) -> Result<RgbImage> {
        (**self).grab()
    }

    fn mode(&self) -> CaptureMode {
        (**self).mode()
    }

    fn set_mode(&mut self, mode: CaptureMode) -> Result<()> {
        (**self).set_mode(mode)
    }

    fn set_white_balance(&mut self, temperature: u32) -> Result<()> {
        (**self).set_white_balance(temperature)
    }
}

impl Default for CaptureMode {
    fn default() -> Self {
        CaptureMode::DEFAULT
    }
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{}", self.width, self.height, self.fps)
    }
}

impl<S: FrameSource> StereoCamera<S> {
    pub fn new(source: S) -> Self {
        StereoCamera {
            source,
            eye_order: EyeOrder::default(),
            calibration: None,
            block_matcher: None
        }
    }

    pub fn with_eye_order(mut self, eye_order: EyeOrder) -> Self {
        self.eye_order = eye_order;
        self
    }

    pub fn with_calibration(mut self, calibration: StereoCalibration) -> Self {
        self.calibration = Some(calibration);
        self
    }

    pub fn with_block_matcher(mut self, block_matcher: BlockMatcher) -> Self {
        self.block_matcher = Some(block_matcher);
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn eye_order(&self) -> EyeOrder {
        self.eye_order
    }

    pub fn calibration(&self) -> Option<&StereoCalibration> {
        self.calibration.as_ref()
    }

    pub fn block_matcher(&self) -> Option<&BlockMatcher> {
        self.block_matcher.as_ref()
    }

    pub fn block_matcher_mut(&mut self) -> Option<&mut BlockMatcher> {
        self.block_matcher.as_mut()
    }

    pub fn mode(&self) -> CaptureMode {
        self.source.mode()
    }

    pub fn fps(&self) -> u32 {
        self.mode().fps
    }

    /// Size of the side-by-side frame.
    pub fn frame_size(&self) -> (u32, u32) {
        let mode = self.mode();
        (mode.width, mode.height)
    }

    /// Column at which the side-by-side frame is split.
    pub fn delimiter(&self) -> u32 {
        self.mode().delimiter()
    }

    pub fn set_mode(&mut self, mode: CaptureMode) -> Result<()> {
        log::info!("Setting capture mode {}", mode);
        self.source.set_mode(mode)
    }

    pub fn set_fps(&mut self, fps: u32) -> Result<()> {
        let mode = self.mode();
        self.set_mode(CaptureMode { fps, ..mode })
    }

    /// Set the side-by-side frame size; the split column follows the width.
    pub fn set_frame_size(&mut self, width: u32, height: u32) -> Result<()> {
        let mode = self.mode();
        self.set_mode(CaptureMode {
            width,
            height,
            ..mode
        })
    }

    pub fn set_white_balance(&mut self, temperature: u32) -> Result<()> {
        self.source.set_white_balance(temperature)
    }

    /// The unsplit side-by-side frame.
    pub fn read_raw(&mut self) -> Result<RgbImage> {
        self.source.grab()
    }

    pub fn read_raw_gray(&mut self) -> Result<GrayImage> {
        Ok(imageops::grayscale(&self.read_raw()?))
    }

    pub fn read_color(&mut self) -> Result<StereoFrame> {
        let raw = self.read_raw()?;
        let mut frame = split_side_by_side(&raw, self.eye_order)?;
        frame.timestamp_us = timestamp_us();
        Ok(frame)
    }

    pub fn read_gray(&mut self) -> Result<GrayStereoFrame> {
        Ok(self.read_color()?.to_gray())
    }

    pub fn read_color_rectified(&mut self) -> Result<StereoFrame> {
        let frame = self.read_color()?;
        self.require_calibration()?.rectify(&frame)
    }

    pub fn read_gray_rectified(&mut self) -> Result<GrayStereoFrame> {
        let frame = self.read_gray()?;
        self.require_calibration()?.rectify_gray(&frame)
    }

    /// Disparity of a rectified pair reprojected to 3D and coloured by the left image.
    pub fn point_cloud(&self, pair: &StereoFrame) -> Result<PointCloud> {
        let calibration = self.require_calibration()?;
        let block_matcher = self
            .block_matcher
            .as_ref()
            .ok_or_else(|| Error::Camera("no block matcher attached".into()))?;

        let disparity = block_matcher.get_disparity_gray(&pair.to_gray())?;
        BlockMatcher::get_3d(&disparity, &calibration.disp_to_depth_mat).with_colors(&pair.left)
    }

    fn require_calibration(&self) -> Result<&StereoCalibration> {
        self.calibration
            .as_ref()
            .ok_or_else(|| Error::Camera("no stereo calibration attached".into()))
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

fn timestamp_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
