//! # V4L2 capture
//!
//! Reads YUYV frames from a video device through memory mapped buffers.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use image::RgbImage;
use v4l::buffer::Type;
use v4l::control::{Control, Value};
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::FourCC;

use super::{CaptureMode, FrameSource, DEFAULT_WHITE_BALANCE};
use crate::error::*;
use crate::frame::yuyv_to_rgb;

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

const V4L2_CID_BASE: u32 = 0x0098_0900;
const V4L2_CID_AUTO_WHITE_BALANCE: u32 = V4L2_CID_BASE + 12;
const V4L2_CID_WHITE_BALANCE_TEMPERATURE: u32 = V4L2_CID_BASE + 26;

const BUFFER_COUNT: u32 = 4;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// A V4L2 video device delivering side-by-side YUYV frames.
pub struct V4lSource {
    path: String,
    stream: Option<MmapStream<'static>>,
    device: Device,
    mode: CaptureMode
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl V4lSource {
    /// Open `/dev/video{index}`.
    pub fn open(index: usize, mode: CaptureMode) -> Result<Self> {
        Self::with_path(&format!("/dev/video{}", index), mode)
    }

    /// Open a device, set its mode and fix its white balance.
    pub fn with_path(path: &str, mode: CaptureMode) -> Result<Self> {
        let device = Device::with_path(path)
            .map_err(|e| Error::Camera(format!("failed to open {}: {}", path, e)))?;

        let mut source = V4lSource {
            path: path.to_string(),
            stream: None,
            device,
            mode
        };
        source.configure(mode)?;

        if let Err(e) = source.set_control(V4L2_CID_AUTO_WHITE_BALANCE, Value::Boolean(false)) {
            log::warn!("Could not disable auto white balance: {}", e);
        }
        if let Err(e) = source.set_white_balance(DEFAULT_WHITE_BALANCE) {
            log::warn!("Could not set white balance: {}", e);
        }

        Ok(source)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn configure(&mut self, mode: CaptureMode) -> Result<()> {
        // Buffers must be released before the format changes.
        self.stream = None;

        let yuyv = FourCC::new(b"YUYV");
        let mut format = self.device.format()?;
        format.width = mode.width;
        format.height = mode.height;
        format.fourcc = yuyv;

        let actual = self.device.set_format(&format)?;
        if actual.fourcc != yuyv {
            return Err(Error::Camera(format!(
                "{} does not deliver YUYV frames (got {})",
                self.path, actual.fourcc
            )));
        }
        if (actual.width, actual.height) != (mode.width, mode.height) {
            log::warn!(
                "{} gave {}x{} instead of {}x{}",
                self.path,
                actual.width,
                actual.height,
                mode.width,
                mode.height
            );
        }

        self.device.set_params(&Parameters::with_fps(mode.fps))?;
        self.mode = CaptureMode::new(actual.width, actual.height, mode.fps);
        log::info!("Capturing {} from {}", self.mode, self.path);
        Ok(())
    }

    fn set_control(&self, id: u32, value: Value) -> Result<()> {
        self.device
            .set_control(Control { id, value })
            .map_err(|e| Error::Camera(format!("failed to set control {:#x} on {}: {}", id, self.path, e)))
    }
}

impl FrameSource for V4lSource {
    fn grab(&mut self) -> Result<RgbImage> {
        if self.stream.is_none() {
            self.stream = Some(MmapStream::with_buffers(&self.device, Type::VideoCapture, BUFFER_COUNT)?);
        }
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| Error::Camera("capture stream is not running".into()))?;

        let (buf, _meta) = stream.next()?;
        yuyv_to_rgb(buf, self.mode.width, self.mode.height)
    }

    fn mode(&self) -> CaptureMode {
        self.mode
    }

    fn set_mode(&mut self, mode: CaptureMode) -> Result<()> {
        self.configure(mode)
    }

    fn set_white_balance(&mut self, temperature: u32) -> Result<()> {
        log::debug!("White balance {} K", temperature);
        self.set_control(V4L2_CID_WHITE_BALANCE_TEMPERATURE, Value::Integer(temperature as i64))
    }
}
