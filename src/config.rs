//! # Rig configuration
//!
//! Settings of the whole rig in one JSON file. Every section falls back to its defaults, so a
//! file only needs the values that differ.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::camera::{CaptureMode, DEFAULT_WHITE_BALANCE};
use crate::chessboard::DetectorParams;
use crate::error::*;
use crate::frame::EyeOrder;
use crate::motor::ASTAR_ADDRESS;
use crate::threshold::ThresholdParams;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    pub camera: CameraConfig,
    pub chessboard: ChessboardConfig,
    pub calibration: CalibrationConfig,
    pub block_matcher: BlockMatcherConfig,
    pub threshold: ThresholdParams,
    pub motor: MotorConfig
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Index of the `/dev/video` device.
    pub device: usize,
    /// Capture preset name, see [`CaptureMode::from_name`].
    pub mode: String,
    /// White balance temperature in Kelvin.
    pub white_balance: u32,
    pub eye_order: EyeOrder,
    /// Folder of recorded side-by-side frames used instead of the device when set.
    pub frames_dir: Option<PathBuf>,
    /// Extension of the recorded frames.
    pub frames_extension: String
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChessboardConfig {
    /// Inner corners per row.
    pub rows: usize,
    /// Number of inner corner rows.
    pub columns: usize,
    /// Side of a square, in the unit wanted for depth.
    pub square_size: f64,
    pub detector: DetectorParams
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Root folder holding the calibration sub-folders.
    pub folder: PathBuf,
    pub left_dir: String,
    pub right_dir: String,
    pub stereo_dir: String,
    /// Rectification scaling, negative for the default.
    pub alpha: f64
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockMatcherConfig {
    pub dir: PathBuf,
    pub name: String
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotorConfig {
    /// Number of the `/dev/i2c` bus.
    pub bus: u8,
    pub address: u16
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl RigConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())?;
        let config = serde_json::from_str(&raw)?;
        log::debug!("Loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    /// Load `path` when it exists, defaults otherwise.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        }
        else {
            log::info!("No configuration at {}, using defaults", path.as_ref().display());
            Ok(RigConfig::default())
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path.as_ref(), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

impl CameraConfig {
    pub fn capture_mode(&self) -> Result<CaptureMode> {
        CaptureMode::from_name(&self.mode)
    }
}

impl ChessboardConfig {
    pub fn pattern(&self) -> (usize, usize) {
        (self.rows, self.columns)
    }
}

impl CalibrationConfig {
    pub fn left_path(&self) -> PathBuf {
        self.folder.join(&self.left_dir)
    }

    pub fn right_path(&self) -> PathBuf {
        self.folder.join(&self.right_dir)
    }

    pub fn stereo_path(&self) -> PathBuf {
        self.folder.join(&self.stereo_dir)
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        CameraConfig {
            device: 2,
            mode: "default".into(),
            white_balance: DEFAULT_WHITE_BALANCE,
            eye_order: EyeOrder::default(),
            frames_dir: None,
            frames_extension: "jpg".into()
        }
    }
}

impl Default for ChessboardConfig {
    fn default() -> Self {
        ChessboardConfig {
            rows: 7,
            columns: 5,
            square_size: 3.0,
            detector: DetectorParams::default()
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        CalibrationConfig {
            folder: PathBuf::from("config"),
            left_dir: "ps5_1_left".into(),
            right_dir: "ps5_1_right".into(),
            stereo_dir: "ps5_1_stereo".into(),
            alpha: -1.0
        }
    }
}

impl Default for BlockMatcherConfig {
    fn default() -> Self {
        BlockMatcherConfig {
            dir: PathBuf::from("config"),
            name: "params".into()
        }
    }
}

impl Default for MotorConfig {
    fn default() -> Self {
        MotorConfig {
            bus: 0,
            address: ASTAR_ADDRESS
        }
    }
}
