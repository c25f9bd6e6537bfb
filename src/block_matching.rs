//! # Block matcher parameter store
//!
//! The block matcher is tuned through integer "positions", the values an operator moves on a
//! slider. Each position maps onto an effective [`StereoBm`] parameter, e.g. the `block_size`
//! position `b` gives a block of `5 + 2b` pixels, so every slider position is a legal setting.
//!
//! Positions are persisted as JSON so a tuning session can be restored.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::convert::TryFrom;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use image::DynamicImage;
use nalgebra::Matrix4;
use serde::{Deserialize, Serialize};

use crate::depth::{reproject_image_to_3d, PointCloud};
use crate::disparity::{DisparityAlgorithm, DisparityMap};
use crate::error::*;
use crate::frame::GrayStereoFrame;
use crate::stereo_bm::{PreFilterType, StereoBm};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Upper slider position of every tunable parameter. Parameters missing here are only set
/// programmatically.
pub const PARAMETER_MAXIMA: [(BmParameter, i32); 8] = [
    (BmParameter::NumDisp, 50),
    (BmParameter::BlockSize, 50),
    (BmParameter::PrefilterType, 1),
    (BmParameter::PrefilterSize, 25),
    (BmParameter::PrefilterCap, 62),
    (BmParameter::TextureThreshold, 50),
    (BmParameter::UniquenessRatio, 50),
    (BmParameter::SpeckleWindowSize, 255)
];

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Slider positions of every block matcher parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BmPositions {
    #[serde(rename = "Number Disparity")]
    pub num_disp: i32,
    #[serde(rename = "Block Size")]
    pub block_size: i32,
    #[serde(rename = "Prefilter Type")]
    pub prefilter_type: i32,
    #[serde(rename = "Prefilter Size")]
    pub prefilter_size: i32,
    #[serde(rename = "Prefilter Cap")]
    pub prefilter_cap: i32,
    #[serde(rename = "Texture Threshold")]
    pub texture_threshold: i32,
    #[serde(rename = "Uniqueness Ratio")]
    pub uniqueness_ratio: i32,
    #[serde(rename = "Speckle Range")]
    pub speckle_range: i32,
    #[serde(rename = "Speckle Window Size")]
    pub speckle_window_size: i32,
    #[serde(rename = "Disp12 Max Difference")]
    pub disp12_max_diff: i32,
    #[serde(rename = "Min Disparity")]
    pub min_disparity: i32
}

/// Block matcher driven by slider positions.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockMatcher {
    positions: BmPositions,
    stereo_bm: StereoBm
}

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BmParameter {
    NumDisp,
    BlockSize,
    PrefilterType,
    PrefilterSize,
    PrefilterCap,
    TextureThreshold,
    UniquenessRatio,
    SpeckleRange,
    SpeckleWindowSize,
    Disp12MaxDiff,
    MinDisparity
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl BmParameter {
    pub const ALL: [BmParameter; 11] = [
        BmParameter::NumDisp,
        BmParameter::BlockSize,
        BmParameter::PrefilterType,
        BmParameter::PrefilterSize,
        BmParameter::PrefilterCap,
        BmParameter::TextureThreshold,
        BmParameter::UniquenessRatio,
        BmParameter::SpeckleRange,
        BmParameter::SpeckleWindowSize,
        BmParameter::Disp12MaxDiff,
        BmParameter::MinDisparity
    ];

    pub fn name(self) -> &'static str {
        match self {
            BmParameter::NumDisp => "num_disp",
            BmParameter::BlockSize => "block_size",
            BmParameter::PrefilterType => "prefilter_type",
            BmParameter::PrefilterSize => "prefilter_size",
            BmParameter::PrefilterCap => "prefilter_cap",
            BmParameter::TextureThreshold => "texture_threshold",
            BmParameter::UniquenessRatio => "uniqueness_ratio",
            BmParameter::SpeckleRange => "speckle_range",
            BmParameter::SpeckleWindowSize => "speckle_window_size",
            BmParameter::Disp12MaxDiff => "disp12_max_diff",
            BmParameter::MinDisparity => "min_disparity"
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        BmParameter::ALL
            .iter()
            .copied()
            .find(|p| p.name() == name)
            .ok_or_else(|| Error::UnknownParameter(name.to_string()))
    }

    /// Upper slider position, if the parameter is tunable.
    pub fn maximum(self) -> Option<i32> {
        PARAMETER_MAXIMA
            .iter()
            .find(|(p, _)| *p == self)
            .map(|(_, max)| *max)
    }

    /// Map a slider position onto the effective matcher value.
    ///
    /// Positions whose value does not fit an `i32` are rejected.
    pub fn effective_value(self, position: i32) -> Result<i32> {
        let value = match self {
            BmParameter::NumDisp => position.checked_add(1).and_then(|p| p.checked_mul(16)),
            BmParameter::BlockSize | BmParameter::PrefilterSize => {
                position.checked_mul(2).and_then(|p| p.checked_add(5))
            },
            BmParameter::PrefilterCap
            | BmParameter::TextureThreshold
            | BmParameter::UniquenessRatio
            | BmParameter::SpeckleRange => position.checked_add(1),
            BmParameter::SpeckleWindowSize => position.checked_mul(2),
            BmParameter::PrefilterType | BmParameter::Disp12MaxDiff | BmParameter::MinDisparity => {
                Some(position)
            }
        };

        value.ok_or(Error::BadBlockMatcherArgument {
            parameter: self.name(),
            value: position,
            reason: "position is out of the representable range"
        })
    }
}

impl fmt::Display for BmParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Default for BmPositions {
    fn default() -> Self {
        BmPositions {
            num_disp: 1,
            block_size: 2,
            prefilter_type: 0,
            prefilter_size: 0,
            prefilter_cap: 0,
            texture_threshold: 0,
            uniqueness_ratio: 0,
            speckle_range: 0,
            speckle_window_size: 5,
            disp12_max_diff: 0,
            min_disparity: 0
        }
    }
}

impl BmPositions {
    pub fn get(&self, param: BmParameter) -> i32 {
        match param {
            BmParameter::NumDisp => self.num_disp,
            BmParameter::BlockSize => self.block_size,
            BmParameter::PrefilterType => self.prefilter_type,
            BmParameter::PrefilterSize => self.prefilter_size,
            BmParameter::PrefilterCap => self.prefilter_cap,
            BmParameter::TextureThreshold => self.texture_threshold,
            BmParameter::UniquenessRatio => self.uniqueness_ratio,
            BmParameter::SpeckleRange => self.speckle_range,
            BmParameter::SpeckleWindowSize => self.speckle_window_size,
            BmParameter::Disp12MaxDiff => self.disp12_max_diff,
            BmParameter::MinDisparity => self.min_disparity
        }
    }

    fn slot(&mut self, param: BmParameter) -> &mut i32 {
        match param {
            BmParameter::NumDisp => &mut self.num_disp,
            BmParameter::BlockSize => &mut self.block_size,
            BmParameter::PrefilterType => &mut self.prefilter_type,
            BmParameter::PrefilterSize => &mut self.prefilter_size,
            BmParameter::PrefilterCap => &mut self.prefilter_cap,
            BmParameter::TextureThreshold => &mut self.texture_threshold,
            BmParameter::UniquenessRatio => &mut self.uniqueness_ratio,
            BmParameter::SpeckleRange => &mut self.speckle_range,
            BmParameter::SpeckleWindowSize => &mut self.speckle_window_size,
            BmParameter::Disp12MaxDiff => &mut self.disp12_max_diff,
            BmParameter::MinDisparity => &mut self.min_disparity
        }
    }
}

impl Default for BlockMatcher {
    fn default() -> Self {
        let positions = BmPositions::default();
        let mut stereo_bm = StereoBm::default();
        for param in BmParameter::ALL.iter().copied() {
            // Defaults always map onto legal values.
            let _ = apply(&mut stereo_bm, param, positions.get(param));
        }

        BlockMatcher { positions, stereo_bm }
    }
}

impl BlockMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a matcher from a full set of positions, validating each of them.
    pub fn from_positions(positions: BmPositions) -> Result<Self> {
        let mut bm = Self::default();
        bm.set_positions(positions)?;
        Ok(bm)
    }

    pub fn positions(&self) -> &BmPositions {
        &self.positions
    }

    /// Effective matcher parameters.
    pub fn stereo_bm(&self) -> &StereoBm {
        &self.stereo_bm
    }

    pub fn get(&self, param: BmParameter) -> i32 {
        self.positions.get(param)
    }

    pub fn get_by_name(&self, name: &str) -> Result<i32> {
        Ok(self.get(BmParameter::from_name(name)?))
    }

    /// Move one parameter to a new position.
    ///
    /// The matcher is left untouched if the mapped value is not legal.
    pub fn set(&mut self, param: BmParameter, position: i32) -> Result<()> {
        let mut candidate = self.stereo_bm;
        apply(&mut candidate, param, position)?;
        candidate.validate()?;

        self.stereo_bm = candidate;
        *self.positions.slot(param) = position;
        Ok(())
    }

    pub fn set_by_name(&mut self, name: &str, position: i32) -> Result<()> {
        self.set(BmParameter::from_name(name)?, position)
    }

    /// Apply a full set of positions; nothing changes unless every one is legal.
    pub fn set_positions(&mut self, positions: BmPositions) -> Result<()> {
        let mut candidate = self.clone();
        for param in BmParameter::ALL.iter().copied() {
            candidate.set(param, positions.get(param))?;
        }
        *self = candidate;
        Ok(())
    }

    pub fn set_num_disp(&mut self, position: i32) -> Result<()> {
        self.set(BmParameter::NumDisp, position)
    }

    pub fn set_block_size(&mut self, position: i32) -> Result<()> {
        self.set(BmParameter::BlockSize, position)
    }

    pub fn set_prefilter_type(&mut self, position: i32) -> Result<()> {
        self.set(BmParameter::PrefilterType, position)
    }

    pub fn set_prefilter_size(&mut self, position: i32) -> Result<()> {
        self.set(BmParameter::PrefilterSize, position)
    }

    pub fn set_prefilter_cap(&mut self, position: i32) -> Result<()> {
        self.set(BmParameter::PrefilterCap, position)
    }

    pub fn set_texture_threshold(&mut self, position: i32) -> Result<()> {
        self.set(BmParameter::TextureThreshold, position)
    }

    pub fn set_uniqueness_ratio(&mut self, position: i32) -> Result<()> {
        self.set(BmParameter::UniquenessRatio, position)
    }

    pub fn set_speckle_range(&mut self, position: i32) -> Result<()> {
        self.set(BmParameter::SpeckleRange, position)
    }

    pub fn set_speckle_window_size(&mut self, position: i32) -> Result<()> {
        self.set(BmParameter::SpeckleWindowSize, position)
    }

    pub fn set_disp12_max_diff(&mut self, position: i32) -> Result<()> {
        self.set(BmParameter::Disp12MaxDiff, position)
    }

    pub fn set_min_disparity(&mut self, position: i32) -> Result<()> {
        self.set(BmParameter::MinDisparity, position)
    }

    /// Path of the parameter file `{dir}/{name}.json`.
    pub fn json_path<P: AsRef<Path>>(dir: P, name: &str) -> PathBuf {
        dir.as_ref().join(format!("{}.json", name))
    }

    /// Save the current positions to `{dir}/{name}.json`.
    pub fn save_to_json<P: AsRef<Path>>(&self, dir: P, name: &str) -> Result<PathBuf> {
        fs::create_dir_all(dir.as_ref())?;
        let path = Self::json_path(dir, name);
        fs::write(&path, serde_json::to_string_pretty(&self.positions)?)?;
        log::info!("Saved block matcher parameters to {}", path.display());
        Ok(path)
    }

    /// Restore positions from `{dir}/{name}.json`.
    ///
    /// Files holding the object encoded a second time as a JSON string are also accepted.
    pub fn load_from_json<P: AsRef<Path>>(&mut self, dir: P, name: &str) -> Result<()> {
        let path = Self::json_path(dir, name);
        let text = fs::read_to_string(&path)?;

        let positions: BmPositions = match serde_json::from_str(&text)? {
            serde_json::Value::String(inner) => serde_json::from_str(&inner)?,
            value => serde_json::from_value(value)?
        };

        self.set_positions(positions)?;
        log::info!("Loaded block matcher parameters from {}", path.display());
        Ok(())
    }

    /// Compute disparity from an image pair, converting colour images to gray first.
    pub fn get_disparity(&self, left: &DynamicImage, right: &DynamicImage) -> Result<DisparityMap> {
        let frame = GrayStereoFrame::from_dynamic(left, right);
        self.get_disparity_gray(&frame)
    }

    /// Compute disparity from a gray pair.
    pub fn get_disparity_gray(&self, frame: &GrayStereoFrame) -> Result<DisparityMap> {
        frame.check_dimensions()?;
        self.stereo_bm.match_pair(&frame.left, &frame.right)
    }

    /// Reproject a disparity map to 3D with the disparity-to-depth matrix `q`.
    pub fn get_3d(disparity: &DisparityMap, q: &Matrix4<f64>) -> PointCloud {
        reproject_image_to_3d(disparity, q)
    }
}

impl DisparityAlgorithm for BlockMatcher {
    fn compute(&mut self, frame: &GrayStereoFrame) -> Result<DisparityMap> {
        self.get_disparity_gray(frame)
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Write the effective value of one position into the matcher parameters.
fn apply(bm: &mut StereoBm, param: BmParameter, position: i32) -> Result<()> {
    let value = param.effective_value(position)?;
    match param {
        BmParameter::NumDisp => bm.num_disparities = value,
        BmParameter::BlockSize => bm.block_size = value,
        BmParameter::PrefilterType => bm.pre_filter_type = PreFilterType::try_from(value)?,
        BmParameter::PrefilterSize => bm.pre_filter_size = value,
        BmParameter::PrefilterCap => bm.pre_filter_cap = value,
        BmParameter::TextureThreshold => bm.texture_threshold = value,
        BmParameter::UniquenessRatio => bm.uniqueness_ratio = value,
        BmParameter::SpeckleRange => bm.speckle_range = value,
        BmParameter::SpeckleWindowSize => bm.speckle_window_size = value,
        BmParameter::Disp12MaxDiff => bm.disp12_max_diff = value,
        BmParameter::MinDisparity => bm.min_disparity = value
    }
    Ok(())
}
