//! # Calibration
//!
//! Single camera and stereo calibration from chessboard views, rectification, and persistence of
//! the results as one JSON file per matrix.

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

pub mod camera;
pub mod geometry;
pub mod rectify;
pub mod stereo;

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use nalgebra::storage::Storage;
use nalgebra::{Dim, Matrix, SMatrix};
use serde::{Deserialize, Serialize};

use crate::error::*;

// -----------------------------------------------------------------------------------------------
// EXPORTS
// -----------------------------------------------------------------------------------------------

pub use camera::{calibrate_camera, CameraCalibration, CameraCalibrator};
pub use rectify::{
    compute_correspond_epilines, init_undistort_rectify_map, optimal_new_camera_matrix,
    projection_camera, remap, stereo_rectify, undistort_points, Interpolation, Rectification,
    RemapTable, Roi
};
pub use stereo::{StereoCalibration, StereoCalibrator};

// -----------------------------------------------------------------------------------------------
// TYPES
// -----------------------------------------------------------------------------------------------

/// Row-major matrix as written to disk.
pub type Table = Vec<Vec<f64>>;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// A value held for each camera of the rig.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Sided<T> {
    pub left: T,
    pub right: T
}

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right
}

// -----------------------------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------------------------

/// A calibration that can be written to and read back from a folder of JSON files.
///
/// Each entry is saved as `{key}.json`, holding a row-major array of arrays. Per-camera entries
/// use `{key}_left` and `{key}_right` as their key.
pub trait Calibration: Sized {
    /// Keys of every file making up the calibration.
    fn keys() -> Vec<String>;

    fn to_tables(&self) -> Vec<(String, Table)>;

    fn from_tables(tables: &HashMap<String, Table>) -> Result<Self>;

    /// Write every entry into `folder`, creating it when missing.
    ///
    /// Fails before writing an entry holding a non-finite value.
    fn export<P: AsRef<Path>>(&self, folder: P) -> Result<()> {
        let folder = folder.as_ref();
        log::info!("Saving: {}", folder.display());
        fs::create_dir_all(folder)?;

        for (key, table) in self.to_tables() {
            // JSON has no encoding for NaN or infinities.
            if table.iter().flatten().any(|v| !v.is_finite()) {
                return Err(Error::Calibration(format!("{} holds a non-finite value", key)));
            }
            let path = folder.join(format!("{}.json", key));
            fs::write(&path, serde_json::to_string(&table)?)?;
        }

        Ok(())
    }

    /// Read a calibration written by [`Calibration::export`].
    fn load<P: AsRef<Path>>(folder: P) -> Result<Self> {
        let folder = folder.as_ref();
        let mut tables = HashMap::new();

        for key in Self::keys() {
            let path = folder.join(format!("{}.json", key));
            let text = fs::read_to_string(&path)?;
            let table: Table = serde_json::from_str(&text)?;
            tables.insert(key, table);
        }

        log::info!("Loaded calibration from {}", folder.display());
        Self::from_tables(&tables)
    }
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Side {
    pub const ALL: [Side; 2] = [Side::Left, Side::Right];

    pub fn name(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right"
        }
    }

    /// Key of a per-camera entry.
    pub fn key(self, base: &str) -> String {
        format!("{}_{}", base, self.name())
    }
}

impl<T> Sided<T> {
    pub fn new(left: T, right: T) -> Self {
        Sided { left, right }
    }

    pub fn get(&self, side: Side) -> &T {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right
        }
    }

    pub fn get_mut(&mut self, side: Side) -> &mut T {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right
        }
    }

    pub fn map<U, F: FnMut(&T) -> U>(&self, mut f: F) -> Sided<U> {
        Sided {
            left: f(&self.left),
            right: f(&self.right)
        }
    }

    /// Build both sides from a fallible function of the side.
    pub fn try_from_fn<F: FnMut(Side) -> Result<T>>(mut f: F) -> Result<Sided<T>> {
        Ok(Sided {
            left: f(Side::Left)?,
            right: f(Side::Right)?
        })
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

pub(crate) fn table_from_matrix<R: Dim, C: Dim, S: Storage<f64, R, C>>(
    m: &Matrix<f64, R, C, S>
) -> Table {
    (0..m.nrows())
        .map(|r| (0..m.ncols()).map(|c| m[(r, c)]).collect())
        .collect()
}

pub(crate) fn table<'a>(tables: &'a HashMap<String, Table>, key: &str) -> Result<&'a Table> {
    tables
        .get(key)
        .ok_or_else(|| Error::Calibration(format!("missing calibration entry {}", key)))
}

pub(crate) fn matrix_from_table<const R: usize, const C: usize>(
    tables: &HashMap<String, Table>,
    key: &str
) -> Result<SMatrix<f64, R, C>> {
    let t = table(tables, key)?;
    if t.len() != R || t.iter().any(|row| row.len() != C) {
        return Err(Error::Calibration(format!(
            "{} must be a {}x{} matrix",
            key, R, C
        )));
    }
    Ok(SMatrix::from_fn(|r, c| t[r][c]))
}

pub(crate) fn scalar_from_table(tables: &HashMap<String, Table>, key: &str) -> Result<f64> {
    Ok(matrix_from_table::<1, 1>(tables, key)?[(0, 0)])
}
