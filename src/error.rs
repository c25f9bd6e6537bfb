//! # Error standards
//!
//! This module provides a standardised error enum and result type for this crate.

// -----------------------------------------------------------------------------------------------
// TYPES
// -----------------------------------------------------------------------------------------------

/// Standard result type used in the stereo rig crate.
pub type Result<T> = std::result::Result<T, Error>;

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No chessboard could be found")]
    ChessboardNotFound,

    /// A block matcher parameter was given a value the matcher cannot accept.
    #[error("Bad value {value} for block matcher parameter '{parameter}': {reason}")]
    BadBlockMatcherArgument {
        parameter: &'static str,
        value: i32,
        reason: &'static str
    },

    #[error("Unknown block matcher parameter '{0}'")]
    UnknownParameter(String),

    #[error("Calibration failed: {0}")]
    Calibration(String),

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Motor driver error: {0}")]
    MotorDriver(String),

    #[error("Capture mode '{0}' is not supported")]
    InvalidMode(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String)
}
