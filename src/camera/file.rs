//! # Recorded frames
//!
//! Replays a folder of side-by-side images as if they came from the camera.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::fs;
use std::path::{Path, PathBuf};

use image::RgbImage;

use super::{CaptureMode, FrameSource};
use crate::error::*;

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

const DEFAULT_EXTENSION: &str = "jpg";

/// Frame rate reported for recorded frames.
const REPLAY_FPS: u32 = 30;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// A folder of side-by-side images, served in file name order and cycling.
pub struct FileSource {
    paths: Vec<PathBuf>,
    frames: Vec<RgbImage>,
    pointer: usize,
    mode: CaptureMode
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl FileSource {
    /// Load every `*.jpg` in `dir`.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::open_with_extension(dir, DEFAULT_EXTENSION)
    }

    /// Load every image with extension `ext` in `dir`. All images must share one size.
    pub fn open_with_extension<P: AsRef<Path>>(dir: P, ext: &str) -> Result<Self> {
        let dir = dir.as_ref();
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map_or(false, |e| e.eq_ignore_ascii_case(ext))
            })
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(Error::Camera(format!(
                "no *.{} images in {}",
                ext,
                dir.display()
            )));
        }

        let mut frames: Vec<RgbImage> = Vec::with_capacity(paths.len());
        for path in paths.iter() {
            let frame = image::open(path)?.to_rgb();
            if let Some(first) = frames.first() {
                if first.dimensions() != frame.dimensions() {
                    return Err(Error::DimensionMismatch(format!(
                        "{} is {:?} but earlier images are {:?}",
                        path.display(),
                        frame.dimensions(),
                        first.dimensions()
                    )));
                }
            }
            frames.push(frame);
        }

        let (width, height) = frames[0].dimensions();
        log::info!("Loaded {} recorded frames of {}x{}", frames.len(), width, height);

        Ok(FileSource {
            paths,
            frames,
            pointer: 0,
            mode: CaptureMode::new(width, height, REPLAY_FPS)
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn pointer(&self) -> usize {
        self.pointer
    }

    /// Move to frame `index`, wrapping around the number of frames.
    pub fn set_pointer(&mut self, index: usize) {
        self.pointer = index % self.frames.len();
    }

    /// Path of the frame the next grab returns.
    pub fn current_path(&self) -> &Path {
        &self.paths[self.pointer]
    }
}

impl FrameSource for FileSource {
    fn grab(&mut self) -> Result<RgbImage> {
        let frame = self.frames[self.pointer].clone();
        self.pointer = (self.pointer + 1) % self.frames.len();
        Ok(frame)
    }

    fn mode(&self) -> CaptureMode {
        self.mode
    }

    /// Only the frame rate of recorded frames can change.
    fn set_mode(&mut self, mode: CaptureMode) -> Result<()> {
        if (mode.width, mode.height) != (self.mode.width, self.mode.height) {
            return Err(Error::InvalidMode(format!(
                "{} (recorded frames are {}x{})",
                mode, self.mode.width, self.mode.height
            )));
        }
        self.mode = mode;
        Ok(())
    }

    fn set_white_balance(&mut self, _temperature: u32) -> Result<()> {
        Err(Error::Unsupported("white balance of recorded frames".into()))
    }
}
