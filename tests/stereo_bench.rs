//! Live disparity view of recorded (or, with the `v4l` feature, live) stereo frames.
//!
//! Needs a display, so it is ignored by default:
//!
//! ```text
//! STEREO_RIG_FRAMES=img cargo test --test stereo_bench -- --ignored
//! ```

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::result::Result;
use std::time::Duration;

use cv_stereo_rig::prelude::*;
use minifb::{Key, KeyRepeat, Window, WindowOptions};

// -----------------------------------------------------------------------------------------------
// MAIN
// -----------------------------------------------------------------------------------------------

#[test]
#[ignore]
fn stereo_bench() -> Result<(), Box<dyn std::error::Error>> {
    println!("Starting...");

    let mut camera = StereoCamera::new(open_source()?);
    let (width, height) = camera.mode().eye_size();
    let (width, height) = (width as usize, height as usize);
    println!("Camera opened in {}", camera.mode());

    let mut buffer: Vec<u32> = vec![0; width * 2 * height];

    let mut window = Window::new("Stereo Rig", width * 2, height, WindowOptions::default())?;
    window.limit_update_rate(Some(Duration::from_micros(16600)));

    let mut bm = BlockMatcher::new();
    bm.set_num_disp(3)?;
    bm.set_block_size(4)?;

    // Flag indicating whether or not to compute disparity
    let mut comp_disp = false;

    while window.is_open() && !window.is_key_down(Key::Escape) {
        if window.is_key_pressed(Key::Enter, KeyRepeat::No) {
            comp_disp = !comp_disp;
        }

        let frame = camera.read_gray()?;

        let right = if comp_disp {
            let disparity = bm.compute(&frame)?;
            let range = bm.stereo_bm();
            disparity.to_luma_range(range.min_disparity, range.num_disparities)
        }
        else {
            frame.right.clone()
        };

        for y in 0..height {
            for x in 0..width {
                buffer[x + y * width * 2] = luma_to_u32(frame.left.get_pixel(x as u32, y as u32));
                buffer[x + width + y * width * 2] = luma_to_u32(right.get_pixel(x as u32, y as u32));
            }
        }

        window.update_with_buffer(&buffer, width * 2, height)?;
    }

    Ok(())
}

#[cfg(feature = "v4l")]
fn open_source() -> Result<Box<dyn FrameSource>, Box<dyn std::error::Error>> {
    match std::env::var("STEREO_RIG_FRAMES") {
        Ok(dir) => Ok(Box::new(FileSource::open(dir)?)),
        Err(_) => Ok(Box::new(cv_stereo_rig::camera::V4lSource::open(2, CaptureMode::DEFAULT)?))
    }
}

#[cfg(not(feature = "v4l"))]
fn open_source() -> Result<Box<dyn FrameSource>, Box<dyn std::error::Error>> {
    let dir = std::env::var("STEREO_RIG_FRAMES").unwrap_or_else(|_| "img".to_string());
    Ok(Box::new(FileSource::open(dir)?))
}

fn luma_to_u32(luma: &image::Luma<u8>) -> u32 {
    (luma[0] as u32) << 16 | (luma[0] as u32) << 8 | luma[0] as u32
}
