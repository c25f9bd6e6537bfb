//! # Stereo rig command line
//!
//! Capture calibration frames, calibrate the rig, compute disparity and point clouds, inspect
//! thresholds and drive the rover from the keyboard.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::error::Error as StdError;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal;

use cv_stereo_rig::block_matching::BlockMatcher;
use cv_stereo_rig::calibration::{
    Calibration, CameraCalibration, CameraCalibrator, Side, Sided, StereoCalibration,
    StereoCalibrator
};
use cv_stereo_rig::camera::{CaptureMode, FileSource, FrameSource, StereoCamera};
use cv_stereo_rig::chessboard::ChessboardFinder;
use cv_stereo_rig::config::{CameraConfig, RigConfig};
use cv_stereo_rig::frame::{split_side_by_side, GrayStereoFrame};
use cv_stereo_rig::motor::{I2cBus, LinuxI2c, MotorDriver, Teleop};
use cv_stereo_rig::tuner::BmTuner;
use cv_stereo_rig::{Error, Result};

#[cfg(feature = "v4l")]
use cv_stereo_rig::camera::{V4lSource, DEFAULT_WHITE_BALANCE};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Frames grabbed per saved frame before capture gives up looking for the board.
const MAX_ATTEMPTS_PER_FRAME: usize = 100;

// -----------------------------------------------------------------------------------------------
// TYPES
// -----------------------------------------------------------------------------------------------

type CliResult = std::result::Result<(), Box<dyn StdError>>;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "stereo-rig")]
#[command(about = "Stereo camera rig: calibration, disparity and teleoperation")]
#[command(version)]
struct Cli {
    /// Rig configuration file, defaults are used when it does not exist
    #[arg(short, long, default_value = "rig.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands
}

#[derive(Subcommand)]
enum Commands {
    /// Save side-by-side frames, e.g. for calibration
    Capture {
        /// Folder the frames are written to
        #[arg(short, long, default_value = "img")]
        output: PathBuf,

        /// Number of frames to save
        #[arg(short = 'n', long, default_value = "20")]
        count: usize,

        /// Only keep frames where both eyes see the whole chessboard
        #[arg(long)]
        require_board: bool,

        /// Read recorded frames instead of the camera
        #[arg(long)]
        frames: Option<PathBuf>
    },

    /// Calibrate both cameras and the pair from a folder of side-by-side chessboard frames
    Calibrate {
        /// Folder of side-by-side frames
        images: PathBuf,

        /// Reuse the saved single camera calibrations
        #[arg(long)]
        stereo_only: bool
    },

    /// Compute disparity maps, optionally point clouds, of recorded or live frames
    Disparity {
        /// Folder the disparity images are written to
        #[arg(short, long, default_value = "disparity")]
        output: PathBuf,

        /// Number of frames to process, every recorded frame by default
        #[arg(short = 'n', long)]
        count: Option<usize>,

        /// Read recorded frames instead of the camera
        #[arg(long)]
        frames: Option<PathBuf>,

        /// Skip rectification even when a stereo calibration exists
        #[arg(long)]
        raw: bool,

        /// Move a matcher slider before matching, as `name=position`
        #[arg(long = "set", value_parser = parse_setting)]
        settings: Vec<(String, i32)>,

        /// Print how often each value of these parameters was used
        #[arg(long)]
        report: Vec<String>,

        /// Save the matcher positions afterwards
        #[arg(long)]
        save_params: bool,

        /// Also write coloured point clouds as PLY
        #[arg(long)]
        ply: bool,

        /// Drop points further than this from the camera
        #[arg(long)]
        max_depth: Option<f32>
    },

    /// Write contrast enhanced, adaptively thresholded versions of frames
    Threshold {
        #[arg(short, long, default_value = "threshold")]
        output: PathBuf,

        #[arg(short = 'n', long, default_value = "1")]
        count: usize,

        #[arg(long)]
        frames: Option<PathBuf>,

        #[arg(long)]
        contrast: Option<u32>,

        #[arg(long)]
        block_size: Option<u32>,

        #[arg(long)]
        c: Option<i32>,

        #[arg(long)]
        invert: bool
    },

    /// Drive the rover with WASD, Esc quits
    Drive,

    /// Print the configuration, capture modes and saved calibration
    Info {
        /// Write the effective configuration to the config path
        #[arg(long)]
        write_config: bool
    }
}

// -----------------------------------------------------------------------------------------------
// MAIN
// -----------------------------------------------------------------------------------------------

fn main() -> CliResult {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = RigConfig::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Capture {
            output,
            count,
            require_board,
            frames
        } => capture(&config, &output, count, require_board, frames.as_deref()),
        Commands::Calibrate {
            images,
            stereo_only
        } => calibrate(&config, &images, stereo_only),
        Commands::Disparity {
            output,
            count,
            frames,
            raw,
            settings,
            report,
            save_params,
            ply,
            max_depth
        } => disparity(
            &config,
            &DisparityArgs {
                output,
                count,
                frames,
                raw,
                settings,
                report,
                save_params,
                ply,
                max_depth
            }
        ),
        Commands::Threshold {
            output,
            count,
            frames,
            contrast,
            block_size,
            c,
            invert
        } => {
            let mut params = config.threshold;
            params.contrast = contrast.unwrap_or(params.contrast);
            params.block_size = block_size.unwrap_or(params.block_size);
            params.c = c.unwrap_or(params.c);
            params.invert |= invert;

            let mut camera = open_camera(&config.camera, frames.as_deref())?;
            fs::create_dir_all(&output)?;
            for i in 0..count {
                let pair = params.apply(&camera.read_color()?);
                pair.left.save(output.join(format!("{}_left.png", i)))?;
                pair.right.save(output.join(format!("{}_right.png", i)))?;
            }
            log::info!("Wrote {} thresholded pairs to {}", count, output.display());
            Ok(())
        },
        Commands::Drive => drive(&config),
        Commands::Info { write_config } => info(&config, &cli.config, write_config)
    }
}

// -----------------------------------------------------------------------------------------------
// COMMANDS
// -----------------------------------------------------------------------------------------------

struct DisparityArgs {
    output: PathBuf,
    count: Option<usize>,
    frames: Option<PathBuf>,
    raw: bool,
    settings: Vec<(String, i32)>,
    report: Vec<String>,
    save_params: bool,
    ply: bool,
    max_depth: Option<f32>
}

fn capture(
    config: &RigConfig,
    output: &Path,
    count: usize,
    require_board: bool,
    frames: Option<&Path>
) -> CliResult {
    let mut camera = open_camera(&config.camera, frames)?;
    let finder = ChessboardFinder::new(config.chessboard.pattern()).with_params(config.chessboard.detector);
    fs::create_dir_all(output)?;

    let mut saved = 0;
    let mut attempts = 0;
    while saved < count {
        let raw = camera.read_raw()?;

        if require_board {
            attempts += 1;
            if attempts > count * MAX_ATTEMPTS_PER_FRAME {
                return Err(Error::ChessboardNotFound.into());
            }
            let pair = split_side_by_side(&raw, camera.eye_order())?.to_gray();
            if !board_in_both(&finder, &pair)? {
                continue;
            }
        }

        let path = output.join(format!("{}.jpg", saved));
        raw.save(&path)?;
        log::info!("Saved {}", path.display());
        saved += 1;
    }

    Ok(())
}

fn calibrate(config: &RigConfig, images: &Path, stereo_only: bool) -> CliResult {
    let source = FileSource::open_with_extension(images, &config.camera.frames_extension)?;
    let frame_count = source.len();
    let mut camera = StereoCamera::new(source).with_eye_order(config.camera.eye_order);
    let eye_size = camera.mode().eye_size();

    let mut pairs = Vec::with_capacity(frame_count);
    for _ in 0..frame_count {
        pairs.push(camera.read_gray()?);
    }

    let board = &config.chessboard;
    let folders = Sided::new(config.calibration.left_path(), config.calibration.right_path());

    let intrinsics = if stereo_only {
        Sided::try_from_fn(|side| CameraCalibration::load(folders.get(side)))?
    }
    else {
        Sided::try_from_fn(|side| {
            let mut calibrator = CameraCalibrator::new(board.pattern(), board.square_size, eye_size);
            calibrator.finder_mut().params = board.detector;

            for (i, pair) in pairs.iter().enumerate() {
                let image = match side {
                    Side::Left => &pair.left,
                    Side::Right => &pair.right
                };
                match calibrator.add_corners(image) {
                    Ok(_) => (),
                    Err(Error::ChessboardNotFound) => {
                        log::warn!("No chessboard in the {} image of frame {}", side.name(), i)
                    },
                    Err(e) => return Err(e)
                }
            }

            log::info!(
                "Calibrating the {} camera from {} views",
                side.name(),
                calibrator.image_count()
            );
            let calibration = calibrator.calibrate_camera()?;
            log::info!("{} camera RMSE: {:.4} px", side.name(), calibration.rmse);
            calibration.export(folders.get(side))?;
            Ok(calibration)
        })?
    };

    let Sided { left, right } = intrinsics;
    let mut stereo = StereoCalibrator::new(
        board.rows,
        board.columns,
        board.square_size,
        eye_size,
        Some(left),
        Some(right),
        config.calibration.alpha
    );
    stereo.finder_mut().params = board.detector;

    for (i, pair) in pairs.iter().enumerate() {
        match stereo.add_corners(pair) {
            Ok(_) => (),
            Err(Error::ChessboardNotFound) => log::warn!("Frame {} skipped, board not seen by both", i),
            Err(e) => return Err(e.into())
        }
    }

    log::info!("Calibrating the pair from {} views", stereo.image_count());
    let calibration = stereo.calibrate_cameras()?;
    log::info!("Stereo RMSE: {:.4} px", calibration.rmse);
    log::info!("Average epipolar error: {:.4} px", stereo.check_calibration(&calibration)?);
    calibration.export(config.calibration.stereo_path())?;

    Ok(())
}

fn disparity(config: &RigConfig, args: &DisparityArgs) -> CliResult {
    let mut camera = open_camera(&config.camera, args.frames.as_deref())?;

    let calibration = if args.raw {
        None
    }
    else {
        load_stereo_calibration(config)
    };
    if calibration.is_none() && !args.raw {
        log::warn!("No stereo calibration found, matching unrectified frames");
    }

    let mut tuner = BmTuner::new(load_block_matcher(config)?);
    for (name, position) in args.settings.iter() {
        if !tuner.set_value(name, *position)? {
            log::warn!("Matcher rejected {} = {}", name, position);
        }
    }

    let count = match args.count {
        Some(count) => count,
        None => match args.frames.as_ref().or_else(|| config.camera.frames_dir.as_ref()) {
            Some(_) => recorded_count(config, args)?,
            None => 1
        }
    };

    fs::create_dir_all(&args.output)?;
    for i in 0..count {
        let mut frame = camera.read_color()?;
        if let Some(calibration) = calibration.as_ref() {
            frame = calibration.rectify(&frame)?;
        }
        let gray = frame.to_gray();

        let image = tuner.tune_pair(&gray)?;
        let path = args.output.join(format!("{}.png", i));
        image.save(&path)?;
        log::info!("Saved {}", path.display());

        if args.ply {
            let calibration = calibration
                .as_ref()
                .ok_or_else(|| Error::Calibration("point clouds need a stereo calibration".into()))?;
            let disparity = tuner.block_matcher().get_disparity_gray(&gray)?;
            let mut cloud = BlockMatcher::get_3d(&disparity, &calibration.disp_to_depth_mat)
                .with_colors(&frame.left)?;
            if let Some(max_depth) = args.max_depth {
                cloud.clip_depth(max_depth);
            }
            cloud.write_ply(args.output.join(format!("{}.ply", i)))?;
        }
    }

    for name in args.report.iter() {
        println!("{}\n", tuner.report_settings(name)?);
    }

    if args.save_params {
        tuner
            .block_matcher()
            .save_to_json(&config.block_matcher.dir, &config.block_matcher.name)?;
    }

    Ok(())
}

fn drive(config: &RigConfig) -> CliResult {
    let bus = LinuxI2c::open(config.motor.bus)?;
    let mut driver = MotorDriver::with_address(bus, config.motor.address);
    let mut teleop = Teleop::new();

    println!("w/s: speed, a/d: steer, any other key stops, Esc quits");
    terminal::enable_raw_mode()?;
    let result = drive_loop(&mut teleop, &mut driver);
    terminal::disable_raw_mode()?;
    driver.stop()?;

    result
}

fn drive_loop<B: I2cBus>(teleop: &mut Teleop, driver: &mut MotorDriver<B>) -> CliResult {
    loop {
        let key = match event::read()? {
            Event::Key(key) if key.kind == KeyEventKind::Press => key,
            _ => continue
        };

        match key.code {
            KeyCode::Esc => break,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => break,
            KeyCode::Char(c) => {
                teleop.drive(c.to_ascii_lowercase(), driver)?;
            },
            _ => {
                teleop.drive(' ', driver)?;
            }
        }
    }

    Ok(())
}

fn info(config: &RigConfig, config_path: &Path, write_config: bool) -> CliResult {
    println!("{}", serde_json::to_string_pretty(config)?);

    println!("\nCapture modes:");
    for name in ["fhd", "hd", "2k", "default", "webcam"].iter() {
        println!("  {:8} {}", name, CaptureMode::from_name(name)?);
    }

    match load_stereo_calibration(config) {
        Some(calibration) => {
            println!("\nStereo calibration ({}):", config.calibration.stereo_path().display());
            println!("  RMSE:       {:.4} px", calibration.rmse);
            println!("  Baseline:   {:.3}", calibration.baseline());
            println!("  Image size: {:?}", calibration.image_size);
        },
        None => println!("\nNo stereo calibration saved")
    }

    let matcher = load_block_matcher(config)?;
    println!("\nBlock matcher: {:?}", matcher.stereo_bm());

    if write_config {
        config.save(config_path)?;
        log::info!("Wrote {}", config_path.display());
    }

    Ok(())
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

fn open_camera(config: &CameraConfig, frames: Option<&Path>) -> Result<StereoCamera<Box<dyn FrameSource>>> {
    let source: Box<dyn FrameSource> = match frames.or_else(|| config.frames_dir.as_deref()) {
        Some(dir) => Box::new(FileSource::open_with_extension(dir, &config.frames_extension)?),
        None => open_device(config)?
    };

    Ok(StereoCamera::new(source).with_eye_order(config.eye_order))
}

#[cfg(feature = "v4l")]
fn open_device(config: &CameraConfig) -> Result<Box<dyn FrameSource>> {
    let mut source = V4lSource::open(config.device, config.capture_mode()?)?;
    if config.white_balance != DEFAULT_WHITE_BALANCE {
        source.set_white_balance(config.white_balance)?;
    }
    Ok(Box::new(source))
}

#[cfg(not(feature = "v4l"))]
fn open_device(_config: &CameraConfig) -> Result<Box<dyn FrameSource>> {
    Err(Error::Unsupported(
        "live capture needs the `v4l` feature, pass --frames to use recorded frames".into()
    ))
}

fn recorded_count(config: &RigConfig, args: &DisparityArgs) -> Result<usize> {
    let dir = args
        .frames
        .as_deref()
        .or_else(|| config.camera.frames_dir.as_deref())
        .ok_or_else(|| Error::Camera("no recorded frames".into()))?;
    Ok(FileSource::open_with_extension(dir, &config.camera.frames_extension)?.len())
}

fn load_stereo_calibration(config: &RigConfig) -> Option<StereoCalibration> {
    let folder = config.calibration.stereo_path();
    match StereoCalibration::load(&folder) {
        Ok(calibration) => Some(calibration),
        Err(e) => {
            log::debug!("Could not load {}: {}", folder.display(), e);
            None
        }
    }
}

fn load_block_matcher(config: &RigConfig) -> Result<BlockMatcher> {
    let mut matcher = BlockMatcher::new();
    let path = BlockMatcher::json_path(&config.block_matcher.dir, &config.block_matcher.name);
    if path.exists() {
        matcher.load_from_json(&config.block_matcher.dir, &config.block_matcher.name)?;
    }
    Ok(matcher)
}

fn board_in_both(finder: &ChessboardFinder, pair: &GrayStereoFrame) -> Result<bool> {
    for image in [&pair.left, &pair.right].iter() {
        match finder.find_corners(image) {
            Ok(_) => (),
            Err(Error::ChessboardNotFound) => return Ok(false),
            Err(e) => return Err(e)
        }
    }
    Ok(true)
}

fn parse_setting(s: &str) -> std::result::Result<(String, i32), String> {
    let mut parts = s.splitn(2, '=');
    let name = parts.next().unwrap_or_default().trim();
    let value = parts
        .next()
        .ok_or_else(|| format!("expected name=position, got {:?}", s))?;
    let position = value
        .trim()
        .parse()
        .map_err(|e| format!("bad position {:?}: {}", value, e))?;
    Ok((name.to_string(), position))
}
