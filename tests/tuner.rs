//! # Tuning sessions
//!
//! History recording and the selection frequency report.

mod common;

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use cv_stereo_rig::block_matching::{BlockMatcher, BmParameter};
use cv_stereo_rig::frame::GrayStereoFrame;
use cv_stereo_rig::tuner::BmTuner;
use cv_stereo_rig::Error;

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[test]
fn report_lists_values_by_frequency() -> Result<(), Box<dyn std::error::Error>> {
    let (left, right) = common::shifted_pair(160, 60, 8, 7);
    let pair = GrayStereoFrame::new(left, right);
    let mut tuner = BmTuner::new(BlockMatcher::new());
    assert_eq!(tuner.history(BmParameter::NumDisp), &[1]);

    assert!(tuner.set_value("num_disp", 3)?);
    let shown = tuner.tune_pair(&pair)?;
    assert_eq!(shown.dimensions(), (160, 60));

    assert!(tuner.set_value("num_disp", 5)?);
    tuner.tune_pair(&pair)?;
    assert_eq!(tuner.history(BmParameter::NumDisp), &[1, 3, 5]);

    let report = tuner.report_settings("num_disp")?;
    let expected = [
        "num_disp value | Selection frequency",
        "---------------|---------------------",
        "       5       |          2          ",
        "       3       |          1          ",
    ]
    .join("\n");
    assert_eq!(report, expected);

    // Reporting leaves the history as it was.
    assert_eq!(tuner.history(BmParameter::NumDisp), &[1, 3, 5]);
    assert_eq!(tuner.history(BmParameter::BlockSize), &[2, 2, 2]);

    Ok(())
}

#[test]
fn ties_are_reported_in_value_order() -> Result<(), Box<dyn std::error::Error>> {
    let (left, right) = common::shifted_pair(120, 40, 4, 1);
    let pair = GrayStereoFrame::new(left, right);
    let mut tuner = BmTuner::new(BlockMatcher::new());

    tuner.set_value("block_size", 4)?;
    tuner.tune_pair(&pair)?;
    tuner.set_value("block_size", 1)?;

    let report = tuner.report_settings("block_size")?;
    let rows: Vec<&str> = report.lines().skip(2).collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].split('|').next().map(str::trim), Some("1"));
    assert_eq!(rows[1].split('|').next().map(str::trim), Some("4"));

    Ok(())
}

#[test]
fn out_of_range_positions_are_ignored() -> Result<(), Box<dyn std::error::Error>> {
    let mut tuner = BmTuner::new(BlockMatcher::new());

    assert!(!tuner.set_value("num_disp", 51)?);
    assert!(!tuner.set_value("block_size", -1)?);
    assert!(!tuner.set_value("prefilter_type", 2)?);
    assert_eq!(tuner.block_matcher().get(BmParameter::NumDisp), 1);

    assert!(tuner.set_value("speckle_range", 3)?);
    assert_eq!(tuner.block_matcher().stereo_bm().speckle_range, 4);

    Ok(())
}

#[test]
fn unknown_or_untunable_parameters_are_errors() {
    let mut tuner = BmTuner::new(BlockMatcher::new());

    assert!(matches!(tuner.set_value("gamma", 1), Err(Error::UnknownParameter(_))));
    assert!(matches!(tuner.report_settings("gamma"), Err(Error::UnknownParameter(_))));
    assert!(matches!(
        tuner.report_settings("min_disparity"),
        Err(Error::UnknownParameter(_))
    ));
}

#[test]
fn finished_session_hands_back_the_matcher() -> Result<(), Box<dyn std::error::Error>> {
    let mut tuner = BmTuner::new(BlockMatcher::new());
    tuner.set_value("uniqueness_ratio", 14)?;

    let bm = tuner.into_block_matcher();
    assert_eq!(bm.stereo_bm().uniqueness_ratio, 15);

    Ok(())
}
