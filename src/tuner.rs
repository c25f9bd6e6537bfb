//! # Block matcher tuning
//!
//! A tuning session wraps a [`BlockMatcher`] while an operator moves its sliders over one or
//! more image pairs. Every time a pair is tuned the current positions are recorded, so that at
//! the end the most frequently chosen value of each parameter can be reported.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::collections::BTreeMap;

use image::GrayImage;

use crate::block_matching::{BlockMatcher, BmParameter, PARAMETER_MAXIMA};
use crate::error::*;
use crate::frame::GrayStereoFrame;

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

const FREQUENCY_HEADER: &str = "Selection frequency";

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

pub struct BmTuner {
    block_matcher: BlockMatcher,
    bm_settings: BTreeMap<BmParameter, Vec<i32>>
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl BmTuner {
    /// Start a session. The matcher's starting positions are recorded as the default state.
    pub fn new(block_matcher: BlockMatcher) -> Self {
        let bm_settings = PARAMETER_MAXIMA
            .iter()
            .map(|(param, _)| (*param, Vec::new()))
            .collect();

        let mut tuner = BmTuner {
            block_matcher,
            bm_settings
        };
        tuner.save_bm_state();
        tuner
    }

    pub fn block_matcher(&self) -> &BlockMatcher {
        &self.block_matcher
    }

    /// End the session, handing back the tuned matcher.
    pub fn into_block_matcher(self) -> BlockMatcher {
        self.block_matcher
    }

    /// Recorded positions of a tunable parameter, oldest first.
    pub fn history(&self, param: BmParameter) -> &[i32] {
        self.bm_settings
            .get(&param)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Try moving a slider. Returns whether the matcher accepted the position; rejected positions
    /// leave the matcher as it was.
    pub fn set_value(&mut self, name: &str, position: i32) -> Result<bool> {
        let param = BmParameter::from_name(name)?;

        if let Some(max) = param.maximum() {
            if position < 0 || position > max {
                log::debug!("Ignoring {} = {}, outside 0..={}", name, position, max);
                return Ok(false);
            }
        }

        match self.block_matcher.set(param, position) {
            Ok(()) => Ok(true),
            Err(Error::BadBlockMatcherArgument { .. }) => {
                log::debug!("Ignoring rejected position {} = {}", name, position);
                Ok(false)
            },
            Err(e) => Err(e)
        }
    }

    /// Record the current positions of all tunable parameters.
    fn save_bm_state(&mut self) {
        for (param, history) in self.bm_settings.iter_mut() {
            history.push(self.block_matcher.get(*param));
        }
    }

    /// Compute the disparity of `pair` normalised to the 0..255 range by its maximum.
    pub fn update_disparity_map(&self, pair: &GrayStereoFrame) -> Result<GrayImage> {
        let disparity = self.block_matcher.get_disparity_gray(pair)?;
        Ok(disparity.to_luma_normalised())
    }

    /// Record the current state and return the disparity image of a new pair to show the
    /// operator.
    pub fn tune_pair(&mut self, pair: &GrayStereoFrame) -> Result<GrayImage> {
        self.save_bm_state();
        self.update_disparity_map(pair)
    }

    /// Report how often each value of `name` was chosen, most frequent first.
    ///
    /// The latest state is included and the initial default is not. The report has no side
    /// effects on the recorded history.
    pub fn report_settings(&mut self, name: &str) -> Result<String> {
        let param = BmParameter::from_name(name)?;
        if param.maximum().is_none() {
            return Err(Error::UnknownParameter(format!("{} is not tunable", name)));
        }

        self.save_bm_state();

        let settings = self.history(param).get(1..).unwrap_or(&[]).to_vec();
        let mut counts: BTreeMap<i32, usize> = BTreeMap::new();
        for value in settings {
            *counts.entry(value).or_insert(0) += 1;
        }
        let mut by_frequency: Vec<(i32, usize)> = counts.into_iter().collect();
        by_frequency.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let header = format!("{} value | {}", name, FREQUENCY_HEADER);
        let left_width = header.len() - FREQUENCY_HEADER.len() - 2;
        let right_width = FREQUENCY_HEADER.len() + 2;

        let mut report = vec![
            header,
            format!("{}|{}", "-".repeat(left_width), "-".repeat(right_width)),
        ];
        for (value, frequency) in by_frequency {
            report.push(format!(
                "{}|{}",
                center(&value.to_string(), left_width),
                center(&frequency.to_string(), right_width)
            ));
        }

        for history in self.bm_settings.values_mut() {
            history.pop();
        }

        Ok(report.join("\n"))
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Center `text` in a field of `width` characters, extra padding going to the right.
fn center(text: &str, width: usize) -> String {
    let pad = width.saturating_sub(text.len());
    let left = pad / 2;
    format!("{}{}{}", " ".repeat(left), text, " ".repeat(pad - left))
}
