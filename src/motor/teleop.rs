//! # Keyboard teleoperation
//!
//! WASD driving: `w` and `s` step the speed, `a` and `d` set full steering, anything else
//! stops. Forward speed is negative because of how the motors are mounted.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use super::{I2cBus, MotorDriver};
use crate::error::*;

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Speed change of one key press.
pub const DELTA_SPEED: i16 = 80;

pub const MAX_SPEED: i16 = 260;

pub const MAX_STEERING: i16 = 800;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Teleop {
    speed: i16,
    steering: i16
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Teleop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn speed(&self) -> i16 {
        self.speed
    }

    pub fn steering(&self) -> i16 {
        self.steering
    }

    /// Update the state for a key press and return the `(speed, steering)` command.
    pub fn handle_key(&mut self, key: char) -> (i16, i16) {
        match key {
            'w' => self.speed = (self.speed - DELTA_SPEED).max(-MAX_SPEED).min(MAX_SPEED),
            's' => self.speed = (self.speed + DELTA_SPEED).min(MAX_SPEED).max(-MAX_SPEED),
            'a' => self.steering = MAX_STEERING,
            'd' => self.steering = -MAX_STEERING,
            _ => {
                self.speed = 0;
                self.steering = 0;
            }
        }

        log::info!("Pressed {:?} | speed: {} | steering: {}", key, -self.speed, self.steering);
        (self.speed, self.steering)
    }

    /// Handle a key press and send the resulting command to the motors.
    pub fn drive<B: I2cBus>(&mut self, key: char, driver: &mut MotorDriver<B>) -> Result<(i16, i16)> {
        let (speed, steering) = self.handle_key(key);
        driver.motors(speed, steering)?;
        Ok((speed, steering))
    }
}
