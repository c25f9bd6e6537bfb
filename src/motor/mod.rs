//! # Motor controller
//!
//! Driver for the Pololu A-Star controller of the rover, reached over I2C. The controller
//! exposes a small register file: writes send the register followed by packed little-endian
//! data, reads send the register, wait briefly, then read the packed data back.

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

mod i2c;
mod teleop;

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::convert::TryInto;
use std::thread;
use std::time::Duration;

use crate::error::*;

// -----------------------------------------------------------------------------------------------
// EXPORTS
// -----------------------------------------------------------------------------------------------

pub use i2c::LinuxI2c;
pub use teleop::{Teleop, DELTA_SPEED, MAX_SPEED, MAX_STEERING};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// I2C address of the A-Star.
pub const ASTAR_ADDRESS: u16 = 20;

/// Largest magnitude accepted for a motor command.
pub const MAX_MOTOR_SPEED: i16 = 800;

/// Longest melody the buzzer register holds.
pub const MAX_NOTES: usize = 14;

/// Pause between selecting a register and reading it back.
const REGISTER_DELAY: Duration = Duration::from_micros(100);

const REG_LEDS: u8 = 0;
const REG_BUTTONS: u8 = 3;
const REG_MOTORS: u8 = 6;
const REG_BATTERY: u8 = 10;
const REG_ANALOG: u8 = 12;
const REG_NOTES: u8 = 24;
const REG_ENCODERS: u8 = 39;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Register level access to the A-Star over an I2C bus.
pub struct MotorDriver<B: I2cBus> {
    bus: B,
    address: u16
}

// -----------------------------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------------------------

/// Minimal I2C master.
pub trait I2cBus {
    fn write(&mut self, address: u16, bytes: &[u8]) -> Result<()>;

    fn read(&mut self, address: u16, buf: &mut [u8]) -> Result<()>;
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl<B: I2cBus> MotorDriver<B> {
    pub fn new(bus: B) -> Self {
        Self::with_address(bus, ASTAR_ADDRESS)
    }

    pub fn with_address(bus: B, address: u16) -> Self {
        MotorDriver { bus, address }
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn into_bus(self) -> B {
        self.bus
    }

    /// Write `data` starting at `register`.
    pub fn write_pack(&mut self, register: u8, data: &[u8]) -> Result<()> {
        let mut packet = Vec::with_capacity(data.len() + 1);
        packet.push(register);
        packet.extend_from_slice(data);
        self.bus.write(self.address, &packet)?;
        thread::sleep(REGISTER_DELAY);
        Ok(())
    }

    /// Read `size` bytes starting at `register`.
    pub fn read_unpack(&mut self, register: u8, size: usize) -> Result<Vec<u8>> {
        self.bus.write(self.address, &[register])?;
        thread::sleep(REGISTER_DELAY);
        let mut buf = vec![0u8; size];
        self.bus.read(self.address, &mut buf)?;
        Ok(buf)
    }

    pub fn leds(&mut self, red: bool, yellow: bool, green: bool) -> Result<()> {
        self.write_pack(REG_LEDS, &[red as u8, yellow as u8, green as u8])
    }

    /// Play a melody in the buzzer's ASCII notation, at most [`MAX_NOTES`] characters.
    pub fn play_notes(&mut self, notes: &str) -> Result<()> {
        if !notes.is_ascii() {
            return Err(Error::MotorDriver(format!("notes must be ASCII: {:?}", notes)));
        }
        if notes.len() > MAX_NOTES {
            return Err(Error::MotorDriver(format!(
                "at most {} notes fit the buzzer, got {}",
                MAX_NOTES,
                notes.len()
            )));
        }

        let mut data = [0u8; MAX_NOTES + 1];
        data[0] = 1;
        data[1..=notes.len()].copy_from_slice(notes.as_bytes());
        self.write_pack(REG_NOTES, &data)
    }

    /// Set both motor speeds, clamped to [`MAX_MOTOR_SPEED`].
    pub fn motors(&mut self, left: i16, right: i16) -> Result<()> {
        let left = left.max(-MAX_MOTOR_SPEED).min(MAX_MOTOR_SPEED);
        let right = right.max(-MAX_MOTOR_SPEED).min(MAX_MOTOR_SPEED);
        log::debug!("Motors {} {}", left, right);

        let mut data = [0u8; 4];
        data[..2].copy_from_slice(&left.to_le_bytes());
        data[2..].copy_from_slice(&right.to_le_bytes());
        self.write_pack(REG_MOTORS, &data)
    }

    pub fn stop(&mut self) -> Result<()> {
        self.motors(0, 0)
    }

    pub fn read_buttons(&mut self) -> Result<(bool, bool, bool)> {
        let b = self.read_unpack(REG_BUTTONS, 3)?;
        Ok((b[0] != 0, b[1] != 0, b[2] != 0))
    }

    pub fn read_battery_millivolts(&mut self) -> Result<u16> {
        let b = self.read_unpack(REG_BATTERY, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_analog(&mut self) -> Result<[u16; 6]> {
        let b = self.read_unpack(REG_ANALOG, 12)?;
        let mut values = [0u16; 6];
        for (v, chunk) in values.iter_mut().zip(b.chunks_exact(2)) {
            *v = u16::from_le_bytes([chunk[0], chunk[1]]);
        }
        Ok(values)
    }

    pub fn read_encoders(&mut self) -> Result<(i16, i16)> {
        let b = self.read_unpack(REG_ENCODERS, 4)?;
        let left: [u8; 2] = b[..2]
            .try_into()
            .map_err(|_| Error::MotorDriver("short encoder read".into()))?;
        let right: [u8; 2] = b[2..4]
            .try_into()
            .map_err(|_| Error::MotorDriver("short encoder read".into()))?;
        Ok((i16::from_le_bytes(left), i16::from_le_bytes(right)))
    }
}
