//! # Linux I2C
//!
//! `/dev/i2c-N` character devices, with the target selected through the `I2C_SLAVE` ioctl.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;

use super::I2cBus;
use crate::error::*;

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

const I2C_SLAVE: libc::c_ulong = 0x0703;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

pub struct LinuxI2c {
    file: File,
    path: String,
    selected: Option<u16>
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl LinuxI2c {
    /// Open `/dev/i2c-{bus}`.
    pub fn open(bus: u8) -> Result<Self> {
        let path = format!("/dev/i2c-{}", bus);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| Error::MotorDriver(format!("failed to open {}: {}", path, e)))?;

        log::info!("Opened I2C bus {}", path);
        Ok(LinuxI2c {
            file,
            path,
            selected: None
        })
    }

    fn select(&mut self, address: u16) -> Result<()> {
        if self.selected == Some(address) {
            return Ok(());
        }

        let result = unsafe { libc::ioctl(self.file.as_raw_fd(), I2C_SLAVE, address as libc::c_ulong) };
        if result < 0 {
            return Err(Error::MotorDriver(format!(
                "failed to select device {} on {}: {}",
                address,
                self.path,
                std::io::Error::last_os_error()
            )));
        }

        self.selected = Some(address);
        Ok(())
    }
}

impl I2cBus for LinuxI2c {
    fn write(&mut self, address: u16, bytes: &[u8]) -> Result<()> {
        self.select(address)?;
        self.file.write_all(bytes)?;
        Ok(())
    }

    fn read(&mut self, address: u16, buf: &mut [u8]) -> Result<()> {
        self.select(address)?;
        self.file.read_exact(buf)?;
        Ok(())
    }
}
