//! [`I2cBus`] capability interface.
//!
//! Register helpers and bus scanning are provided on top of the three raw
//! transfer primitives, so a leaf driver only implements `read`, `write`,
//! and `write_read`.

use ember_types::KernelError;

use crate::bus_manager::BusId;
use crate::device::Device;

/// 7-bit peripheral address.
pub type I2cAddress = u8;

/// Range probed by [`I2cBus::scan`]; the rest is reserved by the standard.
pub const SCAN_RANGE: std::ops::RangeInclusive<I2cAddress> = 0x03..=0x77;

/// Default per-transfer timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// I2C ports are locked in the [`BusManager`][crate::bus_manager::BusManager]
/// as `I2C_BUS_BASE + port`, clear of SPI host numbers.
pub const I2C_BUS_BASE: BusId = 0x100;

pub trait I2cBus: Device {
    /// Controller port number (0 = I2C0, …).
    fn port(&self) -> u8;

    /// Identifier of this bus in the [`BusManager`][crate::bus_manager::BusManager].
    fn bus_lock_id(&self) -> BusId;

    fn read(&self, addr: I2cAddress, buf: &mut [u8], timeout_ms: u64) -> Result<(), KernelError>;

    fn write(&self, addr: I2cAddress, data: &[u8], timeout_ms: u64) -> Result<(), KernelError>;

    /// Write then read in one transaction (repeated start).
    fn write_read(
        &self,
        addr: I2cAddress,
        write: &[u8],
        read: &mut [u8],
        timeout_ms: u64,
    ) -> Result<(), KernelError>;

    fn read_register8(&self, addr: I2cAddress, reg: u8) -> Result<u8, KernelError> {
        let mut buf = [0u8; 1];
        self.write_read(addr, &[reg], &mut buf, DEFAULT_TIMEOUT_MS)?;
        Ok(buf[0])
    }

    fn write_register8(&self, addr: I2cAddress, reg: u8, value: u8) -> Result<(), KernelError> {
        self.write(addr, &[reg, value], DEFAULT_TIMEOUT_MS)
    }

    /// Big-endian 16-bit register read.
    fn read_register16(&self, addr: I2cAddress, reg: u8) -> Result<u16, KernelError> {
        let mut buf = [0u8; 2];
        self.write_read(addr, &[reg], &mut buf, DEFAULT_TIMEOUT_MS)?;
        Ok(u16::from_be_bytes(buf))
    }

    /// Big-endian 16-bit register write.
    fn write_register16(&self, addr: I2cAddress, reg: u8, value: u16) -> Result<(), KernelError> {
        let [hi, lo] = value.to_be_bytes();
        self.write(addr, &[reg, hi, lo], DEFAULT_TIMEOUT_MS)
    }

    /// Probe every address in [`SCAN_RANGE`] with an empty write and return
    /// the ones that acknowledged.
    fn scan(&self, timeout_ms: u64) -> Vec<I2cAddress> {
        SCAN_RANGE
            .filter(|addr| self.write(*addr, &[], timeout_ms).is_ok())
            .collect()
    }
}
