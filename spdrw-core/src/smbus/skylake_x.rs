//! SMBus controller integrated in the Skylake-SP/X memory controller.
//!
//! Lives in PCI configuration space of function 8086:2085, one register set
//! per bus. The controller only speaks byte-data; quick and receive-byte
//! transactions degrade to a byte-data access at the given command.

use super::{Controller, Protocol, Transaction};
use crate::error::{Error, Result};
use crate::hw_trait::ConfigSpace;
use crate::types::BusStatus;

pub mod regs {
    pub const COMMAND: u16 = 0x9C;
    pub const STATUS: u16 = 0xA8;
    pub const READ_DATA: u16 = 0xB4;
    pub const WRITE_DATA: u16 = 0xB6;
    /// Distance between per-bus register sets
    pub const BUS_STRIDE: u16 = 4;
}

/// Fixed bits of the command dword: enable, byte-data, no PEC.
pub const COMMAND_FLAGS: u32 = 0x2048_0000;
/// Address-field bit selecting a write.
pub const WRITE_FLAG: u8 = 0x80;

pub mod status {
    pub const BUSY: u8 = 0x01;
    pub const NACK: u8 = 0x02;
    pub const DONE: u8 = 0x04;
}

pub struct SkylakeX {
    config: ConfigSpace,
}

impl SkylakeX {
    pub fn new(config: ConfigSpace) -> Self {
        Self { config }
    }
}

fn reg(base: u16, bus: u8) -> u16 {
    base + regs::BUS_STRIDE * bus as u16
}

/// Command dword for `tx`.
pub fn command_word(tx: &Transaction) -> u32 {
    let flag = if tx.is_write() { WRITE_FLAG } else { 0 };
    COMMAND_FLAGS | (((tx.address | flag) as u32) << 8) | tx.command as u32
}

pub fn decode_status(sts: u8) -> BusStatus {
    if sts & status::BUSY != 0 {
        BusStatus::Busy
    } else if sts & status::DONE != 0 {
        if sts & status::NACK != 0 {
            BusStatus::Error
        } else {
            BusStatus::Success
        }
    } else {
        BusStatus::Ready
    }
}

impl Controller for SkylakeX {
    fn name(&self) -> &'static str {
        "SkylakeX"
    }

    fn supports_bus(&self, bus: u8) -> bool {
        bus <= super::MAX_BUS
    }

    fn start(&self, bus: u8, tx: &Transaction) -> Result<()> {
        if tx.protocol == Protocol::WordData {
            return Err(Error::Config(
                "word transactions are not supported by the CPU SMBus".into(),
            ));
        }
        if tx.is_write() {
            self.config.write8(reg(regs::WRITE_DATA, bus), tx.data as u8)?;
        }
        self.config.write32(reg(regs::COMMAND, bus), command_word(tx))
    }

    fn status(&self, bus: u8) -> Result<BusStatus> {
        Ok(decode_status(self.config.read8(reg(regs::STATUS, bus))?))
    }

    fn is_done(&self, status: BusStatus) -> bool {
        matches!(
            status,
            BusStatus::Ready | BusStatus::Success | BusStatus::Error
        )
    }

    fn read_data(&self, bus: u8, _tx: &Transaction) -> Result<u16> {
        Ok(self.config.read8(reg(regs::READ_DATA, bus))? as u16)
    }
}
