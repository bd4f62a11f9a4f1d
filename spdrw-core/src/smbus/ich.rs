//! Intel ICH/PCH and AMD FCH SMBus host controller.
//!
//! Register block in I/O space. AMD parts repeat the block every 0x14 ports,
//! one per bus; Intel parts only have bus 0.

use super::{Controller, Direction, Protocol, Transaction};
use crate::error::Result;
use crate::hw_trait::IoPortBlock;
use crate::types::BusStatus;

/// Register offsets from the block base.
pub mod regs {
    pub const HST_STS: u16 = 0x00;
    pub const HST_CNT: u16 = 0x02;
    pub const HST_CMD: u16 = 0x03;
    pub const XMIT_SLVA: u16 = 0x04;
    pub const HST_D0: u16 = 0x05;
    pub const HST_D1: u16 = 0x06;
}

/// HST_STS bits
pub mod status {
    pub const HOST_BUSY: u8 = 0x01;
    pub const INTR: u8 = 0x02;
    pub const DEV_ERR: u8 = 0x04;
    pub const BUS_ERR: u8 = 0x08;
    pub const FAILED: u8 = 0x10;
    /// Write-one-to-clear mask for every completion and error bit
    pub const CLEAR: u8 = INTR | DEV_ERR | BUS_ERR | FAILED;
}

/// HST_CNT bits and protocol codes
pub mod control {
    pub const INTREN: u8 = 0x01;
    pub const KILL: u8 = 0x02;
    pub const START: u8 = 0x40;

    pub const QUICK: u8 = 0x00;
    pub const BYTE: u8 = 0x04;
    pub const BYTE_DATA: u8 = 0x08;
    pub const WORD_DATA: u8 = 0x0C;
}

/// Stride between per-bus register blocks on AMD parts.
pub const AMD_BUS_STRIDE: u16 = 0x14;

pub struct Ich {
    ports: IoPortBlock,
    amd: bool,
}

impl Ich {
    pub fn new(ports: IoPortBlock, amd: bool) -> Self {
        Self { ports, amd }
    }

    fn block(&self, bus: u8) -> IoPortBlock {
        if self.amd {
            self.ports.offset_by(bus as u16 * AMD_BUS_STRIDE)
        } else {
            self.ports.clone()
        }
    }
}

/// Decode HST_STS.
pub fn decode_status(sts: u8) -> BusStatus {
    use status::*;
    if sts & 0x1F == 0 {
        BusStatus::Ready
    } else if sts & HOST_BUSY != 0 {
        BusStatus::Busy
    } else if sts & (DEV_ERR | BUS_ERR | FAILED) != 0 {
        BusStatus::Error
    } else {
        BusStatus::Success
    }
}

pub fn protocol_code(protocol: Protocol) -> u8 {
    match protocol {
        Protocol::Quick => control::QUICK,
        Protocol::Byte => control::BYTE,
        Protocol::ByteData => control::BYTE_DATA,
        Protocol::WordData => control::WORD_DATA,
    }
}

impl Controller for Ich {
    fn name(&self) -> &'static str {
        "ICH"
    }

    fn supports_bus(&self, bus: u8) -> bool {
        if self.amd {
            bus <= super::MAX_BUS
        } else {
            bus == 0
        }
    }

    fn prepare(&self, bus: u8) -> Result<()> {
        self.block(bus).write8(regs::HST_STS, status::CLEAR)
    }

    fn waits_for_ready(&self) -> bool {
        true
    }

    fn start(&self, bus: u8, tx: &Transaction) -> Result<()> {
        let block = self.block(bus);
        let rw = (tx.direction == Direction::Read) as u8;
        block.write8(regs::XMIT_SLVA, (tx.address << 1) | rw)?;
        if tx.is_write() {
            match tx.protocol {
                Protocol::ByteData => block.write8(regs::HST_D0, tx.data as u8)?,
                Protocol::WordData => {
                    block.write8(regs::HST_D0, tx.data as u8)?;
                    block.write8(regs::HST_D1, (tx.data >> 8) as u8)?;
                }
                Protocol::Quick | Protocol::Byte => {}
            }
        }
        block.write8(regs::HST_CMD, tx.command)?;
        block.write8(
            regs::HST_CNT,
            control::START | control::INTREN | protocol_code(tx.protocol),
        )
    }

    fn status(&self, bus: u8) -> Result<BusStatus> {
        Ok(decode_status(self.block(bus).read8(regs::HST_STS)?))
    }

    fn is_done(&self, status: BusStatus) -> bool {
        matches!(
            status,
            BusStatus::Ready | BusStatus::Success | BusStatus::Error
        )
    }

    fn read_data(&self, bus: u8, tx: &Transaction) -> Result<u16> {
        let block = self.block(bus);
        let low = block.read8(regs::HST_D0)? as u16;
        if tx.protocol == Protocol::WordData {
            let high = block.read8(regs::HST_D1)? as u16;
            Ok(low | (high << 8))
        } else {
            Ok(low)
        }
    }

    fn abort(&self, bus: u8) -> Result<()> {
        self.block(bus).write8(regs::HST_CNT, control::KILL)
    }
}
