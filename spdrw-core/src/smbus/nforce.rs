//! NVIDIA nForce / MCP SMBus host controller.

use std::time::Duration;

use super::{Controller, Protocol, Transaction, EEPROM_WRITE_SETTLE};
use crate::error::Result;
use crate::hw_trait::IoPortBlock;
use crate::types::BusStatus;

pub mod regs {
    pub const PRTCL: u16 = 0x00;
    pub const STS: u16 = 0x01;
    pub const ADDR: u16 = 0x02;
    pub const CMD: u16 = 0x03;
    pub const DATA0: u16 = 0x04;
    pub const DATA1: u16 = 0x05;
}

pub mod protocol {
    pub const READ: u8 = 0x01;
    pub const QUICK: u8 = 0x02;
    pub const BYTE: u8 = 0x04;
    pub const BYTE_DATA: u8 = 0x06;
    pub const WORD_DATA: u8 = 0x08;
}

pub mod status {
    pub const DONE: u8 = 0x80;
    pub const ALARM: u8 = 0x10;
    pub const FAILED: u8 = 0x1F;
}

pub struct Nforce {
    ports: IoPortBlock,
}

impl Nforce {
    pub fn new(ports: IoPortBlock) -> Self {
        Self { ports }
    }
}

pub fn decode_status(sts: u8) -> BusStatus {
    match sts {
        status::DONE => BusStatus::Success,
        status::ALARM | status::FAILED => BusStatus::Error,
        _ => BusStatus::Busy,
    }
}

pub fn protocol_code(tx: &Transaction) -> u8 {
    let code = match tx.protocol {
        Protocol::Quick => protocol::QUICK,
        Protocol::Byte => protocol::BYTE,
        Protocol::ByteData => protocol::BYTE_DATA,
        Protocol::WordData => protocol::WORD_DATA,
    };
    if tx.is_read() {
        code | protocol::READ
    } else {
        code
    }
}

impl Controller for Nforce {
    fn name(&self) -> &'static str {
        "nForce"
    }

    fn supports_bus(&self, bus: u8) -> bool {
        bus == 0
    }

    fn start(&self, _bus: u8, tx: &Transaction) -> Result<()> {
        self.ports.write8(regs::ADDR, tx.address << 1)?;
        self.ports.write8(regs::CMD, tx.command)?;
        if tx.is_write() {
            self.ports.write8(regs::DATA0, tx.data as u8)?;
            if tx.protocol == Protocol::WordData {
                self.ports.write8(regs::DATA1, (tx.data >> 8) as u8)?;
            }
        }
        self.ports.write8(regs::PRTCL, protocol_code(tx))
    }

    fn status(&self, _bus: u8) -> Result<BusStatus> {
        Ok(decode_status(self.ports.read8(regs::STS)?))
    }

    fn is_done(&self, status: BusStatus) -> bool {
        matches!(status, BusStatus::Success | BusStatus::Error)
    }

    // These parts need twice the EEPROM write cycle before they report.
    fn settle_delay(&self, tx: &Transaction) -> Duration {
        if tx.is_write() && tx.targets_eeprom() {
            EEPROM_WRITE_SETTLE * 2
        } else {
            Duration::ZERO
        }
    }

    fn read_data(&self, _bus: u8, tx: &Transaction) -> Result<u16> {
        let low = self.ports.read8(regs::DATA0)? as u16;
        if tx.protocol == Protocol::WordData {
            Ok(low | (self.ports.read8(regs::DATA1)? as u16) << 8)
        } else {
            Ok(low)
        }
    }
}
