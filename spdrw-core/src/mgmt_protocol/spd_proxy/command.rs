//! Command catalog of the SPD proxy firmware.
//!
//! Requests are a command byte followed by fixed parameters, with no framing
//! or checksum. The byte values are the firmware's compatibility contract.

use bitflags::bitflags;
use bytes::{BufMut, BytesMut};
use strum::FromRepr;

/// Command bytes.
pub mod opcode {
    pub const TEST: u8 = b't';
    pub const VERSION: u8 = b'v';
    pub const NAME: u8 = b'n';
    pub const I2C_CLOCK: u8 = b'c';
    pub const RSWP_REPORT: u8 = b'f';
    pub const SCAN_BUS: u8 = b's';
    pub const PROBE_ADDRESS: u8 = b'a';
    pub const DDR4_DETECT: u8 = b'4';
    pub const DDR5_DETECT: u8 = b'5';
    pub const SIZE: u8 = b'z';
    pub const READ: u8 = b'r';
    pub const WRITE_BYTE: u8 = b'w';
    pub const WRITE_PAGE: u8 = b'g';
    pub const OVERWRITE: u8 = b'o';
    pub const RSWP: u8 = b'b';
    pub const PSWP: u8 = b'l';
    pub const SPD5_HUB: u8 = b'h';
    pub const PIN_RESET: u8 = b'd';
    pub const FACTORY_RESET: u8 = b'-';

    /// Parameter asking for the current value instead of setting one
    pub const GET: u8 = b'?';
}

/// Longest name the firmware stores.
pub const NAME_LENGTH: usize = 16;
/// Most bytes one page write may carry.
pub const MAX_PAGE_WRITE: usize = 16;
/// Most bytes one read may return.
pub const MAX_READ: usize = 32;

/// Firmware acknowledgement value for true.
pub const TRUE: u8 = 0x01;

/// Requests understood by the firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Test,
    Version,
    GetName,
    SetName(String),
    GetI2cClock,
    SetI2cClock { fast: bool },
    RswpSupport,
    ScanBus,
    ProbeAddress(u8),
    DetectDdr4(u8),
    DetectDdr5(u8),
    Size(u8),
    Read { address: u8, offset: u16, count: u8 },
    WriteByte { address: u8, offset: u16, value: u8 },
    WritePage { address: u8, offset: u16, data: Vec<u8> },
    Overwrite { address: u8, offset: u16 },
    GetRswp { address: u8, block: u8 },
    SetRswp { address: u8, block: u8 },
    ClearRswp { address: u8 },
    GetPswp { address: u8 },
    SetPswp { address: u8 },
    ReadHubRegister { address: u8, register: u8 },
    WriteHubRegister { address: u8, register: u8, value: u8 },
    ResetPins,
    FactoryReset,
}

impl Command {
    pub fn opcode(&self) -> u8 {
        use opcode::*;
        match self {
            Command::Test => TEST,
            Command::Version => VERSION,
            Command::GetName | Command::SetName(_) => NAME,
            Command::GetI2cClock | Command::SetI2cClock { .. } => I2C_CLOCK,
            Command::RswpSupport => RSWP_REPORT,
            Command::ScanBus => SCAN_BUS,
            Command::ProbeAddress(_) => PROBE_ADDRESS,
            Command::DetectDdr4(_) => DDR4_DETECT,
            Command::DetectDdr5(_) => DDR5_DETECT,
            Command::Size(_) => SIZE,
            Command::Read { .. } => READ,
            Command::WriteByte { .. } => WRITE_BYTE,
            Command::WritePage { .. } => WRITE_PAGE,
            Command::Overwrite { .. } => OVERWRITE,
            Command::GetRswp { .. } | Command::SetRswp { .. } | Command::ClearRswp { .. } => RSWP,
            Command::GetPswp { .. } | Command::SetPswp { .. } => PSWP,
            Command::ReadHubRegister { .. } | Command::WriteHubRegister { .. } => SPD5_HUB,
            Command::ResetPins => PIN_RESET,
            Command::FactoryReset => FACTORY_RESET,
        }
    }

    /// Append the wire form of this request to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.opcode());
        match self {
            Command::Test
            | Command::Version
            | Command::RswpSupport
            | Command::ScanBus
            | Command::ResetPins
            | Command::FactoryReset => {}
            Command::GetName | Command::GetI2cClock => dst.put_u8(opcode::GET),
            Command::SetName(name) => {
                dst.put_u8(name.len() as u8);
                dst.put_slice(name.as_bytes());
            }
            Command::SetI2cClock { fast } => dst.put_u8(*fast as u8),
            Command::ProbeAddress(address)
            | Command::DetectDdr4(address)
            | Command::DetectDdr5(address)
            | Command::Size(address) => dst.put_u8(*address),
            Command::Read {
                address,
                offset,
                count,
            } => {
                dst.put_u8(*address);
                dst.put_u16(*offset);
                dst.put_u8(*count);
            }
            Command::WriteByte {
                address,
                offset,
                value,
            } => {
                dst.put_u8(*address);
                dst.put_u16(*offset);
                dst.put_u8(*value);
            }
            Command::WritePage {
                address,
                offset,
                data,
            } => {
                dst.put_u8(*address);
                dst.put_u16(*offset);
                dst.put_u8(data.len() as u8);
                dst.put_slice(data);
            }
            Command::Overwrite { address, offset } => {
                dst.put_u8(*address);
                dst.put_u16(*offset);
            }
            Command::GetRswp { address, block } => dst.put_slice(&[*address, *block, opcode::GET]),
            Command::SetRswp { address, block } => dst.put_slice(&[*address, *block, 1]),
            Command::ClearRswp { address } => dst.put_slice(&[*address, 0, 0]),
            Command::GetPswp { address } => dst.put_slice(&[*address, opcode::GET]),
            Command::SetPswp { address } => dst.put_slice(&[*address, 1]),
            Command::ReadHubRegister { address, register } => {
                dst.put_slice(&[*address, *register, opcode::GET])
            }
            Command::WriteHubRegister {
                address,
                register,
                value,
            } => dst.put_slice(&[*address, *register, 1, *value]),
        }
    }

    /// Whether a `false` reply means the device refused the write.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Command::WriteByte { .. }
                | Command::WritePage { .. }
                | Command::Overwrite { .. }
                | Command::SetRswp { .. }
                | Command::ClearRswp { .. }
                | Command::SetPswp { .. }
                | Command::WriteHubRegister { .. }
        )
    }
}

/// Unsolicited notifications from the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, strum::Display)]
#[repr(u8)]
pub enum Alert {
    /// A module appeared on the bus
    SlaveIncrement = b'+',
    /// A module disappeared from the bus
    SlaveDecrement = b'-',
    /// I2C clock switched to fast mode
    ClockIncrement = b'/',
    /// I2C clock switched to standard mode
    ClockDecrement = b'\\',
}

impl Alert {
    /// Hot-plug alerts invalidate the cached bus state.
    pub fn is_hotplug(self) -> bool {
        matches!(self, Alert::SlaveIncrement | Alert::SlaveDecrement)
    }
}

bitflags! {
    /// Memory generations whose reversible write protection the adapter can
    /// drive (it needs a high-voltage switch for DDR3 and DDR4).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RswpSupport: u8 {
        const DDR3 = 1 << 3;
        const DDR4 = 1 << 4;
        const DDR5 = 1 << 5;
    }
}

/// I2C clock modes, in kHz.
pub mod clock {
    pub const FAST: u16 = 400;
    pub const STANDARD: u16 = 100;
}
