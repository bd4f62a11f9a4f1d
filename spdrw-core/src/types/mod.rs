//! Core types shared by the transports and the EEPROM addressor.

use std::fmt;

use crate::error::{Error, Result};

/// 7-bit slave address of an SPD EEPROM, always in 0x50..=0x57.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BusAddress(u8);

impl BusAddress {
    pub const FIRST: BusAddress = BusAddress(0x50);
    pub const LAST: BusAddress = BusAddress(0x57);

    /// Validate a raw 7-bit address.
    pub fn new(raw: u8) -> Result<Self> {
        if raw >> 3 == 0b1010 {
            Ok(Self(raw))
        } else {
            Err(Error::Config(format!(
                "0x{raw:02X} is not an SPD EEPROM address (0x50..=0x57)"
            )))
        }
    }

    /// Address of the module in slot `index` (0..=7).
    pub fn from_index(index: u8) -> Result<Self> {
        if index > 7 {
            return Err(Error::Config(format!("slot index {index} out of range")));
        }
        Ok(Self(0x50 | index))
    }

    pub fn raw(self) -> u8 {
        self.0
    }

    /// Select-strap index, the low three bits.
    pub fn index(self) -> u8 {
        self.0 & 0x07
    }

    /// Every valid address, lowest first.
    pub fn all() -> impl Iterator<Item = BusAddress> {
        (0x50..=0x57).map(BusAddress)
    }
}

impl TryFrom<u8> for BusAddress {
    type Error = Error;

    fn try_from(raw: u8) -> Result<Self> {
        Self::new(raw)
    }
}

impl From<BusAddress> for u8 {
    fn from(address: BusAddress) -> u8 {
        address.0
    }
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// Outcome of polling a bus controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum BusStatus {
    Ready,
    Busy,
    Error,
    Success,
    Timeout,
    Aborted,
}

/// EEPROM capacity as reported by the proxy firmware or inferred from the
/// memory type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
pub enum SizeClass {
    #[default]
    Unknown,
    #[strum(to_string = "256 bytes")]
    B256,
    #[strum(to_string = "512 bytes")]
    B512,
    #[strum(to_string = "1024 bytes")]
    B1024,
}

impl SizeClass {
    /// Decode the firmware's index into `[0, 256, 512, 1024]`.
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::Unknown),
            1 => Some(Self::B256),
            2 => Some(Self::B512),
            3 => Some(Self::B1024),
            _ => None,
        }
    }

    pub fn from_bytes(bytes: usize) -> Option<Self> {
        match bytes {
            256 => Some(Self::B256),
            512 => Some(Self::B512),
            1024 => Some(Self::B1024),
            _ => None,
        }
    }

    pub fn bytes(self) -> usize {
        match self {
            Self::Unknown => 0,
            Self::B256 => 256,
            Self::B512 => 512,
            Self::B1024 => 1024,
        }
    }
}

/// How byte offsets map onto page-register values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageRule {
    /// 256 bytes or less, no page register.
    Flat,
    /// Two 256-byte pages selected by a write to 0x36 or 0x37.
    Ee1004,
    /// 128-byte pages selected through the SPD5 hub's MR11.
    Spd5Hub,
}

impl PageRule {
    pub fn page_size(self) -> usize {
        match self {
            PageRule::Flat | PageRule::Ee1004 => 256,
            PageRule::Spd5Hub => 128,
        }
    }

    pub fn page_of(self, offset: u16) -> u8 {
        match self {
            PageRule::Flat => 0,
            PageRule::Ee1004 => (offset >> 8) as u8,
            PageRule::Spd5Hub => (offset >> 7) as u8,
        }
    }

    /// Byte offset presented on the wire once the page is selected.
    pub fn in_page(self, offset: u16) -> u8 {
        match self {
            PageRule::Flat | PageRule::Ee1004 => (offset & 0xFF) as u8,
            PageRule::Spd5Hub => ((offset & 0x7F) | 0x80) as u8,
        }
    }
}

/// Discovered geometry of one EEPROM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Geometry {
    pub size: SizeClass,
    /// Addressed through an SPD5 hub (DDR5 modules).
    pub ddr5: bool,
}

impl Geometry {
    pub fn new(size: SizeClass, ddr5: bool) -> Self {
        Self { size, ddr5 }
    }

    pub fn len(&self) -> usize {
        self.size.bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn page_rule(&self) -> Result<PageRule> {
        match (self.size, self.ddr5) {
            (SizeClass::Unknown | SizeClass::B256, _) => Ok(PageRule::Flat),
            (SizeClass::B512, _) => Ok(PageRule::Ee1004),
            (SizeClass::B1024, true) => Ok(PageRule::Spd5Hub),
            (SizeClass::B1024, false) => Err(Error::Config(
                "1024-byte EEPROM without an SPD5 hub has no page rule".into(),
            )),
        }
    }
}
