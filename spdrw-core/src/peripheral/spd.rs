//! SPD EEPROM addressing constants and memory-type table.
//!
//! Covers the EE1004 (DDR4) page and write-protect address blocks and the
//! SPD5 hub (DDR5) registers.
//!
//! References: JEDEC 21-C 4.1.6 (EE1004-v), JESD300-5 (SPD5118).

use strum::FromRepr;

use crate::types::{BusAddress, SizeClass};

/// Byte offsets inside the SPD image.
pub mod offsets {
    /// Key byte 2: DRAM device type
    pub const MEMORY_TYPE: u16 = 2;
}

/// Special device-select codes shared by every EEPROM on the bus.
pub mod ee1004 {
    /// Set page address 0
    pub const SPA0: u8 = 0x36;
    /// Set page address 1
    pub const SPA1: u8 = 0x37;
    /// Read/set reversible write protection, indexed by block 0..=3
    pub const RPS: [u8; 4] = [0x31, 0x34, 0x35, 0x30];
    /// Clear all reversible write protection
    pub const CWP: u8 = 0x33;
    /// Permanent write protection base; OR in the select-strap bits
    pub const PSWP_BASE: u8 = 0x30;
    /// Blocks covered by reversible write protection
    pub const BLOCKS: u8 = 4;

    /// Page select code for `page`.
    pub fn spa(page: u8) -> u8 {
        SPA0 + page
    }
}

/// SPD5 hub registers (DDR5 modules).
pub mod spd5 {
    /// Local hub device type code in the upper address bits
    pub const HUB_TYPE: u8 = 0x48;
    /// MR11: legacy-mode page pointer
    pub const MR11: u8 = 11;
    /// Highest selectable 128-byte page
    pub const MAX_PAGE: u8 = 15;
}

/// Permanent write protection select code for `address`.
pub fn pswp_address(address: BusAddress) -> u8 {
    ee1004::PSWP_BASE | address.index()
}

/// SPD5 hub register-space address for the module at `address`.
pub fn hub_address(address: BusAddress) -> u8 {
    spd5::HUB_TYPE | address.index()
}

/// DRAM device types from key byte 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, strum::Display)]
#[repr(u8)]
pub enum RamType {
    Unknown = 0,
    Sdram = 4,
    Ddr = 7,
    Ddr2 = 8,
    #[strum(to_string = "DDR2 FB-DIMM")]
    Ddr2FbDimm = 9,
    #[strum(to_string = "DDR2 FB-DIMM probe")]
    Ddr2FbDimmProbe = 10,
    Ddr3 = 11,
    Ddr4 = 12,
    Ddr4e = 14,
    Lpddr3 = 15,
    Lpddr4 = 16,
    Lpddr4x = 17,
    Ddr5 = 18,
    Lpddr5 = 19,
    #[strum(to_string = "DDR5 NVDIMM-P")]
    Ddr5NvdimmP = 20,
    Lpddr5x = 21,
}

impl RamType {
    /// EEPROM capacity implied by the memory type.
    pub fn spd_size(self) -> SizeClass {
        match self {
            RamType::Sdram | RamType::Ddr | RamType::Ddr2 | RamType::Ddr2FbDimm | RamType::Ddr3 => {
                SizeClass::B256
            }
            RamType::Ddr4 | RamType::Ddr4e | RamType::Lpddr3 | RamType::Lpddr4 => SizeClass::B512,
            RamType::Ddr5 => SizeClass::B1024,
            _ => SizeClass::Unknown,
        }
    }
}

/// Capacity for a raw key byte; undefined codes are treated as 256 bytes.
pub fn size_for_type_byte(code: u8) -> SizeClass {
    match RamType::from_repr(code) {
        Some(ram_type) => ram_type.spd_size(),
        None => SizeClass::B256,
    }
}
