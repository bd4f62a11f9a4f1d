//! Device-level access built on the bus transports.
//!
//! `spd` holds the JEDEC address-block and register constants, `eeprom` the
//! page-aware byte addressor.

pub mod eeprom;
pub mod spd;
