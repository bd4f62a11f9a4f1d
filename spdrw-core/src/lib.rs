//! SPD EEPROM access for memory modules.
//!
//! Two transports reach the module EEPROMs: the host chipset's own SMBus
//! controller driven register-by-register through a privileged
//! [`hw_trait::DriverSession`], or a serial-attached microcontroller that
//! proxies I2C transactions ([`mgmt_protocol::spd_proxy`]). Both implement
//! [`hw_trait::SpdBus`], over which [`peripheral::eeprom::EepromAddressor`]
//! provides page-aware byte access. [`session::TransportSession`] owns
//! whichever backend is active.

pub mod checksum;
pub mod config;
pub mod error;
pub mod hw_trait;
pub mod mgmt_protocol;
pub mod peripheral;
pub mod session;
pub mod smbus;
pub mod tracing;
pub mod transport;
pub mod types;


pub use error::{Error, ErrorKind, Result};
pub use session::TransportSession;
pub use types::{BusAddress, BusStatus, Geometry, SizeClass};
