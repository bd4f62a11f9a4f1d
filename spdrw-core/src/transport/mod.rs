//! Physical links underneath the SPD transports.
//!
//! - [`serial`]: the USB CDC line to the proxy device
//! - [`devport`]: privileged port and PCI configuration access on Linux

pub mod serial;

#[cfg(target_os = "linux")]
pub mod devport;
