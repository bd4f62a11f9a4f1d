//! Hardware abstraction layer traits.
//!
//! Two layers live here. The lower one ([`PortIo`], [`PciConfig`], together
//! a [`DriverSession`]) is the privileged register access an external driver
//! provides; SMBus controller state machines are written against it. The
//! upper one ([`SpdBus`]) is what the EEPROM addressor consumes, implemented
//! by both the host SMBus transport and the serial proxy.

use std::fmt;
use std::io;
use std::sync::Arc;

use crate::error::Result;
use crate::types::{BusAddress, Geometry, PageRule};

/// Access width of a port or configuration-space transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Byte,
    Word,
    Dword,
}

impl Width {
    pub fn bytes(self) -> usize {
        match self {
            Width::Byte => 1,
            Width::Word => 2,
            Width::Dword => 4,
        }
    }

    /// Mask covering the bits a transfer of this width carries.
    pub fn mask(self) -> u32 {
        match self {
            Width::Byte => 0xFF,
            Width::Word => 0xFFFF,
            Width::Dword => 0xFFFF_FFFF,
        }
    }
}

/// PCI bus/device/function triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PciAddress {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl PciAddress {
    pub fn new(bus: u8, device: u8, function: u8) -> Self {
        Self {
            bus,
            device,
            function,
        }
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}:{:02x}.{:x}", self.bus, self.device, self.function)
    }
}

/// Sized access to the I/O port space.
pub trait PortIo: Send + Sync {
    fn read_port(&self, width: Width, port: u16) -> io::Result<u32>;
    fn write_port(&self, width: Width, port: u16, value: u32) -> io::Result<()>;
}

/// Sized access to PCI configuration space, plus device lookup.
pub trait PciConfig: Send + Sync {
    fn read_pci_config(&self, width: Width, device: PciAddress, register: u16) -> io::Result<u32>;
    fn write_pci_config(
        &self,
        width: Width,
        device: PciAddress,
        register: u16,
        value: u32,
    ) -> io::Result<()>;
    fn find_pci_device_by_class(&self, class: u8, subclass: u8) -> io::Result<Option<PciAddress>>;
    fn find_pci_device_by_id(&self, vendor: u16, device: u16) -> io::Result<Option<PciAddress>>;
}

/// An open privileged driver session.
pub trait DriverSession: PortIo + PciConfig {}

impl<T: PortIo + PciConfig> DriverSession for T {}

/// A block of byte-wide I/O port registers at a fixed base.
#[derive(Clone)]
pub struct IoPortBlock {
    session: Arc<dyn DriverSession>,
    base: u16,
}

impl IoPortBlock {
    pub fn new(session: Arc<dyn DriverSession>, base: u16) -> Self {
        Self { session, base }
    }

    pub fn base(&self) -> u16 {
        self.base
    }

    /// The same register layout shifted by `delta` ports.
    pub fn offset_by(&self, delta: u16) -> Self {
        Self::new(self.session.clone(), self.base.wrapping_add(delta))
    }

    pub fn read8(&self, register: u16) -> Result<u8> {
        let value = self
            .session
            .read_port(Width::Byte, self.base.wrapping_add(register))?;
        Ok(value as u8)
    }

    pub fn write8(&self, register: u16, value: u8) -> Result<()> {
        self.session
            .write_port(Width::Byte, self.base.wrapping_add(register), value as u32)?;
        Ok(())
    }
}

/// Configuration space of one PCI function.
#[derive(Clone)]
pub struct ConfigSpace {
    session: Arc<dyn DriverSession>,
    device: PciAddress,
}

impl ConfigSpace {
    pub fn new(session: Arc<dyn DriverSession>, device: PciAddress) -> Self {
        Self { session, device }
    }

    pub fn device(&self) -> PciAddress {
        self.device
    }

    pub fn read8(&self, register: u16) -> Result<u8> {
        Ok(self.read(Width::Byte, register)? as u8)
    }

    pub fn read16(&self, register: u16) -> Result<u16> {
        Ok(self.read(Width::Word, register)? as u16)
    }

    pub fn read32(&self, register: u16) -> Result<u32> {
        self.read(Width::Dword, register)
    }

    pub fn write8(&self, register: u16, value: u8) -> Result<()> {
        self.write(Width::Byte, register, value as u32)
    }

    pub fn write32(&self, register: u16, value: u32) -> Result<()> {
        self.write(Width::Dword, register, value)
    }

    fn read(&self, width: Width, register: u16) -> Result<u32> {
        Ok(self.session.read_pci_config(width, self.device, register)?)
    }

    fn write(&self, width: Width, register: u16, value: u32) -> Result<()> {
        Ok(self
            .session
            .write_pci_config(width, self.device, register, value)?)
    }
}

/// Byte-addressed access to SPD EEPROMs on one bus.
///
/// Offsets are full EEPROM offsets. A transport that pages on the host side
/// ([`SpdBus::host_paging`]) owns the page state: it selects the page that
/// holds `offset` and runs the transfer in one locked step, so every user of
/// the bus sees the same page register. A single transfer never crosses a
/// page of `rule`.
pub trait SpdBus: Send + Sync {
    /// Whether anything acknowledges `address`. Never fails.
    fn probe(&self, address: u8) -> bool;

    /// Fill `buf` starting at `offset`. `buf` never exceeds
    /// [`SpdBus::max_read_chunk`].
    fn read_block(
        &self,
        address: BusAddress,
        rule: PageRule,
        offset: u16,
        buf: &mut [u8],
    ) -> Result<()>;

    /// Write `data` starting at `offset`. `data` never exceeds
    /// [`SpdBus::max_write_chunk`] and never crosses a write page.
    fn write_block(&self, address: BusAddress, rule: PageRule, offset: u16, data: &[u8])
        -> Result<()>;

    fn max_read_chunk(&self) -> usize {
        usize::MAX
    }

    fn max_write_chunk(&self) -> usize {
        usize::MAX
    }

    /// Whether the page register is driven from the host.
    fn host_paging(&self) -> bool {
        true
    }

    /// Point the page register of `address` back at page 0.
    fn reset_page(&self, _address: BusAddress, _rule: PageRule) -> Result<()> {
        Ok(())
    }

    /// Page last selected for `address`, if the transport knows it.
    fn current_page(&self, _address: BusAddress, _rule: PageRule) -> Option<u8> {
        None
    }

    /// Size class and addressing mode of the EEPROM at `address`.
    fn discover_geometry(&self, address: BusAddress) -> Result<Geometry>;

    /// Addresses that currently respond.
    fn scan(&self) -> Result<Vec<BusAddress>>;

    /// Whether reversible write protection is set on `block`.
    fn rswp(&self, address: BusAddress, block: u8) -> Result<bool>;
    fn set_rswp(&self, address: BusAddress, block: u8) -> Result<()>;
    /// Clear reversible write protection on every block.
    fn clear_rswp(&self, address: BusAddress) -> Result<()>;

    /// Whether permanent write protection is set.
    fn pswp(&self, address: BusAddress) -> Result<bool>;
    fn set_pswp(&self, address: BusAddress) -> Result<()>;
}
