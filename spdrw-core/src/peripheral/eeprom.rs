//! Page-aware byte access to one SPD EEPROM.
//!
//! The addressor hides how a transport reaches bytes past the first 256:
//! EE1004 parts (DDR4) flip between two 256-byte pages with a send-byte to
//! 0x36/0x37, SPD5 hub parts (DDR5) expose 128-byte pages through MR11, and
//! the serial proxy firmware takes full 16-bit offsets and pages itself.
//! Transfers are split so none crosses a page. The page register itself is
//! shared by everything on the bus, so the transport tracks it and issues a
//! switch only when the target page changes.

use crate::error::{Error, Result};
use crate::hw_trait::SpdBus;
use crate::tracing::prelude::*;
use crate::types::{BusAddress, Geometry, PageRule};

/// Serial page writes must not cross this alignment.
const WRITE_ALIGN: usize = 16;

pub struct EepromAddressor<'a, B: SpdBus + ?Sized> {
    bus: &'a B,
    address: BusAddress,
    geometry: Geometry,
    rule: PageRule,
}

impl<'a, B: SpdBus + ?Sized> EepromAddressor<'a, B> {
    /// Discover the EEPROM at `address` and put it on page 0.
    pub fn new(bus: &'a B, address: BusAddress) -> Result<Self> {
        let geometry = bus
            .discover_geometry(address)
            .map_err(|e| e.at(address.raw(), 0))?;
        Self::with_geometry(bus, address, geometry)
    }

    /// Use an already known geometry instead of probing for it.
    pub fn with_geometry(bus: &'a B, address: BusAddress, geometry: Geometry) -> Result<Self> {
        let addressor = Self {
            bus,
            address,
            geometry,
            rule: geometry.page_rule()?,
        };
        addressor.reset_page()?;
        Ok(addressor)
    }

    pub fn address(&self) -> BusAddress {
        self.address
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn len(&self) -> usize {
        self.geometry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.geometry.is_empty()
    }

    /// Page the bus currently has selected for this EEPROM.
    pub fn page(&self) -> Option<u8> {
        if !self.paged() {
            return None;
        }
        self.bus.current_page(self.address, self.rule)
    }

    /// Retarget to another EEPROM on the same bus.
    pub fn set_address(&mut self, address: BusAddress) -> Result<()> {
        let geometry = self
            .bus
            .discover_geometry(address)
            .map_err(|e| e.at(address.raw(), 0))?;
        self.rule = geometry.page_rule()?;
        self.address = address;
        self.geometry = geometry;
        self.reset_page()
    }

    pub fn read(&mut self, offset: u16) -> Result<u8> {
        self.check_range(offset, 1)?;
        let mut buf = [0u8];
        self.bus
            .read_block(self.address, self.rule, offset, &mut buf)
            .map_err(|e| e.at(self.address.raw(), offset))?;
        Ok(buf[0])
    }

    pub fn read_bytes(&mut self, offset: u16, count: usize) -> Result<Vec<u8>> {
        self.check_range(offset, count)?;
        let mut out = vec![0u8; count];
        let mut done = 0;
        while done < count {
            let at = offset + done as u16;
            let len = (count - done)
                .min(self.bus.max_read_chunk())
                .min(self.page_remaining(at));
            self.bus
                .read_block(self.address, self.rule, at, &mut out[done..done + len])
                .map_err(|e| e.at(self.address.raw(), at))?;
            done += len;
        }
        Ok(out)
    }

    pub fn write(&mut self, offset: u16, value: u8) -> Result<()> {
        self.check_range(offset, 1)?;
        self.bus
            .write_block(self.address, self.rule, offset, &[value])
            .map_err(|e| e.at(self.address.raw(), offset))
    }

    pub fn write_bytes(&mut self, offset: u16, data: &[u8]) -> Result<()> {
        self.check_range(offset, data.len())?;
        let max = self.bus.max_write_chunk();
        let mut done = 0;
        while done < data.len() {
            let at = offset + done as u16;
            let mut len = (data.len() - done).min(max).min(self.page_remaining(at));
            if max != usize::MAX {
                len = len.min(WRITE_ALIGN - at as usize % WRITE_ALIGN);
            }
            self.bus
                .write_block(self.address, self.rule, at, &data[done..done + len])
                .map_err(|e| e.at(self.address.raw(), at))?;
            done += len;
        }
        Ok(())
    }

    pub fn verify(&mut self, offset: u16, value: u8) -> Result<bool> {
        Ok(self.read(offset)? == value)
    }

    pub fn verify_bytes(&mut self, offset: u16, data: &[u8]) -> Result<bool> {
        Ok(self.read_bytes(offset, data.len())? == data)
    }

    /// Write `value` unless it is already there. Returns whether it wrote.
    pub fn update(&mut self, offset: u16, value: u8) -> Result<bool> {
        if self.verify(offset, value)? {
            return Ok(false);
        }
        self.write(offset, value)?;
        Ok(true)
    }

    /// Write only the runs of `data` that differ from the device.
    ///
    /// Returns the number of bytes written.
    pub fn update_bytes(&mut self, offset: u16, data: &[u8]) -> Result<usize> {
        let current = self.read_bytes(offset, data.len())?;
        let mut written = 0;
        let mut i = 0;
        while i < data.len() {
            if current[i] == data[i] {
                i += 1;
                continue;
            }
            let start = i;
            while i < data.len() && current[i] != data[i] {
                i += 1;
            }
            self.write_bytes(offset + start as u16, &data[start..i])?;
            written += i - start;
        }
        if written > 0 {
            debug!(address = %self.address, offset, written, "updated");
        }
        Ok(written)
    }

    /// Read a byte and write the same value back.
    pub fn overwrite(&mut self, offset: u16) -> Result<()> {
        let value = self.read(offset)?;
        self.write(offset, value)
    }

    pub fn rswp(&self, block: u8) -> Result<bool> {
        self.bus.rswp(self.address, block)
    }

    pub fn set_rswp(&self, block: u8) -> Result<()> {
        self.bus.set_rswp(self.address, block)
    }

    pub fn clear_rswp(&self) -> Result<()> {
        self.bus.clear_rswp(self.address)
    }

    pub fn pswp(&self) -> Result<bool> {
        self.bus.pswp(self.address)
    }

    pub fn set_pswp(&self) -> Result<()> {
        self.bus.set_pswp(self.address)
    }

    fn paged(&self) -> bool {
        self.bus.host_paging() && self.rule != PageRule::Flat
    }

    fn reset_page(&self) -> Result<()> {
        if self.paged() {
            self.bus
                .reset_page(self.address, self.rule)
                .map_err(|e| e.at(self.address.raw(), 0))?;
            trace!(address = %self.address, "page reset");
        }
        Ok(())
    }

    /// Bytes from `offset` to the end of its host page.
    fn page_remaining(&self, offset: u16) -> usize {
        if !self.paged() {
            return usize::MAX;
        }
        let size = self.rule.page_size();
        size - offset as usize % size
    }

    fn check_range(&self, offset: u16, count: usize) -> Result<()> {
        if count == 0 {
            return Err(Error::Config("zero-length EEPROM access".into()));
        }
        let end = offset as usize + count;
        if end > self.len() {
            return Err(Error::Config(format!(
                "offset 0x{offset:04X} + {count} exceeds {}-byte EEPROM at {}",
                self.len(),
                self.address
            )));
        }
        Ok(())
    }
}
