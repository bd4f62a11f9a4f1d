//! Recording [`SpdBus`] over a plain byte array.

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::hw_trait::SpdBus;
use crate::types::{BusAddress, BusStatus, Geometry, PageRule};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusOp {
    Select { page: u8 },
    Read { offset: u16, len: usize },
    Write { offset: u16, data: Vec<u8> },
}

struct State {
    data: Vec<u8>,
    page: Option<u8>,
    ops: Vec<BusOp>,
    fail_at: Option<u16>,
}

/// A single EEPROM that pages on the host side exactly like the real parts,
/// with configurable transport limits.
pub struct MockBus {
    pub geometry: Geometry,
    pub host_paging: bool,
    pub max_read: usize,
    pub max_write: usize,
    state: Mutex<State>,
}

impl MockBus {
    pub fn new(geometry: Geometry, host_paging: bool) -> Self {
        Self {
            geometry,
            host_paging,
            max_read: usize::MAX,
            max_write: usize::MAX,
            state: Mutex::new(State {
                data: (0..geometry.len()).map(|i| i as u8).collect(),
                page: None,
                ops: Vec::new(),
                fail_at: None,
            }),
        }
    }

    pub fn with_limits(mut self, max_read: usize, max_write: usize) -> Self {
        self.max_read = max_read;
        self.max_write = max_write;
        self
    }

    pub fn ops(&self) -> Vec<BusOp> {
        self.state.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state.lock().ops.clear();
    }

    pub fn byte(&self, index: usize) -> u8 {
        self.state.lock().data[index]
    }

    /// NAK any transfer touching this wire offset.
    pub fn fail_at(&self, offset: u16) {
        self.state.lock().fail_at = Some(offset);
    }

    fn paged(&self, rule: PageRule) -> bool {
        self.host_paging && rule != PageRule::Flat
    }

    /// Switch pages if needed and return (wire offset, array index).
    fn locate(&self, state: &mut State, rule: PageRule, offset: u16) -> (u16, usize) {
        if !self.paged(rule) {
            return (offset, offset as usize);
        }
        let page = rule.page_of(offset);
        if state.page != Some(page) {
            state.ops.push(BusOp::Select { page });
            state.page = Some(page);
        }
        (rule.in_page(offset) as u16, offset as usize)
    }

    fn check(state: &State, address: BusAddress, wire: u16, len: usize) -> Result<()> {
        match state.fail_at {
            Some(bad) if (wire..wire + len as u16).contains(&bad) => Err(Error::Bus {
                address: address.raw(),
                offset: Some(bad),
                status: BusStatus::Error,
            }),
            _ => Ok(()),
        }
    }
}

impl SpdBus for MockBus {
    fn probe(&self, _address: u8) -> bool {
        true
    }

    fn read_block(
        &self,
        address: BusAddress,
        rule: PageRule,
        offset: u16,
        buf: &mut [u8],
    ) -> Result<()> {
        assert!(buf.len() <= self.max_read, "read chunk over limit");
        let mut state = self.state.lock();
        let (wire, start) = self.locate(&mut state, rule, offset);
        state.ops.push(BusOp::Read {
            offset: wire,
            len: buf.len(),
        });
        Self::check(&state, address, wire, buf.len())?;
        buf.copy_from_slice(&state.data[start..start + buf.len()]);
        Ok(())
    }

    fn write_block(
        &self,
        address: BusAddress,
        rule: PageRule,
        offset: u16,
        data: &[u8],
    ) -> Result<()> {
        assert!(data.len() <= self.max_write, "write chunk over limit");
        let mut state = self.state.lock();
        let (wire, start) = self.locate(&mut state, rule, offset);
        state.ops.push(BusOp::Write {
            offset: wire,
            data: data.to_vec(),
        });
        Self::check(&state, address, wire, data.len())?;
        state.data[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn max_read_chunk(&self) -> usize {
        self.max_read
    }

    fn max_write_chunk(&self) -> usize {
        self.max_write
    }

    fn host_paging(&self) -> bool {
        self.host_paging
    }

    fn reset_page(&self, _address: BusAddress, rule: PageRule) -> Result<()> {
        if self.paged(rule) {
            let mut state = self.state.lock();
            state.ops.push(BusOp::Select { page: 0 });
            state.page = Some(0);
        }
        Ok(())
    }

    fn current_page(&self, _address: BusAddress, _rule: PageRule) -> Option<u8> {
        self.state.lock().page
    }

    fn discover_geometry(&self, _address: BusAddress) -> Result<Geometry> {
        Ok(self.geometry)
    }

    fn scan(&self) -> Result<Vec<BusAddress>> {
        Ok(vec![BusAddress::FIRST])
    }

    fn rswp(&self, _address: BusAddress, _block: u8) -> Result<bool> {
        Ok(false)
    }

    fn set_rswp(&self, _address: BusAddress, _block: u8) -> Result<()> {
        Ok(())
    }

    fn clear_rswp(&self, _address: BusAddress) -> Result<()> {
        Ok(())
    }

    fn pswp(&self, _address: BusAddress) -> Result<bool> {
        Ok(false)
    }

    fn set_pswp(&self, _address: BusAddress) -> Result<()> {
        Ok(())
    }
}
