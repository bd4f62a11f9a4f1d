//! Simulated SPD proxy firmware behind a [`SerialLine`].
//!
//! Requests written to the line are parsed as they complete and answered
//! with DATA frames on the read side, the way the adapter would over USB.
//! Test knobs inject silence, corrupt or garbled replies, alerts and
//! unplugging.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::mgmt_protocol::spd_proxy::command::{opcode, RswpSupport, NAME_LENGTH};
use crate::mgmt_protocol::spd_proxy::frame::{encode_data, HEADER_ALERT};
use crate::transport::serial::{SerialLine, READ_POLL};

struct Module {
    data: Vec<u8>,
    ddr5: bool,
    rswp: [bool; 16],
    pswp: bool,
    hub: [u8; 128],
}

impl Module {
    fn blocks(&self) -> usize {
        if self.ddr5 {
            16
        } else {
            4
        }
    }

    fn writable(&self, offset: usize) -> bool {
        let block = offset / (self.data.len() / self.blocks()).max(1);
        offset < self.data.len() && !self.pswp && !self.rswp[block.min(15)]
    }

    fn size_index(&self) -> u8 {
        match self.data.len() {
            256 => 1,
            512 => 2,
            1024 => 3,
            _ => 0,
        }
    }
}

struct State {
    modules: BTreeMap<u8, Module>,
    name: String,
    fast_clock: bool,
    request: Vec<u8>,
    rx: BytesMut,
    commands: Vec<u8>,
    silent: bool,
    corrupt_next: bool,
    garble_next: bool,
    truncate_next: Option<usize>,
    alert_next: Option<u8>,
    unplugged: bool,
    detached: bool,
}

struct Shared {
    state: Mutex<State>,
    readable: Condvar,
}

/// Handle for configuring the simulated adapter and inspecting traffic.
#[derive(Clone)]
pub struct FakeFirmware {
    shared: Arc<Shared>,
}

/// One end of the simulated serial line.
#[derive(Clone)]
pub struct FakeLine {
    shared: Arc<Shared>,
}

impl Default for FakeFirmware {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeFirmware {
    pub const VERSION: i32 = 20_240_501;
    pub const PORT: &'static str = "/dev/ttyFAKE0";
    pub const DEFAULT_NAME: &'static str = "spd-proxy";

    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    modules: BTreeMap::new(),
                    name: Self::DEFAULT_NAME.into(),
                    fast_clock: false,
                    request: Vec::new(),
                    rx: BytesMut::new(),
                    commands: Vec::new(),
                    silent: false,
                    corrupt_next: false,
                    garble_next: false,
                    truncate_next: None,
                    alert_next: None,
                    unplugged: false,
                    detached: false,
                }),
                readable: Condvar::new(),
            }),
        }
    }

    pub fn line(&self) -> FakeLine {
        FakeLine {
            shared: self.shared.clone(),
        }
    }

    pub fn add_eeprom(&self, address: u8, data: Vec<u8>, ddr5: bool) {
        self.shared.state.lock().modules.insert(
            address,
            Module {
                data,
                ddr5,
                rswp: [false; 16],
                pswp: false,
                hub: [0; 128],
            },
        );
    }

    pub fn eeprom_byte(&self, address: u8, offset: usize) -> u8 {
        self.shared.state.lock().modules[&address].data[offset]
    }

    /// Opcodes of every request received so far.
    pub fn commands(&self) -> Vec<u8> {
        self.shared.state.lock().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.shared.state.lock().commands.clear();
    }

    /// Stop answering requests.
    pub fn set_silent(&self, silent: bool) {
        self.shared.state.lock().silent = silent;
    }

    /// Flip the checksum of the next reply.
    pub fn corrupt_next_reply(&self) {
        self.shared.state.lock().corrupt_next = true;
    }

    /// Prefix the next reply with a byte that is not a frame header.
    pub fn garble_next_reply(&self) {
        self.shared.state.lock().garble_next = true;
    }

    /// Send only the first `keep` bytes of the next reply.
    pub fn truncate_next_reply(&self, keep: usize) {
        self.shared.state.lock().truncate_next = Some(keep);
    }

    /// Emit an alert immediately ahead of the next reply.
    pub fn alert_before_next_reply(&self, code: u8) {
        self.shared.state.lock().alert_next = Some(code);
    }

    /// Emit an unsolicited alert now.
    pub fn send_alert(&self, code: u8) {
        let mut state = self.shared.state.lock();
        state.rx.extend_from_slice(&[HEADER_ALERT, code]);
        self.shared.readable.notify_all();
    }

    /// Drop the port from the system while reads keep timing out quietly,
    /// as when the device node disappears before the driver reports it.
    pub fn detach_port(&self) {
        self.shared.state.lock().detached = true;
    }

    /// Make the device vanish: reads and writes fail from now on.
    pub fn unplug(&self) {
        self.shared.state.lock().unplugged = true;
        self.shared.readable.notify_all();
    }
}

fn gone() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged")
}

/// Length of the request at the front of `buf`, once enough of it is there
/// to tell.
fn request_len(buf: &[u8]) -> Option<usize> {
    let len = match *buf.first()? {
        opcode::TEST
        | opcode::VERSION
        | opcode::RSWP_REPORT
        | opcode::SCAN_BUS
        | opcode::PIN_RESET
        | opcode::FACTORY_RESET => 1,
        opcode::NAME => match *buf.get(1)? {
            opcode::GET => 2,
            len => 2 + len as usize,
        },
        opcode::I2C_CLOCK
        | opcode::PROBE_ADDRESS
        | opcode::DDR4_DETECT
        | opcode::DDR5_DETECT
        | opcode::SIZE => 2,
        opcode::READ | opcode::WRITE_BYTE => 5,
        opcode::WRITE_PAGE => 5 + *buf.get(4)? as usize,
        opcode::OVERWRITE | opcode::RSWP => 4,
        opcode::PSWP => 3,
        opcode::SPD5_HUB => match *buf.get(3)? {
            opcode::GET => 4,
            _ => 5,
        },
        _ => 1,
    };
    Some(len)
}

impl State {
    fn module(&mut self, address: u8) -> Option<&mut Module> {
        self.modules.get_mut(&address)
    }

    fn answer(&mut self, req: &[u8]) -> Option<Vec<u8>> {
        let flag = |b: bool| vec![b as u8];
        let offset = |req: &[u8]| u16::from_be_bytes([req[2], req[3]]) as usize;
        let reply = match req[0] {
            opcode::TEST => flag(true),
            opcode::VERSION => FakeFirmware::VERSION.to_le_bytes().to_vec(),
            opcode::NAME if req[1] == opcode::GET => self.name.clone().into_bytes(),
            opcode::NAME => {
                let name = String::from_utf8_lossy(&req[2..]).to_string();
                let ok = !name.is_empty() && name.len() <= NAME_LENGTH;
                if ok {
                    self.name = name;
                }
                flag(ok)
            }
            opcode::I2C_CLOCK if req[1] == opcode::GET => flag(self.fast_clock),
            opcode::I2C_CLOCK => {
                self.fast_clock = req[1] == 1;
                flag(true)
            }
            opcode::RSWP_REPORT => {
                vec![(RswpSupport::DDR3 | RswpSupport::DDR4 | RswpSupport::DDR5).bits()]
            }
            opcode::SCAN_BUS => vec![self
                .modules
                .keys()
                .filter(|a| (0x50..=0x57).contains(*a))
                .fold(0u8, |mask, a| mask | 1 << (a - 0x50))],
            opcode::PROBE_ADDRESS => flag(self.modules.contains_key(&req[1])),
            opcode::DDR4_DETECT => {
                flag(matches!(self.module(req[1]), Some(m) if !m.ddr5 && m.data.len() == 512))
            }
            opcode::DDR5_DETECT => flag(matches!(self.module(req[1]), Some(m) if m.ddr5)),
            opcode::SIZE => vec![self.module(req[1]).map_or(0, |m| m.size_index())],
            opcode::READ => {
                let (start, count) = (offset(req), req[4] as usize);
                match self.module(req[1]) {
                    Some(m) if start + count <= m.data.len() => m.data[start..start + count].to_vec(),
                    _ => Vec::new(),
                }
            }
            opcode::WRITE_BYTE => {
                let start = offset(req);
                let value = req[4];
                flag(match self.module(req[1]) {
                    Some(m) if m.writable(start) => {
                        m.data[start] = value;
                        true
                    }
                    _ => false,
                })
            }
            opcode::WRITE_PAGE => {
                let start = offset(req);
                let data = req[5..].to_vec();
                flag(match self.module(req[1]) {
                    Some(m) if (start..start + data.len()).all(|o| m.writable(o)) => {
                        m.data[start..start + data.len()].copy_from_slice(&data);
                        true
                    }
                    _ => false,
                })
            }
            opcode::OVERWRITE => {
                let start = offset(req);
                flag(matches!(self.module(req[1]), Some(m) if m.writable(start)))
            }
            opcode::RSWP => {
                let block = req[2] as usize;
                match (self.module(req[1]), req[3]) {
                    (Some(m), opcode::GET) => flag(m.rswp.get(block).copied().unwrap_or(false)),
                    (Some(m), 0) => {
                        m.rswp = [false; 16];
                        flag(true)
                    }
                    (Some(m), _) if block < m.blocks() => {
                        m.rswp[block] = true;
                        flag(true)
                    }
                    _ => flag(false),
                }
            }
            opcode::PSWP => match (self.module(req[1]), req[2]) {
                (Some(m), opcode::GET) => flag(m.pswp),
                (Some(m), _) => {
                    m.pswp = true;
                    flag(true)
                }
                _ => flag(false),
            },
            opcode::SPD5_HUB => {
                let register = req[2] as usize & 0x7F;
                match (self.module(req[1]), req[3]) {
                    (Some(m), opcode::GET) if m.ddr5 => vec![m.hub[register]],
                    (Some(m), _) if m.ddr5 => {
                        m.hub[register] = req[4];
                        flag(true)
                    }
                    _ => flag(false),
                }
            }
            opcode::PIN_RESET => flag(true),
            opcode::FACTORY_RESET => {
                self.name = FakeFirmware::DEFAULT_NAME.into();
                self.fast_clock = false;
                flag(true)
            }
            _ => return None,
        };
        Some(reply)
    }

    fn respond(&mut self, payload: &[u8]) {
        if let Some(code) = self.alert_next.take() {
            self.rx.extend_from_slice(&[HEADER_ALERT, code]);
        }
        if std::mem::take(&mut self.garble_next) {
            self.rx.extend_from_slice(&[0x99]);
        }
        let start = self.rx.len();
        encode_data(payload, &mut self.rx);
        if std::mem::take(&mut self.corrupt_next) {
            let last = self.rx.len() - 1;
            self.rx[last] ^= 0xFF;
        }
        if let Some(keep) = self.truncate_next.take() {
            self.rx.truncate(start + keep);
        }
    }
}

impl Read for FakeLine {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.shared.state.lock();
        if state.rx.is_empty() && !state.unplugged {
            self.shared.readable.wait_for(&mut state, READ_POLL);
        }
        if state.unplugged {
            return Err(gone());
        }
        if state.rx.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(state.rx.len());
        let chunk = state.rx.split_to(n);
        buf[..n].copy_from_slice(&chunk);
        Ok(n)
    }
}

impl Write for FakeLine {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.shared.state.lock();
        if state.unplugged {
            return Err(gone());
        }
        state.request.extend_from_slice(buf);
        while let Some(len) = request_len(&state.request) {
            if state.request.len() < len {
                break;
            }
            let req: Vec<u8> = state.request.drain(..len).collect();
            state.commands.push(req[0]);
            if state.silent {
                continue;
            }
            if let Some(reply) = state.answer(&req) {
                state.respond(&reply);
            }
        }
        self.shared.readable.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SerialLine for FakeLine {
    fn try_clone_line(&self) -> Result<Box<dyn SerialLine>> {
        Ok(Box::new(self.clone()))
    }

    fn clear_buffers(&mut self) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.unplugged {
            return Err(Error::Io(gone()));
        }
        state.rx.clear();
        state.request.clear();
        Ok(())
    }

    fn is_alive(&self) -> bool {
        let state = self.shared.state.lock();
        !state.unplugged && !state.detached
    }

    fn port_name(&self) -> String {
        FakeFirmware::PORT.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_lengths() {
        assert_eq!(request_len(b"t"), Some(1));
        assert_eq!(request_len(&[b'n', 3]), Some(5));
        assert_eq!(request_len(&[b'g', 0x50, 0, 0]), None);
        assert_eq!(request_len(&[b'g', 0x50, 0, 0, 2]), Some(7));
        assert_eq!(request_len(&[b'h', 0x50, 11, b'?']), Some(4));
        assert_eq!(request_len(&[b'h', 0x50, 11, 1]), Some(5));
    }
}
