//! Register-level simulation of the supported SMBus host controllers.
//!
//! Implements [`DriverSession`] so the real controller code runs against it.
//! Starting a transaction executes it immediately against a model of the
//! devices on each bus: SPD EEPROMs (flat, EE1004 paged, or behind an SPD5
//! hub) plus the EE1004 page and write-protect select codes.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;

use crate::hw_trait::{PciAddress, PciConfig, PortIo, Width};
use crate::peripheral::spd::ee1004;
use crate::smbus::{ich, nforce, skylake_x, vendor, Direction, Protocol};

/// One transaction as seen on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimOp {
    pub bus: u8,
    pub address: u8,
    pub direction: Direction,
    pub protocol: Protocol,
    pub command: u8,
    pub data: u16,
}

impl SimOp {
    pub fn read(bus: u8, address: u8, protocol: Protocol, command: u8) -> Self {
        Self {
            bus,
            address,
            direction: Direction::Read,
            protocol,
            command,
            data: 0,
        }
    }

    pub fn write(bus: u8, address: u8, protocol: Protocol, command: u8, data: u16) -> Self {
        Self {
            bus,
            address,
            direction: Direction::Write,
            protocol,
            command,
            data,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Model {
    Scratch,
    Ich { amd: bool },
    Nforce,
    SkylakeX,
}

struct Function {
    address: PciAddress,
    vendor: u16,
    device: u16,
    class: u8,
    subclass: u8,
}

struct SimEeprom {
    data: Vec<u8>,
    ddr5: bool,
    page: u8,
    registers: [u8; 128],
}

impl SimEeprom {
    fn read(&self, offset: u8, ee1004_page: u8) -> u8 {
        if self.ddr5 {
            if offset & 0x80 != 0 {
                let index = self.page as usize * 128 + (offset & 0x7F) as usize;
                self.data.get(index).copied().unwrap_or(0xFF)
            } else {
                self.registers[offset as usize]
            }
        } else {
            let base = if self.data.len() > 256 {
                ee1004_page as usize * 256
            } else {
                0
            };
            self.data.get(base + offset as usize).copied().unwrap_or(0xFF)
        }
    }

    fn write(&mut self, offset: u8, value: u8, ee1004_page: u8) {
        if self.ddr5 {
            if offset & 0x80 != 0 {
                let index = self.page as usize * 128 + (offset & 0x7F) as usize;
                if let Some(byte) = self.data.get_mut(index) {
                    *byte = value;
                }
            } else {
                self.registers[offset as usize] = value;
                if offset == 11 {
                    self.page = value;
                }
            }
        } else {
            let base = if self.data.len() > 256 {
                ee1004_page as usize * 256
            } else {
                0
            };
            if let Some(byte) = self.data.get_mut(base + offset as usize) {
                *byte = value;
            }
        }
    }
}

#[derive(Default)]
struct SimBus {
    eeproms: BTreeMap<u8, SimEeprom>,
    ee1004_page: u8,
    protected: HashSet<u8>,
}

impl SimBus {
    /// ACK with read data, or None for NAK.
    fn execute(&mut self, op: &SimOp) -> Option<u16> {
        let write = op.direction == Direction::Write;
        match op.address {
            0x50..=0x57 => {
                let page = self.ee1004_page;
                let eeprom = self.eeproms.get_mut(&op.address)?;
                match (op.protocol, write) {
                    (Protocol::Quick | Protocol::Byte, _) => Some(0),
                    (Protocol::ByteData, false) => Some(eeprom.read(op.command, page) as u16),
                    (Protocol::ByteData, true) => {
                        eeprom.write(op.command, op.data as u8, page);
                        Some(0)
                    }
                    (Protocol::WordData, false) => {
                        let low = eeprom.read(op.command, page) as u16;
                        let high = eeprom.read(op.command.wrapping_add(1), page) as u16;
                        Some(low | high << 8)
                    }
                    (Protocol::WordData, true) => {
                        eeprom.write(op.command, op.data as u8, page);
                        eeprom.write(op.command.wrapping_add(1), (op.data >> 8) as u8, page);
                        Some(0)
                    }
                }
            }
            0x48..=0x4F => self
                .eeproms
                .get(&(0x50 | (op.address & 7)))
                .filter(|e| e.ddr5)
                .map(|_| 0),
            ee1004::SPA0 | ee1004::SPA1 => {
                if !self.eeproms.values().any(|e| !e.ddr5 && e.data.len() == 512) {
                    return None;
                }
                if write {
                    self.ee1004_page = op.address - ee1004::SPA0;
                }
                Some(0)
            }
            0x30..=0x35 => {
                if self.eeproms.is_empty() {
                    return None;
                }
                if write {
                    if op.address == ee1004::CWP {
                        self.protected.retain(|a| !ee1004::RPS.contains(a));
                    } else {
                        self.protected.insert(op.address);
                    }
                    Some(0)
                } else if self.protected.contains(&op.address) {
                    None
                } else {
                    Some(0)
                }
            }
            _ => None,
        }
    }
}

struct State {
    model: Model,
    ports: HashMap<u16, u8>,
    config: HashMap<(PciAddress, u16), u8>,
    functions: Vec<Function>,
    pm_index: u8,
    pm: [u8; 256],
    buses: [SimBus; 2],
    ops: Vec<SimOp>,
    aborts: usize,
    stuck_busy: bool,
}

impl State {
    fn new(model: Model) -> Self {
        Self {
            model,
            ports: HashMap::new(),
            config: HashMap::new(),
            functions: Vec::new(),
            pm_index: 0,
            pm: [0; 256],
            buses: [SimBus::default(), SimBus::default()],
            ops: Vec::new(),
            aborts: 0,
            stuck_busy: false,
        }
    }

    fn port(&self, port: u16) -> u8 {
        self.ports.get(&port).copied().unwrap_or(0)
    }

    fn execute(&mut self, op: SimOp) -> Option<u16> {
        self.ops.push(op);
        self.buses.get_mut(op.bus as usize)?.execute(&op)
    }

    fn set_config(&mut self, device: PciAddress, register: u16, bytes: &[u8]) {
        for (i, &b) in bytes.iter().enumerate() {
            self.config.insert((device, register + i as u16), b);
        }
    }

    fn add_function(&mut self, function: Function) {
        let id = function.vendor as u32 | (function.device as u32) << 16;
        self.set_config(function.address, 0, &id.to_le_bytes());
        self.functions.push(function);
    }

    fn config_byte(&self, device: PciAddress, register: u16) -> u8 {
        self.config.get(&(device, register)).copied().unwrap_or(0)
    }

    fn ich_block(&self, port: u16) -> Option<(u8, u16)> {
        let Model::Ich { amd } = self.model else {
            return None;
        };
        let buses = if amd { 2 } else { 1 };
        (0..buses).find_map(|bus| {
            let base = SimChipset::ICH_BASE + bus as u16 * ich::AMD_BUS_STRIDE;
            (base..base + 7)
                .contains(&port)
                .then(|| (bus, port - base))
        })
    }

    fn ich_write(&mut self, bus: u8, register: u16, value: u8) {
        use ich::{control, regs, status};
        let base = SimChipset::ICH_BASE + bus as u16 * ich::AMD_BUS_STRIDE;
        let sts = self.port(base + regs::HST_STS);
        match register {
            regs::HST_STS => {
                self.ports.insert(base, sts & !value);
            }
            regs::HST_CNT if value & control::KILL != 0 => {
                self.aborts += 1;
                self.ports.insert(base, (sts & !status::HOST_BUSY) | status::FAILED);
            }
            regs::HST_CNT if value & control::START != 0 => {
                self.ports.insert(base + regs::HST_CNT, value);
                if self.stuck_busy {
                    self.ports.insert(base, sts | status::HOST_BUSY);
                    return;
                }
                let protocol = match value & 0x1C {
                    control::QUICK => Protocol::Quick,
                    control::BYTE => Protocol::Byte,
                    control::BYTE_DATA => Protocol::ByteData,
                    _ => Protocol::WordData,
                };
                let slva = self.port(base + regs::XMIT_SLVA);
                let op = SimOp {
                    bus,
                    address: slva >> 1,
                    direction: if slva & 1 != 0 { Direction::Read } else { Direction::Write },
                    protocol,
                    command: self.port(base + regs::HST_CMD),
                    data: if slva & 1 != 0 {
                        0
                    } else {
                        data_for(protocol, self.port(base + regs::HST_D0), self.port(base + regs::HST_D1))
                    },
                };
                match self.execute(op) {
                    Some(data) => {
                        if op.direction == Direction::Read {
                            self.ports.insert(base + regs::HST_D0, data as u8);
                            self.ports.insert(base + regs::HST_D1, (data >> 8) as u8);
                        }
                        self.ports.insert(base, status::INTR);
                    }
                    None => {
                        self.ports.insert(base, status::DEV_ERR);
                    }
                }
            }
            _ => {
                self.ports.insert(base + register, value);
            }
        }
    }

    fn nforce_write(&mut self, register: u16, value: u8) {
        use nforce::{protocol, regs, status};
        let base = SimChipset::NFORCE_BASE;
        self.ports.insert(base + register, value);
        if register != regs::PRTCL {
            return;
        }
        if self.stuck_busy {
            self.ports.insert(base + regs::STS, 0);
            return;
        }
        let read = value & protocol::READ != 0;
        let kind = match value & !protocol::READ {
            protocol::QUICK => Protocol::Quick,
            protocol::BYTE => Protocol::Byte,
            protocol::BYTE_DATA => Protocol::ByteData,
            _ => Protocol::WordData,
        };
        let op = SimOp {
            bus: 0,
            address: self.port(base + regs::ADDR) >> 1,
            direction: if read { Direction::Read } else { Direction::Write },
            protocol: kind,
            command: self.port(base + regs::CMD),
            data: if read {
                0
            } else {
                data_for(kind, self.port(base + regs::DATA0), self.port(base + regs::DATA1))
            },
        };
        match self.execute(op) {
            Some(data) => {
                if read {
                    self.ports.insert(base + regs::DATA0, data as u8);
                    self.ports.insert(base + regs::DATA1, (data >> 8) as u8);
                }
                self.ports.insert(base + regs::STS, status::DONE);
            }
            None => {
                self.ports.insert(base + regs::STS, status::ALARM);
            }
        }
    }

    fn skylake_command(&mut self, bus: u8, command: u32) {
        use skylake_x::{regs, status, WRITE_FLAG};
        let device = SimChipset::IMC_SMBUS;
        let stride = regs::BUS_STRIDE * bus as u16;
        if self.stuck_busy {
            self.set_config(device, regs::STATUS + stride, &[status::BUSY]);
            return;
        }
        let address_field = (command >> 8) as u8;
        let write = address_field & WRITE_FLAG != 0;
        let op = SimOp {
            bus,
            address: address_field & 0x7F,
            direction: if write { Direction::Write } else { Direction::Read },
            protocol: Protocol::ByteData,
            command: command as u8,
            data: if write {
                self.config_byte(device, regs::WRITE_DATA + stride) as u16
            } else {
                0
            },
        };
        match self.execute(op) {
            Some(data) => {
                if !write {
                    self.set_config(device, regs::READ_DATA + stride, &[data as u8]);
                }
                self.set_config(device, regs::STATUS + stride, &[status::DONE]);
            }
            None => {
                self.set_config(device, regs::STATUS + stride, &[status::DONE | status::NACK]);
            }
        }
    }
}

fn data_for(protocol: Protocol, d0: u8, d1: u8) -> u16 {
    match protocol {
        Protocol::WordData => d0 as u16 | (d1 as u16) << 8,
        Protocol::ByteData => d0 as u16,
        Protocol::Quick | Protocol::Byte => 0,
    }
}

/// Simulated chipset behind a privileged driver session.
pub struct SimChipset {
    state: Mutex<State>,
}

impl SimChipset {
    pub const ICH_BASE: u16 = 0x0B00;
    pub const NFORCE_BASE: u16 = 0x0C00;
    pub const SMBUS_FUNCTION: PciAddress = PciAddress {
        bus: 0,
        device: 0x1F,
        function: 4,
    };
    pub const LPC_BRIDGE: PciAddress = PciAddress {
        bus: 0,
        device: 0x1F,
        function: 0,
    };
    /// LPC bridge ID reported by the plain Intel model
    pub const INTEL_LPC: u16 = 0xA305;
    pub const IMC_SMBUS: PciAddress = PciAddress {
        bus: 0x16,
        device: 0x1E,
        function: 5,
    };

    /// Plain port and config memory with no controller behind it.
    pub fn scratch() -> Self {
        Self {
            state: Mutex::new(State::new(Model::Scratch)),
        }
    }

    /// Intel PCH, or AMD FCH with its PM decode registers set up.
    pub fn ich(amd: bool) -> Self {
        let mut state = State::new(Model::Ich { amd });
        let device = Self::SMBUS_FUNCTION;
        let (vendor_id, device_id) = if amd {
            (vendor::AMD, crate::smbus::pci_ids::AMD_FCH.0)
        } else {
            (vendor::INTEL, 0xA323)
        };
        state.add_function(Function {
            address: device,
            vendor: vendor_id,
            device: device_id,
            class: 0x0C,
            subclass: 0x05,
        });
        if !amd {
            state.add_function(Function {
                address: Self::LPC_BRIDGE,
                vendor: vendor::INTEL,
                device: Self::INTEL_LPC,
                class: 0x06,
                subclass: 0x01,
            });
        }
        let bar = (Self::ICH_BASE | 1).to_le_bytes();
        state.set_config(device, 0x20, &bar);
        if amd {
            state.set_config(device, 0x08, &[0x59]);
            state.pm[0] = 0x10;
            state.pm[1] = (Self::ICH_BASE >> 8) as u8;
        }
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn nforce() -> Self {
        let mut state = State::new(Model::Nforce);
        state.add_function(Function {
            address: Self::SMBUS_FUNCTION,
            vendor: vendor::NVIDIA,
            device: 0x0752,
            class: 0x0C,
            subclass: 0x05,
        });
        let bar = (Self::NFORCE_BASE | 1).to_le_bytes();
        state.set_config(Self::SMBUS_FUNCTION, 0x20, &bar);
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn skylake_x() -> Self {
        let mut state = State::new(Model::SkylakeX);
        state.add_function(Function {
            address: Self::IMC_SMBUS,
            vendor: vendor::INTEL,
            device: crate::smbus::pci_ids::SKYLAKE_X_IMC_SMBUS,
            class: 0x08,
            subclass: 0x80,
        });
        state.add_function(Function {
            address: Self::LPC_BRIDGE,
            vendor: vendor::INTEL,
            device: crate::smbus::pci_ids::SKYLAKE_X_PCH[0],
            class: 0x06,
            subclass: 0x01,
        });
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn add_eeprom(&self, bus: u8, address: u8, data: Vec<u8>, ddr5: bool) {
        self.state.lock().buses[bus as usize].eeproms.insert(
            address,
            SimEeprom {
                data,
                ddr5,
                page: 0,
                registers: [0; 128],
            },
        );
    }

    /// Raw image byte, ignoring paging.
    pub fn eeprom_byte(&self, bus: u8, address: u8, index: usize) -> u8 {
        self.state.lock().buses[bus as usize].eeproms[&address].data[index]
    }

    pub fn ee1004_page(&self, bus: u8) -> u8 {
        self.state.lock().buses[bus as usize].ee1004_page
    }

    pub fn ddr5_page(&self, bus: u8, address: u8) -> u8 {
        self.state.lock().buses[bus as usize].eeproms[&address].page
    }

    pub fn set_stuck_busy(&self, stuck: bool) {
        self.state.lock().stuck_busy = stuck;
    }

    pub fn set_spd_write_disable(&self, disabled: bool) {
        let value = if disabled { 0x10 } else { 0 };
        self.state
            .lock()
            .set_config(Self::SMBUS_FUNCTION, 0x40, &[value]);
    }

    pub fn ops(&self) -> Vec<SimOp> {
        self.state.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state.lock().ops.clear();
    }

    pub fn aborts(&self) -> usize {
        self.state.lock().aborts
    }

    pub fn port(&self, port: u16) -> u8 {
        self.state.lock().port(port)
    }
}

impl PortIo for SimChipset {
    fn read_port(&self, width: Width, port: u16) -> io::Result<u32> {
        let state = self.state.lock();
        if port == 0xCD7 {
            return Ok(state.pm[state.pm_index as usize] as u32);
        }
        let value = (0..width.bytes()).fold(0u32, |acc, i| {
            acc | (state.port(port.wrapping_add(i as u16)) as u32) << (8 * i)
        });
        Ok(value)
    }

    fn write_port(&self, width: Width, port: u16, value: u32) -> io::Result<()> {
        let mut state = self.state.lock();
        if port == 0xCD6 {
            state.pm_index = value as u8;
            return Ok(());
        }
        for i in 0..width.bytes() {
            let port = port.wrapping_add(i as u16);
            let byte = (value >> (8 * i)) as u8;
            if let Some((bus, register)) = state.ich_block(port) {
                state.ich_write(bus, register, byte);
            } else if state.model == Model::Nforce
                && (Self::NFORCE_BASE..Self::NFORCE_BASE + 6).contains(&port)
            {
                state.nforce_write(port - Self::NFORCE_BASE, byte);
            } else {
                state.ports.insert(port, byte);
            }
        }
        Ok(())
    }
}

impl PciConfig for SimChipset {
    fn read_pci_config(&self, width: Width, device: PciAddress, register: u16) -> io::Result<u32> {
        let state = self.state.lock();
        Ok((0..width.bytes()).fold(0u32, |acc, i| {
            acc | (state.config_byte(device, register + i as u16) as u32) << (8 * i)
        }))
    }

    fn write_pci_config(
        &self,
        width: Width,
        device: PciAddress,
        register: u16,
        value: u32,
    ) -> io::Result<()> {
        let mut state = self.state.lock();
        let bytes = value.to_le_bytes();
        state.set_config(device, register, &bytes[..width.bytes()]);
        if state.model == Model::SkylakeX && device == Self::IMC_SMBUS && width == Width::Dword {
            let command_regs = skylake_x::regs::COMMAND;
            for bus in 0..=1u8 {
                if register == command_regs + skylake_x::regs::BUS_STRIDE * bus as u16 {
                    state.skylake_command(bus, value);
                }
            }
        }
        Ok(())
    }

    fn find_pci_device_by_class(&self, class: u8, subclass: u8) -> io::Result<Option<PciAddress>> {
        Ok(self
            .state
            .lock()
            .functions
            .iter()
            .find(|f| f.class == class && f.subclass == subclass)
            .map(|f| f.address))
    }

    fn find_pci_device_by_id(&self, vendor: u16, device: u16) -> io::Result<Option<PciAddress>> {
        Ok(self
            .state
            .lock()
            .functions
            .iter()
            .find(|f| f.vendor == vendor && f.device == device)
            .map(|f| f.address))
    }
}
