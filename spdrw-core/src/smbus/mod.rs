//! Host SMBus access through chipset controller registers.
//!
//! A [`Controller`] knows one vendor's register layout and how to start a
//! transaction, read back its status, and fetch its data. [`SmbusTransport`]
//! owns one controller and drives every transaction through the same
//! sequence: prepare, start, settle, poll, collect. All register traffic for
//! one controller is serialized by the transport's lock.

pub mod ich;
pub mod nforce;
pub mod skylake_x;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::SmbusSettings;
use crate::error::{Error, Result};
use crate::hw_trait::{ConfigSpace, DriverSession, IoPortBlock, PciAddress, SpdBus, Width};
use crate::peripheral::spd::{self, ee1004, offsets, spd5};
use crate::tracing::prelude::*;
use crate::types::{BusAddress, BusStatus, Geometry, PageRule, SizeClass};

/// Settle time after starting a write to an EEPROM on ICH-class and
/// integrated controllers.
pub const EEPROM_WRITE_SETTLE: Duration = Duration::from_millis(10);

/// Highest bus number searched by [`SmbusTransport::find_buses`].
pub const MAX_BUS: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// SMBus protocol of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Quick,
    Byte,
    ByteData,
    WordData,
}

/// One SMBus transaction as handed to a controller.
///
/// For send-byte writes the value travels in `command`, which is also the
/// EEPROM byte offset for the data protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    pub address: u8,
    pub direction: Direction,
    pub protocol: Protocol,
    pub command: u8,
    pub data: u16,
}

impl Transaction {
    pub fn read(address: u8, protocol: Protocol, command: u8) -> Self {
        Self {
            address,
            direction: Direction::Read,
            protocol,
            command,
            data: 0,
        }
    }

    pub fn write(address: u8, protocol: Protocol, command: u8, data: u16) -> Self {
        Self {
            address,
            direction: Direction::Write,
            protocol,
            command,
            data,
        }
    }

    pub fn is_write(&self) -> bool {
        self.direction == Direction::Write
    }

    pub fn is_read(&self) -> bool {
        self.direction == Direction::Read
    }

    /// Whether the target is in the SPD EEPROM range 0x50..=0x57.
    pub fn targets_eeprom(&self) -> bool {
        BusAddress::new(self.address).is_ok()
    }

    fn offset(&self) -> Option<u16> {
        match self.protocol {
            Protocol::ByteData | Protocol::WordData => Some(self.command as u16),
            Protocol::Quick | Protocol::Byte => None,
        }
    }
}

/// A vendor-specific SMBus host controller.
pub trait Controller: Send + Sync {
    fn name(&self) -> &'static str;

    fn supports_bus(&self, bus: u8) -> bool;

    /// Put the controller into a known state before a transaction.
    fn prepare(&self, _bus: u8) -> Result<()> {
        Ok(())
    }

    /// Whether [`Controller::prepare`] must be followed by a wait for Ready.
    fn waits_for_ready(&self) -> bool {
        false
    }

    /// Load the registers and kick off `tx`.
    fn start(&self, bus: u8, tx: &Transaction) -> Result<()>;

    fn status(&self, bus: u8) -> Result<BusStatus>;

    /// Whether `status` ends the completion poll.
    fn is_done(&self, status: BusStatus) -> bool;

    /// Delay between starting a write and polling for completion.
    fn settle_delay(&self, tx: &Transaction) -> Duration {
        if tx.is_write() && tx.targets_eeprom() {
            EEPROM_WRITE_SETTLE
        } else {
            Duration::ZERO
        }
    }

    /// Data returned by a completed read.
    fn read_data(&self, bus: u8, tx: &Transaction) -> Result<u16>;

    /// Abandon a transaction that never completed.
    fn abort(&self, _bus: u8) -> Result<()> {
        Ok(())
    }
}

/// PCI vendor IDs the controller discovery understands.
pub mod vendor {
    pub const INTEL: u16 = 0x8086;
    pub const AMD: u16 = 0x1022;
    pub const NVIDIA: u16 = 0x10DE;
}

/// PCI identifiers used while locating a controller.
pub mod pci_ids {
    /// Serial bus controller class
    pub const CLASS_SERIAL_BUS: u8 = 0x0C;
    /// SMBus subclass
    pub const SUBCLASS_SMBUS: u8 = 0x05;
    /// Integrated memory controller SMBus function on Skylake-SP/X
    pub const SKYLAKE_X_IMC_SMBUS: u16 = 0x2085;
    /// Platform controller hubs whose DIMMs hang off the CPU SMBus
    pub const SKYLAKE_X_PCH: [u16; 2] = [0xA2D2, 0xA2D3];
    /// AMD FCH SMBus function and the first revision with the PM base
    pub const AMD_FCH: (u16, u8) = (0x790B, 0x49);
    /// AMD Hudson-2 SMBus function and the first revision with the PM base
    pub const AMD_HUDSON2: (u16, u8) = (0x780B, 0x41);
}

/// PCI configuration registers read during discovery.
mod config_regs {
    pub const REVISION_ID: u16 = 0x08;
    pub const BAR4: u16 = 0x20;
    pub const HOST_CONFIG: u16 = 0x40;
    /// HOST_CONFIG bit: SPD write disable
    pub const SPD_WD: u8 = 1 << 4;
}

/// AMD power-management index/data ports.
mod amd_pm {
    pub const INDEX: u16 = 0xCD6;
    pub const DATA: u16 = 0xCD7;
    pub const DECODE_EN: u8 = 0x00;
    pub const DECODE_EN1: u8 = 0x01;
    /// DECODE_EN bit: SMBus I/O decode enabled
    pub const SMBUS_EN: u8 = 1 << 4;
}

/// Vendor and device ID of the platform's chipset.
///
/// Mapping these onto product names is the caller's business; discovery only
/// needs the IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipsetInfo {
    pub vendor: u16,
    pub device: u16,
}

/// LPC bridge carrying the Intel PCH identity.
const LPC_BRIDGE: PciAddress = PciAddress {
    bus: 0,
    device: 0x1F,
    function: 0,
};

impl ChipsetInfo {
    /// Read the chipset identity through `session`.
    ///
    /// Intel platforms identify by their LPC bridge; everything else by the
    /// SMBus function itself.
    pub fn detect(session: &dyn DriverSession) -> Result<Self> {
        let lpc = Self::read_id(session, LPC_BRIDGE)?;
        if lpc.vendor == vendor::INTEL {
            return Ok(lpc);
        }
        let smbus = find_smbus_function(session)?;
        Self::read_id(session, smbus)
    }

    fn read_id(session: &dyn DriverSession, device: PciAddress) -> Result<Self> {
        let id = session.read_pci_config(Width::Dword, device, 0)?;
        Ok(Self {
            vendor: id as u16,
            device: (id >> 16) as u16,
        })
    }
}

/// Which controller variant to drive and where its registers live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerSpec {
    /// Intel ICH/PCH or AMD FCH I/O-port controller
    Ich { base: u16, amd: bool },
    /// CPU integrated memory-controller SMBus in PCI configuration space
    SkylakeX { device: PciAddress },
    /// NVIDIA nForce I/O-port controller
    Nforce { base: u16 },
}

/// Result of controller discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Located {
    pub spec: ControllerSpec,
    /// The chipset has locked out writes to SPD addresses.
    pub spd_write_disabled: bool,
}

impl ControllerSpec {
    /// Find the SMBus controller for `chipset` through `session`.
    pub fn locate(session: &dyn DriverSession, chipset: ChipsetInfo) -> Result<Located> {
        match chipset.vendor {
            vendor::INTEL if pci_ids::SKYLAKE_X_PCH.contains(&chipset.device) => {
                let device = session
                    .find_pci_device_by_id(vendor::INTEL, pci_ids::SKYLAKE_X_IMC_SMBUS)?
                    .ok_or_else(|| Error::Config("CPU SMBus function not found".into()))?;
                debug!(%device, "using integrated memory controller SMBus");
                Ok(Located {
                    spec: ControllerSpec::SkylakeX { device },
                    spd_write_disabled: false,
                })
            }
            vendor::INTEL | vendor::NVIDIA => {
                let device = find_smbus_function(session)?;
                let bar = session.read_pci_config(
                    Width::Word,
                    device,
                    config_regs::BAR4,
                )? as u16;
                if bar & 1 == 0 {
                    return Err(Error::Config(format!(
                        "SMBus function {device} has no I/O BAR (0x{bar:04X})"
                    )));
                }
                let base = bar & !1;
                let host_config = session.read_pci_config(
                    Width::Byte,
                    device,
                    config_regs::HOST_CONFIG,
                )? as u8;
                let spec = if chipset.vendor == vendor::NVIDIA {
                    ControllerSpec::Nforce { base }
                } else {
                    ControllerSpec::Ich { base, amd: false }
                };
                let spd_write_disabled =
                    chipset.vendor == vendor::INTEL && host_config & config_regs::SPD_WD != 0;
                debug!(%device, base = format_args!("0x{base:04X}"), spd_write_disabled, "found SMBus controller");
                Ok(Located {
                    spec,
                    spd_write_disabled,
                })
            }
            vendor::AMD => {
                let device = find_smbus_function(session)?;
                let revision = session.read_pci_config(
                    Width::Byte,
                    device,
                    config_regs::REVISION_ID,
                )? as u8;
                let supported = [pci_ids::AMD_FCH, pci_ids::AMD_HUDSON2]
                    .iter()
                    .any(|&(id, min_rev)| id == chipset.device && revision >= min_rev);
                if !supported {
                    return Err(Error::Config(format!(
                        "AMD SMBus 0x{:04X} rev 0x{revision:02X} not supported",
                        chipset.device
                    )));
                }
                let decode = read_pm(session, amd_pm::DECODE_EN)?;
                let high = read_pm(session, amd_pm::DECODE_EN1)?;
                let base = (high as u16) << 8;
                if decode & amd_pm::SMBUS_EN == 0 || base == 0 {
                    return Err(Error::Config("AMD SMBus I/O decode disabled".into()));
                }
                debug!(base = format_args!("0x{base:04X}"), "found AMD FCH SMBus");
                Ok(Located {
                    spec: ControllerSpec::Ich { base, amd: true },
                    spd_write_disabled: false,
                })
            }
            other => Err(Error::Config(format!(
                "no SMBus support for chipset vendor 0x{other:04X}"
            ))),
        }
    }

    /// Instantiate the controller.
    pub fn build(self, session: Arc<dyn DriverSession>) -> Box<dyn Controller> {
        match self {
            ControllerSpec::Ich { base, amd } => {
                Box::new(ich::Ich::new(IoPortBlock::new(session, base), amd))
            }
            ControllerSpec::SkylakeX { device } => {
                Box::new(skylake_x::SkylakeX::new(ConfigSpace::new(session, device)))
            }
            ControllerSpec::Nforce { base } => {
                Box::new(nforce::Nforce::new(IoPortBlock::new(session, base)))
            }
        }
    }
}

fn find_smbus_function(session: &dyn DriverSession) -> Result<PciAddress> {
    session
        .find_pci_device_by_class(pci_ids::CLASS_SERIAL_BUS, pci_ids::SUBCLASS_SMBUS)?
        .ok_or_else(|| Error::Config("no SMBus PCI function".into()))
}

fn read_pm(session: &dyn DriverSession, index: u8) -> Result<u8> {
    session.write_port(Width::Byte, amd_pm::INDEX, index as u32)?;
    Ok(session.read_port(Width::Byte, amd_pm::DATA)? as u8)
}

/// Page registers as last written, per bus for EE1004 and per module for
/// SPD5 hubs.
#[derive(Debug, Default)]
struct PageCache {
    ee1004: HashMap<u8, u8>,
    hub: HashMap<(u8, u8), u8>,
}

impl PageCache {
    fn get(&self, bus: u8, address: BusAddress, rule: PageRule) -> Option<u8> {
        match rule {
            PageRule::Flat => Some(0),
            PageRule::Ee1004 => self.ee1004.get(&bus).copied(),
            PageRule::Spd5Hub => self.hub.get(&(bus, address.raw())).copied(),
        }
    }

    /// The page `tx` selects, keyed the way it is cached.
    fn selection(tx: &Transaction) -> Option<(Option<u8>, u8)> {
        if !tx.is_write() {
            return None;
        }
        match tx.protocol {
            Protocol::Byte if tx.address == ee1004::SPA0 || tx.address == ee1004::SPA1 => {
                Some((None, tx.address - ee1004::SPA0))
            }
            Protocol::ByteData if tx.command == spd5::MR11 && tx.targets_eeprom() => {
                Some((Some(tx.address), tx.data as u8))
            }
            _ => None,
        }
    }

    /// Forget the page `tx` is about to change.
    fn invalidate(&mut self, bus: u8, tx: &Transaction) {
        match Self::selection(tx) {
            Some((None, _)) => {
                self.ee1004.remove(&bus);
            }
            Some((Some(address), _)) => {
                self.hub.remove(&(bus, address));
            }
            None => {}
        }
    }

    /// Record the page a completed `tx` selected.
    fn record(&mut self, bus: u8, tx: &Transaction) {
        match Self::selection(tx) {
            Some((None, page)) => {
                self.ee1004.insert(bus, page);
            }
            Some((Some(address), page)) => {
                self.hub.insert((bus, address), page);
            }
            None => {}
        }
    }
}

struct Inner {
    controller: Box<dyn Controller>,
    bus: u8,
    pages: PageCache,
}

/// SMBus transport over one host controller.
pub struct SmbusTransport {
    inner: Mutex<Inner>,
    poll_timeout: Duration,
    spd_write_disabled: bool,
}

impl SmbusTransport {
    pub fn new(controller: Box<dyn Controller>, settings: &SmbusSettings) -> Self {
        Self {
            inner: Mutex::new(Inner {
                controller,
                bus: 0,
                pages: PageCache::default(),
            }),
            poll_timeout: settings.poll_timeout(),
            spd_write_disabled: false,
        }
    }

    /// Locate the chipset controller and pick the first bus with modules.
    pub fn open(
        session: Arc<dyn DriverSession>,
        chipset: ChipsetInfo,
        settings: &SmbusSettings,
    ) -> Result<Self> {
        let located = ControllerSpec::locate(session.as_ref(), chipset)?;
        let mut transport = Self::new(located.spec.build(session), settings);
        transport.spd_write_disabled = located.spd_write_disabled;
        if transport.spd_write_disabled {
            warn!("chipset reports SPD write disable; EEPROM writes will be refused");
        }

        let buses = transport.find_buses()?;
        let bus = match settings.bus {
            Some(preferred) => preferred,
            None => buses.first().copied().unwrap_or(0),
        };
        transport.set_bus(bus)?;
        info!(
            controller = transport.controller_name(),
            bus,
            buses = ?buses,
            "SMBus transport ready"
        );
        Ok(transport)
    }

    pub fn controller_name(&self) -> &'static str {
        self.inner.lock().controller.name()
    }

    pub fn spd_write_disabled(&self) -> bool {
        self.spd_write_disabled
    }

    pub fn bus(&self) -> u8 {
        self.inner.lock().bus
    }

    pub fn set_bus(&self, bus: u8) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.controller.supports_bus(bus) {
            return Err(Error::Config(format!(
                "{} controller has no bus {bus}",
                inner.controller.name()
            )));
        }
        inner.bus = bus;
        Ok(())
    }

    /// Buses with at least one responding EEPROM.
    ///
    /// The whole sweep runs under the transport lock against explicit bus
    /// numbers; the current bus never changes.
    pub fn find_buses(&self) -> Result<Vec<u8>> {
        let inner = self.inner.lock();
        let controller = inner.controller.as_ref();
        let found = (0..=MAX_BUS)
            .filter(|&bus| controller.supports_bus(bus))
            .filter(|&bus| {
                BusAddress::all().any(|address| {
                    let tx = Transaction::read(address.raw(), Protocol::Quick, 0);
                    self.run(controller, bus, &tx).is_ok()
                })
            })
            .collect();
        Ok(found)
    }

    /// EEPROMs responding on the current bus.
    pub fn scan(&self) -> Vec<BusAddress> {
        BusAddress::all()
            .filter(|address| self.probe(address.raw()))
            .collect()
    }

    /// Quick read; any failure means absent.
    pub fn probe(&self, address: u8) -> bool {
        match self.execute(Transaction::read(address, Protocol::Quick, 0)) {
            Ok(_) => true,
            Err(e) => {
                trace!(address = format_args!("0x{address:02X}"), error = %e, "probe");
                false
            }
        }
    }

    pub fn read_byte(&self, address: u8) -> Result<u8> {
        Ok(self.execute(Transaction::read(address, Protocol::Byte, 0))? as u8)
    }

    pub fn read_byte_data(&self, address: u8, offset: u8) -> Result<u8> {
        Ok(self.execute(Transaction::read(address, Protocol::ByteData, offset))? as u8)
    }

    pub fn read_word_data(&self, address: u8, offset: u8) -> Result<u16> {
        self.execute(Transaction::read(address, Protocol::WordData, offset))
    }

    pub fn write_byte(&self, address: u8, value: u8) -> Result<()> {
        self.execute(Transaction::write(address, Protocol::Byte, value, 0))
            .map(drop)
    }

    pub fn write_byte_data(&self, address: u8, offset: u8, value: u8) -> Result<()> {
        self.execute(Transaction::write(
            address,
            Protocol::ByteData,
            offset,
            value as u16,
        ))
        .map(drop)
    }

    pub fn write_word_data(&self, address: u8, offset: u8, value: u16) -> Result<()> {
        self.execute(Transaction::write(address, Protocol::WordData, offset, value))
            .map(drop)
    }

    pub fn quick_write(&self, address: u8) -> Result<()> {
        self.execute(Transaction::write(address, Protocol::Quick, 0, 0))
            .map(drop)
    }

    fn execute(&self, tx: Transaction) -> Result<u16> {
        let mut inner = self.inner.lock();
        self.run_tracked(&mut inner, &tx)
    }

    /// Run `tx` on the current bus, keeping the page cache in step with any
    /// page select it performs.
    fn run_tracked(&self, inner: &mut Inner, tx: &Transaction) -> Result<u16> {
        let bus = inner.bus;
        inner.pages.invalidate(bus, tx);
        let value = self.run(inner.controller.as_ref(), bus, tx)?;
        inner.pages.record(bus, tx);
        Ok(value)
    }

    /// Select the page holding `offset` if the bus is elsewhere and return
    /// the in-page wire offset.
    fn locate(
        &self,
        inner: &mut Inner,
        address: BusAddress,
        rule: PageRule,
        offset: u16,
    ) -> Result<u8> {
        if rule == PageRule::Flat {
            return Self::check_offset(offset);
        }
        let page = rule.page_of(offset);
        if inner.pages.get(inner.bus, address, rule) != Some(page) {
            self.select_page(inner, address, rule, page)?;
        }
        Ok(rule.in_page(offset))
    }

    fn select_page(
        &self,
        inner: &mut Inner,
        address: BusAddress,
        rule: PageRule,
        page: u8,
    ) -> Result<()> {
        let tx = match rule {
            PageRule::Flat => return Ok(()),
            PageRule::Ee1004 => {
                if page > 1 {
                    return Err(Error::Config(format!("EE1004 page {page} out of range")));
                }
                Transaction::write(ee1004::spa(page), Protocol::Byte, 0, 0)
            }
            PageRule::Spd5Hub => {
                if page > spd5::MAX_PAGE {
                    return Err(Error::Config(format!("SPD5 page {page} out of range")));
                }
                Transaction::write(address.raw(), Protocol::ByteData, spd5::MR11, page as u16)
            }
        };
        debug!(%address, ?rule, page, bus = inner.bus, "page select");
        self.run_tracked(inner, &tx).map(drop)
    }

    fn run(&self, controller: &dyn Controller, bus: u8, tx: &Transaction) -> Result<u16> {
        if !controller.supports_bus(bus) {
            return Err(Error::Config(format!(
                "{} controller has no bus {bus}",
                controller.name()
            )));
        }

        controller.prepare(bus)?;
        if controller.waits_for_ready() {
            self.poll(controller, bus, tx, |status| status == BusStatus::Ready, "controller idle")?;
        }

        controller.start(bus, tx)?;
        let settle = controller.settle_delay(tx);
        if !settle.is_zero() {
            thread::sleep(settle);
        }

        let status = match self.poll(
            controller,
            bus,
            tx,
            |status| controller.is_done(status),
            "transaction completion",
        ) {
            Ok(status) => status,
            Err(e) => {
                if let Err(abort) = controller.abort(bus) {
                    warn!(error = %abort, "failed to abort stuck transaction");
                }
                return Err(e);
            }
        };

        trace!(
            bus,
            address = format_args!("0x{:02X}", tx.address),
            direction = ?tx.direction,
            protocol = ?tx.protocol,
            command = format_args!("0x{:02X}", tx.command),
            %status,
            "SMBus transaction"
        );

        if status == BusStatus::Error {
            return Err(Error::Bus {
                address: tx.address,
                offset: tx.offset(),
                status,
            });
        }

        if tx.is_read() {
            controller.read_data(bus, tx)
        } else {
            Ok(0)
        }
    }

    fn poll(
        &self,
        controller: &dyn Controller,
        bus: u8,
        tx: &Transaction,
        done: impl Fn(BusStatus) -> bool,
        what: &str,
    ) -> Result<BusStatus> {
        let started = Instant::now();
        loop {
            let status = controller.status(bus)?;
            if done(status) {
                return Ok(status);
            }
            if started.elapsed() >= self.poll_timeout {
                debug!(
                    address = format_args!("0x{:02X}", tx.address),
                    %status,
                    "SMBus poll timed out"
                );
                return Err(Error::Timeout {
                    what: format!("{what} at 0x{:02X}", tx.address),
                    elapsed_ms: started.elapsed().as_millis(),
                });
            }
            thread::yield_now();
        }
    }

    fn check_offset(offset: u16) -> Result<u8> {
        u8::try_from(offset).map_err(|_| {
            Error::Config(format!(
                "offset 0x{offset:04X} needs a page select on this transport"
            ))
        })
    }

    fn check_writable(&self) -> Result<()> {
        if self.spd_write_disabled {
            return Err(Error::Config("SPD writes are disabled by the chipset".into()));
        }
        Ok(())
    }

    fn rps_address(block: u8) -> Result<u8> {
        ee1004::RPS
            .get(block as usize)
            .copied()
            .ok_or_else(|| Error::Config(format!("write-protect block {block} out of range")))
    }

    /// ACK means the protection is clear, NAK means it is set.
    fn protection_status(&self, select: u8) -> Result<bool> {
        match self.read_byte(select) {
            Ok(_) => Ok(false),
            Err(Error::Bus { .. }) => Ok(true),
            Err(e) => Err(e),
        }
    }
}

impl SpdBus for SmbusTransport {
    fn probe(&self, address: u8) -> bool {
        SmbusTransport::probe(self, address)
    }

    fn read_block(
        &self,
        address: BusAddress,
        rule: PageRule,
        offset: u16,
        buf: &mut [u8],
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        for (i, byte) in buf.iter_mut().enumerate() {
            let wire = self.locate(&mut inner, address, rule, offset + i as u16)?;
            let tx = Transaction::read(address.raw(), Protocol::ByteData, wire);
            *byte = self.run_tracked(&mut inner, &tx)? as u8;
        }
        Ok(())
    }

    fn write_block(
        &self,
        address: BusAddress,
        rule: PageRule,
        offset: u16,
        data: &[u8],
    ) -> Result<()> {
        self.check_writable()?;
        let mut inner = self.inner.lock();
        for (i, &value) in data.iter().enumerate() {
            let wire = self.locate(&mut inner, address, rule, offset + i as u16)?;
            let tx = Transaction::write(address.raw(), Protocol::ByteData, wire, value as u16);
            self.run_tracked(&mut inner, &tx)?;
        }
        Ok(())
    }

    fn reset_page(&self, address: BusAddress, rule: PageRule) -> Result<()> {
        let mut inner = self.inner.lock();
        self.select_page(&mut inner, address, rule, 0)
    }

    fn current_page(&self, address: BusAddress, rule: PageRule) -> Option<u8> {
        let inner = self.inner.lock();
        inner.pages.get(inner.bus, address, rule)
    }

    fn discover_geometry(&self, address: BusAddress) -> Result<Geometry> {
        if self.probe(spd::hub_address(address)) {
            return Ok(Geometry::new(SizeClass::B1024, true));
        }
        let paged = self.probe(ee1004::SPA0);
        // Key byte 2 lives in page 0 on paged parts.
        let mut inner = self.inner.lock();
        if paged {
            self.select_page(&mut inner, address, PageRule::Ee1004, 0)?;
        }
        let tx = Transaction::read(address.raw(), Protocol::ByteData, offsets::MEMORY_TYPE as u8);
        let code = self.run_tracked(&mut inner, &tx)? as u8;
        drop(inner);

        let geometry = Geometry::new(spd::size_for_type_byte(code), false);
        debug!(%address, memory_type = code, size = %geometry.size, "discovered EEPROM");
        Ok(geometry)
    }

    fn scan(&self) -> Result<Vec<BusAddress>> {
        Ok(SmbusTransport::scan(self))
    }

    fn rswp(&self, _address: BusAddress, block: u8) -> Result<bool> {
        self.protection_status(Self::rps_address(block)?)
    }

    fn set_rswp(&self, _address: BusAddress, block: u8) -> Result<()> {
        let select = Self::rps_address(block)?;
        SmbusTransport::write_byte_data(self, select, 0, 0)
    }

    fn clear_rswp(&self, _address: BusAddress) -> Result<()> {
        SmbusTransport::write_byte_data(self, ee1004::CWP, 0, 0)
    }

    fn pswp(&self, address: BusAddress) -> Result<bool> {
        self.protection_status(spd::pswp_address(address))
    }

    fn set_pswp(&self, address: BusAddress) -> Result<()> {
        SmbusTransport::write_byte_data(self, spd::pswp_address(address), 0, 0)
    }
}
