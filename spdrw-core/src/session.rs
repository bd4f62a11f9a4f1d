//! One place to hold whichever SPD transport is connected.

use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::config::{SerialSettings, SmbusSettings};
use crate::error::{Error, Result};
use crate::hw_trait::{DriverSession, SpdBus};
use crate::mgmt_protocol::spd_proxy::{Alert, ConnectionLost, SerialProxy};
use crate::peripheral::eeprom::EepromAddressor;
use crate::smbus::{ChipsetInfo, SmbusTransport};
use crate::tracing::prelude::*;
use crate::transport::serial::{self, SerialLine};
use crate::types::{BusAddress, Geometry, PageRule};

enum Backend {
    Hardware(SmbusTransport),
    Serial(SerialProxy),
}

/// A connected transport: the host SMBus controller or a serial proxy.
pub struct TransportSession {
    backend: Backend,
}

impl TransportSession {
    /// Connect to the proxy named in `settings`, or the first one found.
    pub fn connect_serial(settings: &SerialSettings) -> Result<Self> {
        let proxy = match &settings.port {
            Some(port) => SerialProxy::open(port, settings)?,
            None => serial::available_ports()?
                .into_iter()
                .find_map(|port| SerialProxy::open(&port, settings).ok())
                .ok_or_else(|| Error::Config("no SPD proxy found on any serial port".into()))?,
        };
        Ok(Self {
            backend: Backend::Serial(proxy),
        })
    }

    /// Connect to a proxy over an already open line.
    pub fn connect_serial_line(line: Box<dyn SerialLine>, settings: &SerialSettings) -> Result<Self> {
        Ok(Self {
            backend: Backend::Serial(SerialProxy::connect(line, settings)?),
        })
    }

    /// Drive the chipset SMBus controller through a privileged session.
    pub fn connect_hardware(
        driver: Arc<dyn DriverSession>,
        settings: &SmbusSettings,
    ) -> Result<Self> {
        let chipset = ChipsetInfo::detect(driver.as_ref())?;
        debug!(
            vendor = format_args!("0x{:04X}", chipset.vendor),
            device = format_args!("0x{:04X}", chipset.device),
            "chipset"
        );
        Ok(Self {
            backend: Backend::Hardware(SmbusTransport::open(driver, chipset, settings)?),
        })
    }

    /// Connect the way `config` asks: a configured serial port wins,
    /// otherwise the host controller through `/dev/port`.
    #[cfg(target_os = "linux")]
    pub fn connect(config: &crate::config::Config) -> Result<Self> {
        if config.serial.port.is_some() {
            return Self::connect_serial(&config.serial);
        }
        let driver = crate::transport::devport::DevPortSession::open()?;
        Self::connect_hardware(Arc::new(driver), &config.smbus)
    }

    pub fn is_serial(&self) -> bool {
        matches!(self.backend, Backend::Serial(_))
    }

    pub fn serial_proxy(&self) -> Option<&SerialProxy> {
        match &self.backend {
            Backend::Serial(proxy) => Some(proxy),
            Backend::Hardware(_) => None,
        }
    }

    pub fn hardware(&self) -> Option<&SmbusTransport> {
        match &self.backend {
            Backend::Hardware(transport) => Some(transport),
            Backend::Serial(_) => None,
        }
    }

    /// Switch the host controller to another bus.
    pub fn select_bus(&self, bus: u8) -> Result<()> {
        match &self.backend {
            Backend::Hardware(transport) => transport.set_bus(bus),
            Backend::Serial(_) => Err(Error::Config(
                "the serial proxy has a single bus".into(),
            )),
        }
    }

    /// Page-aware access to the EEPROM at `address`.
    pub fn eeprom(&self, address: BusAddress) -> Result<EepromAddressor<'_, dyn SpdBus>> {
        EepromAddressor::new(self.bus(), address)
    }

    /// Alerts from the proxy. The host controller never raises any.
    pub fn on_alert(&self) -> Receiver<Alert> {
        match &self.backend {
            Backend::Serial(proxy) => proxy.subscribe_alerts(),
            Backend::Hardware(_) => crossbeam_channel::never(),
        }
    }

    /// Fires once if the proxy disappears.
    pub fn on_connection_lost(&self) -> Receiver<ConnectionLost> {
        match &self.backend {
            Backend::Serial(proxy) => proxy.subscribe_connection_lost(),
            Backend::Hardware(_) => crossbeam_channel::never(),
        }
    }

    pub fn disconnect(self) {
        match self.backend {
            Backend::Serial(proxy) => proxy.disconnect(),
            Backend::Hardware(transport) => {
                debug!(controller = transport.controller_name(), "released SMBus controller")
            }
        }
    }

    fn bus(&self) -> &(dyn SpdBus + 'static) {
        match &self.backend {
            Backend::Hardware(transport) => transport,
            Backend::Serial(proxy) => proxy,
        }
    }
}

impl SpdBus for TransportSession {
    fn probe(&self, address: u8) -> bool {
        self.bus().probe(address)
    }

    fn read_block(
        &self,
        address: BusAddress,
        rule: PageRule,
        offset: u16,
        buf: &mut [u8],
    ) -> Result<()> {
        self.bus().read_block(address, rule, offset, buf)
    }

    fn write_block(
        &self,
        address: BusAddress,
        rule: PageRule,
        offset: u16,
        data: &[u8],
    ) -> Result<()> {
        self.bus().write_block(address, rule, offset, data)
    }

    fn max_read_chunk(&self) -> usize {
        self.bus().max_read_chunk()
    }

    fn max_write_chunk(&self) -> usize {
        self.bus().max_write_chunk()
    }

    fn host_paging(&self) -> bool {
        self.bus().host_paging()
    }

    fn reset_page(&self, address: BusAddress, rule: PageRule) -> Result<()> {
        self.bus().reset_page(address, rule)
    }

    fn current_page(&self, address: BusAddress, rule: PageRule) -> Option<u8> {
        self.bus().current_page(address, rule)
    }

    fn discover_geometry(&self, address: BusAddress) -> Result<Geometry> {
        self.bus().discover_geometry(address)
    }

    fn scan(&self) -> Result<Vec<BusAddress>> {
        self.bus().scan()
    }

    fn rswp(&self, address: BusAddress, block: u8) -> Result<bool> {
        self.bus().rswp(address, block)
    }

    fn set_rswp(&self, address: BusAddress, block: u8) -> Result<()> {
        self.bus().set_rswp(address, block)
    }

    fn clear_rswp(&self, address: BusAddress) -> Result<()> {
        self.bus().clear_rswp(address)
    }

    fn pswp(&self, address: BusAddress) -> Result<bool> {
        self.bus().pswp(address)
    }

    fn set_pswp(&self, address: BusAddress) -> Result<()> {
        self.bus().set_pswp(address)
    }
}
