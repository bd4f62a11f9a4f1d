//! Serial proxy transport.
//!
//! A USB CDC microcontroller sits on the module's SMBus and executes a fixed
//! command set on our behalf. Requests are raw command bytes; replies come
//! back as checksummed DATA frames, interleaved with unsolicited ALERT
//! frames when modules are hot-plugged or the I2C clock changes.
//!
//! Each connected [`SerialProxy`] runs two threads: the line reader in
//! [`channel`] and the watchdog, which fans out alerts, refreshes the cached
//! bus state after hot-plug, and notices when the device disappears.

pub mod channel;
pub mod command;
pub mod frame;
mod watchdog;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

pub use channel::ControlChannel;
pub use command::{Alert, Command, RswpSupport};

use crate::config::SerialSettings;
use crate::error::{Error, Result};
use crate::hw_trait::SpdBus;
use crate::tracing::prelude::*;
use crate::transport::serial::{self, SerialLine};
use crate::types::{BusAddress, BusStatus, Geometry, PageRule, SizeClass};
use command::{clock, MAX_PAGE_WRITE, MAX_READ, NAME_LENGTH};

/// Notification that a proxy session ended underneath its users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionLost {
    pub port: String,
    pub reason: String,
}

#[derive(Default)]
struct Caches {
    addresses: Mutex<Option<Vec<BusAddress>>>,
    rswp_support: Mutex<Option<RswpSupport>>,
}

impl Caches {
    fn invalidate(&self) {
        *self.addresses.lock() = None;
        *self.rswp_support.lock() = None;
    }
}

#[derive(Default)]
struct Subscribers {
    alerts: Mutex<Vec<Sender<Alert>>>,
    lost: Mutex<Vec<Sender<ConnectionLost>>>,
}

impl Subscribers {
    fn publish_alert(&self, alert: Alert) {
        self.alerts.lock().retain(|tx| tx.send(alert).is_ok());
    }

    fn publish_lost(&self, event: ConnectionLost) {
        for tx in self.lost.lock().drain(..) {
            let _ = tx.send(event.clone());
        }
    }
}

/// State shared between the caller-facing handle and the watchdog.
struct Shared {
    channel: ControlChannel,
    caches: Caches,
    subscribers: Subscribers,
    /// Set once the session has ended, by disconnect or by loss
    ended: AtomicBool,
}

impl Shared {
    fn scan_bus(&self) -> Result<Vec<BusAddress>> {
        let mask = self.channel.query_byte(Command::ScanBus)?;
        let found = decode_scan(mask);
        *self.caches.addresses.lock() = Some(found.clone());
        Ok(found)
    }

    fn rswp_support(&self) -> Result<RswpSupport> {
        let bits = self.channel.query_byte(Command::RswpSupport)?;
        let support = RswpSupport::from_bits_truncate(bits);
        *self.caches.rswp_support.lock() = Some(support);
        Ok(support)
    }

    fn refresh_caches(&self) -> Result<()> {
        let found = self.scan_bus()?;
        let support = self.rswp_support()?;
        info!(addresses = ?found, rswp = ?support, "bus state refreshed");
        Ok(())
    }

    /// End the session after the line went away. Only the first call acts.
    fn connection_lost(&self, reason: String) {
        if self.ended.swap(true, Ordering::AcqRel) {
            return;
        }
        let port = self.channel.port_name().to_string();
        error!(%port, %reason, "proxy connection lost");
        self.channel.close();
        self.channel
            .fail_pending(Error::ConnectionLost(format!("{port}: {reason}")));
        self.subscribers.publish_lost(ConnectionLost { port, reason });
    }
}

fn decode_scan(mask: u8) -> Vec<BusAddress> {
    (0..8u8)
        .filter(|i| mask & (1 << i) != 0)
        .filter_map(|i| BusAddress::from_index(i).ok())
        .collect()
}

fn nak(address: BusAddress, offset: Option<u16>) -> Error {
    Error::Bus {
        address: address.raw(),
        offset,
        status: BusStatus::Error,
    }
}

/// A connected SPD proxy device.
pub struct SerialProxy {
    shared: Arc<Shared>,
    stop: Mutex<Option<Sender<()>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl SerialProxy {
    /// Start a session on an already open line and run the link test.
    pub fn connect(line: Box<dyn SerialLine>, settings: &SerialSettings) -> Result<Self> {
        let probe = line.try_clone_line()?;
        let parts = ControlChannel::start(line, settings.timeout())?;
        let shared = Arc::new(Shared {
            channel: parts.channel,
            caches: Caches::default(),
            subscribers: Subscribers::default(),
            ended: AtomicBool::new(false),
        });
        let (stop_tx, stop_rx) = unbounded();

        let proxy = SerialProxy {
            shared: shared.clone(),
            stop: Mutex::new(Some(stop_tx)),
            threads: Mutex::new(vec![parts.handle]),
        };
        let watchdog = watchdog::spawn(
            shared,
            probe,
            parts.alerts,
            parts.faults,
            stop_rx,
            settings.watchdog_interval(),
        )?;
        proxy.threads.lock().push(watchdog);

        if !proxy.test()? {
            return Err(Error::Protocol(format!(
                "{} failed the link test",
                proxy.port_name()
            )));
        }
        info!(port = proxy.port_name(), "SPD proxy connected");
        Ok(proxy)
    }

    /// Open `path` and connect.
    pub fn open(path: &str, settings: &SerialSettings) -> Result<Self> {
        let line = serial::open_port(path, settings)?;
        Self::connect(line, settings)
    }

    /// Every serial port on this host that answers the link test.
    pub fn find(settings: &SerialSettings) -> Result<Vec<String>> {
        let mut found = Vec::new();
        for port in serial::available_ports()? {
            match Self::open(&port, settings) {
                Ok(proxy) => {
                    proxy.disconnect();
                    found.push(port);
                }
                Err(e) => debug!(%port, error = %e, "not an SPD proxy"),
            }
        }
        Ok(found)
    }

    /// End the session and wait for its threads.
    ///
    /// Connection-lost subscribers are not notified.
    pub fn disconnect(&self) {
        if !self.shared.ended.swap(true, Ordering::AcqRel) {
            debug!(port = self.port_name(), "disconnecting");
        }
        self.shared.channel.close();
        self.shared
            .channel
            .fail_pending(Error::ConnectionLost("disconnected".into()));
        drop(self.stop.lock().take());
        let current = std::thread::current().id();
        for handle in self.threads.lock().drain(..) {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.channel.is_connected()
    }

    pub fn port_name(&self) -> &str {
        self.shared.channel.port_name()
    }

    pub fn bytes_sent(&self) -> u64 {
        self.shared.channel.bytes_sent()
    }

    pub fn bytes_received(&self) -> u64 {
        self.shared.channel.bytes_received()
    }

    pub fn subscribe_alerts(&self) -> Receiver<Alert> {
        let (tx, rx) = unbounded();
        self.shared.subscribers.alerts.lock().push(tx);
        rx
    }

    pub fn subscribe_connection_lost(&self) -> Receiver<ConnectionLost> {
        let (tx, rx) = unbounded();
        self.shared.subscribers.lost.lock().push(tx);
        rx
    }

    /// Addresses from the last scan, if still valid.
    pub fn cached_addresses(&self) -> Option<Vec<BusAddress>> {
        self.shared.caches.addresses.lock().clone()
    }

    pub fn test(&self) -> Result<bool> {
        self.shared.channel.query_bool(Command::Test)
    }

    pub fn version(&self) -> Result<i32> {
        let payload = self.shared.channel.execute(Command::Version)?;
        let bytes: [u8; 4] = payload.as_ref().try_into().map_err(|_| {
            Error::Protocol(format!("version reply is {} bytes", payload.len()))
        })?;
        Ok(i32::from_le_bytes(bytes))
    }

    pub fn name(&self) -> Result<String> {
        let payload = self.shared.channel.execute(Command::GetName)?;
        Ok(String::from_utf8_lossy(&payload).trim().to_string())
    }

    /// Store a new device name. Returns false if it was already set.
    pub fn set_name(&self, name: &str) -> Result<bool> {
        let name = name.trim();
        if name.is_empty() || name.len() > NAME_LENGTH || !name.is_ascii() {
            return Err(Error::Config(format!(
                "device name must be 1 to {NAME_LENGTH} ASCII characters"
            )));
        }
        if self.name()? == name {
            return Ok(false);
        }
        self.shared
            .channel
            .query_bool(Command::SetName(name.to_string()))
    }

    /// Current I2C clock in kHz.
    pub fn i2c_clock(&self) -> Result<u16> {
        let fast = self.shared.channel.query_bool(Command::GetI2cClock)?;
        Ok(if fast { clock::FAST } else { clock::STANDARD })
    }

    pub fn set_i2c_clock(&self, fast: bool) -> Result<()> {
        if self
            .shared
            .channel
            .query_bool(Command::SetI2cClock { fast })?
        {
            Ok(())
        } else {
            Err(Error::Io(std::io::Error::other("device refused clock change")))
        }
    }

    /// Memory generations the adapter can write-protect. Cached.
    pub fn rswp_support(&self) -> Result<RswpSupport> {
        if let Some(support) = *self.shared.caches.rswp_support.lock() {
            return Ok(support);
        }
        self.shared.rswp_support()
    }

    /// Responding EEPROM addresses. Cached until the next hot-plug alert.
    pub fn scan_bus(&self) -> Result<Vec<BusAddress>> {
        if let Some(found) = self.cached_addresses() {
            return Ok(found);
        }
        self.shared.scan_bus()
    }

    pub fn probe_address(&self, address: u8) -> Result<bool> {
        self.shared
            .channel
            .query_bool(Command::ProbeAddress(address))
    }

    pub fn detect_ddr4(&self, address: BusAddress) -> Result<bool> {
        self.shared
            .channel
            .query_bool(Command::DetectDdr4(address.raw()))
    }

    pub fn detect_ddr5(&self, address: BusAddress) -> Result<bool> {
        self.shared
            .channel
            .query_bool(Command::DetectDdr5(address.raw()))
    }

    pub fn size(&self, address: BusAddress) -> Result<SizeClass> {
        let index = self.shared.channel.query_byte(Command::Size(address.raw()))?;
        SizeClass::from_index(index)
            .ok_or_else(|| Error::Protocol(format!("unknown size index {index}")))
    }

    /// Read up to 32 bytes starting at the full 16-bit `offset`.
    pub fn read(&self, address: BusAddress, offset: u16, count: usize) -> Result<Bytes> {
        if count == 0 || count > MAX_READ {
            return Err(Error::Config(format!(
                "read of {count} bytes, limit is {MAX_READ}"
            )));
        }
        let payload = self.shared.channel.execute(Command::Read {
            address: address.raw(),
            offset,
            count: count as u8,
        })?;
        if payload.len() != count {
            return Err(Error::Protocol(format!(
                "asked for {count} bytes, got {}",
                payload.len()
            )));
        }
        Ok(payload)
    }

    pub fn write_byte(&self, address: BusAddress, offset: u16, value: u8) -> Result<()> {
        self.acknowledge(
            Command::WriteByte {
                address: address.raw(),
                offset,
                value,
            },
            address,
            Some(offset),
        )
    }

    /// Write 1 to 16 bytes that do not cross a 16-byte page.
    pub fn write_page(&self, address: BusAddress, offset: u16, data: &[u8]) -> Result<()> {
        if data.is_empty() || data.len() > MAX_PAGE_WRITE {
            return Err(Error::Config(format!(
                "page write of {} bytes, limit is {MAX_PAGE_WRITE}",
                data.len()
            )));
        }
        self.acknowledge(
            Command::WritePage {
                address: address.raw(),
                offset,
                data: data.to_vec(),
            },
            address,
            Some(offset),
        )
    }

    /// Have the firmware read `offset` and write the same value back.
    pub fn overwrite(&self, address: BusAddress, offset: u16) -> Result<()> {
        self.acknowledge(
            Command::Overwrite {
                address: address.raw(),
                offset,
            },
            address,
            Some(offset),
        )
    }

    pub fn rswp(&self, address: BusAddress, block: u8) -> Result<bool> {
        self.shared.channel.query_bool(Command::GetRswp {
            address: address.raw(),
            block,
        })
    }

    pub fn set_rswp(&self, address: BusAddress, block: u8) -> Result<()> {
        self.acknowledge(
            Command::SetRswp {
                address: address.raw(),
                block,
            },
            address,
            None,
        )
    }

    pub fn clear_rswp(&self, address: BusAddress) -> Result<()> {
        self.acknowledge(
            Command::ClearRswp {
                address: address.raw(),
            },
            address,
            None,
        )
    }

    pub fn pswp(&self, address: BusAddress) -> Result<bool> {
        self.shared.channel.query_bool(Command::GetPswp {
            address: address.raw(),
        })
    }

    pub fn set_pswp(&self, address: BusAddress) -> Result<()> {
        self.acknowledge(
            Command::SetPswp {
                address: address.raw(),
            },
            address,
            None,
        )
    }

    pub fn read_hub_register(&self, address: BusAddress, register: u8) -> Result<u8> {
        self.shared.channel.query_byte(Command::ReadHubRegister {
            address: address.raw(),
            register,
        })
    }

    pub fn write_hub_register(&self, address: BusAddress, register: u8, value: u8) -> Result<()> {
        self.acknowledge(
            Command::WriteHubRegister {
                address: address.raw(),
                register,
                value,
            },
            address,
            Some(register as u16),
        )
    }

    /// Restore the adapter's configuration pins to their defaults.
    pub fn reset_pins(&self) -> Result<bool> {
        self.shared.channel.query_bool(Command::ResetPins)
    }

    pub fn factory_reset(&self) -> Result<bool> {
        let done = self.shared.channel.query_bool(Command::FactoryReset)?;
        if done {
            self.shared.caches.invalidate();
        }
        Ok(done)
    }

    fn acknowledge(&self, command: Command, address: BusAddress, offset: Option<u16>) -> Result<()> {
        debug_assert!(command.is_write());
        if self.shared.channel.query_bool(command)? {
            Ok(())
        } else {
            Err(nak(address, offset))
        }
    }
}

impl Drop for SerialProxy {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl SpdBus for SerialProxy {
    fn probe(&self, address: u8) -> bool {
        self.probe_address(address).unwrap_or_else(|e| {
            trace!(address = format_args!("0x{address:02X}"), error = %e, "probe");
            false
        })
    }

    fn read_block(
        &self,
        address: BusAddress,
        _rule: PageRule,
        offset: u16,
        buf: &mut [u8],
    ) -> Result<()> {
        let payload = self.read(address, offset, buf.len())?;
        buf.copy_from_slice(&payload);
        Ok(())
    }

    fn write_block(
        &self,
        address: BusAddress,
        _rule: PageRule,
        offset: u16,
        data: &[u8],
    ) -> Result<()> {
        match data {
            [value] => self.write_byte(address, offset, *value),
            _ => self.write_page(address, offset, data),
        }
    }

    fn max_read_chunk(&self) -> usize {
        MAX_READ
    }

    fn max_write_chunk(&self) -> usize {
        MAX_PAGE_WRITE
    }

    /// The firmware takes full offsets and pages on its own.
    fn host_paging(&self) -> bool {
        false
    }

    fn discover_geometry(&self, address: BusAddress) -> Result<Geometry> {
        let ddr5 = self.detect_ddr5(address)?;
        let size = self.size(address)?;
        debug!(%address, %size, ddr5, "discovered EEPROM");
        Ok(Geometry::new(size, ddr5))
    }

    fn scan(&self) -> Result<Vec<BusAddress>> {
        self.scan_bus()
    }

    fn rswp(&self, address: BusAddress, block: u8) -> Result<bool> {
        SerialProxy::rswp(self, address, block)
    }

    fn set_rswp(&self, address: BusAddress, block: u8) -> Result<()> {
        SerialProxy::set_rswp(self, address, block)
    }

    fn clear_rswp(&self, address: BusAddress) -> Result<()> {
        SerialProxy::clear_rswp(self, address)
    }

    fn pswp(&self, address: BusAddress) -> Result<bool> {
        SerialProxy::pswp(self, address)
    }

    fn set_pswp(&self, address: BusAddress) -> Result<()> {
        SerialProxy::set_pswp(self, address)
    }
}
