//! Driver session backed by `/dev/port` and sysfs.
//!
//! Needs root (or CAP_SYS_RAWIO). Port access goes through positioned reads
//! and writes on `/dev/port`; configuration space through the per-function
//! `config` file under `/sys/bus/pci/devices`.

use std::fs;
use std::io;
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};

use rustix::fs::{Mode, OFlags};

use crate::hw_trait::{PciAddress, PciConfig, PortIo, Width};
use crate::tracing::prelude::*;

const DEV_PORT: &str = "/dev/port";
const PCI_DEVICES: &str = "/sys/bus/pci/devices";

pub struct DevPortSession {
    port: OwnedFd,
    sysfs: PathBuf,
}

impl DevPortSession {
    pub fn open() -> io::Result<Self> {
        let port = rustix::fs::open(DEV_PORT, OFlags::RDWR | OFlags::CLOEXEC, Mode::empty())?;
        debug!("opened {DEV_PORT}");
        Ok(Self {
            port,
            sysfs: PathBuf::from(PCI_DEVICES),
        })
    }

    fn config_path(&self, device: PciAddress) -> PathBuf {
        self.sysfs.join(format!("0000:{device}")).join("config")
    }

    fn find(&self, matches: impl Fn(&Path) -> io::Result<bool>) -> io::Result<Option<PciAddress>> {
        let mut entries: Vec<_> = fs::read_dir(&self.sysfs)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect();
        entries.sort();
        for path in entries {
            if !matches(&path)? {
                continue;
            }
            if let Some(address) = path.file_name().and_then(|n| n.to_str()).and_then(parse_bdf) {
                return Ok(Some(address));
            }
        }
        Ok(None)
    }
}

impl PortIo for DevPortSession {
    fn read_port(&self, width: Width, port: u16) -> io::Result<u32> {
        let mut buf = [0u8; 4];
        let len = width.bytes();
        let n = rustix::io::pread(&self.port, &mut buf[..len], port as u64)?;
        if n != len {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "short port read"));
        }
        Ok(u32::from_le_bytes(buf))
    }

    fn write_port(&self, width: Width, port: u16, value: u32) -> io::Result<()> {
        let bytes = value.to_le_bytes();
        let len = width.bytes();
        let n = rustix::io::pwrite(&self.port, &bytes[..len], port as u64)?;
        if n != len {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "short port write"));
        }
        Ok(())
    }
}

impl PciConfig for DevPortSession {
    fn read_pci_config(&self, width: Width, device: PciAddress, register: u16) -> io::Result<u32> {
        let fd = rustix::fs::open(self.config_path(device), OFlags::RDONLY, Mode::empty())?;
        let mut buf = [0u8; 4];
        let len = width.bytes();
        let n = rustix::io::pread(&fd, &mut buf[..len], register as u64)?;
        if n != len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("config space of {device} ends before 0x{register:X}"),
            ));
        }
        Ok(u32::from_le_bytes(buf))
    }

    fn write_pci_config(
        &self,
        width: Width,
        device: PciAddress,
        register: u16,
        value: u32,
    ) -> io::Result<()> {
        let fd = rustix::fs::open(self.config_path(device), OFlags::WRONLY, Mode::empty())?;
        let bytes = value.to_le_bytes();
        let len = width.bytes();
        let n = rustix::io::pwrite(&fd, &bytes[..len], register as u64)?;
        if n != len {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "short config write"));
        }
        Ok(())
    }

    fn find_pci_device_by_class(&self, class: u8, subclass: u8) -> io::Result<Option<PciAddress>> {
        self.find(|path| {
            let Some(code) = read_hex(&path.join("class")) else {
                return Ok(false);
            };
            Ok((code >> 16) as u8 == class && (code >> 8) as u8 == subclass)
        })
    }

    fn find_pci_device_by_id(&self, vendor: u16, device: u16) -> io::Result<Option<PciAddress>> {
        self.find(|path| {
            Ok(read_hex(&path.join("vendor")) == Some(vendor as u32)
                && read_hex(&path.join("device")) == Some(device as u32))
        })
    }
}

fn read_hex(path: &Path) -> Option<u32> {
    let text = fs::read_to_string(path).ok()?;
    u32::from_str_radix(text.trim().trim_start_matches("0x"), 16).ok()
}

/// Parse a sysfs name like `0000:00:1f.4`.
fn parse_bdf(name: &str) -> Option<PciAddress> {
    let mut parts = name.rsplitn(3, ':');
    let dev_fn = parts.next()?;
    let bus = parts.next()?;
    let (device, function) = dev_fn.split_once('.')?;
    Some(PciAddress::new(
        u8::from_str_radix(bus, 16).ok()?,
        u8::from_str_radix(device, 16).ok()?,
        u8::from_str_radix(function, 16).ok()?,
    ))
}
