//! Serial line to the SPD proxy device.

use std::io::{Read, Write};
use std::time::Duration;

use tokio_serial::{ClearBuffer, SerialPort, SerialPortType};

use crate::config::SerialSettings;
use crate::error::Result;
use crate::tracing::prelude::*;

/// How long a blocking read waits before the reader rechecks for shutdown.
pub const READ_POLL: Duration = Duration::from_millis(50);

/// A byte stream to the proxy with the line controls the session needs.
///
/// Reads block for at most [`READ_POLL`] and then fail with
/// `io::ErrorKind::TimedOut`.
pub trait SerialLine: Read + Write + Send {
    /// A second handle to the same line, used by the reader thread.
    fn try_clone_line(&self) -> Result<Box<dyn SerialLine>>;

    /// Discard anything buffered in either direction.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Whether the underlying device is still present.
    fn is_alive(&self) -> bool;

    fn port_name(&self) -> String;
}

impl SerialLine for Box<dyn SerialPort> {
    fn try_clone_line(&self) -> Result<Box<dyn SerialLine>> {
        let clone = self.try_clone()?;
        Ok(Box::new(clone))
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.clear(ClearBuffer::All)?;
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.bytes_to_read().is_ok()
    }

    fn port_name(&self) -> String {
        SerialPort::name(self.as_ref()).unwrap_or_else(|| "<unnamed>".into())
    }
}

/// Open `path` with the line settings from `settings`.
pub fn open_port(path: &str, settings: &SerialSettings) -> Result<Box<dyn SerialLine>> {
    let mut port = tokio_serial::new(path, settings.baud_rate)
        .timeout(READ_POLL)
        .open()?;
    port.write_data_terminal_ready(settings.dtr)?;
    port.write_request_to_send(settings.rts)?;
    debug!(port = path, baud = settings.baud_rate, "serial port opened");
    Ok(Box::new(port))
}

/// Serial ports present on this host, USB CDC devices first.
pub fn available_ports() -> Result<Vec<String>> {
    let mut ports = tokio_serial::available_ports()?;
    ports.sort_by_key(|p| !matches!(p.port_type, SerialPortType::UsbPort(_)));
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
