//! Common error types for spdrw-core.
//!
//! This module provides a centralized Error enum using thiserror,
//! with conversions from underlying error types used throughout the crate.
//! Every variant maps onto one [`ErrorKind`], which is what callers use to
//! decide between retrying, reconnecting, or giving up.

use thiserror::Error;

use crate::types::BusStatus;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ErrorKind {
    /// Bad address, offset, size or argument, detected before any I/O.
    Configuration,
    /// Controller NAK or line fault.
    Io,
    /// No response within the bound.
    Timeout,
    /// Frame integrity mismatch.
    Checksum,
    /// Malformed frame; the session is suspect.
    Protocol,
    /// The session is gone and must be reconnected.
    ConnectionLost,
}

/// Main error type for spdrw-core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from the privileged driver or the serial line
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port errors
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The bus controller or the proxy firmware reported a failed transaction
    #[error("Bus error at 0x{address:02X}{}: {status}", offset.map(|o| format!(" offset 0x{o:04X}")).unwrap_or_default())]
    Bus {
        address: u8,
        offset: Option<u16>,
        status: BusStatus,
    },

    /// No response within the configured bound
    #[error("Timed out after {elapsed_ms} ms waiting for {what}")]
    Timeout { what: String, elapsed_ms: u128 },

    /// Response checksum did not match its payload
    #[error("Checksum mismatch: computed 0x{computed:02X}, received 0x{received:02X}")]
    Checksum { computed: u8, received: u8 },

    /// Protocol errors
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The transport went away underneath the session
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// A transport failure annotated with the EEPROM location it hit
    #[error("{source} (SPD 0x{address:02X}, offset 0x{offset:04X})")]
    Eeprom {
        address: u8,
        offset: u16,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Classify this error, looking through location annotations.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Configuration,
            Error::Io(_) | Error::Serial(_) | Error::Bus { .. } => ErrorKind::Io,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Checksum { .. } => ErrorKind::Checksum,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::ConnectionLost(_) => ErrorKind::ConnectionLost,
            Error::Eeprom { source, .. } => source.kind(),
        }
    }

    /// Timeouts and checksum errors leave the session usable.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Timeout | ErrorKind::Checksum)
    }

    /// The caller has to tear the session down and connect again.
    pub fn requires_reconnect(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Protocol | ErrorKind::ConnectionLost
        )
    }

    /// Attach the EEPROM location to a transport failure.
    ///
    /// Configuration errors are raised by the addressor itself and already
    /// name what was wrong, so they pass through untouched.
    pub(crate) fn at(self, address: u8, offset: u16) -> Self {
        match self {
            Error::Config(_) | Error::Eeprom { .. } => self,
            other => Error::Eeprom {
                address,
                offset,
                source: Box::new(other),
            },
        }
    }
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
