//! Configuration for spdrw transports.
//!
//! Settings come from built-in defaults, optionally a JSON file, and finally
//! environment overrides. Only the file boundary uses anyhow; everything
//! downstream consumes the typed structs.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::tracing::prelude::*;

/// Serial port to open instead of the configured one.
pub const ENV_SERIAL_PORT: &str = "SPDRW_SERIAL_PORT";
/// Reply timeout for the serial proxy, in seconds.
pub const ENV_SERIAL_TIMEOUT_SECS: &str = "SPDRW_SERIAL_TIMEOUT_SECS";
/// SMBus status poll bound, in milliseconds.
pub const ENV_SMBUS_POLL_TIMEOUT_MS: &str = "SPDRW_SMBUS_POLL_TIMEOUT_MS";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Serial proxy settings
    pub serial: SerialSettings,

    /// Host SMBus settings
    pub smbus: SmbusSettings,
}

/// Serial line settings for the proxy device.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Device path, e.g. /dev/ttyACM0. None means discover.
    pub port: Option<String>,

    /// Line speed
    pub baud_rate: u32,

    /// Assert DTR after opening
    pub dtr: bool,

    /// Assert RTS after opening
    pub rts: bool,

    /// How long to wait for a reply before giving up
    pub timeout_secs: u64,

    /// Liveness check period
    pub watchdog_interval_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 115_200,
            dtr: true,
            rts: true,
            timeout_secs: 10,
            watchdog_interval_ms: 500,
        }
    }
}

impl SerialSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }
}

/// Host SMBus controller settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SmbusSettings {
    /// Upper bound on polling the controller status
    pub poll_timeout_ms: u64,

    /// Bus to select after connecting
    pub bus: Option<u8>,
}

impl Default for SmbusSettings {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 1000,
            bus: None,
        }
    }
}

impl SmbusSettings {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

impl Config {
    /// Load configuration from a JSON file, then apply the environment.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let mut config: Config = serde_json::from_str(&text)
            .with_context(|| format!("parsing {}", path.display()))?;
        config.apply_env();
        Ok(config)
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env();
        config
    }

    /// Override settings from `SPDRW_*` environment variables.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_env(&mut self) {
        if let Ok(port) = std::env::var(ENV_SERIAL_PORT) {
            if !port.is_empty() {
                self.serial.port = Some(port);
            }
        }
        if let Some(secs) = env_number(ENV_SERIAL_TIMEOUT_SECS) {
            self.serial.timeout_secs = secs;
        }
        if let Some(ms) = env_number(ENV_SMBUS_POLL_TIMEOUT_MS) {
            self.smbus.poll_timeout_ms = ms;
        }
    }
}

fn env_number(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "ignoring non-numeric override");
            None
        }
    }
}
