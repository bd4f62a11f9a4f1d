//! Logging setup for programs built on spdrw-core.
//!
//! The library itself only emits events. A front end calls one of the
//! `init_*` functions once to install a subscriber; everything else uses
//! `use crate::tracing::prelude::*` for the level macros.

use std::env;
use time::OffsetDateTime;
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{format::Writer, time::FormatTime},
    prelude::*,
};

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

use prelude::*;

/// Environment variable consulted for filter directives.
pub const FILTER_ENV: &str = "RUST_LOG";

/// Install a subscriber: journald under systemd, stdout otherwise.
///
/// Returns false when a global subscriber was already installed.
pub fn init_journald_or_stdout() -> bool {
    if env::var("JOURNAL_STREAM").is_ok() {
        match tracing_journald::layer() {
            Ok(layer) => {
                return tracing_subscriber::registry()
                    .with(layer)
                    .try_init()
                    .is_ok()
            }
            Err(e) => {
                let installed = init_stdout(LevelFilter::INFO);
                error!(error = %e, "journald unavailable, logging to stdout");
                return installed;
            }
        }
    }
    init_stdout(LevelFilter::INFO)
}

/// Log to stdout, filtered by `RUST_LOG` with `default` when unset.
pub fn init_stdout(default: LevelFilter) -> bool {
    tracing_subscriber::registry()
        .with(filter(default))
        .with(tracing_subscriber::fmt::layer().with_timer(LocalTimer))
        .try_init()
        .is_ok()
}

fn filter(default: LevelFilter) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(default.into())
        .with_env_var(FILTER_ENV)
        .from_env_lossy()
}

// Wall-clock time of day in the local zone, to the second.
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = OffsetDateTime::now_local().unwrap_or(OffsetDateTime::now_utc());
        let stamp = now
            .format(time::macros::format_description!("[hour]:[minute]:[second]"))
            .map_err(|_| std::fmt::Error)?;
        write!(w, "{stamp}")
    }
}
