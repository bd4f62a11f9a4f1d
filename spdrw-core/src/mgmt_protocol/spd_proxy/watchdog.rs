//! Session watchdog: alert fan-out, hot-plug follow-up and liveness.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{select, tick, Receiver};

use super::command::Alert;
use super::Shared;
use crate::error::Result;
use crate::tracing::prelude::*;
use crate::transport::serial::SerialLine;

pub(super) fn spawn(
    shared: Arc<Shared>,
    probe: Box<dyn SerialLine>,
    alerts: Receiver<u8>,
    faults: Receiver<String>,
    stop: Receiver<()>,
    interval: Duration,
) -> Result<JoinHandle<()>> {
    let name = format!("spd-watchdog {}", shared.channel.port_name());
    let handle = thread::Builder::new()
        .name(name)
        .spawn(move || run(shared, probe, alerts, faults, stop, interval))?;
    Ok(handle)
}

fn run(
    shared: Arc<Shared>,
    probe: Box<dyn SerialLine>,
    alerts: Receiver<u8>,
    faults: Receiver<String>,
    stop: Receiver<()>,
    interval: Duration,
) {
    trace!("watchdog started");
    let liveness = tick(interval);
    loop {
        select! {
            recv(stop) -> _ => break,
            recv(alerts) -> code => match code {
                Ok(code) => handle_alert(&shared, code),
                Err(_) => {
                    shared.connection_lost("reader thread exited".into());
                    break;
                }
            },
            recv(faults) -> reason => {
                let reason = reason.unwrap_or_else(|_| "reader thread exited".into());
                shared.connection_lost(reason);
                break;
            },
            recv(liveness) -> _ => {
                if !probe.is_alive() {
                    shared.connection_lost(format!("{} is no longer present", probe.port_name()));
                    break;
                }
            },
        }
    }
    trace!("watchdog stopped");
}

fn handle_alert(shared: &Shared, code: u8) {
    let Some(alert) = Alert::from_repr(code) else {
        warn!(code = format_args!("0x{code:02X}"), "unknown alert code");
        return;
    };
    debug!(%alert, "alert");

    if !alert.is_hotplug() {
        shared.subscribers.publish_alert(alert);
        return;
    }

    shared.caches.invalidate();
    shared.subscribers.publish_alert(alert);
    if let Err(e) = shared.refresh_caches() {
        warn!(error = %e, "rescan after hot-plug failed");
    }
}
