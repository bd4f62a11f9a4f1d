//! Request/response channel to the SPD proxy firmware.
//!
//! The firmware is strictly half-duplex, so correlation is by construction:
//! the line lock is held from writing a request until its reply (or an error
//! standing in for it) arrives. A dedicated reader thread owns a clone of the
//! line, decodes frames, and routes DATA replies to the waiting request and
//! ALERT codes to the watchdog.
//!
//! Every request starts a new generation. The reader drops any partial frame
//! left over from an earlier generation and tags each reply with the
//! generation it was decoded in, so a late or truncated reply can never be
//! taken for the answer to the next request.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tokio_util::codec::{Decoder, Encoder};

use super::command::{Command, TRUE};
use super::frame::{Frame, ProxyCodec};
use crate::error::{Error, Result};
use crate::tracing::prelude::*;
use crate::transport::serial::SerialLine;

/// A decoded reply and the request generation it belongs to.
type Reply = (u64, Result<Bytes>);

/// Control channel to one proxy device.
///
/// Cloning shares the same line; requests from all clones are serialized.
#[derive(Clone)]
pub struct ControlChannel {
    inner: Arc<Inner>,
}

struct Inner {
    line: Mutex<Box<dyn SerialLine>>,
    replies: Receiver<Reply>,
    reply_tx: Sender<Reply>,
    connected: AtomicBool,
    stop: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    timeout: Duration,
    sent: AtomicU64,
    received: Arc<AtomicU64>,
    port: String,
}

/// What the reader thread hands to the rest of the session.
pub(crate) struct ReaderParts {
    pub channel: ControlChannel,
    /// Raw alert codes in arrival order
    pub alerts: Receiver<u8>,
    /// Line faults seen by the reader; the first one ends the session
    pub faults: Receiver<String>,
    pub handle: JoinHandle<()>,
}

impl ControlChannel {
    /// Take ownership of `line` and start its reader thread.
    pub(crate) fn start(line: Box<dyn SerialLine>, timeout: Duration) -> Result<ReaderParts> {
        let reader_line = line.try_clone_line()?;
        let port = line.port_name();
        let (reply_tx, replies) = unbounded();
        let (alert_tx, alerts) = unbounded();
        let (fault_tx, faults) = unbounded();
        let stop = Arc::new(AtomicBool::new(false));
        let generation = Arc::new(AtomicU64::new(0));
        let received = Arc::new(AtomicU64::new(0));

        let handle = {
            let reader = Reader {
                line: reader_line,
                replies: reply_tx.clone(),
                alerts: alert_tx,
                faults: fault_tx,
                stop: stop.clone(),
                generation: generation.clone(),
                received: received.clone(),
            };
            thread::Builder::new()
                .name(format!("spd-reader {port}"))
                .spawn(move || reader.run())?
        };

        let channel = ControlChannel {
            inner: Arc::new(Inner {
                line: Mutex::new(line),
                replies,
                reply_tx,
                connected: AtomicBool::new(true),
                stop,
                generation,
                timeout,
                sent: AtomicU64::new(0),
                received,
                port,
            }),
        };

        Ok(ReaderParts {
            channel,
            alerts,
            faults,
            handle,
        })
    }

    /// Send `command` and wait for its DATA payload.
    pub fn execute(&self, command: Command) -> Result<Bytes> {
        self.ensure_connected()?;
        let mut line = self.inner.line.lock();
        self.ensure_connected()?;

        line.clear_buffers()?;
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        while self.inner.replies.try_recv().is_ok() {}

        let opcode = command.opcode();
        let mut request = BytesMut::new();
        ProxyCodec.encode(command, &mut request)?;
        trace!(port = %self.inner.port, request = %hex::encode(&request), "tx");
        line.write_all(&request)?;
        line.flush()?;
        self.inner
            .sent
            .fetch_add(request.len() as u64, Ordering::Relaxed);

        let started = Instant::now();
        let deadline = started + self.inner.timeout;
        loop {
            match self.inner.replies.recv_deadline(deadline) {
                Ok((tag, reply)) if tag == generation => return reply,
                Ok((tag, reply)) => {
                    debug!(
                        port = %self.inner.port,
                        tag,
                        generation,
                        ok = reply.is_ok(),
                        "stale reply dropped"
                    );
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(Error::Timeout {
                        what: format!("reply to '{}'", opcode as char),
                        elapsed_ms: started.elapsed().as_millis(),
                    })
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::ConnectionLost(format!(
                        "{} reader stopped",
                        self.inner.port
                    )))
                }
            }
        }
    }

    /// Execute a command whose reply is a single byte.
    pub fn query_byte(&self, command: Command) -> Result<u8> {
        let payload = self.execute(command)?;
        match payload.first() {
            Some(&byte) if payload.len() == 1 => Ok(byte),
            _ => Err(Error::Protocol(format!(
                "expected 1 byte reply, got {}",
                payload.len()
            ))),
        }
    }

    pub fn query_bool(&self, command: Command) -> Result<bool> {
        Ok(self.query_byte(command)? == TRUE)
    }

    /// Whether requests can still be issued.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    pub fn port_name(&self) -> &str {
        &self.inner.port
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    pub fn bytes_sent(&self) -> u64 {
        self.inner.sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.inner.received.load(Ordering::Relaxed)
    }

    /// Stop accepting requests and let the reader exit.
    ///
    /// Returns false if the channel was already closed.
    pub(crate) fn close(&self) -> bool {
        self.inner.stop.store(true, Ordering::Release);
        self.inner.connected.swap(false, Ordering::AcqRel)
    }

    /// Fail whichever request is waiting, if any.
    pub(crate) fn fail_pending(&self, err: Error) {
        let generation = self.inner.generation.load(Ordering::Acquire);
        let _ = self.inner.reply_tx.send((generation, Err(err)));
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::ConnectionLost(format!(
                "{} is disconnected",
                self.inner.port
            )))
        }
    }
}

struct Reader {
    line: Box<dyn SerialLine>,
    replies: Sender<Reply>,
    alerts: Sender<u8>,
    faults: Sender<String>,
    stop: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    received: Arc<AtomicU64>,
}

impl Reader {
    fn run(mut self) {
        trace!("reader started");
        let mut codec = ProxyCodec;
        let mut pending = BytesMut::with_capacity(64);
        let mut chunk = [0u8; 64];
        let mut seen = self.generation.load(Ordering::Acquire);

        while !self.stop.load(Ordering::Acquire) {
            let n = match self.line.read(&mut chunk) {
                Ok(n) => n,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut
                            | io::ErrorKind::WouldBlock
                            | io::ErrorKind::Interrupted
                    ) =>
                {
                    continue
                }
                Err(e) => {
                    if !self.stop.load(Ordering::Acquire) {
                        warn!(error = %e, "serial read failed");
                        let _ = self.faults.send(e.to_string());
                    }
                    break;
                }
            };
            if n == 0 {
                continue;
            }

            let current = self.generation.load(Ordering::Acquire);
            if current != seen {
                if !pending.is_empty() {
                    debug!(
                        dropped = %hex::encode(&pending),
                        "partial frame from an earlier request dropped"
                    );
                }
                pending.clear();
                seen = current;
            }

            self.received.fetch_add(n as u64, Ordering::Relaxed);
            trace!(rx = %hex::encode(&chunk[..n]), "rx");
            pending.extend_from_slice(&chunk[..n]);

            loop {
                match codec.decode(&mut pending) {
                    Ok(Some(Frame::Data(payload))) => {
                        let _ = self.replies.send((seen, Ok(payload)));
                    }
                    Ok(Some(Frame::Alert(code))) => {
                        let _ = self.alerts.send(code);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!(error = %e, "reply rejected");
                        let _ = self.replies.send((seen, Err(e)));
                    }
                }
            }
        }
        trace!("reader stopped");
    }
}
