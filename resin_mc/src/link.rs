//! Serial link to the MC.
//!
//! [`Link`] owns the write half of the port, a background reader thread that
//! drains the read half into a [`LineQueue`], the [`Trace`] and the optional
//! debug relay. It holds no protocol state: framing and locking live in
//! [`crate::controller`].

use crate::port::{Port, PortReader};
use crate::trace::{Trace, TraceMarker};
use parking_lot::{Condvar, Mutex, MutexGuard};
use resin_common::consts::READER_POLL;
use resin_common::mc::error::McError;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// ─── Line Queue ─────────────────────────────────────────────────────

/// Byte queue filled by the reader thread and consumed line by line.
#[derive(Default)]
pub struct LineQueue {
    bytes: Mutex<VecDeque<u8>>,
    arrived: Condvar,
}

impl LineQueue {
    pub fn push(&self, data: &[u8]) {
        self.bytes.lock().extend(data.iter().copied());
        self.arrived.notify_all();
    }

    /// Whether any byte is pending, complete line or not.
    pub fn waiting(&self) -> bool {
        !self.bytes.lock().is_empty()
    }

    fn pop_line(bytes: &mut VecDeque<u8>) -> Option<Vec<u8>> {
        let end = bytes.iter().position(|b| *b == b'\n')?;
        Some(bytes.drain(..=end).collect())
    }

    /// Take every pending byte, complete line or not.
    pub fn drain_all(&self) -> Vec<u8> {
        self.bytes.lock().drain(..).collect()
    }

    /// Wait up to `timeout` for a complete line.
    pub fn read_line(&self, timeout: Duration) -> Option<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut bytes = self.bytes.lock();
        loop {
            if let Some(line) = Self::pop_line(&mut bytes) {
                return Some(line);
            }
            if self.arrived.wait_until(&mut bytes, deadline).timed_out() {
                return Self::pop_line(&mut bytes);
            }
        }
    }

    pub fn clear(&self) {
        self.bytes.lock().clear();
    }
}

// ─── Debug Relay ────────────────────────────────────────────────────

/// Sink mirroring link traffic to an attached debug client.
#[derive(Default)]
pub struct DebugRelay {
    sink: Mutex<Option<Box<dyn Write + Send>>>,
}

impl DebugRelay {
    pub fn attach(&self, sink: Box<dyn Write + Send>) {
        *self.sink.lock() = Some(sink);
    }

    pub fn detach(&self) {
        *self.sink.lock() = None;
    }

    pub fn is_attached(&self) -> bool {
        self.sink.lock().is_some()
    }

    /// Forward data; a failing client is logged and otherwise ignored.
    pub fn send(&self, data: &[u8]) {
        if let Some(sink) = self.sink.lock().as_mut() {
            if let Err(e) = sink.write_all(data) {
                warn!("Attempt to send data to broken debug socket: {}", e);
            }
        }
    }
}

// ─── Link ───────────────────────────────────────────────────────────

/// Shared between the link and its reader thread.
struct Shared {
    queue: LineQueue,
    relay: DebugRelay,
    raw_read: Mutex<()>,
    running: AtomicBool,
}

/// Owner of the serial device.
pub struct Link {
    port: Mutex<Box<dyn Port>>,
    shared: Arc<Shared>,
    trace: Trace,
    timeout: Duration,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Link {
    /// Wrap an opened port and start the reader thread.
    ///
    /// `timeout` bounds every [`Link::read_line`].
    pub fn new(port: Box<dyn Port>, reader: PortReader, timeout: Duration) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            queue: LineQueue::default(),
            relay: DebugRelay::default(),
            raw_read: Mutex::new(()),
            running: AtomicBool::new(true),
        });

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("mc-reader".to_string())
            .spawn(move || reader_loop(reader, &thread_shared))?;

        Ok(Self {
            port: Mutex::new(port),
            shared,
            trace: Trace::new(),
            timeout,
            reader: Mutex::new(Some(handle)),
        })
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_open(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Write a framed line, tracing and relaying it.
    pub fn write_line(&self, line: &str) -> Result<(), McError> {
        self.trace.record(TraceMarker::Output, line);
        let mut relayed = Vec::with_capacity(line.len() + 2);
        relayed.push(TraceMarker::Output.symbol() as u8);
        relayed.extend_from_slice(line.as_bytes());
        self.shared.relay.send(&relayed);

        self.port.lock().write_bytes(line.as_bytes()).map_err(|e| {
            let cmd = line.trim_end();
            McError::CommunicationFailed(format!("Timeout writing serial port: {cmd}: {e}"))
        })
    }

    /// Write bytes untouched, no trace and no relay.
    pub fn write_raw(&self, data: &[u8]) -> Result<(), McError> {
        self.port
            .lock()
            .write_bytes(data)
            .map_err(|e| McError::CommunicationFailed(format!("raw write failed: {e}")))
    }

    /// Read one line, stripped. Garbage lines are marked as such in the trace.
    pub fn read_line(&self, garbage: bool) -> Result<String, McError> {
        let raw = self.shared.queue.read_line(self.timeout).ok_or_else(|| {
            McError::CommunicationFailed(format!(
                "no line from MC within {} ms",
                self.timeout.as_millis()
            ))
        })?;
        Ok(self.traced(raw, garbage))
    }

    /// Take everything pending without waiting, split into lines. A trailing
    /// partial line is returned too. Every piece is traced as garbage.
    pub fn drain_pending(&self) -> Vec<String> {
        let raw = self.shared.queue.drain_all();
        raw.split_inclusive(|b| *b == b'\n')
            .map(|chunk| self.traced(chunk.to_vec(), true))
            .filter(|line| !line.is_empty())
            .collect()
    }

    fn traced(&self, raw: Vec<u8>, garbage: bool) -> String {
        let marker = if garbage {
            TraceMarker::Garbage
        } else {
            TraceMarker::Input
        };
        self.trace.record(marker, &raw);
        String::from_utf8_lossy(&raw).trim().to_string()
    }

    pub fn in_waiting(&self) -> bool {
        self.shared.queue.waiting()
    }

    pub fn mark_reset(&self, text: &str) {
        self.trace.record(TraceMarker::Reset, text);
    }

    pub fn set_baud_rate(&self, baud: u32) -> Result<(), McError> {
        info!(baud, "Setting MC port baud rate");
        self.port
            .lock()
            .set_baud_rate(baud)
            .map_err(|e| McError::CommunicationFailed(format!("cannot set baud rate: {e}")))
    }

    pub fn attach_relay(&self, sink: Box<dyn Write + Send>) {
        self.shared.relay.attach(sink);
    }

    pub fn detach_relay(&self) {
        self.shared.relay.detach();
    }

    /// Stop the reader from touching the port while the guard lives.
    pub fn lock_raw_read(&self) -> MutexGuard<'_, ()> {
        self.shared.raw_read.lock()
    }

    /// Stop and join the reader thread. Idempotent.
    pub fn close(&self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.reader.lock().take() {
            if handle.join().is_err() {
                warn!("MC reader thread panicked");
            }
            debug!("MC reader stopped");
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.close();
    }
}

fn reader_loop(mut reader: PortReader, shared: &Shared) {
    let mut buf = [0u8; 256];
    while shared.running.load(Ordering::Acquire) {
        let result = {
            let _raw = shared.raw_read.lock();
            reader.read(&mut buf)
        };
        match result {
            Ok(0) => {
                info!("MC port closed");
                break;
            }
            Ok(n) => {
                shared.queue.push(&buf[..n]);
                shared.relay.send(&buf[..n]);
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) => {}
            Err(e) => {
                warn!("MC port read failed: {}", e);
                thread::sleep(READER_POLL);
            }
        }
    }
    shared.running.store(false, Ordering::Release);
}
