//! Simulated motion controller.
//!
//! A software MC speaking the wire protocol over an in-memory port. Used by
//! `--simulate` and by the test suite; the controller cannot tell it from a
//! real serial device.
//!
//! # Module Structure
//!
//! - [`mc`] - Firmware state and command interpreter
//! - this module - [`SimulatedMc`] handle and its [`Port`] / [`ResetLine`]
//!   transport

mod mc;

pub use mc::{HOMING_FAILED, HOMING_IN_PROGRESS, SimAxis, SimState};

use crate::controller::McController;
use crate::link::Link;
use crate::port::{Port, PortReader, ResetLine};
use parking_lot::{Mutex, MutexGuard};
use resin_common::config::McConfig;
use resin_common::consts::READER_POLL;
use resin_common::mc::error::McError;
use std::io::{self, Read};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info};

/// Handle to a simulated MC. Clones share the same firmware state.
#[derive(Clone, Default)]
pub struct SimulatedMc {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedMc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a scripted firmware state.
    pub fn with_state(state: SimState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Lock the firmware state for inspection or scripting.
    pub fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock()
    }

    /// Fresh port, reader and reset line wired to this MC.
    pub fn transport(&self) -> (Box<dyn Port>, PortReader, Box<dyn ResetLine>) {
        let (tx, rx) = mpsc::channel();
        let port = SimPort {
            state: Arc::clone(&self.state),
            tx: tx.clone(),
            pending: Vec::new(),
        };
        let reset = SimResetLine {
            state: Arc::clone(&self.state),
            tx: Mutex::new(tx),
        };
        let reader = SimReader {
            rx,
            leftover: Vec::new(),
        };
        (Box::new(port), Box::new(reader), Box::new(reset))
    }

    /// Controller talking to this MC with the timeouts of `config`.
    pub fn controller(&self, config: &McConfig) -> Result<McController, McError> {
        info!("Using simulated motion controller");
        let (port, reader, reset) = self.transport();
        let link = Link::new(port, reader, config.serial.timeout())?;
        Ok(McController::new(
            link,
            reset,
            config.serial.clone(),
            config.flash.clone(),
        ))
    }
}

/// Write half: complete lines are executed against the firmware state.
pub struct SimPort {
    state: Arc<Mutex<SimState>>,
    tx: Sender<Vec<u8>>,
    pending: Vec<u8>,
}

impl Port for SimPort {
    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        self.pending.extend_from_slice(data);
        while let Some(end) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let reply = self.state.lock().handle(line);
            self.tx
                .send(reply.into_bytes())
                .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        }
        Ok(())
    }

    fn set_baud_rate(&mut self, baud: u32) -> io::Result<()> {
        debug!(baud, "Simulated MC baud rate");
        self.state.lock().baud_log.push(baud);
        Ok(())
    }
}

/// Read half: replies arrive through a channel.
pub struct SimReader {
    rx: Receiver<Vec<u8>>,
    leftover: Vec<u8>,
}

impl Read for SimReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.leftover.is_empty() {
            match self.rx.recv_timeout(READER_POLL) {
                Ok(data) => self.leftover = data,
                Err(RecvTimeoutError::Timeout) => return Err(io::ErrorKind::TimedOut.into()),
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
        let n = self.leftover.len().min(buf.len());
        buf[..n].copy_from_slice(&self.leftover[..n]);
        self.leftover.drain(..n);
        Ok(n)
    }
}

/// Reset line that reboots the simulated firmware.
pub struct SimResetLine {
    state: Arc<Mutex<SimState>>,
    tx: Mutex<Sender<Vec<u8>>>,
}

impl ResetLine for SimResetLine {
    fn pulse(&self) -> io::Result<()> {
        self.state.lock().power_cycle();
        self.tx
            .lock()
            .send(b"MCUSR 02\nready\n".to_vec())
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))
    }
}
