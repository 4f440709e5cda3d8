//! Transport seams of the MC link.
//!
//! [`Port`] is the write half of the serial device, [`ResetLine`] the GPIO
//! wired to the MC reset pin. Both have a hardware implementation here and a
//! simulated one in [`crate::sim`].

use resin_common::config::SerialConfig;
use resin_common::consts::{READER_POLL, RESET_PULSE};
use resin_common::mc::error::McError;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{debug, info};

/// Write half of the serial link.
pub trait Port: Send {
    /// Write all bytes and flush.
    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()>;

    /// Change the line speed. Affects the read half as well.
    fn set_baud_rate(&mut self, baud: u32) -> io::Result<()>;
}

impl Port for Box<dyn SerialPort> {
    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        self.write_all(data)?;
        self.flush()
    }

    fn set_baud_rate(&mut self, baud: u32) -> io::Result<()> {
        SerialPort::set_baud_rate(self.as_mut(), baud).map_err(io::Error::from)
    }
}

/// Read half of the serial link as handed to the reader thread.
///
/// `ErrorKind::TimedOut` / `WouldBlock` mean "no data yet"; `Ok(0)` means
/// the transport is gone.
pub type PortReader = Box<dyn Read + Send>;

/// Open the serial device as 8N1 without flow control.
///
/// The write half uses the configured timeout; the read half polls so the
/// reader thread notices shutdown.
pub fn open_serial(config: &SerialConfig) -> Result<(Box<dyn Port>, PortReader), McError> {
    info!(
        device = %config.device,
        baud = config.baud_rate,
        "Opening MC serial port"
    );
    let writer = serialport::new(&config.device, config.baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(config.timeout())
        .open()
        .map_err(|e| {
            McError::CommunicationFailed(format!("cannot open {}: {e}", config.device))
        })?;

    let mut reader = writer
        .try_clone()
        .map_err(|e| McError::CommunicationFailed(format!("cannot clone serial port: {e}")))?;
    reader
        .set_timeout(READER_POLL)
        .map_err(|e| McError::CommunicationFailed(e.to_string()))?;

    Ok((Box::new(writer), Box::new(reader)))
}

// ─── Reset Line ─────────────────────────────────────────────────────

/// Line that resets the MC when pulsed.
pub trait ResetLine: Send + Sync {
    /// Drive an active-high pulse.
    fn pulse(&self) -> io::Result<()>;
}

/// Reset line driven through the sysfs GPIO interface.
#[derive(Debug, Clone)]
pub struct SysfsGpio {
    root: PathBuf,
    line: u32,
}

impl SysfsGpio {
    pub fn new(root: impl Into<PathBuf>, line: u32) -> Self {
        Self {
            root: root.into(),
            line,
        }
    }

    fn line_dir(&self) -> PathBuf {
        self.root.join(format!("gpio{}", self.line))
    }

    fn write_attr(path: &Path, value: &str) -> io::Result<()> {
        fs::write(path, value)
    }

    /// Export the line and configure it as output, low.
    fn setup(&self) -> io::Result<()> {
        let dir = self.line_dir();
        if !dir.exists() {
            debug!(line = self.line, "Exporting GPIO line");
            Self::write_attr(&self.root.join("export"), &self.line.to_string())?;
        }
        Self::write_attr(&dir.join("direction"), "out")
    }
}

impl ResetLine for SysfsGpio {
    fn pulse(&self) -> io::Result<()> {
        self.setup()?;
        let value = self.line_dir().join("value");
        Self::write_attr(&value, "1")?;
        thread::sleep(RESET_PULSE);
        Self::write_attr(&value, "0")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sysfs_pulse_leaves_line_low() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("gpio131")).unwrap();

        let gpio = SysfsGpio::new(root.path(), 131);
        gpio.pulse().unwrap();

        let dir = root.path().join("gpio131");
        assert_eq!(fs::read_to_string(dir.join("direction")).unwrap(), "out");
        assert_eq!(fs::read_to_string(dir.join("value")).unwrap(), "0");
    }

    #[test]
    fn sysfs_exports_missing_line() {
        let root = tempfile::tempdir().unwrap();
        let gpio = SysfsGpio::new(root.path(), 7);
        // Export goes through, but the kernel is not there to create gpio7.
        assert!(gpio.pulse().is_err());
        assert_eq!(fs::read_to_string(root.path().join("export")).unwrap(), "7");
    }
}
