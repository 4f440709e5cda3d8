//! External MC flashing utility.
//!
//! The utility is invoked as `<command> <firmware_dir> <board> <device>`;
//! its stdout and stderr are streamed line by line into the log.

use resin_common::config::FlashConfig;
use resin_common::mc::error::McError;
use std::io::{BufRead, BufReader, Read};
use std::process::{Command, Stdio};
use std::thread;
use tracing::{info, warn};

fn log_lines(stream: impl Read) {
    for line in BufReader::new(stream).lines() {
        match line {
            Ok(line) if line.trim().is_empty() => {}
            Ok(line) => info!("flashMC output: '{}'", line.trim()),
            Err(e) => {
                warn!("Failed to read flashMC output: {}", e);
                break;
            }
        }
    }
}

/// Run the flashing utility to completion.
///
/// A non-zero exit (or death by signal, reported as -1) maps to
/// [`McError::UpdateFailed`].
pub fn run_flash_utility(config: &FlashConfig, board: u8, device: &str) -> Result<(), McError> {
    info!(
        command = %config.command.display(),
        board,
        device,
        "Flashing MC firmware"
    );
    let mut child = Command::new(&config.command)
        .arg(&config.firmware_dir)
        .arg(board.to_string())
        .arg(device)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stderr = child.stderr.take().map(|stream| {
        thread::Builder::new()
            .name("flash-stderr".to_string())
            .spawn(move || log_lines(stream))
    });
    if let Some(stdout) = child.stdout.take() {
        log_lines(stdout);
    }
    if let Some(Ok(handle)) = stderr {
        let _ = handle.join();
    }

    let status = child.wait()?;
    match status.code() {
        Some(0) => {
            info!("MC flash finished");
            Ok(())
        }
        code => {
            let code = code.unwrap_or(-1);
            warn!(code, "MC flash failed");
            Err(McError::UpdateFailed(code))
        }
    }
}
