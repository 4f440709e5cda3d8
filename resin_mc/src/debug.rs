//! Interactive debug session over TCP.
//!
//! One client at a time connects to the debug port and talks to the MC
//! directly.
//!
//! - **Normal mode**: the client receives a banner and the trace, then every
//!   byte exchanged with the MC. Lines it sends are passed through between
//!   normal commands. `#stop` takes the link exclusively so the printer
//!   stops talking to the MC; `#cont` gives it back.
//! - **Bootloader mode**: the link is held exclusively, switched to the
//!   bootloader baud rate and the MC is reset. Client bytes are forwarded
//!   unframed, so a programmer can talk to the bootloader.
//!
//! When the client disconnects the relay is detached, the normal baud rate
//! restored and the exclusive flag released. After a bootloader session the
//! MC is reconnected without a firmware version check.

use crate::controller::McController;
use resin_common::config::DebugConfig;
use resin_common::consts::READER_POLL;
use resin_common::mc::error::McError;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

const BANNER_HISTORY: &[u8] = b"\n\n\n>>> Debugging session started, command history: <<<\n\n\n";
const BANNER_HINT: &[u8] = b"\n\n\n>>> Type #stop for exclusive mode <<<\n\n\n";
const REPLY_EXCLUSIVE: &[u8] = b"\n\n\n>>> Now in exclusive mode type #cont to leave it <<<\n\n\n";
const REPLY_ALREADY_EXCLUSIVE: &[u8] = b"\n\n\n>>> Exclusive mode already enabled <<<\n\n\n";
const REPLY_NORMAL: &[u8] = b"\n\n\n>>> Now in normal mode <<<\n\n\n";
const REPLY_ALREADY_NORMAL: &[u8] = b"\n\n\n>>> Already in normal mode, do action <<<\n\n\n";

/// Handle to a running debug session thread.
pub struct DebugSession {
    handle: JoinHandle<Result<(), McError>>,
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
}

impl DebugSession {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Flag that ends the session when cleared.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Wait for the session to end.
    pub fn join(self) -> Result<(), McError> {
        self.handle
            .join()
            .map_err(|_| McError::CommunicationFailed("debug session panicked".to_string()))?
    }
}

/// Listen on the debug port and serve a single client in the background.
pub fn start_debug_session(
    mc: Arc<McController>,
    config: &DebugConfig,
    bootloader: bool,
) -> Result<DebugSession, McError> {
    let listener = TcpListener::bind((config.bind.as_str(), config.port))?;
    listener.set_nonblocking(true)?;
    let local_addr = listener.local_addr()?;
    info!(%local_addr, bootloader, "Listening for motion controller debug connection");

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    let handle = thread::Builder::new()
        .name("mc-debug".to_string())
        .spawn(move || serve(&mc, &listener, &flag, bootloader))?;

    Ok(DebugSession {
        handle,
        local_addr,
        running,
    })
}

fn accept(listener: &TcpListener, running: &AtomicBool) -> io::Result<Option<TcpStream>> {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, address)) => {
                info!(%address, "Debug connection accepted");
                stream.set_nonblocking(false)?;
                stream.set_read_timeout(Some(READER_POLL))?;
                return Ok(Some(stream));
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(READER_POLL),
            Err(e) => return Err(e),
        }
    }
    Ok(None)
}

fn serve(
    mc: &McController,
    listener: &TcpListener,
    running: &AtomicBool,
    bootloader: bool,
) -> Result<(), McError> {
    let Some(stream) = accept(listener, running)? else {
        info!("Debug session stopped before a client connected");
        return Ok(());
    };
    mc.link().attach_relay(Box::new(stream.try_clone()?));

    let mut holds_exclusive = false;
    let session = if bootloader {
        serve_bootloader(mc, stream, running, &mut holds_exclusive)
    } else {
        serve_user(mc, stream, running, &mut holds_exclusive)
    };

    info!("Terminating debugging session on client disconnect");
    mc.link().detach_relay();
    let restored = mc.link().set_baud_rate(mc.serial_config().baud_rate);
    if holds_exclusive {
        mc.gate().release_exclusive();
    }
    info!("Debugging session terminated");
    session?;
    restored?;

    if bootloader {
        // Custom firmware may have been uploaded.
        let state = mc.connect(false)?;
        if let Err(e) = state.ensure_connected() {
            error!("Reconnect after bootloader session failed: {}", e);
            return Err(e);
        }
    }
    Ok(())
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

fn serve_bootloader(
    mc: &McController,
    mut stream: TcpStream,
    running: &AtomicBool,
    holds_exclusive: &mut bool,
) -> Result<(), McError> {
    info!("Starting bootloader debugging session");
    if !mc.gate().acquire_exclusive() {
        return Err(McError::CommunicationFailed(
            "MC link is already held exclusively".to_string(),
        ));
    }
    *holds_exclusive = true;
    mc.link().set_baud_rate(mc.serial_config().bootloader_baud_rate)?;
    mc.hard_reset()?;

    let mut buf = [0u8; 64];
    while running.load(Ordering::SeqCst) {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => mc.link().write_raw(&buf[..n])?,
            Err(e) if is_timeout(&e) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn serve_user(
    mc: &McController,
    mut stream: TcpStream,
    running: &AtomicBool,
    holds_exclusive: &mut bool,
) -> Result<(), McError> {
    info!("Starting normal debugging session");
    stream.write_all(BANNER_HISTORY)?;
    stream.write_all(mc.link().trace().to_string().as_bytes())?;
    stream.write_all(BANNER_HINT)?;

    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = Vec::new();
    while running.load(Ordering::SeqCst) {
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) if !line.ends_with(b"\n") => continue,
            Ok(_) => {}
            Err(e) if is_timeout(&e) => continue,
            Err(e) => return Err(e.into()),
        }

        if line.starts_with(b"#stop") {
            info!("Starting exclusive debugging");
            if mc.gate().acquire_exclusive() {
                debug!("Switching to exclusive debugging");
                *holds_exclusive = true;
                stream.write_all(REPLY_EXCLUSIVE)?;
            } else {
                stream.write_all(REPLY_ALREADY_EXCLUSIVE)?;
            }
        } else if line.starts_with(b"#cont") {
            info!("Stopping exclusive debugging");
            if *holds_exclusive && mc.gate().release_exclusive() {
                debug!("Switching to normal debugging");
                *holds_exclusive = false;
                stream.write_all(REPLY_NORMAL)?;
            } else {
                stream.write_all(REPLY_ALREADY_NORMAL)?;
            }
        } else {
            let _guard = mc.gate().raw_command();
            debug!("Passing user command: {}", String::from_utf8_lossy(&line).trim_end());
            mc.link().write_raw(&line)?;
        }
        line.clear();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedMc;
    use resin_common::config::McConfig;
    use std::time::{Duration, Instant};

    fn local() -> DebugConfig {
        DebugConfig {
            bind: "127.0.0.1".to_string(),
            port: 0,
        }
    }

    fn read_until(stream: &mut TcpStream, needle: &str) -> String {
        stream
            .set_read_timeout(Some(Duration::from_millis(50)))
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = Vec::new();
        let mut buf = [0u8; 256];
        while Instant::now() < deadline {
            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => seen.extend_from_slice(&buf[..n]),
                Err(e) if is_timeout(&e) => {}
                Err(e) => panic!("client read failed: {e}"),
            }
            let text = String::from_utf8_lossy(&seen);
            if text.contains(needle) {
                return text.into_owned();
            }
        }
        panic!("'{needle}' not received, got: {}", String::from_utf8_lossy(&seen));
    }

    #[test]
    fn normal_session_toggles_exclusive_mode() {
        let sim = SimulatedMc::new();
        let mc = Arc::new(sim.controller(&McConfig::default()).unwrap());
        mc.do_command("?ver").unwrap();

        let session = start_debug_session(Arc::clone(&mc), &local(), false).unwrap();
        let mut client = TcpStream::connect(session.local_addr()).unwrap();
        let intro = read_until(&mut client, "Type #stop");
        assert!(intro.contains("> ?ver"));

        client.write_all(b"#stop\n").unwrap();
        read_until(&mut client, "Now in exclusive mode");
        assert!(mc.gate().is_exclusive());
        client.write_all(b"#stop\n").unwrap();
        read_until(&mut client, "already enabled");

        client.write_all(b"?ser\n").unwrap();
        read_until(&mut client, "CZPX0001SIM ok");

        client.write_all(b"#cont\n").unwrap();
        read_until(&mut client, "Now in normal mode");
        client.write_all(b"#cont\n").unwrap();
        read_until(&mut client, "Already in normal mode");
        assert!(!mc.gate().is_exclusive());

        client.write_all(b"#stop\n").unwrap();
        read_until(&mut client, "Now in exclusive mode");
        drop(client);
        session.join().unwrap();

        assert!(!mc.gate().is_exclusive());
        assert_eq!(sim.state().baud_log, vec![115_200]);
        assert!(mc.do_command("?ver").is_ok());
    }

    #[test]
    fn bootloader_session_forwards_raw_and_reconnects() {
        let sim = SimulatedMc::new();
        let mc = Arc::new(sim.controller(&McConfig::default()).unwrap());

        let session = start_debug_session(Arc::clone(&mc), &local(), true).unwrap();
        let mut client = TcpStream::connect(session.local_addr()).unwrap();
        read_until(&mut client, "ready");
        assert!(mc.gate().is_exclusive());

        client.write_all(b"?ser\n").unwrap();
        read_until(&mut client, "CZPX0001SIM ok");
        drop(client);
        session.join().unwrap();

        assert_eq!(sim.state().baud_log, vec![19_200, 115_200]);
        assert!(!mc.gate().is_exclusive());
        assert!(mc.state().is_connected());
    }

    #[test]
    fn stop_without_client() {
        let sim = SimulatedMc::new();
        let mc = Arc::new(sim.controller(&McConfig::default()).unwrap());
        let session = start_debug_session(mc, &local(), false).unwrap();
        session.stop();
        session.join().unwrap();
    }
}
