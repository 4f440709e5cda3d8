//! MC protocol engine.
//!
//! [`McController`] owns the [`Link`] and the [`LinkGate`] and is the only
//! place that frames commands and interprets responses. Everything above it
//! (axes, peripherals, the debug session) goes through [`McController::execute`]
//! or one of the typed getters built on it.
//!
//! # Command round-trip
//!
//! 1. Take the command slot of the gate (refused while flashing).
//! 2. Drain unsolicited lines: `#` comments at debug, anything else as
//!    garbage at warning.
//! 3. Write the framed command.
//! 4. Read lines until `... ok` or `e<digit>`. `#` lines are skipped, any
//!    other line is a protocol error.

use crate::flash;
use crate::frame::{self, Command, Frame, Response, parse_line};
use crate::gate::LinkGate;
use crate::link::Link;
use crate::port::{ResetLine, SysfsGpio, open_serial};
use crate::status::StatusTracker;
use parking_lot::Mutex;
use resin_common::config::{FlashConfig, McConfig, SerialConfig};
use resin_common::consts::{
    INVALID_SERIAL, READY_BANNER, READY_FALLBACK_DELAY, REQUIRED_FW_VERSION,
    SUPPORTED_BOARD_REVISION,
};
use resin_common::mc::codes::SelfCheckCode;
use resin_common::mc::error::McError;
use resin_common::mc::status::{ResetFlags, StatusBit, StatusBits};
use std::fmt;
use std::thread;
use tracing::{debug, error, info, warn};

// ─── Connection State ───────────────────────────────────────────────

/// Identity of a connected MC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub fw_version: String,
    pub fw_revision: i32,
    pub board_revision: i32,
    pub board_sub_revision: char,
    pub serial_no: String,
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fw {} (rev {}), board {}{}, serial {}",
            self.fw_version,
            self.fw_revision,
            self.board_revision,
            self.board_sub_revision,
            self.serial_no
        )
    }
}

/// Outcome of the last connect handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected(ConnectionInfo),
    Fatal(SelfCheckCode),
    WrongFirmware {
        found: String,
    },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }

    /// Identity of the MC, or the error explaining why there is none.
    pub fn ensure_connected(&self) -> Result<&ConnectionInfo, McError> {
        match self {
            Self::Connected(info) => Ok(info),
            Self::Fatal(code) => Err(McError::SelfCheckFatal(*code)),
            Self::WrongFirmware { found } => Err(McError::WrongFirmware {
                found: found.clone(),
                required: REQUIRED_FW_VERSION.to_string(),
            }),
            Self::Disconnected | Self::Connecting => Err(McError::CommunicationFailed(
                "MC is not connected".to_string(),
            )),
        }
    }
}

// ─── Controller ─────────────────────────────────────────────────────

pub struct McController {
    link: Link,
    gate: LinkGate,
    reset_line: Box<dyn ResetLine>,
    state: Mutex<ConnectionState>,
    status: StatusTracker,
    serial: SerialConfig,
    flash: FlashConfig,
}

impl McController {
    pub fn new(
        link: Link,
        reset_line: Box<dyn ResetLine>,
        serial: SerialConfig,
        flash: FlashConfig,
    ) -> Self {
        Self {
            link,
            gate: LinkGate::new(),
            reset_line,
            state: Mutex::new(ConnectionState::Disconnected),
            status: StatusTracker::new(),
            serial,
            flash,
        }
    }

    /// Open the configured serial device and reset GPIO.
    pub fn open(config: &McConfig) -> Result<Self, McError> {
        let (port, reader) = open_serial(&config.serial)?;
        let link = Link::new(port, reader, config.serial.timeout())?;
        let reset = SysfsGpio::new(&config.serial.gpio_root, config.serial.reset_gpio);
        Ok(Self::new(
            link,
            Box::new(reset),
            config.serial.clone(),
            config.flash.clone(),
        ))
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn gate(&self) -> &LinkGate {
        &self.gate
    }

    pub fn serial_config(&self) -> &SerialConfig {
        &self.serial
    }

    pub fn status_tracker(&self) -> &StatusTracker {
        &self.status
    }

    pub fn state(&self) -> ConnectionState {
        self.state.lock().clone()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    pub fn close(&self) {
        self.link.close();
        self.set_state(ConnectionState::Disconnected);
    }

    // ─── Round-trip ─────────────────────────────────────────────────

    /// Send one command and wait for its response.
    pub fn execute(&self, cmd: &Command) -> Result<Response, McError> {
        let _guard = self.gate.command()?;
        self.drain_garbage();
        self.link.write_line(&cmd.frame())?;
        self.await_response(cmd)
    }

    fn await_response(&self, cmd: &Command) -> Result<Response, McError> {
        loop {
            let line = self.link.read_line(false)?;
            match parse_line(&line) {
                Frame::Response(Response::Err(code)) => {
                    warn!(command = %cmd, "MC command failed with error: {}", code);
                    return Ok(Response::Err(code));
                }
                Frame::Response(response) => return Ok(response),
                Frame::Comment(comment) => debug!("Received comment response: {}", comment),
                Frame::Other(other) => {
                    return Err(McError::ProtocolError(format!(
                        "'{cmd}' resulted in non-response line '{other}'"
                    )));
                }
            }
        }
    }

    /// Read and log every pending byte, partial lines included.
    fn drain_garbage(&self) {
        for line in self.link.drain_pending() {
            if line.starts_with('#') {
                debug!("Comment in MC port: {}", line);
            } else {
                warn!("Garbage pending in MC port: {}", line);
            }
        }
    }

    /// [`Self::execute`] with refusals turned into [`McError::CommandError`].
    pub fn do_command(&self, cmd: impl Into<Command>) -> Result<Option<String>, McError> {
        self.execute(&cmd.into())?.into_result()
    }

    pub fn get_int(&self, cmd: impl Into<Command>) -> Result<i32, McError> {
        frame::decode_int(self.do_command(cmd)?.as_deref())
    }

    pub fn get_int_list(&self, cmd: impl Into<Command>) -> Result<Vec<i32>, McError> {
        frame::decode_int_list(self.do_command(cmd)?.as_deref())
    }

    pub fn get_scaled_list(&self, cmd: impl Into<Command>, factor: f64) -> Result<Vec<f64>, McError> {
        frame::decode_scaled_list(self.do_command(cmd)?.as_deref(), factor)
    }

    pub fn get_bool(&self, cmd: impl Into<Command>) -> Result<bool, McError> {
        frame::decode_bool(self.do_command(cmd)?.as_deref())
    }

    pub fn get_bool_list(&self, cmd: impl Into<Command>, bit_count: usize) -> Result<Vec<bool>, McError> {
        frame::decode_bits(self.do_command(cmd)?.as_deref(), bit_count)
    }

    /// Pack `bits` LSB first and send them as the single argument of `verb`.
    pub fn set_bool_list(&self, verb: &'static str, bits: &[bool]) -> Result<(), McError> {
        let word = i64::try_from(frame::encode_bits(bits)?)
            .map_err(|_| McError::ProtocolError(format!("too many bits for {verb}")))?;
        self.do_command(Command::new(verb).arg(word)).map(drop)
    }

    pub fn get_hexed_string(&self, cmd: impl Into<Command>) -> Result<String, McError> {
        frame::decode_hexed_string(self.do_command(cmd)?.as_deref())
    }

    pub fn get_text(&self, cmd: impl Into<Command>) -> Result<String, McError> {
        frame::decode_text(self.do_command(cmd)?.as_deref())
    }

    // ─── Status ─────────────────────────────────────────────────────

    fn read_status(&self) -> Result<StatusBits, McError> {
        let word = self.get_int("?")?;
        let word = u16::try_from(word)
            .map_err(|_| McError::ProtocolError(format!("status word {word} out of range")))?;
        Ok(StatusBits::from_word(word))
    }

    /// Query the status word and publish its edges.
    pub fn status(&self) -> Result<StatusBits, McError> {
        let bits = self.read_status()?;
        self.status.update(bits);
        Ok(bits)
    }

    /// Values of the requested flags, in request order.
    pub fn state_bits(&self, names: &[StatusBit]) -> Result<Vec<bool>, McError> {
        let bits = self.status()?;
        Ok(names.iter().map(|bit| bits.get(*bit)).collect())
    }

    /// Single flag; a failed query reads as `false`.
    pub fn check_state(&self, bit: StatusBit) -> bool {
        match self.status() {
            Ok(bits) => bits.get(bit),
            Err(e) => {
                warn!("Status query failed: {}", e);
                false
            }
        }
    }

    // ─── Connect ────────────────────────────────────────────────────

    /// Run the connect handshake and record its outcome.
    ///
    /// Self-check and firmware problems are reported through the returned
    /// state; transport failures leave the controller `Disconnected`.
    pub fn connect(&self, version_check: bool) -> Result<ConnectionState, McError> {
        self.set_state(ConnectionState::Connecting);
        match self.handshake(version_check) {
            Ok(state) => {
                self.set_state(state.clone());
                Ok(state)
            }
            Err(e) => {
                error!("MC connect failed: {}", e);
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    fn handshake(&self, version_check: bool) -> Result<ConnectionState, McError> {
        if !self.link.is_open() {
            return Err(McError::CommunicationFailed("MC port is closed".to_string()));
        }

        let bits = self.read_status()?;
        if bits.contains(StatusBits::FATAL) {
            let code = SelfCheckCode::from_code(self.get_int("?err")?);
            error!("MC failed with fatal flag: {}", code);
            return Ok(ConnectionState::Fatal(code));
        }
        if bits.contains(StatusBits::RESET) {
            let flags = self.get_bool_list("?rst", 8)?;
            let raw = frame::encode_bits(&flags)? as u8;
            for name in ResetFlags::describe(raw) {
                info!("motion controller reset flag: {}", name);
            }
        }

        let fw_version = self.get_text("?ver")?;
        info!("Motion controller firmware version: {}", fw_version);
        if version_check && fw_version != REQUIRED_FW_VERSION {
            error!(
                "Incorrect firmware, version {} is required",
                REQUIRED_FW_VERSION
            );
            return Ok(ConnectionState::WrongFirmware { found: fw_version });
        }

        let rev = self.get_int_list("?rev")?;
        let &[fw_revision, word] = rev.as_slice() else {
            return Err(McError::ProtocolError(format!(
                "?rev returned {} values",
                rev.len()
            )));
        };
        let board_revision = word.rem_euclid(32);
        let sub = word.div_euclid(32);
        let board_sub_revision = u32::try_from(sub)
            .ok()
            .and_then(|sub| char::from_u32(u32::from('a') + sub))
            .unwrap_or('?');
        info!(
            "motion controller board revision: {}{}",
            board_revision, board_sub_revision
        );
        if board_revision != i32::from(SUPPORTED_BOARD_REVISION) {
            warn!(
                "Unsupported board revision {}, expected {}",
                board_revision, SUPPORTED_BOARD_REVISION
            );
        }
        if fw_revision != board_revision {
            warn!(
                "Board and firmware revisions differ! Firmware: {}, board: {}!",
                fw_revision, board_revision
            );
        }

        let mut serial_no = self.get_text("?ser")?;
        if serial_no.is_empty() {
            warn!("motion controller serial number is invalid");
            serial_no = INVALID_SERIAL.to_string();
        } else {
            info!("motion controller serial number: {}", serial_no);
        }

        Ok(ConnectionState::Connected(ConnectionInfo {
            fw_version,
            fw_revision,
            board_revision,
            board_sub_revision,
            serial_no,
        }))
    }

    // ─── Reset & Flash ──────────────────────────────────────────────

    /// Pulse the reset line. Callers hold whatever part of the gate they
    /// need; the MC must be waited for with [`Self::ensure_ready`].
    pub fn hard_reset(&self) -> Result<(), McError> {
        info!("Doing hard reset of the motion controller");
        self.link.mark_reset("Motion controller hard reset");
        self.reset_line
            .pulse()
            .map_err(|e| McError::CommunicationFailed(format!("Hard reset failed: {e}")))
    }

    /// `!rst` and wait for the MC to come back.
    pub fn soft_reset(&self) -> Result<(), McError> {
        let _guard = self.gate.command()?;
        self.drain_garbage();
        self.link.mark_reset("Motion controller soft reset");
        self.link.write_line("!rst\n")?;
        self.wait_ready(true)
    }

    /// Wait for the boot banner after a reset.
    pub fn ensure_ready(&self) -> Result<(), McError> {
        let _guard = self.gate.command()?;
        self.wait_ready(false)
    }

    fn wait_ready(&self, after_soft_reset: bool) -> Result<(), McError> {
        let mut mcusr = self.link.read_line(false)?;
        if after_soft_reset && matches!(parse_line(&mcusr), Frame::Response(Response::Ok(_))) {
            debug!("Detected \"ok\" instead of MCUSR, skipping");
            mcusr = self.link.read_line(false)?;
        }
        debug!("\"MCUSR...\" read resulted in: \"{}\"", mcusr);

        let ready = self.link.read_line(false)?;
        if ready != READY_BANNER {
            info!(
                "\"ready\" read resulted in: \"{}\". Sleeping to ensure MC is ready.",
                ready
            );
            thread::sleep(READY_FALLBACK_DELAY);
            self.drain_garbage();
        }
        Ok(())
    }

    /// Program the MC with the external flashing utility.
    ///
    /// Normal commands are refused for the whole duration. The reader thread
    /// is parked while the utility owns the port.
    pub fn flash(&self, board_version: u8) -> Result<(), McError> {
        let _flashing = self.gate.begin_flash()?;
        {
            let _raw = self.link.lock_raw_read();
            self.hard_reset()?;
            flash::run_flash_utility(&self.flash, board_version, &self.serial.device)?;
        }
        self.wait_ready(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::Port;
    use resin_common::mc::codes::CommError;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::time::Duration;

    /// Answers each written line with the next canned reply.
    struct Scripted {
        replies: Arc<Mutex<VecDeque<&'static str>>>,
        tx: mpsc::Sender<Vec<u8>>,
    }

    impl Port for Scripted {
        fn write_bytes(&mut self, _data: &[u8]) -> io::Result<()> {
            if let Some(reply) = self.replies.lock().pop_front() {
                let _ = self.tx.send(reply.as_bytes().to_vec());
            }
            Ok(())
        }

        fn set_baud_rate(&mut self, _baud: u32) -> io::Result<()> {
            Ok(())
        }
    }

    struct Rx(mpsc::Receiver<Vec<u8>>);

    impl io::Read for Rx {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.recv_timeout(Duration::from_millis(10)) {
                Ok(data) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                Err(mpsc::RecvTimeoutError::Timeout) => Err(io::ErrorKind::TimedOut.into()),
                Err(mpsc::RecvTimeoutError::Disconnected) => Ok(0),
            }
        }
    }

    struct NoReset;

    impl ResetLine for NoReset {
        fn pulse(&self) -> io::Result<()> {
            Ok(())
        }
    }

    fn controller(replies: &[&'static str]) -> McController {
        let (tx, rx) = mpsc::channel();
        let port = Scripted {
            replies: Arc::new(Mutex::new(replies.iter().copied().collect())),
            tx,
        };
        let link = Link::new(Box::new(port), Box::new(Rx(rx)), Duration::from_millis(300)).unwrap();
        McController::new(
            link,
            Box::new(NoReset),
            SerialConfig::default(),
            FlashConfig::default(),
        )
    }

    #[test]
    fn typed_getters() {
        let mc = controller(&["42 ok\n", "6 38 ok\n", "1 ok\n", "5 ok\n", "ok\n"]);
        assert_eq!(mc.get_int("?tipo").unwrap(), 42);
        assert_eq!(mc.get_int_list("?rev").unwrap(), vec![6, 38]);
        assert!(mc.get_bool("?rsen").unwrap());
        assert_eq!(mc.get_bool_list("?fans", 3).unwrap(), vec![true, false, true]);
        mc.set_bool_list("!fans", &[true, true, false]).unwrap();
        let written: Vec<String> = mc
            .link()
            .trace()
            .snapshot()
            .iter()
            .filter(|t| t.marker == crate::trace::TraceMarker::Output)
            .map(|t| t.line.clone())
            .collect();
        assert_eq!(written.last().unwrap(), "!fans 3");
    }

    #[test]
    fn comments_are_skipped_mid_wait() {
        let mc = controller(&["# homing\n12 ok\n"]);
        assert_eq!(mc.get_int("?tiho").unwrap(), 12);
    }

    #[test]
    fn unterminated_garbage_is_drained_before_command() {
        let mc = controller(&["1 ok\n\x01MCUSR", "42 ok\n"]);
        assert_eq!(mc.get_int("?tics").unwrap(), 1);
        assert_eq!(mc.get_int("?tipo").unwrap(), 42);
        assert!(mc
            .link()
            .trace()
            .snapshot()
            .iter()
            .any(|t| t.marker == crate::trace::TraceMarker::Garbage && t.line.contains("MCUSR")));
    }

    #[test]
    fn too_many_flags_are_refused_before_sending() {
        let mc = controller(&["ok\n"]);
        assert!(matches!(
            mc.set_bool_list("!frpm", &[true; 65]),
            Err(McError::ProtocolError(_))
        ));
        assert!(mc.link().trace().snapshot().is_empty());
        mc.set_bool_list("!frpm", &[true, false, true]).unwrap();
    }

    #[test]
    fn error_reply_maps_to_command_error() {
        let mc = controller(&["e3\n"]);
        assert_eq!(
            mc.execute(&Command::new("!bogus")).unwrap(),
            Response::Err(CommError::SyntaxError)
        );
        let mc = controller(&["e4\n"]);
        assert_eq!(
            mc.do_command(Command::new("!upwm").arg(999)),
            Err(McError::CommandError(CommError::ParamOutOfRange))
        );
    }

    #[test]
    fn garbage_mid_wait_is_protocol_error() {
        let mc = controller(&["garbage\n"]);
        assert!(matches!(
            mc.execute(&Command::new("?ver")),
            Err(McError::ProtocolError(_))
        ));
    }

    #[test]
    fn silence_is_communication_failure() {
        let mc = controller(&[]);
        assert!(matches!(
            mc.execute(&Command::new("?ver")),
            Err(McError::CommunicationFailed(_))
        ));
    }

    #[test]
    fn connect_reads_identity() {
        let mc = controller(&["0 ok\n", "1.0.0 ok\n", "6 6 ok\n", "CZPX1234 ok\n"]);
        let state = mc.connect(true).unwrap();
        let info = state.ensure_connected().unwrap();
        assert_eq!(info.fw_version, "1.0.0");
        assert_eq!(info.board_revision, 6);
        assert_eq!(info.board_sub_revision, 'a');
        assert_eq!(info.serial_no, "CZPX1234");
        assert!(mc.state().is_connected());
    }

    #[test]
    fn connect_reports_reset_and_sub_revision() {
        // reset bit set, ?rst = power_on | watchdog, board 6b, empty serial
        let mc = controller(&["8192 ok\n", "9 ok\n", "X ok\n", "6 38 ok\n", "ok\n"]);
        let state = mc.connect(false).unwrap();
        let info = state.ensure_connected().unwrap();
        assert_eq!(info.board_sub_revision, 'b');
        assert_eq!(info.serial_no, INVALID_SERIAL);
    }

    #[test]
    fn connect_fatal_and_wrong_firmware() {
        let mc = controller(&["32768 ok\n", "7 ok\n"]);
        let state = mc.connect(true).unwrap();
        assert_eq!(state, ConnectionState::Fatal(SelfCheckCode::TmcSpi));
        assert_eq!(
            state.ensure_connected(),
            Err(McError::SelfCheckFatal(SelfCheckCode::TmcSpi))
        );

        let mc = controller(&["0 ok\n", "0.9.9 ok\n"]);
        let state = mc.connect(true).unwrap();
        assert_eq!(
            state,
            ConnectionState::WrongFirmware {
                found: "0.9.9".to_string()
            }
        );
    }

    #[test]
    fn connect_transport_failure_disconnects() {
        let mc = controller(&["0 ok\n"]);
        assert!(matches!(
            mc.connect(true),
            Err(McError::CommunicationFailed(_))
        ));
        assert_eq!(mc.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn soft_reset_skips_stray_ok() {
        let mc = controller(&["ok\nMCUSR 01\nready\n", "0 ok\n"]);
        mc.soft_reset().unwrap();
        assert_eq!(mc.get_int("?").unwrap(), 0);
    }

    #[test]
    fn status_feeds_tracker() {
        let mc = controller(&["129 ok\n"]);
        let rx = mc.status_tracker().subscribe();
        let bits = mc.status().unwrap();
        assert!(bits.contains(StatusBits::TOWER | StatusBits::COVER));
        assert_eq!(rx.try_iter().count(), crate::status::WATCHED.len());
    }

    #[test]
    fn commands_refused_while_flashing() {
        let mc = controller(&[]);
        let _flash = mc.gate().begin_flash().unwrap();
        assert_eq!(
            mc.execute(&Command::new("?")),
            Err(McError::FlashInProgress)
        );
    }
}
