//! Command interpreter of the simulated MC.
//!
//! [`SimState`] holds everything the firmware would: axis positions and
//! profiles, homing progress, peripheral registers and status flags. It is
//! scriptable from tests through its public fields.

use crate::axis::CancelToken;
use resin_common::consts::{FAN_COUNT, PROFILE_PARAMS, PROFILE_SLOTS, TEMP_SENSOR_COUNT};
use resin_common::mc::codes::CommError;
use resin_common::mc::profile::AxisProfile;
use resin_common::mc::status::StatusBits;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::trace;

/// Homing status reported while homing is still running.
pub const HOMING_IN_PROGRESS: i32 = 1;
/// Homing status reported after a failed homing.
pub const HOMING_FAILED: i32 = -1;

/// Simulated stepper axis.
#[derive(Debug, Clone)]
pub struct SimAxis {
    /// Current position [microsteps].
    pub position: i32,
    /// `?mot` queries that still report the axis as moving.
    pub moving_polls: u32,
    /// Homing status queries that still report "in progress".
    pub homing_polls: u32,
    /// Status reported once homing finishes.
    pub homing_result: i32,
    /// Scripted outcomes of the next homings, 0 or negative. Empty means
    /// success.
    pub outcomes: VecDeque<i32>,
    /// Fail every homing regardless of `outcomes`.
    pub always_fail: bool,
    pub homing_attempts: u32,
    /// Result of the homing before the current one.
    stale_result: i32,
    homing_started: Option<Instant>,
    pub profile: u8,
    pub profiles: [AxisProfile; PROFILE_SLOTS],
    pub current: i32,
    pub enabled: bool,
}

impl Default for SimAxis {
    fn default() -> Self {
        Self {
            position: 0,
            moving_polls: 0,
            homing_polls: 0,
            homing_result: 0,
            outcomes: VecDeque::new(),
            always_fail: false,
            homing_attempts: 0,
            stale_result: 0,
            homing_started: None,
            profile: 0,
            profiles: [AxisProfile::new([0; PROFILE_PARAMS]); PROFILE_SLOTS],
            current: 0,
            enabled: false,
        }
    }
}

impl SimAxis {
    fn home(&mut self, polls: u32, calibrate: bool) {
        self.homing_attempts += 1;
        self.enabled = true;
        let outcome = if calibrate {
            0
        } else if self.always_fail {
            HOMING_FAILED
        } else {
            self.outcomes.pop_front().unwrap_or(0)
        };
        self.homing_polls = polls;
        self.stale_result = self.homing_result;
        self.homing_started = Some(Instant::now());
        self.homing_result = outcome;
        if outcome == 0 {
            self.position = 0;
        }
    }

    fn homing_status(&mut self, latency: Duration) -> i32 {
        if self.homing_started.is_some_and(|started| started.elapsed() < latency) {
            return self.stale_result;
        }
        if self.homing_polls > 0 {
            self.homing_polls -= 1;
            HOMING_IN_PROGRESS
        } else {
            self.homing_result
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AxisSel {
    Tilt,
    Tower,
}

impl AxisSel {
    const fn mask(self) -> i32 {
        match self {
            Self::Tower => 1,
            Self::Tilt => 2,
        }
    }
}

/// Firmware state of the simulated MC.
#[derive(Debug)]
pub struct SimState {
    pub tilt: SimAxis,
    pub tower: SimAxis,
    /// `?mot` polls every move reports before it completes.
    pub move_polls: u32,
    /// Homing status polls every homing reports before it completes.
    pub homing_polls: u32,
    /// Time after a homing command during which the previous homing result
    /// is still reported.
    pub homing_latency: Duration,
    /// Number of upcoming moves that stall halfway.
    pub stall_moves: u32,
    /// Number of upcoming tilt moves to zero that leave the endstop open.
    pub stuck_endstop: u32,
    endstop_open: bool,
    /// Tower position [microsteps] where the resin sensor triggers.
    pub resin_level: Option<i32>,
    pub resin_sensor: bool,
    pub resin_triggered: bool,
    /// Self-check code reported through `?err`; sets the fatal flag.
    pub fatal: Option<i32>,
    /// Reset causes reported through `?rst`; sets the reset flag.
    pub reset_flags: u8,
    pub version: String,
    /// `(fw_revision, board_word)` as returned by `?rev`.
    pub revision: (i32, i32),
    pub serial: String,
    pub cover_closed: bool,
    pub button: bool,
    pub fans_enabled: [bool; FAN_COUNT],
    pub fan_rpm: [u32; FAN_COUNT],
    pub fan_error: [bool; FAN_COUNT],
    pub uv_on: bool,
    pub uv_pwm: u32,
    /// `(led_seconds, display_seconds)` as returned by `?usta`.
    pub uv_stats: (u32, u32),
    pub power_led_mode: u32,
    pub power_led_pwm: u32,
    /// Temperatures [0.1 °C].
    pub temps: [i32; TEMP_SENSOR_COUNT],
    /// Voltages [mV].
    pub volts: [i32; 4],
    pub beeps: Vec<(u32, u32)>,
    pub eeprom_cleared: bool,
    /// Baud rates requested by the host, in order.
    pub baud_log: Vec<u32>,
    /// Every command line received, in order.
    pub commands: Vec<String>,
    /// Cancel the token once an axis has been homed this many times.
    pub cancel_homing_after: Option<(u32, CancelToken)>,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            tilt: SimAxis::default(),
            tower: SimAxis::default(),
            move_polls: 1,
            homing_polls: 1,
            homing_latency: Duration::ZERO,
            stall_moves: 0,
            stuck_endstop: 0,
            endstop_open: false,
            resin_level: None,
            resin_sensor: false,
            resin_triggered: false,
            fatal: None,
            reset_flags: 0,
            version: "1.0.0".to_string(),
            revision: (6, 6),
            serial: "CZPX0001SIM".to_string(),
            cover_closed: true,
            button: false,
            fans_enabled: [false; FAN_COUNT],
            fan_rpm: [0; FAN_COUNT],
            fan_error: [false; FAN_COUNT],
            uv_on: false,
            uv_pwm: 0,
            uv_stats: (0, 0),
            power_led_mode: 0,
            power_led_pwm: 100,
            temps: [215, 220, 235, 240],
            volts: [12_050, 12_100, 12_000, 0],
            beeps: Vec::new(),
            eeprom_cleared: false,
            baud_log: Vec::new(),
            commands: Vec::new(),
            cancel_homing_after: None,
        }
    }
}

type Reply = Result<Option<String>, CommError>;

fn join<T: ToString>(values: impl IntoIterator<Item = T>) -> String {
    values
        .into_iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn bits_word(bits: &[bool]) -> u32 {
    bits.iter()
        .enumerate()
        .filter(|(_, set)| **set)
        .fold(0, |word, (i, _)| word | (1 << i))
}

struct Args<'a>(Vec<&'a str>);

impl Args<'_> {
    fn int(&self, i: usize) -> Result<i32, CommError> {
        self.0
            .get(i)
            .and_then(|a| a.parse().ok())
            .ok_or(CommError::SyntaxError)
    }

    fn uint(&self, i: usize) -> Result<u32, CommError> {
        u32::try_from(self.int(i)?).map_err(|_| CommError::ParamOutOfRange)
    }

    fn expect(&self, count: usize) -> Result<(), CommError> {
        if self.0.len() == count {
            Ok(())
        } else {
            Err(CommError::SyntaxError)
        }
    }
}

impl SimState {
    /// Status word as answered to `?`.
    pub fn status_word(&self) -> StatusBits {
        let mut bits = StatusBits::empty();
        bits.set(StatusBits::TOWER, self.tower.moving_polls > 0);
        bits.set(StatusBits::TILT, self.tilt.moving_polls > 0);
        bits.set(StatusBits::BUTTON, self.button);
        bits.set(StatusBits::COVER, self.cover_closed);
        bits.set(StatusBits::ENDSTOP, self.endstop());
        bits.set(StatusBits::RESET, self.reset_flags != 0);
        bits.set(StatusBits::FANS, self.fan_error.iter().any(|e| *e));
        bits.set(StatusBits::FATAL, self.fatal.is_some());
        bits
    }

    pub fn endstop(&self) -> bool {
        self.tilt.position <= 0 && !self.endstop_open
    }

    /// Effect of a hard reset on the firmware state.
    pub fn power_cycle(&mut self) {
        self.tilt.moving_polls = 0;
        self.tower.moving_polls = 0;
        self.tilt.enabled = false;
        self.tower.enabled = false;
        self.resin_sensor = false;
        self.uv_on = false;
        self.reset_flags |= 0b10;
    }

    fn axis(&mut self, sel: AxisSel) -> &mut SimAxis {
        match sel {
            AxisSel::Tilt => &mut self.tilt,
            AxisSel::Tower => &mut self.tower,
        }
    }

    fn start_move(&mut self, sel: AxisSel, target: i32) {
        let polls = self.move_polls;
        let stall = self.stall_moves > 0;
        if stall {
            self.stall_moves -= 1;
        }
        let axis = self.axis(sel);
        let start = axis.position;
        axis.position = if stall {
            start + (target - start) / 2
        } else {
            target
        };
        axis.moving_polls = polls;
        axis.enabled = true;
        let end = axis.position;

        if sel == AxisSel::Tilt && end <= 0 {
            self.endstop_open = self.stuck_endstop > 0;
            self.stuck_endstop = self.stuck_endstop.saturating_sub(1);
        }
    }

    fn home(&mut self, sel: AxisSel, calibrate: bool) {
        let polls = self.homing_polls;
        let axis = self.axis(sel);
        axis.home(polls, calibrate);
        let attempts = axis.homing_attempts;
        let homed = axis.homing_result == 0;
        if sel == AxisSel::Tilt && homed {
            self.endstop_open = false;
        }
        if let Some((after, token)) = &self.cancel_homing_after {
            if attempts >= *after {
                token.cancel();
            }
        }
    }

    fn resin_move(&mut self, distance: i32) {
        let start = self.tower.position;
        let end = start - distance;
        let stop = match self.resin_level {
            Some(level) if self.resin_sensor && level <= start && level >= end => level,
            _ => end,
        };
        self.resin_triggered = self.resin_sensor && stop != end;
        self.tower.position = stop;
        self.tower.moving_polls = self.move_polls;
    }

    /// Handle an axis verb such as `?tipo` or `!twma`.
    fn axis_command(&mut self, query: bool, sel: AxisSel, op: &str, args: &Args<'_>) -> Reply {
        match (query, op) {
            (false, "ho") => self.home(sel, false),
            (false, "hc") => self.home(sel, true),
            (true, "ho") => {
                let latency = self.homing_latency;
                return Ok(Some(self.axis(sel).homing_status(latency).to_string()));
            }
            (false, "ma") => {
                args.expect(1)?;
                self.start_move(sel, args.int(0)?);
            }
            (true, "po") => return Ok(Some(self.axis(sel).position.to_string())),
            (false, "po") => {
                args.expect(1)?;
                self.axis(sel).position = args.int(0)?;
            }
            (false, "cs") => {
                let slot = args.uint(0)?;
                if slot as usize >= PROFILE_SLOTS {
                    return Err(CommError::ParamOutOfRange);
                }
                self.axis(sel).profile = slot as u8;
            }
            (true, "cs") => return Ok(Some(self.axis(sel).profile.to_string())),
            (false, "cf") => {
                args.expect(PROFILE_PARAMS)?;
                let values = (0..PROFILE_PARAMS)
                    .map(|i| args.int(i))
                    .collect::<Result<Vec<_>, _>>()?;
                let axis = self.axis(sel);
                let slot = axis.profile as usize;
                axis.profiles[slot] =
                    AxisProfile::from_slice(&values).ok_or(CommError::SyntaxError)?;
            }
            (true, "cf") => {
                let axis = self.axis(sel);
                return Ok(Some(join(axis.profiles[axis.profile as usize].values().iter())));
            }
            (false, "cu") => self.axis(sel).current = args.int(0)?,
            _ => return Err(CommError::SyntaxError),
        }
        Ok(None)
    }

    /// Process one command line and produce the raw reply, newline
    /// terminated, possibly spanning several lines.
    pub fn handle(&mut self, line: &str) -> String {
        self.commands.push(line.to_string());
        let mut words = line.split_whitespace();
        let verb = words.next().unwrap_or_default();
        let args = Args(words.collect());

        if verb == "!rst" {
            self.power_cycle();
            return "ok\nMCUSR 02\nready\n".to_string();
        }

        let reply = self.dispatch(verb, &args);
        trace!(command = line, ?reply, "Simulated MC reply");
        match reply {
            Ok(Some(payload)) => format!("{payload} ok\n"),
            Ok(None) => "ok\n".to_string(),
            Err(code) => format!("e{}\n", code.code()),
        }
    }

    fn dispatch(&mut self, verb: &str, args: &Args<'_>) -> Reply {
        let query = verb.starts_with('?');
        if let Some(sel) = match verb.get(1..3) {
            Some("ti") if verb.len() == 5 => Some(AxisSel::Tilt),
            Some("tw") if verb.len() == 5 => Some(AxisSel::Tower),
            _ => None,
        } {
            return self.axis_command(query, sel, &verb[3..], args);
        }

        let value = match verb {
            "?" => self.status_word().bits().to_string(),
            "?err" => self.fatal.unwrap_or(0).to_string(),
            "?rst" => {
                let flags = self.reset_flags;
                self.reset_flags = 0;
                flags.to_string()
            }
            "?ver" => self.version.clone(),
            "?rev" => join([self.revision.0, self.revision.1]),
            "?ser" => self.serial.clone(),
            "?mot" => {
                let mut mask = 0;
                for sel in [AxisSel::Tower, AxisSel::Tilt] {
                    let axis = self.axis(sel);
                    if axis.moving_polls > 0 {
                        axis.moving_polls -= 1;
                        mask |= sel.mask();
                    }
                }
                mask.to_string()
            }
            "!mot" => {
                let keep = args.int(0)?;
                for sel in [AxisSel::Tower, AxisSel::Tilt] {
                    if keep & sel.mask() == 0 {
                        self.axis(sel).moving_polls = 0;
                    }
                }
                return Ok(None);
            }
            "?ena" => {
                (i32::from(self.tower.enabled) | i32::from(self.tilt.enabled) << 1).to_string()
            }
            "!ena" => {
                let mask = args.int(0)?;
                self.tower.enabled = mask & 1 != 0;
                self.tilt.enabled = mask & 2 != 0;
                return Ok(None);
            }
            "!motr" => {
                self.tower.enabled = false;
                self.tilt.enabled = false;
                return Ok(None);
            }
            "!fans" => {
                let mask = args.uint(0)?;
                for (i, fan) in self.fans_enabled.iter_mut().enumerate() {
                    *fan = mask & (1 << i) != 0;
                }
                return Ok(None);
            }
            "?fans" => bits_word(&self.fans_enabled).to_string(),
            "?fane" => bits_word(&self.fan_error).to_string(),
            "!frpm" => {
                args.expect(FAN_COUNT)?;
                for i in 0..FAN_COUNT {
                    self.fan_rpm[i] = args.uint(i)?;
                }
                return Ok(None);
            }
            "?frpm" => join(self.fan_rpm),
            "!uled" => {
                self.uv_on = args.int(0)? != 0;
                return Ok(None);
            }
            "?uled" => join([u32::from(self.uv_on), 0]),
            "!upwm" => {
                let pwm = args.uint(0)?;
                if pwm > 250 {
                    return Err(CommError::ParamOutOfRange);
                }
                self.uv_pwm = pwm;
                return Ok(None);
            }
            "?upwm" => self.uv_pwm.to_string(),
            "?usta" => join([self.uv_stats.0, self.uv_stats.1]),
            "!usta" => {
                match args.int(0)? {
                    0 => {}
                    1 => self.uv_stats.0 = 0,
                    2 => self.uv_stats.1 = 0,
                    _ => return Err(CommError::ParamOutOfRange),
                }
                return Ok(None);
            }
            "?temp" => join(self.temps),
            "?volt" => join(self.volts),
            "!rsen" => {
                self.resin_sensor = args.int(0)? != 0;
                if !self.resin_sensor {
                    self.resin_triggered = false;
                }
                return Ok(None);
            }
            "?rsen" => u8::from(self.resin_sensor).to_string(),
            "?rsst" => u8::from(self.resin_triggered).to_string(),
            "!rsme" => {
                self.resin_move(args.int(0)?);
                return Ok(None);
            }
            "!pled" => {
                self.power_led_mode = args.uint(0)?;
                return Ok(None);
            }
            "?pled" => self.power_led_mode.to_string(),
            "!ppwm" => {
                self.power_led_pwm = args.uint(0)? * 5;
                return Ok(None);
            }
            "?ppwm" => (self.power_led_pwm / 5).to_string(),
            "!beep" => {
                self.beeps.push((args.uint(0)?, args.uint(1)?));
                return Ok(None);
            }
            "!eecl" => {
                self.eeprom_cleared = true;
                return Ok(None);
            }
            _ => return Err(CommError::SyntaxError),
        };
        Ok(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replies_follow_wire_grammar() {
        let mut mc = SimState::default();
        assert_eq!(mc.handle("?ver"), "1.0.0 ok\n");
        assert_eq!(mc.handle("!tima 100"), "ok\n");
        assert_eq!(mc.handle("?tipo"), "100 ok\n");
        assert_eq!(mc.handle("!nope"), "e3\n");
        assert_eq!(mc.handle("!tics 9"), "e4\n");
        assert_eq!(mc.handle("!rst"), "ok\nMCUSR 02\nready\n");
        assert_eq!(mc.commands.len(), 6);
    }

    #[test]
    fn moves_report_motion_for_configured_polls() {
        let mut mc = SimState {
            move_polls: 2,
            ..SimState::default()
        };
        mc.handle("!twma 800");
        assert_eq!(mc.handle("?mot"), "1 ok\n");
        assert_eq!(mc.handle("?mot"), "1 ok\n");
        assert_eq!(mc.handle("?mot"), "0 ok\n");
    }

    #[test]
    fn scripted_homing_outcomes() {
        let mut mc = SimState::default();
        mc.tilt.outcomes.extend([-2, 0]);
        mc.handle("!tiho");
        assert_eq!(mc.handle("?tiho"), "1 ok\n");
        assert_eq!(mc.handle("?tiho"), "-2 ok\n");
        mc.handle("!tiho");
        mc.handle("?tiho");
        assert_eq!(mc.handle("?tiho"), "0 ok\n");
        assert_eq!(mc.tilt.homing_attempts, 2);
    }

    #[test]
    fn stalled_move_stops_halfway() {
        let mut mc = SimState {
            stall_moves: 1,
            ..SimState::default()
        };
        mc.handle("!tima 1000");
        assert_eq!(mc.tilt.position, 500);
        mc.handle("!tima 1000");
        assert_eq!(mc.tilt.position, 1000);
    }

    #[test]
    fn stuck_endstop_opens_once() {
        let mut mc = SimState {
            stuck_endstop: 1,
            ..SimState::default()
        };
        mc.handle("!tima 0");
        assert!(!mc.endstop());
        mc.handle("!tipo 128");
        mc.handle("!tima 0");
        assert!(mc.endstop());
    }

    #[test]
    fn resin_sensor_stops_tower() {
        let mut mc = SimState {
            resin_level: Some(4800),
            ..SimState::default()
        };
        mc.handle("!twpo 28800");
        mc.handle("!rsen 1");
        mc.handle("!rsme 28000");
        assert_eq!(mc.tower.position, 4800);
        assert_eq!(mc.handle("?rsst"), "1 ok\n");

        mc.handle("!twpo 28800");
        mc.resin_level = None;
        mc.handle("!rsme 28000");
        assert_eq!(mc.tower.position, 800);
        assert_eq!(mc.handle("?rsst"), "0 ok\n");
    }

    #[test]
    fn status_word_reflects_state() {
        let mut mc = SimState {
            fatal: Some(3),
            reset_flags: 1,
            ..SimState::default()
        };
        let bits = mc.status_word();
        assert!(bits.contains(StatusBits::FATAL | StatusBits::RESET | StatusBits::COVER));
        assert!(bits.contains(StatusBits::ENDSTOP));
        assert_eq!(mc.handle("?rst"), "1 ok\n");
        assert!(!mc.status_word().contains(StatusBits::RESET));
    }
}
