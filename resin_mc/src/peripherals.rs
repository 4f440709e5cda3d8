//! MC-attached I/O other than the two axes.
//!
//! Fans, UV LED, resin sensor, power LED, beeper, temperature and voltage
//! readouts. Thin typed wrappers over [`McController`]; none of them retry.

use crate::controller::McController;
use crate::frame::Command;
use resin_common::consts::{FAN_COUNT, TEMP_SENSOR_COUNT};
use resin_common::mc::error::McError;
use resin_common::mc::hw::HwConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Highest UV LED PWM accepted by the MC.
pub const UV_PWM_MAX: u32 = 250;

/// UV LED state as reported by `?uled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UvLedState {
    pub on: bool,
    /// Remaining on-time of a timed exposure [ms], 0 when untimed.
    pub remaining_ms: u32,
}

/// Lifetime counters reported by `?usta` [s].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UvStatistics {
    pub led_seconds: u32,
    pub display_seconds: u32,
}

pub struct Peripherals {
    mc: Arc<McController>,
    hw: Arc<HwConfig>,
}

fn expect_len<T>(what: &str, values: Vec<T>, len: usize) -> Result<Vec<T>, McError> {
    if values.len() == len {
        Ok(values)
    } else {
        Err(McError::ProtocolError(format!(
            "{what}: expected {len} values, got {}",
            values.len()
        )))
    }
}

fn non_negative(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

impl Peripherals {
    pub fn new(mc: Arc<McController>, hw: Arc<HwConfig>) -> Self {
        Self { mc, hw }
    }

    /// Push the configured fan, UV and power LED settings to the MC.
    pub fn init_defaults(&self) -> Result<(), McError> {
        self.set_fan_rpm(&self.hw.fan_rpm)?;
        self.set_fans(&self.hw.fan_enabled)?;
        self.set_uv_pwm(self.hw.uv_pwm)?;
        self.set_power_led_pwm(self.hw.power_led_pwm)?;
        info!("MC peripherals initialised");
        Ok(())
    }

    // ─── Fans ───────────────────────────────────────────────────────

    pub fn set_fans(&self, enabled: &[bool; FAN_COUNT]) -> Result<(), McError> {
        self.mc.set_bool_list("!fans", enabled)
    }

    pub fn fans(&self) -> Result<Vec<bool>, McError> {
        self.mc.get_bool_list("?fans", FAN_COUNT)
    }

    /// Fans reporting a stall or missing tacho signal.
    pub fn fan_errors(&self) -> Result<Vec<bool>, McError> {
        self.mc.get_bool_list("?fane", FAN_COUNT)
    }

    pub fn set_fan_rpm(&self, rpm: &[u32; FAN_COUNT]) -> Result<(), McError> {
        self.mc
            .do_command(Command::new("!frpm").args(rpm.iter().copied()))
            .map(drop)
    }

    pub fn fan_rpm(&self) -> Result<Vec<i32>, McError> {
        expect_len("?frpm", self.mc.get_int_list("?frpm")?, FAN_COUNT)
    }

    // ─── UV LED ─────────────────────────────────────────────────────

    /// Switch the UV LED. A non-zero `duration` turns it off again after
    /// that time on the MC side.
    pub fn uv_led(&self, on: bool, duration: Duration) -> Result<(), McError> {
        let ms = u32::try_from(duration.as_millis()).unwrap_or(u32::MAX);
        debug!(on, ms, "UV LED");
        self.mc
            .do_command(Command::new("!uled").arg(on).arg(ms))
            .map(drop)
    }

    pub fn uv_led_state(&self) -> Result<UvLedState, McError> {
        let values = self.mc.get_int_list("?uled")?;
        match values.as_slice() {
            &[on] => Ok(UvLedState {
                on: on != 0,
                remaining_ms: 0,
            }),
            &[on, remaining] => Ok(UvLedState {
                on: on != 0,
                remaining_ms: non_negative(remaining),
            }),
            _ => Err(McError::ProtocolError(format!(
                "?uled: unexpected value count {}",
                values.len()
            ))),
        }
    }

    pub fn set_uv_pwm(&self, pwm: u32) -> Result<(), McError> {
        self.mc.do_command(Command::new("!upwm").arg(pwm)).map(drop)
    }

    pub fn uv_pwm(&self) -> Result<u32, McError> {
        self.mc.get_int("?upwm").map(non_negative)
    }

    pub fn uv_statistics(&self) -> Result<UvStatistics, McError> {
        let values = expect_len("?usta", self.mc.get_int_list("?usta")?, 2)?;
        Ok(UvStatistics {
            led_seconds: non_negative(values[0]),
            display_seconds: non_negative(values[1]),
        })
    }

    /// Persist the counters in the MC EEPROM.
    pub fn save_uv_statistics(&self) -> Result<(), McError> {
        self.mc.do_command(Command::new("!usta").arg(0)).map(drop)
    }

    /// Reset the LED counter after the UV LED was replaced.
    pub fn clear_uv_statistics(&self) -> Result<(), McError> {
        self.mc.do_command(Command::new("!usta").arg(1)).map(drop)
    }

    /// Reset the display counter after the exposure display was replaced.
    pub fn clear_display_statistics(&self) -> Result<(), McError> {
        self.mc.do_command(Command::new("!usta").arg(2)).map(drop)
    }

    // ─── Sensors ────────────────────────────────────────────────────

    /// Temperatures [°C]: UV LED, ambient, and the remaining probes.
    pub fn temperatures(&self) -> Result<Vec<f64>, McError> {
        expect_len(
            "?temp",
            self.mc.get_scaled_list("?temp", 0.1)?,
            TEMP_SENSOR_COUNT,
        )
    }

    /// Supply voltages [V].
    pub fn voltages(&self) -> Result<Vec<f64>, McError> {
        expect_len("?volt", self.mc.get_scaled_list("?volt", 0.001)?, 4)
    }

    pub fn set_resin_sensor(&self, enabled: bool) -> Result<(), McError> {
        self.mc
            .do_command(Command::new("!rsen").arg(enabled))
            .map(drop)
    }

    pub fn resin_sensor_enabled(&self) -> Result<bool, McError> {
        self.mc.get_bool("?rsen")
    }

    pub fn resin_sensor_triggered(&self) -> Result<bool, McError> {
        self.mc.get_bool("?rsst")
    }

    // ─── Power LED, beeper, misc ────────────────────────────────────

    pub fn set_power_led_mode(&self, mode: u8) -> Result<(), McError> {
        self.mc.do_command(Command::new("!pled").arg(mode)).map(drop)
    }

    pub fn power_led_mode(&self) -> Result<u8, McError> {
        let mode = self.mc.get_int("?pled")?;
        u8::try_from(mode)
            .map_err(|_| McError::ProtocolError(format!("?pled: mode {mode} out of range")))
    }

    /// Power LED brightness in percent. The MC works in steps of 5.
    pub fn set_power_led_pwm(&self, pwm: u32) -> Result<(), McError> {
        self.mc
            .do_command(Command::new("!ppwm").arg(pwm / 5))
            .map(drop)
    }

    pub fn power_led_pwm(&self) -> Result<u32, McError> {
        Ok(non_negative(self.mc.get_int("?ppwm")?) * 5)
    }

    /// Beep unless the printer is muted.
    pub fn beep(&self, frequency_hz: u32, length: Duration) -> Result<(), McError> {
        if self.hw.mute {
            return Ok(());
        }
        let ms = u32::try_from(length.as_millis()).unwrap_or(u32::MAX);
        self.mc
            .do_command(Command::new("!beep").arg(frequency_hz).arg(ms))
            .map(drop)
    }

    /// Short confirmation beep.
    pub fn beep_echo(&self) -> Result<(), McError> {
        self.beep(1800, Duration::from_millis(50))
    }

    /// Disable both motor drivers.
    pub fn motors_release(&self) -> Result<(), McError> {
        self.mc.do_command("!motr").map(drop)
    }

    /// Wipe the MC EEPROM (factory reset).
    pub fn eeprom_clear(&self) -> Result<(), McError> {
        info!("Clearing MC EEPROM");
        self.mc.do_command("!eecl").map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedMc;
    use resin_common::config::McConfig;
    use resin_common::mc::codes::CommError;

    fn rig(hw: HwConfig) -> (SimulatedMc, Peripherals) {
        let sim = SimulatedMc::new();
        let mc = Arc::new(sim.controller(&McConfig::default()).unwrap());
        (sim, Peripherals::new(mc, Arc::new(hw)))
    }

    #[test]
    fn defaults_reach_mc() {
        let mut hw = HwConfig::default();
        hw.fan_enabled[1] = false;
        hw.power_led_pwm = 40;
        let (sim, io) = rig(hw);
        io.init_defaults().unwrap();

        let state = sim.state();
        assert_eq!(state.fans_enabled, [true, false, true]);
        assert_eq!(state.fan_rpm, [2000, 3300, 1000]);
        assert_eq!(state.power_led_pwm, 40);
        drop(state);
        assert_eq!(io.fans().unwrap(), vec![true, false, true]);
        assert_eq!(io.power_led_pwm().unwrap(), 40);
        assert_eq!(io.fan_rpm().unwrap(), vec![2000, 3300, 1000]);
    }

    #[test]
    fn fan_errors_decode_bits() {
        let (sim, io) = rig(HwConfig::default());
        sim.state().fan_error = [false, true, false];
        assert_eq!(io.fan_errors().unwrap(), vec![false, true, false]);
    }

    #[test]
    fn uv_led_and_pwm() {
        let (sim, io) = rig(HwConfig::default());
        io.uv_led(true, Duration::from_secs(2)).unwrap();
        assert!(sim.state().commands.iter().any(|c| c == "!uled 1 2000"));
        assert_eq!(
            io.uv_led_state().unwrap(),
            UvLedState {
                on: true,
                remaining_ms: 0
            }
        );

        io.set_uv_pwm(200).unwrap();
        assert_eq!(io.uv_pwm().unwrap(), 200);
        assert_eq!(
            io.set_uv_pwm(UV_PWM_MAX + 1),
            Err(McError::CommandError(CommError::ParamOutOfRange))
        );
    }

    #[test]
    fn uv_statistics_clear_separately() {
        let (sim, io) = rig(HwConfig::default());
        sim.state().uv_stats = (3600, 7200);
        io.save_uv_statistics().unwrap();
        io.clear_uv_statistics().unwrap();
        assert_eq!(
            io.uv_statistics().unwrap(),
            UvStatistics {
                led_seconds: 0,
                display_seconds: 7200
            }
        );
        io.clear_display_statistics().unwrap();
        assert_eq!(io.uv_statistics().unwrap().display_seconds, 0);
    }

    #[test]
    fn sensors_are_scaled() {
        let (_sim, io) = rig(HwConfig::default());
        let temps = io.temperatures().unwrap();
        assert!((temps[0] - 21.5).abs() < 1e-9);
        let volts = io.voltages().unwrap();
        assert!((volts[1] - 12.1).abs() < 1e-9);
    }

    #[test]
    fn resin_sensor_flags() {
        let (_sim, io) = rig(HwConfig::default());
        io.set_resin_sensor(true).unwrap();
        assert!(io.resin_sensor_enabled().unwrap());
        assert!(!io.resin_sensor_triggered().unwrap());
    }

    #[test]
    fn mute_suppresses_beeps() {
        let (sim, io) = rig(HwConfig {
            mute: true,
            ..HwConfig::default()
        });
        io.beep_echo().unwrap();
        assert!(sim.state().beeps.is_empty());

        let (sim, io) = rig(HwConfig::default());
        io.beep(1900, Duration::from_millis(50)).unwrap();
        assert_eq!(sim.state().beeps, vec![(1900, 50)]);
    }

    #[test]
    fn misc_commands() {
        let (sim, io) = rig(HwConfig::default());
        io.set_power_led_mode(2).unwrap();
        assert_eq!(io.power_led_mode().unwrap(), 2);
        io.motors_release().unwrap();
        io.eeprom_clear().unwrap();
        assert!(sim.state().eeprom_cleared);
    }
}
