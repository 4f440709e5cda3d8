//! System-wide constants for the resin MC link.
//!
//! Single source of truth for wire parameters, fixed hardware pins and
//! axis geometry. Values that a printer owner may tune live in
//! [`crate::mc::hw::HwConfig`] instead.

use std::time::Duration;

/// Serial device the MC is attached to.
pub const MC_DEVICE: &str = "/dev/ttyS2";

/// Baud rate during normal operation (8N1).
pub const BAUD_RATE_NORMAL: u32 = 115_200;

/// Baud rate used by the MC bootloader.
pub const BAUD_RATE_BOOTLOADER: u32 = 19_200;

/// Read/write timeout on the serial link.
pub const SERIAL_TIMEOUT: Duration = Duration::from_secs(1);

/// Poll interval of the background reader when the port is idle.
pub const READER_POLL: Duration = Duration::from_millis(100);

/// Number of lines kept in the diagnostic trace ring.
pub const TRACE_DEPTH: usize = 30;

/// TCP port of the interactive debug session.
pub const DEBUG_PORT: u16 = 8192;

/// GPIO line wired to the MC reset pin.
pub const RESET_GPIO: u32 = 131;

/// Width of the reset pulse.
pub const RESET_PULSE: Duration = Duration::from_micros(1);

/// Settling delay when the MC does not announce `ready` after a reset.
pub const READY_FALLBACK_DELAY: Duration = Duration::from_millis(1500);

/// Banner printed by the MC once it is ready to accept commands.
pub const READY_BANNER: &str = "ready";

/// Firmware version the application was built against.
pub const REQUIRED_FW_VERSION: &str = "1.0.0";

/// Board major revision the application supports.
pub const SUPPORTED_BOARD_REVISION: u8 = 6;

/// Serial number reported when the MC returns an empty one.
pub const INVALID_SERIAL: &str = "*INVALID*";

/// External utility used to program the MC.
pub const FLASH_COMMAND: &str = "/usr/share/resin-mc/scripts/flashMC.sh";

/// Directory holding MC firmware images.
pub const FIRMWARE_DIR: &str = "/usr/share/resin-mc";

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/resin-mc/mc.toml";

/// Number of profile slots per axis.
pub const PROFILE_SLOTS: usize = 8;

/// Number of parameters in a single profile slot.
pub const PROFILE_PARAMS: usize = 7;

/// Number of values in a tear-off tuning vector.
pub const TUNING_PARAMS: usize = 8;

/// Tilt position of the top dead center.
pub const TILT_END: i32 = 6016;

/// Tilt minimum reachable position (one full turn below home).
pub const TILT_MIN: i32 = -12_800;

/// Tilt maximum reachable position.
pub const TILT_MAX: i32 = TILT_END;

/// Allowed deviation of the tilt from zero when sitting on the endstop.
pub const TILT_HOMING_TOLERANCE: i32 = 96;

/// Step used by the unstuck loop after a failed tear-off.
pub const TILT_UNSTUCK_STEP: i32 = 128;

/// Motor full steps per revolution.
pub const STEPS_PER_REV: u32 = 200;

/// Microsteps per full step.
pub const MICROSTEPS: u32 = 16;

/// Tower height the resin probe starts from [mm].
pub const RESIN_PROBE_START_MM: f64 = 36.0;

/// Tower height the resin probe ends at [mm].
pub const RESIN_PROBE_END_MM: f64 = 1.0;

/// Smallest resin volume the tank geometry can hold above the probe [ml].
pub const RESIN_MIN_VOLUME_ML: f64 = 68.5;

/// Full tank volume [ml].
pub const RESIN_MAX_VOLUME_ML: f64 = 200.0;

/// Number of fans driven by the MC.
pub const FAN_COUNT: usize = 3;

/// Number of temperature sensors reported by the MC.
pub const TEMP_SENSOR_COUNT: usize = 4;

// ─── Compile-time checks ────────────────────────────────────────────

static_assertions::const_assert!(TILT_MIN < 0 && TILT_MAX > 0);
static_assertions::const_assert_eq!(TILT_END % TILT_UNSTUCK_STEP, 0);
static_assertions::const_assert!(TILT_HOMING_TOLERANCE < TILT_UNSTUCK_STEP);
static_assertions::const_assert!(BAUD_RATE_BOOTLOADER < BAUD_RATE_NORMAL);
static_assertions::const_assert!(TRACE_DEPTH > 0);
