//! # Resin MC Binary
//!
//! Command line front end of the motion-controller link: connect, query,
//! home, run layer moves, probe the resin level, open a debug session or
//! flash the MC firmware.
//!
//! # Usage
//!
//! ```bash
//! # Connect and print the MC identity
//! resin_mc connect
//!
//! # Home both axes against the simulated MC
//! resin_mc --simulate home
//!
//! # Ten tear-off cycles with the slow stage, verbose
//! resin_mc -v layer --count 10 --slow
//!
//! # Debug session in bootloader mode
//! resin_mc debug --bootloader
//! ```

#![deny(warnings)]

use clap::{Parser, Subcommand};
use resin_common::config::{ConfigError, ConfigLoader, McConfig};
use resin_common::consts::DEFAULT_CONFIG_PATH;
use resin_common::mc::error::McError;
use resin_common::mc::status::StatusBit;
use resin_mc::debug::start_debug_session;
use resin_mc::{Hardware, SimulatedMc};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Resin MC - motion controller link and axis sequencer
#[derive(Parser, Debug)]
#[command(name = "resin_mc")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Serial protocol engine and axis sequencer for the resin printer motion controller")]
#[command(long_about = None)]
struct Args {
    /// Path to the configuration file. Defaults apply when the default path
    /// does not exist.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Serial device, overrides `serial.device`
    #[arg(short, long)]
    device: Option<String>,

    /// Talk to a simulated MC instead of the serial device
    #[arg(short = 's', long)]
    simulate: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run the connect handshake and initialise the MC
    Connect,
    /// Print status word, temperatures, voltages and fans
    Status,
    /// Home tower and tilt
    Home {
        /// Additional homing attempts per axis
        #[arg(short, long, default_value_t = 2)]
        retries: u32,
    },
    /// Tilt tear-off cycles
    Layer {
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
        /// Use the large-fill (slow) tear-off stage
        #[arg(long)]
        slow: bool,
    },
    /// Measure the resin volume
    ProbeResin,
    /// Serve an interactive debug session on the debug port
    Debug {
        #[arg(long)]
        bootloader: bool,
    },
    /// Program the MC with the external flashing utility
    Flash,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("resin_mc failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    setup_tracing(&args);

    info!("Resin MC v{} starting...", env!("CARGO_PKG_VERSION"));

    let mut config = load_config(&args)?;
    if let Some(device) = &args.device {
        config.serial.device = device.clone();
    }

    let hw = if args.simulate {
        info!("Simulation mode enabled");
        Hardware::simulated(&SimulatedMc::new(), &config)?
    } else {
        Hardware::open(&config)?
    };

    match args.command {
        Cmd::Connect => {
            install_signal_handler(&hw, None)?;
            hw.connect()?;
        }
        Cmd::Status => {
            install_signal_handler(&hw, None)?;
            let state = hw.mc.connect(config.hw.version_check)?;
            info!("Connection state: {:?}", state);
            let bits = hw.mc.status()?;
            for (bit, value) in bits.decode() {
                info!("{:>8}: {}", bit.name(), value);
            }
            info!("Temperatures [°C]: {:?}", hw.io.temperatures()?);
            info!("Voltages [V]: {:?}", hw.io.voltages()?);
            info!("Fan RPM: {:?}", hw.io.fan_rpm()?);
            info!("Fan errors: {:?}", hw.io.fan_errors()?);
            if !bits.get(StatusBit::Cover) {
                warn!("Cover is open");
            }
        }
        Cmd::Home { retries } => {
            install_signal_handler(&hw, None)?;
            hw.connect()?;
            hw.sync_all(Some(retries))?;
            info!("Tower at {} mm", hw.tower.position_mm()?);
        }
        Cmd::Layer { count, slow } => {
            // Each axis operation re-arms its token, so a signal landing
            // between two cycles is only seen through this flag.
            let running = Arc::new(AtomicBool::new(true));
            install_signal_handler(&hw, Some(Arc::clone(&running)))?;
            hw.connect()?;
            hw.sync_all(Some(config.hw.position_retries))?;
            hw.tilt
                .move_absolute_wait(config.hw.tilt_height, Some(config.hw.position_retries))?;
            for layer in 1..=count {
                if !running.load(Ordering::SeqCst) {
                    warn!(layer, count, "Layer cycles interrupted");
                    return Err(McError::Cancelled.into());
                }
                hw.tilt.layer_down(slow)?;
                hw.tilt.layer_up()?;
                info!(layer, count, "Layer cycle done");
            }
        }
        Cmd::ProbeResin => {
            install_signal_handler(&hw, None)?;
            hw.connect()?;
            hw.tower.sync(Some(config.hw.position_retries))?;
            let result = hw.tower.probe_resin_volume()?.checked()?;
            info!(
                "Resin volume: {} ml ({} %)",
                result.volume_ml,
                result.volume_percent()
            );
        }
        Cmd::Debug { bootloader } => {
            let session = start_debug_session(Arc::clone(&hw.mc), &config.debug, bootloader)?;
            install_signal_handler(&hw, Some(session.running_flag()))?;
            info!("Debug session on {}", session.local_addr());
            session.join()?;
        }
        Cmd::Flash => {
            install_signal_handler(&hw, None)?;
            hw.mc.flash(config.hw.board_version)?;
            info!("MC firmware updated");
            hw.connect()?;
        }
    }

    hw.mc.close();
    info!("Resin MC shutdown complete");
    Ok(())
}

/// Explicit `--config` must exist; the default path is optional.
fn load_config(args: &Args) -> Result<McConfig, ConfigError> {
    if let Some(path) = &args.config {
        info!("Loading config from {:?}", path);
        return McConfig::load_validated(path);
    }
    match McConfig::load(std::path::Path::new(DEFAULT_CONFIG_PATH)) {
        Ok(config) => {
            config.validate()?;
            Ok(config)
        }
        Err(ConfigError::FileNotFound) => {
            info!("No config at {}, using defaults", DEFAULT_CONFIG_PATH);
            Ok(McConfig::default())
        }
        Err(e) => Err(e),
    }
}

/// Cancel axis waits and clear the `running` flag, if one is given, on SIGINT.
fn install_signal_handler(
    hw: &Hardware,
    session: Option<Arc<AtomicBool>>,
) -> Result<(), ctrlc::Error> {
    let tilt = hw.tilt.cancel_token();
    let tower = hw.tower.cancel_token();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        tilt.cancel();
        tower.cancel();
        if let Some(running) = &session {
            running.store(false, Ordering::SeqCst);
        }
    })
}

/// Setup tracing subscriber based on CLI arguments.
fn setup_tracing(args: &Args) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
