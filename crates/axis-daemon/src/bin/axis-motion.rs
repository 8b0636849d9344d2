//! Single-axis motion program: bring the bus to OP, enable the drive and
//! run one trapezoidal move.

use anyhow::{Context, Result};
use axis_common::{MotionConfig, OperationMode};
use axis_daemon::{init_logging, make_transport, parse_mode, run_motion};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

/// Move a CiA 402 servo axis by a relative angle.
#[derive(Parser, Debug)]
#[command(
    name = "axis-motion",
    about = "Single-axis EtherCAT motion controller",
    version,
    allow_negative_numbers = true,
    long_about = None
)]
struct Args {
    /// Network interface the EtherCAT segment hangs off.
    ifname: String,

    /// Relative move in degrees; negative values reverse the direction.
    angle_deg: f64,

    /// Cruise speed in degrees per second.
    speed_dps: f64,

    /// Path to a configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Cyclic operation mode, csp or csv (overrides the config file).
    #[arg(long, value_parser = parse_mode)]
    mode: Option<OperationMode>,

    /// Run against the simulated drive instead of hardware.
    #[arg(long, short = 's')]
    simulated: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "axis-motion starting");

    let mut config = match &args.config {
        Some(path) => MotionConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => MotionConfig::default(),
    };
    if let Some(mode) = args.mode {
        config.motion.mode = mode;
    }

    let transport = make_transport(args.simulated)?;
    run_motion(
        transport,
        &args.ifname,
        args.angle_deg,
        args.speed_dps,
        &config,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_parse_positionals() {
        let args = Args::parse_from(["axis-motion", "eth0", "360", "180"]);
        assert_eq!(args.ifname, "eth0");
        assert_eq!(args.angle_deg, 360.0);
        assert_eq!(args.speed_dps, 180.0);
        assert!(!args.simulated);
        assert!(args.mode.is_none());
    }

    #[test]
    fn mode_override_parses() {
        let args = Args::parse_from(["axis-motion", "eth0", "90", "45", "--mode", "csv"]);
        assert_eq!(args.mode, Some(OperationMode::Csv));
    }

    #[test]
    fn negative_angle_is_accepted() {
        let args = Args::parse_from(["axis-motion", "eth0", "-90", "45"]);
        assert_eq!(args.angle_deg, -90.0);
        assert_eq!(args.speed_dps, 45.0);
    }
}
