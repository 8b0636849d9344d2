//! Fault reset and status polling utility.
//!
//! With `--clear`, writes Fault Reset (0x80) to the control word object
//! before entering the read loop. The loop then polls the given object
//! until interrupted. Whether the reset has taken effect before the first
//! read is not checked; the readout itself shows the outcome.

use anyhow::{Context, Result};
use axis_common::{MotionConfig, SharedStatus};
use axis_daemon::{init_logging, make_transport, parse_u16_auto, parse_u8_auto, SignalHandler};
use axis_fieldbus::BusSession;
use clap::Parser;
use std::sync::Arc;

/// Reset a drive fault and poll an object dictionary entry.
#[derive(Parser, Debug)]
#[command(name = "axis-fault", about = "Fault reset / status read loop", version)]
struct Args {
    /// Network interface the EtherCAT segment hangs off.
    ifname: String,

    /// Object index to poll, decimal or 0x-prefixed hex.
    #[arg(value_parser = parse_u16_auto)]
    index: u16,

    /// Object subindex to poll, decimal or 0x-prefixed hex.
    #[arg(value_parser = parse_u8_auto)]
    subindex: u8,

    /// Write Fault Reset (0x80) to 0x6040:0 before reading.
    #[arg(long)]
    clear: bool,

    /// Slave position on the bus (1-based).
    #[arg(long, default_value = "1")]
    slave: u16,

    /// Run against the simulated drive instead of hardware.
    #[arg(long, short = 's')]
    simulated: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "warn")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = MotionConfig::default();
    let transport = make_transport(args.simulated)?;

    let mut session = BusSession::open(transport, &args.ifname, &config.fieldbus)
        .context("fieldbus link bring-up failed")?;
    session
        .enumerate_and_map()
        .context("slave enumeration failed")?;

    if args.clear {
        session
            .sdo_write(args.slave, 0x6040, 0, &0x0080u16.to_le_bytes())
            .context("fault reset write failed")?;
        println!("fault reset (0x80) written to 0x6040:0x00");
    }

    let shared = Arc::new(SharedStatus::new());
    let signals =
        SignalHandler::install(Arc::clone(&shared)).context("signal handler setup failed")?;

    while !signals.shutdown_requested() {
        let mut buf = [0u8; 4];
        match session.sdo_read(args.slave, args.index, args.subindex, &mut buf) {
            Ok(len) => {
                let value = match len {
                    1 => u32::from(buf[0]),
                    2 => u32::from(u16::from_le_bytes([buf[0], buf[1]])),
                    _ => u32::from_le_bytes(buf),
                };
                println!(
                    "{:#06x}:{:#04x} = {value} ({value:#x})",
                    args.index, args.subindex
                );
            }
            Err(e) => println!("read failed: {e}"),
        }
        std::thread::sleep(config.status_period);
    }

    session.close();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_flag_parses() {
        let args = Args::parse_from(["axis-fault", "eth0", "0x6041", "0", "--clear"]);
        assert!(args.clear);
        assert_eq!(args.index, 0x6041);
    }

    #[test]
    fn defaults_without_clear() {
        let args = Args::parse_from(["axis-fault", "eth0", "0x3C13", "0x84"]);
        assert!(!args.clear);
        assert_eq!(args.subindex, 0x84);
    }
}
