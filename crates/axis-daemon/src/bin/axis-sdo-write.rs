//! One-shot SDO write utility.

use anyhow::{bail, Context, Result};
use axis_common::MotionConfig;
use axis_daemon::{init_logging, make_transport, parse_u16_auto, parse_u32_auto, parse_u8_auto};
use axis_fieldbus::BusSession;
use clap::Parser;

/// Write an object dictionary entry over SDO.
#[derive(Parser, Debug)]
#[command(name = "axis-sdo-write", about = "Write an SDO object", version)]
struct Args {
    /// Network interface the EtherCAT segment hangs off.
    ifname: String,

    /// Object index, decimal or 0x-prefixed hex (e.g. 0x6060).
    #[arg(value_parser = parse_u16_auto)]
    index: u16,

    /// Object subindex, decimal or 0x-prefixed hex.
    #[arg(value_parser = parse_u8_auto)]
    subindex: u8,

    /// Value to write, decimal or 0x-prefixed hex.
    #[arg(value_parser = parse_u32_auto)]
    value: u32,

    /// Object size in bits: 8, 16 or 32.
    size_bits: u8,

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

    let bytes = args.value.to_le_bytes();
    let data: &[u8] = match args.size_bits {
        8 => {
            if args.value > u32::from(u8::MAX) {
                bail!("value {} does not fit in 8 bits", args.value);
            }
            &bytes[..1]
        }
        16 => {
            if args.value > u32::from(u16::MAX) {
                bail!("value {} does not fit in 16 bits", args.value);
            }
            &bytes[..2]
        }
        32 => &bytes[..4],
        other => bail!("size must be 8, 16 or 32 bits, got {other}"),
    };

    let config = MotionConfig::default();
    let transport = make_transport(args.simulated)?;

    let mut session = BusSession::open(transport, &args.ifname, &config.fieldbus)
        .context("fieldbus link bring-up failed")?;
    session
        .enumerate_and_map()
        .context("slave enumeration failed")?;

    session
        .sdo_write(args.slave, args.index, args.subindex, data)
        .with_context(|| {
            format!(
                "SDO write {:#06x}:{:#04x} to slave {} failed",
                args.index, args.subindex, args.slave
            )
        })?;

    println!(
        "{:#06x}:{:#04x} <- {} ({:#x}, {} bits)",
        args.index, args.subindex, args.value, args.value, args.size_bits
    );

    session.close();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_command_line_parses() {
        let args = Args::parse_from(["axis-sdo-write", "eth0", "0x6060", "0", "8", "8"]);
        assert_eq!(args.index, 0x6060);
        assert_eq!(args.value, 8);
        assert_eq!(args.size_bits, 8);
    }

    #[test]
    fn hex_value_parses() {
        let args = Args::parse_from(["axis-sdo-write", "eth0", "0x6040", "0", "0x80", "16"]);
        assert_eq!(args.value, 0x80);
        assert_eq!(args.size_bits, 16);
    }
}
