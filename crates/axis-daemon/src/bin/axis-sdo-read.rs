//! One-shot SDO read utility.

use anyhow::{Context, Result};
use axis_common::MotionConfig;
use axis_daemon::{init_logging, make_transport, parse_u16_auto, parse_u8_auto};
use axis_fieldbus::BusSession;
use clap::Parser;

/// Read an object dictionary entry over SDO.
#[derive(Parser, Debug)]
#[command(name = "axis-sdo-read", about = "Read an SDO object", version)]
struct Args {
    /// Network interface the EtherCAT segment hangs off.
    ifname: String,

    /// Object index, decimal or 0x-prefixed hex (e.g. 0x6041).
    #[arg(value_parser = parse_u16_auto)]
    index: u16,

    /// Object subindex, decimal or 0x-prefixed hex.
    #[arg(value_parser = parse_u8_auto)]
    subindex: u8,

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

    let mut buf = [0u8; 4];
    let len = session
        .sdo_read(args.slave, args.index, args.subindex, &mut buf)
        .with_context(|| {
            format!(
                "SDO read {:#06x}:{:#04x} from slave {} failed",
                args.index, args.subindex, args.slave
            )
        })?;

    let value = match len {
        1 => u32::from(buf[0]),
        2 => u32::from(u16::from_le_bytes([buf[0], buf[1]])),
        _ => u32::from_le_bytes(buf),
    };

    println!(
        "{:#06x}:{:#04x} = {value} ({value:#x}, {} byte{})",
        args.index,
        args.subindex,
        len,
        if len == 1 { "" } else { "s" }
    );

    session.close();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_index_parses() {
        let args = Args::parse_from(["axis-sdo-read", "eth0", "0x6041", "0"]);
        assert_eq!(args.index, 0x6041);
        assert_eq!(args.subindex, 0);
        assert_eq!(args.slave, 1);
    }

    #[test]
    fn decimal_forms_parse() {
        let args = Args::parse_from(["axis-sdo-read", "eth0", "24641", "2"]);
        assert_eq!(args.index, 24641);
        assert_eq!(args.subindex, 2);
    }
}
