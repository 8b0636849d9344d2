//! Argument parsing helpers and transport selection shared by the
//! binaries.

use anyhow::{bail, Result};
use axis_common::OperationMode;
use axis_fieldbus::{FieldbusTransport, SimulatedTransport};

/// Parse a u16 given as decimal or 0x-prefixed hex (object indices).
pub fn parse_u16_auto(s: &str) -> Result<u16, String> {
    parse_u32_auto(s).and_then(|v| {
        u16::try_from(v).map_err(|_| format!("'{s}' does not fit in 16 bits"))
    })
}

/// Parse a u8 given as decimal or 0x-prefixed hex (subindices).
pub fn parse_u8_auto(s: &str) -> Result<u8, String> {
    parse_u32_auto(s).and_then(|v| u8::try_from(v).map_err(|_| format!("'{s}' does not fit in 8 bits")))
}

/// Parse a u32 given as decimal or 0x-prefixed hex (object values).
pub fn parse_u32_auto(s: &str) -> Result<u32, String> {
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    parsed.map_err(|_| format!("'{s}' is not a decimal or 0x-prefixed hex number"))
}

/// Parse a cyclic operation mode name.
pub fn parse_mode(s: &str) -> Result<OperationMode, String> {
    match s.to_ascii_lowercase().as_str() {
        "csp" => Ok(OperationMode::Csp),
        "csv" => Ok(OperationMode::Csv),
        other => Err(format!("unknown mode '{other}', expected csp or csv")),
    }
}

/// Initialize tracing for a binary; `level` applies to the axis crates
/// unless RUST_LOG overrides it.
pub fn init_logging(level: &str) {
    let filter = format!(
        "axis_daemon={level},axis_control={level},axis_fieldbus={level},axis_common={level}"
    );

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .init();
}

/// Pick the transport backend: the in-memory drive for `--simulated`,
/// otherwise the SOEM master when the build carries it.
pub fn make_transport(simulated: bool) -> Result<Box<dyn FieldbusTransport>> {
    if simulated {
        return Ok(Box::new(SimulatedTransport::new()));
    }

    #[cfg(all(feature = "soem", target_os = "linux"))]
    {
        Ok(Box::new(axis_fieldbus::soem_backend::SoemTransport::new()))
    }

    #[cfg(not(all(feature = "soem", target_os = "linux")))]
    {
        bail!("this build has no hardware transport (enable the 'soem' feature) - pass --simulated to run against the simulated drive")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_and_decimal_forms() {
        assert_eq!(parse_u16_auto("0x6040").unwrap(), 0x6040);
        assert_eq!(parse_u16_auto("0X6041").unwrap(), 0x6041);
        assert_eq!(parse_u16_auto("24640").unwrap(), 24640);
        assert_eq!(parse_u8_auto("0x84").unwrap(), 0x84);
        assert_eq!(parse_u8_auto("0").unwrap(), 0);
        assert_eq!(parse_u32_auto("0xDEADBEEF").unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn out_of_range_and_garbage_rejected() {
        assert!(parse_u16_auto("0x10000").is_err());
        assert!(parse_u8_auto("256").is_err());
        assert!(parse_u16_auto("sixty").is_err());
        assert!(parse_u16_auto("0x").is_err());
    }

    #[test]
    fn mode_names() {
        assert_eq!(parse_mode("csp").unwrap(), OperationMode::Csp);
        assert_eq!(parse_mode("CSV").unwrap(), OperationMode::Csv);
        assert!(parse_mode("pp").is_err());
    }

    #[test]
    fn simulated_transport_is_always_available() {
        assert!(make_transport(true).is_ok());
    }
}
