//! Non-realtime supervision: bring-up, operator command, status
//! reporting, fault diagnostics and cooperative shutdown.
//!
//! The supervisor performs the pre-realtime bring-up (link, mapping, mode,
//! DC, SAFE-OP), hands the session to the cyclic thread, and from then on
//! only reads the shared atomics and the SDO mailbox channel. The cyclic
//! thread returns the session at join so shutdown can put the bus back
//! into INIT.

use crate::signals::SignalHandler;
use anyhow::{Context, Result};
use axis_common::{
    counts_to_degrees, degrees_to_counts, dps2_to_counts, dps_to_counts, MotionConfig,
    MotionError, MotionPhase, SharedStatus, COUNTS_PER_DEGREE,
};
use axis_control::{init_realtime, CyclicController, MoveLimits, Pacing};
use axis_fieldbus::{BusSession, FieldbusTransport};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Object holding the drive's most recent error code.
const LAST_ERROR_INDEX: u16 = 0x3C13;
const LAST_ERROR_SUBINDEX: u8 = 0x84;

/// Run one motion job to completion: bring the bus up, enable the drive,
/// execute the move, shut down. Blocks until the move finishes, a fatal
/// error occurs, or a signal lands.
pub fn run_motion(
    transport: Box<dyn FieldbusTransport>,
    interface: &str,
    angle_deg: f64,
    speed_dps: f64,
    config: &MotionConfig,
) -> Result<()> {
    if speed_dps <= 0.0 || !speed_dps.is_finite() {
        return Err(MotionError::InvalidProfile(format!(
            "speed must be positive, got {speed_dps} deg/s"
        ))
        .into());
    }
    if config.motion.acceleration_dps2 <= 0.0 {
        return Err(MotionError::InvalidProfile(format!(
            "acceleration must be positive, got {} deg/s^2",
            config.motion.acceleration_dps2
        ))
        .into());
    }

    // Pre-realtime bring-up (link through SAFE-OP)
    let mut session = BusSession::open(transport, interface, &config.fieldbus)
        .context("fieldbus link bring-up failed")?;
    session
        .enumerate_and_map()
        .context("slave enumeration failed")?;
    session
        .set_mode_of_operation(config.motion.mode)
        .context("mode-of-operation SDO failed")?;
    if config.fieldbus.dc_enabled {
        session.configure_dc().context("DC configuration failed")?;
    }
    session.request_safe_op().context("SAFE-OP failed")?;

    let shared = Arc::new(SharedStatus::new());
    let signals =
        SignalHandler::install(Arc::clone(&shared)).context("signal handler setup failed")?;
    let mut sdo = session.sdo_channel();

    let limits = MoveLimits {
        max_velocity: dps_to_counts(speed_dps),
        acceleration: dps2_to_counts(config.motion.acceleration_dps2),
    };

    info!(
        interface,
        angle_deg,
        speed_dps,
        acceleration_dps2 = config.motion.acceleration_dps2,
        mode = %config.motion.mode,
        "starting cyclic operation"
    );

    // Hand the session to the cyclic thread
    let cyclic = {
        let shared = Arc::clone(&shared);
        let config = config.clone();
        let controller =
            CyclicController::new(session, Arc::clone(&shared), &config, limits, Pacing::Deadline);
        std::thread::Builder::new()
            .name("axis-cyclic".into())
            .spawn(move || {
                if let Err(e) = init_realtime(&config.realtime) {
                    warn!(error = %e, "real-time setup failed; continuing best-effort");
                }
                controller.run()
            })
            .context("cyclic thread spawn failed")?
    };

    // Supervision loop: status, fault diagnostics, bring-up timeout,
    // move command and completion detection
    let mut bus_op_since: Option<Instant> = None;
    let mut fault_reported = false;
    let mut commanded_target: Option<i64> = None;
    let mut supervisor_error: Option<MotionError> = None;

    while !shared.stop_requested() {
        std::thread::sleep(config.status_period);

        let position = shared.actual_position();
        let phase = shared.motion_phase();

        if shared.bus_operational() && bus_op_since.is_none() {
            bus_op_since = Some(Instant::now());
        }

        if shared.fault_detected() && !fault_reported {
            fault_reported = true;
            let mut buf = [0u8; 4];
            match sdo.sdo_read(
                1,
                LAST_ERROR_INDEX,
                LAST_ERROR_SUBINDEX,
                &mut buf,
                config.fieldbus.sdo_timeout,
            ) {
                Ok(_) => {
                    let code = u16::from_le_bytes([buf[0], buf[1]]);
                    shared.set_last_error_code(code);
                    warn!(code = format_args!("{code:#06x}"), "drive fault code");
                }
                Err(e) => warn!(error = %e, "could not read drive error code"),
            }
        } else if !shared.fault_detected() {
            fault_reported = false;
        }

        // The drive must enable within the configured window of bus OP
        if let Some(since) = bus_op_since {
            if !shared.drive_operational() && since.elapsed() > config.drive_timeout {
                supervisor_error = Some(MotionError::DriveTimeout {
                    timeout_ms: config.drive_timeout.as_millis() as u64,
                    last_error: shared.last_error_code(),
                });
                signals.request_shutdown();
                break;
            }
        }

        // Commit the operator's move once the drive holds position
        if shared.drive_operational() && commanded_target.is_none() {
            let target = i64::from(position) + degrees_to_counts(angle_deg);
            shared.command_move(target);
            commanded_target = Some(target);
            info!(
                target_counts = target,
                target_deg = counts_to_degrees(target),
                "move commanded"
            );
        }

        if let Some(target) = commanded_target {
            let reached = (i64::from(position) - target).unsigned_abs()
                <= u64::from(config.motion.tolerance_counts);
            if shared.drive_operational() && phase == MotionPhase::Idle && reached {
                info!(position, "move complete");
                signals.request_shutdown();
                break;
            }
        }

        info!(
            bus_op = shared.bus_operational(),
            drive_op = shared.drive_operational(),
            fault = shared.fault_detected(),
            status_word = format_args!("{:#06x}", shared.status_word()),
            position_deg = format_args!("{:.2}", counts_to_degrees(i64::from(position))),
            velocity_dps = format_args!(
                "{:.1}",
                f64::from(shared.actual_velocity()) / COUNTS_PER_DEGREE
            ),
            %phase,
            underruns = shared.underruns_total(),
            "status"
        );
    }

    shared.request_stop();

    // Recover the session from the cyclic thread and close the bus
    let (mut session, metrics, outcome) = cyclic
        .join()
        .map_err(|_| MotionError::Config("cyclic thread panicked".into()))?;

    info!(
        cycles = metrics.total_cycles(),
        min_us = metrics.min().map(|d| d.as_micros()).unwrap_or(0),
        mean_us = metrics.mean().map(|d| d.as_micros()).unwrap_or(0),
        max_us = metrics.max().map(|d| d.as_micros()).unwrap_or(0),
        overruns = metrics.overrun_count(),
        underruns = shared.underruns_total(),
        "cycle statistics"
    );

    session.close();

    if let Some(e) = supervisor_error {
        error!(error = %e, "motion job failed");
        return Err(e.into());
    }
    outcome.map_err(|e| {
        error!(error = %e, "cyclic loop failed");
        anyhow::Error::from(e)
    })?;

    info!("shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axis_fieldbus::SimulatedTransport;
    use std::time::Duration;

    fn quick_config() -> MotionConfig {
        MotionConfig {
            status_period: Duration::from_millis(10),
            ..MotionConfig::default()
        }
    }

    #[test]
    fn simulated_move_completes_cleanly() {
        let transport = SimulatedTransport::new();
        let handle = transport.handle();
        let config = quick_config();

        run_motion(Box::new(transport), "sim0", 1.0, 90.0, &config).unwrap();

        let expected = degrees_to_counts(1.0);
        assert!((i64::from(handle.position()) - expected).abs() <= 100);
    }

    #[test]
    fn zero_distance_move_completes_immediately() {
        let transport = SimulatedTransport::new();
        let handle = transport.handle();
        let config = quick_config();

        run_motion(Box::new(transport), "sim0", 0.0, 90.0, &config).unwrap();
        assert_eq!(handle.position(), 0);
    }

    #[test]
    fn negative_speed_is_rejected() {
        let transport = SimulatedTransport::new();
        let config = quick_config();
        let result = run_motion(Box::new(transport), "sim0", 90.0, -10.0, &config);
        assert!(result.is_err());
    }

    #[test]
    fn drive_timeout_when_op_enable_never_arrives() {
        let transport = SimulatedTransport::new();
        let handle = transport.handle();
        // A latched fault the controller cannot clear keeps the drive away
        // from Operation Enabled; re-inject it continuously
        let config = MotionConfig {
            status_period: Duration::from_millis(10),
            drive_timeout: Duration::from_millis(200),
            ..MotionConfig::default()
        };

        let injector = {
            let handle = handle.clone();
            std::thread::spawn(move || {
                for _ in 0..200 {
                    handle.inject_fault(0x7121);
                    std::thread::sleep(Duration::from_millis(5));
                }
            })
        };

        let result = run_motion(Box::new(transport), "sim0", 45.0, 90.0, &config);
        injector.join().unwrap();

        let err = result.unwrap_err();
        let motion_err = err.downcast_ref::<MotionError>().unwrap();
        assert!(matches!(motion_err, MotionError::DriveTimeout { .. }));
    }
}
