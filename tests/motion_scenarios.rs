//! End-to-end scenarios against the simulated drive.
//!
//! Each scenario runs the full cyclic controller (bus bring-up, CiA 402
//! ladder, trajectory) over the simulated transport and checks the
//! externally observable behaviour: control words on the wire, drive
//! position, working-counter accounting and shutdown state.

use axis_common::units::{dps2_to_counts, dps_to_counts};
use axis_common::{MotionConfig, MotionError, MotionPhase, OperationMode, SharedStatus};
use axis_control::{CycleSnapshot, CyclicController, MoveLimits, Pacing};
use axis_fieldbus::{AlState, BusSession, SimHandle, SimulatedTransport};
use std::sync::Arc;

// ============================================================================
// Test Helpers
// ============================================================================

const TOLERANCE: i64 = 100;
const FULL_TURN_COUNTS: i64 = 2_097_152;

struct Rig {
    controller: CyclicController,
    shared: Arc<SharedStatus>,
    handle: SimHandle,
}

/// Bring a simulated bus to SAFE-OP and wrap it in a cyclic controller,
/// the state the realtime thread takes over in.
fn rig_with(config: MotionConfig, speed_dps: f64, accel_dps2: f64) -> Rig {
    let transport = SimulatedTransport::new();
    let handle = transport.handle();

    let mut session = BusSession::open(Box::new(transport), "sim0", &config.fieldbus)
        .expect("link open");
    session.enumerate_and_map().expect("enumerate");
    session
        .set_mode_of_operation(config.motion.mode)
        .expect("mode");
    session.configure_dc().expect("dc");
    session.request_safe_op().expect("safe-op");

    let shared = Arc::new(SharedStatus::new());
    let limits = MoveLimits {
        max_velocity: dps_to_counts(speed_dps),
        acceleration: dps2_to_counts(accel_dps2),
    };
    let controller = CyclicController::new(
        session,
        Arc::clone(&shared),
        &config,
        limits,
        Pacing::Immediate,
    );

    Rig {
        controller,
        shared,
        handle,
    }
}

fn rig(speed_dps: f64, accel_dps2: f64) -> Rig {
    rig_with(MotionConfig::default(), speed_dps, accel_dps2)
}

impl Rig {
    fn run_until(
        &mut self,
        max_cycles: usize,
        predicate: impl Fn(&CycleSnapshot, &SharedStatus) -> bool,
    ) -> CycleSnapshot {
        for _ in 0..max_cycles {
            let snapshot = self.controller.run_cycle().expect("cycle");
            if predicate(&snapshot, &self.shared) {
                return snapshot;
            }
        }
        panic!("condition not reached within {max_cycles} cycles");
    }

    fn bring_up(&mut self) {
        self.run_until(100, |_, shared| shared.drive_operational());
    }
}

// ============================================================================
// Scenario 1: happy path, CSP, full revolution
// ============================================================================

#[test]
fn full_revolution_csp() {
    let mut rig = rig(180.0, 360.0);

    // Record every control word on the wire during drive bring-up
    let mut ladder = Vec::new();
    let mut cycles_to_enable = 0usize;
    for cycle in 0..100 {
        rig.controller.run_cycle().expect("cycle");
        let cw = rig.handle.last_outputs().control_word;
        if ladder.last() != Some(&cw) {
            ladder.push(cw);
        }
        if rig.shared.drive_operational() {
            cycles_to_enable = cycle + 1;
            break;
        }
    }
    assert!(rig.shared.drive_operational());

    // The transition ladder on the wire: idle frames, then Shutdown,
    // Switch On, Enable Operation
    let meaningful: Vec<u16> = ladder.into_iter().filter(|&cw| cw != 0).collect();
    assert_eq!(&meaningful[..3], &[0x06, 0x07, 0x0F]);
    // Three transitions within a handful of cycles of reaching OP
    assert!(cycles_to_enable <= 10, "took {cycles_to_enable} cycles");

    let start = i64::from(rig.handle.position());
    rig.shared.command_move(start + FULL_TURN_COUNTS);

    // Phase sequence must be a clean trapezoid
    let mut phases = Vec::new();
    for _ in 0..5000 {
        let snapshot = rig.controller.run_cycle().expect("cycle");
        if phases.last() != Some(&snapshot.phase) {
            phases.push(snapshot.phase);
        }
        if snapshot.phase == MotionPhase::Idle {
            break;
        }
    }
    assert_eq!(
        phases,
        vec![
            MotionPhase::Accelerating,
            MotionPhase::Cruising,
            MotionPhase::Decelerating,
            MotionPhase::Idle,
        ]
    );

    // One more cycle so the drive sees the final hold target
    rig.controller.run_cycle().expect("cycle");
    let travelled = i64::from(rig.handle.position()) - start;
    assert!(
        (travelled - FULL_TURN_COUNTS).abs() <= TOLERANCE,
        "travelled {travelled} counts"
    );
}

// ============================================================================
// Scenario 2: fault on startup, cleared by reset
// ============================================================================

#[test]
fn startup_fault_is_reset_and_bring_up_resumes() {
    let mut rig = rig(180.0, 360.0);
    rig.handle.inject_fault(0x7305);

    // Wait for the loop to classify the fault and answer with Fault Reset
    rig.run_until(50, |_, shared| shared.fault_detected());
    assert_eq!(rig.shared.status_word(), 0x0008);

    // The next cycle puts 0x80 on the wire and the fault clears to
    // Switch-on Disabled within that same exchange
    let snapshot = rig.controller.run_cycle().expect("cycle");
    assert_eq!(rig.handle.last_outputs().control_word, 0x80);
    assert_eq!(rig.shared.status_word(), 0x0040);
    assert!(!rig.shared.fault_detected());
    assert_ne!(snapshot.drive_state, axis_control::DriveState::Fault);

    rig.bring_up();
    assert!(rig.shared.drive_operational());
}

// ============================================================================
// Scenario 3: zero-distance move
// ============================================================================

#[test]
fn zero_distance_move_stays_idle() {
    let mut rig = rig(180.0, 360.0);
    rig.handle.set_position(123_456);
    rig.bring_up();

    let position = i64::from(rig.handle.position());
    rig.shared.command_move(position);

    for _ in 0..50 {
        let snapshot = rig.controller.run_cycle().expect("cycle");
        assert_eq!(snapshot.phase, MotionPhase::Idle);
    }
    // Hold: the commanded position keeps mirroring the measured one
    assert_eq!(
        rig.handle.last_outputs().target_position,
        rig.handle.position()
    );
    assert_eq!(i64::from(rig.handle.position()), position);
}

// ============================================================================
// Scenario 4: reverse move
// ============================================================================

#[test]
fn reverse_quarter_turn() {
    let mut rig = rig(90.0, 360.0);
    rig.handle.set_position(1_000_000);
    rig.bring_up();

    let start = i64::from(rig.handle.position());
    let quarter = (90.0f64 * axis_common::COUNTS_PER_DEGREE).round() as i64;
    rig.shared.command_move(start - quarter);

    rig.run_until(5000, |s, shared| {
        s.phase == MotionPhase::Idle && shared.motion_phase() == MotionPhase::Idle
    });
    rig.controller.run_cycle().expect("cycle");

    let travelled = i64::from(rig.handle.position()) - start;
    assert!(
        (travelled + quarter).abs() <= TOLERANCE,
        "travelled {travelled}, expected {}",
        -quarter
    );
}

// ============================================================================
// Scenario 5: transient working-counter underrun
// ============================================================================

#[test]
fn wkc_underrun_is_tolerated() {
    let mut rig = rig(180.0, 360.0);
    rig.bring_up();
    let state_before = rig.shared.status_word();

    rig.handle.fail_wkc_for(5);
    for _ in 0..5 {
        let snapshot = rig.controller.run_cycle().expect("cycle");
        assert!(snapshot.bus_operational);
        assert_eq!(snapshot.wkc, 2);
        assert!(matches!(
            snapshot.underrun,
            Some(MotionError::PdoUnderrun {
                wkc: 2,
                expected: 3
            })
        ));
    }

    assert!(rig.shared.bus_operational());
    assert_eq!(rig.shared.underruns_total(), 5);
    // No drive-state change from the underrun alone
    assert_eq!(rig.shared.status_word(), state_before);

    let snapshot = rig.controller.run_cycle().expect("cycle");
    assert_eq!(snapshot.wkc, 3);
    assert!(snapshot.underrun.is_none());
    assert_eq!(rig.shared.underruns_consecutive(), 0);
}

// ============================================================================
// Scenario 6: shutdown mid-move
// ============================================================================

#[test]
fn stop_mid_move_exits_and_returns_to_init() {
    let mut rig = rig(180.0, 360.0);
    rig.bring_up();

    let start = i64::from(rig.handle.position());
    rig.shared.command_move(start + FULL_TURN_COUNTS);
    rig.run_until(5000, |s, _| s.phase == MotionPhase::Cruising);

    // Request stop while cruising; run() must exit without another move
    // step and hand the session back
    rig.shared.request_stop();
    let (mut session, _metrics, outcome) = rig.controller.run();
    assert!(outcome.is_ok());

    let exchanges_at_stop = rig.handle.exchanges();
    session.close();
    assert_eq!(session.read_state(), AlState::Init);
    // Closing performs no further process-data exchanges
    assert_eq!(rig.handle.exchanges(), exchanges_at_stop);
}

// ============================================================================
// CSV mode: velocity setpoints without the latch toggle
// ============================================================================

#[test]
fn csv_mode_streams_velocity_setpoints() {
    let config = MotionConfig {
        motion: axis_common::ProfileConfig {
            mode: OperationMode::Csv,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut rig = rig_with(config, 90.0, 360.0);
    rig.bring_up();

    let start = i64::from(rig.handle.position());
    rig.shared.command_move(start + 200_000);

    rig.run_until(50, |s, _| s.phase == MotionPhase::Accelerating);
    for _ in 0..10 {
        rig.controller.run_cycle().expect("cycle");
        let sent = rig.handle.last_outputs();
        // No setpoint latch in CSV; velocity ramps instead
        assert_eq!(sent.control_word, 0x0F);
        assert_eq!(sent.mode_of_operation, 9);
    }
    assert!(rig.handle.last_outputs().target_velocity > 0);

    rig.run_until(5000, |s, _| s.phase == MotionPhase::Idle);
    rig.controller.run_cycle().expect("cycle");
    let travelled = i64::from(rig.handle.position()) - start;
    // CSV integrates velocity on both sides, so quantization drift adds to
    // the profile tolerance
    assert!(
        (travelled - 200_000).abs() <= TOLERANCE + 500,
        "travelled {travelled}"
    );
}
