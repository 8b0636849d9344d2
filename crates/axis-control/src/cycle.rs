//! The cyclic loop: one PDO exchange, one state-machine step, one
//! setpoint, every 2 ms.
//!
//! Strict per-cycle ordering: deadline wait, send, receive, status
//! snapshot, then exactly one of bus bring-up, drive bring-up or
//! trajectory advance. Nothing here logs, allocates or blocks beyond the
//! bounded PDO receive; edge-triggered transitions are the only tracing
//! call sites and fire once each.

use crate::cia402::{DriveController, DriveState};
use crate::timing::MonotonicDeadline;
use crate::trajectory::TrapezoidProfile;
use axis_common::{
    CycleMetrics, MotionConfig, MotionError, MotionPhase, MotionResult, OperationMode, SharedStatus,
};
use axis_fieldbus::{AlState, BusSession};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Velocity and acceleration limits for the committed move, in counts/s
/// and counts/s^2.
#[derive(Debug, Clone, Copy)]
pub struct MoveLimits {
    /// Cruise velocity magnitude.
    pub max_velocity: f64,
    /// Ramp acceleration magnitude.
    pub acceleration: f64,
}

/// Whether cycles are paced by the monotonic deadline or run back to
/// back (simulation and tests).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Sleep to the absolute 2 ms deadline each cycle.
    Deadline,
    /// No sleeping; cycles run as fast as the transport allows.
    Immediate,
}

/// Per-cycle observation, mainly for tests and diagnostics.
#[derive(Debug, Clone)]
pub struct CycleSnapshot {
    /// Working counter of this exchange.
    pub wkc: i32,
    /// Bus has reached OP.
    pub bus_operational: bool,
    /// Classified drive state this cycle.
    pub drive_state: DriveState,
    /// Trajectory phase after this cycle.
    pub phase: MotionPhase,
    /// Set when the working counter came back short of the group
    /// expectation while the bus was operational.
    pub underrun: Option<MotionError>,
}

/// Owns the bus session for the duration of cyclic operation.
pub struct CyclicController {
    session: BusSession,
    drive: DriveController,
    profile: TrapezoidProfile,
    shared: Arc<SharedStatus>,
    limits: MoveLimits,
    mode: OperationMode,
    tolerance: f64,
    dt: f64,
    deadline: MonotonicDeadline,
    pacing: Pacing,
    metrics: CycleMetrics,
    expected_wkc: i32,
    dc_required: bool,
    dc_ready: bool,
    op_requested: bool,
    op_requested_at: Option<Instant>,
    op_timeout: Duration,
    bus_operational: bool,
    move_committed: bool,
    last_cycle_start: Option<Instant>,
}

impl CyclicController {
    /// Take over a session that has been mapped and brought to SAFE-OP.
    #[must_use]
    pub fn new(
        session: BusSession,
        shared: Arc<SharedStatus>,
        config: &MotionConfig,
        limits: MoveLimits,
        pacing: Pacing,
    ) -> Self {
        let expected_wkc = session.expected_wkc();
        let dt = config.cycle_time.as_secs_f64();
        Self {
            session,
            drive: DriveController::new(config.motion.mode),
            profile: TrapezoidProfile::idle_at(0.0, f64::from(config.motion.tolerance_counts)),
            shared,
            limits,
            mode: config.motion.mode,
            tolerance: f64::from(config.motion.tolerance_counts),
            dt,
            deadline: MonotonicDeadline::new(config.cycle_time),
            pacing,
            metrics: CycleMetrics::new(4096, config.cycle_time),
            expected_wkc,
            dc_required: config.fieldbus.dc_enabled,
            dc_ready: !config.fieldbus.dc_enabled,
            op_requested: false,
            op_requested_at: None,
            op_timeout: config.fieldbus.state_timeout,
            bus_operational: false,
            move_committed: false,
            last_cycle_start: None,
        }
    }

    /// Cycle-time statistics recorded so far.
    #[must_use]
    pub fn metrics(&self) -> &CycleMetrics {
        &self.metrics
    }

    /// Run cycles until the stop flag is raised or a fatal error occurs.
    /// The session comes back to the caller either way so shutdown can
    /// return the bus to INIT.
    pub fn run(mut self) -> (BusSession, CycleMetrics, MotionResult<()>) {
        let mut outcome = Ok(());

        while !self.shared.stop_requested() {
            if let Err(e) = self.run_cycle() {
                error!(error = %e, "cyclic loop terminating");
                self.shared.request_stop();
                outcome = Err(e);
                break;
            }
        }

        (self.session, self.metrics, outcome)
    }

    /// Execute one full cycle.
    pub fn run_cycle(&mut self) -> MotionResult<CycleSnapshot> {
        if self.pacing == Pacing::Deadline {
            self.deadline.wait();
        }

        let now = Instant::now();
        if let Some(previous) = self.last_cycle_start {
            self.metrics.record(now - previous);
        }
        self.last_cycle_start = Some(now);

        self.session.send_pdo()?;
        let wkc = self.session.receive_pdo();

        let inputs = self.session.inputs();
        self.shared.publish_inputs(
            inputs.status_word,
            inputs.position_actual,
            inputs.velocity_actual,
        );

        // Transient by policy; the loop records the shortfall and carries
        // on, the supervisor reports the tally
        let underrun = if self.bus_operational && wkc < self.expected_wkc {
            self.shared.record_underrun();
            Some(MotionError::PdoUnderrun {
                wkc,
                expected: self.expected_wkc,
            })
        } else {
            if self.bus_operational {
                self.shared.clear_underrun_streak();
            }
            None
        };

        let phase = if self.bus_operational {
            self.advance_drive_and_trajectory(&inputs)?
        } else {
            self.advance_bus_bringup(&inputs)?;
            MotionPhase::Idle
        };

        Ok(CycleSnapshot {
            wkc,
            bus_operational: self.bus_operational,
            drive_state: DriveState::classify(inputs.status_word),
            phase,
            underrun,
        })
    }

    /// Bring-up steps that run inside the cyclic loop: wait for the
    /// distributed clock, request OP once, then poll for it while cyclic
    /// traffic keeps the watchdog fed. The commanded position shadows the
    /// measured one the whole time so the drive cannot be asked to jump
    /// the instant it enables.
    fn advance_bus_bringup(&mut self, inputs: &axis_fieldbus::InputPdo) -> MotionResult<()> {
        let outputs = self.session.outputs_mut();
        outputs.target_position = inputs.position_actual;
        outputs.target_velocity = 0;

        if !self.dc_ready {
            if self.session.dc_synchronized() {
                info!("distributed clock running");
                self.dc_ready = true;
            } else if self.dc_required {
                return Ok(());
            }
        }

        if !self.op_requested {
            self.session.request_operational()?;
            self.op_requested = true;
            self.op_requested_at = Some(Instant::now());
            return Ok(());
        }

        match self.session.read_state() {
            AlState::Op => {
                info!("bus operational");
                self.bus_operational = true;
                self.shared.set_bus_operational(true);
            }
            AlState::Error => {
                return Err(self.session.al_error().unwrap_or(MotionError::SlaveError {
                    slave: 0,
                    code: 0,
                    reason: "unknown".into(),
                }));
            }
            state => {
                let waited = self.op_requested_at.map_or(Duration::ZERO, |t| t.elapsed());
                if waited > self.op_timeout {
                    return Err(MotionError::StateTimeout {
                        requested: AlState::Op.to_string(),
                        actual: state.to_string(),
                        timeout_ms: self.op_timeout.as_millis() as u64,
                    });
                }
            }
        }
        Ok(())
    }

    fn advance_drive_and_trajectory(
        &mut self,
        inputs: &axis_fieldbus::InputPdo,
    ) -> MotionResult<MotionPhase> {
        let update = self.drive.cycle(inputs, self.session.outputs_mut());

        self.shared.set_fault_detected(update.state == DriveState::Fault);
        self.shared.set_drive_operational(self.drive.is_operational());

        if update.became_operational {
            // Seed the model from the measured position so the first
            // setpoint is a hold, not a jump
            self.profile =
                TrapezoidProfile::idle_at(f64::from(inputs.position_actual), self.tolerance);
            self.move_committed = false;
        }

        if !self.drive.is_operational() {
            self.shared.set_motion_phase(MotionPhase::Idle);
            self.shared
                .publish_control_word(self.session.outputs_mut().control_word);
            return Ok(MotionPhase::Idle);
        }

        if !self.move_committed && self.shared.move_commanded() {
            let target = self.shared.target_position_counts() as f64;
            self.profile = TrapezoidProfile::commit(
                self.profile.position(),
                target,
                self.limits.max_velocity,
                self.limits.acceleration,
                self.tolerance,
            )?;
            self.move_committed = true;
        }

        let phase = self.profile.step(self.dt);
        self.shared.set_motion_phase(phase);

        let outputs = self.session.outputs_mut();
        match self.mode {
            OperationMode::Csp => {
                outputs.target_position = if phase == MotionPhase::Idle {
                    inputs.position_actual
                } else {
                    self.profile.position_setpoint()
                };
            }
            OperationMode::Csv => {
                outputs.target_velocity = self.profile.velocity_setpoint();
                outputs.target_position = inputs.position_actual;
            }
        }
        self.shared.publish_control_word(outputs.control_word);

        Ok(phase)
    }
}
