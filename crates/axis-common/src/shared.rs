//! Cross-thread state shared between the cyclic thread and the supervisor.
//!
//! Everything in here is an atomic scalar. The cyclic thread is the sole
//! writer of the status group; the supervisor is the sole writer of the
//! command group. Loads use Acquire and stores use Release so the
//! supervisor's snapshot is internally consistent enough for reporting
//! (it is never used for control).

use std::sync::atomic::{
    AtomicBool, AtomicI32, AtomicI64, AtomicU16, AtomicU32, AtomicU64, AtomicU8, Ordering,
};

/// Trajectory phase, stored as its discriminant in [`SharedStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum MotionPhase {
    /// No move in progress; the drive holds its measured position.
    #[default]
    Idle = 0,
    /// Ramping up toward the cruise velocity.
    Accelerating = 1,
    /// At cruise velocity.
    Cruising = 2,
    /// Ramping down toward the target.
    Decelerating = 3,
}

impl MotionPhase {
    /// Decode a stored discriminant; unknown values read as Idle.
    #[must_use]
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Accelerating,
            2 => Self::Cruising,
            3 => Self::Decelerating,
            _ => Self::Idle,
        }
    }

    /// True while a move is being executed.
    #[must_use]
    pub fn is_moving(self) -> bool {
        self != Self::Idle
    }
}

impl std::fmt::Display for MotionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Accelerating => write!(f, "ACCEL"),
            Self::Cruising => write!(f, "CRUISE"),
            Self::Decelerating => write!(f, "DECEL"),
        }
    }
}

/// Shared atomics between the cyclic thread and the supervisor.
#[derive(Debug, Default)]
pub struct SharedStatus {
    // Process-wide stop flag; set by the signal handler or by either
    // thread's fatal error path.
    stop: AtomicBool,

    // Status group: written only by the cyclic thread.
    bus_operational: AtomicBool,
    drive_operational: AtomicBool,
    fault_detected: AtomicBool,
    status_word: AtomicU16,
    control_word: AtomicU16,
    actual_position: AtomicI32,
    actual_velocity: AtomicI32,
    motion_phase: AtomicU8,
    underruns_total: AtomicU64,
    underruns_consecutive: AtomicU32,

    // Command group: written only by the supervisor.
    move_commanded: AtomicBool,
    target_position_counts: AtomicI64,
    last_error_code: AtomicU16,
}

impl SharedStatus {
    /// Fresh state: nothing operational, no fault, no move.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cooperative shutdown.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// True once shutdown has been requested.
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Cyclic thread: publish the per-cycle input snapshot.
    pub fn publish_inputs(&self, status_word: u16, position: i32, velocity: i32) {
        self.status_word.store(status_word, Ordering::Release);
        self.actual_position.store(position, Ordering::Release);
        self.actual_velocity.store(velocity, Ordering::Release);
    }

    /// Cyclic thread: publish the control word that will be sent.
    pub fn publish_control_word(&self, control_word: u16) {
        self.control_word.store(control_word, Ordering::Release);
    }

    /// Cyclic thread: mark the bus OP edge.
    pub fn set_bus_operational(&self, operational: bool) {
        self.bus_operational.store(operational, Ordering::Release);
    }

    /// Cyclic thread: mark the Operation Enabled edge.
    pub fn set_drive_operational(&self, operational: bool) {
        self.drive_operational.store(operational, Ordering::Release);
    }

    /// Cyclic thread: latch or clear the fault bit.
    pub fn set_fault_detected(&self, fault: bool) {
        self.fault_detected.store(fault, Ordering::Release);
    }

    /// Cyclic thread: publish the trajectory phase.
    pub fn set_motion_phase(&self, phase: MotionPhase) {
        self.motion_phase.store(phase as u8, Ordering::Release);
    }

    /// Cyclic thread: account one underrun cycle.
    pub fn record_underrun(&self) {
        self.underruns_total.fetch_add(1, Ordering::AcqRel);
        self.underruns_consecutive.fetch_add(1, Ordering::AcqRel);
    }

    /// Cyclic thread: a full-WKC cycle resets the consecutive counter.
    pub fn clear_underrun_streak(&self) {
        self.underruns_consecutive.store(0, Ordering::Release);
    }

    /// Supervisor: commit a move to an absolute target, in counts. The
    /// cyclic thread picks the command up once the drive is operational.
    pub fn command_move(&self, target_counts: i64) {
        self.target_position_counts
            .store(target_counts, Ordering::Release);
        self.move_commanded.store(true, Ordering::Release);
    }

    /// True once a move command has been issued.
    #[must_use]
    pub fn move_commanded(&self) -> bool {
        self.move_commanded.load(Ordering::Acquire)
    }

    /// Supervisor: store the drive error code read over SDO.
    pub fn set_last_error_code(&self, code: u16) {
        self.last_error_code.store(code, Ordering::Release);
    }

    /// Latest status word seen on the bus.
    #[must_use]
    pub fn status_word(&self) -> u16 {
        self.status_word.load(Ordering::Acquire)
    }

    /// Latest control word sent to the drive.
    #[must_use]
    pub fn control_word(&self) -> u16 {
        self.control_word.load(Ordering::Acquire)
    }

    /// Latest measured position in counts.
    #[must_use]
    pub fn actual_position(&self) -> i32 {
        self.actual_position.load(Ordering::Acquire)
    }

    /// Latest measured velocity in counts/s.
    #[must_use]
    pub fn actual_velocity(&self) -> i32 {
        self.actual_velocity.load(Ordering::Acquire)
    }

    /// True once the bus reached OP.
    #[must_use]
    pub fn bus_operational(&self) -> bool {
        self.bus_operational.load(Ordering::Acquire)
    }

    /// True once the drive reached Operation Enabled.
    #[must_use]
    pub fn drive_operational(&self) -> bool {
        self.drive_operational.load(Ordering::Acquire)
    }

    /// True while the status word carries the fault bit.
    #[must_use]
    pub fn fault_detected(&self) -> bool {
        self.fault_detected.load(Ordering::Acquire)
    }

    /// Current trajectory phase.
    #[must_use]
    pub fn motion_phase(&self) -> MotionPhase {
        MotionPhase::from_u8(self.motion_phase.load(Ordering::Acquire))
    }

    /// Total underrun cycles since start.
    #[must_use]
    pub fn underruns_total(&self) -> u64 {
        self.underruns_total.load(Ordering::Acquire)
    }

    /// Length of the current underrun streak.
    #[must_use]
    pub fn underruns_consecutive(&self) -> u32 {
        self.underruns_consecutive.load(Ordering::Acquire)
    }

    /// Committed absolute target in counts.
    #[must_use]
    pub fn target_position_counts(&self) -> i64 {
        self.target_position_counts.load(Ordering::Acquire)
    }

    /// Drive error code captured by the supervisor, 0 if none.
    #[must_use]
    pub fn last_error_code(&self) -> u16 {
        self.last_error_code.load(Ordering::Acquire)
    }
}
