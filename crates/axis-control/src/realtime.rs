//! Real-time scheduling and memory locking for the cyclic thread.
//!
//! Memory locking (mlockall), stack pre-faulting, SCHED_FIFO/SCHED_RR
//! priority and CPU affinity. Missing privileges degrade to warnings
//! unless `fail_fast` is set, so the controller still runs on a developer
//! machine, just without RT guarantees.

#![allow(unused_imports)] // Platform-specific code may not use all imports

use axis_common::{CpuAffinity, MotionError, MotionResult, RealtimeConfig, SchedPolicy};
use tracing::{debug, info, warn};

/// What was actually applied during real-time initialisation.
#[derive(Debug, Clone)]
pub struct RealtimeStatus {
    /// Whether memory was locked successfully.
    pub memory_locked: bool,
    /// Stack bytes pre-faulted.
    pub stack_prefaulted: usize,
    /// Applied scheduler policy.
    pub scheduler_policy: Option<SchedPolicy>,
    /// Applied scheduler priority.
    pub scheduler_priority: Option<u8>,
    /// CPUs the thread is pinned to.
    pub cpu_affinity: Option<Vec<usize>>,
}

impl RealtimeStatus {
    fn disabled() -> Self {
        Self {
            memory_locked: false,
            stack_prefaulted: 0,
            scheduler_policy: None,
            scheduler_priority: None,
            cpu_affinity: None,
        }
    }
}

/// Initialise the real-time environment for the calling thread.
pub fn init_realtime(config: &RealtimeConfig) -> MotionResult<RealtimeStatus> {
    if !config.enabled {
        info!("real-time scheduling disabled in configuration");
        return Ok(RealtimeStatus::disabled());
    }

    if config.fail_fast {
        validate_rt_capabilities(config)?;
    }

    let memory_locked = if config.lock_memory {
        lock_memory()?
    } else {
        false
    };

    let stack_prefaulted = prefault_stack(config.prefault_stack_size);
    let (scheduler_policy, scheduler_priority) = set_scheduler(config.policy, config.priority)?;
    let cpu_affinity = set_cpu_affinity(&config.cpu_affinity)?;

    let status = RealtimeStatus {
        memory_locked,
        stack_prefaulted,
        scheduler_policy,
        scheduler_priority,
        cpu_affinity,
    };
    info!(?status, "real-time initialisation complete");
    Ok(status)
}

/// Lock all current and future memory pages.
#[cfg(target_os = "linux")]
fn lock_memory() -> MotionResult<bool> {
    use nix::sys::mman::{mlockall, MlockAllFlags};

    match mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE) {
        Ok(()) => {
            debug!("memory locked");
            Ok(true)
        }
        Err(nix::errno::Errno::EPERM) => {
            warn!("mlockall refused without CAP_IPC_LOCK; page faults may hit the cyclic path");
            Ok(false)
        }
        Err(e) => Err(MotionError::Config(format!("mlockall failed: {e}"))),
    }
}

#[cfg(not(target_os = "linux"))]
fn lock_memory() -> MotionResult<bool> {
    warn!("mlockall not available on this platform");
    Ok(false)
}

/// Pre-fault stack pages so the cyclic loop never takes a stack fault.
fn prefault_stack(size: usize) -> usize {
    if size == 0 {
        return 0;
    }
    let faulted = prefault_stack_recursive(size, 0);
    debug!(requested = size, faulted, "stack pre-fault complete");
    faulted
}

#[inline(never)]
fn prefault_stack_recursive(remaining: usize, depth: usize) -> usize {
    const FRAME_SIZE: usize = 4096;
    const MAX_DEPTH: usize = 1000;

    if remaining < FRAME_SIZE || depth >= MAX_DEPTH {
        return 0;
    }

    let mut buffer = [0u8; FRAME_SIZE];
    // SAFETY: volatile writes into our own stack frame, kept alive by the
    // black_box below
    unsafe {
        std::ptr::write_volatile(buffer.as_mut_ptr(), 0xAA);
        std::ptr::write_volatile(buffer.as_mut_ptr().add(FRAME_SIZE - 1), 0x55);
    }
    std::hint::black_box(&buffer);

    FRAME_SIZE + prefault_stack_recursive(remaining - FRAME_SIZE, depth + 1)
}

/// Apply the scheduler policy and priority to the calling thread.
#[cfg(target_os = "linux")]
fn set_scheduler(
    policy: SchedPolicy,
    priority: u8,
) -> MotionResult<(Option<SchedPolicy>, Option<u8>)> {
    let linux_policy = match policy {
        SchedPolicy::Fifo => libc::SCHED_FIFO,
        SchedPolicy::Rr => libc::SCHED_RR,
        SchedPolicy::Other => {
            debug!("using SCHED_OTHER (non-RT) scheduling");
            return Ok((Some(SchedPolicy::Other), None));
        }
    };

    let clamped = priority.clamp(1, 99);
    if clamped != priority {
        warn!(requested = priority, applied = clamped, "priority clamped");
    }

    let param = libc::sched_param {
        sched_priority: i32::from(clamped),
    };

    // SAFETY: param is a valid sched_param for the calling thread
    let rc = unsafe { libc::sched_setscheduler(0, linux_policy, &param) };
    if rc == -1 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EPERM) {
            warn!("sched_setscheduler refused without CAP_SYS_NICE; running best-effort");
            return Ok((None, None));
        }
        return Err(MotionError::Config(format!(
            "sched_setscheduler failed: {err}"
        )));
    }

    info!(?policy, priority = clamped, "real-time scheduler configured");
    Ok((Some(policy), Some(clamped)))
}

#[cfg(not(target_os = "linux"))]
fn set_scheduler(
    policy: SchedPolicy,
    priority: u8,
) -> MotionResult<(Option<SchedPolicy>, Option<u8>)> {
    warn!(?policy, priority, "real-time scheduling not available on this platform");
    Ok((None, None))
}

/// Pin the calling thread to the configured CPUs.
#[cfg(target_os = "linux")]
fn set_cpu_affinity(affinity: &CpuAffinity) -> MotionResult<Option<Vec<usize>>> {
    use nix::sched::{sched_setaffinity, CpuSet};
    use nix::unistd::Pid;

    let cpus = match affinity {
        CpuAffinity::None => return Ok(None),
        CpuAffinity::Single(cpu) => vec![*cpu],
        CpuAffinity::Set(cpus) => cpus.clone(),
    };

    if cpus.is_empty() {
        return Ok(None);
    }

    let mut cpu_set = CpuSet::new();
    for &cpu in &cpus {
        cpu_set
            .set(cpu)
            .map_err(|e| MotionError::Config(format!("invalid CPU index {cpu}: {e}")))?;
    }

    match sched_setaffinity(Pid::from_raw(0), &cpu_set) {
        Ok(()) => {
            info!(?cpus, "CPU affinity set");
            Ok(Some(cpus))
        }
        Err(nix::errno::Errno::EINVAL) => {
            warn!(?cpus, "invalid CPU set; affinity not applied");
            Ok(None)
        }
        Err(e) => Err(MotionError::Config(format!("sched_setaffinity failed: {e}"))),
    }
}

#[cfg(not(target_os = "linux"))]
fn set_cpu_affinity(affinity: &CpuAffinity) -> MotionResult<Option<Vec<usize>>> {
    if !matches!(affinity, CpuAffinity::None) {
        warn!("CPU affinity not available on this platform");
    }
    Ok(None)
}

/// Real-time capabilities of the current process.
#[derive(Debug, Clone, Default)]
pub struct RtCapabilities {
    /// Whether running as root.
    pub is_root: bool,
    /// RLIMIT_RTPRIO value (max RT priority allowed).
    pub rtprio_limit: Option<u64>,
    /// RLIMIT_MEMLOCK value (max lockable memory).
    pub memlock_limit: Option<u64>,
    /// Whether running on a PREEMPT_RT kernel.
    pub preempt_rt: bool,
}

impl RtCapabilities {
    /// RT scheduling is likely to succeed.
    #[must_use]
    pub fn can_use_rt_scheduling(&self) -> bool {
        self.is_root || self.rtprio_limit.is_some_and(|l| l > 0)
    }

    /// Memory locking is likely to succeed.
    #[must_use]
    pub fn can_lock_memory(&self) -> bool {
        if self.is_root {
            return true;
        }
        #[cfg(target_family = "unix")]
        {
            self.memlock_limit.is_some_and(|l| l == libc::RLIM_INFINITY)
        }
        #[cfg(not(target_family = "unix"))]
        {
            false
        }
    }
}

/// Probe RT capabilities.
#[cfg(target_os = "linux")]
#[must_use]
pub fn check_rt_capabilities() -> RtCapabilities {
    use std::fs;

    let mut caps = RtCapabilities {
        // SAFETY: geteuid has no preconditions
        is_root: unsafe { libc::geteuid() } == 0,
        ..Default::default()
    };

    let mut rlim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: rlim is a valid out-parameter
    if unsafe { libc::getrlimit(libc::RLIMIT_RTPRIO, &mut rlim) } == 0 {
        caps.rtprio_limit = Some(rlim.rlim_cur);
    }
    // SAFETY: as above
    if unsafe { libc::getrlimit(libc::RLIMIT_MEMLOCK, &mut rlim) } == 0 {
        caps.memlock_limit = Some(rlim.rlim_cur);
    }

    if let Ok(version) = fs::read_to_string("/proc/version") {
        caps.preempt_rt = version.contains("PREEMPT_RT") || version.contains("PREEMPT RT");
    }

    caps
}

#[cfg(not(target_os = "linux"))]
#[must_use]
pub fn check_rt_capabilities() -> RtCapabilities {
    RtCapabilities::default()
}

/// Validate that the configured RT features can actually be applied.
pub fn validate_rt_capabilities(config: &RealtimeConfig) -> MotionResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let caps = check_rt_capabilities();
    let mut issues = Vec::new();

    if !caps.preempt_rt {
        warn!("PREEMPT_RT kernel not detected; jitter figures will suffer");
    }

    if config.policy != SchedPolicy::Other && !caps.can_use_rt_scheduling() {
        issues.push(format!(
            "cannot use RT scheduling (SCHED_{:?}): RLIMIT_RTPRIO={:?}, is_root={}",
            config.policy, caps.rtprio_limit, caps.is_root
        ));
    }

    if config.lock_memory && !caps.can_lock_memory() {
        issues.push(format!(
            "cannot lock memory: RLIMIT_MEMLOCK={:?}, is_root={}",
            caps.memlock_limit, caps.is_root
        ));
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(MotionError::Config(format!(
            "real-time requirements not met: {}",
            issues.join("; ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_config_is_a_noop() {
        let config = RealtimeConfig {
            enabled: false,
            ..Default::default()
        };
        let status = init_realtime(&config).unwrap();
        assert!(!status.memory_locked);
        assert_eq!(status.stack_prefaulted, 0);
        assert!(status.scheduler_policy.is_none());
    }

    #[test]
    fn stack_prefault_touches_pages() {
        assert!(prefault_stack(64 * 1024) > 0);
        assert_eq!(prefault_stack(0), 0);
    }

    #[test]
    fn capability_probe_does_not_panic() {
        let caps = check_rt_capabilities();
        let _ = caps.can_use_rt_scheduling();
        let _ = caps.can_lock_memory();
    }
}
