//! Configuration for the motion controller.
//!
//! Supports TOML deserialization with defaults suitable for a single drive
//! on a 2 ms cycle; production deployments override via `--config`.

use crate::error::{MotionError, MotionResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Top-level motion controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Process-data cycle time. The drive's SYNC0 period is programmed to
    /// the same value.
    #[serde(with = "humantime_serde")]
    pub cycle_time: Duration,

    /// How long the supervisor waits for Operation Enabled after the bus
    /// reaches OP.
    #[serde(with = "humantime_serde")]
    pub drive_timeout: Duration,

    /// Supervisor status poll period.
    #[serde(with = "humantime_serde")]
    pub status_period: Duration,

    /// Real-time scheduling configuration for the cyclic thread.
    pub realtime: RealtimeConfig,

    /// Fieldbus configuration.
    pub fieldbus: FieldbusConfig,

    /// Trajectory profile defaults.
    pub motion: ProfileConfig,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            cycle_time: Duration::from_millis(2),
            drive_timeout: Duration::from_secs(5),
            status_period: Duration::from_millis(100),
            realtime: RealtimeConfig::default(),
            fieldbus: FieldbusConfig::default(),
            motion: ProfileConfig::default(),
        }
    }
}

impl MotionConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> MotionResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| MotionError::Config(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&text)
            .map_err(|e| MotionError::Config(format!("cannot parse {}: {e}", path.display())))
    }
}

/// Real-time scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Enable real-time scheduling (requires privileges).
    pub enabled: bool,

    /// Scheduler policy: "fifo" or "rr" (round-robin).
    pub policy: SchedPolicy,

    /// Scheduler priority (1-99 for RT policies).
    pub priority: u8,

    /// CPU affinity for the cyclic thread.
    pub cpu_affinity: CpuAffinity,

    /// Lock all memory pages (mlockall).
    pub lock_memory: bool,

    /// Pre-fault stack size in bytes.
    pub prefault_stack_size: usize,

    /// Fail at startup if RT requirements cannot be met instead of
    /// degrading to best-effort scheduling.
    pub fail_fast: bool,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            policy: SchedPolicy::Fifo,
            priority: 90,
            cpu_affinity: CpuAffinity::None,
            lock_memory: true,
            prefault_stack_size: 8 * 1024 * 1024,
            fail_fast: false,
        }
    }
}

/// Scheduler policy for the cyclic thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchedPolicy {
    /// SCHED_FIFO: first-in-first-out real-time.
    #[default]
    Fifo,
    /// SCHED_RR: round-robin real-time.
    Rr,
    /// SCHED_OTHER: normal time-sharing (non-RT).
    Other,
}

/// CPU affinity specification.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CpuAffinity {
    /// No affinity set (OS chooses).
    #[default]
    None,
    /// Pin to a single CPU core.
    Single(usize),
    /// Pin to a set of CPU cores.
    Set(Vec<usize>),
}

impl Serialize for CpuAffinity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            CpuAffinity::None => serializer.serialize_none(),
            CpuAffinity::Single(cpu) => serializer.serialize_u64(*cpu as u64),
            CpuAffinity::Set(cpus) => cpus.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for CpuAffinity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{self, Visitor};

        struct CpuAffinityVisitor;

        impl<'de> Visitor<'de> for CpuAffinityVisitor {
            type Value = CpuAffinity;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("null, an integer, or an array of integers")
            }

            fn visit_none<E>(self) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(CpuAffinity::None)
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(CpuAffinity::None)
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(CpuAffinity::Single(value as usize))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                if value < 0 {
                    return Err(de::Error::custom("CPU index cannot be negative"));
                }
                Ok(CpuAffinity::Single(value as usize))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: de::SeqAccess<'de>,
            {
                let mut cpus = Vec::new();
                while let Some(cpu) = seq.next_element::<usize>()? {
                    cpus.push(cpu);
                }
                Ok(CpuAffinity::Set(cpus))
            }
        }

        deserializer.deserialize_any(CpuAffinityVisitor)
    }
}

/// Fieldbus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldbusConfig {
    /// Network interface name; `None` selects the simulated transport.
    pub interface: Option<String>,

    /// Program distributed clocks on DC-capable slaves.
    pub dc_enabled: bool,

    /// Timeout for a single mailbox SDO exchange.
    #[serde(with = "humantime_serde")]
    pub sdo_timeout: Duration,

    /// Timeout when polling for a requested AL state.
    #[serde(with = "humantime_serde")]
    pub state_timeout: Duration,

    /// Timeout for the cyclic process-data receive.
    #[serde(with = "humantime_serde")]
    pub pdo_timeout: Duration,
}

impl Default for FieldbusConfig {
    fn default() -> Self {
        Self {
            interface: None,
            dc_enabled: true,
            sdo_timeout: Duration::from_millis(50),
            state_timeout: Duration::from_millis(2000),
            pdo_timeout: Duration::from_millis(2),
        }
    }
}

/// Cyclic operation mode of the drive (object 0x6060).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    /// Cyclic Synchronous Position.
    #[default]
    Csp,
    /// Cyclic Synchronous Velocity.
    Csv,
}

impl OperationMode {
    /// Mode code written to 0x6060 and to the output PDO mode byte.
    #[must_use]
    pub fn code(self) -> i8 {
        match self {
            Self::Csp => 8,
            Self::Csv => 9,
        }
    }
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Csp => write!(f, "CSP"),
            Self::Csv => write!(f, "CSV"),
        }
    }
}

/// Trajectory profile defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    /// Cyclic operation mode.
    pub mode: OperationMode,

    /// Default acceleration in deg/s^2 when the operator gives none.
    pub acceleration_dps2: f64,

    /// Tolerance band around the target, in counts, inside which a move
    /// terminates.
    pub tolerance_counts: u32,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            mode: OperationMode::Csp,
            acceleration_dps2: 360.0,
            tolerance_counts: 100,
        }
    }
}
