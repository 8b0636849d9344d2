use thiserror::Error;

/// Error taxonomy for the motion controller, from NIC binding up to the
/// drive power state machine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MotionError {
    /// The raw-Ethernet socket could not be bound to the named NIC.
    #[error("cannot open fieldbus link on interface '{interface}'")]
    LinkOpen {
        /// Interface name that failed to bind.
        interface: String,
    },

    /// Slave enumeration returned zero slaves.
    #[error("no slaves found on interface '{interface}'")]
    NoSlaves {
        /// Interface that was scanned.
        interface: String,
    },

    /// A mailbox SDO exchange returned a non-positive working counter.
    #[error("SDO {op} {index:#06x}:{subindex:#04x} on slave {slave} failed")]
    SdoFailure {
        /// "read" or "write".
        op: &'static str,
        /// Slave position (1-based, as on the wire).
        slave: u16,
        /// Object dictionary index.
        index: u16,
        /// Object dictionary subindex.
        subindex: u8,
    },

    /// A requested AL state was not observed before the timeout elapsed.
    #[error("slaves did not reach {requested} within {timeout_ms} ms (stuck in {actual})")]
    StateTimeout {
        /// Requested AL state.
        requested: String,
        /// State actually observed when the timeout fired.
        actual: String,
        /// Poll timeout in milliseconds.
        timeout_ms: u64,
    },

    /// A slave entered AL ERROR; the code comes from the AL status register.
    #[error("slave {slave} entered AL ERROR: {code:#06x} ({reason})")]
    SlaveError {
        /// Slave position.
        slave: u16,
        /// AL status code.
        code: u16,
        /// Decoded meaning of the code.
        reason: String,
    },

    /// The drive never reached Operation Enabled after the bus went OP.
    #[error("drive did not reach Operation Enabled within {timeout_ms} ms (last error {last_error:#06x})")]
    DriveTimeout {
        /// Bring-up window in milliseconds.
        timeout_ms: u64,
        /// Drive error code read over SDO, 0 if none was observed.
        last_error: u16,
    },

    /// Cyclic exchange returned fewer working-counter increments than the
    /// group expects. Never fatal: the cyclic loop reports it in its
    /// per-cycle snapshot and keeps running.
    #[error("working counter underrun: got {wkc}, expected {expected}")]
    PdoUnderrun {
        /// Working counter returned by the exchange.
        wkc: i32,
        /// Expected working counter (2*outputs + inputs).
        expected: i32,
    },

    /// A motion profile was rejected at commit time.
    #[error("invalid motion profile: {0}")]
    InvalidProfile(String),

    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// An operation was attempted in the wrong bring-up phase.
    #[error("invalid session phase: {op} requires {requires}")]
    InvalidPhase {
        /// Operation that was attempted.
        op: &'static str,
        /// Phase precondition that was not met.
        requires: &'static str,
    },
}

/// Convenience type alias for motion controller operations.
pub type MotionResult<T> = Result<T, MotionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn underrun_names_both_counters() {
        let err = MotionError::PdoUnderrun {
            wkc: 2,
            expected: 3,
        };
        assert_eq!(err.to_string(), "working counter underrun: got 2, expected 3");
    }

    #[test]
    fn display_formats_hex_fields() {
        let err = MotionError::SdoFailure {
            op: "read",
            slave: 1,
            index: 0x3C13,
            subindex: 0x84,
        };
        let text = err.to_string();
        assert!(text.contains("0x3c13"));
        assert!(text.contains("0x84"));
    }
}
