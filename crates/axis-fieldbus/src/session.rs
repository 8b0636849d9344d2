//! Bus session: ownership of the fieldbus context and the PDO images.
//!
//! Sequencing invariant: PDO mapping must be established before SAFE-OP is
//! requested; the session tracks its bring-up phase and refuses calls out
//! of order.

use crate::al_state::{decode_al_status, AlState};
use crate::pdo::{InputPdo, OutputPdo, INPUT_PDO_LEN, OUTPUT_PDO_LEN};
use crate::transport::{FieldbusTransport, SdoChannel, SlaveInfo};
use axis_common::{FieldbusConfig, MotionError, MotionResult, OperationMode};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bring-up phase of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionPhase {
    Open,
    Mapped,
    SafeOp,
    OpRequested,
}

/// Owns the fieldbus transport, the PDO buffers, and the bring-up state.
pub struct BusSession {
    transport: Box<dyn FieldbusTransport>,
    interface: String,
    phase: SessionPhase,
    slave_count: usize,
    expected_wkc: i32,
    output_pdo: OutputPdo,
    output_buf: [u8; OUTPUT_PDO_LEN],
    input_buf: [u8; INPUT_PDO_LEN],
    sdo_timeout: Duration,
    state_timeout: Duration,
    pdo_timeout: Duration,
}

impl std::fmt::Debug for BusSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusSession")
            .field("interface", &self.interface)
            .field("phase", &self.phase)
            .field("slave_count", &self.slave_count)
            .field("expected_wkc", &self.expected_wkc)
            .finish_non_exhaustive()
    }
}

impl BusSession {
    /// Bind the transport to the named NIC.
    pub fn open(
        mut transport: Box<dyn FieldbusTransport>,
        interface: &str,
        config: &FieldbusConfig,
    ) -> MotionResult<Self> {
        transport
            .open(interface)
            .map_err(|_| MotionError::LinkOpen {
                interface: interface.to_string(),
            })?;

        info!(interface, "fieldbus link open");

        Ok(Self {
            transport,
            interface: interface.to_string(),
            phase: SessionPhase::Open,
            slave_count: 0,
            expected_wkc: 0,
            output_pdo: OutputPdo::default(),
            output_buf: [0u8; OUTPUT_PDO_LEN],
            input_buf: [0u8; INPUT_PDO_LEN],
            sdo_timeout: config.sdo_timeout,
            state_timeout: config.state_timeout,
            pdo_timeout: config.pdo_timeout,
        })
    }

    /// Discover slaves and configure PDO mapping. Returns the slave count.
    pub fn enumerate_and_map(&mut self) -> MotionResult<usize> {
        self.require(SessionPhase::Open, "enumerate_and_map", "an open link")?;

        let count = self.transport.config_init()?;
        if count == 0 {
            return Err(MotionError::NoSlaves {
                interface: self.interface.clone(),
            });
        }

        self.transport.config_map()?;
        self.slave_count = count;
        self.expected_wkc = self.transport.expected_wkc();
        self.phase = SessionPhase::Mapped;

        // The output image is on the wire from the first exchange; never
        // let it carry stale garbage.
        self.output_pdo = OutputPdo::default();
        self.output_buf.fill(0);

        for position in 1..=count as u16 {
            if let Some(slave) = self.transport.slave_info(position) {
                info!(
                    position,
                    name = %slave.name,
                    dc = slave.has_dc,
                    outputs = slave.output_bytes,
                    inputs = slave.input_bytes,
                    "discovered slave"
                );
            }
        }

        debug!(count, expected_wkc = self.expected_wkc, "mapping complete");
        Ok(count)
    }

    /// Write the cyclic mode of operation (0x6060) over SDO and stamp the
    /// output image's mode byte. Done after mapping, before SAFE-OP, the
    /// order the drive was commissioned with.
    pub fn set_mode_of_operation(&mut self, mode: OperationMode) -> MotionResult<()> {
        self.require(SessionPhase::Mapped, "set_mode_of_operation", "a mapped bus")?;

        self.sdo_write(1, 0x6060, 0, &[mode.code() as u8])?;
        self.output_pdo.mode_of_operation = mode.code();
        info!(%mode, "mode of operation set");
        Ok(())
    }

    /// Program distributed clocks. Returns whether a reference clock exists.
    pub fn configure_dc(&mut self) -> MotionResult<bool> {
        self.require(SessionPhase::Mapped, "configure_dc", "a mapped bus")?;
        let has_reference = self.transport.config_dc()?;
        if !has_reference {
            warn!("no DC-capable slave found; running unsynchronized");
        }
        Ok(has_reference)
    }

    /// Request SAFE-OP and poll until reached.
    pub fn request_safe_op(&mut self) -> MotionResult<()> {
        self.require(SessionPhase::Mapped, "request_safe_op", "a mapped bus")?;
        self.transition_to(AlState::SafeOp)?;
        self.phase = SessionPhase::SafeOp;
        info!("bus in SAFE-OP");
        Ok(())
    }

    /// Issue the OP request without waiting; cyclic traffic must keep
    /// flowing while slaves come up, so the caller polls [`read_state`].
    ///
    /// [`read_state`]: Self::read_state
    pub fn request_operational(&mut self) -> MotionResult<()> {
        self.require(SessionPhase::SafeOp, "request_operational", "SAFE-OP")?;
        self.transport.request_state(AlState::Op)?;
        self.phase = SessionPhase::OpRequested;
        Ok(())
    }

    /// Request a state and poll for it, surfacing `StateTimeout` on
    /// failure.
    pub fn transition_to(&mut self, state: AlState) -> MotionResult<AlState> {
        self.transport.request_state(state)?;
        let actual = self.transport.check_state(state, self.state_timeout);
        if actual != state {
            return Err(MotionError::StateTimeout {
                requested: state.to_string(),
                actual: actual.to_string(),
                timeout_ms: self.state_timeout.as_millis() as u64,
            });
        }
        Ok(actual)
    }

    /// Current AL state without waiting.
    pub fn read_state(&mut self) -> AlState {
        self.transport.read_state()
    }

    /// If any slave sits in AL ERROR, decode it into a `SlaveError`.
    pub fn al_error(&mut self) -> Option<MotionError> {
        if self.transport.read_state() != AlState::Error {
            return None;
        }
        for position in 1..=self.slave_count as u16 {
            if let Some(slave) = self.transport.slave_info(position) {
                if slave.al_state == AlState::Error || slave.al_status_code != 0 {
                    return Some(MotionError::SlaveError {
                        slave: position,
                        code: slave.al_status_code,
                        reason: decode_al_status(slave.al_status_code).to_string(),
                    });
                }
            }
        }
        Some(MotionError::SlaveError {
            slave: 0,
            code: 0,
            reason: decode_al_status(0).to_string(),
        })
    }

    /// True once the reference clock is distributing time.
    pub fn dc_synchronized(&mut self) -> bool {
        let has_dc = self
            .transport
            .slave_info(1)
            .map(|s| s.has_dc)
            .unwrap_or(false);
        has_dc && self.transport.dc_time() > 0
    }

    /// Staged output image; the cyclic code mutates this between receive
    /// and send.
    pub fn outputs_mut(&mut self) -> &mut OutputPdo {
        &mut self.output_pdo
    }

    /// Decoded input image from the last `receive_pdo`.
    #[must_use]
    pub fn inputs(&self) -> InputPdo {
        InputPdo::decode(&self.input_buf)
    }

    /// Encode the staged outputs and put the cyclic frame on the wire.
    pub fn send_pdo(&mut self) -> MotionResult<()> {
        self.output_pdo.encode(&mut self.output_buf);
        self.transport.send_pdo(&self.output_buf)
    }

    /// Wait for the returning frame; returns the working counter (`<= 0`
    /// is a failed exchange).
    pub fn receive_pdo(&mut self) -> i32 {
        self.transport.receive_pdo(&mut self.input_buf, self.pdo_timeout)
    }

    /// Group expected working counter.
    #[must_use]
    pub fn expected_wkc(&self) -> i32 {
        self.expected_wkc
    }

    /// Discovered slave count.
    #[must_use]
    pub fn slave_count(&self) -> usize {
        self.slave_count
    }

    /// Facts about a slave (1-based position).
    #[must_use]
    pub fn slave_info(&self, position: u16) -> Option<SlaveInfo> {
        self.transport.slave_info(position)
    }

    /// Interface this session is bound to.
    #[must_use]
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// One-shot SDO read against slave `slave`; returns the object size.
    pub fn sdo_read(
        &mut self,
        slave: u16,
        index: u16,
        subindex: u8,
        buf: &mut [u8],
    ) -> MotionResult<usize> {
        self.transport
            .sdo_read(slave, index, subindex, buf, self.sdo_timeout)
    }

    /// One-shot SDO write against slave `slave`.
    pub fn sdo_write(
        &mut self,
        slave: u16,
        index: u16,
        subindex: u8,
        data: &[u8],
    ) -> MotionResult<()> {
        self.transport
            .sdo_write(slave, index, subindex, data, self.sdo_timeout)
    }

    /// Mailbox handle for the supervisor thread.
    #[must_use]
    pub fn sdo_channel(&self) -> Box<dyn SdoChannel> {
        self.transport.sdo_channel()
    }

    /// Return the bus to INIT and release the NIC.
    pub fn close(&mut self) {
        if let Err(e) = self.transition_to(AlState::Init) {
            warn!(error = %e, "slaves did not confirm INIT during close");
        }
        self.transport.close();
        info!(interface = %self.interface, "fieldbus link closed");
    }

    fn require(
        &self,
        phase: SessionPhase,
        op: &'static str,
        requires: &'static str,
    ) -> MotionResult<()> {
        if self.phase == phase {
            Ok(())
        } else {
            Err(MotionError::InvalidPhase { op, requires })
        }
    }
}
