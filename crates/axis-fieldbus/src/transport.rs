//! Fieldbus primitive contract.
//!
//! [`FieldbusTransport`] is the seam between the bus session and the frame
//! layer: the SOEM backend implements it against real hardware, the
//! simulated backend implements it against an in-memory drive model. The
//! method set mirrors the SOEM call surface (config_init, config_map,
//! configdc, writestate/statecheck, send/receive_processdata, SDO).

use crate::al_state::AlState;
use axis_common::MotionResult;
use std::time::Duration;

/// Static facts about one discovered slave.
#[derive(Debug, Clone)]
pub struct SlaveInfo {
    /// Position on the bus, 1-based as on the wire.
    pub position: u16,
    /// Name from the SII, or a stand-in for simulated slaves.
    pub name: String,
    /// AL state at the last read.
    pub al_state: AlState,
    /// AL status code at the last read; 0 when healthy.
    pub al_status_code: u16,
    /// Slave supports distributed clocks.
    pub has_dc: bool,
    /// Mapped output bytes (master to slave).
    pub output_bytes: usize,
    /// Mapped input bytes (slave to master).
    pub input_bytes: usize,
}

/// Acyclic mailbox access, usable from the supervisor thread while the
/// cyclic thread keeps exchanging process data. Backends serialise the two
/// paths internally.
pub trait SdoChannel: Send {
    /// Expedited SDO upload. On success `buf` holds the object bytes and
    /// the returned length is 1, 2 or 4.
    fn sdo_read(
        &mut self,
        slave: u16,
        index: u16,
        subindex: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> MotionResult<usize>;

    /// Expedited SDO download of 1, 2 or 4 bytes.
    fn sdo_write(
        &mut self,
        slave: u16,
        index: u16,
        subindex: u8,
        data: &[u8],
        timeout: Duration,
    ) -> MotionResult<()>;
}

/// Frame-layer operations the bus session is built on.
pub trait FieldbusTransport: SdoChannel {
    /// Bind the raw-Ethernet socket to the named NIC.
    fn open(&mut self, interface: &str) -> MotionResult<()>;

    /// Discover slaves; returns the count (0 is not an error here, the
    /// session turns it into `NoSlaves`).
    fn config_init(&mut self) -> MotionResult<usize>;

    /// Configure PDO mapping for group 0 into the transport's I/O map.
    /// Slaves end up in PRE-OP with FMMUs programmed.
    fn config_map(&mut self) -> MotionResult<()>;

    /// Program DC registers on DC-capable slaves. Returns whether a
    /// reference clock was found.
    fn config_dc(&mut self) -> MotionResult<bool>;

    /// Number of slaves discovered by `config_init`.
    fn slave_count(&self) -> usize;

    /// Facts about the slave at `position` (1-based).
    fn slave_info(&self, position: u16) -> Option<SlaveInfo>;

    /// Group expected working counter: `2 * outputs_wkc + inputs_wkc`.
    fn expected_wkc(&self) -> i32;

    /// Issue an AL state request to all slaves.
    fn request_state(&mut self, state: AlState) -> MotionResult<()>;

    /// Poll until all slaves reach `state` or `timeout` elapses; returns
    /// the state actually observed.
    fn check_state(&mut self, state: AlState, timeout: Duration) -> AlState;

    /// Read the current lowest AL state across slaves without waiting.
    fn read_state(&mut self) -> AlState;

    /// DC system time of the reference clock, nanoseconds. Zero until the
    /// clock is running.
    fn dc_time(&mut self) -> i64;

    /// Queue the output process image and put the cyclic frame on the wire.
    fn send_pdo(&mut self, outputs: &[u8]) -> MotionResult<()>;

    /// Block for the returning frame up to `timeout` and copy the input
    /// process image into `inputs`. Returns the working counter; values
    /// `<= 0` mean the exchange failed.
    fn receive_pdo(&mut self, inputs: &mut [u8], timeout: Duration) -> i32;

    /// A mailbox handle for use from another thread.
    fn sdo_channel(&self) -> Box<dyn SdoChannel>;

    /// Release the NIC. The session requests INIT before calling this.
    fn close(&mut self);
}
