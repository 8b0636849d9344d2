//! Simulated fieldbus with one CiA 402 servo on it.
//!
//! The drive model mirrors control-word transitions one step per cycle,
//! tracks position setpoints perfectly, and answers the handful of SDO
//! objects the controller touches. Tests drive failure paths through
//! [`SimHandle`]: fault injection, WKC shortfall, AL errors, refused state
//! transitions.

use crate::al_state::AlState;
use crate::pdo::{InputPdo, OutputPdo, INPUT_PDO_LEN, OUTPUT_PDO_LEN};
use crate::transport::{FieldbusTransport, SdoChannel, SlaveInfo};
use axis_common::{MotionError, MotionResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Name the simulated servo reports.
pub const SIM_SLAVE_NAME: &str = "SIM-SERVO-AX1";

/// Power stage of the simulated drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PowerStage {
    SwitchOnDisabled,
    ReadyToSwitchOn,
    SwitchedOn,
    OperationEnabled,
    Fault,
}

impl PowerStage {
    fn status_word(self) -> u16 {
        match self {
            // Scenario values: fault carries only bit 3, switch-on disabled
            // only bit 6; the powered states add voltage-enabled and remote.
            Self::Fault => 0x0008,
            Self::SwitchOnDisabled => 0x0040,
            Self::ReadyToSwitchOn => 0x0231,
            Self::SwitchedOn => 0x0233,
            Self::OperationEnabled => 0x0237,
        }
    }
}

/// One simulated CiA 402 servo drive.
#[derive(Debug)]
struct SimDrive {
    power: PowerStage,
    position: i32,
    velocity: i32,
    mode: i8,
    error_code: u16,
}

impl SimDrive {
    fn new() -> Self {
        Self {
            power: PowerStage::SwitchOnDisabled,
            position: 0,
            velocity: 0,
            mode: 0,
            error_code: 0,
        }
    }

    /// Apply one control word; at most one power transition per cycle.
    /// Bits 4..=6 are mode-specific (new-setpoint toggle in CSP) and are
    /// masked out of the command decode.
    fn apply_control_word(&mut self, cw: u16) {
        if cw & 0x0080 != 0 {
            if self.power == PowerStage::Fault {
                self.power = PowerStage::SwitchOnDisabled;
                self.error_code = 0;
                self.velocity = 0;
            }
            return;
        }

        let command = cw & 0x008F;
        self.power = match (self.power, command) {
            (PowerStage::SwitchOnDisabled, 0x06) => PowerStage::ReadyToSwitchOn,
            (PowerStage::ReadyToSwitchOn, 0x07) => PowerStage::SwitchedOn,
            (PowerStage::SwitchedOn, 0x0F) => PowerStage::OperationEnabled,
            // Shutdown from a powered state
            (PowerStage::SwitchedOn | PowerStage::OperationEnabled, 0x06) => {
                PowerStage::ReadyToSwitchOn
            }
            // Disable operation
            (PowerStage::OperationEnabled, 0x07) => PowerStage::SwitchedOn,
            // Disable voltage (bit 1 clear)
            (
                PowerStage::ReadyToSwitchOn | PowerStage::SwitchedOn | PowerStage::OperationEnabled,
                c,
            ) if c & 0x02 == 0 => PowerStage::SwitchOnDisabled,
            (stage, _) => stage,
        };
    }

    /// Track setpoints while Operation Enabled; a drive with its position
    /// loop closed follows the commanded trajectory within one cycle here.
    fn follow_setpoints(&mut self, outputs: &OutputPdo, dt_s: f64) {
        if self.power != PowerStage::OperationEnabled {
            self.velocity = 0;
            return;
        }

        match self.mode {
            9 => {
                self.velocity = outputs.target_velocity;
                let delta = (f64::from(self.velocity) * dt_s).round() as i32;
                self.position = self.position.wrapping_add(delta);
            }
            _ => {
                let previous = self.position;
                self.position = outputs.target_position;
                self.velocity =
                    (f64::from(self.position.wrapping_sub(previous)) / dt_s).round() as i32;
            }
        }
    }

    fn inputs(&self) -> InputPdo {
        InputPdo {
            status_word: self.power.status_word(),
            position_actual: self.position,
            velocity_actual: self.velocity,
            torque_actual: 0,
            following_error: 0,
            mode_of_operation_display: self.mode,
            touch_probe_status: 0,
            touch_probe_pos1: 0,
        }
    }
}

/// Shared bus state behind the transport and its SDO channels.
#[derive(Debug)]
struct SimBus {
    interface: Option<String>,
    scanned: bool,
    mapped: bool,
    dc_configured: bool,
    al_state: AlState,
    al_status_code: u16,
    refuse_state: Option<AlState>,
    dc_time_ns: i64,
    cycle_time_ns: i64,
    drive: SimDrive,
    outputs: [u8; OUTPUT_PDO_LEN],
    wkc_shortfall_cycles: u32,
    exchanges: u64,
    object_store: HashMap<(u16, u8), Vec<u8>>,
}

impl SimBus {
    fn new() -> Self {
        Self {
            interface: None,
            scanned: false,
            mapped: false,
            dc_configured: false,
            al_state: AlState::Init,
            al_status_code: 0,
            refuse_state: None,
            dc_time_ns: 0,
            cycle_time_ns: 2_000_000,
            drive: SimDrive::new(),
            outputs: [0u8; OUTPUT_PDO_LEN],
            wkc_shortfall_cycles: 0,
            exchanges: 0,
            object_store: HashMap::new(),
        }
    }

    fn expected_wkc(&self) -> i32 {
        // One slave with both directions mapped: 2 for outputs, 1 for inputs
        if self.mapped {
            3
        } else {
            0
        }
    }

    fn exchange(&mut self, inputs: &mut [u8]) -> i32 {
        if !self.mapped || self.al_state == AlState::Init {
            return 0;
        }

        self.exchanges += 1;
        if self.dc_configured {
            self.dc_time_ns += self.cycle_time_ns;
        }

        // Outputs are only acted on once the bus allows them (SAFE-OP
        // ignores outputs, OP honours them)
        if self.al_state == AlState::Op {
            let outputs = OutputPdo::decode(&self.outputs);
            if outputs.mode_of_operation != 0 {
                self.drive.mode = outputs.mode_of_operation;
            }
            self.drive.apply_control_word(outputs.control_word);
            let dt_s = self.cycle_time_ns as f64 / 1e9;
            self.drive.follow_setpoints(&outputs, dt_s);
        }

        let mut frame = [0u8; INPUT_PDO_LEN];
        self.drive.inputs().encode(&mut frame);
        let len = inputs.len().min(INPUT_PDO_LEN);
        inputs[..len].copy_from_slice(&frame[..len]);

        if self.wkc_shortfall_cycles > 0 {
            self.wkc_shortfall_cycles -= 1;
            self.expected_wkc() - 1
        } else {
            self.expected_wkc()
        }
    }

    fn sdo_read(&mut self, index: u16, subindex: u8, buf: &mut [u8]) -> MotionResult<usize> {
        let bytes: Vec<u8> = match (index, subindex) {
            (0x6040, 0) => 0u16.to_le_bytes().to_vec(),
            (0x6041, 0) => self.drive.power.status_word().to_le_bytes().to_vec(),
            (0x6060, 0) | (0x6061, 0) => vec![self.drive.mode as u8],
            (0x3C13, 0x84) => self.drive.error_code.to_le_bytes().to_vec(),
            (0x3C13, 0xD5) => {
                let status: u16 = if self.drive.power == PowerStage::OperationEnabled {
                    1
                } else {
                    0
                };
                status.to_le_bytes().to_vec()
            }
            key => self
                .object_store
                .get(&key)
                .cloned()
                .ok_or(MotionError::SdoFailure {
                    op: "read",
                    slave: 1,
                    index,
                    subindex,
                })?,
        };

        if buf.len() < bytes.len() {
            return Err(MotionError::SdoFailure {
                op: "read",
                slave: 1,
                index,
                subindex,
            });
        }
        buf[..bytes.len()].copy_from_slice(&bytes);
        Ok(bytes.len())
    }

    fn sdo_write(&mut self, index: u16, subindex: u8, data: &[u8]) -> MotionResult<()> {
        if !matches!(data.len(), 1 | 2 | 4) {
            return Err(MotionError::SdoFailure {
                op: "write",
                slave: 1,
                index,
                subindex,
            });
        }

        match (index, subindex) {
            (0x6060, 0) => self.drive.mode = data[0] as i8,
            (0x6040, 0) => {
                let cw = u16::from_le_bytes([data[0], *data.get(1).unwrap_or(&0)]);
                self.drive.apply_control_word(cw);
            }
            key => {
                self.object_store.insert(key, data.to_vec());
            }
        }
        Ok(())
    }
}

/// Simulated transport; clones of its inner state back the SDO channels
/// and the test handle.
#[derive(Debug)]
pub struct SimulatedTransport {
    bus: Arc<Mutex<SimBus>>,
}

impl SimulatedTransport {
    /// A bus with one idle servo in Switch-on Disabled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bus: Arc::new(Mutex::new(SimBus::new())),
        }
    }

    /// Handle for injecting failures and inspecting the drive from tests.
    #[must_use]
    pub fn handle(&self) -> SimHandle {
        SimHandle {
            bus: Arc::clone(&self.bus),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimBus> {
        self.bus.lock().expect("sim bus poisoned")
    }
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SdoChannel for SimulatedTransport {
    fn sdo_read(
        &mut self,
        _slave: u16,
        index: u16,
        subindex: u8,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> MotionResult<usize> {
        self.lock().sdo_read(index, subindex, buf)
    }

    fn sdo_write(
        &mut self,
        _slave: u16,
        index: u16,
        subindex: u8,
        data: &[u8],
        _timeout: Duration,
    ) -> MotionResult<()> {
        self.lock().sdo_write(index, subindex, data)
    }
}

impl FieldbusTransport for SimulatedTransport {
    fn open(&mut self, interface: &str) -> MotionResult<()> {
        self.lock().interface = Some(interface.to_string());
        Ok(())
    }

    fn config_init(&mut self) -> MotionResult<usize> {
        let mut bus = self.lock();
        if bus.interface.is_none() {
            return Err(MotionError::LinkOpen {
                interface: "<unopened>".into(),
            });
        }
        bus.scanned = true;
        bus.al_state = AlState::PreOp;
        Ok(1)
    }

    fn config_map(&mut self) -> MotionResult<()> {
        let mut bus = self.lock();
        bus.mapped = bus.scanned;
        Ok(())
    }

    fn config_dc(&mut self) -> MotionResult<bool> {
        self.lock().dc_configured = true;
        Ok(true)
    }

    fn slave_count(&self) -> usize {
        if self.lock().scanned {
            1
        } else {
            0
        }
    }

    fn slave_info(&self, position: u16) -> Option<SlaveInfo> {
        let bus = self.lock();
        (position == 1 && bus.scanned).then(|| SlaveInfo {
            position: 1,
            name: SIM_SLAVE_NAME.to_string(),
            al_state: bus.al_state,
            al_status_code: bus.al_status_code,
            has_dc: true,
            output_bytes: OUTPUT_PDO_LEN,
            input_bytes: INPUT_PDO_LEN,
        })
    }

    fn expected_wkc(&self) -> i32 {
        self.lock().expected_wkc()
    }

    fn request_state(&mut self, state: AlState) -> MotionResult<()> {
        let mut bus = self.lock();
        if bus.refuse_state != Some(state) && bus.al_state != AlState::Error {
            bus.al_state = state;
        }
        Ok(())
    }

    fn check_state(&mut self, state: AlState, _timeout: Duration) -> AlState {
        let bus = self.lock();
        let _ = state;
        bus.al_state
    }

    fn read_state(&mut self) -> AlState {
        self.lock().al_state
    }

    fn dc_time(&mut self) -> i64 {
        self.lock().dc_time_ns
    }

    fn send_pdo(&mut self, outputs: &[u8]) -> MotionResult<()> {
        let mut bus = self.lock();
        let len = outputs.len().min(OUTPUT_PDO_LEN);
        bus.outputs[..len].copy_from_slice(&outputs[..len]);
        Ok(())
    }

    fn receive_pdo(&mut self, inputs: &mut [u8], _timeout: Duration) -> i32 {
        self.lock().exchange(inputs)
    }

    fn sdo_channel(&self) -> Box<dyn SdoChannel> {
        Box::new(SimSdoChannel {
            bus: Arc::clone(&self.bus),
        })
    }

    fn close(&mut self) {
        let mut bus = self.lock();
        bus.interface = None;
        bus.al_state = AlState::Init;
    }
}

/// Mailbox handle cloned off the simulated transport.
#[derive(Debug)]
struct SimSdoChannel {
    bus: Arc<Mutex<SimBus>>,
}

impl SdoChannel for SimSdoChannel {
    fn sdo_read(
        &mut self,
        _slave: u16,
        index: u16,
        subindex: u8,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> MotionResult<usize> {
        self.bus
            .lock()
            .expect("sim bus poisoned")
            .sdo_read(index, subindex, buf)
    }

    fn sdo_write(
        &mut self,
        _slave: u16,
        index: u16,
        subindex: u8,
        data: &[u8],
        _timeout: Duration,
    ) -> MotionResult<()> {
        self.bus
            .lock()
            .expect("sim bus poisoned")
            .sdo_write(index, subindex, data)
    }
}

/// Test-side handle onto the simulated bus.
#[derive(Debug, Clone)]
pub struct SimHandle {
    bus: Arc<Mutex<SimBus>>,
}

impl SimHandle {
    fn lock(&self) -> std::sync::MutexGuard<'_, SimBus> {
        self.bus.lock().expect("sim bus poisoned")
    }

    /// Trip the drive into Fault with the given vendor error code.
    pub fn inject_fault(&self, error_code: u16) {
        let mut bus = self.lock();
        bus.drive.power = PowerStage::Fault;
        bus.drive.error_code = error_code;
        bus.drive.velocity = 0;
    }

    /// Return a short working counter for the next `cycles` exchanges.
    pub fn fail_wkc_for(&self, cycles: u32) {
        self.lock().wkc_shortfall_cycles = cycles;
    }

    /// Push the slave into AL ERROR with the given AL status code.
    pub fn force_al_error(&self, code: u16) {
        let mut bus = self.lock();
        bus.al_state = AlState::Error;
        bus.al_status_code = code;
    }

    /// Ignore requests for the given AL state, so state checks time out.
    pub fn refuse_state(&self, state: AlState) {
        self.lock().refuse_state = Some(state);
    }

    /// Preload the drive's measured position, in counts.
    pub fn set_position(&self, counts: i32) {
        self.lock().drive.position = counts;
    }

    /// Measured position of the simulated drive.
    #[must_use]
    pub fn position(&self) -> i32 {
        self.lock().drive.position
    }

    /// Status word the drive currently reports.
    #[must_use]
    pub fn status_word(&self) -> u16 {
        self.lock().drive.power.status_word()
    }

    /// Number of process-data exchanges performed.
    #[must_use]
    pub fn exchanges(&self) -> u64 {
        self.lock().exchanges
    }

    /// Raw view of the last output image the master sent.
    #[must_use]
    pub fn last_outputs(&self) -> OutputPdo {
        OutputPdo::decode(&self.lock().outputs)
    }
}
