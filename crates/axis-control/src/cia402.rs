//! CiA 402 power state machine.
//!
//! The master drives every transition explicitly: classify the status word,
//! answer with the control word that requests the next state, repeat until
//! Operation Enabled. While anything other than Operation Enabled is
//! active the commanded position shadows the measured position so the
//! drive cannot jump the moment its position loop engages.

use axis_common::OperationMode;
use axis_fieldbus::{InputPdo, OutputPdo};
use bitflags::bitflags;
use tracing::{debug, info, warn};

bitflags! {
    /// CiA 402 control word (0x6040).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ControlWord: u16 {
        /// Switch on.
        const SWITCH_ON = 1 << 0;
        /// Enable voltage.
        const ENABLE_VOLTAGE = 1 << 1;
        /// Quick stop (active low).
        const QUICK_STOP = 1 << 2;
        /// Enable operation.
        const ENABLE_OPERATION = 1 << 3;
        /// Mode-specific; new-setpoint latch in the cyclic position modes.
        const NEW_SETPOINT = 1 << 4;
        /// Fault reset (rising edge).
        const FAULT_RESET = 1 << 7;

        /// Shutdown command: voltage on, quick stop inactive.
        const CMD_SHUTDOWN = Self::ENABLE_VOLTAGE.bits() | Self::QUICK_STOP.bits();
        /// Switch-on command.
        const CMD_SWITCH_ON = Self::CMD_SHUTDOWN.bits() | Self::SWITCH_ON.bits();
        /// Enable-operation command.
        const CMD_ENABLE_OPERATION = Self::CMD_SWITCH_ON.bits() | Self::ENABLE_OPERATION.bits();
    }
}

bitflags! {
    /// CiA 402 status word (0x6041).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusWord: u16 {
        /// Ready to switch on.
        const READY_TO_SWITCH_ON = 1 << 0;
        /// Switched on.
        const SWITCHED_ON = 1 << 1;
        /// Operation enabled.
        const OPERATION_ENABLED = 1 << 2;
        /// Fault.
        const FAULT = 1 << 3;
        /// Voltage enabled.
        const VOLTAGE_ENABLED = 1 << 4;
        /// Quick stop (active low).
        const QUICK_STOP = 1 << 5;
        /// Switch on disabled.
        const SWITCH_ON_DISABLED = 1 << 6;
        /// Warning.
        const WARNING = 1 << 7;
    }
}

/// Stable drive states recognised by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveState {
    /// Fault bit set; everything else is ignored.
    Fault,
    /// Power stage off, waiting for Shutdown.
    SwitchOnDisabled,
    /// Ready for Switch On.
    ReadyToSwitchOn,
    /// Power stage on, operation not enabled.
    SwitchedOn,
    /// Position loop closed, setpoints are being consumed.
    OperationEnabled,
    /// Transient or vendor-specific pattern; treated like power-off.
    NotReady,
}

impl DriveState {
    /// Classify a raw status word. Tests run in order; the fault bit wins
    /// over everything.
    #[must_use]
    pub fn classify(status_word: u16) -> Self {
        if status_word & 0x0008 != 0 {
            Self::Fault
        } else if status_word & 0x004F == 0x0040 {
            Self::SwitchOnDisabled
        } else if status_word & 0x006F == 0x0021 {
            Self::ReadyToSwitchOn
        } else if status_word & 0x006F == 0x0023 {
            Self::SwitchedOn
        } else if status_word & 0x006F == 0x0027 {
            Self::OperationEnabled
        } else {
            Self::NotReady
        }
    }

    /// Control word that requests the next transition toward Operation
    /// Enabled from this state.
    #[must_use]
    pub fn next_command(self) -> ControlWord {
        match self {
            Self::Fault => ControlWord::FAULT_RESET,
            Self::SwitchOnDisabled | Self::NotReady => ControlWord::CMD_SHUTDOWN,
            Self::ReadyToSwitchOn => ControlWord::CMD_SWITCH_ON,
            Self::SwitchedOn | Self::OperationEnabled => ControlWord::CMD_ENABLE_OPERATION,
        }
    }
}

impl std::fmt::Display for DriveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fault => write!(f, "FAULT"),
            Self::SwitchOnDisabled => write!(f, "SWITCH-ON-DISABLED"),
            Self::ReadyToSwitchOn => write!(f, "READY-TO-SWITCH-ON"),
            Self::SwitchedOn => write!(f, "SWITCHED-ON"),
            Self::OperationEnabled => write!(f, "OPERATION-ENABLED"),
            Self::NotReady => write!(f, "NOT-READY"),
        }
    }
}

/// Per-cycle outcome of the drive controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveUpdate {
    /// Classified state this cycle.
    pub state: DriveState,
    /// First cycle in Operation Enabled; the caller seeds the trajectory
    /// from the measured position on this edge.
    pub became_operational: bool,
}

/// Drives the CiA 402 power state machine toward Operation Enabled and
/// holds it there.
#[derive(Debug)]
pub struct DriveController {
    mode: OperationMode,
    operational: bool,
    setpoint_toggle: bool,
    last_state: Option<DriveState>,
}

impl DriveController {
    /// Controller for the given cyclic mode.
    #[must_use]
    pub fn new(mode: OperationMode) -> Self {
        Self {
            mode,
            operational: false,
            setpoint_toggle: false,
            last_state: None,
        }
    }

    /// True while the drive is classified Operation Enabled.
    #[must_use]
    pub fn is_operational(&self) -> bool {
        self.operational
    }

    /// One control cycle: classify the fresh status word and stage the
    /// control word for the next send. While not operational the
    /// commanded position shadows the measured position.
    pub fn cycle(&mut self, inputs: &InputPdo, outputs: &mut OutputPdo) -> DriveUpdate {
        let state = DriveState::classify(inputs.status_word);

        if self.last_state != Some(state) {
            match state {
                DriveState::Fault => {
                    warn!(status_word = format_args!("{:#06x}", inputs.status_word), "drive fault")
                }
                DriveState::OperationEnabled => info!("drive operation enabled"),
                _ => debug!(%state, "drive state"),
            }
            self.last_state = Some(state);
        }

        let mut became_operational = false;

        match state {
            DriveState::OperationEnabled => {
                if !self.operational {
                    self.operational = true;
                    became_operational = true;
                    // Seed the hold target before any trajectory runs
                    outputs.target_position = inputs.position_actual;
                }

                let mut command = ControlWord::CMD_ENABLE_OPERATION;
                if self.mode == OperationMode::Csp {
                    // Toggle the latch every cycle so each fresh target is
                    // consumed; CSV setpoints need no latch.
                    self.setpoint_toggle = !self.setpoint_toggle;
                    if self.setpoint_toggle {
                        command |= ControlWord::NEW_SETPOINT;
                    }
                }
                outputs.control_word = command.bits();
            }
            state => {
                if self.operational {
                    warn!(%state, "drive dropped out of Operation Enabled");
                    self.operational = false;
                }
                outputs.control_word = state.next_command().bits();
                outputs.target_position = inputs.position_actual;
                outputs.target_velocity = 0;
            }
        }

        DriveUpdate {
            state,
            became_operational,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_table() {
        assert_eq!(DriveState::classify(0x0008), DriveState::Fault);
        assert_eq!(DriveState::classify(0x0040), DriveState::SwitchOnDisabled);
        assert_eq!(DriveState::classify(0x0221), DriveState::ReadyToSwitchOn);
        assert_eq!(DriveState::classify(0x0233), DriveState::SwitchedOn);
        assert_eq!(DriveState::classify(0x0237), DriveState::OperationEnabled);
        assert_eq!(DriveState::classify(0x0000), DriveState::NotReady);
    }

    #[test]
    fn fault_bit_dominates() {
        // Fault plus any other pattern is still a fault
        assert_eq!(DriveState::classify(0x0048), DriveState::Fault);
        assert_eq!(DriveState::classify(0x022F), DriveState::Fault);
    }

    #[test]
    fn classifier_is_stable_over_the_whole_domain() {
        for raw in 0x0000..=0xFFFFu16 {
            let first = DriveState::classify(raw);
            let second = DriveState::classify(raw);
            assert_eq!(first, second, "classifier unstable for {raw:#06x}");
        }
    }

    #[test]
    fn command_ladder_matches_profile() {
        assert_eq!(DriveState::Fault.next_command().bits(), 0x80);
        assert_eq!(DriveState::SwitchOnDisabled.next_command().bits(), 0x06);
        assert_eq!(DriveState::ReadyToSwitchOn.next_command().bits(), 0x07);
        assert_eq!(DriveState::SwitchedOn.next_command().bits(), 0x0F);
    }

    #[test]
    fn fault_holds_measured_position() {
        let mut controller = DriveController::new(OperationMode::Csp);
        let inputs = InputPdo {
            status_word: 0x0008,
            position_actual: 54_321,
            ..Default::default()
        };
        let mut outputs = OutputPdo::default();

        let update = controller.cycle(&inputs, &mut outputs);
        assert_eq!(update.state, DriveState::Fault);
        assert_eq!(outputs.control_word, 0x80);
        assert_eq!(outputs.target_position, 54_321);
    }

    #[test]
    fn operational_edge_fires_once() {
        let mut controller = DriveController::new(OperationMode::Csp);
        let inputs = InputPdo {
            status_word: 0x0237,
            position_actual: 100,
            ..Default::default()
        };
        let mut outputs = OutputPdo::default();

        let first = controller.cycle(&inputs, &mut outputs);
        assert!(first.became_operational);
        assert_eq!(outputs.target_position, 100);

        let second = controller.cycle(&inputs, &mut outputs);
        assert!(!second.became_operational);
        assert!(controller.is_operational());
    }

    #[test]
    fn csp_toggles_the_setpoint_latch() {
        let mut controller = DriveController::new(OperationMode::Csp);
        let inputs = InputPdo {
            status_word: 0x0237,
            ..Default::default()
        };
        let mut outputs = OutputPdo::default();

        controller.cycle(&inputs, &mut outputs);
        let first = outputs.control_word & 0x10;
        controller.cycle(&inputs, &mut outputs);
        let second = outputs.control_word & 0x10;
        assert_ne!(first, second);
    }

    #[test]
    fn csv_never_toggles_the_latch() {
        let mut controller = DriveController::new(OperationMode::Csv);
        let inputs = InputPdo {
            status_word: 0x0237,
            ..Default::default()
        };
        let mut outputs = OutputPdo::default();

        for _ in 0..4 {
            controller.cycle(&inputs, &mut outputs);
            assert_eq!(outputs.control_word, 0x0F);
        }
    }

    #[test]
    fn bring_up_sequence_from_switch_on_disabled() {
        let mut controller = DriveController::new(OperationMode::Csp);
        let mut outputs = OutputPdo::default();

        let steps = [
            (0x0040u16, 0x06u16),
            (0x0221, 0x07),
            (0x0233, 0x0F),
        ];
        for (status, expected_cw) in steps {
            let inputs = InputPdo {
                status_word: status,
                ..Default::default()
            };
            controller.cycle(&inputs, &mut outputs);
            assert_eq!(outputs.control_word, expected_cw);
        }
    }
}
