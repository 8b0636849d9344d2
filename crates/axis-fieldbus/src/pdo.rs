//! Cyclic process-data layouts for the CiA 402 drive.
//!
//! Both directions are tightly packed little-endian; the byte offsets below
//! are the wire contract, so encoding is explicit rather than relying on
//! `repr(packed)` structs.

/// Size of the master-to-slave process image in bytes.
pub const OUTPUT_PDO_LEN: usize = 21;

/// Size of the slave-to-master process image in bytes.
pub const INPUT_PDO_LEN: usize = 23;

/// Master-to-slave cyclic data (RxPDO from the drive's point of view).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputPdo {
    /// CiA 402 control word (0x6040).
    pub control_word: u16,
    /// Target position in counts (0x607A), consumed in CSP.
    pub target_position: i32,
    /// Target velocity in counts/s (0x60FF), consumed in CSV.
    pub target_velocity: i32,
    /// Target torque (0x6071), unused by this controller but mapped.
    pub target_torque: i16,
    /// Mode of operation (0x6060): 8 = CSP, 9 = CSV.
    pub mode_of_operation: i8,
    /// Velocity offset (0x60B1).
    pub velocity_offset: i32,
}

impl OutputPdo {
    /// Serialize into the mapped output region.
    pub fn encode(&self, buf: &mut [u8; OUTPUT_PDO_LEN]) {
        buf[0..2].copy_from_slice(&self.control_word.to_le_bytes());
        buf[2..6].copy_from_slice(&self.target_position.to_le_bytes());
        buf[6..10].copy_from_slice(&self.target_velocity.to_le_bytes());
        buf[10..12].copy_from_slice(&self.target_torque.to_le_bytes());
        buf[12] = self.mode_of_operation as u8;
        buf[13..17].copy_from_slice(&self.velocity_offset.to_le_bytes());
        // Bytes 17..21 are mapped padding entries; always zero.
        buf[17..21].fill(0);
    }

    /// Deserialize from a mapped output region.
    #[must_use]
    pub fn decode(buf: &[u8; OUTPUT_PDO_LEN]) -> Self {
        Self {
            control_word: u16::from_le_bytes([buf[0], buf[1]]),
            target_position: i32::from_le_bytes([buf[2], buf[3], buf[4], buf[5]]),
            target_velocity: i32::from_le_bytes([buf[6], buf[7], buf[8], buf[9]]),
            target_torque: i16::from_le_bytes([buf[10], buf[11]]),
            mode_of_operation: buf[12] as i8,
            velocity_offset: i32::from_le_bytes([buf[13], buf[14], buf[15], buf[16]]),
        }
    }
}

/// Slave-to-master cyclic data (TxPDO from the drive's point of view).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputPdo {
    /// CiA 402 status word (0x6041).
    pub status_word: u16,
    /// Measured position in counts (0x6064).
    pub position_actual: i32,
    /// Measured velocity in counts/s (0x606C).
    pub velocity_actual: i32,
    /// Measured torque (0x6077).
    pub torque_actual: i16,
    /// Position following error (0x60F4).
    pub following_error: i32,
    /// Mode the drive is actually running (0x6061).
    pub mode_of_operation_display: i8,
    /// Touch probe status (0x60B9).
    pub touch_probe_status: u16,
    /// Touch probe position 1 latch (0x60BA).
    pub touch_probe_pos1: i32,
}

impl InputPdo {
    /// Serialize into an input region; only the simulated drive writes this
    /// direction.
    pub fn encode(&self, buf: &mut [u8; INPUT_PDO_LEN]) {
        buf[0..2].copy_from_slice(&self.status_word.to_le_bytes());
        buf[2..6].copy_from_slice(&self.position_actual.to_le_bytes());
        buf[6..10].copy_from_slice(&self.velocity_actual.to_le_bytes());
        buf[10..12].copy_from_slice(&self.torque_actual.to_le_bytes());
        buf[12..16].copy_from_slice(&self.following_error.to_le_bytes());
        buf[16] = self.mode_of_operation_display as u8;
        buf[17..19].copy_from_slice(&self.touch_probe_status.to_le_bytes());
        buf[19..23].copy_from_slice(&self.touch_probe_pos1.to_le_bytes());
    }

    /// Deserialize from the mapped input region.
    #[must_use]
    pub fn decode(buf: &[u8; INPUT_PDO_LEN]) -> Self {
        Self {
            status_word: u16::from_le_bytes([buf[0], buf[1]]),
            position_actual: i32::from_le_bytes([buf[2], buf[3], buf[4], buf[5]]),
            velocity_actual: i32::from_le_bytes([buf[6], buf[7], buf[8], buf[9]]),
            torque_actual: i16::from_le_bytes([buf[10], buf[11]]),
            following_error: i32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
            mode_of_operation_display: buf[16] as i8,
            touch_probe_status: u16::from_le_bytes([buf[17], buf[18]]),
            touch_probe_pos1: i32::from_le_bytes([buf[19], buf[20], buf[21], buf[22]]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_round_trip() {
        let pdo = OutputPdo {
            control_word: 0x001F,
            target_position: -12_345_678,
            target_velocity: 987_654,
            target_torque: -321,
            mode_of_operation: 8,
            velocity_offset: 42,
        };

        let mut buf = [0u8; OUTPUT_PDO_LEN];
        pdo.encode(&mut buf);
        assert_eq!(OutputPdo::decode(&buf), pdo);
    }

    #[test]
    fn input_round_trip() {
        let pdo = InputPdo {
            status_word: 0x0637,
            position_actual: 2_097_152,
            velocity_actual: -1_048_576,
            torque_actual: 77,
            following_error: -3,
            mode_of_operation_display: 9,
            touch_probe_status: 0x0101,
            touch_probe_pos1: 555_555,
        };

        let mut buf = [0u8; INPUT_PDO_LEN];
        pdo.encode(&mut buf);
        assert_eq!(InputPdo::decode(&buf), pdo);
    }

    #[test]
    fn output_layout_is_little_endian() {
        let pdo = OutputPdo {
            control_word: 0x8070,
            target_position: 0x0403_0201,
            mode_of_operation: 9,
            ..Default::default()
        };

        let mut buf = [0u8; OUTPUT_PDO_LEN];
        pdo.encode(&mut buf);

        assert_eq!(&buf[0..2], &[0x70, 0x80]);
        assert_eq!(&buf[2..6], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(buf[12], 9);
    }

    #[test]
    fn input_layout_field_offsets() {
        let pdo = InputPdo {
            status_word: 0x1234,
            touch_probe_status: 0xAABB,
            touch_probe_pos1: 0x0102_0304,
            ..Default::default()
        };

        let mut buf = [0u8; INPUT_PDO_LEN];
        pdo.encode(&mut buf);

        assert_eq!(&buf[0..2], &[0x34, 0x12]);
        assert_eq!(&buf[17..19], &[0xBB, 0xAA]);
        assert_eq!(&buf[19..23], &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn negative_mode_survives() {
        let pdo = OutputPdo {
            mode_of_operation: -1,
            ..Default::default()
        };
        let mut buf = [0u8; OUTPUT_PDO_LEN];
        pdo.encode(&mut buf);
        assert_eq!(OutputPdo::decode(&buf).mode_of_operation, -1);
    }
}
