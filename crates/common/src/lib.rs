use serde::{Deserialize, Serialize};

pub mod config;
pub mod diagnostics;
pub mod hal;
pub mod sampler;
pub mod telemetry;

pub use config::RigConfig;
pub use diagnostics::SharedDiagnostics;
pub use sampler::CalibrationBaseline;
pub use telemetry::TelemetryRecorder;

/// Single-byte command sent from the test controller to the actuator node.
///
/// The wire encoding is the opcode byte alone: no framing, no checksum,
/// no acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActuatorCommand {
    Stop,
    Extend,
    Retract,
}

impl ActuatorCommand {
    pub fn opcode(self) -> u8 {
        match self {
            ActuatorCommand::Stop => 0,
            ActuatorCommand::Extend => 1,
            ActuatorCommand::Retract => 2,
        }
    }

    /// Decode a received byte. Anything outside {0, 1, 2} is invalid and
    /// must not be acted on; in particular it is not an implicit Stop.
    pub fn from_opcode(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(ActuatorCommand::Stop),
            1 => Some(ActuatorCommand::Extend),
            2 => Some(ActuatorCommand::Retract),
            _ => None,
        }
    }
}

/// One telemetry row of a threshold test: the serial stream pairs the
/// current strain with the current tared force.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TestRecord {
    pub seq: u64,
    pub elapsed_ms: u64,
    pub strain: f64,
    pub force: f64,
}

impl TestRecord {
    /// Line as emitted on the serial link: two floats, space separated,
    /// no header and no units.
    pub fn serial_line(&self) -> String {
        format!("{} {}", self.strain, self.force)
    }
}

/// One telemetry row of a characterisation run: distance against
/// milliseconds since boot, for velocity calibration on the host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TraceRecord {
    pub seq: u64,
    pub elapsed_ms: u64,
    pub distance_mm: f64,
}

impl TraceRecord {
    pub fn serial_line(&self) -> String {
        format!("{} {}", self.distance_mm, self.elapsed_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_roundtrip_for_valid_commands() {
        for cmd in [
            ActuatorCommand::Stop,
            ActuatorCommand::Extend,
            ActuatorCommand::Retract,
        ] {
            assert_eq!(ActuatorCommand::from_opcode(cmd.opcode()), Some(cmd));
        }
    }

    #[test]
    fn unknown_opcodes_do_not_decode() {
        for byte in [3u8, 7, 0xFF] {
            assert_eq!(ActuatorCommand::from_opcode(byte), None);
        }
    }

    #[test]
    fn serial_lines_are_two_bare_fields() {
        let rec = TestRecord {
            seq: 0,
            elapsed_ms: 12,
            strain: 0.25,
            force: 14.5,
        };
        assert_eq!(rec.serial_line(), "0.25 14.5");

        let trace = TraceRecord {
            seq: 0,
            elapsed_ms: 300,
            distance_mm: 104.5,
        };
        assert_eq!(trace.serial_line(), "104.5 300");
    }
}
