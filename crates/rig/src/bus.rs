//! Single-byte command channel between the controller and actuator nodes.
//!
//! Fire and forget: one unacknowledged opcode byte per transmission, fixed
//! peer address, no framing, no retry. The receiver holds exactly one
//! command; each delivery overwrites the previous one.

use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use common::{ActuatorCommand, SharedDiagnostics};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// Byte outside the opcode space {0, 1, 2}. The previous actuator mode
    /// is preserved.
    InvalidOpcode(u8),
    /// Transmission addressed to a node that is not on this bus.
    PeerMismatch { expected: u8, got: u8 },
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::InvalidOpcode(byte) => write!(f, "invalid command byte 0x{byte:02x}"),
            BusError::PeerMismatch { expected, got } => {
                write!(f, "addressed peer {got} but the actuator node is {expected}")
            }
        }
    }
}

impl Error for BusError {}

/// Sender side of the command channel.
pub trait CommandBus {
    fn send(&mut self, cmd: ActuatorCommand) -> Result<(), BusError>;
}

/// Receive side: the last delivered command, latest-value-wins.
///
/// `deliver` is the receive callback; on hardware it runs in interrupt
/// context, so it only validates and stores one scalar. The actuator's main
/// loop polls `current` every iteration and re-applies the mode, so a
/// command stays in force until superseded.
#[derive(Debug)]
pub struct CommandLatch {
    address: u8,
    opcode: AtomicU8,
    diagnostics: Arc<SharedDiagnostics>,
}

impl CommandLatch {
    /// A fresh node is stopped until told otherwise.
    pub fn new(address: u8, diagnostics: Arc<SharedDiagnostics>) -> Self {
        Self {
            address,
            opcode: AtomicU8::new(ActuatorCommand::Stop.opcode()),
            diagnostics,
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Receive one byte. Invalid bytes are counted and leave the latch
    /// untouched; they are never treated as Stop.
    pub fn deliver(&self, byte: u8) -> Result<(), BusError> {
        match ActuatorCommand::from_opcode(byte) {
            Some(cmd) => {
                self.opcode.store(cmd.opcode(), Ordering::Relaxed);
                Ok(())
            }
            None => {
                self.diagnostics.record_invalid_command();
                Err(BusError::InvalidOpcode(byte))
            }
        }
    }

    pub fn current(&self) -> ActuatorCommand {
        // Only validated opcodes are ever stored.
        ActuatorCommand::from_opcode(self.opcode.load(Ordering::Relaxed))
            .unwrap_or(ActuatorCommand::Stop)
    }
}

/// The controller's end of the wire: encodes a command and delivers it to
/// the latch at the configured peer address.
pub struct WireBus {
    peer_address: u8,
    latch: Arc<CommandLatch>,
}

impl WireBus {
    pub fn new(peer_address: u8, latch: Arc<CommandLatch>) -> Self {
        Self {
            peer_address,
            latch,
        }
    }
}

impl CommandBus for WireBus {
    fn send(&mut self, cmd: ActuatorCommand) -> Result<(), BusError> {
        if self.peer_address != self.latch.address() {
            return Err(BusError::PeerMismatch {
                expected: self.latch.address(),
                got: self.peer_address,
            });
        }
        self.latch.deliver(cmd.opcode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn latch() -> (Arc<SharedDiagnostics>, CommandLatch) {
        let diag = Arc::new(SharedDiagnostics::default());
        let latch = CommandLatch::new(9, Arc::clone(&diag));
        (diag, latch)
    }

    #[test]
    fn a_fresh_latch_reads_stop() {
        let (_, latch) = latch();
        assert_eq!(latch.current(), ActuatorCommand::Stop);
    }

    #[test]
    fn the_last_delivered_command_wins() {
        let (_, latch) = latch();
        latch.deliver(1).unwrap();
        latch.deliver(1).unwrap();
        latch.deliver(0).unwrap();
        latch.deliver(2).unwrap();
        assert_eq!(latch.current(), ActuatorCommand::Retract);
    }

    #[test]
    fn an_invalid_byte_preserves_the_previous_mode() {
        let (diag, latch) = latch();
        latch.deliver(1).unwrap();
        assert_eq!(latch.deliver(7), Err(BusError::InvalidOpcode(7)));
        assert_eq!(latch.current(), ActuatorCommand::Extend);
        assert_eq!(diag.snapshot().invalid_commands, 1);
    }

    #[test]
    fn stop_is_idempotent() {
        let (_, latch) = latch();
        latch.deliver(0).unwrap();
        let once = latch.current();
        latch.deliver(0).unwrap();
        assert_eq!(latch.current(), once);
    }

    #[test]
    fn wire_bus_rejects_a_wrong_peer_address() {
        let diag = Arc::new(SharedDiagnostics::default());
        let latch = Arc::new(CommandLatch::new(9, diag));
        let mut bus = WireBus::new(4, Arc::clone(&latch));
        assert_eq!(
            bus.send(ActuatorCommand::Extend),
            Err(BusError::PeerMismatch {
                expected: 9,
                got: 4
            })
        );
        // Nothing was delivered.
        assert_eq!(latch.current(), ActuatorCommand::Stop);
    }

    #[test]
    fn wire_bus_delivers_to_the_matching_peer() {
        let diag = Arc::new(SharedDiagnostics::default());
        let latch = Arc::new(CommandLatch::new(9, diag));
        let mut bus = WireBus::new(9, Arc::clone(&latch));
        bus.send(ActuatorCommand::Retract).unwrap();
        assert_eq!(latch.current(), ActuatorCommand::Retract);
    }
}
