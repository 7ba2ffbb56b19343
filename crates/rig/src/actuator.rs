//! The actuator (slave) node: turns the last received bus command into a
//! continuous train of step pulses.
//!
//! There is no state machine here beyond the current commanded mode, and no
//! stall or endstop detection; the controller is the only safety authority.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use common::config::{MotionConfig, RetractMode};
use common::hal::{StepDirection, StepperDriver, Timing};
use common::ActuatorCommand;

use crate::bus::CommandLatch;

/// One node instance. `service` performs exactly one poll-loop iteration,
/// which keeps the motion rules unit-testable without a thread.
pub struct ActuatorNode<S, T> {
    config: MotionConfig,
    stepper: S,
    timing: T,
    steps_taken: u64,
}

impl<S: StepperDriver, T: Timing> ActuatorNode<S, T> {
    pub fn new(config: MotionConfig, stepper: S, timing: T) -> Self {
        Self {
            config,
            stepper,
            timing,
            steps_taken: 0,
        }
    }

    /// Apply the commanded mode once. Level-triggered: Stop idles, Extend and
    /// Retract emit one pulse with their direction-specific delay. Called
    /// every iteration until the command is superseded.
    pub fn service(&mut self, cmd: ActuatorCommand) {
        match cmd {
            ActuatorCommand::Stop => {
                self.timing.delay_us(self.config.idle_delay_us);
            }
            ActuatorCommand::Extend => {
                self.stepper.set_direction(StepDirection::Forward);
                self.stepper.step_pulse();
                self.steps_taken = self.steps_taken.saturating_add(1);
                self.timing.delay_us(self.config.extend_step_delay_us);
            }
            ActuatorCommand::Retract => {
                if self.config.retract_mode == RetractMode::RewindTaken && self.steps_taken == 0 {
                    // Rewound all the way; behave as stopped until recommanded.
                    self.timing.delay_us(self.config.idle_delay_us);
                    return;
                }
                self.stepper.set_direction(StepDirection::Reverse);
                self.stepper.step_pulse();
                if self.config.retract_mode == RetractMode::RewindTaken {
                    self.steps_taken -= 1;
                }
                self.timing.delay_us(self.config.retract_step_delay_us);
            }
        }
    }

    pub fn steps_taken(&self) -> u64 {
        self.steps_taken
    }

    pub fn stepper(&self) -> &S {
        &self.stepper
    }
}

/// The node's poll loop, run on its own thread by the orchestrator. Polls
/// the latch each iteration so the current command is re-applied until a new
/// byte arrives.
pub fn run_actuator<S, T>(
    config: MotionConfig,
    stepper: S,
    timing: T,
    latch: Arc<CommandLatch>,
    shutdown: Arc<AtomicBool>,
) where
    S: StepperDriver,
    T: Timing,
{
    let mut node = ActuatorNode::new(config, stepper, timing);
    while !shutdown.load(Ordering::Relaxed) {
        node.service(latch.current());
    }
}
