//! Hardware capability traits consumed by the core.
//!
//! The control logic never touches pins directly; these traits are the seam
//! between it and whatever provides the hardware (GPIO adapters on the real
//! boards, `rig::sim` on a host).

use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// The ranging pulse was never echoed within the HAL's timeout.
    EchoTimeout,
    /// The ADC had no conversion ready.
    NotReady,
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorError::EchoTimeout => write!(f, "no echo within the ranging timeout"),
            SensorError::NotReady => write!(f, "sensor had no sample ready"),
        }
    }
}

impl Error for SensorError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDirection {
    Forward,
    Reverse,
}

/// Ultrasonic ranging: trigger a pulse, block until the echo returns.
///
/// Blocks the calling loop for the round-trip time, bounded by a timeout the
/// implementation owns.
pub trait DistanceSensor {
    fn echo_round_trip_us(&mut self) -> Result<u32, SensorError>;
}

/// Load-cell ADC. Readings are raw (untared) averaged counts.
pub trait LoadCell {
    fn read_average(&mut self, samples: u32) -> Result<f64, SensorError>;
}

/// Raw electrical level of the start/abort button. Polarity is applied by
/// the caller from config; every board revision wires it active-low.
pub trait ButtonInput {
    fn level_is_low(&mut self) -> bool;
}

/// Step/direction stepper interface. One `step_pulse` is one motor step;
/// pulse width is the implementation's business.
pub trait StepperDriver {
    fn set_direction(&mut self, dir: StepDirection);
    fn step_pulse(&mut self);
}

/// Blocking time primitives. Busy-wait delays are the only timing mechanism
/// in the system; there is deliberately no scheduler behind this.
pub trait Timing {
    fn delay_us(&mut self, us: u64);
    fn elapsed_ms(&self) -> u64;
}
