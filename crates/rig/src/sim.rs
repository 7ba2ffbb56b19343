//! Simulated hardware: a little spring-and-crosshead world the stepper
//! moves and the sensors observe, plus scripted fakes for deterministic
//! tests and benchmarks.
//!
//! Time is virtual. Sensor reads advance a shared microsecond clock
//! directly; delays rendezvous, jumping time to the earliest pending
//! deadline once every clock handle is blocked in one. Full runs finish
//! instantly and neither node's loop can outrun the other's virtual time.

use std::sync::{Arc, Condvar, Mutex};

use common::hal::{
    ButtonInput, DistanceSensor, LoadCell, SensorError, StepDirection, StepperDriver, Timing,
};
use common::ActuatorCommand;

use crate::bus::{BusError, CommandBus};

struct ClockState {
    now_us: u64,
    parties: usize,
    waiting: Vec<u64>,
}

struct ClockInner {
    state: Mutex<ClockState>,
    wake: Condvar,
}

/// Non-participating clock handle held by the sim peripherals: reads and
/// direct advances only, never part of a rendezvous.
#[derive(Clone)]
struct ClockRef {
    inner: Arc<ClockInner>,
}

impl ClockRef {
    fn new() -> Self {
        Self {
            inner: Arc::new(ClockInner {
                state: Mutex::new(ClockState {
                    now_us: 0,
                    parties: 0,
                    waiting: Vec::new(),
                }),
                wake: Condvar::new(),
            }),
        }
    }

    fn now_ms(&self) -> u64 {
        self.inner.state.lock().unwrap().now_us / 1_000
    }

    fn advance_us(&self, us: u64) {
        let mut state = self.inner.state.lock().unwrap();
        state.now_us += us;
        drop(state);
        self.inner.wake.notify_all();
    }
}

/// Once every participant is blocked in a delay, jump to the earliest
/// pending deadline.
fn advance_if_rendezvous(state: &mut ClockState) {
    if !state.waiting.is_empty() && state.waiting.len() >= state.parties {
        if let Some(&soonest) = state.waiting.iter().min() {
            if soonest > state.now_us {
                state.now_us = soonest;
            }
        }
    }
}

/// Virtual microsecond clock shared by every sim peripheral.
///
/// Each `SimClock` handle (one per node loop) is a rendezvous participant:
/// `delay_us` blocks until sensor reads push time past its deadline, or
/// until every participant is blocked in a delay, at which point time jumps
/// to the earliest deadline. One node's virtual time therefore cannot race
/// ahead of the other's.
pub struct SimClock {
    shared: ClockRef,
}

impl SimClock {
    fn register(shared: ClockRef) -> Self {
        shared.inner.state.lock().unwrap().parties += 1;
        Self { shared }
    }

    pub fn now_ms(&self) -> u64 {
        self.shared.now_ms()
    }
}

impl Clone for SimClock {
    fn clone(&self) -> Self {
        Self::register(self.shared.clone())
    }
}

impl Drop for SimClock {
    fn drop(&mut self) {
        let mut state = self.shared.inner.state.lock().unwrap();
        state.parties -= 1;
        advance_if_rendezvous(&mut state);
        drop(state);
        self.shared.inner.wake.notify_all();
    }
}

impl Timing for SimClock {
    fn delay_us(&mut self, us: u64) {
        let inner = &self.shared.inner;
        let mut state = inner.state.lock().unwrap();
        let deadline = state.now_us + us;
        state.waiting.push(deadline);
        loop {
            let before = state.now_us;
            advance_if_rendezvous(&mut state);
            if state.now_us > before {
                inner.wake.notify_all();
            }
            if state.now_us >= deadline {
                break;
            }
            state = inner.wake.wait(state).unwrap();
        }
        if let Some(pos) = state.waiting.iter().position(|&d| d == deadline) {
            state.waiting.swap_remove(pos);
        }
        drop(state);
        inner.wake.notify_all();
    }

    fn elapsed_ms(&self) -> u64 {
        self.now_ms()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SimParams {
    /// Unstrained sample length the ranging sensor sees at rest.
    pub rest_length_mm: f64,
    /// Crosshead travel per step pulse.
    pub step_mm: f64,
    /// Spring constant turning extension into load-cell force.
    pub stiffness_n_per_mm: f64,
    /// The probe cannot move closer than this below the rest length.
    pub min_extension_mm: f64,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            rest_length_mm: 100.0,
            step_mm: 0.5,
            stiffness_n_per_mm: 0.4,
            min_extension_mm: -5.0,
        }
    }
}

struct WorldInner {
    params: SimParams,
    extension_mm: f64,
    forward_pulses: u64,
    reverse_pulses: u64,
}

/// The shared physical state. The sim stepper mutates it from the actuator
/// thread; the sim sensors read it from the controller loop.
#[derive(Clone)]
pub struct SimWorld {
    inner: Arc<Mutex<WorldInner>>,
    clock: ClockRef,
}

#[derive(Debug, Clone, Copy)]
pub struct WorldSnapshot {
    pub extension_mm: f64,
    pub forward_pulses: u64,
    pub reverse_pulses: u64,
}

impl SimWorld {
    pub fn new(params: SimParams) -> Self {
        Self {
            inner: Arc::new(Mutex::new(WorldInner {
                params,
                extension_mm: 0.0,
                forward_pulses: 0,
                reverse_pulses: 0,
            })),
            clock: ClockRef::new(),
        }
    }

    /// A rendezvous-participating clock handle for one node loop.
    pub fn clock(&self) -> SimClock {
        SimClock::register(self.clock.clone())
    }

    pub fn snapshot(&self) -> WorldSnapshot {
        let inner = self.inner.lock().unwrap();
        WorldSnapshot {
            extension_mm: inner.extension_mm,
            forward_pulses: inner.forward_pulses,
            reverse_pulses: inner.reverse_pulses,
        }
    }

    pub fn distance_sensor(&self) -> SimDistanceSensor {
        SimDistanceSensor {
            world: Arc::clone(&self.inner),
            clock: self.clock.clone(),
            speed_mm_per_us: 0.34,
        }
    }

    pub fn loadcell(&self) -> SimLoadCell {
        SimLoadCell {
            world: Arc::clone(&self.inner),
            clock: self.clock.clone(),
        }
    }

    pub fn stepper(&self) -> SimStepper {
        SimStepper {
            world: Arc::clone(&self.inner),
            direction: StepDirection::Forward,
        }
    }

    /// Button held (electrically low) during the given millisecond windows
    /// of virtual time.
    pub fn button(&self, held_windows_ms: Vec<(u64, u64)>) -> SimButton {
        SimButton {
            clock: self.clock.clone(),
            held_windows_ms,
        }
    }

    /// A scripted operator: holds the button for the first `start_hold_ms`
    /// of the run to start the test, then presses again the moment the
    /// crosshead travels past `abort_above_mm`.
    ///
    /// Because the virtual clock is advanced by the step delays themselves,
    /// the crosshead cannot outrun the start hold: extension is bounded by
    /// `step_mm` per `extend_step_delay_us` of virtual time.
    pub fn operator(&self, start_hold_ms: u64, abort_above_mm: f64) -> SimOperator {
        SimOperator {
            clock: self.clock.clone(),
            world: Arc::clone(&self.inner),
            start_hold_ms,
            abort_above_mm,
        }
    }
}

pub struct SimOperator {
    clock: ClockRef,
    world: Arc<Mutex<WorldInner>>,
    start_hold_ms: u64,
    abort_above_mm: f64,
}

impl ButtonInput for SimOperator {
    fn level_is_low(&mut self) -> bool {
        if self.clock.now_ms() < self.start_hold_ms {
            return true;
        }
        self.world.lock().unwrap().extension_mm >= self.abort_above_mm
    }
}

/// Ranging against the simulated crosshead. Blocks (virtually) for the
/// round-trip time like `pulseIn` does on the real board, which is what
/// advances the controller loop's clock between iterations.
pub struct SimDistanceSensor {
    world: Arc<Mutex<WorldInner>>,
    clock: ClockRef,
    speed_mm_per_us: f64,
}

impl DistanceSensor for SimDistanceSensor {
    fn echo_round_trip_us(&mut self) -> Result<u32, SensorError> {
        let distance_mm = {
            let inner = self.world.lock().unwrap();
            inner.params.rest_length_mm + inner.extension_mm
        };
        let duration = (distance_mm * 2.0 / self.speed_mm_per_us).round() as u64;
        // Trigger setup plus the echo itself.
        self.clock.advance_us(12 + duration);
        Ok(duration as u32)
    }
}

/// Load cell reading the spring force. Each averaged sample costs ADC time.
pub struct SimLoadCell {
    world: Arc<Mutex<WorldInner>>,
    clock: ClockRef,
}

impl LoadCell for SimLoadCell {
    fn read_average(&mut self, samples: u32) -> Result<f64, SensorError> {
        let force = {
            let inner = self.world.lock().unwrap();
            inner.params.stiffness_n_per_mm * inner.extension_mm.max(0.0)
        };
        self.clock.advance_us(samples as u64 * 1_200);
        Ok(force)
    }
}

pub struct SimStepper {
    world: Arc<Mutex<WorldInner>>,
    direction: StepDirection,
}

impl StepperDriver for SimStepper {
    fn set_direction(&mut self, dir: StepDirection) {
        self.direction = dir;
    }

    fn step_pulse(&mut self) {
        let mut inner = self.world.lock().unwrap();
        match self.direction {
            StepDirection::Forward => {
                inner.extension_mm += inner.params.step_mm;
                inner.forward_pulses += 1;
            }
            StepDirection::Reverse => {
                let min = inner.params.min_extension_mm;
                inner.extension_mm = (inner.extension_mm - inner.params.step_mm).max(min);
                inner.reverse_pulses += 1;
            }
        }
    }
}

pub struct SimButton {
    clock: ClockRef,
    held_windows_ms: Vec<(u64, u64)>,
}

impl ButtonInput for SimButton {
    fn level_is_low(&mut self) -> bool {
        let now = self.clock.now_ms();
        self.held_windows_ms
            .iter()
            .any(|&(from, to)| now >= from && now < to)
    }
}

/// Deterministic ranging script for unit tests: plays the given results in
/// order, then repeats the last one forever.
pub struct ScriptedDistanceSensor {
    script: Vec<Result<u32, SensorError>>,
    next: usize,
}

impl ScriptedDistanceSensor {
    pub fn new(script: Vec<Result<u32, SensorError>>) -> Self {
        Self { script, next: 0 }
    }
}

impl DistanceSensor for ScriptedDistanceSensor {
    fn echo_round_trip_us(&mut self) -> Result<u32, SensorError> {
        let idx = self.next.min(self.script.len().saturating_sub(1));
        if self.next < self.script.len() {
            self.next += 1;
        }
        self.script.get(idx).copied().unwrap_or(Err(SensorError::NotReady))
    }
}

/// Constant-output load cell for unit tests.
pub struct ScriptedLoadCell {
    pub raw: f64,
}

impl LoadCell for ScriptedLoadCell {
    fn read_average(&mut self, _samples: u32) -> Result<f64, SensorError> {
        Ok(self.raw)
    }
}

/// A button that is never pressed.
pub struct NullButton;

impl ButtonInput for NullButton {
    fn level_is_low(&mut self) -> bool {
        false
    }
}

/// Button double that replays a fixed sequence of raw levels, one per poll,
/// holding the final level afterwards.
pub struct ScriptedButton {
    levels: Vec<bool>,
    next: usize,
}

impl ScriptedButton {
    pub fn new(levels: Vec<bool>) -> Self {
        Self { levels, next: 0 }
    }
}

impl ButtonInput for ScriptedButton {
    fn level_is_low(&mut self) -> bool {
        let idx = self.next.min(self.levels.len().saturating_sub(1));
        if self.next < self.levels.len() {
            self.next += 1;
        }
        self.levels.get(idx).copied().unwrap_or(false)
    }
}

/// Single-threaded test clock: every `elapsed_ms` read advances time by one
/// fixed tick, so a control loop sees one tick per iteration regardless of
/// how fast the test machine runs.
pub struct TickingClock {
    now_ms: std::cell::Cell<u64>,
    tick_ms: u64,
}

impl TickingClock {
    pub fn new(tick_ms: u64) -> Self {
        Self {
            now_ms: std::cell::Cell::new(0),
            tick_ms,
        }
    }
}

impl Timing for TickingClock {
    fn delay_us(&mut self, us: u64) {
        self.now_ms.set(self.now_ms.get() + us / 1_000);
    }

    fn elapsed_ms(&self) -> u64 {
        let t = self.now_ms.get() + self.tick_ms;
        self.now_ms.set(t);
        t
    }
}

/// Bus double that records every command it is asked to transmit.
#[derive(Default)]
pub struct RecordingBus {
    pub sent: Vec<ActuatorCommand>,
}

impl CommandBus for RecordingBus {
    fn send(&mut self, cmd: ActuatorCommand) -> Result<(), BusError> {
        self.sent.push(cmd);
        Ok(())
    }
}
