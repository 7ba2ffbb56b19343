//! The test controller node: calibrated start, rise/come-down sequencing,
//! stopping conditions, and the characterisation logging mode.

use common::config::{ButtonConfig, RigConfig};
use common::hal::{ButtonInput, DistanceSensor, LoadCell, Timing};
use common::sampler::{self, CalibrationBaseline};
use common::{ActuatorCommand, SharedDiagnostics, TelemetryRecorder, TestRecord, TraceRecord};

use crate::bus::{BusError, CommandBus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestState {
    Idle,
    Rising,
    /// Pass-through: the come-down sequence sends Stop then Retract within
    /// one step. Only observable if the Retract send fails midway, in which
    /// case the next step retries it.
    Holding,
    Lowering,
    Done,
}

/// How a finished test ended. A user abort during lowering is reported
/// distinctly from a normal descent back to the baseline length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestOutcome {
    Completed,
    AbortedByUser,
}

/// Sensor fusion for one control-loop iteration, already debounced and
/// converted to physical units.
#[derive(Debug, Clone, Copy)]
pub struct StepInput {
    pub strain: f64,
    pub force: f64,
    /// Debounced press edge this iteration.
    pub button_pressed: bool,
}

/// The test-sequencing state machine. Owns no hardware: inputs come in as
/// `StepInput`, actuation goes out over the command bus. State only moves
/// forward within a run; `Done` is terminal.
pub struct TestController {
    strain_ceiling: f64,
    force_ceiling: f64,
    auto_start: bool,
    state: TestState,
    outcome: Option<TestOutcome>,
}

impl TestController {
    pub fn new(strain_ceiling: f64, force_ceiling: f64, auto_start: bool) -> Self {
        Self {
            strain_ceiling,
            force_ceiling,
            auto_start,
            state: TestState::Idle,
            outcome: None,
        }
    }

    pub fn from_config(config: &RigConfig) -> Self {
        Self::new(
            config.test.strain_ceiling,
            config.test.force_ceiling,
            !config.button.enabled,
        )
    }

    pub fn state(&self) -> TestState {
        self.state
    }

    pub fn outcome(&self) -> Option<TestOutcome> {
        self.outcome
    }

    pub fn is_done(&self) -> bool {
        self.state == TestState::Done
    }

    /// Advance the machine by one iteration. Returns the outcome once the
    /// test reaches `Done`. Commands are sent before the state advances, so
    /// a failed send leaves the machine where it was and the next step
    /// retries.
    pub fn step<B: CommandBus>(
        &mut self,
        input: StepInput,
        bus: &mut B,
    ) -> Result<Option<TestOutcome>, BusError> {
        match self.state {
            TestState::Idle => {
                if self.auto_start || input.button_pressed {
                    bus.send(ActuatorCommand::Extend)?;
                    self.state = TestState::Rising;
                }
            }
            TestState::Rising => {
                let tripped = input.strain >= self.strain_ceiling
                    || input.force >= self.force_ceiling
                    || input.button_pressed;
                if tripped {
                    // Come-down sequence.
                    bus.send(ActuatorCommand::Stop)?;
                    self.state = TestState::Holding;
                    bus.send(ActuatorCommand::Retract)?;
                    self.state = TestState::Lowering;
                }
            }
            TestState::Holding => {
                bus.send(ActuatorCommand::Retract)?;
                self.state = TestState::Lowering;
            }
            TestState::Lowering => {
                if input.button_pressed {
                    bus.send(ActuatorCommand::Stop)?;
                    self.state = TestState::Done;
                    self.outcome = Some(TestOutcome::AbortedByUser);
                } else if input.strain <= 0.0 {
                    bus.send(ActuatorCommand::Stop)?;
                    self.state = TestState::Done;
                    self.outcome = Some(TestOutcome::Completed);
                }
            }
            TestState::Done => {}
        }
        Ok(if self.state == TestState::Done {
            self.outcome
        } else {
            None
        })
    }
}

/// Minimum-stable-duration button filter. The board revisions have no
/// hardware debouncing and the original firmware had none in software; a
/// bouncing contact mid-test would otherwise abort the run.
pub struct Debouncer {
    stable_ms: u64,
    raw: bool,
    stable: bool,
    last_change_ms: u64,
}

impl Debouncer {
    pub fn new(stable_ms: u64) -> Self {
        Self {
            stable_ms,
            raw: false,
            stable: false,
            last_change_ms: 0,
        }
    }

    /// Feed one raw sample. Returns true exactly once per press, after the
    /// level has held for the stable window.
    pub fn update(&mut self, pressed_raw: bool, now_ms: u64) -> bool {
        if pressed_raw != self.raw {
            self.raw = pressed_raw;
            self.last_change_ms = now_ms;
        }
        if self.raw != self.stable && now_ms.saturating_sub(self.last_change_ms) >= self.stable_ms {
            self.stable = self.raw;
            return self.stable;
        }
        false
    }

    pub fn is_pressed(&self) -> bool {
        self.stable
    }
}

fn pressed_level<Btn: ButtonInput>(button: &mut Btn, cfg: &ButtonConfig) -> bool {
    let low = button.level_is_low();
    if cfg.active_low {
        low
    } else {
        !low
    }
}

fn log_tag(elapsed_ms: u64, tag: &str, msg: &str) {
    println!(
        "[{:>8}] [{}] {}",
        format!("{:.3}s", elapsed_ms as f64 / 1000.0),
        tag,
        msg
    );
}

/// The primary control loop: sample both sensors, log a telemetry line,
/// step the state machine, repeat until the test is done.
///
/// A ranging timeout skips the iteration and retries on the next cycle. The
/// abort path races the blocking sensor reads, so worst-case abort latency
/// is one full sampling iteration plus one bus send.
#[allow(clippy::too_many_arguments)]
pub fn run_threshold_test<D, L, Btn, T, B>(
    config: &RigConfig,
    baseline: &CalibrationBaseline,
    distance: &mut D,
    loadcell: &mut L,
    button: &mut Btn,
    timing: &mut T,
    bus: &mut B,
    recorder: &TelemetryRecorder<TestRecord>,
    diagnostics: &SharedDiagnostics,
) -> Result<TestOutcome, BusError>
where
    D: DistanceSensor,
    L: LoadCell,
    Btn: ButtonInput,
    T: Timing,
    B: CommandBus,
{
    let mut controller = TestController::from_config(config);
    let mut debouncer = Debouncer::new(config.button.debounce_ms);
    let mut seq = 0u64;
    let mut pending_press = false;

    let outcome = loop {
        let now_ms = timing.elapsed_ms();
        // A press edge fires only once; latch it so a press landing on a
        // skipped iteration still reaches the state machine.
        if config.button.enabled
            && debouncer.update(pressed_level(button, &config.button), now_ms)
        {
            pending_press = true;
        }

        let strain = match sampler::measure_distance(distance, config.sensing.speed_of_sound_mm_per_us)
        {
            Ok(d) => baseline.strain(d),
            Err(_) => {
                diagnostics.record_sensor_timeout();
                continue;
            }
        };
        let force = match baseline.net_force(loadcell, config.sensing.live_force_samples) {
            Ok(f) => f,
            Err(_) => {
                diagnostics.record_sensor_timeout();
                continue;
            }
        };

        let active = matches!(
            controller.state(),
            TestState::Rising | TestState::Holding | TestState::Lowering
        );
        if active {
            let record = TestRecord {
                seq,
                elapsed_ms: now_ms,
                strain,
                force,
            };
            if config.enable_logging {
                println!("{}", record.serial_line());
            }
            recorder.record(record);
            seq += 1;

            if pending_press {
                diagnostics.record_user_abort();
            }
        }

        let before = controller.state();
        let done = controller.step(
            StepInput {
                strain,
                force,
                button_pressed: pending_press,
            },
            bus,
        )?;
        pending_press = false;

        if config.enable_logging && controller.state() != before {
            log_tag(
                now_ms,
                "TEST",
                &format!(
                    "{:?} -> {:?} (strain {:.3}, force {:.1})",
                    before,
                    controller.state(),
                    strain,
                    force
                ),
            );
        }

        if let Some(outcome) = done {
            break outcome;
        }
    };

    if config.enable_logging {
        match outcome {
            TestOutcome::Completed => {
                log_tag(timing.elapsed_ms(), "TEST", "sample went back down, test complete")
            }
            TestOutcome::AbortedByUser => {
                log_tag(timing.elapsed_ms(), "ABORT", "descent interrupted by button")
            }
        }
    }

    Ok(outcome)
}

/// The alternate controller mode: no thresholds, just (distance, elapsed)
/// pairs at a fixed cadence while the actuator extends. Ends on a second
/// button press or the configured duration cap, whichever comes first.
pub fn run_characterisation<D, Btn, T, B>(
    config: &RigConfig,
    distance: &mut D,
    button: &mut Btn,
    timing: &mut T,
    bus: &mut B,
    recorder: &TelemetryRecorder<TraceRecord>,
    diagnostics: &SharedDiagnostics,
) -> Result<(), BusError>
where
    D: DistanceSensor,
    Btn: ButtonInput,
    T: Timing,
    B: CommandBus,
{
    let mut debouncer = Debouncer::new(config.button.debounce_ms);

    if config.button.enabled {
        loop {
            let now_ms = timing.elapsed_ms();
            if debouncer.update(pressed_level(button, &config.button), now_ms) {
                break;
            }
            timing.delay_us(1_000);
        }
    }

    bus.send(ActuatorCommand::Extend)?;
    if config.enable_logging {
        log_tag(timing.elapsed_ms(), "RUN", "characterisation started, extending");
    }

    let start_ms = timing.elapsed_ms();
    let mut next_sample_ms = start_ms;
    let mut seq = 0u64;

    loop {
        let now_ms = timing.elapsed_ms();
        if now_ms.saturating_sub(start_ms) >= config.characterisation.max_duration_ms {
            break;
        }
        if config.button.enabled && debouncer.update(pressed_level(button, &config.button), now_ms)
        {
            diagnostics.record_user_abort();
            break;
        }

        if now_ms >= next_sample_ms {
            match sampler::measure_distance(distance, config.sensing.speed_of_sound_mm_per_us) {
                Ok(d) => {
                    let record = TraceRecord {
                        seq,
                        elapsed_ms: now_ms,
                        distance_mm: d,
                    };
                    if config.enable_logging {
                        println!("{}", record.serial_line());
                    }
                    recorder.record(record);
                    seq += 1;
                }
                Err(_) => diagnostics.record_sensor_timeout(),
            }
            next_sample_ms += config.characterisation.sample_period_ms;
        }

        timing.delay_us(1_000);
    }

    bus.send(ActuatorCommand::Stop)?;
    if config.enable_logging {
        log_tag(timing.elapsed_ms(), "RUN", "characterisation finished");
    }
    Ok(())
}
