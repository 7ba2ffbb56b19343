//! Two-node mini tensile rig: a test controller that owns the sensors and
//! the test sequence, and an actuator node that owns the stepper, joined by
//! a single-byte command bus.
//!
//! `run_test` wires the nodes together the way the firmware does: the
//! actuator node runs its own poll loop (here a thread standing in for the
//! slave board), the controller calibrates and then drives the selected
//! test program on the calling thread.

use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

pub mod actuator;
pub mod bus;
pub mod controller;
pub mod sim;

use common::config::{ControllerMode, RigConfig};
use common::diagnostics::DiagnosticsSnapshot;
use common::hal::{ButtonInput, DistanceSensor, LoadCell, StepperDriver, Timing};
use common::sampler::{CalibrationBaseline, CalibrationError};
use common::{ActuatorCommand, SharedDiagnostics, TelemetryRecorder, TestRecord, TraceRecord};

use bus::{BusError, CommandBus, CommandLatch, WireBus};
pub use controller::{TestController, TestOutcome, TestState};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RigError {
    Calibration(CalibrationError),
    Bus(BusError),
}

impl fmt::Display for RigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RigError::Calibration(e) => write!(f, "calibration failed: {e}"),
            RigError::Bus(e) => write!(f, "bus fault: {e}"),
        }
    }
}

impl Error for RigError {}

impl From<CalibrationError> for RigError {
    fn from(e: CalibrationError) -> Self {
        RigError::Calibration(e)
    }
}

impl From<BusError> for RigError {
    fn from(e: BusError) -> Self {
        RigError::Bus(e)
    }
}

/// Everything the rig needs from the hardware, one trait object-free bundle.
pub struct RigHardware<D, L, Btn, S, T> {
    pub distance: D,
    pub loadcell: L,
    pub button: Btn,
    pub stepper: S,
    pub timing: T,
}

/// What came out of a finished (or failed-over) run.
#[derive(Debug)]
pub struct TestReport {
    /// `None` for characterisation runs, which have no pass/abort notion.
    pub outcome: Option<TestOutcome>,
    pub baseline: CalibrationBaseline,
    pub test_records: Vec<TestRecord>,
    pub trace_records: Vec<TraceRecord>,
    pub diagnostics: DiagnosticsSnapshot,
}

/// Run one full power-cycle worth of rig: spawn the actuator node,
/// calibrate, execute the configured controller mode, shut down.
///
/// On any calibration failure the actuator is explicitly commanded to Stop
/// before the error is surfaced; the rig never faults with the motor live.
pub fn run_test<D, L, Btn, S, T>(
    config: &RigConfig,
    hardware: RigHardware<D, L, Btn, S, T>,
) -> Result<TestReport, RigError>
where
    D: DistanceSensor,
    L: LoadCell,
    Btn: ButtonInput,
    S: StepperDriver + Send + 'static,
    T: Timing + Clone + Send + 'static,
{
    let RigHardware {
        mut distance,
        mut loadcell,
        mut button,
        stepper,
        mut timing,
    } = hardware;

    let diagnostics = Arc::new(SharedDiagnostics::default());
    let latch = Arc::new(CommandLatch::new(
        config.bus.peer_address,
        Arc::clone(&diagnostics),
    ));
    let shutdown = Arc::new(AtomicBool::new(false));

    let actuator_handle = {
        let motion = config.motion;
        let latch = Arc::clone(&latch);
        let shutdown = Arc::clone(&shutdown);
        let timing = timing.clone();
        thread::spawn(move || actuator::run_actuator(motion, stepper, timing, latch, shutdown))
    };

    let mut wire = WireBus::new(config.bus.peer_address, Arc::clone(&latch));
    let result = run_controller(
        config,
        &mut distance,
        &mut loadcell,
        &mut button,
        &mut timing,
        &mut wire,
        diagnostics.as_ref(),
    );

    shutdown.store(true, Ordering::Relaxed);
    // Release our clock handle before the join: a coordinating Timing impl
    // (the sim clock) resolves the actuator's pending delay once the
    // controller's handle is gone.
    drop(timing);
    let _ = actuator_handle.join();

    result
}

fn run_controller<D, L, Btn, T, B>(
    config: &RigConfig,
    distance: &mut D,
    loadcell: &mut L,
    button: &mut Btn,
    timing: &mut T,
    wire: &mut B,
    diagnostics: &SharedDiagnostics,
) -> Result<TestReport, RigError>
where
    D: DistanceSensor,
    L: LoadCell,
    Btn: ButtonInput,
    T: Timing,
    B: CommandBus,
{
    if config.enable_logging {
        println!(
            "[{:>8}] [CAL] averaging {} ranging samples for the reference length",
            format!("{:.3}s", timing.elapsed_ms() as f64 / 1000.0),
            config.sensing.baseline_samples
        );
    }

    let baseline = match CalibrationBaseline::establish(distance, loadcell, &config.sensing) {
        Ok(b) => b,
        Err(e) => {
            // Fail safe: park the actuator before surfacing the error.
            let _ = wire.send(ActuatorCommand::Stop);
            return Err(RigError::Calibration(e));
        }
    };

    if config.enable_logging {
        println!(
            "[{:>8}] [CAL] reference length {:.2} mm, tare {:.2}",
            format!("{:.3}s", timing.elapsed_ms() as f64 / 1000.0),
            baseline.reference_length_mm(),
            baseline.tare_force()
        );
    }

    let test_recorder = TelemetryRecorder::new();
    let trace_recorder = TelemetryRecorder::new();

    let outcome = match config.mode {
        ControllerMode::ThresholdTest => Some(controller::run_threshold_test(
            config,
            &baseline,
            distance,
            loadcell,
            button,
            timing,
            wire,
            &test_recorder,
            diagnostics,
        )?),
        ControllerMode::Characterisation => {
            controller::run_characterisation(
                config,
                distance,
                button,
                timing,
                wire,
                &trace_recorder,
                diagnostics,
            )?;
            None
        }
    };

    Ok(TestReport {
        outcome,
        baseline,
        test_records: test_recorder.get_samples(),
        trace_records: trace_recorder.get_samples(),
        diagnostics: diagnostics.snapshot(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::config::RetractMode;
    use common::hal::SensorError;
    use sim::{ScriptedDistanceSensor, SimParams, SimWorld};

    fn sim_config() -> RigConfig {
        let mut config = RigConfig::default();
        config.button.enabled = false; // auto-start, no operator in the loop
        config.sensing.baseline_samples = 10;
        config
    }

    fn sim_hardware(
        world: &SimWorld,
    ) -> RigHardware<
        sim::SimDistanceSensor,
        sim::SimLoadCell,
        sim::NullButton,
        sim::SimStepper,
        sim::SimClock,
    > {
        RigHardware {
            distance: world.distance_sensor(),
            loadcell: world.loadcell(),
            button: sim::NullButton,
            stepper: world.stepper(),
            timing: world.clock(),
        }
    }

    #[test]
    fn a_full_pull_test_rises_trips_and_comes_back_down() {
        let world = SimWorld::new(SimParams::default());
        let config = sim_config();

        let report = run_test(&config, sim_hardware(&world)).expect("run");

        assert_eq!(report.outcome, Some(TestOutcome::Completed));
        assert!((report.baseline.reference_length_mm() - 100.0).abs() < 0.2);
        assert!(!report.test_records.is_empty());

        // The stream rose to the strain ceiling and returned to baseline.
        let peak = report
            .test_records
            .iter()
            .map(|r| r.strain)
            .fold(f64::NEG_INFINITY, f64::max);
        assert!(peak >= config.test.strain_ceiling);
        let last = report.test_records.last().unwrap();
        assert!(last.strain <= 0.0);

        let snap = world.snapshot();
        assert!(snap.forward_pulses > 0);
        assert!(snap.reverse_pulses > 0);
        assert!(snap.extension_mm <= 0.0);
        assert_eq!(report.diagnostics.invalid_commands, 0);
    }

    #[test]
    fn rewind_mode_parks_the_crosshead_exactly_at_rest() {
        let world = SimWorld::new(SimParams::default());
        let mut config = sim_config();
        config.motion.retract_mode = RetractMode::RewindTaken;

        let report = run_test(&config, sim_hardware(&world)).expect("run");

        assert_eq!(report.outcome, Some(TestOutcome::Completed));
        let snap = world.snapshot();
        assert_eq!(snap.forward_pulses, snap.reverse_pulses);
        assert_eq!(snap.extension_mm, 0.0);
    }

    #[test]
    fn ranging_failure_during_calibration_parks_the_actuator() {
        let world = SimWorld::new(SimParams::default());
        let config = sim_config();
        let hardware = RigHardware {
            distance: ScriptedDistanceSensor::new(vec![Err(SensorError::EchoTimeout)]),
            loadcell: world.loadcell(),
            button: sim::NullButton,
            stepper: world.stepper(),
            timing: world.clock(),
        };

        let err = run_test(&config, hardware).unwrap_err();
        assert!(matches!(err, RigError::Calibration(_)));
        // The motor never moved.
        assert_eq!(world.snapshot().forward_pulses, 0);
    }

    #[test]
    fn a_zero_reference_length_is_fatal() {
        let world = SimWorld::new(SimParams::default());
        let config = sim_config();
        let hardware = RigHardware {
            distance: ScriptedDistanceSensor::new(vec![Ok(0)]),
            loadcell: world.loadcell(),
            button: sim::NullButton,
            stepper: world.stepper(),
            timing: world.clock(),
        };

        let err = run_test(&config, hardware).unwrap_err();
        assert_eq!(
            err,
            RigError::Calibration(CalibrationError::NonPositiveReference(0.0))
        );
    }

    #[test]
    fn characterisation_mode_streams_distance_against_time() {
        let world = SimWorld::new(SimParams::default());
        let mut config = sim_config();
        config.mode = ControllerMode::Characterisation;
        config.characterisation.max_duration_ms = 2_000;

        let report = run_test(&config, sim_hardware(&world)).expect("run");

        assert_eq!(report.outcome, None);
        assert!(report.test_records.is_empty());
        assert!(!report.trace_records.is_empty());
        // The crosshead only ever extended, so distances never shrink.
        for pair in report.trace_records.windows(2) {
            assert!(pair[1].distance_mm >= pair[0].distance_mm);
            assert!(pair[1].elapsed_ms >= pair[0].elapsed_ms);
        }
        // The actuator node really moved while the run was sampling; the
        // trace is not a flat line.
        assert!(world.snapshot().forward_pulses > 0);
        let first = report.trace_records.first().unwrap();
        let last = report.trace_records.last().unwrap();
        assert!(last.distance_mm > first.distance_mm);
    }
}
