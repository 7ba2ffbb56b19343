mod menu;

use common::config::load_config;
use rig::sim::{SimParams, SimWorld};
use rig::{run_test, RigHardware, TestOutcome, TestReport};

fn main() {
    println!("===========================================");
    println!("Welcome to the Mini Tensile Testing Rig");
    println!("===========================================");

    loop {
        menu::show_menu();

        match menu::get_user_choice() {
            Ok(1) => run_pull_test_demo(),
            Ok(2) => run_abort_demo(),
            Ok(3) => run_characterisation_demo(),
            Ok(4) => {
                println!("Goodbye!");
                break;
            }
            _ => println!("Invalid choice. Please select 1-4."),
        }
    }
}

fn run_pull_test_demo() {
    println!("\n=== Running Pull Test Demo ===");

    let mut config = load_config("configs/rig_default.toml").expect("Failed to load config");
    config.enable_logging = true;
    config.button.enabled = false; // earliest rig revision: auto-starts at power-on

    println!(
        "Configuration: {} rig, strain ceiling {}, force ceiling {}",
        config.rig_name, config.test.strain_ceiling, config.test.force_ceiling
    );

    let world = SimWorld::new(SimParams::default());
    let hardware = RigHardware {
        distance: world.distance_sensor(),
        loadcell: world.loadcell(),
        button: rig::sim::NullButton,
        stepper: world.stepper(),
        timing: world.clock(),
    };

    match run_test(&config, hardware) {
        Ok(report) => {
            display_results(&report);
            if let Err(e) = save_report(&report, "pull_test.csv") {
                println!("CSV export failed: {}", e);
            }
        }
        Err(e) => println!("Test failed: {}", e),
    }

    menu::wait_for_enter();
}

fn run_abort_demo() {
    println!("\n=== Running Pull Test With Operator Abort ===");

    let mut config = load_config("configs/rig_default.toml").expect("Failed to load config");
    config.enable_logging = true;

    let world = SimWorld::new(SimParams::default());
    // The operator starts the test, then aborts the rise once the crosshead
    // has travelled 20 mm (well below the strain ceiling).
    let hardware = RigHardware {
        distance: world.distance_sensor(),
        loadcell: world.loadcell(),
        button: world.operator(300, 20.0),
        stepper: world.stepper(),
        timing: world.clock(),
    };

    match run_test(&config, hardware) {
        Ok(report) => {
            display_results(&report);
            if let Err(e) = save_report(&report, "aborted_pull_test.csv") {
                println!("CSV export failed: {}", e);
            }
        }
        Err(e) => println!("Test failed: {}", e),
    }

    menu::wait_for_enter();
}

fn run_characterisation_demo() {
    println!("\n=== Running Characterisation Mode Demo ===");

    let mut config =
        load_config("configs/rig_characterisation.toml").expect("Failed to load config");
    config.enable_logging = true;

    println!(
        "Configuration: {} ms cadence, {} ms duration cap",
        config.characterisation.sample_period_ms, config.characterisation.max_duration_ms
    );

    let world = SimWorld::new(SimParams::default());
    let hardware = RigHardware {
        distance: world.distance_sensor(),
        loadcell: world.loadcell(),
        button: rig::sim::NullButton,
        stepper: world.stepper(),
        timing: world.clock(),
    };

    match run_test(&config, hardware) {
        Ok(report) => {
            display_results(&report);
            if !report.trace_records.is_empty() {
                if let Err(e) =
                    common::telemetry::write_csv(&report.trace_records, "characterisation.csv")
                {
                    println!("CSV export failed: {}", e);
                }
            }
        }
        Err(e) => println!("Run failed: {}", e),
    }

    menu::wait_for_enter();
}

fn save_report(report: &TestReport, filename: &str) -> Result<(), Box<dyn std::error::Error>> {
    common::telemetry::write_csv(&report.test_records, filename)
}

fn display_results(report: &TestReport) {
    println!("\n=== Run Results ===");
    println!(
        "Reference length: {:.2} mm (tare {:.2})",
        report.baseline.reference_length_mm(),
        report.baseline.tare_force()
    );

    match report.outcome {
        Some(TestOutcome::Completed) => println!("Outcome: completed (sample went back down)"),
        Some(TestOutcome::AbortedByUser) => println!("Outcome: aborted by operator"),
        None => println!("Outcome: characterisation run"),
    }

    if !report.test_records.is_empty() {
        let peak_strain = report
            .test_records
            .iter()
            .map(|r| r.strain)
            .fold(f64::NEG_INFINITY, f64::max);
        let peak_force = report
            .test_records
            .iter()
            .map(|r| r.force)
            .fold(f64::NEG_INFINITY, f64::max);
        println!(
            "Telemetry: {} rows, peak strain {:.3}, peak force {:.1}",
            report.test_records.len(),
            peak_strain,
            peak_force
        );
    }
    if !report.trace_records.is_empty() {
        let first = report.trace_records.first().unwrap();
        let last = report.trace_records.last().unwrap();
        println!(
            "Trace: {} rows, {:.1} mm -> {:.1} mm over {} ms",
            report.trace_records.len(),
            first.distance_mm,
            last.distance_mm,
            last.elapsed_ms - first.elapsed_ms
        );
    }

    println!(
        "Diagnostics: {} sensor timeouts, {} invalid commands, {} user aborts",
        report.diagnostics.sensor_timeouts,
        report.diagnostics.invalid_commands,
        report.diagnostics.user_aborts
    );
}
