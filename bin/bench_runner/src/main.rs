use common::config::{load_config, RigConfig};
use common::sampler::{echo_to_distance_mm, CalibrationBaseline};
use common::TestRecord;
use criterion::{black_box, Criterion};
use rig::sim::{RecordingBus, SimParams, SimWorld};
use rig::{run_test, RigHardware, TestController};
use std::env;

fn analyze_records(records: &[TestRecord], name: &str) {
    if records.is_empty() {
        println!("{}: no telemetry to analyze", name);
        return;
    }

    let total = records.len();
    let peak_strain = records.iter().map(|r| r.strain).fold(f64::NEG_INFINITY, f64::max);
    let peak_force = records.iter().map(|r| r.force).fold(f64::NEG_INFINITY, f64::max);
    let duration_ms = records
        .last()
        .map(|r| r.elapsed_ms)
        .unwrap_or(0)
        .saturating_sub(records.first().map(|r| r.elapsed_ms).unwrap_or(0));

    // Sample cadence seen by the control loop, in rows per simulated second.
    let rate = if duration_ms > 0 {
        total as f64 * 1000.0 / duration_ms as f64
    } else {
        0.0
    };

    println!("\n=== {} Run Analysis ===", name);
    println!("Telemetry rows: {}", total);
    println!("Run duration: {} ms (simulated)", duration_ms);
    println!("Peak strain: {:.3}", peak_strain);
    println!("Peak force: {:.1}", peak_force);
    println!("Control-loop rate: {:.1} rows/s", rate);
}

fn run_simulated_pull(config: &RigConfig) -> Vec<TestRecord> {
    let world = SimWorld::new(SimParams::default());
    let hardware = RigHardware {
        distance: world.distance_sensor(),
        loadcell: world.loadcell(),
        button: rig::sim::NullButton,
        stepper: world.stepper(),
        timing: world.clock(),
    };
    match run_test(config, hardware) {
        Ok(report) => report.test_records,
        Err(e) => {
            eprintln!("Simulated run failed: {}", e);
            Vec::new()
        }
    }
}

fn benchmark_full_run(c: &mut Criterion, config: &RigConfig) {
    let config = config.clone();
    c.bench_function("simulated_pull_test", |b| {
        b.iter(|| {
            let records = run_simulated_pull(black_box(&config));
            black_box(records.len());
        });
    });
}

fn benchmark_strain_math(c: &mut Criterion, config: &RigConfig) {
    let baseline = CalibrationBaseline::new(100.0, 0.25).expect("baseline");
    let speed = config.sensing.speed_of_sound_mm_per_us;

    c.bench_function("echo_to_strain", |b| {
        b.iter(|| {
            let distance = echo_to_distance_mm(black_box(700), speed);
            black_box(baseline.strain(distance));
        });
    });
}

fn benchmark_controller_step(c: &mut Criterion, config: &RigConfig) {
    let strain_ceiling = config.test.strain_ceiling;
    let force_ceiling = config.test.force_ceiling;

    c.bench_function("controller_step", |b| {
        b.iter(|| {
            let mut controller = TestController::new(strain_ceiling, force_ceiling, true);
            let mut bus = RecordingBus::default();
            // Rise, trip, and come back down in four steps.
            for &(strain, force) in &[(0.1, 5.0), (0.8, 30.0), (1.5, 40.0), (0.0, 0.0)] {
                let _ = controller.step(
                    black_box(rig::controller::StepInput {
                        strain,
                        force,
                        button_pressed: false,
                    }),
                    &mut bus,
                );
            }
            black_box(bus.sent.len());
        });
    });
}

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: bench_runner <config_file> [--criterion]");
        eprintln!("Example: bench_runner configs/rig_default.toml");
        eprintln!("Example: bench_runner configs/rig_default.toml --criterion");
        std::process::exit(1);
    }

    let config_path = &args[1];
    let use_criterion = args.contains(&"--criterion".to_string());

    let mut config = load_config(config_path).expect("Failed to load config");
    config.button.enabled = false; // no operator in a benchmark

    // Disable logging during Criterion benchmarks for methodological validity
    if use_criterion {
        config.enable_logging = false;
    }

    println!("========================================");
    println!("Mini Tensile Rig Benchmark");
    println!("========================================");
    println!("Config: {}", config_path);
    println!("Rig: {}", config.rig_name);
    println!("Strain ceiling: {}", config.test.strain_ceiling);
    println!("Force ceiling: {}", config.test.force_ceiling);
    if use_criterion {
        println!("Using Criterion for statistical analysis");
        println!("Logging disabled for benchmark validity");
    }
    println!("========================================\n");

    if use_criterion {
        let mut criterion = Criterion::default()
            .sample_size(20)
            .measurement_time(std::time::Duration::from_secs(10));

        println!("Running statistical benchmarks...");
        benchmark_strain_math(&mut criterion, &config);
        benchmark_controller_step(&mut criterion, &config);
        benchmark_full_run(&mut criterion, &config);

        println!("\n========================================");
        println!("Criterion statistical analysis complete!");
        println!("Check the target/criterion directory for detailed HTML reports.");
        println!("========================================");
    } else {
        println!("Running one simulated pull test...");
        let start = std::time::Instant::now();
        let records = run_simulated_pull(&config);
        let elapsed = start.elapsed();

        println!("Run completed in {:.2} seconds (wall clock)", elapsed.as_secs_f64());
        analyze_records(&records, "PULL TEST");

        common::telemetry::write_csv(&records, "bench_results.csv")
            .expect("Failed to save bench CSV");

        println!("\n========================================");
        println!("Benchmark complete!");
        println!("========================================");
    }
}
