use serde::Deserialize;
use std::fs;

/// Full rig configuration. Every compiled-in constant of the original
/// firmware lives here so a rig variant is a TOML file, not a fork.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RigConfig {
    pub rig_name: String,
    pub mode: ControllerMode,
    pub enable_logging: bool,
    pub pins: PinConfig,
    pub sensing: SensingConfig,
    pub motion: MotionConfig,
    pub test: TestConfig,
    pub button: ButtonConfig,
    pub bus: BusConfig,
    pub characterisation: CharacterisationConfig,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            rig_name: "mini-tensile".to_string(),
            mode: ControllerMode::ThresholdTest,
            enable_logging: false,
            pins: PinConfig::default(),
            sensing: SensingConfig::default(),
            motion: MotionConfig::default(),
            test: TestConfig::default(),
            button: ButtonConfig::default(),
            bus: BusConfig::default(),
            characterisation: CharacterisationConfig::default(),
        }
    }
}

impl RigConfig {
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)?;
        let config: RigConfig = toml::from_str(&contents)?;
        Ok(config)
    }
}

pub fn load_config(path: &str) -> Result<RigConfig, Box<dyn std::error::Error>> {
    RigConfig::from_file(path)
}

/// Which program the controller node runs.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ControllerMode {
    /// Calibrate, rise until a strain/force ceiling or button press, come
    /// back down. The primary test sequence.
    ThresholdTest,
    /// Extend while logging (distance, elapsed ms) pairs at a fixed cadence,
    /// for pull-velocity characterisation. No thresholds involved.
    Characterisation,
}

/// Pin assignments, as wired on the controller and slave boards. The
/// simulated rig ignores these; a GPIO adapter consumes them.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct PinConfig {
    pub hcsr04_trig: u8,
    pub hcsr04_echo: u8,
    pub loadcell_dout: u8,
    pub loadcell_sck: u8,
    pub step_dir: u8,
    pub step_pulse: u8,
    pub button: u8,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            hcsr04_trig: 3,
            hcsr04_echo: 2,
            loadcell_dout: 2,
            loadcell_sck: 3,
            step_dir: 6,
            step_pulse: 7,
            button: 4,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct SensingConfig {
    /// Speed of sound used for the round-trip conversion, mm per microsecond.
    pub speed_of_sound_mm_per_us: f64,
    /// Ranging samples averaged into the zero-strain reference length.
    pub baseline_samples: u32,
    /// Load-cell samples per live force read.
    pub live_force_samples: u32,
    /// Load-cell samples for the one-time tare read.
    pub tare_samples: u32,
}

impl Default for SensingConfig {
    fn default() -> Self {
        Self {
            speed_of_sound_mm_per_us: 0.34,
            baseline_samples: 100,
            live_force_samples: 10,
            tare_samples: 32,
        }
    }
}

/// How the actuator node unwinds after a rise.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetractMode {
    /// Keep stepping in reverse until told to stop.
    FreeRun,
    /// Step back exactly as many steps as were taken extending, then idle.
    RewindTaken,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct MotionConfig {
    /// Inter-step delay while extending, microseconds. The two directions
    /// deliberately run at different speeds.
    pub extend_step_delay_us: u64,
    /// Inter-step delay while retracting, microseconds.
    pub retract_step_delay_us: u64,
    /// Idle busy-wait while stopped, microseconds.
    pub idle_delay_us: u64,
    pub retract_mode: RetractMode,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            extend_step_delay_us: 10_000,
            retract_step_delay_us: 2_000,
            idle_delay_us: 1_000,
            retract_mode: RetractMode::FreeRun,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct TestConfig {
    /// Strain at which the rise phase ends.
    pub strain_ceiling: f64,
    /// Tared force at which the rise phase ends.
    pub force_ceiling: f64,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            strain_ceiling: 1.4,
            force_ceiling: 70.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct ButtonConfig {
    /// Rigs without a button auto-start the test at power-on.
    pub enabled: bool,
    /// Pressed reads as logic low on every revision that has a button.
    pub active_low: bool,
    /// Minimum stable level duration before a press/release is believed.
    pub debounce_ms: u64,
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            active_low: true,
            debounce_ms: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct BusConfig {
    /// Fixed logical address of the actuator node on the command bus.
    pub peer_address: u8,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { peer_address: 9 }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct CharacterisationConfig {
    /// Cadence of (distance, elapsed) samples while rising.
    pub sample_period_ms: u64,
    /// Hard stop for rigs without a button.
    pub max_duration_ms: u64,
}

impl Default for CharacterisationConfig {
    fn default() -> Self {
        Self {
            sample_period_ms: 100,
            max_duration_ms: 10_000,
        }
    }
}
