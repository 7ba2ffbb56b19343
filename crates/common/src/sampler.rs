//! Strain/force sampling: the pure math shared by calibration and every
//! control-loop iteration.

use std::error::Error;
use std::fmt;

use crate::config::SensingConfig;
use crate::hal::{DistanceSensor, LoadCell, SensorError};

/// Round-trip echo duration to one-way distance.
pub fn echo_to_distance_mm(duration_us: u32, speed_mm_per_us: f64) -> f64 {
    duration_us as f64 * speed_mm_per_us / 2.0
}

/// One ranging cycle. A timeout surfaces as an error, never as distance 0.
pub fn measure_distance<S: DistanceSensor>(
    sensor: &mut S,
    speed_mm_per_us: f64,
) -> Result<f64, SensorError> {
    let duration = sensor.echo_round_trip_us()?;
    Ok(echo_to_distance_mm(duration, speed_mm_per_us))
}

/// Average of exactly `samples` ranging cycles. The original firmware's
/// calibration loop ran one sample too many; here the requested count is
/// the contract.
pub fn measure_baseline<S: DistanceSensor>(
    sensor: &mut S,
    samples: u32,
    speed_mm_per_us: f64,
) -> Result<f64, CalibrationError> {
    if samples == 0 {
        return Err(CalibrationError::NoSamples);
    }
    let mut sum = 0.0;
    for _ in 0..samples {
        sum += measure_distance(sensor, speed_mm_per_us).map_err(CalibrationError::Ranging)?;
    }
    Ok(sum / samples as f64)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationError {
    /// The averaged reference length came out zero or negative; strain would
    /// be meaningless. Fatal to startup.
    NonPositiveReference(f64),
    /// Ranging failed while establishing the reference length.
    Ranging(SensorError),
    /// The load cell failed during the tare read.
    LoadCell(SensorError),
    NoSamples,
}

impl fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationError::NonPositiveReference(len) => {
                write!(f, "reference length {len} mm is not positive")
            }
            CalibrationError::Ranging(e) => write!(f, "ranging failed during calibration: {e}"),
            CalibrationError::LoadCell(e) => write!(f, "tare read failed: {e}"),
            CalibrationError::NoSamples => write!(f, "calibration needs at least one sample"),
        }
    }
}

impl Error for CalibrationError {}

/// Zero-strain reference length and tared force baseline, established once
/// at startup and immutable for the rest of the run.
///
/// Every strain computation goes through a value of this type, so strain
/// before calibration is not expressible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationBaseline {
    reference_length_mm: f64,
    tare_force: f64,
}

impl CalibrationBaseline {
    /// Rejects non-positive reference lengths; `strain` divides by it.
    pub fn new(reference_length_mm: f64, tare_force: f64) -> Result<Self, CalibrationError> {
        if reference_length_mm <= 0.0 {
            return Err(CalibrationError::NonPositiveReference(reference_length_mm));
        }
        Ok(Self {
            reference_length_mm,
            tare_force,
        })
    }

    /// The startup sequence: average the unstrained sample length, then tare
    /// the load cell with one long averaged read.
    pub fn establish<S: DistanceSensor, L: LoadCell>(
        sensor: &mut S,
        loadcell: &mut L,
        cfg: &SensingConfig,
    ) -> Result<Self, CalibrationError> {
        let reference =
            measure_baseline(sensor, cfg.baseline_samples, cfg.speed_of_sound_mm_per_us)?;
        let tare = loadcell
            .read_average(cfg.tare_samples)
            .map_err(CalibrationError::LoadCell)?;
        Self::new(reference, tare)
    }

    pub fn reference_length_mm(&self) -> f64 {
        self.reference_length_mm
    }

    pub fn tare_force(&self) -> f64 {
        self.tare_force
    }

    /// Normalized elongation relative to the reference length. Negative when
    /// the probe sits closer than the baseline, zero exactly at it.
    pub fn strain(&self, distance_mm: f64) -> f64 {
        (distance_mm - self.reference_length_mm) / self.reference_length_mm
    }

    /// Live averaged load-cell read minus the tare.
    pub fn net_force<L: LoadCell>(
        &self,
        loadcell: &mut L,
        samples: u32,
    ) -> Result<f64, SensorError> {
        Ok(loadcell.read_average(samples)? - self.tare_force)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct FakeRanger {
        echoes: VecDeque<Result<u32, SensorError>>,
    }

    impl FakeRanger {
        fn new(echoes: impl IntoIterator<Item = Result<u32, SensorError>>) -> Self {
            Self {
                echoes: echoes.into_iter().collect(),
            }
        }
    }

    impl DistanceSensor for FakeRanger {
        fn echo_round_trip_us(&mut self) -> Result<u32, SensorError> {
            self.echoes.pop_front().unwrap_or(Err(SensorError::NotReady))
        }
    }

    struct FakeLoadCell {
        raw: f64,
    }

    impl LoadCell for FakeLoadCell {
        fn read_average(&mut self, _samples: u32) -> Result<f64, SensorError> {
            Ok(self.raw)
        }
    }

    #[test]
    fn echo_conversion_halves_the_round_trip() {
        // 588 us at 0.34 mm/us is just under 100 mm one way.
        let d = echo_to_distance_mm(588, 0.34);
        assert!((d - 99.96).abs() < 1e-9);
        assert_eq!(echo_to_distance_mm(0, 0.34), 0.0);
    }

    #[test]
    fn baseline_is_the_mean_of_exactly_n_samples() {
        // Durations chosen so distances come out 10, 20, 30 mm at speed 2.0.
        let mut ranger = FakeRanger::new([Ok(10), Ok(20), Ok(30), Ok(9999)]);
        let mean = measure_baseline(&mut ranger, 3, 2.0).expect("baseline");
        assert_eq!(mean, 20.0);
        // The fourth sample must not have been consumed.
        assert_eq!(ranger.echoes.len(), 1);
    }

    #[test]
    fn baseline_propagates_a_ranging_timeout() {
        let mut ranger = FakeRanger::new([Ok(10), Err(SensorError::EchoTimeout)]);
        let err = measure_baseline(&mut ranger, 3, 0.34).unwrap_err();
        assert_eq!(err, CalibrationError::Ranging(SensorError::EchoTimeout));
    }

    #[test]
    fn zero_sample_calibration_is_rejected() {
        let mut ranger = FakeRanger::new([Ok(10)]);
        assert_eq!(
            measure_baseline(&mut ranger, 0, 0.34),
            Err(CalibrationError::NoSamples)
        );
    }

    #[test]
    fn non_positive_reference_is_unrepresentable() {
        assert!(matches!(
            CalibrationBaseline::new(0.0, 0.0),
            Err(CalibrationError::NonPositiveReference(_))
        ));
        assert!(matches!(
            CalibrationBaseline::new(-3.0, 0.0),
            Err(CalibrationError::NonPositiveReference(_))
        ));
    }

    #[test]
    fn strain_is_zero_at_reference_and_monotonic() {
        let baseline = CalibrationBaseline::new(100.0, 0.0).unwrap();
        assert_eq!(baseline.strain(100.0), 0.0);
        assert!(baseline.strain(90.0) < 0.0);

        let mut prev = f64::NEG_INFINITY;
        for d in [0.0, 50.0, 99.0, 100.0, 101.0, 140.0, 250.0] {
            let s = baseline.strain(d);
            assert!(s > prev, "strain must increase with distance");
            prev = s;
        }
        // Elongation to 140 mm from a 100 mm sample is strain 0.4.
        assert!((baseline.strain(140.0) - 0.4).abs() < 1e-12);
    }

    #[test]
    fn net_force_subtracts_the_tare() {
        let baseline = CalibrationBaseline::new(100.0, 12.5).unwrap();
        let mut cell = FakeLoadCell { raw: 62.5 };
        assert_eq!(baseline.net_force(&mut cell, 10).unwrap(), 50.0);
    }

    #[test]
    fn establish_averages_and_tares() {
        let mut ranger = FakeRanger::new([Ok(588), Ok(588), Ok(588), Ok(588)]);
        let mut cell = FakeLoadCell { raw: 7.0 };
        let cfg = SensingConfig {
            speed_of_sound_mm_per_us: 0.34,
            baseline_samples: 4,
            live_force_samples: 10,
            tare_samples: 32,
        };
        let baseline = CalibrationBaseline::establish(&mut ranger, &mut cell, &cfg).unwrap();
        assert!((baseline.reference_length_mm() - 99.96).abs() < 1e-9);
        assert_eq!(baseline.tare_force(), 7.0);
    }
}
