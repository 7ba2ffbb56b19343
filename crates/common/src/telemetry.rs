use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Thread-safe sample recorder with internal mutability.
/// Cloning is cheap (it clones the Arc, not the data), so the control loop
/// and the caller that later exports can hold the same recorder.
#[derive(Clone)]
pub struct TelemetryRecorder<T> {
    samples: Arc<Mutex<Vec<T>>>,
}

impl<T: Serialize + Clone> TelemetryRecorder<T> {
    pub fn new() -> Self {
        Self {
            samples: Arc::new(Mutex::new(Vec::with_capacity(1_000))),
        }
    }

    pub fn record(&self, sample: T) {
        // Locking is handled here so the control loop stays lock-free at the
        // call site.
        if let Ok(mut data) = self.samples.lock() {
            data.push(sample);
        }
    }

    pub fn len(&self) -> usize {
        self.samples.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_samples(&self) -> Vec<T> {
        self.samples.lock().unwrap().clone()
    }

    pub fn save_to_csv(&self, filename: &str) -> Result<(), Box<dyn std::error::Error>> {
        let data = self.samples.lock().unwrap();
        write_csv(&data, filename)
    }
}

/// One row per record, header from the record's field names.
pub fn write_csv<T: Serialize>(
    records: &[T],
    filename: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut wtr = csv::Writer::from_path(filename)?;
    for record in records {
        wtr.serialize(record)?;
    }
    wtr.flush()?;
    println!("Saved {} records to {}", records.len(), filename);
    Ok(())
}

impl<T: Serialize + Clone> Default for TelemetryRecorder<T> {
    fn default() -> Self {
        Self::new()
    }
}
