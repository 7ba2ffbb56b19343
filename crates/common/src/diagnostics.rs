use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Fault counters shared between the control loop and the bus receive
/// callback. Plain atomics: the callback runs in interrupt context on real
/// hardware and may not block.
#[derive(Debug, Default)]
pub struct SharedDiagnostics {
    pub sensor_timeouts: AtomicU64,
    pub invalid_commands: AtomicU64,
    pub user_aborts: AtomicU64,
}

impl SharedDiagnostics {
    pub fn record_sensor_timeout(&self) {
        self.sensor_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid_command(&self) {
        self.invalid_commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_user_abort(&self) {
        self.user_aborts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            sensor_timeouts: self.sensor_timeouts.load(Ordering::Relaxed),
            invalid_commands: self.invalid_commands.load(Ordering::Relaxed),
            user_aborts: self.user_aborts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DiagnosticsSnapshot {
    pub sensor_timeouts: u64,
    pub invalid_commands: u64,
    pub user_aborts: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_independently() {
        let diag = SharedDiagnostics::default();
        diag.record_sensor_timeout();
        diag.record_sensor_timeout();
        diag.record_invalid_command();

        let snap = diag.snapshot();
        assert_eq!(snap.sensor_timeouts, 2);
        assert_eq!(snap.invalid_commands, 1);
        assert_eq!(snap.user_aborts, 0);
    }
}
