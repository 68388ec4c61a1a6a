//! Telemetry collector hook. The orchestrator and verification pipeline
//! report stage durations and counters here; deployments plug in their
//! own sink, tests use [`NoopTelemetry`].

use std::collections::HashMap;

use parking_lot::Mutex;

/// Sink for engine metrics.
pub trait TelemetryCollector: Send + Sync {
    /// Record one observation of a named metric.
    fn record(&self, metric: &str, value: f64);

    /// Flush buffered observations to the backing sink.
    fn flush(&self);

    /// Snapshot of the latest value per metric.
    fn get_metrics(&self) -> HashMap<String, f64>;
}

/// Collector that keeps the latest value per metric in memory and
/// discards on flush. The default when no collector is configured.
#[derive(Default)]
pub struct NoopTelemetry {
    latest: Mutex<HashMap<String, f64>>,
}

impl TelemetryCollector for NoopTelemetry {
    fn record(&self, metric: &str, value: f64) {
        self.latest.lock().insert(metric.to_string(), value);
    }

    fn flush(&self) {
        self.latest.lock().clear();
    }

    fn get_metrics(&self) -> HashMap<String, f64> {
        self.latest.lock().clone()
    }
}
