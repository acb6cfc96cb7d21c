use hdrhistogram::Histogram;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Metrics collector for client-side operations
pub struct Metrics {
    operation_latencies: Mutex<HashMap<String, Histogram<u64>>>,
    device_calls: AtomicU64,
    batch_rounds: AtomicU64,
    batch_rereads: AtomicU64,
    aio_submitted: AtomicU64,
    aio_completed: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            operation_latencies: Mutex::new(HashMap::new()),
            device_calls: AtomicU64::new(0),
            batch_rounds: AtomicU64::new(0),
            batch_rereads: AtomicU64::new(0),
            aio_submitted: AtomicU64::new(0),
            aio_completed: AtomicU64::new(0),
        }
    }

    pub fn record_latency(&self, operation: &str, duration: Duration) {
        let mut latencies = self
            .operation_latencies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let histogram = match latencies.get_mut(operation) {
            Some(histogram) => histogram,
            None => match Histogram::<u64>::new(3) {
                Ok(histogram) => latencies.entry(operation.to_string()).or_insert(histogram),
                Err(_) => return,
            },
        };

        let micros = duration.as_micros() as u64;
        let _ = histogram.record(micros);
    }

    pub fn increment_device_calls(&self) {
        self.device_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_batch_rounds(&self) {
        self.batch_rounds.fetch_add(1, Ordering::Relaxed);
    }

    /// Count keys that needed a second, exactly-sized read.
    pub fn add_batch_rereads(&self, keys: u64) {
        self.batch_rereads.fetch_add(keys, Ordering::Relaxed);
    }

    pub fn increment_aio_submitted(&self) {
        self.aio_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_aio_completed(&self) {
        self.aio_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_percentiles(&self, operation: &str) -> (f64, f64, f64) {
        let latencies = self
            .operation_latencies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(histogram) = latencies.get(operation) {
            let p50 = histogram.value_at_quantile(0.50) as f64;
            let p95 = histogram.value_at_quantile(0.95) as f64;
            let p99 = histogram.value_at_quantile(0.99) as f64;
            (p50, p95, p99)
        } else {
            (0.0, 0.0, 0.0)
        }
    }

    pub fn batch_rounds(&self) -> u64 {
        self.batch_rounds.load(Ordering::Relaxed)
    }

    pub fn report(&self) -> MetricsReport {
        let mut operation_latencies = HashMap::new();
        let latencies = self
            .operation_latencies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        for (op, histogram) in latencies.iter() {
            let p50 = histogram.value_at_quantile(0.50) as f64;
            let p95 = histogram.value_at_quantile(0.95) as f64;
            let p99 = histogram.value_at_quantile(0.99) as f64;
            operation_latencies.insert(op.clone(), (p50, p95, p99));
        }

        MetricsReport {
            device_calls: self.device_calls.load(Ordering::Relaxed),
            batch_rounds: self.batch_rounds.load(Ordering::Relaxed),
            batch_rereads: self.batch_rereads.load(Ordering::Relaxed),
            aio_submitted: self.aio_submitted.load(Ordering::Relaxed),
            aio_completed: self.aio_completed.load(Ordering::Relaxed),
            operation_latencies,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct MetricsReport {
    pub device_calls: u64,
    pub batch_rounds: u64,
    pub batch_rereads: u64,
    pub aio_submitted: u64,
    pub aio_completed: u64,
    pub operation_latencies: HashMap<String, (f64, f64, f64)>, // (p50, p95, p99)
}
