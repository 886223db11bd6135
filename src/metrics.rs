use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};
use std::time::Instant;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Model lifecycle metrics
    pub static ref MODEL_LOADS: IntCounter = IntCounter::new(
        "model_loads_total",
        "Total number of successful model loads"
    ).unwrap();

    pub static ref MODEL_LOAD_FAILURES: IntCounter = IntCounter::new(
        "model_load_failures_total",
        "Total number of failed model loads"
    ).unwrap();

    // Inference metrics
    pub static ref INFERENCES_TOTAL: IntCounter = IntCounter::new(
        "inferences_total",
        "Total number of completed inference calls"
    ).unwrap();

    pub static ref INFERENCE_ERRORS: IntCounter = IntCounter::new(
        "inference_errors_total",
        "Total number of rejected or failed inference calls"
    ).unwrap();

    pub static ref INFERENCE_LATENCY: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "inference_duration_seconds",
            "Inference call latency in seconds"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0])
    ).unwrap();

    // Transport metrics
    pub static ref MESSAGES_IN: IntCounter = IntCounter::new(
        "messages_in_total",
        "Total number of input messages received from the host"
    ).unwrap();

    pub static ref MESSAGES_OUT: IntCounter = IntCounter::new(
        "messages_out_total",
        "Total number of result messages published to the host"
    ).unwrap();
}

/// Initialize metrics registry
pub fn init_metrics() {
    REGISTRY.register(Box::new(MODEL_LOADS.clone())).unwrap();
    REGISTRY.register(Box::new(MODEL_LOAD_FAILURES.clone())).unwrap();
    REGISTRY.register(Box::new(INFERENCES_TOTAL.clone())).unwrap();
    REGISTRY.register(Box::new(INFERENCE_ERRORS.clone())).unwrap();
    REGISTRY.register(Box::new(INFERENCE_LATENCY.clone())).unwrap();
    REGISTRY.register(Box::new(MESSAGES_IN.clone())).unwrap();
    REGISTRY.register(Box::new(MESSAGES_OUT.clone())).unwrap();

    tracing::info!(
        "Metrics registry initialized with {} collectors",
        REGISTRY.gather().len()
    );
}

/// Helper struct for timing operations
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn observe_duration_seconds(&self, histogram: &Histogram) {
        let duration = self.start.elapsed();
        histogram.observe(duration.as_secs_f64());
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Export metrics in Prometheus format
pub fn export_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
