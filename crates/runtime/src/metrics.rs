//! Metrics instrumentation for the control loop.
//!
//! Values go to whatever `metrics` recorder is installed; without one every
//! call is a no-op. Build with the `prometheus` feature for an exporter.

use std::time::Instant;

/// Pipeline stage a latency sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Capture,
    Detect,
    Plan,
    Action,
    Iteration,
}

impl Stage {
    pub fn metric_name(&self) -> &'static str {
        match self {
            Stage::Capture => "squid_capture_latency",
            Stage::Detect => "squid_detect_latency",
            Stage::Plan => "squid_plan_latency",
            Stage::Action => "squid_action_latency",
            Stage::Iteration => "squid_iteration_duration",
        }
    }
}

/// Record a latency sample in milliseconds.
pub fn record_latency(stage: Stage, duration_ms: f64) {
    metrics::histogram!(stage.metric_name(), duration_ms);
}

pub fn increment_iterations() {
    metrics::counter!("squid_iterations", 1);
}

pub fn increment_plans_rejected() {
    metrics::counter!("squid_plans_rejected", 1);
}

pub fn increment_action_failures() {
    metrics::counter!("squid_action_failures", 1);
}

pub fn increment_fail_safe_trips() {
    metrics::counter!("squid_fail_safe_trips", 1);
}

/// RAII timer; records on drop.
pub struct MetricTimer {
    start: Instant,
    stage: Stage,
}

impl MetricTimer {
    pub fn new(stage: Stage) -> Self {
        Self {
            start: Instant::now(),
            stage,
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for MetricTimer {
    fn drop(&mut self) {
        record_latency(self.stage, self.elapsed_ms());
    }
}

/// Serve Prometheus metrics on `addr`. Needs a running tokio runtime.
#[cfg(feature = "prometheus")]
pub fn install_prometheus_exporter(addr: std::net::SocketAddr) -> Result<(), squid_core::AgentError> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| squid_core::AgentError::Config(format!("Cannot start metrics exporter: {}", e)))
}
