use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Default)]
pub struct Metrics {
    iterations: AtomicU64,
    planner_requests: AtomicU64,
    planner_failures: AtomicU64,
    detection_failures: AtomicU64,
    plans_rejected: AtomicU64,
    actions_executed: AtomicU64,
    action_failures: AtomicU64,
    fail_safe_trips: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_iterations(&self) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_planner_requests(&self) {
        self.planner_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_planner_failures(&self) {
        self.planner_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_detection_failures(&self) {
        self.detection_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_plans_rejected(&self) {
        self.plans_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_actions_executed(&self) {
        self.actions_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_action_failures(&self) {
        self.action_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_fail_safe_trips(&self) {
        self.fail_safe_trips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            iterations: self.iterations.load(Ordering::Relaxed),
            planner_requests: self.planner_requests.load(Ordering::Relaxed),
            planner_failures: self.planner_failures.load(Ordering::Relaxed),
            detection_failures: self.detection_failures.load(Ordering::Relaxed),
            plans_rejected: self.plans_rejected.load(Ordering::Relaxed),
            actions_executed: self.actions_executed.load(Ordering::Relaxed),
            action_failures: self.action_failures.load(Ordering::Relaxed),
            fail_safe_trips: self.fail_safe_trips.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub iterations: u64,
    pub planner_requests: u64,
    pub planner_failures: u64,
    pub detection_failures: u64,
    pub plans_rejected: u64,
    pub actions_executed: u64,
    pub action_failures: u64,
    pub fail_safe_trips: u64,
}

impl MetricsSnapshot {
    pub fn planner_success_rate(&self) -> f64 {
        if self.planner_requests == 0 {
            return 1.0;
        }
        1.0 - (self.planner_failures as f64 / self.planner_requests as f64)
    }

    /// `actions_executed` counts attempts, successful or not.
    pub fn action_success_rate(&self) -> f64 {
        if self.actions_executed == 0 {
            return 1.0;
        }
        1.0 - (self.action_failures as f64 / self.actions_executed as f64)
    }
}
