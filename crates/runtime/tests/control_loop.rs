#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use squid_core::{
    ActionName, AgentError, BoundingBox, Element, ElementKind, ExecutionContext, FunctionCall,
    Point, ScreenImage, ValidationStatus,
};
use squid_executor::{Actuator, FailSafe, InputDriver, InputError};
use squid_memory::ContextManager;
use squid_providers::{Planner, PlanningContext, ProviderError};
use squid_runtime::{ControlLoop, LoopConfig, LoopState, OutcomeKind, ReasoningEngine};
use squid_vision::{CaptureError, DetectionError, Detector, ElementDetector, ScreenCapture};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ---- perception ----

struct FakeScreen {
    captures: AtomicUsize,
    broken: bool,
}

impl FakeScreen {
    fn working() -> Arc<Self> {
        Arc::new(Self {
            captures: AtomicUsize::new(0),
            broken: false,
        })
    }

    fn broken() -> Arc<Self> {
        Arc::new(Self {
            captures: AtomicUsize::new(0),
            broken: true,
        })
    }
}

#[async_trait]
impl ScreenCapture for FakeScreen {
    async fn capture(&self) -> Result<ScreenImage, CaptureError> {
        let n = self.captures.fetch_add(1, Ordering::SeqCst);
        if self.broken {
            return Err(CaptureError::BackendUnavailable("no display".to_string()));
        }
        Ok(ScreenImage::new(format!("img-{}", n), "/tmp/squid-test.png").with_size(1920, 1080))
    }
}

/// A dialog with a single Save button at (100, 200, 40x20).
struct SaveDialog {
    blind: bool,
}

#[async_trait]
impl ElementDetector for SaveDialog {
    async fn detect_elements(&self, _image: &ScreenImage) -> Result<Vec<Element>, DetectionError> {
        if self.blind {
            return Err(DetectionError::Unavailable("model not loaded".to_string()));
        }
        Ok(vec![Element::new(
            "e1",
            ElementKind::Button,
            BoundingBox::new(100, 200, 40, 20),
        )
        .with_text("Save")
        .with_confidence(0.9)])
    }

    async fn extract_text(
        &self,
        _image: &ScreenImage,
    ) -> Result<HashMap<String, String>, DetectionError> {
        if self.blind {
            return Err(DetectionError::Unavailable("model not loaded".to_string()));
        }
        Ok(HashMap::from([("e1".to_string(), "Save".to_string())]))
    }

    fn name(&self) -> &str {
        "save-dialog"
    }
}

// ---- decision ----

struct ScriptedPlanner {
    script: Mutex<VecDeque<Result<Vec<FunctionCall>, String>>>,
    /// Answer once the script runs out.
    fallback: Vec<FunctionCall>,
    delay: Option<Duration>,
    requests: AtomicUsize,
}

impl ScriptedPlanner {
    fn new(script: Vec<Result<Vec<FunctionCall>, String>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback: Vec::new(),
            delay: None,
            requests: AtomicUsize::new(0),
        })
    }

    fn always(calls: Vec<FunctionCall>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: calls,
            delay: None,
            requests: AtomicUsize::new(0),
        })
    }

    fn slow() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Vec::new(),
            delay: Some(Duration::from_secs(30)),
            requests: AtomicUsize::new(0),
        })
    }

    fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn propose(&self, _context: &PlanningContext) -> Result<Vec<FunctionCall>, ProviderError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().pop_front();
        match next {
            Some(Ok(calls)) => Ok(calls),
            Some(Err(message)) => Err(ProviderError::Api(message)),
            None => Ok(self.fallback.clone()),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn click_save() -> FunctionCall {
    FunctionCall::new("click_element", json!({ "text": "Save" }))
}

// ---- action ----

#[derive(Debug, Clone, PartialEq)]
enum Input {
    Move(Point),
    Click(Point),
    Type(String),
}

struct RecordingDriver {
    cursor: Mutex<Point>,
    inputs: Mutex<Vec<Input>>,
    /// Every click leaves the cursor in the top-left corner.
    click_lands_in_corner: bool,
}

impl RecordingDriver {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            cursor: Mutex::new(Point::new(500, 500)),
            inputs: Mutex::new(Vec::new()),
            click_lands_in_corner: false,
        })
    }

    fn cornering() -> Arc<Self> {
        Arc::new(Self {
            cursor: Mutex::new(Point::new(500, 500)),
            inputs: Mutex::new(Vec::new()),
            click_lands_in_corner: true,
        })
    }

    fn inputs(&self) -> Vec<Input> {
        self.inputs.lock().clone()
    }
}

#[async_trait]
impl InputDriver for RecordingDriver {
    async fn cursor_position(&self) -> Result<Point, InputError> {
        Ok(*self.cursor.lock())
    }

    async fn move_to(&self, point: Point) -> Result<(), InputError> {
        self.inputs.lock().push(Input::Move(point));
        *self.cursor.lock() = point;
        Ok(())
    }

    async fn click(&self, point: Point) -> Result<(), InputError> {
        self.inputs.lock().push(Input::Click(point));
        *self.cursor.lock() = if self.click_lands_in_corner {
            Point::new(0, 0)
        } else {
            point
        };
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<(), InputError> {
        self.inputs.lock().push(Input::Type(text.to_string()));
        Ok(())
    }
}

// ---- harness ----

struct Harness {
    control: ControlLoop,
    planner: Arc<ScriptedPlanner>,
    screen: Arc<FakeScreen>,
    driver: Arc<RecordingDriver>,
}

fn harness_with(
    planner: Arc<ScriptedPlanner>,
    screen: Arc<FakeScreen>,
    driver: Arc<RecordingDriver>,
    blind: bool,
    config: LoopConfig,
) -> Harness {
    let detector = Detector::new(screen.clone(), Arc::new(SaveDialog { blind }));
    let engine = ReasoningEngine::new(planner.clone(), Arc::new(ContextManager::new(32)));
    let actuator = Actuator::new(driver.clone(), Arc::new(FailSafe::default()));
    Harness {
        control: ControlLoop::new(detector, engine, actuator).with_config(config),
        planner,
        screen,
        driver,
    }
}

fn harness(planner: Arc<ScriptedPlanner>) -> Harness {
    harness_with(
        planner,
        FakeScreen::working(),
        RecordingDriver::new(),
        false,
        LoopConfig::default(),
    )
}

// ---- scenarios ----

#[tokio::test]
async fn test_click_the_save_button() {
    let mut h = harness(ScriptedPlanner::new(vec![Ok(vec![click_save()]), Ok(vec![])]));

    let report = h.control.run("click the Save button").await.unwrap();

    assert_eq!(report.iterations.len(), 2);
    let first = &report.iterations[0];
    assert_eq!(first.kind, OutcomeKind::Completed);
    assert!(first.result.success);
    let plan = first.plan.as_ref().unwrap();
    assert_eq!(plan.status(), ValidationStatus::Passed);
    assert_eq!(plan.steps()[0].name, ActionName::Click);
    assert_eq!(plan.steps()[0].point(), Some(Point::new(120, 210)));
    assert_eq!(h.driver.inputs(), vec![Input::Click(Point::new(120, 210))]);

    assert_eq!(report.iterations[1].kind, OutcomeKind::Idle);
    assert_eq!(report.final_state, LoopState::Idle);
    assert_eq!(report.metrics.iterations, 2);
    assert_eq!(report.metrics.actions_executed, 2);
}

#[tokio::test]
async fn test_click_save_by_element_id() {
    let mut h = harness(ScriptedPlanner::new(vec![
        Ok(vec![FunctionCall::new("click_element", json!({ "element_id": "e1" }))]),
        Ok(vec![]),
    ]));

    let report = h.control.run("click the Save button").await.unwrap();

    let first = &report.iterations[0];
    assert_eq!(first.kind, OutcomeKind::Completed);
    let plan = first.plan.as_ref().unwrap();
    assert_eq!(plan.len(), 1);
    assert_eq!(plan.status(), ValidationStatus::Passed);
    assert_eq!(plan.steps()[0].element_id(), Some("e1"));
    assert_eq!(plan.steps()[0].point(), Some(Point::new(120, 210)));
    assert_eq!(h.driver.inputs(), vec![Input::Click(Point::new(120, 210))]);
    assert_eq!(report.final_state, LoopState::Idle);
    assert_eq!(h.planner.requests(), 2);
}

#[tokio::test]
async fn test_zero_calls_end_the_run() {
    let mut h = harness(ScriptedPlanner::new(vec![Ok(vec![])]));

    let report = h.control.run("is it saved?").await.unwrap();

    assert_eq!(report.iterations.len(), 1);
    let outcome = &report.iterations[0];
    assert_eq!(outcome.kind, OutcomeKind::Idle);
    let plan = outcome.plan.as_ref().unwrap();
    assert!(plan.is_no_op());
    assert_eq!(plan.status(), ValidationStatus::Passed);
    assert!(h.driver.inputs().is_empty());
}

#[tokio::test]
async fn test_fail_safe_mid_plan_skips_remaining_steps() {
    let planner = ScriptedPlanner::new(vec![Ok(vec![
        click_save(),
        FunctionCall::new("type_text", json!({ "text": "report.txt" })),
        click_save(),
    ])]);
    let mut h = harness_with(
        planner,
        FakeScreen::working(),
        RecordingDriver::cornering(),
        false,
        LoopConfig::default(),
    );

    let err = h.control.run("save as report.txt").await.unwrap_err();

    assert!(matches!(err, AgentError::FailSafeTriggered(_)));
    assert_eq!(h.control.state(), LoopState::Aborted);
    assert_eq!(h.driver.inputs(), vec![Input::Click(Point::new(120, 210))]);

    let last = h.control.last_outcome().unwrap();
    assert_eq!(last.kind, OutcomeKind::Aborted);
    assert_eq!(last.completed_steps(), 1);
    assert_eq!(last.attempted.len(), 2);
    assert_eq!(h.control.metrics().fail_safe_trips, 1);

    // Terminal: nothing else is captured or executed.
    let captures = h.screen.captures.load(Ordering::SeqCst);
    assert!(h.control.run_iteration("try again").await.is_err());
    assert_eq!(h.screen.captures.load(Ordering::SeqCst), captures);
    assert_eq!(h.driver.inputs().len(), 1);
}

#[tokio::test]
async fn test_rejected_plan_never_reaches_actuator() {
    let config = LoopConfig {
        context: ExecutionContext::new(vec!["deny_action:click".to_string()], Vec::new()),
        ..LoopConfig::default()
    };
    let mut h = harness_with(
        ScriptedPlanner::new(vec![Ok(vec![click_save()])]),
        FakeScreen::working(),
        RecordingDriver::new(),
        false,
        config,
    );

    let outcome = h.control.run_iteration("click the Save button").await.unwrap();

    assert_eq!(outcome.kind, OutcomeKind::Rejected);
    assert!(outcome.attempted.is_empty());
    assert!(outcome.reason.as_ref().unwrap().contains("deny_action:click"));
    assert_eq!(outcome.plan.as_ref().unwrap().status(), ValidationStatus::Failed);
    assert!(h.driver.inputs().is_empty());
    assert_eq!(h.control.state(), LoopState::Idle);
}

#[tokio::test]
async fn test_stop_during_execution_records_completed_steps() {
    let planner = ScriptedPlanner::new(vec![Ok(vec![
        click_save(),
        FunctionCall::new("wait", json!({ "duration_ms": 30000 })),
        click_save(),
    ])]);
    let mut h = harness(planner);
    let stop = h.control.stop_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        stop.cancel();
    });

    let report = h.control.run("click Save twice").await.unwrap();

    assert_eq!(report.iterations.len(), 1);
    let outcome = &report.iterations[0];
    assert_eq!(outcome.kind, OutcomeKind::Cancelled);
    assert_eq!(outcome.completed_steps(), 1);
    assert_eq!(outcome.attempted.len(), 2);
    assert_eq!(report.final_state, LoopState::Stopped);
    assert_eq!(h.driver.inputs(), vec![Input::Click(Point::new(120, 210))]);
}

#[tokio::test]
async fn test_stop_during_planning() {
    let mut h = harness(ScriptedPlanner::slow());
    let stop = h.control.stop_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.cancel();
    });

    let outcome = h.control.run_iteration("anything").await.unwrap();

    assert_eq!(outcome.kind, OutcomeKind::Cancelled);
    assert!(outcome.plan.is_none());
    assert_eq!(h.control.state(), LoopState::Stopped);
}

#[tokio::test]
async fn test_external_trip_during_planning_aborts() {
    let mut h = harness(ScriptedPlanner::slow());
    let fail_safe = h.control.fail_safe().clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        fail_safe.trip("operator abort");
    });

    let err = h.control.run("anything").await.unwrap_err();

    assert_eq!(err, AgentError::FailSafeTriggered("operator abort".to_string()));
    assert_eq!(h.control.state(), LoopState::Aborted);
    assert!(h.driver.inputs().is_empty());
}

#[tokio::test]
async fn test_capture_failure_short_circuits() {
    let planner = ScriptedPlanner::new(vec![]);
    let mut h = harness_with(
        planner.clone(),
        FakeScreen::broken(),
        RecordingDriver::new(),
        false,
        LoopConfig::default(),
    );

    let outcome = h.control.run_iteration("click the Save button").await.unwrap();

    assert_eq!(outcome.kind, OutcomeKind::CaptureFailed);
    assert!(outcome.reason.as_ref().unwrap().contains("no display"));
    assert_eq!(planner.requests(), 0);
    assert_eq!(h.control.state(), LoopState::Idle);

    let remembered = h.control.memory().recall("", 5);
    assert_eq!(remembered.len(), 1);
    assert!(remembered[0].content().contains("capture_failed"));
}

#[tokio::test]
async fn test_detection_failure_short_circuits() {
    let planner = ScriptedPlanner::new(vec![]);
    let mut h = harness_with(
        planner.clone(),
        FakeScreen::working(),
        RecordingDriver::new(),
        true,
        LoopConfig::default(),
    );

    let outcome = h.control.run_iteration("click the Save button").await.unwrap();

    assert_eq!(outcome.kind, OutcomeKind::DetectionFailed);
    assert!(outcome.reason.as_ref().unwrap().contains("model not loaded"));
    assert_eq!(planner.requests(), 0);
    assert_eq!(h.control.metrics().detection_failures, 1);
}

#[tokio::test]
async fn test_planner_error_degrades_to_idle() {
    let mut h = harness(ScriptedPlanner::new(vec![Err("rate limited".to_string())]));

    let report = h.control.run("click the Save button").await.unwrap();

    assert_eq!(report.iterations.len(), 1);
    let outcome = &report.iterations[0];
    assert_eq!(outcome.kind, OutcomeKind::Idle);
    assert!(outcome.reason.as_ref().unwrap().contains("rate limited"));
    assert_eq!(report.metrics.planner_failures, 1);
    assert!(h.driver.inputs().is_empty());
}

#[tokio::test]
async fn test_stop_instruction() {
    let planner = ScriptedPlanner::new(vec![]);
    let mut h = harness(planner.clone());

    let report = h.control.run("  STOP ").await.unwrap();

    assert_eq!(report.iterations.len(), 1);
    assert_eq!(report.iterations[0].kind, OutcomeKind::Stopped);
    assert_eq!(report.final_state, LoopState::Stopped);
    assert_eq!(h.screen.captures.load(Ordering::SeqCst), 0);
    assert_eq!(planner.requests(), 0);
}

#[tokio::test]
async fn test_iteration_budget() {
    let config = LoopConfig {
        max_iterations: 3,
        ..LoopConfig::default()
    };
    let mut h = harness_with(
        ScriptedPlanner::always(vec![click_save()]),
        FakeScreen::working(),
        RecordingDriver::new(),
        false,
        config,
    );

    let report = h.control.run("keep clicking").await.unwrap();

    assert_eq!(report.iterations.len(), 3);
    assert!(report
        .iterations
        .iter()
        .all(|o| o.kind == OutcomeKind::Completed));
    assert_eq!(report.final_state, LoopState::Idle);
    assert_eq!(h.driver.inputs().len(), 3);
}

#[tokio::test]
async fn test_state_is_published_and_memory_updated() {
    let mut h = harness(ScriptedPlanner::new(vec![Ok(vec![click_save()])]));
    let mut states = h.control.subscribe();
    assert_eq!(*states.borrow(), LoopState::Idle);

    let outcome = h.control.run_iteration("click the Save button").await.unwrap();

    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), LoopState::Idle);
    assert_eq!(
        h.control.memory().working_value("last_outcome"),
        Some(json!("completed"))
    );
    let history = h.control.memory().recent_history(1);
    assert_eq!(history[0].content, outcome.to_string());
    assert!(outcome.to_string().contains("click"));
}
