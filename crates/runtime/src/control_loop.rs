//! Control loop - perception, decision, action.

use crate::agent_config::{AgentConfig, VisionBackend};
use crate::metrics::{
    increment_action_failures, increment_fail_safe_trips, increment_iterations, MetricTimer, Stage,
};
use crate::reasoning::ReasoningEngine;
use serde_json::json;
use squid_core::{
    ActionPlan, AgentError, ExecutionContext, ExecutionResult, Metrics, MetricsSnapshot,
    ScreenSnapshot,
};
use squid_executor::{Actuator, CommandInputDriver, ExecutionError, FailSafe};
use squid_memory::ContextManager;
use squid_policy::SafetyValidator;
use squid_providers::{ModelPlanner, OpenAICompatibleProvider};
use squid_vision::{Detector, ElementDetector, GrimCapture, RemoteVisionDetector, TesseractDetector};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Instruction that stops the loop without touching the screen.
pub const STOP_INSTRUCTION: &str = "stop";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Capturing,
    Detecting,
    Planning,
    Validating,
    Executing,
    UpdatingMemory,
    /// Explicit stop. Terminal.
    Stopped,
    /// Fail-safe tripped. Terminal.
    Aborted,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopState::Stopped | LoopState::Aborted)
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopState::Idle => "idle",
            LoopState::Capturing => "capturing",
            LoopState::Detecting => "detecting",
            LoopState::Planning => "planning",
            LoopState::Validating => "validating",
            LoopState::Executing => "executing",
            LoopState::UpdatingMemory => "updating memory",
            LoopState::Stopped => "stopped",
            LoopState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// How an iteration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    /// Every step of an executable plan ran.
    Completed,
    /// The plan was a bare no-op: nothing left to do.
    Idle,
    CaptureFailed,
    /// Detection produced nothing usable.
    DetectionFailed,
    /// Validation failed; nothing was executed.
    Rejected,
    /// A step failed; later steps were skipped.
    ExecutionFailed,
    /// Stop signal during planning or execution.
    Cancelled,
    /// Stop instruction, or the loop was already stopped.
    Stopped,
    /// Fail-safe tripped.
    Aborted,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Completed => "completed",
            OutcomeKind::Idle => "idle",
            OutcomeKind::CaptureFailed => "capture_failed",
            OutcomeKind::DetectionFailed => "detection_failed",
            OutcomeKind::Rejected => "rejected",
            OutcomeKind::ExecutionFailed => "execution_failed",
            OutcomeKind::Cancelled => "cancelled",
            OutcomeKind::Stopped => "stopped",
            OutcomeKind::Aborted => "aborted",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OutcomeKind::Completed | OutcomeKind::Idle)
    }

    fn importance(&self) -> f64 {
        match self {
            OutcomeKind::Idle | OutcomeKind::Stopped => 0.3,
            OutcomeKind::Completed => 0.6,
            _ => 0.9,
        }
    }
}

/// Human-readable record of one pass through the loop.
#[derive(Debug, Clone)]
pub struct IterationOutcome {
    pub iteration: usize,
    pub instruction: String,
    pub kind: OutcomeKind,
    pub plan: Option<ActionPlan>,
    /// Description of every step handed to the actuator, in order.
    pub attempted: Vec<String>,
    pub result: ExecutionResult,
    pub reason: Option<String>,
}

impl IterationOutcome {
    fn new(iteration: usize, instruction: &str, kind: OutcomeKind) -> Self {
        Self {
            iteration,
            instruction: instruction.to_string(),
            kind,
            plan: None,
            attempted: Vec::new(),
            result: ExecutionResult::default(),
            reason: None,
        }
    }

    fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn completed_steps(&self) -> usize {
        self.result.completed_steps
    }
}

impl fmt::Display for IterationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "iteration {} \"{}\": {}",
            self.iteration,
            self.instruction,
            self.kind.as_str()
        )?;
        if let Some(plan) = &self.plan {
            write!(f, ", {}/{} steps", self.result.completed_steps, plan.len())?;
        }
        if !self.attempted.is_empty() {
            write!(f, " [{}]", self.attempted.join(", "))?;
        }
        if let Some(reason) = &self.reason {
            write!(f, ": {}", reason)?;
        }
        Ok(())
    }
}

/// Result of [`ControlLoop::run`].
#[derive(Debug, Clone)]
pub struct RunReport {
    pub iterations: Vec<IterationOutcome>,
    pub final_state: LoopState,
    pub metrics: MetricsSnapshot,
}

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub max_iterations: usize,
    pub capture_timeout: Duration,
    pub detect_timeout: Duration,
    pub action_timeout: Duration,
    /// Constraints, safety checks and variables for every iteration.
    pub context: ExecutionContext,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            capture_timeout: Duration::from_secs(5),
            detect_timeout: Duration::from_secs(15),
            action_timeout: Duration::from_secs(10),
            context: ExecutionContext::default(),
        }
    }
}

impl LoopConfig {
    pub fn from_agent_config(config: &AgentConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            capture_timeout: config.timeouts.capture(),
            detect_timeout: config.timeouts.detect(),
            action_timeout: config.timeouts.action(),
            context: config.execution_context(),
        }
    }
}

/// One agent session.
///
/// `run` and `run_iteration` take `&mut self`, so a session never executes
/// two plans at once.
pub struct ControlLoop {
    detector: Detector,
    engine: ReasoningEngine,
    actuator: Actuator,
    config: LoopConfig,
    metrics: Arc<Metrics>,
    state: watch::Sender<LoopState>,
    stop: CancellationToken,
    iteration: usize,
    last_outcome: Option<IterationOutcome>,
}

impl ControlLoop {
    pub fn new(detector: Detector, engine: ReasoningEngine, actuator: Actuator) -> Self {
        let (state, _) = watch::channel(LoopState::Idle);
        let metrics = engine.metrics().clone();
        Self {
            detector,
            engine,
            actuator,
            config: LoopConfig::default(),
            metrics,
            state,
            stop: CancellationToken::new(),
            iteration: 0,
            last_outcome: None,
        }
    }

    pub fn with_config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    /// Wire up the command-line backends described by `config`.
    pub fn from_config(config: &AgentConfig) -> Result<Self, AgentError> {
        config.validate()?;

        let capture_dir = config
            .vision
            .capture_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("squid"));
        let element_detector: Arc<dyn ElementDetector> = match config.vision.backend {
            VisionBackend::Tesseract => {
                let mut tesseract = TesseractDetector::new();
                if let Some(lang) = &config.vision.lang {
                    tesseract = tesseract.with_lang(lang.clone());
                }
                Arc::new(tesseract)
            }
            VisionBackend::Remote => {
                let endpoint = config.vision.endpoint.clone().ok_or_else(|| {
                    AgentError::Config("remote vision backend needs vision.endpoint".to_string())
                })?;
                Arc::new(RemoteVisionDetector::new(
                    endpoint,
                    config.vision.api_key.clone(),
                ))
            }
        };
        let detector = Detector::new(Arc::new(GrimCapture::new(capture_dir)), element_detector);

        let provider = OpenAICompatibleProvider::with_timeout(
            config.planner.endpoint.clone(),
            config.planner.api_key.clone(),
            config.planner.model.clone(),
            config.timeouts.plan(),
        )
        .map_err(|e| AgentError::Config(format!("Cannot build planner client: {}", e)))?;
        let mut planner = ModelPlanner::new(Arc::new(provider));
        if let Some(prompt) = &config.planner.system_prompt {
            planner = planner.with_system_prompt(prompt.clone());
        }

        let memory = Arc::new(ContextManager::with_history_limit(
            config.memory_capacity,
            config.history_limit,
        ));
        let engine = ReasoningEngine::new(Arc::new(planner), memory)
            .with_validator(SafetyValidator::new(config.constraints.clone()))
            .with_plan_timeout(config.timeouts.plan())
            .with_recall_limit(config.recall_limit);

        let fail_safe = Arc::new(FailSafe::new(config.fail_safe));
        let actuator = Actuator::new(Arc::new(CommandInputDriver::new()), fail_safe)
            .with_timeout(config.timeouts.action());

        info!(
            "Agent '{}' using {} detection and planner model '{}'",
            config.id,
            detector.backend_name(),
            config.planner.model
        );
        Ok(Self::new(detector, engine, actuator).with_config(LoopConfig::from_agent_config(config)))
    }

    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    /// Receives every state transition.
    pub fn subscribe(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    /// Cancelling this token stops the loop, interrupting planning or
    /// execution in flight. A stopped loop stays stopped.
    pub fn stop_handle(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn fail_safe(&self) -> &Arc<FailSafe> {
        self.actuator.fail_safe()
    }

    pub fn memory(&self) -> &Arc<ContextManager> {
        self.engine.memory()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// The latest iteration, including one that ended in the fail-safe.
    pub fn last_outcome(&self) -> Option<&IterationOutcome> {
        self.last_outcome.as_ref()
    }

    fn set_state(&self, state: LoopState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Loop state: {} -> {}", previous, state);
        }
    }

    /// One pass: capture, detect, plan, validate, execute, remember.
    ///
    /// Only a tripped fail-safe is returned as an error; every other failure
    /// is reported in the outcome.
    pub async fn run_iteration(&mut self, instruction: &str) -> Result<IterationOutcome, AgentError> {
        self.iteration += 1;
        let iteration = self.iteration;
        let _timer = MetricTimer::new(Stage::Iteration);
        self.metrics.inc_iterations();
        increment_iterations();

        if let Some(reason) = self.fail_safe().reason() {
            let outcome = IterationOutcome::new(iteration, instruction, OutcomeKind::Aborted);
            return self.abort(outcome, reason);
        }
        if instruction.trim().eq_ignore_ascii_case(STOP_INSTRUCTION) {
            info!("Stop instruction received");
            self.stop.cancel();
        }
        if self.stop.is_cancelled() {
            let outcome = IterationOutcome::new(iteration, instruction, OutcomeKind::Stopped)
                .with_reason("loop stopped");
            return Ok(self.finish(outcome, LoopState::Stopped));
        }

        self.set_state(LoopState::Capturing);
        let image = {
            let _timer = MetricTimer::new(Stage::Capture);
            self.detector.capture_image(self.config.capture_timeout).await
        };
        let image = match image {
            Ok(image) => image,
            Err(e) => {
                warn!("Capture failed: {}", e);
                self.metrics.inc_detection_failures();
                let reason = AgentError::Capture(e.to_string()).to_string();
                let outcome = IterationOutcome::new(iteration, instruction, OutcomeKind::CaptureFailed)
                    .with_reason(reason);
                return Ok(self.finish(outcome, LoopState::Idle));
            }
        };

        self.set_state(LoopState::Detecting);
        let snapshot = {
            let _timer = MetricTimer::new(Stage::Detect);
            self.detector.snapshot(image, self.config.detect_timeout).await
        };
        if let Some(reason) = detection_failure(&snapshot) {
            self.metrics.inc_detection_failures();
            let reason = AgentError::Detection(reason).to_string();
            let outcome = IterationOutcome::new(iteration, instruction, OutcomeKind::DetectionFailed)
                .with_reason(reason);
            return Ok(self.finish(outcome, LoopState::Idle));
        }

        self.set_state(LoopState::Planning);
        let fail_safe_token = self.fail_safe().token();
        let planned = tokio::select! {
            biased;
            _ = fail_safe_token.cancelled() => None,
            result = self.engine.plan_action(
                instruction,
                &[],
                &snapshot,
                &self.config.context,
                &self.stop,
            ) => Some(result),
        };
        let plan = match planned {
            None => {
                let reason = self
                    .fail_safe()
                    .reason()
                    .unwrap_or_else(|| "fail-safe cancelled".to_string());
                self.record_trip();
                let outcome = IterationOutcome::new(iteration, instruction, OutcomeKind::Aborted);
                return self.abort(outcome, reason);
            }
            Some(Err(AgentError::Cancelled)) => {
                let outcome = IterationOutcome::new(iteration, instruction, OutcomeKind::Cancelled)
                    .with_reason("stopped during planning");
                return Ok(self.finish(outcome, LoopState::Stopped));
            }
            Some(Err(e)) => {
                // Not produced by plan_action today.
                let outcome = IterationOutcome::new(iteration, instruction, OutcomeKind::Rejected)
                    .with_reason(e.to_string());
                return Ok(self.finish(outcome, LoopState::Idle));
            }
            Some(Ok(plan)) => plan,
        };

        self.set_state(LoopState::Validating);
        if !plan.is_executable() {
            let issues = plan
                .validation()
                .map(|v| v.issues().to_vec())
                .unwrap_or_else(|| vec![format!("plan status is {:?}", plan.status())]);
            let mut outcome = IterationOutcome::new(iteration, instruction, OutcomeKind::Rejected)
                .with_reason(AgentError::ValidationFailure(issues).to_string());
            outcome.plan = Some(plan);
            return Ok(self.finish(outcome, LoopState::Idle));
        }

        self.set_state(LoopState::Executing);
        self.execute_plan(iteration, instruction, plan).await
    }

    async fn execute_plan(
        &mut self,
        iteration: usize,
        instruction: &str,
        plan: ActionPlan,
    ) -> Result<IterationOutcome, AgentError> {
        let started = Instant::now();
        let mut outcome = IterationOutcome::new(iteration, instruction, OutcomeKind::Completed);
        let mut next_state = LoopState::Idle;
        let mut fail_safe_reason = None;

        for (index, action) in plan.steps().iter().enumerate() {
            outcome.attempted.push(action.describe());
            let executed = {
                let _timer = MetricTimer::new(Stage::Action);
                tokio::select! {
                    biased;
                    _ = self.stop.cancelled() => None,
                    result = self.actuator.try_execute_with_timeout(action, self.config.action_timeout) => Some(result),
                }
            };

            match executed {
                None => {
                    info!("Stopped before step {} finished", index);
                    outcome.kind = OutcomeKind::Cancelled;
                    outcome.reason = Some(format!("stopped at step {}", index));
                    next_state = LoopState::Stopped;
                    break;
                }
                Some(Ok(())) => {
                    self.metrics.inc_actions_executed();
                    outcome.result.completed_steps += 1;
                    outcome
                        .result
                        .outputs
                        .insert(format!("step_{}", index), json!(action.describe()));
                }
                Some(Err(ExecutionError::FailSafe(reason))) => {
                    fail_safe_reason = Some(reason);
                    break;
                }
                Some(Err(e)) => {
                    self.metrics.inc_action_failures();
                    increment_action_failures();
                    let err = AgentError::Execution {
                        step: index,
                        reason: e.to_string(),
                    };
                    warn!("{}", err);
                    outcome.result.errors.push(err.to_string());
                    outcome.kind = OutcomeKind::ExecutionFailed;
                    outcome.reason = Some(err.to_string());
                    break;
                }
            }
        }

        outcome.result.success = outcome.kind == OutcomeKind::Completed;
        outcome.result.metrics.insert(
            "duration_ms".to_string(),
            started.elapsed().as_secs_f64() * 1000.0,
        );
        outcome
            .result
            .metrics
            .insert("planned_steps".to_string(), plan.len() as f64);
        if outcome.kind == OutcomeKind::Completed && plan.is_no_op() {
            outcome.kind = OutcomeKind::Idle;
            outcome.reason = Some(
                plan.notes()
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "nothing left to do".to_string()),
            );
        }
        outcome.plan = Some(plan);

        if let Some(reason) = fail_safe_reason {
            outcome.kind = OutcomeKind::Aborted;
            outcome.result.success = false;
            outcome.result.errors.push(format!("fail-safe: {}", reason));
            self.record_trip();
            return self.abort(outcome, reason);
        }
        Ok(self.finish(outcome, next_state))
    }

    /// Fold the outcome into memory and settle in `next_state`.
    fn finish(&mut self, outcome: IterationOutcome, next_state: LoopState) -> IterationOutcome {
        self.set_state(LoopState::UpdatingMemory);
        let memory = self.engine.memory();
        memory.remember(
            outcome.to_string(),
            Some(json!({
                "iteration": outcome.iteration,
                "kind": outcome.kind.as_str(),
                "completed_steps": outcome.result.completed_steps,
            })),
            outcome.kind.importance(),
        );
        memory.set_working_value("last_outcome", json!(outcome.kind.as_str()));
        memory.record_message("assistant", outcome.to_string());

        if outcome.kind.is_success() {
            info!("{}", outcome);
        } else {
            warn!("{}", outcome);
        }
        self.set_state(next_state);
        self.last_outcome = Some(outcome.clone());
        outcome
    }

    fn record_trip(&self) {
        self.metrics.inc_fail_safe_trips();
        increment_fail_safe_trips();
    }

    /// Settle in `Aborted`. Every later iteration ends here too.
    fn abort(
        &mut self,
        mut outcome: IterationOutcome,
        reason: String,
    ) -> Result<IterationOutcome, AgentError> {
        error!("Aborting: fail-safe triggered ({})", reason);
        outcome.kind = OutcomeKind::Aborted;
        outcome.reason = Some(reason.clone());
        self.finish(outcome, LoopState::Aborted);
        Err(AgentError::FailSafeTriggered(reason))
    }

    /// Iterate until nothing is left to do, the budget runs out, the loop is
    /// stopped or the fail-safe trips.
    pub async fn run(&mut self, instruction: &str) -> Result<RunReport, AgentError> {
        info!("Running instruction '{}'", instruction);
        self.engine.memory().record_message("user", instruction);

        let mut iterations = Vec::new();
        for _ in 0..self.config.max_iterations {
            let outcome = self.run_iteration(instruction).await?;
            let kind = outcome.kind;
            iterations.push(outcome);
            if matches!(
                kind,
                OutcomeKind::Idle | OutcomeKind::Stopped | OutcomeKind::Cancelled
            ) {
                break;
            }
        }
        if iterations.len() == self.config.max_iterations
            && iterations.last().map(|o| o.kind) != Some(OutcomeKind::Idle)
        {
            warn!(
                "Iteration budget of {} exhausted for '{}'",
                self.config.max_iterations, instruction
            );
        }

        Ok(RunReport {
            iterations,
            final_state: self.state(),
            metrics: self.metrics.snapshot(),
        })
    }
}

/// A snapshot with no elements and no text but detector diagnostics means
/// detection itself failed rather than the screen being empty.
fn detection_failure(snapshot: &ScreenSnapshot) -> Option<String> {
    if snapshot.elements().is_empty()
        && snapshot.text_map().is_empty()
        && !snapshot.diagnostics().is_empty()
    {
        return Some(snapshot.diagnostics().join("; "));
    }
    None
}
