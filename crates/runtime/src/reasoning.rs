//! Reasoning engine: planner calls in, validated action plan out.

use crate::metrics::{increment_plans_rejected, MetricTimer, Stage};
use squid_core::{Action, ActionPlan, AgentError, ExecutionContext, Metrics, ScreenSnapshot};
use squid_memory::ContextManager;
use squid_policy::SafetyValidator;
use squid_providers::{Planner, PlanningContext};
use squid_tools::{CenterPoint, CoordinateMapper, FunctionRegistry, ResolveContext};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_PLAN_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_RECALL_LIMIT: usize = 5;
const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Turns an instruction and the current screen into a validated plan.
///
/// The planner only ever proposes calls. Each call is resolved against the
/// function registry, so the plan can contain nothing the registry does not
/// define, and every plan leaves through the safety validator.
pub struct ReasoningEngine {
    planner: Arc<dyn Planner>,
    registry: Arc<FunctionRegistry>,
    memory: Arc<ContextManager>,
    validator: SafetyValidator,
    mapper: Arc<dyn CoordinateMapper>,
    metrics: Arc<Metrics>,
    plan_timeout: Duration,
    recall_limit: usize,
    history_limit: usize,
}

impl ReasoningEngine {
    /// Desktop registry, no base constraints, centre-point targeting.
    pub fn new(planner: Arc<dyn Planner>, memory: Arc<ContextManager>) -> Self {
        Self {
            planner,
            registry: Arc::new(FunctionRegistry::desktop()),
            memory,
            validator: SafetyValidator::default(),
            mapper: Arc::new(CenterPoint),
            metrics: Metrics::new(),
            plan_timeout: DEFAULT_PLAN_TIMEOUT,
            recall_limit: DEFAULT_RECALL_LIMIT,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    pub fn with_registry(mut self, registry: Arc<FunctionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_validator(mut self, validator: SafetyValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_mapper(mut self, mapper: Arc<dyn CoordinateMapper>) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_plan_timeout(mut self, limit: Duration) -> Self {
        self.plan_timeout = limit;
        self
    }

    pub fn with_recall_limit(mut self, limit: usize) -> Self {
        self.recall_limit = limit;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn memory(&self) -> &Arc<ContextManager> {
        &self.memory
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn validator(&self) -> &SafetyValidator {
        &self.validator
    }

    pub fn planner_name(&self) -> &str {
        self.planner.name()
    }

    /// What the planner is shown for `goal` on this screen.
    pub fn planning_context(
        &self,
        goal: &str,
        constraints: &[String],
        snapshot: &ScreenSnapshot,
    ) -> PlanningContext {
        let mut all_constraints = self.validator.base_constraints().to_vec();
        merge_into(&mut all_constraints, constraints);

        let mut summary = snapshot.summary();
        for diagnostic in snapshot.diagnostics() {
            summary.push_str(&format!("(detector: {})\n", diagnostic));
        }

        PlanningContext {
            instruction: goal.to_string(),
            functions: self.registry.schemas(),
            snapshot_summary: summary,
            recalled: self.memory.recall(goal, self.recall_limit),
            working_memory: self.memory.working_memory(),
            constraints: all_constraints,
            history: self.memory.recent_history(self.history_limit),
        }
    }

    /// Ask the planner for calls and turn them into a validated plan.
    ///
    /// Planner errors and timeouts degrade to a no-op plan carrying a note.
    /// Calls the registry cannot resolve are dropped and recorded on the
    /// plan. Only cancellation is an error.
    pub async fn plan_action(
        &self,
        goal: &str,
        constraints: &[String],
        snapshot: &ScreenSnapshot,
        context: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<ActionPlan, AgentError> {
        let mut context = context.clone();
        merge_into(&mut context.constraints, constraints);

        let planning = self.planning_context(goal, &context.constraints, snapshot);
        self.metrics.inc_planner_requests();
        debug!(
            "Asking planner '{}' about '{}' ({} functions)",
            self.planner.name(),
            goal,
            planning.functions.len()
        );

        let timer = MetricTimer::new(Stage::Plan);
        let proposed = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Planning for '{}' cancelled", goal);
                return Err(AgentError::Cancelled);
            }
            result = timeout(self.plan_timeout, self.planner.propose(&planning)) => result,
        };
        drop(timer);

        let mut plan = ActionPlan::new(goal);
        let calls = match proposed {
            Ok(Ok(calls)) => calls,
            Ok(Err(e)) => {
                self.planner_failed(&mut plan, AgentError::Planning(e.to_string()));
                Vec::new()
            }
            Err(_) => {
                self.planner_failed(
                    &mut plan,
                    AgentError::Planning(format!(
                        "planner timed out after {}ms",
                        self.plan_timeout.as_millis()
                    )),
                );
                Vec::new()
            }
        };

        // Later calls in the same plan see what earlier calls remembered.
        let mut working = self.memory.working_memory();
        for call in &calls {
            let resolved = {
                let ctx = ResolveContext {
                    snapshot,
                    working_memory: &working,
                    mapper: self.mapper.as_ref(),
                };
                self.registry.resolve(call, &ctx)
            };
            match resolved {
                Ok(resolution) => {
                    for (key, value) in &resolution.memory {
                        working.insert(key.clone(), value.clone());
                    }
                    if !resolution.memory.is_empty() {
                        self.memory.update_working_memory(resolution.memory);
                    }
                    plan.add_step(resolution.action);
                }
                Err(e) => {
                    warn!("Dropping planner call '{}': {}", call.name, e);
                    plan.record_dropped(call.name.clone(), e.to_string());
                }
            }
        }

        if plan.is_empty() {
            plan.add_step(Action::no_op());
        }

        let verdict = self.validator.validate_plan(&mut plan, &context);
        if verdict.is_blocking() {
            self.metrics.inc_plans_rejected();
            increment_plans_rejected();
            warn!(
                "Plan for '{}' rejected: {}",
                goal,
                verdict.issues().join("; ")
            );
        } else {
            info!(
                "Plan for '{}': {} step(s), {} dropped, status {:?}",
                goal,
                plan.len(),
                plan.dropped_calls().len(),
                plan.status()
            );
        }
        Ok(plan)
    }

    fn planner_failed(&self, plan: &mut ActionPlan, error: AgentError) {
        self.metrics.inc_planner_failures();
        warn!("{}; falling back to no-op", error);
        plan.add_note(error.to_string());
    }
}

fn merge_into(target: &mut Vec<String>, extra: &[String]) {
    for item in extra {
        if !target.contains(item) {
            target.push(item.clone());
        }
    }
}
