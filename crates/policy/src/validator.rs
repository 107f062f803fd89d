use crate::constraints::{Constraint, SafetyCheck};
use serde_json::json;
use squid_core::{Action, ActionName, ActionPlan, ExecutionContext, ValidationResult};
use std::collections::HashSet;

const LOW_CONFIDENCE: f64 = 0.5;

/// Checks actions and plans against constraints and built-in safety checks.
///
/// Validation is pure: the only side effect is the status written back into a
/// plan by [`validate_plan`](Self::validate_plan).
pub struct SafetyValidator {
    base_constraints: Vec<String>,
}

impl SafetyValidator {
    pub fn new(base_constraints: Vec<String>) -> Self {
        Self { base_constraints }
    }

    pub fn base_constraints(&self) -> &[String] {
        &self.base_constraints
    }

    pub fn validate_action(&self, action: &Action, context: &ExecutionContext) -> ValidationResult {
        let mut findings = Findings::default();
        let constraints = self.collect_constraints(context, &mut findings);
        let checks = selected_checks(context, &mut findings);

        let waived: HashSet<String> = constraints
            .iter()
            .filter_map(|(_, c)| match c {
                Constraint::Waive(rule) => Some(rule.clone()),
                _ => None,
            })
            .collect();
        findings.waived = waived;

        for check in &checks {
            run_check(*check, action, context, &mut findings);
        }
        for (raw, constraint) in &constraints {
            apply_constraint(raw, constraint, action, &mut findings);
        }

        let metadata = json!({
            "action": action.name.as_str(),
            "constraints_evaluated": constraints.len(),
            "checks": checks.iter().map(|c| c.id()).collect::<Vec<_>>(),
        });
        ValidationResult::from_findings(findings.issues, findings.warnings, Some(metadata))
    }

    /// Validate every step and write the resulting status into the plan.
    ///
    /// The plan fails if any step fails, warns if any step warns, and passes
    /// otherwise. An empty plan passes.
    pub fn validate_plan(&self, plan: &mut ActionPlan, context: &ExecutionContext) -> ValidationResult {
        let mut issues = Vec::new();
        let mut warnings = Vec::new();
        let mut failed_steps = Vec::new();

        for (index, action) in plan.steps().iter().enumerate() {
            let result = self.validate_action(action, context);
            if result.is_blocking() {
                failed_steps.push(index);
            }
            issues.extend(result.issues().iter().map(|i| format!("step {}: {}", index, i)));
            warnings.extend(
                result
                    .warnings()
                    .iter()
                    .map(|w| format!("step {}: {}", index, w)),
            );
        }

        let metadata = json!({
            "steps": plan.len(),
            "failed_steps": failed_steps,
        });
        let result = ValidationResult::from_findings(issues, warnings, Some(metadata));

        if result.is_blocking() {
            tracing::warn!(
                "Plan '{}' rejected: {}",
                plan.goal,
                result.issues().join("; ")
            );
        } else {
            tracing::debug!(
                "Plan '{}' validated: {:?} ({} steps)",
                plan.goal,
                result.status(),
                plan.len()
            );
        }

        plan.apply_validation(result.clone());
        result
    }

    fn collect_constraints(
        &self,
        context: &ExecutionContext,
        findings: &mut Findings,
    ) -> Vec<(String, Constraint)> {
        let mut parsed = Vec::new();
        for raw in self.base_constraints.iter().chain(context.constraints.iter()) {
            match Constraint::parse(raw) {
                Ok(constraint) => parsed.push((raw.clone(), constraint)),
                Err(e) => findings
                    .warnings
                    .push(format!("ignored constraint '{}': {}", raw, e)),
            }
        }
        parsed
    }
}

impl Default for SafetyValidator {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[derive(Default)]
struct Findings {
    issues: Vec<String>,
    warnings: Vec<String>,
    waived: HashSet<String>,
}

impl Findings {
    fn block(&mut self, rule: &str, message: String) {
        if self.waived.contains(rule) {
            self.warnings.push(format!("waived: {}", message));
        } else {
            self.issues.push(message);
        }
    }
}

fn selected_checks(context: &ExecutionContext, findings: &mut Findings) -> Vec<SafetyCheck> {
    if context.safety_checks.is_empty() {
        return SafetyCheck::ALL.to_vec();
    }

    let mut checks = Vec::new();
    for id in &context.safety_checks {
        match SafetyCheck::parse(id) {
            Some(check) if !checks.contains(&check) => checks.push(check),
            Some(_) => {}
            None => findings
                .warnings
                .push(format!("unknown safety check '{}'", id)),
        }
    }
    checks
}

fn run_check(check: SafetyCheck, action: &Action, context: &ExecutionContext, findings: &mut Findings) {
    let id = check.id();
    match check {
        SafetyCheck::Parameters => {
            if let Err(reason) = action.check_parameters() {
                findings.block(id, format!("safety check '{}' failed: {}", id, reason));
            }
        }
        SafetyCheck::Coordinates => {
            let Some(point) = action.point() else {
                return;
            };
            if point.x < 0 || point.y < 0 {
                findings.block(
                    id,
                    format!("safety check '{}' failed: {} is negative", id, point),
                );
            }
            let width = context.variable_i64("screen_width");
            let height = context.variable_i64("screen_height");
            let outside = width.is_some_and(|w| i64::from(point.x) >= w)
                || height.is_some_and(|h| i64::from(point.y) >= h);
            if outside {
                findings.block(
                    id,
                    format!("safety check '{}' failed: {} is off screen", id, point),
                );
            }
        }
        SafetyCheck::Text => {
            if let Some(text) = action.text() {
                if text.chars().any(|c| c.is_control() && c != '\n' && c != '\t') {
                    findings.block(
                        id,
                        format!("safety check '{}' failed: text contains control characters", id),
                    );
                }
            }
        }
        SafetyCheck::Confidence => {
            if action.confidence < LOW_CONFIDENCE {
                findings.warnings.push(format!(
                    "low confidence {:.2} for {}",
                    action.confidence,
                    action.describe()
                ));
            }
        }
    }
}

fn apply_constraint(raw: &str, constraint: &Constraint, action: &Action, findings: &mut Findings) {
    let kind = constraint.kind();
    let violated = |detail: String| format!("constraint '{}' violated: {}", raw, detail);

    match constraint {
        Constraint::DenyAction(name) => {
            if action.name == *name {
                findings.block(kind, violated(format!("{} is not permitted", name)));
            }
        }
        Constraint::DenyText(pattern) => {
            if matches!(action.name, ActionName::Type | ActionName::Read) {
                if let Some(text) = action.text() {
                    if text.to_lowercase().contains(pattern.as_str()) {
                        findings.block(kind, violated(format!("text contains '{}'", pattern)));
                    }
                }
            }
        }
        Constraint::AllowRegion(region) => {
            if let Some(point) = pointer_target(action) {
                if !region.contains(point) {
                    findings.block(kind, violated(format!("{} is outside the region", point)));
                }
            }
        }
        Constraint::DenyRegion(region) => {
            if let Some(point) = pointer_target(action) {
                if region.contains(point) {
                    findings.block(kind, violated(format!("{} is inside the region", point)));
                }
            }
        }
        Constraint::MinConfidence(min) => {
            if action.confidence < *min {
                findings.block(
                    kind,
                    violated(format!("confidence {:.2} below {:.2}", action.confidence, min)),
                );
            }
        }
        Constraint::WarnConfidence(min) => {
            if action.confidence < *min {
                findings.warnings.push(violated(format!(
                    "confidence {:.2} below {:.2}",
                    action.confidence, min
                )));
            }
        }
        Constraint::MaxTextLen(max) => {
            if action.name == ActionName::Type {
                let len = action.text().map(|t| t.chars().count()).unwrap_or(0);
                if len > *max {
                    findings.block(kind, violated(format!("text length {} exceeds {}", len, max)));
                }
            }
        }
        Constraint::MaxWaitMs(max) => {
            if action.name == ActionName::Wait {
                if let Some(duration) = action.duration() {
                    let ms = duration.as_millis();
                    if ms > u128::from(*max) {
                        findings.block(kind, violated(format!("wait {}ms exceeds {}ms", ms, max)));
                    }
                }
            }
        }
        Constraint::Waive(_) => {}
    }
}

fn pointer_target(action: &Action) -> Option<squid_core::Point> {
    match action.name {
        ActionName::Click | ActionName::Move => action.point(),
        _ => None,
    }
}
