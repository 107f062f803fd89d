use crate::types::Action;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Pending,
    Passed,
    Failed,
    Warning,
}

/// Verdict of one validation call. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationResult {
    status: ValidationStatus,
    issues: Vec<String>,
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<serde_json::Value>,
}

impl ValidationResult {
    /// Status is derived: any issue fails, else any warning warns, else passes.
    pub fn from_findings(
        issues: Vec<String>,
        warnings: Vec<String>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        let status = if !issues.is_empty() {
            ValidationStatus::Failed
        } else if !warnings.is_empty() {
            ValidationStatus::Warning
        } else {
            ValidationStatus::Passed
        };
        Self {
            status,
            issues,
            warnings,
            metadata,
        }
    }

    pub fn status(&self) -> ValidationStatus {
        self.status
    }

    pub fn issues(&self) -> &[String] {
        &self.issues
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn metadata(&self) -> Option<&serde_json::Value> {
        self.metadata.as_ref()
    }

    pub fn is_blocking(&self) -> bool {
        self.status == ValidationStatus::Failed
    }
}

/// A planner call that could not become an action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DroppedCall {
    pub name: String,
    pub reason: String,
}

/// Ordered actions produced by one planning cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionPlan {
    pub goal: String,
    steps: Vec<Action>,
    status: ValidationStatus,
    confidence_scores: Vec<f64>,
    dropped_calls: Vec<DroppedCall>,
    #[serde(default)]
    notes: Vec<String>,
    validation: Option<ValidationResult>,
}

impl ActionPlan {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            steps: Vec::new(),
            status: ValidationStatus::Pending,
            confidence_scores: Vec::new(),
            dropped_calls: Vec::new(),
            notes: Vec::new(),
            validation: None,
        }
    }

    pub fn no_op(goal: impl Into<String>) -> Self {
        let mut plan = Self::new(goal);
        plan.add_step(Action::no_op());
        plan
    }

    /// Appending to a plan invalidates any earlier verdict.
    pub fn add_step(&mut self, action: Action) {
        self.confidence_scores.push(action.confidence);
        self.steps.push(action);
        self.status = ValidationStatus::Pending;
        self.validation = None;
    }

    pub fn record_dropped(&mut self, name: impl Into<String>, reason: impl Into<String>) {
        self.dropped_calls.push(DroppedCall {
            name: name.into(),
            reason: reason.into(),
        });
    }

    /// Free-form remarks from planning, e.g. why the plan is a no-op.
    pub fn add_note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    /// Records a plan-level verdict. Called by the safety validator.
    pub fn apply_validation(&mut self, result: ValidationResult) {
        self.status = result.status();
        self.validation = Some(result);
    }

    pub fn steps(&self) -> &[Action] {
        &self.steps
    }

    pub fn status(&self) -> ValidationStatus {
        self.status
    }

    pub fn confidence_scores(&self) -> &[f64] {
        &self.confidence_scores
    }

    pub fn dropped_calls(&self) -> &[DroppedCall] {
        &self.dropped_calls
    }

    pub fn validation(&self) -> Option<&ValidationResult> {
        self.validation.as_ref()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Only passed or warning plans may be handed to the actuator.
    pub fn is_executable(&self) -> bool {
        matches!(
            self.status,
            ValidationStatus::Passed | ValidationStatus::Warning
        )
    }

    pub fn is_no_op(&self) -> bool {
        self.steps.len() == 1 && self.steps[0].is_no_op()
    }

    pub fn overall_confidence(&self) -> f64 {
        if self.confidence_scores.is_empty() {
            return 0.0;
        }
        self.confidence_scores.iter().sum::<f64>() / self.confidence_scores.len() as f64
    }
}
