#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use proptest::prelude::*;
use squid_core::{Action, ActionPlan, ExecutionContext, ValidationStatus};
use squid_policy::SafetyValidator;

fn arb_action() -> impl Strategy<Value = Action> {
    prop_oneof![
        (-50i32..2000, -50i32..1200).prop_map(|(x, y)| Action::click(x, y)),
        (-50i32..2000, -50i32..1200).prop_map(|(x, y)| Action::move_to(x, y)),
        "[a-z ]{0,12}".prop_map(Action::type_text),
        Just(Action::no_op()),
    ]
    .prop_flat_map(|action| (Just(action), 0.0f64..=1.0))
    .prop_map(|(action, confidence)| action.with_confidence(confidence))
}

fn arb_constraints() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(
        prop_oneof![
            Just("deny_action:type".to_string()),
            Just("deny_region:0,0,100,100".to_string()),
            Just("allow_region:0,0,1920,1080".to_string()),
            Just("min_confidence:0.3".to_string()),
            Just("warn_confidence:0.7".to_string()),
            Just("max_text_len:8".to_string()),
            Just("deny_text:rm".to_string()),
            Just("waive:deny_action".to_string()),
            Just("gibberish".to_string()),
        ],
        0..4,
    )
}

proptest! {
    #[test]
    fn plan_fails_iff_some_step_fails(
        steps in prop::collection::vec(arb_action(), 0..6),
        constraints in arb_constraints(),
    ) {
        let validator = SafetyValidator::default();
        let ctx = ExecutionContext::new(constraints, Vec::new());

        let mut plan = ActionPlan::new("prop");
        for step in &steps {
            plan.add_step(step.clone());
        }

        let step_results: Vec<_> = steps.iter().map(|s| validator.validate_action(s, &ctx)).collect();
        let result = validator.validate_plan(&mut plan, &ctx);

        let any_failed = step_results.iter().any(|r| r.status() == ValidationStatus::Failed);
        let any_warned = step_results.iter().any(|r| r.status() == ValidationStatus::Warning);

        prop_assert_eq!(result.status() == ValidationStatus::Failed, any_failed);
        prop_assert_eq!(
            result.status() == ValidationStatus::Warning,
            !any_failed && any_warned
        );
        prop_assert_eq!(plan.status(), result.status());
        prop_assert_eq!(plan.is_executable(), !any_failed);
    }

    #[test]
    fn every_blocking_issue_quotes_its_source(
        action in arb_action(),
        constraints in arb_constraints(),
    ) {
        let validator = SafetyValidator::default();
        let ctx = ExecutionContext::new(constraints.clone(), Vec::new());
        let result = validator.validate_action(&action, &ctx);

        for issue in result.issues() {
            let quoted = constraints.iter().any(|c| issue.contains(c.as_str()))
                || issue.contains("safety check");
            prop_assert!(quoted, "issue does not name its rule: {}", issue);
        }
    }
}
