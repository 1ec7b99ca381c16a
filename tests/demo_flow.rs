use treeflow_core::{AgentState, CompletionVerdict, StepId};
use treeflow_graph::{validate, RouteOutcome, Router, TerminalReason, Traversal, TreeFlow};
use treeflow_graph::ExpressionEvaluator;

fn demo() -> TreeFlow {
    let json = std::fs::read_to_string(concat!(env!("CARGO_MANIFEST_DIR"), "/demos/onboarding.json"))
        .expect("read demo flow");
    TreeFlow::from_json(&json).expect("parse demo flow")
}

#[test]
fn test_demo_flow_is_valid() {
    let flow = demo();
    let report = validate(&flow);
    assert!(report.is_clean(), "{:?}", report.issues);
    assert_eq!(flow.entry_step().unwrap().slug, "welcome");
}

#[test]
fn test_demo_routes_by_state() {
    let flow = demo();
    let eval = ExpressionEvaluator::new();
    let router = Router::new(&flow, &eval);
    let welcome = StepId::from_str("step-welcome");

    let mut state = AgentState::new();
    state.set_assignment("confirmed=true").unwrap();
    let outcome = router
        .route(&welcome, CompletionVerdict::FullyCompleted, &state)
        .unwrap();
    assert_eq!(outcome.next_step(), Some(&StepId::from_str("step-plan")));

    // Billing help only admits fully completed upstream steps; with the
    // default policy the router falls through to "retry", which is unwired.
    let mut state = AgentState::new();
    state.set_assignment("topic=billing").unwrap();
    let outcome = router.route(&welcome, CompletionVerdict::Partial, &state).unwrap();
    assert!(matches!(
        outcome,
        RouteOutcome::Terminal(TerminalReason::Unwired { .. })
    ));
}

#[test]
fn test_demo_walk_to_wrap_up() {
    let flow = demo();
    let eval = ExpressionEvaluator::new();
    let config = treeflow_core::config::RoutingConfig::default();
    let mut traversal = Traversal::start(&flow, &eval, &config).unwrap();

    let mut state = AgentState::new();
    state.set_assignment("confirmed=true").unwrap();
    traversal.advance(CompletionVerdict::FullyCompleted, &state).unwrap();
    traversal.advance(CompletionVerdict::FullyCompleted, &state).unwrap();
    let last = traversal.advance(CompletionVerdict::FullyCompleted, &state).unwrap();

    assert_eq!(last, RouteOutcome::Terminal(TerminalReason::NoOutputs));
    let slugs: Vec<&str> = traversal
        .path()
        .into_iter()
        .filter_map(|id| flow.step(id))
        .map(|s| s.slug.as_str())
        .collect();
    assert_eq!(slugs, vec!["welcome", "pick-a-plan", "wrap-up"]);
}

#[test]
fn test_demo_guidance() {
    let flow = demo();
    let text = flow.step_by_slug("welcome").unwrap().render_guidance();
    assert!(text.contains("- Email (importance 9/10): A deliverable email address"));
    assert!(text.contains("Good: Is jane@acme.io still the best address to reach you?"));
    assert!(text.contains("Avoid: Give me your email."));
}
