use treeflow_core::types::{ConnectionId, InputId, OutputId, StepId};
use treeflow_graph::{Step, StepInput, StepOutput, StepQuestion, TreeFlow};

pub const USER_CONFIRMED: &str = "user confirmed";
pub const USER_RETRY: &str = "user asked to retry";

/// The "Onboarding v1" flow and the ids tests need to poke at it.
pub struct OnboardingFlow {
    pub flow: TreeFlow,
    pub a: StepId,
    pub b: StepId,
    pub c: StepId,
    /// A's "success" output, wired to `b_input`.
    pub success: OutputId,
    /// A's "retry" output, unwired and without destination.
    pub retry: OutputId,
    pub b_input: InputId,
    pub connection: ConnectionId,
}

/// Steps A (first), B and C. A."success" (`user confirmed`) is wired to an
/// `ANY` input on B; A."retry" (`user asked to retry`) goes nowhere.
pub fn onboarding_v1() -> OnboardingFlow {
    let mut flow = TreeFlow::new("Onboarding", "1.0").unwrap();

    let a = flow
        .add_step(
            Step::new("A")
                .as_first()
                .with_objective("Confirm the account details")
                .with_question(StepQuestion::new("Email").with_importance(9)),
        )
        .unwrap();
    let b = flow
        .add_step(Step::new("B").with_objective("Pick a plan"))
        .unwrap();
    let c = flow.add_step(Step::new("C")).unwrap();

    let success = flow
        .add_output(&a, StepOutput::new("success").with_conditional(USER_CONFIRMED))
        .unwrap();
    let retry = flow
        .add_output(&a, StepOutput::new("retry").with_conditional(USER_RETRY))
        .unwrap();
    let b_input = flow
        .add_input(&b, StepInput::any("from A").with_source(a.clone()))
        .unwrap();
    let connection = flow.connect(&success, &b_input).unwrap();

    OnboardingFlow {
        flow,
        a,
        b,
        c,
        success,
        retry,
        b_input,
        connection,
    }
}
