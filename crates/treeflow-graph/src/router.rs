use serde::Serialize;
use tracing::{debug, info};

use treeflow_core::config::GuardPolicy;
use treeflow_core::error::{Result, TreeFlowError};
use treeflow_core::state::AgentState;
use treeflow_core::traits::ConditionEvaluator;
use treeflow_core::types::{CompletionVerdict, ConnectionId, InputId, InputType, OutputId, StepId};

use crate::flow::TreeFlow;

/// State key the router sets to the current verdict before evaluating
/// conditions, so authors can write `verdict == "FAILED"`.
pub const VERDICT_KEY: &str = "verdict";

/// A resolved hop from one step to the next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from_step: StepId,
    pub output: OutputId,
    pub connection: ConnectionId,
    pub input: InputId,
    pub to_step: StepId,
}

/// Why routing ended without a next step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum TerminalReason {
    /// The step declares no outputs.
    NoOutputs,
    /// No output's conditional matched.
    NoMatch,
    /// The matched output has no connection.
    Unwired { output: OutputId },
    /// The matched output's target input does not admit the verdict.
    GuardRejected {
        output: OutputId,
        input: InputId,
        guard: InputType,
        verdict: CompletionVerdict,
    },
    /// The matched output's connection targets an input that no longer exists.
    MissingTarget { connection: ConnectionId },
}

/// Result of resolving one routing decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RouteOutcome {
    Advance(Transition),
    Terminal(TerminalReason),
}

impl RouteOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RouteOutcome::Terminal(_))
    }

    /// The next step, if routing advanced.
    pub fn next_step(&self) -> Option<&StepId> {
        match self {
            RouteOutcome::Advance(t) => Some(&t.to_step),
            RouteOutcome::Terminal(_) => None,
        }
    }
}

/// Resolves the next step of a flow.
///
/// Outputs of the current step are tried in order and the first whose
/// conditional matches wins. Routing follows that output's connection and
/// checks the target input's completion guard. `destination_step` is
/// never consulted.
pub struct Router<'a> {
    flow: &'a TreeFlow,
    evaluator: &'a dyn ConditionEvaluator,
    policy: GuardPolicy,
}

impl<'a> Router<'a> {
    pub fn new(flow: &'a TreeFlow, evaluator: &'a dyn ConditionEvaluator) -> Self {
        Self {
            flow,
            evaluator,
            policy: GuardPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: GuardPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn flow(&self) -> &'a TreeFlow {
        self.flow
    }

    /// Decide where the agent goes after finishing `current`.
    ///
    /// Evaluator failures surface as errors; every "nowhere to go" case is
    /// a `Terminal` outcome.
    pub fn route(
        &self,
        current: &StepId,
        verdict: CompletionVerdict,
        state: &AgentState,
    ) -> Result<RouteOutcome> {
        let step = self
            .flow
            .step(current)
            .ok_or_else(|| TreeFlowError::StepNotFound(current.to_string()))?;

        if step.outputs().is_empty() {
            debug!(step = %step.name, "No outputs, path complete");
            return Ok(RouteOutcome::Terminal(TerminalReason::NoOutputs));
        }

        let mut scoped = state.clone();
        if let Some(previous) = scoped.get(VERDICT_KEY) {
            debug!(
                step = %step.name,
                previous = %previous,
                "Replacing agent value under reserved verdict key"
            );
        }
        scoped.set_str(VERDICT_KEY, verdict.as_str());

        let mut rejected = None;
        for output in step.outputs() {
            let matches = match output.condition() {
                None => true,
                Some(expr) => self.evaluator.evaluate(expr, &scoped)?,
            };
            if !matches {
                continue;
            }

            let Some(conn) = self.flow.connection_for_output(&output.id) else {
                debug!(step = %step.name, output = %output.name, "Matched output is unwired");
                return Ok(RouteOutcome::Terminal(TerminalReason::Unwired {
                    output: output.id.clone(),
                }));
            };
            let (Some(input), Some(target)) = (
                self.flow.find_input(&conn.target_input),
                self.flow.input_owner(&conn.target_input),
            ) else {
                return Ok(RouteOutcome::Terminal(TerminalReason::MissingTarget {
                    connection: conn.id.clone(),
                }));
            };

            if !input.input_type.accepts(verdict) {
                debug!(
                    step = %step.name,
                    output = %output.name,
                    guard = %input.input_type,
                    verdict = %verdict,
                    "Input guard rejected verdict"
                );
                let reason = TerminalReason::GuardRejected {
                    output: output.id.clone(),
                    input: input.id.clone(),
                    guard: input.input_type,
                    verdict,
                };
                match self.policy {
                    GuardPolicy::Stop => return Ok(RouteOutcome::Terminal(reason)),
                    GuardPolicy::FallThrough => {
                        if rejected.is_none() {
                            rejected = Some(reason);
                        }
                        continue;
                    }
                }
            }

            info!(from = %step.name, to = %target.name, output = %output.name, "Routing to next step");
            return Ok(RouteOutcome::Advance(Transition {
                from_step: step.id().clone(),
                output: output.id.clone(),
                connection: conn.id.clone(),
                input: input.id.clone(),
                to_step: target.id().clone(),
            }));
        }

        debug!(step = %step.name, "No output conditions matched, path complete");
        Ok(RouteOutcome::Terminal(rejected.unwrap_or(TerminalReason::NoMatch)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::ExpressionEvaluator;
    use crate::edge::{StepInput, StepOutput};
    use crate::step::Step;

    struct Fixture {
        flow: TreeFlow,
        a: StepId,
        b: StepId,
        c: StepId,
    }

    /// A branches to B when `plan == "pro"`, otherwise to C.
    fn branching(b_guard: InputType) -> Fixture {
        let mut flow = TreeFlow::new("Branching", "1.0").unwrap();
        let a = flow.add_step(Step::new("A")).unwrap();
        let b = flow.add_step(Step::new("B")).unwrap();
        let c = flow.add_step(Step::new("C")).unwrap();

        let to_b = flow
            .add_output(&a, StepOutput::new("pro").with_conditional(r#"plan == "pro""#))
            .unwrap();
        let to_c = flow.add_output(&a, StepOutput::new("otherwise")).unwrap();
        let b_in = flow
            .add_input(&b, StepInput::new("from a").with_type(b_guard))
            .unwrap();
        let c_in = flow.add_input(&c, StepInput::any("from a")).unwrap();
        flow.connect(&to_b, &b_in).unwrap();
        flow.connect(&to_c, &c_in).unwrap();

        Fixture { flow, a, b, c }
    }

    fn pro() -> AgentState {
        let mut state = AgentState::new();
        state.set_str("plan", "pro");
        state
    }

    #[test]
    fn test_first_match_wins() {
        let fx = branching(InputType::Any);
        let router = Router::new(&fx.flow, &ExpressionEvaluator);

        let out = router
            .route(&fx.a, CompletionVerdict::FullyCompleted, &pro())
            .unwrap();
        assert_eq!(out.next_step(), Some(&fx.b));

        let out = router
            .route(&fx.a, CompletionVerdict::FullyCompleted, &AgentState::new())
            .unwrap();
        assert_eq!(out.next_step(), Some(&fx.c));
    }

    #[test]
    fn test_guard_falls_through_by_default() {
        let fx = branching(InputType::FullyCompleted);
        let router = Router::new(&fx.flow, &ExpressionEvaluator);

        let out = router
            .route(&fx.a, CompletionVerdict::Partial, &pro())
            .unwrap();
        assert_eq!(out.next_step(), Some(&fx.c));
    }

    #[test]
    fn test_guard_stop_policy() {
        let fx = branching(InputType::FullyCompleted);
        let router = Router::new(&fx.flow, &ExpressionEvaluator).with_policy(GuardPolicy::Stop);

        let out = router
            .route(&fx.a, CompletionVerdict::Failed, &pro())
            .unwrap();
        match out {
            RouteOutcome::Terminal(TerminalReason::GuardRejected { guard, verdict, .. }) => {
                assert_eq!(guard, InputType::FullyCompleted);
                assert_eq!(verdict, CompletionVerdict::Failed);
            }
            other => panic!("expected guard rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_failed_guard_admits_only_failures() {
        let fx = branching(InputType::Failed);
        let router = Router::new(&fx.flow, &ExpressionEvaluator);

        let failed = router.route(&fx.a, CompletionVerdict::Failed, &pro()).unwrap();
        assert_eq!(failed.next_step(), Some(&fx.b));
        let completed = router
            .route(&fx.a, CompletionVerdict::FullyCompleted, &pro())
            .unwrap();
        assert_eq!(completed.next_step(), Some(&fx.c));
    }

    #[test]
    fn test_leaf_step_is_terminal() {
        let fx = branching(InputType::Any);
        let router = Router::new(&fx.flow, &ExpressionEvaluator);
        let out = router
            .route(&fx.b, CompletionVerdict::FullyCompleted, &AgentState::new())
            .unwrap();
        assert_eq!(out, RouteOutcome::Terminal(TerminalReason::NoOutputs));
    }

    #[test]
    fn test_unwired_match_is_terminal() {
        let mut flow = TreeFlow::new("Unwired", "1.0").unwrap();
        let a = flow.add_step(Step::new("A")).unwrap();
        let b = flow.add_step(Step::new("B")).unwrap();
        // Destination hint alone never routes.
        let out = flow
            .add_output(&a, StepOutput::new("hint only").with_destination(b))
            .unwrap();

        let router = Router::new(&flow, &ExpressionEvaluator);
        let result = router
            .route(&a, CompletionVerdict::FullyCompleted, &AgentState::new())
            .unwrap();
        assert_eq!(result, RouteOutcome::Terminal(TerminalReason::Unwired { output: out }));
    }

    #[test]
    fn test_verdict_visible_to_conditions() {
        let mut flow = TreeFlow::new("Verdict", "1.0").unwrap();
        let a = flow.add_step(Step::new("A")).unwrap();
        let b = flow.add_step(Step::new("B")).unwrap();
        let out = flow
            .add_output(&a, StepOutput::new("retry").with_conditional(r#"verdict == "PARTIAL""#))
            .unwrap();
        let input = flow.add_input(&b, StepInput::any("retry")).unwrap();
        flow.connect(&out, &input).unwrap();

        let router = Router::new(&flow, &ExpressionEvaluator);
        let partial = router
            .route(&a, CompletionVerdict::Partial, &AgentState::new())
            .unwrap();
        assert_eq!(partial.next_step(), Some(&b));
        let done = router
            .route(&a, CompletionVerdict::FullyCompleted, &AgentState::new())
            .unwrap();
        assert_eq!(done, RouteOutcome::Terminal(TerminalReason::NoMatch));
    }

    #[test]
    fn test_evaluator_error_propagates() {
        let mut flow = TreeFlow::new("Free text", "1.0").unwrap();
        let a = flow.add_step(Step::new("A")).unwrap();
        flow.add_output(&a, StepOutput::new("vibes").with_conditional("the user seems happy"))
            .unwrap();

        let router = Router::new(&flow, &ExpressionEvaluator);
        let err = router
            .route(&a, CompletionVerdict::FullyCompleted, &AgentState::new())
            .unwrap_err();
        assert!(matches!(err, TreeFlowError::Condition { .. }));
    }

    #[test]
    fn test_unknown_step() {
        let fx = branching(InputType::Any);
        let router = Router::new(&fx.flow, &ExpressionEvaluator);
        assert!(matches!(
            router.route(&StepId::new(), CompletionVerdict::Failed, &AgentState::new()),
            Err(TreeFlowError::StepNotFound(_))
        ));
    }

    #[test]
    fn test_verdict_key_overrides_agent_value() {
        let mut flow = TreeFlow::new("Verdicts", "1.0").unwrap();
        let a = flow.add_step(Step::new("A")).unwrap();
        let b = flow.add_step(Step::new("B")).unwrap();
        let out = flow
            .add_output(&a, StepOutput::new("failed").with_conditional(r#"verdict == "FAILED""#))
            .unwrap();
        let b_in = flow.add_input(&b, StepInput::any("from a")).unwrap();
        flow.connect(&out, &b_in).unwrap();

        let mut state = AgentState::new();
        state.set_str(VERDICT_KEY, "FAILED");
        let evaluator = ExpressionEvaluator::new();
        let router = Router::new(&flow, &evaluator);

        let outcome = router
            .route(&a, CompletionVerdict::FullyCompleted, &state)
            .unwrap();
        assert!(matches!(outcome, RouteOutcome::Terminal(TerminalReason::NoMatch)));
        assert_eq!(state.get_str(VERDICT_KEY), Some("FAILED"));

        let outcome = router.route(&a, CompletionVerdict::Failed, &state).unwrap();
        assert_eq!(outcome.next_step(), Some(&b));
    }
}
