use crate::error::Result;
use crate::state::AgentState;

/// Condition evaluator: decides whether a step output's conditional
/// matches the agent's current state.
///
/// Condition strings are free text authored on the canvas; how they are
/// interpreted belongs to the agent-execution side. Implementations return
/// an error for expressions they cannot interpret rather than guessing.
pub trait ConditionEvaluator: Send + Sync {
    fn evaluate(&self, expr: &str, state: &AgentState) -> Result<bool>;
}

impl<F> ConditionEvaluator for F
where
    F: Fn(&str, &AgentState) -> Result<bool> + Send + Sync,
{
    fn evaluate(&self, expr: &str, state: &AgentState) -> Result<bool> {
        self(expr, state)
    }
}
