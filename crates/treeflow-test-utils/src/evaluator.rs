use std::collections::HashMap;
use std::sync::Mutex;

use treeflow_core::error::{Result, TreeFlowError};
use treeflow_core::state::AgentState;
use treeflow_core::traits::ConditionEvaluator;

/// Evaluator with canned answers for free-text conditions.
///
/// Unknown expressions evaluate to `false`, or to an error when built with
/// [`ScriptedEvaluator::strict`]. Every evaluated expression is recorded.
#[derive(Default)]
pub struct ScriptedEvaluator {
    answers: Mutex<HashMap<String, bool>>,
    calls: Mutex<Vec<String>>,
    strict: bool,
}

impl ScriptedEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail on expressions without a scripted answer.
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }

    pub fn with(self, expr: impl Into<String>, answer: bool) -> Self {
        self.set(expr, answer);
        self
    }

    pub fn set(&self, expr: impl Into<String>, answer: bool) {
        self.answers.lock().unwrap().insert(expr.into(), answer);
    }

    /// Expressions evaluated so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl ConditionEvaluator for ScriptedEvaluator {
    fn evaluate(&self, expr: &str, _state: &AgentState) -> Result<bool> {
        self.calls.lock().unwrap().push(expr.to_string());
        match self.answers.lock().unwrap().get(expr) {
            Some(answer) => Ok(*answer),
            None if self.strict => Err(TreeFlowError::Condition {
                expr: expr.to_string(),
                message: "no scripted answer".to_string(),
            }),
            None => Ok(false),
        }
    }
}
