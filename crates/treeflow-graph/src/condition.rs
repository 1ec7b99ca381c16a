use treeflow_core::error::{Result, TreeFlowError};
use treeflow_core::state::AgentState;
use treeflow_core::traits::ConditionEvaluator;

/// Minimal evaluator for authored conditions.
///
/// Supported expressions:
/// - `key == "value"`: exact match
/// - `key != "value"`: not equal (a missing key never matches)
/// - `key contains "substr"`: substring match
/// - `key`: the key holds a truthy value
/// - `!key`: the key is missing or falsy
///
/// Non-string values are compared through their JSON rendering, so
/// `seats == 3` and `confirmed == true` work. Anything else is an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionEvaluator;

impl ExpressionEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl ConditionEvaluator for ExpressionEvaluator {
    fn evaluate(&self, expr: &str, state: &AgentState) -> Result<bool> {
        let expr = expr.trim();

        // key contains "value"
        if let Some((key, substr)) = parse_operator(expr, " contains ") {
            return Ok(value_text(state, key).is_some_and(|s| s.contains(substr)));
        }

        // key != "value"
        if let Some((key, value)) = parse_operator(expr, "!=") {
            return Ok(value_text(state, key).is_some_and(|s| s != value));
        }

        // key == "value"
        if let Some((key, value)) = parse_operator(expr, "==") {
            return Ok(value_text(state, key).is_some_and(|s| s == value));
        }

        if let Some(key) = expr.strip_prefix('!') {
            let key = key.trim();
            if is_identifier(key) {
                return Ok(!state.is_truthy(key));
            }
        } else if is_identifier(expr) {
            return Ok(state.is_truthy(expr));
        }

        Err(TreeFlowError::Condition {
            expr: expr.to_string(),
            message: "unsupported expression".to_string(),
        })
    }
}

/// Parse `key OP "value"` expressions, returning (key, value).
fn parse_operator<'a>(expr: &'a str, op: &str) -> Option<(&'a str, &'a str)> {
    let (key, val) = expr.split_once(op)?;
    let key = key.trim();
    if !is_identifier(key) {
        return None;
    }
    let val = val.trim().trim_matches('"');
    Some((key, val))
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
}

fn value_text(state: &AgentState, key: &str) -> Option<String> {
    match state.get(key)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}
