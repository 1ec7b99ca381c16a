use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Values the agent produced while working through a flow.
///
/// Conditions on step outputs are evaluated against this map. Keys are
/// strings; values are JSON so the agent can record whatever it extracted.
///
/// The `verdict` key is reserved: while routing, it holds how the current
/// step ended and replaces any value the agent stored under that name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentState {
    data: HashMap<String, serde_json::Value>,
}

impl AgentState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the state with answers collected outside the flow.
    pub fn from_map(data: HashMap<String, serde_json::Value>) -> Self {
        Self { data }
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    /// String answer recorded under `key`, if any.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.data.insert(key.into(), value);
    }

    pub fn set_str(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.data
            .insert(key.into(), serde_json::Value::String(value.into()));
    }

    /// Parse a `key=value` assignment. The value is read as JSON when it
    /// parses (`true`, `3`, `"x"`), otherwise stored as a plain string.
    pub fn set_assignment(&mut self, assignment: &str) -> Option<()> {
        let (key, raw) = assignment.split_once('=')?;
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        let value = serde_json::from_str(raw.trim())
            .unwrap_or_else(|_| serde_json::Value::String(raw.trim().to_string()));
        self.data.insert(key.to_string(), value);
        Some(())
    }

    /// Fold in answers from a later turn; newer values win.
    pub fn merge(&mut self, other: &AgentState) {
        for (k, v) in &other.data {
            self.data.insert(k.clone(), v.clone());
        }
    }

    /// Whether a key holds a truthy value: `true`, a non-zero number,
    /// a non-empty string other than `"false"`, or a non-empty collection.
    pub fn is_truthy(&self, key: &str) -> bool {
        match self.data.get(key) {
            None | Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
            Some(serde_json::Value::String(s)) => {
                !s.is_empty() && !s.eq_ignore_ascii_case("false")
            }
            Some(serde_json::Value::Array(a)) => !a.is_empty(),
            Some(serde_json::Value::Object(o)) => !o.is_empty(),
        }
    }

    pub fn data(&self) -> &HashMap<String, serde_json::Value> {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorded_answers() {
        let mut state = AgentState::from_map(HashMap::from([(
            "email".to_string(),
            serde_json::json!("ops@example.com"),
        )]));
        state.set("seats", serde_json::json!(12));

        assert_eq!(state.get_str("email"), Some("ops@example.com"));
        assert_eq!(state.get_str("seats"), None);
        assert_eq!(state.get("seats"), Some(&serde_json::json!(12)));
        assert!(state.get("plan").is_none());
        assert_eq!(state.data().len(), 2);
    }

    #[test]
    fn test_later_turn_answers_win() {
        let mut collected = AgentState::new();
        collected.set_str("plan", "starter");
        collected.set("confirmed", serde_json::json!(false));

        let mut next_turn = AgentState::new();
        next_turn.set("confirmed", serde_json::json!(true));
        next_turn.set_str("billing", "annual");

        collected.merge(&next_turn);

        assert_eq!(collected.get_str("plan"), Some("starter"));
        assert!(collected.is_truthy("confirmed"));
        assert_eq!(collected.get_str("billing"), Some("annual"));
    }

    #[test]
    fn test_assignments() {
        let mut state = AgentState::new();
        assert!(state.set_assignment("confirmed=true").is_some());
        assert!(state.set_assignment("plan = pro").is_some());
        assert!(state.set_assignment("seats=3").is_some());
        assert!(state.set_assignment("=oops").is_none());
        assert!(state.set_assignment("no_equals").is_none());

        assert_eq!(state.get("confirmed"), Some(&serde_json::json!(true)));
        assert_eq!(state.get_str("plan"), Some("pro"));
        assert_eq!(state.get("seats"), Some(&serde_json::json!(3)));
    }

    #[test]
    fn test_truthiness() {
        let mut state = AgentState::new();
        state.set("yes", serde_json::json!(true));
        state.set("zero", serde_json::json!(0));
        state.set_str("word", "hello");
        state.set_str("falsy", "false");
        state.set("empty", serde_json::json!([]));

        assert!(state.is_truthy("yes"));
        assert!(!state.is_truthy("zero"));
        assert!(state.is_truthy("word"));
        assert!(!state.is_truthy("falsy"));
        assert!(!state.is_truthy("empty"));
        assert!(!state.is_truthy("missing"));
    }
}
