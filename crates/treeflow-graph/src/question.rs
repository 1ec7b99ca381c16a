use serde::{Deserialize, Serialize};

use treeflow_core::types::{slugify, ExampleId, FewShotType, QuestionId};

pub const MIN_IMPORTANCE: u8 = 1;
pub const MAX_IMPORTANCE: u8 = 10;

/// Something the agent should determine while it is in a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepQuestion {
    pub id: QuestionId,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub objective: Option<String>,
    #[serde(default = "default_importance", deserialize_with = "deserialize_importance")]
    importance: u8,
    #[serde(default)]
    pub view_order: i32,
    #[serde(default)]
    examples: Vec<StepFewShotExample>,
}

fn default_importance() -> u8 {
    MIN_IMPORTANCE
}

fn deserialize_importance<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = i64::deserialize(deserializer)?;
    Ok(clamp_importance(raw))
}

fn clamp_importance(raw: i64) -> u8 {
    raw.clamp(MIN_IMPORTANCE as i64, MAX_IMPORTANCE as i64) as u8
}

impl StepQuestion {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: QuestionId::new(),
            slug: slugify(&name),
            name,
            prompt: None,
            objective: None,
            importance: default_importance(),
            view_order: 0,
            examples: vec![],
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_objective(mut self, objective: impl Into<String>) -> Self {
        self.objective = Some(objective.into());
        self
    }

    /// Set importance; values outside 1..=10 are clamped.
    pub fn with_importance(mut self, importance: i64) -> Self {
        self.set_importance(importance);
        self
    }

    pub fn with_view_order(mut self, view_order: i32) -> Self {
        self.view_order = view_order;
        self
    }

    pub fn with_example(mut self, example: StepFewShotExample) -> Self {
        self.examples.push(example);
        self
    }

    pub fn importance(&self) -> u8 {
        self.importance
    }

    pub fn set_importance(&mut self, importance: i64) {
        self.importance = clamp_importance(importance);
    }

    pub fn add_example(&mut self, example: StepFewShotExample) -> ExampleId {
        let id = example.id.clone();
        self.examples.push(example);
        id
    }

    pub fn remove_example(&mut self, id: &ExampleId) -> Option<StepFewShotExample> {
        let pos = self.examples.iter().position(|e| &e.id == id)?;
        Some(self.examples.remove(pos))
    }

    pub fn examples(&self) -> &[StepFewShotExample] {
        &self.examples
    }

    pub fn examples_of(&self, kind: FewShotType) -> impl Iterator<Item = &StepFewShotExample> {
        self.examples.iter().filter(move |e| e.kind == kind)
    }

    pub fn positive_examples(&self) -> impl Iterator<Item = &StepFewShotExample> {
        self.examples_of(FewShotType::Positive)
    }

    pub fn negative_examples(&self) -> impl Iterator<Item = &StepFewShotExample> {
        self.examples_of(FewShotType::Negative)
    }
}

/// A worked example showing the agent a good or bad answer to a question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepFewShotExample {
    pub id: ExampleId,
    #[serde(rename = "type")]
    pub kind: FewShotType,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl StepFewShotExample {
    pub fn new(kind: FewShotType, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: ExampleId::new(),
            kind,
            slug: slugify(&name),
            name,
            prompt: None,
            description: None,
        }
    }

    pub fn positive(name: impl Into<String>) -> Self {
        Self::new(FewShotType::Positive, name)
    }

    pub fn negative(name: impl Into<String>) -> Self {
        Self::new(FewShotType::Negative, name)
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_importance_is_clamped() {
        assert_eq!(StepQuestion::new("q").with_importance(0).importance(), 1);
        assert_eq!(StepQuestion::new("q").with_importance(-4).importance(), 1);
        assert_eq!(StepQuestion::new("q").with_importance(7).importance(), 7);
        assert_eq!(StepQuestion::new("q").with_importance(99).importance(), 10);
    }

    #[test]
    fn test_importance_clamped_on_deserialize() {
        let json = r#"{"id":"q1","name":"Budget","slug":"budget","importance":42}"#;
        let q: StepQuestion = serde_json::from_str(json).unwrap();
        assert_eq!(q.importance(), 10);
        assert!(q.examples().is_empty());
    }

    #[test]
    fn test_examples_partitioned_by_type() {
        let q = StepQuestion::new("What is the budget?")
            .with_example(StepFewShotExample::positive("Clear figure"))
            .with_example(StepFewShotExample::negative("Vague answer"))
            .with_example(StepFewShotExample::positive("Range given"));

        assert_eq!(q.slug, "what-is-the-budget");
        assert_eq!(q.positive_examples().count(), 2);
        assert_eq!(q.negative_examples().count(), 1);
        assert_eq!(q.examples().len(), 3);
    }

    #[test]
    fn test_remove_example() {
        let mut q = StepQuestion::new("q");
        let id = q.add_example(StepFewShotExample::positive("one"));
        assert!(q.remove_example(&id).is_some());
        assert!(q.remove_example(&id).is_none());
        assert!(q.examples().is_empty());
    }

    #[test]
    fn test_example_type_field_name() {
        let ex = StepFewShotExample::negative("Off topic").with_prompt("Tell me a joke");
        let json = serde_json::to_value(&ex).unwrap();
        assert_eq!(json["type"], "NEGATIVE");
        assert_eq!(json["slug"], "off-topic");
    }
}
