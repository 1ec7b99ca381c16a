use serde::{Deserialize, Serialize};

use treeflow_core::error::{Result, TreeFlowError};
use treeflow_core::types::{slugify, InputId, OutputId, QuestionId, StepId, TreeFlowId};

use crate::edge::{StepInput, StepOutput};
use crate::question::StepQuestion;

/// A node in a TreeFlow.
///
/// Steps carry the guidance the agent works from (objective, prompt,
/// questions) and declare their exits (outputs) and entries (inputs).
/// Outputs and inputs are mutated through the owning `TreeFlow` so that
/// wiring invariants stay enforceable in one place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub(crate) id: StepId,
    /// Owning flow, assigned by `TreeFlow::add_step`.
    #[serde(default)]
    pub(crate) flow_id: Option<TreeFlowId>,
    #[serde(default)]
    pub(crate) first: bool,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub objective: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    questions: Vec<StepQuestion>,
    #[serde(default)]
    pub(crate) outputs: Vec<StepOutput>,
    #[serde(default)]
    pub(crate) inputs: Vec<StepInput>,
}

impl Step {
    /// Create a new step; the slug is derived from the name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: StepId::new(),
            flow_id: None,
            first: false,
            slug: slugify(&name),
            name,
            objective: None,
            prompt: None,
            questions: vec![],
            outputs: vec![],
            inputs: vec![],
        }
    }

    /// Use a known id, e.g. when restoring a step from storage.
    pub fn with_id(mut self, id: StepId) -> Self {
        self.id = id;
        self
    }

    /// Mark this step as the flow's entry point.
    pub fn as_first(mut self) -> Self {
        self.first = true;
        self
    }

    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = slug.into();
        self
    }

    pub fn with_objective(mut self, objective: impl Into<String>) -> Self {
        self.objective = Some(objective.into());
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_question(mut self, question: StepQuestion) -> Self {
        self.questions.push(question);
        self
    }

    pub fn id(&self) -> &StepId {
        &self.id
    }

    pub fn flow_id(&self) -> Option<&TreeFlowId> {
        self.flow_id.as_ref()
    }

    pub fn is_first(&self) -> bool {
        self.first
    }

    /// Outputs in evaluation order.
    pub fn outputs(&self) -> &[StepOutput] {
        &self.outputs
    }

    pub fn inputs(&self) -> &[StepInput] {
        &self.inputs
    }

    pub fn output(&self, id: &OutputId) -> Option<&StepOutput> {
        self.outputs.iter().find(|o| &o.id == id)
    }

    pub fn input(&self, id: &InputId) -> Option<&StepInput> {
        self.inputs.iter().find(|i| &i.id == id)
    }

    pub fn questions(&self) -> &[StepQuestion] {
        &self.questions
    }

    /// Questions sorted by view order (stable for equal orders).
    pub fn ordered_questions(&self) -> Vec<&StepQuestion> {
        let mut ordered: Vec<&StepQuestion> = self.questions.iter().collect();
        ordered.sort_by_key(|q| q.view_order);
        ordered
    }

    pub fn question(&self, id: &QuestionId) -> Option<&StepQuestion> {
        self.questions.iter().find(|q| &q.id == id)
    }

    pub fn question_mut(&mut self, id: &QuestionId) -> Option<&mut StepQuestion> {
        self.questions.iter_mut().find(|q| &q.id == id)
    }

    pub fn add_question(&mut self, question: StepQuestion) -> QuestionId {
        let id = question.id.clone();
        self.questions.push(question);
        id
    }

    /// Remove a question together with its examples.
    pub fn remove_question(&mut self, id: &QuestionId) -> Result<StepQuestion> {
        let pos = self
            .questions
            .iter()
            .position(|q| &q.id == id)
            .ok_or_else(|| TreeFlowError::QuestionNotFound(id.to_string()))?;
        Ok(self.questions.remove(pos))
    }

    /// Keep outputs sorted by `order`; the sort is stable so equal orders
    /// keep insertion order.
    pub(crate) fn sort_outputs(&mut self) {
        self.outputs.sort_by_key(|o| o.order);
    }

    pub(crate) fn next_output_order(&self) -> u32 {
        self.outputs
            .iter()
            .map(|o| o.order.saturating_add(1))
            .max()
            .unwrap_or(0)
    }

    /// Build the guidance section the agent receives while in this step.
    pub fn render_guidance(&self) -> String {
        let mut text = format!("## {}\n\n", self.name);

        if let Some(objective) = &self.objective {
            text.push_str(&format!("**Objective**: {}\n\n", objective));
        }
        if let Some(prompt) = &self.prompt {
            text.push_str(prompt);
            text.push_str("\n\n");
        }

        let questions = self.ordered_questions();
        if !questions.is_empty() {
            text.push_str("### Determine\n\n");
            for q in questions {
                text.push_str(&format!("- {} (importance {}/10)", q.name, q.importance()));
                if let Some(objective) = &q.objective {
                    text.push_str(&format!(": {}", objective));
                }
                text.push('\n');
                if let Some(prompt) = &q.prompt {
                    text.push_str(&format!("  Ask: {}\n", prompt));
                }
                for ex in q.positive_examples() {
                    text.push_str(&format!(
                        "  Good: {}\n",
                        ex.prompt.as_deref().unwrap_or(&ex.name)
                    ));
                }
                for ex in q.negative_examples() {
                    text.push_str(&format!(
                        "  Avoid: {}\n",
                        ex.prompt.as_deref().unwrap_or(&ex.name)
                    ));
                }
            }
        }

        text.trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::question::StepFewShotExample;

    #[test]
    fn test_step_builder() {
        let step = Step::new("Collect Contact Info")
            .as_first()
            .with_objective("Get an email address")
            .with_prompt("Be polite.");

        assert_eq!(step.slug, "collect-contact-info");
        assert!(step.is_first());
        assert!(step.flow_id.is_none());
        assert_eq!(step.objective.as_deref(), Some("Get an email address"));
        assert!(step.outputs().is_empty());
        assert!(step.inputs().is_empty());
    }

    #[test]
    fn test_questions_ordered_by_view_order() {
        let step = Step::new("Qualify")
            .with_question(StepQuestion::new("Budget").with_view_order(2))
            .with_question(StepQuestion::new("Timeline").with_view_order(1))
            .with_question(StepQuestion::new("Authority").with_view_order(2));

        let names: Vec<&str> = step
            .ordered_questions()
            .iter()
            .map(|q| q.name.as_str())
            .collect();
        assert_eq!(names, vec!["Timeline", "Budget", "Authority"]);
    }

    #[test]
    fn test_remove_question_removes_examples() {
        let mut step = Step::new("Qualify");
        let id = step.add_question(
            StepQuestion::new("Budget").with_example(StepFewShotExample::positive("10k")),
        );
        let removed = step.remove_question(&id).unwrap();
        assert_eq!(removed.examples().len(), 1);
        assert!(step.questions().is_empty());
        assert!(step.question(&id).is_none());
        assert!(matches!(
            step.remove_question(&id),
            Err(TreeFlowError::QuestionNotFound(_))
        ));
    }

    #[test]
    fn test_render_guidance() {
        let step = Step::new("Qualify")
            .with_objective("Decide if the lead is a fit")
            .with_question(
                StepQuestion::new("Budget")
                    .with_importance(8)
                    .with_prompt("What budget do you have?")
                    .with_example(StepFewShotExample::positive("Around 10k a year"))
                    .with_example(
                        StepFewShotExample::negative("Pushy")
                            .with_prompt("Tell me your budget now."),
                    ),
            );

        let text = step.render_guidance();
        assert!(text.starts_with("## Qualify"));
        assert!(text.contains("**Objective**: Decide if the lead is a fit"));
        assert!(text.contains("- Budget (importance 8/10)"));
        assert!(text.contains("Ask: What budget do you have?"));
        assert!(text.contains("Good: Around 10k a year"));
        assert!(text.contains("Avoid: Tell me your budget now."));
    }

    #[test]
    fn test_render_guidance_minimal() {
        let step = Step::new("Wrap up");
        assert_eq!(step.render_guidance(), "## Wrap up");
    }
}
