use serde::{Deserialize, Serialize};

use treeflow_core::types::{InputId, InputType, OutputId, StepId};

/// A declared exit from a step.
///
/// Outputs are evaluated by the router in ascending `order`. The
/// `destination_step` is an authoring hint only: routing follows the
/// output's connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutput {
    pub id: OutputId,
    /// Owning step, assigned when the output is added to a step.
    #[serde(default)]
    pub step_id: Option<StepId>,
    #[serde(default)]
    pub destination_step: Option<StepId>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub conditional: Option<String>,
    #[serde(default)]
    pub order: u32,
}

impl StepOutput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: OutputId::new(),
            step_id: None,
            destination_step: None,
            name: name.into(),
            description: None,
            conditional: None,
            order: 0,
        }
    }

    pub fn with_conditional(mut self, conditional: impl Into<String>) -> Self {
        self.conditional = Some(conditional.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_destination(mut self, step: StepId) -> Self {
        self.destination_step = Some(step);
        self
    }

    pub fn has_destination(&self) -> bool {
        self.destination_step.is_some()
    }

    pub fn has_conditional(&self) -> bool {
        self.condition().is_some()
    }

    /// The conditional text, if it is non-blank.
    pub fn condition(&self) -> Option<&str> {
        self.conditional
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

/// A declared entry into a step, gated by the upstream completion verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepInput {
    pub id: InputId,
    /// Owning step, assigned when the input is added to a step.
    #[serde(default)]
    pub step_id: Option<StepId>,
    #[serde(default)]
    pub source_step: Option<StepId>,
    #[serde(rename = "type", default)]
    pub input_type: InputType,
    pub name: String,
    #[serde(default)]
    pub prompt: Option<String>,
}

impl StepInput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: InputId::new(),
            step_id: None,
            source_step: None,
            input_type: InputType::Any,
            name: name.into(),
            prompt: None,
        }
    }

    /// An input accepting any upstream verdict.
    pub fn any(name: impl Into<String>) -> Self {
        Self::new(name)
    }

    /// An input that only admits fully completed upstream steps.
    pub fn on_completed(name: impl Into<String>) -> Self {
        Self::new(name).with_type(InputType::FullyCompleted)
    }

    /// An input that only admits failed upstream steps.
    pub fn on_failed(name: impl Into<String>) -> Self {
        Self::new(name).with_type(InputType::Failed)
    }

    pub fn with_type(mut self, input_type: InputType) -> Self {
        self.input_type = input_type;
        self
    }

    pub fn with_source(mut self, step: StepId) -> Self {
        self.source_step = Some(step);
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn has_source(&self) -> bool {
        self.source_step.is_some()
    }

    pub fn requires_full_completion(&self) -> bool {
        self.input_type == InputType::FullyCompleted
    }

    pub fn accepts_any_status(&self) -> bool {
        self.input_type == InputType::Any
    }
}
