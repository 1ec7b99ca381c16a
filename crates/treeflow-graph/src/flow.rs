use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use treeflow_core::error::{Result, TreeFlowError};
use treeflow_core::types::{
    validate_version, ConnectionId, InputId, InputType, OutputId, StepId, TreeFlowId,
};

use crate::connection::{check_connection, StepConnection};
use crate::edge::{StepInput, StepOutput};
use crate::step::Step;
use crate::validate::{validate, ValidationReport};

/// A named, versioned workflow graph.
///
/// The flow is the arena for its steps: steps live and die with it, while
/// cross-step references (output destinations, input sources, connections)
/// are held by id and resolved through lookups that can come back empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeFlow {
    id: TreeFlowId,
    pub name: String,
    version: String,
    #[serde(default)]
    active: bool,
    /// Owning organization, an opaque external reference.
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    steps: Vec<Step>,
    #[serde(default)]
    connections: Vec<StepConnection>,
}

impl TreeFlow {
    /// Create an empty, inactive flow.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Result<Self> {
        let version = version.into();
        validate_version(&version)?;
        Ok(Self {
            id: TreeFlowId::new(),
            name: name.into(),
            version,
            active: false,
            organization: None,
            created_at: Utc::now(),
            steps: vec![],
            connections: vec![],
        })
    }

    /// Use a known id, e.g. when restoring a flow from storage.
    pub fn with_id(mut self, id: TreeFlowId) -> Self {
        for step in &mut self.steps {
            step.flow_id = Some(id.clone());
        }
        self.id = id;
        self
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    /// Parse a flow document and re-establish owner back-references.
    ///
    /// The result is not validated; call [`validate`] or
    /// [`TreeFlow::activate`] before routing through it.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut flow: TreeFlow = serde_json::from_str(json)?;
        validate_version(&flow.version)?;
        let flow_id = flow.id.clone();
        for step in &mut flow.steps {
            step.flow_id = Some(flow_id.clone());
            let step_id = step.id.clone();
            for output in &mut step.outputs {
                output.step_id = Some(step_id.clone());
            }
            for input in &mut step.inputs {
                input.step_id = Some(step_id.clone());
            }
            step.sort_outputs();
        }
        Ok(flow)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn id(&self) -> &TreeFlowId {
        &self.id
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn set_version(&mut self, version: impl Into<String>) -> Result<()> {
        let version = version.into();
        validate_version(&version)?;
        self.version = version;
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Validate the flow and mark it active.
    ///
    /// A flow with error-level issues (no entry point, broken wiring) is
    /// refused here so that it never reaches an agent session. Warnings are
    /// returned for the caller to surface.
    pub fn activate(&mut self) -> Result<ValidationReport> {
        let report = validate(self);
        if report.has_errors() {
            for issue in report.errors() {
                warn!(flow = %self.name, issue = %issue, "TreeFlow activation blocked");
            }
            return Err(TreeFlowError::InvalidFlow(report.errors().count()));
        }
        self.active = true;
        info!(flow = %self.name, version = %self.version, "TreeFlow activated");
        Ok(report)
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    // -- Steps --------------------------------------------------------------

    /// Steps in insertion order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step(&self, id: &StepId) -> Option<&Step> {
        self.steps.iter().find(|s| &s.id == id)
    }

    pub fn step_by_slug(&self, slug: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.slug == slug)
    }

    /// Mutable access to a step's content (name, prompt, questions).
    /// Wiring goes through the flow's own methods.
    pub fn step_mut(&mut self, id: &StepId) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| &s.id == id)
    }

    /// Add a step to the flow.
    ///
    /// The first step added to an empty flow becomes the entry point. A step
    /// marked first is rejected if the flow already has one.
    pub fn add_step(&mut self, mut step: Step) -> Result<StepId> {
        if self.step(&step.id).is_some() {
            return Err(TreeFlowError::DuplicateId(step.id.to_string()));
        }
        if step.first {
            if let Some(existing) = self.first_step() {
                return Err(TreeFlowError::MultipleEntryPoints {
                    existing: existing.id.to_string(),
                });
            }
        } else if self.steps.is_empty() {
            step.first = true;
        }

        // Steps carrying edges (e.g. cloned from another flow) may only
        // point at members of this flow.
        for output in &step.outputs {
            if let Some(dest) = &output.destination_step {
                if dest != &step.id {
                    self.ensure_member(dest)?;
                }
            }
            if self.locate_output(&output.id).is_some() {
                return Err(TreeFlowError::DuplicateId(output.id.to_string()));
            }
        }
        for input in &step.inputs {
            if let Some(src) = &input.source_step {
                if src != &step.id {
                    self.ensure_member(src)?;
                }
            }
            if self.locate_input(&input.id).is_some() {
                return Err(TreeFlowError::DuplicateId(input.id.to_string()));
            }
        }

        let id = step.id.clone();
        step.flow_id = Some(self.id.clone());
        for output in &mut step.outputs {
            output.step_id = Some(id.clone());
        }
        for input in &mut step.inputs {
            input.step_id = Some(id.clone());
        }
        step.sort_outputs();

        debug!(flow = %self.name, step = %step.name, first = step.first, "Step added");
        self.steps.push(step);
        Ok(id)
    }

    /// Remove a step with its questions, outputs, inputs and every
    /// connection touching them. Other steps' references to it are cleared.
    pub fn remove_step(&mut self, id: &StepId) -> Result<Step> {
        let idx = self.step_index(id)?;
        if self.steps[idx].first && self.steps.len() > 1 {
            return Err(TreeFlowError::EntryPointRequired(id.to_string()));
        }

        let mut step = self.steps.remove(idx);
        let outputs: HashSet<&OutputId> = step.outputs.iter().map(|o| &o.id).collect();
        let inputs: HashSet<&InputId> = step.inputs.iter().map(|i| &i.id).collect();
        let before = self.connections.len();
        self.connections.retain(|c| {
            !outputs.contains(&c.source_output) && !inputs.contains(&c.target_input)
        });
        let dropped = before - self.connections.len();

        let mut cleared = 0usize;
        for other in &mut self.steps {
            for output in &mut other.outputs {
                if output.destination_step.as_ref() == Some(id) {
                    output.destination_step = None;
                    cleared += 1;
                }
            }
            for input in &mut other.inputs {
                if input.source_step.as_ref() == Some(id) {
                    input.source_step = None;
                    cleared += 1;
                }
            }
        }

        step.flow_id = None;
        debug!(
            flow = %self.name,
            step = %step.name,
            connections_dropped = dropped,
            references_cleared = cleared,
            "Step removed"
        );
        Ok(step)
    }

    /// Move the entry-point designation to `id`.
    pub fn set_first(&mut self, id: &StepId) -> Result<()> {
        self.step_index(id)?;
        for step in &mut self.steps {
            step.first = &step.id == id;
        }
        Ok(())
    }

    /// The first step marked as entry point, in step order.
    pub fn first_step(&self) -> Option<&Step> {
        self.steps.iter().find(|s| s.first)
    }

    /// The entry point, or `NoEntryPoint` when the flow has none.
    pub fn entry_step(&self) -> Result<&Step> {
        self.first_step().ok_or(TreeFlowError::NoEntryPoint)
    }

    // -- Outputs and inputs -------------------------------------------------

    /// Declare an exit on `step_id`. The output is appended after the step's
    /// existing outputs in evaluation order.
    pub fn add_output(&mut self, step_id: &StepId, mut output: StepOutput) -> Result<OutputId> {
        let idx = self.step_index(step_id)?;
        if let Some(dest) = &output.destination_step {
            self.ensure_member(dest)?;
        }
        if self.locate_output(&output.id).is_some() {
            return Err(TreeFlowError::DuplicateId(output.id.to_string()));
        }

        let step = &mut self.steps[idx];
        output.step_id = Some(step_id.clone());
        output.order = step.next_output_order();
        let id = output.id.clone();
        debug!(step = %step.name, output = %output.name, order = output.order, "Output added");
        step.outputs.push(output);
        Ok(id)
    }

    /// Declare an entry on `step_id`.
    pub fn add_input(&mut self, step_id: &StepId, mut input: StepInput) -> Result<InputId> {
        let idx = self.step_index(step_id)?;
        if let Some(src) = &input.source_step {
            self.ensure_member(src)?;
        }
        if self.locate_input(&input.id).is_some() {
            return Err(TreeFlowError::DuplicateId(input.id.to_string()));
        }

        let step = &mut self.steps[idx];
        input.step_id = Some(step_id.clone());
        let id = input.id.clone();
        debug!(step = %step.name, input = %input.name, guard = %input.input_type, "Input added");
        step.inputs.push(input);
        Ok(id)
    }

    pub fn set_output_destination(&mut self, id: &OutputId, dest: Option<StepId>) -> Result<()> {
        if let Some(dest) = &dest {
            self.ensure_member(dest)?;
        }
        self.output_mut(id)?.destination_step = dest;
        Ok(())
    }

    pub fn set_output_conditional(&mut self, id: &OutputId, conditional: Option<String>) -> Result<()> {
        self.output_mut(id)?.conditional = conditional;
        Ok(())
    }

    /// Give an output an explicit evaluation order.
    pub fn reorder_output(&mut self, id: &OutputId, order: u32) -> Result<()> {
        let (s, o) = self
            .locate_output(id)
            .ok_or_else(|| TreeFlowError::OutputNotFound(id.to_string()))?;
        self.steps[s].outputs[o].order = order;
        self.steps[s].sort_outputs();
        Ok(())
    }

    pub fn set_input_source(&mut self, id: &InputId, source: Option<StepId>) -> Result<()> {
        if let Some(src) = &source {
            self.ensure_member(src)?;
        }
        self.input_mut(id)?.source_step = source;
        Ok(())
    }

    pub fn set_input_type(&mut self, id: &InputId, input_type: InputType) -> Result<()> {
        self.input_mut(id)?.input_type = input_type;
        Ok(())
    }

    /// Remove an output and its connection, if any.
    pub fn remove_output(&mut self, id: &OutputId) -> Result<StepOutput> {
        let (s, o) = self
            .locate_output(id)
            .ok_or_else(|| TreeFlowError::OutputNotFound(id.to_string()))?;
        let output = self.steps[s].outputs.remove(o);
        self.connections.retain(|c| &c.source_output != id);
        Ok(output)
    }

    /// Remove an input and every connection targeting it.
    pub fn remove_input(&mut self, id: &InputId) -> Result<StepInput> {
        let (s, i) = self
            .locate_input(id)
            .ok_or_else(|| TreeFlowError::InputNotFound(id.to_string()))?;
        let input = self.steps[s].inputs.remove(i);
        self.connections.retain(|c| &c.target_input != id);
        Ok(input)
    }

    pub fn find_output(&self, id: &OutputId) -> Option<&StepOutput> {
        self.locate_output(id)
            .map(|(s, o)| &self.steps[s].outputs[o])
    }

    pub fn find_input(&self, id: &InputId) -> Option<&StepInput> {
        self.locate_input(id).map(|(s, i)| &self.steps[s].inputs[i])
    }

    /// The step that owns an output.
    pub fn output_owner(&self, id: &OutputId) -> Option<&Step> {
        self.locate_output(id).map(|(s, _)| &self.steps[s])
    }

    /// The step that owns an input.
    pub fn input_owner(&self, id: &InputId) -> Option<&Step> {
        self.locate_input(id).map(|(s, _)| &self.steps[s])
    }

    // -- Connections --------------------------------------------------------

    /// Wire an output to an input.
    ///
    /// Fails with `DuplicateConnection` if the pair is already wired,
    /// `OutputAlreadyWired` if the output has another connection, and
    /// `SelfLoop` if both endpoints belong to the same step. On success the
    /// output's destination hint is aligned with the target step.
    pub fn connect(&mut self, output: &OutputId, input: &InputId) -> Result<ConnectionId> {
        self.wire(StepConnection::new(output.clone(), input.clone()))
    }

    /// Re-insert a previously persisted connection, keeping its id and
    /// timestamp. The same checks as [`TreeFlow::connect`] apply.
    pub fn restore_connection(&mut self, connection: StepConnection) -> Result<ConnectionId> {
        if self.connection(&connection.id).is_some() {
            return Err(TreeFlowError::DuplicateId(connection.id.to_string()));
        }
        self.wire(connection)
    }

    fn wire(&mut self, connection: StepConnection) -> Result<ConnectionId> {
        let (os, oi) = self
            .locate_output(&connection.source_output)
            .ok_or_else(|| TreeFlowError::OutputNotFound(connection.source_output.to_string()))?;
        let (is, _) = self
            .locate_input(&connection.target_input)
            .ok_or_else(|| TreeFlowError::InputNotFound(connection.target_input.to_string()))?;
        let output_step = self.steps[os].id.clone();
        let input_step = self.steps[is].id.clone();

        check_connection(
            self.connection_for_output(&connection.source_output),
            &connection.source_output,
            &output_step,
            &connection.target_input,
            &input_step,
        )?;

        let output = &mut self.steps[os].outputs[oi];
        if output.destination_step.as_ref() != Some(&input_step) {
            debug!(
                output = %output.name,
                previous = ?output.destination_step,
                "Destination hint aligned with connection"
            );
            output.destination_step = Some(input_step.clone());
        }

        info!(
            from = %self.steps[os].name,
            to = %self.steps[is].name,
            connection = %connection.id,
            "Steps connected"
        );
        let id = connection.id.clone();
        self.connections.push(connection);
        Ok(id)
    }

    /// Remove a wire. The output and input stay in place, unwired.
    pub fn disconnect(&mut self, id: &ConnectionId) -> Result<StepConnection> {
        let pos = self
            .connections
            .iter()
            .position(|c| &c.id == id)
            .ok_or_else(|| TreeFlowError::ConnectionNotFound(id.to_string()))?;
        let connection = self.connections.remove(pos);
        debug!(connection = %connection.id, "Steps disconnected");
        Ok(connection)
    }

    pub fn connections(&self) -> &[StepConnection] {
        &self.connections
    }

    pub fn connection(&self, id: &ConnectionId) -> Option<&StepConnection> {
        self.connections.iter().find(|c| &c.id == id)
    }

    /// The single connection leaving an output, if wired.
    pub fn connection_for_output(&self, output: &OutputId) -> Option<&StepConnection> {
        self.connections.iter().find(|c| &c.source_output == output)
    }

    /// All connections arriving at an input.
    pub fn connections_into<'a>(
        &'a self,
        input: &'a InputId,
    ) -> impl Iterator<Item = &'a StepConnection> + 'a {
        self.connections.iter().filter(move |c| &c.target_input == input)
    }

    /// Steps reachable over one connection from `step`.
    pub fn successors(&self, step: &StepId) -> Vec<&StepId> {
        let Some(source) = self.step(step) else {
            return vec![];
        };
        source
            .outputs
            .iter()
            .filter_map(|o| self.connection_for_output(&o.id))
            .filter_map(|c| self.input_owner(&c.target_input))
            .map(|s| &s.id)
            .collect()
    }

    // -- Internals ----------------------------------------------------------

    fn step_index(&self, id: &StepId) -> Result<usize> {
        self.steps
            .iter()
            .position(|s| &s.id == id)
            .ok_or_else(|| TreeFlowError::StepNotFound(id.to_string()))
    }

    fn ensure_member(&self, referenced: &StepId) -> Result<()> {
        if self.step(referenced).is_some() {
            Ok(())
        } else {
            Err(TreeFlowError::CrossFlowReference {
                flow: self.id.to_string(),
                referenced: referenced.to_string(),
            })
        }
    }

    fn locate_output(&self, id: &OutputId) -> Option<(usize, usize)> {
        self.steps.iter().enumerate().find_map(|(s, step)| {
            step.outputs
                .iter()
                .position(|o| &o.id == id)
                .map(|o| (s, o))
        })
    }

    fn locate_input(&self, id: &InputId) -> Option<(usize, usize)> {
        self.steps.iter().enumerate().find_map(|(s, step)| {
            step.inputs
                .iter()
                .position(|i| &i.id == id)
                .map(|i| (s, i))
        })
    }

    fn output_mut(&mut self, id: &OutputId) -> Result<&mut StepOutput> {
        let (s, o) = self
            .locate_output(id)
            .ok_or_else(|| TreeFlowError::OutputNotFound(id.to_string()))?;
        Ok(&mut self.steps[s].outputs[o])
    }

    fn input_mut(&mut self, id: &InputId) -> Result<&mut StepInput> {
        let (s, i) = self
            .locate_input(id)
            .ok_or_else(|| TreeFlowError::InputNotFound(id.to_string()))?;
        Ok(&mut self.steps[s].inputs[i])
    }
}
