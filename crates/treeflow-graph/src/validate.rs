use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use serde::Serialize;

use treeflow_core::types::{ConnectionId, OutputId, StepId};

use crate::flow::TreeFlow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// A structural problem found in a flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Issue {
    // Entry point
    NoEntryPoint,
    MultipleEntryPoints { steps: Vec<StepId> },

    // Identity
    DuplicateId { id: String },
    DuplicateSlug { slug: String },

    // Wiring
    MissingEndpoint { connection: ConnectionId },
    DuplicateConnection { connection: ConnectionId },
    OutputWiredTwice { output: OutputId },
    SelfLoop { connection: ConnectionId },

    // Hints and reachability
    DanglingReference { step: StepId, referenced: StepId },
    CrossFlowReference { step: StepId, referenced: StepId },
    HintMismatch { output: OutputId },
    ShadowedOutput { step: StepId, output: OutputId },
    UnreachableStep { step: StepId },
}

impl Issue {
    pub fn severity(&self) -> Severity {
        match self {
            Issue::NoEntryPoint
            | Issue::MultipleEntryPoints { .. }
            | Issue::DuplicateId { .. }
            | Issue::MissingEndpoint { .. }
            | Issue::DuplicateConnection { .. }
            | Issue::OutputWiredTwice { .. }
            | Issue::SelfLoop { .. }
            | Issue::CrossFlowReference { .. } => Severity::Error,
            Issue::DuplicateSlug { .. }
            | Issue::DanglingReference { .. }
            | Issue::HintMismatch { .. }
            | Issue::ShadowedOutput { .. }
            | Issue::UnreachableStep { .. } => Severity::Warning,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity() == Severity::Error
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Issue::NoEntryPoint => write!(f, "no step is marked as entry point"),
            Issue::MultipleEntryPoints { steps } => {
                write!(f, "{} steps are marked as entry point", steps.len())
            }
            Issue::DuplicateId { id } => write!(f, "id {id} is used more than once"),
            Issue::DuplicateSlug { slug } => write!(f, "slug '{slug}' is shared by several steps"),
            Issue::MissingEndpoint { connection } => {
                write!(f, "connection {connection} references a missing output or input")
            }
            Issue::DuplicateConnection { connection } => {
                write!(f, "connection {connection} repeats an existing output/input pair")
            }
            Issue::OutputWiredTwice { output } => {
                write!(f, "output {output} has more than one connection")
            }
            Issue::SelfLoop { connection } => {
                write!(f, "connection {connection} links a step to itself")
            }
            Issue::DanglingReference { step, referenced } => {
                write!(f, "step {step} references unknown step {referenced}")
            }
            Issue::CrossFlowReference { step, referenced } => {
                write!(f, "step {step} references step {referenced} of another flow")
            }
            Issue::HintMismatch { output } => {
                write!(f, "destination of output {output} disagrees with its connection")
            }
            Issue::ShadowedOutput { step, output } => {
                write!(f, "output {output} of step {step} follows an unconditional output and never matches")
            }
            Issue::UnreachableStep { step } => {
                write!(f, "step {step} cannot be reached from the entry point")
            }
        }
    }
}

/// Result of [`validate`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub issues: Vec<Issue>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(Issue::is_error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| !i.is_error())
    }
}

/// Check a flow's structure.
///
/// Invariants the `TreeFlow` API already enforces are re-checked here so
/// that flows loaded from documents get the same guarantees.
pub fn validate(flow: &TreeFlow) -> ValidationReport {
    validate_with(flow, |_| false)
}

/// Like [`validate`], with a lookup telling whether a step id belongs to
/// some other flow (e.g. one already stored). Hints to such steps are
/// errors; hints to steps nobody knows stay dangling-reference warnings.
pub fn validate_with(flow: &TreeFlow, foreign: impl Fn(&StepId) -> bool) -> ValidationReport {
    let mut issues = vec![];

    check_entry_points(flow, &mut issues);
    check_identity(flow, &mut issues);
    check_connections(flow, &mut issues);
    check_hints(flow, &foreign, &mut issues);
    check_shadowed_outputs(flow, &mut issues);
    check_reachability(flow, &mut issues);

    ValidationReport { issues }
}

fn check_entry_points(flow: &TreeFlow, issues: &mut Vec<Issue>) {
    let firsts: Vec<StepId> = flow
        .steps()
        .iter()
        .filter(|s| s.is_first())
        .map(|s| s.id().clone())
        .collect();
    match firsts.len() {
        0 => issues.push(Issue::NoEntryPoint),
        1 => {}
        _ => issues.push(Issue::MultipleEntryPoints { steps: firsts }),
    }
}

fn check_identity(flow: &TreeFlow, issues: &mut Vec<Issue>) {
    let ids = flow
        .steps()
        .iter()
        .flat_map(|s| {
            std::iter::once(s.id().as_str())
                .chain(s.outputs().iter().map(|o| o.id.as_str()))
                .chain(s.inputs().iter().map(|i| i.id.as_str()))
        })
        .chain(flow.connections().iter().map(|c| c.id.as_str()));
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            issues.push(Issue::DuplicateId { id: id.to_string() });
        }
    }

    let mut slugs: HashMap<&str, usize> = HashMap::new();
    for step in flow.steps() {
        *slugs.entry(step.slug.as_str()).or_default() += 1;
    }
    let mut shared: Vec<&str> = slugs
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(slug, _)| slug)
        .collect();
    shared.sort_unstable();
    for slug in shared {
        issues.push(Issue::DuplicateSlug {
            slug: slug.to_string(),
        });
    }
}

fn check_connections(flow: &TreeFlow, issues: &mut Vec<Issue>) {
    let mut pairs = HashSet::new();
    let mut wired: HashMap<&OutputId, usize> = HashMap::new();

    for conn in flow.connections() {
        let source = flow.output_owner(&conn.source_output);
        let target = flow.input_owner(&conn.target_input);
        let (Some(source), Some(target)) = (source, target) else {
            issues.push(Issue::MissingEndpoint {
                connection: conn.id.clone(),
            });
            continue;
        };

        if !pairs.insert((&conn.source_output, &conn.target_input)) {
            issues.push(Issue::DuplicateConnection {
                connection: conn.id.clone(),
            });
            continue;
        }
        *wired.entry(&conn.source_output).or_default() += 1;

        if source.id() == target.id() {
            issues.push(Issue::SelfLoop {
                connection: conn.id.clone(),
            });
        }
    }

    for step in flow.steps() {
        for output in step.outputs() {
            if wired.get(&output.id).copied().unwrap_or(0) > 1 {
                issues.push(Issue::OutputWiredTwice {
                    output: output.id.clone(),
                });
            }
        }
    }
}

fn unresolved_hint(step: &StepId, referenced: &StepId, foreign: &dyn Fn(&StepId) -> bool) -> Issue {
    if foreign(referenced) {
        Issue::CrossFlowReference {
            step: step.clone(),
            referenced: referenced.clone(),
        }
    } else {
        Issue::DanglingReference {
            step: step.clone(),
            referenced: referenced.clone(),
        }
    }
}

fn check_hints(flow: &TreeFlow, foreign: &dyn Fn(&StepId) -> bool, issues: &mut Vec<Issue>) {
    for step in flow.steps() {
        for output in step.outputs() {
            let Some(dest) = &output.destination_step else {
                continue;
            };
            if flow.step(dest).is_none() {
                issues.push(unresolved_hint(step.id(), dest, foreign));
                continue;
            }
            let target = flow
                .connection_for_output(&output.id)
                .and_then(|c| flow.input_owner(&c.target_input));
            if let Some(target) = target {
                if target.id() != dest {
                    issues.push(Issue::HintMismatch {
                        output: output.id.clone(),
                    });
                }
            }
        }
        for input in step.inputs() {
            if let Some(src) = &input.source_step {
                if flow.step(src).is_none() {
                    issues.push(unresolved_hint(step.id(), src, foreign));
                }
            }
        }
    }
}

fn check_shadowed_outputs(flow: &TreeFlow, issues: &mut Vec<Issue>) {
    for step in flow.steps() {
        let mut catch_all = false;
        for output in step.outputs() {
            if catch_all {
                issues.push(Issue::ShadowedOutput {
                    step: step.id().clone(),
                    output: output.id.clone(),
                });
            } else if !output.has_conditional() {
                catch_all = true;
            }
        }
    }
}

/// Breadth-first walk over connections from the entry point. Input guards
/// are ignored: a step is reachable if any verdict could lead there.
fn check_reachability(flow: &TreeFlow, issues: &mut Vec<Issue>) {
    let Some(entry) = flow.first_step() else {
        return;
    };

    let mut visited: HashSet<&StepId> = HashSet::new();
    let mut queue = VecDeque::from([entry.id()]);
    visited.insert(entry.id());
    while let Some(current) = queue.pop_front() {
        for next in flow.successors(current) {
            if visited.insert(next) {
                queue.push_back(next);
            }
        }
    }

    for step in flow.steps() {
        if !visited.contains(step.id()) {
            issues.push(Issue::UnreachableStep {
                step: step.id().clone(),
            });
        }
    }
}
