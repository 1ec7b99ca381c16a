use std::collections::HashMap;

use serde::Serialize;
use tracing::{info, warn};

use treeflow_core::config::RoutingConfig;
use treeflow_core::error::{Result, TreeFlowError};
use treeflow_core::state::AgentState;
use treeflow_core::traits::ConditionEvaluator;
use treeflow_core::types::{CompletionVerdict, StepId};

use crate::flow::TreeFlow;
use crate::router::{RouteOutcome, Router};
use crate::step::Step;

/// One routing decision taken during a traversal.
#[derive(Debug, Clone, Serialize)]
pub struct TraversalRecord {
    pub step: StepId,
    pub verdict: CompletionVerdict,
    pub outcome: RouteOutcome,
}

/// A walk through a flow, one step at a time.
///
/// Starts at the entry step. Each call to [`Traversal::advance`] reports how
/// the current step ended and moves along the routed connection. A step
/// entered more than `max_visits` times stops the walk with `LoopLimit`.
pub struct Traversal<'a> {
    router: Router<'a>,
    current: StepId,
    visits: HashMap<StepId, usize>,
    history: Vec<TraversalRecord>,
    max_visits: usize,
    finished: bool,
}

impl<'a> Traversal<'a> {
    pub fn start(
        flow: &'a TreeFlow,
        evaluator: &'a dyn ConditionEvaluator,
        config: &RoutingConfig,
    ) -> Result<Self> {
        let entry = flow.entry_step()?.id().clone();
        info!(flow = %flow.name, entry = %entry, "Traversal started");
        Ok(Self {
            router: Router::new(flow, evaluator).with_policy(config.on_guard_rejected),
            visits: HashMap::from([(entry.clone(), 1)]),
            current: entry,
            history: vec![],
            max_visits: config.max_visits,
            finished: false,
        })
    }

    /// Start somewhere other than the entry step, e.g. to resume a session.
    pub fn resume(
        flow: &'a TreeFlow,
        evaluator: &'a dyn ConditionEvaluator,
        config: &RoutingConfig,
        at: &StepId,
    ) -> Result<Self> {
        if flow.step(at).is_none() {
            return Err(TreeFlowError::StepNotFound(at.to_string()));
        }
        info!(flow = %flow.name, step = %at, "Traversal resumed");
        Ok(Self {
            router: Router::new(flow, evaluator).with_policy(config.on_guard_rejected),
            visits: HashMap::from([(at.clone(), 1)]),
            current: at.clone(),
            history: vec![],
            max_visits: config.max_visits,
            finished: false,
        })
    }

    /// The step the agent is currently working in.
    pub fn current_step(&self) -> Option<&'a Step> {
        self.router.flow().step(&self.current)
    }

    pub fn current_id(&self) -> &StepId {
        &self.current
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn history(&self) -> &[TraversalRecord] {
        &self.history
    }

    /// Steps entered so far, in order, starting with the first one.
    pub fn path(&self) -> Vec<&StepId> {
        let mut path = vec![];
        if let Some(first) = self.history.first() {
            path.push(&first.step);
        } else {
            path.push(&self.current);
        }
        path.extend(self.history.iter().filter_map(|r| r.outcome.next_step()));
        path
    }

    pub fn visits(&self, step: &StepId) -> usize {
        self.visits.get(step).copied().unwrap_or(0)
    }

    /// Record how the current step ended and route onwards.
    pub fn advance(
        &mut self,
        verdict: CompletionVerdict,
        state: &AgentState,
    ) -> Result<RouteOutcome> {
        if self.finished {
            return Err(TreeFlowError::TraversalFinished);
        }

        let outcome = self.router.route(&self.current, verdict, state)?;
        self.history.push(TraversalRecord {
            step: self.current.clone(),
            verdict,
            outcome: outcome.clone(),
        });

        match &outcome {
            RouteOutcome::Advance(transition) => {
                let count = self.visits.entry(transition.to_step.clone()).or_default();
                *count += 1;
                if *count > self.max_visits {
                    warn!(
                        step = %transition.to_step,
                        max_visits = self.max_visits,
                        "Step visited too many times, terminating traversal"
                    );
                    self.finished = true;
                    return Err(TreeFlowError::LoopLimit {
                        step: transition.to_step.to_string(),
                        max_visits: self.max_visits,
                    });
                }
                self.current = transition.to_step.clone();
            }
            RouteOutcome::Terminal(reason) => {
                info!(step = %self.current, reason = ?reason, "Traversal finished");
                self.finished = true;
            }
        }
        Ok(outcome)
    }
}
