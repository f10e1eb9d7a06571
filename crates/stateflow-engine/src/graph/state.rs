use std::sync::Arc;

use tracing::{debug, info};

use stateflow_core::types::{AtomicPhase, FlowEvent, StatePhase};

use super::action::{self, ActionId};
use super::workflow::RunContext;
use crate::countdown::Countdown;

/// Index of a state in its workflow's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateId(pub(crate) usize);

/// A named synchronization point, as handed to [`WorkFlow::add_edge`].
///
/// States are identified by name: wiring two edges through states with the
/// same name joins them at one node.
///
/// [`WorkFlow::add_edge`]: super::WorkFlow::add_edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    name: String,
}

impl State {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A state once it is part of a graph.
#[derive(Debug)]
pub(crate) struct StateNode {
    pub(crate) name: String,
    pub(crate) previous_actions: Vec<ActionId>,
    pub(crate) post_actions: Vec<ActionId>,
    /// Predecessor actions that have not signalled yet.
    pending: Countdown,
    pub(crate) phase: AtomicPhase,
}

impl StateNode {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            previous_actions: Vec::new(),
            post_actions: Vec::new(),
            pending: Countdown::default(),
            phase: AtomicPhase::default(),
        }
    }

    pub(crate) fn add_previous_action(&mut self, action: ActionId) {
        self.pending.add(1);
        self.previous_actions.push(action);
    }

    pub(crate) fn add_post_action(&mut self, action: ActionId) {
        self.post_actions.push(action);
    }

    /// Called by a predecessor action that succeeded.
    pub(crate) fn previous_action_done(&self) {
        if self.pending.done() {
            debug!(state = %self.name, "Last predecessor signalled");
        }
    }

    pub(crate) fn pending_predecessors(&self) -> usize {
        self.pending.remaining()
    }

    /// Count this state toward the workflow's completion.
    fn leave(&self, ctx: &RunContext) {
        info!(state = %self.name, "State leaving");
        self.phase.store(StatePhase::Left);
        ctx.events.publish(FlowEvent::StateLeft {
            state: self.name.clone(),
        });
        ctx.pending.done();
    }
}

/// Wait for every predecessor action, then dispatch the successor actions and leave.
///
/// Returns without entering if the run is cancelled while waiting.
pub(crate) async fn enter(ctx: Arc<RunContext>, id: StateId) {
    let state = &ctx.states[id.0];

    let pending = state.pending_predecessors();
    if pending > 0 {
        info!(state = %state.name, pending, "State waiting");
        ctx.events.publish(FlowEvent::StateWaiting {
            state: state.name.clone(),
            pending,
        });

        tokio::select! {
            _ = state.pending.wait() => {}
            _ = ctx.cancel.cancelled() => {
                debug!(state = %state.name, "Run cancelled while state was waiting");
                return;
            }
        }
    }

    state.phase.store(StatePhase::Entered);
    info!(
        state = %state.name,
        post_actions = state.post_actions.len(),
        "State reached, dispatching post actions"
    );
    ctx.events.publish(FlowEvent::StateEntered {
        state: state.name.clone(),
    });

    for &action_id in &state.post_actions {
        if ctx.cancel.is_cancelled() {
            debug!(state = %state.name, "Run cancelled, skipping remaining post actions");
            break;
        }
        ctx.tracker.spawn(action::process(ctx.clone(), action_id));
    }

    state.leave(&ctx);
}
