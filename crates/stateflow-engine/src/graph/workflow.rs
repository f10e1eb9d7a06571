use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use stateflow_core::config::{EdgeConfig, FlowConfig};
use stateflow_core::error::{FlowError, Result};
use stateflow_core::event::EventBus;
use stateflow_core::types::{FlowEvent, RunId, RunOutcome, StatePhase};

use super::action::{Action, ActionId, ActionNode};
use super::state::{self, State, StateId, StateNode};
use crate::countdown::Countdown;

/// Everything the tasks of one run share. Handed to each task explicitly;
/// states and actions hold ids, never references back to the workflow.
pub(crate) struct RunContext {
    pub(crate) states: Vec<StateNode>,
    pub(crate) actions: Vec<ActionNode>,
    pub(crate) cancel: CancellationToken,
    /// States that have not left yet.
    pub(crate) pending: Countdown,
    pub(crate) tracker: TaskTracker,
    pub(crate) events: Arc<EventBus>,
}

/// Result of a single run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: RunId,
    pub outcome: RunOutcome,
    /// Final phase of every registered state, keyed by name.
    pub phases: BTreeMap<String, StatePhase>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.outcome.succeeded()
    }

    pub fn phase(&self, state: &str) -> Option<StatePhase> {
        self.phases.get(state).copied()
    }
}

/// A graph of states joined by actions, plus the runtime that executes it.
///
/// Wire it with [`add_edge`](Self::add_edge), then consume it with
/// [`run`](Self::run). Counters and the cancellation token are single-use, so
/// a workflow runs exactly once.
///
/// The graph must be acyclic. This is not checked; a cycle deadlocks the
/// states involved and the run ends at its global timeout.
pub struct WorkFlow {
    run_id: RunId,
    states: Vec<StateNode>,
    actions: Vec<ActionNode>,
    state_index: HashMap<String, StateId>,
    action_index: HashMap<String, ActionId>,
    pending: Countdown,
    timeout: Duration,
    cancel: CancellationToken,
    events: Arc<EventBus>,
    start_states: OnceLock<Vec<StateId>>,
    end_states: OnceLock<Vec<StateId>>,
}

impl WorkFlow {
    /// Create an empty workflow bounded by a global timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            run_id: RunId::new(),
            states: Vec::new(),
            actions: Vec::new(),
            state_index: HashMap::new(),
            action_index: HashMap::new(),
            pending: Countdown::default(),
            timeout,
            cancel: CancellationToken::new(),
            events: Arc::new(EventBus::default()),
            start_states: OnceLock::new(),
            end_states: OnceLock::new(),
        }
    }

    /// Publish run events on a shared bus instead of a private one.
    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    /// Build a workflow from a validated definition.
    ///
    /// `work_for` supplies the work function of each edge's action.
    pub fn from_config<F, W>(config: &FlowConfig, mut work_for: F) -> Result<Self>
    where
        F: FnMut(&EdgeConfig) -> W,
        W: Fn() -> bool + Send + Sync + 'static,
    {
        config.validate()?;

        let mut workflow = Self::new(config.workflow.timeout());
        for edge in &config.edges {
            let action = Action::new(edge.action.clone(), edge.timeout(), work_for(edge));
            workflow.add_edge(&State::new(edge.from.clone()), action, &State::new(edge.to.clone()));
        }
        info!(
            workflow = %config.workflow.name,
            states = workflow.states.len(),
            actions = workflow.actions.len(),
            "Workflow built from config"
        );
        Ok(workflow)
    }

    /// Register `prev --action--> post`.
    ///
    /// States are registered by name; a state seen before is reused and not
    /// counted again. Duplicate edges and self-loops are accepted as given.
    pub fn add_edge(&mut self, prev: &State, action: Action, post: &State) {
        let prev_id = self.register_state(prev);
        let post_id = self.register_state(post);

        let action_id = ActionId(self.actions.len());
        if self
            .action_index
            .insert(action.name.clone(), action_id)
            .is_some()
        {
            warn!(action = %action.name, "Action name registered twice, lookups see the latest");
        }
        let mut node = ActionNode::new(action);
        node.add_previous_state(prev_id);
        node.add_post_state(post_id);
        self.actions.push(node);

        self.states[prev_id.0].add_post_action(action_id);
        self.states[post_id.0].add_previous_action(action_id);

        self.start_states = OnceLock::new();
        self.end_states = OnceLock::new();
    }

    fn register_state(&mut self, state: &State) -> StateId {
        if let Some(&id) = self.state_index.get(state.name()) {
            return id;
        }
        let id = StateId(self.states.len());
        self.states.push(StateNode::new(state.name()));
        self.state_index.insert(state.name().to_string(), id);
        self.pending.add(1);
        id
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub fn action_count(&self) -> usize {
        self.actions.len()
    }

    /// States that have not left yet. Before a run, one per distinct state.
    pub fn pending_states(&self) -> usize {
        self.pending.remaining()
    }

    /// Token that aborts the run when cancelled, from inside or outside.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<FlowEvent> {
        self.events.subscribe()
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    /// The unique state with no predecessor actions.
    pub fn start_state(&self) -> Result<&str> {
        let starts = self.start_states.get_or_init(|| {
            self.sorted_ids(|s| s.previous_actions.is_empty())
        });
        match starts.as_slice() {
            [] => Err(FlowError::NoStartState),
            [id] => Ok(self.states[id.0].name.as_str()),
            many => Err(FlowError::AmbiguousStartState(
                many.iter().map(|id| self.states[id.0].name.clone()).collect(),
            )),
        }
    }

    /// Every state with no successor actions, sorted by name.
    pub fn end_states(&self) -> Vec<&str> {
        self.end_states
            .get_or_init(|| self.sorted_ids(|s| s.post_actions.is_empty()))
            .iter()
            .map(|id| self.states[id.0].name.as_str())
            .collect()
    }

    fn sorted_ids(&self, pred: impl Fn(&StateNode) -> bool) -> Vec<StateId> {
        let mut ids: Vec<StateId> = (0..self.states.len())
            .map(StateId)
            .filter(|id| pred(&self.states[id.0]))
            .collect();
        ids.sort_by(|a, b| self.states[a.0].name.cmp(&self.states[b.0].name));
        ids
    }

    /// Names of the actions leading into a state, in registration order.
    pub fn previous_actions(&self, state: &str) -> Result<Vec<&str>> {
        let node = self.state_node(state)?;
        Ok(self.action_names(&node.previous_actions))
    }

    /// Names of the actions leaving a state, in registration order.
    pub fn post_actions(&self, state: &str) -> Result<Vec<&str>> {
        let node = self.state_node(state)?;
        Ok(self.action_names(&node.post_actions))
    }

    /// The `(previous, post)` state names of an action.
    pub fn action_states(&self, action: &str) -> Option<(Vec<&str>, Vec<&str>)> {
        let id = self.action_index.get(action)?;
        let node = &self.actions[id.0];
        Some((
            self.state_names(&node.previous_states),
            self.state_names(&node.post_states),
        ))
    }

    fn state_node(&self, name: &str) -> Result<&StateNode> {
        self.state_index
            .get(name)
            .map(|id| &self.states[id.0])
            .ok_or_else(|| FlowError::UnknownState(name.to_string()))
    }

    fn action_names(&self, ids: &[ActionId]) -> Vec<&str> {
        ids.iter().map(|id| self.actions[id.0].name.as_str()).collect()
    }

    fn state_names(&self, ids: &[StateId]) -> Vec<&str> {
        ids.iter().map(|id| self.states[id.0].name.as_str()).collect()
    }

    /// Check that the graph is non-empty and has exactly one start state.
    pub fn validate(&self) -> Result<()> {
        if self.states.is_empty() {
            return Err(FlowError::Config("workflow has no states".into()));
        }
        self.start_state().map(|_| ())
    }

    /// Run the workflow. `true` iff every state left before cancellation and
    /// before the global timeout.
    pub async fn run(self) -> bool {
        self.execute().await.succeeded()
    }

    /// Run the workflow and report how it ended.
    pub async fn execute(self) -> RunReport {
        let started = Instant::now();
        let run_id = self.run_id.clone();
        let timeout = self.timeout;
        let events = self.events.clone();

        if self.states.is_empty() {
            warn!(run_id = %run_id, "Workflow has no states");
            events.publish(FlowEvent::RunComplete {
                run_id: run_id.clone(),
                outcome: RunOutcome::Empty,
                elapsed_ms: 0,
            });
            return RunReport {
                run_id,
                outcome: RunOutcome::Empty,
                phases: BTreeMap::new(),
                elapsed: started.elapsed(),
            };
        }

        let ctx = Arc::new(RunContext {
            states: self.states,
            actions: self.actions,
            cancel: self.cancel,
            pending: self.pending,
            tracker: TaskTracker::new(),
            events: self.events,
        });

        info!(
            run_id = %run_id,
            states = ctx.states.len(),
            actions = ctx.actions.len(),
            timeout_ms = crate::millis(timeout),
            "Workflow starting"
        );
        events.publish(FlowEvent::RunStarted {
            run_id: run_id.clone(),
            states: ctx.states.len(),
            actions: ctx.actions.len(),
        });

        for (i, node) in ctx.states.iter().enumerate() {
            info!(state = %node.name, "State entering");
            ctx.tracker.spawn(state::enter(ctx.clone(), StateId(i)));
        }

        let outcome = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => RunOutcome::Canceled,
            _ = ctx.pending.wait() => RunOutcome::Done,
            _ = tokio::time::sleep(timeout) => RunOutcome::TimedOut,
        };

        match outcome {
            RunOutcome::Done => info!(run_id = %run_id, "Workflow done"),
            RunOutcome::Canceled => warn!(run_id = %run_id, "Workflow canceled"),
            _ => warn!(run_id = %run_id, "Workflow timeout"),
        }

        // Wind down: every task observes the token, then join them all.
        ctx.cancel.cancel();
        ctx.tracker.close();
        ctx.tracker.wait().await;

        let phases = ctx
            .states
            .iter()
            .map(|s| (s.name.clone(), s.phase.load()))
            .collect();
        let elapsed = started.elapsed();

        events.publish(FlowEvent::RunComplete {
            run_id: run_id.clone(),
            outcome,
            elapsed_ms: crate::millis(elapsed),
        });

        RunReport {
            run_id,
            outcome,
            phases,
            elapsed,
        }
    }
}

impl std::fmt::Debug for WorkFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkFlow")
            .field("run_id", &self.run_id)
            .field("states", &self.states.len())
            .field("actions", &self.actions.len())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
