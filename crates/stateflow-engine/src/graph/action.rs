use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use stateflow_core::types::{ActionOutcome, FlowEvent};

use super::state::StateId;
use super::workflow::RunContext;

/// User-supplied work. Runs synchronously on the blocking pool and reports
/// success or failure.
pub type WorkFn = Arc<dyn Fn() -> bool + Send + Sync + 'static>;

/// Index of an action in its workflow's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionId(pub(crate) usize);

/// A timeout-bounded unit of work between two states.
pub struct Action {
    pub(crate) name: String,
    pub(crate) timeout: Duration,
    pub(crate) work: WorkFn,
}

impl Action {
    pub fn new<F>(name: impl Into<String>, timeout: Duration, work: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            timeout,
            work: Arc::new(work),
        }
    }

    /// Build from an already shared work function.
    pub fn from_work_fn(name: impl Into<String>, timeout: Duration, work: WorkFn) -> Self {
        Self {
            name: name.into(),
            timeout,
            work,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// An action once it is part of a graph.
pub(crate) struct ActionNode {
    pub(crate) name: String,
    pub(crate) timeout: Duration,
    work: WorkFn,
    pub(crate) previous_states: Vec<StateId>,
    pub(crate) post_states: Vec<StateId>,
}

impl ActionNode {
    pub(crate) fn new(action: Action) -> Self {
        Self {
            name: action.name,
            timeout: action.timeout,
            work: action.work,
            previous_states: Vec::new(),
            post_states: Vec::new(),
        }
    }

    pub(crate) fn add_previous_state(&mut self, state: StateId) {
        self.previous_states.push(state);
    }

    pub(crate) fn add_post_state(&mut self, state: StateId) {
        self.post_states.push(state);
    }

    fn timeout_ms(&self) -> u64 {
        crate::millis(self.timeout)
    }
}

/// Race the action's work function against its timeout and the run's cancellation.
///
/// Success signals every successor state; failure or timeout cancels the run.
/// A work function still executing when the race resolves keeps its blocking
/// thread until it returns, and its result is dropped.
pub(crate) async fn process(ctx: Arc<RunContext>, id: ActionId) -> ActionOutcome {
    let action = &ctx.actions[id.0];
    let timeout_ms = action.timeout_ms();

    // Never start work for a run that is already winding down.
    if ctx.cancel.is_cancelled() {
        info!(action = %action.name, "Workflow cancelled, action not started");
        ctx.events.publish(FlowEvent::for_action(
            &action.name,
            ActionOutcome::Abandoned,
            0,
            timeout_ms,
        ));
        return ActionOutcome::Abandoned;
    }

    info!(action = %action.name, timeout_ms, "Action processing");
    ctx.events.publish(FlowEvent::ActionStarted {
        action: action.name.clone(),
        timeout_ms,
    });

    let start = Instant::now();
    let work = action.work.clone();
    let mut handle = tokio::task::spawn_blocking(move || work());

    let outcome = tokio::select! {
        biased;
        joined = &mut handle => match joined {
            Ok(true) => ActionOutcome::Succeeded,
            Ok(false) => ActionOutcome::Failed,
            Err(e) => {
                error!(action = %action.name, error = %e, "Work function panicked");
                ActionOutcome::Failed
            }
        },
        _ = tokio::time::sleep(action.timeout) => ActionOutcome::TimedOut,
        _ = ctx.cancel.cancelled() => ActionOutcome::Abandoned,
    };
    let elapsed_ms = crate::millis(start.elapsed());

    // Publish before signalling successors.
    ctx.events.publish(FlowEvent::for_action(
        &action.name,
        outcome,
        elapsed_ms,
        timeout_ms,
    ));

    match outcome {
        ActionOutcome::Succeeded => {
            info!(action = %action.name, elapsed_ms, "Action succeeded");
            for state in &action.post_states {
                ctx.states[state.0].previous_action_done();
            }
        }
        ActionOutcome::Failed => {
            warn!(action = %action.name, elapsed_ms, "Action failed, cancelling workflow");
            ctx.cancel.cancel();
        }
        ActionOutcome::TimedOut => {
            warn!(action = %action.name, timeout_ms, "Action timed out, cancelling workflow");
            ctx.cancel.cancel();
        }
        ActionOutcome::Abandoned => {
            info!(action = %action.name, elapsed_ms, "Action abandoned, workflow cancelled");
        }
    }

    if !handle.is_finished() {
        warn!(
            action = %action.name,
            "Work function still running; its result will be discarded"
        );
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use stateflow_core::event::EventBus;
    use stateflow_test_utils::{drain_events, ms, CallCounter};
    use tokio_util::sync::CancellationToken;
    use tokio_util::task::TaskTracker;

    use crate::countdown::Countdown;

    fn context(action: Action, cancel: CancellationToken) -> Arc<RunContext> {
        Arc::new(RunContext {
            states: Vec::new(),
            actions: vec![ActionNode::new(action)],
            cancel,
            pending: Countdown::new(0),
            tracker: TaskTracker::new(),
            events: Arc::new(EventBus::default()),
        })
    }

    #[tokio::test]
    async fn cancelled_run_never_starts_work() {
        let counter = CallCounter::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ctx = context(Action::new("late", ms(500), counter.work(0, true)), cancel);
        let mut rx = ctx.events.subscribe();

        let outcome = process(ctx.clone(), ActionId(0)).await;

        assert_eq!(outcome, ActionOutcome::Abandoned);
        // Give a stray blocking task time to show up.
        tokio::time::sleep(ms(50)).await;
        assert_eq!(counter.count(), 0);
        let events = drain_events(&mut rx);
        assert!(matches!(
            events.as_slice(),
            [FlowEvent::ActionAbandoned { action }] if action == "late"
        ));
    }

    #[tokio::test]
    async fn live_run_calls_work_once() {
        let counter = CallCounter::new();
        let ctx = context(
            Action::new("build", ms(500), counter.work(0, false)),
            CancellationToken::new(),
        );

        let outcome = process(ctx.clone(), ActionId(0)).await;

        assert_eq!(outcome, ActionOutcome::Failed);
        assert_eq!(counter.count(), 1);
        assert!(ctx.cancel.is_cancelled());
    }

    #[test]
    fn action_builder_keeps_name_and_timeout() {
        let action = Action::new("build", Duration::from_millis(250), || true);
        assert_eq!(action.name(), "build");
        assert_eq!(action.timeout(), Duration::from_millis(250));
        assert!((action.work)());
    }

    #[test]
    fn shared_work_fn_is_reused() {
        let work: WorkFn = Arc::new(|| false);
        let a = Action::from_work_fn("a", Duration::from_secs(1), work.clone());
        let b = Action::from_work_fn("b", Duration::from_secs(1), work.clone());
        assert!(!(a.work)());
        assert!(!(b.work)());
        assert_eq!(Arc::strong_count(&work), 3);
    }

    #[test]
    fn node_registration_appends_in_order() {
        let mut node = ActionNode::new(Action::new("a", Duration::from_secs(1), || true));
        node.add_previous_state(StateId(0));
        node.add_post_state(StateId(1));
        node.add_post_state(StateId(2));
        assert_eq!(node.previous_states, vec![StateId(0)]);
        assert_eq!(node.post_states, vec![StateId(1), StateId(2)]);
        assert_eq!(node.timeout_ms(), 1000);
    }

    #[test]
    fn debug_omits_work_fn() {
        let action = Action::new("deploy", Duration::from_secs(3), || true);
        let dbg = format!("{action:?}");
        assert!(dbg.contains("deploy"));
        assert!(dbg.contains(".."));
    }
}
