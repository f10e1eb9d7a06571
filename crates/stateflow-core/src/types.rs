use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a single workflow run.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a state is in its lifecycle.
///
/// A state starts out `Waiting` on its predecessor actions, becomes `Entered`
/// once the last of them has signalled, and is `Left` after its successor
/// actions have been dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatePhase {
    Waiting,
    Entered,
    Left,
}

impl StatePhase {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Self::Waiting => 0,
            Self::Entered => 1,
            Self::Left => 2,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Waiting,
            1 => Self::Entered,
            _ => Self::Left,
        }
    }
}

/// Packs a [`StatePhase`] into an atomic so concurrent tasks can publish it.
#[derive(Debug)]
pub struct AtomicPhase(std::sync::atomic::AtomicU8);

impl AtomicPhase {
    pub fn new(phase: StatePhase) -> Self {
        Self(std::sync::atomic::AtomicU8::new(phase.as_u8()))
    }

    pub fn load(&self) -> StatePhase {
        StatePhase::from_u8(self.0.load(std::sync::atomic::Ordering::Acquire))
    }

    pub fn store(&self, phase: StatePhase) {
        self.0.store(phase.as_u8(), std::sync::atomic::Ordering::Release);
    }
}

impl Default for AtomicPhase {
    fn default() -> Self {
        Self::new(StatePhase::Waiting)
    }
}

/// Terminal outcome of one action instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    /// The work function returned `true` in time.
    Succeeded,
    /// The work function returned `false` (or panicked).
    Failed,
    /// The action's own timeout elapsed first.
    TimedOut,
    /// The run was cancelled before the action resolved.
    Abandoned,
}

/// How a workflow run terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every state reached `Left`.
    Done,
    /// An action failed or timed out and cancelled the run.
    Canceled,
    /// The global deadline elapsed.
    TimedOut,
    /// Nothing was registered.
    Empty,
}

impl RunOutcome {
    pub fn succeeded(self) -> bool {
        matches!(self, Self::Done)
    }

    /// Short label used in diagnostics and CLI output.
    pub fn label(self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::Canceled => "canceled",
            Self::TimedOut => "timeout",
            Self::Empty => "empty",
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Workflow event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum FlowEvent {
    /// Run started with this many registered states and actions.
    RunStarted {
        run_id: RunId,
        states: usize,
        actions: usize,
    },
    /// A state is blocked on its predecessor actions.
    StateWaiting { state: String, pending: usize },
    /// All predecessors signalled; successors are being dispatched.
    StateEntered { state: String },
    /// The state counted itself toward overall completion.
    StateLeft { state: String },
    /// An action began racing its work function against its timeout.
    ActionStarted { action: String, timeout_ms: u64 },
    ActionSucceeded { action: String, elapsed_ms: u64 },
    ActionFailed { action: String, elapsed_ms: u64 },
    ActionTimedOut { action: String, timeout_ms: u64 },
    ActionAbandoned { action: String },
    /// Run finished.
    RunComplete {
        run_id: RunId,
        outcome: RunOutcome,
        elapsed_ms: u64,
    },
}

impl FlowEvent {
    /// Build the event matching an action's terminal outcome.
    pub fn for_action(
        action: &str,
        outcome: ActionOutcome,
        elapsed_ms: u64,
        timeout_ms: u64,
    ) -> Self {
        let action = action.to_string();
        match outcome {
            ActionOutcome::Succeeded => Self::ActionSucceeded { action, elapsed_ms },
            ActionOutcome::Failed => Self::ActionFailed { action, elapsed_ms },
            ActionOutcome::TimedOut => Self::ActionTimedOut { action, timeout_ms },
            ActionOutcome::Abandoned => Self::ActionAbandoned { action },
        }
    }
}
