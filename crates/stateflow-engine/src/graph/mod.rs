//! Graph runtime: states joined by timeout-bounded actions.
//!
//! A `WorkFlow` owns every `State` and `Action` registered through
//! `add_edge`. Running it spawns one task per state; each state waits for its
//! predecessor actions, then launches its successor actions concurrently. Each
//! action races its work function against its own timeout. The run itself
//! races completion of every state against cancellation and a global deadline.

pub mod action;
pub mod state;
pub mod workflow;

pub use action::{Action, ActionId, WorkFn};
pub use state::{State, StateId};
pub use workflow::{RunReport, WorkFlow};
