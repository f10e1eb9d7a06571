pub mod countdown;
pub mod graph;
pub mod run_log;

pub use countdown::Countdown;
pub use graph::{Action, RunReport, State, WorkFlow, WorkFn};
pub use run_log::RunLogger;

use std::time::Duration;

/// Whole milliseconds in `d`, saturating at `u64::MAX`.
pub fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
