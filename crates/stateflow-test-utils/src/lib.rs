//! Fixtures shared by the stateflow test suites.
//!
//! Work functions here block the calling thread the same way real work does,
//! so timings are wall-clock and kept in the tens or hundreds of milliseconds.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use stateflow_core::types::FlowEvent;

pub fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// Work function that sleeps `ms` milliseconds, then returns `result`.
pub fn sleeping(ms: u64, result: bool) -> impl Fn() -> bool + Send + Sync + 'static {
    move || {
        std::thread::sleep(Duration::from_millis(ms));
        result
    }
}

/// Work function that returns `result` immediately.
pub fn instant(result: bool) -> impl Fn() -> bool + Send + Sync + 'static {
    move || result
}

/// Counts how many times the work functions it hands out were invoked.
#[derive(Debug, Clone, Default)]
pub struct CallCounter {
    calls: Arc<AtomicUsize>,
}

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn work(&self, ms: u64, result: bool) -> impl Fn() -> bool + Send + Sync + 'static {
        let calls = self.calls.clone();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            if ms > 0 {
                std::thread::sleep(Duration::from_millis(ms));
            }
            result
        }
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Write `content` to a temp `.toml` file that lives as long as the handle.
pub fn write_temp_toml(content: &str) -> tempfile::NamedTempFile {
    let mut tmp = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("create temp file");
    tmp.write_all(content.as_bytes()).expect("write toml");
    tmp
}

/// Take every event currently buffered on a receiver.
pub fn drain_events(rx: &mut broadcast::Receiver<FlowEvent>) -> Vec<FlowEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}
