use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use stateflow_core::event::EventBus;
use stateflow_core::types::{FlowEvent, RunId};

/// JSONL run logger.
///
/// Subscribes to the EventBus and writes structured log entries as JSONL
/// (one JSON object per line). This format is append-only and crash-resilient:
/// even if the process dies mid-run, all previously written lines are intact.
pub struct RunLogger {
    log_dir: PathBuf,
    level: u8,
}

/// A single log entry written to the JSONL file.
#[derive(Serialize)]
struct LogEntry {
    timestamp: String,
    run_id: String,
    event_type: String,
    /// State or action the event is about.
    #[serde(skip_serializing_if = "Option::is_none")]
    subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

impl RunLogger {
    /// Create a new RunLogger.
    ///
    /// `log_dir` is the base directory; logs are written to
    /// `{log_dir}/{run_id}/{timestamp}.jsonl`.
    /// `level` controls verbosity: 1=run outcome, 2=state transitions, 3=action events.
    pub fn new(log_dir: PathBuf, level: u8) -> Self {
        Self { log_dir, level }
    }

    /// Subscribe now and write in the background.
    ///
    /// Subscribing before the task starts means no event published after this
    /// call is missed.
    pub fn spawn(
        self,
        event_bus: &EventBus,
        run_id: RunId,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let rx = event_bus.subscribe();
        tokio::spawn(self.run(rx, run_id, cancel))
    }

    /// Write JSONL until cancellation, RunComplete, or the bus closing.
    pub async fn run(
        self,
        mut rx: broadcast::Receiver<FlowEvent>,
        run_id: RunId,
        cancel: CancellationToken,
    ) {
        let run_dir = self.log_dir.join(&run_id.0);
        if let Err(e) = tokio::fs::create_dir_all(&run_dir).await {
            error!(error = %e, "Failed to create log directory");
            return;
        }

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_path = run_dir.join(format!("{}.jsonl", timestamp));

        let file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, path = %log_path.display(), "Failed to open log file");
                return;
            }
        };

        info!(path = %log_path.display(), "RunLogger started");

        let mut writer = tokio::io::BufWriter::new(file);
        let rid = run_id.0.clone();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("RunLogger cancelled");
                    break;
                }
                result = rx.recv() => {
                    match result {
                        Ok(event) => {
                            if let Some(entry) = self.event_to_entry(&rid, &event) {
                                if let Ok(json) = serde_json::to_string(&entry) {
                                    let line = format!("{}\n", json);
                                    if let Err(e) = writer.write_all(line.as_bytes()).await {
                                        error!(error = %e, "Failed to write log entry");
                                        break;
                                    }
                                    // Flush after each entry for crash resilience
                                    if let Err(e) = writer.flush().await {
                                        error!(error = %e, "Failed to flush log");
                                    }
                                }
                            }

                            if matches!(event, FlowEvent::RunComplete { .. }) {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!(skipped = n, "RunLogger lagged, skipped events");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("EventBus closed, RunLogger stopping");
                            break;
                        }
                    }
                }
            }
        }

        // Final flush
        writer.flush().await.ok();
        debug!(path = %log_path.display(), "RunLogger finished");
    }

    /// Convert a FlowEvent to a log entry (returns None if filtered by level).
    fn event_to_entry(&self, run_id: &str, event: &FlowEvent) -> Option<LogEntry> {
        let entry = |event_type: &str, subject: Option<&str>, detail: Option<serde_json::Value>| {
            Some(LogEntry {
                timestamp: Utc::now().to_rfc3339(),
                run_id: run_id.to_string(),
                event_type: event_type.to_string(),
                subject: subject.map(String::from),
                detail,
            })
        };

        match event {
            // L1: Always logged (run summary)
            FlowEvent::RunStarted {
                states, actions, ..
            } => entry(
                "run_started",
                None,
                Some(serde_json::json!({ "states": states, "actions": actions })),
            ),
            FlowEvent::RunComplete {
                outcome,
                elapsed_ms,
                ..
            } => entry(
                "run_complete",
                None,
                Some(serde_json::json!({
                    "outcome": outcome,
                    "elapsed_ms": elapsed_ms,
                })),
            ),

            // L2: State transitions (level >= 2)
            FlowEvent::StateWaiting { state, pending } if self.level >= 2 => entry(
                "state_waiting",
                Some(state.as_str()),
                Some(serde_json::json!({ "pending": pending })),
            ),
            FlowEvent::StateEntered { state } if self.level >= 2 => {
                entry("state_entered", Some(state.as_str()), None)
            }
            FlowEvent::StateLeft { state } if self.level >= 2 => {
                entry("state_left", Some(state.as_str()), None)
            }

            // L3: Action events (level >= 3)
            FlowEvent::ActionStarted { action, timeout_ms } if self.level >= 3 => entry(
                "action_started",
                Some(action.as_str()),
                Some(serde_json::json!({ "timeout_ms": timeout_ms })),
            ),
            FlowEvent::ActionSucceeded { action, elapsed_ms } if self.level >= 3 => entry(
                "action_succeeded",
                Some(action.as_str()),
                Some(serde_json::json!({ "elapsed_ms": elapsed_ms })),
            ),
            FlowEvent::ActionFailed { action, elapsed_ms } if self.level >= 3 => entry(
                "action_failed",
                Some(action.as_str()),
                Some(serde_json::json!({ "elapsed_ms": elapsed_ms })),
            ),
            FlowEvent::ActionTimedOut { action, timeout_ms } if self.level >= 3 => entry(
                "action_timed_out",
                Some(action.as_str()),
                Some(serde_json::json!({ "timeout_ms": timeout_ms })),
            ),
            FlowEvent::ActionAbandoned { action } if self.level >= 3 => {
                entry("action_abandoned", Some(action.as_str()), None)
            }

            _ => None,
        }
    }
}
