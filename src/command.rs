use std::process::{Command, Stdio};

use tracing::{debug, warn};

use stateflow_core::config::EdgeConfig;

/// Work function for an edge: run its shell command and succeed on exit status 0.
///
/// An edge without a command succeeds immediately. The command sees the
/// action name in `STATEFLOW_ACTION`; its output is discarded.
pub fn work_fn(edge: &EdgeConfig) -> impl Fn() -> bool + Send + Sync + 'static {
    let action = edge.action.clone();
    let command = edge.command.clone();
    move || match &command {
        Some(cmd) => run_command(&action, cmd),
        None => {
            debug!(action = %action, "No command configured");
            true
        }
    }
}

fn run_command(action: &str, cmd: &str) -> bool {
    let status = Command::new("sh")
        .args(["-c", cmd])
        .env("STATEFLOW_ACTION", action)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match status {
        Ok(s) if s.success() => true,
        Ok(s) => {
            warn!(action = %action, command = %cmd, code = s.code(), "Command exited non-zero");
            false
        }
        Err(e) => {
            warn!(action = %action, command = %cmd, error = %e, "Command failed to execute");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(command: Option<&str>) -> EdgeConfig {
        EdgeConfig {
            from: "start".into(),
            action: "build".into(),
            to: "end".into(),
            timeout_ms: 1000,
            command: command.map(String::from),
        }
    }

    #[test]
    fn exit_status_decides_outcome() {
        assert!(work_fn(&edge(Some("true")))());
        assert!(!work_fn(&edge(Some("false")))());
        assert!(!work_fn(&edge(Some("exit 3")))());
    }

    #[test]
    fn missing_command_succeeds() {
        assert!(work_fn(&edge(None))());
    }

    #[test]
    fn command_sees_action_name() {
        assert!(work_fn(&edge(Some("test \"$STATEFLOW_ACTION\" = build")))());
    }
}
