use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};

/// Top-level workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    #[serde(default)]
    pub workflow: WorkflowSection,
    /// JSONL run logging. Absent means no run log is written.
    #[serde(default)]
    pub log: Option<LogConfig>,
    #[serde(default)]
    pub edges: Vec<EdgeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSection {
    #[serde(default = "default_workflow_name")]
    pub name: String,
    /// Global deadline for the whole run.
    #[serde(default = "default_workflow_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            name: default_workflow_name(),
            timeout_ms: default_workflow_timeout_ms(),
        }
    }
}

impl WorkflowSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_workflow_name() -> String { "workflow".to_string() }
fn default_workflow_timeout_ms() -> u64 { 60_000 }

/// JSONL run logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Enable run logging (default: true when section is present).
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// Directory for log files. Default: ./logs
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    /// Logging level: 1 = run outcome only, 2 = plus state transitions, 3 = plus action events.
    #[serde(default = "default_log_level")]
    pub level: u8,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            level: default_log_level(),
        }
    }
}

impl LogConfig {
    pub fn log_dir(&self) -> PathBuf {
        PathBuf::from(&self.log_dir)
    }
}

fn default_log_enabled() -> bool { true }
fn default_log_dir() -> String { "logs".to_string() }
fn default_log_level() -> u8 { 2 }

/// One `prev --action--> post` edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeConfig {
    pub from: String,
    pub action: String,
    pub to: String,
    /// Per-action timeout.
    #[serde(default = "default_action_timeout_ms")]
    pub timeout_ms: u64,
    /// Shell command the CLI runs as this action's work function.
    #[serde(default)]
    pub command: Option<String>,
}

impl EdgeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_action_timeout_ms() -> u64 { 30_000 }

impl FlowConfig {
    /// Load a definition from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FlowError::ConfigNotFound(path.display().to_string()),
            _ => FlowError::Io(e),
        })?;
        Self::parse(&content)
    }

    /// Parse a definition from TOML text, with env var expansion.
    pub fn parse(content: &str) -> Result<Self> {
        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(content);

        toml::from_str(&expanded).map_err(|e| FlowError::Config(e.to_string()))
    }

    /// Check the definition before anything is built from it.
    ///
    /// Cycles are not detected; an acyclic graph is the caller's responsibility.
    pub fn validate(&self) -> Result<()> {
        if self.edges.is_empty() {
            return Err(FlowError::Config("workflow defines no edges".into()));
        }
        if self.workflow.timeout_ms == 0 {
            return Err(FlowError::Config("workflow.timeout_ms must be positive".into()));
        }
        for edge in &self.edges {
            if edge.from.is_empty() || edge.to.is_empty() || edge.action.is_empty() {
                return Err(FlowError::Config(format!(
                    "edge '{}' -> '{}' -> '{}' has an empty name",
                    edge.from, edge.action, edge.to
                )));
            }
            if edge.timeout_ms == 0 {
                return Err(FlowError::Config(format!(
                    "action '{}' timeout_ms must be positive",
                    edge.action
                )));
            }
        }
        self.start_state().map(|_| ())
    }

    /// The unique state that no edge leads into.
    pub fn start_state(&self) -> Result<String> {
        let targets: BTreeSet<&str> = self.edges.iter().map(|e| e.to.as_str()).collect();
        let mut starts: Vec<String> = self
            .state_names()
            .into_iter()
            .filter(|s| !targets.contains(s.as_str()))
            .collect();
        match starts.len() {
            0 => Err(FlowError::NoStartState),
            1 => Ok(starts.remove(0)),
            _ => Err(FlowError::AmbiguousStartState(starts)),
        }
    }

    /// States no edge leaves from, sorted by name.
    pub fn end_states(&self) -> Vec<String> {
        let sources: BTreeSet<&str> = self.edges.iter().map(|e| e.from.as_str()).collect();
        self.state_names()
            .into_iter()
            .filter(|s| !sources.contains(s.as_str()))
            .collect()
    }

    /// Every distinct state named by an edge, sorted.
    pub fn state_names(&self) -> Vec<String> {
        let names: BTreeSet<&str> = self
            .edges
            .iter()
            .flat_map(|e| [e.from.as_str(), e.to.as_str()])
            .collect();
        names.into_iter().map(String::from).collect()
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(from: &str, action: &str, to: &str) -> EdgeConfig {
        EdgeConfig {
            from: from.into(),
            action: action.into(),
            to: to.into(),
            timeout_ms: 1000,
            command: None,
        }
    }

    fn config(edges: Vec<EdgeConfig>) -> FlowConfig {
        FlowConfig {
            workflow: WorkflowSection::default(),
            log: None,
            edges,
        }
    }

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_STATEFLOW_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_STATEFLOW_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_STATEFLOW_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_STATEFLOW_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_STATEFLOW_VAR}\"");
    }

    #[test]
    fn test_defaults_from_minimal_toml() {
        let toml_str = r#"
[[edges]]
from = "start"
action = "build"
to = "end"
"#;
        let config = FlowConfig::parse(toml_str).unwrap();
        assert_eq!(config.workflow.name, "workflow");
        assert_eq!(config.workflow.timeout_ms, 60_000);
        assert!(config.log.is_none());
        assert_eq!(config.edges.len(), 1);
        assert_eq!(config.edges[0].timeout_ms, 30_000);
        assert!(config.edges[0].command.is_none());
    }

    #[test]
    fn test_log_section_defaults() {
        let toml_str = r#"
[log]

[[edges]]
from = "a"
action = "x"
to = "b"
"#;
        let config = FlowConfig::parse(toml_str).unwrap();
        let log = config.log.unwrap();
        assert!(log.enabled);
        assert_eq!(log.log_dir, "logs");
        assert_eq!(log.level, 2);
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let err = FlowConfig::parse("[[edges]]\nfrom = ").unwrap_err();
        assert!(matches!(err, FlowError::Config(_)));
    }

    #[test]
    fn test_diamond_start_and_ends() {
        let config = config(vec![
            edge("start", "left", "l"),
            edge("start", "right", "r"),
            edge("l", "join_l", "end"),
            edge("r", "join_r", "end"),
        ]);
        assert!(config.validate().is_ok());
        assert_eq!(config.start_state().unwrap(), "start");
        assert_eq!(config.end_states(), vec!["end".to_string()]);
        assert_eq!(config.state_names().len(), 4);
    }

    #[test]
    fn test_two_start_states_rejected() {
        let config = config(vec![edge("a", "x", "c"), edge("b", "y", "c")]);
        match config.validate() {
            Err(FlowError::AmbiguousStartState(names)) => {
                assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected ambiguous start, got {other:?}"),
        }
    }

    #[test]
    fn test_cycle_without_entry_has_no_start() {
        let config = config(vec![edge("a", "x", "b"), edge("b", "y", "a")]);
        assert!(matches!(config.validate(), Err(FlowError::NoStartState)));
    }

    #[test]
    fn test_empty_and_zero_timeouts_rejected() {
        assert!(config(vec![]).validate().is_err());

        let mut zero = edge("a", "x", "b");
        zero.timeout_ms = 0;
        assert!(config(vec![zero]).validate().is_err());

        let mut cfg = config(vec![edge("a", "x", "b")]);
        cfg.workflow.timeout_ms = 0;
        assert!(cfg.validate().is_err());

        assert!(config(vec![edge("", "x", "b")]).validate().is_err());
    }
}
