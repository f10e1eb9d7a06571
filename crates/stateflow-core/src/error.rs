use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Graph errors
    #[error("Workflow has no start state")]
    NoStartState,

    #[error("Workflow has more than one start state: {}", .0.join(", "))]
    AmbiguousStartState(Vec<String>),

    #[error("State not found: {0}")]
    UnknownState(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambiguous_start_lists_candidates() {
        let err = FlowError::AmbiguousStartState(vec!["a".into(), "b".into()]);
        assert_eq!(
            err.to_string(),
            "Workflow has more than one start state: a, b"
        );
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: FlowError = io.into();
        assert!(matches!(err, FlowError::Io(_)));
    }
}
