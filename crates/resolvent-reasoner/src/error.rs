use resolvent_logic::GraphError;
use std::path::PathBuf;

/// Failures that end a resolution.
///
/// Any of these raised inside a resolver terminates the whole registry and is
/// delivered once to the answer stream, so the type is `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReasonerError {
    #[error("resolution aborted: the graph was closed while resolving")]
    ResourceClosed,
    #[error("illegal resolution state: {0}")]
    IllegalState(String),
    #[error("resolution was terminated")]
    Terminated,
    #[error("no fixpoint after {0} iterations")]
    IterationLimit(u32),
    #[error("resolution trace `{path}`: {message}")]
    Trace { path: PathBuf, message: String },
    #[error("no tokio runtime to host resolvers")]
    NoRuntime,
    #[error("invalid rule set: {0}")]
    InvalidRules(String),
}

impl ReasonerError {
    pub(crate) fn illegal(message: impl Into<String>) -> Self {
        ReasonerError::IllegalState(message.into())
    }
}

impl From<GraphError> for ReasonerError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::Closed => ReasonerError::ResourceClosed,
            other => ReasonerError::IllegalState(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReasonerError>;
