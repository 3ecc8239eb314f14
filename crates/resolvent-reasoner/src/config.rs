use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Reasoner configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasonerConfig {
    /// Directory receiving one `.dot` trace per top-level query. Tracing is
    /// off when unset.
    pub trace_dir: Option<PathBuf>,
    /// Upper bound on fixpoint iterations per query.
    pub max_iterations: u32,
    /// Worker threads for a runtime built on behalf of the reasoner (CLI).
    /// `None` uses the tokio default.
    pub worker_threads: Option<usize>,
    /// Record how every inferred fact was concluded.
    pub explain: bool,
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            trace_dir: None,
            max_iterations: 64,
            worker_threads: None,
            explain: false,
        }
    }
}

impl ReasonerConfig {
    pub fn with_trace_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.trace_dir = Some(dir.into());
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_explain(mut self, explain: bool) -> Self {
        self.explain = explain;
        self
    }
}
