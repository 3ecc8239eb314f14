//! Resolution traces as Graphviz DOT.
//!
//! A [`TraceSink`] owns the output directory and numbers top-level queries.
//! Each query gets its own [`ResolutionTracer`], which must be started before
//! anything is recorded and is written out exactly once by `finish`:
//!
//! ```text
//!   <trace_dir>/resolution-0.dot
//!   <trace_dir>/resolution-1.dot
//!   ...
//! ```
//!
//! Edges are coloured by message kind: requests blue, answers green,
//! exhaustion red, blocked orange.

use crate::{ReasonerError, Result};
use parking_lot::Mutex;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

#[derive(Debug)]
pub struct TraceSink {
    directory: PathBuf,
    next_root_request: AtomicU64,
}

impl TraceSink {
    pub fn initialise(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory).map_err(|err| ReasonerError::Trace {
            path: directory.clone(),
            message: err.to_string(),
        })?;
        Ok(Self {
            directory,
            next_root_request: AtomicU64::new(0),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Tracer for the next top-level query.
    pub fn tracer(&self) -> ResolutionTracer {
        let root_request = self.next_root_request.fetch_add(1, Ordering::SeqCst);
        ResolutionTracer::new(
            self.directory.join(format!("resolution-{root_request}.dot")),
            root_request,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Request,
    Answer,
    Exhausted,
    Blocked,
}

impl EdgeKind {
    fn label(self) -> &'static str {
        match self {
            EdgeKind::Request => "request",
            EdgeKind::Answer => "answer",
            EdgeKind::Exhausted => "exhausted",
            EdgeKind::Blocked => "blocked",
        }
    }

    fn colour(self) -> &'static str {
        match self {
            EdgeKind::Request => "blue",
            EdgeKind::Answer => "green",
            EdgeKind::Exhausted => "red",
            EdgeKind::Blocked => "orange",
        }
    }
}

#[derive(Debug)]
struct Edge {
    sender: String,
    receiver: String,
    kind: EdgeKind,
    iteration: u32,
    bound: String,
}

#[derive(Debug)]
enum Phase {
    Idle,
    Started(Vec<Edge>),
    Finished,
}

/// Trace of one top-level query.
#[derive(Debug)]
pub struct ResolutionTracer {
    root_request: u64,
    path: PathBuf,
    phase: Mutex<Phase>,
}

impl ResolutionTracer {
    pub fn new(path: impl Into<PathBuf>, root_request: u64) -> Self {
        Self {
            root_request,
            path: path.into(),
            phase: Mutex::new(Phase::Idle),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn start(&self) -> Result<()> {
        let mut phase = self.phase.lock();
        match *phase {
            Phase::Idle => {
                *phase = Phase::Started(Vec::new());
                Ok(())
            }
            _ => Err(ReasonerError::illegal(format!(
                "trace {} started twice",
                self.root_request
            ))),
        }
    }

    /// Record one message. `bound` renders the bindings carried by the
    /// message, e.g. `{$x=#3}`.
    pub fn record(
        &self,
        kind: EdgeKind,
        sender: &str,
        receiver: &str,
        iteration: u32,
        bound: &str,
    ) -> Result<()> {
        match &mut *self.phase.lock() {
            Phase::Started(edges) => {
                edges.push(Edge {
                    sender: sender.to_string(),
                    receiver: receiver.to_string(),
                    kind,
                    iteration,
                    bound: bound.to_string(),
                });
                Ok(())
            }
            _ => Err(ReasonerError::illegal(format!(
                "{} recorded outside of trace {}",
                kind.label(),
                self.root_request
            ))),
        }
    }

    /// Write the DOT file. The tracer accepts nothing afterwards.
    pub fn finish(&self) -> Result<PathBuf> {
        let edges = {
            let mut phase = self.phase.lock();
            match std::mem::replace(&mut *phase, Phase::Finished) {
                Phase::Started(edges) => edges,
                previous => {
                    *phase = previous;
                    return Err(ReasonerError::illegal(format!(
                        "trace {} finished before it started",
                        self.root_request
                    )));
                }
            }
        };
        fs::write(&self.path, self.render(&edges)).map_err(|err| ReasonerError::Trace {
            path: self.path.clone(),
            message: err.to_string(),
        })?;
        debug!(path = %self.path.display(), edges = edges.len(), "wrote resolution trace");
        Ok(self.path.clone())
    }

    fn render(&self, edges: &[Edge]) -> String {
        fn dot_escape(s: &str) -> String {
            s.replace('\\', "\\\\").replace('"', "\\\"")
        }

        let mut out = String::new();
        let _ = writeln!(out, "digraph resolution_{} {{", self.root_request);
        out.push_str("  rankdir=LR;\n");
        out.push_str("  node [shape=box, fontname=\"Helvetica\"];\n");
        out.push_str("  edge [fontname=\"Helvetica\"];\n\n");
        for (seq, edge) in edges.iter().enumerate() {
            let _ = writeln!(
                out,
                "  \"{}\" -> \"{}\" [label=\"{}: {} it{} {}\", color=\"{}\"];",
                dot_escape(&edge.sender),
                dot_escape(&edge.receiver),
                seq,
                edge.kind.label(),
                edge.iteration,
                dot_escape(&edge.bound),
                edge.kind.colour()
            );
        }
        out.push_str("}\n");
        out
    }
}
