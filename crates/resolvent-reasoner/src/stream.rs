//! Answer streams: the caller's end of a top-level query.

use crate::explanation::Explanation;
use crate::message::{Message, ResolverId};
use crate::registry::Registry;
use crate::{ReasonerError, Result};
use resolvent_logic::{ConceptMap, Conjunction, Fact};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

/// How a query went, reported once it is exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionSummary {
    /// Iterations run, the final fixpoint check included.
    pub iterations: u32,
    /// Distinct answers delivered.
    pub answers: usize,
    /// Iteration that produced the last new answer.
    pub last_productive_iteration: Option<u32>,
    /// Resolvers still blocked after the query concluded.
    pub blocked_resolvers: usize,
    /// Resolvers created for the query, the root included.
    pub resolvers: usize,
    pub subsumption_hits: usize,
    /// Trace file written for the query, if tracing.
    pub trace: Option<PathBuf>,
}

impl fmt::Display for ResolutionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} answers in {} iteration(s), {} resolvers, {} blocked, {} subsumption hits",
            self.answers, self.iterations, self.resolvers, self.blocked_resolvers, self.subsumption_hits
        )
    }
}

/// What the root reports to the stream.
#[derive(Debug)]
pub(crate) enum RootEvent {
    Answer(ConceptMap),
    Exhausted(ResolutionSummary),
    Failed(ReasonerError),
}

/// Pull-based stream of the answers to one query.
///
/// Each call to [`next`](Self::next) asks the root for one more answer, so
/// resolution only runs as far as the caller reads. Dropping the stream
/// stops every resolver of the query.
pub struct AnswerStream {
    registry: Arc<Registry>,
    root: ResolverId,
    query: Conjunction,
    events: UnboundedReceiver<RootEvent>,
    summary: Option<ResolutionSummary>,
    done: bool,
}

impl AnswerStream {
    pub(crate) fn new(
        registry: Arc<Registry>,
        root: ResolverId,
        events: UnboundedReceiver<RootEvent>,
        query: Conjunction,
    ) -> Self {
        Self {
            registry,
            root,
            query,
            events,
            summary: None,
            done: false,
        }
    }

    /// The next answer, `None` once the query is exhausted. An error ends
    /// the stream.
    pub async fn next(&mut self) -> Option<Result<ConceptMap>> {
        if self.done {
            return None;
        }
        if let Err(err) = self.registry.send(self.root, Message::Pull) {
            self.done = true;
            return Some(Err(err));
        }
        match self.events.recv().await {
            Some(RootEvent::Answer(answer)) => Some(Ok(answer)),
            Some(RootEvent::Exhausted(summary)) => {
                self.done = true;
                self.summary = Some(summary);
                self.registry.close();
                None
            }
            Some(RootEvent::Failed(err)) => {
                self.done = true;
                Some(Err(err))
            }
            None => {
                self.done = true;
                Some(Err(ReasonerError::Terminated))
            }
        }
    }

    /// Drain the stream.
    pub async fn collect(&mut self) -> Result<Vec<ConceptMap>> {
        let mut answers = Vec::new();
        while let Some(answer) = self.next().await {
            answers.push(answer?);
        }
        Ok(answers)
    }

    /// Available once the stream is exhausted.
    pub fn summary(&self) -> Option<&ResolutionSummary> {
        self.summary.as_ref()
    }

    pub fn query(&self) -> &Conjunction {
        &self.query
    }

    /// Every rule application that concluded `fact` during this query so
    /// far. Empty for stored facts, and unless the reasoner explains.
    pub fn explain(&self, fact: &Fact) -> Vec<Explanation> {
        self.registry.explanations_of(fact)
    }

    /// Explanations of the inferred facts an answer rests on: one lookup per
    /// query atom, grounded by `answer`.
    pub fn explain_answer(&self, answer: &ConceptMap) -> Vec<Explanation> {
        self.query
            .atoms()
            .iter()
            .filter_map(|atom| atom.fact(answer))
            .flat_map(|fact| self.explain(&fact))
            .collect()
    }

    /// Every explanation recorded for this query, ordered by conclusion.
    pub fn explanations(&self) -> Vec<Explanation> {
        self.registry.explanations()
    }
}

impl Drop for AnswerStream {
    fn drop(&mut self) {
        self.registry.close();
    }
}
