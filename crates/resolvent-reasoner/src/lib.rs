//! Resolvent reasoner: actor-based backward chaining.
//!
//! A query is answered by a network of resolvers exchanging messages:
//!
//! ```text
//! ┌──────────────┐  Pull   ┌──────┐ Visit ┌──────────────┐ Visit ┌────────────┐
//! │ AnswerStream │────────►│ Root │──────►│ Concludable  │──────►│ Conclusion │
//! └──────────────┘◄────────└──────┘◄──────└──────────────┘◄──────└────────────┘
//!                  answer         Answer   ▲   │ traversal  Answer │   ▲
//!                                 Fail     │   ▼                   │   │ Materialise
//!                                 Blocked  │ ┌───────┐      Visit  ▼   │
//!                                          └─│ Graph │◄──┐ ┌───────────┐ ┌──────────────┐
//!                                            └───────┘   └─│ Condition │ │ Materialiser │
//!                                                          └───────────┘ └──────────────┘
//! ```
//!
//! Nested disjunctions are answered by a disjunction resolver fanning out to
//! one branch resolver per alternative. Negations are decided per binding by
//! an independent sub-query over the same graph, which is sound because rule
//! sets must be stratified.
//!
//! Recursive rules make the network cyclic. A request that revisits a
//! concludable already on its exploration path is answered from that
//! resolver's cache and reports `Blocked` when the cache runs dry. The root
//! repeats the query in further iterations until no resolver's cache grows,
//! then concludes.
//!
//! ## Usage
//!
//! ```ignore
//! let reasoner = Reasoner::new(graph, rules, ReasonerConfig::default())?;
//! let mut answers = reasoner.resolve(query)?;
//! while let Some(answer) = answers.next().await {
//!     println!("{}", answer?);
//! }
//! ```

pub mod answer;
pub mod cache;
pub mod config;
pub mod downstream;
pub mod error;
pub mod explanation;
pub mod message;
pub mod progress;
pub mod tracer;

mod actor;
mod materialiser;
mod registry;
mod reiteration;
mod resolver;
mod state;
mod stream;

pub use answer::Partial;
pub use cache::{AnswerCache, Poller};
pub use config::ReasonerConfig;
pub use downstream::DownstreamManager;
pub use error::{ReasonerError, Result};
pub use explanation::Explanation;
pub use message::{Cycle, Request, ResolverId, Response, Revisit, Template, TraceId, Visit};
pub use progress::{AnswerCountProgress, ProgressPredicate};
pub use state::RequestStatus;
pub use stream::{AnswerStream, ResolutionSummary};
pub use tracer::{EdgeKind, ResolutionTracer, TraceSink};

use registry::{ReasonerContext, Registry};
use resolvent_logic::{check_stratified, ConceptManager, ConceptMap, Conjunction, Rule, TraversalEngine};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::debug;

/// Answers conjunctive queries over a graph under a fixed rule set.
///
/// Queries are independent: each gets its own resolvers, and any number may
/// run at once.
pub struct Reasoner {
    context: ReasonerContext,
    traces: Option<TraceSink>,
    next_query: AtomicU64,
}

impl Reasoner {
    /// Must be called from inside a tokio runtime, which will host the
    /// resolvers of every query. Fails when a rule negates something that
    /// depends on its own conclusion.
    pub fn new<G>(graph: Arc<G>, rules: Vec<Rule>, config: ReasonerConfig) -> Result<Self>
    where
        G: TraversalEngine + ConceptManager + 'static,
    {
        check_stratified(&rules).map_err(|err| ReasonerError::InvalidRules(err.to_string()))?;
        let runtime = Handle::try_current().map_err(|_| ReasonerError::NoRuntime)?;
        let traces = config.trace_dir.clone().map(TraceSink::initialise).transpose()?;
        debug!(rules = rules.len(), tracing = traces.is_some(), "reasoner created");
        Ok(Self {
            context: ReasonerContext {
                traversal: graph.clone(),
                concepts: graph,
                rules: rules.into(),
                progress: Arc::new(AnswerCountProgress),
                max_iterations: config.max_iterations,
                explain: config.explain,
                runtime,
            },
            traces,
            next_query: AtomicU64::new(0),
        })
    }

    /// Replace the rule deciding when a blocked cycle is worth revisiting.
    pub fn with_progress_predicate(mut self, predicate: impl ProgressPredicate + 'static) -> Self {
        self.context.progress = Arc::new(predicate);
        self
    }

    pub fn rules(&self) -> &[Rule] {
        &self.context.rules
    }

    /// Start resolving `query`. Nothing runs until the stream is read.
    pub fn resolve(&self, query: Conjunction) -> Result<AnswerStream> {
        let trace_id = TraceId(self.next_query.fetch_add(1, Ordering::SeqCst));
        let tracer = self.traces.as_ref().map(TraceSink::tracer);
        let (registry, events) = Registry::new(self.context.clone(), trace_id, tracer);
        match registry.start(query.clone()) {
            Ok(root) => Ok(AnswerStream::new(registry, root, events, query)),
            Err(err) => {
                registry.close();
                Err(err)
            }
        }
    }

    /// Every answer to `query`, in delivery order.
    pub async fn resolve_all(&self, query: Conjunction) -> Result<Vec<ConceptMap>> {
        self.resolve(query)?.collect().await
    }
}
