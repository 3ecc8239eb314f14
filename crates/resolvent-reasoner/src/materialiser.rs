//! The materialiser: sole writer of inferred facts.
//!
//! Conclusion resolvers send it one request per condition answer. All writes
//! for a query funnel through this single actor, so two rules concluding the
//! same fact can never both observe it as new.

use crate::actor::Actor;
use crate::message::{Message, ResolverId, TraceId};
use crate::registry::Registry;
use crate::tracer::EdgeKind;
use crate::{ReasonerError, Result};
use resolvent_logic::{Atom, ConceptManager, ConceptMap};
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone)]
pub struct MaterialiserRequest {
    pub id: u64,
    pub sender: ResolverId,
    pub iteration: u32,
    pub trace: TraceId,
    /// The rule conclusion to write.
    pub conclusion: Atom,
    /// A condition answer binding every variable of `conclusion`.
    pub partial: ConceptMap,
}

#[derive(Debug, Clone)]
pub struct Materialisation {
    pub request_id: u64,
    /// Bindings of the conclusion's variables when the fact now exists as an
    /// inference, `None` when nothing was concluded.
    pub answer: Option<ConceptMap>,
}

pub(crate) struct Materialiser {
    id: ResolverId,
    concepts: Arc<dyn ConceptManager>,
    registry: Arc<Registry>,
}

impl Materialiser {
    pub(crate) fn new(id: ResolverId, concepts: Arc<dyn ConceptManager>, registry: Arc<Registry>) -> Self {
        Self {
            id,
            concepts,
            registry,
        }
    }

    fn materialise(&self, request: &MaterialiserRequest) -> Result<Option<ConceptMap>> {
        let Some(tuple) = request.conclusion.ground(&request.partial) else {
            return Ok(None);
        };
        let insertion = self
            .concepts
            .materialise(request.conclusion.predicate(), &tuple)?;
        trace!(conclusion = %request.conclusion, ?insertion, "materialised");
        Ok(insertion
            .is_inferred()
            .then(|| request.partial.project(&request.conclusion.variables())))
    }
}

impl Actor for Materialiser {
    fn id(&self) -> ResolverId {
        self.id
    }

    fn name(&self) -> &str {
        "Materialiser"
    }

    fn handle(&mut self, message: Message) -> Result<()> {
        let kind = message.kind();
        let Message::Materialise(request) = message else {
            return Err(ReasonerError::illegal(format!(
                "materialiser cannot handle {kind}"
            )));
        };
        let answer = self.materialise(&request)?;
        let edge = if answer.is_some() {
            EdgeKind::Answer
        } else {
            EdgeKind::Exhausted
        };
        self.registry
            .trace(edge, self.id, request.sender, request.iteration, &request.partial)?;
        self.registry.send(
            request.sender,
            Message::Materialised(Materialisation {
                request_id: request.id,
                answer,
            }),
        )
    }
}
