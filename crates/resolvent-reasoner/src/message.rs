//! The resolution protocol.
//!
//! ```text
//!            Visit / Revisit                   Pull
//!   upstream ───────────────▶ downstream    stream ──▶ root
//!            ◀───────────────
//!         Answer | Fail | Blocked
//! ```
//!
//! Every request is answered by exactly one response, addressed to the
//! request's sender. Requests are identified by their [`Template`]; two visits
//! with equal templates are the same request even if their trace ids differ.

use crate::answer::Partial;
use crate::materialiser::{Materialisation, MaterialiserRequest};
use crate::reiteration::{ReiterationQuery, ReiterationReply};
use crate::resolver::negation::NegationCheck;
use crate::{ReasonerError, Result};
use resolvent_logic::ConceptMap;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Index of an actor in the registry arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResolverId(u32);

impl ResolverId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index as u32)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ResolverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Identity of a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Template {
    sender: ResolverId,
    receiver: ResolverId,
    partial: Partial,
    plan_index: Option<usize>,
}

impl Template {
    pub fn sender(&self) -> ResolverId {
        self.sender
    }

    pub fn receiver(&self) -> ResolverId {
        self.receiver
    }

    pub fn partial(&self) -> &Partial {
        &self.partial
    }

    /// Which alternative of the sender's plan this request serves.
    pub fn plan_index(&self) -> Option<usize> {
        self.plan_index
    }
}

/// Top-level query a request belongs to. Diagnostic only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId(pub u64);

/// A request for answers.
#[derive(Debug, Clone)]
pub struct Visit {
    template: Arc<Template>,
    trace: TraceId,
}

impl Visit {
    pub fn new(
        sender: ResolverId,
        receiver: ResolverId,
        partial: Partial,
        plan_index: Option<usize>,
        trace: TraceId,
    ) -> Self {
        Self {
            template: Arc::new(Template {
                sender,
                receiver,
                partial,
                plan_index,
            }),
            trace,
        }
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub(crate) fn template_arc(&self) -> Arc<Template> {
        self.template.clone()
    }

    pub fn sender(&self) -> ResolverId {
        self.template.sender
    }

    pub fn receiver(&self) -> ResolverId {
        self.template.receiver
    }

    pub fn partial(&self) -> &Partial {
        &self.template.partial
    }

    pub fn plan_index(&self) -> Option<usize> {
        self.template.plan_index
    }

    pub fn trace(&self) -> TraceId {
        self.trace
    }
}

impl PartialEq for Visit {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.template, &other.template) || self.template == other.template
    }
}

impl Eq for Visit {}

impl Hash for Visit {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.template.hash(state);
    }
}

/// A loop in the exploration graph, closed at `end` when `end` had `seen`
/// answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cycle {
    end: ResolverId,
    seen: usize,
}

impl Cycle {
    pub fn new(end: ResolverId, seen: usize) -> Self {
        Self { end, seen }
    }

    pub fn end(&self) -> ResolverId {
        self.end
    }

    pub fn seen(&self) -> usize {
        self.seen
    }
}

/// A repeat of an earlier visit, sent because one of `cycles` may now yield
/// more answers.
#[derive(Debug, Clone)]
pub struct Revisit {
    visit: Visit,
    cycles: BTreeSet<Cycle>,
}

impl Revisit {
    pub fn new(visit: Visit, cycles: BTreeSet<Cycle>) -> Result<Self> {
        if cycles.is_empty() {
            return Err(ReasonerError::illegal("revisit without cycles"));
        }
        Ok(Self { visit, cycles })
    }

    pub fn visit(&self) -> &Visit {
        &self.visit
    }

    pub fn cycles(&self) -> &BTreeSet<Cycle> {
        &self.cycles
    }
}

#[derive(Debug, Clone)]
pub enum Request {
    Visit(Visit),
    Revisit(Revisit),
}

impl Request {
    pub fn visit(&self) -> &Visit {
        match self {
            Request::Visit(visit) => visit,
            Request::Revisit(revisit) => revisit.visit(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Response {
    Answer { request: Visit, answer: ConceptMap },
    Fail { request: Visit },
    Blocked { request: Visit, cycles: BTreeSet<Cycle> },
}

impl Response {
    pub fn request(&self) -> &Visit {
        match self {
            Response::Answer { request, .. }
            | Response::Fail { request }
            | Response::Blocked { request, .. } => request,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Response::Answer { .. } => "answer",
            Response::Fail { .. } => "exhausted",
            Response::Blocked { .. } => "blocked",
        }
    }
}

/// Everything an actor can receive.
#[derive(Debug)]
pub enum Message {
    Request { request: Request, iteration: u32 },
    Response { response: Response, iteration: u32 },
    Materialise(MaterialiserRequest),
    Materialised(Materialisation),
    Reiteration(ReiterationQuery),
    Reiterated(ReiterationReply),
    Conclude { root: ResolverId },
    Concluded { sender: ResolverId },
    /// A negation sub-query finished (negation resolvers only).
    Checked(NegationCheck),
    /// The answer stream wants one more answer (root only).
    Pull,
    Terminate,
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Request { request: Request::Visit(_), .. } => "visit",
            Message::Request { request: Request::Revisit(_), .. } => "revisit",
            Message::Response { response, .. } => response.kind(),
            Message::Materialise(_) => "materialise",
            Message::Materialised(_) => "materialised",
            Message::Reiteration(_) => "reiteration",
            Message::Reiterated(_) => "reiterated",
            Message::Conclude { .. } => "conclude",
            Message::Concluded { .. } => "concluded",
            Message::Checked(_) => "checked",
            Message::Pull => "pull",
            Message::Terminate => "terminate",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resolvent_logic::{Concept, Variable};
    use std::collections::HashSet;

    fn partial() -> Partial {
        let concepts: ConceptMap = [(Variable::new("x"), Concept::new(1))].into_iter().collect();
        Partial::root(concepts, [Variable::new("y")].into_iter().collect())
    }

    #[test]
    fn test_identity_ignores_trace() {
        let a = Visit::new(ResolverId::new(0), ResolverId::new(1), partial(), Some(0), TraceId(1));
        let b = Visit::new(ResolverId::new(0), ResolverId::new(1), partial(), Some(0), TraceId(2));
        let c = Visit::new(ResolverId::new(0), ResolverId::new(1), partial(), Some(1), TraceId(1));
        assert_eq!(a, b);
        assert_ne!(a, c);
        let set: HashSet<Visit> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_revisit_requires_cycles() {
        let visit = Visit::new(ResolverId::new(0), ResolverId::new(1), partial(), None, TraceId(0));
        assert!(Revisit::new(visit.clone(), BTreeSet::new()).is_err());
        let cycles: BTreeSet<Cycle> = [Cycle::new(ResolverId::new(1), 0)].into_iter().collect();
        assert_eq!(Revisit::new(visit, cycles).unwrap().cycles().len(), 1);
    }

    #[test]
    fn test_ancestry_tracks_exploration_path() {
        let root = Visit::new(ResolverId::new(0), ResolverId::new(0), partial(), None, TraceId(0));
        let first = Visit::new(
            ResolverId::new(0),
            ResolverId::new(1),
            Partial::derived(ConceptMap::new(), BTreeSet::new(), &root),
            Some(0),
            TraceId(0),
        );
        let second = Visit::new(
            ResolverId::new(1),
            ResolverId::new(2),
            Partial::derived(ConceptMap::new(), BTreeSet::new(), &first),
            None,
            TraceId(0),
        );
        assert!(second.partial().passes_through(ResolverId::new(1)));
        assert!(second.partial().passes_through(ResolverId::new(0)));
        assert!(!second.partial().passes_through(ResolverId::new(2)));
        assert_eq!(second.partial().ancestors().count(), 2);
    }
}
