//! Resolvers.
//!
//! | Kind        | One per              | Answers come from                        |
//! |-------------|----------------------|------------------------------------------|
//! | Root        | top-level query      | its conjunction, deduplicated per query  |
//! | Conjunction | rule condition       | a left-to-right join over its parts      |
//! | Concludable | concludable key      | traversal plus every applicable rule     |
//! | Conclusion  | rule                 | condition answers, via the materialiser  |
//! | Disjunction | nested disjunction   | any branch, projected and deduplicated   |
//! | Negation    | negated conjunction  | a sub-query that must have no answer     |
//!
//! Each resolver keeps one [`RequestState`] per upstream request and
//! iteration, and never has more than one message outstanding for it.

pub(crate) mod concludable;
pub(crate) mod conclusion;
pub(crate) mod conjunction;
pub(crate) mod disjunction;
pub(crate) mod negation;
pub(crate) mod root;

use crate::message::{Cycle, Message, Request, ResolverId, Response, Revisit, Visit};
use crate::materialiser::Materialisation;
use crate::registry::Registry;
use crate::reiteration::{ReiterationQuery, ReiterationReply};
use crate::state::{Action, RequestState, RequestStatus};
use crate::tracer::EdgeKind;
use crate::{ReasonerError, Result};
use negation::NegationCheck;
use resolvent_logic::ConceptMap;
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Routes from downstream requests back to the upstream request they serve,
/// indexed both ways so that replacing an upstream state drops its routes.
#[derive(Debug, Default)]
pub(crate) struct Router {
    routes: HashMap<Visit, Visit>,
    by_upstream: HashMap<Visit, HashSet<Visit>>,
}

impl Router {
    pub(crate) fn route(&mut self, downstream: Visit, upstream: &Visit) {
        if let Some(previous) = self.routes.insert(downstream.clone(), upstream.clone()) {
            if &previous != upstream {
                self.unindex(&previous, &downstream);
            }
        }
        self.by_upstream
            .entry(upstream.clone())
            .or_default()
            .insert(downstream);
    }

    pub(crate) fn upstream_of(&self, downstream: &Visit) -> Option<&Visit> {
        self.routes.get(downstream)
    }

    pub(crate) fn forget(&mut self, downstream: &Visit) {
        if let Some(upstream) = self.routes.remove(downstream) {
            self.unindex(&upstream, downstream);
        }
    }

    /// Drop every route serving `upstream`. Returns the downstream requests
    /// that were routed to it.
    pub(crate) fn forget_upstream(&mut self, upstream: &Visit) -> Vec<Visit> {
        let downstreams: Vec<Visit> = self
            .by_upstream
            .remove(upstream)
            .map(|downstreams| downstreams.into_iter().collect())
            .unwrap_or_default();
        for downstream in &downstreams {
            self.routes.remove(downstream);
        }
        downstreams
    }

    pub(crate) fn len(&self) -> usize {
        self.routes.len()
    }

    pub(crate) fn clear(&mut self) {
        self.routes.clear();
        self.by_upstream.clear();
    }

    fn unindex(&mut self, upstream: &Visit, downstream: &Visit) {
        if let Entry::Occupied(mut entry) = self.by_upstream.entry(upstream.clone()) {
            entry.get_mut().remove(downstream);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
    }
}

/// What every resolver has: identity, the registry, and the routing table
/// from downstream requests back to the upstream request they serve.
pub(crate) struct Core {
    id: ResolverId,
    name: String,
    registry: Arc<Registry>,
    router: Router,
}

impl Core {
    pub(crate) fn new(id: ResolverId, name: String, registry: Arc<Registry>) -> Self {
        Self {
            id,
            name,
            registry,
            router: Router::default(),
        }
    }

    pub(crate) fn id(&self) -> ResolverId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub(crate) fn upstream_of(&self, downstream: &Visit) -> Option<Visit> {
        self.router.upstream_of(downstream).cloned()
    }

    pub(crate) fn forget(&mut self, downstream: &Visit) {
        self.router.forget(downstream);
    }

    /// Called when the state for `upstream` is replaced: responses to the
    /// requests sent for the old state are stale from now on.
    pub(crate) fn forget_upstream(&mut self, upstream: &Visit) -> Vec<Visit> {
        let stale = self.router.forget_upstream(upstream);
        if !stale.is_empty() {
            debug!(resolver = %self.name, stale = stale.len(), routes = self.router.len(), "replaced request state");
        }
        stale
    }

    pub(crate) fn clear_routes(&mut self) {
        self.router.clear();
    }

    pub(crate) fn visit_downstream(&mut self, downstream: Visit, upstream: &Visit, iteration: u32) -> Result<()> {
        self.router.route(downstream.clone(), upstream);
        self.registry.trace(
            EdgeKind::Request,
            self.id,
            downstream.receiver(),
            iteration,
            downstream.partial().concepts(),
        )?;
        self.registry.send(
            downstream.receiver(),
            Message::Request {
                request: Request::Visit(downstream),
                iteration,
            },
        )
    }

    pub(crate) fn revisit_downstream(
        &mut self,
        downstream: Visit,
        cycles: BTreeSet<Cycle>,
        upstream: &Visit,
        iteration: u32,
    ) -> Result<()> {
        self.router.route(downstream.clone(), upstream);
        self.registry.trace(
            EdgeKind::Request,
            self.id,
            downstream.receiver(),
            iteration,
            downstream.partial().concepts(),
        )?;
        let receiver = downstream.receiver();
        self.registry.send(
            receiver,
            Message::Request {
                request: Request::Revisit(Revisit::new(downstream, cycles)?),
                iteration,
            },
        )
    }

    pub(crate) fn answer_upstream(&self, upstream: &Visit, answer: ConceptMap, iteration: u32) -> Result<()> {
        self.registry
            .trace(EdgeKind::Answer, self.id, upstream.sender(), iteration, &answer)?;
        self.respond(
            upstream,
            Response::Answer {
                request: upstream.clone(),
                answer,
            },
            iteration,
        )
    }

    pub(crate) fn fail_upstream(&self, upstream: &Visit, iteration: u32) -> Result<()> {
        self.registry.trace(
            EdgeKind::Exhausted,
            self.id,
            upstream.sender(),
            iteration,
            upstream.partial().concepts(),
        )?;
        self.respond(
            upstream,
            Response::Fail {
                request: upstream.clone(),
            },
            iteration,
        )
    }

    pub(crate) fn block_upstream(&self, upstream: &Visit, cycles: BTreeSet<Cycle>, iteration: u32) -> Result<()> {
        self.registry.trace(
            EdgeKind::Blocked,
            self.id,
            upstream.sender(),
            iteration,
            upstream.partial().concepts(),
        )?;
        // Visible to the root before anything the block causes upstream.
        self.registry.set_blocked(self.id, Some(iteration));
        self.respond(
            upstream,
            Response::Blocked {
                request: upstream.clone(),
                cycles,
            },
            iteration,
        )
    }

    fn respond(&self, upstream: &Visit, response: Response, iteration: u32) -> Result<()> {
        self.registry
            .send(upstream.sender(), Message::Response { response, iteration })
    }
}

/// Carry out `action` for `state` and record the resulting status.
pub(crate) fn perform(core: &mut Core, state: &mut RequestState, action: Action) -> Result<()> {
    let upstream = state.upstream().clone();
    let iteration = state.iteration();
    match action {
        Action::Answer(answer) => {
            state.set_status(RequestStatus::Answered);
            core.answer_upstream(&upstream, answer, iteration)
        }
        Action::Visit(downstream) => {
            state.set_status(RequestStatus::Exploring);
            core.visit_downstream(downstream, &upstream, iteration)
        }
        Action::Revisit(downstream, cycles) => {
            state.set_status(RequestStatus::Exploring);
            core.revisit_downstream(downstream, cycles, &upstream, iteration)
        }
        Action::Blocked(cycles) => {
            state.set_status(RequestStatus::Blocked);
            core.block_upstream(&upstream, cycles, iteration)
        }
        Action::Fail => {
            state.set_status(RequestStatus::Exhausted);
            core.fail_upstream(&upstream, iteration)
        }
    }
}

/// The latest iteration among `states`, if some request of that iteration is
/// blocked.
pub(crate) fn blocked_in<'a>(states: impl Iterator<Item = &'a RequestState> + Clone) -> Option<u32> {
    let latest = states.clone().map(RequestState::iteration).max()?;
    states
        .into_iter()
        .any(|state| state.iteration() == latest && state.status() == RequestStatus::Blocked)
        .then_some(latest)
}

/// The upstream request `downstream` serves, if its state is current.
/// Responses to requests made for a replaced state have no route left.
pub(crate) fn current_upstream(
    core: &Core,
    states: &HashMap<Visit, RequestState>,
    downstream: &Visit,
    iteration: u32,
) -> Option<Visit> {
    let current = core
        .upstream_of(downstream)
        .filter(|upstream| states.get(upstream).is_some_and(|state| state.iteration() == iteration));
    if current.is_none() {
        debug!(resolver = core.name(), iteration, "dropping stale response");
    }
    current
}

/// Whether a request for `upstream` needs a fresh state in `iteration`.
pub(crate) fn needs_state(states: &HashMap<Visit, RequestState>, upstream: &Visit, iteration: u32) -> bool {
    states
        .get(upstream)
        .map_or(true, |state| state.iteration() < iteration)
}

/// Mark every blocked request as finished once the query has concluded.
pub(crate) fn settle<'a>(states: impl Iterator<Item = &'a mut RequestState>) {
    for state in states {
        if state.status() == RequestStatus::Blocked {
            state.set_status(RequestStatus::Exhausted);
        }
    }
}

/// The per-message interface of a resolver. [`dispatch`] routes a
/// [`Message`] to one of these.
pub(crate) trait Resolver {
    fn core(&self) -> &Core;

    fn receive_visit(&mut self, visit: Visit, iteration: u32) -> Result<()>;

    fn receive_revisit(&mut self, revisit: Revisit, iteration: u32) -> Result<()>;

    fn receive_answer(&mut self, request: Visit, answer: ConceptMap, iteration: u32) -> Result<()>;

    fn receive_fail(&mut self, request: Visit, iteration: u32) -> Result<()>;

    fn receive_blocked(&mut self, request: Visit, cycles: BTreeSet<Cycle>, iteration: u32) -> Result<()>;

    fn receive_materialisation(&mut self, _materialisation: Materialisation) -> Result<()> {
        Err(self.unexpected("materialised"))
    }

    fn receive_pull(&mut self) -> Result<()> {
        Err(self.unexpected("pull"))
    }

    fn receive_reiteration_reply(&mut self, _reply: ReiterationReply) -> Result<()> {
        Err(self.unexpected("reiterated"))
    }

    fn receive_concluded(&mut self, _sender: ResolverId) -> Result<()> {
        Err(self.unexpected("concluded"))
    }

    fn receive_check(&mut self, _check: NegationCheck) -> Result<()> {
        Err(self.unexpected("checked"))
    }

    /// Whether this resolver gained answers since it was last asked.
    fn reiterate(&mut self, _iteration: u32) -> bool {
        false
    }

    /// The query reached its fixpoint.
    fn conclude(&mut self) {}

    fn unexpected(&self, kind: &str) -> ReasonerError {
        ReasonerError::illegal(format!("{} cannot handle {kind}", self.core().name()))
    }
}

pub(crate) fn dispatch<R: Resolver>(resolver: &mut R, message: Message) -> Result<()> {
    match message {
        Message::Request { request, iteration } => match request {
            Request::Visit(visit) => resolver.receive_visit(visit, iteration),
            Request::Revisit(revisit) => resolver.receive_revisit(revisit, iteration),
        },
        Message::Response { response, iteration } => match response {
            Response::Answer { request, answer } => resolver.receive_answer(request, answer, iteration),
            Response::Fail { request } => resolver.receive_fail(request, iteration),
            Response::Blocked { request, cycles } => resolver.receive_blocked(request, cycles, iteration),
        },
        Message::Materialised(materialisation) => resolver.receive_materialisation(materialisation),
        Message::Reiteration(ReiterationQuery { root, iteration }) => {
            let reiterate = resolver.reiterate(iteration);
            let core = resolver.core();
            core.registry().send(
                root,
                Message::Reiterated(ReiterationReply {
                    sender: core.id(),
                    reiterate,
                }),
            )
        }
        Message::Reiterated(reply) => resolver.receive_reiteration_reply(reply),
        Message::Conclude { root } => {
            resolver.conclude();
            let core = resolver.core();
            // Cleared before the acknowledgement so the root's summary sees it.
            core.registry().set_blocked(core.id(), None);
            core.registry()
                .send(root, Message::Concluded { sender: core.id() })
        }
        Message::Concluded { sender } => resolver.receive_concluded(sender),
        Message::Checked(check) => resolver.receive_check(check),
        Message::Pull => resolver.receive_pull(),
        other @ (Message::Materialise(_) | Message::Terminate) => Err(resolver.unexpected(other.kind())),
    }
}

/// Implements [`Actor`] for a resolver by routing through [`dispatch`].
macro_rules! resolver_actor {
    ($resolver:ty) => {
        impl crate::actor::Actor for $resolver {
            fn id(&self) -> crate::message::ResolverId {
                self.core.id()
            }

            fn name(&self) -> &str {
                self.core.name()
            }

            fn handle(&mut self, message: crate::message::Message) -> crate::Result<()> {
                crate::resolver::dispatch(self, message)
            }

            fn blocked_in(&self) -> Option<u32> {
                crate::resolver::blocked_in(self.states.values())
            }

            fn terminate(&mut self) {
                self.release();
            }
        }
    };
}

pub(crate) use resolver_actor;
