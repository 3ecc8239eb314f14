//! The root resolver: one per top-level query.
//!
//! The root joins the query conjunction like any condition, but answers the
//! [`AnswerStream`](crate::AnswerStream) instead of an upstream resolver:
//! each `Pull` yields at most one answer the stream has not seen before.
//! When the join drains, the root decides how the query continues:
//!
//! ```text
//!   Resolving ──drained, something blocked──▶ Reiterating ──any grew──▶ Resolving (next iteration)
//!       │                                          │
//!       └──drained, nothing blocked──▶ Concluding ◀┘ nothing grew
//!                                          │
//!                                          └──all acknowledged──▶ Finished
//! ```

use super::conjunction::{ConjunctionPlan, Extension, Step};
use super::{dispatch, Core, Resolver};
use crate::actor::Actor;
use crate::answer::Partial;
use crate::cache::AnswerCache;
use crate::downstream::DownstreamManager;
use crate::message::{Cycle, Message, ResolverId, Revisit, Visit};
use crate::reiteration::{ReiterationQuery, ReiterationReply, ReiterationRound};
use crate::state::{Action, RequestState};
use crate::stream::{ResolutionSummary, RootEvent};
use crate::{ReasonerError, Result};
use resolvent_logic::{ConceptMap, Conjunction};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info};

enum Phase {
    Resolving,
    Reiterating(ReiterationRound),
    Concluding(BTreeSet<ResolverId>),
    Finished(ResolutionSummary),
}

pub(crate) struct RootResolver {
    core: Core,
    plan: ConjunctionPlan,
    /// The query itself, as the upstream of every join step.
    request: Visit,
    state: Option<RequestState>,
    steps: HashMap<Visit, Step>,
    iteration: u32,
    phase: Phase,
    /// The stream is waiting for an answer.
    wanted: bool,
    /// A downstream request is in flight.
    outstanding: bool,
    blocked: bool,
    delivered: HashSet<ConceptMap>,
    last_productive: Option<u32>,
}

impl RootResolver {
    pub(crate) fn new(core: Core, query: Conjunction) -> Self {
        let outputs = query.variables();
        let request = Visit::new(
            core.id(),
            core.id(),
            Partial::root(ConceptMap::new(), outputs.clone()),
            None,
            core.registry().trace_id(),
        );
        Self {
            core,
            plan: ConjunctionPlan::new(query, outputs),
            request,
            state: None,
            steps: HashMap::new(),
            iteration: 0,
            phase: Phase::Resolving,
            wanted: false,
            outstanding: false,
            blocked: false,
            delivered: HashSet::new(),
            last_productive: None,
        }
    }

    fn start_iteration(&mut self, iteration: u32) -> Result<()> {
        debug!(iteration, query = %self.plan.conjunction(), "iteration started");
        self.iteration = iteration;
        self.blocked = false;
        self.outstanding = false;
        self.steps.clear();
        self.core.forget_upstream(&self.request);
        let cache = AnswerCache::without_source();
        let mut downstream = DownstreamManager::default();
        match self.plan.start(&self.core, &self.request, ConceptMap::new())? {
            Extension::Answer(answer) => {
                cache.add(answer);
            }
            Extension::Downstream(visit, step) => {
                self.steps.insert(visit.clone(), step);
                downstream.add(visit)?;
            }
        }
        self.state = Some(RequestState::exploring(
            self.request.clone(),
            iteration,
            cache,
            downstream,
            false,
        ));
        self.phase = Phase::Resolving;
        Ok(())
    }

    fn state(&mut self) -> Result<&mut RequestState> {
        self.state
            .as_mut()
            .ok_or_else(|| ReasonerError::illegal("root has no active iteration"))
    }

    /// Work towards the next answer the stream has not seen.
    fn advance(&mut self) -> Result<()> {
        loop {
            let action = self.state()?.next_action()?;
            match action {
                Action::Answer(answer) => {
                    if self.delivered.insert(answer.clone()) {
                        self.wanted = false;
                        self.last_productive = Some(self.iteration);
                        self.core.registry().emit(RootEvent::Answer(answer));
                        return Ok(());
                    }
                }
                Action::Visit(downstream) => {
                    self.outstanding = true;
                    return self
                        .core
                        .visit_downstream(downstream, &self.request, self.iteration);
                }
                Action::Revisit(downstream, cycles) => {
                    self.outstanding = true;
                    return self
                        .core
                        .revisit_downstream(downstream, cycles, &self.request, self.iteration);
                }
                Action::Blocked(_) => {
                    self.blocked = true;
                    return self.drain();
                }
                Action::Fail => return self.drain(),
            }
        }
    }

    /// The join for this iteration has nothing left to try.
    fn drain(&mut self) -> Result<()> {
        let registry = self.core.registry().clone();
        if !self.blocked && !registry.blocked_in(self.iteration) {
            return self.conclude();
        }
        let participants = registry.participants();
        debug!(
            iteration = self.iteration,
            participants = participants.len(),
            "iteration drained with blocked resolvers"
        );
        self.phase = Phase::Reiterating(ReiterationRound::new(
            self.iteration,
            participants.iter().copied(),
        ));
        for participant in participants {
            registry.send(
                participant,
                Message::Reiteration(ReiterationQuery {
                    root: self.core.id(),
                    iteration: self.iteration,
                }),
            )?;
        }
        self.close_round()
    }

    fn close_round(&mut self) -> Result<()> {
        let Phase::Reiterating(round) = &self.phase else {
            return Ok(());
        };
        let next = round.iteration() + 1;
        match round.reiterate() {
            None => Ok(()),
            Some(true) => self.next_iteration(next),
            Some(false) => self.conclude(),
        }
    }

    fn next_iteration(&mut self, iteration: u32) -> Result<()> {
        let limit = self.core.registry().max_iterations();
        if iteration > limit {
            return Err(ReasonerError::IterationLimit(limit));
        }
        self.start_iteration(iteration)?;
        if self.wanted {
            self.advance()?;
        }
        Ok(())
    }

    fn conclude(&mut self) -> Result<()> {
        let registry = self.core.registry().clone();
        let participants = registry.participants();
        debug!(iteration = self.iteration, "fixpoint reached, concluding");
        self.phase = Phase::Concluding(participants.iter().copied().collect());
        for participant in participants {
            registry.send(participant, Message::Conclude { root: self.core.id() })?;
        }
        if matches!(&self.phase, Phase::Concluding(awaiting) if awaiting.is_empty()) {
            return self.finish();
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let registry = self.core.registry().clone();
        let summary = ResolutionSummary {
            iterations: self.iteration,
            answers: self.delivered.len(),
            last_productive_iteration: self.last_productive,
            blocked_resolvers: registry.blocked_count(),
            resolvers: registry.participants().len() + 1,
            subsumption_hits: registry.subsumption_hits(),
            trace: registry.finish_trace()?,
        };
        info!(%summary, "resolution exhausted");
        self.wanted = false;
        self.phase = Phase::Finished(summary.clone());
        registry.emit(RootEvent::Exhausted(summary));
        Ok(())
    }

    /// Whether a response belongs to the iteration in progress.
    fn is_current(&self, iteration: u32) -> bool {
        let current = matches!(self.phase, Phase::Resolving) && iteration == self.iteration;
        if !current {
            debug!(iteration, current = self.iteration, "root dropping stale response");
        }
        current
    }

    fn release(&mut self) {
        self.state = None;
        self.steps.clear();
        self.core.clear_routes();
    }
}

impl Resolver for RootResolver {
    fn core(&self) -> &Core {
        &self.core
    }

    fn receive_visit(&mut self, _visit: Visit, _iteration: u32) -> Result<()> {
        Err(self.unexpected("visit"))
    }

    fn receive_revisit(&mut self, _revisit: Revisit, _iteration: u32) -> Result<()> {
        Err(self.unexpected("revisit"))
    }

    fn receive_answer(&mut self, request: Visit, answer: ConceptMap, iteration: u32) -> Result<()> {
        if !self.is_current(iteration) {
            return Ok(());
        }
        self.outstanding = false;
        let step = self
            .steps
            .get(&request)
            .cloned()
            .ok_or_else(|| ReasonerError::illegal("answer for an unknown query step"))?;
        let extension = self.plan.extend(&self.core, &self.request, &step, &answer)?;
        match extension {
            Some(Extension::Answer(answer)) => {
                self.state()?.new_answer(answer);
            }
            Some(Extension::Downstream(visit, step)) => {
                let downstream = self.state()?.downstream()?;
                if !downstream.contains(&visit) {
                    downstream.add(visit.clone())?;
                    self.steps.insert(visit, step);
                }
            }
            None => {}
        }
        self.advance()
    }

    fn receive_fail(&mut self, request: Visit, iteration: u32) -> Result<()> {
        if !self.is_current(iteration) {
            return Ok(());
        }
        self.outstanding = false;
        self.core.forget(&request);
        self.steps.remove(&request);
        self.state()?.downstream()?.remove(&request);
        self.advance()
    }

    fn receive_blocked(&mut self, request: Visit, cycles: BTreeSet<Cycle>, iteration: u32) -> Result<()> {
        if !self.is_current(iteration) {
            return Ok(());
        }
        self.outstanding = false;
        self.state()?.downstream()?.block(&request, cycles);
        self.advance()
    }

    fn receive_pull(&mut self) -> Result<()> {
        if let Phase::Finished(summary) = &self.phase {
            self.core
                .registry()
                .emit(RootEvent::Exhausted(summary.clone()));
            return Ok(());
        }
        self.wanted = true;
        // Answered once the round or the conclude phase completes.
        if !matches!(self.phase, Phase::Resolving) {
            return Ok(());
        }
        if self.state.is_none() {
            self.start_iteration(1)?;
        }
        if self.outstanding {
            return Ok(());
        }
        self.advance()
    }

    fn receive_reiteration_reply(&mut self, reply: ReiterationReply) -> Result<()> {
        let Phase::Reiterating(round) = &mut self.phase else {
            return Err(ReasonerError::illegal(format!(
                "reiteration reply from {} outside a round",
                reply.sender
            )));
        };
        round.record(reply)?;
        self.close_round()
    }

    fn receive_concluded(&mut self, sender: ResolverId) -> Result<()> {
        let Phase::Concluding(awaiting) = &mut self.phase else {
            return Err(ReasonerError::illegal(format!(
                "conclusion acknowledged by {sender} outside the conclude phase"
            )));
        };
        if !awaiting.remove(&sender) {
            return Err(ReasonerError::illegal(format!(
                "duplicate conclusion acknowledgement from {sender}"
            )));
        }
        if awaiting.is_empty() {
            return self.finish();
        }
        Ok(())
    }
}

impl Actor for RootResolver {
    fn id(&self) -> ResolverId {
        self.core.id()
    }

    fn name(&self) -> &str {
        self.core.name()
    }

    fn handle(&mut self, message: Message) -> Result<()> {
        dispatch(self, message)
    }

    fn terminate(&mut self) {
        self.release();
    }
}
