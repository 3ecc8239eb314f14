//! Per-request bookkeeping.

use crate::cache::{AnswerCache, Poller};
use crate::downstream::DownstreamManager;
use crate::message::{Cycle, Visit};
use crate::{ReasonerError, Result};
use resolvent_logic::{ConceptMap, Variable};
use std::collections::{BTreeSet, HashSet};

/// Where a request stands, as last reported upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Init,
    Exploring,
    Answered,
    Exhausted,
    Blocked,
}

/// What a resolver should do next for one request.
#[derive(Debug)]
pub(crate) enum Action {
    Answer(ConceptMap),
    Visit(Visit),
    Revisit(Visit, BTreeSet<Cycle>),
    Blocked(BTreeSet<Cycle>),
    Fail,
}

/// Everything a resolver keeps for one upstream request in one iteration.
#[derive(Debug)]
pub(crate) struct RequestState {
    upstream: Visit,
    iteration: u32,
    cache: AnswerCache,
    poller: Poller,
    exploration: Option<Exploration>,
    filter: Option<AnswerFilter>,
    status: RequestStatus,
}

/// Restricts a state's answers to `outputs` and hands each projection
/// upstream once.
#[derive(Debug)]
struct AnswerFilter {
    outputs: BTreeSet<Variable>,
    seen: HashSet<ConceptMap>,
}

#[derive(Debug)]
pub(crate) struct Exploration {
    pub(crate) downstream: DownstreamManager,
    pub(crate) single_answer_required: bool,
}

impl RequestState {
    /// A request served from `cache` only.
    pub(crate) fn replaying(upstream: Visit, iteration: u32, cache: AnswerCache) -> Self {
        let poller = cache.reader();
        Self {
            upstream,
            iteration,
            cache,
            poller,
            exploration: None,
            filter: None,
            status: RequestStatus::Init,
        }
    }

    /// A request that may explore `downstream`.
    pub(crate) fn exploring(
        upstream: Visit,
        iteration: u32,
        cache: AnswerCache,
        downstream: DownstreamManager,
        single_answer_required: bool,
    ) -> Self {
        let mut state = Self::replaying(upstream, iteration, cache);
        state.exploration = Some(Exploration {
            downstream,
            single_answer_required,
        });
        state
    }

    /// An exploring request whose downstreams may produce answers that
    /// differ only outside `outputs`.
    pub(crate) fn filtered(
        upstream: Visit,
        iteration: u32,
        downstream: DownstreamManager,
        outputs: BTreeSet<Variable>,
    ) -> Self {
        let mut state = Self::exploring(upstream, iteration, AnswerCache::without_source(), downstream, false);
        state.filter = Some(AnswerFilter {
            outputs,
            seen: HashSet::new(),
        });
        state
    }

    pub(crate) fn upstream(&self) -> &Visit {
        &self.upstream
    }

    pub(crate) fn iteration(&self) -> u32 {
        self.iteration
    }

    pub(crate) fn status(&self) -> RequestStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: RequestStatus) {
        self.status = status;
    }

    pub(crate) fn is_exploring(&self) -> bool {
        self.exploration.is_some()
    }

    pub(crate) fn single_answer_required(&self) -> bool {
        self.exploration
            .as_ref()
            .map_or(false, |exploration| exploration.single_answer_required)
    }

    pub(crate) fn exploration(&mut self) -> Result<&mut Exploration> {
        self.exploration
            .as_mut()
            .ok_or_else(|| ReasonerError::illegal("request state does not explore"))
    }

    pub(crate) fn downstream(&mut self) -> Result<&mut DownstreamManager> {
        Ok(&mut self.exploration()?.downstream)
    }

    /// Next cache answer this request has not handed upstream yet.
    pub(crate) fn next_answer(&mut self) -> Option<ConceptMap> {
        loop {
            let answer = self.poller.next_answer()?;
            let Some(filter) = &mut self.filter else {
                return Some(answer);
            };
            let projected = answer.project(&filter.outputs);
            if filter.seen.insert(projected.clone()) {
                return Some(projected);
            }
        }
    }

    /// Offer an answer produced downstream. False when the cache already had
    /// it or is complete.
    pub(crate) fn new_answer(&self, answer: ConceptMap) -> bool {
        !self.cache.is_complete() && self.cache.add(answer)
    }

    /// The standard choice for a non-concludable request: answer, then
    /// explore, then revisit, then report blocked, then fail.
    pub(crate) fn next_action(&mut self) -> Result<Action> {
        if let Some(answer) = self.next_answer() {
            return Ok(Action::Answer(answer));
        }
        let downstream = self.downstream()?;
        if let Some(visit) = downstream.next_visit() {
            return Ok(Action::Visit(visit));
        }
        if let Some((visit, cycles)) = downstream.next_revisit() {
            return Ok(Action::Revisit(visit, cycles));
        }
        if downstream.is_blocked() {
            return Ok(Action::Blocked(downstream.blocked_cycles()));
        }
        Ok(Action::Fail)
    }
}
