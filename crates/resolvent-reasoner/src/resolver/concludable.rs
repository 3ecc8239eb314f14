//! Concludable resolvers: one per canonical atom.
//!
//! A concludable resolver owns the answer cache for its [`ConcludableKey`].
//! The cache is fed by traversal of stored facts and by every rule whose
//! conclusion unifies with the key. Requests come in two flavours:
//!
//! - *exploring*: the request is new on this exploration path, so the
//!   resolver tries each applicable rule through its conclusion resolver;
//! - *replaying*: the path already passes through this resolver (a cycle),
//!   or the cache is complete, so the request is served from the cache only.
//!   A replaying request that runs out of answers reports `Blocked` on a
//!   [`Cycle`] ending here.
//!
//! When every blocked downstream of an exploring request waits on cycles
//! ending here and none of them has seen the cache grow, the cache has
//! reached its fixpoint and is marked complete.

use super::{current_upstream, needs_state, perform, settle, Core, Resolver};
use crate::answer::Partial;
use crate::cache::AnswerCache;
use crate::downstream::DownstreamManager;
use crate::message::{Cycle, Revisit, Visit};
use crate::registry::Applicable;
use crate::state::{Action, RequestState};
use crate::{ReasonerError, Result};
use resolvent_logic::{ConceptMap, ConcludableKey};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

pub(crate) struct ConcludableResolver {
    core: Core,
    key: ConcludableKey,
    cache: AnswerCache,
    applicable: Option<Vec<Applicable>>,
    states: HashMap<Visit, RequestState>,
    /// Iteration the traversal source was last refreshed for.
    source_iteration: u32,
    /// Cache size at the last reiteration poll.
    polled: usize,
}

impl ConcludableResolver {
    pub(crate) fn new(core: Core, key: ConcludableKey) -> Self {
        Self {
            core,
            key,
            cache: AnswerCache::without_source(),
            applicable: None,
            states: HashMap::new(),
            source_iteration: 0,
            polled: 0,
        }
    }

    /// Once per iteration: reuse a subsuming cache on first use, otherwise
    /// restart traversal so facts inferred meanwhile become visible.
    fn refresh_source(&mut self, iteration: u32) -> Result<()> {
        if iteration <= self.source_iteration {
            return Ok(());
        }
        let first = self.source_iteration == 0;
        self.source_iteration = iteration;
        if self.cache.is_complete() {
            return Ok(());
        }
        if first {
            if let Some((subsumer, cache)) = self.core.registry().subsumer_of(&self.key) {
                for answer in cache.snapshot() {
                    let Some(tuple) = subsumer.tuple_of(&answer) else {
                        continue;
                    };
                    if let Some(answer) = self.key.matches(&tuple) {
                        self.cache.add(answer);
                    }
                }
                self.complete();
                return Ok(());
            }
        }
        let source = self.core.registry().traversal().traverse(&self.key)?;
        self.cache.reset_source(source);
        Ok(())
    }

    fn complete(&self) {
        self.cache.set_complete();
        self.core.registry().record_complete(&self.key, &self.cache);
    }

    fn initialise(&mut self, upstream: &Visit, iteration: u32) -> Result<()> {
        self.core.forget_upstream(upstream);
        self.refresh_source(iteration)?;
        let cyclic = upstream.partial().passes_through(self.core.id());
        let state = if cyclic || self.cache.is_complete() {
            RequestState::replaying(upstream.clone(), iteration, self.cache.clone())
        } else {
            let downstream = self.downstream_for(upstream)?;
            RequestState::exploring(
                upstream.clone(),
                iteration,
                self.cache.clone(),
                downstream,
                self.key.is_fully_bound(),
            )
        };
        debug!(
            resolver = self.core.name(),
            iteration,
            exploring = state.is_exploring(),
            "new request"
        );
        self.states.insert(upstream.clone(), state);
        Ok(())
    }

    /// One visit per applicable rule, tagged with the rule's position.
    fn downstream_for(&mut self, upstream: &Visit) -> Result<DownstreamManager> {
        if self.applicable.is_none() {
            self.applicable = Some(self.core.registry().applicable_rules(&self.key)?);
        }
        let visits = self
            .applicable
            .iter()
            .flatten()
            .enumerate()
            .map(|(position, applicable)| {
                let bound = applicable.bindings.variables();
                let free = applicable
                    .rule
                    .then()
                    .variables()
                    .into_iter()
                    .filter(|variable| !bound.contains(variable))
                    .collect();
                Visit::new(
                    self.core.id(),
                    applicable.conclusion,
                    Partial::derived(applicable.bindings.clone(), free, upstream),
                    Some(position),
                    upstream.trace(),
                )
            });
        DownstreamManager::new(visits)
    }

    fn next_action(&self, state: &mut RequestState) -> Result<Action> {
        if state.is_exploring() {
            self.explore(state)
        } else {
            Ok(self.replay(state))
        }
    }

    fn replay(&self, state: &mut RequestState) -> Action {
        if let Some(answer) = state.next_answer() {
            if self.key.is_fully_bound() {
                self.complete();
            }
            return Action::Answer(answer);
        }
        if self.cache.is_complete() {
            return Action::Fail;
        }
        let cycle = Cycle::new(self.core.id(), self.cache.len());
        Action::Blocked([cycle].into_iter().collect())
    }

    fn explore(&self, state: &mut RequestState) -> Result<Action> {
        let id = self.core.id();
        let answers = self.cache.len();
        let progress = self.core.registry().progress().clone();

        let downstream = state.downstream()?;
        let outdated: BTreeSet<Cycle> = downstream
            .blocked_cycles()
            .into_iter()
            .filter(|cycle| cycle.end() == id && progress.made_progress(cycle, answers))
            .collect();
        if !outdated.is_empty() {
            downstream.unblock(&outdated);
        }

        if let Some(answer) = state.next_answer() {
            if state.single_answer_required() {
                state.downstream()?.clear();
                self.complete();
            }
            return Ok(Action::Answer(answer));
        }
        if self.cache.is_complete() {
            return Ok(Action::Fail);
        }

        let downstream = state.downstream()?;
        if let Some(visit) = downstream.next_visit() {
            return Ok(Action::Visit(visit));
        }
        if let Some((visit, cycles)) = downstream.next_revisit() {
            return Ok(Action::Revisit(visit, cycles));
        }
        let elsewhere: BTreeSet<Cycle> = downstream
            .blocked_cycles()
            .into_iter()
            .filter(|cycle| cycle.end() != id)
            .collect();
        if elsewhere.is_empty() {
            self.complete();
            return Ok(Action::Fail);
        }
        Ok(Action::Blocked(elsewhere))
    }

    fn send_next(&mut self, upstream: &Visit) -> Result<()> {
        let mut state = self
            .states
            .remove(upstream)
            .ok_or_else(|| ReasonerError::illegal(format!("{} lost a request", self.core.name())))?;
        let outcome = self
            .next_action(&mut state)
            .and_then(|action| perform(&mut self.core, &mut state, action));
        self.states.insert(upstream.clone(), state);
        outcome
    }

    /// A conclusion answer, rewritten over this key's slots.
    fn slot_answer(&self, request: &Visit, answer: &ConceptMap) -> Result<Option<ConceptMap>> {
        let position = request
            .plan_index()
            .ok_or_else(|| ReasonerError::illegal("conclusion request without a rule position"))?;
        let applicable = self
            .applicable
            .as_ref()
            .and_then(|applicable| applicable.get(position))
            .ok_or_else(|| ReasonerError::illegal(format!("no applicable rule at {position}")))?;
        Ok(applicable
            .rule
            .then()
            .ground(answer)
            .and_then(|tuple| self.key.matches(&tuple)))
    }

    fn release(&mut self) {
        self.cache.set_source_exhausted();
        self.states.clear();
        self.core.clear_routes();
    }
}

impl Resolver for ConcludableResolver {
    fn core(&self) -> &Core {
        &self.core
    }

    fn receive_visit(&mut self, visit: Visit, iteration: u32) -> Result<()> {
        if needs_state(&self.states, &visit, iteration) {
            self.initialise(&visit, iteration)?;
        }
        self.send_next(&visit)
    }

    fn receive_revisit(&mut self, revisit: Revisit, iteration: u32) -> Result<()> {
        let upstream = revisit.visit().clone();
        if needs_state(&self.states, &upstream, iteration) {
            self.initialise(&upstream, iteration)?;
        } else if let Some(state) = self.states.get_mut(&upstream) {
            if state.is_exploring() {
                state.downstream()?.unblock(revisit.cycles());
            }
        }
        self.send_next(&upstream)
    }

    fn receive_answer(&mut self, request: Visit, answer: ConceptMap, iteration: u32) -> Result<()> {
        let Some(upstream) = current_upstream(&self.core, &self.states, &request, iteration) else {
            return Ok(());
        };
        if let Some(answer) = self.slot_answer(&request, &answer)? {
            if let Some(state) = self.states.get(&upstream) {
                state.new_answer(answer);
            }
        }
        self.send_next(&upstream)
    }

    fn receive_fail(&mut self, request: Visit, iteration: u32) -> Result<()> {
        let Some(upstream) = current_upstream(&self.core, &self.states, &request, iteration) else {
            return Ok(());
        };
        self.core.forget(&request);
        if let Some(state) = self.states.get_mut(&upstream) {
            state.downstream()?.remove(&request);
        }
        self.send_next(&upstream)
    }

    fn receive_blocked(&mut self, request: Visit, cycles: BTreeSet<Cycle>, iteration: u32) -> Result<()> {
        let Some(upstream) = current_upstream(&self.core, &self.states, &request, iteration) else {
            return Ok(());
        };
        if let Some(state) = self.states.get_mut(&upstream) {
            state.downstream()?.block(&request, cycles);
        }
        self.send_next(&upstream)
    }

    fn reiterate(&mut self, iteration: u32) -> bool {
        let answers = self.cache.len();
        let grew = answers > self.polled;
        self.polled = answers;
        debug!(resolver = self.core.name(), iteration, answers, grew, "reiteration poll");
        grew
    }

    fn conclude(&mut self) {
        self.complete();
        settle(self.states.values_mut());
    }
}

super::resolver_actor!(ConcludableResolver);
