//! Conclusion resolvers: one per rule.
//!
//! Asks the rule's condition resolver for body answers and hands each one to
//! the materialiser. Only answers whose fact now exists as an inference are
//! passed upstream. While a materialisation is outstanding the request waits;
//! nothing else is sent on its behalf. When explanations are on, each
//! concluded fact is recorded with the condition answer that produced it.

use super::{current_upstream, needs_state, perform, settle, Core, Resolver};
use crate::answer::Partial;
use crate::cache::AnswerCache;
use crate::downstream::DownstreamManager;
use crate::explanation::Explanation;
use crate::materialiser::{Materialisation, MaterialiserRequest};
use crate::message::{Cycle, Message, ResolverId, Revisit, Visit};
use crate::state::RequestState;
use crate::tracer::EdgeKind;
use crate::{ReasonerError, Result};
use resolvent_logic::{ConceptMap, Rule};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

struct Pending {
    upstream: Visit,
    iteration: u32,
    condition: ConceptMap,
}

pub(crate) struct ConclusionResolver {
    core: Core,
    rule: Rule,
    condition: ResolverId,
    states: HashMap<Visit, RequestState>,
    /// Outstanding materialisations by request id.
    pending: HashMap<u64, Pending>,
    next_request: u64,
}

impl ConclusionResolver {
    pub(crate) fn new(core: Core, rule: Rule, condition: ResolverId) -> Self {
        Self {
            core,
            rule,
            condition,
            states: HashMap::new(),
            pending: HashMap::new(),
            next_request: 0,
        }
    }

    fn initialise(&mut self, upstream: &Visit, iteration: u32) -> Result<()> {
        self.core.forget_upstream(upstream);
        let bindings = upstream.partial().concepts().clone();
        let free = self
            .rule
            .then()
            .variables()
            .into_iter()
            .filter(|variable| !bindings.contains(variable))
            .collect();
        let visit = Visit::new(
            self.core.id(),
            self.condition,
            Partial::derived(bindings, free, upstream),
            None,
            upstream.trace(),
        );
        let state = RequestState::exploring(
            upstream.clone(),
            iteration,
            AnswerCache::without_source(),
            DownstreamManager::new([visit])?,
            false,
        );
        self.states.insert(upstream.clone(), state);
        Ok(())
    }

    fn send_next(&mut self, upstream: &Visit) -> Result<()> {
        let state = self
            .states
            .get_mut(upstream)
            .ok_or_else(|| ReasonerError::illegal(format!("{} lost a request", self.core.name())))?;
        let action = state.next_action()?;
        perform(&mut self.core, state, action)
    }

    fn materialise(&mut self, upstream: Visit, answer: ConceptMap, iteration: u32) -> Result<()> {
        let registry = self.core.registry().clone();
        let materialiser = registry.materialiser_id()?;
        let id = self.next_request;
        self.next_request += 1;
        registry.trace(EdgeKind::Request, self.core.id(), materialiser, iteration, &answer)?;
        let request = MaterialiserRequest {
            id,
            sender: self.core.id(),
            iteration,
            trace: upstream.trace(),
            conclusion: self.rule.then().clone(),
            partial: answer.clone(),
        };
        self.pending.insert(
            id,
            Pending {
                upstream,
                iteration,
                condition: answer,
            },
        );
        registry.send(materialiser, Message::Materialise(request))
    }

    fn explain(&self, condition: ConceptMap) {
        let Some(conclusion) = self.rule.then().fact(&condition) else {
            return;
        };
        let premises = self
            .rule
            .when()
            .atoms()
            .iter()
            .filter_map(|atom| atom.fact(&condition))
            .collect();
        self.core.registry().record_explanation(Explanation {
            rule: self.rule.name().to_string(),
            conclusion,
            condition,
            premises,
        });
    }

    fn release(&mut self) {
        self.states.clear();
        self.pending.clear();
        self.core.clear_routes();
    }
}

impl Resolver for ConclusionResolver {
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
            state.downstream()?.unblock(revisit.cycles());
        }
        self.send_next(&upstream)
    }

    fn receive_answer(&mut self, request: Visit, answer: ConceptMap, iteration: u32) -> Result<()> {
        let Some(upstream) = current_upstream(&self.core, &self.states, &request, iteration) else {
            return Ok(());
        };
        self.materialise(upstream, answer, iteration)
    }

    fn receive_materialisation(&mut self, materialisation: Materialisation) -> Result<()> {
        let Pending {
            upstream,
            iteration,
            condition,
        } = self
            .pending
            .remove(&materialisation.request_id)
            .ok_or_else(|| {
                ReasonerError::illegal(format!(
                    "{} got an unknown materialisation {}",
                    self.core.name(),
                    materialisation.request_id
                ))
            })?;
        let Some(state) = self
            .states
            .get(&upstream)
            .filter(|state| state.iteration() == iteration)
        else {
            debug!(resolver = self.core.name(), iteration, "dropping stale materialisation");
            return Ok(());
        };
        if let Some(answer) = materialisation.answer {
            state.new_answer(answer);
            if self.core.registry().explains() {
                self.explain(condition);
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

    fn conclude(&mut self) {
        settle(self.states.values_mut());
    }
}

super::resolver_actor!(ConclusionResolver);
