//! Disjunctions: one per nested `{..} or {..}` pattern.
//!
//! Every request is explored through all branches at once, each branch a
//! conjunction resolved by its own branch resolver. Branch answers are
//! projected onto the variables every branch binds; two branches (or two
//! answers of one branch) that agree on those variables produce one answer.

use super::{current_upstream, needs_state, perform, settle, Core, Resolver};
use crate::answer::Partial;
use crate::downstream::DownstreamManager;
use crate::message::{Cycle, ResolverId, Revisit, Visit};
use crate::state::RequestState;
use crate::{ReasonerError, Result};
use resolvent_logic::{ConceptMap, Disjunction, Variable};
use std::collections::{BTreeSet, HashMap};

pub(crate) struct DisjunctionResolver {
    core: Core,
    disjunction: Disjunction,
    /// Branch resolvers, in branch order.
    branches: Vec<ResolverId>,
    outputs: BTreeSet<Variable>,
    states: HashMap<Visit, RequestState>,
}

impl DisjunctionResolver {
    pub(crate) fn new(core: Core, disjunction: Disjunction, branches: Vec<ResolverId>) -> Self {
        let outputs = disjunction.variables();
        Self {
            core,
            disjunction,
            branches,
            outputs,
            states: HashMap::new(),
        }
    }

    fn initialise(&mut self, upstream: &Visit, iteration: u32) -> Result<()> {
        self.core.forget_upstream(upstream);
        let bindings = upstream.partial().concepts();
        let visits = self
            .disjunction
            .branches()
            .iter()
            .zip(&self.branches)
            .enumerate()
            .map(|(position, (branch, receiver))| {
                let inputs = bindings.project(&branch.mentioned_variables());
                let free = branch
                    .variables()
                    .into_iter()
                    .filter(|variable| !inputs.contains(variable))
                    .collect();
                Visit::new(
                    self.core.id(),
                    *receiver,
                    Partial::derived(inputs, free, upstream),
                    Some(position),
                    upstream.trace(),
                )
            });
        let state = RequestState::filtered(
            upstream.clone(),
            iteration,
            DownstreamManager::new(visits)?,
            self.outputs.clone(),
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

    fn release(&mut self) {
        self.states.clear();
        self.core.clear_routes();
    }
}

impl Resolver for DisjunctionResolver {
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
        if let Some(state) = self.states.get(&upstream) {
            state.new_answer(answer);
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

super::resolver_actor!(DisjunctionResolver);
