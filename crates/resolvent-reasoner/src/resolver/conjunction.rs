//! Conjunctions: left-to-right joins.
//!
//! A conjunction answer is built one part at a time: first each atom, then
//! each nested disjunction, then each negation. Every intermediate binding
//! set becomes a [`Step`], a request to the resolver for the next part:
//!
//! ```text
//!   part          receiver                      an answer...
//!   atom          concludable, canonicalised    binds the atom's slots
//!   disjunction   disjunction resolver          merges the bindings it carries
//!   negation      negation resolver             confirms the bindings so far
//! ```
//!
//! An answer to a step either extends the bindings and spawns the step for
//! the following part or, after the last part, is an answer of the whole
//! conjunction.

use super::{current_upstream, needs_state, perform, settle, Core, Resolver};
use crate::answer::Partial;
use crate::cache::AnswerCache;
use crate::downstream::DownstreamManager;
use crate::message::{Cycle, Revisit, Visit};
use crate::state::RequestState;
use crate::{ReasonerError, Result};
use resolvent_logic::{slot_variable, ConceptMap, ConcludableKey, Conjunction, Variable};
use std::collections::{BTreeSet, HashMap};

/// How an answer to a step folds into its bindings.
#[derive(Debug, Clone)]
enum Binding {
    /// The concludable's slots stand for these atom variables.
    Slots(Vec<Variable>),
    Merge,
    Filter,
}

/// Bindings accumulated before part `part`.
#[derive(Debug, Clone)]
pub(crate) struct Step {
    part: usize,
    bindings: ConceptMap,
    binding: Binding,
}

pub(crate) enum Extension {
    Answer(ConceptMap),
    Downstream(Visit, Step),
}

#[derive(Debug, Clone)]
pub(crate) struct ConjunctionPlan {
    conjunction: Conjunction,
    outputs: BTreeSet<Variable>,
}

impl ConjunctionPlan {
    pub(crate) fn new(conjunction: Conjunction, outputs: BTreeSet<Variable>) -> Self {
        Self {
            conjunction,
            outputs,
        }
    }

    pub(crate) fn conjunction(&self) -> &Conjunction {
        &self.conjunction
    }

    fn parts(&self) -> usize {
        self.conjunction.atoms().len()
            + self.conjunction.disjunctions().len()
            + self.conjunction.negations().len()
    }

    /// First step for `upstream`, or its only answer when there is nothing to
    /// join.
    pub(crate) fn start(&self, core: &Core, upstream: &Visit, bindings: ConceptMap) -> Result<Extension> {
        self.advance(core, upstream, 0, bindings)
    }

    /// Fold an answer for `step` into its bindings. `None` when the answer
    /// contradicts them.
    pub(crate) fn extend(
        &self,
        core: &Core,
        upstream: &Visit,
        step: &Step,
        answer: &ConceptMap,
    ) -> Result<Option<Extension>> {
        let bindings = match &step.binding {
            Binding::Slots(slots) => {
                let mut bindings = step.bindings.clone();
                for (slot, variable) in slots.iter().enumerate() {
                    let concept = answer.get(&slot_variable(slot)).ok_or_else(|| {
                        ReasonerError::illegal(format!("answer {answer} leaves slot {slot} unbound"))
                    })?;
                    match bindings.with(variable.clone(), concept) {
                        Some(next) => bindings = next,
                        None => return Ok(None),
                    }
                }
                bindings
            }
            Binding::Merge => match step.bindings.merge(answer) {
                Some(bindings) => bindings,
                None => return Ok(None),
            },
            Binding::Filter => step.bindings.clone(),
        };
        self.advance(core, upstream, step.part + 1, bindings).map(Some)
    }

    fn advance(&self, core: &Core, upstream: &Visit, part: usize, bindings: ConceptMap) -> Result<Extension> {
        if part == self.parts() {
            return Ok(Extension::Answer(bindings.project(&self.outputs)));
        }
        let (visit, step) = self.step(core, upstream, part, bindings)?;
        Ok(Extension::Downstream(visit, step))
    }

    fn step(&self, core: &Core, upstream: &Visit, part: usize, bindings: ConceptMap) -> Result<(Visit, Step)> {
        let registry = core.registry();
        let atoms = self.conjunction.atoms();
        let disjunctions = self.conjunction.disjunctions();

        let (receiver, partial, binding) = if let Some(atom) = atoms.get(part) {
            let (key, slots) = ConcludableKey::from_atom(atom, &bindings);
            let free = (0..slots.len()).map(slot_variable).collect();
            (
                registry.register_concludable(&key)?,
                Partial::derived(bindings.clone(), free, upstream),
                Binding::Slots(slots),
            )
        } else if let Some(disjunction) = disjunctions.get(part - atoms.len()) {
            let inputs = bindings.project(&disjunction.mentioned_variables());
            let free = disjunction
                .variables()
                .into_iter()
                .filter(|variable| !inputs.contains(variable))
                .collect();
            (
                registry.register_disjunction(disjunction)?,
                Partial::derived(inputs, free, upstream),
                Binding::Merge,
            )
        } else {
            let negated = self
                .conjunction
                .negations()
                .get(part - atoms.len() - disjunctions.len())
                .ok_or_else(|| ReasonerError::illegal(format!("plan has no part {part}")))?;
            let inputs = bindings.project(&negated.mentioned_variables());
            (
                registry.register_negation(negated)?,
                Partial::derived(inputs, BTreeSet::new(), upstream),
                Binding::Filter,
            )
        };
        let visit = Visit::new(core.id(), receiver, partial, Some(part), upstream.trace());
        Ok((
            visit,
            Step {
                part,
                bindings,
                binding,
            },
        ))
    }
}

/// Resolves a rule condition, or one branch of a disjunction.
pub(crate) struct ConjunctionResolver {
    core: Core,
    plan: ConjunctionPlan,
    states: HashMap<Visit, RequestState>,
    steps: HashMap<Visit, Step>,
}

impl ConjunctionResolver {
    pub(crate) fn new(core: Core, plan: ConjunctionPlan) -> Self {
        Self {
            core,
            plan,
            states: HashMap::new(),
            steps: HashMap::new(),
        }
    }

    fn initialise(&mut self, upstream: &Visit, iteration: u32) -> Result<()> {
        for stale in self.core.forget_upstream(upstream) {
            self.steps.remove(&stale);
        }
        let cache = AnswerCache::without_source();
        let mut downstream = DownstreamManager::default();
        match self
            .plan
            .start(&self.core, upstream, upstream.partial().concepts().clone())?
        {
            Extension::Answer(answer) => {
                cache.add(answer);
            }
            Extension::Downstream(visit, step) => {
                self.steps.insert(visit.clone(), step);
                downstream.add(visit)?;
            }
        }
        self.states.insert(
            upstream.clone(),
            RequestState::exploring(upstream.clone(), iteration, cache, downstream, false),
        );
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
        self.steps.clear();
        self.core.clear_routes();
    }
}

impl Resolver for ConjunctionResolver {
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
        let step = self
            .steps
            .get(&request)
            .cloned()
            .ok_or_else(|| ReasonerError::illegal("answer for an unknown join step"))?;
        let extension = self.plan.extend(&self.core, &upstream, &step, &answer)?;
        if let Some(state) = self.states.get_mut(&upstream) {
            match extension {
                Some(Extension::Answer(joined)) => {
                    state.new_answer(joined);
                }
                Some(Extension::Downstream(visit, step)) => {
                    let downstream = state.downstream()?;
                    if !downstream.contains(&visit) {
                        self.steps.insert(visit.clone(), step);
                        downstream.add(visit)?;
                    }
                }
                None => {}
            }
        }
        self.send_next(&upstream)
    }

    fn receive_fail(&mut self, request: Visit, iteration: u32) -> Result<()> {
        let Some(upstream) = current_upstream(&self.core, &self.states, &request, iteration) else {
            return Ok(());
        };
        self.core.forget(&request);
        self.steps.remove(&request);
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

super::resolver_actor!(ConjunctionResolver);
