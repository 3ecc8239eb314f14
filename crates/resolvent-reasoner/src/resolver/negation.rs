//! Negations: one per negated conjunction.
//!
//! A negation holds for a binding when the negated conjunction, with that
//! binding substituted, has no answer. Each distinct binding is decided once
//! by a sub-query: a separate top-level resolution of the substituted
//! pattern, run to its own fixpoint. Rule sets are stratified, so nothing
//! the sub-query reads depends on what this resolution is still concluding.
//!
//! ```text
//!   unknown ──visit──▶ pending ──sub-query exhausted──▶ holds     answer once, then fail
//!                         └─────sub-query answered────▶ violated  fail
//! ```
//!
//! Requests for a pending binding wait for the check; nothing is sent on
//! their behalf. A negation never reports `Blocked`.

use super::{needs_state, perform, Core, Resolver};
use crate::cache::AnswerCache;
use crate::message::{Cycle, Message, Revisit, Visit};
use crate::state::{Action, RequestState};
use crate::{ReasonerError, Result};
use resolvent_logic::{ConceptMap, Conjunction};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Result of one sub-query, delivered back to the negation that started it.
#[derive(Debug)]
pub struct NegationCheck {
    pub id: u64,
    /// Whether the negated pattern has no answer.
    pub holds: Result<bool>,
}

#[derive(Debug)]
enum Outcome {
    Pending(Vec<Visit>),
    Holds,
    Violated,
}

pub(crate) struct NegationResolver {
    core: Core,
    negated: Conjunction,
    states: HashMap<Visit, RequestState>,
    outcomes: HashMap<ConceptMap, Outcome>,
    /// Running sub-queries by check id.
    checks: HashMap<u64, ConceptMap>,
    next_check: u64,
}

impl NegationResolver {
    pub(crate) fn new(core: Core, negated: Conjunction) -> Self {
        Self {
            core,
            negated,
            states: HashMap::new(),
            outcomes: HashMap::new(),
            checks: HashMap::new(),
            next_check: 0,
        }
    }

    fn initialise(&mut self, upstream: &Visit, iteration: u32) -> Result<()> {
        let bindings = upstream.partial().concepts().clone();
        let state = RequestState::replaying(upstream.clone(), iteration, AnswerCache::without_source());
        match self.outcomes.get_mut(&bindings) {
            Some(Outcome::Holds) => {
                state.new_answer(bindings);
            }
            Some(Outcome::Violated) => {}
            Some(Outcome::Pending(waiting)) => {
                if !waiting.contains(upstream) {
                    waiting.push(upstream.clone());
                }
            }
            None => {
                self.check(&bindings)?;
                self.outcomes
                    .insert(bindings, Outcome::Pending(vec![upstream.clone()]));
            }
        }
        self.states.insert(upstream.clone(), state);
        Ok(())
    }

    /// Start the sub-query deciding `bindings`.
    fn check(&mut self, bindings: &ConceptMap) -> Result<()> {
        let id = self.next_check;
        self.next_check += 1;
        let registry = self.core.registry().clone();
        let query = self.negated.substitute(bindings);
        debug!(resolver = self.core.name(), %query, "checking negation");
        let mut stream = registry.subquery(query)?;
        self.checks.insert(id, bindings.clone());

        let owner = self.core.id();
        let runtime = registry.runtime().clone();
        runtime.spawn(async move {
            let holds = match stream.next().await {
                None => Ok(true),
                Some(Ok(_)) => Ok(false),
                Some(Err(err)) => Err(err),
            };
            drop(stream);
            if let Err(err) = registry.send(owner, Message::Checked(NegationCheck { id, holds })) {
                registry.terminate(err);
            }
        });
        Ok(())
    }

    fn is_pending(&self, upstream: &Visit) -> bool {
        matches!(
            self.outcomes.get(upstream.partial().concepts()),
            Some(Outcome::Pending(_))
        )
    }

    fn send_next(&mut self, upstream: &Visit) -> Result<()> {
        if self.is_pending(upstream) {
            return Ok(());
        }
        let state = self
            .states
            .get_mut(upstream)
            .ok_or_else(|| ReasonerError::illegal(format!("{} lost a request", self.core.name())))?;
        let action = match state.next_answer() {
            Some(answer) => Action::Answer(answer),
            None => Action::Fail,
        };
        perform(&mut self.core, state, action)
    }

    fn release(&mut self) {
        self.states.clear();
        self.outcomes.clear();
        self.checks.clear();
    }
}

impl Resolver for NegationResolver {
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
        self.receive_visit(revisit.visit().clone(), iteration)
    }

    fn receive_answer(&mut self, _request: Visit, _answer: ConceptMap, _iteration: u32) -> Result<()> {
        Err(self.unexpected("answer"))
    }

    fn receive_fail(&mut self, _request: Visit, _iteration: u32) -> Result<()> {
        Err(self.unexpected("exhausted"))
    }

    fn receive_blocked(&mut self, _request: Visit, _cycles: BTreeSet<Cycle>, _iteration: u32) -> Result<()> {
        Err(self.unexpected("blocked"))
    }

    fn receive_check(&mut self, check: NegationCheck) -> Result<()> {
        let bindings = self.checks.remove(&check.id).ok_or_else(|| {
            ReasonerError::illegal(format!("{} got an unknown check {}", self.core.name(), check.id))
        })?;
        let holds = check.holds?;
        debug!(resolver = self.core.name(), %bindings, holds, "negation decided");
        let outcome = if holds { Outcome::Holds } else { Outcome::Violated };
        let waiting = match self.outcomes.insert(bindings.clone(), outcome) {
            Some(Outcome::Pending(waiting)) => waiting,
            _ => Vec::new(),
        };
        for upstream in waiting {
            let Some(state) = self.states.get(&upstream) else {
                continue;
            };
            if holds {
                state.new_answer(bindings.clone());
            }
            self.send_next(&upstream)?;
        }
        Ok(())
    }
}

super::resolver_actor!(NegationResolver);
