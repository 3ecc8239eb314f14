//! Registry: the arena of actors serving one top-level query.
//!
//! Actors never hold references to each other. They address each other by
//! [`ResolverId`], an index into the registry's mailbox arena, and ask the
//! registry to create the resolvers they need:
//!
//! ```text
//!   Registry
//!   ├── arena        ResolverId → (name, mailbox)
//!   ├── concludables ConcludableKey → ResolverId
//!   ├── conclusions  rule index → ResolverId
//!   ├── conditions   rule index → ResolverId
//!   ├── branches     Conjunction → ResolverId      (disjunction branches)
//!   ├── disjunctions Disjunction → ResolverId
//!   ├── negations    Conjunction → ResolverId
//!   ├── complete     ConcludableKey → AnswerCache   (subsumption)
//!   ├── blocked      ResolverId → iteration
//!   ├── children     sub-query registries           (negation checks)
//!   └── explanations Fact → [Explanation]
//! ```
//!
//! Terminating the registry drops every mailbox, which stops every actor,
//! and terminates every child registry. Termination happens once: on the
//! first actor error, on exhaustion of the answer stream's owner, or when
//! the stream is dropped. Explanations outlive termination so that an
//! exhausted stream can still be asked about its answers.

use crate::actor::{self, Mailbox};
use crate::cache::AnswerCache;
use crate::explanation::Explanation;
use crate::materialiser::Materialiser;
use crate::message::{Message, ResolverId, TraceId};
use crate::progress::ProgressPredicate;
use crate::resolver::concludable::ConcludableResolver;
use crate::resolver::conclusion::ConclusionResolver;
use crate::resolver::conjunction::{ConjunctionPlan, ConjunctionResolver};
use crate::resolver::disjunction::DisjunctionResolver;
use crate::resolver::negation::NegationResolver;
use crate::resolver::root::RootResolver;
use crate::resolver::Core;
use crate::stream::{AnswerStream, RootEvent};
use crate::tracer::{EdgeKind, ResolutionTracer};
use crate::{ReasonerError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use resolvent_logic::{
    ConceptManager, ConceptMap, ConcludableKey, Conjunction, Disjunction, Fact, Rule, TraversalEngine,
};
use std::hash::Hash;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

// ============================================================================
// Context
// ============================================================================

/// What every query of one reasoner shares.
#[derive(Clone)]
pub(crate) struct ReasonerContext {
    pub(crate) traversal: Arc<dyn TraversalEngine>,
    pub(crate) concepts: Arc<dyn ConceptManager>,
    pub(crate) rules: Arc<[Rule]>,
    pub(crate) progress: Arc<dyn ProgressPredicate>,
    pub(crate) max_iterations: u32,
    pub(crate) explain: bool,
    pub(crate) runtime: Handle,
}

/// A rule whose conclusion can produce answers for some key.
#[derive(Debug, Clone)]
pub(crate) struct Applicable {
    pub(crate) rule: Rule,
    pub(crate) conclusion: ResolverId,
    /// Bindings of the rule's conclusion variables implied by the key.
    pub(crate) bindings: ConceptMap,
}

struct Slot {
    name: String,
    mailbox: Mailbox,
}

/// A resolver allocated by [`Registry::claim`] that still has to be spawned.
type Claimed = (String, UnboundedReceiver<Message>);

// ============================================================================
// Registry
// ============================================================================

pub(crate) struct Registry {
    context: ReasonerContext,
    trace_id: TraceId,
    tracer: Option<ResolutionTracer>,
    events: UnboundedSender<RootEvent>,

    arena: RwLock<Vec<Slot>>,
    concludables: DashMap<ConcludableKey, ResolverId>,
    conclusions: DashMap<usize, ResolverId>,
    conditions: DashMap<usize, ResolverId>,
    branches: DashMap<Conjunction, ResolverId>,
    disjunctions: DashMap<Disjunction, ResolverId>,
    negations: DashMap<Conjunction, ResolverId>,
    complete: DashMap<ConcludableKey, AnswerCache>,
    blocked: DashMap<ResolverId, u32>,
    children: Mutex<Vec<Arc<Registry>>>,
    explanations: DashMap<Fact, Vec<Explanation>>,

    root: OnceLock<ResolverId>,
    materialiser: OnceLock<ResolverId>,
    subsumption_hits: AtomicUsize,
    terminated: AtomicBool,
}

impl Registry {
    pub(crate) fn new(
        context: ReasonerContext,
        trace_id: TraceId,
        tracer: Option<ResolutionTracer>,
    ) -> (Arc<Self>, UnboundedReceiver<RootEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let registry = Arc::new(Self {
            context,
            trace_id,
            tracer,
            events,
            arena: RwLock::new(Vec::new()),
            concludables: DashMap::new(),
            conclusions: DashMap::new(),
            conditions: DashMap::new(),
            branches: DashMap::new(),
            disjunctions: DashMap::new(),
            negations: DashMap::new(),
            complete: DashMap::new(),
            blocked: DashMap::new(),
            children: Mutex::new(Vec::new()),
            explanations: DashMap::new(),
            root: OnceLock::new(),
            materialiser: OnceLock::new(),
            subsumption_hits: AtomicUsize::new(0),
            terminated: AtomicBool::new(false),
        });
        (registry, receiver)
    }

    /// Spawn the materialiser and the root for `query`. Returns the root.
    pub(crate) fn start(self: &Arc<Self>, query: Conjunction) -> Result<ResolverId> {
        if let Some(tracer) = &self.tracer {
            tracer.start()?;
        }

        let (id, mailbox) = self.allocate("Materialiser")?;
        self.materialiser
            .set(id)
            .map_err(|_| ReasonerError::illegal("registry started twice"))?;
        let materialiser = Materialiser::new(id, self.context.concepts.clone(), self.clone());
        actor::spawn(self.clone(), materialiser, mailbox);

        let (id, mailbox) = self.allocate("Root")?;
        self.root
            .set(id)
            .map_err(|_| ReasonerError::illegal("registry started twice"))?;
        let root = RootResolver::new(Core::new(id, "Root".to_string(), self.clone()), query);
        actor::spawn(self.clone(), root, mailbox);
        debug!(trace = self.trace_id.0, root = %id, "resolution started");
        Ok(id)
    }

    fn allocate(&self, name: &str) -> Result<(ResolverId, UnboundedReceiver<Message>)> {
        let mut arena = self.arena.write();
        if self.is_terminated() {
            return Err(ReasonerError::Terminated);
        }
        let (mailbox, receiver) = mpsc::unbounded_channel();
        let id = ResolverId::new(arena.len());
        arena.push(Slot {
            name: name.to_string(),
            mailbox,
        });
        debug!(%id, name, "resolver created");
        Ok((id, receiver))
    }

    // ------------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------------

    /// Deliver `message` to `to`. Silently dropped once terminated.
    pub(crate) fn send(&self, to: ResolverId, message: Message) -> Result<()> {
        if self.is_terminated() {
            return Ok(());
        }
        let arena = self.arena.read();
        let Some(entry) = arena.get(to.index()) else {
            if self.is_terminated() {
                return Ok(());
            }
            return Err(ReasonerError::illegal(format!("no actor {to}")));
        };
        // A closed mailbox means the actor stopped, which only happens on
        // termination.
        let _ = entry.mailbox.send(message);
        Ok(())
    }

    pub(crate) fn name_of(&self, id: ResolverId) -> String {
        self.arena
            .read()
            .get(id.index())
            .map_or_else(|| id.to_string(), |entry| entry.name.clone())
    }

    pub(crate) fn trace(
        &self,
        kind: EdgeKind,
        from: ResolverId,
        to: ResolverId,
        iteration: u32,
        bindings: &ConceptMap,
    ) -> Result<()> {
        let Some(tracer) = &self.tracer else {
            return Ok(());
        };
        if self.is_terminated() {
            return Ok(());
        }
        tracer.record(
            kind,
            &self.name_of(from),
            &self.name_of(to),
            iteration,
            &bindings.to_string(),
        )
    }

    /// Write the trace file, if tracing.
    pub(crate) fn finish_trace(&self) -> Result<Option<PathBuf>> {
        self.tracer.as_ref().map(ResolutionTracer::finish).transpose()
    }

    pub(crate) fn emit(&self, event: RootEvent) {
        // The stream may already be gone.
        let _ = self.events.send(event);
    }

    // ------------------------------------------------------------------------
    // Resolver creation
    // ------------------------------------------------------------------------

    /// The resolver registered under `key`, allocating one when there is
    /// none. A claimed slot is returned only to the caller that allocated it,
    /// which must spawn the resolver.
    fn claim<K: Eq + Hash + Clone>(
        &self,
        map: &DashMap<K, ResolverId>,
        key: &K,
        name: impl FnOnce() -> String,
    ) -> Result<(ResolverId, Option<Claimed>)> {
        if let Some(id) = map.get(key) {
            return Ok((*id, None));
        }
        match map.entry(key.clone()) {
            Entry::Occupied(entry) => Ok((*entry.get(), None)),
            Entry::Vacant(entry) => {
                let name = name();
                let (id, mailbox) = self.allocate(&name)?;
                entry.insert(id);
                Ok((id, Some((name, mailbox))))
            }
        }
    }

    pub(crate) fn register_concludable(self: &Arc<Self>, key: &ConcludableKey) -> Result<ResolverId> {
        let (id, claimed) = self.claim(&self.concludables, key, || format!("Concludable({key})"))?;
        if let Some((name, mailbox)) = claimed {
            let resolver = ConcludableResolver::new(Core::new(id, name, self.clone()), key.clone());
            actor::spawn(self.clone(), resolver, mailbox);
        }
        Ok(id)
    }

    pub(crate) fn register_conclusion(self: &Arc<Self>, rule: usize) -> Result<ResolverId> {
        let rule_def = self.rule(rule)?.clone();
        let (id, claimed) = self.claim(&self.conclusions, &rule, || format!("Conclusion({})", rule_def.name()))?;
        if let Some((name, mailbox)) = claimed {
            let condition = self.register_condition(rule)?;
            let resolver = ConclusionResolver::new(Core::new(id, name, self.clone()), rule_def, condition);
            actor::spawn(self.clone(), resolver, mailbox);
        }
        Ok(id)
    }

    fn register_condition(self: &Arc<Self>, rule: usize) -> Result<ResolverId> {
        let rule_def = self.rule(rule)?.clone();
        let (id, claimed) = self.claim(&self.conditions, &rule, || format!("Condition({})", rule_def.name()))?;
        if let Some((name, mailbox)) = claimed {
            // Explanations need the whole condition answer, not just the
            // bindings of the conclusion.
            let outputs = if self.context.explain {
                rule_def.when().variables()
            } else {
                rule_def.then().variables()
            };
            let plan = ConjunctionPlan::new(rule_def.when().clone(), outputs);
            let resolver = ConjunctionResolver::new(Core::new(id, name, self.clone()), plan);
            actor::spawn(self.clone(), resolver, mailbox);
        }
        Ok(id)
    }

    fn register_branch(self: &Arc<Self>, branch: &Conjunction) -> Result<ResolverId> {
        let (id, claimed) = self.claim(&self.branches, branch, || format!("Branch({branch})"))?;
        if let Some((name, mailbox)) = claimed {
            let plan = ConjunctionPlan::new(branch.clone(), branch.variables());
            let resolver = ConjunctionResolver::new(Core::new(id, name, self.clone()), plan);
            actor::spawn(self.clone(), resolver, mailbox);
        }
        Ok(id)
    }

    pub(crate) fn register_disjunction(self: &Arc<Self>, disjunction: &Disjunction) -> Result<ResolverId> {
        let (id, claimed) = self.claim(&self.disjunctions, disjunction, || format!("Disjunction({disjunction})"))?;
        if let Some((name, mailbox)) = claimed {
            let branches = disjunction
                .branches()
                .iter()
                .map(|branch| self.register_branch(branch))
                .collect::<Result<Vec<_>>>()?;
            let resolver = DisjunctionResolver::new(Core::new(id, name, self.clone()), disjunction.clone(), branches);
            actor::spawn(self.clone(), resolver, mailbox);
        }
        Ok(id)
    }

    pub(crate) fn register_negation(self: &Arc<Self>, negated: &Conjunction) -> Result<ResolverId> {
        let (id, claimed) = self.claim(&self.negations, negated, || format!("Negation(not {{{negated}}})"))?;
        if let Some((name, mailbox)) = claimed {
            let resolver = NegationResolver::new(Core::new(id, name, self.clone()), negated.clone());
            actor::spawn(self.clone(), resolver, mailbox);
        }
        Ok(id)
    }

    /// Start an independent resolution of `query` sharing this registry's
    /// context. The child is terminated with this registry.
    pub(crate) fn subquery(self: &Arc<Self>, query: Conjunction) -> Result<AnswerStream> {
        let (child, events) = Registry::new(self.context.clone(), self.trace_id, None);
        {
            let mut children = self.children.lock();
            if self.is_terminated() {
                return Err(ReasonerError::Terminated);
            }
            children.retain(|existing| !existing.is_terminated());
            children.push(child.clone());
        }
        match child.start(query.clone()) {
            Ok(root) => Ok(AnswerStream::new(child, root, events, query)),
            Err(err) => {
                child.close();
                Err(err)
            }
        }
    }

    fn rule(&self, index: usize) -> Result<&Rule> {
        self.context
            .rules
            .get(index)
            .ok_or_else(|| ReasonerError::illegal(format!("no rule {index}")))
    }

    /// Every rule whose conclusion unifies with `key`, with its conclusion
    /// resolver.
    pub(crate) fn applicable_rules(self: &Arc<Self>, key: &ConcludableKey) -> Result<Vec<Applicable>> {
        let mut applicable = Vec::new();
        for (index, rule) in self.context.rules.iter().enumerate() {
            let Some(bindings) = key.unify(rule.then()) else {
                continue;
            };
            applicable.push(Applicable {
                rule: rule.clone(),
                conclusion: self.register_conclusion(index)?,
                bindings,
            });
        }
        Ok(applicable)
    }

    // ------------------------------------------------------------------------
    // Subsumption
    // ------------------------------------------------------------------------

    pub(crate) fn record_complete(&self, key: &ConcludableKey, cache: &AnswerCache) {
        self.complete.entry(key.clone()).or_insert_with(|| cache.clone());
    }

    /// A complete cache whose key subsumes `key`, with that key.
    pub(crate) fn subsumer_of(&self, key: &ConcludableKey) -> Option<(ConcludableKey, AnswerCache)> {
        let found = self
            .complete
            .iter()
            .find(|entry| entry.key() != key && entry.key().subsumes(key))
            .map(|entry| (entry.key().clone(), entry.value().clone()))?;
        self.subsumption_hits.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, subsumer = %found.0, "subsumed");
        Some(found)
    }

    pub(crate) fn subsumption_hits(&self) -> usize {
        self.subsumption_hits.load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------------------
    // Blocked tracking
    // ------------------------------------------------------------------------

    pub(crate) fn set_blocked(&self, id: ResolverId, iteration: Option<u32>) {
        match iteration {
            Some(iteration) => {
                self.blocked.insert(id, iteration);
            }
            None => {
                self.blocked.remove(&id);
            }
        }
    }

    pub(crate) fn blocked_in(&self, iteration: u32) -> bool {
        self.blocked.iter().any(|entry| *entry.value() == iteration)
    }

    pub(crate) fn blocked_count(&self) -> usize {
        self.blocked.len()
    }

    // ------------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------------

    /// Every resolver other than the root.
    pub(crate) fn participants(&self) -> Vec<ResolverId> {
        let root = self.root.get().copied();
        let materialiser = self.materialiser.get().copied();
        (0..self.arena.read().len())
            .map(ResolverId::new)
            .filter(|id| Some(*id) != root && Some(*id) != materialiser)
            .collect()
    }

    pub(crate) fn materialiser_id(&self) -> Result<ResolverId> {
        self.materialiser
            .get()
            .copied()
            .ok_or_else(|| ReasonerError::illegal("materialiser not started"))
    }

    pub(crate) fn traversal(&self) -> &Arc<dyn TraversalEngine> {
        &self.context.traversal
    }

    pub(crate) fn progress(&self) -> &Arc<dyn ProgressPredicate> {
        &self.context.progress
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.context.runtime
    }

    pub(crate) fn max_iterations(&self) -> u32 {
        self.context.max_iterations
    }

    pub(crate) fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    // ------------------------------------------------------------------------
    // Explanations
    // ------------------------------------------------------------------------

    pub(crate) fn explains(&self) -> bool {
        self.context.explain
    }

    pub(crate) fn record_explanation(&self, explanation: Explanation) {
        let mut recorded = self
            .explanations
            .entry(explanation.conclusion.clone())
            .or_default();
        if !recorded.contains(&explanation) {
            recorded.push(explanation);
        }
    }

    pub(crate) fn explanations_of(&self, fact: &Fact) -> Vec<Explanation> {
        self.explanations
            .get(fact)
            .map(|recorded| recorded.value().clone())
            .unwrap_or_default()
    }

    pub(crate) fn explanations(&self) -> Vec<Explanation> {
        let mut all: Vec<Explanation> = self
            .explanations
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect();
        all.sort_by(|a, b| a.conclusion.cmp(&b.conclusion).then_with(|| a.rule.cmp(&b.rule)));
        all
    }

    // ------------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------------

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Stop every actor and hand `err` to the answer stream.
    pub(crate) fn terminate(&self, err: ReasonerError) {
        if self.shutdown() {
            warn!(trace = self.trace_id.0, error = %err, "resolution terminated");
            self.emit(RootEvent::Failed(err));
        }
    }

    /// Stop every actor without reporting anything.
    pub(crate) fn close(&self) {
        if self.shutdown() {
            debug!(trace = self.trace_id.0, "resolution closed");
        }
    }

    fn shutdown(&self) -> bool {
        let entries = {
            let mut arena = self.arena.write();
            if self.terminated.swap(true, Ordering::SeqCst) {
                return false;
            }
            std::mem::take(&mut *arena)
        };
        for entry in entries {
            let _ = entry.mailbox.send(Message::Terminate);
        }
        let children = std::mem::take(&mut *self.children.lock());
        for child in children {
            child.terminate(ReasonerError::Terminated);
        }
        self.concludables.clear();
        self.conclusions.clear();
        self.conditions.clear();
        self.branches.clear();
        self.disjunctions.clear();
        self.negations.clear();
        self.complete.clear();
        self.blocked.clear();
        true
    }
}
