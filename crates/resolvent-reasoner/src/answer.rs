//! Partial answers.

use crate::message::{ResolverId, Template, Visit};
use ahash::AHasher;
use resolvent_logic::{ConceptMap, Variable};
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// The bindings carried by a request, plus the request it was derived from.
///
/// `concepts` are the bindings known to the sender when it made the request;
/// `free` are the variables the receiver is expected to bind. `parent` points
/// at the template of the upstream request the sender was serving, so the
/// chain of parents is the exploration path from the root down to here. That
/// chain makes templates unique per path and is what cycle detection walks.
///
/// The hash of the whole chain is computed once, at construction, from the
/// parent's stored hash; hashing and unequal comparisons never walk the chain.
#[derive(Debug, Clone)]
pub struct Partial {
    concepts: ConceptMap,
    free: BTreeSet<Variable>,
    parent: Option<Arc<Template>>,
    hash: u64,
}

impl Partial {
    /// A partial with no upstream: the top of a query.
    pub fn root(concepts: ConceptMap, free: BTreeSet<Variable>) -> Self {
        Self::build(concepts, free, None)
    }

    /// A partial created while serving `upstream`.
    pub fn derived(concepts: ConceptMap, free: BTreeSet<Variable>, upstream: &Visit) -> Self {
        Self::build(concepts, free, Some(upstream.template_arc()))
    }

    fn build(concepts: ConceptMap, free: BTreeSet<Variable>, parent: Option<Arc<Template>>) -> Self {
        let mut hasher = AHasher::default();
        concepts.hash(&mut hasher);
        free.hash(&mut hasher);
        // A template hashes its partial through the stored value.
        parent.as_deref().hash(&mut hasher);
        Self {
            hash: hasher.finish(),
            concepts,
            free,
            parent,
        }
    }

    pub fn concepts(&self) -> &ConceptMap {
        &self.concepts
    }

    pub fn free(&self) -> &BTreeSet<Variable> {
        &self.free
    }

    pub fn parent(&self) -> Option<&Template> {
        self.parent.as_deref()
    }

    pub fn is_fully_bound(&self) -> bool {
        self.free.is_empty()
    }

    /// Templates of every request this partial descends from, nearest first.
    pub fn ancestors(&self) -> impl Iterator<Item = &Template> {
        std::iter::successors(self.parent(), |template| template.partial().parent())
    }

    /// Whether the exploration path already passes through `resolver`.
    pub fn passes_through(&self, resolver: ResolverId) -> bool {
        self.ancestors().any(|template| template.receiver() == resolver)
    }
}

impl PartialEq for Partial {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && self.concepts == other.concepts
            && self.free == other.free
            && match (&self.parent, &other.parent) {
                (None, None) => true,
                (Some(ours), Some(theirs)) => Arc::ptr_eq(ours, theirs) || ours == theirs,
                _ => false,
            }
    }
}

impl Eq for Partial {}

impl Hash for Partial {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::TraceId;
    use resolvent_logic::Concept;
    use std::collections::hash_map::DefaultHasher;

    fn bindings(raw: u32) -> ConceptMap {
        [(Variable::new("x"), Concept::new(raw))].into_iter().collect()
    }

    /// A visit `depth` requests below a root bound to `root`.
    fn chain(root: u32, depth: usize) -> Visit {
        let mut visit = Visit::new(
            ResolverId::new(0),
            ResolverId::new(1),
            Partial::root(bindings(root), BTreeSet::new()),
            None,
            TraceId(0),
        );
        for level in 0..depth {
            let partial = Partial::derived(bindings(level as u32 % 7), BTreeSet::new(), &visit);
            visit = Visit::new(
                ResolverId::new(1 + level % 2),
                ResolverId::new(2 - level % 2),
                partial,
                Some(0),
                TraceId(0),
            );
        }
        visit
    }

    fn hash_of(value: &impl Hash) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_deep_chains_compare_by_path() {
        let first = chain(1, 1000);
        let second = chain(1, 1000);
        assert_eq!(first, second);
        assert_eq!(hash_of(&first), hash_of(&second));

        let elsewhere = chain(2, 1000);
        assert_ne!(first, elsewhere);
        assert_ne!(hash_of(first.partial()), hash_of(elsewhere.partial()));
        assert_eq!(first.partial().ancestors().count(), 1000);
    }

    #[test]
    fn test_shared_parent_is_equal_without_walking() {
        let upstream = chain(3, 10);
        let a = Partial::derived(bindings(4), BTreeSet::new(), &upstream);
        let b = Partial::derived(bindings(4), BTreeSet::new(), &upstream);
        let c = Partial::derived(bindings(5), BTreeSet::new(), &upstream);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, Partial::root(bindings(4), BTreeSet::new()));
    }
}
