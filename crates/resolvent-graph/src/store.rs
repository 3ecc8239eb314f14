//! GraphStore: facts, their predicate index, and the collaborator impls.
//!
//! Facts live in one append-only table. Each fact id is recorded in a
//! per-predicate `RoaringBitmap`; a traversal clones the bitmap for its
//! predicate and walks it lazily, so it sees exactly the facts present when it
//! started. Inferred facts are appended like base facts but flagged, which is
//! what lets [`ConceptManager::materialise`] tell "already derived" apart from
//! "already stored".

use crate::interner::ConceptInterner;
use parking_lot::RwLock;
use resolvent_logic::{
    AnswerSource, Concept, ConceptManager, ConceptMap, ConcludableKey, GraphError, Insertion, Label,
    TraversalEngine,
};
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FactKind {
    Base,
    Inferred,
}

#[derive(Debug, Clone)]
struct StoredFact {
    tuple: Vec<Concept>,
    kind: FactKind,
}

#[derive(Debug, Default)]
struct FactTable {
    facts: Vec<StoredFact>,
    /// `predicate -> {fact ids}`.
    by_predicate: HashMap<Label, RoaringBitmap>,
    /// First fact id for each distinct `(predicate, tuple)`.
    by_tuple: HashMap<(Label, Vec<Concept>), u32>,
    arity: HashMap<Label, usize>,
}

impl FactTable {
    fn check_arity(&mut self, predicate: &Label, found: usize) -> Result<(), GraphError> {
        let expected = *self.arity.entry(predicate.clone()).or_insert(found);
        if expected != found {
            return Err(GraphError::ArityMismatch {
                predicate: predicate.clone(),
                expected,
                found,
            });
        }
        Ok(())
    }

    fn append(&mut self, predicate: &Label, tuple: Vec<Concept>, kind: FactKind) -> u32 {
        let id = self.facts.len() as u32;
        self.by_predicate
            .entry(predicate.clone())
            .or_insert_with(RoaringBitmap::new)
            .insert(id);
        self.by_tuple.entry((predicate.clone(), tuple.clone())).or_insert(id);
        self.facts.push(StoredFact { tuple, kind });
        id
    }
}

/// Counts reported by [`GraphStore::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub concepts: usize,
    pub facts: usize,
    pub inferred: usize,
    pub predicates: usize,
}

/// In-memory graph store.
#[derive(Debug, Default)]
pub struct GraphStore {
    interner: ConceptInterner,
    table: Arc<RwLock<FactTable>>,
    closed: AtomicBool,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a concept by name.
    pub fn concept(&self, name: &str) -> Concept {
        self.interner.intern(name)
    }

    pub fn name_of(&self, concept: Concept) -> Option<String> {
        self.interner.lookup(concept)
    }

    pub fn interner(&self) -> &ConceptInterner {
        &self.interner
    }

    /// Add a base fact. Duplicates are kept and replayed by traversal.
    pub fn insert(&self, predicate: &str, tuple: &[Concept]) -> Result<u32, GraphError> {
        if self.is_closed() {
            return Err(GraphError::Closed);
        }
        let predicate = Label::new(predicate);
        let mut table = self.table.write();
        table.check_arity(&predicate, tuple.len())?;
        Ok(table.append(&predicate, tuple.to_vec(), FactKind::Base))
    }

    /// Add a base fact, interning its arguments by name.
    pub fn insert_named(&self, predicate: &str, names: &[&str]) -> Result<u32, GraphError> {
        let tuple: Vec<Concept> = names.iter().map(|name| self.concept(name)).collect();
        self.insert(predicate, &tuple)
    }

    pub fn contains(&self, predicate: &str, tuple: &[Concept]) -> bool {
        self.table
            .read()
            .by_tuple
            .contains_key(&(Label::new(predicate), tuple.to_vec()))
    }

    /// Kind of the first stored copy of a fact.
    pub fn kind_of(&self, predicate: &str, tuple: &[Concept]) -> Option<FactKind> {
        let table = self.table.read();
        let id = *table.by_tuple.get(&(Label::new(predicate), tuple.to_vec()))?;
        Some(table.facts[id as usize].kind)
    }

    /// Tuples of `predicate` in insertion order.
    pub fn facts_of(&self, predicate: &str) -> Vec<Vec<Concept>> {
        let table = self.table.read();
        let Some(ids) = table.by_predicate.get(&Label::new(predicate)) else {
            return Vec::new();
        };
        ids.iter().map(|id| table.facts[id as usize].tuple.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.table.read().facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Facts written by materialisation.
    pub fn inferred_len(&self) -> usize {
        self.table
            .read()
            .facts
            .iter()
            .filter(|fact| fact.kind == FactKind::Inferred)
            .count()
    }

    pub fn stats(&self) -> StoreStats {
        let table = self.table.read();
        StoreStats {
            concepts: self.interner.len(),
            facts: table.facts.len(),
            inferred: table
                .facts
                .iter()
                .filter(|fact| fact.kind == FactKind::Inferred)
                .count(),
            predicates: table.by_predicate.len(),
        }
    }

    /// Refuse all further traversal and writes.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(facts = self.len(), "graph store closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Traversal
// ============================================================================

/// Lazy walk over the facts of one predicate present at creation time.
pub struct Traversal {
    table: Arc<RwLock<FactTable>>,
    ids: roaring::bitmap::IntoIter,
    key: ConcludableKey,
}

impl Iterator for Traversal {
    type Item = ConceptMap;

    fn next(&mut self) -> Option<ConceptMap> {
        loop {
            let id = self.ids.next()?;
            let table = self.table.read();
            if let Some(answer) = self.key.matches(&table.facts[id as usize].tuple) {
                return Some(answer);
            }
        }
    }
}

impl TraversalEngine for GraphStore {
    fn traverse(&self, key: &ConcludableKey) -> Result<AnswerSource, GraphError> {
        if self.is_closed() {
            return Err(GraphError::Closed);
        }
        let ids = self
            .table
            .read()
            .by_predicate
            .get(key.predicate())
            .cloned()
            .unwrap_or_default();
        trace!(key = %key, candidates = ids.len(), "traverse");
        Ok(Box::new(Traversal {
            table: self.table.clone(),
            ids: ids.into_iter(),
            key: key.clone(),
        }))
    }
}

impl ConceptManager for GraphStore {
    fn materialise(&self, predicate: &Label, tuple: &[Concept]) -> Result<Insertion, GraphError> {
        if self.is_closed() {
            return Err(GraphError::Closed);
        }
        if !tuple.iter().all(|concept| self.interner.contains(*concept)) {
            return Ok(Insertion::Rejected);
        }
        let mut table = self.table.write();
        if table.check_arity(predicate, tuple.len()).is_err() {
            return Ok(Insertion::Rejected);
        }
        if let Some(id) = table.by_tuple.get(&(predicate.clone(), tuple.to_vec())) {
            return Ok(match table.facts[*id as usize].kind {
                FactKind::Base => Insertion::Stored,
                FactKind::Inferred => Insertion::Inferred,
            });
        }
        table.append(predicate, tuple.to_vec(), FactKind::Inferred);
        Ok(Insertion::Inserted)
    }
}
