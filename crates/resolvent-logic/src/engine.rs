//! Storage collaborators.
//!
//! The reasoner reads stored data through [`TraversalEngine`] and writes
//! inferred facts through [`ConceptManager`]. Both are synchronous: a
//! traversal is a lazy iterator the reasoner pulls from inside a resolver.

use crate::concept::{Concept, ConceptMap, Label};
use crate::concludable::ConcludableKey;
use crate::error::GraphError;

/// Lazy producer of slot answers for one concludable key.
pub type AnswerSource = Box<dyn Iterator<Item = ConceptMap> + Send>;

pub trait TraversalEngine: Send + Sync {
    /// Stored facts matching `key`, expressed over its slot variables.
    ///
    /// Each call starts a fresh traversal, so facts inferred since the last
    /// call are visible.
    fn traverse(&self, key: &ConcludableKey) -> Result<AnswerSource, GraphError>;
}

/// Outcome of writing an inferred fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    /// Newly written.
    Inserted,
    /// Already present as an inferred fact.
    Inferred,
    /// Already present as base data.
    Stored,
    /// Not written: a concept is unknown or the arity does not match.
    Rejected,
}

impl Insertion {
    /// Whether the fact counts as a conclusion of the rule that produced it.
    pub fn is_inferred(self) -> bool {
        matches!(self, Insertion::Inserted | Insertion::Inferred)
    }
}

pub trait ConceptManager: Send + Sync {
    fn materialise(&self, predicate: &Label, tuple: &[Concept]) -> Result<Insertion, GraphError>;
}
