//! Resolvent graph store.
//!
//! A small in-memory store of ground facts `predicate(concept, ...)` that
//! implements both storage collaborators of the reasoner:
//!
//! - [`TraversalEngine`](resolvent_logic::TraversalEngine): lazy, snapshot
//!   scoped lookups of stored facts by concludable key
//! - [`ConceptManager`](resolvent_logic::ConceptManager): idempotent writes of
//!   inferred facts
//!
//! Concepts are interned names; see [`ConceptInterner`].

pub mod interner;
pub mod store;

pub use interner::ConceptInterner;
pub use store::{FactKind, GraphStore, StoreStats, Traversal};
