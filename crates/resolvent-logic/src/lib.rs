//! Resolvent logic: the vocabulary shared by the graph store and the reasoner.
//!
//! A query is a [`Conjunction`] of [`Atom`]s over [`Variable`]s and graph
//! [`Concept`]s, optionally with nested [`Disjunction`]s and negated
//! conjunctions. Rules conclude a single atom from a conjunction; a rule set
//! must be stratified ([`check_stratified`]). The reasoner
//! never reasons about atoms directly; it canonicalises each atom under the
//! bindings known at request time into a [`ConcludableKey`]:
//!
//! ```text
//!   parent($x, #7, $x)   with {}         ==>  parent(_0, #7, _0)
//!   parent($x, $y, $z)   with {$y = #7}  ==>  parent(_0, #7, _1)
//! ```
//!
//! Keys are the unit of sharing: every request for the same key, wherever it
//! comes from, is answered from the same cache.
//!
//! The two collaborator traits in [`engine`] are the only way the reasoner
//! touches storage.

pub mod concept;
pub mod concludable;
pub mod engine;
pub mod error;
pub mod pattern;
pub mod rule;

pub use concept::{Concept, ConceptMap, Label, Variable};
pub use concludable::{slot_variable, Arg, ConcludableKey};
pub use engine::{AnswerSource, ConceptManager, Insertion, TraversalEngine};
pub use error::{GraphError, LogicError};
pub use pattern::{Atom, Conjunction, Disjunction, Fact, Term};
pub use rule::{check_stratified, Rule};
