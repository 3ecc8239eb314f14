//! Canonical keys for atoms under partial bindings.
//!
//! Two requests share a concludable resolver iff they canonicalise to the same
//! [`ConcludableKey`]. Free positions are numbered by first occurrence, so
//! `p($a, $b, $a)` and `p($x, $y, $x)` produce the same key `p(_0, _1, _0)`.
//! Answers travelling between a concludable and its callers are expressed over
//! the slot variables `_0`, `_1`, ...; the caller maps them back with the slot
//! list returned by [`ConcludableKey::from_atom`].

use crate::concept::{Concept, ConceptMap, Label, Variable};
use crate::pattern::{Atom, Term};
use std::fmt;

/// Variable naming the `index`-th free slot of a key.
pub fn slot_variable(index: usize) -> Variable {
    Variable::new(&format!("_{index}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Arg {
    Bound(Concept),
    Free(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConcludableKey {
    predicate: Label,
    args: Vec<Arg>,
}

impl ConcludableKey {
    pub fn new(predicate: Label, args: Vec<Arg>) -> Self {
        Self { predicate, args }
    }

    /// Canonicalise `atom` under `bindings`.
    ///
    /// Returns the key and, for each free slot, the atom variable it stands for.
    pub fn from_atom(atom: &Atom, bindings: &ConceptMap) -> (Self, Vec<Variable>) {
        let mut slots: Vec<Variable> = Vec::new();
        let args = atom
            .terms()
            .iter()
            .map(|term| match term {
                Term::Concept(concept) => Arg::Bound(*concept),
                Term::Variable(variable) => match bindings.get(variable) {
                    Some(concept) => Arg::Bound(concept),
                    None => match slots.iter().position(|v| v == variable) {
                        Some(slot) => Arg::Free(slot),
                        None => {
                            slots.push(variable.clone());
                            Arg::Free(slots.len() - 1)
                        }
                    },
                },
            })
            .collect();
        (
            Self {
                predicate: atom.predicate().clone(),
                args,
            },
            slots,
        )
    }

    pub fn predicate(&self) -> &Label {
        &self.predicate
    }

    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    pub fn arity(&self) -> usize {
        self.args.len()
    }

    pub fn free_slots(&self) -> usize {
        self.args
            .iter()
            .filter_map(|arg| match arg {
                Arg::Free(slot) => Some(slot + 1),
                Arg::Bound(_) => None,
            })
            .max()
            .unwrap_or(0)
    }

    /// An existence check: no answer can carry more than one binding set.
    pub fn is_fully_bound(&self) -> bool {
        self.free_slots() == 0
    }

    /// Slot answer for a ground tuple, or `None` if the tuple does not match.
    pub fn matches(&self, tuple: &[Concept]) -> Option<ConceptMap> {
        if tuple.len() != self.args.len() {
            return None;
        }
        let mut slots: Vec<Option<Concept>> = vec![None; self.free_slots()];
        for (arg, value) in self.args.iter().zip(tuple) {
            match arg {
                Arg::Bound(bound) if bound != value => return None,
                Arg::Bound(_) => {}
                Arg::Free(slot) => match slots[*slot] {
                    Some(seen) if seen != *value => return None,
                    _ => slots[*slot] = Some(*value),
                },
            }
        }
        slots
            .into_iter()
            .enumerate()
            .map(|(slot, value)| value.map(|v| (slot_variable(slot), v)))
            .collect()
    }

    /// Inverse of [`matches`](Self::matches).
    pub fn tuple_of(&self, answer: &ConceptMap) -> Option<Vec<Concept>> {
        self.args
            .iter()
            .map(|arg| match arg {
                Arg::Bound(concept) => Some(*concept),
                Arg::Free(slot) => answer.get(&slot_variable(*slot)),
            })
            .collect()
    }

    /// Bindings of `head`'s variables implied by this key, or `None` when no
    /// fact concluded by `head` could ever match the key.
    pub fn unify(&self, head: &Atom) -> Option<ConceptMap> {
        if head.predicate() != &self.predicate || head.arity() != self.arity() {
            return None;
        }
        let mut bindings = ConceptMap::new();
        let mut slot_constants: Vec<Option<Concept>> = vec![None; self.free_slots()];
        for (arg, term) in self.args.iter().zip(head.terms()) {
            match (arg, term) {
                (Arg::Bound(bound), Term::Concept(constant)) => {
                    if bound != constant {
                        return None;
                    }
                }
                (Arg::Bound(bound), Term::Variable(variable)) => {
                    bindings = bindings.with(variable.clone(), *bound)?;
                }
                (Arg::Free(slot), Term::Concept(constant)) => match slot_constants[*slot] {
                    Some(seen) if seen != *constant => return None,
                    _ => slot_constants[*slot] = Some(*constant),
                },
                (Arg::Free(_), Term::Variable(_)) => {}
            }
        }
        Some(bindings)
    }

    /// True when every tuple matching `other` also matches `self`.
    pub fn subsumes(&self, other: &ConcludableKey) -> bool {
        if self.predicate != other.predicate || self.arity() != other.arity() {
            return false;
        }
        let mut first_position: Vec<Option<usize>> = vec![None; self.free_slots()];
        for (position, (mine, theirs)) in self.args.iter().zip(&other.args).enumerate() {
            match mine {
                Arg::Bound(_) if mine != theirs => return false,
                Arg::Bound(_) => {}
                Arg::Free(slot) => match first_position[*slot] {
                    Some(first) if other.args[first] != *theirs => return false,
                    Some(_) => {}
                    None => first_position[*slot] = Some(position),
                },
            }
        }
        true
    }
}

impl fmt::Display for ConcludableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.predicate)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match arg {
                Arg::Bound(concept) => write!(f, "{concept}")?,
                Arg::Free(slot) => write!(f, "_{slot}")?,
            }
        }
        f.write_str(")")
    }
}
