//! Concepts, names and variable bindings.

use serde::{Deserialize, Serialize};
use std::collections::{btree_map, BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Opaque id of a graph object (an interned entity).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Concept(u32);

impl Concept {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Concept {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Predicate name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(Arc<str>);

impl Label {
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named query variable. Displayed with a leading `$`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Variable(Arc<str>);

impl Variable {
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name.trim_start_matches('$')))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.0)
    }
}

// ============================================================================
// ConceptMap
// ============================================================================

/// Immutable assignment of variables to concepts.
///
/// Ordered so that equality, hashing and display are independent of the order
/// in which bindings were made.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConceptMap(BTreeMap<Variable, Concept>);

impl ConceptMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, variable: &Variable) -> Option<Concept> {
        self.0.get(variable).copied()
    }

    pub fn contains(&self, variable: &Variable) -> bool {
        self.0.contains_key(variable)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, Variable, Concept> {
        self.0.iter()
    }

    pub fn variables(&self) -> BTreeSet<Variable> {
        self.0.keys().cloned().collect()
    }

    /// Extend with one binding. `None` if `variable` is already bound to a
    /// different concept.
    pub fn with(&self, variable: Variable, concept: Concept) -> Option<Self> {
        match self.0.get(&variable) {
            Some(existing) if *existing != concept => None,
            Some(_) => Some(self.clone()),
            None => {
                let mut next = self.0.clone();
                next.insert(variable, concept);
                Some(Self(next))
            }
        }
    }

    /// Union of two maps, `None` when they disagree on a shared variable.
    pub fn merge(&self, other: &ConceptMap) -> Option<Self> {
        let mut next = self.0.clone();
        for (variable, concept) in other.iter() {
            match next.get(variable) {
                Some(existing) if existing != concept => return None,
                Some(_) => {}
                None => {
                    next.insert(variable.clone(), *concept);
                }
            }
        }
        Some(Self(next))
    }

    /// Restrict to the given variables.
    pub fn project(&self, variables: &BTreeSet<Variable>) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(variable, _)| variables.contains(*variable))
                .map(|(variable, concept)| (variable.clone(), *concept))
                .collect(),
        )
    }
}

impl FromIterator<(Variable, Concept)> for ConceptMap {
    fn from_iter<I: IntoIterator<Item = (Variable, Concept)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ConceptMap {
    type Item = (&'a Variable, &'a Concept);
    type IntoIter = btree_map::Iter<'a, Variable, Concept>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for ConceptMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (variable, concept)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{variable}={concept}")?;
        }
        f.write_str("}")
    }
}
