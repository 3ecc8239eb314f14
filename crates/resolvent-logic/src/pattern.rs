//! Atoms, conjunctions and disjunctions.
//!
//! A [`Conjunction`] is resolved in a fixed order: its atoms left to right,
//! then its nested disjunctions, then its negations. By the time a negation
//! is checked every variable it shares with the rest of the conjunction is
//! bound; its other variables are local to it.

use crate::concept::{Concept, ConceptMap, Label, Variable};
use crate::error::LogicError;
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
    Variable(Variable),
    Concept(Concept),
}

impl Term {
    pub fn var(name: &str) -> Self {
        Term::Variable(Variable::new(name))
    }

    /// Concept bound to this term under `bindings`, if any.
    pub fn resolve(&self, bindings: &ConceptMap) -> Option<Concept> {
        match self {
            Term::Variable(variable) => bindings.get(variable),
            Term::Concept(concept) => Some(*concept),
        }
    }
}

impl From<Concept> for Term {
    fn from(concept: Concept) -> Self {
        Term::Concept(concept)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Variable(variable) => variable.fmt(f),
            Term::Concept(concept) => concept.fmt(f),
        }
    }
}

/// `predicate(term, ...)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Atom {
    predicate: Label,
    terms: Vec<Term>,
}

impl Atom {
    pub fn new(predicate: &str, terms: Vec<Term>) -> Self {
        Self {
            predicate: Label::new(predicate),
            terms,
        }
    }

    pub fn predicate(&self) -> &Label {
        &self.predicate
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn arity(&self) -> usize {
        self.terms.len()
    }

    pub fn variables(&self) -> BTreeSet<Variable> {
        self.terms
            .iter()
            .filter_map(|term| match term {
                Term::Variable(variable) => Some(variable.clone()),
                Term::Concept(_) => None,
            })
            .collect()
    }

    /// The fact this atom denotes under `bindings`; `None` while any variable
    /// is unbound.
    pub fn ground(&self, bindings: &ConceptMap) -> Option<Vec<Concept>> {
        self.terms.iter().map(|term| term.resolve(bindings)).collect()
    }

    pub fn fact(&self, bindings: &ConceptMap) -> Option<Fact> {
        Some(Fact {
            predicate: self.predicate.clone(),
            tuple: self.ground(bindings)?,
        })
    }

    /// Replace every bound variable by its concept.
    pub fn substitute(&self, bindings: &ConceptMap) -> Atom {
        let terms = self
            .terms
            .iter()
            .map(|term| match term.resolve(bindings) {
                Some(concept) => Term::Concept(concept),
                None => term.clone(),
            })
            .collect();
        Atom {
            predicate: self.predicate.clone(),
            terms,
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.predicate)?;
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            term.fmt(f)?;
        }
        f.write_str(")")
    }
}

/// A ground atom.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fact {
    predicate: Label,
    tuple: Vec<Concept>,
}

impl Fact {
    pub fn new(predicate: &str, tuple: Vec<Concept>) -> Self {
        Self {
            predicate: Label::new(predicate),
            tuple,
        }
    }

    pub fn predicate(&self) -> &Label {
        &self.predicate
    }

    pub fn tuple(&self) -> &[Concept] {
        &self.tuple
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.predicate)?;
        for (i, concept) in self.tuple.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            concept.fmt(f)?;
        }
        f.write_str(")")
    }
}

// ============================================================================
// Conjunction
// ============================================================================

/// Atoms joined left to right, then nested disjunctions, then negations. The
/// order is the resolution plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Conjunction {
    atoms: Vec<Atom>,
    disjunctions: Vec<Disjunction>,
    negations: Vec<Conjunction>,
}

impl Conjunction {
    pub fn new(atoms: Vec<Atom>) -> Self {
        Self {
            atoms,
            disjunctions: Vec::new(),
            negations: Vec::new(),
        }
    }

    pub fn with_disjunction(mut self, disjunction: Disjunction) -> Self {
        self.disjunctions.push(disjunction);
        self
    }

    /// Require that `negated` has no answer under this conjunction's
    /// bindings.
    pub fn with_negation(mut self, negated: Conjunction) -> Self {
        self.negations.push(negated);
        self
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    pub fn disjunctions(&self) -> &[Disjunction] {
        &self.disjunctions
    }

    pub fn negations(&self) -> &[Conjunction] {
        &self.negations
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty() && self.disjunctions.is_empty() && self.negations.is_empty()
    }

    /// Variables bound by every answer: those of the atoms, plus those bound
    /// by every branch of each disjunction. Variables that only occur under a
    /// negation are never bound.
    pub fn variables(&self) -> BTreeSet<Variable> {
        self.atoms
            .iter()
            .flat_map(Atom::variables)
            .chain(self.disjunctions.iter().flat_map(Disjunction::variables))
            .collect()
    }

    /// Every variable occurring anywhere, negations included.
    pub fn mentioned_variables(&self) -> BTreeSet<Variable> {
        self.atoms
            .iter()
            .flat_map(Atom::variables)
            .chain(self.disjunctions.iter().flat_map(Disjunction::mentioned_variables))
            .chain(self.negations.iter().flat_map(Conjunction::mentioned_variables))
            .collect()
    }

    pub fn substitute(&self, bindings: &ConceptMap) -> Conjunction {
        Conjunction {
            atoms: self.atoms.iter().map(|atom| atom.substitute(bindings)).collect(),
            disjunctions: self
                .disjunctions
                .iter()
                .map(|disjunction| disjunction.substitute(bindings))
                .collect(),
            negations: self
                .negations
                .iter()
                .map(|negated| negated.substitute(bindings))
                .collect(),
        }
    }

    /// Every predicate used, flagged when it occurs under a negation.
    pub fn predicates(&self) -> Vec<(Label, bool)> {
        let mut predicates: Vec<(Label, bool)> = self
            .atoms
            .iter()
            .map(|atom| (atom.predicate().clone(), false))
            .collect();
        for disjunction in &self.disjunctions {
            for branch in disjunction.branches() {
                predicates.extend(branch.predicates());
            }
        }
        for negated in &self.negations {
            predicates.extend(negated.predicates().into_iter().map(|(label, _)| (label, true)));
        }
        predicates
    }
}

impl fmt::Display for Conjunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut separate = |f: &mut fmt::Formatter<'_>| {
            if !std::mem::take(&mut first) {
                f.write_str(", ")?;
            }
            Ok(())
        };
        for atom in &self.atoms {
            separate(f)?;
            atom.fmt(f)?;
        }
        for disjunction in &self.disjunctions {
            separate(f)?;
            disjunction.fmt(f)?;
        }
        for negated in &self.negations {
            separate(f)?;
            write!(f, "not {{{negated}}}")?;
        }
        Ok(())
    }
}

// ============================================================================
// Disjunction
// ============================================================================

/// Alternatives. An answer of any branch is an answer of the disjunction,
/// restricted to the variables every branch binds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Disjunction {
    branches: Vec<Conjunction>,
}

impl Disjunction {
    pub fn new(branches: Vec<Conjunction>) -> Result<Self, LogicError> {
        if branches.is_empty() {
            return Err(LogicError::EmptyDisjunction);
        }
        Ok(Self { branches })
    }

    pub fn branches(&self) -> &[Conjunction] {
        &self.branches
    }

    /// Variables bound by every branch.
    pub fn variables(&self) -> BTreeSet<Variable> {
        let mut branches = self.branches.iter().map(Conjunction::variables);
        let first = branches.next().unwrap_or_default();
        branches.fold(first, |shared, branch| shared.intersection(&branch).cloned().collect())
    }

    pub fn mentioned_variables(&self) -> BTreeSet<Variable> {
        self.branches
            .iter()
            .flat_map(Conjunction::mentioned_variables)
            .collect()
    }

    pub fn substitute(&self, bindings: &ConceptMap) -> Disjunction {
        Disjunction {
            branches: self
                .branches
                .iter()
                .map(|branch| branch.substitute(bindings))
                .collect(),
        }
    }
}

impl fmt::Display for Disjunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, branch) in self.branches.iter().enumerate() {
            if i > 0 {
                f.write_str(" or ")?;
            }
            write!(f, "{{{branch}}}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom(predicate: &str, terms: &[&str]) -> Atom {
        let terms = terms
            .iter()
            .map(|term| match term.parse::<u32>() {
                Ok(raw) => Term::Concept(Concept::new(raw)),
                Err(_) => Term::var(term),
            })
            .collect();
        Atom::new(predicate, terms)
    }

    fn vars(names: &[&str]) -> BTreeSet<Variable> {
        names.iter().map(|name| Variable::new(name)).collect()
    }

    #[test]
    fn test_ground_requires_every_variable() {
        let atom = Atom::new("edge", vec![Term::var("x"), Term::Concept(Concept::new(4))]);
        let partial = ConceptMap::new();
        assert_eq!(atom.ground(&partial), None);

        let bound = partial.with(Variable::new("x"), Concept::new(1)).unwrap();
        assert_eq!(atom.ground(&bound), Some(vec![Concept::new(1), Concept::new(4)]));
        assert_eq!(atom.to_string(), "edge($x, #4)");
        assert_eq!(atom.fact(&bound).unwrap().to_string(), "edge(#1, #4)");
    }

    #[test]
    fn test_negated_variables_are_not_bound() {
        let conjunction = Conjunction::new(vec![atom("person", &["x"])])
            .with_negation(Conjunction::new(vec![atom("parent", &["x", "c"])]));
        assert_eq!(conjunction.variables(), vars(&["x"]));
        assert_eq!(conjunction.mentioned_variables(), vars(&["x", "c"]));
        assert_eq!(conjunction.to_string(), "person($x), not {parent($x, $c)}");
    }

    #[test]
    fn test_disjunction_binds_the_shared_variables() {
        let disjunction = Disjunction::new(vec![
            Conjunction::new(vec![atom("cat", &["x"]), atom("owner", &["x", "o"])]),
            Conjunction::new(vec![atom("dog", &["x"])]),
        ])
        .unwrap();
        assert_eq!(disjunction.variables(), vars(&["x"]));
        assert_eq!(disjunction.mentioned_variables(), vars(&["x", "o"]));
        assert_eq!(disjunction.to_string(), "{cat($x), owner($x, $o)} or {dog($x)}");

        let conjunction = Conjunction::default().with_disjunction(disjunction);
        assert!(!conjunction.is_empty());
        assert_eq!(conjunction.variables(), vars(&["x"]));
    }

    #[test]
    fn test_empty_disjunction_is_rejected() {
        assert!(matches!(Disjunction::new(Vec::new()), Err(LogicError::EmptyDisjunction)));
    }

    #[test]
    fn test_substitute_reaches_nested_patterns() {
        let conjunction = Conjunction::new(vec![atom("p", &["x", "y"])])
            .with_negation(Conjunction::new(vec![atom("q", &["x"])]));
        let bindings: ConceptMap = [(Variable::new("x"), Concept::new(7))].into_iter().collect();
        assert_eq!(
            conjunction.substitute(&bindings).to_string(),
            "p(#7, $y), not {q(#7)}"
        );
    }

    #[test]
    fn test_predicates_flag_negated_occurrences() {
        let conjunction = Conjunction::new(vec![atom("p", &["x"])])
            .with_disjunction(
                Disjunction::new(vec![Conjunction::new(vec![atom("q", &["x"])])
                    .with_negation(Conjunction::new(vec![atom("r", &["x"])]))])
                .unwrap(),
            )
            .with_negation(Conjunction::new(vec![atom("s", &["x"])]));
        let flagged: Vec<(String, bool)> = conjunction
            .predicates()
            .into_iter()
            .map(|(label, negated)| (label.to_string(), negated))
            .collect();
        assert_eq!(
            flagged,
            vec![
                ("p".to_string(), false),
                ("q".to_string(), false),
                ("r".to_string(), true),
                ("s".to_string(), true),
            ]
        );
    }
}
