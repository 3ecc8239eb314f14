//! Program files.
//!
//! A program is a JSON document holding facts, rules and one query:
//!
//! ```json
//! {
//!   "facts": [{ "predicate": "edge", "args": ["a", "b"] }],
//!   "rules": [{
//!     "name": "path-base",
//!     "when": [{ "predicate": "edge", "args": ["$x", "$y"] }],
//!     "then": { "predicate": "path", "args": ["$x", "$y"] }
//!   }],
//!   "query": [{ "predicate": "path", "args": ["a", "$z"] }]
//! }
//! ```
//!
//! An argument starting with `$` is a variable; anything else names a concept.
//!
//! A rule condition or a query is either a list of atoms or a pattern with
//! nested disjunctions and negations:
//!
//! ```json
//! {
//!   "match": [{ "predicate": "node", "args": ["$x"] }],
//!   "or": [[
//!     [{ "predicate": "edge", "args": ["$x", "$y"] }],
//!     [{ "predicate": "mark", "args": ["$x"] }]
//!   ]],
//!   "not": [[{ "predicate": "hidden", "args": ["$x"] }]]
//! }
//! ```
//!
//! `or` holds disjunctions, each a list of branches.

use anyhow::{bail, Context, Result};
use resolvent_graph::GraphStore;
use resolvent_logic::{check_stratified, Atom, ConceptMap, Conjunction, Disjunction, Fact, Rule, Term};
use resolvent_reasoner::Explanation;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomSpec {
    pub predicate: String,
    pub args: Vec<String>,
}

/// Atoms only, or a pattern with disjunctions and negations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConjunctionSpec {
    Atoms(Vec<AtomSpec>),
    Pattern(PatternSpec),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatternSpec {
    #[serde(rename = "match", default)]
    pub atoms: Vec<AtomSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub or: Vec<Vec<ConjunctionSpec>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not: Vec<ConjunctionSpec>,
}

impl Default for ConjunctionSpec {
    fn default() -> Self {
        ConjunctionSpec::Atoms(Vec::new())
    }
}

impl ConjunctionSpec {
    /// Top-level atoms.
    pub fn atoms(&self) -> &[AtomSpec] {
        match self {
            ConjunctionSpec::Atoms(atoms) => atoms,
            ConjunctionSpec::Pattern(pattern) => &pattern.atoms,
        }
    }

    fn build(&self, store: &GraphStore) -> Result<Conjunction> {
        let mut conjunction = Conjunction::new(self.atoms().iter().map(|atom| atom_of(store, atom)).collect());
        let ConjunctionSpec::Pattern(pattern) = self else {
            return Ok(conjunction);
        };
        for branches in &pattern.or {
            let branches = branches
                .iter()
                .map(|branch| branch.build(store))
                .collect::<Result<Vec<_>>>()?;
            conjunction = conjunction.with_disjunction(Disjunction::new(branches)?);
        }
        for negated in &pattern.not {
            conjunction = conjunction.with_negation(negated.build(store)?);
        }
        Ok(conjunction)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub name: String,
    pub when: ConjunctionSpec,
    pub then: AtomSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    #[serde(default)]
    pub facts: Vec<AtomSpec>,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
    #[serde(default)]
    pub query: ConjunctionSpec,
}

/// A program loaded into a store.
pub struct LoadedProgram {
    pub store: Arc<GraphStore>,
    pub rules: Vec<Rule>,
    pub query: Conjunction,
}

impl Program {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("invalid program JSON")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read program {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("in {}", path.display()))
    }

    /// Intern every concept, store the facts and check the rules, including
    /// that no predicate depends negatively on itself.
    pub fn build(&self) -> Result<LoadedProgram> {
        let store = Arc::new(GraphStore::new());
        for fact in &self.facts {
            if let Some(variable) = fact.args.iter().find(|arg| arg.starts_with('$')) {
                bail!("fact {} uses variable {variable}; facts must be ground", fact.predicate);
            }
            let names: Vec<&str> = fact.args.iter().map(String::as_str).collect();
            store
                .insert_named(&fact.predicate, &names)
                .with_context(|| format!("cannot store fact {}({})", fact.predicate, fact.args.join(", ")))?;
        }

        let mut rules = Vec::with_capacity(self.rules.len());
        for spec in &self.rules {
            let when = spec
                .when
                .build(&store)
                .with_context(|| format!("invalid rule {}", spec.name))?;
            let rule = Rule::new(spec.name.clone(), when, atom_of(&store, &spec.then))
                .with_context(|| format!("invalid rule {}", spec.name))?;
            rules.push(rule);
        }

        check_stratified(&rules).context("rules cannot be stratified")?;

        let query = self.query.build(&store).context("invalid query")?;
        Ok(LoadedProgram { store, rules, query })
    }
}

fn atom_of(store: &GraphStore, spec: &AtomSpec) -> Atom {
    let terms = spec
        .args
        .iter()
        .map(|arg| match arg.strip_prefix('$') {
            Some(variable) => Term::var(variable),
            None => Term::Concept(store.concept(arg)),
        })
        .collect();
    Atom::new(&spec.predicate, terms)
}

/// `{$x=name, ...}` with concepts shown by name.
pub fn render_answer(store: &GraphStore, answer: &ConceptMap) -> String {
    let bindings: Vec<String> = answer
        .iter()
        .map(|(variable, concept)| {
            let name = store.name_of(*concept).unwrap_or_else(|| concept.to_string());
            format!("{variable}={name}")
        })
        .collect();
    format!("{{{}}}", bindings.join(", "))
}

/// `edge(a, b)` with concepts shown by name.
pub fn render_fact(store: &GraphStore, fact: &Fact) -> String {
    let names: Vec<String> = fact
        .tuple()
        .iter()
        .map(|concept| store.name_of(*concept).unwrap_or_else(|| concept.to_string()))
        .collect();
    format!("{}({})", fact.predicate(), names.join(", "))
}

pub fn render_explanation(store: &GraphStore, explanation: &Explanation) -> String {
    let premises: Vec<String> = explanation
        .premises
        .iter()
        .map(|premise| render_fact(store, premise))
        .collect();
    let mut rendered = format!(
        "{} by rule `{}`",
        render_fact(store, &explanation.conclusion),
        explanation.rule
    );
    if !premises.is_empty() {
        rendered.push_str(" from ");
        rendered.push_str(&premises.join(", "));
    }
    rendered
}
