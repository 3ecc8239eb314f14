use crate::concept::Label;
use crate::error::LogicError;
use crate::pattern::{Atom, Conjunction};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// `then` holds whenever `when` does.
///
/// Rules are range restricted: every variable of the conclusion is bound by
/// the condition, so each condition answer materialises a ground fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Rule {
    name: String,
    when: Conjunction,
    then: Atom,
}

impl Rule {
    pub fn new(name: impl Into<String>, when: Conjunction, then: Atom) -> Result<Self, LogicError> {
        let name = name.into();
        if when.is_empty() {
            return Err(LogicError::EmptyCondition { rule: name });
        }
        let bound = when.variables();
        if let Some(unbound) = then.variables().into_iter().find(|v| !bound.contains(v)) {
            return Err(LogicError::UnsafeRule {
                rule: name,
                variable: unbound.to_string(),
            });
        }
        Ok(Self { name, when, then })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn when(&self) -> &Conjunction {
        &self.when
    }

    pub fn then(&self) -> &Atom {
        &self.then
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} :- {}", self.name, self.then, self.when)
    }
}

/// Reject rule sets in which a predicate depends on its own negation.
///
/// Negated patterns are answered by a separate, complete resolution, so
/// nothing a negation reads may depend on the conclusion of the rule that
/// negates it.
pub fn check_stratified(rules: &[Rule]) -> Result<(), LogicError> {
    let mut depends: HashMap<Label, Vec<Label>> = HashMap::new();
    for rule in rules {
        depends
            .entry(rule.then().predicate().clone())
            .or_default()
            .extend(rule.when().predicates().into_iter().map(|(label, _)| label));
    }
    for rule in rules {
        let head = rule.then().predicate();
        for (predicate, negated) in rule.when().predicates() {
            if negated && reaches(&depends, &predicate, head) {
                return Err(LogicError::UnstratifiedNegation {
                    rule: rule.name().to_string(),
                    predicate: predicate.to_string(),
                });
            }
        }
    }
    Ok(())
}

fn reaches(depends: &HashMap<Label, Vec<Label>>, from: &Label, to: &Label) -> bool {
    let mut seen = HashSet::new();
    let mut stack = vec![from.clone()];
    while let Some(next) = stack.pop() {
        if &next == to {
            return true;
        }
        if !seen.insert(next.clone()) {
            continue;
        }
        if let Some(used) = depends.get(&next) {
            stack.extend(used.iter().cloned());
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::Term;

    #[test]
    fn test_unsafe_rule_is_rejected() {
        let when = Conjunction::new(vec![Atom::new("person", vec![Term::var("x")])]);
        let then = Atom::new("knows", vec![Term::var("x"), Term::var("y")]);
        let err = Rule::new("gossip", when, then).unwrap_err();
        assert!(matches!(err, LogicError::UnsafeRule { ref variable, .. } if variable == "$y"));
    }

    #[test]
    fn test_safe_rule_displays_head_first() {
        let when = Conjunction::new(vec![Atom::new("edge", vec![Term::var("a"), Term::var("b")])]);
        let then = Atom::new("path", vec![Term::var("a"), Term::var("b")]);
        let rule = Rule::new("base", when, then).unwrap();
        assert_eq!(rule.to_string(), "base: path($a, $b) :- edge($a, $b)");
    }

    fn rule(name: &str, then: &str, when: Conjunction) -> Rule {
        Rule::new(name, when, Atom::new(then, vec![Term::var("x")])).unwrap()
    }

    fn unary(predicate: &str) -> Conjunction {
        Conjunction::new(vec![Atom::new(predicate, vec![Term::var("x")])])
    }

    #[test]
    fn test_negation_of_a_lower_stratum_is_accepted() {
        let rules = vec![
            rule("reach", "reached", unary("start")),
            rule("fresh", "unreached", unary("node").with_negation(unary("reached"))),
        ];
        assert!(check_stratified(&rules).is_ok());
    }

    #[test]
    fn test_negation_through_recursion_is_rejected() {
        let rules = vec![
            rule("win", "wins", unary("move").with_negation(unary("loses"))),
            rule("lose", "loses", unary("wins")),
        ];
        let err = check_stratified(&rules).unwrap_err();
        assert!(matches!(
            err,
            LogicError::UnstratifiedNegation { ref rule, ref predicate } if rule == "win" && predicate == "loses"
        ));
    }

    #[test]
    fn test_negated_variables_cannot_reach_the_conclusion() {
        let when = unary("person").with_negation(Conjunction::new(vec![Atom::new(
            "parent",
            vec![Term::var("x"), Term::var("y")],
        )]));
        let then = Atom::new("childless", vec![Term::var("y")]);
        assert!(matches!(
            Rule::new("orphan", when, then),
            Err(LogicError::UnsafeRule { .. })
        ));
    }
}
