//! Explanations of inferred facts.
//!
//! With [`ReasonerConfig::explain`](crate::ReasonerConfig::explain) set, every
//! rule application that concludes a fact is recorded as an [`Explanation`].
//! Premises are the ground atoms of the rule's condition; premises that are
//! themselves inferred have explanations of their own, so a full derivation
//! is walked one fact at a time.

use resolvent_logic::{ConceptMap, Fact};
use std::fmt;

/// One application of one rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Explanation {
    pub rule: String,
    pub conclusion: Fact,
    /// The condition answer the rule fired on.
    pub condition: ConceptMap,
    /// The condition's atoms under `condition`. Disjunctions and negations
    /// are reflected in `condition` only.
    pub premises: Vec<Fact>,
}

impl fmt::Display for Explanation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} by rule `{}`", self.conclusion, self.rule)?;
        for (i, premise) in self.premises.iter().enumerate() {
            f.write_str(if i == 0 { " from " } else { ", " })?;
            premise.fmt(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resolvent_logic::Concept;

    #[test]
    fn test_display_lists_premises() {
        let explanation = Explanation {
            rule: "step".to_string(),
            conclusion: Fact::new("path", vec![Concept::new(1), Concept::new(3)]),
            condition: ConceptMap::new(),
            premises: vec![
                Fact::new("edge", vec![Concept::new(1), Concept::new(2)]),
                Fact::new("path", vec![Concept::new(2), Concept::new(3)]),
            ],
        };
        assert_eq!(
            explanation.to_string(),
            "path(#1, #3) by rule `step` from edge(#1, #2), path(#2, #3)"
        );
    }
}
