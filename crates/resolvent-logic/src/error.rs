use crate::concept::Label;

#[derive(Debug, thiserror::Error)]
pub enum LogicError {
    #[error("rule `{rule}` concludes {variable}, which its condition never binds")]
    UnsafeRule { rule: String, variable: String },
    #[error("rule `{rule}` has an empty condition")]
    EmptyCondition { rule: String },
    #[error("a disjunction needs at least one branch")]
    EmptyDisjunction,
    #[error("rule `{rule}` negates `{predicate}`, which depends on the rule's own conclusion")]
    UnstratifiedNegation { rule: String, predicate: String },
}

/// Failures reported by the storage collaborators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("graph store is closed")]
    Closed,
    #[error("predicate `{predicate}` has arity {expected}, got {found}")]
    ArityMismatch {
        predicate: Label,
        expected: usize,
        found: usize,
    },
}
