use crate::message::Cycle;
use std::fmt::Debug;

/// Decides whether a blocked cycle closing at a resolver is worth revisiting.
///
/// Called with the cycle as it was reported and the number of answers the
/// resolver at the cycle's end holds now.
pub trait ProgressPredicate: Send + Sync + Debug {
    fn made_progress(&self, cycle: &Cycle, answers: usize) -> bool;
}

/// A cycle has progressed once its end holds more answers than when the
/// cycle was reported.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnswerCountProgress;

impl ProgressPredicate for AnswerCountProgress {
    fn made_progress(&self, cycle: &Cycle, answers: usize) -> bool {
        cycle.seen() < answers
    }
}
