//! Fixpoint detection between iterations.
//!
//! When an iteration drains with some resolver blocked, the root asks every
//! resolver whether its answer cache grew since the last round. Any `true`
//! means cycles may have been cut before they could see those answers, so the
//! root starts another iteration; all `false` means a fixpoint.

use crate::message::ResolverId;
use crate::{ReasonerError, Result};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReiterationQuery {
    pub root: ResolverId,
    pub iteration: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReiterationReply {
    pub sender: ResolverId,
    pub reiterate: bool,
}

/// Collects the replies of one round.
#[derive(Debug)]
pub(crate) struct ReiterationRound {
    iteration: u32,
    awaiting: BTreeSet<ResolverId>,
    reiterate: bool,
}

impl ReiterationRound {
    pub(crate) fn new(iteration: u32, participants: impl IntoIterator<Item = ResolverId>) -> Self {
        Self {
            iteration,
            awaiting: participants.into_iter().collect(),
            reiterate: false,
        }
    }

    pub(crate) fn iteration(&self) -> u32 {
        self.iteration
    }

    pub(crate) fn record(&mut self, reply: ReiterationReply) -> Result<()> {
        if !self.awaiting.remove(&reply.sender) {
            return Err(ReasonerError::illegal(format!(
                "unexpected reiteration reply from {}",
                reply.sender
            )));
        }
        self.reiterate |= reply.reiterate;
        Ok(())
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.awaiting.is_empty()
    }

    /// Only meaningful once complete: `false` before then would end the
    /// fixpoint early.
    pub(crate) fn reiterate(&self) -> Option<bool> {
        self.is_complete().then_some(self.reiterate)
    }
}
