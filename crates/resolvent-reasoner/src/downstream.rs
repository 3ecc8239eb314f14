//! DownstreamManager: the exploration frontier of one request.
//!
//! Holds the downstream requests a resolver may still send for one upstream
//! request, each in one of three states:
//!
//! ```text
//!   Ready ──(Blocked response)──▶ Blocked(cycles) ──(unblock)──▶ Unblocked(cycles)
//!     ▲                                                                  │
//!     └────────────────────────────(next_revisit)────────────────────────┘
//! ```
//!
//! A `Fail` response removes the entry. Ready entries are handed out round
//! robin so that no downstream starves while another keeps producing.

use crate::message::{Cycle, ResolverId, Visit};
use crate::{ReasonerError, Result};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Status {
    Ready,
    Blocked(BTreeSet<Cycle>),
    Unblocked(BTreeSet<Cycle>),
}

#[derive(Debug, Default)]
pub struct DownstreamManager {
    order: Vec<Visit>,
    status: HashMap<Visit, Status>,
    cursor: usize,
}

impl DownstreamManager {
    pub fn new(downstreams: impl IntoIterator<Item = Visit>) -> Result<Self> {
        let mut manager = Self::default();
        for visit in downstreams {
            manager.add(visit)?;
        }
        Ok(manager)
    }

    pub fn add(&mut self, visit: Visit) -> Result<()> {
        if self.status.contains_key(&visit) {
            return Err(ReasonerError::illegal(format!(
                "downstream {} -> {} registered twice",
                visit.sender(),
                visit.receiver()
            )));
        }
        self.status.insert(visit.clone(), Status::Ready);
        self.order.push(visit);
        Ok(())
    }

    pub fn contains(&self, visit: &Visit) -> bool {
        self.status.contains_key(visit)
    }

    pub fn remove(&mut self, visit: &Visit) -> bool {
        if self.status.remove(visit).is_none() {
            return false;
        }
        if let Some(position) = self.order.iter().position(|v| v == visit) {
            self.order.remove(position);
            if position < self.cursor {
                self.cursor -= 1;
            }
        }
        if self.cursor >= self.order.len() {
            self.cursor = 0;
        }
        true
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.status.clear();
        self.cursor = 0;
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn has_next_visit(&self) -> bool {
        self.status.values().any(|status| *status == Status::Ready)
    }

    /// Next ready downstream, round robin.
    pub fn next_visit(&mut self) -> Option<Visit> {
        let len = self.order.len();
        for step in 0..len {
            let position = (self.cursor + step) % len;
            if self.status.get(&self.order[position]) == Some(&Status::Ready) {
                self.cursor = (position + 1) % len;
                return Some(self.order[position].clone());
            }
        }
        None
    }

    pub fn has_next_revisit(&self) -> bool {
        self.status
            .values()
            .any(|status| matches!(status, Status::Unblocked(_)))
    }

    /// Next unblocked downstream with the cycles it was blocked on. The entry
    /// becomes ready again; its response decides what happens next.
    pub fn next_revisit(&mut self) -> Option<(Visit, BTreeSet<Cycle>)> {
        let visit = self
            .order
            .iter()
            .find(|visit| matches!(self.status.get(*visit), Some(Status::Unblocked(_))))?
            .clone();
        match self.status.insert(visit.clone(), Status::Ready) {
            Some(Status::Unblocked(cycles)) => Some((visit, cycles)),
            _ => None,
        }
    }

    /// Record a `Blocked` response. Unknown downstreams are ignored.
    pub fn block(&mut self, visit: &Visit, cycles: BTreeSet<Cycle>) {
        if let Some(status) = self.status.get_mut(visit) {
            *status = Status::Blocked(cycles);
        }
    }

    /// Make revisitable every blocked downstream waiting on a cycle that ends
    /// at one of the ends in `cycles`.
    pub fn unblock(&mut self, cycles: &BTreeSet<Cycle>) {
        let ends: BTreeSet<ResolverId> = cycles.iter().map(Cycle::end).collect();
        for status in self.status.values_mut() {
            if let Status::Blocked(waiting) = status {
                if waiting.iter().any(|cycle| ends.contains(&cycle.end())) {
                    *status = Status::Unblocked(std::mem::take(waiting));
                }
            }
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.status
            .values()
            .any(|status| matches!(status, Status::Blocked(_)))
    }

    /// Union of the cycles every blocked downstream waits on.
    pub fn blocked_cycles(&self) -> BTreeSet<Cycle> {
        self.status
            .values()
            .filter_map(|status| match status {
                Status::Blocked(cycles) => Some(cycles.iter().copied()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answer::Partial;
    use crate::message::TraceId;
    use proptest::prelude::*;
    use resolvent_logic::ConceptMap;

    fn visit(receiver: usize) -> Visit {
        Visit::new(
            ResolverId::new(0),
            ResolverId::new(receiver),
            Partial::root(ConceptMap::new(), BTreeSet::new()),
            Some(receiver),
            TraceId(0),
        )
    }

    fn cycles(pairs: &[(usize, usize)]) -> BTreeSet<Cycle> {
        pairs
            .iter()
            .map(|(end, seen)| Cycle::new(ResolverId::new(*end), *seen))
            .collect()
    }

    #[test]
    fn test_duplicate_registration_is_illegal() {
        let mut manager = DownstreamManager::new([visit(1)]).unwrap();
        assert!(matches!(manager.add(visit(1)), Err(ReasonerError::IllegalState(_))));
    }

    #[test]
    fn test_round_robin_over_ready() {
        let mut manager = DownstreamManager::new([visit(1), visit(2), visit(3)]).unwrap();
        let picks: Vec<_> = (0..6)
            .map(|_| manager.next_visit().unwrap().receiver())
            .collect();
        let expected: Vec<_> = [1, 2, 3, 1, 2, 3].into_iter().map(ResolverId::new).collect();
        assert_eq!(picks, expected);
    }

    #[test]
    fn test_remove_keeps_rotation() {
        let mut manager = DownstreamManager::new([visit(1), visit(2), visit(3)]).unwrap();
        assert_eq!(manager.next_visit(), Some(visit(1)));
        assert_eq!(manager.next_visit(), Some(visit(2)));
        assert!(manager.remove(&visit(1)));
        assert!(!manager.remove(&visit(1)));
        assert_eq!(manager.next_visit(), Some(visit(3)));
        assert_eq!(manager.next_visit(), Some(visit(2)));
    }

    #[test]
    fn test_block_unblock_revisit() {
        let mut manager = DownstreamManager::new([visit(1), visit(2)]).unwrap();
        manager.block(&visit(1), cycles(&[(7, 2)]));
        manager.block(&visit(2), cycles(&[(8, 0)]));
        assert!(!manager.has_next_visit());
        assert!(manager.is_blocked());
        assert_eq!(manager.blocked_cycles(), cycles(&[(7, 2), (8, 0)]));

        manager.unblock(&cycles(&[(7, 5)]));
        assert!(manager.has_next_revisit());
        assert_eq!(manager.next_revisit(), Some((visit(1), cycles(&[(7, 2)]))));
        assert!(!manager.has_next_revisit());
        assert_eq!(manager.next_visit(), Some(visit(1)));
        assert_eq!(manager.blocked_cycles(), cycles(&[(8, 0)]));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            failure_persistence: None,
            .. ProptestConfig::default()
        })]

        /// With every entry ready, any `n` consecutive picks cover all `n`
        /// downstreams, even across removals.
        #[test]
        fn prop_no_ready_downstream_starves(
            count in 1usize..8,
            removals in prop::collection::vec(0usize..8, 0..4),
            warmup in 0usize..10,
        ) {
            let mut manager = DownstreamManager::new((0..count).map(visit)).unwrap();
            for _ in 0..warmup {
                manager.next_visit();
            }
            for receiver in removals {
                manager.remove(&visit(receiver));
            }
            let n = manager.len();
            let window: std::collections::HashSet<_> =
                (0..n).filter_map(|_| manager.next_visit()).collect();
            prop_assert_eq!(window.len(), n);
        }
    }
}
