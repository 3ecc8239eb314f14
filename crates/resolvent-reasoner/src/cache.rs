//! AnswerCache: deduplicated, append-only answers with replaying readers.
//!
//! A cache is fed two ways: pulled lazily from its traversal source by any
//! reader that runs past the end, and pushed by its owning resolver when a
//! rule concludes something. Readers ([`Poller`]) keep their own cursor, so
//! every reader sees every answer exactly once and in cache order, no matter
//! when it was created.
//!
//! State flags only ever move one way within an iteration:
//!
//! ```text
//!   open ──▶ source exhausted ──▶ complete
//! ```
//!
//! `reset_source` reopens the source for the next iteration unless the cache
//! is complete; completeness is final.

use parking_lot::Mutex;
use resolvent_logic::{AnswerSource, ConceptMap};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

struct CacheState {
    answers: Vec<ConceptMap>,
    index: HashSet<ConceptMap>,
    source: Option<AnswerSource>,
    source_exhausted: bool,
    complete: bool,
}

impl CacheState {
    fn record(&mut self, answer: ConceptMap) -> bool {
        if self.index.contains(&answer) {
            return false;
        }
        self.index.insert(answer.clone());
        self.answers.push(answer);
        true
    }

    fn exhaust_source(&mut self) {
        self.source_exhausted = true;
        self.source = None;
    }
}

/// Shared handle to one cache. Clones share state.
#[derive(Clone)]
pub struct AnswerCache {
    state: Arc<Mutex<CacheState>>,
}

impl AnswerCache {
    pub fn new(source: AnswerSource) -> Self {
        Self::build(Some(source))
    }

    /// A cache fed only by pushes.
    pub fn without_source() -> Self {
        Self::build(None)
    }

    fn build(source: Option<AnswerSource>) -> Self {
        let source_exhausted = source.is_none();
        Self {
            state: Arc::new(Mutex::new(CacheState {
                answers: Vec::new(),
                index: HashSet::new(),
                source,
                source_exhausted,
                complete: false,
            })),
        }
    }

    /// Push an answer. Returns whether it was new; a complete cache accepts
    /// nothing.
    pub fn add(&self, answer: ConceptMap) -> bool {
        let mut state = self.state.lock();
        if state.complete {
            return false;
        }
        state.record(answer)
    }

    /// A reader positioned at the first answer.
    pub fn reader(&self) -> Poller {
        Poller {
            cache: self.clone(),
            cursor: 0,
        }
    }

    /// Declare that no further answers exist. Releases the source.
    pub fn set_complete(&self) {
        let mut state = self.state.lock();
        state.complete = true;
        state.exhaust_source();
    }

    pub fn is_complete(&self) -> bool {
        self.state.lock().complete
    }

    pub fn source_exhausted(&self) -> bool {
        self.state.lock().source_exhausted
    }

    /// Install a fresh source for a new iteration. No-op once complete.
    pub fn reset_source(&self, source: AnswerSource) {
        let mut state = self.state.lock();
        if state.complete {
            return;
        }
        state.source = Some(source);
        state.source_exhausted = false;
    }

    /// Stop pulling from the source without declaring completeness: pushes
    /// are still accepted and a later `reset_source` reopens it. Idempotent.
    pub fn set_source_exhausted(&self) {
        self.state.lock().exhaust_source();
    }

    pub fn len(&self) -> usize {
        self.state.lock().answers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<ConceptMap> {
        self.state.lock().answers.clone()
    }
}

impl fmt::Debug for AnswerCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("AnswerCache")
            .field("answers", &state.answers.len())
            .field("source_exhausted", &state.source_exhausted)
            .field("complete", &state.complete)
            .finish()
    }
}

/// Cursor over one cache.
#[derive(Debug, Clone)]
pub struct Poller {
    cache: AnswerCache,
    cursor: usize,
}

impl Poller {
    /// The next answer this reader has not seen, pulling from the source when
    /// the cache has nothing newer.
    pub fn next_answer(&mut self) -> Option<ConceptMap> {
        let mut state = self.cache.state.lock();
        if let Some(answer) = state.answers.get(self.cursor) {
            self.cursor += 1;
            return Some(answer.clone());
        }
        while !state.source_exhausted {
            let pulled = state.source.as_mut().and_then(|source| source.next());
            match pulled {
                Some(answer) => {
                    if state.record(answer.clone()) {
                        self.cursor = state.answers.len();
                        return Some(answer);
                    }
                }
                None => state.exhaust_source(),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use resolvent_logic::{Concept, Variable};

    fn answer(raw: u32) -> ConceptMap {
        [(Variable::new("x"), Concept::new(raw))].into_iter().collect()
    }

    fn source(raws: Vec<u32>) -> AnswerSource {
        Box::new(raws.into_iter().map(answer))
    }

    fn drain(poller: &mut Poller) -> Vec<ConceptMap> {
        std::iter::from_fn(|| poller.next_answer()).collect()
    }

    #[test]
    fn test_source_duplicates_are_dropped() {
        let cache = AnswerCache::new(source(vec![1, 2, 1]));
        let mut reader = cache.reader();
        assert_eq!(drain(&mut reader), vec![answer(1), answer(2)]);
        assert!(cache.source_exhausted());
        assert!(!cache.is_complete());
    }

    #[test]
    fn test_late_reader_replays_and_sees_pushes() {
        let cache = AnswerCache::new(source(vec![1]));
        let mut early = cache.reader();
        assert_eq!(early.next_answer(), Some(answer(1)));
        assert!(cache.add(answer(2)));
        assert!(!cache.add(answer(2)));

        let mut late = cache.reader();
        assert_eq!(drain(&mut late), vec![answer(1), answer(2)]);
        assert_eq!(drain(&mut early), vec![answer(2)]);
    }

    #[test]
    fn test_completion_is_final() {
        let cache = AnswerCache::new(source(vec![1, 2]));
        cache.set_complete();
        assert!(cache.source_exhausted());
        assert!(!cache.add(answer(3)));
        cache.reset_source(source(vec![4]));
        assert!(cache.source_exhausted());
        assert!(drain(&mut cache.reader()).is_empty());
    }

    #[test]
    fn test_reset_and_exhaust_source() {
        let cache = AnswerCache::new(source(vec![1]));
        let mut reader = cache.reader();
        drain(&mut reader);
        cache.reset_source(source(vec![1, 5]));
        assert!(!cache.source_exhausted());
        assert_eq!(drain(&mut reader), vec![answer(5)]);

        cache.reset_source(source(vec![6]));
        cache.set_source_exhausted();
        cache.set_source_exhausted();
        assert!(drain(&mut reader).is_empty());
        assert!(!cache.is_complete());
    }

    #[test]
    fn test_exhausted_source_is_never_pulled() {
        let pulls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counted = pulls.clone();
        let cache = AnswerCache::new(Box::new((1..4).map(move |raw| {
            counted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            answer(raw)
        })));
        let mut reader = cache.reader();
        assert_eq!(reader.next_answer(), Some(answer(1)));

        cache.set_source_exhausted();
        assert!(cache.source_exhausted());
        assert_eq!(reader.next_answer(), None);
        assert_eq!(pulls.load(std::sync::atomic::Ordering::SeqCst), 1);

        assert!(cache.add(answer(9)));
        assert_eq!(reader.next_answer(), Some(answer(9)));
        assert!(!cache.is_complete());
    }

    #[test]
    fn test_concurrent_readers_see_each_answer_once() {
        let cache = AnswerCache::new(source((0..200).map(|i| i % 150).collect()));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let mut reader = cache.reader();
                std::thread::spawn(move || drain(&mut reader))
            })
            .collect();
        for handle in handles {
            let seen = handle.join().unwrap();
            assert_eq!(seen.len(), 150);
            let distinct: HashSet<_> = seen.iter().collect();
            assert_eq!(distinct.len(), 150);
        }
        assert_eq!(cache.len(), 150);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            failure_persistence: None,
            .. ProptestConfig::default()
        })]

        /// Interleaved pulls and pushes never surface a duplicate to any
        /// reader, and every reader ends with the cache contents in order.
        #[test]
        fn prop_readers_never_see_duplicates(
            pulled in prop::collection::vec(0u32..12, 0..30),
            ops in prop::collection::vec((0usize..3, 0u32..12, any::<bool>()), 0..60),
        ) {
            let cache = AnswerCache::new(source(pulled));
            let mut readers = vec![cache.reader(), cache.reader(), cache.reader()];
            let mut seen: Vec<Vec<ConceptMap>> = vec![Vec::new(); 3];
            for (reader, raw, push) in ops {
                if push {
                    cache.add(answer(raw));
                } else if let Some(next) = readers[reader].next_answer() {
                    prop_assert!(!seen[reader].contains(&next));
                    seen[reader].push(next);
                }
            }
            for (i, reader) in readers.iter_mut().enumerate() {
                seen[i].extend(drain(reader));
            }
            let contents = cache.snapshot();
            for reader_seen in &seen {
                prop_assert_eq!(reader_seen, &contents);
            }
        }
    }
}
