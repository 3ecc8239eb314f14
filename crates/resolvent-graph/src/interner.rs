use dashmap::DashMap;
use resolvent_logic::Concept;
use std::sync::atomic::{AtomicU32, Ordering};

/// Name <-> concept interning.
///
/// Ids are dense and allocated in first-seen order, so a concept is known to
/// the graph iff its id is below [`len`](Self::len).
#[derive(Debug)]
pub struct ConceptInterner {
    /// Name to concept mapping
    name_to_concept: DashMap<String, Concept>,
    /// Concept to name mapping (for reverse lookup)
    concept_to_name: DashMap<Concept, String>,
    /// Next available id
    next_id: AtomicU32,
}

impl ConceptInterner {
    pub fn new() -> Self {
        Self {
            name_to_concept: DashMap::new(),
            concept_to_name: DashMap::new(),
            next_id: AtomicU32::new(0),
        }
    }

    /// Intern a name, returning its concept.
    pub fn intern(&self, name: &str) -> Concept {
        if let Some(concept) = self.name_to_concept.get(name) {
            return *concept;
        }

        // The entry guard serialises concurrent first sightings of one name.
        *self
            .name_to_concept
            .entry(name.to_string())
            .or_insert_with(|| {
                let concept = Concept::new(self.next_id.fetch_add(1, Ordering::SeqCst));
                self.concept_to_name.insert(concept, name.to_string());
                concept
            })
    }

    /// Look up an existing concept for a name without inserting.
    pub fn id_of(&self, name: &str) -> Option<Concept> {
        self.name_to_concept.get(name).map(|concept| *concept)
    }

    /// Look up name by concept
    pub fn lookup(&self, concept: Concept) -> Option<String> {
        self.concept_to_name.get(&concept).map(|name| name.clone())
    }

    pub fn contains(&self, concept: Concept) -> bool {
        concept.raw() < self.next_id.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.next_id.load(Ordering::SeqCst) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ConceptInterner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_stable() {
        let interner = ConceptInterner::new();
        let alice = interner.intern("alice");
        let bob = interner.intern("bob");
        assert_ne!(alice, bob);
        assert_eq!(interner.intern("alice"), alice);
        assert_eq!(interner.lookup(bob).as_deref(), Some("bob"));
        assert_eq!(interner.id_of("carol"), None);
        assert!(interner.contains(bob));
        assert!(!interner.contains(Concept::new(2)));
    }

    #[test]
    fn test_concurrent_interning_allocates_once() {
        let interner = std::sync::Arc::new(ConceptInterner::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let interner = interner.clone();
                std::thread::spawn(move || interner.intern("shared"))
            })
            .collect();
        let ids: Vec<Concept> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(interner.len(), 1);
    }
}
