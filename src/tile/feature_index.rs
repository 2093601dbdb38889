//! Deduplicating ownership cache for map features.
//!
//! Several tiles of one coverage pass usually share features that cross tile
//! borders. To avoid reading such a feature once per tile, the index tracks
//! which features are currently being read by some tile task. A task acquires
//! ownership of the features it is going to read and every other task skips
//! them, copying the result through the shared geometry path instead.

use std::collections::HashSet;

use parking_lot::Mutex;

/// Identity of one source data segment (a map region file).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentId(pub u32);

/// Identity of one map feature within a data segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeatureId {
    /// The segment the feature belongs to.
    pub segment: SegmentId,
    /// Index of the feature within the segment.
    pub index: u32,
}

impl FeatureId {
    /// Creates a feature id.
    pub fn new(segment: SegmentId, index: u32) -> Self {
        Self { segment, index }
    }

    /// Stable 64-bit key of the feature, used as the overlay handle id.
    pub fn as_u64(&self) -> u64 {
        ((self.segment.0 as u64) << 32) | self.index as u64
    }
}

/// The only intentionally globally-shared mutable structure of the pipeline.
///
/// Invariant: at most one in-flight tile task owns any given feature at any
/// instant. All mutations go through a single short-held mutex; no other lock
/// is ever taken while it is held.
#[derive(Default)]
pub struct MemoryFeatureIndex {
    owned: Mutex<HashSet<FeatureId, ahash::RandomState>>,
}

impl MemoryFeatureIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filters `candidates` down to the subset this caller newly acquired
    /// ownership of. Features already owned by another in-flight task are
    /// omitted; the caller must skip reading them.
    ///
    /// The returned features stay owned until [`Self::remove_features`] is
    /// called with them, which the owning task must do on every exit path.
    pub fn read_features_request(&self, candidates: &[FeatureId]) -> Vec<FeatureId> {
        let mut owned = self.owned.lock();
        candidates
            .iter()
            .filter(|id| owned.insert(**id))
            .copied()
            .collect()
    }

    /// Releases ownership of the given features.
    pub fn remove_features(&self, features: &[FeatureId]) {
        let mut owned = self.owned.lock();
        for id in features {
            if !owned.remove(id) {
                log::error!("releasing feature {id:?} that was not owned");
            }
        }
    }

    /// Number of features currently owned by in-flight tasks.
    pub fn owned_count(&self) -> usize {
        self.owned.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ids(range: std::ops::Range<u32>) -> Vec<FeatureId> {
        range.map(|i| FeatureId::new(SegmentId(1), i)).collect()
    }

    #[test]
    fn second_request_gets_only_unowned_features() {
        let index = MemoryFeatureIndex::new();

        let first = index.read_features_request(&ids(0..10));
        assert_eq!(first.len(), 10);

        let second = index.read_features_request(&ids(5..15));
        assert_eq!(second, ids(10..15));

        index.remove_features(&first);
        let third = index.read_features_request(&ids(0..10));
        assert_eq!(third, ids(0..10));
    }

    #[test]
    fn ownership_is_exclusive_under_concurrency() {
        const TASKS: usize = 8;
        const FEATURES: u32 = 500;

        let index = Arc::new(MemoryFeatureIndex::new());
        let all = ids(0..FEATURES);

        let handles: Vec<_> = (0..TASKS)
            .map(|task| {
                let index = index.clone();
                let mut candidates = all.clone();
                // Each task requests the same feature set in a different order.
                candidates.rotate_left(task * 31 % FEATURES as usize);
                std::thread::spawn(move || index.read_features_request(&candidates))
            })
            .collect();

        let owned_sets: Vec<Vec<FeatureId>> = handles
            .into_iter()
            .map(|h| h.join().expect("worker panicked"))
            .collect();

        // Union of all acquired sets covers every feature exactly once.
        let mut seen = HashSet::new();
        for set in &owned_sets {
            for id in set {
                assert!(seen.insert(*id), "feature {id:?} acquired by two tasks");
            }
        }
        assert_eq!(seen.len(), FEATURES as usize);
        assert_eq!(index.owned_count(), FEATURES as usize);

        for set in &owned_sets {
            index.remove_features(set);
        }
        assert_eq!(index.owned_count(), 0);
    }
}
