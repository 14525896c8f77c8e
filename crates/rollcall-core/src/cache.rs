//! In-memory matching cache.
//!
//! The cache holds an immutable [`Snapshot`] behind an `Arc`. A refresh
//! builds a complete new snapshot off to the side and publishes it with a
//! single pointer swap, so readers see either the old or the new snapshot
//! and never wait for the store.

use crate::types::{DescriptorError, Metric, StudentId};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// A descriptor row as read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredDescriptor<D> {
    Present(D),
    /// The student exists but has not enrolled a face.
    Missing,
    /// The stored bytes could not be decoded.
    Corrupt(String),
}

/// Durable source of truth for enrolled descriptors.
pub trait DescriptorStore<D> {
    type Error: std::error::Error + Send + Sync + 'static;

    /// All stored descriptors, in a stable order (ascending student id).
    fn load_all(&self) -> Result<Vec<(StudentId, StoredDescriptor<D>)>, Self::Error>;

    /// Upsert the descriptor for one student.
    fn save(&self, student_id: StudentId, descriptor: &D) -> Result<(), Self::Error>;
}

/// Immutable view of all enrolled descriptors at one instant.
///
/// `ids` and `descriptors` are parallel and of equal length, and no id
/// appears twice. Both hold by construction.
#[derive(Debug)]
pub struct Snapshot<D> {
    ids: Vec<StudentId>,
    descriptors: Vec<D>,
    generation: u64,
}

impl<D> Snapshot<D> {
    pub fn empty() -> Self {
        Self {
            ids: Vec::new(),
            descriptors: Vec::new(),
            generation: 0,
        }
    }

    /// Build a snapshot from already-validated entries, dropping repeated ids.
    pub fn from_entries(entries: Vec<(StudentId, D)>, generation: u64) -> Self {
        let mut seen = HashSet::with_capacity(entries.len());
        let (ids, descriptors) = entries
            .into_iter()
            .filter(|(id, _)| seen.insert(*id))
            .unzip();
        Self {
            ids,
            descriptors,
            generation,
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Monotonic publish counter; 0 means "never refreshed".
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn ids(&self) -> &[StudentId] {
        &self.ids
    }

    pub fn descriptors(&self) -> &[D] {
        &self.descriptors
    }

    pub fn contains(&self, student_id: StudentId) -> bool {
        self.ids.contains(&student_id)
    }

    /// Entries in snapshot order.
    pub fn iter(&self) -> impl Iterator<Item = (StudentId, &D)> {
        self.ids.iter().copied().zip(self.descriptors.iter())
    }
}

impl<D> Default for Snapshot<D> {
    fn default() -> Self {
        Self::empty()
    }
}

/// Why a stored record was left out of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NoDescriptor,
    Corrupt(String),
    Invalid(DescriptorError),
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    pub student_id: StudentId,
    pub reason: SkipReason,
}

/// Summary of one published refresh.
#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    pub generation: u64,
    pub loaded: usize,
    pub skipped: Vec<SkippedRecord>,
}

/// Concurrently readable cache of enrolled descriptors.
pub struct MatchingCache<D> {
    published: RwLock<Arc<Snapshot<D>>>,
    /// Serialises refreshes; never taken by readers.
    refresh_lock: Mutex<()>,
}

impl<D> MatchingCache<D> {
    pub fn new() -> Self {
        Self {
            published: RwLock::new(Arc::new(Snapshot::empty())),
            refresh_lock: Mutex::new(()),
        }
    }

    /// The currently published snapshot (empty before the first refresh).
    pub fn current(&self) -> Arc<Snapshot<D>> {
        let guard = self.published.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    pub fn size(&self) -> usize {
        self.current().len()
    }

    /// Reload every descriptor from `store` and publish a new snapshot.
    ///
    /// Records that are missing, undecodable, rejected by `metric`, or
    /// repeated are skipped and reported; they never fail the refresh.
    /// A store error leaves the previous snapshot published.
    pub fn refresh<S, M>(&self, store: &S, metric: &M) -> Result<RefreshReport, S::Error>
    where
        S: DescriptorStore<D>,
        M: Metric<D>,
    {
        let _serialised = self.refresh_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let rows = store.load_all()?;
        let (entries, skipped) = collect_valid(rows, metric);

        let generation = self.current().generation() + 1;
        let snapshot = Arc::new(Snapshot::from_entries(entries, generation));
        let loaded = snapshot.len();

        *self.published.write().unwrap_or_else(PoisonError::into_inner) = snapshot;

        tracing::info!(generation, loaded, skipped = skipped.len(), "matching cache refreshed");
        Ok(RefreshReport {
            generation,
            loaded,
            skipped,
        })
    }
}

impl<D> Default for MatchingCache<D> {
    fn default() -> Self {
        Self::new()
    }
}

/// Filter store rows down to comparable descriptors, recording why each
/// rejected row was dropped.
fn collect_valid<D, M: Metric<D>>(
    rows: Vec<(StudentId, StoredDescriptor<D>)>,
    metric: &M,
) -> (Vec<(StudentId, D)>, Vec<SkippedRecord>) {
    let mut seen = HashSet::with_capacity(rows.len());
    let mut entries = Vec::with_capacity(rows.len());
    let mut skipped = Vec::new();

    for (student_id, stored) in rows {
        let reason = match stored {
            StoredDescriptor::Missing => SkipReason::NoDescriptor,
            StoredDescriptor::Corrupt(detail) => SkipReason::Corrupt(detail),
            StoredDescriptor::Present(descriptor) => match metric.validate(&descriptor) {
                Err(e) => SkipReason::Invalid(e),
                Ok(()) if !seen.insert(student_id) => SkipReason::Duplicate,
                Ok(()) => {
                    entries.push((student_id, descriptor));
                    continue;
                }
            },
        };

        match &reason {
            SkipReason::NoDescriptor => {
                tracing::debug!(student_id, "skipping student without descriptor");
            }
            other => {
                tracing::warn!(student_id, reason = ?other, "skipping stored descriptor");
            }
        }
        skipped.push(SkippedRecord { student_id, reason });
    }

    (entries, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Embedding, Euclidean};
    use std::sync::atomic::{AtomicBool, Ordering};
    use thiserror::Error;

    #[derive(Error, Debug)]
    #[error("store offline")]
    struct Offline;

    /// Store fake: rows are swapped in by the test.
    struct FakeStore {
        rows: Mutex<Vec<(StudentId, StoredDescriptor<Embedding>)>>,
        offline: AtomicBool,
    }

    impl FakeStore {
        fn with(rows: Vec<(StudentId, StoredDescriptor<Embedding>)>) -> Self {
            Self {
                rows: Mutex::new(rows),
                offline: AtomicBool::new(false),
            }
        }

        fn set(&self, rows: Vec<(StudentId, StoredDescriptor<Embedding>)>) {
            *self.rows.lock().unwrap() = rows;
        }
    }

    impl DescriptorStore<Embedding> for FakeStore {
        type Error = Offline;

        fn load_all(&self) -> Result<Vec<(StudentId, StoredDescriptor<Embedding>)>, Offline> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(Offline);
            }
            Ok(self.rows.lock().unwrap().clone())
        }

        fn save(&self, student_id: StudentId, descriptor: &Embedding) -> Result<(), Offline> {
            let mut rows = self.rows.lock().unwrap();
            rows.retain(|(id, _)| *id != student_id);
            rows.push((student_id, StoredDescriptor::Present(descriptor.clone())));
            Ok(())
        }
    }

    fn present(id: StudentId, values: &[f32]) -> (StudentId, StoredDescriptor<Embedding>) {
        (id, StoredDescriptor::Present(Embedding::new(values.to_vec())))
    }

    const METRIC: Euclidean = Euclidean { dim: 2 };

    #[test]
    fn test_empty_before_first_refresh() {
        let cache: MatchingCache<Embedding> = MatchingCache::new();
        assert_eq!(cache.size(), 0);
        assert_eq!(cache.current().generation(), 0);
    }

    #[test]
    fn test_refresh_skips_bad_records() {
        let store = FakeStore::with(vec![
            present(1, &[0.0, 1.0]),
            (2, StoredDescriptor::Missing),
            present(3, &[0.0, 1.0, 2.0]),
            (4, StoredDescriptor::Corrupt("odd byte length".into())),
            present(5, &[]),
            present(1, &[9.0, 9.0]),
            present(6, &[1.0, 0.0]),
        ]);
        let cache = MatchingCache::new();
        let report = cache.refresh(&store, &METRIC).unwrap();

        assert_eq!(report.loaded, 2);
        assert_eq!(report.generation, 1);
        let reasons: Vec<_> = report.skipped.iter().map(|s| (s.student_id, s.reason.clone())).collect();
        assert_eq!(
            reasons,
            vec![
                (2, SkipReason::NoDescriptor),
                (3, SkipReason::Invalid(DescriptorError::DimensionMismatch { expected: 2, actual: 3 })),
                (4, SkipReason::Corrupt("odd byte length".into())),
                (5, SkipReason::Invalid(DescriptorError::Empty)),
                (1, SkipReason::Duplicate),
            ]
        );

        let snapshot = cache.current();
        assert_eq!(snapshot.ids(), &[1, 6]);
        assert_eq!(snapshot.descriptors()[0].values, vec![0.0, 1.0]);
    }

    #[test]
    fn test_store_failure_keeps_previous_snapshot() {
        let store = FakeStore::with(vec![present(1, &[0.0, 1.0])]);
        let cache = MatchingCache::new();
        cache.refresh(&store, &METRIC).unwrap();

        store.offline.store(true, Ordering::SeqCst);
        assert!(cache.refresh(&store, &METRIC).is_err());
        assert_eq!(cache.size(), 1);
        assert_eq!(cache.current().generation(), 1);
    }

    #[test]
    fn test_reader_keeps_its_snapshot_across_refresh() {
        let store = FakeStore::with(vec![present(1, &[0.0, 1.0])]);
        let cache = MatchingCache::new();
        cache.refresh(&store, &METRIC).unwrap();
        let held = cache.current();

        store.save(2, &Embedding::new(vec![1.0, 1.0])).unwrap();
        cache.refresh(&store, &METRIC).unwrap();

        assert_eq!(held.len(), 1);
        assert_eq!(cache.size(), 2);
        assert_eq!(cache.current().generation(), 2);
    }

    #[test]
    fn test_snapshot_is_never_torn_under_concurrent_refresh() {
        let small: Vec<_> = (0..3).map(|i| present(i, &[i as f32, 0.0])).collect();
        let large: Vec<_> = (0..50).map(|i| present(i, &[i as f32, 1.0])).collect();
        let store = FakeStore::with(small.clone());
        let cache = MatchingCache::new();
        cache.refresh(&store, &METRIC).unwrap();
        let done = AtomicBool::new(false);

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    while !done.load(Ordering::SeqCst) {
                        let snap = cache.current();
                        assert_eq!(snap.ids().len(), snap.descriptors().len());
                        assert!(snap.len() == 3 || snap.len() == 50, "torn size {}", snap.len());
                        // Entries within one snapshot come from one build.
                        let tag = snap.descriptors()[0].values[1];
                        assert!(snap.descriptors().iter().all(|d| d.values[1] == tag));
                    }
                });
            }

            for round in 0..200 {
                store.set(if round % 2 == 0 { large.clone() } else { small.clone() });
                cache.refresh(&store, &METRIC).unwrap();
            }
            done.store(true, Ordering::SeqCst);
        });

        assert_eq!(cache.current().generation(), 201);
    }

    #[test]
    fn test_snapshot_from_entries_drops_repeated_ids() {
        let snap = Snapshot::from_entries(vec![(1, 'a'), (2, 'b'), (1, 'c')], 7);
        assert_eq!(snap.ids(), &[1, 2]);
        assert_eq!(snap.descriptors(), &['a', 'b']);
        assert!(snap.contains(2));
        assert_eq!(snap.generation(), 7);
    }
}
