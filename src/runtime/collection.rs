// src/runtime/collection.rs
//! Append-only collection for assembling per-run datasets in parallel
//!
//! Producers on any thread call [`AppendOnlyCollection::append`]; the owning
//! thread calls [`AppendOnlyCollection::finalize`] once the phase is over and
//! gets back the immutable, fully populated contents.
//!
//! # Layout
//!
//! ```text
//! cursor ──► 0 1 2 3 │ 4 5 6 7 │ 8 9 . .     (segments of fixed size)
//!            ▲ set   │ ▲ set   │ ▲ in flight
//! ```
//!
//! Slots are reserved with a single atomic increment. Segments are added
//! under a short write lock; writers otherwise hold the read lock only for
//! the duration of their slot write. Finalize seals the collection and
//! waits for the in-flight counter to drain to zero, so every reserved slot
//! is written before the contents are handed to readers.

use crate::utils::errors::ClosedCollectionError;
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::warn;

const DEFAULT_SEGMENT_SIZE: usize = 1024;

/// Upper bound on threads used by [`parallel_map`]
pub const MAX_MAP_THREADS: usize = 8;

type Segment<T> = Box<[OnceLock<T>]>;

fn new_segment<T>(size: usize) -> Segment<T> {
    (0..size).map(|_| OnceLock::new()).collect()
}

/// Concurrently appendable, finalize-once collection
pub struct AppendOnlyCollection<T> {
    segments: RwLock<Vec<Segment<T>>>,
    segment_size: usize,

    /// Next index to hand out
    cursor: AtomicUsize,

    /// Appends that passed the sealed check but have not finished writing
    in_flight: AtomicUsize,

    sealed: AtomicBool,
    drained_lock: Mutex<()>,
    drained: Condvar,

    frozen: OnceLock<Arc<[T]>>,
}

impl<T> AppendOnlyCollection<T> {
    pub fn new() -> Self {
        Self::with_segment_size(DEFAULT_SEGMENT_SIZE)
    }

    /// Create with a custom growth granularity
    pub fn with_segment_size(segment_size: usize) -> Self {
        Self {
            segments: RwLock::new(Vec::new()),
            segment_size: segment_size.max(1),
            cursor: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            sealed: AtomicBool::new(false),
            drained_lock: Mutex::new(()),
            drained: Condvar::new(),
            frozen: OnceLock::new(),
        }
    }

    /// Append a value, returning its slot index
    ///
    /// Fails with the value handed back once the collection is finalized.
    pub fn append(&self, value: T) -> Result<usize, ClosedCollectionError<T>> {
        // Announce the write before checking the seal; finalize sets the seal
        // before reading the counter, so one side always sees the other.
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.sealed.load(Ordering::SeqCst) {
            self.finish_write();
            return Err(ClosedCollectionError(value));
        }

        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        let stored = self.write_slot(index, value);
        self.finish_write();

        debug_assert!(stored.is_ok(), "slot {} written twice", index);
        Ok(index)
    }

    /// Seal the collection and return its contents in reservation order
    ///
    /// Blocks until every reserved slot holds its value. Only one caller
    /// performs the drain; concurrent and later callers get the same frozen
    /// contents.
    pub fn finalize(&self) -> Arc<[T]> {
        Arc::clone(self.frozen.get_or_init(|| {
            self.sealed.store(true, Ordering::SeqCst);
            self.wait_for_writers();

            let count = self.cursor.load(Ordering::SeqCst);
            let segments = std::mem::take(&mut *self.segments.write());

            let values: Vec<T> = segments
                .into_iter()
                .flat_map(|segment| segment.into_vec())
                .take(count)
                .filter_map(OnceLock::into_inner)
                .collect();
            debug_assert_eq!(values.len(), count);
            values.into()
        }))
    }

    /// Take ownership of the contents without sharing them
    ///
    /// Owning the collection proves no producer still holds a reference, so
    /// no drain is needed. Clones only if `finalize` already froze a shared
    /// copy.
    pub fn into_vec(self) -> Vec<T>
    where
        T: Clone,
    {
        let Self {
            segments,
            cursor,
            frozen,
            ..
        } = self;
        if let Some(values) = frozen.into_inner() {
            return values.to_vec();
        }

        let count = cursor.into_inner();
        segments
            .into_inner()
            .into_iter()
            .flat_map(|segment| segment.into_vec())
            .take(count)
            .filter_map(OnceLock::into_inner)
            .collect()
    }

    /// Whether `finalize` has sealed the collection
    pub fn is_finalized(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    /// Number of indices reserved so far
    pub fn reserved(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    /// Element count; only meaningful after finalize
    pub fn len(&self) -> usize {
        self.frozen.get().map_or(0, |values| values.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Indexed read from the finalized contents
    ///
    /// Returns `None` before finalize; a collection still being written has
    /// no stable view.
    pub fn get(&self, index: usize) -> Option<&T> {
        self.frozen.get().and_then(|values| values.get(index))
    }

    /// Stream the finalized contents; empty before finalize
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        match self.frozen.get() {
            Some(values) => values.iter(),
            None => [].iter(),
        }
    }

    fn write_slot(&self, index: usize, value: T) -> Result<(), T> {
        let wanted = index / self.segment_size;
        let offset = index % self.segment_size;
        {
            let segments = self.segments.read();
            if let Some(segment) = segments.get(wanted) {
                return segment[offset].set(value);
            }
        }

        let mut segments = self.segments.write();
        while segments.len() <= wanted {
            segments.push(new_segment(self.segment_size));
        }
        segments[wanted][offset].set(value)
    }

    fn finish_write(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 && self.sealed.load(Ordering::SeqCst)
        {
            let _guard = self.drained_lock.lock();
            self.drained.notify_all();
        }
    }

    fn wait_for_writers(&self) {
        let mut guard = self.drained_lock.lock();
        while self.in_flight.load(Ordering::SeqCst) != 0 {
            // timed wait covers a notify racing ahead of this check
            self.drained.wait_for(&mut guard, Duration::from_millis(1));
        }
    }
}

impl<T> Default for AppendOnlyCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Map `items` on scoped threads and return the results in input order
///
/// Each thread maps one contiguous chunk and appends it, tagged with the
/// chunk index, to a shared collection. Once every thread has joined the
/// collection is finalized and the chunks are stitched back together.
pub fn parallel_map<T, R, F>(items: &[T], map: F) -> Vec<R>
where
    T: Sync,
    R: Send + Sync + Clone,
    F: Fn(&T) -> R + Sync,
{
    let threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .clamp(1, MAX_MAP_THREADS);
    let chunk_size = items.len().div_ceil(threads).max(1);
    let chunks = AppendOnlyCollection::with_segment_size(threads);
    let map = &map;

    let scoped = crossbeam::scope(|scope| {
        for (index, chunk) in items.chunks(chunk_size).enumerate() {
            let chunks = &chunks;
            scope.spawn(move |_| {
                let mapped: Vec<R> = chunk.iter().map(map).collect();
                let appended = chunks.append((index, mapped));
                debug_assert!(appended.is_ok());
            });
        }
    });
    if scoped.is_err() {
        warn!("parallel map failed, mapping sequentially");
        return items.iter().map(map).collect();
    }

    let frozen = chunks.finalize();
    let mut ordered: Vec<&(usize, Vec<R>)> = frozen.iter().collect();
    ordered.sort_unstable_by_key(|(index, _)| *index);
    ordered
        .into_iter()
        .flat_map(|(_, mapped)| mapped.iter().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;

    #[test]
    fn test_single_thread_preserves_submission_order() {
        let collection = AppendOnlyCollection::with_segment_size(4);
        for i in 0..10 {
            assert_eq!(collection.append(i).unwrap(), i);
        }

        let values = collection.finalize();
        assert_eq!(&*values, &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(collection.len(), 10);
        assert_eq!(collection.get(3), Some(&3));
        assert_eq!(collection.iter().copied().sum::<usize>(), 45);
    }

    #[test]
    fn test_parallel_map_keeps_input_order() {
        let items: Vec<u64> = (0..10_007).collect();
        let squared = parallel_map(&items, |x| x * x);
        assert_eq!(squared.len(), items.len());
        assert!(squared.iter().zip(&items).all(|(s, x)| *s == x * x));

        assert!(parallel_map(&[] as &[u64], |x| *x).is_empty());
        assert_eq!(parallel_map(&[7u64], |x| x + 1), vec![8]);
    }

    #[test]
    fn test_reads_before_finalize_see_nothing() {
        let collection = AppendOnlyCollection::new();
        collection.append("a").unwrap();
        assert_eq!(collection.get(0), None);
        assert_eq!(collection.iter().count(), 0);
        assert_eq!(collection.reserved(), 1);
    }

    #[test]
    fn test_empty_finalize() {
        let collection: AppendOnlyCollection<u8> = AppendOnlyCollection::new();
        assert!(collection.finalize().is_empty());
        assert!(collection.is_finalized());
    }

    #[test]
    fn test_append_after_finalize_fails() {
        let collection = AppendOnlyCollection::new();
        collection.append(1).unwrap();
        collection.finalize();

        for attempt in 0..3 {
            let err = collection.append(attempt).unwrap_err();
            assert_eq!(err.into_inner(), attempt);
        }
        assert_eq!(collection.len(), 1);
    }

    #[test]
    fn test_append_after_finalize_fails_on_every_thread() {
        let collection = Arc::new(AppendOnlyCollection::<usize>::new());
        collection.finalize();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let c = Arc::clone(&collection);
                thread::spawn(move || c.append(i).is_err())
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let collection = AppendOnlyCollection::new();
        collection.append(7).unwrap();
        let first = collection.finalize();
        let second = collection.finalize();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_into_vec_after_scoped_producers() {
        let collection = AppendOnlyCollection::with_segment_size(8);
        crossbeam::scope(|scope| {
            for t in 0..4 {
                let collection = &collection;
                scope.spawn(move |_| {
                    for i in 0..50 {
                        collection.append(t * 100 + i).unwrap();
                    }
                });
            }
        })
        .unwrap();

        let mut values = collection.into_vec();
        values.sort_unstable();
        assert_eq!(values.len(), 200);
        assert_eq!(values[0], 0);
        assert_eq!(values[199], 349);
    }

    #[test]
    fn test_into_vec_after_finalize_keeps_contents() {
        let collection = AppendOnlyCollection::new();
        collection.append("x").unwrap();
        let frozen = collection.finalize();
        assert_eq!(collection.into_vec(), vec!["x"]);
        assert_eq!(&*frozen, &["x"]);
    }

    #[test]
    fn test_sixteen_threads_thousand_each() {
        let collection = Arc::new(AppendOnlyCollection::with_segment_size(100));

        let handles: Vec<_> = (0..16)
            .map(|t| {
                let c = Arc::clone(&collection);
                thread::spawn(move || {
                    for i in 0..1000 {
                        c.append(t * 1000 + i).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let values = collection.finalize();
        assert_eq!(values.len(), 16_000);

        let mut sorted = values.to_vec();
        sorted.sort_unstable();
        assert!(sorted.iter().enumerate().all(|(i, v)| *v == i));
    }

    #[test]
    fn test_finalize_racing_producers_loses_nothing() {
        let collection = Arc::new(AppendOnlyCollection::with_segment_size(16));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let c = Arc::clone(&collection);
                thread::spawn(move || {
                    let mut accepted = Vec::new();
                    for i in 0..5000u64 {
                        match c.append(t * 10_000 + i) {
                            Ok(_) => accepted.push(t * 10_000 + i),
                            Err(_) => break,
                        }
                    }
                    accepted
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(2));
        let values = collection.finalize();

        let mut accepted: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let mut finalized = values.to_vec();
        accepted.sort_unstable();
        finalized.sort_unstable();
        assert_eq!(accepted, finalized);
    }

    proptest! {
        #[test]
        fn prop_multiset_preserved(threads in 1usize..6, per_thread in 0usize..200, segment in 1usize..64) {
            let collection = Arc::new(AppendOnlyCollection::with_segment_size(segment));

            let handles: Vec<_> = (0..threads)
                .map(|t| {
                    let c = Arc::clone(&collection);
                    thread::spawn(move || {
                        for i in 0..per_thread {
                            c.append((t, i)).unwrap();
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            let mut values = collection.finalize().to_vec();
            prop_assert_eq!(values.len(), threads * per_thread);

            values.sort_unstable();
            let mut expected: Vec<_> = (0..threads)
                .flat_map(|t| (0..per_thread).map(move |i| (t, i)))
                .collect();
            expected.sort_unstable();
            prop_assert_eq!(values, expected);
        }
    }
}
