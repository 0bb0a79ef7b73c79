//! Atomically swappable immutable sequence
//!
//! The current contents live behind a single epoch-managed pointer. Every
//! mutation reads the current vector, builds a replacement and tries to swap
//! it in with compare-and-swap; a lost race retries from a fresh read. Readers
//! never block and never observe a half-built vector.
//!
//! A null head means the sequence is sealed: it holds nothing and refuses all
//! further edits. Sealing is one-way.

use std::sync::atomic::Ordering;

use crossbeam::epoch::{self, Atomic, Owned, Shared};

/// Outcome of an edit step
enum Edit<T, R> {
    /// Leave the sequence untouched and return `R`
    Keep(R),
    /// Swap in the new contents and return `R` once the swap succeeds
    Replace(Vec<T>, R),
}

pub(crate) struct AtomicSeq<T> {
    head: Atomic<Vec<T>>,
}

impl<T: Clone> AtomicSeq<T> {
    pub(crate) fn new() -> Self {
        Self {
            head: Atomic::new(Vec::new()),
        }
    }

    /// Current contents, or `None` once sealed
    pub(crate) fn snapshot(&self) -> Option<Vec<T>> {
        let guard = &epoch::pin();
        let head = self.head.load(Ordering::Acquire, guard);
        // SAFETY: non-null heads are only reclaimed through `defer_destroy`,
        // which waits for every guard pinned before the swap, including ours.
        unsafe { head.as_ref() }.cloned()
    }

    pub(crate) fn len(&self) -> usize {
        let guard = &epoch::pin();
        let head = self.head.load(Ordering::Acquire, guard);
        // SAFETY: see `snapshot`.
        unsafe { head.as_ref() }.map_or(0, Vec::len)
    }

    pub(crate) fn is_sealed(&self) -> bool {
        let guard = &epoch::pin();
        self.head.load(Ordering::Acquire, guard).is_null()
    }

    /// Append `item`. Returns `false` without allocating when sealed.
    pub(crate) fn push(&self, item: T) -> bool {
        self.edit(|items| {
            let mut next = Vec::with_capacity(items.len() + 1);
            next.extend_from_slice(items);
            next.push(item.clone());
            Edit::Replace(next, ())
        })
        .is_some()
    }

    /// Append `item` unless an equal item is already present, then drop from
    /// the front until at most `limit` remain.
    ///
    /// Returns the dropped items, or `None` when sealed or already present.
    pub(crate) fn push_unique(&self, item: T, limit: Option<usize>) -> Option<Vec<T>>
    where
        T: PartialEq,
    {
        self.edit(|items| {
            if items.contains(&item) {
                return Edit::Keep(None);
            }
            let mut next = Vec::with_capacity(items.len() + 1);
            next.extend_from_slice(items);
            next.push(item.clone());
            let overflow = limit.map_or(0, |limit| next.len().saturating_sub(limit));
            let evicted: Vec<T> = next.drain(..overflow).collect();
            Edit::Replace(next, Some(evicted))
        })
        .flatten()
    }

    /// Remove the first item matching `pred`.
    ///
    /// Reports `true` only for the call whose swap actually took the item out;
    /// concurrent removals of the same item cannot both succeed.
    pub(crate) fn remove_first(&self, pred: impl Fn(&T) -> bool) -> bool {
        self.edit(|items| match items.iter().position(&pred) {
            None => Edit::Keep(false),
            Some(position) => {
                let mut next = Vec::with_capacity(items.len() - 1);
                next.extend_from_slice(&items[..position]);
                next.extend_from_slice(&items[position + 1..]);
                Edit::Replace(next, true)
            }
        })
        .unwrap_or(false)
    }

    pub(crate) fn contains(&self, pred: impl Fn(&T) -> bool) -> bool {
        let guard = &epoch::pin();
        let head = self.head.load(Ordering::Acquire, guard);
        // SAFETY: see `snapshot`.
        unsafe { head.as_ref() }.is_some_and(|items| items.iter().any(pred))
    }

    /// Empty the sequence, returning what it held. No-op when sealed.
    pub(crate) fn clear(&self) -> Vec<T> {
        self.edit(|items| {
            if items.is_empty() {
                Edit::Keep(Vec::new())
            } else {
                Edit::Replace(Vec::new(), items.to_vec())
            }
        })
        .unwrap_or_default()
    }

    /// Seal the sequence and hand back its last contents.
    ///
    /// Returns `None` if it was already sealed.
    pub(crate) fn seal(&self) -> Option<Vec<T>> {
        let guard = &epoch::pin();
        let old = self.head.swap(Shared::null(), Ordering::AcqRel, guard);
        // SAFETY: see `snapshot`.
        let items = unsafe { old.as_ref() }.cloned();
        if !old.is_null() {
            // SAFETY: the head was unlinked by the swap above, so no new
            // reader can reach it; existing readers are covered by the epoch.
            unsafe { guard.defer_destroy(old) };
        }
        items
    }

    fn edit<R>(&self, mut step: impl FnMut(&[T]) -> Edit<T, R>) -> Option<R> {
        let guard = &epoch::pin();
        loop {
            let current = self.head.load(Ordering::Acquire, guard);
            // SAFETY: see `snapshot`.
            let items = unsafe { current.as_ref() }?;

            let (next, result) = match step(items) {
                Edit::Keep(result) => return Some(result),
                Edit::Replace(next, result) => (next, result),
            };

            if self
                .head
                .compare_exchange(
                    current,
                    Owned::new(next),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                    guard,
                )
                .is_ok()
            {
                // SAFETY: `current` is unlinked; reclamation waits for readers.
                unsafe { guard.defer_destroy(current) };
                return Some(result);
            }
        }
    }
}

impl<T> Drop for AtomicSeq<T> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` guarantees no concurrent access to the head.
        unsafe {
            let guard = epoch::unprotected();
            let head = self.head.load(Ordering::Relaxed, guard);
            if !head.is_null() {
                drop(head.into_owned());
            }
        }
    }
}
