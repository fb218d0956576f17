//! [`Table`] is a fixed-size array of bucket chains.

pub(crate) mod entry;

use std::sync::atomic::Ordering::Acquire;

use sdd::{AtomicShared, Guard, Ptr, Shared};

use crate::IdentityKey;
use entry::{publish, Entry};

/// The largest table width.
pub(crate) const MAXIMUM_CAPACITY: usize = 1_usize << (usize::BITS - 1);

/// Returns the table width for the requested capacity.
///
/// The result is the smallest power of two that is not smaller than `requested`, and `1` if
/// `requested` is `0` or `1`.
#[inline]
pub(crate) fn capacity_for(requested: usize) -> usize {
    requested.min(MAXIMUM_CAPACITY).next_power_of_two()
}

/// [`Table`] is an array of bucket heads, each of which is either empty or points to a chain of
/// [`Entry`] instances.
///
/// An empty bucket holds a null pointer, and a chain ends at a null `next` link; readers therefore
/// walk any bucket with the same loop.
pub(crate) struct Table<K, V> {
    buckets: Box<[AtomicShared<Entry<K, V>>]>,
}

impl<K, V> Table<K, V> {
    /// Creates an empty [`Table`] able to hold `capacity` entries without chaining.
    ///
    /// The number of buckets is `capacity_for(capacity)`.
    pub(crate) fn new(capacity: usize) -> Self {
        let width = capacity_for(capacity);
        Self {
            buckets: (0..width).map(|_| AtomicShared::null()).collect(),
        }
    }

    /// Returns the number of buckets.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Returns the head of the bucket chain at the given position.
    #[inline]
    pub(crate) fn head<'g>(&self, index: usize, guard: &'g Guard) -> Ptr<'g, Entry<K, V>> {
        self.buckets[index].load(Acquire, guard)
    }

    /// Calculates the bucket index for the hash value.
    #[allow(clippy::cast_possible_truncation)] // Intended truncation.
    #[inline]
    pub(crate) fn bucket_index(&self, hash: u64) -> usize {
        (hash as usize) & (self.len() - 1)
    }

    /// Returns the length of the longest chain and the number of entries.
    pub(crate) fn measure(&self, guard: &Guard) -> (usize, usize) {
        let mut max_depth = 0;
        let mut count = 0;
        for index in 0..self.len() {
            let mut depth = 0;
            let mut entry_ptr = self.head(index, guard);
            while let Some(entry) = entry_ptr.as_ref() {
                depth += 1;
                entry_ptr = entry.next(guard);
            }
            max_depth = max_depth.max(depth);
            count += depth;
        }
        (max_depth, count)
    }
}

impl<K: IdentityKey, V> Table<K, V> {
    /// Finds the [`Entry`] for the key.
    #[inline]
    pub(crate) fn find<'g>(&'g self, key: &K, guard: &'g Guard) -> Option<&'g Entry<K, V>> {
        let mut entry_ptr = self.head(self.bucket_index(key.identity_hash()), guard);
        while let Some(entry) = entry_ptr.as_ref() {
            if entry.key().identity_eq(key) {
                return Some(entry);
            }
            entry_ptr = entry.next(guard);
        }
        None
    }
}

impl<K: IdentityKey + 'static, V: 'static> Table<K, V> {
    /// Appends a new tail [`Entry`] to its bucket chain, and returns the length of the chain.
    ///
    /// The caller must exclude other writers; readers may traverse the chain concurrently.
    pub(crate) fn append(&self, entry: Shared<Entry<K, V>>, guard: &Guard) -> usize {
        let index = self.bucket_index(entry.key().identity_hash());
        let mut link = &self.buckets[index];
        let mut depth = 1;
        while let Some(tail) = link.load(Acquire, guard).as_ref() {
            link = tail.link();
            depth += 1;
        }
        publish(link, entry);
        depth
    }

    /// Copies every entry of `old` into `self`.
    ///
    /// `self` receives fresh [`Entry`] instances sharing the key-value pairs, and `old` is left
    /// untouched so that readers traversing it are unaffected.
    pub(crate) fn relocate(&self, old: &Table<K, V>, guard: &Guard) {
        for index in 0..old.len() {
            let mut entry_ptr = old.head(index, guard);
            while let Some(entry) = entry_ptr.as_ref() {
                self.append(entry.relocated(), guard);
                entry_ptr = entry.next(guard);
            }
        }
    }
}
