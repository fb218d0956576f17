//! [`IdentityMap`] is a read-optimized concurrent map keyed by object identity.

use std::convert::Infallible;
use std::fmt::{self, Debug};
use std::iter::FusedIterator;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use parking_lot::ReentrantMutex;
use sdd::{AtomicShared, Guard, Ptr, Shared, Tag};

use crate::resize_policy::{GrowthPolicy, ResizeContext, ResizePolicy};
use crate::table::entry::Entry;
use crate::table::{capacity_for, Table};
use crate::IdentityKey;

/// Identity-keyed concurrent map.
///
/// [`IdentityMap`] is built for workloads that look values up far more often than they insert
/// them, e.g., caching a factory or an accessor per type or per object: a value is computed once
/// for a key, and then shared by every subsequent reader.
///
/// ## The key characteristics of [`IdentityMap`]
///
/// * Lock-free read: lookups and iteration never acquire locks nor modify shared data.
/// * Serialized write: a single re-entrant lock serializes insertions and clearing.
/// * At most one value per key: insertions double-check the key under the lock.
/// * Pluggable growth: a [`ResizePolicy`] decides when the table is rebuilt and how large it
///   gets.
///
/// Individual entries cannot be removed; [`IdentityMap::clear`] discards all of them at once.
///
/// A table replaced by a resize or by clearing is handed over to the epoch-based garbage
/// collector, and dropped once no reader is able to reach it.
pub struct IdentityMap<K, V, P = GrowthPolicy> {
    table: AtomicShared<Table<K, V>>,
    lock: ReentrantMutex<()>,
    len: AtomicUsize,
    depth: AtomicUsize,
    policy: P,
}

/// An iterator over the entries of an [`IdentityMap`].
///
/// An [`Iter`] walks the table that was current when it was created, and is not affected by later
/// resizes or clearing; entries appended to that table afterwards may or may not be visited.
pub struct Iter<'h, K, V> {
    table: Option<&'h Table<K, V>>,
    index: usize,
    entry_ptr: Ptr<'h, Entry<K, V>>,
    guard: &'h Guard,
}

impl<K, V> IdentityMap<K, V, GrowthPolicy>
where
    K: IdentityKey + 'static,
    V: 'static,
{
    /// Creates an empty [`IdentityMap`] with the default [`GrowthPolicy`].
    ///
    /// # Examples
    ///
    /// ```
    /// use idmap::IdentityMap;
    /// use std::any::TypeId;
    ///
    /// let map: IdentityMap<TypeId, u32> = IdentityMap::new();
    ///
    /// assert_eq!(map.capacity(), 64);
    /// ```
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_policy(GrowthPolicy::default())
    }

    /// Creates an empty [`IdentityMap`] with a [`GrowthPolicy`] of the given initial capacity and
    /// growth factor.
    ///
    /// The initial capacity is rounded up to a power of two.
    ///
    /// # Examples
    ///
    /// ```
    /// use idmap::IdentityMap;
    /// use std::sync::Arc;
    ///
    /// let map: IdentityMap<Arc<str>, u32> = IdentityMap::with_growth(100, 1.5);
    ///
    /// assert_eq!(map.capacity(), 128);
    /// ```
    #[inline]
    #[must_use]
    pub fn with_growth(initial_capacity: usize, growth_factor: f64) -> Self {
        Self::with_policy(GrowthPolicy::new(initial_capacity, growth_factor))
    }
}

impl<K, V, P> IdentityMap<K, V, P>
where
    K: IdentityKey + 'static,
    V: 'static,
    P: ResizePolicy,
{
    /// Creates an empty [`IdentityMap`] with the given [`ResizePolicy`].
    ///
    /// # Examples
    ///
    /// ```
    /// use idmap::{IdentityMap, ProportionalPolicy};
    /// use std::sync::Arc;
    ///
    /// let map: IdentityMap<Arc<str>, u32, _> =
    ///     IdentityMap::with_policy(ProportionalPolicy::new(16, 3.0));
    ///
    /// assert_eq!(map.capacity(), 16);
    /// ```
    #[inline]
    pub fn with_policy(policy: P) -> Self {
        Self {
            table: AtomicShared::new(Table::new(policy.initial_capacity())),
            lock: ReentrantMutex::new(()),
            len: AtomicUsize::new(0),
            depth: AtomicUsize::new(0),
            policy,
        }
    }

    /// Returns a reference to the [`ResizePolicy`].
    #[inline]
    pub const fn policy(&self) -> &P {
        &self.policy
    }

    /// Returns a guarded reference to the value for the specified key without acquiring locks.
    ///
    /// Returns `None` if the key does not exist.
    ///
    /// # Examples
    ///
    /// ```
    /// use idmap::{Guard, IdentityMap};
    /// use std::sync::Arc;
    ///
    /// let map: IdentityMap<Arc<u64>, u32> = IdentityMap::default();
    /// let key = Arc::new(1);
    ///
    /// assert_eq!(map.get_or_insert(key.clone(), 10), 10);
    ///
    /// let guard = Guard::new();
    /// assert_eq!(map.peek(&key, &guard), Some(&10));
    /// assert!(map.peek(&Arc::new(1), &guard).is_none());
    /// ```
    #[inline]
    pub fn peek<'h>(&'h self, key: &K, guard: &'h Guard) -> Option<&'h V> {
        self.table(guard)?.find(key, guard).map(Entry::value)
    }

    /// Peeks a key-value pair without acquiring locks.
    ///
    /// Returns `None` if the key does not exist.
    ///
    /// # Examples
    ///
    /// ```
    /// use idmap::IdentityMap;
    /// use std::any::TypeId;
    ///
    /// let map: IdentityMap<TypeId, usize> = IdentityMap::default();
    ///
    /// assert!(map.peek_with(&TypeId::of::<u8>(), |_, v| *v).is_none());
    /// assert_eq!(map.get_or_insert(TypeId::of::<u8>(), 1), 1);
    /// assert_eq!(map.peek_with(&TypeId::of::<u8>(), |_, v| *v), Some(1));
    /// ```
    #[inline]
    pub fn peek_with<R, F: FnOnce(&K, &V) -> R>(&self, key: &K, reader: F) -> Option<R> {
        let guard = Guard::new();
        self.table(&guard)?
            .find(key, &guard)
            .map(|entry| reader(entry.key(), entry.value()))
    }

    /// Returns a clone of the value for the specified key without acquiring locks.
    ///
    /// # Examples
    ///
    /// ```
    /// use idmap::IdentityMap;
    /// use std::any::TypeId;
    ///
    /// let map: IdentityMap<TypeId, String> = IdentityMap::default();
    ///
    /// assert!(map.get(&TypeId::of::<u8>()).is_none());
    /// map.get_or_insert(TypeId::of::<u8>(), String::from("u8"));
    /// assert_eq!(map.get(&TypeId::of::<u8>()).as_deref(), Some("u8"));
    /// ```
    #[inline]
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.peek_with(key, |_, v| v.clone())
    }

    /// Returns `true` if the [`IdentityMap`] contains a value for the specified key.
    ///
    /// # Examples
    ///
    /// ```
    /// use idmap::IdentityMap;
    /// use std::any::TypeId;
    ///
    /// let map: IdentityMap<TypeId, u32> = IdentityMap::default();
    ///
    /// assert!(!map.contains(&TypeId::of::<u8>()));
    /// map.get_or_insert(TypeId::of::<u8>(), 0);
    /// assert!(map.contains(&TypeId::of::<u8>()));
    /// ```
    #[inline]
    pub fn contains(&self, key: &K) -> bool {
        self.peek_with(key, |_, _| ()).is_some()
    }

    /// Returns the value for the key, inserting the supplied value if the key is absent.
    ///
    /// If the key already exists, the supplied value is dropped and a clone of the stored value is
    /// returned.
    ///
    /// # Examples
    ///
    /// ```
    /// use idmap::IdentityMap;
    /// use std::sync::Arc;
    ///
    /// let map: IdentityMap<Arc<u64>, &str> = IdentityMap::default();
    /// let key = Arc::new(0);
    ///
    /// assert_eq!(map.get_or_insert(key.clone(), "first"), "first");
    /// assert_eq!(map.get_or_insert(key.clone(), "second"), "first");
    /// ```
    #[inline]
    pub fn get_or_insert(&self, key: K, value: V) -> V
    where
        V: Clone,
    {
        self.get_or_insert_pair(key, value).1.clone()
    }

    /// Returns the value for the key, computing it with the factory if the key is absent.
    ///
    /// The factory is invoked while the write lock is held, so a slow factory delays other
    /// insertions but not lookups. It may call back into the same [`IdentityMap`]; if the key got
    /// inserted that way, the value computed by the factory is dropped in favor of the stored
    /// one.
    ///
    /// # Examples
    ///
    /// ```
    /// use idmap::IdentityMap;
    /// use std::any::TypeId;
    ///
    /// let map: IdentityMap<TypeId, usize> = IdentityMap::default();
    ///
    /// let size = map.get_or_insert_with(TypeId::of::<u64>(), |_| std::mem::size_of::<u64>());
    /// assert_eq!(size, 8);
    ///
    /// let size = map.get_or_insert_with(TypeId::of::<u64>(), |_| unreachable!());
    /// assert_eq!(size, 8);
    /// ```
    #[inline]
    pub fn get_or_insert_with<F: FnOnce(&K) -> V>(&self, key: K, factory: F) -> V
    where
        V: Clone,
    {
        match self.get_or_try_insert_pair_with(key, |k| Ok::<V, Infallible>(factory(k))) {
            Ok(pair) => pair.1.clone(),
            Err(never) => match never {},
        }
    }

    /// Returns the value for the key, computing it with a fallible factory if the key is absent.
    ///
    /// If the factory fails, its error is returned and the [`IdentityMap`] is left unchanged.
    ///
    /// # Errors
    ///
    /// Returns the error of the factory.
    ///
    /// # Examples
    ///
    /// ```
    /// use idmap::IdentityMap;
    /// use std::any::TypeId;
    ///
    /// let map: IdentityMap<TypeId, u32> = IdentityMap::default();
    ///
    /// let failed = map.get_or_try_insert_with(TypeId::of::<u8>(), |_| "nope".parse::<u32>());
    /// assert!(failed.is_err());
    /// assert!(!map.contains(&TypeId::of::<u8>()));
    ///
    /// let parsed = map.get_or_try_insert_with(TypeId::of::<u8>(), |_| "17".parse::<u32>());
    /// assert_eq!(parsed, Ok(17));
    /// ```
    #[inline]
    pub fn get_or_try_insert_with<E, F: FnOnce(&K) -> Result<V, E>>(
        &self,
        key: K,
        factory: F,
    ) -> Result<V, E>
    where
        V: Clone,
    {
        self.get_or_try_insert_pair_with(key, factory)
            .map(|pair| pair.1.clone())
    }

    /// Clears the [`IdentityMap`] by replacing the table with an empty one.
    ///
    /// Readers that obtained references or an [`Iter`] before clearing keep seeing the old
    /// entries until they release their [`Guard`].
    ///
    /// # Examples
    ///
    /// ```
    /// use idmap::IdentityMap;
    /// use std::any::TypeId;
    ///
    /// let map: IdentityMap<TypeId, u32> = IdentityMap::default();
    ///
    /// map.get_or_insert(TypeId::of::<u8>(), 0);
    /// map.clear();
    ///
    /// assert!(!map.contains(&TypeId::of::<u8>()));
    /// assert_eq!(map.len(), 0);
    /// ```
    pub fn clear(&self) {
        let _lock = self.lock.lock();
        let table = Shared::new(Table::new(self.policy.initial_capacity()));
        drop(self.table.swap((Some(table), Tag::None), Release));
        self.len.store(0, Relaxed);
        self.depth.store(0, Relaxed);
    }

    /// Returns an [`Iter`] over the current table.
    ///
    /// It requires the user to supply a reference to a [`Guard`].
    ///
    /// # Examples
    ///
    /// ```
    /// use idmap::{Guard, IdentityMap};
    /// use std::any::TypeId;
    ///
    /// let map: IdentityMap<TypeId, u32> = IdentityMap::default();
    ///
    /// map.get_or_insert(TypeId::of::<u8>(), 1);
    ///
    /// let guard = Guard::new();
    ///
    /// let mut iter = map.iter(&guard);
    /// assert_eq!(iter.next(), Some((&TypeId::of::<u8>(), &1)));
    /// assert_eq!(iter.next(), None);
    /// ```
    #[inline]
    pub fn iter<'h>(&'h self, guard: &'h Guard) -> Iter<'h, K, V> {
        Iter {
            table: self.table(guard),
            index: 0,
            entry_ptr: Ptr::null(),
            guard,
        }
    }

    /// Returns the number of entries.
    ///
    /// The value is maintained by insertions, and may lag behind concurrent insertions.
    ///
    /// # Examples
    ///
    /// ```
    /// use idmap::IdentityMap;
    /// use std::any::TypeId;
    ///
    /// let map: IdentityMap<TypeId, u32> = IdentityMap::default();
    ///
    /// map.get_or_insert(TypeId::of::<u8>(), 0);
    /// assert_eq!(map.len(), 1);
    /// ```
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Relaxed)
    }

    /// Returns `true` if the [`IdentityMap`] is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the length of the longest bucket chain.
    ///
    /// The value is maintained by insertions, and may lag behind concurrent insertions.
    #[inline]
    pub fn depth(&self) -> usize {
        self.depth.load(Relaxed)
    }

    /// Returns the number of buckets in the current table.
    ///
    /// # Examples
    ///
    /// ```
    /// use idmap::IdentityMap;
    /// use std::sync::Arc;
    ///
    /// let map: IdentityMap<Arc<u32>, u32> = IdentityMap::with_growth(4, 2.0);
    /// assert_eq!(map.capacity(), 4);
    ///
    /// for i in 0..5 {
    ///     map.get_or_insert(Arc::new(i), i);
    /// }
    /// assert_eq!(map.capacity(), 8);
    /// ```
    #[inline]
    pub fn capacity(&self) -> usize {
        self.table(&Guard::new()).map_or(0, Table::len)
    }

    /// Returns a reference to the current table.
    #[inline]
    fn table<'h>(&self, guard: &'h Guard) -> Option<&'h Table<K, V>> {
        self.table.load(Acquire, guard).as_ref()
    }

    /// Returns the key-value pair for the key without acquiring locks.
    #[inline]
    fn find_pair(&self, key: &K) -> Option<Shared<(K, V)>> {
        let guard = Guard::new();
        self.table(&guard)?
            .find(key, &guard)
            .map(|entry| entry.pair().clone())
    }

    fn get_or_insert_pair(&self, key: K, value: V) -> Shared<(K, V)> {
        if let Some(pair) = self.find_pair(&key) {
            return pair;
        }
        let _lock = self.lock.lock();
        if let Some(pair) = self.find_pair(&key) {
            return pair;
        }
        self.insert_locked(key, value)
    }

    fn get_or_try_insert_pair_with<E, F: FnOnce(&K) -> Result<V, E>>(
        &self,
        key: K,
        factory: F,
    ) -> Result<Shared<(K, V)>, E> {
        if let Some(pair) = self.find_pair(&key) {
            return Ok(pair);
        }
        let _lock = self.lock.lock();
        if let Some(pair) = self.find_pair(&key) {
            return Ok(pair);
        }
        let value = factory(&key)?;

        // The factory may have inserted the key on this thread.
        if let Some(pair) = self.find_pair(&key) {
            return Ok(pair);
        }
        Ok(self.insert_locked(key, value))
    }

    /// Inserts a new entry, and returns its key-value pair.
    ///
    /// The caller must hold the lock, and the key must be absent.
    fn insert_locked(&self, key: K, value: V) -> Shared<(K, V)> {
        let guard = Guard::new();
        let current = self.table(&guard);
        let width = current.map_or(0, Table::len);
        let context = ResizeContext {
            width,
            max_depth: self.depth.load(Relaxed),
            count: self.len.load(Relaxed),
            pending: 1,
        };
        let requested = self.policy.requested_capacity(&context);
        let pair = Shared::new((key, value));

        match current {
            Some(table) if capacity_for(requested) <= width => {
                let depth = table.append(Entry::new(pair.clone()), &guard);
                self.len.fetch_add(1, Relaxed);
                self.depth.fetch_max(depth, Relaxed);
            }
            _ => {
                let requested = if current.is_none() {
                    requested.max(self.policy.initial_capacity())
                } else {
                    requested
                };
                let new_table = Table::new(requested);
                if let Some(old_table) = current {
                    new_table.relocate(old_table, &guard);
                }
                new_table.append(Entry::new(pair.clone()), &guard);
                let (depth, len) = new_table.measure(&guard);

                // Readers see either the old table or the complete new one.
                drop(
                    self.table
                        .swap((Some(Shared::new(new_table)), Tag::None), Release),
                );
                self.len.store(len, Relaxed);
                self.depth.store(depth, Relaxed);
            }
        }
        pair
    }
}

impl<K, V, P> Debug for IdentityMap<K, V, P>
where
    K: Debug + IdentityKey + 'static,
    V: Debug + 'static,
    P: ResizePolicy,
{
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = Guard::new();
        f.debug_map().entries(self.iter(&guard)).finish()
    }
}

impl<K, V, P> Default for IdentityMap<K, V, P>
where
    K: IdentityKey + 'static,
    V: 'static,
    P: ResizePolicy + Default,
{
    /// Creates an empty default [`IdentityMap`].
    ///
    /// # Examples
    ///
    /// ```
    /// use idmap::IdentityMap;
    /// use std::any::TypeId;
    ///
    /// let map: IdentityMap<TypeId, u32> = IdentityMap::default();
    ///
    /// assert!(map.is_empty());
    /// assert_eq!(map.capacity(), 64);
    /// ```
    #[inline]
    fn default() -> Self {
        Self::with_policy(P::default())
    }
}

impl<K, V, P> Extend<(K, V)> for IdentityMap<K, V, P>
where
    K: IdentityKey + 'static,
    V: 'static,
    P: ResizePolicy,
{
    /// Inserts the key-value pairs; values for keys that already exist are dropped.
    #[inline]
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        for (k, v) in iter {
            self.get_or_insert_pair(k, v);
        }
    }
}

impl<K, V, P> FromIterator<(K, V)> for IdentityMap<K, V, P>
where
    K: IdentityKey + 'static,
    V: 'static,
    P: ResizePolicy + Default,
{
    /// Creates an [`IdentityMap`] from the key-value pairs; the first value for each key wins.
    #[inline]
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut map = Self::default();
        map.extend(iter);
        map
    }
}

impl<K, V> Clone for Iter<'_, K, V> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            table: self.table,
            index: self.index,
            entry_ptr: self.entry_ptr,
            guard: self.guard,
        }
    }
}

impl<K, V> Debug for Iter<'_, K, V> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iter")
            .field("current_index", &self.index)
            .field("finished", &self.table.is_none())
            .finish()
    }
}

impl<'h, K, V> Iterator for Iter<'h, K, V> {
    type Item = (&'h K, &'h V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.entry_ptr.as_ref() {
                self.entry_ptr = entry.next(self.guard);
                return Some((entry.key(), entry.value()));
            }
            let table = self.table?;
            if self.index == table.len() {
                self.table = None;
                return None;
            }
            self.entry_ptr = table.head(self.index, self.guard);
            self.index += 1;
        }
    }
}

impl<K, V> FusedIterator for Iter<'_, K, V> {}
