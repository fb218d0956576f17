use std::fmt::{self, Debug};
use std::sync::atomic::Ordering::{Acquire, Release};

use sdd::{AtomicShared, Guard, Ptr, Shared, Tag};

/// [`Entry`] is a node of a bucket chain.
///
/// The key-value pair is immutable and shared among every [`Entry`] created for it when the table
/// is rebuilt; `next` is only ever stored once, when the node stops being the tail of its chain.
pub(crate) struct Entry<K, V> {
    pair: Shared<(K, V)>,
    next: AtomicShared<Entry<K, V>>,
}

impl<K: 'static, V: 'static> Entry<K, V> {
    /// Creates a new tail [`Entry`].
    #[inline]
    pub(crate) fn new(pair: Shared<(K, V)>) -> Shared<Self> {
        Shared::new(Self {
            pair,
            next: AtomicShared::null(),
        })
    }

    /// Creates a new tail [`Entry`] sharing the key-value pair of `self`.
    #[inline]
    pub(crate) fn relocated(&self) -> Shared<Self> {
        Self::new(self.pair.clone())
    }
}

impl<K, V> Entry<K, V> {
    /// Returns a reference to the shared key-value pair.
    #[inline]
    pub(crate) const fn pair(&self) -> &Shared<(K, V)> {
        &self.pair
    }

    /// Returns a reference to the key.
    #[inline]
    pub(crate) fn key(&self) -> &K {
        &self.pair.0
    }

    /// Returns a reference to the value.
    #[inline]
    pub(crate) fn value(&self) -> &V {
        &self.pair.1
    }

    /// Returns the next [`Entry`] in the chain.
    #[inline]
    pub(crate) fn next<'g>(&self, guard: &'g Guard) -> Ptr<'g, Entry<K, V>> {
        self.next.load(Acquire, guard)
    }

    /// Returns a reference to the link to the next [`Entry`].
    #[inline]
    pub(crate) const fn link(&self) -> &AtomicShared<Entry<K, V>> {
        &self.next
    }
}

/// Makes `entry` reachable through `link`.
///
/// `link` must be an empty bucket or the link of a tail [`Entry`], and the caller must exclude
/// other writers.
#[inline]
pub(crate) fn publish<K, V>(link: &AtomicShared<Entry<K, V>>, entry: Shared<Entry<K, V>>) {
    let (prev, _) = link.swap((Some(entry), Tag::None), Release);
    debug_assert!(prev.is_none());
}

impl<K: Debug, V: Debug> Debug for Entry<K, V> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("key", self.key())
            .field("value", self.value())
            .finish_non_exhaustive()
    }
}
