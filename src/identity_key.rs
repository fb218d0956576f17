//! [`IdentityKey`] defines how keys of an [`IdentityMap`](super::IdentityMap) are compared.

use std::any::TypeId;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::ptr;
use std::rc::Rc;
use std::sync::Arc;

use sdd::Shared;

/// Keys compared by identity rather than by value.
///
/// Two keys are the same key if and only if they denote the same object; structurally equal but
/// distinct objects are different keys. Implementations must guarantee that `identity_eq`
/// returning `true` implies equal `identity_hash` values.
///
/// # Examples
///
/// ```
/// use idmap::IdentityKey;
/// use std::sync::Arc;
///
/// let a = Arc::new(String::from("key"));
/// let b = Arc::new(String::from("key"));
///
/// assert!(a.identity_eq(&a.clone()));
/// assert!(!a.identity_eq(&b));
/// assert_eq!(a.identity_hash(), a.clone().identity_hash());
/// ```
pub trait IdentityKey {
    /// Returns the hash value derived from the identity of `self`.
    fn identity_hash(&self) -> u64;

    /// Returns `true` if `self` and `other` are the same identity.
    fn identity_eq(&self, other: &Self) -> bool;
}

/// Spreads the address bits so that the lowest bits are usable as a bucket index.
///
/// Addresses are aligned, therefore their lowest bits are mostly zero.
#[inline]
fn address_hash<T: ?Sized>(ptr: *const T) -> u64 {
    let h = (ptr.cast::<()>() as usize as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    h ^ (h >> 32)
}

impl<T: ?Sized> IdentityKey for Arc<T> {
    #[inline]
    fn identity_hash(&self) -> u64 {
        address_hash(Arc::as_ptr(self))
    }

    #[inline]
    fn identity_eq(&self, other: &Self) -> bool {
        ptr::eq(Arc::as_ptr(self).cast::<()>(), Arc::as_ptr(other).cast::<()>())
    }
}

impl<T: ?Sized> IdentityKey for Rc<T> {
    #[inline]
    fn identity_hash(&self) -> u64 {
        address_hash(Rc::as_ptr(self))
    }

    #[inline]
    fn identity_eq(&self, other: &Self) -> bool {
        ptr::eq(Rc::as_ptr(self).cast::<()>(), Rc::as_ptr(other).cast::<()>())
    }
}

impl<T: ?Sized> IdentityKey for &T {
    #[inline]
    fn identity_hash(&self) -> u64 {
        address_hash(*self)
    }

    #[inline]
    fn identity_eq(&self, other: &Self) -> bool {
        ptr::eq((*self as *const T).cast::<()>(), (*other as *const T).cast::<()>())
    }
}

impl<T> IdentityKey for Shared<T> {
    #[inline]
    fn identity_hash(&self) -> u64 {
        address_hash(self.as_ptr())
    }

    #[inline]
    fn identity_eq(&self, other: &Self) -> bool {
        ptr::eq(self.as_ptr(), other.as_ptr())
    }
}

impl IdentityKey for TypeId {
    #[inline]
    fn identity_hash(&self) -> u64 {
        let mut h = DefaultHasher::new();
        self.hash(&mut h);
        h.finish()
    }

    #[inline]
    fn identity_eq(&self, other: &Self) -> bool {
        self == other
    }
}
