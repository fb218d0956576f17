//! [`ResizePolicy`] decides how large the table of an [`IdentityMap`](super::IdentityMap) should
//! be.

/// Load metrics of an [`IdentityMap`](super::IdentityMap) handed to a [`ResizePolicy`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ResizeContext {
    /// The current number of buckets.
    pub width: usize,
    /// The length of the longest chain, as last recorded.
    pub max_depth: usize,
    /// The number of entries, as last recorded.
    pub count: usize,
    /// The number of entries about to be inserted.
    pub pending: usize,
}

impl ResizeContext {
    /// Returns the number of entries the table will hold once the pending entries are inserted.
    #[inline]
    #[must_use]
    pub const fn required(&self) -> usize {
        self.count.saturating_add(self.pending)
    }
}

/// Growth strategy of an [`IdentityMap`](super::IdentityMap).
///
/// The requested capacity is rounded up to a power of two, and the table is rebuilt only if the
/// rounded value exceeds the current width; requesting a smaller or equal capacity never shrinks
/// the table.
pub trait ResizePolicy {
    /// Returns the capacity of a freshly created or cleared table.
    fn initial_capacity(&self) -> usize;

    /// Returns the requested total capacity for the given load.
    fn requested_capacity(&self, context: &ResizeContext) -> usize;
}

/// Default [`ResizePolicy`].
///
/// The table grows geometrically by the growth factor once the entries no longer fit in one
/// bucket each.
///
/// # Examples
///
/// ```
/// use idmap::{GrowthPolicy, ResizeContext, ResizePolicy};
///
/// let policy = GrowthPolicy::new(4, 2.0);
/// let context = ResizeContext { width: 4, max_depth: 1, count: 4, pending: 1 };
/// assert_eq!(policy.requested_capacity(&context), 8);
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GrowthPolicy {
    initial_capacity: usize,
    growth_factor: f64,
}

/// [`ResizePolicy`] sizing the table proportionally to the number of entries.
///
/// It requests `(count + pending) * growth_factor` on every insert.
///
/// # Examples
///
/// ```
/// use idmap::{ProportionalPolicy, ResizeContext, ResizePolicy};
///
/// let policy = ProportionalPolicy::new(4, 2.0);
/// let context = ResizeContext { width: 8, max_depth: 1, count: 4, pending: 1 };
/// assert_eq!(policy.requested_capacity(&context), 10);
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProportionalPolicy {
    initial_capacity: usize,
    growth_factor: f64,
}

/// The default initial capacity.
pub const DEFAULT_INITIAL_CAPACITY: usize = 64;

/// The default growth factor.
pub const DEFAULT_GROWTH_FACTOR: f64 = 2.0;

impl GrowthPolicy {
    /// Creates a new [`GrowthPolicy`].
    ///
    /// A growth factor smaller than `1.0`, or `NaN`, is treated as `1.0`.
    #[inline]
    #[must_use]
    pub fn new(initial_capacity: usize, growth_factor: f64) -> Self {
        Self {
            initial_capacity,
            growth_factor: sanitize(growth_factor),
        }
    }

    /// Returns the growth factor.
    #[inline]
    #[must_use]
    pub const fn growth_factor(&self) -> f64 {
        self.growth_factor
    }
}

impl Default for GrowthPolicy {
    #[inline]
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_CAPACITY, DEFAULT_GROWTH_FACTOR)
    }
}

impl ResizePolicy for GrowthPolicy {
    #[inline]
    fn initial_capacity(&self) -> usize {
        self.initial_capacity
    }

    #[inline]
    fn requested_capacity(&self, context: &ResizeContext) -> usize {
        let required = context.required();
        if required <= context.width {
            context.width
        } else {
            scale(context.width, self.growth_factor).max(required)
        }
    }
}

impl ProportionalPolicy {
    /// Creates a new [`ProportionalPolicy`].
    ///
    /// A growth factor smaller than `1.0`, or `NaN`, is treated as `1.0`.
    #[inline]
    #[must_use]
    pub fn new(initial_capacity: usize, growth_factor: f64) -> Self {
        Self {
            initial_capacity,
            growth_factor: sanitize(growth_factor),
        }
    }

    /// Returns the growth factor.
    #[inline]
    #[must_use]
    pub const fn growth_factor(&self) -> f64 {
        self.growth_factor
    }
}

impl Default for ProportionalPolicy {
    #[inline]
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_CAPACITY, DEFAULT_GROWTH_FACTOR)
    }
}

impl ResizePolicy for ProportionalPolicy {
    #[inline]
    fn initial_capacity(&self) -> usize {
        self.initial_capacity
    }

    #[inline]
    fn requested_capacity(&self, context: &ResizeContext) -> usize {
        scale(context.required(), self.growth_factor)
    }
}

impl<P: ResizePolicy + ?Sized> ResizePolicy for Box<P> {
    #[inline]
    fn initial_capacity(&self) -> usize {
        (**self).initial_capacity()
    }

    #[inline]
    fn requested_capacity(&self, context: &ResizeContext) -> usize {
        (**self).requested_capacity(context)
    }
}

#[inline]
fn sanitize(growth_factor: f64) -> f64 {
    growth_factor.max(1.0)
}

/// Multiplies `n` by `factor`, rounding up and saturating at `usize::MAX`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
#[inline]
fn scale(n: usize, factor: f64) -> usize {
    // Float-to-integer casts saturate.
    (n as f64 * factor).ceil() as usize
}
