/*!
 * Read-Copy-Update (RCU) Pattern
 * Zero-contention reads of whole-document snapshots
 */

use arc_swap::ArcSwap;
use std::sync::Arc;

/// RCU-protected snapshot with zero-contention reads
///
/// Readers take an `Arc` to the current snapshot and keep using it even if a
/// writer publishes a replacement meanwhile, so a reader observes either the
/// old or the new value in full, never a mix.
///
/// # Example
///
/// ```ignore
/// let settings = RcuCell::new(RestrictionSettings::default());
///
/// // Read (lock-free)
/// let snapshot = settings.load();
///
/// // Write (clone-modify-swap)
/// settings.update(|current| {
///     let mut next = current.clone();
///     next.enforce_restrictions = false;
///     next
/// });
/// ```
pub struct RcuCell<T> {
    inner: ArcSwap<T>,
}

impl<T> RcuCell<T> {
    /// Create new RCU cell
    #[inline]
    pub fn new(value: T) -> Self {
        Self {
            inner: ArcSwap::from_pointee(value),
        }
    }

    /// Load current snapshot (lock-free)
    #[inline(always)]
    pub fn load(&self) -> Arc<T> {
        self.inner.load_full()
    }

    /// Update value using a function
    ///
    /// The function receives the current value and returns its replacement.
    /// It may be called more than once under writer contention.
    #[inline]
    pub fn update<F>(&self, mut f: F)
    where
        F: FnMut(&T) -> T,
    {
        self.inner.rcu(|old| f(old));
    }

    /// Replace value entirely
    #[inline]
    pub fn store(&self, new_value: T) {
        self.inner.store(Arc::new(new_value));
    }
}
