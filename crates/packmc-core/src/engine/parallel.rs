use std::cell::UnsafeCell;

/// Interior-mutable slot shared across the domain-parallel sweep.
///
/// Particle state and neighbour-grid buckets are stored in these slots so
/// that the per-region worker tasks of a cycle can mutate them through a
/// shared `&Packing`. There is no synchronisation here; exclusivity is
/// established externally, either by `&mut` access or by the
/// domain-decomposition protocol: every worker only writes slots belonging to
/// its own active domain, and only reads slots that no other worker may
/// write during the cycle.
#[derive(Debug, Default)]
pub(crate) struct SyncCell<T>(UnsafeCell<T>);

unsafe impl<T: Send> Sync for SyncCell<T> {}

impl<T> SyncCell<T> {
    pub fn new(value: T) -> Self {
        Self(UnsafeCell::new(value))
    }

    /// Raw access; the caller upholds the exclusivity contract above.
    pub fn get(&self) -> *mut T {
        self.0.get()
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.0.get_mut()
    }
}

impl<T: Clone> Clone for SyncCell<T> {
    fn clone(&self) -> Self {
        // Clone requires the same exclusivity as a read.
        Self::new(unsafe { (*self.get()).clone() })
    }
}
