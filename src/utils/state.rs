use arc_swap::ArcSwap;
use crossbeam::utils::CachePadded;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Marker for values published through a [`StateCell`].
pub trait StateMarker: Default + Sync + Send + 'static {}

/// Lock-free single-writer snapshot cell with a sequence counter.
///
/// The writer replaces the whole snapshot; readers on any thread get either
/// the previous or the next snapshot, never a mix. The sequence counter lets
/// readers skip work when nothing was published since they last looked.
///
/// ```ignore
/// let cell = StateCell::new(RuntimeStats::default());
/// let mut seen = cell.seq();
/// cell.publish(RuntimeStats { ticks: 1, ..Default::default() });
/// assert!(cell.changed_since(seen));
/// cell.with_if_changed(&mut seen, |s| assert_eq!(s.ticks, 1));
/// ```
#[derive(Debug)]
pub struct StateCell<S: StateMarker> {
    snap: ArcSwap<S>,
    seq: CachePadded<AtomicU64>,
}

impl<S: StateMarker> StateCell<S> {
    pub fn new(init: S) -> Self {
        Self {
            snap: ArcSwap::from(Arc::new(init)),
            seq: CachePadded::new(AtomicU64::new(1)),
        }
    }

    pub fn new_arc(init: S) -> Arc<Self> {
        Arc::new(Self::new(init))
    }

    pub fn new_default() -> Arc<Self> {
        Arc::new(Self::new(S::default()))
    }

    /// Replace the snapshot. The sequence is bumped after the store so a
    /// reader that observes the new sequence also observes the new snapshot.
    #[inline]
    pub fn publish(&self, next: S) {
        self.snap.store(Arc::new(next));
        self.seq.fetch_add(1, Ordering::Release);
    }

    /// Cheap temporary borrow of the current snapshot. Keep it on the stack
    /// and load once per logical operation.
    #[inline]
    pub fn peek(&self) -> arc_swap::Guard<Arc<S>> {
        self.snap.load()
    }

    /// Owned handle to the current snapshot.
    #[inline]
    pub fn load(&self) -> Arc<S> {
        self.snap.load_full()
    }

    /// Run `f` only if something was published since `last_seq`.
    #[inline]
    pub fn with_if_changed<R>(&self, last_seq: &mut u64, f: impl FnOnce(&S) -> R) -> Option<R> {
        let cur = self.seq.load(Ordering::Acquire);
        if cur == *last_seq {
            return None;
        }
        let g = self.snap.load();
        *last_seq = cur;
        Some(f(&g))
    }

    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq.load(Ordering::Acquire)
    }

    #[inline]
    pub fn changed_since(&self, last: u64) -> bool {
        self.seq() != last
    }
}
