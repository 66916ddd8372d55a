//! Double-buffered parameter exchange.
//!
//! Two blocks and one selector. The selector names the active side, which
//! the step function reads; the other side is the staging side, which the
//! host fills and then publishes by flipping the selector.
//!
//! Readers pin the side they read with a per-side reader count. A reader
//! that pinned a side keeps it until its guard is dropped, even across a
//! publish, and the host does not reuse that side for staging until the
//! count drops to zero. Readers never wait. `stage` may wait for a
//! straggling reader; `try_stage` never does and is what the tick thread
//! uses.

use crate::block::Block;
use crate::error::AccessError;
use crate::layout::BlockLayout;
use anyhow::{Context, anyhow};
use crossbeam::utils::{Backoff, CachePadded};
use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;
use std::cell::UnsafeCell;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

struct Side {
    block: UnsafeCell<Block>,
    /// Generation this side was last published at.
    generation: AtomicU64,
    readers: CachePadded<AtomicUsize>,
}

impl Side {
    fn new(block: Block) -> Self {
        Self {
            block: UnsafeCell::new(block),
            generation: AtomicU64::new(0),
            readers: CachePadded::new(AtomicUsize::new(0)),
        }
    }
}

struct StoreInner {
    layout: Arc<BlockLayout>,
    defaults: Block,
    sides: [Side; 2],
    active: CachePadded<AtomicUsize>,
    seq: CachePadded<AtomicU64>,
    writer: Mutex<()>,
}

// SAFETY: a side's block is only mutated through `StagedParams`, which is
// created while holding `writer`, for the non-active side, after that side's
// reader count was observed at zero. Readers only pin the side the selector
// names and re-check the selector after pinning, so no shared reference to
// a block coexists with the exclusive one.
unsafe impl Sync for StoreInner {}

/// Two-sided parameter store with an atomic active-side selector.
///
/// Cloning gives another handle to the same store.
#[derive(Clone)]
pub struct ParameterStore {
    inner: Arc<StoreInner>,
}

impl ParameterStore {
    /// Both sides start as copies of `defaults`, side 0 active.
    pub fn new(layout: Arc<BlockLayout>, defaults: Block) -> Result<Self, AccessError> {
        if defaults.len() != layout.size() {
            return Err(AccessError::layout(format!(
                "default parameter block is {} bytes, layout declares {}",
                defaults.len(),
                layout.size()
            )));
        }

        Ok(Self {
            inner: Arc::new(StoreInner {
                sides: [Side::new(defaults.clone()), Side::new(defaults.clone())],
                layout,
                defaults,
                active: CachePadded::new(AtomicUsize::new(0)),
                seq: CachePadded::new(AtomicU64::new(0)),
                writer: Mutex::new(()),
            }),
        })
    }

    #[inline]
    pub fn layout(&self) -> &Arc<BlockLayout> {
        &self.inner.layout
    }

    pub fn defaults(&self) -> &Block {
        &self.inner.defaults
    }

    /// Index (0 or 1) of the side readers currently see.
    #[inline]
    pub fn active_side(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Number of publishes so far.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.inner.seq.load(Ordering::Acquire)
    }

    #[inline]
    pub fn changed_since(&self, last: u64) -> bool {
        self.generation() != last
    }

    /// Pin and return the active side. Never blocks; retries only if a
    /// publish lands between reading the selector and pinning the side.
    #[inline]
    pub fn read_active(&self) -> ActiveParams<'_> {
        let inner = &*self.inner;
        loop {
            let side = inner.active.load(Ordering::SeqCst);
            inner.sides[side].readers.fetch_add(1, Ordering::SeqCst);
            if inner.active.load(Ordering::SeqCst) == side {
                return ActiveParams { inner, side };
            }
            inner.sides[side].readers.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Claim the staging side, seeded with a copy of the active side.
    ///
    /// Host writers serialize here. Dropping the returned guard without
    /// publishing discards the staged set; there is no queue, the latest
    /// publish wins.
    ///
    /// Waits until no reader is pinned on the staging side. An
    /// [`ActiveParams`] held by the calling thread from before the last
    /// publish pins that side, so calling `stage` while holding one never
    /// returns. Use [`try_stage`](Self::try_stage) where waiting is not
    /// acceptable.
    pub fn stage(&self) -> StagedParams<'_> {
        let inner = &*self.inner;
        let writer = inner.writer.lock();
        let staging = inner.active.load(Ordering::SeqCst) ^ 1;

        // a reader may still be finishing a tick on the previously active side
        let backoff = Backoff::new();
        while inner.sides[staging].readers.load(Ordering::SeqCst) != 0 {
            backoff.snooze();
        }
        self.claim(writer, staging)
    }

    /// Like [`stage`](Self::stage) but never waits. `None` if another
    /// writer holds the store or a reader is still pinned on the staging
    /// side.
    pub fn try_stage(&self) -> Option<StagedParams<'_>> {
        let inner = &*self.inner;
        let writer = inner.writer.try_lock()?;
        let staging = inner.active.load(Ordering::SeqCst) ^ 1;
        if inner.sides[staging].readers.load(Ordering::SeqCst) != 0 {
            return None;
        }
        Some(self.claim(writer, staging))
    }

    fn claim<'a>(&'a self, writer: MutexGuard<'a, ()>, staging: usize) -> StagedParams<'a> {
        let inner = &*self.inner;
        let active = staging ^ 1;
        // SAFETY: writer lock held, staging side is not active and unpinned;
        // see the `Sync` impl on `StoreInner`. The active side is only read.
        unsafe {
            let src = &*inner.sides[active].block.get();
            (*inner.sides[staging].block.get()).clone_from(src);
        }
        // SAFETY: `UnsafeCell::get` never returns null.
        let block = unsafe { NonNull::new_unchecked(inner.sides[staging].block.get()) };

        StagedParams {
            inner,
            side: staging,
            block,
            _writer: writer,
        }
    }

    /// Stage, apply `f`, publish if `f` succeeds.
    pub fn update<R>(
        &self,
        f: impl FnOnce(&mut StagedParams<'_>) -> Result<R, AccessError>,
    ) -> Result<(R, u64), AccessError> {
        let mut staged = self.stage();
        let out = f(&mut staged)?;
        Ok((out, staged.publish()))
    }

    /// Apply `{ "name": number | [numbers] }` as one atomic update.
    ///
    /// Names resolve by full descriptor name or relative to the layout
    /// prefix. Any bad entry aborts the update and nothing is published.
    pub fn apply_json(&self, update: &Value) -> anyhow::Result<u64> {
        let entries = json_entries(update)?;
        Self::apply_entries(self.stage(), entries)
    }

    /// Non-waiting [`apply_json`](Self::apply_json). `Ok(None)` if the
    /// store is busy and nothing was applied; the caller may retry later.
    pub fn try_apply_json(&self, update: &Value) -> anyhow::Result<Option<u64>> {
        let entries = json_entries(update)?;
        match self.try_stage() {
            Some(staged) => Self::apply_entries(staged, entries).map(Some),
            None => Ok(None),
        }
    }

    fn apply_entries(
        mut staged: StagedParams<'_>,
        entries: &serde_json::Map<String, Value>,
    ) -> anyhow::Result<u64> {
        for (name, value) in entries {
            staged
                .set_json(name, value)
                .with_context(|| format!("invalid value for parameter {name}"))?;
        }
        let generation = staged.publish();
        tracing::info!(
            "[ParameterStore] applied {} parameter(s), generation {}",
            entries.len(),
            generation
        );
        Ok(generation)
    }

    /// Publish the default block as a new parameter set.
    pub fn reset_to_defaults(&self) -> u64 {
        let mut staged = self.stage();
        staged.block_mut().clone_from(&self.inner.defaults);
        staged.publish()
    }

    /// Leave side 0 active holding the defaults.
    ///
    /// A store that never published already is in that state and is left
    /// alone. Otherwise uses ordinary publishes (one or two) so concurrent
    /// readers only ever see complete sets.
    pub(crate) fn reseed(&self) -> u64 {
        if self.generation() == 0 {
            return 0;
        }
        let mut generation = self.reset_to_defaults();
        if self.active_side() != 0 {
            generation = self.reset_to_defaults();
        }
        debug_assert_eq!(self.active_side(), 0);
        generation
    }
}

fn json_entries(update: &Value) -> anyhow::Result<&serde_json::Map<String, Value>> {
    update
        .as_object()
        .ok_or_else(|| anyhow!("parameter update must be a JSON object"))
}

impl std::fmt::Debug for ParameterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterStore")
            .field("size", &self.inner.layout.size())
            .field("active", &self.active_side())
            .field("generation", &self.generation())
            .finish()
    }
}

/// Read-only view of the active parameter set, pinned until dropped.
pub struct ActiveParams<'a> {
    inner: &'a StoreInner,
    side: usize,
}

impl<'a> ActiveParams<'a> {
    #[inline(always)]
    pub fn side(&self) -> usize {
        self.side
    }

    /// Generation at which this side was published (0 = initial defaults).
    #[inline]
    pub fn generation(&self) -> u64 {
        self.inner.sides[self.side].generation.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn layout(&self) -> &'a BlockLayout {
        let inner: &'a StoreInner = self.inner;
        &inner.layout
    }

    #[inline(always)]
    pub fn block(&self) -> &Block {
        // SAFETY: pinned side; no exclusive reference exists while pinned.
        unsafe { &*self.inner.sides[self.side].block.get() }
    }

    /// Element `index` of the field at descriptor position `field`.
    #[inline]
    pub fn get_by_index(&self, field: usize, index: usize) -> Result<f64, AccessError> {
        let desc = self
            .layout()
            .descriptor(field)
            .ok_or(AccessError::OutOfRange {
                index: field,
                count: self.layout().len(),
            })?;
        self.block().get(desc, index)
    }

    pub fn get(&self, name: &str, index: usize) -> Option<f64> {
        let desc = self.layout().field(name)?;
        self.block().get(desc, index).ok()
    }
}

impl Deref for ActiveParams<'_> {
    type Target = Block;

    fn deref(&self) -> &Block {
        self.block()
    }
}

impl Drop for ActiveParams<'_> {
    #[inline]
    fn drop(&mut self) {
        self.inner.sides[self.side]
            .readers
            .fetch_sub(1, Ordering::SeqCst);
    }
}

/// Exclusive view of the staging side. Publish to make it active.
///
/// Holds the side as a pointer; a `&mut Block` exists only for the
/// duration of an accessor call, never across `publish`.
pub struct StagedParams<'a> {
    inner: &'a StoreInner,
    side: usize,
    block: NonNull<Block>,
    _writer: MutexGuard<'a, ()>,
}

impl<'a> StagedParams<'a> {
    #[inline]
    pub fn side(&self) -> usize {
        self.side
    }

    pub fn layout(&self) -> &'a BlockLayout {
        let inner: &'a StoreInner = self.inner;
        &inner.layout
    }

    pub fn block(&self) -> &Block {
        // SAFETY: staging side, claimed under the writer lock we hold.
        unsafe { self.block.as_ref() }
    }

    pub fn block_mut(&mut self) -> &mut Block {
        // SAFETY: as for `block`; the borrow is tied to `&mut self`, which
        // `publish` consumes.
        unsafe { self.block.as_mut() }
    }

    /// Replace the whole staged set.
    pub fn copy_from(&mut self, src: &Block) -> Result<(), AccessError> {
        self.block_mut().copy_from(src)
    }

    pub fn set_by_index(
        &mut self,
        field: usize,
        index: usize,
        value: f64,
    ) -> Result<(), AccessError> {
        let layout = self.layout();
        let desc = layout.descriptor(field).ok_or(AccessError::OutOfRange {
            index: field,
            count: layout.len(),
        })?;
        self.block_mut().set(desc, index, value)
    }

    pub fn set(&mut self, name: &str, index: usize, value: f64) -> anyhow::Result<()> {
        let desc = self
            .layout()
            .field(name)
            .ok_or_else(|| anyhow!("unknown parameter {name}"))?;
        self.block_mut().set(desc, index, value)?;
        Ok(())
    }

    pub fn get(&self, name: &str, index: usize) -> Option<f64> {
        let desc = self.layout().field(name)?;
        self.block().get(desc, index).ok()
    }

    fn set_json(&mut self, name: &str, value: &Value) -> anyhow::Result<()> {
        let desc = self
            .layout()
            .field(name)
            .ok_or_else(|| anyhow!("unknown parameter"))?;

        match value {
            Value::Number(n) => {
                let v = n.as_f64().ok_or_else(|| anyhow!("number out of range"))?;
                if desc.count() != 1 {
                    return Err(anyhow!(
                        "scalar given for field of {} elements",
                        desc.count()
                    ));
                }
                self.block_mut().set(desc, 0, v)?;
            }
            Value::Array(items) => {
                let values = items
                    .iter()
                    .map(|item| item.as_f64().ok_or_else(|| anyhow!("non-numeric element")))
                    .collect::<anyhow::Result<Vec<f64>>>()?;
                self.block_mut().set_all(desc, &values)?;
            }
            _ => return Err(anyhow!("expected a number or an array of numbers")),
        }
        Ok(())
    }

    /// Flip the selector to this side. Returns the new generation.
    pub fn publish(self) -> u64 {
        let generation = self.inner.seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.sides[self.side]
            .generation
            .store(generation, Ordering::Release);
        self.inner.active.store(self.side, Ordering::SeqCst);
        tracing::debug!(
            "[ParameterStore] published side {} at generation {}",
            self.side,
            generation
        );
        generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{Dims, FieldDescriptor, TypeTag};
    use serde_json::json;

    fn store() -> ParameterStore {
        let layout = BlockLayout::from_descriptors(
            vec![
                FieldDescriptor::new("n", 0, TypeTag::Int32, Dims::SCALAR),
                FieldDescriptor::new("v", 8, TypeTag::Float64, Dims::vector(4)),
            ],
            40,
        )
        .unwrap();
        let mut defaults = Block::for_layout(&layout);
        defaults.set(layout.field("n").unwrap(), 0, 1.0).unwrap();
        ParameterStore::new(Arc::new(layout), defaults).unwrap()
    }

    #[test]
    fn defaults_must_fit_layout() {
        let layout = Arc::new(BlockLayout::default());
        assert!(ParameterStore::new(layout, Block::zeroed(8)).is_err());
    }

    #[test]
    fn staged_changes_invisible_until_publish() {
        let store = store();
        let mut staged = store.stage();
        staged.set("n", 0, 99.0).unwrap();
        assert_eq!(staged.get("n", 0), Some(99.0));
        assert_eq!(store.read_active().get("n", 0), Some(1.0));

        let generation = staged.publish();
        assert_eq!(generation, 1);
        let active = store.read_active();
        assert_eq!(active.get("n", 0), Some(99.0));
        assert_eq!(active.generation(), 1);
        assert_eq!(active.side(), 1);
    }

    #[test]
    fn stage_seeds_from_active() {
        let store = store();
        store
            .update(|s| s.set_by_index(1, 3, 2.5))
            .unwrap();
        let staged = store.stage();
        assert_eq!(staged.get("v", 3), Some(2.5));
        assert_eq!(staged.get("n", 0), Some(1.0));
    }

    #[test]
    fn dropped_stage_is_discarded() {
        let store = store();
        {
            let mut staged = store.stage();
            staged.set("n", 0, 5.0).unwrap();
        }
        assert_eq!(store.generation(), 0);
        assert_eq!(store.read_active().get("n", 0), Some(1.0));

        let mut staged = store.stage();
        assert_eq!(staged.get("n", 0), Some(1.0));
        staged.set("n", 0, 6.0).unwrap();
        staged.publish();
        assert_eq!(store.read_active().get("n", 0), Some(6.0));
    }

    #[test]
    fn reader_keeps_its_side_across_publish() {
        let store = store();
        let before = store.read_active();
        store.update(|s| s.set_by_index(0, 0, 42.0)).unwrap();
        assert_eq!(before.get("n", 0), Some(1.0));
        assert_eq!(store.read_active().get("n", 0), Some(42.0));
        drop(before);
        // old side is reusable once released
        store.update(|s| s.set_by_index(0, 0, 43.0)).unwrap();
        assert_eq!(store.read_active().get("n", 0), Some(43.0));
    }

    #[test]
    fn try_stage_never_waits() {
        let store = store();
        let stale = store.read_active();
        store.update(|s| s.set_by_index(0, 0, 2.0)).unwrap();

        // the side `stale` pinned is now the staging side
        assert!(store.try_stage().is_none());
        assert_eq!(store.try_apply_json(&json!({"n": 3})).unwrap(), None);
        assert!(store.try_apply_json(&json!({"nope": 3})).is_err());
        assert_eq!(store.generation(), 1);

        drop(stale);
        let held = store.try_stage().unwrap();
        // a second writer backs off instead of queueing on the lock
        assert!(store.try_stage().is_none());
        drop(held);

        assert_eq!(store.try_apply_json(&json!({"n": 3})).unwrap(), Some(2));
        assert_eq!(store.read_active().get("n", 0), Some(3.0));
    }

    #[test]
    fn changed_since_tracks_publishes() {
        let store = store();
        let seen = store.generation();
        assert!(!store.changed_since(seen));
        store.stage();
        assert!(!store.changed_since(seen));
        store.update(|s| s.set_by_index(0, 0, 4.0)).unwrap();
        assert!(store.changed_since(seen));
        assert!(!store.changed_since(store.generation()));
    }

    #[test]
    fn apply_json_is_all_or_nothing() {
        let store = store();
        let generation = store
            .apply_json(&json!({"n": 3, "v": [1.0, 2.0, 3.0, 4.0]}))
            .unwrap();
        assert_eq!(generation, 1);
        let active = store.read_active();
        assert_eq!(active.get("n", 0), Some(3.0));
        assert_eq!(active.get("v", 3), Some(4.0));
        drop(active);

        assert!(store.apply_json(&json!({"n": 7, "v": [1.0]})).is_err());
        assert!(store.apply_json(&json!({"missing": 1})).is_err());
        assert!(store.apply_json(&json!([1, 2])).is_err());
        assert_eq!(store.generation(), 1);
        assert_eq!(store.read_active().get("n", 0), Some(3.0));
    }

    #[test]
    fn reseed_restores_defaults_on_side_zero() {
        let store = store();
        assert_eq!(store.reseed(), 0);
        store.update(|s| s.set_by_index(0, 0, 9.0)).unwrap();
        assert_eq!(store.active_side(), 1);
        store.reseed();
        assert_eq!(store.active_side(), 0);
        assert_eq!(store.read_active().get("n", 0), Some(1.0));
        let staged = store.stage();
        assert_eq!(staged.get("n", 0), Some(1.0));
    }
}
