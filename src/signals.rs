use crate::access::INVALID_READ;
use crate::block::Block;
use crate::error::AccessError;
use crate::layout::BlockLayout;
use crate::utils::{StateCell, StateMarker};
use std::sync::Arc;

/// Step-owned working copy of the model's signals.
#[derive(Debug, Clone)]
pub struct SignalBlock {
    layout: Arc<BlockLayout>,
    block: Block,
}

impl SignalBlock {
    pub fn new(layout: Arc<BlockLayout>) -> Self {
        let block = Block::for_layout(&layout);
        Self { layout, block }
    }

    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    pub fn block(&self) -> &Block {
        &self.block
    }

    #[inline]
    pub fn set_by_index(
        &mut self,
        field: usize,
        index: usize,
        value: f64,
    ) -> Result<(), AccessError> {
        let desc = self
            .layout
            .descriptor(field)
            .ok_or(AccessError::OutOfRange {
                index: field,
                count: self.layout.len(),
            })?;
        self.block.set(desc, index, value)
    }

    #[inline]
    pub fn get_by_index(&self, field: usize, index: usize) -> Result<f64, AccessError> {
        let desc = self
            .layout
            .descriptor(field)
            .ok_or(AccessError::OutOfRange {
                index: field,
                count: self.layout.len(),
            })?;
        self.block.get(desc, index)
    }

    /// Returns false if `name` is unknown or the element is out of range.
    pub fn set(&mut self, name: &str, index: usize, value: f64) -> bool {
        match self.layout.index_of(name) {
            Some(field) => self.set_by_index(field, index, value).is_ok(),
            None => false,
        }
    }

    pub fn get(&self, name: &str, index: usize) -> Option<f64> {
        let field = self.layout.index_of(name)?;
        self.get_by_index(field, index).ok()
    }
}

/// Signal values as of the end of one tick.
#[derive(Debug, Clone, Default)]
pub struct SignalSnapshot {
    pub tick: u64,
    pub timestamp: f64,
    pub block: Block,
}

impl StateMarker for SignalSnapshot {}

/// Read side of the signals for introspection from any thread.
///
/// Reads go to the most recent whole-tick snapshot.
#[derive(Clone)]
pub struct SignalTable {
    layout: Arc<BlockLayout>,
    cell: Arc<StateCell<SignalSnapshot>>,
}

impl SignalTable {
    pub fn new(layout: Arc<BlockLayout>) -> Self {
        let cell = StateCell::new_arc(SignalSnapshot {
            tick: 0,
            timestamp: 0.0,
            block: Block::for_layout(&layout),
        });
        Self { layout, cell }
    }

    pub fn layout(&self) -> &Arc<BlockLayout> {
        &self.layout
    }

    /// Zeroed signal block over this table's layout, for the step side.
    pub fn new_block(&self) -> SignalBlock {
        SignalBlock::new(self.layout.clone())
    }

    pub(crate) fn publish(&self, tick: u64, timestamp: f64, signals: &SignalBlock) {
        self.cell.publish(SignalSnapshot {
            tick,
            timestamp,
            block: signals.block().clone(),
        });
    }

    pub fn snapshot(&self) -> Arc<SignalSnapshot> {
        self.cell.load()
    }

    /// Bumped on every publish.
    pub fn seq(&self) -> u64 {
        self.cell.seq()
    }

    pub fn try_read_by_index(&self, field: usize, index: usize) -> Result<f64, AccessError> {
        let desc = self
            .layout
            .descriptor(field)
            .ok_or(AccessError::OutOfRange {
                index: field,
                count: self.layout.len(),
            })?;
        self.cell.peek().block.get(desc, index)
    }

    /// NaN if the descriptor index or element is invalid.
    pub fn read_by_index(&self, field: usize, index: usize) -> f64 {
        self.try_read_by_index(field, index)
            .unwrap_or(INVALID_READ)
    }

    pub fn read(&self, name: &str, index: usize) -> f64 {
        match self.layout.index_of(name) {
            Some(field) => self.read_by_index(field, index),
            None => INVALID_READ,
        }
    }
}
