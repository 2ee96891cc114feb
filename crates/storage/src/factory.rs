use crate::block::{BlockId, BlockRef, SampleBlock, SilentBlock};
use crate::error::StorageError;
use basedrop::{Collector, Handle};
use daw_sample::{SampleData, SampleFormat, SampleSummary};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Creates and re-opens sample blocks. One factory is the block arena of a
/// project: every sequence built on it publishes its block-array snapshots
/// through the factory's reclamation handle.
pub trait SampleBlockFactory: Send + Sync {
    fn create(&self, data: SampleData) -> Result<BlockRef, StorageError>;

    fn create_silent(&self, len: usize, format: SampleFormat) -> Result<BlockRef, StorageError>;

    /// Look up a block by id.
    fn fetch(&self, id: BlockId) -> Result<BlockRef, StorageError>;

    /// Handle for deferred reclamation of published snapshots.
    fn handle(&self) -> Handle;

    /// Free snapshots released since the last call.
    fn collect(&self);
}

pub type SampleBlockFactoryPtr = Arc<dyn SampleBlockFactory>;

/// Owns the basedrop collector behind a factory.
///
/// Snapshots dropped on reader threads are queued here instead of being freed
/// in place; [`Reclaimer::collect`] releases them.
pub struct Reclaimer {
    collector: Mutex<Collector>,
    handle: Handle,
}

impl Reclaimer {
    pub fn new() -> Self {
        let collector = Collector::new();
        let handle = collector.handle();
        Self {
            collector: Mutex::new(collector),
            handle,
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    pub fn collect(&self) {
        self.collector.lock().collect();
    }
}

impl Default for Reclaimer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Reclaimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reclaimer").finish_non_exhaustive()
    }
}

/// Weak index of live blocks by id.
///
/// Dead entries are pruned whenever the index doubles in size, so long edit
/// sessions without a [`SampleBlockFactory::collect`] stay bounded by the
/// number of live blocks.
#[derive(Default)]
pub struct BlockRegistry {
    blocks: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    entries: HashMap<BlockId, Weak<dyn SampleBlock>>,
    prune_at: usize,
}

const MIN_PRUNE_AT: usize = 64;

impl BlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, block: BlockRef) -> BlockRef {
        let mut inner = self.blocks.lock();
        if inner.entries.len() >= inner.prune_at.max(MIN_PRUNE_AT) {
            inner.entries.retain(|_, block| block.strong_count() > 0);
            inner.prune_at = inner.entries.len() * 2;
        }
        inner.entries.insert(block.id(), Arc::downgrade(&block));
        block
    }

    pub fn get(&self, id: BlockId) -> Option<BlockRef> {
        self.blocks.lock().entries.get(&id).and_then(Weak::upgrade)
    }

    /// Whether a live block has this id.
    pub fn is_live(&self, id: BlockId) -> bool {
        self.blocks
            .lock()
            .entries
            .get(&id)
            .is_some_and(|block| block.strong_count() > 0)
    }

    pub fn prune(&self) {
        let mut inner = self.blocks.lock();
        inner.entries.retain(|_, block| block.strong_count() > 0);
        inner.prune_at = inner.entries.len() * 2;
    }

    /// Number of entries, dead ones included.
    pub fn len(&self) -> usize {
        self.blocks.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for BlockRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockRegistry").field("len", &self.len()).finish()
    }
}

/// Tracks the number of samples held by live memory blocks.
#[derive(Debug)]
struct Budget {
    capacity: usize,
    used: AtomicUsize,
}

impl Budget {
    fn reserve(&self, len: usize) -> Result<(), StorageError> {
        let before = self.used.fetch_add(len, Ordering::AcqRel);
        if before + len > self.capacity {
            self.used.fetch_sub(len, Ordering::AcqRel);
            return Err(StorageError::Allocation {
                len,
                reason: format!("{} of {} samples in use", before, self.capacity),
            });
        }
        Ok(())
    }
}

struct MemoryBlock {
    id: BlockId,
    data: Arc<SampleData>,
    summary: SampleSummary,
    budget: Option<Arc<Budget>>,
}

impl SampleBlock for MemoryBlock {
    fn id(&self) -> BlockId {
        self.id
    }

    fn sample_count(&self) -> usize {
        self.data.len()
    }

    fn format(&self) -> SampleFormat {
        self.data.format()
    }

    fn summary(&self) -> SampleSummary {
        self.summary
    }

    fn samples(&self) -> anyhow::Result<Arc<SampleData>> {
        Ok(self.data.clone())
    }
}

impl Drop for MemoryBlock {
    fn drop(&mut self) {
        if let Some(budget) = &self.budget {
            budget.used.fetch_sub(self.data.len(), Ordering::AcqRel);
        }
    }
}

/// Block factory keeping all sample data in memory.
///
/// Blocks are indexed weakly: `fetch` succeeds only while some sequence, undo
/// state or clipboard still references the block.
pub struct MemoryBlockFactory {
    next_id: AtomicU64,
    blocks: BlockRegistry,
    budget: Option<Arc<Budget>>,
    reclaimer: Reclaimer,
}

impl MemoryBlockFactory {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            blocks: BlockRegistry::new(),
            budget: None,
            reclaimer: Reclaimer::new(),
        }
    }

    /// A factory refusing to hold more than `capacity` samples at once.
    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            budget: Some(Arc::new(Budget {
                capacity,
                used: AtomicUsize::new(0),
            })),
            ..Self::new()
        }
    }

    pub fn into_ptr(self) -> SampleBlockFactoryPtr {
        Arc::new(self)
    }

    /// Samples held by live blocks, when a capacity limit is set.
    pub fn samples_in_use(&self) -> Option<usize> {
        self.budget.as_ref().map(|b| b.used.load(Ordering::Acquire))
    }

    fn allocate_id(&self) -> BlockId {
        BlockId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn register(&self, block: BlockRef) -> BlockRef {
        self.blocks.register(block)
    }
}

impl Default for MemoryBlockFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleBlockFactory for MemoryBlockFactory {
    fn create(&self, data: SampleData) -> Result<BlockRef, StorageError> {
        if let Some(budget) = &self.budget {
            budget.reserve(data.len())?;
        }
        let block = MemoryBlock {
            id: self.allocate_id(),
            summary: data.summary(),
            data: Arc::new(data),
            budget: self.budget.clone(),
        };
        Ok(self.register(Arc::new(block)))
    }

    fn create_silent(&self, len: usize, format: SampleFormat) -> Result<BlockRef, StorageError> {
        let block = SilentBlock::new(self.allocate_id(), len, format);
        Ok(self.register(Arc::new(block)))
    }

    fn fetch(&self, id: BlockId) -> Result<BlockRef, StorageError> {
        self.blocks.get(id).ok_or(StorageError::UnknownBlock(id))
    }

    fn handle(&self) -> Handle {
        self.reclaimer.handle()
    }

    fn collect(&self) {
        self.reclaimer.collect();
        self.blocks.prune();
    }
}
