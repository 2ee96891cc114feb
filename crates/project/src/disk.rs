use anyhow::Context;
use daw_sample::{SampleData, SampleFormat, SampleSummary};
use daw_storage::{
    BlockId, BlockRef, BlockRegistry, Handle, Reclaimer, SampleBlock, SampleBlockFactory, SampleBlockFactoryPtr,
    SilentBlock, StorageError,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

const BLOCK_EXTENSION: &str = "blk";

#[derive(Serialize, Deserialize)]
struct BlockFile {
    summary: SampleSummary,
    data: SampleData,
}

fn read_block_file(path: &Path) -> anyhow::Result<BlockFile> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    rmp_serde::decode::from_slice(&bytes).with_context(|| format!("decoding {}", path.display()))
}

fn block_id_from_path(path: &Path) -> Option<BlockId> {
    if path.extension()? != BLOCK_EXTENSION {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    u64::from_str_radix(stem, 16).ok().map(BlockId)
}

/// A block whose samples live in a file. Samples are loaded on demand and
/// shared while some reader still holds them.
struct DiskBlock {
    id: BlockId,
    path: PathBuf,
    len: usize,
    format: SampleFormat,
    summary: SampleSummary,
    cache: Mutex<Weak<SampleData>>,
}

impl SampleBlock for DiskBlock {
    fn id(&self) -> BlockId {
        self.id
    }

    fn sample_count(&self) -> usize {
        self.len
    }

    fn format(&self) -> SampleFormat {
        self.format
    }

    fn summary(&self) -> SampleSummary {
        self.summary
    }

    fn samples(&self) -> anyhow::Result<Arc<SampleData>> {
        let mut cache = self.cache.lock();
        if let Some(data) = cache.upgrade() {
            return Ok(data);
        }
        let file = read_block_file(&self.path)?;
        anyhow::ensure!(
            file.data.len() == self.len,
            "block file {} holds {} samples, expected {}",
            self.path.display(),
            file.data.len(),
            self.len
        );
        let data = Arc::new(file.data);
        *cache = Arc::downgrade(&data);
        Ok(data)
    }
}

/// Block factory writing each block to its own file in a directory.
///
/// Block files outlive the factory, so a project saved with block ids can be
/// reopened in a later session by opening the same directory.
pub struct DiskBlockFactory {
    dir: PathBuf,
    next_id: AtomicU64,
    blocks: BlockRegistry,
    reclaimer: Reclaimer,
}

impl DiskBlockFactory {
    /// Open (creating if needed) a block directory. New ids continue after
    /// the highest id already on disk.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut max_id = 0;
        for entry in fs::read_dir(&dir)? {
            if let Some(id) = block_id_from_path(&entry?.path()) {
                max_id = max_id.max(id.0);
            }
        }
        log::debug!("opened block directory {} (last id {max_id})", dir.display());

        Ok(Self {
            dir,
            next_id: AtomicU64::new(max_id + 1),
            blocks: BlockRegistry::new(),
            reclaimer: Reclaimer::new(),
        })
    }

    pub fn into_ptr(self) -> SampleBlockFactoryPtr {
        Arc::new(self)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn block_path(&self, id: BlockId) -> PathBuf {
        self.dir.join(format!("{id}.{BLOCK_EXTENSION}"))
    }

    /// Delete block files that are neither in `keep` nor referenced by a live
    /// block. Returns the number of files removed.
    pub fn remove_unused(&self, keep: &HashSet<BlockId>) -> io::Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(id) = block_id_from_path(&path) else {
                continue;
            };
            if !self.blocks.is_live(id) && !keep.contains(&id) {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        if removed > 0 {
            log::info!("removed {removed} unused block files from {}", self.dir.display());
        }
        Ok(removed)
    }

    fn allocate_id(&self) -> BlockId {
        BlockId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn register(&self, block: BlockRef) -> BlockRef {
        self.blocks.register(block)
    }
}

impl SampleBlockFactory for DiskBlockFactory {
    fn create(&self, data: SampleData) -> Result<BlockRef, StorageError> {
        let id = self.allocate_id();
        let path = self.block_path(id);
        let len = data.len();
        let file = BlockFile {
            summary: data.summary(),
            data,
        };

        let bytes = rmp_serde::encode::to_vec(&file).map_err(|e| StorageError::Allocation {
            len,
            reason: e.to_string(),
        })?;
        fs::write(&path, bytes).map_err(|e| StorageError::Allocation {
            len,
            reason: format!("writing {}: {e}", path.display()),
        })?;

        let block = DiskBlock {
            id,
            path,
            len,
            format: file.data.format(),
            summary: file.summary,
            cache: Mutex::new(Weak::new()),
        };
        Ok(self.register(Arc::new(block)))
    }

    fn create_silent(&self, len: usize, format: SampleFormat) -> Result<BlockRef, StorageError> {
        let block = SilentBlock::new(self.allocate_id(), len, format);
        Ok(self.register(Arc::new(block)))
    }

    fn fetch(&self, id: BlockId) -> Result<BlockRef, StorageError> {
        if let Some(block) = self.blocks.get(id) {
            return Ok(block);
        }

        let path = self.block_path(id);
        if !path.exists() {
            return Err(StorageError::UnknownBlock(id));
        }
        let file = read_block_file(&path).map_err(|source| StorageError::BlockRead { id, source })?;
        let block = DiskBlock {
            id,
            path,
            len: file.data.len(),
            format: file.data.format(),
            summary: file.summary,
            cache: Mutex::new(Weak::new()),
        };
        Ok(self.register(Arc::new(block)))
    }

    fn handle(&self) -> Handle {
        self.reclaimer.handle()
    }

    fn collect(&self) {
        self.reclaimer.collect();
        self.blocks.prune();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_writes_block_file() {
        let dir = tempdir().expect("tempdir");
        let factory = DiskBlockFactory::open(dir.path()).expect("open");

        let block = factory.create(SampleData::Int16(vec![1, -2, 3])).expect("create");

        assert!(factory.block_path(block.id()).exists());
        assert_eq!(block.sample_count(), 3);
        assert_eq!(block.format(), SampleFormat::Int16);
        assert_eq!(*block.samples().expect("samples"), SampleData::Int16(vec![1, -2, 3]));
    }

    #[test]
    fn test_reopen_continues_ids_and_fetches() {
        let dir = tempdir().expect("tempdir");
        let id = {
            let factory = DiskBlockFactory::open(dir.path()).expect("open");
            factory.create(SampleData::Float(vec![0.5; 8])).expect("create").id()
        };

        let factory = DiskBlockFactory::open(dir.path()).expect("reopen");
        let fetched = factory.fetch(id).expect("fetch");
        assert_eq!(fetched.sample_count(), 8);
        assert_eq!(fetched.summary().max, 0.5);
        assert_eq!(*fetched.samples().expect("samples"), SampleData::Float(vec![0.5; 8]));

        let next = factory.create(SampleData::Float(vec![0.0])).expect("create");
        assert!(next.id() > id);
    }

    #[test]
    fn test_fetch_unknown_block() {
        let dir = tempdir().expect("tempdir");
        let factory = DiskBlockFactory::open(dir.path()).expect("open");
        assert!(matches!(factory.fetch(BlockId(42)), Err(StorageError::UnknownBlock(BlockId(42)))));
    }

    #[test]
    fn test_corrupt_block_file_reports_read_error() {
        let dir = tempdir().expect("tempdir");
        let factory = DiskBlockFactory::open(dir.path()).expect("open");
        fs::write(factory.block_path(BlockId(9)), b"garbage").expect("write");

        assert!(matches!(factory.fetch(BlockId(9)), Err(StorageError::BlockRead { .. })));
    }

    #[test]
    fn test_deleted_file_fails_on_read() {
        let dir = tempdir().expect("tempdir");
        let factory = DiskBlockFactory::open(dir.path()).expect("open");
        let block = factory.create(SampleData::Float(vec![0.25; 4])).expect("create");

        fs::remove_file(factory.block_path(block.id())).expect("remove");
        assert!(block.samples().is_err());
    }

    #[test]
    fn test_remove_unused_keeps_live_and_listed_blocks() {
        let dir = tempdir().expect("tempdir");
        let factory = DiskBlockFactory::open(dir.path()).expect("open");
        let live = factory.create(SampleData::Float(vec![0.1; 2])).expect("create");
        let kept = factory.create(SampleData::Float(vec![0.2; 2])).expect("create").id();
        let dropped = factory.create(SampleData::Float(vec![0.3; 2])).expect("create").id();
        fs::write(dir.path().join("notes.txt"), b"keep me").expect("write");

        let removed = factory.remove_unused(&HashSet::from([kept])).expect("remove");

        assert_eq!(removed, 1);
        assert!(factory.block_path(live.id()).exists());
        assert!(factory.block_path(kept).exists());
        assert!(!factory.block_path(dropped).exists());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_silent_blocks_write_nothing() {
        let dir = tempdir().expect("tempdir");
        let factory = DiskBlockFactory::open(dir.path()).expect("open");
        let block = factory.create_silent(100, SampleFormat::Float).expect("create");

        assert!(block.is_silent());
        assert!(!factory.block_path(block.id()).exists());
    }
}
