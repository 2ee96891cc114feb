use crate::block::BlockRef;
use crate::block_array::{BlockArray, ReadOutcome, SeqBlock, sub_block};
use crate::error::StorageError;
use crate::factory::SampleBlockFactoryPtr;
use basedrop::{Handle, Shared};
use daw_sample::{
    Progress, ProgressReporter, SampleData, SampleFormat, SampleFormats, SampleSummary,
    SummaryAccumulator,
};
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Largest block, in bytes of stored samples.
pub const MAX_BLOCK_BYTES: usize = 1 << 20;

/// Blocks converted in parallel between two progress reports.
const CONVERT_BATCH: usize = 16;

/// Block size limits of a sequence, in samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSizes {
    pub max_samples: usize,
    pub min_samples: usize,
}

impl BlockSizes {
    pub fn for_format(format: SampleFormat) -> Self {
        Self::with_max(MAX_BLOCK_BYTES / format.bytes_per_sample())
    }

    pub fn with_max(max_samples: usize) -> Self {
        assert!(max_samples > 0, "blocks must hold at least one sample");
        Self {
            max_samples,
            min_samples: max_samples / 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceStatus {
    Empty,
    /// Unsealed samples are waiting in the append buffer.
    Appending,
    Flushed,
}

#[derive(Debug, Clone, Copy)]
enum Seal {
    /// Seal only as many whole maximum-size blocks as the buffer holds.
    FullBlocks,
    All,
}

struct Inner {
    blocks: Shared<BlockArray>,
    pending: SampleData,
}

/// One channel's samples: sealed blocks followed by an append buffer.
///
/// Appending and flushing take `&self` so a recording thread and a flushing
/// thread can share a sequence; every other edit takes `&mut self`. Readers
/// capture the block array and the part of the buffer they need in one short
/// critical section and never read past the length captured there.
pub struct Sequence {
    factory: SampleBlockFactoryPtr,
    handle: Handle,
    formats: RwLock<SampleFormats>,
    sizes: BlockSizes,
    inner: Mutex<Inner>,
    seal_lock: Mutex<()>,
    num_samples: AtomicU64,
}

impl Sequence {
    pub fn new(factory: SampleBlockFactoryPtr, formats: SampleFormats) -> Self {
        let sizes = BlockSizes::for_format(formats.stored());
        Self::with_block_sizes(factory, formats, sizes)
    }

    pub fn with_block_sizes(factory: SampleBlockFactoryPtr, formats: SampleFormats, sizes: BlockSizes) -> Self {
        Self::assemble(factory, formats, sizes, BlockArray::new())
    }

    /// Rebuild a sequence from previously sealed blocks.
    pub fn from_blocks(
        factory: SampleBlockFactoryPtr,
        formats: SampleFormats,
        sizes: BlockSizes,
        blocks: BlockArray,
    ) -> Result<Self, StorageError> {
        if !blocks.is_contiguous() {
            return Err(StorageError::Discontiguous {
                start: blocks.last().map_or(0, |b| b.start),
                end: blocks.sample_count(),
            });
        }
        Ok(Self::assemble(factory, formats, sizes, blocks))
    }

    fn assemble(
        factory: SampleBlockFactoryPtr,
        formats: SampleFormats,
        sizes: BlockSizes,
        blocks: BlockArray,
    ) -> Self {
        let handle = factory.handle();
        let num_samples = blocks.sample_count();
        Self {
            inner: Mutex::new(Inner {
                blocks: Shared::new(&handle, blocks),
                pending: SampleData::empty(formats.stored()),
            }),
            factory,
            handle,
            formats: RwLock::new(formats),
            sizes,
            seal_lock: Mutex::new(()),
            num_samples: AtomicU64::new(num_samples),
        }
    }

    /// A sequence of `len` zeros stored as silent blocks.
    pub fn silent(
        factory: SampleBlockFactoryPtr,
        formats: SampleFormats,
        sizes: BlockSizes,
        len: u64,
    ) -> Result<Self, StorageError> {
        let mut blocks = BlockArray::new();
        let mut remaining = len;
        while remaining > 0 {
            let n = remaining.min(sizes.max_samples as u64) as usize;
            blocks.append(factory.create_silent(n, formats.stored())?);
            remaining -= n as u64;
        }
        Ok(Self::assemble(factory, formats, sizes, blocks))
    }

    /// An empty sequence sharing this one's factory, formats and block sizes.
    pub fn empty_like(&self) -> Self {
        Self::with_block_sizes(self.factory.clone(), self.formats(), self.sizes)
    }

    pub fn factory(&self) -> &SampleBlockFactoryPtr {
        &self.factory
    }

    pub fn formats(&self) -> SampleFormats {
        *self.formats.read()
    }

    pub fn block_sizes(&self) -> BlockSizes {
        self.sizes
    }

    pub fn max_block_size(&self) -> usize {
        self.sizes.max_samples
    }

    /// Samples from `start` to the end of the block containing it, a natural
    /// chunk size for sequential reads.
    pub fn best_block_size(&self, start: u64) -> usize {
        let inner = self.inner.lock();
        match inner.blocks.find_block(start) {
            Some(index) => (inner.blocks.entries()[index].end() - start) as usize,
            None => self.sizes.max_samples,
        }
    }

    pub fn sample_count(&self) -> u64 {
        self.num_samples.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count() == 0
    }

    pub fn status(&self) -> SequenceStatus {
        let inner = self.inner.lock();
        if !inner.pending.is_empty() {
            SequenceStatus::Appending
        } else if inner.blocks.is_empty() {
            SequenceStatus::Empty
        } else {
            SequenceStatus::Flushed
        }
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Snapshot of the sealed blocks.
    pub fn blocks(&self) -> Shared<BlockArray> {
        self.inner.lock().blocks.clone()
    }

    pub fn block_count(&self) -> usize {
        self.inner.lock().blocks.len()
    }

    /// Whether the sample count matches the blocks plus the append buffer.
    pub fn consistency_check(&self) -> bool {
        let inner = self.inner.lock();
        inner.blocks.is_contiguous()
            && inner.blocks.sample_count() + inner.pending.len() as u64 == self.sample_count()
    }

    /// Append samples whose true precision is `effective`. Full blocks are
    /// sealed as soon as the buffer holds one; returns whether that happened.
    pub fn append(&self, samples: &SampleData, effective: SampleFormat) -> Result<bool, StorageError> {
        if samples.is_empty() {
            return Ok(false);
        }
        let effective = effective.min(samples.format());
        let stored = {
            let mut formats = self.formats.write();
            formats.update_effective(effective);
            formats.stored()
        };
        let converted = samples.convert(stored, effective);

        let pending = {
            let mut inner = self.inner.lock();
            inner.pending.extend_from(&converted);
            self.num_samples
                .fetch_add(converted.len() as u64, Ordering::AcqRel);
            inner.pending.len()
        };

        if pending >= self.sizes.max_samples {
            self.seal(Seal::FullBlocks)
        } else {
            Ok(false)
        }
    }

    pub fn append_floats(&self, samples: &[f32], effective: SampleFormat) -> Result<bool, StorageError> {
        self.append(&SampleData::Float(samples.to_vec()), effective)
    }

    /// Seal the whole append buffer into blocks. Idempotent.
    pub fn flush(&self) -> Result<(), StorageError> {
        self.seal(Seal::All).map(|_| ())
    }

    fn seal(&self, mode: Seal) -> Result<bool, StorageError> {
        let _sealing = self.seal_lock.lock();
        let max = self.sizes.max_samples;

        // Only the samples present now are sealed; later appends stay pending
        let (base, captured) = {
            let inner = self.inner.lock();
            let n = match mode {
                Seal::FullBlocks => inner.pending.len() / max * max,
                Seal::All => inner.pending.len(),
            };
            if n == 0 {
                return Ok(false);
            }
            (inner.blocks.clone(), inner.pending.slice(0..n))
        };
        let sealed_len = captured.len();

        let mut blocks = BlockArray::clone(&base);
        drop(base);
        let mut data = captured;
        if let Some(merged) = self.merge_with_short_tail(&mut blocks, &data, mode) {
            data = merged;
        }

        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + max).min(data.len());
            blocks.append(self.factory.create(data.slice(offset..end))?);
            offset = end;
        }

        {
            let mut inner = self.inner.lock();
            inner.pending.drain_front(sealed_len);
            inner.blocks = Shared::new(&self.handle, blocks);
        }
        log::debug!("sealed {sealed_len} samples");
        Ok(true)
    }

    /// When the last sealed block is under the minimum size, pop it and return
    /// its samples followed by `data`.
    fn merge_with_short_tail(&self, blocks: &mut BlockArray, data: &SampleData, mode: Seal) -> Option<SampleData> {
        if matches!(mode, Seal::FullBlocks) {
            return None;
        }
        let last = blocks.last()?;
        let len = last.len() as usize;
        if len >= self.sizes.min_samples || len + data.len() > self.sizes.max_samples {
            return None;
        }
        let mut merged = SampleData::clone(&*last.load().ok()?);
        merged.extend_from(data);
        blocks.pop();
        Some(merged)
    }

    /// Blocks and the slice of the append buffer covering `[start, start + len)`.
    fn snapshot(&self, start: u64, len: usize) -> Result<(Shared<BlockArray>, Option<SampleData>), StorageError> {
        let inner = self.inner.lock();
        let sealed = inner.blocks.sample_count();
        let total = sealed + inner.pending.len() as u64;
        let end = start + len as u64;
        if end > total {
            return Err(StorageError::OutOfRange {
                start,
                end,
                len: total,
            });
        }
        let tail = (end > sealed).then(|| {
            let from = start.max(sealed);
            inner
                .pending
                .slice((from - sealed) as usize..(end - sealed) as usize)
        });
        Ok((inner.blocks.clone(), tail))
    }

    /// Read floats into `out`, returning how many samples were genuine.
    pub fn read_floats(&self, start: u64, out: &mut [f32], may_throw: bool) -> Result<usize, StorageError> {
        let (blocks, tail) = self.snapshot(start, out.len())?;
        let sealed = blocks.sample_count();
        let head = sealed.saturating_sub(start).min(out.len() as u64) as usize;

        let mut genuine = 0;
        if head > 0 {
            genuine += blocks.read_f32(start, &mut out[..head], may_throw)?;
        }
        if let Some(tail) = tail {
            tail.read_into(0, &mut out[head..]);
            genuine += tail.len();
        }
        Ok(genuine)
    }

    /// Read `len` samples converted to `format`.
    pub fn get(
        &self,
        start: u64,
        len: usize,
        format: SampleFormat,
        may_throw: bool,
    ) -> Result<ReadOutcome, StorageError> {
        let mut buffer = vec![0.0; len];
        let genuine = self.read_floats(start, &mut buffer, may_throw)?;
        let effective = self.formats().effective();
        Ok(ReadOutcome {
            samples: SampleData::from_f32_with_effective(&buffer, format, effective),
            genuine,
        })
    }

    pub fn get_floats(&self, start: u64, len: usize, may_throw: bool) -> Result<Vec<f32>, StorageError> {
        let mut buffer = vec![0.0; len];
        self.read_floats(start, &mut buffer, may_throw)?;
        Ok(buffer)
    }

    pub fn summary(&self, start: u64, len: usize, may_throw: bool) -> Result<SampleSummary, StorageError> {
        let (blocks, tail) = self.snapshot(start, len)?;
        let sealed = blocks.sample_count();
        let head = sealed.saturating_sub(start).min(len as u64) as usize;

        let mut acc = SummaryAccumulator::default();
        if head > 0 {
            let s = blocks.summary(start, head, may_throw)?;
            acc.add_summary(&s, head);
        }
        if let Some(tail) = tail {
            acc.add_samples(&tail.to_f32());
        }
        Ok(acc.finish())
    }

    /// A new sequence holding `[start, end)`. Whole blocks are shared.
    pub fn copy(&self, start: u64, end: u64) -> Result<Sequence, StorageError> {
        let len = end.saturating_sub(start) as usize;
        let (blocks, tail) = self.snapshot(start, len)?;
        let sealed = blocks.sample_count();

        let mut copied = if start < sealed {
            blocks.copy_range(&*self.factory, start, end.min(sealed))?
        } else {
            BlockArray::new()
        };
        if let Some(tail) = tail {
            self.append_blocks_from(&mut copied, &tail)?;
        }
        Ok(Self::assemble(self.factory.clone(), self.formats(), self.sizes, copied))
    }

    fn append_blocks_from(&self, blocks: &mut BlockArray, data: &SampleData) -> Result<(), StorageError> {
        let max = self.sizes.max_samples;
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + max).min(data.len());
            blocks.append(self.factory.create(data.slice(offset..end))?);
            offset = end;
        }
        Ok(())
    }

    /// Sealed blocks after flushing, for structural edits.
    fn sealed_blocks(&mut self) -> Result<Shared<BlockArray>, StorageError> {
        self.flush()?;
        Ok(self.inner.get_mut().blocks.clone())
    }

    fn replace_blocks(&mut self, blocks: BlockArray) {
        debug_assert!(blocks.is_contiguous());
        *self.num_samples.get_mut() = blocks.sample_count();
        self.inner.get_mut().blocks = Shared::new(&self.handle, blocks);
    }

    fn check_range(&self, start: u64, len: u64) -> Result<(), StorageError> {
        let total = self.sample_count();
        if start + len > total {
            return Err(StorageError::OutOfRange {
                start,
                end: start + len,
                len: total,
            });
        }
        Ok(())
    }

    /// Overwrite `samples.len()` samples at `start`. Blocks touched by the
    /// range are rebuilt as new blocks.
    pub fn set_samples(&mut self, start: u64, samples: &SampleData, effective: SampleFormat) -> Result<(), StorageError> {
        if samples.is_empty() {
            return Ok(());
        }
        let blocks = self.sealed_blocks()?;
        self.check_range(start, samples.len() as u64)?;

        let effective = effective.min(samples.format());
        self.formats.get_mut().update_effective(effective);

        let end = start + samples.len() as u64;
        let mut rebuilt = BlockArray::new();
        for entry in blocks.iter() {
            if entry.end() <= start || entry.start >= end {
                rebuilt.append(entry.block.clone());
                continue;
            }
            let lo = start.max(entry.start);
            let hi = end.min(entry.end());
            let mut data = SampleData::clone(&*entry.load()?);
            let source = samples.slice((lo - start) as usize..(hi - start) as usize);
            data.overwrite((lo - entry.start) as usize, &source, effective);
            rebuilt.append(self.factory.create(data)?);
        }
        drop(blocks);
        self.replace_blocks(rebuilt);
        Ok(())
    }

    pub fn set_floats(&mut self, start: u64, samples: &[f32], effective: SampleFormat) -> Result<(), StorageError> {
        self.set_samples(start, &SampleData::Float(samples.to_vec()), effective)
    }

    /// Replace `[start, start + len)` with silence.
    pub fn set_silence(&mut self, start: u64, len: u64) -> Result<(), StorageError> {
        self.delete(start, len)?;
        self.insert_silence(start, len)
    }

    /// Remove `[start, start + len)`, shifting later samples left.
    pub fn delete(&mut self, start: u64, len: u64) -> Result<(), StorageError> {
        if len == 0 {
            return Ok(());
        }
        let blocks = self.sealed_blocks()?;
        self.check_range(start, len)?;
        let end = start + len;

        let mut rebuilt = BlockArray::new();
        for entry in blocks.iter() {
            if entry.end() <= start || entry.start >= end {
                rebuilt.append(entry.block.clone());
            } else if let Some(kept) = self.keep_outside(entry, start, end)? {
                rebuilt.append(kept);
            }
        }
        drop(blocks);
        self.replace_blocks(rebuilt);
        Ok(())
    }

    /// The samples of `entry` lying outside `[start, end)`, as one new block.
    fn keep_outside(&self, entry: &SeqBlock, start: u64, end: u64) -> Result<Option<BlockRef>, StorageError> {
        let left = entry.start..start.max(entry.start);
        let right = end.min(entry.end())..entry.end();
        if left.is_empty() && right.is_empty() {
            return Ok(None);
        }
        let data = entry.load()?;
        let local = |r: std::ops::Range<u64>| (r.start - entry.start) as usize..(r.end - entry.start) as usize;
        let mut kept = data.slice(local(left));
        kept.extend_from(&data.slice(local(right)));
        self.factory.create(kept).map(Some)
    }

    /// Insert the samples of `src` at `at`, shifting later samples right.
    /// Blocks of `src` already in this sequence's format are shared.
    pub fn paste(&mut self, at: u64, src: &Sequence) -> Result<(), StorageError> {
        let blocks = self.sealed_blocks()?;
        self.check_range(at, 0)?;

        let src_formats = src.formats();
        let inserted = self.conformed(src.copy(0, src.sample_count())?.blocks(), src_formats)?;

        let mut rebuilt = BlockArray::new();
        let mut placed = false;
        for entry in blocks.iter() {
            if placed || entry.end() <= at {
                rebuilt.append(entry.block.clone());
                continue;
            }
            if entry.start < at {
                rebuilt.append(sub_block(&*self.factory, entry, entry.start..at)?);
                rebuilt.extend(&inserted);
                rebuilt.append(sub_block(&*self.factory, entry, at..entry.end())?);
            } else {
                rebuilt.extend(&inserted);
                rebuilt.append(entry.block.clone());
            }
            placed = true;
        }
        if !placed {
            rebuilt.extend(&inserted);
        }
        drop(blocks);

        self.formats.get_mut().update_effective(src_formats.effective());
        self.replace_blocks(rebuilt);
        Ok(())
    }

    /// `blocks` converted to this sequence's stored format where needed.
    fn conformed(&self, blocks: Shared<BlockArray>, formats: SampleFormats) -> Result<BlockArray, StorageError> {
        let stored = self.formats().stored();
        let mut out = BlockArray::new();
        for entry in blocks.iter() {
            if entry.block.format() == stored {
                out.append(entry.block.clone());
            } else {
                let data = entry.load()?;
                out.append(self.factory.create(data.convert(stored, formats.effective()))?);
            }
        }
        Ok(out)
    }

    /// Insert `len` zeros at `at`.
    pub fn insert_silence(&mut self, at: u64, len: u64) -> Result<(), StorageError> {
        if len == 0 {
            return Ok(());
        }
        let silence = Sequence::silent(self.factory.clone(), self.formats(), self.sizes, len)?;
        self.paste(at, &silence)
    }

    /// Append `len` zeros.
    pub fn append_silence(&mut self, len: u64) -> Result<(), StorageError> {
        let at = self.sample_count();
        self.insert_silence(at, len)
    }

    /// Convert storage to `format`. Returns `false` when nothing changed.
    /// On cancellation the sequence is left as it was.
    pub fn convert_to_format(
        &mut self,
        format: SampleFormat,
        progress: &mut dyn ProgressReporter,
    ) -> Result<bool, StorageError> {
        let formats = self.formats();
        if formats.stored() == format {
            return Ok(false);
        }
        let blocks = self.sealed_blocks()?;
        let mut progress = Progress::new(progress);
        let effective = formats.effective();
        let total = blocks.len();

        let mut converted = BlockArray::new();
        for (batch_index, batch) in blocks.entries().chunks(CONVERT_BATCH).enumerate() {
            let factory = &self.factory;
            let results: Vec<Result<BlockRef, StorageError>> = batch
                .par_iter()
                .map(|entry| {
                    if entry.block.is_silent() {
                        return factory.create_silent(entry.len() as usize, format);
                    }
                    let data = entry.load()?;
                    factory.create(data.convert(format, effective))
                })
                .collect();
            for block in results {
                converted.append(block?);
            }
            progress.step((batch_index * CONVERT_BATCH + batch.len()).min(total), total)?;
        }
        drop(blocks);

        *self.formats.get_mut() = formats.with_stored(format);
        self.inner.get_mut().pending = SampleData::empty(format);
        self.replace_blocks(converted);
        log::debug!("converted {total} blocks to {format}");
        Ok(true)
    }
}

impl Clone for Sequence {
    fn clone(&self) -> Self {
        let inner = self.inner.lock();
        Self {
            factory: self.factory.clone(),
            handle: self.handle.clone(),
            formats: RwLock::new(self.formats()),
            sizes: self.sizes,
            num_samples: AtomicU64::new(inner.blocks.sample_count() + inner.pending.len() as u64),
            inner: Mutex::new(Inner {
                blocks: inner.blocks.clone(),
                pending: inner.pending.clone(),
            }),
            seal_lock: Mutex::new(()),
        }
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequence")
            .field("samples", &self.sample_count())
            .field("blocks", &self.block_count())
            .field("pending", &self.pending_len())
            .field("formats", &self.formats())
            .finish()
    }
}
