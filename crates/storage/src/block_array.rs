use crate::block::BlockRef;
use crate::error::StorageError;
use crate::factory::SampleBlockFactory;
use daw_sample::{SampleData, SampleFormat, SampleSummary, SummaryAccumulator};
use std::ops::Range;
use std::sync::Arc;

/// A block placed at a sample position within a sequence.
#[derive(Debug, Clone)]
pub struct SeqBlock {
    pub block: BlockRef,
    pub start: u64,
}

impl SeqBlock {
    pub fn len(&self) -> u64 {
        self.block.sample_count() as u64
    }

    pub fn end(&self) -> u64 {
        self.start + self.len()
    }

    pub fn range(&self) -> Range<u64> {
        self.start..self.end()
    }

    /// Load the block's samples, naming the block on failure.
    pub fn load(&self) -> Result<Arc<SampleData>, StorageError> {
        self.block.samples().map_err(|source| StorageError::BlockRead {
            id: self.block.id(),
            source,
        })
    }
}

/// Samples read from storage, with the count that came from readable blocks.
/// The remainder was substituted with silence.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadOutcome {
    pub samples: SampleData,
    pub genuine: usize,
}

/// Contiguous, ordered index of blocks: each entry starts where the previous
/// one ends.
#[derive(Debug, Clone, Default)]
pub struct BlockArray {
    entries: Vec<SeqBlock>,
}

impl BlockArray {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blocks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[SeqBlock] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SeqBlock> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&SeqBlock> {
        self.entries.last()
    }

    pub fn pop(&mut self) -> Option<SeqBlock> {
        self.entries.pop()
    }

    pub fn sample_count(&self) -> u64 {
        self.entries.last().map_or(0, SeqBlock::end)
    }

    /// Add an entry, which must start exactly where the array ends.
    pub fn push(&mut self, entry: SeqBlock) -> Result<(), StorageError> {
        let end = self.sample_count();
        if entry.start != end {
            return Err(StorageError::Discontiguous {
                start: entry.start,
                end,
            });
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Add a block at the end of the array.
    pub fn append(&mut self, block: BlockRef) {
        let start = self.sample_count();
        self.entries.push(SeqBlock { block, start });
    }

    /// Append every block of `other` in order.
    pub fn extend(&mut self, other: &BlockArray) {
        for entry in other.iter() {
            self.append(entry.block.clone());
        }
    }

    /// Index of the block containing sample `pos`.
    pub fn find_block(&self, pos: u64) -> Option<usize> {
        if pos >= self.sample_count() {
            return None;
        }
        Some(self.entries.partition_point(|e| e.end() <= pos))
    }

    pub fn is_contiguous(&self) -> bool {
        let mut expected = 0;
        for entry in &self.entries {
            if entry.start != expected {
                return false;
            }
            expected = entry.end();
        }
        true
    }

    fn check_range(&self, start: u64, len: usize) -> Result<u64, StorageError> {
        let end = start + len as u64;
        if end > self.sample_count() {
            return Err(StorageError::OutOfRange {
                start,
                end,
                len: self.sample_count(),
            });
        }
        Ok(end)
    }

    /// Read `out.len()` samples starting at `start` as floats.
    ///
    /// With `may_throw` an unreadable block fails the read; otherwise its
    /// samples read as silence. Returns how many samples were genuine.
    pub fn read_f32(&self, start: u64, out: &mut [f32], may_throw: bool) -> Result<usize, StorageError> {
        self.check_range(start, out.len())?;
        let Some(mut index) = self.find_block(start) else {
            return Ok(0);
        };

        let mut pos = start;
        let mut filled = 0;
        let mut genuine = 0;
        while filled < out.len() {
            let entry = &self.entries[index];
            let offset = (pos - entry.start) as usize;
            let n = (entry.len() as usize - offset).min(out.len() - filled);
            let dest = &mut out[filled..filled + n];
            match entry.load() {
                Ok(data) => {
                    data.read_into(offset, dest);
                    genuine += n;
                }
                Err(err) if may_throw => return Err(err),
                Err(err) => {
                    log::warn!("substituting {n} samples of silence: {err}");
                    dest.fill(0.0);
                }
            }
            filled += n;
            pos += n as u64;
            index += 1;
        }
        Ok(genuine)
    }

    /// Read a range converted to `format`. `effective` is the precision of the
    /// stored data; narrowing below it dithers.
    pub fn read(
        &self,
        start: u64,
        len: usize,
        format: SampleFormat,
        effective: SampleFormat,
        may_throw: bool,
    ) -> Result<ReadOutcome, StorageError> {
        let mut buffer = vec![0.0; len];
        let genuine = self.read_f32(start, &mut buffer, may_throw)?;
        Ok(ReadOutcome {
            samples: SampleData::from_f32_with_effective(&buffer, format, effective),
            genuine,
        })
    }

    /// Min/max/RMS over a range, using block summaries for whole blocks.
    pub fn summary(&self, start: u64, len: usize, may_throw: bool) -> Result<SampleSummary, StorageError> {
        let end = self.check_range(start, len)?;
        let mut acc = SummaryAccumulator::default();
        for entry in self.overlapping(start, end) {
            let lo = start.max(entry.start);
            let hi = end.min(entry.end());
            if lo == entry.start && hi == entry.end() {
                acc.add_summary(&entry.block.summary(), entry.len() as usize);
                continue;
            }
            match entry.load() {
                Ok(data) => {
                    let mut piece = vec![0.0; (hi - lo) as usize];
                    data.read_into((lo - entry.start) as usize, &mut piece);
                    acc.add_samples(&piece);
                }
                Err(err) if may_throw => return Err(err),
                Err(err) => log::warn!("skipping unreadable block in summary: {err}"),
            }
        }
        Ok(acc.finish())
    }

    /// Entries intersecting `[start, end)`.
    pub fn overlapping(&self, start: u64, end: u64) -> impl Iterator<Item = &SeqBlock> {
        let first = self.entries.partition_point(|e| e.end() <= start);
        self.entries[first..]
            .iter()
            .take_while(move |e| e.start < end)
    }

    /// Copy `[start, end)` into a new array starting at zero. Whole blocks are
    /// shared; partially covered blocks are cut into new blocks.
    pub fn copy_range(
        &self,
        factory: &dyn SampleBlockFactory,
        start: u64,
        end: u64,
    ) -> Result<BlockArray, StorageError> {
        self.check_range(start, end.saturating_sub(start) as usize)?;
        let mut copy = BlockArray::new();
        for entry in self.overlapping(start, end) {
            let range = start.max(entry.start)..end.min(entry.end());
            copy.append(sub_block(factory, entry, range)?);
        }
        Ok(copy)
    }
}

/// The part of `entry` covering the absolute sample range `range`, shared when
/// the range is the whole block.
pub fn sub_block(
    factory: &dyn SampleBlockFactory,
    entry: &SeqBlock,
    range: Range<u64>,
) -> Result<BlockRef, StorageError> {
    if range == entry.range() {
        return Ok(entry.block.clone());
    }
    let data = entry.load()?;
    let local = (range.start - entry.start) as usize..(range.end - entry.start) as usize;
    factory.create(data.slice(local))
}
