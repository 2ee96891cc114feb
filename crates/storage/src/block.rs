use daw_sample::{SampleData, SampleFormat, SampleSummary};
use std::fmt;
use std::sync::Arc;

/// Persistent identity of a sample block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u64);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// An immutable run of samples in a single stored format.
///
/// Blocks are never modified after creation. Edits build new blocks and
/// rewrite the referencing [`BlockArray`](crate::BlockArray), so a block can be
/// shared freely between sequences, undo states and clipboard copies.
pub trait SampleBlock: Send + Sync {
    fn id(&self) -> BlockId;

    fn sample_count(&self) -> usize;

    fn format(&self) -> SampleFormat;

    /// Precomputed min/max/RMS of the whole block.
    fn summary(&self) -> SampleSummary;

    /// Load the samples. Fails when the backing storage cannot be read.
    fn samples(&self) -> anyhow::Result<Arc<SampleData>>;

    fn is_silent(&self) -> bool {
        false
    }
}

pub type BlockRef = Arc<dyn SampleBlock>;

impl fmt::Debug for dyn SampleBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleBlock")
            .field("id", &self.id())
            .field("samples", &self.sample_count())
            .field("format", &self.format())
            .finish()
    }
}

/// A block that stores no data and reads back as zeros.
#[derive(Debug, Clone)]
pub struct SilentBlock {
    id: BlockId,
    len: usize,
    format: SampleFormat,
}

impl SilentBlock {
    pub fn new(id: BlockId, len: usize, format: SampleFormat) -> Self {
        Self { id, len, format }
    }
}

impl SampleBlock for SilentBlock {
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
        SampleSummary::default()
    }

    fn samples(&self) -> anyhow::Result<Arc<SampleData>> {
        Ok(Arc::new(SampleData::silence(self.format, self.len)))
    }

    fn is_silent(&self) -> bool {
        true
    }
}
