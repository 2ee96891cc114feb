use crate::block::BlockId;
use daw_sample::Cancelled;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("could not allocate a block of {len} samples: {reason}")]
    Allocation { len: usize, reason: String },

    #[error("failed to read sample block {id}: {source}")]
    BlockRead { id: BlockId, source: anyhow::Error },

    #[error("block starting at sample {start} does not continue an array ending at {end}")]
    Discontiguous { start: u64, end: u64 },

    #[error("sample range {start}..{end} is outside a sequence of {len} samples")]
    OutOfRange { start: u64, end: u64, len: u64 },

    #[error("unknown sample block {0}")]
    UnknownBlock(BlockId),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}
