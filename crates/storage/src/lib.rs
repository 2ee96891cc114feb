//! Immutable, shareable sample blocks and the per-channel sequences built on
//! them.

mod block;
mod block_array;
mod error;
mod factory;
mod sequence;

pub use block::{BlockId, BlockRef, SampleBlock, SilentBlock};
pub use block_array::{BlockArray, ReadOutcome, SeqBlock, sub_block};
pub use error::StorageError;
pub use factory::{BlockRegistry, MemoryBlockFactory, Reclaimer, SampleBlockFactory, SampleBlockFactoryPtr};
pub use sequence::{BlockSizes, MAX_BLOCK_BYTES, Sequence, SequenceStatus};

pub use basedrop::{Handle, Shared};
