pub mod channel;
pub mod clip_ops;
pub mod config;
pub mod error;
pub mod time;
pub mod track;

pub use channel::WaveChannel;
pub use clip_ops::{Interval, SilenceDetector};
pub use config::EditConfig;
pub use error::{ConfigError, TrackError};
pub use time::{IdentityWarper, LinearWarper, PasteTimeWarper, ShiftWarper, TimeWarper};
pub use track::{TrackId, WaveTrack};

pub use daw_clip::{ChannelSamples, ClipChannel, ClipError, ClipId, EnvPoint, Envelope, SampleView, WaveClip};
pub use daw_sample::{
    Cancelled, NoProgress, ProgressReporter, Resampler, SampleFormat, SampleFormats, SampleSummary, SincResampler,
};
pub use daw_storage::{MemoryBlockFactory, SampleBlockFactory, SampleBlockFactoryPtr, Sequence, StorageError};
