//! Clips: placed, trimmed and stretched spans of multi-channel audio, with
//! their gain envelopes, cut lines and lazy sample views.

mod channel;
mod clip;
mod envelope;
mod error;
mod sample_view;

pub use channel::{ChannelSamples, ClipChannel};
pub use clip::{ClipId, WaveClip};
pub use envelope::{EnvPoint, Envelope};
pub use error::ClipError;
pub use sample_view::SampleView;
