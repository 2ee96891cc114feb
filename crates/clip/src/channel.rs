use crate::clip::WaveClip;
use crate::error::ClipError;
use crate::sample_view::SampleView;

/// Read access to one channel of audio on a timeline.
///
/// Implemented by a single clip channel and by whole track channels, which
/// fill gaps between clips with silence.
pub trait ChannelSamples {
    fn rate(&self) -> u32;

    /// Fill `out` with samples starting at absolute sample `start`. Returns
    /// how many of them lay within clips; the rest are silence.
    fn get_floats(&self, start: i64, out: &mut [f32], may_throw: bool) -> Result<usize, ClipError>;

    /// Lazy view over `[t0, t1)` in seconds.
    fn sample_view(&self, t0: f64, t1: f64, may_throw: bool) -> SampleView<'_>;
}

/// One channel of a [`WaveClip`], addressed in absolute time.
#[derive(Debug, Clone, Copy)]
pub struct ClipChannel<'a> {
    clip: &'a WaveClip,
    channel: usize,
}

impl<'a> ClipChannel<'a> {
    pub fn new(clip: &'a WaveClip, channel: usize) -> Self {
        assert!(channel < clip.width(), "channel {channel} out of range");
        Self { clip, channel }
    }

    pub fn clip(&self) -> &'a WaveClip {
        self.clip
    }

    pub fn channel(&self) -> usize {
        self.channel
    }
}

impl ChannelSamples for ClipChannel<'_> {
    fn rate(&self) -> u32 {
        self.clip.rate()
    }

    /// `start` counts samples from time zero. Anything outside the play
    /// region reads as silence.
    fn get_floats(&self, start: i64, out: &mut [f32], may_throw: bool) -> Result<usize, ClipError> {
        out.fill(0.0);
        let rate = f64::from(self.clip.rate());
        let t0 = start as f64 / rate;
        let t1 = (start + out.len() as i64) as f64 / rate;
        let view = self.clip.sample_view(self.channel, t0, t1, may_throw);
        if view.is_empty() {
            return Ok(0);
        }
        let (first, _) = self.clip.sample_range(t0, t1);
        let lead = (self.clip.samples_to_time(first as i64) * rate).round() as i64 - start;
        let lead = lead.clamp(0, out.len() as i64) as usize;
        let copied = view.copy(0, &mut out[lead..])?;
        Ok(copied)
    }

    fn sample_view(&self, t0: f64, t1: f64, may_throw: bool) -> SampleView<'_> {
        self.clip.sample_view(self.channel, t0, t1, may_throw)
    }
}
