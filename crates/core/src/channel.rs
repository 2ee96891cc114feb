use crate::error::TrackError;
use crate::track::WaveTrack;
use daw_clip::{ChannelSamples, ClipChannel, ClipError, SampleView};
use daw_sample::{SampleSummary, SummaryAccumulator};

const SAMPLE_EPSILON: f64 = 1e-6;

/// One channel of a [`WaveTrack`]. Time between clips reads as silence.
#[derive(Debug, Clone, Copy)]
pub struct WaveChannel<'a> {
    track: &'a WaveTrack,
    channel: usize,
}

impl<'a> WaveChannel<'a> {
    pub fn new(track: &'a WaveTrack, channel: usize) -> Self {
        assert!(channel < track.width(), "channel {channel} out of range");
        Self { track, channel }
    }

    pub fn track(&self) -> &'a WaveTrack {
        self.track
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    fn rate_f64(&self) -> f64 {
        f64::from(self.track.rate())
    }

    /// Lazy view over `[t0, t1)`, borrowing the track rather than this
    /// handle.
    pub fn view(&self, t0: f64, t1: f64, may_throw: bool) -> SampleView<'a> {
        let rate = self.rate_f64();
        let start = (t0 * rate).round() as i64;
        let end = ((t1 * rate + SAMPLE_EPSILON).floor() as i64).max(start);

        let mut view = SampleView::new(may_throw);
        let mut pos = start;
        for clip in self.track.clips() {
            if !clip.intersects_play_region(t0, t1) {
                continue;
            }
            let clip_start = (clip.play_start_time() * rate).round() as i64;
            if clip_start > pos {
                view.push_silence((clip_start.min(end) - pos) as usize);
                pos = clip_start.min(end);
            }
            let (s0, s1) = clip.sample_range(t0, t1);
            view.push_samples(clip.sequence(self.channel), s0, (s1 - s0) as usize);
            pos += (s1 - s0) as i64;
        }
        if end > pos {
            view.push_silence((end - pos) as usize);
        }
        view
    }

    /// Summary of the audio in `[t0, t1)`, ignoring gaps between clips.
    pub fn summary(&self, t0: f64, t1: f64, may_throw: bool) -> Result<SampleSummary, TrackError> {
        let mut acc = SummaryAccumulator::default();
        for clip in self.track.clips_intersecting(t0, t1) {
            let (s0, s1) = clip.sample_range(t0, t1);
            if s1 > s0 {
                let summary = clip.summary(self.channel, t0, t1, may_throw)?;
                acc.add_summary(&summary, (s1 - s0) as usize);
            }
        }
        Ok(acc.finish())
    }

    pub fn min_max(&self, t0: f64, t1: f64, may_throw: bool) -> Result<(f32, f32), TrackError> {
        let summary = self.summary(t0, t1, may_throw)?;
        Ok((summary.min, summary.max))
    }

    pub fn rms(&self, t0: f64, t1: f64, may_throw: bool) -> Result<f32, TrackError> {
        Ok(self.summary(t0, t1, may_throw)?.rms)
    }
}

impl ChannelSamples for WaveChannel<'_> {
    fn rate(&self) -> u32 {
        self.track.rate()
    }

    fn get_floats(&self, start: i64, out: &mut [f32], may_throw: bool) -> Result<usize, ClipError> {
        out.fill(0.0);
        let rate = self.rate_f64();
        let end = start + out.len() as i64;
        let mut within = 0;
        for clip in self.track.clips() {
            let clip_start = (clip.play_start_time() * rate).round() as i64;
            let clip_end = (clip.play_end_time() * rate).round() as i64;
            let (lo, hi) = (start.max(clip_start), end.min(clip_end));
            if lo >= hi {
                continue;
            }
            let dest = &mut out[(lo - start) as usize..(hi - start) as usize];
            within += ClipChannel::new(clip, self.channel).get_floats(lo, dest, may_throw)?;
        }
        Ok(within)
    }

    fn sample_view(&self, t0: f64, t1: f64, may_throw: bool) -> SampleView<'_> {
        self.view(t0, t1, may_throw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daw_clip::WaveClip;
    use daw_sample::SampleFormat;
    use daw_storage::MemoryBlockFactory;

    fn track_with(clips: &[(f64, &[f32])]) -> WaveTrack {
        let mut track = WaveTrack::new(MemoryBlockFactory::new().into_ptr(), 1, 10, SampleFormat::Float.into());
        for &(start, samples) in clips {
            let mut clip = WaveClip::new(track.factory(), 1, 10, track.formats());
            clip.append(&[samples], SampleFormat::Float).unwrap();
            clip.flush().unwrap();
            clip.set_sequence_start_time(start);
            track.add_clip(clip).unwrap();
        }
        track
    }

    #[test]
    fn test_view_spans_gaps() {
        let track = track_with(&[(0.2, &[0.5, 0.5]), (0.6, &[0.25; 3])]);
        let view = track.channel(0).view(0.0, 1.0, true);

        assert_eq!(view.sample_count(), 10);
        assert_eq!(
            view.to_vec().unwrap(),
            vec![0.0, 0.0, 0.5, 0.5, 0.0, 0.0, 0.25, 0.25, 0.25, 0.0]
        );
    }

    #[test]
    fn test_get_floats_counts_clip_samples() {
        let track = track_with(&[(0.2, &[0.5, 0.5]), (0.6, &[0.25; 3])]);
        let mut out = [1.0; 6];
        let within = track.channel(0).get_floats(3, &mut out, true).unwrap();

        assert_eq!(within, 4);
        assert_eq!(out, [0.5, 0.0, 0.0, 0.25, 0.25, 0.25]);
    }

    #[test]
    fn test_min_max_across_clips() {
        let track = track_with(&[(0.0, &[0.1, -0.4]), (0.5, &[0.8, 0.2])]);
        let (min, max) = track.channel(0).min_max(0.0, 1.0, true).unwrap();
        assert_eq!(min, -0.4);
        assert_eq!(max, 0.8);
    }
}
