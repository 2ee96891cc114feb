use crate::envelope::Envelope;
use crate::error::ClipError;
use crate::sample_view::SampleView;
use daw_sample::{
    NoProgress, Progress, ProgressReporter, Resampler, SampleFormat, SampleFormats, SampleSummary,
};
use daw_storage::{ReadOutcome, SampleBlockFactoryPtr, Sequence};
use std::sync::atomic::{AtomicU64, Ordering};

/// Two stretch ratios closer than this are considered equal.
const STRETCH_EPSILON: f64 = 1e-9;

/// Sample-fraction tolerance when flooring a time onto the sample grid.
const SAMPLE_EPSILON: f64 = 1e-6;

/// Tolerance for locating a cut line by its position, in seconds.
const CUT_LINE_TOLERANCE: f64 = 1e-4;

static NEXT_CLIP_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique clip identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClipId(pub u64);

impl ClipId {
    pub fn next() -> Self {
        ClipId(NEXT_CLIP_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A placed span of one or more channels of audio.
///
/// The raw samples run from the sequence start time for `sample_count /
/// rate * stretch_ratio` seconds. Trims hide audio at either end without
/// deleting it, so the audible play interval is
/// `[sequence_start + trim_left, sequence_end - trim_right)`.
///
/// Cut lines are whole clips of removed audio, positioned relative to this
/// clip's sequence start, that can be expanded back in.
#[derive(Debug, Clone)]
pub struct WaveClip {
    id: ClipId,
    sequences: Vec<Sequence>,
    rate: u32,
    sequence_offset: f64,
    trim_left: f64,
    trim_right: f64,
    stretch_ratio: f64,
    envelope: Envelope,
    name: String,
    color_index: i32,
    cut_lines: Vec<WaveClip>,
    is_placeholder: bool,
}

impl WaveClip {
    /// An empty clip of `width` channels at time zero.
    pub fn new(factory: &SampleBlockFactoryPtr, width: usize, rate: u32, formats: SampleFormats) -> Self {
        assert!(width > 0, "a clip needs at least one channel");
        let sequences = (0..width)
            .map(|_| Sequence::new(factory.clone(), formats))
            .collect();
        Self::from_sequences(sequences, rate, 0.0)
    }

    /// A clip over existing sequences, which must all hold the same number of
    /// samples.
    pub fn from_sequences(sequences: Vec<Sequence>, rate: u32, sequence_offset: f64) -> Self {
        assert!(!sequences.is_empty(), "a clip needs at least one channel");
        assert!(rate > 0, "sample rate must be positive");
        let clip = Self {
            id: ClipId::next(),
            sequences,
            rate,
            sequence_offset,
            trim_left: 0.0,
            trim_right: 0.0,
            stretch_ratio: 1.0,
            envelope: Envelope::gain(),
            name: String::new(),
            color_index: 0,
            cut_lines: Vec::new(),
            is_placeholder: false,
        };
        assert!(
            clip.equal_sequence_length_invariant(),
            "clip channels have different lengths"
        );
        clip
    }

    /// An empty clip with this clip's width, rate, formats and stretch ratio.
    pub fn empty_like(&self) -> Self {
        let sequences = self.sequences.iter().map(Sequence::empty_like).collect();
        let mut clip = Self::from_sequences(sequences, self.rate, self.play_start_time());
        clip.stretch_ratio = self.stretch_ratio;
        clip.name = self.name.clone();
        clip.color_index = self.color_index;
        clip
    }

    /// A copy with a fresh id. Sample blocks are shared.
    pub fn duplicate(&self) -> Self {
        let mut copy = self.clone();
        copy.id = ClipId::next();
        copy
    }

    pub fn id(&self) -> ClipId {
        self.id
    }

    pub fn width(&self) -> usize {
        self.sequences.len()
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn sequences(&self) -> &[Sequence] {
        &self.sequences
    }

    pub fn sequence(&self, channel: usize) -> &Sequence {
        &self.sequences[channel]
    }

    pub fn formats(&self) -> SampleFormats {
        self.sequences[0].formats()
    }

    pub fn sample_format(&self) -> SampleFormat {
        self.formats().stored()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn color_index(&self) -> i32 {
        self.color_index
    }

    pub fn set_color_index(&mut self, color_index: i32) {
        self.color_index = color_index;
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn envelope_mut(&mut self) -> &mut Envelope {
        &mut self.envelope
    }

    pub fn set_envelope(&mut self, envelope: Envelope) {
        self.envelope = envelope;
    }

    pub fn is_placeholder(&self) -> bool {
        self.is_placeholder
    }

    pub fn set_placeholder(&mut self, placeholder: bool) {
        self.is_placeholder = placeholder;
    }

    pub fn equal_sequence_length_invariant(&self) -> bool {
        let len = self.sequences[0].sample_count();
        self.sequences.iter().all(|s| s.sample_count() == len)
    }

    /// Raw samples per channel.
    pub fn sample_count(&self) -> u64 {
        self.sequences[0].sample_count()
    }

    pub fn is_empty(&self) -> bool {
        self.play_end_time() <= self.play_start_time()
    }

    pub fn stretch_ratio(&self) -> f64 {
        self.stretch_ratio
    }

    pub fn has_equal_stretch_ratio(&self, other: &WaveClip) -> bool {
        self.stretch_ratio_equals(other.stretch_ratio)
    }

    pub fn stretch_ratio_equals(&self, ratio: f64) -> bool {
        (self.stretch_ratio - ratio).abs() < STRETCH_EPSILON
    }

    /// Set the ratio without moving the sequence start or rescaling trims.
    /// For rebuilding a clip from saved attributes; use
    /// [`WaveClip::stretch_by`] for edits.
    pub fn set_stretch_ratio(&mut self, ratio: f64) {
        assert!(ratio > 0.0, "stretch ratio must be positive");
        self.stretch_ratio = ratio;
    }

    pub fn sequence_start_time(&self) -> f64 {
        self.sequence_offset
    }

    pub fn set_sequence_start_time(&mut self, t: f64) {
        self.sequence_offset = t;
    }

    pub fn sequence_end_time(&self) -> f64 {
        self.sequence_offset + self.sample_count() as f64 / f64::from(self.rate) * self.stretch_ratio
    }

    pub fn trim_left(&self) -> f64 {
        self.trim_left
    }

    pub fn trim_right(&self) -> f64 {
        self.trim_right
    }

    /// Length of the whole sequence in timeline seconds, trims included.
    pub fn raw_duration(&self) -> f64 {
        self.sequence_end_time() - self.sequence_offset
    }

    /// Clamped so the two trims together never exceed the raw duration.
    pub fn set_trim_left(&mut self, trim: f64) {
        let max = (self.raw_duration() - self.trim_right).max(0.0);
        self.trim_left = trim.clamp(0.0, max);
    }

    /// Clamped like [`WaveClip::set_trim_left`].
    pub fn set_trim_right(&mut self, trim: f64) {
        let max = (self.raw_duration() - self.trim_left).max(0.0);
        self.trim_right = trim.clamp(0.0, max);
    }

    pub fn play_start_time(&self) -> f64 {
        self.sequence_offset + self.trim_left
    }

    pub fn play_end_time(&self) -> f64 {
        self.sequence_end_time() - self.trim_right
    }

    pub fn play_duration(&self) -> f64 {
        self.play_end_time() - self.play_start_time()
    }

    /// Raw sample index at absolute time `t`, rounded to the nearest sample.
    pub fn time_to_samples(&self, t: f64) -> i64 {
        self.duration_to_samples(t - self.sequence_offset)
    }

    /// Absolute time of raw sample `s`.
    pub fn samples_to_time(&self, s: i64) -> f64 {
        self.sequence_offset + self.samples_to_duration(s)
    }

    pub fn duration_to_samples(&self, d: f64) -> i64 {
        (d / self.stretch_ratio * f64::from(self.rate)).round() as i64
    }

    fn samples_to_duration(&self, s: i64) -> f64 {
        s as f64 * self.stretch_ratio / f64::from(self.rate)
    }

    /// `t` moved onto this clip's sample grid.
    pub fn snap_to_sample(&self, t: f64) -> f64 {
        self.samples_to_time(self.time_to_samples(t))
    }

    fn clamp_sample(&self, s: i64) -> u64 {
        s.clamp(0, self.sample_count() as i64) as u64
    }

    /// First audible raw sample.
    pub fn play_start_sample(&self) -> u64 {
        self.clamp_sample(self.duration_to_samples(self.trim_left))
    }

    /// One past the last audible raw sample.
    pub fn play_end_sample(&self) -> u64 {
        let end = self.sample_count() as i64 - self.duration_to_samples(self.trim_right);
        self.clamp_sample(end).max(self.play_start_sample())
    }

    pub fn visible_sample_count(&self) -> u64 {
        self.play_end_sample() - self.play_start_sample()
    }

    /// `t` lies strictly inside the play region.
    pub fn splits_play_region(&self, t: f64) -> bool {
        self.play_start_time() < t && t < self.play_end_time()
    }

    pub fn within_play_region(&self, t: f64) -> bool {
        self.play_start_time() <= t && t < self.play_end_time()
    }

    pub fn before_play_region(&self, t: f64) -> bool {
        t < self.play_start_time()
    }

    pub fn at_or_before_play_region(&self, t: f64) -> bool {
        t <= self.play_start_time()
    }

    pub fn after_play_region(&self, t: f64) -> bool {
        self.play_end_time() <= t
    }

    pub fn entirely_within_play_region(&self, t0: f64, t1: f64) -> bool {
        debug_assert!(t0 <= t1);
        self.play_start_time() <= t0 && t1 <= self.play_end_time()
    }

    pub fn partly_within_play_region(&self, t0: f64, t1: f64) -> bool {
        debug_assert!(t0 <= t1);
        self.within_play_region(t0) != self.within_play_region(t1)
    }

    pub fn intersects_play_region(&self, t0: f64, t1: f64) -> bool {
        debug_assert!(t0 <= t1);
        t0 < self.play_end_time() && self.play_start_time() < t1
    }

    pub fn covers_entire_play_region(&self, t0: f64, t1: f64) -> bool {
        debug_assert!(t0 <= t1);
        t0 <= self.play_start_time() && self.play_end_time() <= t1
    }

    /// Whether `next` starts within half a sample of where this clip ends.
    pub fn shares_boundary_with_next_clip(&self, next: &WaveClip) -> bool {
        let end_this = f64::from(self.rate) * self.play_start_time()
            + self.visible_sample_count() as f64 * self.stretch_ratio;
        let start_next = f64::from(next.rate) * next.play_start_time();
        (start_next - end_this).abs() < 0.5
    }

    pub fn shift_by(&mut self, dt: f64) {
        self.sequence_offset += dt;
    }

    /// Move the clip so that its play region starts at `t`.
    pub fn set_play_start_time(&mut self, t: f64) {
        self.sequence_offset = t - self.trim_left;
    }

    pub fn trim_left_by(&mut self, dt: f64) {
        let max = (self.raw_duration() - self.trim_right).max(0.0);
        self.trim_left = (self.trim_left + dt).clamp(0.0, max);
    }

    pub fn trim_right_by(&mut self, dt: f64) {
        let max = (self.raw_duration() - self.trim_left).max(0.0);
        self.trim_right = (self.trim_right + dt).clamp(0.0, max);
    }

    /// Hide everything before `t`.
    pub fn trim_left_to(&mut self, t: f64) {
        let t = t.clamp(self.sequence_offset, self.play_end_time().max(self.sequence_offset));
        self.trim_left = t - self.sequence_offset;
    }

    /// Hide everything after `t`.
    pub fn trim_right_to(&mut self, t: f64) {
        let end = self.sequence_end_time();
        let t = t.clamp(self.play_start_time().min(end), end);
        self.trim_right = end - t;
    }

    /// Stretch by `ratio` keeping the play start fixed.
    pub fn stretch_by(&mut self, ratio: f64) {
        assert!(ratio > 0.0, "stretch ratio must be positive");
        let start = self.play_start_time();
        self.rescale(ratio);
        self.sequence_offset = start - self.trim_left;
    }

    /// Stretch so the play region starts at `t`, keeping its end fixed.
    pub fn stretch_left_to(&mut self, t: f64) {
        let end = self.play_end_time();
        if t >= end {
            return;
        }
        let change = (end - t) / (end - self.play_start_time());
        self.sequence_offset = end - (end - self.sequence_offset) * change;
        self.rescale(change);
    }

    /// Stretch so the play region ends at `t`, keeping its start fixed.
    pub fn stretch_right_to(&mut self, t: f64) {
        let start = self.play_start_time();
        if t <= start {
            return;
        }
        let change = (t - start) / (self.play_end_time() - start);
        self.sequence_offset = start - (start - self.sequence_offset) * change;
        self.rescale(change);
    }

    fn rescale(&mut self, change: f64) {
        self.trim_left *= change;
        self.trim_right *= change;
        self.stretch_ratio *= change;
        self.envelope.rescale_times(change);
        for cut in &mut self.cut_lines {
            cut.sequence_offset *= change;
        }
    }

    /// Change the sample rate without resampling. Trims keep their length in
    /// samples.
    pub fn set_rate(&mut self, rate: u32) {
        assert!(rate > 0, "sample rate must be positive");
        let left = self.duration_to_samples(self.trim_left);
        let right = self.duration_to_samples(self.trim_right);
        let change = f64::from(self.rate) / f64::from(rate);
        self.rate = rate;
        self.trim_left = self.samples_to_duration(left);
        self.trim_right = self.samples_to_duration(right);
        self.envelope.rescale_times(change);
        for cut in &mut self.cut_lines {
            cut.sequence_offset *= change;
            cut.set_rate(rate);
        }
    }

    /// Start recording into every channel. `buffers` holds one slice per
    /// channel. Returns whether any block was sealed.
    pub fn append(&self, buffers: &[&[f32]], effective: SampleFormat) -> Result<bool, ClipError> {
        assert_eq!(buffers.len(), self.width(), "one buffer per channel");
        let mut sealed = false;
        for (sequence, buffer) in self.sequences.iter().zip(buffers) {
            sealed |= sequence.append_floats(buffer, effective)?;
        }
        Ok(sealed)
    }

    pub fn flush(&self) -> Result<(), ClipError> {
        for sequence in &self.sequences {
            sequence.flush()?;
        }
        Ok(())
    }

    /// Read `len` samples of `channel` starting `start` samples after the
    /// play start.
    pub fn get_samples(
        &self,
        channel: usize,
        start: u64,
        len: usize,
        format: SampleFormat,
        may_throw: bool,
    ) -> Result<ReadOutcome, ClipError> {
        let from = self.play_start_sample() + start;
        Ok(self.sequences[channel].get(from, len, format, may_throw)?)
    }

    pub fn get_floats(&self, channel: usize, start: u64, len: usize, may_throw: bool) -> Result<Vec<f32>, ClipError> {
        let outcome = self.get_samples(channel, start, len, SampleFormat::Float, may_throw)?;
        Ok(outcome.samples.into_f32())
    }

    /// Overwrite samples of `channel` starting `start` samples after the play
    /// start.
    pub fn set_floats(
        &mut self,
        channel: usize,
        start: u64,
        samples: &[f32],
        effective: SampleFormat,
    ) -> Result<(), ClipError> {
        let from = self.play_start_sample() + start;
        self.sequences[channel].set_floats(from, samples, effective)?;
        Ok(())
    }

    /// Raw sample bounds of `[t0, t1)` clamped to the play region: the lower
    /// bound rounds, the upper bound floors.
    pub fn sample_range(&self, t0: f64, t1: f64) -> (u64, u64) {
        let t0 = t0.max(self.play_start_time());
        let t1 = t1.min(self.play_end_time());
        let lo = self.play_start_sample();
        let hi = self.play_end_sample();
        if t1 <= t0 {
            return (lo, lo);
        }
        let start = self.clamp_sample(self.time_to_samples(t0)).clamp(lo, hi);
        let exact = (t1 - self.sequence_offset) / self.stretch_ratio * f64::from(self.rate);
        let end = self
            .clamp_sample((exact + SAMPLE_EPSILON).floor() as i64)
            .clamp(start, hi);
        (start, end)
    }

    /// Lazy view of `channel` over `[t0, t1)`.
    pub fn sample_view(&self, channel: usize, t0: f64, t1: f64, may_throw: bool) -> SampleView<'_> {
        let (start, end) = self.sample_range(t0, t1);
        SampleView::of_sequence(&self.sequences[channel], start, (end - start) as usize, may_throw)
    }

    pub fn summary(&self, channel: usize, t0: f64, t1: f64, may_throw: bool) -> Result<SampleSummary, ClipError> {
        let (start, end) = self.sample_range(t0, t1);
        Ok(self.sequences[channel].summary(start, (end - start) as usize, may_throw)?)
    }

    pub fn min_max(&self, channel: usize, t0: f64, t1: f64, may_throw: bool) -> Result<(f32, f32), ClipError> {
        let s = self.summary(channel, t0, t1, may_throw)?;
        Ok((s.min, s.max))
    }

    pub fn rms(&self, channel: usize, t0: f64, t1: f64, may_throw: bool) -> Result<f32, ClipError> {
        Ok(self.summary(channel, t0, t1, may_throw)?.rms)
    }

    /// Remove raw audio in `[t0, t1)` (absolute times) from every channel and
    /// close the gap. Cut lines inside the range are dropped.
    fn clear_sequence(&mut self, t0: f64, t1: f64) -> Result<(), ClipError> {
        let s0 = self.clamp_sample(self.time_to_samples(t0));
        let s1 = self.clamp_sample(self.time_to_samples(t1)).max(s0);
        if s1 == s0 {
            return Ok(());
        }
        for sequence in &mut self.sequences {
            sequence.delete(s0, s1 - s0)?;
        }

        let rel0 = self.samples_to_duration(s0 as i64);
        let rel1 = self.samples_to_duration(s1 as i64);
        let removed = rel1 - rel0;
        self.cut_lines
            .retain(|cut| cut.sequence_offset < rel0 || cut.sequence_offset > rel1);
        for cut in &mut self.cut_lines {
            if cut.sequence_offset > rel1 {
                cut.sequence_offset -= removed;
            }
        }
        self.envelope.collapse_region(rel0, rel1);
        Ok(())
    }

    /// Delete `[t0, t1)`, moving later audio left to close the gap. Hidden
    /// audio at an edge the range covers is deleted too.
    pub fn clear(&mut self, t0: f64, t1: f64) -> Result<(), ClipError> {
        let (mut st0, mut st1) = (t0, t1);
        let mut offset = 0.0;
        if st0 <= self.play_start_time() {
            offset = (t0 - self.play_start_time()) + self.trim_left;
            st0 = self.sequence_offset;
            self.trim_left = 0.0;
        }
        if st1 >= self.play_end_time() {
            st1 = self.sequence_end_time();
            self.trim_right = 0.0;
        }
        self.clear_sequence(st0, st1)?;
        if offset != 0.0 {
            self.shift_by(offset);
        }
        Ok(())
    }

    /// Delete everything before `t`, leaving later audio in place.
    pub fn clear_left(&mut self, t: f64) -> Result<(), ClipError> {
        if !self.splits_play_region(t) {
            return Ok(());
        }
        let t = self.snap_to_sample(t);
        self.clear_sequence(self.sequence_offset, t)?;
        self.trim_left = 0.0;
        self.sequence_offset = t;
        Ok(())
    }

    /// Delete everything after `t`.
    pub fn clear_right(&mut self, t: f64) -> Result<(), ClipError> {
        if !self.splits_play_region(t) {
            return Ok(());
        }
        self.clear_sequence(t, self.sequence_end_time())?;
        self.trim_right = 0.0;
        Ok(())
    }

    /// A new clip holding the audible part of `[t0, t1)`, positioned at its
    /// original time, with no trims.
    pub fn copy_range(&self, t0: f64, t1: f64, copy_cut_lines: bool) -> Result<WaveClip, ClipError> {
        let (s0, s1) = self.sample_range(t0, t1);
        let sequences = self
            .sequences
            .iter()
            .map(|s| s.copy(s0, s1))
            .collect::<Result<Vec<_>, _>>()?;

        let rel0 = self.samples_to_duration(s0 as i64);
        let rel1 = self.samples_to_duration(s1 as i64);
        let mut clip = WaveClip::from_sequences(sequences, self.rate, self.sequence_offset + rel0);
        clip.stretch_ratio = self.stretch_ratio;
        clip.name = self.name.clone();
        clip.color_index = self.color_index;
        clip.envelope = self.envelope.restricted(rel0, rel1);
        if copy_cut_lines {
            clip.cut_lines = self
                .cut_lines
                .iter()
                .filter(|cut| (rel0..=rel1).contains(&cut.sequence_offset))
                .map(|cut| {
                    let mut cut = cut.duplicate();
                    cut.sequence_offset -= rel0;
                    cut
                })
                .collect();
        }
        Ok(clip)
    }

    /// Insert the audible part of `other` at `t0`, which is clamped to the
    /// play region. Returns `false` when the stretch ratios differ.
    pub fn paste(&mut self, t0: f64, other: &WaveClip) -> Result<bool, ClipError> {
        assert_eq!(self.width(), other.width(), "pasting clips of different widths");
        if !self.has_equal_stretch_ratio(other) {
            return Ok(false);
        }
        if self.rate != other.rate {
            return Err(ClipError::IncompatibleClips(format!(
                "sample rates differ ({} Hz vs {} Hz)",
                self.rate, other.rate
            )));
        }

        let t0 = t0.clamp(self.play_start_time(), self.play_end_time().max(self.play_start_time()));
        let s0 = self.clamp_sample(self.time_to_samples(t0));
        let (o0, o1) = (other.play_start_sample(), other.play_end_sample());
        for (dest, src) in self.sequences.iter_mut().zip(&other.sequences) {
            let piece = src.copy(o0, o1)?;
            dest.paste(s0, &piece)?;
        }

        let at = self.samples_to_duration(s0 as i64);
        let len = self.samples_to_duration((o1 - o0) as i64);
        for cut in &mut self.cut_lines {
            if cut.sequence_offset > at {
                cut.sequence_offset += len;
            }
        }

        let other_start = other.samples_to_duration(o0 as i64);
        let pasted = other.envelope.restricted(other_start, other_start + len);
        self.envelope.paste(at, &pasted, len);

        for cut in &other.cut_lines {
            let pos = cut.sequence_offset - other_start;
            if (0.0..=len).contains(&pos) {
                let mut cut = cut.duplicate();
                cut.sequence_offset = at + pos;
                self.cut_lines.push(cut);
            }
        }
        Ok(true)
    }

    /// Zero the audible samples in `[t0, t1)` without moving anything.
    pub fn set_silence(&mut self, t0: f64, t1: f64) -> Result<(), ClipError> {
        let (s0, s1) = self.sample_range(t0, t1);
        if s1 > s0 {
            for sequence in &mut self.sequences {
                sequence.set_silence(s0, s1 - s0)?;
            }
        }
        Ok(())
    }

    /// Insert `len` seconds of silence at `t`.
    pub fn insert_silence(&mut self, t: f64, len: f64) -> Result<(), ClipError> {
        let s = self.clamp_sample(self.time_to_samples(t));
        let n = self.duration_to_samples(len).max(0) as u64;
        if n == 0 {
            return Ok(());
        }
        for sequence in &mut self.sequences {
            sequence.insert_silence(s, n)?;
        }
        let at = self.samples_to_duration(s as i64);
        let inserted = self.samples_to_duration(n as i64);
        for cut in &mut self.cut_lines {
            if cut.sequence_offset > at {
                cut.sequence_offset += inserted;
            }
        }
        self.envelope.expand_region(at, inserted);
        Ok(())
    }

    /// Extend the play region by `len` seconds of silence, optionally with a
    /// fixed envelope value over it.
    pub fn append_silence(&mut self, len: f64, envelope_value: Option<f64>) -> Result<(), ClipError> {
        let t = self.play_end_time();
        self.insert_silence(t, len)?;
        if let Some(value) = envelope_value {
            let at = t - self.sequence_offset;
            self.envelope.insert_or_replace(at, value);
            self.envelope.insert_or_replace(at + len, value);
        }
        Ok(())
    }

    pub fn cut_lines(&self) -> &[WaveClip] {
        &self.cut_lines
    }

    /// Attach a cut line whose sequence start is relative to this clip's.
    pub fn add_cut_line(&mut self, cut: WaveClip) {
        self.cut_lines.push(cut);
    }

    pub fn num_cut_lines(&self) -> usize {
        self.cut_lines.len()
    }

    /// Move `[t0, t1)` into a new cut line at `t0`.
    pub fn clear_and_add_cut_line(&mut self, t0: f64, t1: f64) -> Result<(), ClipError> {
        if t0 > self.play_end_time() || t1 < self.play_start_time() {
            return Ok(());
        }
        let t0 = t0.max(self.play_start_time());
        let t1 = t1.min(self.play_end_time());
        let mut cut = self.copy_range(t0, t1, true)?;
        if cut.sample_count() == 0 {
            return Ok(());
        }
        cut.sequence_offset -= self.sequence_offset;
        self.clear_sequence(t0, t1)?;
        self.cut_lines.push(cut);
        Ok(())
    }

    /// Detach the cut lines whose absolute position satisfies `pred`,
    /// returning each with that position.
    pub fn take_cut_lines(&mut self, mut pred: impl FnMut(f64) -> bool) -> Vec<(f64, WaveClip)> {
        let offset = self.sequence_offset;
        let (taken, kept) = std::mem::take(&mut self.cut_lines)
            .into_iter()
            .partition::<Vec<_>, _>(|cut| pred(offset + cut.sequence_offset));
        self.cut_lines = kept;
        taken
            .into_iter()
            .map(|cut| (offset + cut.sequence_offset, cut))
            .collect()
    }

    fn cut_line_index(&self, pos: f64) -> Option<usize> {
        self.cut_lines
            .iter()
            .position(|cut| (self.sequence_offset + cut.sequence_offset - pos).abs() < CUT_LINE_TOLERANCE)
    }

    /// Absolute position of the cut line at `pos` and the end it would
    /// reach if expanded.
    pub fn find_cut_line(&self, pos: f64) -> Option<(f64, f64)> {
        let cut = &self.cut_lines[self.cut_line_index(pos)?];
        let start = self.sequence_offset + cut.sequence_offset;
        Some((start, start + cut.play_duration()))
    }

    /// Restore the cut line at `pos`. Returns `false` if there is none.
    pub fn expand_cut_line(&mut self, pos: f64) -> Result<bool, ClipError> {
        let Some(index) = self.cut_line_index(pos) else {
            return Ok(false);
        };
        let cut = self.cut_lines.remove(index);
        let at = self.sequence_offset + cut.sequence_offset;
        match self.paste(at, &cut) {
            Ok(true) => Ok(true),
            Ok(false) => {
                self.cut_lines.insert(index, cut);
                Ok(false)
            }
            Err(err) => {
                self.cut_lines.insert(index, cut);
                Err(err)
            }
        }
    }

    pub fn remove_cut_line(&mut self, pos: f64) -> bool {
        match self.cut_line_index(pos) {
            Some(index) => {
                self.cut_lines.remove(index);
                true
            }
            None => false,
        }
    }

    /// Convert every channel (and cut line) to `format`. On cancellation the
    /// clip is unchanged.
    pub fn convert_to_sample_format(
        &mut self,
        format: SampleFormat,
        progress: &mut dyn ProgressReporter,
    ) -> Result<(), ClipError> {
        let mut progress = Progress::new(progress);
        let width = self.width();
        let mut converted = self.sequences.clone();
        for (index, sequence) in converted.iter_mut().enumerate() {
            let start = index as f64 / width as f64;
            let end = (index + 1) as f64 / width as f64;
            sequence.convert_to_format(format, &mut progress.sub(start, end))?;
        }
        let mut cut_lines = self.cut_lines.clone();
        for cut in &mut cut_lines {
            cut.convert_to_sample_format(format, &mut NoProgress)?;
        }
        self.sequences = converted;
        self.cut_lines = cut_lines;
        Ok(())
    }

    /// Resample every channel to `rate`. Times are preserved. On cancellation
    /// the clip is unchanged.
    pub fn resample(
        &mut self,
        rate: u32,
        resampler: &dyn Resampler,
        progress: &mut dyn ProgressReporter,
    ) -> Result<(), ClipError> {
        assert!(rate > 0, "sample rate must be positive");
        if rate == self.rate {
            return Ok(());
        }
        let mut progress = Progress::new(progress);
        let total = self.sample_count() as usize;
        let mut resampled = Vec::with_capacity(self.width());
        for (index, sequence) in self.sequences.iter().enumerate() {
            let samples = sequence.get_floats(0, total, true)?;
            let output = resampler
                .resample(&samples, f64::from(self.rate), f64::from(rate))
                .map_err(ClipError::Resample)?;
            let target = sequence.empty_like();
            target.append_floats(&output, sequence.formats().effective())?;
            target.flush()?;
            resampled.push(target);
            progress.step(index + 1, self.width())?;
        }
        let mut cut_lines = self.cut_lines.clone();
        for cut in &mut cut_lines {
            cut.resample(rate, resampler, &mut NoProgress)?;
        }
        self.sequences = resampled;
        self.cut_lines = cut_lines;
        self.rate = rate;
        Ok(())
    }

    /// A stretch-ratio-1 clip with the same play interval, rendered through
    /// `resampler`. Trimmed audio is not carried over.
    pub fn stretch_rendered_copy(
        &self,
        resampler: &dyn Resampler,
        progress: &mut dyn ProgressReporter,
    ) -> Result<WaveClip, ClipError> {
        let mut progress = Progress::new(progress);
        let (s0, s1) = (self.play_start_sample(), self.play_end_sample());
        let rate = f64::from(self.rate);

        let mut rendered = self.empty_like();
        rendered.stretch_ratio = 1.0;
        for (index, (source, target)) in self.sequences.iter().zip(&rendered.sequences).enumerate() {
            let samples = source.get_floats(s0, (s1 - s0) as usize, true)?;
            let output = if self.stretch_ratio_equals(1.0) {
                samples
            } else {
                resampler
                    .resample(&samples, rate, rate * self.stretch_ratio)
                    .map_err(ClipError::Resample)?
            };
            target.append_floats(&output, source.formats().effective())?;
            target.flush()?;
            progress.step(index + 1, self.width())?;
        }

        let rel0 = self.samples_to_duration(s0 as i64);
        rendered.envelope = self.envelope.restricted(rel0, rel0 + self.play_duration());
        rendered.sequence_offset = self.play_start_time();
        Ok(rendered)
    }
}
