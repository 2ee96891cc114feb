use crate::channel::WaveChannel;
use crate::clip_ops::{self, Interval, SilenceDetector};
use crate::config::EditConfig;
use crate::error::TrackError;
use crate::time::{IdentityWarper, PasteTimeWarper, TimeWarper};
use daw_clip::{ClipId, SampleView, WaveClip};
use daw_sample::{Progress, ProgressReporter, Resampler, SampleFormat, SampleFormats};
use daw_storage::SampleBlockFactoryPtr;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Samples per channel read at once when scanning for silence.
const DISJOIN_CHUNK: usize = 1 << 20;

static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub u64);

impl TrackId {
    pub fn next() -> Self {
        TrackId(NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Boundary between two clips remembered across a clear-and-paste, with the
/// audio each side had hidden by trimming.
struct SplitInfo {
    time: f64,
    left: Option<WaveClip>,
    right: Option<WaveClip>,
    left_name: Option<String>,
    right_name: Option<String>,
}

fn split_info_at(splits: &mut Vec<SplitInfo>, time: f64) -> &mut SplitInfo {
    let index = match splits.iter().position(|s| s.time == time) {
        Some(index) => index,
        None => {
            splits.push(SplitInfo {
                time,
                left: None,
                right: None,
                left_name: None,
                right_name: None,
            });
            splits.len() - 1
        }
    };
    &mut splits[index]
}

/// Prepend `hidden` to `target` as trimmed-away audio.
fn attach_left(target: &mut WaveClip, hidden: &WaveClip) -> Result<(), TrackError> {
    debug_assert_eq!(target.trim_left(), 0.0);
    let trim = hidden.play_duration();
    let at = target.play_start_time();
    if target.paste(at, hidden)? {
        target.set_trim_left(trim);
        target.shift_by(-trim);
    }
    Ok(())
}

/// Append `hidden` to `target` as trimmed-away audio.
fn attach_right(target: &mut WaveClip, hidden: &WaveClip) -> Result<(), TrackError> {
    debug_assert_eq!(target.trim_right(), 0.0);
    let trim = hidden.play_duration();
    let at = target.play_end_time();
    if target.paste(at, hidden)? {
        target.set_trim_right(trim);
    }
    Ok(())
}

/// A timeline of non-overlapping clips sharing one channel width and rate.
///
/// Clips are kept sorted by play start time. Structural edits take
/// `&mut self`; recording uses [`WaveTrack::append`] and
/// [`WaveTrack::flush`], which take `&self` and may run on different
/// threads.
pub struct WaveTrack {
    id: TrackId,
    name: String,
    clips: Vec<WaveClip>,
    width: usize,
    rate: u32,
    gain: f32,
    pan: f32,
    mute: bool,
    solo: bool,
    formats: SampleFormats,
    color_index: i32,
    factory: SampleBlockFactoryPtr,
    append_lock: Mutex<()>,
    flush_lock: Mutex<()>,
}

impl WaveTrack {
    pub fn new(factory: SampleBlockFactoryPtr, width: usize, rate: u32, formats: SampleFormats) -> Self {
        assert!(width > 0, "a track needs at least one channel");
        assert!(rate > 0, "sample rate must be positive");
        Self {
            id: TrackId::next(),
            name: String::new(),
            clips: Vec::new(),
            width,
            rate,
            gain: 1.0,
            pan: 0.0,
            mute: false,
            solo: false,
            formats,
            color_index: 0,
            factory,
            append_lock: Mutex::new(()),
            flush_lock: Mutex::new(()),
        }
    }

    /// A track with the same settings and no clips.
    pub fn empty_copy(&self) -> Self {
        let mut track = Self::new(self.factory.clone(), self.width, self.rate, self.formats);
        track.name = self.name.clone();
        track.gain = self.gain;
        track.pan = self.pan;
        track.color_index = self.color_index;
        track
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn set_id(&mut self, id: TrackId) {
        self.id = id;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain.max(0.0);
    }

    pub fn pan(&self) -> f32 {
        self.pan
    }

    pub fn set_pan(&mut self, pan: f32) {
        self.pan = pan.clamp(-1.0, 1.0);
    }

    pub fn mute(&self) -> bool {
        self.mute
    }

    pub fn set_mute(&mut self, mute: bool) {
        self.mute = mute;
    }

    pub fn solo(&self) -> bool {
        self.solo
    }

    pub fn set_solo(&mut self, solo: bool) {
        self.solo = solo;
    }

    pub fn formats(&self) -> SampleFormats {
        self.formats
    }

    pub fn sample_format(&self) -> SampleFormat {
        self.formats.stored()
    }

    pub fn color_index(&self) -> i32 {
        self.color_index
    }

    pub fn set_color_index(&mut self, color_index: i32) {
        self.color_index = color_index;
    }

    pub fn factory(&self) -> &SampleBlockFactoryPtr {
        &self.factory
    }

    pub fn channel(&self, index: usize) -> WaveChannel<'_> {
        WaveChannel::new(self, index)
    }

    pub fn channels(&self) -> impl Iterator<Item = WaveChannel<'_>> {
        (0..self.width).map(move |i| WaveChannel::new(self, i))
    }

    pub fn clips(&self) -> &[WaveClip] {
        &self.clips
    }

    pub fn num_clips(&self) -> usize {
        self.clips.len()
    }

    pub fn clip(&self, id: ClipId) -> Option<&WaveClip> {
        self.clips.iter().find(|c| c.id() == id)
    }

    pub fn clip_index(&self, id: ClipId) -> Option<usize> {
        self.clips.iter().position(|c| c.id() == id)
    }

    pub fn clip_at_time(&self, t: f64) -> Option<&WaveClip> {
        self.clips.iter().find(|c| c.within_play_region(t))
    }

    pub fn clips_intersecting(&self, t0: f64, t1: f64) -> impl Iterator<Item = &WaveClip> {
        self.clips.iter().filter(move |c| c.intersects_play_region(t0, t1))
    }

    pub fn leftmost_clip(&self) -> Option<&WaveClip> {
        self.clips.first()
    }

    pub fn rightmost_clip(&self) -> Option<&WaveClip> {
        self.clips.last()
    }

    pub fn next_clip(&self, id: ClipId) -> Option<&WaveClip> {
        self.clips.get(self.clip_index(id)? + 1)
    }

    pub fn prev_clip(&self, id: ClipId) -> Option<&WaveClip> {
        let index = self.clip_index(id)?;
        index.checked_sub(1).and_then(|i| self.clips.get(i))
    }

    /// Whether no clip plays anywhere in `[t0, t1)`.
    pub fn is_empty_range(&self, t0: f64, t1: f64) -> bool {
        if t1 < t0 {
            return true;
        }
        !self.clips.iter().any(|c| c.intersects_play_region(t0, t1))
    }

    /// Earliest play start, or zero without clips.
    pub fn start_time(&self) -> f64 {
        self.clips.first().map_or(0.0, WaveClip::play_start_time)
    }

    /// Latest play end, or zero without clips.
    pub fn end_time(&self) -> f64 {
        self.clips
            .iter()
            .map(WaveClip::play_end_time)
            .fold(None, |end: Option<f64>, t| Some(end.map_or(t, |e| e.max(t))))
            .unwrap_or(0.0)
    }

    pub fn snap_to_sample(&self, t: f64) -> f64 {
        self.time_to_samples(t) as f64 / f64::from(self.rate)
    }

    pub fn time_to_samples(&self, t: f64) -> i64 {
        (t * f64::from(self.rate)).round() as i64
    }

    fn intervals<'a>(clips: impl Iterator<Item = &'a WaveClip>) -> Vec<Interval> {
        clips
            .map(|c| Interval::new(c.play_start_time(), c.play_end_time()))
            .collect()
    }

    fn sort_clips(&mut self) {
        self.clips
            .sort_by(|a, b| a.play_start_time().total_cmp(&b.play_start_time()));
    }

    fn insert_clip(&mut self, clip: WaveClip) {
        self.clips.push(clip);
        self.sort_clips();
    }

    /// Run `edit`, restoring the clips and settings if it fails.
    fn transaction<T>(&mut self, edit: impl FnOnce(&mut Self) -> Result<T, TrackError>) -> Result<T, TrackError> {
        let saved = (self.clips.clone(), self.rate, self.formats);
        match edit(self) {
            Ok(value) => Ok(value),
            Err(err) => {
                (self.clips, self.rate, self.formats) = saved;
                Err(err)
            }
        }
    }

    /// Place `clip` on the track. It must match the track's width and rate
    /// and must not overlap any clip.
    pub fn add_clip(&mut self, clip: WaveClip) -> Result<ClipId, TrackError> {
        assert_eq!(clip.width(), self.width, "clip width differs from track width");
        if clip.rate() != self.rate {
            return Err(TrackError::IncompatibleClips(format!(
                "clip rate {} Hz differs from track rate {} Hz",
                clip.rate(),
                self.rate
            )));
        }
        let (start, end) = (clip.play_start_time(), clip.play_end_time());
        if !self.is_empty_range(start, end) {
            return Err(TrackError::Overlap { start, end });
        }
        let id = clip.id();
        self.insert_clip(clip);
        Ok(id)
    }

    pub fn remove_clip(&mut self, id: ClipId) -> Result<WaveClip, TrackError> {
        let index = self.clip_index(id).ok_or(TrackError::NoSuchClip(id))?;
        Ok(self.clips.remove(index))
    }

    /// Add an empty clip at `offset`.
    pub fn create_wide_clip(&mut self, offset: f64, name: &str) -> Result<ClipId, TrackError> {
        if self.clips.iter().any(|c| c.within_play_region(offset)) {
            return Err(TrackError::Overlap {
                start: offset,
                end: offset,
            });
        }
        let mut clip = WaveClip::new(&self.factory, self.width, self.rate, self.formats);
        clip.set_sequence_start_time(offset);
        clip.set_name(name);
        let id = clip.id();
        self.insert_clip(clip);
        Ok(id)
    }

    /// The clip recording appends to, created at time zero on an empty track.
    pub fn rightmost_or_new_clip(&mut self) -> ClipId {
        if let Some(clip) = self.clips.last() {
            return clip.id();
        }
        let clip = WaveClip::new(&self.factory, self.width, self.rate, self.formats);
        let id = clip.id();
        self.insert_clip(clip);
        id
    }

    /// Append one buffer per channel to the rightmost clip.
    pub fn append(&self, buffers: &[&[f32]], effective: SampleFormat) -> Result<bool, TrackError> {
        let _guard = self.append_lock.lock();
        let clip = self.clips.last().ok_or(TrackError::NoClip)?;
        Ok(clip.append(buffers, effective)?)
    }

    /// Seal appended audio into blocks and release blocks no longer used.
    pub fn flush(&self) -> Result<(), TrackError> {
        let _guard = self.flush_lock.lock();
        for clip in &self.clips {
            clip.flush()?;
        }
        self.factory.collect();
        Ok(())
    }

    /// Split the clip whose play region strictly contains `t` into two clips
    /// sharing the same samples.
    pub fn split_at(&mut self, t: f64) {
        let Some(index) = self.clips.iter().position(|c| c.splits_play_region(t)) else {
            return;
        };
        let clip = &mut self.clips[index];
        let t = clip.snap_to_sample(t);
        if !clip.splits_play_region(t) {
            return;
        }

        let mut right = clip.duplicate();
        clip.trim_right_to(t);
        right.trim_left_to(t);
        clip.take_cut_lines(|pos| pos > t);
        right.take_cut_lines(|pos| pos <= t);
        log::debug!("split clip {:?} at {t:.6}s", clip.id());
        self.insert_clip(right);
    }

    pub fn split(&mut self, t0: f64, t1: f64) {
        assert!(t0 <= t1, "inverted range {t0}..{t1}");
        self.split_at(t0);
        if t1 != t0 {
            self.split_at(t1);
        }
    }

    fn handle_clear(
        &mut self,
        t0: f64,
        t1: f64,
        add_cut_lines: bool,
        split: bool,
        move_later: bool,
    ) -> Result<(), TrackError> {
        assert!(t0 <= t1, "inverted range {t0}..{t1}");

        // Cut lines only make sense inside a single clip
        let add_cut_lines =
            add_cut_lines && !self.clips.iter().any(|c| c.partly_within_play_region(t0, t1));

        let mut kept = Vec::with_capacity(self.clips.len());
        let mut added = Vec::new();
        for clip in &self.clips {
            if clip.covers_entire_play_region(t0, t1) {
                continue;
            }
            if !clip.intersects_play_region(t0, t1) {
                kept.push(clip.clone());
                continue;
            }

            if add_cut_lines {
                let mut cleared = clip.clone();
                cleared.clear_and_add_cut_line(t0, t1)?;
                added.push(cleared);
            } else if split {
                if clip.at_or_before_play_region(t0) {
                    let mut right = clip.clone();
                    right.trim_left_by(t1 - clip.play_start_time());
                    added.push(right);
                } else if clip.after_play_region(t1) {
                    let mut left = clip.clone();
                    left.trim_right_by(clip.play_end_time() - t0);
                    added.push(left);
                } else {
                    let mut left = clip.clone();
                    left.trim_right_by(clip.play_end_time() - t0);
                    let mut right = clip.duplicate();
                    right.trim_left_by(t1 - clip.play_start_time());
                    added.push(left);
                    added.push(right);
                }
            } else {
                let mut cleared = clip.clone();
                cleared.clear(t0, t1)?;
                added.push(cleared);
            }
        }

        if !split && move_later {
            for clip in &mut kept {
                if clip.at_or_before_play_region(t1) {
                    clip.shift_by(-(t1 - t0));
                }
            }
        }

        kept.extend(added);
        self.clips = kept;
        self.sort_clips();
        log::debug!("cleared {t0:.6}s..{t1:.6}s (split: {split})");
        Ok(())
    }

    /// Delete `[t0, t1)`. With movable clips, later clips close the gap.
    pub fn clear(&mut self, t0: f64, t1: f64, config: &EditConfig) -> Result<(), TrackError> {
        self.handle_clear(t0, t1, false, false, config.edit_clips_can_move)
    }

    /// Delete `[t0, t1)` leaving a gap.
    pub fn split_delete(&mut self, t0: f64, t1: f64) -> Result<(), TrackError> {
        self.handle_clear(t0, t1, false, true, false)
    }

    /// Remove `[t0, t1)` leaving a gap, returning what was removed.
    pub fn split_cut(&mut self, t0: f64, t1: f64) -> Result<WaveTrack, TrackError> {
        let removed = self.copy(t0, t1, false)?;
        self.split_delete(t0, t1)?;
        Ok(removed)
    }

    /// Remove `[t0, t1)` closing the gap, returning what was removed.
    pub fn cut(&mut self, t0: f64, t1: f64, config: &EditConfig) -> Result<WaveTrack, TrackError> {
        let removed = self.copy(t0, t1, false)?;
        self.clear(t0, t1, config)?;
        Ok(removed)
    }

    /// Delete `[t0, t1)` keeping the audio as a cut line when the range lies
    /// inside one clip.
    pub fn clear_and_add_cut_line(&mut self, t0: f64, t1: f64, config: &EditConfig) -> Result<(), TrackError> {
        self.handle_clear(t0, t1, true, false, config.edit_clips_can_move)
    }

    /// Keep only what plays within `[t0, t1)`.
    pub fn trim(&mut self, t0: f64, t1: f64) {
        assert!(t0 <= t1, "inverted range {t0}..{t1}");
        self.clips.retain(|c| c.intersects_play_region(t0, t1));
        for clip in &mut self.clips {
            if clip.splits_play_region(t0) {
                clip.trim_left_to(t0);
            }
            if clip.splits_play_region(t1) {
                clip.trim_right_to(t1);
            }
        }
    }

    /// Zero the audio in `[t0, t1)`.
    pub fn silence(&mut self, t0: f64, t1: f64) -> Result<(), TrackError> {
        assert!(t0 <= t1, "inverted range {t0}..{t1}");
        self.transaction(|track| {
            for clip in &mut track.clips {
                if clip.intersects_play_region(t0, t1) {
                    clip.set_silence(t0, t1)?;
                }
            }
            Ok(())
        })
    }

    /// Insert `len` seconds of silence at `t`, moving later audio right.
    pub fn insert_silence(&mut self, t: f64, len: f64) -> Result<(), TrackError> {
        assert!(len >= 0.0, "negative silence length");
        if self.clips.is_empty() {
            let mut clip = WaveClip::new(&self.factory, self.width, self.rate, self.formats);
            clip.set_sequence_start_time(t);
            clip.append_silence(len, None)?;
            self.insert_clip(clip);
            return Ok(());
        }
        self.transaction(|track| {
            for clip in &mut track.clips {
                if clip.within_play_region(t) {
                    clip.insert_silence(t, len)?;
                } else if clip.before_play_region(t) {
                    clip.shift_by(len);
                }
            }
            Ok(())
        })
    }

    /// A new track holding `[t0, t1)` moved to start at zero.
    ///
    /// For the clipboard, cut lines are left behind and a trailing silent
    /// placeholder clip keeps the copied duration when the range ends in a
    /// gap.
    pub fn copy(&self, t0: f64, t1: f64, for_clipboard: bool) -> Result<WaveTrack, TrackError> {
        assert!(t0 <= t1, "inverted range {t0}..{t1}");
        let mut copy = self.empty_copy();
        for clip in &self.clips {
            if clip.is_empty() {
                continue;
            }
            if clip.covers_entire_play_region(t0, t1) {
                let mut whole = clip.duplicate();
                if for_clipboard {
                    whole.take_cut_lines(|_| true);
                }
                whole.shift_by(-t0);
                copy.clips.push(whole);
            } else if clip.intersects_play_region(t0, t1) {
                let mut part = clip.copy_range(t0, t1, !for_clipboard)?;
                if part.sample_count() == 0 {
                    continue;
                }
                part.shift_by(-t0);
                if part.play_start_time() < 0.0 {
                    part.set_play_start_time(0.0);
                }
                copy.clips.push(part);
            }
        }
        copy.sort_clips();

        let one_sample = 1.0 / f64::from(self.rate);
        if for_clipboard && copy.end_time() + one_sample < t1 - t0 {
            let end = copy.end_time();
            let mut placeholder = WaveClip::new(&self.factory, self.width, self.rate, self.formats);
            placeholder.set_placeholder(true);
            placeholder.insert_silence(0.0, (t1 - t0) - end)?;
            placeholder.shift_by(end);
            copy.insert_clip(placeholder);
        }
        Ok(copy)
    }

    /// Insert the contents of `src` at `t0`.
    ///
    /// A lone clip starting at zero is pasted into the clip under `t0`, if
    /// any. Otherwise the clip under `t0` is split and `src`'s clips are
    /// added. Later clips move right to make room, or with immovable clips
    /// the paste fails with [`TrackError::Overlap`] when there is no room.
    pub fn paste(&mut self, t0: f64, src: &WaveTrack, config: &EditConfig) -> Result<(), TrackError> {
        assert_eq!(src.width, self.width, "pasting a track of different width");
        self.check_rate(src)?;
        if src.clips.is_empty() {
            return Ok(());
        }
        self.transaction(|track| track.paste_clips(t0, src, config.edit_clips_can_move))
    }

    fn check_rate(&self, src: &WaveTrack) -> Result<(), TrackError> {
        if src.rate != self.rate {
            return Err(TrackError::IncompatibleClips(format!(
                "source rate {} Hz differs from track rate {} Hz",
                src.rate, self.rate
            )));
        }
        Ok(())
    }

    fn paste_clips(&mut self, t0: f64, src: &WaveTrack, can_move: bool) -> Result<(), TrackError> {
        let t0 = self.snap_to_sample(t0);
        let one_sample = 1.0 / f64::from(self.rate);
        let insert_duration = src.end_time();
        let single = match src.clips.as_slice() {
            [only] if !only.is_placeholder() && only.play_start_time().abs() < 0.5 * one_sample => Some(only),
            _ => None,
        };

        if let Some(only) = single {
            let t0_sample = self.time_to_samples(t0);
            let host = self.clips.iter().position(|c| {
                let at_start = !can_move && self.time_to_samples(c.play_start_time()) == t0_sample;
                (c.within_play_region(t0) || at_start) && c.has_equal_stretch_ratio(only)
            });
            if let Some(index) = host {
                if can_move {
                    self.shift_clips_from(t0, insert_duration, Some(index));
                } else {
                    let host = &self.clips[index];
                    let start = host.play_start_time();
                    let end = host.play_end_time() + insert_duration;
                    let blocked = self
                        .clips
                        .iter()
                        .any(|c| c.play_start_time() > start && end > c.play_start_time());
                    if blocked {
                        return Err(TrackError::Overlap {
                            start: host.play_end_time(),
                            end,
                        });
                    }
                }
                if self.clips[index].paste(t0, only)? {
                    log::debug!("pasted {insert_duration:.6}s into clip at {t0:.6}s");
                    return Ok(());
                }
                if can_move {
                    self.shift_clips_from(t0, -insert_duration, Some(index));
                }
            }
        }

        // No clip took the audio: make a gap at t0 and add src's clips there
        if can_move {
            self.split_at(t0);
            self.shift_clips_from(t0, insert_duration, None);
        } else if !self.is_empty_range(t0, t0 + insert_duration - one_sample) {
            return Err(TrackError::Overlap {
                start: t0,
                end: t0 + insert_duration,
            });
        }
        for clip in src.clips.iter().filter(|c| !c.is_placeholder()) {
            let mut pasted = clip.duplicate();
            pasted.shift_by(t0);
            self.clips.push(pasted);
        }
        self.sort_clips();
        log::debug!("pasted {} clips at {t0:.6}s", src.clips.len());
        Ok(())
    }

    /// Move every clip starting at or after `t0` by `by`, except `skip`.
    fn shift_clips_from(&mut self, t0: f64, by: f64, skip: Option<usize>) {
        let one_sample = 1.0 / f64::from(self.rate);
        for (i, clip) in self.clips.iter_mut().enumerate() {
            if Some(i) != skip && clip.play_start_time() > t0 - one_sample {
                clip.shift_by(by);
            }
        }
    }

    /// Replace `[t0, t1)` with the contents of `src`.
    ///
    /// With `preserve`, clip boundaries, clip names and cut lines that were
    /// inside the range are restored at their warped positions, including
    /// audio hidden by trims at those boundaries. With `merge`, the pasted
    /// audio is fused with clips that end or start within the merge-point
    /// tolerance of it. Without a `warper`, times after `t1` follow the
    /// pasted length when clips can move.
    #[allow(clippy::too_many_arguments)]
    pub fn clear_and_paste(
        &mut self,
        t0: f64,
        t1: f64,
        src: &WaveTrack,
        preserve: bool,
        merge: bool,
        warper: Option<&dyn TimeWarper>,
        config: &EditConfig,
    ) -> Result<(), TrackError> {
        assert!(t0 <= t1, "inverted range {t0}..{t1}");
        assert_eq!(src.width, self.width, "pasting a track of different width");
        self.check_rate(src)?;

        let end_time = src.end_time();
        if (t1 - t0).min(end_time) == 0.0 {
            return self.paste(t0, src, config);
        }

        let t0 = self.snap_to_sample(t0);
        let t1 = self.snap_to_sample(t1);
        let paste_warper = PasteTimeWarper::new(t1, t0 + end_time);
        let warper: &dyn TimeWarper = match warper {
            Some(warper) => warper,
            None if config.edit_clips_can_move => &paste_warper,
            None => &IdentityWarper,
        };
        self.transaction(|track| track.clear_and_paste_clips(t0, t1, src, preserve, merge, warper, config))
    }

    #[allow(clippy::too_many_arguments)]
    fn clear_and_paste_clips(
        &mut self,
        t0: f64,
        t1: f64,
        src: &WaveTrack,
        preserve: bool,
        merge: bool,
        warper: &dyn TimeWarper,
        config: &EditConfig,
    ) -> Result<(), TrackError> {
        let rate = f64::from(self.rate);
        let snap = |t: f64| (t * rate).round() / rate;
        let to_samples = |t: f64| (t * rate).round() as i64;
        let in_range = |t: f64| (t0..=t1).contains(&t);

        let mut splits = Vec::new();
        let mut cuts = Vec::new();
        for clip in &mut self.clips {
            let start = snap(clip.play_start_time());
            if in_range(start) {
                let split = split_info_at(&mut splits, start);
                if clip.trim_left() != 0.0 {
                    let mut hidden = clip.duplicate();
                    hidden.set_trim_left(0.0);
                    hidden.clear_right(clip.play_start_time())?;
                    split.right = Some(hidden);
                }
                split.right_name = Some(clip.name().to_string());
            }

            let end = snap(clip.play_end_time());
            if in_range(end) {
                let split = split_info_at(&mut splits, end);
                if clip.trim_right() != 0.0 {
                    let mut hidden = clip.duplicate();
                    hidden.set_trim_right(0.0);
                    hidden.clear_left(clip.play_end_time())?;
                    split.left = Some(hidden);
                }
                split.left_name = Some(clip.name().to_string());
            }

            cuts.extend(
                clip.take_cut_lines(|pos| in_range(snap(pos)))
                    .into_iter()
                    .map(|(pos, cut)| (snap(pos), cut)),
            );
        }

        self.handle_clear(t0, t1, false, false, config.edit_clips_can_move)?;
        self.paste_clips(t0, src, config.edit_clips_can_move)?;

        if merge && !splits.is_empty() {
            let tolerance = config.merge_point_tolerance;
            let pasted_end = t0 + src.end_time();
            let after = self
                .clips
                .iter()
                .position(|c| (pasted_end - c.play_start_time()).abs() < tolerance);
            if let Some(index) = after {
                if index > 0 && self.clips[index].has_equal_stretch_ratio(&self.clips[index - 1]) {
                    self.merge_one_clip_pair(index - 1, index)?;
                }
            }
            let before = self
                .clips
                .iter()
                .position(|c| (t0 - c.play_end_time()).abs() < tolerance);
            if let Some(index) = before {
                if index + 1 < self.clips.len() && self.clips[index].has_equal_stretch_ratio(&self.clips[index + 1]) {
                    self.merge_one_clip_pair(index, index + 1)?;
                }
            }
        }

        if !preserve {
            return Ok(());
        }

        for split in &splits {
            self.restore_split(snap(warper.warp(split.time)), split)?;
        }

        for split in &splits {
            let at = to_samples(warper.warp(split.time));
            for clip in &mut self.clips {
                if to_samples(clip.play_start_time()) == at {
                    if let Some(name) = &split.right_name {
                        clip.set_name(name.clone());
                        continue;
                    }
                }
                if to_samples(clip.play_end_time()) == at {
                    if let Some(name) = &split.left_name {
                        clip.set_name(name.clone());
                    }
                }
            }
        }

        let mut cuts: Vec<Option<(f64, WaveClip)>> = cuts.into_iter().map(Some).collect();
        for clip in &mut self.clips {
            let (start, end) = (clip.play_start_time(), clip.play_end_time());
            for slot in &mut cuts {
                let Some((pos, _)) = slot else {
                    continue;
                };
                let warped = warper.warp(*pos);
                if !(start..=end).contains(&warped) {
                    continue;
                }
                if let Some((_, mut cut)) = slot.take() {
                    cut.set_sequence_start_time(warped - clip.sequence_start_time());
                    clip.add_cut_line(cut);
                }
            }
        }
        Ok(())
    }

    /// Put a boundary back at `at`, reattaching audio that was hidden there.
    fn restore_split(&mut self, at: f64, split: &SplitInfo) -> Result<(), TrackError> {
        let at_sample = self.time_to_samples(at);
        for index in 0..self.clips.len() {
            let clip = &self.clips[index];
            if clip.splits_play_region(at) {
                let mut left = clip.clone();
                let mut right = clip.duplicate();
                left.clear_right(at)?;
                right.clear_left(at)?;
                if let Some(hidden) = &split.left {
                    attach_right(&mut left, hidden)?;
                }
                if let Some(hidden) = &split.right {
                    attach_left(&mut right, hidden)?;
                }
                self.clips[index] = left;
                self.insert_clip(right);
                return Ok(());
            }

            let starts_here = self.time_to_samples(clip.play_start_time()) == at_sample;
            let ends_here = self.time_to_samples(clip.play_end_time()) == at_sample;
            if starts_here {
                if let Some(hidden) = &split.right {
                    let clip = &mut self.clips[index];
                    let trim = clip.trim_left();
                    let start = clip.sequence_start_time();
                    clip.clear(start, start + trim)?;
                    // Clearing the hidden part moved the clip left
                    clip.shift_by(trim);
                    attach_left(clip, hidden)?;
                    return Ok(());
                }
            }
            if ends_here {
                if let Some(hidden) = &split.left {
                    let clip = &mut self.clips[index];
                    let (end, sequence_end) = (clip.play_end_time(), clip.sequence_end_time());
                    clip.clear(end, sequence_end)?;
                    attach_right(clip, hidden)?;
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn merge_one_clip_pair(&mut self, first: usize, second: usize) -> Result<bool, TrackError> {
        let mut merged = self.clips[first].clone();
        let end = merged.play_end_time();
        if !merged.paste(end, &self.clips[second])? {
            return Ok(false);
        }
        self.clips[first] = merged;
        self.clips.remove(second);
        self.sort_clips();
        Ok(true)
    }

    /// Append clip `second`'s audio to clip `first` and remove `second`.
    /// Indices are positions in [`WaveTrack::clips`].
    pub fn merge_clips(&mut self, first: usize, second: usize, config: &EditConfig) -> Result<(), TrackError> {
        assert!(first != second, "merging a clip with itself");
        assert!(first < self.clips.len() && second < self.clips.len(), "clip index out of range");
        let (a, b) = (&self.clips[first], &self.clips[second]);

        let gap = b.play_start_time() - a.play_end_time();
        if gap.abs() >= config.merge_point_tolerance {
            return Err(TrackError::IncompatibleClips(format!(
                "clips are {gap:.6}s apart, not adjacent"
            )));
        }
        if !a.has_equal_stretch_ratio(b) {
            return Err(TrackError::IncompatibleClips(format!(
                "stretch ratios differ ({} vs {})",
                a.stretch_ratio(),
                b.stretch_ratio()
            )));
        }
        if a.sample_format() != b.sample_format() {
            return Err(TrackError::IncompatibleClips(format!(
                "sample formats differ ({} vs {})",
                a.sample_format(),
                b.sample_format()
            )));
        }

        if !self.merge_one_clip_pair(first, second)? {
            return Err(TrackError::IncompatibleClips("clips cannot be merged".into()));
        }
        Ok(())
    }

    /// Replace every clip intersecting `[t0, t1)` with one clip, filling gaps
    /// with silence. Stretched clips must be rendered first.
    pub fn join(&mut self, t0: f64, t1: f64, progress: &mut dyn ProgressReporter) -> Result<(), TrackError> {
        assert!(t0 <= t1, "inverted range {t0}..{t1}");
        let indices: Vec<usize> = (0..self.clips.len())
            .filter(|&i| self.clips[i].intersects_play_region(t0, t1))
            .collect();
        let Some(&first) = indices.first() else {
            return Ok(());
        };
        if let Some(stretched) = indices
            .iter()
            .map(|&i| &self.clips[i])
            .find(|c| !c.stretch_ratio_equals(1.0))
        {
            return Err(TrackError::IncompatibleClips(format!(
                "clip {:?} is stretched by {}; render it before joining",
                stretched.id(),
                stretched.stretch_ratio()
            )));
        }

        let mut progress = Progress::new(progress);
        let first = &self.clips[first];
        let mut joined = WaveClip::new(&self.factory, self.width, self.rate, first.formats());
        joined.set_sequence_start_time(first.play_start_time());
        joined.set_name(first.name());
        joined.set_color_index(first.color_index());

        let one_sample = 1.0 / f64::from(self.rate);
        let mut t = first.play_start_time();
        for (done, &index) in indices.iter().enumerate() {
            let clip = &self.clips[index];
            let gap = clip.play_start_time() - t;
            if gap > one_sample {
                let envelope = clip.envelope();
                let value = (!envelope.is_empty()).then(|| envelope.value_at(clip.trim_left()));
                joined.append_silence(gap, value)?;
                t += gap;
            }
            joined.paste(t, clip)?;
            t = joined.play_end_time();
            progress.step(done + 1, indices.len())?;
        }

        for &index in indices.iter().rev() {
            self.clips.remove(index);
        }
        log::debug!("joined {} clips into {:?}", indices.len(), joined.id());
        self.insert_clip(joined);
        Ok(())
    }

    /// Split clips in `[t0, t1)` wherever every channel stays silent for at
    /// least the configured minimum duration, removing the silence.
    pub fn disjoin(&mut self, t0: f64, t1: f64, config: &EditConfig) -> Result<(), TrackError> {
        assert!(t0 <= t1, "inverted range {t0}..{t1}");
        let mut regions = Vec::new();
        for clip in &self.clips {
            if clip.play_end_time() < t0 || clip.play_start_time() > t1 {
                continue;
            }
            let (s0, s1) = clip.sample_range(t0, t1);
            let min_len = clip.duration_to_samples(config.min_silence_duration).max(0) as usize;
            let mut detector = SilenceDetector::new(config.silence_threshold, min_len);
            let mut pos = s0;
            while pos < s1 {
                let n = ((s1 - pos) as usize).min(DISJOIN_CHUNK);
                let chunk = clip
                    .sequences()
                    .iter()
                    .map(|s| s.get_floats(pos, n, true))
                    .collect::<Result<Vec<_>, _>>()?;
                let slices: Vec<&[f32]> = chunk.iter().map(Vec::as_slice).collect();
                detector.feed(&slices);
                pos += n as u64;
            }
            for run in detector.finish() {
                let start = clip.samples_to_time((s0 + run.start as u64) as i64);
                let end = clip.samples_to_time((s0 + run.end as u64) as i64);
                regions.push((start, end));
            }
        }

        log::debug!("disjoin found {} silent regions", regions.len());
        self.transaction(|track| {
            for &(start, end) in &regions {
                track.split_delete(start, end)?;
            }
            Ok(())
        })
    }

    /// Whether the clips `moving` could be shifted by `amount` without
    /// overlapping the other clips. See [`clip_ops::can_offset`] for the
    /// meaning of `allowed_amount`.
    pub fn can_offset_clips(&self, moving: &[ClipId], amount: f64, allowed_amount: Option<&mut f64>) -> bool {
        let (moved, fixed): (Vec<&WaveClip>, Vec<&WaveClip>) =
            self.clips.iter().partition(|c| moving.contains(&c.id()));
        clip_ops::can_offset(
            &Self::intervals(fixed.into_iter()),
            &Self::intervals(moved.into_iter()),
            amount,
            allowed_amount,
        )
    }

    pub fn offset_clips(&mut self, moving: &[ClipId], amount: f64) -> Result<(), TrackError> {
        if !self.can_offset_clips(moving, amount, None) {
            let spans = Self::intervals(self.clips.iter().filter(|c| moving.contains(&c.id())));
            let start = spans.iter().map(|i| i.start).fold(f64::INFINITY, f64::min);
            let end = spans.iter().map(|i| i.end).fold(f64::NEG_INFINITY, f64::max);
            return Err(TrackError::Overlap {
                start: start + amount,
                end: end + amount,
            });
        }
        for clip in &mut self.clips {
            if moving.contains(&clip.id()) {
                clip.shift_by(amount);
            }
        }
        self.sort_clips();
        Ok(())
    }

    /// Whether `clip`, moved by `slide_by`, fits on this track after a nudge
    /// of at most `tolerance`. On success `slide_by` holds the offset to use.
    pub fn can_insert_clip(&self, clip: &WaveClip, slide_by: &mut f64, tolerance: f64) -> bool {
        let candidate = Interval::new(clip.play_start_time(), clip.play_end_time());
        let existing = Self::intervals(self.clips.iter());
        match clip_ops::fit_insertion(&existing, candidate, *slide_by, tolerance, |t| self.snap_to_sample(t)) {
            Some(offset) => {
                *slide_by = offset;
                true
            }
            None => false,
        }
    }

    /// Convert every clip's storage to `format`. On cancellation the track
    /// is unchanged.
    pub fn convert_to_sample_format(
        &mut self,
        format: SampleFormat,
        progress: &mut dyn ProgressReporter,
    ) -> Result<(), TrackError> {
        let mut progress = Progress::new(progress);
        let total = self.clips.len() as f64;
        let mut converted = self.clips.clone();
        for (i, clip) in converted.iter_mut().enumerate() {
            let mut sub = progress.sub(i as f64 / total, (i + 1) as f64 / total);
            clip.convert_to_sample_format(format, &mut sub)?;
        }
        self.clips = converted;
        self.formats = self.formats.with_stored(format);
        log::info!("converted track {:?} to {format}", self.id);
        Ok(())
    }

    /// Resample every clip to `rate`. On cancellation the track is
    /// unchanged.
    pub fn resample(
        &mut self,
        rate: u32,
        resampler: &dyn Resampler,
        progress: &mut dyn ProgressReporter,
    ) -> Result<(), TrackError> {
        let mut progress = Progress::new(progress);
        let total = self.clips.len() as f64;
        let mut resampled = self.clips.clone();
        for (i, clip) in resampled.iter_mut().enumerate() {
            let mut sub = progress.sub(i as f64 / total, (i + 1) as f64 / total);
            clip.resample(rate, resampler, &mut sub)?;
        }
        self.clips = resampled;
        self.rate = rate;
        log::info!("resampled track {:?} to {rate} Hz", self.id);
        Ok(())
    }

    /// Render stretched clips (within `range`, if given) to stretch ratio 1.
    /// Clips crossing the range edges are split there first. On cancellation
    /// the track is unchanged.
    pub fn apply_stretch_ratio(
        &mut self,
        range: Option<(f64, f64)>,
        resampler: &dyn Resampler,
        progress: &mut dyn ProgressReporter,
    ) -> Result<(), TrackError> {
        self.transaction(|track| {
            if let Some((t0, t1)) = range {
                for t in [t0, t1] {
                    let stretched = track
                        .clips
                        .iter()
                        .any(|c| c.splits_play_region(t) && !c.stretch_ratio_equals(1.0));
                    if stretched {
                        track.split_at(t);
                    }
                }
            }

            let targets: Vec<usize> = (0..track.clips.len())
                .filter(|&i| {
                    let clip = &track.clips[i];
                    !clip.stretch_ratio_equals(1.0)
                        && range.is_none_or(|(t0, t1)| clip.intersects_play_region(t0, t1))
                })
                .collect();

            let mut progress = Progress::new(progress);
            let total = targets.len() as f64;
            for (done, &index) in targets.iter().enumerate() {
                let mut sub = progress.sub(done as f64 / total, (done + 1) as f64 / total);
                let rendered = track.clips[index].stretch_rendered_copy(resampler, &mut sub)?;
                track.clips[index] = rendered;
            }
            log::debug!("rendered {} stretched clips", targets.len());
            Ok(())
        })
    }

    /// Relabel every clip with `rate` without resampling.
    pub fn set_rate(&mut self, rate: u32) {
        for clip in &mut self.clips {
            clip.set_rate(rate);
        }
        self.rate = rate;
    }

    pub fn rate_consistency_check(&self) -> bool {
        self.clips.iter().all(|c| c.rate() == self.rate)
    }

    pub fn format_consistency_check(&self) -> bool {
        self.clips
            .iter()
            .all(|c| c.sample_format() == self.formats.stored())
    }

    /// Clips are sorted and no two play intervals overlap by half a sample
    /// or more.
    pub fn clips_are_disjoint(&self) -> bool {
        let half_sample = 0.5 / f64::from(self.rate);
        self.clips
            .windows(2)
            .all(|pair| pair[0].play_end_time() - pair[1].play_start_time() < half_sample)
    }

    /// Lazy view of `channel` over `[t0, t1)`, silence between clips.
    pub fn sample_view(&self, channel: usize, t0: f64, t1: f64, may_throw: bool) -> SampleView<'_> {
        self.channel(channel).view(t0, t1, may_throw)
    }
}

impl Clone for WaveTrack {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            clips: self.clips.clone(),
            width: self.width,
            rate: self.rate,
            gain: self.gain,
            pan: self.pan,
            mute: self.mute,
            solo: self.solo,
            formats: self.formats,
            color_index: self.color_index,
            factory: self.factory.clone(),
            append_lock: Mutex::new(()),
            flush_lock: Mutex::new(()),
        }
    }
}

impl fmt::Debug for WaveTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaveTrack")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("width", &self.width)
            .field("rate", &self.rate)
            .field("formats", &self.formats)
            .field("clips", &self.clips)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use daw_clip::ChannelSamples;
    use daw_sample::NoProgress;
    use daw_storage::MemoryBlockFactory;

    const RATE: u32 = 100;

    fn track() -> WaveTrack {
        WaveTrack::new(MemoryBlockFactory::new().into_ptr(), 1, RATE, SampleFormat::Float.into())
    }

    fn clip_at(track: &WaveTrack, start: f64, samples: &[f32]) -> WaveClip {
        let mut clip = WaveClip::new(track.factory(), 1, track.rate(), track.formats());
        clip.append(&[samples], SampleFormat::Float).unwrap();
        clip.flush().unwrap();
        clip.set_sequence_start_time(start);
        clip
    }

    fn add(track: &mut WaveTrack, start: f64, samples: &[f32]) -> ClipId {
        let clip = clip_at(track, start, samples);
        track.add_clip(clip).unwrap()
    }

    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|i| i as f32 / len as f32).collect()
    }

    fn visible(clip: &WaveClip) -> Vec<f32> {
        clip.get_floats(0, 0, clip.visible_sample_count() as usize, true)
            .unwrap()
    }

    fn assert_spans(track: &WaveTrack, expected: &[(f64, f64)]) {
        let spans: Vec<(f64, f64)> = track
            .clips()
            .iter()
            .map(|c| (c.play_start_time(), c.play_end_time()))
            .collect();
        assert_eq!(spans.len(), expected.len(), "spans: {spans:?}");
        for (&(start, end), &(es, ee)) in spans.iter().zip(expected) {
            assert_relative_eq!(start, es, epsilon = 1e-9);
            assert_relative_eq!(end, ee, epsilon = 1e-9);
        }
        assert!(track.clips_are_disjoint());
    }

    /// Nearest-sample resampler; enough to check bookkeeping.
    struct NearestResampler;

    impl Resampler for NearestResampler {
        fn resample(&self, input: &[f32], rate_in: f64, rate_out: f64) -> anyhow::Result<Vec<f32>> {
            let len = daw_sample::output_len(input.len(), rate_in, rate_out);
            Ok((0..len)
                .map(|i| input[((i as f64 * rate_in / rate_out) as usize).min(input.len() - 1)])
                .collect())
        }
    }

    #[test]
    fn test_recorded_audio_view() {
        let mut track = WaveTrack::new(MemoryBlockFactory::new().into_ptr(), 1, 44_100, SampleFormat::Float.into());
        track.rightmost_or_new_clip();
        track.append(&[&[0.0; 100]], SampleFormat::Float).unwrap();
        track.append(&[&[0.5; 100]], SampleFormat::Float).unwrap();
        track.flush().unwrap();

        let view = track.sample_view(0, 0.0, 200.0 / 44_100.0, true);
        assert_eq!(view.sample_count(), 200);
        let samples = view.to_vec().unwrap();
        assert!(samples[..100].iter().all(|&s| s == 0.0));
        assert!(samples[100..].iter().all(|&s| s == 0.5));
    }

    #[test]
    fn test_append_needs_a_clip() {
        let track = track();
        assert!(matches!(
            track.append(&[&[0.0; 4]], SampleFormat::Float),
            Err(TrackError::NoClip)
        ));
    }

    #[test]
    fn test_append_while_flushing() {
        let mut track = track();
        track.rightmost_or_new_clip();
        let track = &track;

        std::thread::scope(|s| {
            s.spawn(|| {
                for i in 0..200 {
                    let chunk = vec![i as f32; 64];
                    track.append(&[&chunk], SampleFormat::Float).unwrap();
                }
            });
            s.spawn(|| {
                for _ in 0..50 {
                    track.flush().unwrap();
                }
            });
        });
        track.flush().unwrap();

        let sequence = track.clips()[0].sequence(0);
        assert_eq!(sequence.sample_count(), 200 * 64);
        assert!(sequence.consistency_check());
        let samples = sequence.get_floats(0, 200 * 64, true).unwrap();
        for (i, chunk) in samples.chunks(64).enumerate() {
            assert!(chunk.iter().all(|&s| s == i as f32), "chunk {i} out of order");
        }
    }

    #[test]
    fn test_can_offset_clips_against_next_clip() {
        let mut track = track();
        let a = add(&mut track, 0.0, &[0.1; 100]);
        add(&mut track, 2.0, &[0.2; 100]);

        assert!(!track.can_offset_clips(&[a], 2.0, None));

        let mut allowed = 0.0;
        assert!(track.can_offset_clips(&[a], 2.0, Some(&mut allowed)));
        assert_relative_eq!(allowed, 1.0, epsilon = 1e-9);

        track.offset_clips(&[a], allowed).unwrap();
        assert_spans(&track, &[(1.0, 2.0), (2.0, 3.0)]);
        assert!(matches!(track.offset_clips(&[a], 0.5), Err(TrackError::Overlap { .. })));
    }

    #[test]
    fn test_merge_adjacent_clips() {
        let mut track = track();
        add(&mut track, 0.0, &[0.1; 100]);
        add(&mut track, 1.0, &[0.2; 50]);
        let before: f64 = track.clips().iter().map(WaveClip::play_duration).sum();

        track.merge_clips(0, 1, &EditConfig::default()).unwrap();

        assert_eq!(track.num_clips(), 1);
        assert_relative_eq!(track.clips()[0].play_duration(), before, epsilon = 1e-9);
        let samples = visible(&track.clips()[0]);
        assert_eq!(samples.len(), 150);
        assert!(samples[..100].iter().all(|&s| s == 0.1));
        assert!(samples[100..].iter().all(|&s| s == 0.2));
    }

    #[test]
    fn test_merge_rejects_gap_and_stretch() {
        let mut track = track();
        add(&mut track, 0.0, &[0.1; 100]);
        add(&mut track, 1.5, &[0.2; 50]);
        assert!(matches!(
            track.merge_clips(0, 1, &EditConfig::default()),
            Err(TrackError::IncompatibleClips(_))
        ));

        let mut track = self::track();
        add(&mut track, 0.0, &[0.1; 100]);
        let mut stretched = clip_at(&track, 1.0, &[0.2; 50]);
        stretched.stretch_by(2.0);
        track.add_clip(stretched).unwrap();
        assert!(matches!(
            track.merge_clips(0, 1, &EditConfig::default()),
            Err(TrackError::IncompatibleClips(_))
        ));
        assert_eq!(track.num_clips(), 2);
    }

    #[test]
    fn test_split_then_join_restores_samples() {
        let mut track = track();
        let samples = ramp(100);
        add(&mut track, 0.5, &samples);

        track.split_at(0.87);
        assert_spans(&track, &[(0.5, 0.87), (0.87, 1.5)]);

        track.join(0.0, 2.0, &mut NoProgress).unwrap();
        assert_spans(&track, &[(0.5, 1.5)]);
        assert_eq!(visible(&track.clips()[0]), samples);
    }

    #[test]
    fn test_join_fills_gaps_with_silence() {
        let mut track = track();
        add(&mut track, 0.0, &[0.5; 10]);
        add(&mut track, 0.2, &[0.25; 10]);

        track.join(0.0, 1.0, &mut NoProgress).unwrap();

        assert_spans(&track, &[(0.0, 0.3)]);
        let samples = visible(&track.clips()[0]);
        assert_eq!(&samples[..10], &[0.5; 10]);
        assert_eq!(&samples[10..20], &[0.0; 10]);
        assert_eq!(&samples[20..], &[0.25; 10]);
    }

    #[test]
    fn test_join_refuses_stretched_clips() {
        let mut track = track();
        let mut clip = clip_at(&track, 0.0, &[0.5; 10]);
        clip.stretch_by(1.5);
        track.add_clip(clip).unwrap();

        let err = track.join(0.0, 1.0, &mut NoProgress).unwrap_err();
        assert!(matches!(err, TrackError::IncompatibleClips(_)));
    }

    #[test]
    fn test_join_cancelled_leaves_track() {
        let mut track = track();
        add(&mut track, 0.0, &[0.5; 10]);
        add(&mut track, 0.2, &[0.25; 10]);

        let mut cancel = |_: f64| false;
        let err = track.join(0.0, 1.0, &mut cancel).unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(track.num_clips(), 2);
    }

    #[test]
    fn test_clear_moves_later_clips() {
        let mut track = track();
        add(&mut track, 0.0, &ramp(100));
        add(&mut track, 2.0, &[0.5; 100]);

        track.clear(0.5, 1.5, &EditConfig::default()).unwrap();
        assert_spans(&track, &[(0.0, 0.5), (1.0, 2.0)]);

        let mut fixed = self::track();
        add(&mut fixed, 0.0, &ramp(100));
        add(&mut fixed, 2.0, &[0.5; 100]);
        let config = EditConfig {
            edit_clips_can_move: false,
            ..EditConfig::default()
        };
        fixed.clear(0.5, 1.5, &config).unwrap();
        assert_spans(&fixed, &[(0.0, 0.5), (2.0, 3.0)]);
    }

    #[test]
    fn test_clear_inside_clip_closes_gap() {
        let mut track = track();
        let samples = ramp(100);
        add(&mut track, 0.0, &samples);

        track.clear(0.25, 0.5, &EditConfig::default()).unwrap();

        assert_spans(&track, &[(0.0, 0.75)]);
        let read = visible(&track.clips()[0]);
        assert_eq!(read[24], samples[24]);
        assert_eq!(read[25], samples[50]);
    }

    #[test]
    fn test_split_cut_leaves_gap() {
        let mut track = track();
        let samples = ramp(100);
        add(&mut track, 0.0, &samples);

        let removed = track.split_cut(0.25, 0.5).unwrap();

        assert_spans(&track, &[(0.0, 0.25), (0.5, 1.0)]);
        assert_spans(&removed, &[(0.0, 0.25)]);
        assert_eq!(visible(&removed.clips()[0]), samples[25..50]);
        assert_eq!(visible(&track.clips()[1]), samples[50..]);
    }

    #[test]
    fn test_cut_closes_gap() {
        let mut track = track();
        add(&mut track, 0.0, &ramp(100));
        add(&mut track, 1.5, &[0.5; 10]);

        let removed = track.cut(0.25, 0.5, &EditConfig::default()).unwrap();

        assert_spans(&removed, &[(0.0, 0.25)]);
        assert_spans(&track, &[(0.0, 0.75), (1.25, 1.35)]);
    }

    #[test]
    fn test_clear_and_add_cut_line() {
        let mut track = track();
        add(&mut track, 0.0, &ramp(100));

        track.clear_and_add_cut_line(0.25, 0.5, &EditConfig::default()).unwrap();

        let clip = &track.clips()[0];
        assert_eq!(clip.num_cut_lines(), 1);
        let (start, end) = clip.find_cut_line(0.25).unwrap();
        assert_relative_eq!(start, 0.25, epsilon = 1e-9);
        assert_relative_eq!(end, 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_trim_keeps_range() {
        let mut track = track();
        add(&mut track, 0.0, &[0.1; 100]);
        add(&mut track, 2.0, &[0.2; 100]);
        add(&mut track, 4.0, &[0.3; 100]);

        track.trim(0.5, 2.5);
        assert_spans(&track, &[(0.5, 1.0), (2.0, 2.5)]);
    }

    #[test]
    fn test_silence_range() {
        let mut track = track();
        add(&mut track, 0.0, &[0.5; 100]);

        track.silence(0.2, 0.4).unwrap();

        let read = visible(&track.clips()[0]);
        assert_eq!(read.len(), 100);
        assert_eq!(read[19], 0.5);
        assert!(read[20..40].iter().all(|&s| s == 0.0));
        assert_eq!(read[40], 0.5);
    }

    #[test]
    fn test_insert_silence_moves_later_clips() {
        let mut track = track();
        add(&mut track, 0.0, &[0.5; 100]);
        add(&mut track, 2.0, &[0.5; 100]);

        track.insert_silence(0.5, 0.25).unwrap();
        assert_spans(&track, &[(0.0, 1.25), (2.25, 3.25)]);

        let mut empty = self::track();
        empty.insert_silence(1.0, 0.5).unwrap();
        assert_spans(&empty, &[(1.0, 1.5)]);
    }

    #[test]
    fn test_copy_for_clipboard_keeps_trailing_gap() {
        let mut track = track();
        add(&mut track, 0.0, &[0.5; 100]);

        let copy = track.copy(0.5, 2.0, true).unwrap();
        assert_eq!(copy.num_clips(), 2);
        assert!(copy.clips()[1].is_placeholder());
        assert_relative_eq!(copy.end_time(), 1.5, epsilon = 1e-9);

        let mut target = self::track();
        target.paste(1.0, &copy, &EditConfig::default()).unwrap();
        assert_spans(&target, &[(1.0, 1.5)]);
    }

    #[test]
    fn test_paste_single_clip_into_host() {
        let mut track = track();
        add(&mut track, 0.0, &[0.1; 100]);
        add(&mut track, 2.0, &[0.2; 100]);
        let mut src = track.empty_copy();
        add(&mut src, 0.0, &[0.9; 10]);

        track.paste(0.5, &src, &EditConfig::default()).unwrap();

        assert_spans(&track, &[(0.0, 1.1), (2.1, 3.1)]);
        let read = visible(&track.clips()[0]);
        assert_eq!(read[49], 0.1);
        assert!(read[50..60].iter().all(|&s| s == 0.9));
        assert_eq!(read[60], 0.1);
    }

    #[test]
    fn test_paste_multiple_clips_splits_host() {
        let mut track = track();
        add(&mut track, 0.0, &[0.1; 100]);
        add(&mut track, 2.0, &[0.2; 100]);
        let mut src = track.empty_copy();
        add(&mut src, 0.2, &[0.9; 10]);

        track.paste(0.5, &src, &EditConfig::default()).unwrap();

        assert_spans(&track, &[(0.0, 0.5), (0.7, 0.8), (0.8, 1.3), (2.3, 3.3)]);
    }

    #[test]
    fn test_paste_without_room_fails() {
        let mut track = track();
        add(&mut track, 0.0, &[0.1; 100]);
        add(&mut track, 1.05, &[0.2; 100]);
        let mut src = track.empty_copy();
        add(&mut src, 0.0, &[0.9; 10]);
        let config = EditConfig {
            edit_clips_can_move: false,
            ..EditConfig::default()
        };

        let err = track.paste(0.5, &src, &config).unwrap_err();
        assert!(matches!(err, TrackError::Overlap { .. }));
        assert_spans(&track, &[(0.0, 1.0), (1.05, 2.05)]);
    }

    fn stretched_source(track: &WaveTrack) -> WaveTrack {
        let mut src = track.empty_copy();
        let mut clip = clip_at(&src, 0.0, &[0.9; 10]);
        clip.stretch_by(2.0);
        src.add_clip(clip).unwrap();
        src
    }

    #[test]
    fn test_paste_stretched_clip_splits_unstretched_host() {
        let mut track = track();
        add(&mut track, 0.0, &[0.1; 100]);
        add(&mut track, 2.0, &[0.2; 100]);
        let src = stretched_source(&track);

        track.paste(0.5, &src, &EditConfig::default()).unwrap();

        assert_spans(&track, &[(0.0, 0.5), (0.5, 0.7), (0.7, 1.2), (2.2, 3.2)]);
        assert_relative_eq!(track.clips()[1].stretch_ratio(), 2.0);
        assert_relative_eq!(track.clips()[2].stretch_ratio(), 1.0);
    }

    #[test]
    fn test_paste_stretched_clip_with_immovable_clips() {
        let mut track = track();
        add(&mut track, 0.0, &[0.1; 100]);
        add(&mut track, 2.0, &[0.2; 100]);
        let src = stretched_source(&track);
        let config = EditConfig {
            edit_clips_can_move: false,
            ..EditConfig::default()
        };

        let err = track.paste(0.5, &src, &config).unwrap_err();
        assert!(matches!(err, TrackError::Overlap { .. }));
        assert_spans(&track, &[(0.0, 1.0), (2.0, 3.0)]);

        track.paste(1.2, &src, &config).unwrap();
        assert_spans(&track, &[(0.0, 1.0), (1.2, 1.4), (2.0, 3.0)]);
    }

    #[test]
    fn test_paste_at_host_start_keeps_host_in_place() {
        let mut track = track();
        add(&mut track, 0.0, &[0.1; 100]);
        add(&mut track, 2.0, &[0.2; 100]);
        let mut src = track.empty_copy();
        add(&mut src, 0.0, &[0.9; 10]);

        track.paste(2.0, &src, &EditConfig::default()).unwrap();

        assert_spans(&track, &[(0.0, 1.0), (2.0, 3.1)]);
        let read = visible(&track.clips()[1]);
        assert!(read[..10].iter().all(|&s| s == 0.9));
        assert_eq!(read[10], 0.2);
    }

    #[test]
    fn test_clear_and_paste_merges_boundaries() {
        let mut track = track();
        add(&mut track, 0.0, &[0.1; 100]);
        add(&mut track, 1.0, &[0.2; 100]);
        let mut src = track.empty_copy();
        add(&mut src, 0.0, &[0.9; 100]);

        track
            .clear_and_paste(0.5, 1.5, &src, false, true, None, &EditConfig::default())
            .unwrap();

        assert_spans(&track, &[(0.0, 2.0)]);
        let read = visible(&track.clips()[0]);
        assert!(read[..50].iter().all(|&s| s == 0.1));
        assert!(read[50..150].iter().all(|&s| s == 0.9));
        assert!(read[150..].iter().all(|&s| s == 0.2));
    }

    #[test]
    fn test_clear_and_paste_preserves_split_and_names() {
        let mut track = track();
        let mut a = clip_at(&track, 0.0, &[0.1; 100]);
        a.set_name("a");
        let mut b = clip_at(&track, 1.0, &[0.2; 100]);
        b.set_name("b");
        track.add_clip(a).unwrap();
        track.add_clip(b).unwrap();
        let mut src = track.empty_copy();
        add(&mut src, 0.0, &[0.9; 100]);

        track
            .clear_and_paste(0.5, 1.5, &src, true, false, None, &EditConfig::default())
            .unwrap();

        assert_spans(&track, &[(0.0, 0.5), (0.5, 1.0), (1.0, 1.5), (1.5, 2.0)]);
        assert_eq!(track.clips()[1].name(), "a");
        assert_eq!(track.clips()[2].name(), "b");
    }

    #[test]
    fn test_clear_and_paste_restores_hidden_audio() {
        let mut track = track();
        let samples = ramp(100);
        let mut clip = clip_at(&track, 0.0, &samples);
        clip.set_trim_right(0.5);
        track.add_clip(clip).unwrap();
        add(&mut track, 1.0, &[0.5; 100]);
        let mut src = track.empty_copy();
        add(&mut src, 0.0, &[0.9; 50]);

        // The trimmed clip ends at 0.5, inside the replaced range
        track
            .clear_and_paste(0.25, 0.75, &src, true, false, None, &EditConfig::default())
            .unwrap();

        assert_spans(&track, &[(0.0, 0.25), (0.25, 0.5), (0.5, 0.75), (1.0, 2.0)]);
        let restored = &track.clips()[1];
        assert_relative_eq!(restored.trim_right(), 0.5, epsilon = 1e-9);
        let hidden = restored.sequence(0).get_floats(25, 50, true).unwrap();
        assert_eq!(hidden, samples[50..]);
    }

    #[test]
    fn test_disjoin_removes_silence() {
        let mut track = track();
        let mut samples = vec![0.5; 30];
        samples.extend([0.0; 30]);
        samples.extend([0.5; 40]);
        add(&mut track, 0.0, &samples);
        let config = EditConfig {
            min_silence_duration: 0.1,
            ..EditConfig::default()
        };

        track.disjoin(0.0, 1.0, &config).unwrap();
        assert_spans(&track, &[(0.0, 0.3), (0.6, 1.0)]);
    }

    #[test]
    fn test_disjoin_measures_silence_in_timeline_seconds() {
        let mut track = track();
        let mut samples = vec![0.5; 30];
        samples.extend([0.0; 15]);
        samples.extend([0.5; 20]);
        let mut clip = clip_at(&track, 0.0, &samples);
        clip.stretch_by(2.0);
        track.add_clip(clip).unwrap();
        let config = EditConfig {
            min_silence_duration: 0.25,
            ..EditConfig::default()
        };

        // 15 samples at stretch 2 last 0.3s
        track.disjoin(0.0, 1.3, &config).unwrap();
        assert_spans(&track, &[(0.0, 0.6), (0.9, 1.3)]);
    }

    #[test]
    fn test_can_insert_clip_nudges() {
        let mut track = track();
        add(&mut track, 0.0, &[0.5; 100]);
        let candidate = clip_at(&track, 0.99, &[0.5; 10]);

        let mut slide = 0.0;
        assert!(track.can_insert_clip(&candidate, &mut slide, 0.02));
        assert_relative_eq!(slide, 0.01, epsilon = 1e-9);

        let mut slide = 0.0;
        assert!(!track.can_insert_clip(&candidate, &mut slide, 0.001));
    }

    #[test]
    fn test_create_wide_clip_rejects_overlap() {
        let mut track = track();
        add(&mut track, 0.0, &[0.5; 100]);
        assert!(matches!(
            track.create_wide_clip(0.5, "inside"),
            Err(TrackError::Overlap { .. })
        ));
        let id = track.create_wide_clip(1.0, "after").unwrap();
        assert_eq!(track.clip(id).unwrap().name(), "after");
        assert!(matches!(
            track.add_clip(clip_at(&track, 0.5, &[0.1; 10])),
            Err(TrackError::Overlap { .. })
        ));
    }

    #[test]
    fn test_convert_and_resample_keep_consistency() {
        let mut track = track();
        add(&mut track, 0.0, &ramp(100));
        add(&mut track, 2.0, &ramp(50));

        let mut cancel = |_: f64| false;
        assert!(track.convert_to_sample_format(SampleFormat::Int16, &mut cancel).unwrap_err().is_cancelled());
        assert_eq!(track.sample_format(), SampleFormat::Float);
        assert!(track.format_consistency_check());

        track.convert_to_sample_format(SampleFormat::Int16, &mut NoProgress).unwrap();
        assert_eq!(track.sample_format(), SampleFormat::Int16);
        assert!(track.format_consistency_check());

        track.resample(200, &NearestResampler, &mut NoProgress).unwrap();
        assert_eq!(track.rate(), 200);
        assert!(track.rate_consistency_check());
        assert_spans(&track, &[(0.0, 1.0), (2.0, 2.5)]);
    }

    #[test]
    fn test_apply_stretch_ratio() {
        let mut track = track();
        let mut clip = clip_at(&track, 1.0, &ramp(50));
        clip.stretch_by(2.0);
        track.add_clip(clip).unwrap();

        track.apply_stretch_ratio(None, &NearestResampler, &mut NoProgress).unwrap();

        let clip = &track.clips()[0];
        assert!(clip.stretch_ratio_equals(1.0));
        assert_eq!(clip.sample_count(), 100);
        assert_spans(&track, &[(1.0, 2.0)]);
    }

    #[test]
    fn test_channel_reads_fill_gaps() {
        let mut track = track();
        add(&mut track, 0.1, &[0.5; 10]);

        let mut out = [1.0; 30];
        let within = track.channel(0).get_floats(0, &mut out, true).unwrap();

        assert_eq!(within, 10);
        assert!(out[..10].iter().all(|&s| s == 0.0));
        assert!(out[10..20].iter().all(|&s| s == 0.5));
        assert!(out[20..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_edits_keep_clips_disjoint() {
        let mut track = track();
        let config = EditConfig::default();
        add(&mut track, 0.0, &ramp(100));
        add(&mut track, 1.5, &ramp(100));
        add(&mut track, 3.0, &ramp(100));

        track.split(0.3, 1.7);
        track.clear(0.2, 0.4, &config).unwrap();
        let removed = track.cut(1.0, 1.6, &config).unwrap();
        track.paste(0.9, &removed, &config).unwrap();
        track.join(1.0, 2.0, &mut NoProgress).unwrap();
        track.insert_silence(0.05, 0.1).unwrap();
        track.split_delete(2.5, 2.7).unwrap();
        track.trim(0.0, 3.5);

        assert!(track.clips_are_disjoint());
        assert!(track.clips().iter().all(WaveClip::equal_sequence_length_invariant));
    }
}
