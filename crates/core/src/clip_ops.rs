//! Pure functions for clip placement decisions, designed to be testable
//! without building clips or sample storage.

use std::ops::Range;

/// A clip's play interval `[start, end)` in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub start: f64,
    pub end: f64,
}

impl Interval {
    pub fn new(start: f64, end: f64) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn shifted(self, by: f64) -> Self {
        Self::new(self.start + by, self.end + by)
    }

    pub fn intersects(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Length of the intersection, zero if disjoint.
    pub fn overlap(&self, other: &Interval) -> f64 {
        (self.end.min(other.end) - self.start.max(other.start)).max(0.0)
    }
}

/// Whether `moving` can be shifted by `amount` without hitting any of
/// `fixed`.
///
/// With `allowed_amount`, an infeasible shift is shortened to the largest
/// feasible one of the same sign, which is written back. If even that
/// collides, `allowed_amount` is set to zero and the result is `false`.
pub fn can_offset(
    fixed: &[Interval],
    moving: &[Interval],
    amount: f64,
    allowed_amount: Option<&mut f64>,
) -> bool {
    let collides = |fixed: &Interval, amount: f64| {
        moving.iter().any(|m| fixed.intersects(&m.shifted(amount)))
    };

    let Some(allowed) = allowed_amount else {
        return !fixed.iter().any(|f| collides(f, amount));
    };

    *allowed = amount;
    for f in fixed {
        for m in moving {
            if !f.intersects(&m.shifted(amount)) {
                continue;
            }
            if amount > 0.0 {
                *allowed = allowed.min(f.start - m.end).max(0.0);
            } else {
                *allowed = allowed.max(f.end - m.start).min(0.0);
            }
        }
    }

    if *allowed == amount {
        return true;
    }
    // Shortening against one clip can run into another
    if fixed.iter().any(|f| collides(f, *allowed)) {
        *allowed = 0.0;
        return false;
    }
    true
}

/// Offset to apply to `candidate` (beyond its current position) so it fits
/// among `existing`, nudging it by at most `tolerance` away from the clip it
/// overlaps most. `slide_by` is the offset the caller intends; `snap` moves
/// times onto the sample grid.
pub fn fit_insertion(
    existing: &[Interval],
    candidate: Interval,
    slide_by: f64,
    tolerance: f64,
    snap: impl Fn(f64) -> f64,
) -> Option<f64> {
    let placed = |offset: f64| Interval::new(snap(candidate.start + offset), snap(candidate.end + offset));

    let target = placed(slide_by);
    let Some((worst, overlap)) = existing
        .iter()
        .map(|e| (e, e.overlap(&target)))
        .max_by(|a, b| a.1.total_cmp(&b.1))
    else {
        return Some(slide_by);
    };
    if overlap > tolerance {
        return None;
    }

    let direction = if worst.start < target.start { 1.0 } else { -1.0 };
    let required = slide_by + overlap * direction;
    let moved = placed(required);
    if existing.iter().any(|e| e.intersects(&moved)) {
        return None;
    }
    Some(required)
}

/// Finds runs of silence across channels.
///
/// Samples are fed in chunks; a position is silent when every channel's
/// magnitude is at or below the threshold there. Runs shorter than the
/// minimum length are ignored.
#[derive(Debug, Clone)]
pub struct SilenceDetector {
    threshold: f32,
    min_len: usize,
    pos: usize,
    run_start: Option<usize>,
    runs: Vec<Range<usize>>,
}

impl SilenceDetector {
    pub fn new(threshold: f32, min_len: usize) -> Self {
        Self {
            threshold,
            min_len: min_len.max(1),
            pos: 0,
            run_start: None,
            runs: Vec::new(),
        }
    }

    /// Feed the next chunk: one equally long slice per channel.
    pub fn feed(&mut self, channels: &[&[f32]]) {
        let len = channels.first().map_or(0, |c| c.len());
        debug_assert!(channels.iter().all(|c| c.len() == len));
        for i in 0..len {
            let silent = channels.iter().all(|c| c[i].abs() <= self.threshold);
            let at = self.pos + i;
            match (silent, self.run_start) {
                (true, None) => self.run_start = Some(at),
                (false, Some(start)) => {
                    self.close_run(start, at);
                    self.run_start = None;
                }
                _ => {}
            }
        }
        self.pos += len;
    }

    fn close_run(&mut self, start: usize, end: usize) {
        if end - start >= self.min_len {
            self.runs.push(start..end);
        }
    }

    /// Silent runs in sample positions relative to the first fed sample.
    pub fn finish(mut self) -> Vec<Range<usize>> {
        if let Some(start) = self.run_start.take() {
            self.close_run(start, self.pos);
        }
        self.runs
    }
}
