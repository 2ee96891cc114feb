//! Time warps: monotonic maps from old timeline positions to new ones, used
//! to relocate split points and cut lines after an edit changes timing.

pub trait TimeWarper {
    fn warp(&self, t: f64) -> f64;
}

impl<F> TimeWarper for F
where
    F: Fn(f64) -> f64,
{
    fn warp(&self, t: f64) -> f64 {
        self(t)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityWarper;

impl TimeWarper for IdentityWarper {
    fn warp(&self, t: f64) -> f64 {
        t
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ShiftWarper {
    pub shift: f64,
}

impl TimeWarper for ShiftWarper {
    fn warp(&self, t: f64) -> f64 {
        t + self.shift
    }
}

/// Maps `old_start -> new_start` and `old_end -> new_end` linearly.
#[derive(Debug, Clone, Copy)]
pub struct LinearWarper {
    scale: f64,
    offset: f64,
}

impl LinearWarper {
    pub fn new(old_start: f64, new_start: f64, old_end: f64, new_end: f64) -> Self {
        assert!(old_end > old_start, "empty source range");
        let scale = (new_end - new_start) / (old_end - old_start);
        Self {
            scale,
            offset: new_start - scale * old_start,
        }
    }
}

impl TimeWarper for LinearWarper {
    fn warp(&self, t: f64) -> f64 {
        t * self.scale + self.offset
    }
}

/// Replacing `[t0, old_t1)` with audio ending at `new_t1` leaves earlier
/// times alone and moves later ones by the change in length.
#[derive(Debug, Clone, Copy)]
pub struct PasteTimeWarper {
    old_t1: f64,
    new_t1: f64,
}

impl PasteTimeWarper {
    pub fn new(old_t1: f64, new_t1: f64) -> Self {
        Self { old_t1, new_t1 }
    }
}

impl TimeWarper for PasteTimeWarper {
    fn warp(&self, t: f64) -> f64 {
        if t < self.old_t1 {
            t
        } else {
            self.new_t1 + (t - self.old_t1)
        }
    }
}
