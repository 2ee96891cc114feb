use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvPoint {
    pub t: f64,
    pub value: f64,
}

/// Piecewise-linear gain curve over clip-relative time.
///
/// Times are seconds from the clip's sequence start. Before the first point
/// the curve holds the first value, after the last point the last value, and
/// with no points it is flat at the default value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    points: Vec<EnvPoint>,
    default_value: f64,
    min: f64,
    max: f64,
}

impl Envelope {
    pub fn new(default_value: f64, min: f64, max: f64) -> Self {
        assert!(min <= max, "envelope range {min}..{max} is inverted");
        Self {
            points: Vec::new(),
            default_value: default_value.clamp(min, max),
            min,
            max,
        }
    }

    /// Unity-gain clip envelope.
    pub fn gain() -> Self {
        Self::new(1.0, 1e-7, 2.0)
    }

    pub fn points(&self) -> &[EnvPoint] {
        &self.points
    }

    pub fn default_value(&self) -> f64 {
        self.default_value
    }

    pub fn range(&self) -> (f64, f64) {
        (self.min, self.max)
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Whether every point sits at the default value.
    pub fn is_trivial(&self) -> bool {
        self.points.iter().all(|p| p.value == self.default_value)
    }

    /// Replace all points. Values are clamped and points sorted by time.
    pub fn set_points(&mut self, points: impl IntoIterator<Item = EnvPoint>) {
        self.points = points
            .into_iter()
            .map(|p| EnvPoint {
                t: p.t,
                value: p.value.clamp(self.min, self.max),
            })
            .collect();
        self.points.sort_by(|a, b| a.t.total_cmp(&b.t));
    }

    /// Set the value at `t`, replacing a point already there.
    pub fn insert_or_replace(&mut self, t: f64, value: f64) -> usize {
        let value = value.clamp(self.min, self.max);
        let index = self.points.partition_point(|p| p.t < t);
        match self.points.get_mut(index) {
            Some(p) if p.t == t => p.value = value,
            _ => self.points.insert(index, EnvPoint { t, value }),
        }
        index
    }

    pub fn remove_point(&mut self, index: usize) -> EnvPoint {
        self.points.remove(index)
    }

    pub fn value_at(&self, t: f64) -> f64 {
        let Some(first) = self.points.first() else {
            return self.default_value;
        };
        let index = self.points.partition_point(|p| p.t <= t);
        if index == 0 {
            return first.value;
        }
        let before = self.points[index - 1];
        match self.points.get(index) {
            None => before.value,
            Some(after) => {
                let span = after.t - before.t;
                if span <= 0.0 {
                    return after.value;
                }
                let frac = (t - before.t) / span;
                before.value + (after.value - before.value) * frac
            }
        }
    }

    /// Fill `out` with values at `t0`, `t0 + dt`, ...
    pub fn values(&self, out: &mut [f64], t0: f64, dt: f64) {
        for (i, v) in out.iter_mut().enumerate() {
            *v = self.value_at(t0 + dt * i as f64);
        }
    }

    pub fn shift(&mut self, dt: f64) {
        for p in &mut self.points {
            p.t += dt;
        }
    }

    pub fn rescale_times(&mut self, ratio: f64) {
        for p in &mut self.points {
            p.t *= ratio;
        }
    }

    /// Remove `[t0, t1)` and close the gap, keeping the value at `t0`.
    pub fn collapse_region(&mut self, t0: f64, t1: f64) {
        if self.points.is_empty() || t1 <= t0 {
            return;
        }
        let kept = self.value_at(t0);
        let len = t1 - t0;
        self.points.retain(|p| p.t < t0 || p.t >= t1);
        for p in self.points.iter_mut().filter(|p| p.t >= t1) {
            p.t -= len;
        }
        if self.value_at(t0) != kept {
            self.insert_or_replace(t0, kept);
        }
    }

    /// Open a gap of `len` at `t`, holding the value at `t` across it.
    pub fn expand_region(&mut self, t: f64, len: f64) {
        if self.points.is_empty() || len <= 0.0 {
            return;
        }
        let held = self.value_at(t);
        for p in self.points.iter_mut().filter(|p| p.t >= t) {
            p.t += len;
        }
        self.insert_or_replace(t, held);
        self.insert_or_replace(t + len, held);
    }

    /// Insert `other`, which spans `len` seconds from its own zero, at `t`.
    pub fn paste(&mut self, t: f64, other: &Envelope, len: f64) {
        if self.points.is_empty() && other.is_trivial() {
            return;
        }
        self.expand_region(t, len);
        if self.points.is_empty() {
            // A flat curve needs anchors so the pasted region stays local
            self.insert_or_replace(t, self.default_value);
            self.insert_or_replace(t + len, self.default_value);
        }
        if other.points.is_empty() {
            self.insert_or_replace(t, other.default_value);
            self.insert_or_replace(t + len, other.default_value);
            return;
        }
        for p in other.points.iter().filter(|p| (0.0..=len).contains(&p.t)) {
            self.insert_or_replace(t + p.t, p.value);
        }
    }

    /// The part of the curve in `[t0, t1]`, re-based to start at zero.
    pub fn restricted(&self, t0: f64, t1: f64) -> Envelope {
        let mut out = Envelope {
            points: Vec::new(),
            ..self.clone()
        };
        if self.points.is_empty() {
            return out;
        }
        out.points.push(EnvPoint {
            t: 0.0,
            value: self.value_at(t0),
        });
        out.points.extend(
            self.points
                .iter()
                .filter(|p| p.t > t0 && p.t < t1)
                .map(|p| EnvPoint {
                    t: p.t - t0,
                    value: p.value,
                }),
        );
        out.points.push(EnvPoint {
            t: t1 - t0,
            value: self.value_at(t1),
        });
        out
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self::gain()
    }
}
