/// Receives progress of a long-running operation as a fraction in `[0, 1]`.
/// Returning `false` requests cancellation.
pub trait ProgressReporter {
    fn report(&mut self, fraction: f64) -> bool;
}

impl<F> ProgressReporter for F
where
    F: FnMut(f64) -> bool,
{
    fn report(&mut self, fraction: f64) -> bool {
        self(fraction)
    }
}

/// Reporter for callers that do not track progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&mut self, _fraction: f64) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Maps the progress of one step of a multi-step operation onto the overall
/// range and keeps reported fractions non-decreasing.
pub struct Progress<'a> {
    reporter: &'a mut dyn ProgressReporter,
    last: f64,
}

impl<'a> Progress<'a> {
    pub fn new(reporter: &'a mut dyn ProgressReporter) -> Self {
        Self { reporter, last: 0.0 }
    }

    /// Report `done / total` of the whole operation.
    pub fn step(&mut self, done: usize, total: usize) -> Result<(), Cancelled> {
        let fraction = if total == 0 { 1.0 } else { done as f64 / total as f64 };
        self.report(fraction)
    }

    pub fn report(&mut self, fraction: f64) -> Result<(), Cancelled> {
        let fraction = fraction.clamp(self.last, 1.0);
        self.last = fraction;
        if self.reporter.report(fraction) {
            Ok(())
        } else {
            log::debug!("operation cancelled at {:.0}%", fraction * 100.0);
            Err(Cancelled)
        }
    }

    /// Reporter for the sub-range `[start, end)` of this operation.
    pub fn sub(&mut self, start: f64, end: f64) -> SubProgress<'_, 'a> {
        SubProgress {
            parent: self,
            start,
            end,
        }
    }
}

/// A slice of a parent [`Progress`], usable wherever a reporter is expected.
pub struct SubProgress<'p, 'a> {
    parent: &'p mut Progress<'a>,
    start: f64,
    end: f64,
}

impl ProgressReporter for SubProgress<'_, '_> {
    fn report(&mut self, fraction: f64) -> bool {
        let overall = self.start + (self.end - self.start) * fraction.clamp(0.0, 1.0);
        self.parent.report(overall).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_reporter_cancels() {
        let mut seen = Vec::new();
        let mut reporter = |f: f64| {
            seen.push(f);
            f < 0.5
        };
        let mut progress = Progress::new(&mut reporter);

        assert!(progress.step(1, 4).is_ok());
        assert_eq!(progress.step(2, 4), Err(Cancelled));
        assert_eq!(seen, vec![0.25, 0.5]);
    }

    #[test]
    fn test_fractions_never_decrease() {
        let mut seen = Vec::new();
        let mut reporter = |f: f64| {
            seen.push(f);
            true
        };
        let mut progress = Progress::new(&mut reporter);
        progress.report(0.6).unwrap();
        progress.report(0.3).unwrap();
        progress.report(2.0).unwrap();
        assert_eq!(seen, vec![0.6, 0.6, 1.0]);
    }

    #[test]
    fn test_sub_progress_maps_into_range() {
        let mut seen = Vec::new();
        let mut reporter = |f: f64| {
            seen.push(f);
            true
        };
        let mut progress = Progress::new(&mut reporter);
        {
            let mut half = progress.sub(0.5, 1.0);
            assert!(half.report(0.5));
        }
        assert_eq!(seen, vec![0.75]);
    }

    #[test]
    fn test_empty_operation_reports_done() {
        let mut progress_reporter = NoProgress;
        let mut progress = Progress::new(&mut progress_reporter);
        assert!(progress.step(0, 0).is_ok());
    }
}
