use crate::error::ClipError;
use daw_storage::Sequence;

#[derive(Debug, Clone)]
enum Segment<'a> {
    Samples {
        sequence: &'a Sequence,
        start: u64,
        len: usize,
    },
    Silence(usize),
}

impl Segment<'_> {
    fn len(&self) -> usize {
        match self {
            Segment::Samples { len, .. } => *len,
            Segment::Silence(len) => *len,
        }
    }
}

/// Lazy view over a run of samples, possibly spanning several clips with
/// silence between them. Nothing is read until [`SampleView::copy`] is
/// called; the sample count is known up front.
#[derive(Debug, Clone, Default)]
pub struct SampleView<'a> {
    segments: Vec<Segment<'a>>,
    len: usize,
    may_throw: bool,
}

impl<'a> SampleView<'a> {
    pub fn new(may_throw: bool) -> Self {
        Self {
            segments: Vec::new(),
            len: 0,
            may_throw,
        }
    }

    pub fn of_sequence(sequence: &'a Sequence, start: u64, len: usize, may_throw: bool) -> Self {
        let mut view = Self::new(may_throw);
        view.push_samples(sequence, start, len);
        view
    }

    pub fn push_samples(&mut self, sequence: &'a Sequence, start: u64, len: usize) {
        if len > 0 {
            self.segments.push(Segment::Samples {
                sequence,
                start,
                len,
            });
            self.len += len;
        }
    }

    pub fn push_silence(&mut self, len: usize) {
        if len > 0 {
            self.segments.push(Segment::Silence(len));
            self.len += len;
        }
    }

    pub fn sample_count(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy the view from `offset` into `out`, up to the end of the view.
    /// Returns how many samples were copied.
    pub fn copy(&self, offset: usize, out: &mut [f32]) -> Result<usize, ClipError> {
        let wanted = out.len().min(self.len.saturating_sub(offset));
        let mut skip = offset;
        let mut written = 0;
        for segment in &self.segments {
            if written == wanted {
                break;
            }
            let seg_len = segment.len();
            if skip >= seg_len {
                skip -= seg_len;
                continue;
            }
            let n = (seg_len - skip).min(wanted - written);
            let dest = &mut out[written..written + n];
            match segment {
                Segment::Samples { sequence, start, .. } => {
                    sequence.read_floats(start + skip as u64, dest, self.may_throw)?;
                }
                Segment::Silence(_) => dest.fill(0.0),
            }
            written += n;
            skip = 0;
        }
        Ok(written)
    }

    pub fn to_vec(&self) -> Result<Vec<f32>, ClipError> {
        let mut out = vec![0.0; self.len];
        self.copy(0, &mut out)?;
        Ok(out)
    }
}
