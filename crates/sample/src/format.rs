use crate::dither::Ditherer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Storage precision of a run of samples, ordered from narrowest to widest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum SampleFormat {
    Int16,
    Int24,
    #[default]
    Float,
}

impl SampleFormat {
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::Int16 => 2,
            SampleFormat::Int24 | SampleFormat::Float => 4,
        }
    }

    /// Scale between the integer range and [-1.0, 1.0), or `None` for float.
    const fn full_scale(self) -> Option<f32> {
        match self {
            SampleFormat::Int16 => Some(32_768.0),
            SampleFormat::Int24 => Some(8_388_608.0),
            SampleFormat::Float => None,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleFormat::Int16 => write!(f, "16-bit PCM"),
            SampleFormat::Int24 => write!(f, "24-bit PCM"),
            SampleFormat::Float => write!(f, "32-bit float"),
        }
    }
}

/// The stored format of a sequence together with its effective format.
///
/// The effective format is the narrowest precision the data is known to need:
/// audio recorded from a 16-bit device into float storage has an effective
/// format of `Int16`, so narrowing it back to 16 bits is lossless and skips
/// dithering. The effective format never exceeds the stored format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleFormats {
    effective: SampleFormat,
    stored: SampleFormat,
}

impl SampleFormats {
    pub fn new(effective: SampleFormat, stored: SampleFormat) -> Self {
        Self {
            effective: effective.min(stored),
            stored,
        }
    }

    pub fn stored(&self) -> SampleFormat {
        self.stored
    }

    pub fn effective(&self) -> SampleFormat {
        self.effective
    }

    /// Widen the effective format after writing data of precision `effective`.
    pub fn update_effective(&mut self, effective: SampleFormat) {
        if effective > self.effective {
            self.effective = effective.min(self.stored);
        }
    }

    /// Formats after converting storage to `stored`.
    pub fn with_stored(self, stored: SampleFormat) -> Self {
        Self::new(self.effective, stored)
    }
}

impl From<SampleFormat> for SampleFormats {
    fn from(format: SampleFormat) -> Self {
        Self::new(format, format)
    }
}

/// Typed sample storage. 24-bit samples live in the low bits of an `i32`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SampleData {
    Int16(Vec<i16>),
    Int24(Vec<i32>),
    Float(Vec<f32>),
}

macro_rules! with_samples {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            SampleData::Int16($v) => $body,
            SampleData::Int24($v) => $body,
            SampleData::Float($v) => $body,
        }
    };
}

impl SampleData {
    pub fn empty(format: SampleFormat) -> Self {
        Self::silence(format, 0)
    }

    pub fn silence(format: SampleFormat, len: usize) -> Self {
        match format {
            SampleFormat::Int16 => SampleData::Int16(vec![0; len]),
            SampleFormat::Int24 => SampleData::Int24(vec![0; len]),
            SampleFormat::Float => SampleData::Float(vec![0.0; len]),
        }
    }

    /// Quantize float samples into `format`, adding dither when a ditherer is
    /// supplied.
    pub fn from_f32(samples: &[f32], format: SampleFormat, mut dither: Option<&mut Ditherer>) -> Self {
        let Some(scale) = format.full_scale() else {
            return SampleData::Float(samples.to_vec());
        };
        let mut quantize = |x: f32| {
            let mut v = x * scale;
            if let Some(d) = dither.as_deref_mut() {
                v += d.next_offset();
            }
            v.round().clamp(-scale, scale - 1.0)
        };
        match format {
            SampleFormat::Int16 => SampleData::Int16(samples.iter().map(|&x| quantize(x) as i16).collect()),
            SampleFormat::Int24 => SampleData::Int24(samples.iter().map(|&x| quantize(x) as i32).collect()),
            SampleFormat::Float => unreachable!("float has no full scale"),
        }
    }

    /// Convert float samples whose true precision is `effective` into `target`.
    /// Dithering is applied only when the conversion loses precision.
    pub fn from_f32_with_effective(samples: &[f32], target: SampleFormat, effective: SampleFormat) -> Self {
        if effective > target {
            let mut ditherer = Ditherer::new();
            Self::from_f32(samples, target, Some(&mut ditherer))
        } else {
            Self::from_f32(samples, target, None)
        }
    }

    pub fn format(&self) -> SampleFormat {
        match self {
            SampleData::Int16(_) => SampleFormat::Int16,
            SampleData::Int24(_) => SampleFormat::Int24,
            SampleData::Float(_) => SampleFormat::Float,
        }
    }

    pub fn len(&self) -> usize {
        with_samples!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Widen `self[offset..offset + out.len()]` into `out`. Exact for every format.
    pub fn read_into(&self, offset: usize, out: &mut [f32]) {
        let range = offset..offset + out.len();
        match self {
            SampleData::Int16(v) => {
                for (o, &s) in out.iter_mut().zip(&v[range]) {
                    *o = s as f32 / 32_768.0;
                }
            }
            SampleData::Int24(v) => {
                for (o, &s) in out.iter_mut().zip(&v[range]) {
                    *o = s as f32 / 8_388_608.0;
                }
            }
            SampleData::Float(v) => out.copy_from_slice(&v[range]),
        }
    }

    pub fn to_f32(&self) -> Vec<f32> {
        let mut out = vec![0.0; self.len()];
        self.read_into(0, &mut out);
        out
    }

    pub fn into_f32(self) -> Vec<f32> {
        match self {
            SampleData::Float(v) => v,
            other => other.to_f32(),
        }
    }

    pub fn slice(&self, range: Range<usize>) -> Self {
        match self {
            SampleData::Int16(v) => SampleData::Int16(v[range].to_vec()),
            SampleData::Int24(v) => SampleData::Int24(v[range].to_vec()),
            SampleData::Float(v) => SampleData::Float(v[range].to_vec()),
        }
    }

    /// Convert to `target`. `effective` is the precision the data is known to
    /// need; narrowing below it dithers.
    pub fn convert(&self, target: SampleFormat, effective: SampleFormat) -> Self {
        if target == self.format() {
            return self.clone();
        }
        Self::from_f32_with_effective(&self.to_f32(), target, effective.min(self.format()))
    }

    /// Append `other`, converting it to this buffer's format first.
    pub fn extend_from(&mut self, other: &SampleData) {
        let converted;
        let other = if other.format() == self.format() {
            other
        } else {
            converted = other.convert(self.format(), other.format());
            &converted
        };
        match (self, other) {
            (SampleData::Int16(a), SampleData::Int16(b)) => a.extend_from_slice(b),
            (SampleData::Int24(a), SampleData::Int24(b)) => a.extend_from_slice(b),
            (SampleData::Float(a), SampleData::Float(b)) => a.extend_from_slice(b),
            _ => unreachable!("formats were unified above"),
        }
    }

    /// Overwrite `self[at..at + src.len()]` with `src`, converted to this format.
    pub fn overwrite(&mut self, at: usize, src: &SampleData, effective: SampleFormat) {
        let converted = src.convert(self.format(), effective);
        match (self, &converted) {
            (SampleData::Int16(a), SampleData::Int16(b)) => a[at..at + b.len()].copy_from_slice(b),
            (SampleData::Int24(a), SampleData::Int24(b)) => a[at..at + b.len()].copy_from_slice(b),
            (SampleData::Float(a), SampleData::Float(b)) => a[at..at + b.len()].copy_from_slice(b),
            _ => unreachable!("converted to the destination format"),
        }
    }

    /// Remove the first `n` samples.
    pub fn drain_front(&mut self, n: usize) {
        with_samples!(self, v => {
            v.drain(..n);
        })
    }

    pub fn summary(&self) -> SampleSummary {
        let mut acc = SummaryAccumulator::default();
        acc.add_samples(&self.to_f32());
        acc.finish()
    }
}

/// Min, max and RMS over a run of samples.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SampleSummary {
    pub min: f32,
    pub max: f32,
    pub rms: f32,
}

/// Combines raw samples and precomputed summaries into one summary.
#[derive(Debug, Clone, Copy)]
pub struct SummaryAccumulator {
    min: f32,
    max: f32,
    sum_squares: f64,
    count: u64,
}

impl Default for SummaryAccumulator {
    fn default() -> Self {
        Self {
            min: f32::INFINITY,
            max: f32::NEG_INFINITY,
            sum_squares: 0.0,
            count: 0,
        }
    }
}

impl SummaryAccumulator {
    pub fn add_samples(&mut self, samples: &[f32]) {
        for &s in samples {
            self.min = self.min.min(s);
            self.max = self.max.max(s);
            self.sum_squares += f64::from(s) * f64::from(s);
        }
        self.count += samples.len() as u64;
    }

    pub fn add_summary(&mut self, summary: &SampleSummary, len: usize) {
        if len == 0 {
            return;
        }
        self.min = self.min.min(summary.min);
        self.max = self.max.max(summary.max);
        self.sum_squares += f64::from(summary.rms) * f64::from(summary.rms) * len as f64;
        self.count += len as u64;
    }

    /// All zeros when nothing was added.
    pub fn finish(self) -> SampleSummary {
        if self.count == 0 {
            return SampleSummary::default();
        }
        SampleSummary {
            min: self.min,
            max: self.max,
            rms: (self.sum_squares / self.count as f64).sqrt() as f32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_formats_order_narrow_to_wide() {
        assert!(SampleFormat::Int16 < SampleFormat::Int24);
        assert!(SampleFormat::Int24 < SampleFormat::Float);
    }

    #[test]
    fn test_effective_never_exceeds_stored() {
        let mut formats = SampleFormats::new(SampleFormat::Float, SampleFormat::Int16);
        assert_eq!(formats.effective(), SampleFormat::Int16);

        formats.update_effective(SampleFormat::Float);
        assert_eq!(formats.effective(), SampleFormat::Int16);

        let mut formats = SampleFormats::new(SampleFormat::Int16, SampleFormat::Float);
        formats.update_effective(SampleFormat::Int24);
        assert_eq!(formats.effective(), SampleFormat::Int24);

        // Writing narrower data does not lower it again
        formats.update_effective(SampleFormat::Int16);
        assert_eq!(formats.effective(), SampleFormat::Int24);
    }

    #[test]
    fn test_int16_survives_float_round_trip() {
        let ints: Vec<i16> = vec![i16::MIN, -1234, 0, 1, 32_767];
        let data = SampleData::Int16(ints.clone());

        let back = SampleData::from_f32(&data.to_f32(), SampleFormat::Int16, None);
        assert_eq!(back, SampleData::Int16(ints));
    }

    #[test]
    fn test_no_dither_when_effective_fits_target() {
        // 16-bit content stored as float narrows back without noise
        let original = SampleData::Int16(vec![100, -200, 300]);
        let as_float = original.convert(SampleFormat::Float, SampleFormat::Int16);
        let narrowed = as_float.convert(SampleFormat::Int16, SampleFormat::Int16);
        assert_eq!(narrowed, original);
    }

    #[test]
    fn test_dithered_narrowing_is_deterministic() {
        let samples: Vec<f32> = (0..64).map(|i| (i as f32 * 0.37).sin() * 0.5).collect();
        let float = SampleData::Float(samples);

        let a = float.convert(SampleFormat::Int16, SampleFormat::Float);
        let b = float.convert(SampleFormat::Int16, SampleFormat::Float);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_quantize_clamps_full_scale() {
        let data = SampleData::from_f32(&[2.0, -2.0], SampleFormat::Int16, None);
        assert_eq!(data, SampleData::Int16(vec![32_767, -32_768]));
    }

    #[test]
    fn test_extend_and_drain() {
        let mut data = SampleData::Float(vec![0.25, 0.5]);
        data.extend_from(&SampleData::Int16(vec![16_384]));
        assert_eq!(data.to_f32(), vec![0.25, 0.5, 0.5]);

        data.drain_front(2);
        assert_eq!(data.to_f32(), vec![0.5]);
    }

    #[test]
    fn test_overwrite_in_place() {
        let mut data = SampleData::Float(vec![0.0; 4]);
        data.overwrite(1, &SampleData::Float(vec![0.5, -0.5]), SampleFormat::Float);
        assert_eq!(data.to_f32(), vec![0.0, 0.5, -0.5, 0.0]);
    }

    #[test]
    fn test_summary_combines_blocks() {
        let a = SampleData::Float(vec![0.5, -0.5]);
        let b = SampleData::Float(vec![1.0, -1.0]);

        let mut acc = SummaryAccumulator::default();
        acc.add_summary(&a.summary(), 2);
        acc.add_summary(&b.summary(), 2);
        let combined = acc.finish();

        assert_eq!(combined.min, -1.0);
        assert_eq!(combined.max, 1.0);
        assert_relative_eq!(combined.rms, (0.625f32).sqrt(), epsilon = 1e-6);
    }

    #[test]
    fn test_empty_summary_is_zero() {
        assert_eq!(SampleData::empty(SampleFormat::Int24).summary(), SampleSummary::default());
    }
}
