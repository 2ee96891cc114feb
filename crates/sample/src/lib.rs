//! Sample formats and the narrow services the storage and clip layers consume:
//! format conversion with dithering, resampling and progress reporting.

mod dither;
mod format;
mod progress;
mod resample;

pub use dither::Ditherer;
pub use format::{SampleData, SampleFormat, SampleFormats, SampleSummary, SummaryAccumulator};
pub use progress::{Cancelled, NoProgress, Progress, ProgressReporter, SubProgress};
pub use resample::{Resampler, SincResampler, output_len};
