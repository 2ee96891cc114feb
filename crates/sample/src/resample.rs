use anyhow::{Result, ensure};
use rubato::{
    Resampler as _, SincFixedIn, SincInterpolationParameters, SincInterpolationType,
    WindowFunction,
};

/// Sample-rate conversion service used for clip resampling and for rendering
/// time-stretched clips.
pub trait Resampler: Send + Sync {
    /// Convert `input`, sampled at `rate_in`, to `rate_out`. The result holds
    /// exactly [`output_len`] samples.
    fn resample(&self, input: &[f32], rate_in: f64, rate_out: f64) -> Result<Vec<f32>>;
}

/// Number of samples a conversion of `len` samples from `rate_in` to `rate_out`
/// produces.
pub fn output_len(len: usize, rate_in: f64, rate_out: f64) -> usize {
    (len as f64 * rate_out / rate_in).round() as usize
}

/// Band-limited sinc resampler.
#[derive(Debug, Clone)]
pub struct SincResampler {
    pub sinc_len: usize,
    pub f_cutoff: f32,
    pub oversampling_factor: usize,
}

impl Default for SincResampler {
    fn default() -> Self {
        Self {
            sinc_len: 256,
            f_cutoff: 0.95,
            oversampling_factor: 256,
        }
    }
}

impl Resampler for SincResampler {
    fn resample(&self, input: &[f32], rate_in: f64, rate_out: f64) -> Result<Vec<f32>> {
        ensure!(
            rate_in > 0.0 && rate_out > 0.0,
            "sample rates must be positive, got {rate_in} -> {rate_out}"
        );
        let frames = output_len(input.len(), rate_in, rate_out);
        if input.is_empty() || rate_in == rate_out {
            let mut out = input.to_vec();
            out.resize(frames, 0.0);
            return Ok(out);
        }

        let params = SincInterpolationParameters {
            sinc_len: self.sinc_len,
            f_cutoff: self.f_cutoff,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: self.oversampling_factor,
            window: WindowFunction::BlackmanHarris2,
        };

        let ratio = rate_out / rate_in;
        let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, input.len(), 1)?;
        let mut output = resampler.process(&[input], None)?;
        let mut samples = output.pop().unwrap_or_default();

        // The sinc kernel can yield a frame more or less than the nominal length
        samples.resize(frames, 0.0);
        log::debug!(
            "resampled {} samples at {rate_in} Hz to {} at {rate_out} Hz",
            input.len(),
            samples.len()
        );
        Ok(samples)
    }
}
