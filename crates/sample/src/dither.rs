use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const DITHER_SEED: u64 = 0x5eed_d17e;

/// Triangular (TPDF) dither source, in units of one quantization step.
///
/// Every ditherer starts from the same seed, so converting the same input twice
/// produces the same output.
#[derive(Debug, Clone)]
pub struct Ditherer {
    rng: ChaCha8Rng,
}

impl Ditherer {
    pub fn new() -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(DITHER_SEED),
        }
    }

    /// Difference of two uniform values, in (-1.0, 1.0).
    pub fn next_offset(&mut self) -> f32 {
        self.rng.random::<f32>() - self.rng.random::<f32>()
    }
}

impl Default for Ditherer {
    fn default() -> Self {
        Self::new()
    }
}
