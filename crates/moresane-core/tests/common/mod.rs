use ndarray::Array2;

/// Build a circular Gaussian PSF with unit peak, centred on the grid at
/// (side/2, side/2) to match the convolution identity convention.
pub fn gaussian_psf(side: usize, fwhm: f32) -> Array2<f32> {
    let mut psf = Array2::<f32>::zeros((side, side));
    add_gaussian(&mut psf, side / 2, side / 2, fwhm, 1.0);
    psf
}

/// Add a circular Gaussian of the given peak amplitude to an image.
pub fn add_gaussian(image: &mut Array2<f32>, cy: usize, cx: usize, fwhm: f32, peak: f32) {
    let (h, w) = image.dim();
    let sigma = fwhm as f64 / 2.354_82;
    let denom = 2.0 * sigma * sigma;
    for row in 0..h {
        let dy = row as f64 - cy as f64;
        for col in 0..w {
            let dx = col as f64 - cx as f64;
            image[[row, col]] += peak * (-(dx * dx + dy * dy) / denom).exp() as f32;
        }
    }
}

/// Deterministic xorshift generator for reproducible test noise.
pub struct TestRng(u64);

impl TestRng {
    pub fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    pub fn uniform(&mut self) -> f32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        (x >> 11) as f32 / (1u64 << 53) as f32
    }

    /// Approximately standard normal via the sum of twelve uniforms.
    pub fn gaussian(&mut self) -> f32 {
        let mut sum = 0.0f32;
        for _ in 0..12 {
            sum += self.uniform();
        }
        sum - 6.0
    }
}

/// Add white Gaussian noise of standard deviation `sigma`.
pub fn add_noise(image: &mut Array2<f32>, sigma: f32, seed: u64) {
    let mut rng = TestRng::new(seed);
    image.mapv_inplace(|v| v + sigma * rng.gaussian());
}

/// Largest absolute value of an array.
pub fn linf(image: &Array2<f32>) -> f32 {
    image.iter().fold(0.0f32, |acc, &v| acc.max(v.abs()))
}

/// Sum of the values within `radius` pixels of (cy, cx).
pub fn flux_within(image: &Array2<f32>, cy: usize, cx: usize, radius: usize) -> f32 {
    let (h, w) = image.dim();
    let r2 = (radius * radius) as i64;
    let mut sum = 0.0f32;
    for row in 0..h {
        for col in 0..w {
            let dy = row as i64 - cy as i64;
            let dx = col as i64 - cx as i64;
            if dy * dy + dx * dx <= r2 {
                sum += image[[row, col]];
            }
        }
    }
    sum
}
