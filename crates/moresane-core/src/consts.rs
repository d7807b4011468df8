/// Minimum pixel count (h*w) to use row-level Rayon parallelism.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// B3 spline 1D kernel coefficients: [1, 4, 6, 4, 1] / 16.
pub const B3_KERNEL: [f32; 5] = [1.0 / 16.0, 4.0 / 16.0, 6.0 / 16.0, 4.0 / 16.0, 1.0 / 16.0];

/// Conversion factor from the median absolute deviation to a Gaussian sigma.
pub const MAD_TO_SIGMA: f32 = 0.6745;

/// SNR in dB above which a minor-loop fit is accepted outright (~1% model error).
pub const SNR_ACCEPT_DB: f32 = 40.0;

/// Minimum SNR in dB at which a declining minor-loop fit is still kept (~30% error).
pub const SNR_FLOOR_DB: f32 = 10.5;

/// FWHM of a Gaussian in units of its sigma.
pub const FWHM_PER_SIGMA: f32 = 2.354_82;
