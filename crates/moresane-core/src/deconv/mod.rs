pub mod config;

pub use config::{DeconvConfig, DeconvOutcome, ExitStatus};

use ndarray::{s, Array2, Array3, ArrayView2, Axis, Zip};
use tracing::{debug, info};

use crate::beam::{fit_clean_beam, BeamParams};
use crate::cg::{minor_loop, MinorOutcome};
use crate::convolve::{self, fft_convolve, ConvolutionMode, PsfSpectrum};
use crate::error::{MoresaneError, Result};
use crate::extract::source_extraction;
use crate::iuwt::{decompose, recompose};
use crate::threshold::{
    apply_threshold, compute_mean_stddev, estimate_threshold, suppression_mask,
};

/// A deconvolution session owning the mutable state of a run: the sky model
/// being accreted and the matching residual. A second session is fully
/// independent.
pub struct DeconvSession {
    dirty: Array2<f32>,
    psf: Array2<f32>,
    mask: Option<Array2<f32>>,
    pub model: Array2<f32>,
    pub residual: Array2<f32>,
    /// Set once a pass finds nothing left to deconvolve; consumed by the
    /// by-scale driver as its stop signal.
    pub complete: bool,
}

impl DeconvSession {
    /// Validate the inputs and set up a fresh session. The dirty image must
    /// be square with a power-of-two side of at least 4; the PSF must match
    /// its shape or be exactly double-sized. An optional deconvolution mask
    /// (same shape as the dirty image) is normalized and lightly smoothed so
    /// hard mask edges do not imprint on the wavelet planes.
    pub fn new(
        dirty: Array2<f32>,
        psf: Array2<f32>,
        mask: Option<Array2<f32>>,
    ) -> Result<Self> {
        let (h, w) = dirty.dim();
        if h != w || h < 4 || !h.is_power_of_two() {
            return Err(MoresaneError::InvalidDimensions {
                height: h,
                width: w,
            });
        }

        let (ph, pw) = psf.dim();
        if !((ph == h && pw == w) || (ph == 2 * h && pw == 2 * w)) {
            return Err(MoresaneError::PsfShapeMismatch {
                psf_height: ph,
                psf_width: pw,
                height: h,
                width: w,
            });
        }

        let mask = match mask {
            Some(m) => {
                let (mh, mw) = m.dim();
                if mh != h || mw != w {
                    return Err(MoresaneError::MaskShapeMismatch {
                        mask_height: mh,
                        mask_width: mw,
                        height: h,
                        width: w,
                    });
                }
                Some(normalize_mask(m))
            }
            None => None,
        };

        let model = Array2::<f32>::zeros((h, w));
        let residual = dirty.clone();

        Ok(Self {
            dirty,
            psf,
            mask,
            model,
            residual,
            complete: false,
        })
    }

    /// Run the major loop once over the session's dirty image, accreting
    /// into `model` and refreshing `residual`.
    pub fn moresane(&mut self, config: &DeconvConfig) -> Result<DeconvOutcome> {
        let working = self.dirty.clone();
        self.run_once(config, &working)
    }

    /// Scale-by-scale deconvolution: repeatedly run the major loop with an
    /// increasing analysis depth, each pass consuming the residual of the
    /// previous one, until a pass does no work or the scale cap is reached.
    pub fn moresane_by_scale(
        &mut self,
        config: &DeconvConfig,
        start_scale: usize,
        stop_scale: usize,
    ) -> Result<DeconvOutcome> {
        let scale_limit = max_scale_count(self.dirty.nrows());

        let mut scale = start_scale.max(1);
        let mut outcome = DeconvOutcome {
            status: ExitStatus::NoSignal,
            major_iterations: 0,
            residual_std: 0.0,
        };

        while !self.complete {
            info!(scale, "Deconvolving at scale");
            let mut scaled = config.clone();
            scaled.scale_count = Some(scale);
            let working = self.residual.clone();
            outcome = self.run_once(&scaled, &working)?;

            scale += 1;
            if scale > scale_limit || scale > stop_scale {
                info!("Maximum scale reached - finished.");
                break;
            }
        }

        self.complete = false;
        Ok(outcome)
    }

    /// Restore the deconvolved map: convolve the model with the fitted clean
    /// beam and add the residual. Returns the restored image and the beam
    /// parameters for the output header.
    pub fn restore(&self) -> (Array2<f32>, BeamParams) {
        let (clean_beam, params) = fit_clean_beam(&self.psf);
        let side = self.dirty.nrows();

        let restored = if self.psf.nrows() == 2 * side {
            let spectrum = convolve::rfft2(&convolve::pad_to_double(&self.model))
                * &convolve::rfft2(&clean_beam);
            let shifted = convolve::fftshift(&convolve::irfft2(&spectrum, 2 * side));
            convolve::extract_central_quadrant(&shifted)
        } else {
            let spectrum = convolve::rfft2(&self.model) * &convolve::rfft2(&clean_beam);
            convolve::fftshift(&convolve::irfft2(&spectrum, side))
        };

        (restored + &self.residual, params)
    }

    fn run_once(
        &mut self,
        config: &DeconvConfig,
        working_dirty: &Array2<f32>,
    ) -> Result<DeconvOutcome> {
        let side = working_dirty.nrows();

        let mut subregion = config.subregion.unwrap_or(side);
        if subregion > side {
            info!(side, "Subregion exceeds the image - using the full side");
            subregion = side;
        }
        if subregion == 0 || subregion % 2 != 0 {
            return Err(MoresaneError::InvalidSubregion(subregion));
        }

        let scale_limit = max_scale_count(side);
        let scale_count = config.scale_count.unwrap_or(scale_limit).min(scale_limit);

        let lo = side / 2 - subregion / 2;
        let hi = lo + subregion;

        let mut dirty_sub = working_dirty.slice(s![lo..hi, lo..hi]).to_owned();

        let psf_sub_spectrum = prepare_psf_spectrum(&self.psf, subregion, config.conv_mode)?;
        let psf_full_spectrum = prepare_psf_spectrum(&self.psf, side, config.conv_mode)?;

        // The norm of each PSF scale weights the wavelet maxima so that
        // coefficients are comparable across scales.
        let psf_subregion = central_region(&self.psf, subregion);
        let psf_cube = decompose(&psf_subregion, scale_count, 0, config.decom_mode, false);
        let energies: Vec<f32> = (0..scale_count)
            .map(|i| {
                let plane = psf_cube.index_axis(Axis(0), i);
                plane
                    .iter()
                    .map(|&v| (v as f64).powi(2))
                    .sum::<f64>()
                    .sqrt() as f32
            })
            .collect();

        let suppression = suppression_mask(
            scale_count,
            subregion,
            config.edge_suppression,
            config.edge_offset,
        );
        let mask_sub = self
            .mask
            .as_ref()
            .map(|m| m.slice(s![lo..hi, lo..hi]).to_owned());

        let mut model_delta = Array2::<f32>::zeros((side, side));
        let mut residual = working_dirty.clone();

        let mut major_iter = 0usize;
        let mut max_coeff = 1.0f32;
        let mut min_scale = 0usize;
        let mut std_current = 1000.0f64;
        let mut std_last;
        let mut std_ratio = 1.0f64;
        let mut stalled = false;

        let mut thresh_cube = Array3::<f32>::zeros((0, 0, 0));
        let mut scale_maxima = vec![0.0f32; scale_count];

        while major_iter < config.major_loop_miter
            && max_coeff > 0.0
            && std_ratio > config.accuracy as f64
            && max_value(dirty_sub.view()) > config.flux_threshold
        {
            let mut accepted: Option<Array2<f32>> = None;

            // The inner loop lets the model be re-estimated from a higher
            // scale when the fit has a poor SNR; it gives up once every
            // scale has been tried.
            while min_scale < scale_count {
                if min_scale == 0 {
                    let decomposition =
                        decompose(&dirty_sub, scale_count, 0, config.decom_mode, false);
                    let sigmas =
                        estimate_threshold(&decomposition, config.edge_excl, config.int_excl);
                    let decomposition = match &mask_sub {
                        Some(m) => {
                            decompose(&(&dirty_sub * m), scale_count, 0, config.decom_mode, false)
                        }
                        None => decomposition,
                    };
                    let mut thresholded = apply_threshold(
                        &decomposition,
                        &sigmas,
                        config.sigma_level,
                        config.neg_comp,
                    );
                    if let Some(supp) = &suppression {
                        thresholded = thresholded * supp;
                    }
                    for (i, maximum) in scale_maxima.iter_mut().enumerate() {
                        let m = max_value(thresholded.index_axis(Axis(0), i));
                        *maximum = if energies[i] > 0.0 { m / energies[i] } else { 0.0 };
                    }
                    thresh_cube = thresholded;
                }

                let mut max_index = min_scale;
                for i in min_scale..scale_count {
                    if scale_maxima[i] > scale_maxima[max_index] {
                        max_index = i;
                    }
                }
                max_coeff = scale_maxima[max_index];
                if max_coeff == 0.0 {
                    info!("No significant wavelet coefficients detected.");
                    break;
                }
                let max_scale = max_index + 1;
                info!(min_scale, max_scale, "Scale window selected");

                let mut scale_adjust = 0usize;
                for i in (0..max_index).rev() {
                    if scale_maxima[i] == 0.0 {
                        scale_adjust = i + 1;
                        info!(scale_adjust, "Empty low scales ignored");
                        break;
                    }
                }

                let slice_cube = thresh_cube
                    .slice(s![scale_adjust..max_scale, .., ..])
                    .to_owned();
                let (extracted, extracted_mask) =
                    source_extraction(&slice_cube, config.tolerance, config.neg_comp);
                let sources = recompose(&extracted);

                match minor_loop(
                    &sources,
                    &extracted_mask,
                    &psf_sub_spectrum,
                    max_scale,
                    scale_adjust,
                    config.decom_mode,
                    config.enforce_positivity,
                    config.minor_loop_miter,
                )? {
                    MinorOutcome::Accepted {
                        solution,
                        iterations,
                        snr,
                    } => {
                        debug!(iterations, snr, "Minor loop accepted");
                        min_scale = 0;
                        accepted = Some(solution);
                        break;
                    }
                    MinorOutcome::RaiseMinScale => {
                        min_scale += 1;
                    }
                }
            }

            if min_scale == scale_count {
                info!("All scales are performing poorly - stopping.");
                stalled = true;
                break;
            }

            if let Some(solution) = accepted {
                Zip::from(model_delta.slice_mut(s![lo..hi, lo..hi]))
                    .and(&solution)
                    .for_each(|m, &v| *m += config.loop_gain * v);
                residual = working_dirty - &fft_convolve(&model_delta, &psf_full_spectrum)?;

                std_last = std_current;
                std_current = compute_mean_stddev(residual.slice(s![lo..hi, lo..hi])).1;
                std_ratio = (std_last - std_current) / std_last;

                // A worsening step is rolled back; the negative ratio then
                // ends the major loop with the pre-iteration model.
                if std_ratio < 0.0 {
                    info!("Residual has worsened - reverting changes.");
                    Zip::from(model_delta.slice_mut(s![lo..hi, lo..hi]))
                        .and(&solution)
                        .for_each(|m, &v| *m -= config.loop_gain * v);
                    residual = working_dirty - &fft_convolve(&model_delta, &psf_full_spectrum)?;
                }

                dirty_sub = residual.slice(s![lo..hi, lo..hi]).to_owned();
                major_iter += 1;
                info!(major_iter, std = std_current, "Major loop iteration done");
            }

            if major_iter == 0 {
                info!("Deconvolution did no work - finished.");
                self.complete = true;
                break;
            }
        }

        let status = if stalled {
            ExitStatus::Stalled
        } else if max_coeff == 0.0 || major_iter == 0 {
            ExitStatus::NoSignal
        } else if major_iter >= config.major_loop_miter {
            ExitStatus::IterationCap
        } else {
            ExitStatus::Completed
        };

        if major_iter > 0 {
            self.model += &model_delta;
            self.residual = residual.clone();
        }

        let residual_std = compute_mean_stddev(residual.slice(s![lo..hi, lo..hi])).1 as f32;
        Ok(DeconvOutcome {
            status,
            major_iterations: major_iter,
            residual_std,
        })
    }
}

/// Maximum usable analysis depth for a given image side.
pub fn max_scale_count(side: usize) -> usize {
    (side.trailing_zeros() as usize).saturating_sub(1)
}

/// Select and prepare the PSF spectrum for a given target size, using the
/// central double-size region for linear mode when the PSF is large enough
/// to provide one.
fn prepare_psf_spectrum(
    psf: &Array2<f32>,
    target: usize,
    mode: ConvolutionMode,
) -> Result<PsfSpectrum> {
    let side = psf.nrows();
    match mode {
        ConvolutionMode::Circular => {
            let region = central_region(psf, target);
            PsfSpectrum::prepare(&region, (target, target), mode)
        }
        ConvolutionMode::Linear => {
            if side >= 2 * target {
                let region = central_region(psf, 2 * target);
                PsfSpectrum::prepare(&region, (target, target), mode)
            } else {
                let region = central_region(psf, target);
                PsfSpectrum::prepare(&region, (target, target), mode)
            }
        }
    }
}

fn central_region(data: &Array2<f32>, size: usize) -> Array2<f32> {
    let (h, w) = data.dim();
    data.slice(s![
        h / 2 - size / 2..h / 2 + size / 2,
        w / 2 - size / 2..w / 2 + size / 2
    ])
    .to_owned()
}

fn max_value(data: ArrayView2<f32>) -> f32 {
    data.iter().fold(f32::NEG_INFINITY, |acc, &v| acc.max(v))
}

/// Normalize a deconvolution mask to unit maximum and smooth it with a 5x5
/// box so its edges taper instead of cutting wavelet structures.
fn normalize_mask(mask: Array2<f32>) -> Array2<f32> {
    let peak = max_value(mask.view());
    let mut mask = if peak > 0.0 { mask / peak } else { mask };
    mask = box_smooth_5x5(&mask);
    let peak = max_value(mask.view());
    if peak > 0.0 {
        mask /= peak;
    }
    mask
}

fn box_smooth_5x5(data: &Array2<f32>) -> Array2<f32> {
    let (h, w) = data.dim();
    let mut rows = Array2::<f32>::zeros((h, w));
    for row in 0..h {
        for col in 0..w {
            let mut sum = 0.0f32;
            for k in -2isize..=2 {
                let c = col as isize + k;
                if c >= 0 && (c as usize) < w {
                    sum += data[[row, c as usize]];
                }
            }
            rows[[row, col]] = sum;
        }
    }
    let mut out = Array2::<f32>::zeros((h, w));
    for row in 0..h {
        for col in 0..w {
            let mut sum = 0.0f32;
            for k in -2isize..=2 {
                let r = row as isize + k;
                if r >= 0 && (r as usize) < h {
                    sum += rows[[r as usize, col]];
                }
            }
            out[[row, col]] = sum;
        }
    }
    out
}
