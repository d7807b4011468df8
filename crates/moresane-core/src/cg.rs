use ndarray::{Array2, Array3, Zip};
use tracing::{debug, info};

use crate::consts::{SNR_ACCEPT_DB, SNR_FLOOR_DB};
use crate::convolve::{fft_convolve, PsfSpectrum};
use crate::error::Result;
use crate::iuwt::{decompose, recompose, DecompositionMode};

/// Outcome of the minor loop.
#[derive(Clone, Debug)]
pub enum MinorOutcome {
    /// The fit is good enough; accrete `solution` into the model.
    Accepted {
        solution: Array2<f32>,
        iterations: usize,
        snr: f32,
    },
    /// The fit failed (false detection or insufficient SNR); retry the major
    /// iteration with the minimum scale raised.
    RaiseMinScale,
}

/// Apply the analysis-projection-synthesis operator: convolve with the PSF,
/// decompose, keep only the extracted wavelet atoms, recompose.
fn apply_operator(
    image: &Array2<f32>,
    mask: &Array3<bool>,
    psf: &PsfSpectrum,
    max_scale: usize,
    scale_adjust: usize,
    mode: DecompositionMode,
) -> Result<Array2<f32>> {
    let convolved = fft_convolve(image, psf)?;
    let mut cube = decompose(&convolved, max_scale, scale_adjust, mode, false);
    Zip::from(&mut cube).and(mask).for_each(|c, &keep| {
        if !keep {
            *c = 0.0;
        }
    });
    Ok(recompose(&cube))
}

fn dot(a: &Array2<f32>, b: &Array2<f32>) -> f64 {
    Zip::from(a)
        .and(b)
        .fold(0.0f64, |acc, &x, &y| acc + x as f64 * y as f64)
}

fn norm(a: &Array2<f32>) -> f64 {
    dot(a, a).sqrt()
}

/// Conjugate-gradient amplitude fit of the extracted sources against the PSF.
///
/// Solves A x = b where `sources` is b and A is `apply_operator`, which is
/// symmetric positive semi-definite on the subspace the mask selects. The
/// model quality is tracked as 20*log10(|b| / |b - A(x)|) and the loop exits
/// on the SNR ladder: an immediate high SNR is a false detection, a high SNR
/// later is an accept, and a declining SNR accepts or discards depending on
/// whether it cleared the floor.
#[allow(clippy::too_many_arguments)]
pub fn minor_loop(
    sources: &Array2<f32>,
    mask: &Array3<bool>,
    psf: &PsfSpectrum,
    max_scale: usize,
    scale_adjust: usize,
    mode: DecompositionMode,
    enforce_positivity: bool,
    minor_loop_miter: usize,
) -> Result<MinorOutcome> {
    let mut x = Array2::<f32>::zeros(sources.dim());
    let mut r = sources.clone();
    let mut p = sources.clone();

    let sources_norm = norm(sources);
    let mut snr_last = 0.0f32;

    for iteration in 1..=minor_loop_miter {
        let mut ap = apply_operator(&p, mask, psf, max_scale, scale_adjust, mode)?;

        let rr = dot(&r, &r);
        let curvature = dot(&p, &ap);
        let alpha = (rr / curvature) as f32;
        if !alpha.is_finite() {
            info!("Degenerate curvature in the minor loop - incrementing the minimum scale.");
            return Ok(MinorOutcome::RaiseMinScale);
        }

        let mut xn = &x + &(&p * alpha);

        // The positivity constraint replaces the step with its clipped
        // version, which changes the search direction and its image under A.
        if enforce_positivity && xn.iter().any(|&v| v < 0.0) {
            xn.mapv_inplace(|v| v.max(0.0));
            p = (&xn - &x) / alpha;
            ap = apply_operator(&p, mask, psf, max_scale, scale_adjust, mode)?;
        }

        let rn = &r - &(&ap * alpha);
        let beta = (dot(&rn, &rn) / rr) as f32;
        let p_next = &rn + &(&p * beta);

        let fit = apply_operator(&xn, mask, psf, max_scale, scale_adjust, mode)?;
        let misfit = norm(&(sources - &fit));
        let snr = (20.0 * (sources_norm / misfit).log10()) as f32;

        debug!(iteration, snr, "minor loop");

        if iteration == 1 && snr > SNR_ACCEPT_DB {
            info!("SNR too large on first iteration - false detection. Incrementing the minimum scale.");
            return Ok(MinorOutcome::RaiseMinScale);
        }

        if snr > SNR_ACCEPT_DB {
            info!("Model has reached <1% error - exiting minor loop.");
            return Ok(MinorOutcome::Accepted {
                solution: xn,
                iterations: iteration,
                snr,
            });
        }

        if iteration > 2 && snr <= snr_last {
            if snr > SNR_FLOOR_DB {
                info!(snr, "SNR has decreased - keeping the previous model and exiting minor loop.");
                // x has not been overwritten yet; the pre-update iterate is
                // the one that achieved snr_last.
                return Ok(MinorOutcome::Accepted {
                    solution: x,
                    iterations: iteration,
                    snr: snr_last,
                });
            }
            info!("SNR has decreased - SNR too small. Incrementing the minimum scale.");
            return Ok(MinorOutcome::RaiseMinScale);
        }

        snr_last = snr;
        r = rn;
        x = xn;
        p = p_next;
    }

    if snr_last > SNR_FLOOR_DB {
        info!(
            snr = snr_last,
            "Maximum number of minor loop iterations exceeded - keeping the model."
        );
        return Ok(MinorOutcome::Accepted {
            solution: x,
            iterations: minor_loop_miter,
            snr: snr_last,
        });
    }

    info!("Minor loop exhausted without a usable model. Incrementing the minimum scale.");
    Ok(MinorOutcome::RaiseMinScale)
}
