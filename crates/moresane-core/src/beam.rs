use ndarray::Array2;
use tracing::warn;

use crate::consts::FWHM_PER_SIGMA;

/// Fitted clean beam parameters: major/minor axis FWHM in pixels and the
/// position angle of the major axis in degrees, counter-clockwise from the
/// x axis.
#[derive(Clone, Copy, Debug)]
pub struct BeamParams {
    pub bmaj: f32,
    pub bmin: f32,
    pub bpa: f32,
}

/// Fit an elliptical Gaussian to the PSF main lobe and synthesize the clean
/// beam image (unit peak, centred on the grid) used for restoration.
///
/// The fit is linear least squares of log-intensity against the quadratic
/// form, over the lobe pixels above 35% of the peak; typical dirty-beam
/// sidelobes stay below that level, so no explicit lobe segmentation is
/// needed. Degenerate fits fall back to a circular beam sized from the
/// half-maximum area.
pub fn fit_clean_beam(psf: &Array2<f32>) -> (Array2<f32>, BeamParams) {
    let (h, w) = psf.dim();

    let mut peak = f32::NEG_INFINITY;
    let mut peak_pos = (0usize, 0usize);
    for row in 0..h {
        for col in 0..w {
            if psf[[row, col]] > peak {
                peak = psf[[row, col]];
                peak_pos = (row, col);
            }
        }
    }

    let quad = if peak > 0.0 {
        fit_quadratic_form(psf, peak, peak_pos)
    } else {
        None
    };
    let (a, b, c) = match quad {
        Some(q) => q,
        None => {
            warn!("Clean beam fit degenerate - falling back to a circular beam.");
            circular_fallback(psf, peak)
        }
    };

    // Eigen-decomposition of [[a, b/2], [b/2, c]]; the smaller eigenvalue
    // belongs to the major axis.
    let half = 0.5 * (a + c);
    let spread = (0.25 * (a - c) * (a - c) + 0.25 * b * b).sqrt();
    let lambda_min = (half - spread).max(1e-12);
    let lambda_max = (half + spread).max(1e-12);

    let sigma_maj = 1.0 / (2.0 * lambda_min).sqrt();
    let sigma_min = 1.0 / (2.0 * lambda_max).sqrt();

    let mut theta = 0.5 * b.atan2(a - c);
    // atan2 gives the axis of one eigenvector; flip to the major axis when
    // the quadratic form is larger along it.
    let along = a * theta.cos() * theta.cos()
        + b * theta.sin() * theta.cos()
        + c * theta.sin() * theta.sin();
    if along > half {
        theta += std::f64::consts::FRAC_PI_2;
    }

    let params = BeamParams {
        bmaj: (FWHM_PER_SIGMA as f64 * sigma_maj) as f32,
        bmin: (FWHM_PER_SIGMA as f64 * sigma_min) as f32,
        bpa: theta.to_degrees() as f32,
    };

    let mut beam = Array2::<f32>::zeros((h, w));
    let centre = (h as f64 / 2.0, w as f64 / 2.0);
    for row in 0..h {
        let dy = row as f64 - centre.0;
        for col in 0..w {
            let dx = col as f64 - centre.1;
            let q = a * dx * dx + b * dx * dy + c * dy * dy;
            beam[[row, col]] = (-q).exp() as f32;
        }
    }

    (beam, params)
}

/// Least-squares fit of ln(peak/v) = a*dx^2 + b*dx*dy + c*dy^2 over the main
/// lobe. Returns `None` when the normal equations are singular or the form
/// is not positive definite.
fn fit_quadratic_form(
    psf: &Array2<f32>,
    peak: f32,
    peak_pos: (usize, usize),
) -> Option<(f64, f64, f64)> {
    let (h, w) = psf.dim();
    let floor = 0.35 * peak;

    let mut m = [[0.0f64; 3]; 3];
    let mut rhs = [0.0f64; 3];
    let mut samples = 0usize;

    for row in 0..h {
        let dy = row as f64 - peak_pos.0 as f64;
        for col in 0..w {
            let v = psf[[row, col]];
            if v < floor {
                continue;
            }
            let dx = col as f64 - peak_pos.1 as f64;
            let basis = [dx * dx, dx * dy, dy * dy];
            let z = (peak as f64 / v as f64).ln();
            for i in 0..3 {
                for j in 0..3 {
                    m[i][j] += basis[i] * basis[j];
                }
                rhs[i] += basis[i] * z;
            }
            samples += 1;
        }
    }

    if samples < 6 {
        return None;
    }

    let solution = solve3(&m, &rhs)?;
    let (a, b, c) = (solution[0], solution[1], solution[2]);
    if a <= 0.0 || c <= 0.0 || 4.0 * a * c - b * b <= 0.0 {
        return None;
    }
    Some((a, b, c))
}

/// Solve a symmetric 3x3 system by Cramer's rule.
fn solve3(m: &[[f64; 3]; 3], rhs: &[f64; 3]) -> Option<[f64; 3]> {
    let det = |a: &[[f64; 3]; 3]| {
        a[0][0] * (a[1][1] * a[2][2] - a[1][2] * a[2][1])
            - a[0][1] * (a[1][0] * a[2][2] - a[1][2] * a[2][0])
            + a[0][2] * (a[1][0] * a[2][1] - a[1][1] * a[2][0])
    };

    let d = det(m);
    if d.abs() < 1e-12 {
        return None;
    }

    let mut out = [0.0f64; 3];
    for k in 0..3 {
        let mut mk = *m;
        for i in 0..3 {
            mk[i][k] = rhs[i];
        }
        out[k] = det(&mk) / d;
    }
    Some(out)
}

/// Circular beam from the half-maximum lobe area: area = pi * (FWHM/2)^2.
fn circular_fallback(psf: &Array2<f32>, peak: f32) -> (f64, f64, f64) {
    let half = 0.5 * peak;
    let area = psf.iter().filter(|&&v| v >= half && half > 0.0).count() as f64;
    let fwhm = 2.0 * (area.max(1.0) / std::f64::consts::PI).sqrt();
    let sigma = fwhm / FWHM_PER_SIGMA as f64;
    let lambda = 1.0 / (2.0 * sigma * sigma);
    (lambda, 0.0, lambda)
}
