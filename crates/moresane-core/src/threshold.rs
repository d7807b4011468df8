use ndarray::{Array3, ArrayView2, Axis};

use crate::consts::MAD_TO_SIGMA;

/// Estimate the per-scale noise level of a wavelet cube via the median
/// absolute deviation, assuming Gaussian noise.
///
/// `edge_excl` excludes a border of that many pixels from the median, and
/// `int_excl` a central square of that half-width, so that deterministic
/// artefacts near the edges or a bright central source do not bias the
/// estimate.
pub fn estimate_threshold(cube: &Array3<f32>, edge_excl: usize, int_excl: usize) -> Vec<f32> {
    let (scales, h, w) = cube.dim();
    let mid = (h / 2, w / 2);

    let mut sigmas = Vec::with_capacity(scales);
    for scale in 0..scales {
        let plane = cube.index_axis(Axis(0), scale);
        let mut values = Vec::with_capacity(h * w);
        for row in 0..h {
            for col in 0..w {
                if edge_excl > 0
                    && (row < edge_excl
                        || row >= h - edge_excl
                        || col < edge_excl
                        || col >= w - edge_excl)
                {
                    continue;
                }
                if int_excl > 0
                    && row + int_excl >= mid.0
                    && row < mid.0 + int_excl
                    && col + int_excl >= mid.1
                    && col < mid.1 + int_excl
                {
                    continue;
                }
                values.push(plane[[row, col]].abs());
            }
        }
        sigmas.push(median(&mut values) / MAD_TO_SIGMA);
    }

    sigmas
}

/// Hard-threshold a wavelet cube at `sigma_level` times the per-scale noise.
///
/// Without `neg_comp`, surviving coefficients are additionally clipped to
/// non-negative via (w + |w|)/2; with it both signs are kept.
pub fn apply_threshold(
    cube: &Array3<f32>,
    sigmas: &[f32],
    sigma_level: f32,
    neg_comp: bool,
) -> Array3<f32> {
    let mut out = cube.clone();
    for (scale, mut plane) in out.axis_iter_mut(Axis(0)).enumerate() {
        let cut = sigma_level * sigmas[scale];
        if neg_comp {
            plane.mapv_inplace(|v| if v.abs() >= cut { v } else { 0.0 });
        } else {
            plane.mapv_inplace(|v| {
                let kept = if v.abs() >= cut { v } else { 0.0 };
                (kept + kept.abs()) * 0.5
            });
        }
    }
    out
}

/// Build the per-scale edge suppression mask, or `None` when nothing is to
/// be suppressed.
///
/// The boundary corruption of the a-trous transform grows with the dilated
/// kernel support, so the guard width at scale i is the cumulative sum of
/// 2*2^k for k <= i, widened to `edge_offset` if the caller asks for more.
/// Without `edge_suppression`, a positive `edge_offset` alone masks a fixed
/// border at every scale.
pub fn suppression_mask(
    scale_count: usize,
    size: usize,
    edge_suppression: bool,
    edge_offset: usize,
) -> Option<Array3<f32>> {
    if !edge_suppression && edge_offset == 0 {
        return None;
    }

    let mut mask = Array3::<f32>::zeros((scale_count, size, size));
    let mut edge_corruption = 0usize;
    for (scale, mut plane) in mask.axis_iter_mut(Axis(0)).enumerate() {
        let guard = if edge_suppression {
            edge_corruption += 2 * (1usize << scale);
            edge_offset.max(edge_corruption)
        } else {
            edge_offset
        };
        if 2 * guard < size {
            plane
                .slice_mut(ndarray::s![guard..size - guard, guard..size - guard])
                .fill(1.0);
        }
    }

    Some(mask)
}

/// Median of the values in `values` (averaging the two middle elements for
/// even counts). The slice is reordered in place.
pub fn median(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

/// Mean and population standard deviation of the pixel values.
pub fn compute_mean_stddev(data: ArrayView2<f32>) -> (f64, f64) {
    let n = data.len() as f64;
    if n == 0.0 {
        return (0.0, 0.0);
    }
    let sum: f64 = data.iter().map(|&v| v as f64).sum();
    let mean = sum / n;
    let var: f64 = data.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}
