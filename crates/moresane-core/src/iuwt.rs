use std::fmt;

use ndarray::{Array2, Array3, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::consts::{B3_KERNEL, PARALLEL_PIXEL_THRESHOLD};

/// Execution mode for the wavelet decomposition. Both modes produce the same
/// coefficients up to float rounding; `Parallel` splits the separable
/// convolutions over rows with Rayon.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DecompositionMode {
    #[default]
    Serial,
    Parallel,
}

impl fmt::Display for DecompositionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecompositionMode::Serial => write!(f, "serial"),
            DecompositionMode::Parallel => write!(f, "parallel"),
        }
    }
}

/// A-trous decomposition of an image into wavelet detail scales.
///
/// Smoothing proceeds through all `scale_count` scales, but the first
/// `scale_adjust` detail planes are not emitted. With `store_smoothed` the
/// final smoothed approximation is appended as a trailing plane, so that
/// `recompose` reproduces the input exactly.
pub fn decompose(
    data: &Array2<f32>,
    scale_count: usize,
    scale_adjust: usize,
    mode: DecompositionMode,
    store_smoothed: bool,
) -> Array3<f32> {
    let (h, w) = data.dim();
    let emitted = scale_count.saturating_sub(scale_adjust);
    let planes = emitted + usize::from(store_smoothed);

    let mut cube = Array3::<f32>::zeros((planes, h, w));
    let mut current = data.clone();

    for scale in 0..scale_count {
        let smoothed = atrous_convolve(&current, scale, mode);
        if scale >= scale_adjust {
            cube.index_axis_mut(Axis(0), scale - scale_adjust)
                .assign(&(&current - &smoothed));
        }
        current = smoothed;
    }

    if store_smoothed {
        cube.index_axis_mut(Axis(0), planes - 1).assign(&current);
    }

    cube
}

/// Recompose an image from wavelet planes. With the B3 spline a-trous
/// transform the synthesis is the plane sum; skipped low scales simply do
/// not contribute.
pub fn recompose(cube: &Array3<f32>) -> Array2<f32> {
    cube.sum_axis(Axis(0))
}

/// A-trous convolution at a given scale.
///
/// The B3 spline kernel is applied separably (rows then columns) with a
/// dilation factor of 2^scale, using symmetric boundary extension.
pub fn atrous_convolve(data: &Array2<f32>, scale: usize, mode: DecompositionMode) -> Array2<f32> {
    let step = 1usize << scale;
    let after_rows = convolve_rows_atrous(data, &B3_KERNEL, step, mode);
    convolve_cols_atrous(&after_rows, &B3_KERNEL, step, mode)
}

/// Mirror boundary handling: reflect index into [0, size).
/// Even function (f(-k) = f(k)) with period 2*size, ping-ponging within [0, size).
pub fn mirror_index(idx: isize, size: usize) -> usize {
    if size <= 1 {
        return 0;
    }
    let period = 2 * size;
    let abs_idx = idx.unsigned_abs();
    let m = abs_idx % period;

    if m < size {
        m
    } else {
        2 * size - 1 - m
    }
}

fn use_parallel(mode: DecompositionMode, h: usize, w: usize) -> bool {
    mode == DecompositionMode::Parallel && h * w >= PARALLEL_PIXEL_THRESHOLD
}

fn convolve_rows_atrous(
    data: &Array2<f32>,
    kernel: &[f32; 5],
    step: usize,
    mode: DecompositionMode,
) -> Array2<f32> {
    let (h, w) = data.dim();
    if use_parallel(mode, h, w) {
        convolve_rows_atrous_parallel(data, kernel, step, h, w)
    } else {
        convolve_rows_atrous_sequential(data, kernel, step, h, w)
    }
}

fn convolve_rows_atrous_parallel(
    data: &Array2<f32>,
    kernel: &[f32; 5],
    step: usize,
    h: usize,
    w: usize,
) -> Array2<f32> {
    let radius = 2isize;
    let rows: Vec<Vec<f32>> = (0..h)
        .into_par_iter()
        .map(|row| {
            (0..w)
                .map(|col| {
                    let mut sum = 0.0f32;
                    for (k, &kval) in kernel.iter().enumerate() {
                        let offset = (k as isize - radius) * step as isize;
                        let c = mirror_index(col as isize + offset, w);
                        sum += data[[row, c]] * kval;
                    }
                    sum
                })
                .collect()
        })
        .collect();

    let mut result = Array2::<f32>::zeros((h, w));
    for (row, row_data) in rows.into_iter().enumerate() {
        for (col, val) in row_data.into_iter().enumerate() {
            result[[row, col]] = val;
        }
    }
    result
}

fn convolve_rows_atrous_sequential(
    data: &Array2<f32>,
    kernel: &[f32; 5],
    step: usize,
    h: usize,
    w: usize,
) -> Array2<f32> {
    let radius = 2isize;
    let mut result = Array2::<f32>::zeros((h, w));
    for row in 0..h {
        for col in 0..w {
            let mut sum = 0.0f32;
            for (k, &kval) in kernel.iter().enumerate() {
                let offset = (k as isize - radius) * step as isize;
                let c = mirror_index(col as isize + offset, w);
                sum += data[[row, c]] * kval;
            }
            result[[row, col]] = sum;
        }
    }
    result
}

fn convolve_cols_atrous(
    data: &Array2<f32>,
    kernel: &[f32; 5],
    step: usize,
    mode: DecompositionMode,
) -> Array2<f32> {
    let (h, w) = data.dim();
    if use_parallel(mode, h, w) {
        convolve_cols_atrous_parallel(data, kernel, step, h, w)
    } else {
        convolve_cols_atrous_sequential(data, kernel, step, h, w)
    }
}

fn convolve_cols_atrous_parallel(
    data: &Array2<f32>,
    kernel: &[f32; 5],
    step: usize,
    h: usize,
    w: usize,
) -> Array2<f32> {
    let radius = 2isize;
    let rows: Vec<Vec<f32>> = (0..h)
        .into_par_iter()
        .map(|row| {
            (0..w)
                .map(|col| {
                    let mut sum = 0.0f32;
                    for (k, &kval) in kernel.iter().enumerate() {
                        let offset = (k as isize - radius) * step as isize;
                        let r = mirror_index(row as isize + offset, h);
                        sum += data[[r, col]] * kval;
                    }
                    sum
                })
                .collect()
        })
        .collect();

    let mut result = Array2::<f32>::zeros((h, w));
    for (row, row_data) in rows.into_iter().enumerate() {
        for (col, val) in row_data.into_iter().enumerate() {
            result[[row, col]] = val;
        }
    }
    result
}

fn convolve_cols_atrous_sequential(
    data: &Array2<f32>,
    kernel: &[f32; 5],
    step: usize,
    h: usize,
    w: usize,
) -> Array2<f32> {
    let radius = 2isize;
    let mut result = Array2::<f32>::zeros((h, w));
    for row in 0..h {
        for col in 0..w {
            let mut sum = 0.0f32;
            for (k, &kval) in kernel.iter().enumerate() {
                let offset = (k as isize - radius) * step as isize;
                let r = mirror_index(row as isize + offset, h);
                sum += data[[r, col]] * kval;
            }
            result[[row, col]] = sum;
        }
    }
    result
}
