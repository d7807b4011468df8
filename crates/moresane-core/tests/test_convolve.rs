mod common;

use approx::assert_abs_diff_eq;
use ndarray::Array2;

use moresane_core::convolve::{
    extract_central_quadrant, fft_convolve, fftshift, irfft2, pad_to_double, rfft2,
    ConvolutionMode, PsfSpectrum,
};

use common::gaussian_psf;

fn test_pattern(side: usize) -> Array2<f32> {
    let mut data = Array2::<f32>::zeros((side, side));
    for r in 0..side {
        for c in 0..side {
            data[[r, c]] = (r as f32 * 0.31 + c as f32 * 0.17).sin() * 0.5
                + (r as f32 * 0.05).cos() * 0.25;
        }
    }
    data
}

fn delta_psf(side: usize, row: usize, col: usize) -> Array2<f32> {
    let mut psf = Array2::<f32>::zeros((side, side));
    psf[[row, col]] = 1.0;
    psf
}

#[test]
fn test_rfft2_irfft2_roundtrip() {
    let data = test_pattern(16);
    let restored = irfft2(&rfft2(&data), 16);

    for r in 0..16 {
        for c in 0..16 {
            assert_abs_diff_eq!(restored[[r, c]], data[[r, c]], epsilon = 1e-5);
        }
    }
}

#[test]
fn test_linear_delta_identity() {
    let image = test_pattern(32);
    let psf = delta_psf(32, 16, 16);
    let spectrum = PsfSpectrum::prepare(&psf, (32, 32), ConvolutionMode::Linear).unwrap();

    let result = fft_convolve(&image, &spectrum).unwrap();
    for r in 0..32 {
        for c in 0..32 {
            assert_abs_diff_eq!(result[[r, c]], image[[r, c]], epsilon = 1e-4);
        }
    }
}

#[test]
fn test_circular_delta_identity() {
    let image = test_pattern(32);
    let psf = delta_psf(32, 16, 16);
    let spectrum = PsfSpectrum::prepare(&psf, (32, 32), ConvolutionMode::Circular).unwrap();

    let result = fft_convolve(&image, &spectrum).unwrap();
    for r in 0..32 {
        for c in 0..32 {
            assert_abs_diff_eq!(result[[r, c]], image[[r, c]], epsilon = 1e-4);
        }
    }
}

#[test]
fn test_circular_offset_delta_wraps() {
    let image = test_pattern(16);
    let psf = delta_psf(16, 8, 9);
    let spectrum = PsfSpectrum::prepare(&psf, (16, 16), ConvolutionMode::Circular).unwrap();

    let result = fft_convolve(&image, &spectrum).unwrap();
    for r in 0..16 {
        for c in 0..16 {
            let src = (c + 16 - 1) % 16;
            assert_abs_diff_eq!(result[[r, c]], image[[r, src]], epsilon = 1e-4);
        }
    }
}

/// Linear mode against a naive O(n^4) spatial convolution with a centred
/// kernel and zero padding.
#[test]
fn test_linear_matches_direct_convolution() {
    let side = 16;
    let image = test_pattern(side);
    let psf = gaussian_psf(side, 3.0);

    let spectrum = PsfSpectrum::prepare(&psf, (side, side), ConvolutionMode::Linear).unwrap();
    let result = fft_convolve(&image, &spectrum).unwrap();

    let half = side as isize / 2;
    for r in 0..side {
        for c in 0..side {
            let mut expected = 0.0f64;
            for i in 0..side {
                for j in 0..side {
                    let kr = r as isize - i as isize + half;
                    let kc = c as isize - j as isize + half;
                    if kr >= 0 && kr < side as isize && kc >= 0 && kc < side as isize {
                        expected +=
                            image[[i, j]] as f64 * psf[[kr as usize, kc as usize]] as f64;
                    }
                }
            }
            assert_abs_diff_eq!(result[[r, c]], expected as f32, epsilon = 1e-3);
        }
    }
}

#[test]
fn test_double_size_psf_matches_padded_path() {
    let side = 32;
    let image = test_pattern(side);
    let psf = gaussian_psf(side, 4.0);

    // Embed the PSF centred in a double-size field, lobe centre at (side, side).
    let mut psf_double = Array2::<f32>::zeros((2 * side, 2 * side));
    psf_double
        .slice_mut(ndarray::s![side / 2..side / 2 + side, side / 2..side / 2 + side])
        .assign(&psf);

    let single = PsfSpectrum::prepare(&psf, (side, side), ConvolutionMode::Linear).unwrap();
    let double = PsfSpectrum::prepare(&psf_double, (side, side), ConvolutionMode::Linear).unwrap();

    let result_single = fft_convolve(&image, &single).unwrap();
    let result_double = fft_convolve(&image, &double).unwrap();

    for r in 0..side {
        for c in 0..side {
            assert_abs_diff_eq!(result_single[[r, c]], result_double[[r, c]], epsilon = 1e-4);
        }
    }
}

#[test]
fn test_shape_mismatch_is_fatal() {
    let psf = gaussian_psf(16, 3.0);
    assert!(PsfSpectrum::prepare(&psf, (32, 32), ConvolutionMode::Linear).is_err());

    let spectrum = PsfSpectrum::prepare(&psf, (16, 16), ConvolutionMode::Linear).unwrap();
    let image = test_pattern(32);
    assert!(fft_convolve(&image, &spectrum).is_err());
}

#[test]
fn test_pad_and_quadrant_helpers() {
    let data = test_pattern(4);
    let padded = pad_to_double(&data);
    assert_eq!(padded.dim(), (8, 8));
    for r in 0..4 {
        for c in 0..4 {
            assert_eq!(padded[[r, c]], data[[r, c]]);
        }
    }
    assert_eq!(padded[[5, 5]], 0.0);
    assert_eq!(padded[[0, 7]], 0.0);

    let quadrant = extract_central_quadrant(&padded);
    assert_eq!(quadrant.dim(), (4, 4));
    for r in 0..4 {
        for c in 0..4 {
            assert_eq!(quadrant[[r, c]], padded[[2 + r, 2 + c]]);
        }
    }
}

#[test]
fn test_fftshift_swaps_half_planes() {
    let mut data = Array2::<f32>::zeros((4, 4));
    for r in 0..4 {
        for c in 0..4 {
            data[[r, c]] = (r * 4 + c) as f32;
        }
    }
    let shifted = fftshift(&data);
    for r in 0..4 {
        for c in 0..4 {
            assert_eq!(shifted[[(r + 2) % 4, (c + 2) % 4]], data[[r, c]]);
        }
    }
}
