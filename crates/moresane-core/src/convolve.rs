use std::fmt;

use ndarray::Array2;
use num_complex::Complex;
use realfft::RealFftPlanner;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};

use crate::error::{MoresaneError, Result};

/// Convolution mode for the FFT service.
///
/// Circular convolution assumes a periodic repetition of the input, which can
/// cause edge effects. Linear convolution pads the input with zeros to avoid
/// them but is heavier on computation and memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConvolutionMode {
    #[default]
    Linear,
    Circular,
}

impl fmt::Display for ConvolutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvolutionMode::Linear => write!(f, "linear"),
            ConvolutionMode::Circular => write!(f, "circular"),
        }
    }
}

/// 2D real-to-complex FFT: r2c along rows, then a full complex FFT down each
/// of the remaining half-spectrum columns. Output shape is (h, w/2 + 1).
pub fn rfft2(data: &Array2<f32>) -> Array2<Complex<f32>> {
    let (h, w) = data.dim();
    let spec_w = w / 2 + 1;

    let mut real_planner = RealFftPlanner::<f32>::new();
    let r2c = real_planner.plan_fft_forward(w);

    let mut spectrum = Array2::<Complex<f32>>::zeros((h, spec_w));
    let mut row_in = vec![0.0f32; w];
    let mut row_out = vec![Complex::new(0.0, 0.0); spec_w];
    for row in 0..h {
        for col in 0..w {
            row_in[col] = data[[row, col]];
        }
        r2c.process(&mut row_in, &mut row_out).unwrap();
        for col in 0..spec_w {
            spectrum[[row, col]] = row_out[col];
        }
    }

    let mut planner = FftPlanner::<f32>::new();
    let fft_col = planner.plan_fft_forward(h);
    let mut col_data = vec![Complex::new(0.0, 0.0); h];
    for col in 0..spec_w {
        for row in 0..h {
            col_data[row] = spectrum[[row, col]];
        }
        fft_col.process(&mut col_data);
        for row in 0..h {
            spectrum[[row, col]] = col_data[row];
        }
    }

    spectrum
}

/// 2D complex-to-real inverse FFT of a half-spectrum of shape (h, w/2 + 1).
/// `width` is the row length of the real output; the result is normalized.
pub fn irfft2(spectrum: &Array2<Complex<f32>>, width: usize) -> Array2<f32> {
    let (h, spec_w) = spectrum.dim();
    let mut work = spectrum.clone();

    let mut planner = FftPlanner::<f32>::new();
    let ifft_col = planner.plan_fft_inverse(h);
    let mut col_data = vec![Complex::new(0.0, 0.0); h];
    for col in 0..spec_w {
        for row in 0..h {
            col_data[row] = work[[row, col]];
        }
        ifft_col.process(&mut col_data);
        for row in 0..h {
            work[[row, col]] = col_data[row];
        }
    }

    let mut real_planner = RealFftPlanner::<f32>::new();
    let c2r = real_planner.plan_fft_inverse(width);
    let scale = 1.0 / (h * width) as f32;

    let mut result = Array2::<f32>::zeros((h, width));
    let mut row_in = vec![Complex::new(0.0, 0.0); spec_w];
    let mut row_out = vec![0.0f32; width];
    for row in 0..h {
        for col in 0..spec_w {
            row_in[col] = work[[row, col]];
        }
        // The DC and Nyquist bins are real by conjugate symmetry; clear the
        // rounding residue the column pass leaves on them.
        row_in[0].im = 0.0;
        if width % 2 == 0 {
            row_in[spec_w - 1].im = 0.0;
        }
        c2r.process(&mut row_in, &mut row_out).unwrap();
        for col in 0..width {
            result[[row, col]] = row_out[col] * scale;
        }
    }

    result
}

/// Zero-pad an image from (h, w) to (2h, 2w), content in the top-left corner.
pub fn pad_to_double(data: &Array2<f32>) -> Array2<f32> {
    let (h, w) = data.dim();
    let mut padded = Array2::<f32>::zeros((2 * h, 2 * w));
    padded.slice_mut(ndarray::s![..h, ..w]).assign(data);
    padded
}

/// Extract the central (h, w) quadrant of a (2h, 2w) array.
pub fn extract_central_quadrant(padded: &Array2<f32>) -> Array2<f32> {
    let (ph, pw) = padded.dim();
    let (h, w) = (ph / 2, pw / 2);
    padded
        .slice(ndarray::s![h / 2..h / 2 + h, w / 2..w / 2 + w])
        .to_owned()
}

/// Swap half-planes along both axes (even dimensions): out[i] = in[(i + n/2) % n].
pub fn fftshift(data: &Array2<f32>) -> Array2<f32> {
    let (h, w) = data.dim();
    roll(data, h / 2, w / 2)
}

/// Cyclic shift: out[(i + dy) % h, (j + dx) % w] = in[i, j].
fn roll(data: &Array2<f32>, dy: usize, dx: usize) -> Array2<f32> {
    let (h, w) = data.dim();
    let mut result = Array2::<f32>::zeros((h, w));
    for row in 0..h {
        let dst_row = (row + dy) % h;
        for col in 0..w {
            result[[dst_row, (col + dx) % w]] = data[[row, col]];
        }
    }
    result
}

/// A precomputed PSF half-spectrum, ready for repeated convolutions against
/// images of a fixed target shape.
#[derive(Clone, Debug)]
pub struct PsfSpectrum {
    spectrum: Array2<Complex<f32>>,
    mode: ConvolutionMode,
    height: usize,
    width: usize,
}

impl PsfSpectrum {
    /// Prepare the spectrum of `psf` for convolving images of shape `target`.
    ///
    /// The PSF may be supplied at the target shape, or at double the target
    /// shape. For linear mode a double-size PSF is used directly (its wider
    /// sidelobe field improves the padded convolution); a target-size PSF is
    /// zero-padded first. For circular mode a double-size PSF is reduced to
    /// its central target-size region.
    pub fn prepare(
        psf: &Array2<f32>,
        target: (usize, usize),
        mode: ConvolutionMode,
    ) -> Result<Self> {
        let (h, w) = target;
        let (ph, pw) = psf.dim();
        let double = ph == 2 * h && pw == 2 * w;
        if !double && (ph != h || pw != w) {
            return Err(MoresaneError::PsfShapeMismatch {
                psf_height: ph,
                psf_width: pw,
                height: h,
                width: w,
            });
        }

        let spectrum = match mode {
            ConvolutionMode::Linear => {
                if double {
                    // Shift the lobe centre from (h, w) to (h/2, w/2), where a
                    // zero-padded target-size PSF puts it.
                    rfft2(&roll(psf, 2 * h - h / 2, 2 * w - w / 2))
                } else {
                    rfft2(&pad_to_double(psf))
                }
            }
            ConvolutionMode::Circular => {
                if double {
                    rfft2(&extract_central_quadrant(psf))
                } else {
                    rfft2(psf)
                }
            }
        };

        Ok(Self {
            spectrum,
            mode,
            height: h,
            width: w,
        })
    }

    pub fn mode(&self) -> ConvolutionMode {
        self.mode
    }

    /// Target image shape this spectrum convolves against.
    pub fn target(&self) -> (usize, usize) {
        (self.height, self.width)
    }
}

/// Convolve an image with a prepared PSF spectrum.
///
/// Linear mode pads the image to double size, multiplies in the Fourier
/// domain and extracts the central quadrant. Circular mode multiplies
/// directly and fftshifts the inverse, so that a PSF which is a delta at the
/// grid centre gives the identity in both modes.
pub fn fft_convolve(image: &Array2<f32>, psf: &PsfSpectrum) -> Result<Array2<f32>> {
    let (h, w) = image.dim();
    if (h, w) != (psf.height, psf.width) {
        return Err(MoresaneError::ConvolutionShapeMismatch {
            got_height: h,
            got_width: w,
            height: psf.height,
            width: psf.width,
        });
    }

    match psf.mode {
        ConvolutionMode::Linear => {
            let spectrum = rfft2(&pad_to_double(image)) * &psf.spectrum;
            Ok(extract_central_quadrant(&irfft2(&spectrum, 2 * w)))
        }
        ConvolutionMode::Circular => {
            let spectrum = rfft2(image) * &psf.spectrum;
            Ok(fftshift(&irfft2(&spectrum, w)))
        }
    }
}
