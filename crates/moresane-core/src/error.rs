use thiserror::Error;

#[derive(Error, Debug)]
pub enum MoresaneError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid FITS file: {0}")]
    InvalidFits(String),

    #[error("Invalid image dimensions {height}x{width}: expected a square power-of-two side of at least 4")]
    InvalidDimensions { height: usize, width: usize },

    #[error("PSF shape {psf_height}x{psf_width} matches neither the image shape {height}x{width} nor its double")]
    PsfShapeMismatch {
        psf_height: usize,
        psf_width: usize,
        height: usize,
        width: usize,
    },

    #[error("Mask shape {mask_height}x{mask_width} does not match the image shape {height}x{width}")]
    MaskShapeMismatch {
        mask_height: usize,
        mask_width: usize,
        height: usize,
        width: usize,
    },

    #[error("Image shape {got_height}x{got_width} does not match the prepared spectrum target {height}x{width}")]
    ConvolutionShapeMismatch {
        got_height: usize,
        got_width: usize,
        height: usize,
        width: usize,
    },

    #[error("Subregion of {0}px must be even and no larger than the image side")]
    InvalidSubregion(usize),
}

pub type Result<T> = std::result::Result<T, MoresaneError>;
