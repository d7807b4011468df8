use std::fmt;

use serde::{Deserialize, Serialize};

use crate::convolve::ConvolutionMode;
use crate::iuwt::DecompositionMode;

/// Parameters of a deconvolution run.
///
/// `subregion` and `scale_count` default to the image side and to
/// log2(side) - 1 respectively when unset.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeconvConfig {
    /// Size, in pixels, of the central region to be analyzed and deconvolved.
    #[serde(default)]
    pub subregion: Option<usize>,
    /// Number of wavelet scales considered by the analysis.
    #[serde(default)]
    pub scale_count: Option<usize>,
    /// Number of sigma at which wavelet coefficients are thresholded.
    #[serde(default = "default_sigma_level")]
    pub sigma_level: f32,
    /// Fraction of each accepted fit added to the model.
    #[serde(default = "default_loop_gain")]
    pub loop_gain: f32,
    /// Fraction of the per-scale maximum below which a component is
    /// discarded as insignificant.
    #[serde(default = "default_tolerance")]
    pub tolerance: f32,
    /// Exit the major loop when the relative improvement of the residual
    /// standard deviation drops to this value.
    #[serde(default = "default_accuracy")]
    pub accuracy: f32,
    /// Maximum number of major loop iterations.
    #[serde(default = "default_major_loop_miter")]
    pub major_loop_miter: usize,
    /// Maximum number of minor (conjugate gradient) loop iterations.
    #[serde(default = "default_minor_loop_miter")]
    pub minor_loop_miter: usize,
    /// Convolution mode for the FFT service.
    #[serde(default)]
    pub conv_mode: ConvolutionMode,
    /// Execution mode for the wavelet decomposition.
    #[serde(default)]
    pub decom_mode: DecompositionMode,
    /// Constrain the model to be non-negative.
    #[serde(default)]
    pub enforce_positivity: bool,
    /// Zero wavelet coefficients inside the scale-dependent boundary guard.
    #[serde(default)]
    pub edge_suppression: bool,
    /// Additional user-specified border width ignored at every scale.
    #[serde(default)]
    pub edge_offset: usize,
    /// Approximate deconvolution depth in Jy; the major loop stops once the
    /// residual peak drops to this level.
    #[serde(default)]
    pub flux_threshold: f32,
    /// Keep negative wavelet coefficients as candidate structure.
    #[serde(default)]
    pub neg_comp: bool,
    /// Border width excluded from the noise estimate.
    #[serde(default)]
    pub edge_excl: usize,
    /// Half-width of the central square excluded from the noise estimate.
    #[serde(default)]
    pub int_excl: usize,
}

fn default_sigma_level() -> f32 {
    4.0
}

fn default_loop_gain() -> f32 {
    0.1
}

fn default_tolerance() -> f32 {
    0.75
}

fn default_accuracy() -> f32 {
    1e-6
}

fn default_major_loop_miter() -> usize {
    100
}

fn default_minor_loop_miter() -> usize {
    30
}

impl Default for DeconvConfig {
    fn default() -> Self {
        Self {
            subregion: None,
            scale_count: None,
            sigma_level: default_sigma_level(),
            loop_gain: default_loop_gain(),
            tolerance: default_tolerance(),
            accuracy: default_accuracy(),
            major_loop_miter: default_major_loop_miter(),
            minor_loop_miter: default_minor_loop_miter(),
            conv_mode: ConvolutionMode::default(),
            decom_mode: DecompositionMode::default(),
            enforce_positivity: false,
            edge_suppression: false,
            edge_offset: 0,
            flux_threshold: 0.0,
            neg_comp: false,
            edge_excl: 0,
            int_excl: 0,
        }
    }
}

/// Why a deconvolution run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitStatus {
    /// The residual converged (accuracy or flux threshold reached).
    Completed,
    /// No significant wavelet coefficients were detected.
    NoSignal,
    /// Every remaining scale produced unusable fits.
    Stalled,
    /// The major loop iteration cap was reached.
    IterationCap,
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Completed => write!(f, "completed"),
            ExitStatus::NoSignal => write!(f, "no signal"),
            ExitStatus::Stalled => write!(f, "stalled"),
            ExitStatus::IterationCap => write!(f, "iteration cap"),
        }
    }
}

/// Summary of a finished run.
#[derive(Clone, Copy, Debug)]
pub struct DeconvOutcome {
    pub status: ExitStatus,
    pub major_iterations: usize,
    /// Standard deviation of the residual over the analyzed subregion.
    pub residual_std: f32,
}
