use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use ndarray::Array2;
use tracing::info;

use moresane_core::convolve::ConvolutionMode;
use moresane_core::deconv::{DeconvConfig, DeconvSession};
use moresane_core::io::fits::{write_fits, FitsReader};
use moresane_core::iuwt::DecompositionMode;

#[derive(Args)]
pub struct RunArgs {
    /// Input FITS file containing the dirty map
    pub dirty: PathBuf,

    /// Input FITS file containing the PSF
    pub psf: PathBuf,

    /// Optional FITS file containing a deconvolution mask
    #[arg(long)]
    pub mask: Option<PathBuf>,

    /// TOML file with the full deconvolution configuration; overrides the
    /// individual tuning flags below
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Size in pixels of the central region to deconvolve
    #[arg(long)]
    pub subregion: Option<usize>,

    /// Maximum wavelet scale to consider
    #[arg(long)]
    pub scale_count: Option<usize>,

    /// Number of sigma at which thresholding is performed
    #[arg(long, default_value = "4.0")]
    pub sigma_level: f32,

    /// Loop gain for the deconvolution
    #[arg(long, default_value = "0.1")]
    pub loop_gain: f32,

    /// Tolerance level for object extraction
    #[arg(long, default_value = "0.75")]
    pub tolerance: f32,

    /// Relative improvement of the residual noise at which to stop
    #[arg(long, default_value = "1e-6")]
    pub accuracy: f32,

    /// Maximum number of major loop iterations
    #[arg(long, default_value = "100")]
    pub major_loop_miter: usize,

    /// Maximum number of minor loop iterations
    #[arg(long, default_value = "30")]
    pub minor_loop_miter: usize,

    /// Convolution mode (linear or circular)
    #[arg(long, default_value = "linear")]
    pub conv_mode: String,

    /// Decomposition mode (serial or parallel)
    #[arg(long, default_value = "serial")]
    pub decom_mode: String,

    /// Constrain the model to be strictly non-negative
    #[arg(long)]
    pub enforce_positivity: bool,

    /// Suppress edge wavelet coefficients
    #[arg(long)]
    pub edge_suppression: bool,

    /// Additional number of edge pixels to ignore
    #[arg(long, default_value = "0")]
    pub edge_offset: usize,

    /// Approximate deconvolution depth in Jy
    #[arg(long, default_value = "0.0")]
    pub flux_threshold: f32,

    /// Keep negative wavelet coefficients as candidate structure
    #[arg(long)]
    pub neg_comp: bool,

    /// Border width excluded from the noise estimate
    #[arg(long, default_value = "0")]
    pub edge_excl: usize,

    /// Half-width of the central square excluded from the noise estimate
    #[arg(long, default_value = "0")]
    pub int_excl: usize,

    /// Run a single pass at full depth instead of the scale-by-scale loop
    #[arg(long)]
    pub single_run: bool,

    /// First scale of the scale-by-scale loop
    #[arg(long, default_value = "1")]
    pub start_scale: usize,

    /// Last scale of the scale-by-scale loop
    #[arg(long, default_value = "20")]
    pub stop_scale: usize,

    /// Output prefix for the model, residual and restored FITS files
    #[arg(short, long, default_value = "moresane")]
    pub output: PathBuf,
}

pub fn run(args: &RunArgs) -> Result<()> {
    let dirty = load_image(&args.dirty)
        .with_context(|| format!("Failed to load {}", args.dirty.display()))?;
    let psf =
        load_image(&args.psf).with_context(|| format!("Failed to load {}", args.psf.display()))?;
    let mask = match &args.mask {
        Some(path) => {
            Some(load_image(path).with_context(|| format!("Failed to load {}", path.display()))?)
        }
        None => None,
    };

    println!(
        "Loaded {}x{} dirty map and {}x{} PSF",
        dirty.nrows(),
        dirty.ncols(),
        psf.nrows(),
        psf.ncols()
    );

    let config = build_config(args)?;
    crate::summary::print_run_summary(&config, args);

    let mut session = DeconvSession::new(dirty, psf, mask)?;
    let outcome = if args.single_run {
        session.moresane(&config)?
    } else {
        session.moresane_by_scale(&config, args.start_scale, args.stop_scale)?
    };

    info!(
        status = %outcome.status,
        iterations = outcome.major_iterations,
        residual_std = outcome.residual_std,
        "Deconvolution finished"
    );
    println!(
        "Finished ({}) after {} major iterations, residual std {:.3e}",
        outcome.status, outcome.major_iterations, outcome.residual_std
    );

    let (restored, beam) = session.restore();
    println!(
        "Clean beam: {:.2} x {:.2} px FWHM at {:.1} deg",
        beam.bmaj, beam.bmin, beam.bpa
    );

    let model_path = suffixed(&args.output, "_model.fits");
    let residual_path = suffixed(&args.output, "_residual.fits");
    let restored_path = suffixed(&args.output, "_restored.fits");

    write_fits(&model_path, &session.model, None)?;
    write_fits(&residual_path, &session.residual, None)?;
    write_fits(&restored_path, &restored, Some(&beam))?;

    println!(
        "Saved {}, {} and {}",
        model_path.display(),
        residual_path.display(),
        restored_path.display()
    );

    Ok(())
}

fn load_image(path: &Path) -> Result<Array2<f32>> {
    let reader = FitsReader::open(path)?;
    Ok(reader.read_image()?)
}

fn suffixed(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn build_config(args: &RunArgs) -> Result<DeconvConfig> {
    if let Some(path) = &args.config {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: DeconvConfig =
            toml::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))?;
        return Ok(config);
    }

    let conv_mode = match args.conv_mode.as_str() {
        "linear" => ConvolutionMode::Linear,
        "circular" => ConvolutionMode::Circular,
        other => bail!("Unknown convolution mode '{other}' (use linear or circular)"),
    };
    let decom_mode = match args.decom_mode.as_str() {
        "serial" | "ser" => DecompositionMode::Serial,
        "parallel" | "mp" => DecompositionMode::Parallel,
        other => bail!("Unknown decomposition mode '{other}' (use serial or parallel)"),
    };

    Ok(DeconvConfig {
        subregion: args.subregion,
        scale_count: args.scale_count,
        sigma_level: args.sigma_level,
        loop_gain: args.loop_gain,
        tolerance: args.tolerance,
        accuracy: args.accuracy,
        major_loop_miter: args.major_loop_miter,
        minor_loop_miter: args.minor_loop_miter,
        conv_mode,
        decom_mode,
        enforce_positivity: args.enforce_positivity,
        edge_suppression: args.edge_suppression,
        edge_offset: args.edge_offset,
        flux_threshold: args.flux_threshold,
        neg_comp: args.neg_comp,
        edge_excl: args.edge_excl,
        int_excl: args.int_excl,
    })
}
