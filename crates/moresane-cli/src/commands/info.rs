use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use moresane_core::io::fits::FitsReader;

#[derive(Args)]
pub struct InfoArgs {
    /// FITS file to inspect
    pub file: PathBuf,
}

pub fn run(args: &InfoArgs) -> Result<()> {
    let reader = FitsReader::open(&args.file)
        .with_context(|| format!("Failed to open {}", args.file.display()))?;
    let header = &reader.header;

    println!("File:      {}", args.file.display());
    println!("BITPIX:    {}", header.bitpix);
    println!(
        "Axes:      {}",
        header
            .axes
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join(" x ")
    );
    for (i, ctype) in header.ctypes.iter().enumerate() {
        if !ctype.is_empty() {
            println!("CTYPE{}:    {}", i + 1, ctype);
        }
    }

    let image = reader.read_image()?;
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    let mut sum = 0.0f64;
    for &v in image.iter() {
        min = min.min(v);
        max = max.max(v);
        sum += v as f64;
    }
    println!("Plane:     {}x{}", image.nrows(), image.ncols());
    println!("Min/Max:   {min:.6e} / {max:.6e}");
    println!("Mean:      {:.6e}", sum / image.len() as f64);

    Ok(())
}
