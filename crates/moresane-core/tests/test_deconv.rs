mod common;

use ndarray::Array2;

use moresane_core::convolve::{fft_convolve, ConvolutionMode, PsfSpectrum};
use moresane_core::deconv::{DeconvConfig, DeconvSession, ExitStatus};
use moresane_core::threshold::compute_mean_stddev;

use common::{add_noise, flux_within, gaussian_psf, linf};

fn convolve_sky(sky: &Array2<f32>, psf: &Array2<f32>) -> Array2<f32> {
    let spectrum = PsfSpectrum::prepare(psf, sky.dim(), ConvolutionMode::Linear).unwrap();
    fft_convolve(sky, &spectrum).unwrap()
}

fn residual_identity_error(session: &DeconvSession, dirty: &Array2<f32>, psf: &Array2<f32>) -> f32 {
    let spectrum = PsfSpectrum::prepare(psf, dirty.dim(), ConvolutionMode::Linear).unwrap();
    let predicted = dirty - &fft_convolve(&session.model, &spectrum).unwrap();
    linf(&(&session.residual - &predicted))
}

/// Point source under a 5px beam with white noise: the model concentrates
/// the unit flux at the source position and the residual drops to the noise
/// floor.
#[test]
fn test_point_source_recovery() {
    let side = 256;
    let psf = gaussian_psf(side, 5.0);
    let mut dirty = psf.clone();
    add_noise(&mut dirty, 0.01, 7);

    let config = DeconvConfig {
        loop_gain: 0.2,
        major_loop_miter: 20,
        enforce_positivity: true,
        ..DeconvConfig::default()
    };

    let mut session = DeconvSession::new(dirty.clone(), psf.clone(), None).unwrap();
    let outcome = session.moresane(&config).unwrap();

    assert!(outcome.major_iterations >= 1);
    assert!(outcome.major_iterations <= 20);

    let centre_flux = flux_within(&session.model, 128, 128, 3);
    assert!(
        (0.88..=1.12).contains(&centre_flux),
        "Recovered flux {centre_flux} strays too far from unity"
    );
    assert!(
        session.model[[128, 128]] > 0.4,
        "Model should be dominated by the source pixel, got {}",
        session.model[[128, 128]]
    );

    for row in 0..side {
        for col in 0..side {
            let dy = row as i64 - 128;
            let dx = col as i64 - 128;
            if dy * dy + dx * dx > 25 {
                assert!(
                    session.model[[row, col]].abs() < 0.05,
                    "Stray model component {} at [{row},{col}]",
                    session.model[[row, col]]
                );
            }
        }
    }

    let residual_std = compute_mean_stddev(session.residual.view()).1;
    assert!(
        (0.008..=0.015).contains(&residual_std),
        "Residual std {residual_std} should sit at the noise floor"
    );

    // The residual identity holds after every completed run.
    let error = residual_identity_error(&session, &dirty, &psf);
    assert!(error < 1e-4 * linf(&dirty), "Residual identity violated: {error}");
}

/// Two sources at different scales, recovered by the scale-by-scale driver.
#[test]
fn test_two_sources_by_scale() {
    let side = 256;
    let psf = gaussian_psf(side, 4.0);

    let mut sky = Array2::<f32>::zeros((side, side));
    sky[[64, 64]] = 1.0;
    // A Gaussian blob of FWHM 8px with integrated flux 2.0.
    let sigma = 8.0f64 / 2.354_82;
    let blob_peak = 2.0 / (2.0 * std::f64::consts::PI * sigma * sigma) as f32;
    common::add_gaussian(&mut sky, 192, 192, 8.0, blob_peak);

    let mut dirty = convolve_sky(&sky, &psf);
    add_noise(&mut dirty, 1e-4, 11);

    let config = DeconvConfig {
        loop_gain: 0.2,
        major_loop_miter: 50,
        enforce_positivity: true,
        ..DeconvConfig::default()
    };

    let mut session = DeconvSession::new(dirty.clone(), psf.clone(), None).unwrap();
    session.moresane_by_scale(&config, 1, 6).unwrap();

    let point_flux = flux_within(&session.model, 64, 64, 6);
    assert!(
        (0.9..=1.1).contains(&point_flux),
        "Point source flux {point_flux} not within 10%"
    );

    let blob_flux = flux_within(&session.model, 192, 192, 16);
    assert!(
        (1.75..=2.25).contains(&blob_flux),
        "Blob flux {blob_flux} strays too far from 2.0"
    );

    let error = residual_identity_error(&session, &dirty, &psf);
    assert!(error < 1e-4 * linf(&dirty), "Residual identity violated: {error}");
}

/// A null input terminates immediately with an untouched model.
#[test]
fn test_null_input_finishes_immediately() {
    let side = 64;
    let psf = gaussian_psf(side, 3.0);
    let dirty = Array2::<f32>::zeros((side, side));

    let mut session = DeconvSession::new(dirty, psf, None).unwrap();
    let outcome = session.moresane(&DeconvConfig::default()).unwrap();

    assert_eq!(outcome.status, ExitStatus::NoSignal);
    assert_eq!(outcome.major_iterations, 0);
    assert!(session.model.iter().all(|&v| v == 0.0));
    assert!(session.residual.iter().all(|&v| v == 0.0));
}

/// Positivity enforcement refuses an all-negative sky; without it (and with
/// negative components enabled) the source is modelled with negative flux.
#[test]
fn test_positivity_enforcement() {
    let side = 128;
    let psf = gaussian_psf(side, 5.0);
    let mut s1 = psf.clone();
    add_noise(&mut s1, 0.01, 7);
    let dirty = s1.mapv(|v| -v);

    let config = DeconvConfig {
        loop_gain: 0.2,
        major_loop_miter: 10,
        enforce_positivity: true,
        ..DeconvConfig::default()
    };
    let mut session = DeconvSession::new(dirty.clone(), psf.clone(), None).unwrap();
    session.moresane(&config).unwrap();

    assert!(
        session.model.iter().all(|&v| v.abs() < 1e-6),
        "Positivity must keep the model empty on a negative sky"
    );
    let drift = linf(&(&session.residual - &dirty));
    assert!(drift < 1e-6, "Residual should remain the dirty map, drift {drift}");

    let negative_config = DeconvConfig {
        loop_gain: 0.3,
        major_loop_miter: 5,
        neg_comp: true,
        ..DeconvConfig::default()
    };
    let mut negative_session = DeconvSession::new(dirty, psf, None).unwrap();
    negative_session.moresane(&negative_config).unwrap();

    let centre_flux = flux_within(&negative_session.model, 64, 64, 3);
    assert!(
        centre_flux < -0.1,
        "Negative component expected at the source, got {centre_flux}"
    );
}

/// One major iteration scales linearly with the loop gain.
#[test]
fn test_loop_gain_law() {
    let side = 64;
    let psf = gaussian_psf(side, 3.0);
    let dirty = psf.clone();

    let unit_config = DeconvConfig {
        loop_gain: 1.0,
        major_loop_miter: 1,
        ..DeconvConfig::default()
    };
    let quarter_config = DeconvConfig {
        loop_gain: 0.25,
        major_loop_miter: 1,
        ..DeconvConfig::default()
    };

    let mut unit = DeconvSession::new(dirty.clone(), psf.clone(), None).unwrap();
    unit.moresane(&unit_config).unwrap();
    let mut quarter = DeconvSession::new(dirty, psf, None).unwrap();
    quarter.moresane(&quarter_config).unwrap();

    assert!(
        unit.model[[32, 32]] > 0.3,
        "Unit-gain iteration should capture most of the source"
    );
    for (a, b) in unit.model.iter().zip(quarter.model.iter()) {
        assert!(
            (0.25 * a - b).abs() < 1e-6,
            "Loop gain law violated: {a} vs {b}"
        );
    }
}

/// The reversion guard never lets an iteration leave the residual noisier
/// than it found it, even at unit gain under circular convolution.
#[test]
fn test_residual_never_worsens() {
    let side = 64;
    let mut psf = gaussian_psf(side, 3.0);
    // Strong displaced sidelobes make an aggressive step risky.
    common::add_gaussian(&mut psf, 32, 44, 4.0, 0.5);
    common::add_gaussian(&mut psf, 32, 20, 4.0, 0.5);
    let mut dirty = psf.clone();
    add_noise(&mut dirty, 0.005, 3);

    let config = DeconvConfig {
        loop_gain: 1.0,
        major_loop_miter: 10,
        conv_mode: ConvolutionMode::Circular,
        ..DeconvConfig::default()
    };

    let before = compute_mean_stddev(dirty.view()).1;
    let mut session = DeconvSession::new(dirty, psf, None).unwrap();
    let outcome = session.moresane(&config).unwrap();

    let after = compute_mean_stddev(session.residual.view()).1;
    assert!(
        after <= before + 1e-6,
        "Residual std {after} worse than the dirty map {before} ({:?})",
        outcome.status
    );
}
