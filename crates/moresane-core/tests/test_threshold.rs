use ndarray::{Array3, Axis};

use moresane_core::threshold::{apply_threshold, estimate_threshold, suppression_mask};

fn pseudo_random_cube(scales: usize, side: usize) -> Array3<f32> {
    let mut cube = Array3::<f32>::zeros((scales, side, side));
    for s in 0..scales {
        for r in 0..side {
            for c in 0..side {
                let x = (s * side * side + r * side + c) as f32;
                cube[[s, r, c]] = (x * 12.9898).sin() * 0.4;
            }
        }
    }
    cube
}

#[test]
fn test_mad_estimate_on_known_values() {
    let mut cube = Array3::<f32>::zeros((1, 8, 8));
    for (i, v) in cube.iter_mut().enumerate() {
        *v = if i % 2 == 0 { 1.0 } else { -1.0 };
    }

    let sigmas = estimate_threshold(&cube, 0, 0);
    assert_eq!(sigmas.len(), 1);
    let expected = 1.0 / 0.6745;
    assert!(
        (sigmas[0] - expected).abs() < 1e-5,
        "sigma {} expected {}",
        sigmas[0],
        expected
    );
}

/// Doubling the input doubles the estimated sigma and the surviving
/// coefficient magnitudes while leaving the retained set unchanged.
#[test]
fn test_threshold_scaling_law() {
    let cube = pseudo_random_cube(2, 32);
    let doubled = cube.mapv(|v| 2.0 * v);

    let sigmas = estimate_threshold(&cube, 0, 0);
    let sigmas_doubled = estimate_threshold(&doubled, 0, 0);
    for (a, b) in sigmas.iter().zip(sigmas_doubled.iter()) {
        assert!((2.0 * a - b).abs() <= 1e-6 * b.abs(), "sigma did not scale");
    }

    let kept = apply_threshold(&cube, &sigmas, 2.0, false);
    let kept_doubled = apply_threshold(&doubled, &sigmas_doubled, 2.0, false);

    for (a, b) in kept.iter().zip(kept_doubled.iter()) {
        assert_eq!(*a > 0.0, *b > 0.0, "Retained set changed under scaling");
        assert!((2.0 * a - b).abs() <= 1e-6 * b.abs().max(1e-12));
    }
}

#[test]
fn test_exclusion_windows_ignore_artefacts() {
    let side = 16;
    let mut cube = Array3::<f32>::from_elem((1, side, side), 0.1f32);
    // Corrupt the border and the centre with large deterministic artefacts.
    for i in 0..side {
        cube[[0, 0, i]] = 100.0;
        cube[[0, side - 1, i]] = 100.0;
        cube[[0, i, 0]] = 100.0;
        cube[[0, i, side - 1]] = 100.0;
    }
    for r in 6..10 {
        for c in 6..10 {
            cube[[0, r, c]] = 100.0;
        }
    }

    let biased = estimate_threshold(&cube, 0, 0);
    let windowed = estimate_threshold(&cube, 2, 2);

    let clean = 0.1 / 0.6745;
    assert!((windowed[0] - clean).abs() < 1e-5);
    assert!(biased[0] >= windowed[0]);
}

#[test]
fn test_hard_threshold_clips_negatives() {
    let mut cube = Array3::<f32>::zeros((1, 4, 4));
    cube[[0, 1, 1]] = 5.0;
    cube[[0, 2, 2]] = -5.0;
    cube[[0, 3, 3]] = 0.5;
    let sigmas = vec![1.0f32];

    let kept = apply_threshold(&cube, &sigmas, 2.0, false);
    assert_eq!(kept[[0, 1, 1]], 5.0);
    assert_eq!(kept[[0, 2, 2]], 0.0, "Negative coefficient must be clipped");
    assert_eq!(kept[[0, 3, 3]], 0.0, "Sub-threshold coefficient must go");

    let kept_neg = apply_threshold(&cube, &sigmas, 2.0, true);
    assert_eq!(kept_neg[[0, 1, 1]], 5.0);
    assert_eq!(kept_neg[[0, 2, 2]], -5.0, "neg_comp keeps both signs");
}

#[test]
fn test_suppression_guard_widths() {
    let mask = suppression_mask(3, 64, true, 0).expect("mask expected");

    // Cumulative guards: 2, then 2+4=6, then 2+4+8=14.
    let plane0 = mask.index_axis(Axis(0), 0);
    assert_eq!(plane0[[1, 30]], 0.0);
    assert_eq!(plane0[[2, 30]], 1.0);

    let plane1 = mask.index_axis(Axis(0), 1);
    assert_eq!(plane1[[5, 30]], 0.0);
    assert_eq!(plane1[[6, 30]], 1.0);

    let plane2 = mask.index_axis(Axis(0), 2);
    assert_eq!(plane2[[13, 30]], 0.0);
    assert_eq!(plane2[[14, 30]], 1.0);
}

#[test]
fn test_suppression_edge_offset_widens_guard() {
    let mask = suppression_mask(3, 64, true, 10).expect("mask expected");

    // The user offset dominates until the cumulative guard exceeds it.
    let plane0 = mask.index_axis(Axis(0), 0);
    assert_eq!(plane0[[9, 30]], 0.0);
    assert_eq!(plane0[[10, 30]], 1.0);

    let plane2 = mask.index_axis(Axis(0), 2);
    assert_eq!(plane2[[13, 30]], 0.0);
    assert_eq!(plane2[[14, 30]], 1.0);
}

#[test]
fn test_suppression_offset_only() {
    let mask = suppression_mask(2, 32, false, 3).expect("mask expected");
    for plane in 0..2 {
        let p = mask.index_axis(Axis(0), plane);
        assert_eq!(p[[2, 16]], 0.0);
        assert_eq!(p[[3, 16]], 1.0);
    }
}

#[test]
fn test_no_suppression_requested() {
    assert!(suppression_mask(4, 32, false, 0).is_none());
}
