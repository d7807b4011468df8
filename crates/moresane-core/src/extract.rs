use ndarray::{Array2, Array3, ArrayView2, Axis};

/// Label 8-connected components of the non-zero (or strictly positive)
/// pixels of a wavelet plane using two-pass union-find.
///
/// Returns the resolved label map (0 = background) and, indexed by label,
/// the peak absolute coefficient of each component. Tracking the peak during
/// the resolve pass avoids a separate sweep per component.
pub fn label_components(plane: ArrayView2<f32>, neg_comp: bool) -> (Array2<u32>, Vec<f32>) {
    let (h, w) = plane.dim();
    let foreground = |v: f32| if neg_comp { v != 0.0 } else { v > 0.0 };

    let mut labels = Array2::<u32>::zeros((h, w));
    let mut next_label: u32 = 1;
    // Union-find parent array. Index 0 unused; labels start at 1.
    let mut parent: Vec<u32> = vec![0; h * w / 4 + 2];

    // Pass 1: assign provisional labels, merging across the four already
    // visited 8-neighbours (up-left, up, up-right, left).
    for row in 0..h {
        for col in 0..w {
            if !foreground(plane[[row, col]]) {
                continue;
            }

            let mut neighbours = [0u32; 4];
            let mut count = 0;
            if row > 0 {
                if col > 0 && labels[[row - 1, col - 1]] > 0 {
                    neighbours[count] = labels[[row - 1, col - 1]];
                    count += 1;
                }
                if labels[[row - 1, col]] > 0 {
                    neighbours[count] = labels[[row - 1, col]];
                    count += 1;
                }
                if col + 1 < w && labels[[row - 1, col + 1]] > 0 {
                    neighbours[count] = labels[[row - 1, col + 1]];
                    count += 1;
                }
            }
            if col > 0 && labels[[row, col - 1]] > 0 {
                neighbours[count] = labels[[row, col - 1]];
                count += 1;
            }

            if count == 0 {
                if next_label as usize >= parent.len() {
                    parent.resize(parent.len() * 2, 0);
                }
                parent[next_label as usize] = next_label;
                labels[[row, col]] = next_label;
                next_label += 1;
            } else {
                let smallest = neighbours[..count].iter().copied().min().unwrap_or(0);
                labels[[row, col]] = smallest;
                for &n in &neighbours[..count] {
                    if n != smallest {
                        union(&mut parent, smallest, n);
                    }
                }
            }
        }
    }

    // Flatten parent references.
    for i in 1..next_label as usize {
        parent[i] = find(&parent, i as u32);
    }

    // Pass 2: resolve labels and record per-component peaks.
    let mut peaks = vec![0.0f32; next_label as usize];
    for row in 0..h {
        for col in 0..w {
            let lbl = labels[[row, col]];
            if lbl == 0 {
                continue;
            }
            let root = parent[lbl as usize];
            labels[[row, col]] = root;
            let magnitude = plane[[row, col]].abs();
            if magnitude > peaks[root as usize] {
                peaks[root as usize] = magnitude;
            }
        }
    }

    (labels, peaks)
}

fn find(parent: &[u32], mut x: u32) -> u32 {
    while parent[x as usize] != x {
        x = parent[x as usize];
    }
    x
}

fn union(parent: &mut [u32], a: u32, b: u32) {
    let ra = find(parent, a);
    let rb = find(parent, b);
    if ra != rb {
        let (small, big) = if ra < rb { (ra, rb) } else { (rb, ra) };
        parent[big as usize] = small;
    }
}

/// Extract the significant structures from a thresholded wavelet cube.
///
/// Scales are processed coarse to fine. At each scale, a component is kept
/// when its peak coefficient reaches `tolerance` times the scale maximum, or
/// when it overlaps a component kept at the next coarser scale; the latter
/// enforces the hierarchical significance rule. Returns the cube with
/// non-retained pixels zeroed, and the boolean mask of retained pixels.
pub fn source_extraction(
    cube: &Array3<f32>,
    tolerance: f32,
    neg_comp: bool,
) -> (Array3<f32>, Array3<bool>) {
    let (scales, h, w) = cube.dim();
    let mut sources = Array3::<f32>::zeros((scales, h, w));
    let mut mask = Array3::from_elem((scales, h, w), false);

    let mut coarser_mask = Array2::from_elem((h, w), false);

    for scale in (0..scales).rev() {
        let plane = cube.index_axis(Axis(0), scale);
        let scale_max = plane
            .iter()
            .map(|&v| if neg_comp { v.abs() } else { v })
            .fold(0.0f32, f32::max);
        if scale_max == 0.0 {
            coarser_mask.fill(false);
            continue;
        }

        let (labels, peaks) = label_components(plane, neg_comp);

        let mut retained = vec![false; peaks.len()];
        for (root, &peak) in peaks.iter().enumerate() {
            if peak >= tolerance * scale_max {
                retained[root] = true;
            }
        }
        for row in 0..h {
            for col in 0..w {
                let root = labels[[row, col]];
                if root > 0 && coarser_mask[[row, col]] {
                    retained[root as usize] = true;
                }
            }
        }

        let mut out_plane = sources.index_axis_mut(Axis(0), scale);
        let mut mask_plane = mask.index_axis_mut(Axis(0), scale);
        for row in 0..h {
            for col in 0..w {
                let root = labels[[row, col]];
                if root > 0 && retained[root as usize] {
                    out_plane[[row, col]] = plane[[row, col]];
                    mask_plane[[row, col]] = true;
                }
            }
        }
        coarser_mask.assign(&mask_plane);
    }

    (sources, mask)
}
