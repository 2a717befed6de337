//! Synthetic datasets shared by the unit tests.

use std::collections::HashMap;

use ndarray::Array2;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, Normal};
use sprs::{CsMat, TriMat};

/// Three 5-D clusters whose centers have mostly-zero coordinates. Noise is
/// only added on a center's support, so the matrix keeps genuine zeros and a
/// CSR copy stores 1 to 3 entries per row.
pub(crate) const SPARSE_CENTERS: [[f64; 5]; 3] = [
    [0.0, 15.0, 0.0, 0.0, 0.0],
    [3.0, 3.0, 12.0, 0.0, 0.0],
    [3.0, 0.0, 0.0, 15.0, 3.0],
];

/// Three well separated 2-D clusters, at least 12 apart.
pub(crate) const PLANE_CENTERS: [[f64; 2]; 3] = [[0.0, 0.0], [12.0, 0.0], [0.0, 12.0]];

pub(crate) fn sparse_centers() -> Array2<f64> {
    Array2::from_shape_fn((3, 5), |(i, j)| SPARSE_CENTERS[i][j])
}

/// 150 points (50 per cluster, interleaved) around [`SPARSE_CENTERS`].
pub(crate) fn sparse_blobs(seed: u64) -> (Array2<f64>, Vec<usize>) {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 1.0).unwrap();
    let n = 150;
    let labels: Vec<usize> = (0..n).map(|i| i % 3).collect();
    let x = Array2::from_shape_fn((n, 5), |(i, j)| {
        let c = SPARSE_CENTERS[labels[i]][j];
        if c == 0.0 {
            0.0
        } else {
            c + noise.sample(&mut rng)
        }
    });
    (x, labels)
}

/// `per_cluster` points per cluster (interleaved) around [`PLANE_CENTERS`], std 1.
pub(crate) fn plane_blobs(per_cluster: usize, seed: u64) -> (Array2<f64>, Vec<usize>) {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 1.0).unwrap();
    let n = per_cluster * 3;
    let labels: Vec<usize> = (0..n).map(|i| i % 3).collect();
    let x = Array2::from_shape_fn((n, 2), |(i, j)| {
        PLANE_CENTERS[labels[i]][j] + noise.sample(&mut rng)
    });
    (x, labels)
}

pub(crate) fn to_csr(x: &Array2<f64>) -> CsMat<f64> {
    let mut tri = TriMat::new((x.nrows(), x.ncols()));
    for ((i, j), &v) in x.indexed_iter() {
        if v != 0.0 {
            tri.add_triplet(i, j, v);
        }
    }
    tri.to_csr()
}

/// True when `found` is `expected` up to a relabeling of clusters.
pub(crate) fn same_partition(expected: &[usize], found: &[usize]) -> bool {
    if expected.len() != found.len() {
        return false;
    }
    let mut forward = HashMap::new();
    let mut backward = HashMap::new();
    for (&e, &f) in expected.iter().zip(found.iter()) {
        if *forward.entry(e).or_insert(f) != f || *backward.entry(f).or_insert(e) != e {
            return false;
        }
    }
    true
}

pub(crate) fn n_distinct(labels: &[usize]) -> usize {
    let mut seen: Vec<usize> = labels.to_vec();
    seen.sort_unstable();
    seen.dedup();
    seen.len()
}
