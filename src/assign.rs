//! Nearest-centroid assignment and inertia.
//!
//! Squared distances use the norm expansion
//!
//! ```text
//! ||x - c||² = ||x||² - 2 x·c + ||c||²
//! ```
//!
//! so sparse rows never need to be densified. The expansion can round to a
//! tiny negative (or tiny positive) value for coincident points; anything within
//! a few ulps of the norms, [`SQUARED_DISTANCE_EPSILON`] times
//! `||x||² + ||c||²`, is reported as exactly 0.

use ndarray::{Array2, ArrayView2};

use crate::matrix::Points;

/// Relative threshold under which a squared distance is treated as zero.
pub const SQUARED_DISTANCE_EPSILON: f64 = 4.0 * f64::EPSILON;

/// Largest N x K distance buffer the precomputed mode will allocate.
pub const PRECOMPUTE_MAX_ENTRIES: usize = 12_000_000;

/// Result of assigning every row to its nearest centroid.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    /// Nearest centroid index per row; ties go to the lowest index.
    pub labels: Vec<usize>,
    /// Squared distance from each row to its assigned centroid.
    pub min_distances: Vec<f64>,
    /// Sum of `min_distances`.
    pub inertia: f64,
}

/// Row-major copy of a centroid matrix with cached squared norms.
pub(crate) struct CentroidTable {
    flat: Vec<f64>,
    norms: Vec<f64>,
    dim: usize,
}

impl CentroidTable {
    pub(crate) fn new(centroids: ArrayView2<'_, f64>) -> Self {
        let dim = centroids.ncols();
        // `iter` walks logical row-major order whatever the memory layout.
        let flat: Vec<f64> = centroids.iter().copied().collect();
        let norms = flat
            .chunks(dim.max(1))
            .map(|row| row.iter().fold(0.0, |acc, &v| acc + v * v))
            .collect();
        Self { flat, norms, dim }
    }

    pub(crate) fn len(&self) -> usize {
        self.norms.len()
    }

    pub(crate) fn row(&self, c: usize) -> &[f64] {
        &self.flat[c * self.dim..(c + 1) * self.dim]
    }

    fn distance<P: Points + ?Sized>(&self, x: &P, row: usize, x_norm: f64, c: usize) -> f64 {
        let dot = x.row_dot(row, self.row(c));
        clamp_squared_distance(x_norm - 2.0 * dot + self.norms[c], x_norm + self.norms[c])
    }

    /// Index and squared distance of the nearest centroid to `row`.
    fn nearest<P: Points + ?Sized>(&self, x: &P, row: usize, x_norm: f64) -> (usize, f64) {
        let mut best = 0;
        let mut best_dist = f64::INFINITY;
        for c in 0..self.len() {
            let d = self.distance(x, row, x_norm, c);
            if d < best_dist {
                best_dist = d;
                best = c;
            }
        }
        (best, best_dist)
    }
}

#[inline]
pub(crate) fn clamp_squared_distance(d: f64, scale: f64) -> f64 {
    if d <= SQUARED_DISTANCE_EPSILON * scale {
        0.0
    } else {
        d
    }
}

/// Assigns each row of `x` to its nearest centroid.
///
/// `x_squared_norms[i]` must be `||x_i||²`, see [`crate::matrix::squared_row_norms`].
pub fn labels_inertia<P: Points + ?Sized>(
    x: &P,
    x_squared_norms: &[f64],
    centroids: ArrayView2<'_, f64>,
) -> Assignment {
    let table = CentroidTable::new(centroids);
    let n = x.n_rows();
    let mut labels = Vec::with_capacity(n);
    let mut min_distances = Vec::with_capacity(n);
    let mut inertia = 0.0;
    for (i, &norm) in x_squared_norms.iter().enumerate().take(n) {
        let (label, dist) = table.nearest(x, i, norm);
        labels.push(label);
        min_distances.push(dist);
        inertia += dist;
    }
    Assignment {
        labels,
        min_distances,
        inertia,
    }
}

/// Same as [`labels_inertia`], but first fills `distances` (shape N x K) with
/// every squared distance and then takes the row-wise argmin.
pub fn labels_inertia_precomputed<P: Points + ?Sized>(
    x: &P,
    x_squared_norms: &[f64],
    centroids: ArrayView2<'_, f64>,
    distances: &mut Array2<f64>,
) -> Assignment {
    fill_squared_distances(x, x_squared_norms, &CentroidTable::new(centroids), distances);
    let n = x.n_rows();
    let mut labels = Vec::with_capacity(n);
    let mut min_distances = Vec::with_capacity(n);
    let mut inertia = 0.0;
    for row in distances.outer_iter() {
        let mut best = 0;
        let mut best_dist = f64::INFINITY;
        for (c, &d) in row.iter().enumerate() {
            if d < best_dist {
                best_dist = d;
                best = c;
            }
        }
        labels.push(best);
        min_distances.push(best_dist);
        inertia += best_dist;
    }
    Assignment {
        labels,
        min_distances,
        inertia,
    }
}

/// Squared distance from every row to every centroid, N x K.
pub fn pairwise_squared_distances<P: Points + ?Sized>(
    x: &P,
    x_squared_norms: &[f64],
    centroids: ArrayView2<'_, f64>,
) -> Array2<f64> {
    let table = CentroidTable::new(centroids);
    let mut distances = Array2::zeros((x.n_rows(), table.len()));
    fill_squared_distances(x, x_squared_norms, &table, &mut distances);
    distances
}

fn fill_squared_distances<P: Points + ?Sized>(
    x: &P,
    x_squared_norms: &[f64],
    table: &CentroidTable,
    distances: &mut Array2<f64>,
) {
    for (i, mut row) in distances.outer_iter_mut().enumerate() {
        let norm = x_squared_norms[i];
        for (c, slot) in row.iter_mut().enumerate() {
            *slot = table.distance(x, i, norm, c);
        }
    }
}

/// Picks up to `count` replacement rows for empty or starved centroids.
///
/// Rows are visited from the largest assignment distance down (ties by lowest
/// row index); a row identical to one already picked is skipped, as is any row
/// already at zero distance from its centroid.
pub(crate) fn farthest_rows<P: Points + ?Sized>(
    x: &P,
    min_distances: &[f64],
    count: usize,
) -> Vec<usize> {
    let mut order: Vec<usize> = (0..min_distances.len()).collect();
    order.sort_by(|&a, &b| min_distances[b].total_cmp(&min_distances[a]).then(a.cmp(&b)));

    let d = x.n_cols();
    let mut picked: Vec<usize> = Vec::with_capacity(count);
    let mut picked_rows: Vec<Vec<f64>> = Vec::with_capacity(count);
    let mut buf = vec![0.0; d];
    for i in order {
        if picked.len() == count || min_distances[i] <= 0.0 {
            break;
        }
        x.copy_row_to(i, &mut buf);
        if picked_rows.iter().any(|r| *r == buf) {
            continue;
        }
        picked.push(i);
        picked_rows.push(buf.clone());
    }
    picked
}
