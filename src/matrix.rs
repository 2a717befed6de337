//! Uniform read access over dense and sparse point matrices.
//!
//! Every kernel in the crate consumes the [`Points`] trait rather than a
//! concrete storage type. Two storage families implement it:
//!
//! - dense `ndarray` matrices (`Array2<f64>`, `ArrayView2<f64>`, ...), see [`dense`]
//! - compressed sparse row `sprs` matrices (`CsMat<f64>`, `CsMatView<f64>`, ...), see [`sparse`]
//!
//! The accessors visit stored entries in increasing column order and
//! accumulate sequentially. Because an absent sparse entry contributes an exact
//! zero to every sum, a dense matrix and its CSR counterpart produce
//! bit-identical norms, dot products and row sums.

pub mod dense;
pub mod sparse;
pub mod view;

pub use view::Subset;

use std::collections::HashSet;

use ndarray::Array2;

use crate::error::Result;

/// Read access to an N x D matrix of points, one point per row.
pub trait Points: Sync {
    /// Number of points (rows).
    fn n_rows(&self) -> usize;

    /// Number of features (columns).
    fn n_cols(&self) -> usize;

    /// Calls `f(column, value)` for every stored entry of `row`, in increasing
    /// column order. Dense storage visits every column.
    fn for_each_entry(&self, row: usize, f: &mut dyn FnMut(usize, f64));

    /// Dot product of `row` with a dense vector of length `n_cols()`.
    fn row_dot(&self, row: usize, dense: &[f64]) -> f64 {
        let mut acc = 0.0;
        self.for_each_entry(row, &mut |j, v| acc += v * dense[j]);
        acc
    }

    /// Squared L2 norm of `row`.
    fn row_squared_norm(&self, row: usize) -> f64 {
        let mut acc = 0.0;
        self.for_each_entry(row, &mut |_, v| acc += v * v);
        acc
    }

    /// Adds `row` into `acc` element-wise.
    fn add_row_to(&self, row: usize, acc: &mut [f64]) {
        self.for_each_entry(row, &mut |j, v| acc[j] += v);
    }

    /// Writes `row` densely into `out`.
    fn copy_row_to(&self, row: usize, out: &mut [f64]) {
        out.fill(0.0);
        self.add_row_to(row, out);
    }

    /// Whether absent entries are implicit zeros.
    fn is_sparse(&self) -> bool {
        false
    }

    /// Rejects storage layouts the kernels cannot iterate by row.
    fn check_layout(&self) -> Result<()> {
        Ok(())
    }
}

/// Squared L2 norm of every row, computed without densifying sparse rows.
pub fn squared_row_norms<P: Points + ?Sized>(x: &P) -> Vec<f64> {
    (0..x.n_rows()).map(|i| x.row_squared_norm(i)).collect()
}

/// Per-column mean.
pub fn column_means<P: Points + ?Sized>(x: &P) -> Vec<f64> {
    let n = x.n_rows();
    let mut sums = vec![0.0; x.n_cols()];
    for i in 0..n {
        x.add_row_to(i, &mut sums);
    }
    if n > 0 {
        for s in sums.iter_mut() {
            *s /= n as f64;
        }
    }
    sums
}

/// Mean over columns of the per-column variance.
///
/// Used to scale convergence tolerances to the spread of the data. Two passes:
/// deviations are taken from the column means, so large offsets do not cancel.
/// Zeros are accounted for per column in one term, which keeps dense and
/// sparse storage bit-identical.
pub fn mean_variance<P: Points + ?Sized>(x: &P) -> f64 {
    let n = x.n_rows();
    let d = x.n_cols();
    if n == 0 || d == 0 {
        return 0.0;
    }
    let means = column_means(x);
    let mut squares = vec![0.0; d];
    let mut nonzero = vec![0usize; d];
    for i in 0..n {
        x.for_each_entry(i, &mut |j, v| {
            if v != 0.0 {
                let dev = v - means[j];
                squares[j] += dev * dev;
                nonzero[j] += 1;
            }
        });
    }
    let total: f64 = squares
        .iter()
        .zip(nonzero.iter())
        .zip(means.iter())
        .map(|((&sq, &nz), &mean)| (sq + (n - nz) as f64 * mean * mean) / n as f64)
        .sum();
    total / d as f64
}

/// Counts distinct rows, stopping as soon as `limit` distinct rows are seen.
///
/// Explicit zeros and negative zeros compare equal to absent entries.
pub fn count_distinct_rows<P: Points + ?Sized>(x: &P, limit: usize) -> usize {
    let mut seen: HashSet<Vec<(usize, u64)>> = HashSet::new();
    for i in 0..x.n_rows() {
        if seen.len() >= limit {
            break;
        }
        seen.insert(row_key(x, i));
    }
    seen.len()
}

fn row_key<P: Points + ?Sized>(x: &P, row: usize) -> Vec<(usize, u64)> {
    let mut key = Vec::new();
    x.for_each_entry(row, &mut |j, v| {
        if v != 0.0 {
            key.push((j, v.to_bits()));
        }
    });
    key
}

/// Returns a dense copy of `x` with the column means subtracted, plus the means.
///
/// The caller's matrix is never modified; the copy lives only as long as the
/// fit that needs it.
pub fn centered_copy<P: Points + ?Sized>(x: &P) -> (Array2<f64>, Vec<f64>) {
    let means = column_means(x);
    let mut centered = Array2::zeros((x.n_rows(), x.n_cols()));
    for (i, mut row) in centered.outer_iter_mut().enumerate() {
        x.for_each_entry(i, &mut |j, v| row[j] = v);
        for (value, mean) in row.iter_mut().zip(means.iter()) {
            *value -= mean;
        }
    }
    (centered, means)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{plane_blobs, sparse_blobs, to_csr};
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use ndarray::array;

    #[test]
    fn test_squared_norms_dense_and_sparse_agree() {
        let (x, _) = sparse_blobs(42);
        let x_csr = to_csr(&x);
        let dense = squared_row_norms(&x);
        let sparse = squared_row_norms(&x_csr);
        assert_eq!(dense.len(), x.nrows());
        for (i, (a, b)) in dense.iter().zip(sparse.iter()).enumerate() {
            let expected: f64 = x.row(i).iter().map(|v| v * v).sum();
            assert_abs_diff_eq!(*a, expected, epsilon = 1e-10);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_row_dot_matches_between_storages() {
        let (x, _) = sparse_blobs(7);
        let x_csr = to_csr(&x);
        let y = [0.5, -1.0, 2.0, 0.25, 3.0];
        for i in 0..x.nrows() {
            assert_eq!(x.row_dot(i, &y), x_csr.row_dot(i, &y));
        }
    }

    #[test]
    fn test_column_means_and_variance() {
        let x = array![[1.0, 0.0], [3.0, 0.0], [5.0, 6.0]];
        let means = column_means(&x);
        assert_abs_diff_eq!(means[0], 3.0);
        assert_abs_diff_eq!(means[1], 2.0);
        // var col0 = 8/3, var col1 = 8
        assert_abs_diff_eq!(mean_variance(&x), (8.0 / 3.0 + 8.0) / 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(
            mean_variance(&x),
            mean_variance(&to_csr(&x)),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_variance_ignores_large_offsets() {
        let (x, _) = plane_blobs(100, 42);
        let base = mean_variance(&x);
        assert!(base > 30.0 && base < 37.0, "{}", base);
        for offset in [1e4, 1e8, 1e9] {
            let shifted = x.mapv(|v| v + offset);
            assert_relative_eq!(mean_variance(&shifted), base, max_relative = 1e-4);
        }
    }

    #[test]
    fn test_count_distinct_rows() {
        let x = array![[1.0, 0.0], [1.0, 0.0], [1.0, -0.0], [2.0, 2.0]];
        assert_eq!(count_distinct_rows(&x, 10), 2);
        assert_eq!(count_distinct_rows(&to_csr(&x), 10), 2);
        assert_eq!(count_distinct_rows(&x, 1), 1);
    }

    #[test]
    fn test_centered_copy_leaves_input_alone() {
        let x = array![[1.0, 2.0], [3.0, 6.0]];
        let before = x.clone();
        let (centered, means) = centered_copy(&x);
        assert_eq!(x, before);
        assert_eq!(means, vec![2.0, 4.0]);
        assert_eq!(centered, array![[-1.0, -2.0], [1.0, 2.0]]);
    }
}
