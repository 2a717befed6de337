//! Row-subset views used for mini-batches and seeding subsamples.

use super::Points;
use crate::error::Result;

/// A borrowed selection of rows from another [`Points`] matrix.
///
/// Row `r` of the subset is row `rows[r]` of the parent. Nothing is copied.
#[derive(Debug)]
pub struct Subset<'a, P: ?Sized> {
    parent: &'a P,
    rows: &'a [usize],
}

impl<P: ?Sized> Clone for Subset<'_, P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P: ?Sized> Copy for Subset<'_, P> {}

impl<'a, P: Points + ?Sized> Subset<'a, P> {
    /// Selects `rows` from `parent`. Indices must be `< parent.n_rows()`.
    pub fn new(parent: &'a P, rows: &'a [usize]) -> Self {
        Self { parent, rows }
    }

    /// Parent row indices, in subset order.
    pub fn indices(&self) -> &'a [usize] {
        self.rows
    }

    /// Gathers per-row values of the parent (such as cached norms) into subset order.
    pub fn gather(&self, values: &[f64]) -> Vec<f64> {
        self.rows.iter().map(|&i| values[i]).collect()
    }
}

impl<P: Points + ?Sized> Points for Subset<'_, P> {
    fn n_rows(&self) -> usize {
        self.rows.len()
    }

    fn n_cols(&self) -> usize {
        self.parent.n_cols()
    }

    fn for_each_entry(&self, row: usize, f: &mut dyn FnMut(usize, f64)) {
        self.parent.for_each_entry(self.rows[row], f);
    }

    fn row_dot(&self, row: usize, dense: &[f64]) -> f64 {
        self.parent.row_dot(self.rows[row], dense)
    }

    fn row_squared_norm(&self, row: usize) -> f64 {
        self.parent.row_squared_norm(self.rows[row])
    }

    fn add_row_to(&self, row: usize, acc: &mut [f64]) {
        self.parent.add_row_to(self.rows[row], acc);
    }

    fn copy_row_to(&self, row: usize, out: &mut [f64]) {
        self.parent.copy_row_to(self.rows[row], out);
    }

    fn is_sparse(&self) -> bool {
        self.parent.is_sparse()
    }

    fn check_layout(&self) -> Result<()> {
        self.parent.check_layout()
    }
}
