//! [`Points`] for dense `ndarray` matrices.

use ndarray::{ArrayBase, Data, Ix2};

use super::Points;

impl<S> Points for ArrayBase<S, Ix2>
where
    S: Data<Elem = f64> + Sync,
{
    fn n_rows(&self) -> usize {
        self.nrows()
    }

    fn n_cols(&self) -> usize {
        self.ncols()
    }

    fn for_each_entry(&self, row: usize, f: &mut dyn FnMut(usize, f64)) {
        for (j, &v) in self.row(row).iter().enumerate() {
            f(j, v);
        }
    }

    // Same accumulation order as the trait defaults, without the callback.
    fn row_dot(&self, row: usize, dense: &[f64]) -> f64 {
        self.row(row)
            .iter()
            .zip(dense.iter())
            .fold(0.0, |acc, (&a, &b)| acc + a * b)
    }

    fn row_squared_norm(&self, row: usize) -> f64 {
        self.row(row).iter().fold(0.0, |acc, &v| acc + v * v)
    }

    fn add_row_to(&self, row: usize, acc: &mut [f64]) {
        for (a, &v) in acc.iter_mut().zip(self.row(row).iter()) {
            *a += v;
        }
    }

    fn copy_row_to(&self, row: usize, out: &mut [f64]) {
        for (o, &v) in out.iter_mut().zip(self.row(row).iter()) {
            *o = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_views_and_owned_arrays_agree() {
        let x = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let view = x.view();
        assert_eq!(view.n_rows(), 2);
        assert_eq!(view.n_cols(), 3);
        assert_eq!(x.row_squared_norm(1), 77.0);
        assert_eq!(view.row_dot(0, &[1.0, 0.0, -1.0]), -2.0);
    }

    #[test]
    fn test_transposed_view_iterates_logical_rows() {
        let x = array![[1.0, 2.0], [3.0, 4.0]];
        let t = x.t();
        let mut row = [0.0; 2];
        t.copy_row_to(0, &mut row);
        assert_eq!(row, [1.0, 3.0]);
        let mut acc = [1.0, 1.0];
        t.add_row_to(1, &mut acc);
        assert_eq!(acc, [3.0, 5.0]);
    }
}
