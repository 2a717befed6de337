//! [`Points`] for compressed sparse row matrices from `sprs`.
//!
//! Only stored entries are visited; absent entries are exact zeros and do not
//! change any accumulated sum, so results match the dense path bit for bit.
//! Column indices within a row must be sorted, which `sprs` guarantees for
//! matrices built through its checked constructors.

use std::ops::Deref;

use sprs::CsMatBase;

use super::Points;
use crate::error::{Error, Result};

impl<IptrS, IndS, DataS> Points for CsMatBase<f64, usize, IptrS, IndS, DataS>
where
    IptrS: Deref<Target = [usize]> + Sync,
    IndS: Deref<Target = [usize]> + Sync,
    DataS: Deref<Target = [f64]> + Sync,
{
    fn n_rows(&self) -> usize {
        self.rows()
    }

    fn n_cols(&self) -> usize {
        self.cols()
    }

    fn for_each_entry(&self, row: usize, f: &mut dyn FnMut(usize, f64)) {
        if let Some(vec) = self.outer_view(row) {
            for (&j, &v) in vec.indices().iter().zip(vec.data().iter()) {
                f(j, v);
            }
        }
    }

    fn row_dot(&self, row: usize, dense: &[f64]) -> f64 {
        match self.outer_view(row) {
            Some(vec) => vec
                .indices()
                .iter()
                .zip(vec.data().iter())
                .fold(0.0, |acc, (&j, &v)| acc + v * dense[j]),
            None => 0.0,
        }
    }

    fn row_squared_norm(&self, row: usize) -> f64 {
        match self.outer_view(row) {
            Some(vec) => vec.data().iter().fold(0.0, |acc, &v| acc + v * v),
            None => 0.0,
        }
    }

    fn is_sparse(&self) -> bool {
        true
    }

    fn check_layout(&self) -> Result<()> {
        if self.is_csr() {
            Ok(())
        } else {
            Err(Error::NotCompressedRow)
        }
    }
}
