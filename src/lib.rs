//! K-means clustering over dense (`ndarray`) and sparse CSR (`sprs`) matrices.
//!
//! Two solvers share the same seeding strategies and assignment kernel:
//!
//! - [`kmeans`]: full-batch Lloyd iterations with independent restarts
//! - [`MiniBatchKMeans`]: incremental updates on random batches, with
//!   `partial_fit` for data that arrives in pieces
//!
//! Both produce a [`KMeansModel`] answering `predict`, `transform` and `score`.

pub mod assign;
pub mod error;
pub mod init;
pub mod lloyd;
pub mod matrix;
pub mod minibatch;
pub mod model;

#[cfg(test)]
mod testing;

pub use assign::{labels_inertia, Assignment};
pub use error::{Error, Result};
pub use init::{InitFn, InitStrategy};
pub use lloyd::{fit_predict, kmeans, KMeansConfig};
pub use matrix::Points;
pub use minibatch::{MiniBatchConfig, MiniBatchKMeans};
pub use model::KMeansModel;
