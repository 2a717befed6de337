//! Error types shared by the seeding, solver and model modules.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the clustering API.
///
/// Numerical degeneracies (empty clusters, coincident seeds) are recovered
/// internally and never appear here.
#[derive(Debug, Error)]
pub enum Error {
    /// The input matrix had no rows or no columns.
    #[error("empty input: expected at least one row and one column")]
    EmptyInput,

    /// `k` must be a positive integer.
    #[error("invalid number of clusters k = {0}, expected k >= 1")]
    InvalidClusterCount(usize),

    /// The dataset has fewer rows than requested clusters.
    #[error("n_samples = {n_samples} should be >= k = {k}")]
    TooFewSamples {
        /// Rows in the input.
        n_samples: usize,
        /// Requested cluster count.
        k: usize,
    },

    /// The dataset has fewer distinct rows than requested clusters.
    #[error("only {distinct} distinct points available for k = {k} clusters")]
    TooFewDistinctPoints {
        /// Distinct rows found.
        distinct: usize,
        /// Requested cluster count.
        k: usize,
    },

    /// A user-supplied or callable-produced centroid matrix had the wrong shape.
    #[error("initial centroids have shape {found:?}, expected {expected:?}")]
    MalformedInit {
        /// Expected `(k, n_features)`.
        expected: (usize, usize),
        /// Shape actually supplied.
        found: (usize, usize),
    },

    /// The named initialization strategy is not recognized.
    #[error("unknown init strategy '{0}', expected 'k-means++' or 'random'")]
    UnknownInit(String),

    /// Column count differs from the one the model was fitted on.
    #[error("dimension mismatch: expected {expected} features, found {found}")]
    DimensionMismatch {
        /// Fitted feature count.
        expected: usize,
        /// Feature count of the supplied data.
        found: usize,
    },

    /// A sparse matrix was supplied in compressed-column layout.
    #[error("sparse input must be in compressed sparse row (CSR) layout")]
    NotCompressedRow,

    /// A configuration value is out of range.
    #[error("invalid parameter '{name}': {message}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// What was wrong with it.
        message: String,
    },

    /// Building the worker pool for parallel restarts failed.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// An internal buffer could not be shaped into a matrix.
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

impl Error {
    pub(crate) fn invalid(name: &'static str, message: impl Into<String>) -> Self {
        Error::InvalidParameter {
            name,
            message: message.into(),
        }
    }
}
