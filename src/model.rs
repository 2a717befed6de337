//! Fitted k-means state and the queries it answers.

use ndarray::{Array2, ArrayView2};

use crate::assign::{labels_inertia, pairwise_squared_distances, Assignment};
use crate::error::{Error, Result};
use crate::matrix::{squared_row_norms, Points};

/// Centroids, labels and inertia produced by a successful fit.
///
/// The three are always mutually consistent: `labels` is the nearest-centroid
/// assignment of the training data against `centroids`, and `inertia` is the
/// total squared distance of that assignment.
#[derive(Debug, Clone)]
pub struct KMeansModel {
    centroids: Array2<f64>,
    labels: Vec<usize>,
    inertia: f64,
    n_iter: usize,
    converged: bool,
}

impl KMeansModel {
    pub(crate) fn new(
        centroids: Array2<f64>,
        assignment: Assignment,
        n_iter: usize,
        converged: bool,
    ) -> Self {
        Self {
            centroids,
            labels: assignment.labels,
            inertia: assignment.inertia,
            n_iter,
            converged,
        }
    }

    /// The `k x n_features` centroid matrix.
    pub fn centroids(&self) -> ArrayView2<'_, f64> {
        self.centroids.view()
    }

    /// Cluster index of each training row (or of the last batch for
    /// incremental fits).
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Sum of squared distances of the labelled rows to their centroids.
    pub fn inertia(&self) -> f64 {
        self.inertia
    }

    pub fn n_clusters(&self) -> usize {
        self.centroids.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.centroids.ncols()
    }

    /// Iterations (full-batch) or mini-batch steps run by the selected fit.
    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    /// Whether the fit stopped before its iteration cap.
    pub fn converged(&self) -> bool {
        self.converged
    }

    fn check_input<P: Points + ?Sized>(&self, x: &P) -> Result<()> {
        x.check_layout()?;
        if x.n_cols() != self.n_features() {
            return Err(Error::DimensionMismatch {
                expected: self.n_features(),
                found: x.n_cols(),
            });
        }
        Ok(())
    }

    fn assign<P: Points + ?Sized>(&self, x: &P) -> Result<Assignment> {
        self.check_input(x)?;
        Ok(labels_inertia(x, &squared_row_norms(x), self.centroids.view()))
    }

    /// Nearest centroid of every row of `x`.
    pub fn predict<P: Points + ?Sized>(&self, x: &P) -> Result<Vec<usize>> {
        Ok(self.assign(x)?.labels)
    }

    /// Euclidean distance from every row of `x` to every centroid (N x K).
    pub fn transform<P: Points + ?Sized>(&self, x: &P) -> Result<Array2<f64>> {
        self.check_input(x)?;
        let squared = pairwise_squared_distances(x, &squared_row_norms(x), self.centroids.view());
        Ok(squared.mapv_into(f64::sqrt))
    }

    /// Negative inertia of `x` against the fitted centroids; higher is better.
    pub fn score<P: Points + ?Sized>(&self, x: &P) -> Result<f64> {
        Ok(-self.assign(x)?.inertia)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lloyd::{kmeans, KMeansConfig};
    use crate::testing::{sparse_blobs, to_csr};
    use approx::assert_relative_eq;
    use ndarray::array;

    fn fitted() -> (Array2<f64>, KMeansModel) {
        let (x, _) = sparse_blobs(42);
        let model = kmeans(&x, &KMeansConfig::new(3).with_random_state(42)).unwrap();
        (x, model)
    }

    #[test]
    fn test_predict_centroids_returns_their_own_indices() {
        let (_, model) = fitted();
        let pred = model.predict(&model.centroids()).unwrap();
        assert_eq!(pred, vec![0, 1, 2]);
    }

    #[test]
    fn test_predict_training_data_matches_labels() {
        let (x, model) = fitted();
        assert_eq!(model.predict(&x).unwrap(), model.labels());
        assert_eq!(model.predict(&to_csr(&x)).unwrap(), model.labels());
    }

    #[test]
    fn test_transform_centroids() {
        let (_, model) = fitted();
        let d = model.transform(&model.centroids()).unwrap();
        assert_eq!(d.dim(), (3, 3));
        for c in 0..3 {
            assert_eq!(d[[c, c]], 0.0);
            for c2 in 0..3 {
                if c != c2 {
                    assert!(d[[c, c2]] > 0.0);
                }
            }
        }
    }

    #[test]
    fn test_score_is_negative_training_inertia() {
        let (x, model) = fitted();
        assert_relative_eq!(model.score(&x).unwrap(), -model.inertia(), max_relative = 1e-12);
        assert!(model.inertia() >= 0.0);
    }

    #[test]
    fn test_feature_count_mismatch_is_rejected() {
        let (_, model) = fitted();
        let narrow = array![[1.0, 2.0]];
        assert!(matches!(
            model.predict(&narrow),
            Err(Error::DimensionMismatch { expected: 5, found: 2 })
        ));
        assert!(model.transform(&narrow).is_err());
        assert!(model.score(&narrow).is_err());
    }
}
