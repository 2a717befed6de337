//! Initial centroid selection.
//!
//! Four strategies share one contract: given the data and `k`, produce a
//! `k x n_features` dense matrix whose rows are pairwise distinct.
//!
//! - [`InitStrategy::KMeansPlusPlus`]: D² weighted sampling with greedy local trials
//! - [`InitStrategy::Random`]: `k` distinct rows drawn uniformly
//! - [`InitStrategy::Matrix`]: centroids supplied by the caller
//! - [`InitStrategy::Custom`]: a caller-supplied function
//!
//! All randomness comes from the generator passed in, so a fixed seed
//! reproduces the same centroids.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use log::debug;
use ndarray::{Array2, ArrayView1};
use rand::seq::index::sample;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::assign::clamp_squared_distance;
use crate::error::{Error, Result};
use crate::matrix::{Points, Subset};

/// Signature of a caller-supplied initializer: `(data, k, rng) -> k x n_features`.
pub type InitFn = Arc<dyn Fn(&dyn Points, usize, &mut dyn RngCore) -> Array2<f64> + Send + Sync>;

/// Relative size of the nudge applied to coincident initial centroids.
const DUPLICATE_PERTURBATION: f64 = 1e-8;

/// How the initial centroids are chosen.
#[derive(Clone, Default)]
pub enum InitStrategy {
    /// k-means++ seeding.
    #[default]
    KMeansPlusPlus,
    /// `k` distinct rows chosen uniformly at random.
    Random,
    /// Explicit `k x n_features` centroids.
    Matrix(Array2<f64>),
    /// A caller-supplied initializer.
    Custom(InitFn),
}

impl InitStrategy {
    /// Wraps a closure as a [`InitStrategy::Custom`] initializer.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&dyn Points, usize, &mut dyn RngCore) -> Array2<f64> + Send + Sync + 'static,
    {
        InitStrategy::Custom(Arc::new(f))
    }

    /// Fails if an explicit matrix does not have shape `(k, n_features)`.
    pub(crate) fn validate(&self, k: usize, n_features: usize) -> Result<()> {
        match self {
            InitStrategy::Matrix(m) => check_shape(m, k, n_features),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for InitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitStrategy::KMeansPlusPlus => write!(f, "KMeansPlusPlus"),
            InitStrategy::Random => write!(f, "Random"),
            InitStrategy::Matrix(m) => write!(f, "Matrix({}x{})", m.nrows(), m.ncols()),
            InitStrategy::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl FromStr for InitStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "k-means++" | "kmeans++" => Ok(InitStrategy::KMeansPlusPlus),
            "random" => Ok(InitStrategy::Random),
            other => Err(Error::UnknownInit(other.to_string())),
        }
    }
}

/// Generator for a `random_state`; an unset state draws a seed from the thread RNG.
pub fn seeded_rng(random_state: Option<u64>) -> ChaCha20Rng {
    let seed = random_state.unwrap_or_else(|| rand::thread_rng().gen());
    ChaCha20Rng::seed_from_u64(seed)
}

fn check_shape(m: &Array2<f64>, k: usize, n_features: usize) -> Result<()> {
    if m.dim() != (k, n_features) {
        return Err(Error::MalformedInit {
            expected: (k, n_features),
            found: m.dim(),
        });
    }
    Ok(())
}

/// Computes initial centroids for `x` using `init`.
///
/// `x_squared_norms` is the cached `||x_i||²` of every row.
pub fn init_centroids<P, R>(
    x: &P,
    k: usize,
    init: &InitStrategy,
    x_squared_norms: &[f64],
    rng: &mut R,
) -> Result<Array2<f64>>
where
    P: Points,
    R: Rng,
{
    if k == 0 {
        return Err(Error::InvalidClusterCount(k));
    }
    let n = x.n_rows();
    let d = x.n_cols();
    let sampled = matches!(init, InitStrategy::KMeansPlusPlus | InitStrategy::Random);
    if sampled && n < k {
        return Err(Error::TooFewSamples { n_samples: n, k });
    }

    let mut centroids = match init {
        InitStrategy::KMeansPlusPlus => kmeans_plus_plus(x, k, x_squared_norms, rng),
        InitStrategy::Random => random_rows(x, k, rng),
        InitStrategy::Matrix(m) => {
            check_shape(m, k, d)?;
            m.clone()
        }
        InitStrategy::Custom(f) => {
            let m = f(x, k, rng);
            check_shape(&m, k, d)?;
            m
        }
    };
    separate_duplicates(&mut centroids, rng);
    Ok(centroids)
}

/// Like [`init_centroids`], but seeds on `init_size` rows drawn without
/// replacement when `init_size` is smaller than the dataset.
pub fn init_centroids_subsampled<P, R>(
    x: &P,
    k: usize,
    init: &InitStrategy,
    x_squared_norms: &[f64],
    init_size: usize,
    rng: &mut R,
) -> Result<Array2<f64>>
where
    P: Points,
    R: Rng,
{
    let n = x.n_rows();
    if init_size >= n {
        return init_centroids(x, k, init, x_squared_norms, rng);
    }
    let rows = sample(rng, n, init_size).into_vec();
    let subset = Subset::new(x, &rows);
    let subset_norms = subset.gather(x_squared_norms);
    init_centroids(&subset, k, init, &subset_norms, rng)
}

/// k-means++ seeding.
///
/// The first centroid is a uniformly random row. Each following centroid is
/// the best of `2 + ln(k)` candidates drawn with probability proportional to
/// the squared distance to the nearest centroid chosen so far, where "best"
/// means the candidate leaving the smallest total potential.
pub fn kmeans_plus_plus<P, R>(x: &P, k: usize, x_squared_norms: &[f64], rng: &mut R) -> Array2<f64>
where
    P: Points + ?Sized,
    R: Rng + ?Sized,
{
    let n = x.n_rows();
    let d = x.n_cols();
    let n_local_trials = 2 + (k as f64).ln() as usize;
    let mut centroids = Array2::zeros((k, d));
    let mut buf = vec![0.0; d];

    let first = rng.gen_range(0..n);
    x.copy_row_to(first, &mut buf);
    centroids.row_mut(0).assign(&ArrayView1::from(&buf[..]));
    let mut closest = distances_to(x, x_squared_norms, &buf, x_squared_norms[first]);
    let mut potential: f64 = closest.iter().sum();

    for c in 1..k {
        let mut cumulative = Vec::with_capacity(n);
        let mut running = 0.0;
        for &dist in &closest {
            running += dist;
            cumulative.push(running);
        }

        let mut best: Option<(usize, f64, Vec<f64>)> = None;
        for _ in 0..n_local_trials {
            // Draws lie in (0, potential] so zero-weight rows are never hit
            // while any potential remains.
            let draw = (1.0 - rng.gen::<f64>()) * potential;
            let candidate = cumulative.partition_point(|&s| s < draw).min(n - 1);
            x.copy_row_to(candidate, &mut buf);
            let mut trial = distances_to(x, x_squared_norms, &buf, x_squared_norms[candidate]);
            for (t, &prev) in trial.iter_mut().zip(closest.iter()) {
                *t = t.min(prev);
            }
            let trial_potential: f64 = trial.iter().sum();
            if best.as_ref().map_or(true, |(_, p, _)| trial_potential < *p) {
                best = Some((candidate, trial_potential, trial));
            }
        }

        if let Some((candidate, trial_potential, trial)) = best {
            x.copy_row_to(candidate, &mut buf);
            centroids.row_mut(c).assign(&ArrayView1::from(&buf[..]));
            closest = trial;
            potential = trial_potential;
        }
    }
    centroids
}

/// Squared distance from every row of `x` to the dense point `y`.
fn distances_to<P: Points + ?Sized>(x: &P, x_squared_norms: &[f64], y: &[f64], y_norm: f64) -> Vec<f64> {
    x_squared_norms
        .iter()
        .enumerate()
        .map(|(i, &norm)| clamp_squared_distance(norm - 2.0 * x.row_dot(i, y) + y_norm, norm + y_norm))
        .collect()
}

/// `k` distinct rows chosen uniformly without replacement.
pub fn random_rows<P, R>(x: &P, k: usize, rng: &mut R) -> Array2<f64>
where
    P: Points + ?Sized,
    R: Rng + ?Sized,
{
    let rows = sample(rng, x.n_rows(), k).into_vec();
    let mut centroids = Array2::zeros((k, x.n_cols()));
    let mut buf = vec![0.0; x.n_cols()];
    for (c, &i) in rows.iter().enumerate() {
        x.copy_row_to(i, &mut buf);
        centroids.row_mut(c).assign(&ArrayView1::from(&buf[..]));
    }
    centroids
}

/// Nudges any centroid that coincides exactly with an earlier one.
fn separate_duplicates<R: Rng + ?Sized>(centroids: &mut Array2<f64>, rng: &mut R) {
    for j in 1..centroids.nrows() {
        while (0..j).any(|i| centroids.row(i) == centroids.row(j)) {
            debug!("centroid {} coincides with an earlier seed, perturbing it", j);
            for v in centroids.row_mut(j).iter_mut() {
                let scale = DUPLICATE_PERTURBATION * v.abs().max(1.0);
                *v += scale * (2.0 * rng.gen::<f64>() - 1.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::squared_row_norms;
    use crate::testing::{plane_blobs, sparse_blobs, to_csr};
    use ndarray::array;

    fn rng(seed: u64) -> ChaCha20Rng {
        ChaCha20Rng::seed_from_u64(seed)
    }

    fn rows_of(x: &Array2<f64>, c: &Array2<f64>) -> bool {
        c.outer_iter().all(|cr| x.outer_iter().any(|xr| xr == cr))
    }

    #[test]
    fn test_parse_strategy_names() {
        assert!(matches!("k-means++".parse::<InitStrategy>(), Ok(InitStrategy::KMeansPlusPlus)));
        assert!(matches!("random".parse::<InitStrategy>(), Ok(InitStrategy::Random)));
        match "invalid".parse::<InitStrategy>() {
            Err(Error::UnknownInit(name)) => assert_eq!(name, "invalid"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_random_picks_data_rows() {
        let (x, _) = sparse_blobs(1);
        let norms = squared_row_norms(&x);
        let c = init_centroids(&x, 3, &InitStrategy::Random, &norms, &mut rng(0)).unwrap();
        assert_eq!(c.dim(), (3, 5));
        assert!(rows_of(&x, &c));
    }

    #[test]
    fn test_kmeans_plus_plus_spreads_over_blobs() {
        let (x, _) = plane_blobs(100, 9);
        let norms = squared_row_norms(&x);
        let c = init_centroids(&x, 3, &InitStrategy::KMeansPlusPlus, &norms, &mut rng(42)).unwrap();
        assert!(rows_of(&x, &c));
        for i in 0..3 {
            for j in (i + 1)..3 {
                let d: f64 = c
                    .row(i)
                    .iter()
                    .zip(c.row(j).iter())
                    .map(|(a, b)| (a - b).powi(2))
                    .sum();
                assert!(d > 25.0, "seeds {} and {} share a blob", i, j);
            }
        }
    }

    #[test]
    fn test_kmeans_plus_plus_dense_and_sparse_agree() {
        let (x, _) = sparse_blobs(11);
        let x_csr = to_csr(&x);
        let dense = kmeans_plus_plus(&x, 3, &squared_row_norms(&x), &mut rng(5));
        let sparse = kmeans_plus_plus(&x_csr, 3, &squared_row_norms(&x_csr), &mut rng(5));
        assert_eq!(dense, sparse);
    }

    #[test]
    fn test_matrix_shape_is_checked() {
        let x = array![[0.0, 1.0], [1.0, 0.0], [2.0, 2.0]];
        let norms = squared_row_norms(&x);
        let bad = InitStrategy::Matrix(array![[0.0, 1.0, 2.0], [1.0, 0.0, 2.0]]);
        let err = init_centroids(&x, 2, &bad, &norms, &mut rng(0)).unwrap_err();
        assert!(matches!(
            err,
            Error::MalformedInit { expected: (2, 2), found: (2, 3) }
        ));
        assert!(bad.validate(2, 2).is_err());
    }

    #[test]
    fn test_custom_initializer() {
        let x = array![[0.0, 1.0], [1.0, 0.0], [2.0, 2.0]];
        let norms = squared_row_norms(&x);
        let init = InitStrategy::custom(|data, k, _rng| Array2::from_elem((k, data.n_cols()), 0.5));
        let c = init_centroids(&x, 1, &init, &norms, &mut rng(0)).unwrap();
        assert_eq!(c, array![[0.5, 0.5]]);

        let wrong = InitStrategy::custom(|_, _, _| Array2::zeros((4, 2)));
        assert!(matches!(
            init_centroids(&x, 2, &wrong, &norms, &mut rng(0)),
            Err(Error::MalformedInit { .. })
        ));
    }

    #[test]
    fn test_coincident_seeds_are_separated() {
        let x = array![[1.0, 1.0], [1.0, 1.0], [1.0, 1.0]];
        let norms = squared_row_norms(&x);
        let c = init_centroids(&x, 3, &InitStrategy::Random, &norms, &mut rng(3)).unwrap();
        for i in 0..3 {
            for j in (i + 1)..3 {
                assert_ne!(c.row(i), c.row(j));
            }
        }
        assert!(c.iter().all(|v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_seeded_rng_is_reproducible() {
        let a: Vec<u64> = (0..4).map(|_| seeded_rng(Some(9)).gen()).collect();
        assert!(a.iter().all(|&v| v == a[0]));
        let mut r1 = seeded_rng(Some(9));
        let mut r2 = seeded_rng(Some(10));
        assert_ne!(r1.gen::<u64>(), r2.gen::<u64>());
    }

    #[test]
    fn test_zero_clusters_is_rejected() {
        let x = array![[0.0, 1.0]];
        let norms = squared_row_norms(&x);
        assert!(matches!(
            init_centroids(&x, 0, &InitStrategy::Random, &norms, &mut rng(0)),
            Err(Error::InvalidClusterCount(0))
        ));
    }

    #[test]
    fn test_subsampled_seeding_uses_data_rows() {
        let (x, _) = plane_blobs(50, 2);
        let norms = squared_row_norms(&x);
        let c = init_centroids_subsampled(&x, 3, &InitStrategy::Random, &norms, 10, &mut rng(8))
            .unwrap();
        assert!(rows_of(&x, &c));
    }
}
