//! Full-batch k-means (Lloyd's algorithm) with independent restarts.
//!
//! Each restart runs `INIT -> (ASSIGN -> UPDATE)* -> CONVERGED`:
//!
//! 1. seed centroids with the configured [`InitStrategy`]
//! 2. assign every row to its nearest centroid
//! 3. move each centroid to the mean of its rows; an empty cluster takes
//!    the row farthest from its own centroid
//! 4. stop once the total squared centroid shift is within
//!    `tolerance x mean column variance`, or at `max_iterations`
//!
//! The restart with the lowest inertia wins; ties keep the earliest restart.
//! Restarts share nothing mutable and may run on a rayon pool; their seeds
//! are drawn up front, so the outcome does not depend on `n_jobs`.

use log::{debug, trace};
use ndarray::{Array2, ArrayView1};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use crate::assign::{
    farthest_rows, labels_inertia, labels_inertia_precomputed, Assignment, PRECOMPUTE_MAX_ENTRIES,
};
use crate::error::{Error, Result};
use crate::init::{init_centroids, seeded_rng, InitStrategy};
use crate::matrix::{centered_copy, count_distinct_rows, mean_variance, squared_row_norms, Points};
use crate::model::KMeansModel;

/// Configuration options for full-batch k-means.
#[derive(Debug, Clone)]
pub struct KMeansConfig {
    /// Number of clusters to find.
    pub k: usize,
    /// How initial centroids are chosen.
    pub init: InitStrategy,
    /// Number of independent restarts; the best by inertia is kept.
    pub n_init: usize,
    /// Maximum number of assign/update iterations per restart.
    pub max_iterations: usize,
    /// Convergence tolerance, relative to the mean column variance of the data.
    pub tolerance: f64,
    /// Seed for all randomness. `None` takes a seed from the thread-local generator.
    pub random_state: Option<u64>,
    /// Subtract column means (dense input only) before iterating.
    pub center: bool,
    /// Keep an N x K distance buffer per restart when it fits the memory cap.
    pub precompute_distances: bool,
    /// Worker threads for restarts: 1 runs sequentially, 0 uses rayon's default.
    pub n_jobs: usize,
}

impl KMeansConfig {
    /// Create a new config with default values: k-means++ seeding, 10 restarts,
    /// 300 iterations, tolerance 1e-4, centering and precomputed distances on.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            init: InitStrategy::default(),
            n_init: 10,
            max_iterations: 300,
            tolerance: 1e-4,
            random_state: None,
            center: true,
            precompute_distances: true,
            n_jobs: 1,
        }
    }

    /// Customize the seeding strategy.
    pub fn with_init(mut self, init: InitStrategy) -> Self {
        self.init = init;
        self
    }

    /// Customize the number of independent restarts.
    pub fn with_n_init(mut self, n_init: usize) -> Self {
        self.n_init = n_init;
        self
    }

    /// Customize the maximum number of iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Customize the convergence tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Fix the seed so fits are reproducible.
    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    /// Toggle centering of dense input before iterating.
    pub fn with_centering(mut self, center: bool) -> Self {
        self.center = center;
        self
    }

    /// Toggle the N x K distance buffer.
    pub fn with_precompute_distances(mut self, precompute: bool) -> Self {
        self.precompute_distances = precompute;
        self
    }

    /// Customize the number of worker threads used for restarts.
    pub fn with_n_jobs(mut self, n_jobs: usize) -> Self {
        self.n_jobs = n_jobs;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(Error::InvalidClusterCount(self.k));
        }
        if self.n_init == 0 {
            return Err(Error::invalid("n_init", "must be at least 1"));
        }
        if self.max_iterations == 0 {
            return Err(Error::invalid("max_iterations", "must be at least 1"));
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(Error::invalid(
                "tolerance",
                format!("must be finite and >= 0, got {}", self.tolerance),
            ));
        }
        Ok(())
    }
}

/// Checks shared by both solvers before any computation starts.
pub(crate) fn validate_data<P: Points + ?Sized>(x: &P, k: usize, init: &InitStrategy) -> Result<()> {
    x.check_layout()?;
    let n = x.n_rows();
    if n == 0 || x.n_cols() == 0 {
        return Err(Error::EmptyInput);
    }
    if n < k {
        return Err(Error::TooFewSamples { n_samples: n, k });
    }
    init.validate(k, x.n_cols())?;
    let distinct = count_distinct_rows(x, k);
    if distinct < k {
        return Err(Error::TooFewDistinctPoints { distinct, k });
    }
    Ok(())
}

/// Outcome of one restart, in the coordinates the solver iterated in.
struct Run {
    centroids: Array2<f64>,
    inertia: f64,
    n_iter: usize,
    converged: bool,
}

/// The data one restart sees.
///
/// Seeding always runs on the caller's data; iteration runs on `fit_x`, which
/// is either the same matrix or a centered copy shifted by `offset`.
struct Problem<'a, P, Q> {
    seed_x: &'a P,
    seed_norms: &'a [f64],
    fit_x: &'a Q,
    fit_norms: &'a [f64],
    offset: Option<&'a [f64]>,
    tolerance: f64,
}

/// Runs k-means clustering on `x` and returns the best of `config.n_init` restarts.
///
/// # Errors
///
/// - [`Error::InvalidClusterCount`] if `config.k == 0`
/// - [`Error::TooFewSamples`] / [`Error::TooFewDistinctPoints`] if `x` cannot
///   support `k` clusters
/// - [`Error::MalformedInit`] if an explicit or custom init has the wrong shape
/// - [`Error::EmptyInput`], [`Error::NotCompressedRow`], [`Error::InvalidParameter`]
///
/// # Example
///
/// ```
/// use kmeans::{kmeans, KMeansConfig};
/// use ndarray::array;
///
/// let data = array![[1.0, 2.0], [1.5, 1.8], [5.0, 8.0], [8.0, 8.0]];
/// let model = kmeans(&data, &KMeansConfig::new(2).with_random_state(0)).unwrap();
///
/// assert_eq!(model.labels().len(), 4);
/// assert_eq!(model.centroids().dim(), (2, 2));
/// ```
pub fn kmeans<P: Points>(x: &P, config: &KMeansConfig) -> Result<KMeansModel> {
    config.validate()?;
    validate_data(x, config.k, &config.init)?;

    let norms = squared_row_norms(x);
    let tolerance = mean_variance(x) * config.tolerance;

    let n_init = match config.init {
        InitStrategy::Matrix(_) if config.n_init > 1 => {
            debug!("explicit initial centroids given, running a single restart");
            1
        }
        _ => config.n_init,
    };
    let mut rng = seeded_rng(config.random_state);
    let seeds: Vec<u64> = (0..n_init).map(|_| rng.gen()).collect();

    // Final labels and inertia come from the coordinates the solver iterated
    // in; only the centroids are shifted back.
    let (best, assignment) = if config.center && !x.is_sparse() {
        let (centered, means) = centered_copy(x);
        let centered_norms = squared_row_norms(&centered);
        let problem = Problem {
            seed_x: x,
            seed_norms: &norms,
            fit_x: &centered,
            fit_norms: &centered_norms,
            offset: Some(means.as_slice()),
            tolerance,
        };
        let mut best = run_restarts(&problem, config, &seeds)?;
        let assignment = labels_inertia(&centered, &centered_norms, best.centroids.view());
        let means = ArrayView1::from(&means[..]);
        for mut row in best.centroids.outer_iter_mut() {
            row += &means;
        }
        (best, assignment)
    } else {
        let problem = Problem {
            seed_x: x,
            seed_norms: &norms,
            fit_x: x,
            fit_norms: &norms,
            offset: None,
            tolerance,
        };
        let best = run_restarts(&problem, config, &seeds)?;
        let assignment = labels_inertia(x, &norms, best.centroids.view());
        (best, assignment)
    };

    debug!(
        "k-means finished: k={}, inertia={:.6}, n_iter={}, converged={}",
        config.k, assignment.inertia, best.n_iter, best.converged
    );
    Ok(KMeansModel::new(
        best.centroids,
        assignment,
        best.n_iter,
        best.converged,
    ))
}

/// Fits and returns only the training labels.
pub fn fit_predict<P: Points>(x: &P, config: &KMeansConfig) -> Result<Vec<usize>> {
    Ok(kmeans(x, config)?.labels().to_vec())
}

fn run_restarts<P: Points, Q: Points>(
    problem: &Problem<'_, P, Q>,
    config: &KMeansConfig,
    seeds: &[u64],
) -> Result<Run> {
    let runs: Vec<Run> = match config.n_jobs {
        1 => seeds
            .iter()
            .map(|&seed| single_run(problem, config, seed))
            .collect::<Result<_>>()?,
        0 => seeds
            .par_iter()
            .map(|&seed| single_run(problem, config, seed))
            .collect::<Result<_>>()?,
        jobs => {
            let pool = ThreadPoolBuilder::new().num_threads(jobs).build()?;
            pool.install(|| {
                seeds
                    .par_iter()
                    .map(|&seed| single_run(problem, config, seed))
                    .collect::<Result<_>>()
            })?
        }
    };

    let mut best: Option<Run> = None;
    for (i, run) in runs.into_iter().enumerate() {
        debug!(
            "restart {}: inertia {:.6} after {} iterations",
            i, run.inertia, run.n_iter
        );
        if best.as_ref().map_or(true, |b| run.inertia < b.inertia) {
            best = Some(run);
        }
    }
    best.ok_or_else(|| Error::invalid("n_init", "must be at least 1"))
}

fn single_run<P: Points, Q: Points>(
    problem: &Problem<'_, P, Q>,
    config: &KMeansConfig,
    seed: u64,
) -> Result<Run> {
    let k = config.k;
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let mut centroids = init_centroids(problem.seed_x, k, &config.init, problem.seed_norms, &mut rng)?;
    if let Some(offset) = problem.offset {
        let offset = ArrayView1::from(offset);
        for mut row in centroids.outer_iter_mut() {
            row -= &offset;
        }
    }

    let x = problem.fit_x;
    let n = x.n_rows();
    let mut distances = distance_buffer(config.precompute_distances, n, k, PRECOMPUTE_MAX_ENTRIES);

    let mut n_iter = 0;
    let mut converged = false;
    for iteration in 0..config.max_iterations {
        let assignment = match distances.as_mut() {
            Some(buffer) => labels_inertia_precomputed(x, problem.fit_norms, centroids.view(), buffer),
            None => labels_inertia(x, problem.fit_norms, centroids.view()),
        };
        let updated = recompute_centroids(x, &assignment, &centroids)?;
        let shift = squared_shift(&centroids, &updated);
        centroids = updated;
        n_iter = iteration + 1;
        trace!(
            "iteration {}: inertia {:.6}, centroid shift {:.3e}",
            iteration,
            assignment.inertia,
            shift
        );
        if shift <= problem.tolerance {
            converged = true;
            break;
        }
    }

    let inertia = labels_inertia(x, problem.fit_norms, centroids.view()).inertia;
    Ok(Run {
        centroids,
        inertia,
        n_iter,
        converged,
    })
}

/// N x K scratch buffer for the precomputed path, or `None` when disabled or
/// larger than `max_entries`.
fn distance_buffer(enabled: bool, n: usize, k: usize, max_entries: usize) -> Option<Array2<f64>> {
    if !enabled {
        return None;
    }
    match n.checked_mul(k) {
        Some(entries) if entries <= max_entries => Some(Array2::zeros((n, k))),
        _ => {
            debug!(
                "distance buffer of {} x {} exceeds {} entries, assigning directly",
                n, k, max_entries
            );
            None
        }
    }
}

/// Moves each centroid to the mean of its assigned rows.
///
/// Empty clusters are reseeded with the rows farthest from their own centroid,
/// one distinct row per empty cluster. If no such row exists the previous
/// centroid is kept.
pub(crate) fn recompute_centroids<P: Points + ?Sized>(
    x: &P,
    assignment: &Assignment,
    previous: &Array2<f64>,
) -> Result<Array2<f64>> {
    let (k, d) = previous.dim();
    let mut sums = vec![0.0; k * d];
    let mut counts = vec![0usize; k];
    for (i, &c) in assignment.labels.iter().enumerate() {
        counts[c] += 1;
        x.add_row_to(i, &mut sums[c * d..(c + 1) * d]);
    }

    let mut centroids = Array2::from_shape_vec((k, d), sums)?;
    for (mut row, &count) in centroids.outer_iter_mut().zip(counts.iter()) {
        if count > 0 {
            row /= count as f64;
        }
    }

    let empty: Vec<usize> = (0..k).filter(|&c| counts[c] == 0).collect();
    if !empty.is_empty() {
        let far = farthest_rows(x, &assignment.min_distances, empty.len());
        debug!(
            "{} empty cluster(s) {:?}, reseeding from rows {:?}",
            empty.len(),
            empty,
            far
        );
        let mut buf = vec![0.0; d];
        for (slot, &c) in empty.iter().enumerate() {
            match far.get(slot) {
                Some(&i) => {
                    x.copy_row_to(i, &mut buf);
                    centroids.row_mut(c).assign(&ArrayView1::from(&buf[..]));
                }
                None => centroids.row_mut(c).assign(&previous.row(c)),
            }
        }
    }
    Ok(centroids)
}

/// Sum of squared element-wise differences between two centroid sets.
pub(crate) fn squared_shift(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum()
}
