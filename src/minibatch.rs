//! Mini-batch k-means.
//!
//! Each step assigns a small random batch against the current centroids and
//! folds the batch into a running per-centroid mean, so centroid `c` after any
//! number of steps is the exact mean of every row it has ever absorbed.
//! A centroid that receives nothing for `starvation_patience` consecutive
//! batches is moved onto the farthest row of the current batch.
//!
//! [`MiniBatchKMeans::fit`] drives a fixed dataset; [`MiniBatchKMeans::partial_fit`]
//! accepts one caller-supplied batch at a time and keeps its state between calls.

use log::{debug, trace};
use ndarray::{Array2, ArrayView1};
use rand::seq::index::sample;
use rand_chacha::ChaCha20Rng;

use crate::assign::{farthest_rows, labels_inertia};
use crate::error::{Error, Result};
use crate::init::{init_centroids_subsampled, seeded_rng, InitStrategy};
use crate::lloyd::validate_data;
use crate::matrix::{mean_variance, squared_row_norms, Points, Subset};
use crate::model::KMeansModel;

/// Configuration options for mini-batch k-means.
#[derive(Debug, Clone)]
pub struct MiniBatchConfig {
    /// Number of clusters to find.
    pub k: usize,
    /// How initial centroids are chosen.
    pub init: InitStrategy,
    /// Number of candidate initializations compared on a validation sample.
    pub n_init: usize,
    /// Maximum number of passes over the data; a pass is `ceil(N / batch_size)` steps.
    pub max_iterations: usize,
    /// Rows per mini-batch.
    pub batch_size: usize,
    /// Early-stopping threshold on the smoothed centroid movement, relative to
    /// the mean column variance. 0 disables it.
    pub tolerance: f64,
    /// Stop after this many steps without improvement of the smoothed inertia.
    pub max_no_improvement: Option<usize>,
    /// Rows used for seeding and for scoring candidate initializations.
    /// Defaults to `3 * batch_size`.
    pub init_size: Option<usize>,
    /// Consecutive empty batches after which a centroid is reseeded. 0 disables it.
    pub starvation_patience: usize,
    /// Seed for all randomness. `None` takes a seed from the thread-local generator.
    pub random_state: Option<u64>,
}

impl MiniBatchConfig {
    /// Create a new config with default values: k-means++ seeding, 3 inits,
    /// 100 passes, batches of 100 rows and early stopping after 10 flat steps.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            init: InitStrategy::default(),
            n_init: 3,
            max_iterations: 100,
            batch_size: 100,
            tolerance: 0.0,
            max_no_improvement: Some(10),
            init_size: None,
            starvation_patience: 10,
            random_state: None,
        }
    }

    /// Customize the seeding strategy.
    pub fn with_init(mut self, init: InitStrategy) -> Self {
        self.init = init;
        self
    }

    /// Customize the number of candidate initializations.
    pub fn with_n_init(mut self, n_init: usize) -> Self {
        self.n_init = n_init;
        self
    }

    /// Customize the maximum number of passes over the data.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Customize the number of rows per mini-batch.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Customize the early-stopping tolerance on centroid movement.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Customize how many flat steps are tolerated; `None` disables the check.
    pub fn with_max_no_improvement(mut self, steps: Option<usize>) -> Self {
        self.max_no_improvement = steps;
        self
    }

    /// Customize the number of rows used for seeding and init scoring.
    pub fn with_init_size(mut self, init_size: usize) -> Self {
        self.init_size = Some(init_size);
        self
    }

    /// Customize how many empty batches a centroid may see before reseeding.
    pub fn with_starvation_patience(mut self, patience: usize) -> Self {
        self.starvation_patience = patience;
        self
    }

    /// Fix the seed so fits are reproducible.
    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    /// Requested init size before clamping to the dataset.
    pub fn init_size(&self) -> usize {
        self.init_size
            .unwrap_or_else(|| self.batch_size.saturating_mul(3))
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
        if self.batch_size == 0 {
            return Err(Error::invalid("batch_size", "must be at least 1"));
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(Error::invalid(
                "tolerance",
                format!("must be finite and >= 0, got {}", self.tolerance),
            ));
        }
        if let Some(size) = self.init_size {
            if size < self.k {
                return Err(Error::invalid(
                    "init_size",
                    format!("{} is smaller than k = {}", size, self.k),
                ));
            }
        }
        Ok(())
    }

    /// Init size actually used for a dataset of `n_rows` rows.
    fn effective_init_size(&self, n_rows: usize) -> usize {
        self.init_size().max(self.k).min(n_rows)
    }
}

/// What one mini-batch step did.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchStep {
    /// Inertia of the batch against the centroids before the update.
    pub inertia: f64,
    /// Total squared movement of all centroids during the step.
    pub squared_diff: f64,
    /// Number of starved centroids moved onto batch rows.
    pub reassigned: usize,
}

/// Running centroids plus the per-centroid bookkeeping the update needs.
#[derive(Debug, Clone)]
pub struct MiniBatchState {
    centroids: Array2<f64>,
    counts: Vec<u64>,
    starved: Vec<usize>,
}

impl MiniBatchState {
    /// Starts from `centroids` with no absorbed rows.
    pub fn new(centroids: Array2<f64>) -> Self {
        let k = centroids.nrows();
        Self {
            centroids,
            counts: vec![0; k],
            starved: vec![0; k],
        }
    }

    pub fn centroids(&self) -> &Array2<f64> {
        &self.centroids
    }

    /// Rows absorbed by each centroid since it was last (re)seeded.
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Assigns `batch`, updates every centroid that received rows and reseeds
    /// centroids starved for `patience` consecutive steps (0 never reseeds).
    pub fn step<P: Points + ?Sized>(
        &mut self,
        batch: &P,
        batch_norms: &[f64],
        patience: usize,
    ) -> BatchStep {
        let (k, d) = self.centroids.dim();
        let assignment = labels_inertia(batch, batch_norms, self.centroids.view());

        let mut sums = vec![0.0; k * d];
        let mut members = vec![0u64; k];
        for (i, &c) in assignment.labels.iter().enumerate() {
            members[c] += 1;
            batch.add_row_to(i, &mut sums[c * d..(c + 1) * d]);
        }

        let mut squared_diff = 0.0;
        for c in 0..k {
            if members[c] == 0 {
                self.starved[c] += 1;
                continue;
            }
            let n_old = self.counts[c] as f64;
            let total = n_old + members[c] as f64;
            let sum = &sums[c * d..(c + 1) * d];
            for (value, &s) in self.centroids.row_mut(c).iter_mut().zip(sum.iter()) {
                let updated = (*value * n_old + s) / total;
                squared_diff += (updated - *value) * (updated - *value);
                *value = updated;
            }
            self.counts[c] += members[c];
            self.starved[c] = 0;
        }

        let mut reassigned = 0;
        if patience > 0 {
            let starving: Vec<usize> = (0..k).filter(|&c| self.starved[c] >= patience).collect();
            if !starving.is_empty() {
                let far = farthest_rows(batch, &assignment.min_distances, starving.len());
                let mut buf = vec![0.0; d];
                for (&c, &i) in starving.iter().zip(far.iter()) {
                    batch.copy_row_to(i, &mut buf);
                    let mut row = self.centroids.row_mut(c);
                    for (value, &new) in row.iter_mut().zip(buf.iter()) {
                        squared_diff += (new - *value) * (new - *value);
                    }
                    row.assign(&ArrayView1::from(&buf[..]));
                    self.counts[c] = 0;
                    self.starved[c] = 0;
                    reassigned += 1;
                }
                debug!(
                    "reseeded {} of {} starved centroid(s) {:?}",
                    reassigned,
                    starving.len(),
                    starving
                );
            }
        }

        BatchStep {
            inertia: assignment.inertia,
            squared_diff,
            reassigned,
        }
    }
}

/// Early stopping on exponentially smoothed per-row batch statistics.
#[derive(Debug, Clone)]
struct ConvergenceMonitor {
    alpha: f64,
    tolerance: f64,
    max_no_improvement: Option<usize>,
    ewa_diff: Option<f64>,
    ewa_inertia: Option<f64>,
    best_inertia: f64,
    no_improvement: usize,
}

impl ConvergenceMonitor {
    fn new(n_rows: usize, batch_size: usize, tolerance: f64, max_no_improvement: Option<usize>) -> Self {
        Self {
            alpha: (2.0 * batch_size as f64 / (n_rows as f64 + 1.0)).min(1.0),
            tolerance,
            max_no_improvement,
            ewa_diff: None,
            ewa_inertia: None,
            best_inertia: f64::INFINITY,
            no_improvement: 0,
        }
    }

    fn smooth(&self, previous: Option<f64>, value: f64) -> f64 {
        match previous {
            Some(prev) => prev * (1.0 - self.alpha) + value * self.alpha,
            None => value,
        }
    }

    /// Records a step over `batch_len` rows; returns true when fitting should stop.
    fn update(&mut self, step: &BatchStep, batch_len: usize) -> bool {
        let len = batch_len.max(1) as f64;
        let diff = self.smooth(self.ewa_diff, step.squared_diff / len);
        let inertia = self.smooth(self.ewa_inertia, step.inertia / len);
        self.ewa_diff = Some(diff);
        self.ewa_inertia = Some(inertia);

        if self.tolerance > 0.0 && diff <= self.tolerance {
            debug!("smoothed centroid movement {:.3e} within tolerance", diff);
            return true;
        }

        if inertia < self.best_inertia {
            self.best_inertia = inertia;
            self.no_improvement = 0;
        } else {
            self.no_improvement += 1;
        }
        match self.max_no_improvement {
            Some(limit) if self.no_improvement >= limit => {
                debug!(
                    "no improvement of smoothed inertia over {} steps",
                    self.no_improvement
                );
                true
            }
            _ => false,
        }
    }
}

/// Mini-batch k-means estimator.
///
/// # Example
///
/// ```
/// use kmeans::{MiniBatchConfig, MiniBatchKMeans};
/// use ndarray::array;
///
/// let data = array![[0.0, 0.0], [0.1, 0.2], [9.0, 9.0], [9.2, 8.9]];
/// let mut estimator = MiniBatchKMeans::new(MiniBatchConfig::new(2).with_random_state(7));
/// let model = estimator.fit(&data).unwrap();
/// assert_eq!(model.labels()[0], model.labels()[1]);
/// ```
#[derive(Debug, Clone)]
pub struct MiniBatchKMeans {
    config: MiniBatchConfig,
    rng: Option<ChaCha20Rng>,
    state: Option<MiniBatchState>,
    model: Option<KMeansModel>,
}

impl MiniBatchKMeans {
    pub fn new(config: MiniBatchConfig) -> Self {
        Self {
            config,
            rng: None,
            state: None,
            model: None,
        }
    }

    pub fn config(&self) -> &MiniBatchConfig {
        &self.config
    }

    /// The fitted model, if any call has succeeded since the last failure.
    pub fn model(&self) -> Option<&KMeansModel> {
        self.model.as_ref()
    }

    /// Rows absorbed by each centroid so far.
    pub fn counts(&self) -> Option<&[u64]> {
        self.state.as_ref().map(|s| s.counts())
    }

    /// Configured init size (`3 * batch_size` unless set explicitly).
    pub fn init_size(&self) -> usize {
        self.config.init_size()
    }

    fn clear(&mut self) {
        self.state = None;
        self.model = None;
    }

    /// Fits on the whole of `x`, discarding any previous state.
    ///
    /// Labels and inertia of the returned model cover every row of `x`.
    pub fn fit<P: Points>(&mut self, x: &P) -> Result<&KMeansModel> {
        self.clear();
        self.config.validate()?;
        validate_data(x, self.config.k, &self.config.init)?;

        let config = &self.config;
        let mut rng = seeded_rng(config.random_state);
        let n = x.n_rows();
        let norms = squared_row_norms(x);
        let tolerance = mean_variance(x) * config.tolerance;
        let batch_size = config.batch_size.min(n);
        let init_size = config.effective_init_size(n);

        let n_init = match config.init {
            InitStrategy::Matrix(_) if config.n_init > 1 => {
                debug!("explicit initial centroids given, running a single init");
                1
            }
            _ => config.n_init,
        };

        let validation_rows = sample(&mut rng, n, init_size).into_vec();
        let validation = Subset::new(x, &validation_rows);
        let validation_norms = validation.gather(&norms);

        let mut best: Option<(MiniBatchState, f64)> = None;
        for i in 0..n_init {
            let centroids = init_centroids_subsampled(
                x,
                config.k,
                &config.init,
                &norms,
                init_size,
                &mut rng,
            )?;
            let mut state = MiniBatchState::new(centroids);
            state.step(&validation, &validation_norms, config.starvation_patience);
            let inertia = labels_inertia(&validation, &validation_norms, state.centroids.view()).inertia;
            debug!("init {}: validation inertia {:.6}", i, inertia);
            if best.as_ref().map_or(true, |(_, b)| inertia < *b) {
                best = Some((state, inertia));
            }
        }
        let Some((mut state, _)) = best else {
            return Err(Error::invalid("n_init", "must be at least 1"));
        };

        let n_steps = config.max_iterations.saturating_mul(n.div_ceil(batch_size));
        let mut monitor =
            ConvergenceMonitor::new(n, batch_size, tolerance, config.max_no_improvement);
        let mut n_iter = 0;
        let mut converged = false;
        for iteration in 0..n_steps {
            let rows = sample(&mut rng, n, batch_size).into_vec();
            let batch = Subset::new(x, &rows);
            let batch_norms = batch.gather(&norms);
            let step = state.step(&batch, &batch_norms, config.starvation_patience);
            n_iter = iteration + 1;
            trace!(
                "step {}/{}: batch inertia {:.6}, squared diff {:.3e}",
                n_iter,
                n_steps,
                step.inertia,
                step.squared_diff
            );
            if monitor.update(&step, batch_size) {
                converged = true;
                debug!("mini-batch k-means stopped early after {} steps", n_iter);
                break;
            }
        }

        let assignment = labels_inertia(x, &norms, state.centroids.view());
        debug!(
            "mini-batch k-means finished: k={}, inertia={:.6}, steps={}",
            config.k, assignment.inertia, n_iter
        );
        let model = KMeansModel::new(state.centroids.clone(), assignment, n_iter, converged);
        self.state = Some(state);
        self.rng = Some(rng);
        Ok(&*self.model.insert(model))
    }

    /// Updates the model with one batch.
    ///
    /// The first call seeds the centroids from `batch`. Labels and inertia of
    /// the returned model describe `batch` only. An empty batch leaves the
    /// state untouched.
    pub fn partial_fit<P: Points>(&mut self, batch: &P) -> Result<&KMeansModel> {
        self.config.validate()?;
        batch.check_layout()?;
        if batch.n_rows() == 0 {
            return self.model.as_ref().ok_or(Error::EmptyInput);
        }

        let norms = squared_row_norms(batch);
        let config = &self.config;
        let rng = self
            .rng
            .get_or_insert_with(|| seeded_rng(config.random_state));

        if let Some(state) = &self.state {
            let expected = state.centroids.ncols();
            if batch.n_cols() != expected {
                return Err(Error::DimensionMismatch {
                    expected,
                    found: batch.n_cols(),
                });
            }
        }
        let mut state = match self.state.take() {
            Some(state) => state,
            None => {
                validate_data(batch, config.k, &config.init)?;
                let init_size = config.effective_init_size(batch.n_rows());
                let centroids =
                    init_centroids_subsampled(batch, config.k, &config.init, &norms, init_size, rng)?;
                MiniBatchState::new(centroids)
            }
        };

        let step = state.step(batch, &norms, config.starvation_patience);
        let n_iter = self.model.as_ref().map_or(0, KMeansModel::n_iter) + 1;
        trace!(
            "partial_fit {}: batch inertia {:.6}, squared diff {:.3e}",
            n_iter,
            step.inertia,
            step.squared_diff
        );
        let assignment = labels_inertia(batch, &norms, state.centroids.view());
        let model = KMeansModel::new(state.centroids.clone(), assignment, n_iter, false);
        self.state = Some(state);
        Ok(&*self.model.insert(model))
    }
}
