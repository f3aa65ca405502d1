//! Assembly of observed and permutation-null test statistics.
//!
//! Each replicate screens predictor columns, builds one centered kernel
//! matrix per candidate family over the surviving columns, scores every
//! response column, keeps the best kernel per response and sums the scores.
//! The null distribution repeats the same computation against row-permuted
//! responses.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::Rng;
use rand::seq::SliceRandom;
use thiserror::Error;

use crate::filter::{FilterError, filter_columns};
use crate::kernel::{KernelError, KernelFamily, KernelProvider, centered_kernel_matrix};
use crate::signal::{NoiseError, signal_to_noise};

/// Cooperative cancellation flag, polled once per replicate.
///
/// Clone the token and hand it to whatever watches for interrupts; calling
/// [`CancelToken::cancel`] makes every running replicate loop return
/// [`StatisticError::Interrupted`] before starting its next replicate. No
/// partial results are returned.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests that replicate loops holding a clone of this token stop.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Error, Debug)]
pub enum StatisticError {
    #[error("response matrix has {y_rows} rows but the predictor matrix has {x_rows}.")]
    RowMismatch { y_rows: usize, x_rows: usize },

    #[error("{variances} response variances supplied for {responses} response columns.")]
    VarianceMismatch {
        variances: usize,
        responses: usize,
    },

    #[error("at least one candidate kernel family is required.")]
    NoCandidateKernels,

    #[error("input matrices need at least two observations and one column each.")]
    EmptyInput,

    #[error("the number of replicates must be strictly positive.")]
    NoReplicates,

    #[error("computation stopped before completion.")]
    Interrupted,

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error(transparent)]
    Noise(#[from] NoiseError),
}

/// Observed statistics with the per-replicate selection results.
#[derive(Debug, Clone)]
pub struct ObservedStatistics {
    /// One statistic per replicate.
    pub statistics: Vec<f64>,
    /// Kernel chosen for each response column; shape `replicates × responses`.
    pub selected_kernels: Array2<KernelFamily>,
    /// Predictor columns kept by the filter; shape `replicates × predictors`.
    pub selected_columns: Array2<bool>,
}

/// A single statistic with the kernel chosen for each response column.
#[derive(Debug, Clone)]
pub struct KernelSelection {
    pub statistic: f64,
    pub selected_kernels: Vec<KernelFamily>,
}

/// Orchestrates feature screening, kernel construction and signal-to-noise
/// scoring over borrowed input matrices.
///
/// Responses are assumed column-centered, with their variances supplied in
/// `y_variances`. All randomness is drawn from the caller's generator, so a
/// seeded [`rand::rngs::StdRng`] reproduces every selection and every null
/// replicate exactly.
pub struct AssociationTest<'a> {
    y: ArrayView2<'a, f64>,
    y_variances: ArrayView1<'a, f64>,
    x: ArrayView2<'a, f64>,
    candidate_kernels: &'a [KernelFamily],
    gaussian: Option<&'a dyn KernelProvider>,
}

impl<'a> AssociationTest<'a> {
    /// Validates dimensions and builds a test over the built-in kernel
    /// families. Use [`AssociationTest::with_gaussian_provider`] when the
    /// candidate list contains [`KernelFamily::Gaussian`].
    pub fn new(
        y: ArrayView2<'a, f64>,
        y_variances: ArrayView1<'a, f64>,
        x: ArrayView2<'a, f64>,
        candidate_kernels: &'a [KernelFamily],
    ) -> Result<Self, StatisticError> {
        Self::with_gaussian_provider(y, y_variances, x, candidate_kernels, None)
    }

    pub fn with_gaussian_provider(
        y: ArrayView2<'a, f64>,
        y_variances: ArrayView1<'a, f64>,
        x: ArrayView2<'a, f64>,
        candidate_kernels: &'a [KernelFamily],
        gaussian: Option<&'a dyn KernelProvider>,
    ) -> Result<Self, StatisticError> {
        if y.nrows() != x.nrows() {
            return Err(StatisticError::RowMismatch {
                y_rows: y.nrows(),
                x_rows: x.nrows(),
            });
        }
        if y.nrows() < 2 || y.ncols() == 0 || x.ncols() == 0 {
            return Err(StatisticError::EmptyInput);
        }
        if y_variances.len() != y.ncols() {
            return Err(StatisticError::VarianceMismatch {
                variances: y_variances.len(),
                responses: y.ncols(),
            });
        }
        if candidate_kernels.is_empty() {
            return Err(StatisticError::NoCandidateKernels);
        }
        if candidate_kernels.contains(&KernelFamily::Gaussian) && gaussian.is_none() {
            return Err(StatisticError::Kernel(KernelError::MissingGaussianProvider));
        }
        Ok(Self {
            y,
            y_variances,
            x,
            candidate_kernels,
            gaussian,
        })
    }

    /// Observed test statistics, one per replicate, each with its own
    /// feature-screening draw.
    pub fn observed_statistics<R>(
        &self,
        replicates: usize,
        rng: &mut R,
        cancel: &CancelToken,
    ) -> Result<Vec<f64>, StatisticError>
    where
        R: Rng + ?Sized,
    {
        if replicates == 0 {
            return Err(StatisticError::NoReplicates);
        }
        let mut statistics = Vec::with_capacity(replicates);
        for replicate in 0..replicates {
            if cancel.is_cancelled() {
                return Err(StatisticError::Interrupted);
            }
            let columns = filter_columns(self.y, self.x, rng)?;
            let (statistic, _) = self.replicate_statistic(self.y, &columns)?;
            log::debug!(
                "replicate {replicate}: kept {} of {} predictor columns, statistic {statistic:.4}",
                columns.len(),
                self.x.ncols()
            );
            statistics.push(statistic);
        }
        Ok(statistics)
    }

    /// Observed statistics along with which kernel each response chose and
    /// which predictor columns each replicate's filter kept.
    pub fn observed_statistics_detailed<R>(
        &self,
        replicates: usize,
        rng: &mut R,
        cancel: &CancelToken,
    ) -> Result<ObservedStatistics, StatisticError>
    where
        R: Rng + ?Sized,
    {
        if replicates == 0 {
            return Err(StatisticError::NoReplicates);
        }
        let num_responses = self.y.ncols();
        let mut statistics = Vec::with_capacity(replicates);
        let mut kernel_choices = Vec::with_capacity(replicates * num_responses);
        let mut selected_columns = Array2::from_elem((replicates, self.x.ncols()), false);
        for replicate in 0..replicates {
            if cancel.is_cancelled() {
                return Err(StatisticError::Interrupted);
            }
            let columns = filter_columns(self.y, self.x, rng)?;
            for &column in &columns {
                selected_columns[[replicate, column]] = true;
            }
            let (statistic, kernels) = self.replicate_statistic(self.y, &columns)?;
            statistics.push(statistic);
            kernel_choices.extend(kernels);
        }
        let selected_kernels = Array2::from_shape_vec((replicates, num_responses), kernel_choices)
            .expect("one kernel choice per replicate and response");
        Ok(ObservedStatistics {
            statistics,
            selected_kernels,
            selected_columns,
        })
    }

    /// Test statistic over all predictor columns, skipping the filter, with
    /// the kernel selected for each response.
    pub fn statistic_without_filter(&self) -> Result<KernelSelection, StatisticError> {
        let all_columns: Vec<usize> = (0..self.x.ncols()).collect();
        let (statistic, selected_kernels) = self.replicate_statistic(self.y, &all_columns)?;
        Ok(KernelSelection {
            statistic,
            selected_kernels,
        })
    }

    /// Permutation-null statistics: each replicate permutes the response
    /// rows, re-runs the filter against the permuted responses and assembles
    /// the same statistic.
    pub fn null_statistics<R>(
        &self,
        permutations: usize,
        rng: &mut R,
        cancel: &CancelToken,
    ) -> Result<Vec<f64>, StatisticError>
    where
        R: Rng + ?Sized,
    {
        self.permutation_null(permutations, rng, cancel, true)
    }

    /// Permutation-null statistics for the no-filter variant.
    pub fn null_statistics_without_filter<R>(
        &self,
        permutations: usize,
        rng: &mut R,
        cancel: &CancelToken,
    ) -> Result<Vec<f64>, StatisticError>
    where
        R: Rng + ?Sized,
    {
        self.permutation_null(permutations, rng, cancel, false)
    }

    fn permutation_null<R>(
        &self,
        permutations: usize,
        rng: &mut R,
        cancel: &CancelToken,
        filtered: bool,
    ) -> Result<Vec<f64>, StatisticError>
    where
        R: Rng + ?Sized,
    {
        if permutations == 0 {
            return Err(StatisticError::NoReplicates);
        }
        let all_columns: Vec<usize> = (0..self.x.ncols()).collect();
        let mut statistics = Vec::with_capacity(permutations);
        let mut row_order: Vec<usize> = (0..self.y.nrows()).collect();
        for replicate in 0..permutations {
            if cancel.is_cancelled() {
                return Err(StatisticError::Interrupted);
            }
            row_order.shuffle(rng);
            let y_permuted = self.y.select(Axis(0), &row_order);
            let columns = if filtered {
                filter_columns(y_permuted.view(), self.x, rng)?
            } else {
                all_columns.clone()
            };
            let (statistic, _) = self.replicate_statistic(y_permuted.view(), &columns)?;
            log::debug!("null replicate {replicate}: statistic {statistic:.4}");
            statistics.push(statistic);
        }
        Ok(statistics)
    }

    /// Scores every candidate kernel against every response over the given
    /// predictor columns, then sums the per-response maxima (first maximum
    /// wins on ties).
    fn replicate_statistic(
        &self,
        y: ArrayView2<'_, f64>,
        columns: &[usize],
    ) -> Result<(f64, Vec<KernelFamily>), StatisticError> {
        let x_selected = self.x.select(Axis(1), columns);
        let num_kernels = self.candidate_kernels.len();
        let num_responses = y.ncols();
        let mut scores = Array2::zeros((num_kernels, num_responses));
        for (k, &family) in self.candidate_kernels.iter().enumerate() {
            let kernel = centered_kernel_matrix(x_selected.view(), family, self.gaussian)?;
            for j in 0..num_responses {
                scores[[k, j]] =
                    signal_to_noise(y.column(j), self.y_variances[j], kernel.view())?;
            }
        }
        let mut statistic = 0.0;
        let mut selections = Vec::with_capacity(num_responses);
        for j in 0..num_responses {
            let mut best = 0;
            for k in 1..num_kernels {
                if scores[[k, j]] > scores[[best, j]] {
                    best = k;
                }
            }
            statistic += scores[[best, j]];
            selections.push(self.candidate_kernels[best]);
        }
        Ok((statistic, selections))
    }
}

/// Add-one empirical p-value of an observed statistic against its
/// permutation-null sequence: `(1 + #{null >= observed}) / (1 + B)`.
pub fn empirical_p_value(observed: f64, null_statistics: &[f64]) -> f64 {
    let exceedances = null_statistics
        .iter()
        .filter(|&&value| value >= observed)
        .count();
    (1 + exceedances) as f64 / (1 + null_statistics.len()) as f64
}
