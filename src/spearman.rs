use ndarray::ArrayView1;
use statrs::distribution::{ContinuousCDF, StudentsT};
use thiserror::Error;

use crate::ranks::sample_ranks;
use crate::tail_area::{Tail, spearman_tail_area};

/// Largest sample size for which the tail-area statistic
/// `n(n^2 - 1)(1 - rho)/6` stays inside the exact algorithm's supported
/// range; beyond it the Student-t approximation takes over.
const EXACT_LIMIT: usize = 1290;

#[derive(Error, Debug)]
pub enum SpearmanError {
    #[error("Spearman's rho requires at least two observations, got {0}.")]
    TooFewObservations(usize),

    #[error("input vectors disagree on length ({x} vs {y}).")]
    LengthMismatch { x: usize, y: usize },

    #[error("Spearman's rho is undefined when an input has constant ranks.")]
    ConstantInput,
}

/// Two-sided p-value for the null hypothesis that the population Spearman
/// correlation of `x` and `y` is zero.
///
/// For `n <= 1290` without ties the p-value comes from the tail area of the
/// exact sampling distribution of `S = n(n^2 - 1)(1 - rho)/6` (lower tail
/// with a +2 offset for positive rho, upper tail otherwise). With ties, or
/// beyond that range, a Student-t approximation with `n - 2` degrees of
/// freedom is used; perfect correlation saturates its tail area to zero
/// instead of dividing by zero. The result never exceeds 1.
pub fn spearman_test(
    x: ArrayView1<'_, f64>,
    y: ArrayView1<'_, f64>,
) -> Result<f64, SpearmanError> {
    let n = x.len();
    if y.len() != n {
        return Err(SpearmanError::LengthMismatch { x: n, y: y.len() });
    }
    if n < 2 {
        return Err(SpearmanError::TooFewObservations(n));
    }

    let x_ranks = sample_ranks(x);
    let y_ranks = sample_ranks(y);
    let rho = rank_correlation(x_ranks.view(), y_ranks.view()).ok_or(SpearmanError::ConstantInput)?;

    let ties = distinct_count(x) < n || distinct_count(y) < n;
    let n_f = n as f64;

    let tail_area = if n <= EXACT_LIMIT && !ties {
        let q = n_f * (n_f * n_f - 1.0) * (1.0 - rho) / 6.0;
        if rho > 0.0 {
            spearman_tail_area(q.round() + 2.0, n, Tail::Lower)
        } else {
            spearman_tail_area(q.round(), n, Tail::Upper)
        }
    } else if rho.abs() >= 1.0 {
        // perfect correlation: the t statistic diverges, the tail vanishes
        0.0
    } else {
        let t = rho * ((n_f - 2.0) / (1.0 - rho * rho)).sqrt();
        let dist =
            StudentsT::new(0.0, 1.0, n_f - 2.0).expect("t distribution parameters are valid");
        if rho > 0.0 { dist.sf(t) } else { dist.cdf(t) }
    };

    Ok((2.0 * tail_area).min(1.0))
}

/// Pearson correlation of two equal-length vectors; `None` when either has
/// zero variance.
fn rank_correlation(x: ArrayView1<'_, f64>, y: ArrayView1<'_, f64>) -> Option<f64> {
    let n = x.len() as f64;
    let mean_x = x.sum() / n;
    let mean_y = y.sum() / n;
    let mut covariance = 0.0;
    let mut variance_x = 0.0;
    let mut variance_y = 0.0;
    for (&a, &b) in x.iter().zip(y.iter()) {
        let da = a - mean_x;
        let db = b - mean_y;
        covariance += da * db;
        variance_x += da * da;
        variance_y += db * db;
    }
    if variance_x <= 0.0 || variance_y <= 0.0 {
        return None;
    }
    Some((covariance / (variance_x.sqrt() * variance_y.sqrt())).clamp(-1.0, 1.0))
}

fn distinct_count(values: ArrayView1<'_, f64>) -> usize {
    let mut sorted = values.to_vec();
    sorted.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mut count = if sorted.is_empty() { 0 } else { 1 };
    for pair in sorted.windows(2) {
        if pair[0] != pair[1] {
            count += 1;
        }
    }
    count
}
