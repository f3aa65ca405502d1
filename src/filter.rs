use ndarray::{ArrayView2, Axis};
use rand::Rng;
use rand::seq::SliceRandom;
use thiserror::Error;

use crate::spearman::{SpearmanError, spearman_test};

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("response matrix has {y_rows} rows but the predictor matrix has {x_rows}.")]
    RowMismatch { y_rows: usize, x_rows: usize },

    #[error("feature screening needs at least one response and one predictor column.")]
    EmptyInput,

    #[error(transparent)]
    Spearman(#[from] SpearmanError),
}

/// Screens predictor columns of `x` for association with any column of `y`.
///
/// For each predictor column the best (minimum) Spearman p-value over all
/// response columns is compared against the same quantity computed on a
/// row-permuted copy of `x`; a column is kept only when its observed minimum
/// beats the permuted one, i.e. when it does better than a structurally
/// identical but decorrelated column would by chance. When no column
/// survives, the single column with the smallest observed minimum p-value is
/// kept (first such column on ties), so the result is never empty.
///
/// The row permutation is drawn from `rng`; seed it for reproducible
/// selections.
pub fn filter_columns<R>(
    y: ArrayView2<'_, f64>,
    x: ArrayView2<'_, f64>,
    rng: &mut R,
) -> Result<Vec<usize>, FilterError>
where
    R: Rng + ?Sized,
{
    let n = y.nrows();
    if x.nrows() != n {
        return Err(FilterError::RowMismatch {
            y_rows: n,
            x_rows: x.nrows(),
        });
    }
    let num_predictors = x.ncols();
    let num_responses = y.ncols();
    if n == 0 || num_predictors == 0 || num_responses == 0 {
        return Err(FilterError::EmptyInput);
    }

    let mut row_order: Vec<usize> = (0..n).collect();
    row_order.shuffle(rng);
    let x_permuted = x.select(Axis(0), &row_order);

    let mut min_p_value = vec![1.0_f64; num_predictors];
    let mut min_p_value_permuted = vec![1.0_f64; num_predictors];
    for i in 0..num_predictors {
        for j in 0..num_responses {
            let observed = spearman_test(y.column(j), x.column(i))?;
            min_p_value[i] = min_p_value[i].min(observed);
            let permuted = spearman_test(y.column(j), x_permuted.column(i))?;
            min_p_value_permuted[i] = min_p_value_permuted[i].min(permuted);
        }
    }

    let selected: Vec<usize> = (0..num_predictors)
        .filter(|&i| min_p_value[i] < min_p_value_permuted[i])
        .collect();
    if selected.is_empty() {
        let mut best = 0;
        for i in 1..num_predictors {
            if min_p_value[i] < min_p_value[best] {
                best = i;
            }
        }
        log::warn!("no predictor column beat its permuted copy; keeping column {best} alone");
        return Ok(vec![best]);
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, array};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand_distr::{Distribution, Normal};

    fn noisy_monotone_data(seed: u64) -> (Array2<f64>, Array2<f64>) {
        // column 0 of x is a strong monotone function of y, column 1 is noise
        let mut rng = StdRng::seed_from_u64(seed);
        let noise = Normal::new(0.0, 0.05).unwrap();
        let n = 40;
        let mut y = Array2::zeros((n, 1));
        let mut x = Array2::zeros((n, 2));
        for i in 0..n {
            let t = i as f64 / n as f64;
            y[[i, 0]] = t;
            x[[i, 0]] = 2.0 * t + noise.sample(&mut rng);
            x[[i, 1]] = noise.sample(&mut rng) * 100.0;
        }
        (y, x)
    }

    #[test]
    fn informative_column_is_selected() {
        let (y, x) = noisy_monotone_data(7);
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..20 {
            let selected = filter_columns(y.view(), x.view(), &mut rng).unwrap();
            assert!(
                selected.contains(&0),
                "informative column missing from {selected:?}"
            );
        }
    }

    #[test]
    fn selection_is_non_empty_unique_and_in_range() {
        let mut rng = StdRng::seed_from_u64(3);
        let y = array![[0.4], [0.9], [0.1], [0.7], [0.3], [0.8], [0.2], [0.6]];
        let x = array![
            [0.3, 1.2],
            [0.8, 0.1],
            [0.2, 0.9],
            [0.9, 0.4],
            [0.5, 0.6],
            [0.1, 0.8],
            [0.7, 0.2],
            [0.4, 0.5]
        ];
        for _ in 0..50 {
            let selected = filter_columns(y.view(), x.view(), &mut rng).unwrap();
            assert!(!selected.is_empty());
            let mut seen = selected.clone();
            seen.dedup();
            assert_eq!(seen.len(), selected.len());
            assert!(selected.iter().all(|&i| i < x.ncols()));
        }
    }

    #[test]
    fn seeded_draws_are_reproducible() {
        let (y, x) = noisy_monotone_data(5);
        let first = filter_columns(y.view(), x.view(), &mut StdRng::seed_from_u64(42)).unwrap();
        let second = filter_columns(y.view(), x.view(), &mut StdRng::seed_from_u64(42)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn row_mismatch_is_rejected() {
        let y = Array2::zeros((4, 1));
        let x = Array2::zeros((5, 2));
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            filter_columns(y.view(), x.view(), &mut rng),
            Err(FilterError::RowMismatch {
                y_rows: 4,
                x_rows: 5
            })
        ));
    }

    #[test]
    fn empty_input_is_rejected() {
        let y = Array2::zeros((4, 0));
        let x = Array2::zeros((4, 2));
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            filter_columns(y.view(), x.view(), &mut rng),
            Err(FilterError::EmptyInput)
        ));
    }
}
