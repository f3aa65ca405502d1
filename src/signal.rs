use bigdecimal::{BigDecimal, FromPrimitive, ToPrimitive};
use ndarray::{Array2, ArrayView1, ArrayView2};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NoiseError {
    #[error("the signal-to-noise statistic needs at least two observations, got {0}.")]
    TooFewObservations(usize),

    #[error("kernel matrix is {rows}x{cols} but the response has {observations} observations.")]
    ShapeMismatch {
        rows: usize,
        cols: usize,
        observations: usize,
    },

    #[error("response variance must be strictly positive, got {0}.")]
    NonPositiveVariance(f64),

    #[error("non-finite value encountered while accumulating trace terms.")]
    NonFiniteInput,

    #[error("variance estimate collapsed to {0}; the kernel carries no usable signal structure.")]
    DegenerateVarianceEstimate(f64),
}

/// Standardized signal-to-noise ratio of a centered response `y` against a
/// centered kernel matrix.
///
/// `y_variance` is the caller-computed variance of `y`. The numerator is
/// `yᵀ·K0·y / y_variance` on the diagonal-zeroed kernel `K0`; the
/// denominator is the square root of a variance estimate built from the
/// trace terms of `H·K0` (`H` the centering projector). That estimate is a
/// difference of large, nearly canceling quantities, so the traces and the
/// standardized fourth moment are combined in 100-digit decimal arithmetic
/// and converted back to `f64` only at the end.
pub fn signal_to_noise(
    y: ArrayView1<'_, f64>,
    y_variance: f64,
    kernel: ArrayView2<'_, f64>,
) -> Result<f64, NoiseError> {
    let n = y.len();
    if n < 2 {
        return Err(NoiseError::TooFewObservations(n));
    }
    if kernel.nrows() != n || kernel.ncols() != n {
        return Err(NoiseError::ShapeMismatch {
            rows: kernel.nrows(),
            cols: kernel.ncols(),
            observations: n,
        });
    }
    if !(y_variance > 0.0) {
        return Err(NoiseError::NonPositiveVariance(y_variance));
    }
    let n_f = n as f64;

    let mut k0 = kernel.to_owned();
    k0.diag_mut().fill(0.0);

    // centering projector H = I - J/n
    let mut h = Array2::from_elem((n, n), -1.0 / n_f);
    h.diag_mut().map_inplace(|value| *value += 1.0);
    let hk0 = h.dot(&k0);
    let hk0hk0 = hk0.dot(&hk0);
    let hk0h = hk0.dot(&h);

    let trace_hk0 =
        decimal_sum((0..n).map(|i| hk0[[i, i]])).ok_or(NoiseError::NonFiniteInput)?;
    let trace_hk0hk0 =
        decimal_sum((0..n).map(|i| hk0hk0[[i, i]])).ok_or(NoiseError::NonFiniteInput)?;
    // trace of the Hadamard square of HK0H
    let trace_hadamard = decimal_sum((0..n).map(|i| hk0h[[i, i]] * hk0h[[i, i]]))
        .ok_or(NoiseError::NonFiniteInput)?;

    let standard_deviation = y_variance.sqrt();
    let fourth_power_sum = decimal_sum(y.iter().map(|&value| {
        let standardized = value / standard_deviation;
        standardized * standardized * standardized * standardized
    }))
    .ok_or(NoiseError::NonFiniteInput)?;

    let count = BigDecimal::from(n as u64);
    let count_minus_one = BigDecimal::from((n - 1) as u64);
    let excess_kurtosis = &fourth_power_sum / &count - BigDecimal::from(3u8);
    let squared_trace_hk0 = &trace_hk0 * &trace_hk0;

    let variance_estimate = (BigDecimal::from(2u8) - BigDecimal::from(12u8) / &count_minus_one)
        * &trace_hk0hk0
        - (BigDecimal::from(2u8) / &count) * &squared_trace_hk0
        + &excess_kurtosis
            * ((BigDecimal::from(6u8) / &count) * &trace_hk0hk0
                + (BigDecimal::from(1u8) / &count) * &squared_trace_hk0
                + &trace_hadamard);
    let variance_estimate = variance_estimate.to_f64().unwrap_or(f64::NAN);
    if !(variance_estimate > 0.0) {
        return Err(NoiseError::DegenerateVarianceEstimate(variance_estimate));
    }

    let numerator = y.dot(&k0.dot(&y)) / y_variance;
    Ok(numerator / variance_estimate.sqrt())
}

/// Exact decimal sum of a sequence of `f64` terms; `None` on any non-finite
/// term.
fn decimal_sum<I>(values: I) -> Option<BigDecimal>
where
    I: IntoIterator<Item = f64>,
{
    let mut total = BigDecimal::from(0u8);
    for value in values {
        total += BigDecimal::from_f64(value)?;
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{KernelFamily, centered_kernel_matrix};
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Array2};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn centered_response(seed: u64, n: usize) -> (Array1<f64>, f64) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut y = Array1::from_shape_fn(n, |_| rng.gen_range(-1.0..1.0));
        let mean = y.sum() / n as f64;
        y.mapv_inplace(|value| value - mean);
        let variance = y.iter().map(|v| v * v).sum::<f64>() / (n as f64 - 1.0);
        (y, variance)
    }

    fn test_kernel(seed: u64, n: usize) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let x = Array2::from_shape_fn((n, 3), |_| rng.gen_range(-2.0..2.0));
        centered_kernel_matrix(x.view(), KernelFamily::Linear, None).unwrap()
    }

    #[test]
    fn statistic_is_finite_on_generic_data() {
        let (y, variance) = centered_response(1, 20);
        let kernel = test_kernel(2, 20);
        let statistic = signal_to_noise(y.view(), variance, kernel.view()).unwrap();
        assert!(statistic.is_finite());
    }

    #[test]
    fn invariant_under_affine_rescaling_of_the_response() {
        let (y, variance) = centered_response(3, 18);
        let kernel = test_kernel(4, 18);
        let base = signal_to_noise(y.view(), variance, kernel.view()).unwrap();

        let scale = -2.5_f64;
        let rescaled = y.mapv(|value| scale * value);
        let rescaled_variance = variance * scale * scale;
        let statistic =
            signal_to_noise(rescaled.view(), rescaled_variance, kernel.view()).unwrap();
        assert_abs_diff_eq!(statistic, base, epsilon = 1e-9);
    }

    #[test]
    fn invariant_under_kernel_scaling() {
        let (y, variance) = centered_response(5, 16);
        let kernel = test_kernel(6, 16);
        let base = signal_to_noise(y.view(), variance, kernel.view()).unwrap();
        let scaled = kernel.mapv(|value| 7.0 * value);
        let statistic = signal_to_noise(y.view(), variance, scaled.view()).unwrap();
        assert_abs_diff_eq!(statistic, base, epsilon = 1e-9);
    }

    #[test]
    fn non_positive_variance_is_rejected() {
        let (y, _) = centered_response(7, 10);
        let kernel = test_kernel(8, 10);
        assert!(matches!(
            signal_to_noise(y.view(), 0.0, kernel.view()),
            Err(NoiseError::NonPositiveVariance(_))
        ));
    }

    #[test]
    fn kernel_shape_is_validated() {
        let (y, variance) = centered_response(9, 10);
        let kernel = test_kernel(10, 12);
        assert!(matches!(
            signal_to_noise(y.view(), variance, kernel.view()),
            Err(NoiseError::ShapeMismatch {
                rows: 12,
                cols: 12,
                observations: 10
            })
        ));
    }

    #[test]
    fn non_finite_kernel_entries_are_rejected() {
        let (y, variance) = centered_response(11, 10);
        let mut kernel = test_kernel(12, 10);
        kernel[[0, 1]] = f64::NAN;
        assert!(matches!(
            signal_to_noise(y.view(), variance, kernel.view()),
            Err(NoiseError::NonFiniteInput)
        ));
    }
}
