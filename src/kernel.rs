use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kernel similarity families understood by the engine.
///
/// The tags accepted by [`FromStr`] and produced by [`fmt::Display`] are the
/// host-environment names `"gau"`, `"lin"`, `"quad"`, `"exp"` and `"IBS"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KernelFamily {
    /// Delegated to an externally supplied [`KernelProvider`].
    Gaussian,
    /// `x xᵀ / p`
    Linear,
    /// `((x xᵀ)/p + 1)²` elementwise
    Quadratic,
    /// `exp(-(‖xi‖² + 3‖xi - xj‖² + ‖xj‖²)/p)`
    Exponential,
    /// Identity-by-state: `1 - Σ|xi - xj| / (2p)`
    IdentityByState,
}

impl KernelFamily {
    /// Every supported family, in the host environment's canonical order.
    pub const ALL: [KernelFamily; 5] = [
        KernelFamily::Gaussian,
        KernelFamily::Linear,
        KernelFamily::Quadratic,
        KernelFamily::Exponential,
        KernelFamily::IdentityByState,
    ];

    /// The host-environment tag for this family.
    pub fn tag(self) -> &'static str {
        match self {
            KernelFamily::Gaussian => "gau",
            KernelFamily::Linear => "lin",
            KernelFamily::Quadratic => "quad",
            KernelFamily::Exponential => "exp",
            KernelFamily::IdentityByState => "IBS",
        }
    }
}

impl fmt::Display for KernelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for KernelFamily {
    type Err = KernelError;

    fn from_str(tag: &str) -> Result<Self, KernelError> {
        match tag {
            "gau" => Ok(KernelFamily::Gaussian),
            "lin" => Ok(KernelFamily::Linear),
            "quad" => Ok(KernelFamily::Quadratic),
            "exp" => Ok(KernelFamily::Exponential),
            "IBS" => Ok(KernelFamily::IdentityByState),
            other => Err(KernelError::UnknownFamily(other.to_string())),
        }
    }
}

#[derive(Error, Debug)]
pub enum KernelError {
    #[error("unknown kernel family tag '{0}' (expected one of gau, lin, quad, exp, IBS).")]
    UnknownFamily(String),

    #[error("the Gaussian family requires an externally supplied kernel provider.")]
    MissingGaussianProvider,

    #[error(
        "kernel provider returned a {found_rows}x{found_cols} matrix for {expected} observations."
    )]
    ProviderShape {
        expected: usize,
        found_rows: usize,
        found_cols: usize,
    },

    #[error("a kernel matrix needs at least two observations, got {0}.")]
    TooFewObservations(usize),
}

/// Capability for producing a raw pairwise similarity matrix.
///
/// The built-in families and any host-supplied kernel routine are
/// interchangeable implementations of this capability; the engine treats the
/// returned matrix opaquely and applies the same empirical centering to all
/// of them.
pub trait KernelProvider {
    /// Pairwise similarity matrix over the rows of `x`, using `num_columns`
    /// as the normalizing column count.
    fn similarity(&self, x: ArrayView2<'_, f64>, num_columns: usize) -> Array2<f64>;
}

/// Radial-basis provider matching the host environment's Gaussian kernel
/// routine: `exp(-‖xi - xj‖² / p)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GaussianKernel;

impl KernelProvider for GaussianKernel {
    fn similarity(&self, x: ArrayView2<'_, f64>, num_columns: usize) -> Array2<f64> {
        let p = num_columns as f64;
        lower_triangle(x.nrows(), |i, j| {
            let squared_distance: f64 = x
                .row(i)
                .iter()
                .zip(x.row(j).iter())
                .map(|(a, b)| (a - b) * (a - b))
                .sum();
            (-squared_distance / p).exp()
        })
    }
}

/// Builds the empirically centered kernel matrix over the rows of `x`.
///
/// The raw similarity is computed per family (the Gaussian family through
/// `gaussian`), its diagonal is zeroed into `ker0`, and the returned matrix
/// is `raw - (J·ker0 + ker0·J - J·ker0·J/n)/(n - 1)` with `J` the all-ones
/// matrix. Every family is evaluated on the lower triangle and mirrored, so
/// the result is symmetric to the bit.
pub fn centered_kernel_matrix(
    x: ArrayView2<'_, f64>,
    family: KernelFamily,
    gaussian: Option<&dyn KernelProvider>,
) -> Result<Array2<f64>, KernelError> {
    if x.nrows() < 2 {
        return Err(KernelError::TooFewObservations(x.nrows()));
    }
    let raw = raw_similarity(x, family, gaussian)?;
    Ok(center(raw))
}

fn raw_similarity(
    x: ArrayView2<'_, f64>,
    family: KernelFamily,
    gaussian: Option<&dyn KernelProvider>,
) -> Result<Array2<f64>, KernelError> {
    let n = x.nrows();
    let p = x.ncols() as f64;
    match family {
        KernelFamily::Gaussian => {
            let provider = gaussian.ok_or(KernelError::MissingGaussianProvider)?;
            let kernel = provider.similarity(x, x.ncols());
            if kernel.nrows() != n || kernel.ncols() != n {
                return Err(KernelError::ProviderShape {
                    expected: n,
                    found_rows: kernel.nrows(),
                    found_cols: kernel.ncols(),
                });
            }
            Ok(kernel)
        }
        KernelFamily::Linear => Ok(lower_triangle(n, |i, j| x.row(i).dot(&x.row(j)) / p)),
        KernelFamily::Quadratic => Ok(lower_triangle(n, |i, j| {
            let value = x.row(i).dot(&x.row(j)) / p + 1.0;
            value * value
        })),
        KernelFamily::Exponential => Ok(lower_triangle(n, |i, j| {
            let mut norm_i = 0.0;
            let mut norm_j = 0.0;
            let mut distance = 0.0;
            for (&a, &b) in x.row(i).iter().zip(x.row(j).iter()) {
                norm_i += a * a;
                norm_j += b * b;
                distance += (a - b) * (a - b);
            }
            (-(norm_i + 3.0 * distance + norm_j) / p).exp()
        })),
        KernelFamily::IdentityByState => Ok(lower_triangle(n, |i, j| {
            let manhattan: f64 = x
                .row(i)
                .iter()
                .zip(x.row(j).iter())
                .map(|(a, b)| (a - b).abs())
                .sum();
            1.0 - manhattan / (2.0 * p)
        })),
    }
}

/// Fills an `n×n` matrix from its lower triangle, mirroring each entry.
fn lower_triangle(n: usize, mut value: impl FnMut(usize, usize) -> f64) -> Array2<f64> {
    let mut kernel = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let v = value(i, j);
            kernel[[i, j]] = v;
            kernel[[j, i]] = v;
        }
    }
    kernel
}

/// Empirical double-centering of a symmetric raw similarity matrix.
///
/// With `ker0` the raw matrix with zeroed diagonal, the matrix-product form
/// `(J·ker0 + ker0·J - J·ker0·J/n)/(n - 1)` reduces to per-entry column,
/// row and grand sums of `ker0`; the corrected entries are evaluated on the
/// lower triangle and mirrored.
fn center(raw: Array2<f64>) -> Array2<f64> {
    let n = raw.nrows();
    let n_f = n as f64;
    let mut column_sums = Array1::zeros(n);
    for j in 0..n {
        let mut sum = 0.0;
        for i in 0..n {
            sum += raw[[i, j]];
        }
        column_sums[j] = sum - raw[[j, j]];
    }
    let grand_sum = column_sums.sum();

    let mut centered = raw;
    for i in 0..n {
        for j in 0..=i {
            let correction = (column_sums[i] + column_sums[j] - grand_sum / n_f) / (n_f - 1.0);
            let value = centered[[i, j]] - correction;
            centered[[i, j]] = value;
            centered[[j, i]] = value;
        }
    }
    centered
}
