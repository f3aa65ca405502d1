use ndarray::{Array1, ArrayView1};

/// Computes the 1-based sample ranks of a numeric vector, averaging ties.
///
/// A maximal run of equal values spanning sorted positions `[i, j]` (0-based)
/// receives the mid-rank `(i + j + 2) / 2`, the arithmetic mean of the ranks
/// the run would occupy if untied. For a vector without ties the result is a
/// permutation of `1..=n`. Defined for any non-empty input.
pub fn sample_ranks(values: ArrayView1<'_, f64>) -> Array1<f64> {
    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_unstable_by(|&a, &b| {
        values[a]
            .partial_cmp(&values[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut ranks = Array1::zeros(n);
    let mut i = 0;
    while i < n {
        // extend the run of values tied with sorted position i
        let mut j = i;
        while j + 1 < n && values[order[j]] == values[order[j + 1]] {
            j += 1;
        }
        let mid_rank = (i + j + 2) as f64 / 2.0;
        for k in i..=j {
            ranks[order[k]] = mid_rank;
        }
        i = j + 1;
    }
    ranks
}
