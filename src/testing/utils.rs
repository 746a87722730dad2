use anyhow::anyhow;
use nalgebra_sparse::CsrMatrix;
use rayon::prelude::*;

pub fn extract_unique_groups(group_ids: &[usize]) -> Vec<usize> {
    let mut unique_groups = group_ids.to_vec();
    unique_groups.sort();
    unique_groups.dedup();
    unique_groups
}

/// Map arbitrary group ids onto `0..k` and return the dense ids together with `k`.
pub fn dense_group_ids(group_ids: &[usize]) -> (Vec<usize>, usize) {
    let unique_groups = extract_unique_groups(group_ids);
    let dense = group_ids
        .iter()
        .map(|g| unique_groups.binary_search(g).unwrap_or_default())
        .collect();
    (dense, unique_groups.len())
}

/// Median of the finite values, `None` when there are none.
pub fn median(values: &[f64]) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Number of cells per dense group id.
pub fn group_sizes(group_ids: &[usize], n_groups: usize) -> Vec<usize> {
    let mut sizes = vec![0; n_groups];
    for &g in group_ids {
        sizes[g] += 1;
    }
    sizes
}

/// Per-gene, per-group sums and sums of squares.
///
/// `group_ids` must hold dense ids in `0..n_groups`, one per column. Only stored entries are
/// visited; implicit zeros add nothing to either accumulator.
pub fn accumulate_group_statistics(
    matrix: &CsrMatrix<f64>,
    group_ids: &[usize],
    n_groups: usize,
) -> anyhow::Result<(Vec<Vec<f64>>, Vec<Vec<f64>>)> {
    if group_ids.len() != matrix.ncols() {
        return Err(anyhow!(
            "Expected {} group labels, got {}",
            matrix.ncols(),
            group_ids.len()
        ));
    }
    if let Some(&bad) = group_ids.iter().find(|&&g| g >= n_groups) {
        return Err(anyhow!("Group id {} out of range for {} groups", bad, n_groups));
    }

    let (sums, sum_squares): (Vec<Vec<f64>>, Vec<Vec<f64>>) = (0..matrix.nrows())
        .into_par_iter()
        .map(|row_idx| {
            let row = matrix.row(row_idx);
            let mut sums = vec![0.0; n_groups];
            let mut sum_squares = vec![0.0; n_groups];
            for (&col, &v) in row.col_indices().iter().zip(row.values()) {
                let g = group_ids[col];
                sums[g] += v;
                sum_squares[g] += v * v;
            }
            (sums, sum_squares)
        })
        .unzip();

    Ok((sums, sum_squares))
}
