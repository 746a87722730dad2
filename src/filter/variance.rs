use crate::matrix::{CellLevels, ExpressionMatrix};
use crate::testing::utils::{accumulate_group_statistics, group_sizes};
use anyhow::anyhow;
use rayon::prelude::*;

/// Per gene, the sample variance of its mean expression in each cell type.
///
/// With a single cell type every variance is zero.
pub fn celltype_mean_variance(matrix: &ExpressionMatrix, levels: &CellLevels) -> anyhow::Result<Vec<f64>> {
    let n_levels = levels.n_levels();
    let (sums, _) = accumulate_group_statistics(matrix.data(), levels.group_ids(), n_levels)?;
    let sizes = group_sizes(levels.group_ids(), n_levels);

    if n_levels < 2 {
        return Ok(vec![0.0; matrix.n_genes()]);
    }

    let variances = sums
        .par_iter()
        .map(|gene_sums| {
            let means: Vec<f64> = gene_sums
                .iter()
                .zip(&sizes)
                .map(|(&s, &n)| s / n as f64)
                .collect();
            let grand = means.iter().sum::<f64>() / n_levels as f64;
            means.iter().map(|m| (m - grand).powi(2)).sum::<f64>() / (n_levels - 1) as f64
        })
        .collect();
    Ok(variances)
}

/// Sample quantile with linear interpolation between order statistics (R's default, type 7).
pub fn quantile(values: &[f64], prob: f64) -> anyhow::Result<f64> {
    if !(0.0..=1.0).contains(&prob) {
        return Err(anyhow!("Quantile probability {} outside [0, 1]", prob));
    }
    if values.is_empty() {
        return Err(anyhow!("Cannot take a quantile of an empty slice"));
    }
    if values.iter().any(|v| v.is_nan()) {
        return Err(anyhow!("Cannot take a quantile of NaN values"));
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let h = (sorted.len() - 1) as f64 * prob;
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    Ok(sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo]))
}

/// Keep genes whose cell-type mean variance is at least the `prob` quantile of all variances.
pub fn filter_min_variance_decile(
    matrix: &ExpressionMatrix,
    levels: &CellLevels,
    prob: f64,
) -> anyhow::Result<ExpressionMatrix> {
    let variances = celltype_mean_variance(matrix, levels)?;
    let cutoff = quantile(&variances, prob)?;

    let keep: Vec<usize> = variances
        .iter()
        .enumerate()
        .filter_map(|(i, &v)| (v >= cutoff).then_some(i))
        .collect();

    log::info!(
        "Variance quantile {} = {:.4e}: keeping {} of {} genes",
        prob,
        cutoff,
        keep.len(),
        variances.len()
    );
    matrix.subset_genes(&keep)
}
