//! Negative-binomial likelihood-ratio test for count matrices.
//!
//! Each gene is modelled as `y_ij ~ NB(mu_ij, alpha_i)` with `mu_ij = s_j * q_ig`, where `s_j` is
//! the size factor of cell `j` and `q_ig` the mean of the gene in the cell type `g` of cell `j`.
//! The full model lets `q` vary by cell type, the reduced model fits a single mean. Dispersions are
//! gene-wise moment estimates from the cell-type model and are held fixed for both fits.

use crate::testing::TestResult;
use crate::testing::utils::{dense_group_ids, median};
use anyhow::anyhow;
use nalgebra_sparse::CsrMatrix;
use rayon::prelude::*;
use statrs::distribution::{ChiSquared, ContinuousCDF};
use statrs::function::gamma::ln_gamma;

const MIN_DISPERSION: f64 = 1e-8;
const MLE_MAX_ITER: usize = 100;
const MLE_TOLERANCE: f64 = 1e-10;

/// Estimator used for the size factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeFactorMethod {
    /// Median of ratios over genes that are positive in every cell.
    Ratio,
    /// Median of ratios over each cell's positive counts, against geometric means of positive
    /// counts. Used for sparse data where no gene is positive everywhere.
    PosCounts,
}

fn check_counts(matrix: &CsrMatrix<f64>) -> anyhow::Result<()> {
    if let Some(pos) = matrix.values().iter().position(|&v| v < 0.0) {
        return Err(anyhow!(
            "Negative value at stored entry {}: counts must be non-negative",
            pos
        ));
    }
    if matrix.values().iter().any(|v| v.fract() != 0.0) {
        log::warn!("Count matrix contains non-integer values; using them as continuous counts");
    }
    Ok(())
}

/// Estimate per-cell size factors.
///
/// Falls back from [`SizeFactorMethod::Ratio`] to [`SizeFactorMethod::PosCounts`] when no gene is
/// positive in every cell.
pub fn size_factors(matrix: &CsrMatrix<f64>) -> anyhow::Result<(Vec<f64>, SizeFactorMethod)> {
    check_counts(matrix)?;
    let n_cells = matrix.ncols();
    if n_cells == 0 || matrix.nrows() == 0 {
        return Err(anyhow!("Cannot estimate size factors for an empty matrix"));
    }

    let complete_rows: Vec<usize> = (0..matrix.nrows())
        .filter(|&i| {
            let row = matrix.row(i);
            row.nnz() == n_cells && row.values().iter().all(|&v| v > 0.0)
        })
        .collect();

    if !complete_rows.is_empty() {
        let mut log_ratios: Vec<Vec<f64>> = vec![Vec::with_capacity(complete_rows.len()); n_cells];
        for &i in &complete_rows {
            let row = matrix.row(i);
            let log_geo_mean = row.values().iter().map(|v| v.ln()).sum::<f64>() / n_cells as f64;
            for (&col, &v) in row.col_indices().iter().zip(row.values()) {
                log_ratios[col].push(v.ln() - log_geo_mean);
            }
        }
        let factors = log_ratios
            .iter()
            .map(|ratios| median(ratios).map(f64::exp).unwrap_or(1.0))
            .collect();
        return Ok((factors, SizeFactorMethod::Ratio));
    }

    log::warn!("Every gene contains at least one zero; using positive-count size factors");

    let log_geo_means: Vec<Option<f64>> = matrix
        .row_iter()
        .map(|row| {
            let positive: Vec<f64> = row.values().iter().copied().filter(|&v| v > 0.0).collect();
            if positive.is_empty() {
                None
            } else {
                Some(positive.iter().map(|v| v.ln()).sum::<f64>() / n_cells as f64)
            }
        })
        .collect();

    let mut log_ratios: Vec<Vec<f64>> = vec![Vec::new(); n_cells];
    for (i, row) in matrix.row_iter().enumerate() {
        let Some(log_geo_mean) = log_geo_means[i] else {
            continue;
        };
        for (&col, &v) in row.col_indices().iter().zip(row.values()) {
            if v > 0.0 {
                log_ratios[col].push(v.ln() - log_geo_mean);
            }
        }
    }

    let mut factors = Vec::with_capacity(n_cells);
    for (col, ratios) in log_ratios.iter().enumerate() {
        let m = median(ratios)
            .ok_or_else(|| anyhow!("Cell {} has no positive counts; drop empty cells first", col))?;
        factors.push(m.exp());
    }

    let log_mean = factors.iter().map(|f| f.ln()).sum::<f64>() / n_cells as f64;
    let scale = log_mean.exp();
    factors.iter_mut().for_each(|f| *f /= scale);

    Ok((factors, SizeFactorMethod::PosCounts))
}

/// Gene-wise dispersion from the residuals of the cell-type mean model.
///
/// `alpha = sum(((y - mu)^2 - mu) / mu^2) / (n - p)` on size-factor normalized counts, with
/// `mu` floored at 1, clamped to `[1e-8, max(10, n)]`.
pub fn moments_dispersion(
    counts: &[f64],
    size_factors: &[f64],
    group_ids: &[usize],
    n_groups: usize,
) -> f64 {
    let n = counts.len();
    let max_dispersion = (n as f64).max(10.0);
    if n <= n_groups {
        return max_dispersion;
    }

    let normalized: Vec<f64> = counts
        .iter()
        .zip(size_factors)
        .map(|(&c, &s)| c / s)
        .collect();

    let mut sums = vec![0.0; n_groups];
    let mut sizes = vec![0usize; n_groups];
    for (&y, &g) in normalized.iter().zip(group_ids) {
        sums[g] += y;
        sizes[g] += 1;
    }
    let means: Vec<f64> = sums
        .iter()
        .zip(&sizes)
        .map(|(&s, &n)| if n > 0 { s / n as f64 } else { 0.0 })
        .collect();

    let sum_term: f64 = normalized
        .iter()
        .zip(group_ids)
        .map(|(&y, &g)| {
            let mu = means[g].max(1.0);
            ((y - mu).powi(2) - mu) / (mu * mu)
        })
        .sum();

    let alpha = sum_term / (n - n_groups) as f64;
    alpha.clamp(MIN_DISPERSION, max_dispersion)
}

/// Log-density of `NB(mu, size = 1/alpha)` at `y`.
pub fn nb_log_density(y: f64, alpha: f64, mu: f64) -> f64 {
    if mu <= 0.0 {
        return if y == 0.0 { 0.0 } else { f64::NEG_INFINITY };
    }
    let size = 1.0 / alpha;
    let mut ll = ln_gamma(y + size) - ln_gamma(y + 1.0) - ln_gamma(size) - size * (mu / size).ln_1p();
    if y > 0.0 {
        ll += y * (mu / (mu + size)).ln();
    }
    ll
}

/// Maximum-likelihood mean `q` of `y_j ~ NB(s_j * q, alpha)` for fixed dispersion.
///
/// Iterates the score equation as a weighted ratio `q = sum(w y) / sum(w s)` with
/// `w = 1 / (1 + alpha * s * q)`, starting from the Poisson estimate.
pub fn nb_mean_mle(counts: &[f64], size_factors: &[f64], alpha: f64) -> f64 {
    let total: f64 = counts.iter().sum();
    let sf_total: f64 = size_factors.iter().sum();
    if total <= 0.0 || sf_total <= 0.0 {
        return 0.0;
    }

    let mut q = total / sf_total;
    for _ in 0..MLE_MAX_ITER {
        let mut numerator = 0.0;
        let mut denominator = 0.0;
        for (&y, &s) in counts.iter().zip(size_factors) {
            let w = 1.0 / (1.0 + alpha * s * q);
            numerator += w * y;
            denominator += w * s;
        }
        let next = numerator / denominator;
        let converged = (next - q).abs() <= MLE_TOLERANCE * q.max(MLE_TOLERANCE);
        q = next;
        if converged {
            break;
        }
    }
    q
}

fn log_likelihood(counts: &[f64], size_factors: &[f64], alpha: f64, q: f64) -> f64 {
    counts
        .iter()
        .zip(size_factors)
        .map(|(&y, &s)| nb_log_density(y, alpha, s * q))
        .sum()
}

/// Likelihood-ratio test of one gene's cell-type model against the intercept-only model.
pub fn nb_lrt_gene(
    counts: &[f64],
    size_factors: &[f64],
    group_ids: &[usize],
    n_groups: usize,
) -> TestResult<f64> {
    let alpha = moments_dispersion(counts, size_factors, group_ids, n_groups);

    let mut group_counts: Vec<Vec<f64>> = vec![Vec::new(); n_groups];
    let mut group_factors: Vec<Vec<f64>> = vec![Vec::new(); n_groups];
    for ((&y, &s), &g) in counts.iter().zip(size_factors).zip(group_ids) {
        group_counts[g].push(y);
        group_factors[g].push(s);
    }

    let ll_full: f64 = group_counts
        .iter()
        .zip(&group_factors)
        .map(|(y, s)| log_likelihood(y, s, alpha, nb_mean_mle(y, s, alpha)))
        .sum();
    let q_reduced = nb_mean_mle(counts, size_factors, alpha);
    let ll_reduced = log_likelihood(counts, size_factors, alpha, q_reduced);

    let df = (n_groups - 1) as f64;
    let statistic = (2.0 * (ll_full - ll_reduced)).max(0.0);
    let p_value = if !statistic.is_finite() {
        0.0
    } else {
        match ChiSquared::new(df) {
            Ok(dist) => dist.sf(statistic).clamp(0.0, 1.0),
            Err(_) => 1.0,
        }
    };

    TestResult::new(statistic, p_value)
        .with_degrees_of_freedom(df, f64::INFINITY)
        .with_metadata("dispersion", alpha)
        .with_metadata("log_likelihood_full", ll_full)
        .with_metadata("log_likelihood_reduced", ll_reduced)
}

/// Run the negative-binomial LRT for every gene (row) of a count matrix.
pub fn nb_lrt_matrix_groups(
    matrix: &CsrMatrix<f64>,
    group_ids: &[usize],
) -> anyhow::Result<Vec<TestResult<f64>>> {
    if group_ids.len() != matrix.ncols() {
        return Err(anyhow!(
            "Expected {} group labels, got {}",
            matrix.ncols(),
            group_ids.len()
        ));
    }
    let (dense_ids, n_groups) = dense_group_ids(group_ids);
    if n_groups < 2 {
        return Err(anyhow!(
            "At least two cell types are required, found {}",
            n_groups
        ));
    }
    if group_ids.len() <= n_groups {
        return Err(anyhow!(
            "Not enough cells ({}) for {} cell types: no residual degrees of freedom",
            group_ids.len(),
            n_groups
        ));
    }

    let (factors, method) = size_factors(matrix)?;
    log::debug!("Estimated {} size factors using {:?}", factors.len(), method);

    let n_cells = matrix.ncols();
    Ok((0..matrix.nrows())
        .into_par_iter()
        .map(|row_idx| {
            let row = matrix.row(row_idx);
            let mut counts = vec![0.0; n_cells];
            for (&col, &v) in row.col_indices().iter().zip(row.values()) {
                counts[col] = v;
            }
            nb_lrt_gene(&counts, &factors, &dense_ids, n_groups)
        })
        .collect())
}
