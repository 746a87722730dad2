//! Parametric tests of expression differences across cell types.
//!
//! This module implements the one-way ANOVA F-test, optimized for sparse single-cell expression
//! matrices. Group sums and sums of squares are accumulated in a single pass over the stored
//! entries, so implicit zeros cost nothing. The moderated variant squeezes every gene's residual
//! variance toward a prior fitted across all genes before forming the F-statistic.

use crate::testing::TestResult;
use crate::testing::inference::moderation::{fit_f_distribution, squeeze_variances};
use crate::testing::utils::{accumulate_group_statistics, dense_group_ids, group_sizes};
use anyhow::anyhow;
use nalgebra_sparse::CsrMatrix;
use rayon::prelude::*;
use statrs::distribution::{ContinuousCDF, FisherSnedecor};

/// Rounding error allowed in the sums-of-squares decomposition, in units of `f64::EPSILON`.
const ROUNDING_ULPS: f64 = 8.0;

/// Between- and within-group decomposition for one gene.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnovaComponents {
    pub ss_between: f64,
    pub ss_within: f64,
    pub df_between: f64,
    pub df_within: f64,
}

impl AnovaComponents {
    /// Compute the sums of squares from per-group sums, sums of squares and sizes.
    ///
    /// Groups with no cells are ignored.
    pub fn from_sums(sums: &[f64], sum_squares: &[f64], sizes: &[usize]) -> Self {
        let mut total = 0.0;
        let mut n_total = 0.0;
        let mut n_groups = 0.0;
        for (&s, &n) in sums.iter().zip(sizes) {
            if n > 0 {
                total += s;
                n_total += n as f64;
                n_groups += 1.0;
            }
        }

        let grand_mean = if n_total > 0.0 { total / n_total } else { 0.0 };
        let mut ss_between = 0.0;
        let mut ss_within = 0.0;
        for ((&s, &sq), &n) in sums.iter().zip(sum_squares).zip(sizes) {
            if n == 0 {
                continue;
            }
            let n = n as f64;
            let mean = s / n;
            let shift = mean - grand_mean;
            if shift.abs() > ROUNDING_ULPS * f64::EPSILON * mean.abs().max(grand_mean.abs()) {
                ss_between += n * shift * shift;
            }
            // `sq - s^2 / n` cancels for constant groups; residues at rounding scale are zero
            let within = sq - s * s / n;
            if within > ROUNDING_ULPS * f64::EPSILON * sq.abs() {
                ss_within += within;
            }
        }

        AnovaComponents {
            ss_between,
            ss_within,
            df_between: n_groups - 1.0,
            df_within: n_total - n_groups,
        }
    }

    pub fn residual_variance(&self) -> f64 {
        if self.df_within > 0.0 {
            self.ss_within / self.df_within
        } else {
            f64::NAN
        }
    }

    pub fn mean_square_between(&self) -> f64 {
        if self.df_between > 0.0 {
            self.ss_between / self.df_between
        } else {
            f64::NAN
        }
    }
}

/// Ordinary one-way ANOVA from precomputed group summaries.
///
/// # Arguments
///
/// * `sums`, `sum_squares`, `sizes` - Per-group sum, sum of squares and cell count
///
/// # Returns
///
/// `TestResult` with the F-statistic, its p-value and `(df_between, df_within)`. A gene that is
/// constant within every group but differs between groups gets `F = inf` and `p = 0`; a gene
/// that is constant everywhere gets `F = 0` and `p = 1`.
pub fn one_way_anova_from_sums(sums: &[f64], sum_squares: &[f64], sizes: &[usize]) -> TestResult<f64> {
    let components = AnovaComponents::from_sums(sums, sum_squares, sizes);
    f_test(&components, components.residual_variance(), components.df_within)
}

/// Build the F-test result for one gene given the variance used in the denominator.
fn f_test(components: &AnovaComponents, variance: f64, df_denominator: f64) -> TestResult<f64> {
    let df1 = components.df_between;
    if df1 < 1.0 || !(df_denominator > 0.0) {
        return TestResult::new(0.0, 1.0);
    }

    let msb = components.mean_square_between();
    let (f_stat, p_value) = if variance > 0.0 {
        let f = msb / variance;
        (f, f_p_value(f, df1, df_denominator))
    } else if components.ss_between > 0.0 {
        (f64::INFINITY, 0.0)
    } else {
        (0.0, 1.0)
    };

    TestResult::new(f_stat, p_value)
        .with_degrees_of_freedom(df1, df_denominator)
        .with_metadata("ss_between", components.ss_between)
        .with_metadata("ss_within", components.ss_within)
        .with_metadata("variance", variance)
}

/// Upper tail probability of the F distribution.
#[inline]
pub fn f_p_value(f_stat: f64, df1: f64, df2: f64) -> f64 {
    if f_stat.is_nan() {
        return 1.0;
    }
    if f_stat.is_infinite() {
        return 0.0;
    }
    if f_stat <= 0.0 {
        return 1.0;
    }

    match FisherSnedecor::new(df1, df2) {
        Ok(dist) => dist.sf(f_stat).clamp(0.0, 1.0),
        Err(_) => 1.0,
    }
}

/// Per-gene ANOVA components for a genes x cells matrix.
///
/// Fails when labels do not match the columns, when fewer than two groups are present, or when
/// there are no residual degrees of freedom (every cell type has a single cell).
pub fn anova_components_matrix(
    matrix: &CsrMatrix<f64>,
    group_ids: &[usize],
) -> anyhow::Result<Vec<AnovaComponents>> {
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

    let sizes = group_sizes(&dense_ids, n_groups);
    let (sums, sum_squares) = accumulate_group_statistics(matrix, &dense_ids, n_groups)?;

    Ok(sums
        .par_iter()
        .zip(sum_squares.par_iter())
        .map(|(s, sq)| AnovaComponents::from_sums(s, sq, &sizes))
        .collect())
}

/// Perform ordinary one-way ANOVA on every gene (row) across cell types.
pub fn anova_matrix_groups(
    matrix: &CsrMatrix<f64>,
    group_ids: &[usize],
) -> anyhow::Result<Vec<TestResult<f64>>> {
    let components = anova_components_matrix(matrix, group_ids)?;
    Ok(components
        .par_iter()
        .map(|c| f_test(c, c.residual_variance(), c.df_within))
        .collect())
}

/// Perform one-way ANOVA on every gene with empirical-Bayes moderated residual variances.
///
/// All genes share the same residual degrees of freedom. The total degrees of freedom of the
/// moderated F-test are capped at the residual degrees of freedom pooled over all genes.
pub fn moderated_anova_matrix_groups(
    matrix: &CsrMatrix<f64>,
    group_ids: &[usize],
) -> anyhow::Result<Vec<TestResult<f64>>> {
    let components = anova_components_matrix(matrix, group_ids)?;
    if components.is_empty() {
        return Ok(Vec::new());
    }

    let df_residual = components[0].df_within;
    let variances: Vec<f64> = components.iter().map(|c| c.residual_variance()).collect();
    let prior = fit_f_distribution(&variances, df_residual);
    log::debug!(
        "Variance prior: df_prior={:.4}, var_prior={:.6e}",
        prior.df_prior,
        prior.var_prior
    );

    let posterior = squeeze_variances(&variances, df_residual, &prior);
    let df_pooled = df_residual * components.len() as f64;
    let df_total = (df_residual + prior.df_prior).min(df_pooled);

    Ok(components
        .par_iter()
        .zip(posterior.par_iter())
        .map(|(c, &s2_post)| {
            f_test(c, s2_post, df_total)
                .with_metadata("df_prior", prior.df_prior)
                .with_metadata("var_prior", prior.var_prior)
        })
        .collect())
}
