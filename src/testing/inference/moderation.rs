//! Empirical-Bayes moderation of gene-wise residual variances.
//!
//! The residual variances of all genes are treated as draws from a scaled inverse chi-square
//! prior. The prior's degrees of freedom and scale are estimated by matching the first two
//! moments of the log variances, and every gene's variance is then shrunk toward the prior scale.
//! Genes with few residual degrees of freedom borrow strength from the rest of the matrix, which
//! stabilises the F-statistics for small groups of cells.

use crate::testing::utils::median;
use statrs::function::gamma::digamma;

/// Prior fitted to a set of residual variances.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VariancePrior {
    /// Prior degrees of freedom. Infinite when the variances are no more dispersed than pure
    /// sampling noise would explain.
    pub df_prior: f64,
    /// Prior (location) variance.
    pub var_prior: f64,
}

/// Trigamma function, the second derivative of `ln Γ(x)`, for `x > 0`.
pub fn trigamma(x: f64) -> f64 {
    if x <= 0.0 || !x.is_finite() {
        return f64::NAN;
    }

    let mut x = x;
    let mut acc = 0.0;
    while x < 6.0 {
        acc += 1.0 / (x * x);
        x += 1.0;
    }

    let inv = 1.0 / x;
    let inv2 = inv * inv;
    acc + inv
        + 0.5 * inv2
        + inv * inv2 * (1.0 / 6.0 - inv2 * (1.0 / 30.0 - inv2 * (1.0 / 42.0 - inv2 / 30.0)))
}

/// Tetragamma function, the third derivative of `ln Γ(x)`, for `x > 0`.
fn tetragamma(x: f64) -> f64 {
    let mut x = x;
    let mut acc = 0.0;
    while x < 6.0 {
        acc -= 2.0 / (x * x * x);
        x += 1.0;
    }

    let inv = 1.0 / x;
    let inv2 = inv * inv;
    acc - inv2 - inv2 * inv
        + inv2 * inv2 * (-0.5 + inv2 * (1.0 / 6.0 - inv2 * (1.0 / 6.0 - inv2 * 0.3)))
}

/// Solve `trigamma(y) = x` for `y` by Newton iteration.
pub fn trigamma_inverse(x: f64) -> f64 {
    if !(x > 0.0) {
        return f64::NAN;
    }
    if x > 1e7 {
        return 1.0 / x.sqrt();
    }
    if x < 1e-6 {
        return 1.0 / x;
    }

    let mut y = 0.5 + 1.0 / x;
    for _ in 0..50 {
        let tri = trigamma(y);
        let dif = tri * (1.0 - tri / x) / tetragamma(y);
        y += dif;
        if -dif / y < 1e-8 {
            break;
        }
    }
    y
}

/// Estimate the scaled inverse chi-square prior of gene-wise variances that share `df` residual
/// degrees of freedom.
pub fn fit_f_distribution(variances: &[f64], df: f64) -> VariancePrior {
    let mut x: Vec<f64> = variances
        .iter()
        .copied()
        .filter(|v| v.is_finite() && *v > -1e-15)
        .map(|v| v.max(0.0))
        .collect();

    if x.is_empty() || !(df > 0.0) {
        return VariancePrior {
            df_prior: 0.0,
            var_prior: f64::NAN,
        };
    }
    if x.len() == 1 {
        return VariancePrior {
            df_prior: 0.0,
            var_prior: x[0],
        };
    }

    let mut m = median(&x).unwrap_or(0.0);
    if m == 0.0 {
        log::warn!("More than half of the residual variances are exactly zero");
        m = 1.0;
    }
    let floor = 1e-5 * m;
    x.iter_mut().for_each(|v| *v = v.max(floor));

    let half_df = df / 2.0;
    let shift = digamma(half_df) - half_df.ln();
    let e: Vec<f64> = x.iter().map(|v| v.ln() - shift).collect();
    let n = e.len() as f64;
    let emean = e.iter().sum::<f64>() / n;
    let evar = e.iter().map(|v| (v - emean).powi(2)).sum::<f64>() / (n - 1.0) - trigamma(half_df);

    if evar > 0.0 {
        let df_prior = 2.0 * trigamma_inverse(evar);
        let var_prior = (emean + digamma(df_prior / 2.0) - (df_prior / 2.0).ln()).exp();
        VariancePrior {
            df_prior,
            var_prior,
        }
    } else {
        VariancePrior {
            df_prior: f64::INFINITY,
            var_prior: emean.exp(),
        }
    }
}

/// Posterior variances: a weighted mean of each gene's variance and the prior variance.
pub fn squeeze_variances(variances: &[f64], df: f64, prior: &VariancePrior) -> Vec<f64> {
    if prior.df_prior.is_infinite() {
        return vec![prior.var_prior; variances.len()];
    }
    if prior.df_prior <= 0.0 || !prior.var_prior.is_finite() {
        return variances.to_vec();
    }

    let total = df + prior.df_prior;
    variances
        .iter()
        .map(|&s2| (df * s2 + prior.df_prior * prior.var_prior) / total)
        .collect()
}
