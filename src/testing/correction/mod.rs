//! Multiple testing correction for per-gene p-values.
//!
//! Family-wise error rate: [`bonferroni_correction`], [`holm_bonferroni_correction`] and
//! [`hochberg_correction`]. False discovery rate: [`benjamini_hochberg_correction`] and
//! [`benjamini_yekutieli_correction`]. All of them reject empty input and p-values outside
//! `[0, 1]`, and return adjusted values in the input order.
//!
//! ```
//! # use single_genefilter::testing::correction::*;
//! let adjusted = adjust_p_values(&[0.01, 0.04, 0.03], CorrectionMethod::BenjaminiHochberg).unwrap();
//! assert!((adjusted[0] - 0.03).abs() < 1e-12);
//! ```

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// Correction applied to the per-gene p-values before thresholding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionMethod {
    #[default]
    BenjaminiHochberg,
    BenjaminiYekutieli,
    Bonferroni,
    Holm,
    Hochberg,
}

/// Adjust p-values with the selected method.
pub fn adjust_p_values(p_values: &[f64], method: CorrectionMethod) -> Result<Vec<f64>> {
    match method {
        CorrectionMethod::BenjaminiHochberg => benjamini_hochberg_correction(p_values),
        CorrectionMethod::BenjaminiYekutieli => benjamini_yekutieli_correction(p_values),
        CorrectionMethod::Bonferroni => bonferroni_correction(p_values),
        CorrectionMethod::Holm => holm_bonferroni_correction(p_values),
        CorrectionMethod::Hochberg => hochberg_correction(p_values),
    }
}

fn validate_p_values(p_values: &[f64]) -> Result<()> {
    if p_values.is_empty() {
        return Err(anyhow!("Empty p-value array"));
    }
    match p_values.iter().position(|p| !(0.0..=1.0).contains(p)) {
        Some(i) => Err(anyhow!("Invalid p-value at index {}: {}", i, p_values[i])),
        None => Ok(()),
    }
}

/// Indices of `p_values` sorted by increasing p-value. Ties keep input order.
fn ascending_order(p_values: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..p_values.len()).collect();
    order.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));
    order
}

/// Step-up adjustment: walking from the largest p-value down, the adjusted value at 1-based
/// rank `r` is the running minimum of `p * multiplier(r)`.
fn step_up(p_values: &[f64], multiplier: impl Fn(usize) -> f64) -> Vec<f64> {
    let order = ascending_order(p_values);
    let mut adjusted = vec![0.0; p_values.len()];
    let mut running_min = 1.0f64;
    for (pos, &idx) in order.iter().enumerate().rev() {
        running_min = running_min.min(p_values[idx] * multiplier(pos + 1));
        adjusted[idx] = running_min;
    }
    adjusted
}

/// Step-down adjustment: walking from the smallest p-value up, the adjusted value at rank `r` is
/// the running maximum of `p * multiplier(r)`, capped at 1.
fn step_down(p_values: &[f64], multiplier: impl Fn(usize) -> f64) -> Vec<f64> {
    let order = ascending_order(p_values);
    let mut adjusted = vec![0.0; p_values.len()];
    let mut running_max = 0.0f64;
    for (pos, &idx) in order.iter().enumerate() {
        running_max = running_max.max((p_values[idx] * multiplier(pos + 1)).min(1.0));
        adjusted[idx] = running_max;
    }
    adjusted
}

/// Multiply every p-value by the number of tests, capped at 1.
pub fn bonferroni_correction(p_values: &[f64]) -> Result<Vec<f64>> {
    validate_p_values(p_values)?;
    let n = p_values.len() as f64;
    Ok(p_values.iter().map(|&p| (p * n).min(1.0)).collect())
}

/// Benjamini-Hochberg false discovery rate adjustment.
///
/// # Example
/// ```
/// # use single_genefilter::testing::correction::*;
/// let adjusted = benjamini_hochberg_correction(&[0.01, 0.02, 0.03]).unwrap();
/// assert!(adjusted.iter().all(|&p| (p - 0.03).abs() < 1e-12));
/// ```
pub fn benjamini_hochberg_correction(p_values: &[f64]) -> Result<Vec<f64>> {
    validate_p_values(p_values)?;
    let n = p_values.len() as f64;
    Ok(step_up(p_values, |rank| n / rank as f64))
}

/// Benjamini-Yekutieli adjustment, valid under arbitrary dependence between tests. Equal to BH
/// scaled by the harmonic number of the test count.
pub fn benjamini_yekutieli_correction(p_values: &[f64]) -> Result<Vec<f64>> {
    validate_p_values(p_values)?;
    let n = p_values.len();
    let harmonic: f64 = (1..=n).map(|i| 1.0 / i as f64).sum();
    Ok(step_up(p_values, |rank| harmonic * n as f64 / rank as f64))
}

/// Holm's step-down family-wise error rate adjustment.
pub fn holm_bonferroni_correction(p_values: &[f64]) -> Result<Vec<f64>> {
    validate_p_values(p_values)?;
    let n = p_values.len();
    Ok(step_down(p_values, |rank| (n - rank + 1) as f64))
}

/// Hochberg's step-up family-wise error rate adjustment. Assumes independent or positively
/// dependent tests.
pub fn hochberg_correction(p_values: &[f64]) -> Result<Vec<f64>> {
    validate_p_values(p_values)?;
    let n = p_values.len();
    Ok(step_up(p_values, |rank| (n - rank + 1) as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn assert_all_close(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert_relative_eq!(*a, *e, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_bonferroni() {
        let adjusted = bonferroni_correction(&[0.004, 0.05, 0.3, 0.0]).unwrap();
        assert_all_close(&adjusted, &[0.016, 0.2, 1.0, 0.0]);
    }

    #[test]
    fn test_benjamini_hochberg_reference() {
        // p.adjust(c(0.05, 0.01, 0.1, 0.04, 0.02), "BH")
        let adjusted = benjamini_hochberg_correction(&[0.05, 0.01, 0.1, 0.04, 0.02]).unwrap();
        assert_all_close(&adjusted, &[0.0625, 0.05, 0.1, 0.0625, 0.05]);

        // p.adjust(c(0.1, 0.2, 0.3, 0.4, 0.1), "BH")
        let adjusted = benjamini_hochberg_correction(&[0.1, 0.2, 0.3, 0.4, 0.1]).unwrap();
        assert_all_close(&adjusted, &[0.25, 1.0 / 3.0, 0.375, 0.4, 0.25]);
    }

    #[test]
    fn test_benjamini_hochberg_ties_and_single_value() {
        let adjusted = benjamini_hochberg_correction(&[0.2, 0.2, 0.2]).unwrap();
        assert_all_close(&adjusted, &[0.2, 0.2, 0.2]);
        assert_all_close(&benjamini_hochberg_correction(&[0.025]).unwrap(), &[0.025]);
        assert_eq!(benjamini_hochberg_correction(&[1.0, 0.5]).unwrap()[0], 1.0);
    }

    #[test]
    fn test_benjamini_yekutieli_scales_bh() {
        let p_values = [0.002, 0.03, 0.01, 0.6];
        let bh = benjamini_hochberg_correction(&p_values).unwrap();
        let by = benjamini_yekutieli_correction(&p_values).unwrap();
        let harmonic = 1.0 + 1.0 / 2.0 + 1.0 / 3.0 + 1.0 / 4.0;
        for (b, y) in bh.iter().zip(&by) {
            assert_relative_eq!(*y, (b * harmonic).min(1.0), epsilon = 1e-10);
        }
    }

    #[test]
    fn test_holm() {
        // p.adjust(c(0.01, 0.02, 0.03), "holm")
        assert_all_close(&holm_bonferroni_correction(&[0.01, 0.02, 0.03]).unwrap(), &[0.03, 0.04, 0.04]);

        // sorted: 0.01*4, 0.02*3, 0.03*2, 0.04*1 -> running max 0.04, 0.06, 0.06, 0.06
        let adjusted = holm_bonferroni_correction(&[0.04, 0.01, 0.03, 0.02]).unwrap();
        assert_all_close(&adjusted, &[0.06, 0.04, 0.06, 0.06]);
    }

    #[test]
    fn test_hochberg() {
        assert_all_close(&hochberg_correction(&[0.01, 0.02, 0.03]).unwrap(), &[0.03, 0.03, 0.03]);

        // p.adjust(c(0.01, 0.04, 0.03, 0.2), "hochberg")
        let adjusted = hochberg_correction(&[0.01, 0.04, 0.03, 0.2]).unwrap();
        assert_all_close(&adjusted, &[0.04, 0.08, 0.08, 0.2]);
    }

    #[test]
    fn test_adjust_dispatch() {
        let p_values = [0.01, 0.02, 0.03, 0.1, 0.2];
        assert_all_close(
            &adjust_p_values(&p_values, CorrectionMethod::Holm).unwrap(),
            &holm_bonferroni_correction(&p_values).unwrap(),
        );
        assert_eq!(CorrectionMethod::default(), CorrectionMethod::BenjaminiHochberg);
    }

    #[test]
    fn test_invalid_inputs() {
        let err = benjamini_hochberg_correction(&[]).unwrap_err();
        assert_eq!(err.to_string(), "Empty p-value array");

        let err = holm_bonferroni_correction(&[0.01, 1.5, 0.03]).unwrap_err();
        assert!(err.to_string().contains("Invalid p-value at index 1"));

        for method in [
            CorrectionMethod::BenjaminiHochberg,
            CorrectionMethod::BenjaminiYekutieli,
            CorrectionMethod::Bonferroni,
            CorrectionMethod::Holm,
            CorrectionMethod::Hochberg,
        ] {
            assert!(adjust_p_values(&[-0.1, 0.5], method).is_err());
            assert!(adjust_p_values(&[f64::NAN], method).is_err());
        }
    }
}
