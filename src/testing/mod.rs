//! Per-gene tests for expression differences across cell types, and multiple testing correction.

use serde::{Deserialize, Serialize};
use single_utilities::traits::FloatOps;
use std::collections::HashMap;

pub mod correction;
pub mod inference;

pub mod utils;

/// Test used to decide whether a gene varies across cell types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DgeMethod {
    /// One-way ANOVA on the expression values with empirical-Bayes moderated variances.
    Limma,
    /// Negative-binomial likelihood-ratio test of `~cell type` against `~1` on counts.
    Deseq2,
}

/// Outcome of testing a single gene.
#[derive(Debug, Clone)]
pub struct TestResult<T> {
    /// F-statistic or likelihood-ratio statistic
    pub statistic: T,
    pub p_value: T,
    /// Degrees of freedom (numerator, denominator) of the reference distribution
    pub degrees_of_freedom: Option<(T, T)>,
    /// Intermediate quantities of the fit, keyed by name
    pub metadata: HashMap<String, T>,
}

impl<T> TestResult<T>
where
    T: FloatOps,
{
    pub fn new(statistic: T, p_value: T) -> Self {
        TestResult {
            statistic,
            p_value,
            degrees_of_freedom: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_degrees_of_freedom(mut self, df1: T, df2: T) -> Self {
        self.degrees_of_freedom = Some((df1, df2));
        self
    }

    pub fn with_metadata(mut self, key: &str, value: T) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// Results of testing every gene of a matrix, in row order.
#[derive(Debug, Clone)]
pub struct MultipleTestResults<T> {
    pub statistics: Vec<T>,
    /// Unadjusted p-values
    pub p_values: Vec<T>,
    /// P-values after multiple testing correction
    pub adjusted_p_values: Option<Vec<T>>,
    /// Test and correction names
    pub global_metadata: HashMap<String, String>,
}

impl<T> MultipleTestResults<T>
where
    T: FloatOps,
{
    pub fn new(statistics: Vec<T>, p_values: Vec<T>) -> Self {
        MultipleTestResults {
            statistics,
            p_values,
            adjusted_p_values: None,
            global_metadata: HashMap::new(),
        }
    }

    pub fn with_adjusted_p_values(mut self, adjusted_p_values: Vec<T>) -> Self {
        self.adjusted_p_values = Some(adjusted_p_values);
        self
    }

    pub fn with_global_metadata(mut self, key: &str, value: &str) -> Self {
        self.global_metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn len(&self) -> usize {
        self.p_values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.p_values.is_empty()
    }

    /// Adjusted p-values when present, raw p-values otherwise.
    fn reference_p_values(&self) -> &[T] {
        self.adjusted_p_values.as_deref().unwrap_or(&self.p_values)
    }

    /// Rows whose (adjusted) p-value is strictly below `alpha`.
    pub fn significant_indices(&self, alpha: T) -> Vec<usize> {
        self.reference_p_values()
            .iter()
            .enumerate()
            .filter_map(|(i, &p)| (p < alpha).then_some(i))
            .collect()
    }

    pub fn num_significant(&self, alpha: T) -> usize {
        self.reference_p_values().iter().filter(|&&p| p < alpha).count()
    }

    /// Rows of the `n` smallest (adjusted) p-values, most significant first.
    pub fn top_features(&self, n: usize) -> Vec<usize> {
        let p_values = self.reference_p_values();
        let mut indices: Vec<usize> = (0..p_values.len()).collect();
        indices.sort_by(|&a, &b| {
            p_values[a]
                .partial_cmp(&p_values[b])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        indices.truncate(n);
        indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_significant_indices_prefers_adjusted() {
        let results = MultipleTestResults::new(vec![5.0, 1.0, 9.0], vec![0.001, 0.2, 0.0001])
            .with_adjusted_p_values(vec![0.003, 0.2, 0.0003]);
        assert_eq!(results.significant_indices(0.001), vec![2]);
        assert_eq!(results.significant_indices(0.01), vec![0, 2]);
        assert_eq!(results.num_significant(0.01), 2);
        assert_eq!(results.top_features(2), vec![2, 0]);
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn test_significant_is_strict() {
        let results = MultipleTestResults::new(vec![1.0, 2.0], vec![0.05, 0.04]);
        assert_eq!(results.significant_indices(0.05), vec![1]);
    }

    #[test]
    fn test_dge_method_serde_names() {
        let method: DgeMethod = serde_json::from_str("\"deseq2\"").unwrap();
        assert_eq!(method, DgeMethod::Deseq2);
        assert_eq!(serde_json::to_string(&DgeMethod::Limma).unwrap(), "\"limma\"");
    }
}
