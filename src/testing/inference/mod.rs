use crate::matrix::ExpressionMatrix;
use crate::testing::correction::{self, CorrectionMethod};
use crate::testing::{DgeMethod, MultipleTestResults, TestResult};
use nalgebra_sparse::CsrMatrix;

pub mod count;

pub mod moderation;

pub mod parametric;

/// Per-gene tests of expression differences across cell types on a genes x cells matrix.
///
/// `group_ids` holds one cell-type id per column; ids need not be contiguous.
pub trait MatrixStatTests {
    fn anova_test(&self, group_ids: &[usize]) -> anyhow::Result<Vec<TestResult<f64>>>;

    fn moderated_anova_test(&self, group_ids: &[usize]) -> anyhow::Result<Vec<TestResult<f64>>>;

    fn nb_lrt_test(&self, group_ids: &[usize]) -> anyhow::Result<Vec<TestResult<f64>>>;

    fn differential_expression(
        &self,
        group_ids: &[usize],
        method: DgeMethod,
        correction: CorrectionMethod,
    ) -> anyhow::Result<MultipleTestResults<f64>>;
}

impl MatrixStatTests for CsrMatrix<f64> {
    fn anova_test(&self, group_ids: &[usize]) -> anyhow::Result<Vec<TestResult<f64>>> {
        parametric::anova_matrix_groups(self, group_ids)
    }

    fn moderated_anova_test(&self, group_ids: &[usize]) -> anyhow::Result<Vec<TestResult<f64>>> {
        parametric::moderated_anova_matrix_groups(self, group_ids)
    }

    fn nb_lrt_test(&self, group_ids: &[usize]) -> anyhow::Result<Vec<TestResult<f64>>> {
        count::nb_lrt_matrix_groups(self, group_ids)
    }

    fn differential_expression(
        &self,
        group_ids: &[usize],
        method: DgeMethod,
        correction: CorrectionMethod,
    ) -> anyhow::Result<MultipleTestResults<f64>> {
        let (results, test_type) = match method {
            DgeMethod::Limma => (self.moderated_anova_test(group_ids)?, "moderated_anova"),
            DgeMethod::Deseq2 => (self.nb_lrt_test(group_ids)?, "nb_lrt"),
        };

        // Extract statistics and p-values
        let statistics: Vec<_> = results.iter().map(|r| r.statistic).collect();
        let p_values: Vec<_> = results.iter().map(|r| r.p_value).collect();

        if p_values.is_empty() {
            return Ok(MultipleTestResults::new(statistics, p_values)
                .with_adjusted_p_values(Vec::new())
                .with_global_metadata("test_type", test_type));
        }

        // Apply multiple testing correction
        let adjusted_p_values = correction::adjust_p_values(&p_values, correction)?;

        Ok(MultipleTestResults::new(statistics, p_values)
            .with_adjusted_p_values(adjusted_p_values)
            .with_global_metadata("test_type", test_type)
            .with_global_metadata("correction", &format!("{:?}", correction)))
    }
}

impl MatrixStatTests for ExpressionMatrix {
    fn anova_test(&self, group_ids: &[usize]) -> anyhow::Result<Vec<TestResult<f64>>> {
        self.data().anova_test(group_ids)
    }

    fn moderated_anova_test(&self, group_ids: &[usize]) -> anyhow::Result<Vec<TestResult<f64>>> {
        self.data().moderated_anova_test(group_ids)
    }

    fn nb_lrt_test(&self, group_ids: &[usize]) -> anyhow::Result<Vec<TestResult<f64>>> {
        self.data().nb_lrt_test(group_ids)
    }

    fn differential_expression(
        &self,
        group_ids: &[usize],
        method: DgeMethod,
        correction: CorrectionMethod,
    ) -> anyhow::Result<MultipleTestResults<f64>> {
        self.data()
            .differential_expression(group_ids, method, correction)
    }
}
