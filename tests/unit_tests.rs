use approx::assert_relative_eq;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use single_genefilter::testing::TestResult;
use single_genefilter::testing::correction::{adjust_p_values, CorrectionMethod};
use single_genefilter::testing::inference::count::{nb_lrt_matrix_groups, size_factors, SizeFactorMethod};
use single_genefilter::testing::inference::moderation::fit_f_distribution;
use single_genefilter::testing::inference::parametric::{
    anova_matrix_groups, moderated_anova_matrix_groups, one_way_anova_from_sums,
};

/// Build a genes x cells CSR matrix from dense rows.
fn csr(rows: &[&[f64]]) -> CsrMatrix<f64> {
    let n_cols = rows[0].len();
    let mut coo = CooMatrix::new(rows.len(), n_cols);
    for (i, row) in rows.iter().enumerate() {
        for (j, &v) in row.iter().enumerate() {
            if v != 0.0 {
                coo.push(i, j, v);
            }
        }
    }
    CsrMatrix::from(&coo)
}

#[cfg(test)]
mod quick_test {
    use super::*;

    #[test]
    fn check_if_anova_works() {
        // Group 1: [1, 2, 3] -> mean=2
        // Group 2: [7, 8, 9] -> mean=8
        // Group 3: [4, 5, 6] -> mean=5
        let sums = [6.0, 24.0, 15.0];
        let sum_squares = [14.0, 194.0, 77.0];
        let sizes = [3, 3, 3];

        let result: TestResult<f64> = one_way_anova_from_sums(&sums, &sum_squares, &sizes);

        println!("=== ANOVA RESULTS ===");
        println!("F-statistic: {}", result.statistic);
        println!("P-value: {}", result.p_value);

        // SSB = 3 * (9 + 9 + 0) = 54, SSW = 6 * 1 = 6, F = (54 / 2) / (6 / 6) = 27
        assert_relative_eq!(result.statistic, 27.0, epsilon = 1e-10);
        // For F(2, 6) the upper tail is (1 + F / 3)^-3
        assert_relative_eq!(result.p_value, 0.001, epsilon = 1e-9);
        assert_eq!(result.degrees_of_freedom, Some((2.0, 6.0)));
    }

    #[test]
    fn check_identical_groups() {
        // [5, 5, 5] in both groups: nothing to explain
        let result = one_way_anova_from_sums(&[15.0, 15.0], &[75.0, 75.0], &[3, 3]);
        println!("\n=== IDENTICAL GROUPS TEST ===");
        println!("F-statistic: {}, P-value: {}", result.statistic, result.p_value);

        assert_eq!(result.statistic, 0.0);
        assert_eq!(result.p_value, 1.0);
    }

    #[test]
    fn check_perfect_separation() {
        // [2, 2] vs [4, 4]: no within-group variance at all
        let result = one_way_anova_from_sums(&[4.0, 8.0], &[8.0, 32.0], &[2, 2]);
        assert!(result.statistic.is_infinite());
        assert_eq!(result.p_value, 0.0);
    }

    #[test]
    fn test_zero_expression_vs_expressed() {
        // Common in single-cell: one cell type expresses the gene, the others don't
        let matrix = csr(&[
            &[5.0, 4.0, 6.0, 5.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0],
            &[1.0, 2.0, 1.0, 2.0, 2.0, 1.0, 2.0, 1.0, 1.0, 2.0, 1.0, 2.0],
        ]);
        let groups = [0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2];

        let results = anova_matrix_groups(&matrix, &groups).unwrap();
        println!("\n=== ZERO VS EXPRESSED TEST ===");
        for (i, r) in results.iter().enumerate() {
            println!("gene {}: F = {:.3}, p = {:.3e}", i, r.statistic, r.p_value);
        }

        assert!(results[0].p_value < 1e-6, "Expected highly significant difference");
        assert!(results[1].p_value > 0.5, "Expected no difference for the flat gene");
    }
}

#[cfg(test)]
mod moderated_tests {
    use super::*;

    #[test]
    fn test_moderation_shrinks_extreme_variances() {
        let matrix = csr(&[
            &[1.0, 2.0, 3.0, 6.0, 7.0, 8.0],
            &[1.0, 1.1, 0.9, 2.0, 2.1, 1.9],
            &[0.0, 10.0, 20.0, 5.0, 15.0, 25.0],
            &[3.0, 4.0, 5.0, 3.0, 4.0, 5.0],
        ]);
        let groups = [0, 0, 0, 1, 1, 1];

        let ordinary = anova_matrix_groups(&matrix, &groups).unwrap();
        let moderated = moderated_anova_matrix_groups(&matrix, &groups).unwrap();

        for (o, m) in ordinary.iter().zip(&moderated) {
            let s2 = o.metadata["variance"];
            let s2_post = m.metadata["variance"];
            println!("s2 = {:.4}, s2_post = {:.4}, F = {:.3} -> {:.3}", s2, s2_post, o.statistic, m.statistic);
            assert_relative_eq!(m.statistic, o.statistic * s2 / s2_post, max_relative = 1e-10);
        }

        // The tightest and the noisiest genes are pulled toward each other.
        let prior = fit_f_distribution(
            &ordinary.iter().map(|r| r.metadata["variance"]).collect::<Vec<_>>(),
            4.0,
        );
        assert!(moderated[1].metadata["variance"] > ordinary[1].metadata["variance"]);
        assert!(moderated[2].metadata["variance"] < ordinary[2].metadata["variance"]);
        assert!(prior.var_prior > 0.0);
    }
}

#[cfg(test)]
mod count_tests {
    use super::*;

    #[test]
    fn test_size_factors_track_library_size() {
        // Cell 2 has exactly twice the counts of cell 1.
        let matrix = csr(&[&[10.0, 20.0, 10.0], &[4.0, 8.0, 4.0], &[7.0, 14.0, 7.0]]);
        let (factors, method) = size_factors(&matrix).unwrap();
        println!("size factors: {:?}", factors);

        assert_eq!(method, SizeFactorMethod::Ratio);
        assert_relative_eq!(factors[1] / factors[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(factors[0], factors[2], epsilon = 1e-12);
    }

    #[test]
    fn test_nb_lrt_marker_vs_housekeeping() {
        let matrix = csr(&[
            &[50.0, 55.0, 48.0, 52.0, 1.0, 0.0, 2.0, 1.0],
            &[20.0, 22.0, 19.0, 21.0, 20.0, 21.0, 22.0, 19.0],
            &[10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0],
        ]);
        let groups = [0, 0, 0, 0, 1, 1, 1, 1];
        let results = nb_lrt_matrix_groups(&matrix, &groups).unwrap();

        println!("\n=== NB LRT ===");
        for r in &results {
            println!(
                "LR = {:.3}, p = {:.3e}, dispersion = {:.3e}",
                r.statistic, r.p_value, r.metadata["dispersion"]
            );
            assert!(r.statistic >= 0.0);
        }

        assert!(results[0].p_value < 1e-10);
        assert!(results[1].p_value > 0.5);
        assert!(results[2].statistic < 1e-6);
    }

    #[test]
    fn test_nb_lrt_rejects_negative_counts() {
        let matrix = csr(&[&[1.0, -1.0, 2.0, 3.0]]);
        assert!(nb_lrt_matrix_groups(&matrix, &[0, 0, 1, 1]).is_err());
    }
}

#[cfg(test)]
mod correction_tests {
    use super::*;

    #[test]
    fn test_bh_matches_reference() {
        // R: p.adjust(c(0.01, 0.04, 0.03, 0.20), "BH")
        let p_values = [0.01, 0.04, 0.03, 0.20];
        let adjusted = adjust_p_values(&p_values, CorrectionMethod::BenjaminiHochberg).unwrap();
        let expected = [0.04, 0.0533333333333333, 0.0533333333333333, 0.20];
        for (a, e) in adjusted.iter().zip(expected) {
            assert_relative_eq!(*a, e, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_holm_is_monotone_in_p() {
        let p_values = [0.02, 0.001, 0.04, 0.03, 0.5, 0.01];
        let adjusted = adjust_p_values(&p_values, CorrectionMethod::Holm).unwrap();

        let mut order: Vec<usize> = (0..p_values.len()).collect();
        order.sort_by(|&a, &b| p_values[a].partial_cmp(&p_values[b]).unwrap());
        for w in order.windows(2) {
            assert!(adjusted[w[0]] <= adjusted[w[1]]);
        }
        assert!(adjusted.iter().all(|&p| (0.0..=1.0).contains(&p)));
    }

    #[test]
    fn test_empty_and_invalid_input() {
        assert!(adjust_p_values(&[], CorrectionMethod::BenjaminiHochberg).is_err());
        assert!(adjust_p_values(&[0.5, 1.5], CorrectionMethod::Bonferroni).is_err());
    }
}
