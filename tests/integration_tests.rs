// End-to-end tests of the informative-gene pipeline: ortholog tables loaded from disk, options
// loaded from JSON, and the thresholding contract of the differential expression stage.

#[cfg(test)]
mod integration_tests {
    use ndarray::Array2;
    use single_genefilter::filter::expression::drop_empty;
    use single_genefilter::filter::{FilterOptions, OutputFormat, drop_uninformative_genes};
    use single_genefilter::matrix::{CellLevels, ExpressionMatrix};
    use single_genefilter::orthology::OrthologMap;
    use single_genefilter::testing::DgeMethod;
    use single_genefilter::testing::correction::CorrectionMethod;
    use single_genefilter::testing::inference::MatrixStatTests;
    use std::io::Write;

    const GENES: [&str; 8] = [
        "Gapdh", "Cd3e", "Cd19", "Nkg7", "Actb", "Ifit1", "Malat1", "Empty",
    ];

    /// 3 cell types x 6 cells. Cd3e, Cd19 and Nkg7 mark one type each, Ifit1 is a weaker T marker,
    /// the rest are flat. Cell 17 has no expression at all.
    fn experiment() -> (ExpressionMatrix, CellLevels) {
        let n_cells = 18;
        let mut dense = Array2::<f64>::zeros((GENES.len(), n_cells));
        for cell in 0..n_cells - 1 {
            let noise = ((cell * 7) % 5) as f64;
            let group = cell / 6;
            dense[[0, cell]] = 30.0 + noise;
            dense[[1, cell]] = if group == 0 { 60.0 + noise } else { noise };
            dense[[2, cell]] = if group == 1 { 45.0 + noise } else { noise };
            dense[[3, cell]] = if group == 2 { 80.0 + noise } else { 1.0 + noise };
            dense[[4, cell]] = 100.0 + 2.0 * noise;
            dense[[5, cell]] = if group == 0 { 12.0 + noise } else { 2.0 + noise };
            dense[[6, cell]] = 50.0 + noise;
        }
        let matrix = ExpressionMatrix::from_dense(
            &dense,
            GENES.iter().map(|g| g.to_string()).collect(),
            (0..n_cells).map(|i| format!("AAAC{:02}", i)).collect(),
        )
        .unwrap();
        let levels = (0..n_cells).map(|i| ["T", "B", "NK"][i / 6]).collect();
        (matrix, levels)
    }

    fn ortholog_table() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "input_gene,ortholog_gene,homology_type").unwrap();
        for (mouse, human) in [
            ("Gapdh", "GAPDH"),
            ("Cd3e", "CD3E"),
            ("Cd19", "CD19"),
            ("Nkg7", "NKG7"),
            ("Actb", "ACTB"),
            ("Ifit1", "IFIT1"),
            ("Ifit1", "IFIT1B"),
        ] {
            writeln!(file, "{},{},ortholog", mouse, human).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_mouse_to_human_pipeline() {
        let (matrix, levels) = experiment();
        let table = ortholog_table();
        let map = OrthologMap::from_delimited(table.path(), b',', "mouse", "human").unwrap();

        let options = FilterOptions {
            convert_orths: true,
            adj_pval_thresh: 1e-3,
            output: OutputFormat::Annotated,
            ..Default::default()
        };
        let output = drop_uninformative_genes(&matrix, &levels, Some(&map), &options).unwrap();
        let experiment = output.annotated().unwrap();

        // Ifit1 is one-to-many, Malat1 has no ortholog, Empty is never expressed.
        assert_eq!(experiment.report.n_genes_expressed, 7);
        assert_eq!(experiment.report.n_genes_orthologs, Some(5));
        assert_eq!(experiment.report.n_cells_dropped, 1);
        assert_eq!(
            experiment.matrix.gene_ids(),
            &["CD3E", "CD19", "NKG7"].map(String::from)
        );
        assert_eq!(experiment.levels.n_levels(), 3);
        for stats in &experiment.gene_statistics {
            println!(
                "{}: F = {:.2}, p = {:.3e}, adjusted p = {:.3e}",
                stats.gene, stats.statistic, stats.p_value, stats.adjusted_p_value
            );
        }
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let (matrix, levels) = experiment();
        let (expressed, expressed_levels) = drop_empty(&matrix, &levels).unwrap();
        let results = expressed
            .differential_expression(
                expressed_levels.group_ids(),
                DgeMethod::Limma,
                CorrectionMethod::BenjaminiHochberg,
            )
            .unwrap();
        let adjusted = results.adjusted_p_values.clone().unwrap();
        assert_eq!(adjusted.len(), GENES.len() - 1);

        // A gene whose adjusted p-value equals the threshold is dropped.
        let ifit1 = expressed.gene_index("Ifit1").unwrap();
        let thresh = adjusted[ifit1];
        assert!(thresh > 0.0 && thresh < 0.05);

        let options = FilterOptions {
            output_species: "mouse".into(),
            adj_pval_thresh: thresh,
            ..Default::default()
        };
        let filtered = drop_uninformative_genes(&matrix, &levels, None, &options)
            .unwrap()
            .into_matrix();

        let expected: Vec<String> = adjusted
            .iter()
            .enumerate()
            .filter(|&(_, &p)| p < thresh)
            .map(|(i, _)| expressed.gene_ids()[i].clone())
            .collect();
        assert_eq!(filtered.gene_ids(), expected.as_slice());
        assert!(filtered.gene_index("Ifit1").is_none());
        assert!(filtered.gene_index("Cd3e").is_some());
        assert!(filtered.nonzero_cols().iter().all(|&x| x));
        assert!(filtered.nonzero_rows().iter().all(|&x| x));
    }

    #[test]
    fn test_deseq2_with_json_options() {
        let (matrix, levels) = experiment();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "dge_method": "deseq2",
                "adj_pval_thresh": 1e-4,
                "input_species": "mouse",
                "output_species": "Mouse",
                "output": "annotated",
                "n_threads": 0
            }}"#
        )
        .unwrap();
        file.flush().unwrap();

        let options = FilterOptions::from_json_file(file.path()).unwrap();
        let output = drop_uninformative_genes(&matrix, &levels, None, &options).unwrap();
        let experiment = output.annotated().unwrap();

        for marker in ["Cd3e", "Cd19", "Nkg7"] {
            assert!(experiment.matrix.gene_index(marker).is_some(), "{} missing", marker);
        }
        assert!(experiment.matrix.gene_index("Gapdh").is_none());
        assert!(
            experiment
                .gene_statistics
                .iter()
                .all(|s| s.statistic >= 0.0 && s.adjusted_p_value < 1e-4)
        );
    }

    #[test]
    fn test_negative_counts_rejected_by_deseq2() {
        let dense = ndarray::array![[1.0, -2.0, 3.0, 4.0], [5.0, 6.0, 7.0, 8.0]];
        let matrix = ExpressionMatrix::from_dense(
            &dense,
            vec!["a".into(), "b".into()],
            (0..4).map(|i| format!("c{}", i)).collect(),
        )
        .unwrap();
        let levels: CellLevels = ["x", "x", "y", "y"].into_iter().collect();
        let options = FilterOptions {
            dge_method: Some(DgeMethod::Deseq2),
            output_species: "mouse".into(),
            ..Default::default()
        };
        assert!(drop_uninformative_genes(&matrix, &levels, None, &options).is_err());

        let limma = FilterOptions {
            dge_method: Some(DgeMethod::Limma),
            adj_pval_thresh: 1.0,
            ..options
        };
        assert!(drop_uninformative_genes(&matrix, &levels, None, &limma).is_ok());
    }
}
