use crate::matrix::{AggregateFn, ExpressionMatrix};
use crate::orthology::{NonOneToOneStrategy, OrthologMap, Resolution};
use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionOptions {
    /// Drop genes without an ortholog in the reduced map.
    pub drop_nonorths: bool,
    /// Rename rows to the ortholog names.
    pub convert_orths: bool,
    pub non121_strategy: NonOneToOneStrategy,
    /// How rows that end up with the same ortholog name are combined.
    pub aggregate: AggregateFn,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        ConversionOptions {
            drop_nonorths: true,
            convert_orths: false,
            non121_strategy: NonOneToOneStrategy::DropBothSpecies,
            aggregate: AggregateFn::Sum,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OrthologReport {
    pub n_genes_in: usize,
    /// Genes found under their input-species name.
    pub n_resolved_input: usize,
    /// Genes only found under their ortholog name.
    pub n_resolved_ortholog: usize,
    pub n_dropped: usize,
    pub n_genes_out: usize,
}

/// Drop and/or rename the genes of `matrix` using the 1:1 reduction of `map`.
///
/// Every gene is first looked up under its input-species name and then under its ortholog name,
/// so matrices already labelled in the output species are handled too.
pub fn convert_orthologs(
    matrix: &ExpressionMatrix,
    map: &OrthologMap,
    options: &ConversionOptions,
) -> anyhow::Result<(ExpressionMatrix, OrthologReport)> {
    let reduced = map.filter_non121(options.non121_strategy);

    let mut report = OrthologReport {
        n_genes_in: matrix.n_genes(),
        ..Default::default()
    };
    let mut keep = Vec::with_capacity(matrix.n_genes());
    let mut labels = Vec::with_capacity(matrix.n_genes());

    for (idx, gene) in matrix.gene_ids().iter().enumerate() {
        let resolution = reduced.resolve(gene);
        match resolution {
            Some(Resolution::Input(_)) => report.n_resolved_input += 1,
            Some(Resolution::Ortholog(_)) => report.n_resolved_ortholog += 1,
            None if options.drop_nonorths => {
                report.n_dropped += 1;
                continue;
            }
            None => {}
        }

        keep.push(idx);
        labels.push(match resolution {
            Some(r) if options.convert_orths => r.pair().ortholog_gene.clone(),
            _ => gene.clone(),
        });
    }

    if keep.is_empty() {
        return Err(anyhow!(
            "No genes with {} -> {} orthologs remain after {:?}",
            map.input_species(),
            map.output_species(),
            options.non121_strategy
        ));
    }
    if report.n_resolved_input == 0 && report.n_resolved_ortholog > 0 {
        log::info!("Gene names matched the {} ortholog names", map.output_species());
    }

    let subset = matrix.subset_genes(&keep)?;
    let unique: HashSet<&str> = labels.iter().map(String::as_str).collect();
    let converted = if unique.len() == labels.len() {
        subset.rename_genes(labels)?
    } else {
        log::info!(
            "Aggregating {} genes onto {} shared ortholog names ({:?})",
            labels.len(),
            unique.len(),
            options.aggregate
        );
        subset.aggregate_genes(&labels, options.aggregate)?
    };

    report.n_genes_out = converted.n_genes();
    log::info!(
        "Ortholog conversion {} -> {}: {} genes in, {} dropped, {} out",
        map.input_species(),
        map.output_species(),
        report.n_genes_in,
        report.n_dropped,
        report.n_genes_out
    );

    Ok((converted, report))
}
