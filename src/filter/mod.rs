//! The informative-gene pipeline.
//!
//! [`drop_uninformative_genes`] removes, in order:
//!
//! 1. genes and cells without any expression,
//! 2. genes without a 1:1 ortholog in the output species (optionally renaming the rest),
//! 3. genes whose cell-type mean expression varies less than a chosen quantile,
//! 4. genes whose expression does not differ across cell types, by moderated ANOVA
//!    ([`DgeMethod::Limma`]) or negative-binomial LRT ([`DgeMethod::Deseq2`]).
//!
//! Each stage is also usable on its own from [`expression`] and [`variance`].

use crate::matrix::{CellLevels, ExpressionMatrix};
use crate::orthology::{OrthologMap, OrthologReport, convert_orthologs};
use crate::testing::DgeMethod;
use crate::testing::inference::MatrixStatTests;
use anyhow::{Context, anyhow};
use serde::Serialize;

pub mod expression;
mod options;
pub mod variance;

pub use options::{FilterOptions, OutputFormat};

/// Test results of a gene that passed the threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneStatistics {
    pub gene: String,
    pub statistic: f64,
    pub p_value: f64,
    pub adjusted_p_value: f64,
}

/// Gene and cell counts through the pipeline. Stage counts are `None` for skipped stages.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DropReport {
    pub n_genes_in: usize,
    pub n_cells_in: usize,
    pub n_genes_expressed: usize,
    pub n_genes_orthologs: Option<usize>,
    pub n_genes_variance: Option<usize>,
    pub n_genes_significant: Option<usize>,
    pub n_cells_dropped: usize,
    pub orthologs: Option<OrthologReport>,
}

#[derive(Debug, Clone)]
pub struct AnnotatedExperiment {
    pub matrix: ExpressionMatrix,
    pub levels: CellLevels,
    /// One entry per kept gene, in matrix row order. Empty when no test ran.
    pub gene_statistics: Vec<GeneStatistics>,
    pub report: DropReport,
}

#[derive(Debug, Clone)]
pub enum FilteredOutput {
    Matrix(ExpressionMatrix),
    Annotated(AnnotatedExperiment),
}

impl FilteredOutput {
    pub fn into_matrix(self) -> ExpressionMatrix {
        match self {
            FilteredOutput::Matrix(matrix) => matrix,
            FilteredOutput::Annotated(experiment) => experiment.matrix,
        }
    }

    pub fn matrix(&self) -> &ExpressionMatrix {
        match self {
            FilteredOutput::Matrix(matrix) => matrix,
            FilteredOutput::Annotated(experiment) => &experiment.matrix,
        }
    }

    pub fn annotated(&self) -> Option<&AnnotatedExperiment> {
        match self {
            FilteredOutput::Matrix(_) => None,
            FilteredOutput::Annotated(experiment) => Some(experiment),
        }
    }
}

/// Reduce `matrix` to genes that are expressed, have orthologs and vary across the cell types
/// in `levels`.
///
/// `orthologs` is required when the species in `options` differ and `drop_nonorths` is set. Work
/// runs on a dedicated rayon pool with `options.n_threads` threads.
pub fn drop_uninformative_genes(
    matrix: &ExpressionMatrix,
    levels: &CellLevels,
    orthologs: Option<&OrthologMap>,
    options: &FilterOptions,
) -> anyhow::Result<FilteredOutput> {
    options.validate()?;

    let thread_pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.n_threads)
        .build()
        .context("building the filter thread pool")?;

    thread_pool.install(|| run_pipeline(matrix, levels, orthologs, options))
}

fn run_pipeline(
    matrix: &ExpressionMatrix,
    levels: &CellLevels,
    orthologs: Option<&OrthologMap>,
    options: &FilterOptions,
) -> anyhow::Result<FilteredOutput> {
    let mut report = DropReport {
        n_genes_in: matrix.n_genes(),
        n_cells_in: matrix.n_cells(),
        ..Default::default()
    };
    log::info!(
        "Filtering {} genes x {} cells in {} cell types",
        matrix.n_genes(),
        matrix.n_cells(),
        levels.n_levels()
    );

    if options.dge_method.is_some() && levels.n_levels() < 2 {
        return Err(anyhow!(
            "Testing for differential expression needs at least two cell types, got {}",
            levels.n_levels()
        ));
    }

    let (mut current, mut current_levels) = expression::drop_empty(matrix, levels)?;
    report.n_genes_expressed = current.n_genes();

    if let Some((converted, ortholog_report)) = ortholog_stage(&current, orthologs, options)? {
        report.n_genes_orthologs = Some(converted.n_genes());
        report.orthologs = Some(ortholog_report);
        current = converted;
    }

    if let Some(prob) = options.min_variance_decile {
        current = variance::filter_min_variance_decile(&current, &current_levels, prob)?;
        report.n_genes_variance = Some(current.n_genes());
    }

    (current, current_levels) = expression::drop_empty_cells(current, current_levels)?;

    let mut gene_statistics = Vec::new();
    if let Some(method) = options.dge_method {
        if current_levels.n_levels() < 2 {
            return Err(anyhow!("Only one cell type has expressed cells left to test"));
        }
        let (kept, stats) = dge_stage(&current, &current_levels, method, options)?;
        report.n_genes_significant = Some(kept.n_genes());
        gene_statistics = stats;
        current = kept;

        if current.n_genes() > 0 {
            (current, current_levels) = expression::drop_empty_cells(current, current_levels)?;
        } else {
            log::warn!(
                "No gene has an adjusted p-value below {}",
                options.adj_pval_thresh
            );
        }
    }

    report.n_cells_dropped = report.n_cells_in - current.n_cells();
    log::info!(
        "Kept {} of {} genes and {} of {} cells",
        current.n_genes(),
        report.n_genes_in,
        current.n_cells(),
        report.n_cells_in
    );

    Ok(match options.output {
        OutputFormat::Matrix => FilteredOutput::Matrix(current),
        OutputFormat::Annotated => FilteredOutput::Annotated(AnnotatedExperiment {
            matrix: current,
            levels: current_levels,
            gene_statistics,
            report,
        }),
    })
}

fn ortholog_stage(
    matrix: &ExpressionMatrix,
    orthologs: Option<&OrthologMap>,
    options: &FilterOptions,
) -> anyhow::Result<Option<(ExpressionMatrix, OrthologReport)>> {
    if options.same_species() {
        log::info!(
            "Input and output species are both {}, skipping ortholog filtering",
            options.input_species
        );
        return Ok(None);
    }

    let map = match orthologs {
        Some(map) => map,
        None if options.drop_nonorths => {
            return Err(anyhow!(
                "An ortholog table is required to drop {} genes without {} orthologs",
                options.input_species,
                options.output_species
            ));
        }
        None => {
            log::warn!("No ortholog table given, keeping {} gene names", options.input_species);
            return Ok(None);
        }
    };

    if !map.input_species().eq_ignore_ascii_case(&options.input_species)
        || !map.output_species().eq_ignore_ascii_case(&options.output_species)
    {
        return Err(anyhow!(
            "Ortholog table maps {} -> {} but {} -> {} was requested",
            map.input_species(),
            map.output_species(),
            options.input_species,
            options.output_species
        ));
    }

    convert_orthologs(matrix, map, &options.conversion()).map(Some)
}

fn dge_stage(
    matrix: &ExpressionMatrix,
    levels: &CellLevels,
    method: DgeMethod,
    options: &FilterOptions,
) -> anyhow::Result<(ExpressionMatrix, Vec<GeneStatistics>)> {
    log::info!(
        "Testing {} genes across {} cell types with {:?}",
        matrix.n_genes(),
        levels.n_levels(),
        method
    );
    let results = matrix.differential_expression(levels.group_ids(), method, options.correction)?;
    let adjusted = results
        .adjusted_p_values
        .as_deref()
        .ok_or_else(|| anyhow!("Differential expression returned no adjusted p-values"))?;

    let keep = results.significant_indices(options.adj_pval_thresh);
    let stats = keep
        .iter()
        .map(|&i| GeneStatistics {
            gene: matrix.gene_ids()[i].clone(),
            statistic: results.statistics[i],
            p_value: results.p_values[i],
            adjusted_p_value: adjusted[i],
        })
        .collect();

    log::info!(
        "{} of {} genes have adjusted p < {}",
        keep.len(),
        matrix.n_genes(),
        options.adj_pval_thresh
    );
    Ok((matrix.subset_genes(&keep)?, stats))
}
