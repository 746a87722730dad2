use crate::matrix::AggregateFn;
use crate::orthology::{ConversionOptions, NonOneToOneStrategy};
use crate::testing::DgeMethod;
use crate::testing::correction::CorrectionMethod;
use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Shape of the value returned by [`drop_uninformative_genes`](crate::filter::drop_uninformative_genes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Only the filtered matrix.
    #[default]
    Matrix,
    /// The filtered matrix with its cell-type labels, per-gene test results and a drop report.
    Annotated,
}

/// Settings for the informative-gene pipeline.
///
/// Every field has a default, so a JSON document only has to name what it changes:
///
/// ```
/// # use single_genefilter::filter::FilterOptions;
/// let options = FilterOptions::from_json_str(r#"{ "dge_method": "deseq2", "adj_pval_thresh": 0.01 }"#).unwrap();
/// assert_eq!(options.input_species, "mouse");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterOptions {
    /// Test for variation across cell types; `None` skips testing.
    pub dge_method: Option<DgeMethod>,
    /// Genes are kept when their adjusted p-value is strictly below this.
    pub adj_pval_thresh: f64,
    pub correction: CorrectionMethod,
    /// Quantile probability in `[0, 1]` of the cell-type mean variance below which genes are dropped.
    pub min_variance_decile: Option<f64>,
    pub input_species: String,
    pub output_species: String,
    pub drop_nonorths: bool,
    pub convert_orths: bool,
    pub non121_strategy: NonOneToOneStrategy,
    pub aggregate: AggregateFn,
    pub output: OutputFormat,
    /// Worker threads; 0 lets rayon decide.
    pub n_threads: usize,
}

impl Default for FilterOptions {
    fn default() -> Self {
        FilterOptions {
            dge_method: Some(DgeMethod::Limma),
            adj_pval_thresh: 1e-5,
            correction: CorrectionMethod::BenjaminiHochberg,
            min_variance_decile: None,
            input_species: "mouse".to_string(),
            output_species: "human".to_string(),
            drop_nonorths: true,
            convert_orths: false,
            non121_strategy: NonOneToOneStrategy::DropBothSpecies,
            aggregate: AggregateFn::Sum,
            output: OutputFormat::Matrix,
            n_threads: 1,
        }
    }
}

impl FilterOptions {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.adj_pval_thresh > 0.0 && self.adj_pval_thresh <= 1.0) {
            return Err(anyhow!(
                "Adjusted p-value threshold must be in (0, 1], got {}",
                self.adj_pval_thresh
            ));
        }
        if let Some(prob) = self.min_variance_decile {
            if !(0.0..=1.0).contains(&prob) {
                return Err(anyhow!("Variance quantile must be in [0, 1], got {}", prob));
            }
        }
        if self.input_species.trim().is_empty() || self.output_species.trim().is_empty() {
            return Err(anyhow!("Species names must not be empty"));
        }
        Ok(())
    }

    pub fn same_species(&self) -> bool {
        self.input_species.eq_ignore_ascii_case(&self.output_species)
    }

    pub fn conversion(&self) -> ConversionOptions {
        ConversionOptions {
            drop_nonorths: self.drop_nonorths,
            convert_orths: self.convert_orths,
            non121_strategy: self.non121_strategy,
            aggregate: self.aggregate,
        }
    }

    /// Parse and validate options from JSON.
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let options: FilterOptions = serde_json::from_str(json).context("parsing filter options")?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading filter options from {}", path.display()))?;
        Self::from_json_str(&text)
    }
}
