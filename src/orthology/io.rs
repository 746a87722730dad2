use crate::orthology::{OrthologMap, OrthologPair};
use anyhow::Context;
use serde::Deserialize;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct OrthologRecord {
    input_gene: Option<String>,
    ortholog_gene: Option<String>,
}

impl OrthologMap {
    /// Read a delimited ortholog table with an `input_gene` and an `ortholog_gene` header column.
    ///
    /// Other columns are ignored. Rows where either gene is empty are skipped.
    pub fn from_reader<R: Read>(
        reader: R,
        delimiter: u8,
        input_species: impl Into<String>,
        output_species: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let mut csv = csv::ReaderBuilder::default()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut pairs = Vec::new();
        let mut skipped = 0usize;
        for (line, record) in csv.deserialize::<OrthologRecord>().enumerate() {
            let record = record.with_context(|| format!("Malformed ortholog record {}", line + 1))?;
            match (record.input_gene, record.ortholog_gene) {
                (Some(input), Some(ortholog)) if !input.is_empty() && !ortholog.is_empty() => {
                    pairs.push(OrthologPair::new(input, ortholog))
                }
                _ => skipped += 1,
            }
        }

        if skipped > 0 {
            log::warn!("Skipped {} ortholog records with a missing gene", skipped);
        }

        let map = OrthologMap::new(input_species, output_species, pairs);
        log::debug!(
            "Loaded {} {} -> {} ortholog pairs",
            map.len(),
            map.input_species(),
            map.output_species()
        );
        Ok(map)
    }

    pub fn from_delimited(
        path: impl AsRef<Path>,
        delimiter: u8,
        input_species: impl Into<String>,
        output_species: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("Cannot open ortholog table {}", path.display()))?;
        Self::from_reader(file, delimiter, input_species, output_species)
    }
}
