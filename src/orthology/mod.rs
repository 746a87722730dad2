//! Cross-species gene mapping.
//!
//! An [`OrthologMap`] is a caller-supplied table of `(input_gene, ortholog_gene)` pairs between
//! two species. The map can be reduced to 1:1 orthologs with one of several
//! [`NonOneToOneStrategy`] rules and then used to drop or rename the rows of an
//! [`ExpressionMatrix`](crate::matrix::ExpressionMatrix) with [`convert_orthologs`].

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

mod convert;
mod io;

pub use convert::{ConversionOptions, OrthologReport, convert_orthologs};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrthologPair {
    pub input_gene: String,
    pub ortholog_gene: String,
}

impl OrthologPair {
    pub fn new(input_gene: impl Into<String>, ortholog_gene: impl Into<String>) -> Self {
        OrthologPair {
            input_gene: input_gene.into(),
            ortholog_gene: ortholog_gene.into(),
        }
    }
}

/// How genes with more than one ortholog are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonOneToOneStrategy {
    /// Drop a pair if either of its genes occurs in any other pair.
    #[default]
    DropBothSpecies,
    /// Drop input genes that map to several orthologs.
    DropInputSpecies,
    /// Drop orthologs that are hit by several input genes.
    DropOutputSpecies,
    /// Keep every pair.
    KeepBothSpecies,
    /// For input genes with several orthologs, keep the ortholog that occurs most often in the
    /// whole table (first listed on ties).
    KeepPopular,
}

/// Which naming convention a gene was found under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution<'a> {
    Input(&'a OrthologPair),
    Ortholog(&'a OrthologPair),
}

impl<'a> Resolution<'a> {
    pub fn pair(&self) -> &'a OrthologPair {
        match self {
            Resolution::Input(pair) | Resolution::Ortholog(pair) => pair,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrthologMap {
    input_species: String,
    output_species: String,
    pairs: Vec<OrthologPair>,
    by_input: HashMap<String, Vec<usize>>,
    by_ortholog: HashMap<String, Vec<usize>>,
}

impl OrthologMap {
    /// Build a map. Duplicate pairs are removed, keeping the first occurrence.
    pub fn new(
        input_species: impl Into<String>,
        output_species: impl Into<String>,
        pairs: Vec<OrthologPair>,
    ) -> Self {
        let mut seen = HashSet::with_capacity(pairs.len());
        let pairs: Vec<OrthologPair> = pairs
            .into_iter()
            .filter(|pair| seen.insert(pair.clone()))
            .collect();

        let mut by_input: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_ortholog: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, pair) in pairs.iter().enumerate() {
            by_input.entry(pair.input_gene.clone()).or_default().push(idx);
            by_ortholog
                .entry(pair.ortholog_gene.clone())
                .or_default()
                .push(idx);
        }

        OrthologMap {
            input_species: input_species.into(),
            output_species: output_species.into(),
            pairs,
            by_input,
            by_ortholog,
        }
    }

    /// Convenience constructor from `(input, ortholog)` tuples.
    pub fn from_pairs<I, A, B>(
        input_species: impl Into<String>,
        output_species: impl Into<String>,
        pairs: I,
    ) -> Self
    where
        I: IntoIterator<Item = (A, B)>,
        A: Into<String>,
        B: Into<String>,
    {
        let pairs = pairs
            .into_iter()
            .map(|(a, b)| OrthologPair::new(a, b))
            .collect();
        Self::new(input_species, output_species, pairs)
    }

    pub fn input_species(&self) -> &str {
        &self.input_species
    }

    pub fn output_species(&self) -> &str {
        &self.output_species
    }

    pub fn pairs(&self) -> &[OrthologPair] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn same_species(&self) -> bool {
        self.input_species.eq_ignore_ascii_case(&self.output_species)
    }

    /// Orthologs listed for an input gene.
    pub fn orthologs_of(&self, input_gene: &str) -> Vec<&OrthologPair> {
        self.by_input
            .get(input_gene)
            .map(|idx| idx.iter().map(|&i| &self.pairs[i]).collect())
            .unwrap_or_default()
    }

    /// Look a gene up by its input-species name, falling back to its ortholog name.
    ///
    /// Genes with several entries resolve to the first listed pair.
    pub fn resolve(&self, gene: &str) -> Option<Resolution<'_>> {
        if let Some(&idx) = self.by_input.get(gene).and_then(|v| v.first()) {
            return Some(Resolution::Input(&self.pairs[idx]));
        }
        self.by_ortholog
            .get(gene)
            .and_then(|v| v.first())
            .map(|&idx| Resolution::Ortholog(&self.pairs[idx]))
    }

    /// Reduce the map according to `strategy`.
    pub fn filter_non121(&self, strategy: NonOneToOneStrategy) -> OrthologMap {
        let input_count = |pair: &OrthologPair| self.by_input.get(&pair.input_gene).map_or(0, Vec::len);
        let ortholog_count =
            |pair: &OrthologPair| self.by_ortholog.get(&pair.ortholog_gene).map_or(0, Vec::len);

        let kept: Vec<OrthologPair> = match strategy {
            NonOneToOneStrategy::DropBothSpecies => self
                .pairs
                .iter()
                .filter(|p| input_count(p) == 1 && ortholog_count(p) == 1)
                .cloned()
                .collect(),
            NonOneToOneStrategy::DropInputSpecies => self
                .pairs
                .iter()
                .filter(|p| input_count(p) == 1)
                .cloned()
                .collect(),
            NonOneToOneStrategy::DropOutputSpecies => self
                .pairs
                .iter()
                .filter(|p| ortholog_count(p) == 1)
                .cloned()
                .collect(),
            NonOneToOneStrategy::KeepBothSpecies => self.pairs.clone(),
            NonOneToOneStrategy::KeepPopular => {
                let mut kept = Vec::new();
                let mut done: HashSet<&str> = HashSet::new();
                for pair in &self.pairs {
                    if !done.insert(pair.input_gene.as_str()) {
                        continue;
                    }
                    let candidates = &self.by_input[&pair.input_gene];
                    let mut best = candidates[0];
                    for &idx in &candidates[1..] {
                        if ortholog_count(&self.pairs[idx]) > ortholog_count(&self.pairs[best]) {
                            best = idx;
                        }
                    }
                    kept.push(self.pairs[best].clone());
                }
                kept
            }
        };

        let dropped = self.pairs.len() - kept.len();
        if dropped > 0 {
            log::info!(
                "Dropped {} non-1:1 ortholog pairs ({:?}); {} remain",
                dropped,
                strategy,
                kept.len()
            );
        }

        OrthologMap::new(self.input_species.clone(), self.output_species.clone(), kept)
    }
}
