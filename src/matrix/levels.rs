use anyhow::anyhow;
use std::collections::HashMap;

/// Cell-type label for every column of an expression matrix.
///
/// Levels are numbered in order of first appearance, so `group_ids()` can be fed directly to the
/// per-group statistics in [`crate::testing`].
#[derive(Debug, Clone, PartialEq)]
pub struct CellLevels {
    labels: Vec<String>,
    levels: Vec<String>,
    group_ids: Vec<usize>,
}

impl CellLevels {
    pub fn new(labels: Vec<String>) -> Self {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut levels = Vec::new();
        let group_ids = labels
            .iter()
            .map(|label| {
                *index.entry(label.clone()).or_insert_with(|| {
                    levels.push(label.clone());
                    levels.len() - 1
                })
            })
            .collect();

        CellLevels {
            labels,
            levels,
            group_ids,
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    pub fn n_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn group_ids(&self) -> &[usize] {
        &self.group_ids
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Keep the labels of the given cells. Levels are renumbered, so levels that no longer have
    /// any cell disappear.
    pub fn subset(&self, indices: &[usize]) -> anyhow::Result<Self> {
        let labels = indices
            .iter()
            .map(|&i| {
                self.labels
                    .get(i)
                    .cloned()
                    .ok_or_else(|| anyhow!("Cell index {} out of bounds for {} labels", i, self.len()))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self::new(labels))
    }
}

impl<S: Into<String>> FromIterator<S> for CellLevels {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Into::into).collect())
    }
}
