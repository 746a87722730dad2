//! Labelled gene-by-cell expression matrices.
//!
//! [`ExpressionMatrix`] pairs a sparse `CsrMatrix<f64>` (genes as rows, cells as columns) with the
//! gene and cell identifiers, and keeps both in sync through every subsetting operation. Dense
//! `ndarray` input and sparse input with any float element type are sparsified and converted to
//! `f64` on construction.

use anyhow::anyhow;
use nalgebra_sparse::{CscMatrix, CsrMatrix};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use single_utilities::traits::FloatOpsTS;
use std::collections::{HashMap, HashSet};

mod levels;

pub use levels::CellLevels;

/// How rows sharing the same gene identifier are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFn {
    #[default]
    Sum,
    Mean,
}

#[derive(Debug, Clone)]
pub struct ExpressionMatrix {
    data: CsrMatrix<f64>,
    gene_ids: Vec<String>,
    cell_ids: Vec<String>,
}

impl ExpressionMatrix {
    /// Create a matrix from sparse data and labels.
    ///
    /// Fails if the label counts do not match the matrix shape, if a label is duplicated, or if
    /// any stored value is not finite.
    pub fn new(
        data: CsrMatrix<f64>,
        gene_ids: Vec<String>,
        cell_ids: Vec<String>,
    ) -> anyhow::Result<Self> {
        if data.nrows() != gene_ids.len() {
            return Err(anyhow!(
                "Matrix has {} rows but {} gene identifiers were given",
                data.nrows(),
                gene_ids.len()
            ));
        }
        if data.ncols() != cell_ids.len() {
            return Err(anyhow!(
                "Matrix has {} columns but {} cell identifiers were given",
                data.ncols(),
                cell_ids.len()
            ));
        }
        check_unique(&gene_ids, "gene")?;
        check_unique(&cell_ids, "cell")?;

        if let Some(pos) = data.values().iter().position(|v| !v.is_finite()) {
            return Err(anyhow!("Non-finite expression value at stored entry {}", pos));
        }

        Ok(ExpressionMatrix {
            data,
            gene_ids,
            cell_ids,
        })
    }

    /// Sparsify a dense genes x cells matrix. Zeros are not stored.
    pub fn from_dense<T>(
        dense: &Array2<T>,
        gene_ids: Vec<String>,
        cell_ids: Vec<String>,
    ) -> anyhow::Result<Self>
    where
        T: FloatOpsTS,
    {
        let (nrows, ncols) = dense.dim();
        let mut row_offsets = Vec::with_capacity(nrows + 1);
        let mut col_indices = Vec::new();
        let mut values = Vec::new();
        row_offsets.push(0);

        for row in dense.rows() {
            for (col, value) in row.iter().enumerate() {
                let v = as_f64(*value)?;
                if v != 0.0 {
                    col_indices.push(col);
                    values.push(v);
                }
            }
            row_offsets.push(col_indices.len());
        }

        let data = CsrMatrix::try_from_csr_data(nrows, ncols, row_offsets, col_indices, values)
            .map_err(|e| anyhow!("Failed to build sparse matrix: {}", e))?;
        Self::new(data, gene_ids, cell_ids)
    }

    /// Convert a sparse CSR matrix of any float type. Explicitly stored zeros are dropped.
    pub fn from_csr<T>(
        matrix: &CsrMatrix<T>,
        gene_ids: Vec<String>,
        cell_ids: Vec<String>,
    ) -> anyhow::Result<Self>
    where
        T: FloatOpsTS,
    {
        let mut row_offsets = Vec::with_capacity(matrix.nrows() + 1);
        let mut col_indices = Vec::with_capacity(matrix.nnz());
        let mut values = Vec::with_capacity(matrix.nnz());
        row_offsets.push(0);

        for row in matrix.row_iter() {
            for (&col, value) in row.col_indices().iter().zip(row.values()) {
                let v = as_f64(*value)?;
                if v != 0.0 {
                    col_indices.push(col);
                    values.push(v);
                }
            }
            row_offsets.push(col_indices.len());
        }

        let data = CsrMatrix::try_from_csr_data(
            matrix.nrows(),
            matrix.ncols(),
            row_offsets,
            col_indices,
            values,
        )
        .map_err(|e| anyhow!("Failed to build sparse matrix: {}", e))?;
        Self::new(data, gene_ids, cell_ids)
    }

    /// Convert a sparse CSC matrix (genes x cells) of any float type.
    pub fn from_csc<T>(
        matrix: &CscMatrix<T>,
        gene_ids: Vec<String>,
        cell_ids: Vec<String>,
    ) -> anyhow::Result<Self>
    where
        T: FloatOpsTS,
    {
        let mut rows: Vec<Vec<(usize, f64)>> = vec![Vec::new(); matrix.nrows()];
        for (col, column) in matrix.col_iter().enumerate() {
            for (&row, value) in column.row_indices().iter().zip(column.values()) {
                let v = as_f64(*value)?;
                if v != 0.0 {
                    rows[row].push((col, v));
                }
            }
        }

        let mut row_offsets = Vec::with_capacity(matrix.nrows() + 1);
        let mut col_indices = Vec::with_capacity(matrix.nnz());
        let mut values = Vec::with_capacity(matrix.nnz());
        row_offsets.push(0);
        for entries in rows {
            // columns were visited in order, so each row is already sorted
            for (col, v) in entries {
                col_indices.push(col);
                values.push(v);
            }
            row_offsets.push(col_indices.len());
        }

        let data = CsrMatrix::try_from_csr_data(
            matrix.nrows(),
            matrix.ncols(),
            row_offsets,
            col_indices,
            values,
        )
        .map_err(|e| anyhow!("Failed to build sparse matrix: {}", e))?;
        Self::new(data, gene_ids, cell_ids)
    }

    pub fn data(&self) -> &CsrMatrix<f64> {
        &self.data
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn cell_ids(&self) -> &[String] {
        &self.cell_ids
    }

    pub fn n_genes(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_cells(&self) -> usize {
        self.data.ncols()
    }

    pub fn gene_index(&self, gene: &str) -> Option<usize> {
        self.gene_ids.iter().position(|g| g == gene)
    }

    /// Dense copy of one gene's expression across all cells.
    pub fn row_values(&self, row: usize) -> Vec<f64> {
        let mut values = vec![0.0; self.n_cells()];
        let row = self.data.row(row);
        for (&col, &v) in row.col_indices().iter().zip(row.values()) {
            values[col] = v;
        }
        values
    }

    pub fn to_dense(&self) -> Array2<f64> {
        let mut dense = Array2::zeros((self.n_genes(), self.n_cells()));
        for (row, col, &v) in self.data.triplet_iter() {
            dense[[row, col]] = v;
        }
        dense
    }

    /// `true` for every gene with at least one non-zero value.
    pub fn nonzero_rows(&self) -> Vec<bool> {
        self.data
            .row_iter()
            .map(|row| row.values().iter().any(|&v| v != 0.0))
            .collect()
    }

    /// `true` for every cell with at least one non-zero value.
    pub fn nonzero_cols(&self) -> Vec<bool> {
        let mut mask = vec![false; self.n_cells()];
        for (_, col, &v) in self.data.triplet_iter() {
            if v != 0.0 {
                mask[col] = true;
            }
        }
        mask
    }

    /// Keep only the given genes, in the given order.
    pub fn subset_genes(&self, indices: &[usize]) -> anyhow::Result<Self> {
        let mut row_offsets = Vec::with_capacity(indices.len() + 1);
        let mut col_indices = Vec::new();
        let mut values = Vec::new();
        let mut gene_ids = Vec::with_capacity(indices.len());
        row_offsets.push(0);

        for &idx in indices {
            if idx >= self.n_genes() {
                return Err(anyhow!(
                    "Gene index {} out of bounds for {} genes",
                    idx,
                    self.n_genes()
                ));
            }
            let row = self.data.row(idx);
            col_indices.extend_from_slice(row.col_indices());
            values.extend_from_slice(row.values());
            row_offsets.push(col_indices.len());
            gene_ids.push(self.gene_ids[idx].clone());
        }

        let data = CsrMatrix::try_from_csr_data(
            indices.len(),
            self.n_cells(),
            row_offsets,
            col_indices,
            values,
        )
        .map_err(|e| anyhow!("Failed to subset genes: {}", e))?;
        Self::new(data, gene_ids, self.cell_ids.clone())
    }

    /// Keep only the given cells, in the given order.
    pub fn subset_cells(&self, indices: &[usize]) -> anyhow::Result<Self> {
        let mut new_position = vec![None; self.n_cells()];
        for (new_idx, &old_idx) in indices.iter().enumerate() {
            if old_idx >= self.n_cells() {
                return Err(anyhow!(
                    "Cell index {} out of bounds for {} cells",
                    old_idx,
                    self.n_cells()
                ));
            }
            if new_position[old_idx].is_some() {
                return Err(anyhow!("Cell index {} selected more than once", old_idx));
            }
            new_position[old_idx] = Some(new_idx);
        }

        let mut row_offsets = Vec::with_capacity(self.n_genes() + 1);
        let mut col_indices = Vec::new();
        let mut values = Vec::new();
        row_offsets.push(0);

        let mut entries: Vec<(usize, f64)> = Vec::new();
        for row in self.data.row_iter() {
            entries.clear();
            for (&col, &v) in row.col_indices().iter().zip(row.values()) {
                if let Some(new_col) = new_position[col] {
                    entries.push((new_col, v));
                }
            }
            entries.sort_unstable_by_key(|&(col, _)| col);
            for &(col, v) in &entries {
                col_indices.push(col);
                values.push(v);
            }
            row_offsets.push(col_indices.len());
        }

        let cell_ids = indices.iter().map(|&i| self.cell_ids[i].clone()).collect();
        let data = CsrMatrix::try_from_csr_data(
            self.n_genes(),
            indices.len(),
            row_offsets,
            col_indices,
            values,
        )
        .map_err(|e| anyhow!("Failed to subset cells: {}", e))?;
        Self::new(data, self.gene_ids.clone(), cell_ids)
    }

    /// Replace the gene identifiers. The new labels must be unique.
    pub fn rename_genes(self, gene_ids: Vec<String>) -> anyhow::Result<Self> {
        Self::new(self.data, gene_ids, self.cell_ids)
    }

    /// Relabel genes and collapse rows that end up with the same label.
    ///
    /// Output rows follow the first occurrence of each label.
    pub fn aggregate_genes(&self, labels: &[String], how: AggregateFn) -> anyhow::Result<Self> {
        if labels.len() != self.n_genes() {
            return Err(anyhow!(
                "Expected {} labels for aggregation, got {}",
                self.n_genes(),
                labels.len()
            ));
        }

        let mut target: HashMap<&str, usize> = HashMap::new();
        let mut gene_ids: Vec<String> = Vec::new();
        let mut members: Vec<Vec<usize>> = Vec::new();
        for (row, label) in labels.iter().enumerate() {
            let idx = *target.entry(label.as_str()).or_insert_with(|| {
                gene_ids.push(label.clone());
                members.push(Vec::new());
                gene_ids.len() - 1
            });
            members[idx].push(row);
        }

        let mut row_offsets = Vec::with_capacity(gene_ids.len() + 1);
        let mut col_indices = Vec::new();
        let mut values = Vec::new();
        row_offsets.push(0);

        let mut dense_row = vec![0.0; self.n_cells()];
        for rows in &members {
            dense_row.iter_mut().for_each(|v| *v = 0.0);
            for &r in rows {
                let row = self.data.row(r);
                for (&col, &v) in row.col_indices().iter().zip(row.values()) {
                    dense_row[col] += v;
                }
            }
            let scale = match how {
                AggregateFn::Sum => 1.0,
                AggregateFn::Mean => 1.0 / rows.len() as f64,
            };
            for (col, &v) in dense_row.iter().enumerate() {
                if v != 0.0 {
                    col_indices.push(col);
                    values.push(v * scale);
                }
            }
            row_offsets.push(col_indices.len());
        }

        let data = CsrMatrix::try_from_csr_data(
            gene_ids.len(),
            self.n_cells(),
            row_offsets,
            col_indices,
            values,
        )
        .map_err(|e| anyhow!("Failed to aggregate genes: {}", e))?;
        Self::new(data, gene_ids, self.cell_ids.clone())
    }
}

fn as_f64<T: FloatOpsTS>(value: T) -> anyhow::Result<f64> {
    num_traits::cast(value).ok_or_else(|| anyhow!("Expression value cannot be represented as f64"))
}

fn check_unique(ids: &[String], what: &str) -> anyhow::Result<()> {
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(id.as_str()) {
            return Err(anyhow!("Duplicate {} identifier '{}'", what, id));
        }
    }
    Ok(())
}
