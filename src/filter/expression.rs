use crate::matrix::{CellLevels, ExpressionMatrix};
use anyhow::anyhow;

/// Drop genes with no expression in any cell, then cells with no expression in any remaining
/// gene. Labels are subset together with the cells.
pub fn drop_empty(
    matrix: &ExpressionMatrix,
    levels: &CellLevels,
) -> anyhow::Result<(ExpressionMatrix, CellLevels)> {
    if levels.len() != matrix.n_cells() {
        return Err(anyhow!(
            "Expected {} cell labels, got {}",
            matrix.n_cells(),
            levels.len()
        ));
    }

    let genes: Vec<usize> = mask_indices(&matrix.nonzero_rows());
    if genes.is_empty() {
        return Err(anyhow!("No expressed genes in a {} x {} matrix", matrix.n_genes(), matrix.n_cells()));
    }
    let by_gene = matrix.subset_genes(&genes)?;

    let cells = mask_indices(&by_gene.nonzero_cols());
    let filtered = by_gene.subset_cells(&cells)?;
    let levels = levels.subset(&cells)?;

    log::info!(
        "Dropped {} unexpressed genes and {} empty cells",
        matrix.n_genes() - filtered.n_genes(),
        matrix.n_cells() - filtered.n_cells()
    );
    Ok((filtered, levels))
}

/// Drop cells left without expression after genes were removed.
///
/// Returns the inputs unchanged when every cell still has a non-zero value.
pub fn drop_empty_cells(
    matrix: ExpressionMatrix,
    levels: CellLevels,
) -> anyhow::Result<(ExpressionMatrix, CellLevels)> {
    let mask = matrix.nonzero_cols();
    if mask.iter().all(|&keep| keep) {
        return Ok((matrix, levels));
    }

    let cells = mask_indices(&mask);
    log::info!("Dropped {} cells left empty", matrix.n_cells() - cells.len());
    Ok((matrix.subset_cells(&cells)?, levels.subset(&cells)?))
}

fn mask_indices(mask: &[bool]) -> Vec<usize> {
    mask.iter()
        .enumerate()
        .filter_map(|(i, &keep)| keep.then_some(i))
        .collect()
}
