//! # single-genefilter
//!
//! Informative-gene filtering for single-cell expression matrices, part of the single-rust ecosystem.
//!
//! Given a genes x cells matrix and a cell-type label per cell, the crate removes genes that carry
//! no information about cell identity: genes that are never expressed, genes without a 1:1
//! ortholog in a target species, genes whose cell-type means barely vary, and genes that do not
//! differ significantly across cell types.
//!
//! ## Core Features
//!
//! - **Sparse matrices**: [`matrix::ExpressionMatrix`] wraps a `CsrMatrix<f64>` from nalgebra-sparse
//!   with gene and cell identifiers
//! - **Orthology**: 1:1 ortholog reduction and gene renaming with [`orthology::OrthologMap`]
//! - **Differential expression**: moderated one-way ANOVA (limma-style) and a negative-binomial
//!   likelihood-ratio test (DESeq2-style), with multiple testing correction
//! - **Pipeline**: [`filter::drop_uninformative_genes`] configured by [`filter::FilterOptions`]
//!
//! ## Module Organization
//!
//! - **[`matrix`]**: Labelled expression matrices and cell-type levels
//! - **[`orthology`]**: Ortholog tables, non-1:1 strategies and conversion
//! - **[`testing`]**: Statistical tests and multiple testing correction
//! - **[`filter`]**: The filtering stages and the end-to-end pipeline

pub mod filter;
pub mod matrix;
pub mod orthology;
pub mod testing;
