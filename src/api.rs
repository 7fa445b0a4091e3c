//! Python bindings.
//!
//! Trees go in as Newick strings or tree files; embeddings and matrices come back as nested
//! lists and explanations as JSON strings.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use rayon::prelude::*;

use crate::catalog::{IngestOptions, build_tree};
use crate::distances::{self, kf_from_snapshots, rf_from_snapshots, weighted_rf_from_snapshots};
use crate::error::Error;
use crate::explain::Explainer;
use crate::io::{Burnin, read_tree_file};
use crate::position::PositionEncoder;
use crate::snapshot::TreeSnapshot;
use crate::tree::{IdGenerator, Tree, UuidGenerator};
use crate::vector::pairwise_cosine;

impl From<Error> for PyErr {
    fn from(e: Error) -> PyErr {
        PyValueError::new_err(e.to_string())
    }
}

fn transient_tree(name: &str, newick: &str, options: &IngestOptions) -> Result<Tree, Error> {
    build_tree(UuidGenerator.next_tree_id(), name, newick, options, &PositionEncoder::default())
}

/// Topology embedding (256 floats, unit length or all zero) of a Newick tree.
///
/// Raises:
///     ValueError: If the Newick string cannot be parsed
#[pyfunction]
fn tree_embedding(newick: &str) -> PyResult<Vec<f64>> {
    let tree = transient_tree("query", newick, &IngestOptions::default())?;
    Ok(tree.embedding().to_vec())
}

/// All-pairs cosine similarity of the embeddings of `newicks`.
///
/// Returns:
///     A square 2D list; entry [i][j] compares tree i with tree j
///
/// Raises:
///     ValueError: If any tree cannot be parsed
#[pyfunction]
fn pairwise_similarity(newicks: Vec<String>) -> PyResult<Vec<Vec<f64>>> {
    let embeddings = newicks
        .par_iter()
        .enumerate()
        .map(|(i, newick)| {
            transient_tree(&format!("tree{i}"), newick, &IngestOptions::default())
                .map(|tree| tree.embedding().to_vec())
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(pairwise_cosine(&embeddings))
}

/// Explain the similarity of two Newick trees.
///
/// Returns:
///     The explanation as a JSON string (overall score, per-block scores, reasons and,
///     when both trees share their taxa, Robinson-Foulds style distances)
#[pyfunction]
#[pyo3(signature = (query, candidate, max_reasons=crate::explain::DEFAULT_MAX_REASONS))]
fn explain_similarity(query: &str, candidate: &str, max_reasons: usize) -> PyResult<String> {
    let options = IngestOptions::default();
    let query = transient_tree("query", query, &options)?;
    let candidate = transient_tree("candidate", candidate, &options)?;
    let explanation = Explainer::new(max_reasons).explain(&query, &candidate);
    serde_json::to_string(&explanation).map_err(|e| PyValueError::new_err(e.to_string()))
}

/// Pairwise distance matrix over every tree in the given files.
///
/// Args:
///     paths: Tree files (Newick lines, name<TAB>newick lines or BEAST/NEXUS, optionally .gz)
///     metric: "cosine", "rf", "weighted" or "kf" (default: "rf")
///     burnin_trees: Number of trees to skip at the beginning of each file (default: 0)
///     burnin_states: Minimum STATE value to keep trees (default: 0)
///     use_real_taxa: Use TRANSLATE block for taxon names when available (default: True)
///
/// Returns:
///     A tuple of (tree_names, matrix); names are prefixed with the file index
///
/// Raises:
///     ValueError: If no trees are found, the metric is unknown, or clade metrics are asked
///     for trees over different taxa
#[pyfunction]
#[pyo3(signature = (paths, metric="rf", burnin_trees=0, burnin_states=0, use_real_taxa=true))]
fn pairwise_distances(
    paths: Vec<String>,
    metric: &str,
    burnin_trees: usize,
    burnin_states: usize,
    use_real_taxa: bool,
) -> PyResult<(Vec<String>, Vec<Vec<f64>>)> {
    let (names, trees) = read_all_trees(&paths, Burnin { trees: burnin_trees, states: burnin_states }, use_real_taxa)?;

    let matrix = match metric {
        "cosine" => {
            let embeddings: Vec<&[f64]> = trees.iter().map(Tree::embedding).collect();
            pairwise_cosine(&embeddings)
        }
        "rf" => {
            let rf = distances::pairwise(&comparable_snapshots(&trees)?, rf_from_snapshots);
            rf.into_iter().map(|row| row.into_iter().map(|d| d as f64).collect()).collect()
        }
        "weighted" => distances::pairwise(&comparable_snapshots(&trees)?, weighted_rf_from_snapshots),
        "kf" => distances::pairwise(&comparable_snapshots(&trees)?, kf_from_snapshots),
        other => {
            return Err(PyValueError::new_err(format!(
                "unknown metric {other:?}; expected cosine, rf, weighted or kf"
            )));
        }
    };
    Ok((names, matrix))
}

fn read_all_trees(paths: &[String], burnin: Burnin, use_real_taxa: bool) -> PyResult<(Vec<String>, Vec<Tree>)> {
    let mut names = Vec::new();
    let mut trees = Vec::new();

    for (file_idx, path) in paths.iter().enumerate() {
        let file = read_tree_file(path, burnin)?;
        let options = IngestOptions {
            translate: file.translate.filter(|_| use_real_taxa),
            ..IngestOptions::default()
        };
        let built = file
            .records
            .par_iter()
            .map(|record| {
                let name = format!("file{file_idx}_{}", record.name);
                transient_tree(&name, &record.newick, &options).map(|tree| (name, tree))
            })
            .collect::<Result<Vec<_>, _>>()?;
        for (name, tree) in built {
            names.push(name);
            trees.push(tree);
        }
    }

    if trees.len() < 2 {
        return Err(PyValueError::new_err(
            "Need at least 2 trees to compute pairwise distances",
        ));
    }
    Ok((names, trees))
}

fn comparable_snapshots(trees: &[Tree]) -> PyResult<Vec<TreeSnapshot>> {
    let snapshots = trees.iter().map(TreeSnapshot::from_tree).collect::<Result<Vec<_>, _>>()?;
    for (idx, snapshot) in snapshots.iter().enumerate().skip(1) {
        if !snapshot.same_taxa(&snapshots[0]) {
            return Err(PyValueError::new_err(format!(
                "Tree {idx} has different leaf set than tree 0. All trees must have the same taxa."
            )));
        }
    }
    Ok(snapshots)
}

#[pymodule]
fn phylo_fingerprint(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(tree_embedding, m)?)?;
    m.add_function(wrap_pyfunction!(pairwise_similarity, m)?)?;
    m.add_function(wrap_pyfunction!(explain_similarity, m)?)?;
    m.add_function(wrap_pyfunction!(pairwise_distances, m)?)?;
    Ok(())
}
