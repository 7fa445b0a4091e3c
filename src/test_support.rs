use crate::catalog::{IngestOptions, build_tree as build};
use crate::position::PositionEncoder;
use crate::tree::{IdGenerator, Tree, UuidGenerator};

/// A fully built tree that lives outside any repository.
pub(crate) fn build_tree(text: &str) -> Tree {
    build(
        UuidGenerator.next_tree_id(),
        "test",
        text,
        &IngestOptions::default(),
        &PositionEncoder::default(),
    )
    .unwrap_or_else(|e| panic!("test tree {text:?} failed to build: {e}"))
}
