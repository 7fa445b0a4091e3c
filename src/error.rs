//! Error types shared across the crate.
//!
//! Parse failures are never retryable; only [`Error::SearchUnavailable`] is.

use std::time::Duration;

use thiserror::Error;

use crate::tree::{NodeId, TreeId};

/// Why a Newick string was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ParseErrorKind {
    UnbalancedParentheses,
    EmptyInput,
    MalformedBranchLength,
    TrailingContent,
}

impl std::fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ParseErrorKind::UnbalancedParentheses => "unbalanced parentheses",
            ParseErrorKind::EmptyInput => "empty input",
            ParseErrorKind::MalformedBranchLength => "malformed branch length",
            ParseErrorKind::TrailingContent => "trailing content",
        };
        f.write_str(s)
    }
}

/// A Newick parse failure with the byte offset where it was detected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid Newick ({kind}) at byte {offset}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub offset: usize,
}

impl ParseError {
    pub(crate) fn new(kind: ParseErrorKind, offset: usize) -> Self {
        ParseError { kind, offset }
    }
}

/// Failure reported by a ranking backend.
#[derive(Debug, Clone, Error)]
pub enum RankError {
    #[error("ranking timed out after {0:?}")]
    Timeout(Duration),

    #[error("ranking backend failed: {0}")]
    Backend(String),
}

/// Crate-wide error.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("tree not found: {0}")]
    TreeNotFound(TreeId),

    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The similarity ranking call failed or timed out. Callers retry with backoff.
    #[error("search unavailable")]
    SearchUnavailable(#[source] RankError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::SearchUnavailable(_))
    }

    /// `NotFound` covers both unknown trees and unknown nodes.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::TreeNotFound(_) | Error::NodeNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_search_unavailable_is_retryable() {
        let err = Error::SearchUnavailable(RankError::Timeout(Duration::from_millis(5)));
        assert!(err.is_retryable());

        let err: Error = ParseError::new(ParseErrorKind::EmptyInput, 0).into();
        assert!(!err.is_retryable());
        assert!(!err.is_not_found());
    }

    #[test]
    fn parse_error_message_names_reason() {
        let err = ParseError::new(ParseErrorKind::UnbalancedParentheses, 4);
        assert_eq!(err.to_string(), "invalid Newick (unbalanced parentheses) at byte 4");
    }
}
