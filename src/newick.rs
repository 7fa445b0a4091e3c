//! Newick reading and writing.
//!
//! The reader walks this grammar with an explicit stack of open parentheses, so nesting depth
//! is limited by memory rather than the call stack:
//!
//! ```text
//! tree     := subtree ';'?
//! subtree  := internal | leaf
//! internal := '(' subtree (',' subtree)* ')' label? (':' length)?
//! leaf     := label? (':' length)?
//! ```
//!
//! Whitespace and bracketed comments (`[...]`, which covers BEAST `[&rate=...]` annotations)
//! may appear between any two tokens. Labels are either single-quoted (`''` escapes a quote)
//! or a run of characters up to the next delimiter, trimmed. A missing label is the empty
//! string and a missing branch length is `0.0`.
//!
//! Parsing always ends with [`canonicalize`](crate::canonical), so the returned tree is already
//! in canonical sibling order.

use std::collections::HashMap;
use std::fmt::Write as _;

use tracing::debug;

use crate::canonical::{CanonicalTree, RawTree, canonicalize};
use crate::error::{ParseError, ParseErrorKind};
use crate::tree::Tree;

/// Default number of decimals written for branch lengths.
pub const DEFAULT_PRECISION: usize = 6;

const DELIMITERS: &[u8] = b"(),:;[";

/// Optional parse-time transformations.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions<'a> {
    /// NEXUS `TRANSLATE` table: leaf labels found here are replaced before canonical ordering.
    pub translate: Option<&'a HashMap<String, String>>,
}

/// Parse Newick text into a canonically ordered tree.
pub fn parse(text: &str) -> Result<CanonicalTree, ParseError> {
    parse_with(text, &ParseOptions::default())
}

pub fn parse_with(text: &str, options: &ParseOptions<'_>) -> Result<CanonicalTree, ParseError> {
    let mut raw = parse_raw(text)?;
    if let Some(table) = options.translate {
        raw.map_leaf_labels(&|label| table.get(label).cloned());
    }
    let tree = canonicalize(raw);
    debug!(nodes = tree.len(), leaves = tree.leaf_count(), "parsed newick");
    Ok(tree)
}

fn parse_raw(text: &str) -> Result<RawTree, ParseError> {
    let mut parser = Parser { src: text, bytes: text.as_bytes(), pos: 0 };

    parser.skip_trivia()?;
    match parser.peek() {
        None | Some(b';') => return Err(parser.error(ParseErrorKind::EmptyInput)),
        _ => {}
    }

    let tree = parser.subtree()?;

    parser.skip_trivia()?;
    match parser.peek() {
        None => Ok(tree),
        Some(b';') => {
            parser.pos += 1;
            parser.skip_trivia()?;
            if parser.at_end() {
                Ok(tree)
            } else {
                Err(parser.error(ParseErrorKind::TrailingContent))
            }
        }
        Some(b')') => Err(parser.error(ParseErrorKind::UnbalancedParentheses)),
        Some(_) => Err(parser.error(ParseErrorKind::TrailingContent)),
    }
}

struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError::new(kind, self.pos)
    }

    /// Skip whitespace and `[...]` comments.
    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            match self.peek() {
                Some(b) if b.is_ascii_whitespace() => self.pos += 1,
                Some(b'[') => {
                    let start = self.pos;
                    match self.bytes[start..].iter().position(|&b| b == b']') {
                        Some(close) => self.pos = start + close + 1,
                        None => return Err(ParseError::new(ParseErrorKind::TrailingContent, start)),
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn subtree(&mut self) -> Result<RawTree, ParseError> {
        let mut tree = RawTree::default();
        // Internal nodes whose ')' has not been seen yet, with the offset of their '('.
        let mut open: Vec<(usize, usize)> = Vec::new();

        loop {
            self.skip_trivia()?;
            let mut parent = open.last().map(|&(node, _)| node);
            while self.peek() == Some(b'(') {
                let node = tree.push(parent);
                open.push((node, self.pos));
                self.pos += 1;
                parent = Some(node);
                self.skip_trivia()?;
            }
            let leaf = tree.push(parent);
            self.finish_node(&mut tree, leaf)?;

            loop {
                let Some(&(node, opened_at)) = open.last() else {
                    return Ok(tree);
                };
                self.skip_trivia()?;
                match self.peek() {
                    Some(b',') => {
                        self.pos += 1;
                        break;
                    }
                    Some(b')') => {
                        self.pos += 1;
                        open.pop();
                        self.finish_node(&mut tree, node)?;
                    }
                    None | Some(b';') => {
                        return Err(ParseError::new(ParseErrorKind::UnbalancedParentheses, opened_at));
                    }
                    Some(_) => return Err(self.error(ParseErrorKind::TrailingContent)),
                }
            }
        }
    }

    /// Read the optional label and branch length that close a node.
    fn finish_node(&mut self, tree: &mut RawTree, index: usize) -> Result<(), ParseError> {
        let label = self.label()?;
        let branch_length = self.branch_length()?;
        let node = tree.node_mut(index);
        node.label = label;
        node.branch_length = branch_length;
        Ok(())
    }

    fn label(&mut self) -> Result<String, ParseError> {
        self.skip_trivia()?;
        if self.peek() == Some(b'\'') {
            return self.quoted_label();
        }

        let start = self.pos;
        while let Some(b) = self.peek() {
            if DELIMITERS.contains(&b) {
                break;
            }
            self.pos += 1;
        }
        // Delimiters are ASCII, so `start..pos` always falls on char boundaries.
        Ok(self.src[start..self.pos].trim().to_string())
    }

    fn quoted_label(&mut self) -> Result<String, ParseError> {
        let open = self.pos;
        self.pos += 1;
        let mut label = String::new();
        loop {
            let rest = &self.src[self.pos..];
            let Some(quote) = rest.find('\'') else {
                return Err(ParseError::new(ParseErrorKind::TrailingContent, open));
            };
            label.push_str(&rest[..quote]);
            self.pos += quote + 1;
            if self.peek() == Some(b'\'') {
                label.push('\'');
                self.pos += 1;
            } else {
                return Ok(label);
            }
        }
    }

    fn branch_length(&mut self) -> Result<f64, ParseError> {
        self.skip_trivia()?;
        if self.peek() != Some(b':') {
            return Ok(0.0);
        }
        self.pos += 1;
        self.skip_trivia()?;

        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-') {
                self.pos += 1;
            } else {
                break;
            }
        }

        let malformed = ParseError::new(ParseErrorKind::MalformedBranchLength, start);
        let value: f64 = self.src[start..self.pos].parse().map_err(|_| malformed.clone())?;
        if !value.is_finite() || value < 0.0 {
            return Err(malformed);
        }
        Ok(value)
    }
}

fn needs_quotes(label: &str) -> bool {
    label.bytes().any(|b| DELIMITERS.contains(&b) || b == b']' || b == b'\'')
        || label.trim() != label
}

fn write_label(out: &mut String, label: &str) {
    if needs_quotes(label) {
        out.push('\'');
        out.push_str(&label.replace('\'', "''"));
        out.push('\'');
    } else {
        out.push_str(label);
    }
}

/// Fixed decimals when they read back to the same bits, otherwise the shortest text that does.
fn write_length(out: &mut String, length: f64, precision: usize) {
    let fixed = format!("{length:.precision$}");
    if fixed.parse::<f64>().is_ok_and(|back| back.to_bits() == length.to_bits()) {
        out.push(':');
        out.push_str(&fixed);
    } else {
        let _ = write!(out, ":{length}");
    }
}

enum Step {
    Enter(usize),
    Separator,
    Close(usize),
}

fn write_tail(out: &mut String, tree: &Tree, index: usize, precision: usize) {
    let node = &tree.nodes()[index];
    write_label(out, &node.label);
    if node.branch_length != 0.0 {
        write_length(out, node.branch_length, precision);
    }
}

/// Serialise the subtree rooted at arena index `index` as `;`-terminated Newick.
///
/// Children are written in stored (canonical) order. Branch lengths use `precision` decimals
/// unless that would change the value, in which case the shortest exact form is written;
/// zero lengths are omitted. Reading the output back gives bit-identical lengths.
pub fn write_subtree(tree: &Tree, index: usize, precision: usize) -> String {
    let mut out = String::new();
    let mut stack = vec![Step::Enter(index)];

    while let Some(step) = stack.pop() {
        match step {
            Step::Enter(idx) => {
                let children = &tree.nodes()[idx].children;
                if children.is_empty() {
                    write_tail(&mut out, tree, idx, precision);
                    continue;
                }
                out.push('(');
                stack.push(Step::Close(idx));
                for (i, &child) in children.iter().enumerate().rev() {
                    stack.push(Step::Enter(child));
                    if i > 0 {
                        stack.push(Step::Separator);
                    }
                }
            }
            Step::Separator => out.push(','),
            Step::Close(idx) => {
                out.push(')');
                write_tail(&mut out, tree, idx, precision);
            }
        }
    }

    // A bare unlabeled leaf would otherwise be written as an empty tree.
    if out.is_empty() {
        out.push_str(":0");
    }
    out.push(';');
    out
}
