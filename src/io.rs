//! Tree files in, matrices out.
//!
//! Three input layouts are recognised, optionally gzip-compressed (`.gz`):
//!
//! ```text
//! plain:   one Newick tree per line            → named <file>_<n>
//! named:   <name>\t<newick> per line
//! NEXUS:   #NEXUS ... BEGIN TREES; [TRANSLATE ...;] TREE <name> = <newick>; ... END;
//! ```
//!
//! Blank lines and lines starting with `#` are skipped in the line-based layouts. Trees are
//! returned as text; parsing happens on ingestion.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// One tree as found in a file.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeRecord {
    pub name: String,
    pub newick: String,
    /// BEAST chain state parsed from a `STATE_<n>` name.
    pub state: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeFile {
    pub records: Vec<TreeRecord>,
    /// NEXUS `TRANSLATE` table, if the file has one.
    pub translate: Option<HashMap<String, String>>,
}

/// Burn-in applied while reading: the first `trees` records are dropped, and records with a
/// chain state are kept only when the state is above `states`. Zero disables either rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Burnin {
    pub trees: usize,
    pub states: usize,
}

impl Burnin {
    fn keeps(&self, index: usize, record: &TreeRecord) -> bool {
        index >= self.trees
            && (self.states == 0 || record.state.is_none_or(|state| state > self.states))
    }
}

/// Read every tree in `path`.
///
/// # Errors
/// `Io` if the file cannot be read, `InvalidArgument` if no tree survives the burn-in.
pub fn read_tree_file(path: impl AsRef<Path>, burnin: Burnin) -> Result<TreeFile> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mut content = String::new();
    if path.to_string_lossy().ends_with(".gz") {
        GzDecoder::new(file).read_to_string(&mut content)?;
    } else {
        io::BufReader::new(file).read_to_string(&mut content)?;
    }

    let base = base_name(path);
    let mut parsed = parse_tree_text(&content, &base);
    let total = parsed.records.len();
    parsed.records = parsed
        .records
        .into_iter()
        .enumerate()
        .filter(|(i, record)| burnin.keeps(*i, record))
        .map(|(_, record)| record)
        .collect();

    if parsed.records.is_empty() {
        return Err(Error::InvalidArgument(format!(
            "no trees found in {} after burn-in",
            path.display()
        )));
    }
    debug!(
        path = %path.display(),
        read = total,
        kept = parsed.records.len(),
        translated = parsed.translate.is_some(),
        "read tree file"
    );
    Ok(parsed)
}

fn base_name(path: &Path) -> String {
    let name = path.file_name().and_then(|s| s.to_str()).unwrap_or("trees");
    let name = name.strip_suffix(".gz").unwrap_or(name);
    name.rsplit_once('.').map_or(name, |(stem, _)| stem).to_string()
}

/// Split file content into records; `base` names trees that carry no name of their own.
pub fn parse_tree_text(content: &str, base: &str) -> TreeFile {
    let is_nexus = content
        .trim_start()
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("#NEXUS"));
    if is_nexus { parse_nexus(content) } else { parse_lines(content, base) }
}

fn parse_lines(content: &str, base: &str) -> TreeFile {
    let mut records = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (name, newick) = match line.split_once('\t') {
            Some((name, newick)) => (name.trim().to_string(), newick.trim()),
            None => (format!("{base}_{}", records.len()), line),
        };
        if newick.is_empty() {
            warn!(line = line_no + 1, name, "skipping record without a tree");
            continue;
        }
        records.push(TreeRecord { name, newick: newick.to_string(), state: None });
    }
    TreeFile { records, translate: None }
}

fn parse_nexus(content: &str) -> TreeFile {
    let mut out = TreeFile::default();
    let mut in_trees = false;

    for statement in statements(content) {
        let statement = strip_comments_ahead(statement);
        let (keyword, rest) = match statement.split_once(char::is_whitespace) {
            Some((keyword, rest)) => (keyword, rest.trim()),
            None => (statement, ""),
        };
        let keyword = keyword.to_ascii_uppercase();

        match keyword.as_str() {
            "BEGIN" => in_trees = rest.eq_ignore_ascii_case("TREES"),
            "END" | "ENDBLOCK" => in_trees = false,
            "TRANSLATE" if in_trees => out.translate = Some(parse_translate(rest)),
            "TREE" | "UTREE" if in_trees => match split_assignment(rest) {
                Some((header, body)) => {
                    let header = header.split('[').next().unwrap_or_default();
                    let name = unquote(header.trim().trim_start_matches('*').trim());
                    out.records.push(TreeRecord {
                        state: extract_state(&name),
                        name,
                        newick: format!("{};", body.trim()),
                    });
                }
                None => warn!(statement = rest, "skipping TREE statement without '='"),
            },
            _ => {}
        }
    }
    out
}

/// Statements separated by `;`, ignoring semicolons inside quotes or `[...]` comments.
fn statements(content: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut comment_depth = 0usize;

    for (i, c) in content.char_indices() {
        match c {
            '\'' if comment_depth == 0 => quoted = !quoted,
            '[' if !quoted => comment_depth += 1,
            ']' if !quoted => comment_depth = comment_depth.saturating_sub(1),
            ';' if !quoted && comment_depth == 0 => {
                let statement = content[start..i].trim();
                if !statement.is_empty() {
                    out.push(statement);
                }
                start = i + 1;
            }
            _ => {}
        }
    }
    out
}

/// Split `name [comment] = body` at the first `=` outside a comment.
fn split_assignment(statement: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    for (i, c) in statement.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            '=' if depth == 0 => return Some((&statement[..i], &statement[i + 1..])),
            _ => {}
        }
    }
    None
}

/// Drop `[...]` comments (and the `#NEXUS` line) in front of a statement's keyword.
fn strip_comments_ahead(mut statement: &str) -> &str {
    loop {
        statement = statement.trim_start();
        if let Some(rest) = statement.strip_prefix('[') {
            statement = rest.split_once(']').map_or("", |(_, after)| after);
        } else if statement.get(..6).is_some_and(|head| head.eq_ignore_ascii_case("#NEXUS")) {
            statement = &statement[6..];
        } else {
            return statement;
        }
    }
}

/// `1 'Homo sapiens', 2 Pan, ...`
fn parse_translate(body: &str) -> HashMap<String, String> {
    let mut table = HashMap::new();
    let mut entry = String::new();
    let mut quoted = false;
    let mut push = |entry: &mut String| {
        if let Some((id, label)) = entry.trim().split_once(char::is_whitespace) {
            table.insert(id.to_string(), unquote(label.trim()));
        } else if !entry.trim().is_empty() {
            warn!(entry = entry.trim(), "skipping TRANSLATE entry without a label");
        }
        entry.clear();
    };

    for c in body.chars() {
        match c {
            '\'' => {
                quoted = !quoted;
                entry.push(c);
            }
            ',' if !quoted => push(&mut entry),
            _ => entry.push(c),
        }
    }
    push(&mut entry);
    table
}

fn unquote(label: &str) -> String {
    label
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .map_or_else(|| label.to_string(), |inner| inner.replace("''", "'"))
}

fn extract_state(name: &str) -> Option<usize> {
    let start = name.to_ascii_uppercase().find("STATE_")? + "STATE_".len();
    let digits: String = name[start..].chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Write a labelled square matrix as TSV.
///
/// `-` writes to stdout; a path ending in `.gz` is gzip-compressed.
pub fn write_matrix_tsv<T: std::fmt::Display>(
    path: impl AsRef<Path>,
    names: &[String],
    matrix: &[Vec<T>],
) -> io::Result<()> {
    let path = path.as_ref();
    if names.len() != matrix.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} names for {} matrix rows", names.len(), matrix.len()),
        ));
    }

    let mut out: Box<dyn Write> = if path.as_os_str() == "-" {
        Box::new(BufWriter::new(io::stdout().lock()))
    } else if path.to_string_lossy().ends_with(".gz") {
        Box::new(BufWriter::new(GzEncoder::new(File::create(path)?, Compression::default())))
    } else {
        Box::new(BufWriter::new(File::create(path)?))
    };

    writeln!(out, "\t{}", names.join("\t"))?;
    for (name, row) in names.iter().zip(matrix) {
        write!(out, "{name}")?;
        for value in row {
            write!(out, "\t{value}")?;
        }
        writeln!(out)?;
    }
    out.flush()
}
