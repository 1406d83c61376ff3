//! Normalized schema snapshots and their comparison.
//!
//! Raw dumps carry noise that differs between hosts and runs: tool banners
//! and per-object comments, ownership and privileges, session `SET`s,
//! search-path resets, the namespace's own `CREATE SCHEMA`, and the random
//! `\restrict` keys of recent `pg_dump` releases. [`normalize`] drops those
//! lines and collapses blank runs, so equivalent schemas compare
//! byte-identical.
//!
//! `COPY ... FROM stdin;` rows and dollar-quoted bodies are data, not dump
//! metadata: they pass through byte for byte.

use std::fmt;

use serde::Serialize;
use similar::TextDiff;

/// Normalized dump text.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct Snapshot(String);

impl Snapshot {
    /// Wrap text that is already normalized (e.g. an accepted baseline file).
    pub fn from_normalized(text: impl Into<String>) -> Self {
        Self(text.into().replace("\r\n", "\n"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

const NOISE_PREFIXES: &[&str] = &[
    "--",
    "SET ",
    "SELECT pg_catalog.set_config(",
    "GRANT ",
    "REVOKE ",
    "ALTER DEFAULT PRIVILEGES",
    "CREATE SCHEMA ",
    "COMMENT ON SCHEMA ",
    "\\restrict",
    "\\unrestrict",
];

/// Only top-level lines count: indented lines belong to a statement body.
fn is_noise(line: &str) -> bool {
    NOISE_PREFIXES.iter().any(|p| line.starts_with(p))
        || (line.starts_with("ALTER ") && line.contains(" OWNER TO "))
}

/// Where the previous line left the scanner.
enum Block {
    /// Inside `COPY ... FROM stdin;`, up to the `\.` terminator.
    Copy,
    /// Inside a dollar-quoted string opened by this tag (`$$`, `$body$`).
    Dollar(String),
}

/// Strip dump-tool metadata from `raw` and collapse blank lines.
pub fn normalize(raw: &str) -> Snapshot {
    let mut out = String::with_capacity(raw.len());
    let mut pending_blank = false;
    let mut block: Option<Block> = None;
    for line in raw.lines() {
        match block.take() {
            Some(Block::Copy) => {
                push_line(&mut out, &mut pending_blank, line);
                if line != "\\." {
                    block = Some(Block::Copy);
                }
                continue;
            }
            Some(Block::Dollar(tag)) => {
                push_line(&mut out, &mut pending_blank, line);
                block = scan_dollar_quotes(line, Some(tag)).map(Block::Dollar);
                continue;
            }
            None => {}
        }

        let line = line.trim_end();
        if line.is_empty() {
            pending_blank = !out.is_empty();
            continue;
        }
        if is_noise(line) {
            continue;
        }
        push_line(&mut out, &mut pending_blank, line);
        block = if is_copy_from_stdin(line) {
            Some(Block::Copy)
        } else {
            scan_dollar_quotes(line, None).map(Block::Dollar)
        };
    }
    Snapshot(out)
}

fn push_line(out: &mut String, pending_blank: &mut bool, line: &str) {
    if *pending_blank {
        out.push('\n');
        *pending_blank = false;
    }
    out.push_str(line);
    out.push('\n');
}

fn is_copy_from_stdin(line: &str) -> bool {
    line.starts_with("COPY ") && line.ends_with(" FROM stdin;")
}

/// Follow dollar quotes across `line`, starting inside `open` if set.
/// Returns the tag still open at the end of the line.
fn scan_dollar_quotes(line: &str, mut open: Option<String>) -> Option<String> {
    let mut rest = line;
    loop {
        match open {
            Some(tag) => match rest.find(tag.as_str()) {
                Some(i) => {
                    rest = &rest[i + tag.len()..];
                    open = None;
                }
                None => return Some(tag),
            },
            None => {
                let (i, tag) = next_dollar_tag(rest)?;
                rest = &rest[i + tag.len()..];
                open = Some(tag);
            }
        }
    }
}

/// First `$tag$` in `text` (tag empty or an identifier); `$1` and friends
/// are positional parameters, not quotes.
fn next_dollar_tag(text: &str) -> Option<(usize, String)> {
    for (i, _) in text.match_indices('$') {
        let after = &text[i + 1..];
        let Some(end) = after.find('$') else {
            return None;
        };
        let ident = &after[..end];
        let mut chars = ident.chars();
        let valid = match chars.next() {
            None => true,
            Some(c) => {
                (c.is_ascii_alphabetic() || c == '_')
                    && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
        };
        if valid {
            return Some((i, format!("${ident}$")));
        }
    }
    None
}

/// Textual equality of two normalized snapshots.
pub fn equal(a: &Snapshot, b: &Snapshot) -> bool {
    a == b
}

/// Outcome of comparing an expected snapshot with an actual one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Comparison {
    Equal,
    Differs { unified_diff: String },
}

impl Comparison {
    pub fn is_equal(&self) -> bool {
        matches!(self, Comparison::Equal)
    }
}

/// Compare two snapshots, rendering any difference as a unified diff
/// labelled with `expected_label` and `actual_label`.
pub fn compare(
    expected: &Snapshot,
    actual: &Snapshot,
    expected_label: &str,
    actual_label: &str,
) -> Comparison {
    if equal(expected, actual) {
        return Comparison::Equal;
    }
    let unified_diff = TextDiff::from_lines(expected.as_str(), actual.as_str())
        .unified_diff()
        .header(expected_label, actual_label)
        .context_radius(3)
        .to_string();
    Comparison::Differs { unified_diff }
}
