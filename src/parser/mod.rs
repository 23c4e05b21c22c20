//! Line-oriented splitter for PostgreSQL text dumps.
//!
//! Splits a dump stream into raw statements without a full SQL parser.
//! A statement ends at a line whose last non-whitespace byte is `;`,
//! except inside a COPY data block, which ends at the `\.` line.
//! Single-quote string state is tracked across lines so semicolons
//! inside literals never split a statement early.

use once_cell::sync::Lazy;
use regex::Regex;
use std::io::{BufRead, BufReader, Read};

pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    CreateTable,
    CreateIndex,
    AlterTable,
    Insert,
    CopyBlock,
    SessionSet,
    Other,
}

/// One syntactic unit of the dump, immutable once produced.
#[derive(Debug, Clone)]
pub struct RawStatement {
    pub kind: StatementKind,
    pub text: String,
    pub start_line: usize,
    pub end_line: usize,
}

static RE_COPY_HEADER: Lazy<Regex> = Lazy::new(|| {
    // COPY [schema.]table [(cols)] FROM stdin;
    Regex::new(r#"(?i)^\s*COPY\s+(?:"?\w+"?\.)?"?\w+"?\s*(?:\([^)]*\))?\s+FROM\s+stdin\s*;"#)
        .unwrap()
});

static RE_CREATE_INDEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*CREATE\s+(UNIQUE\s+)?INDEX\b").unwrap());

pub struct StatementSplitter<R: Read> {
    reader: BufReader<R>,
    line_no: usize,
}

impl<R: Read> StatementSplitter<R> {
    pub fn new(reader: R) -> Self {
        Self::with_capacity(reader, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(reader: R, buffer_size: usize) -> Self {
        Self {
            reader: BufReader::with_capacity(buffer_size, reader),
            line_no: 0,
        }
    }

    /// Read the next statement span, or `None` at end of input.
    ///
    /// Blank lines and `--` comment lines between statements are skipped
    /// entirely; nothing is emitted for them.
    pub fn next_statement(&mut self) -> std::io::Result<Option<RawStatement>> {
        let mut buf = String::new();
        let mut line = String::new();
        let mut start_line = 0;
        let mut in_string = false;
        let mut in_copy = false;

        loop {
            line.clear();
            let n = self.reader.read_line(&mut line)?;
            if n == 0 {
                if buf.trim().is_empty() {
                    return Ok(None);
                }
                // Unterminated tail at EOF; emit it as-is.
                return Ok(Some(self.emit(buf, start_line, in_copy)));
            }
            self.line_no += 1;
            let trimmed = line.trim_end();

            if in_copy {
                buf.push_str(&line);
                if trimmed == "\\." {
                    return Ok(Some(self.emit(buf, start_line, true)));
                }
                continue;
            }

            if buf.is_empty() {
                let lead = trimmed.trim_start();
                if lead.is_empty() || lead.starts_with("--") {
                    continue;
                }
                start_line = self.line_no;
            }

            buf.push_str(&line);
            in_string = quote_state_after(trimmed, in_string);

            if !in_string && trimmed.ends_with(';') {
                if RE_COPY_HEADER.is_match(&buf) {
                    in_copy = true;
                    continue;
                }
                return Ok(Some(self.emit(buf, start_line, false)));
            }
        }
    }

    fn emit(&self, text: String, start_line: usize, is_copy: bool) -> RawStatement {
        let kind = if is_copy {
            StatementKind::CopyBlock
        } else {
            classify(&text).0
        };
        RawStatement {
            kind,
            text,
            start_line,
            end_line: self.line_no,
        }
    }
}

/// Advance single-quote string state across one line.
///
/// A doubled quote inside a literal toggles out and back in, so a plain
/// per-quote toggle is exact for end-of-line state.
fn quote_state_after(line: &str, mut in_string: bool) -> bool {
    for c in line.chars() {
        if c == '\'' {
            in_string = !in_string;
        }
    }
    in_string
}

/// Classify a statement and extract the table name it targets, if any.
pub fn classify(stmt: &str) -> (StatementKind, String) {
    let head = stmt.trim_start();
    let upper: String = head
        .chars()
        .take(24)
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if upper.starts_with("CREATE TABLE") {
        return (
            StatementKind::CreateTable,
            extract_table_name(head, 12).unwrap_or_default(),
        );
    }
    if RE_CREATE_INDEX.is_match(head) {
        static RE_ON: Lazy<Regex> =
            Lazy::new(|| Regex::new(r#"(?i)\bON\s+"?([^\s"(;]+)"?"#).unwrap());
        let table = RE_ON
            .captures(head)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        return (StatementKind::CreateIndex, table);
    }
    if upper.starts_with("ALTER TABLE") {
        return (
            StatementKind::AlterTable,
            extract_table_name(head, 11).unwrap_or_default(),
        );
    }
    if upper.starts_with("INSERT INTO") {
        return (
            StatementKind::Insert,
            extract_table_name(head, 11).unwrap_or_default(),
        );
    }
    if upper.starts_with("COPY ") {
        return (
            StatementKind::CopyBlock,
            extract_table_name(head, 5).unwrap_or_default(),
        );
    }
    if upper.starts_with("SET ") || upper.starts_with("SELECT PG_CATALOG") {
        return (StatementKind::SessionSet, String::new());
    }
    (StatementKind::Other, String::new())
}

fn extract_table_name(stmt: &str, offset: usize) -> Option<String> {
    let bytes = stmt.as_bytes();
    let mut i = offset;

    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    // Skip noise words between the verb and the name.
    for kw in ["IF NOT EXISTS ", "ONLY "] {
        if stmt[i..].to_ascii_uppercase().starts_with(kw) {
            i += kw.len();
        }
    }
    if i >= bytes.len() {
        return None;
    }

    let quoted = bytes[i] == b'"';
    if quoted {
        i += 1;
    }
    let start = i;
    while i < bytes.len() {
        let b = bytes[i];
        if quoted {
            if b == b'"' {
                return Some(stmt[start..i].to_string());
            }
        } else if b.is_ascii_whitespace() || matches!(b, b'(' | b';' | b',') {
            break;
        }
        i += 1;
    }
    if !quoted && i > start {
        return Some(stmt[start..i].to_string());
    }
    None
}

/// Compression format detected from file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
}

impl Compression {
    pub fn from_path(path: &std::path::Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());
        match ext.as_deref() {
            Some("gz" | "gzip") => Compression::Gzip,
            _ => Compression::None,
        }
    }

    /// Wrap a reader with the appropriate decompressor.
    pub fn wrap_reader<'a>(&self, reader: Box<dyn Read + 'a>) -> Box<dyn Read + 'a> {
        match self {
            Compression::None => reader,
            Compression::Gzip => Box::new(flate2::read::GzDecoder::new(reader)),
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Gzip => write!(f, "gzip"),
        }
    }
}
