//! Convert COPY ... FROM stdin data blocks to multi-row INSERT statements.
//!
//! Handles tab-separated row parsing, the `\N` NULL sentinel, COPY escape
//! decoding, and batching so a single generated INSERT stays within the
//! embedded engine's statement limits. Rows are best-effort: a malformed
//! row is skipped with a diagnostic, never aborting the block.

use memchr::memchr;
use once_cell::sync::Lazy;
use regex::Regex;

use super::warnings::{TranslationWarning, WarningCollector};

/// Default maximum rows per generated INSERT statement.
pub const MAX_ROWS_PER_INSERT: usize = 100;

/// Parsed COPY header: target table (schema qualifier already stripped)
/// and the declared column list.
#[derive(Debug, Clone)]
pub struct CopyHeader {
    pub table: String,
    pub columns: Vec<String>,
}

/// Result of converting one COPY block.
#[derive(Debug, Default)]
pub struct CopyConversion {
    pub inserts: Vec<String>,
    pub rows_emitted: usize,
    pub rows_skipped: usize,
}

static RE_COPY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)^\s*COPY\s+(?:ONLY\s+)?(?:"?(\w+)"?\.)?"?(\w+)"?\s*(?:\(([^)]+)\))?\s+FROM\s+stdin"#,
    )
    .unwrap()
});

/// Parse a COPY header line such as `COPY public.clients (id, name) FROM stdin;`.
pub fn parse_copy_header(stmt: &str) -> Option<CopyHeader> {
    let caps = RE_COPY.captures(stmt)?;
    let table = caps.get(2)?.as_str().to_string();
    let columns = caps
        .get(3)
        .map(|m| {
            m.as_str()
                .split(',')
                .map(|c| c.trim().trim_matches('"').to_string())
                .collect()
        })
        .unwrap_or_default();
    Some(CopyHeader { table, columns })
}

/// Convert a whole COPY block (header line, data rows, `\.` terminator)
/// into batched INSERT statements.
///
/// `first_line` is the line number of the header within the dump, used
/// for per-row diagnostics.
pub fn convert_copy_block(
    block: &str,
    first_line: usize,
    batch_size: usize,
    warnings: &mut WarningCollector,
) -> Option<CopyConversion> {
    let header_end = memchr(b'\n', block.as_bytes()).unwrap_or(block.len());
    let header = parse_copy_header(&block[..header_end])?;
    let data = if header_end < block.len() {
        &block[header_end + 1..]
    } else {
        ""
    };

    let mut conversion = CopyConversion::default();
    let mut expected = header.columns.len();
    let mut batch: Vec<String> = Vec::new();
    let batch_size = batch_size.max(1);

    for (offset, line) in data.lines().enumerate() {
        if line == "\\." {
            break;
        }
        let fields = split_row_fields(line);
        if expected == 0 {
            // No declared column list; take the width from the first row.
            expected = fields.len();
        }
        if fields.len() != expected {
            conversion.rows_skipped += 1;
            warnings.add(TranslationWarning::MalformedCopyRow {
                table: header.table.clone(),
                line: first_line + 1 + offset,
                expected,
                found: fields.len(),
            });
            continue;
        }

        let tuple: Vec<String> = fields.iter().map(|f| format_field(f)).collect();
        batch.push(format!("({})", tuple.join(",")));
        conversion.rows_emitted += 1;

        if batch.len() >= batch_size {
            conversion
                .inserts
                .push(render_insert(&header, std::mem::take(&mut batch)));
        }
    }

    if !batch.is_empty() {
        conversion.inserts.push(render_insert(&header, batch));
    }

    Some(conversion)
}

fn render_insert(header: &CopyHeader, tuples: Vec<String>) -> String {
    let columns = if header.columns.is_empty() {
        String::new()
    } else {
        format!(" ({})", header.columns.join(", "))
    };
    format!(
        "INSERT INTO {}{} VALUES {};",
        header.table,
        columns,
        tuples.join(",")
    )
}

/// Split one data row at raw (unescaped) tab characters.
fn split_row_fields(line: &str) -> Vec<&str> {
    line.split('\t').collect()
}

/// Format one raw COPY field as a SQL literal.
///
/// The `\N` sentinel maps to NULL, numeric fields are emitted bare, and
/// everything else has its COPY escapes decoded and is single-quoted with
/// embedded quotes doubled.
fn format_field(raw: &str) -> String {
    if raw == "\\N" {
        return "NULL".to_string();
    }
    if looks_numeric(raw) {
        return raw.to_string();
    }
    let decoded = decode_copy_escapes(raw);
    format!("'{}'", decoded.replace('\'', "''"))
}

fn looks_numeric(raw: &str) -> bool {
    !raw.is_empty()
        && (raw.parse::<i64>().is_ok()
            || (raw.parse::<f64>().is_ok()
                && raw
                    .bytes()
                    .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'+' | b'e' | b'E'))))
}

/// Decode PostgreSQL COPY escape sequences (`\t`, `\n`, `\r`, `\\`, octal).
///
/// Octal escapes are raw bytes, not codepoints: multi-byte UTF-8 text arrives
/// as one escape per byte (e.g. `\303\251` for `é`), so decoding accumulates
/// bytes and converts to a string at the end.
fn decode_copy_escapes(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(value.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() {
            let next = bytes[i + 1];
            match next {
                b'n' => out.push(b'\n'),
                b'r' => out.push(b'\r'),
                b't' => out.push(b'\t'),
                b'\\' => out.push(b'\\'),
                b'0'..=b'7' => {
                    let mut octal = 0u8;
                    let mut consumed = 0;
                    for j in 0..3 {
                        match bytes.get(i + 1 + j) {
                            Some(d @ b'0'..=b'7') => {
                                octal = octal.wrapping_mul(8) + (d - b'0');
                                consumed += 1;
                            }
                            _ => break,
                        }
                    }
                    out.push(octal);
                    i += 1 + consumed;
                    continue;
                }
                _ => {
                    out.push(b'\\');
                    out.push(next);
                }
            }
            i += 2;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}
