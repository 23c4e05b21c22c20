//! Translation of PostgreSQL dump statements into SQLite-executable SQL.
//!
//! The translator is a fixed-order pipeline of independent rewrite rules
//! over one statement at a time:
//!
//! 1. Schema qualifiers (`public.`, `pg_catalog.`) are stripped first so
//!    later rules match unqualified identifiers.
//! 2. Statement kinds the target engine cannot execute are discarded
//!    (sequences, enum types, ALTER TABLE, ownership/comments/grants,
//!    extensions, session configuration, setval/set_config helpers).
//! 3. Index creation with a storage method is rewritten to plain SQLite
//!    index syntax; partial-index predicates are dropped with a warning.
//! 4. Token rewrites run last: boolean literals, type names, cast
//!    suffixes, sequence-backed defaults, ON UPDATE CASCADE.
//!
//! COPY blocks are converted to INSERT statements before translation.

pub mod copy_to_insert;
pub mod types;
pub mod warnings;

pub use copy_to_insert::{
    convert_copy_block, parse_copy_header, CopyConversion, CopyHeader, MAX_ROWS_PER_INSERT,
};
pub use types::TypeMapper;
pub use warnings::{TranslationWarning, WarningCollector};

use crate::parser::{RawStatement, StatementKind, StatementSplitter};
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::Read;

/// Outcome of translating one statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Translated {
    Statement(String),
    Discarded,
}

/// Counters accumulated over one translation pass.
#[derive(Debug, Default, Clone)]
pub struct TranslateStats {
    pub statements_processed: u64,
    pub statements_emitted: u64,
    pub statements_discarded: u64,
    pub copy_rows_emitted: u64,
    pub copy_rows_skipped: u64,
}

/// Per-document translation state: fresh for every restore.
pub struct TranslationContext {
    batch_size: usize,
    pub warnings: WarningCollector,
    pub stats: TranslateStats,
}

impl Default for TranslationContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Statement prefixes (post qualifier-strip, comments removed) that the
/// target engine cannot execute. Their effects are either already baked
/// into the translated CREATE TABLE or are not representable.
const DISCARD_PREFIXES: &[(&str, &str)] = &[
    ("CREATE SEQUENCE", "sequence object"),
    ("ALTER SEQUENCE", "sequence object"),
    ("DROP SEQUENCE", "sequence object"),
    ("CREATE TYPE", "enum type declaration"),
    ("ALTER TYPE", "enum type declaration"),
    ("CREATE DOMAIN", "domain declaration"),
    ("ALTER TABLE", "alter-table statement"),
    ("COMMENT ON", "comment statement"),
    ("GRANT ", "permission statement"),
    ("REVOKE ", "permission statement"),
    ("CREATE EXTENSION", "extension statement"),
    ("CREATE SCHEMA", "schema management"),
    ("ALTER SCHEMA", "schema management"),
    ("DROP SCHEMA", "schema management"),
    ("SET ", "session configuration"),
    ("SELECT SETVAL", "sequence value helper"),
    ("SELECT SET_CONFIG", "session configuration helper"),
    ("SELECT PG_CATALOG", "administrative helper"),
    ("CREATE FUNCTION", "procedural object"),
    ("CREATE TRIGGER", "procedural object"),
];

impl TranslationContext {
    pub fn new() -> Self {
        Self {
            batch_size: MAX_ROWS_PER_INSERT,
            warnings: WarningCollector::new(),
            stats: TranslateStats::default(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Run the whole pipeline for one raw statement: COPY blocks become
    /// batched INSERTs, everything else goes through the rewrite rules.
    pub fn process(&mut self, stmt: &RawStatement) -> Vec<String> {
        self.stats.statements_processed += 1;

        if stmt.kind == StatementKind::CopyBlock {
            let out = self.process_copy(stmt);
            self.stats.statements_emitted += out.len() as u64;
            if out.is_empty() {
                self.stats.statements_discarded += 1;
            }
            return out;
        }

        match self.translate(stmt) {
            Translated::Statement(sql) => {
                self.stats.statements_emitted += 1;
                vec![sql]
            }
            Translated::Discarded => {
                self.stats.statements_discarded += 1;
                Vec::new()
            }
        }
    }

    fn process_copy(&mut self, stmt: &RawStatement) -> Vec<String> {
        match convert_copy_block(&stmt.text, stmt.start_line, self.batch_size, &mut self.warnings)
        {
            Some(conversion) => {
                // The header's table qualifier is already stripped during
                // parsing; the generated INSERTs carry field data and must
                // not go through identifier rewrites.
                self.stats.copy_rows_emitted += conversion.rows_emitted as u64;
                self.stats.copy_rows_skipped += conversion.rows_skipped as u64;
                conversion.inserts
            }
            None => {
                self.warnings.add(TranslationWarning::DiscardedStatement {
                    reason: "unparseable COPY header".to_string(),
                    statement_preview: preview(&stmt.text),
                });
                Vec::new()
            }
        }
    }

    /// Translate one non-COPY statement. Produces a new statement; the
    /// input is never mutated.
    pub fn translate(&mut self, stmt: &RawStatement) -> Translated {
        // Qualifier stripping runs first so every later rule can match
        // unqualified identifiers.
        let text = strip_schema_qualifier(&stmt.text);

        if let Some(reason) = discard_reason(&text) {
            self.warnings.add(TranslationWarning::DiscardedStatement {
                reason: reason.to_string(),
                statement_preview: preview(&text),
            });
            return Translated::Discarded;
        }

        match stmt.kind {
            StatementKind::CreateIndex => self.rewrite_index(&text),
            StatementKind::CreateTable => {
                let mut result = TypeMapper::convert(&text);
                result = strip_casts(&result);
                result = strip_nextval_default(&result);
                result = strip_on_update_cascade(&result);
                result = TypeMapper::convert_boolean_literals(&result);
                Translated::Statement(result)
            }
            StatementKind::Insert => {
                let mut result = strip_casts(&text);
                result = TypeMapper::convert_boolean_literals(&result);
                Translated::Statement(result)
            }
            // Already handled by discard_reason; kept for completeness.
            StatementKind::SessionSet | StatementKind::AlterTable => Translated::Discarded,
            _ => Translated::Statement(text),
        }
    }

    fn rewrite_index(&mut self, text: &str) -> Translated {
        static RE_INDEX: Lazy<Regex> = Lazy::new(|| {
            Regex::new(
                r#"(?is)^\s*CREATE\s+(UNIQUE\s+)?INDEX\s+(?:IF\s+NOT\s+EXISTS\s+)?"?(\w+)"?\s+ON\s+"?(\w+)"?\s+(?:USING\s+\w+\s*)?\("#,
            )
            .unwrap()
        });

        let Some(caps) = RE_INDEX.captures(text) else {
            self.warnings.add(TranslationWarning::DiscardedStatement {
                reason: "unrecognized index statement".to_string(),
                statement_preview: preview(text),
            });
            return Translated::Discarded;
        };

        // Expression indexes like `(lower(email))` nest parentheses, so the
        // column list ends at the matching close paren, not the first one.
        let list_start = caps.get(0).map(|m| m.end()).unwrap_or(0);
        let Some(list_len) = balanced_paren_span(&text[list_start..]) else {
            self.warnings.add(TranslationWarning::DiscardedStatement {
                reason: "unrecognized index statement".to_string(),
                statement_preview: preview(text),
            });
            return Translated::Discarded;
        };

        let unique = if caps.get(1).is_some() { "UNIQUE " } else { "" };
        let name = &caps[2];
        let table = &caps[3];
        let columns: Vec<String> = split_top_level(&text[list_start..list_start + list_len])
            .into_iter()
            .map(|c| c.trim().trim_matches('"').to_string())
            .collect();
        let trailer = text[list_start + list_len + 1..].to_uppercase();

        if trailer.contains("WHERE") {
            // The predicate is not representable; emit the unfiltered index.
            self.warnings
                .add(TranslationWarning::PartialIndexPredicateDropped {
                    index: name.to_string(),
                });
        }

        Translated::Statement(format!(
            "CREATE {}INDEX {} ON {} ({});",
            unique,
            name,
            table,
            columns.join(", ")
        ))
    }
}

/// Length of the text up to the close paren matching an already-consumed
/// opening paren, honoring nesting and single-quoted literals. `None` when
/// the parens never balance.
fn balanced_paren_span(text: &str) -> Option<usize> {
    let mut depth = 1usize;
    let mut in_string = false;
    for (i, b) in text.bytes().enumerate() {
        match b {
            b'\'' => in_string = !in_string,
            b'(' if !in_string => depth += 1,
            b')' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split a column list on commas, ignoring commas nested inside parens or
/// single-quoted literals.
fn split_top_level(list: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut start = 0;
    for (i, b) in list.bytes().enumerate() {
        match b {
            b'\'' => in_string = !in_string,
            b'(' if !in_string => depth += 1,
            b')' if !in_string => depth = depth.saturating_sub(1),
            b',' if !in_string && depth == 0 => {
                parts.push(&list[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&list[start..]);
    parts
}

/// Strip `public.` / `pg_catalog.` qualifiers, unquoting the identifier
/// that follows so `"public"."invoices"` becomes `invoices`.
pub fn strip_schema_qualifier(stmt: &str) -> String {
    static RE_QUALIFIER: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r#"(?i)"?(?:public|pg_catalog|pg_temp)"?\s*\.\s*"?([A-Za-z_][A-Za-z0-9_]*)"?"#)
            .unwrap()
    });
    RE_QUALIFIER.replace_all(stmt, "$1").to_string()
}

/// Drop `::type` cast suffixes, including multi-word types like
/// `::character varying(120)` and `::timestamp without time zone`.
fn strip_casts(stmt: &str) -> String {
    static RE_CAST: Lazy<Regex> = Lazy::new(|| {
        Regex::new(
            r#"(?i)::"?[a-z_][a-z0-9_]*"?(?:\s+varying|\s+precision|\s+with(?:out)?\s+time\s+zone)?(?:\s*\(\s*\d+(?:\s*,\s*\d+)?\s*\))?"#,
        )
        .unwrap()
    });
    RE_CAST.replace_all(stmt, "").to_string()
}

/// Remove `DEFAULT nextval('...')`; the column keeps no default rather
/// than referencing a generator that does not exist in the target.
fn strip_nextval_default(stmt: &str) -> String {
    static RE_NEXTVAL: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)\s*DEFAULT\s+nextval\s*\([^)]*\)").unwrap());
    RE_NEXTVAL.replace_all(stmt, "").to_string()
}

fn strip_on_update_cascade(stmt: &str) -> String {
    static RE_ON_UPDATE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)\s+ON\s+UPDATE\s+CASCADE\b").unwrap());
    RE_ON_UPDATE.replace_all(stmt, "").to_string()
}

fn discard_reason(text: &str) -> Option<&'static str> {
    let stripped = strip_leading_comments(text);
    let upper: String = stripped.chars().take(32).map(|c| c.to_ascii_uppercase()).collect();
    DISCARD_PREFIXES
        .iter()
        .find(|(prefix, _)| upper.starts_with(prefix))
        .map(|(_, reason)| *reason)
}

fn strip_leading_comments(stmt: &str) -> &str {
    let mut rest = stmt.trim_start();
    while rest.starts_with("--") {
        match rest.find('\n') {
            Some(pos) => rest = rest[pos + 1..].trim_start(),
            None => return "",
        }
    }
    rest
}

fn preview(stmt: &str) -> String {
    stmt.trim().chars().take(60).collect()
}

/// Drive the full pipeline over a dump stream, handing each executable
/// statement to `sink` in dump order.
pub fn translate_stream<R, F>(
    reader: R,
    ctx: &mut TranslationContext,
    mut sink: F,
) -> anyhow::Result<()>
where
    R: Read,
    F: FnMut(&str) -> anyhow::Result<()>,
{
    let mut splitter = StatementSplitter::new(reader);
    while let Some(stmt) = splitter.next_statement()? {
        for sql in ctx.process(&stmt) {
            sink(&sql)?;
        }
    }
    Ok(())
}
