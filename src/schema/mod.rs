//! Expected application schema and additive reconciliation.
//!
//! A restored dump may predate columns the application has since grown.
//! The reconciler compares the live store's actual columns against the
//! hard-coded expectation below and additively patches what is missing.
//! It never drops or narrows anything, and it never creates tables:
//! table creation belongs to [`ensure_tables`], which runs separately
//! after a dump restore.

use ahash::AHashSet;
use anyhow::{Context, Result};
use rusqlite::Connection;
use std::collections::BTreeMap;

/// One column the application expects a table to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub table: &'static str,
    pub column: &'static str,
    pub col_type: &'static str,
    pub default: Option<&'static str>,
}

/// Columns added across application versions; a dump taken before any of
/// these existed restores without them.
pub const EXPECTED_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec { table: "products", column: "barcode", col_type: "TEXT", default: Some("''") },
    ColumnSpec { table: "products", column: "min_stock", col_type: "INTEGER", default: Some("0") },
    ColumnSpec { table: "products", column: "location", col_type: "TEXT", default: Some("''") },
    ColumnSpec { table: "clients", column: "phone", col_type: "TEXT", default: Some("''") },
    ColumnSpec { table: "clients", column: "email", col_type: "TEXT", default: Some("''") },
    ColumnSpec { table: "invoices", column: "discount", col_type: "REAL", default: Some("0") },
    ColumnSpec { table: "invoices", column: "payment_method", col_type: "TEXT", default: Some("'cash'") },
    ColumnSpec { table: "invoice_items", column: "unit", col_type: "TEXT", default: Some("''") },
    ColumnSpec { table: "debts", column: "notes", col_type: "TEXT", default: None },
    ColumnSpec { table: "debts", column: "settled_at", col_type: "TEXT", default: None },
    ColumnSpec { table: "maintenance_tickets", column: "status", col_type: "TEXT", default: Some("'open'") },
    ColumnSpec { table: "maintenance_tickets", column: "technician", col_type: "TEXT", default: Some("''") },
];

/// Full table definitions the application expects to exist.
const TABLE_DDL: &str = "
CREATE TABLE IF NOT EXISTS products (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    price REAL NOT NULL DEFAULT 0,
    stock INTEGER NOT NULL DEFAULT 0,
    barcode TEXT DEFAULT '',
    min_stock INTEGER DEFAULT 0,
    location TEXT DEFAULT ''
);
CREATE TABLE IF NOT EXISTS clients (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    phone TEXT DEFAULT '',
    email TEXT DEFAULT ''
);
CREATE TABLE IF NOT EXISTS invoices (
    id INTEGER PRIMARY KEY,
    client_id INTEGER REFERENCES clients(id),
    total REAL NOT NULL DEFAULT 0,
    discount REAL DEFAULT 0,
    payment_method TEXT DEFAULT 'cash',
    created_at TEXT
);
CREATE TABLE IF NOT EXISTS invoice_items (
    id INTEGER PRIMARY KEY,
    invoice_id INTEGER REFERENCES invoices(id),
    product_id INTEGER REFERENCES products(id),
    quantity REAL NOT NULL DEFAULT 1,
    unit TEXT DEFAULT '',
    price REAL NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS debts (
    id INTEGER PRIMARY KEY,
    client_id INTEGER REFERENCES clients(id),
    amount REAL NOT NULL DEFAULT 0,
    notes TEXT,
    settled_at TEXT,
    created_at TEXT
);
CREATE TABLE IF NOT EXISTS debt_payments (
    id INTEGER PRIMARY KEY,
    debt_id INTEGER REFERENCES debts(id),
    amount REAL NOT NULL DEFAULT 0,
    paid_at TEXT
);
CREATE TABLE IF NOT EXISTS maintenance_tickets (
    id INTEGER PRIMARY KEY,
    client_id INTEGER REFERENCES clients(id),
    device TEXT NOT NULL DEFAULT '',
    problem TEXT DEFAULT '',
    status TEXT DEFAULT 'open',
    technician TEXT DEFAULT '',
    created_at TEXT
);
";

/// Missing columns per table, recomputed on every call and never cached
/// so schema drift is always evaluated against current state.
pub type SchemaDiff = BTreeMap<String, Vec<ColumnSpec>>;

#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub columns_added: usize,
    pub columns_failed: usize,
    pub tables_missing: Vec<String>,
}

/// Create every table the application knows about. Used after a
/// dump-script restore so tables newer than the dump exist before
/// reconciliation runs.
pub fn ensure_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(TABLE_DDL)
        .context("creating expected tables")
}

/// Compute which expected columns are absent from the live store.
pub fn compute_diff(conn: &Connection) -> Result<SchemaDiff> {
    let mut diff = SchemaDiff::new();

    for spec in EXPECTED_COLUMNS {
        let actual = match table_columns(conn, spec.table)? {
            Some(columns) => columns,
            // Missing tables are not created here.
            None => continue,
        };
        if !actual.contains(spec.column) {
            diff.entry(spec.table.to_string()).or_default().push(*spec);
        }
    }

    Ok(diff)
}

/// Additively patch the live store to match the expected schema.
///
/// Idempotent: a second run right after the first finds nothing to add.
/// A failure on one column is logged and does not stop the rest.
pub fn reconcile(conn: &Connection) -> Result<ReconcileReport> {
    let diff = compute_diff(conn)?;
    let mut report = ReconcileReport::default();

    let known: AHashSet<&str> = EXPECTED_COLUMNS.iter().map(|s| s.table).collect();
    for table in known {
        if table_columns(conn, table)?.is_none() {
            report.tables_missing.push(table.to_string());
        }
    }
    report.tables_missing.sort();

    for (table, columns) in &diff {
        for spec in columns {
            let mut sql = format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                table, spec.column, spec.col_type
            );
            if let Some(default) = spec.default {
                sql.push_str(" DEFAULT ");
                sql.push_str(default);
            }
            match conn.execute_batch(&sql) {
                Ok(()) => report.columns_added += 1,
                Err(err) => {
                    report.columns_failed += 1;
                    eprintln!(
                        "warning: could not add column {}.{}: {}",
                        table, spec.column, err
                    );
                }
            }
        }
    }

    Ok(report)
}

/// Column names of `table`, or `None` when the table does not exist.
fn table_columns(conn: &Connection, table: &str) -> Result<Option<AHashSet<String>>> {
    let exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n > 0)
        .context("querying sqlite_master")?;
    if !exists {
        return Ok(None);
    }

    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<AHashSet<String>>>()
        .context("reading table_info")?;
    Ok(Some(columns))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
