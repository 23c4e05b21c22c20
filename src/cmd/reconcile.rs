//! Reconcile command CLI handler.

use crate::schema;
use rusqlite::Connection;
use std::path::PathBuf;

pub fn run(database: PathBuf, create_missing: bool) -> anyhow::Result<()> {
    if !database.exists() {
        anyhow::bail!("Database not found: {}", database.display());
    }

    let conn = Connection::open(&database)?;
    if create_missing {
        schema::ensure_tables(&conn)?;
    }

    let report = schema::reconcile(&conn)?;

    println!("Columns added: {}", report.columns_added);
    if report.columns_failed > 0 {
        println!("Columns failed: {}", report.columns_failed);
    }
    if !report.tables_missing.is_empty() {
        println!(
            "Tables missing (not created): {}",
            report.tables_missing.join(", ")
        );
    }

    Ok(())
}
