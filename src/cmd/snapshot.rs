//! Snapshot command CLI handler.

use crate::restore::snapshot_store;
use std::path::PathBuf;

pub fn run(database: PathBuf) -> anyhow::Result<()> {
    if !database.exists() {
        anyhow::bail!("Database not found: {}", database.display());
    }

    let snapshot = snapshot_store(&database)
        .map_err(|e| anyhow::anyhow!("Snapshot failed: {}", e))?;
    println!("Snapshot written to {}", snapshot.display());
    Ok(())
}
