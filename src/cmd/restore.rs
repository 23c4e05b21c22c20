//! Restore command CLI handler.

use crate::restore::{self, RestoreConfig, RestoreReport, RestoreState, Restorer};
use std::path::PathBuf;

pub fn run(
    artifact: PathBuf,
    database: PathBuf,
    batch_size: usize,
    progress: bool,
    report: bool,
) -> anyhow::Result<()> {
    let mut config = RestoreConfig::new(&database);
    config.batch_size = batch_size;
    config.show_progress = progress;

    let restorer = Restorer::new(config);
    let outcome = restorer.restore(&artifact);

    print_outcome(&outcome);

    if report {
        let path = restore::write_report(&outcome, &database)?;
        println!("Report written to {}", path.display());
    }

    match outcome.state {
        RestoreState::Committed => Ok(()),
        RestoreState::RolledBack => anyhow::bail!(
            "Restore failed; live database restored from snapshot: {}",
            outcome.error.unwrap_or_default()
        ),
        _ => anyhow::bail!(
            "Restore failed: {}",
            outcome.error.unwrap_or_else(|| "unknown error".to_string())
        ),
    }
}

fn print_outcome(outcome: &RestoreReport) {
    println!("State: {}", outcome.state);
    if outcome.state == RestoreState::Committed {
        println!("  Statements executed: {}", outcome.stats.statements_executed);
        if outcome.stats.statements_failed > 0 {
            println!("  Statements failed: {}", outcome.stats.statements_failed);
        }
        println!("  Rows inserted: {}", outcome.stats.rows_inserted);
        if outcome.stats.rows_skipped > 0 {
            println!("  Rows skipped: {}", outcome.stats.rows_skipped);
        }
        println!("  Statements discarded: {}", outcome.stats.statements_discarded);
    }
    if let Some(snapshot) = &outcome.snapshot_path {
        println!("  Snapshot: {}", snapshot.display());
    }
    if !outcome.warnings.is_empty() {
        eprintln!("\nWarnings ({}):", outcome.warnings.len());
        for warning in &outcome.warnings {
            eprintln!("  ⚠ {}", warning);
        }
    }
}
