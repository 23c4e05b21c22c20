mod reconcile;
mod restore;
mod snapshot;
mod translate;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::io;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sqlite-restore")]
#[command(version)]
#[command(about = "Restore PostgreSQL dump backups into a live SQLite store", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Restore a backup artifact over the live database
    Restore {
        /// Backup artifact: .sql / .sql.gz dump script, or a .db /
        /// .sqlite / .sqlite3 native store
        artifact: PathBuf,

        /// Path of the live database to replace
        #[arg(short, long, default_value = "store.db")]
        database: PathBuf,

        /// Rows per generated INSERT statement
        #[arg(long, default_value_t = crate::convert::MAX_ROWS_PER_INSERT)]
        batch_size: usize,

        /// Show progress while replaying the dump
        #[arg(short, long)]
        progress: bool,

        /// Write a JSON report next to the live database
        #[arg(long)]
        report: bool,
    },

    /// Translate a dump script to SQLite SQL without touching any database
    Translate {
        /// Input dump file (.sql or .sql.gz)
        file: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Rows per generated INSERT statement
        #[arg(long, default_value_t = crate::convert::MAX_ROWS_PER_INSERT)]
        batch_size: usize,

        /// Show progress during translation
        #[arg(short, long)]
        progress: bool,
    },

    /// Additively patch a database to the expected application schema
    Reconcile {
        /// Database to reconcile
        database: PathBuf,

        /// Also create expected tables that are missing entirely
        #[arg(long)]
        create_missing: bool,
    },

    /// Take a timestamped snapshot copy of a database
    Snapshot {
        /// Database to snapshot
        database: PathBuf,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Restore {
            artifact,
            database,
            batch_size,
            progress,
            report,
        } => restore::run(artifact, database, batch_size, progress, report),
        Commands::Translate {
            file,
            output,
            batch_size,
            progress,
        } => translate::run(file, output, batch_size, progress),
        Commands::Reconcile {
            database,
            create_missing,
        } => reconcile::run(database, create_missing),
        Commands::Snapshot { database } => snapshot::run(database),
        Commands::Completions { shell } => {
            generate(
                shell,
                &mut Cli::command(),
                "sqlite-restore",
                &mut io::stdout(),
            );
            Ok(())
        }
    }
}
