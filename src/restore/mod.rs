//! Restore pipeline: validate an uploaded artifact, build a staging
//! store next to the live one, take a safety snapshot, then swap the
//! staged store into place.
//!
//! The live store is never written in place. A dump script is replayed
//! into a fresh staging database with relaxed pragmas; a native SQLite
//! artifact is copied into staging and integrity-checked. Only after
//! the staged store passes `PRAGMA integrity_check` and a snapshot of
//! the current live store exists does the swap run. A failed swap rolls
//! the live path back from the snapshot.

pub mod swap;

use crate::convert::{translate_stream, TranslationContext, TranslationWarning};
use crate::parser::Compression;
use crate::progress::ProgressReader;
use crate::schema;
use anyhow::anyhow;
use chrono::Local;
use once_cell::sync::Lazy;
use rusqlite::Connection;
use serde::Serialize;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Serializes restores process-wide. A second restore while one runs is
/// rejected up front instead of queued.
static RESTORE_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Uploads smaller than this cannot be a real SQLite database.
const MIN_NATIVE_SIZE: u64 = 4096;

const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";

/// Where a restore attempt got to before it ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreState {
    Received,
    Validated,
    Staged,
    SafetySnapshotTaken,
    Swapping,
    Committed,
    RolledBack,
    Failed,
}

impl fmt::Display for RestoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RestoreState::Received => "received",
            RestoreState::Validated => "validated",
            RestoreState::Staged => "staged",
            RestoreState::SafetySnapshotTaken => "safety-snapshot-taken",
            RestoreState::Swapping => "swapping",
            RestoreState::Committed => "committed",
            RestoreState::RolledBack => "rolled-back",
            RestoreState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What kind of artifact was uploaded, decided by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// A ready-made SQLite database file.
    NativeStore,
    /// A SQL dump script, possibly gzip-compressed.
    DumpScript,
}

impl ArtifactKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name.ends_with(".db") || name.ends_with(".sqlite") || name.ends_with(".sqlite3") {
            Some(ArtifactKind::NativeStore)
        } else if name.ends_with(".sql") || name.ends_with(".sql.gz") {
            Some(ArtifactKind::DumpScript)
        } else {
            None
        }
    }
}

#[derive(Debug)]
pub enum RestoreError {
    /// The artifact was rejected before any state was touched.
    InvalidArtifact(String),
    /// Replaying the dump into staging produced nothing usable.
    StagingExecution(String),
    /// The pre-swap snapshot could not be taken; the swap was not attempted.
    SnapshotFailed(io::Error),
    /// The swap failed. `rolled_back` says whether the snapshot restore
    /// put the live store back.
    Swap {
        swap_error: io::Error,
        rollback_error: Option<io::Error>,
        rolled_back: bool,
    },
    /// Another restore holds the lock.
    ConcurrentRestore,
    Other(anyhow::Error),
}

impl fmt::Display for RestoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestoreError::InvalidArtifact(reason) => write!(f, "invalid artifact: {}", reason),
            RestoreError::StagingExecution(reason) => {
                write!(f, "staging execution failed: {}", reason)
            }
            RestoreError::SnapshotFailed(err) => {
                write!(f, "safety snapshot failed, swap not attempted: {}", err)
            }
            RestoreError::Swap { swap_error, rollback_error, rolled_back } => {
                write!(f, "swap failed: {}", swap_error)?;
                if *rolled_back {
                    write!(f, " (live store restored from snapshot)")?;
                } else if let Some(rb) = rollback_error {
                    write!(f, " (rollback also failed: {})", rb)?;
                }
                Ok(())
            }
            RestoreError::ConcurrentRestore => {
                f.write_str("another restore is already in progress")
            }
            RestoreError::Other(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for RestoreError {}

impl From<anyhow::Error> for RestoreError {
    fn from(err: anyhow::Error) -> Self {
        RestoreError::Other(err)
    }
}

impl From<rusqlite::Error> for RestoreError {
    fn from(err: rusqlite::Error) -> Self {
        RestoreError::Other(err.into())
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct RestoreStats {
    pub statements_executed: usize,
    pub statements_failed: usize,
    pub rows_inserted: usize,
    pub rows_skipped: usize,
    pub statements_discarded: usize,
}

/// Written out as JSON after every attempt, success or not.
#[derive(Debug, Serialize)]
pub struct RestoreReport {
    pub artifact: PathBuf,
    pub artifact_kind: Option<ArtifactKind>,
    pub state: RestoreState,
    pub snapshot_path: Option<PathBuf>,
    pub stats: RestoreStats,
    pub warnings: Vec<String>,
    pub live_store_intact: bool,
    pub error: Option<String>,
    pub completed_at: String,
}

pub struct RestoreConfig {
    pub live_db_path: PathBuf,
    pub batch_size: usize,
    pub show_progress: bool,
    /// Called once after a successful commit, before reconciliation.
    /// Lets the embedding application drop cached connections.
    pub on_committed: Option<Box<dyn Fn(&Path) + Send + Sync>>,
}

impl RestoreConfig {
    pub fn new(live_db_path: impl Into<PathBuf>) -> Self {
        RestoreConfig {
            live_db_path: live_db_path.into(),
            batch_size: crate::convert::MAX_ROWS_PER_INSERT,
            show_progress: false,
            on_committed: None,
        }
    }
}

pub struct Restorer {
    config: RestoreConfig,
    rename: Box<dyn Fn(&Path, &Path) -> io::Result<()> + Send + Sync>,
    retry_delay: std::time::Duration,
}

impl Restorer {
    pub fn new(config: RestoreConfig) -> Self {
        Restorer {
            config,
            rename: Box::new(|from, to| fs::rename(from, to)),
            retry_delay: swap::RETRY_DELAY,
        }
    }

    /// Restore `artifact` over the configured live store.
    pub fn restore(&self, artifact: &Path) -> RestoreReport {
        let mut report = RestoreReport {
            artifact: artifact.to_path_buf(),
            artifact_kind: None,
            state: RestoreState::Received,
            snapshot_path: None,
            stats: RestoreStats::default(),
            warnings: Vec::new(),
            live_store_intact: true,
            error: None,
            completed_at: String::new(),
        };

        let _guard = match RESTORE_LOCK.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                report.state = RestoreState::Failed;
                report.error = Some(RestoreError::ConcurrentRestore.to_string());
                report.completed_at = now_stamp();
                return report;
            }
        };

        match self.run(artifact, &mut report) {
            Ok(()) => {}
            Err(err) => {
                report.state = match &err {
                    RestoreError::Swap { rolled_back: true, .. } => RestoreState::RolledBack,
                    _ => RestoreState::Failed,
                };
                if let RestoreError::Swap { rolled_back, .. } = &err {
                    report.live_store_intact = *rolled_back;
                }
                report.error = Some(err.to_string());
            }
        }
        report.completed_at = now_stamp();
        report
    }

    fn run(&self, artifact: &Path, report: &mut RestoreReport) -> Result<(), RestoreError> {
        let kind = ArtifactKind::from_path(artifact).ok_or_else(|| {
            RestoreError::InvalidArtifact(format!(
                "unrecognized artifact extension: {}",
                artifact.display()
            ))
        })?;
        report.artifact_kind = Some(kind);

        validate_artifact(artifact, kind)?;
        report.state = RestoreState::Validated;

        // Staging lives next to the live store so the final rename stays
        // on one filesystem.
        let live = &self.config.live_db_path;
        let live_dir = live.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(live_dir)
            .map_err(|e| RestoreError::Other(anyhow!("creating live store directory: {}", e)))?;
        let staging = tempfile::Builder::new()
            .prefix(".restore-staging-")
            .tempdir_in(live_dir)
            .map_err(|e| RestoreError::Other(anyhow!("creating staging directory: {}", e)))?;
        let staged_path = staging.path().join("staged.db");

        match kind {
            ArtifactKind::NativeStore => {
                fs::copy(artifact, &staged_path)
                    .map_err(|e| RestoreError::Other(anyhow!("copying artifact: {}", e)))?;
            }
            ArtifactKind::DumpScript => {
                self.replay_dump(artifact, &staged_path, report)?;
            }
        }

        verify_staged(&staged_path)?;
        report.state = RestoreState::Staged;

        let snapshot = self.take_snapshot(report)?;
        report.state = RestoreState::SafetySnapshotTaken;

        report.state = RestoreState::Swapping;
        if let Err(err) = swap::remove_sidecars(live) {
            return Err(self.roll_back(snapshot.as_deref(), err));
        }
        if let Err(swap_error) =
            swap::swap_with(&staged_path, live, self.rename.as_ref(), self.retry_delay)
        {
            return Err(self.roll_back(snapshot.as_deref(), swap_error));
        }
        report.state = RestoreState::Committed;

        if let Some(hook) = &self.config.on_committed {
            hook(live);
        }

        // A dump may predate tables and columns the application has
        // since grown; patch them in, non-fatally.
        if kind == ArtifactKind::DumpScript {
            if let Err(err) = self.reconcile_live(report) {
                report
                    .warnings
                    .push(format!("post-restore reconciliation failed: {}", err));
            }
        }

        // TempDir drop removes the staging directory on every path out.
        drop(staging);
        Ok(())
    }

    fn replay_dump(
        &self,
        artifact: &Path,
        staged_path: &Path,
        report: &mut RestoreReport,
    ) -> Result<(), RestoreError> {
        let file = File::open(artifact)
            .map_err(|e| RestoreError::InvalidArtifact(format!("opening artifact: {}", e)))?;
        let total = file.metadata().map(|m| m.len()).unwrap_or(0);
        let reader = Compression::from_path(artifact).wrap_reader(Box::new(file));
        let reader = maybe_progress(reader, total, self.config.show_progress);

        let conn = Connection::open(staged_path)?;
        apply_staging_pragmas(&conn)?;

        let mut ctx = TranslationContext::new().with_batch_size(self.config.batch_size);
        let mut executed = 0usize;
        let mut failed = 0usize;
        let tx = conn.unchecked_transaction()?;
        let mut exec_failures: Vec<TranslationWarning> = Vec::new();
        translate_stream(reader, &mut ctx, |sql: &str| {
            match tx.execute_batch(sql) {
                Ok(()) => executed += 1,
                Err(err) => {
                    failed += 1;
                    exec_failures.push(TranslationWarning::StatementFailed {
                        error: err.to_string(),
                        statement_preview: sql.trim().chars().take(60).collect(),
                    });
                }
            }
            Ok(())
        })
        .map_err(|e| RestoreError::InvalidArtifact(format!("reading dump: {}", e)))?;
        for warning in exec_failures {
            ctx.warnings.add(warning);
        }
        tx.commit()?;

        report.stats.statements_executed = executed;
        report.stats.statements_failed = failed;
        report.stats.rows_inserted = ctx.stats.copy_rows_emitted as usize;
        report.stats.rows_skipped = ctx.stats.copy_rows_skipped as usize;
        report.stats.statements_discarded = ctx.stats.statements_discarded as usize;
        report
            .warnings
            .extend(ctx.warnings.warnings().iter().map(|w| w.to_string()));

        if executed + failed == 0 {
            return Err(RestoreError::InvalidArtifact(
                "dump produced no statements".to_string(),
            ));
        }
        if executed == 0 {
            return Err(RestoreError::StagingExecution(
                "no statement executed successfully".to_string(),
            ));
        }
        Ok(())
    }

    /// Copy the live store aside before the swap. No live store yet (first
    /// restore) means nothing to snapshot.
    fn take_snapshot(&self, report: &mut RestoreReport) -> Result<Option<PathBuf>, RestoreError> {
        let live = &self.config.live_db_path;
        if !live.exists() {
            return Ok(None);
        }
        let snapshot = snapshot_store(live).map_err(RestoreError::SnapshotFailed)?;
        report.snapshot_path = Some(snapshot.clone());
        Ok(Some(snapshot))
    }

    fn roll_back(&self, snapshot: Option<&Path>, swap_error: io::Error) -> RestoreError {
        let live = &self.config.live_db_path;
        match snapshot {
            Some(snapshot) => match fs::copy(snapshot, live) {
                Ok(_) => RestoreError::Swap {
                    swap_error,
                    rollback_error: None,
                    rolled_back: true,
                },
                Err(rollback_error) => RestoreError::Swap {
                    swap_error,
                    rollback_error: Some(rollback_error),
                    rolled_back: false,
                },
            },
            // Nothing existed before; the live path intact means absent.
            None => RestoreError::Swap {
                swap_error,
                rollback_error: None,
                rolled_back: !live.exists(),
            },
        }
    }

    fn reconcile_live(&self, report: &mut RestoreReport) -> anyhow::Result<()> {
        let conn = Connection::open(&self.config.live_db_path)?;
        schema::ensure_tables(&conn)?;
        let outcome = schema::reconcile(&conn)?;
        if outcome.columns_added > 0 {
            report.warnings.push(format!(
                "schema reconciliation added {} column(s)",
                outcome.columns_added
            ));
        }
        Ok(())
    }

    #[cfg(test)]
    fn with_rename(
        mut self,
        rename: Box<dyn Fn(&Path, &Path) -> io::Result<()> + Send + Sync>,
        delay: std::time::Duration,
    ) -> Self {
        self.rename = rename;
        self.retry_delay = delay;
        self
    }
}

/// Relaxed durability for the staging store only. The staged file is
/// thrown away on any failure, so crash safety buys nothing here.
fn apply_staging_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA synchronous = OFF; PRAGMA foreign_keys = OFF;")?;
    // Value-returning pragmas must go through query_row.
    conn.query_row("PRAGMA journal_mode = MEMORY", [], |_| Ok(()))?;
    conn.query_row("PRAGMA locking_mode = EXCLUSIVE", [], |_| Ok(()))?;
    Ok(())
}

fn validate_artifact(artifact: &Path, kind: ArtifactKind) -> Result<(), RestoreError> {
    let meta = fs::metadata(artifact)
        .map_err(|e| RestoreError::InvalidArtifact(format!("artifact not readable: {}", e)))?;
    if meta.len() == 0 {
        return Err(RestoreError::InvalidArtifact("artifact is empty".to_string()));
    }
    if kind == ArtifactKind::NativeStore {
        if meta.len() < MIN_NATIVE_SIZE {
            return Err(RestoreError::InvalidArtifact(format!(
                "artifact too small to be a database ({} bytes)",
                meta.len()
            )));
        }
        let mut magic = [0u8; 16];
        File::open(artifact)
            .and_then(|mut f| f.read_exact(&mut magic))
            .map_err(|e| RestoreError::InvalidArtifact(format!("reading header: {}", e)))?;
        if &magic != SQLITE_MAGIC {
            return Err(RestoreError::InvalidArtifact(
                "file does not start with the SQLite header".to_string(),
            ));
        }
    }
    Ok(())
}

/// A staged store that fails integrity_check never reaches the swap.
fn verify_staged(staged: &Path) -> Result<(), RestoreError> {
    let conn = Connection::open(staged)?;
    let verdict: String = conn
        .query_row("PRAGMA integrity_check", [], |row| row.get(0))
        .map_err(|e| RestoreError::StagingExecution(format!("integrity check: {}", e)))?;
    if verdict != "ok" {
        return Err(RestoreError::StagingExecution(format!(
            "integrity check failed: {}",
            verdict
        )));
    }
    Ok(())
}

fn maybe_progress(reader: Box<dyn Read>, total: u64, show: bool) -> Box<dyn Read> {
    if !show {
        return reader;
    }
    Box::new(ProgressReader::spinner(reader, total))
}

fn now_stamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Copy `live` aside under a timestamped `.pre-restore-` name in the
/// same directory, returning the snapshot path.
pub fn snapshot_store(live: &Path) -> io::Result<PathBuf> {
    let stamp = Local::now().format("%Y%m%d-%H%M%S");
    let name = format!(
        "{}.pre-restore-{}",
        live.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("store.db"),
        stamp
    );
    let snapshot = live.with_file_name(name);
    fs::copy(live, &snapshot)?;
    Ok(snapshot)
}

/// Write the JSON restore report next to the live store.
pub fn write_report(report: &RestoreReport, live: &Path) -> anyhow::Result<PathBuf> {
    let path = live.with_extension("restore-report.json");
    let json = serde_json::to_string_pretty(report)?;
    fs::write(&path, json)?;
    Ok(path)
}
