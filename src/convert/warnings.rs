//! Diagnostics for the dump translation pipeline.
//!
//! Translation is best-effort: a statement or COPY row that cannot be
//! converted is recorded here and processing continues.

/// A single non-fatal issue found while translating a dump.
#[derive(Debug, Clone, PartialEq)]
pub enum TranslationWarning {
    /// A statement kind the target engine cannot execute was dropped.
    DiscardedStatement {
        reason: String,
        statement_preview: String,
    },
    /// A partial-index predicate was removed; the unfiltered index was kept.
    PartialIndexPredicateDropped { index: String },
    /// A COPY row did not match the declared column count and was skipped.
    MalformedCopyRow {
        table: String,
        line: usize,
        expected: usize,
        found: usize,
    },
    /// A translated statement failed to execute against the staging store.
    StatementFailed { error: String, statement_preview: String },
}

impl std::fmt::Display for TranslationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranslationWarning::DiscardedStatement {
                reason,
                statement_preview,
            } => write!(f, "Discarded: {} ({})", reason, statement_preview),
            TranslationWarning::PartialIndexPredicateDropped { index } => write!(
                f,
                "Partial index predicate on '{}' is not representable; emitted unfiltered index",
                index
            ),
            TranslationWarning::MalformedCopyRow {
                table,
                line,
                expected,
                found,
            } => write!(
                f,
                "Skipped malformed row for table '{}' at line {}: expected {} fields, found {}",
                table, line, expected, found
            ),
            TranslationWarning::StatementFailed {
                error,
                statement_preview,
            } => write!(f, "Statement failed: {} ({})", error, statement_preview),
        }
    }
}

/// Collects warnings, deduplicating repeats and capping memory use.
#[derive(Debug, Default)]
pub struct WarningCollector {
    warnings: Vec<TranslationWarning>,
    max_warnings: usize,
    dropped: usize,
}

impl WarningCollector {
    pub fn new() -> Self {
        Self {
            warnings: Vec::new(),
            max_warnings: 200,
            dropped: 0,
        }
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            warnings: Vec::new(),
            max_warnings: limit,
            dropped: 0,
        }
    }

    pub fn add(&mut self, warning: TranslationWarning) {
        if self.warnings.len() < self.max_warnings {
            if !self.warnings.iter().any(|w| Self::is_similar(w, &warning)) {
                self.warnings.push(warning);
            }
        } else {
            self.dropped += 1;
        }
    }

    fn is_similar(a: &TranslationWarning, b: &TranslationWarning) -> bool {
        match (a, b) {
            (
                TranslationWarning::DiscardedStatement { reason: r1, .. },
                TranslationWarning::DiscardedStatement { reason: r2, .. },
            ) => r1 == r2,
            (
                TranslationWarning::PartialIndexPredicateDropped { index: i1 },
                TranslationWarning::PartialIndexPredicateDropped { index: i2 },
            ) => i1 == i2,
            _ => false,
        }
    }

    pub fn warnings(&self) -> &[TranslationWarning] {
        &self.warnings
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn count(&self) -> usize {
        self.warnings.len()
    }

    pub fn print_summary(&self) {
        if self.warnings.is_empty() {
            return;
        }
        eprintln!("\nTranslation warnings ({}):", self.warnings.len());
        for warning in &self.warnings {
            eprintln!("  ⚠ {}", warning);
        }
        if self.dropped > 0 {
            eprintln!("  ... ({} additional warnings truncated)", self.dropped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deduplicates_discards_with_same_reason() {
        let mut collector = WarningCollector::new();
        for _ in 0..3 {
            collector.add(TranslationWarning::DiscardedStatement {
                reason: "sequence object".to_string(),
                statement_preview: "CREATE SEQUENCE ...".to_string(),
            });
        }
        assert_eq!(collector.count(), 1);
    }

    #[test]
    fn malformed_rows_are_kept_individually() {
        let mut collector = WarningCollector::new();
        for line in 1..=3 {
            collector.add(TranslationWarning::MalformedCopyRow {
                table: "clients".to_string(),
                line,
                expected: 2,
                found: 1,
            });
        }
        assert_eq!(collector.count(), 3);
    }

    #[test]
    fn respects_limit() {
        let mut collector = WarningCollector::with_limit(2);
        for line in 0..5 {
            collector.add(TranslationWarning::MalformedCopyRow {
                table: "t".to_string(),
                line,
                expected: 3,
                found: 2,
            });
        }
        assert_eq!(collector.count(), 2);
    }
}
