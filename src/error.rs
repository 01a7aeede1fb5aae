use std::path::PathBuf;
use thiserror::Error;

/// Error classes the pipeline distinguishes.
///
/// Per-file and per-task errors (`FileAccess`, `TaskTimeout`) are collected
/// into the batch failure report and never abort sibling tasks. Only
/// structural errors (`SchemaMergeConflict`) are fatal for a whole batch.
/// A line that matches no grammar rule is not an error at all; stats dumps
/// legitimately contain non-metric text.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// File missing or unreadable. Scoped to the one task touching it.
    #[error("cannot access {path}: {source}")]
    FileAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A task exceeded its individual timeout budget.
    #[error("task timed out after {seconds}s")]
    TaskTimeout { seconds: u64 },

    /// A selected variable does not exist in the catalog. Caller error at
    /// selection-expansion time, before any task runs.
    #[error("unknown variable: {name}")]
    UnknownVariable { name: String },

    /// Two fragments disagree on the value of one (run, column) cell.
    /// Silently merging semantically different columns would corrupt the
    /// dataset, so the batch halts and reports instead of guessing.
    #[error("schema merge conflict for run '{run}' column '{column}': '{left}' vs '{right}'")]
    SchemaMergeConflict {
        run: String,
        column: String,
        left: String,
        right: String,
    },

    /// Nothing to do: no input files, or zero tasks succeeded.
    #[error("{0}")]
    EmptyBatch(String),
}
