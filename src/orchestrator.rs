use anyhow::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::aggregator;
use crate::classifier::LineClassifier;
use crate::dataset::{ConsolidatedDataset, DataFragment};
use crate::discovery;
use crate::error::PipelineError;
use crate::inventory::{FileInventory, VariableCatalog};
use crate::pool::{TaskFailure, WorkPool};
use crate::scanner::StatsScanner;

/// One variable selection resolved against the catalog: either a single
/// literal variable, or a pattern variable expanded into its concrete
/// member names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableGroup {
    /// Catalog name of the selection (literal or pattern).
    pub selection: String,
    /// Concrete variable name to extract -> base column name. Literal
    /// selections map to themselves; pattern members map to
    /// `pattern..index`. Entry-bearing lines append a further `..entry`.
    pub targets: BTreeMap<String, String>,
}

/// One unit of parse work: extract one variable group from one file.
/// Created by selection expansion, executed exactly once on the pool,
/// terminating in a fragment or a failure-report entry.
#[derive(Debug, Clone)]
pub struct ParseTask {
    pub file: PathBuf,
    pub run_id: String,
    pub group: VariableGroup,
}

/// Result of a parse batch: the consolidated dataset (absent when zero
/// tasks succeeded) plus one failure entry per task that did not complete.
#[derive(Debug)]
pub struct ParseOutcome {
    pub dataset: Option<ConsolidatedDataset>,
    pub failures: Vec<TaskFailure>,
}

/// Result of a scan batch: the aggregated catalog, the file set it came
/// from (reused by the parse phase), and per-file scan failures.
#[derive(Debug)]
pub struct ScanReport {
    pub catalog: VariableCatalog,
    pub files: Vec<PathBuf>,
    pub failures: Vec<TaskFailure>,
}

/// Expand a user selection into parse tasks, one per (file, group) pair.
///
/// Literal selections must exist in the catalog. Pattern selections
/// resolve through the pattern descriptor's member map, which is exactly
/// why the catalog is a required input here. A pattern may resolve to
/// members absent from a given file; that file's task then yields a
/// sparse (or empty) fragment, not an error.
pub fn expand_selection(
    selection: &[String],
    files: &[PathBuf],
    root: &Path,
    catalog: &VariableCatalog,
) -> Result<Vec<ParseTask>, PipelineError> {
    let mut groups = Vec::with_capacity(selection.len());
    for name in selection {
        let descriptor = catalog
            .get(name)
            .ok_or_else(|| PipelineError::UnknownVariable { name: name.clone() })?;

        let mut targets = BTreeMap::new();
        if descriptor.is_pattern() {
            for (index, member) in &descriptor.members {
                targets.insert(member.clone(), format!("{name}..{index}"));
            }
        } else {
            targets.insert(name.clone(), name.clone());
        }
        groups.push(VariableGroup {
            selection: name.clone(),
            targets,
        });
    }

    let mut tasks = Vec::with_capacity(files.len() * groups.len());
    for file in files {
        let run_id = discovery::run_id(root, file);
        for group in &groups {
            tasks.push(ParseTask {
                file: file.clone(),
                run_id: run_id.clone(),
                group: group.clone(),
            });
        }
    }

    debug!(
        "Expanded {} selections over {} files into {} parse tasks",
        selection.len(),
        files.len(),
        tasks.len()
    );
    Ok(tasks)
}

/// Re-read and re-classify one file, extracting values for the assigned
/// variable group only.
async fn extract_fragment(
    classifier: Arc<LineClassifier>,
    task: ParseTask,
) -> Result<DataFragment, PipelineError> {
    let file = File::open(&task.file)
        .await
        .map_err(|source| PipelineError::FileAccess {
            path: task.file.clone(),
            source,
        })?;

    let mut fragment = DataFragment::new(task.run_id);
    let reader = BufReader::new(file);
    let mut lines = reader.lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let Some(classified) = classifier.classify(&line) else {
                    continue;
                };
                let Some(base) = task.group.targets.get(&classified.name) else {
                    continue;
                };
                let Some(value) = classified.value else {
                    continue;
                };
                let column = match &classified.entry {
                    Some(entry) => format!("{base}..{entry}"),
                    None => base.clone(),
                };
                // A dump may contain several simulation sections; the
                // last observation wins, matching a plain re-read.
                fragment.cells.insert(column, value);
            }
            Ok(None) => break,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                // Non-UTF-8 tail: keep the values extracted so far.
                warn!(
                    "Stopping extraction from {} early: {}",
                    task.file.display(),
                    e
                );
                break;
            }
            // A real I/O error mid-read means the file is unreadable,
            // same as a failed open.
            Err(e) => {
                return Err(PipelineError::FileAccess {
                    path: task.file.clone(),
                    source: e,
                });
            }
        }
    }

    Ok(fragment)
}

/// Parse-phase orchestrator: runs extraction tasks on a work pool and
/// merges their fragments into one consolidated dataset.
pub struct ParseOrchestrator {
    classifier: Arc<LineClassifier>,
}

impl ParseOrchestrator {
    pub fn new() -> Result<Self> {
        Ok(Self {
            classifier: Arc::new(LineClassifier::new()?),
        })
    }

    /// Execute one batch of parse tasks.
    ///
    /// Individual task failures (unreadable file, timeout) end up in the
    /// failure report; awaiting the batch only fails on structural errors
    /// (a schema merge conflict between fragments). Zero successful tasks
    /// yields `dataset: None` alongside the report.
    pub async fn parse_batch(
        &self,
        pool: &WorkPool,
        tasks: Vec<ParseTask>,
    ) -> Result<ParseOutcome, PipelineError> {
        if tasks.is_empty() {
            return Err(PipelineError::EmptyBatch(
                "no parse tasks to run".to_string(),
            ));
        }

        let total = tasks.len();
        let classifier = Arc::clone(&self.classifier);
        let (fragments, failures) = pool
            .run_batch(
                tasks,
                |t| (t.file.display().to_string(), t.group.selection.clone()),
                move |t| {
                    let classifier = Arc::clone(&classifier);
                    extract_fragment(classifier, t)
                },
            )
            .await;

        if fragments.is_empty() {
            warn!("All {} parse tasks failed", total);
            return Ok(ParseOutcome {
                dataset: None,
                failures,
            });
        }

        let mut dataset = ConsolidatedDataset::new();
        for fragment in fragments {
            dataset.merge_fragment(fragment)?;
        }

        info!(
            "Parse batch complete: {} rows x {} columns, {} failures",
            dataset.row_count(),
            dataset.column_count(),
            failures.len()
        );
        Ok(ParseOutcome {
            dataset: Some(dataset),
            failures,
        })
    }
}

/// Scan a fixed file set concurrently, one inventory per readable file.
pub async fn scan_files(
    pool: &WorkPool,
    scanner: Arc<StatsScanner>,
    files: Vec<PathBuf>,
) -> (Vec<FileInventory>, Vec<TaskFailure>) {
    pool.run_batch(
        files,
        |p| (p.display().to_string(), "scan".to_string()),
        move |p| {
            let scanner = Arc::clone(&scanner);
            async move { scanner.scan_file(&p).await }
        },
    )
    .await
}

/// Discover, scan, and aggregate one directory tree into a variable
/// catalog. `limit` caps the number of files scanned for quick previews.
pub async fn scan_directory(
    pool: &WorkPool,
    scanner: Arc<StatsScanner>,
    root: &Path,
    pattern: &str,
    limit: usize,
) -> Result<ScanReport> {
    let files = discovery::discover_stats_files(root, pattern, limit).await?;
    let (inventories, failures) = scan_files(pool, scanner, files.clone()).await;

    if inventories.is_empty() {
        anyhow::bail!(PipelineError::EmptyBatch(format!(
            "all {} scan tasks failed",
            files.len()
        )));
    }

    let catalog = aggregator::aggregate(&inventories);
    Ok(ScanReport {
        catalog,
        files,
        failures,
    })
}

/// Full pipeline: scan a directory tree, resolve the selection against
/// the resulting catalog, and extract it into one consolidated dataset.
pub async fn parse_directory(
    pool: &WorkPool,
    scanner: Arc<StatsScanner>,
    root: &Path,
    pattern: &str,
    selection: &[String],
) -> Result<(ParseOutcome, VariableCatalog)> {
    let report = scan_directory(pool, scanner, root, pattern, 0).await?;
    let tasks = expand_selection(selection, &report.files, root, &report.catalog)?;

    let orchestrator = ParseOrchestrator::new()?;
    let outcome = orchestrator.parse_batch(pool, tasks).await?;
    Ok((outcome, report.catalog))
}

/// Persist the failure report beside the dataset artifact.
pub async fn write_failure_report(path: &Path, failures: &[TaskFailure]) -> Result<()> {
    let json = serde_json::to_string_pretty(failures)?;
    tokio::fs::write(path, json).await?;
    info!(
        "Wrote failure report with {} entries to {}",
        failures.len(),
        path.display()
    );
    Ok(())
}
