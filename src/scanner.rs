use anyhow::Result;
use std::collections::HashSet;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use crate::classifier::{LineClassifier, LineForm};
use crate::error::PipelineError;
use crate::inventory::FileInventory;

/// Configuration for variable discovery.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Names to reclassify from Scalar to Configuration when observed.
    /// Configuration values (benchmark identifiers, seeds) are metadata,
    /// not measurements, and must stay distinguishable downstream.
    pub config_names: HashSet<String>,
    /// Buffer size for async reading.
    pub buffer_size: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            config_names: HashSet::new(),
            buffer_size: 8192,
        }
    }
}

impl ScannerConfig {
    pub fn with_config_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            config_names: names.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

/// Per-file variable discovery: drives the line classifier over one file
/// at a time to build an inventory of names, inferred kinds, and observed
/// entries, without extracting values.
///
/// One `scan_file` call per file; each call is independent and side-effect
/// free apart from reading its own file, so many calls run concurrently on
/// the work pool.
pub struct StatsScanner {
    classifier: LineClassifier,
    config: ScannerConfig,
}

impl StatsScanner {
    pub fn new(config: ScannerConfig) -> Result<Self> {
        Ok(Self {
            classifier: LineClassifier::new()?,
            config,
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(ScannerConfig::default())
    }

    /// Scan one stats dump into its variable inventory.
    ///
    /// A missing or unreadable file fails this scan only; sibling scans
    /// are unaffected. A file where no line classifies yields an empty,
    /// valid inventory; absence of data is not an error at this layer.
    pub async fn scan_file(&self, path: &Path) -> Result<FileInventory, PipelineError> {
        debug!("Scanning file: {}", path.display());

        let file = File::open(path)
            .await
            .map_err(|source| PipelineError::FileAccess {
                path: path.to_path_buf(),
                source,
            })?;

        let reader = BufReader::with_capacity(self.config.buffer_size, file);
        let mut lines = reader.lines();
        let mut inventory = FileInventory::new(path.to_path_buf());

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(classified) = self.classifier.classify(&line) {
                        let as_config = classified.form == LineForm::Scalar
                            && self.config.config_names.contains(&classified.name);
                        inventory.record(&classified, as_config);
                    }
                }
                Ok(None) => break,
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    // Truncated or non-UTF-8 tail: keep what classified so
                    // far rather than failing the file.
                    warn!("Stopping scan of {} early: {}", path.display(), e);
                    break;
                }
                // A real I/O error mid-read means the file is unreadable,
                // same as a failed open.
                Err(e) => {
                    return Err(PipelineError::FileAccess {
                        path: path.to_path_buf(),
                        source: e,
                    });
                }
            }
        }

        debug!(
            "Scanned {}: {} variables discovered",
            path.display(),
            inventory.len()
        );
        Ok(inventory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::VarKind;
    use std::path::PathBuf;
    use tempfile::TempDir;

    async fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        tokio::fs::write(&path, content).await.unwrap();
        path
    }

    const SAMPLE: &str = "\
---------- Begin Simulation Statistics ----------
sim_seconds 0.002 # Number of seconds simulated
benchmark_name mcf
system.cpu0.ipc 1.5
system.cpu1.ipc 1.2
system.cpu.op_class::IntAlu 44551
system.cpu.op_class::MemRead 12000
system.cpu.latency::mean 42.5
system.cpu.latency::samples 1000

# trailing comment
";

    #[tokio::test]
    async fn test_scan_discovers_variables() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "stats.txt", SAMPLE).await;

        let scanner = StatsScanner::with_defaults().unwrap();
        let inv = scanner.scan_file(&path).await.unwrap();

        assert_eq!(inv.vars()["sim_seconds"].kind, VarKind::Scalar);
        assert_eq!(inv.vars()["system.cpu0.ipc"].kind, VarKind::Scalar);

        let op_class = &inv.vars()["system.cpu.op_class"];
        assert_eq!(op_class.kind, VarKind::Vector);
        assert!(op_class.entries.contains("IntAlu"));
        assert!(op_class.entries.contains("MemRead"));

        let latency = &inv.vars()["system.cpu.latency"];
        assert_eq!(latency.kind, VarKind::Summary);
        assert!(latency.entries.contains("mean"));
    }

    #[tokio::test]
    async fn test_scan_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "stats.txt", SAMPLE).await;

        let scanner = StatsScanner::with_defaults().unwrap();
        let first = scanner.scan_file(&path).await.unwrap();
        let second = scanner.scan_file(&path).await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_config_name_reclassification() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "stats.txt", SAMPLE).await;

        let scanner =
            StatsScanner::new(ScannerConfig::with_config_names(["benchmark_name"])).unwrap();
        let inv = scanner.scan_file(&path).await.unwrap();

        assert_eq!(inv.vars()["benchmark_name"].kind, VarKind::Configuration);
        // Non-hinted scalars untouched
        assert_eq!(inv.vars()["sim_seconds"].kind, VarKind::Scalar);
    }

    #[tokio::test]
    async fn test_missing_file_is_scoped_error() {
        let dir = TempDir::new().unwrap();
        let scanner = StatsScanner::with_defaults().unwrap();

        let err = scanner
            .scan_file(&dir.path().join("nope.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::FileAccess { .. }));
    }

    #[tokio::test]
    async fn test_unclassifiable_file_yields_empty_inventory() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "stats.txt", "!!! not a stats dump\n<<garbage>>\n").await;

        let scanner = StatsScanner::with_defaults().unwrap();
        let inv = scanner.scan_file(&path).await.unwrap();
        assert!(inv.is_empty());
    }

    #[tokio::test]
    async fn test_mid_read_io_error_is_file_access() {
        // Reading a directory as a file fails after (or at) open; the
        // error must surface as FileAccess, never as a silently partial
        // inventory.
        let dir = TempDir::new().unwrap();
        let scanner = StatsScanner::with_defaults().unwrap();

        let err = scanner.scan_file(dir.path()).await.unwrap_err();
        assert!(matches!(err, PipelineError::FileAccess { .. }));
    }

    #[tokio::test]
    async fn test_invalid_utf8_tail_keeps_prefix() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats.txt");
        let mut bytes = b"system.cpu.ipc 1.5\n".to_vec();
        bytes.extend_from_slice(&[0xFF, 0xFE, 0xFD]);
        tokio::fs::write(&path, bytes).await.unwrap();

        let scanner = StatsScanner::with_defaults().unwrap();
        let inv = scanner.scan_file(&path).await.unwrap();
        assert!(inv.vars().contains_key("system.cpu.ipc"));
    }
}
