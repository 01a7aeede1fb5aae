use anyhow::Result;
use glob::glob;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Discover stats-dump files under `root` whose file name matches
/// `pattern` (e.g. `stats.txt` or `stats*.txt`), searched recursively.
///
/// `limit` caps the number of files returned for quick preview scans;
/// `0` means unlimited. Paths come back sorted so batch composition is
/// deterministic regardless of filesystem iteration order.
pub async fn discover_stats_files(
    root: impl AsRef<Path>,
    pattern: &str,
    limit: usize,
) -> Result<Vec<PathBuf>> {
    let root = root.as_ref();
    if !root.is_dir() {
        anyhow::bail!("stats directory does not exist: {}", root.display());
    }

    let glob_pattern = format!("{}/**/{}", root.display(), pattern);
    debug!("Starting file discovery with pattern: {}", glob_pattern);

    let mut files = Vec::new();
    for entry in glob(&glob_pattern)? {
        match entry {
            Ok(path) => match fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => files.push(path),
                Ok(_) => debug!("Skipping non-file match: {}", path.display()),
                Err(e) => warn!("Cannot access {}: {}", path.display(), e),
            },
            Err(e) => warn!("Glob iteration error (continuing): {}", e),
        }
    }

    files.sort();
    if limit > 0 && files.len() > limit {
        debug!("Limiting scan to first {} of {} files", limit, files.len());
        files.truncate(limit);
    }

    if files.is_empty() {
        anyhow::bail!(
            "no files matching '{}' found under {}",
            pattern,
            root.display()
        );
    }

    info!("Discovered {} stats files", files.len());
    Ok(files)
}

/// Row-grouping key for one stats file: the run directory relative to the
/// batch root (one run per directory in the usual simulator layout), or
/// the file stem for files sitting directly in the root.
pub fn run_id(root: &Path, file: &Path) -> String {
    let rel = file.strip_prefix(root).unwrap_or(file);
    match rel.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            parent.to_string_lossy().replace('\\', "/")
        }
        _ => rel
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| rel.to_string_lossy().into_owned()),
    }
}
