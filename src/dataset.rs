use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info};

use crate::error::PipelineError;

/// Placeholder for an explicitly missing cell in the persisted artifact.
const MISSING: &str = "NaN";

/// Append one field to a CSV record, quoting when the value contains the
/// delimiter or a quote. Values never contain line breaks (the classifier
/// rejects whitespace in values and run ids are path segments), so the
/// artifact stays line-oriented.
fn push_field(out: &mut String, value: &str) {
    if value.contains([',', '"']) {
        out.push('"');
        for c in value.chars() {
            if c == '"' {
                out.push('"');
            }
            out.push(c);
        }
        out.push('"');
    } else {
        out.push_str(value);
    }
}

/// Split one CSV record into fields, honoring quoted fields with doubled
/// quotes. Always yields at least one field.
fn split_record(line: &str) -> Result<Vec<String>> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                c => field.push(c),
            }
        } else {
            match c {
                '"' if field.is_empty() => in_quotes = true,
                ',' => fields.push(std::mem::take(&mut field)),
                c => field.push(c),
            }
        }
    }
    if in_quotes {
        anyhow::bail!("unterminated quoted field in record: {line}");
    }
    fields.push(field);
    Ok(fields)
}

/// Tabular slice produced by one successful parse task: the cells
/// extracted for one variable group from one file, keyed by the file's
/// run identifier. Owned by its task until the merge step consumes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFragment {
    pub run_id: String,
    /// Column name -> raw value text.
    pub cells: BTreeMap<String, String>,
}

impl DataFragment {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            cells: BTreeMap::new(),
        }
    }
}

/// The consolidated output table: one row per run, one column per
/// resolved concrete variable/entry. Schema is stable: the column set is
/// the union over all fragments and missing cells stay explicitly
/// missing, never silently omitted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConsolidatedDataset {
    columns: BTreeSet<String>,
    rows: BTreeMap<String, BTreeMap<String, String>>,
}

impl ConsolidatedDataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one fragment by full outer join on the run key.
    ///
    /// Merging is a union: commutative and associative, so task completion
    /// order never affects the final table. Two fragments writing
    /// different values into the same (run, column) cell means the column
    /// name is semantically overloaded, which is fatal for the batch.
    pub fn merge_fragment(&mut self, fragment: DataFragment) -> Result<(), PipelineError> {
        let row = self.rows.entry(fragment.run_id.clone()).or_default();
        for (column, value) in fragment.cells {
            match row.get(&column) {
                Some(existing) if *existing != value => {
                    return Err(PipelineError::SchemaMergeConflict {
                        run: fragment.run_id,
                        column,
                        left: existing.clone(),
                        right: value,
                    });
                }
                Some(_) => {}
                None => {
                    self.columns.insert(column.clone());
                    row.insert(column, value);
                }
            }
        }
        Ok(())
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(String::as_str)
    }

    pub fn run_ids(&self) -> impl Iterator<Item = &str> {
        self.rows.keys().map(String::as_str)
    }

    /// Cell lookup; `None` is an explicitly missing value.
    pub fn get(&self, run: &str, column: &str) -> Option<&str> {
        self.rows.get(run)?.get(column).map(String::as_str)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Serialize to the delimited artifact: header `run,<col>,...`, one
    /// row per run, missing cells rendered as `NaN`. Delimiter-bearing
    /// values (configuration text, run directories with commas) are
    /// quoted so the reload stays lossless.
    pub fn to_csv_string(&self) -> String {
        let mut out = String::new();
        out.push_str("run");
        for column in &self.columns {
            out.push(',');
            push_field(&mut out, column);
        }
        out.push('\n');

        for (run, cells) in &self.rows {
            push_field(&mut out, run);
            for column in &self.columns {
                out.push(',');
                push_field(
                    &mut out,
                    cells.get(column).map(String::as_str).unwrap_or(MISSING),
                );
            }
            out.push('\n');
        }
        out
    }

    /// Reload the persisted artifact into the same logical table. `NaN`
    /// cells come back as explicitly missing, so serialize/load round
    /// trips losslessly up to the missing-value representation.
    pub fn from_csv_str(text: &str) -> Result<Self> {
        let mut lines = text.lines();
        let header = lines.next().context("dataset artifact is empty")?;
        let header_fields = split_record(header)?;
        let (key_field, columns) = header_fields
            .split_first()
            .context("dataset artifact has an empty header")?;
        if key_field != "run" {
            anyhow::bail!("unexpected artifact header: first column is '{key_field}', not 'run'");
        }

        let mut dataset = Self::new();
        dataset.columns = columns.iter().cloned().collect();

        for (line_no, line) in lines.enumerate() {
            if line.is_empty() {
                continue;
            }
            let fields = split_record(line)?;
            if fields.len() != columns.len() + 1 {
                anyhow::bail!(
                    "data line {} has {} fields, expected {}",
                    line_no + 2,
                    fields.len(),
                    columns.len() + 1
                );
            }
            let mut fields = fields.into_iter();
            let run = fields
                .next()
                .with_context(|| format!("missing run key on data line {}", line_no + 2))?;

            let mut cells = BTreeMap::new();
            for (column, value) in columns.iter().zip(fields) {
                if value != MISSING {
                    cells.insert(column.clone(), value);
                }
            }
            dataset.rows.insert(run, cells);
        }

        Ok(dataset)
    }

    /// Write the artifact with buffered async I/O.
    pub async fn write_csv(&self, path: &Path) -> Result<()> {
        debug!("Writing dataset to {}", path.display());
        let file = tokio::fs::File::create(path)
            .await
            .with_context(|| format!("cannot create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        writer.write_all(self.to_csv_string().as_bytes()).await?;
        writer.flush().await?;

        info!(
            "Wrote dataset: {} rows x {} columns to {}",
            self.row_count(),
            self.column_count(),
            path.display()
        );
        Ok(())
    }

    pub async fn read_csv(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("cannot read {}", path.display()))?;
        Self::from_csv_str(&text)
    }
}
