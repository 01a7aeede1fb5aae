use anyhow::Result;
use regex_automata::meta::Regex;
use tracing::debug;

/// Syntactic form of one recognized stats-dump line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineForm {
    /// Bare `name value` line.
    Scalar,
    /// `name::entry value` vector or histogram-bucket line.
    VectorEntry,
    /// `name::(samples|mean|gmean|stdev|total) value` summary-statistic
    /// line. Contributes an entry of the enclosing variable, never a new
    /// variable.
    Summary,
}

/// Result of classifying one line: extracted name, form, optional sub-entry
/// label, and the raw value text. Values stay as text because configuration
/// lines (benchmark names, seeds) are legitimately non-numeric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedLine {
    pub name: String,
    pub form: LineForm,
    pub entry: Option<String>,
    pub value: Option<String>,
}

/// Line-classification grammar for simulator stats dumps.
///
/// Three anchored patterns tried in fixed priority order: summary before
/// vector entry before scalar. All character classes are mutually exclusive
/// (`[A-Za-z_][A-Za-z0-9_.]*` for identifiers, non-space non-`#` for
/// values), so worst-case matching cost is linear in line length and no
/// input can trigger backtracking blowup.
pub struct LineClassifier {
    summary: Regex,
    vector: Regex,
    scalar: Regex,
}

/// Identifier: dotted hierarchical name, never containing `:` so the `::`
/// separator stays unambiguous.
const NAME: &str = r"[A-Za-z_][A-Za-z0-9_.]*";

impl LineClassifier {
    pub fn new() -> Result<Self> {
        debug!("Compiling line classification patterns");

        let summary = Regex::new(&format!(
            r"^({NAME})::(samples|mean|gmean|stdev|total)[ \t]+([^ \t#]+)"
        ))?;
        let vector = Regex::new(&format!(
            r"^({NAME})::([A-Za-z0-9_.:+-]+)[ \t]+([^ \t#]+)"
        ))?;
        let scalar = Regex::new(&format!(r"^({NAME})[ \t]+([^ \t#]+)"))?;

        Ok(Self {
            summary,
            vector,
            scalar,
        })
    }

    /// Classify one line of a stats dump.
    ///
    /// Returns `None` for blank lines, divider lines (leading `-` or `=`),
    /// comment lines (leading `#`), and anything the grammar does not
    /// recognize. Trailing `# description` columns are ignored by the value
    /// character class.
    pub fn classify(&self, line: &str) -> Option<ClassifiedLine> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        match line.as_bytes()[0] {
            b'#' | b'-' | b'=' => return None,
            _ => {}
        }

        if let Some(groups) = capture_groups(&self.summary, line, 3) {
            return Some(ClassifiedLine {
                name: groups[0].to_string(),
                form: LineForm::Summary,
                entry: Some(groups[1].to_string()),
                value: Some(groups[2].to_string()),
            });
        }

        if let Some(groups) = capture_groups(&self.vector, line, 3) {
            return Some(ClassifiedLine {
                name: groups[0].to_string(),
                form: LineForm::VectorEntry,
                entry: Some(groups[1].to_string()),
                value: Some(groups[2].to_string()),
            });
        }

        if let Some(groups) = capture_groups(&self.scalar, line, 2) {
            return Some(ClassifiedLine {
                name: groups[0].to_string(),
                form: LineForm::Scalar,
                entry: None,
                value: Some(groups[1].to_string()),
            });
        }

        None
    }
}

/// Run a compiled pattern and slice out its first `n` capture groups.
fn capture_groups<'h>(re: &Regex, haystack: &'h str, n: usize) -> Option<Vec<&'h str>> {
    let mut caps = re.create_captures();
    re.captures(haystack, &mut caps);
    if !caps.is_match() {
        return None;
    }

    let mut groups = Vec::with_capacity(n);
    for i in 1..=n {
        let span = caps.get_group(i)?;
        groups.push(&haystack[span.start..span.end]);
    }
    Some(groups)
}
