use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::classifier::{ClassifiedLine, LineForm};

/// Refined kind of a discovered variable. Widening-only: evidence can move
/// a kind up the lattice (Scalar -> Vector -> Distribution), never back
/// down, regardless of the order lines are observed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarKind {
    Scalar,
    /// Seen only through `::samples`/`::mean`-style lines so far.
    Summary,
    Vector,
    Distribution,
    /// Metadata (benchmark identifier, seed), not a measurement. Assigned
    /// through the caller-supplied known-configuration-name hint.
    Configuration,
}

impl VarKind {
    /// Combine two pieces of kind evidence for the same name.
    ///
    /// Returns the widened kind plus a flag for evidence that cannot be
    /// reconciled cleanly (a configuration name also observed as an
    /// entry-bearing variable). Conflicts resolve by widening, never by
    /// discarding; the flag becomes a warning on the descriptor.
    pub fn widen(self, other: VarKind) -> (VarKind, bool) {
        use VarKind::*;
        if self == other {
            return (self, false);
        }
        match (self, other) {
            // The hint wins over plain scalar evidence.
            (Configuration, Scalar) | (Scalar, Configuration) => (Configuration, false),
            // A config name with vector/distribution evidence is a conflict;
            // take the wider kind and warn.
            (Configuration, k) | (k, Configuration) => (k, true),
            (Scalar, k) | (k, Scalar) => (k, false),
            // Summary statistics plus plain entries means a distribution.
            (Summary, _) | (_, Summary) => (Distribution, false),
            // Only Vector/Distribution mixes remain.
            _ => (Distribution, false),
        }
    }

    /// Kinds whose values are addressed through sub-entries.
    pub fn has_entries(self) -> bool {
        matches!(self, VarKind::Vector | VarKind::Distribution | VarKind::Summary)
    }
}

/// One discoverable metric: dotted name (possibly containing a `\d+`
/// wildcard after aggregation), refined kind, and the set of known
/// sub-entry labels or observed pattern indices.
///
/// Constructed only through `new` + `observe`/`merge`, so every kind
/// transition goes through the widening function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDescriptor {
    pub name: String,
    pub kind: VarKind,
    #[serde(skip_serializing_if = "BTreeSet::is_empty", default)]
    pub entries: BTreeSet<String>,
    /// Pattern descriptors only: observed index tuple -> concrete member
    /// name (`"2" -> "system.cpu2.ipc"`). Used to resolve a pattern
    /// selection back into literal names at parse time.
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub members: BTreeMap<String, String>,
    /// Warning for irreconcilable kind evidence; parsing proceeds with the
    /// widened kind.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub conflict: Option<String>,
}

impl VariableDescriptor {
    pub fn new(name: impl Into<String>, kind: VarKind) -> Self {
        Self {
            name: name.into(),
            kind,
            entries: BTreeSet::new(),
            members: BTreeMap::new(),
            conflict: None,
        }
    }

    /// Whether this descriptor came out of pattern aggregation.
    pub fn is_pattern(&self) -> bool {
        !self.members.is_empty()
    }

    /// Widen the kind with new evidence, recording a warning on conflict.
    pub fn widen_to(&mut self, evidence: VarKind) {
        let (widened, conflicted) = self.kind.widen(evidence);
        if conflicted && self.conflict.is_none() {
            self.conflict = Some(format!(
                "irreconcilable kind evidence for '{}': {:?} vs {:?}, widened to {:?}",
                self.name, self.kind, evidence, widened
            ));
        }
        self.kind = widened;
    }

    /// Fold one classified line into this descriptor.
    pub fn observe(&mut self, evidence: VarKind, entry: Option<&str>) {
        self.widen_to(evidence);
        if let Some(entry) = entry {
            self.entries.insert(entry.to_string());
        }
    }

    /// Union another descriptor for the same name: widen kind, union
    /// entries and members. Never overwrites.
    pub fn merge(&mut self, other: &VariableDescriptor) {
        self.widen_to(other.kind);
        self.entries.extend(other.entries.iter().cloned());
        for (id, member) in &other.members {
            self.members.entry(id.clone()).or_insert_with(|| member.clone());
        }
        if self.conflict.is_none() {
            self.conflict = other.conflict.clone();
        }
    }
}

/// Variable inventory of a single scanned file. Built by one scanner
/// invocation, immutable once the scan returns.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInventory {
    path: PathBuf,
    vars: BTreeMap<String, VariableDescriptor>,
}

impl FileInventory {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            vars: BTreeMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record one classified line. `as_config` reclassifies a scalar line
    /// whose name matched the known-configuration-names hint.
    pub fn record(&mut self, line: &ClassifiedLine, as_config: bool) {
        let evidence = if as_config {
            VarKind::Configuration
        } else {
            match line.form {
                LineForm::Scalar => VarKind::Scalar,
                LineForm::VectorEntry => VarKind::Vector,
                LineForm::Summary => VarKind::Summary,
            }
        };

        self.vars
            .entry(line.name.clone())
            .or_insert_with(|| VariableDescriptor::new(line.name.clone(), evidence))
            .observe(evidence, line.entry.as_deref());
    }

    pub fn vars(&self) -> &BTreeMap<String, VariableDescriptor> {
        &self.vars
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Aggregated, de-duplicated inventory of every discoverable variable
/// across a batch of files. Read-only once handed to the parse
/// orchestrator.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VariableCatalog {
    vars: BTreeMap<String, VariableDescriptor>,
}

impl VariableCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or union a descriptor. Collisions between inventories widen
    /// kind and union entries, never overwrite.
    pub fn absorb(&mut self, descriptor: VariableDescriptor) {
        match self.vars.get_mut(&descriptor.name) {
            Some(existing) => existing.merge(&descriptor),
            None => {
                self.vars.insert(descriptor.name.clone(), descriptor);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&VariableDescriptor> {
        self.vars.get(name)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &VariableDescriptor> {
        self.vars.values()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}
