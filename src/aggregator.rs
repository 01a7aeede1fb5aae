use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::inventory::{FileInventory, VarKind, VariableCatalog, VariableDescriptor};

/// Wildcard token substituted for each aggregated digit run.
const WILDCARD: &str = r"\d+";

/// Intermediate grouping during aggregation: one wildcarded template and
/// every (index-tuple, concrete name) pair observed for it. Collapses into
/// a single pattern descriptor when at least two distinct tuples exist.
#[derive(Debug, Default)]
struct PatternFamily {
    /// Index tuple (multi-run tuples joined with `_`) -> concrete name.
    members: BTreeMap<String, String>,
}

/// Locate maximal decimal-digit runs in `name` that follow an identifier
/// character, returning the template (runs replaced by `{}`) and the digit
/// strings in order. `None` when the name has no such run.
///
/// Digit runs after `.` separators are left alone; only component indices
/// like `cpu0` or `l0_cntrl1` aggregate.
fn numeric_template(name: &str) -> Option<(String, Vec<String>)> {
    let bytes = name.as_bytes();
    let mut template = String::with_capacity(name.len());
    let mut digits = Vec::new();
    let mut prev: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        let after_ident = prev.is_some_and(|p| p.is_ascii_alphabetic() || p == b'_');
        if b.is_ascii_digit() && after_ident {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            template.push_str("{}");
            digits.push(name[start..i].to_string());
            prev = Some(b);
        } else {
            template.push(b as char);
            prev = Some(b);
            i += 1;
        }
    }

    if digits.is_empty() {
        None
    } else {
        Some((template, digits))
    }
}

/// Consolidate the per-file inventories of a batch into the final variable
/// catalog, collapsing families of names that differ only in embedded
/// numeric indices into pattern variables.
///
/// Every digit run in a name is wildcarded simultaneously, so
/// independently varying nested indices (`ring.node3.link1`) aggregate on
/// all of them at once; the entry set then holds index tuples. A template
/// observed with a single index combination stays literal; a genuinely
/// singular metric is never collapsed into a spurious pattern.
pub fn aggregate(inventories: &[FileInventory]) -> VariableCatalog {
    // Union all inventories first; literal collisions widen and union.
    let mut merged: BTreeMap<String, VariableDescriptor> = BTreeMap::new();
    for inventory in inventories {
        for (name, var) in inventory.vars() {
            match merged.get_mut(name) {
                Some(existing) => existing.merge(var),
                None => {
                    merged.insert(name.clone(), var.clone());
                }
            }
        }
    }

    let raw_count = merged.len();
    let mut families: BTreeMap<String, PatternFamily> = BTreeMap::new();
    let mut literal_names: Vec<String> = Vec::new();

    for name in merged.keys() {
        match numeric_template(name) {
            Some((template, digits)) => {
                families
                    .entry(template)
                    .or_default()
                    .members
                    .insert(digits.join("_"), name.clone());
            }
            None => literal_names.push(name.clone()),
        }
    }

    let mut catalog = VariableCatalog::new();

    for (template, family) in families {
        if family.members.len() < 2 {
            // Single combination: not a pattern after all.
            literal_names.extend(family.members.into_values());
            continue;
        }

        let pattern_name = template.replace("{}", WILDCARD);
        debug!(
            "Aggregating {} names into pattern: {}",
            family.members.len(),
            pattern_name
        );

        let mut descriptor = VariableDescriptor::new(&pattern_name, VarKind::Scalar);
        for (id, member_name) in &family.members {
            let member = &merged[member_name];
            descriptor.widen_to(member.kind);
            if descriptor.conflict.is_none() {
                descriptor.conflict = member.conflict.clone();
            }
            descriptor.entries.insert(id.clone());
            descriptor.members.insert(id.clone(), member_name.clone());
        }
        // The pattern addresses its members through indices, so a family
        // of scalars widens to a vector.
        descriptor.widen_to(VarKind::Vector);

        catalog.absorb(descriptor);
    }

    let literal_count = literal_names.len();
    for name in literal_names {
        if let Some(var) = merged.remove(&name) {
            catalog.absorb(var);
        }
    }

    info!(
        "Aggregated {} raw variables into {} catalog entries ({} literal)",
        raw_count,
        catalog.len(),
        literal_count
    );
    catalog
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::LineClassifier;
    use std::path::PathBuf;

    fn inventory(file: &str, lines: &[&str]) -> FileInventory {
        let classifier = LineClassifier::new().unwrap();
        let mut inv = FileInventory::new(PathBuf::from(file));
        for line in lines {
            inv.record(&classifier.classify(line).unwrap(), false);
        }
        inv
    }

    #[test]
    fn test_numeric_template_extraction() {
        assert_eq!(
            numeric_template("system.cpu0.ipc"),
            Some(("system.cpu{}.ipc".to_string(), vec!["0".to_string()]))
        );
        assert_eq!(
            numeric_template("ring.node3.link17"),
            Some((
                "ring.node{}.link{}".to_string(),
                vec!["3".to_string(), "17".to_string()]
            ))
        );
        assert_eq!(numeric_template("sim_seconds"), None);
        // A digit after a dot is not a component index
        assert_eq!(
            numeric_template("a.0b3"),
            Some(("a.0b{}".to_string(), vec!["3".to_string()]))
        );
    }

    #[test]
    fn test_sibling_scalars_aggregate_exactly() {
        let inv_a = inventory("run0/stats.txt", &["cpu0.ipc 1.5", "cpu1.ipc 1.2"]);
        let inv_b = inventory(
            "run1/stats.txt",
            &["cpu0.ipc 1.7", "cpu1.ipc 1.3", "cpu2.ipc 1.1"],
        );

        let catalog = aggregate(&[inv_a, inv_b]);

        let pattern = catalog.get(r"cpu\d+.ipc").expect("pattern variable");
        assert_eq!(pattern.kind, VarKind::Vector);
        let entries: Vec<&str> = pattern.entries.iter().map(String::as_str).collect();
        assert_eq!(entries, vec!["0", "1", "2"]);
        assert_eq!(pattern.members["2"], "cpu2.ipc");

        // The literal siblings are gone from the catalog
        assert!(catalog.get("cpu0.ipc").is_none());
        assert!(catalog.get("cpu1.ipc").is_none());
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_single_name_never_aggregates() {
        let inv = inventory("stats.txt", &["system.l2cache0.miss_rate 0.02"]);
        let catalog = aggregate(&[inv]);

        assert!(catalog.get("system.l2cache0.miss_rate").is_some());
        assert!(catalog.get(r"system.l2cache\d+.miss_rate").is_none());
    }

    #[test]
    fn test_multi_segment_indices_aggregate_together() {
        let inv = inventory(
            "stats.txt",
            &[
                "ring.node3.link1.flits 10",
                "ring.node3.link2.flits 11",
                "ring.node4.link1.flits 12",
            ],
        );
        let catalog = aggregate(&[inv]);

        let pattern = catalog.get(r"ring.node\d+.link\d+.flits").expect("pattern");
        let entries: Vec<&str> = pattern.entries.iter().map(String::as_str).collect();
        assert_eq!(entries, vec!["3_1", "3_2", "4_1"]);
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_vector_members_keep_vector_kind() {
        let inv = inventory(
            "stats.txt",
            &[
                "cpu0.op_class::IntAlu 5",
                "cpu1.op_class::IntAlu 7",
                "cpu1.op_class::MemRead 2",
            ],
        );
        let catalog = aggregate(&[inv]);

        let pattern = catalog.get(r"cpu\d+.op_class").expect("pattern");
        assert_eq!(pattern.kind, VarKind::Vector);
        assert!(pattern.entries.contains("0"));
        assert!(pattern.entries.contains("1"));
    }

    #[test]
    fn test_literal_collision_widens_across_files() {
        let inv_a = inventory("run0/stats.txt", &["mem.reads 5"]);
        let inv_b = inventory("run1/stats.txt", &["mem.reads::bank 3"]);

        let catalog = aggregate(&[inv_a, inv_b]);
        let var = catalog.get("mem.reads").unwrap();
        assert_eq!(var.kind, VarKind::Vector);
        assert!(var.entries.contains("bank"));
    }
}
