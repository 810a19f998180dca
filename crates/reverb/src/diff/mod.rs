//! Structural diffing of canonicalized response trees.
//!
//! The differ walks recorded and replayed values in parallel and emits
//! categorized differences. Tolerance rules are consulted before a
//! difference is tallied: equivalent-under-tolerance pairs are counted as
//! tolerated, ignored paths emit nothing at all. Output order is
//! deterministic (depth-first, sorted-key traversal).

pub mod judge;

use crate::canonical::{canonicalize_body, leaf_equal, type_name};
use crate::tolerance::{join_path, Tolerated, ToleranceClassifier};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// Sentinel written in place of sensitive values at capture time.
/// Subtrees the recorded side holds as redacted never participate in
/// diffing.
pub const REDACTION_SENTINEL: &str = "[REDACTED]";

/// One categorized difference between the recorded and replayed trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffRecord {
    pub path: String,
    #[serde(flatten)]
    pub kind: DiffKind,
}

/// Difference classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase", tag = "kind")]
pub enum DiffKind {
    /// Key present only on the replayed side. Non-breaking in bodies.
    Added { replayed: Value },
    /// Key present only on the recorded side. Always an incompatibility.
    Removed { recorded: Value },
    /// Differing leaf values at the same path.
    Modified { recorded: Value, replayed: Value },
    /// Runtime type categories differ. Always an incompatibility.
    TypeChanged {
        recorded: Value,
        replayed: Value,
        from: String,
        to: String,
    },
}

impl DiffRecord {
    /// Human-readable reason for diffs promoted to incompatibilities.
    pub fn reason(&self) -> Option<String> {
        match &self.kind {
            DiffKind::Removed { .. } => Some("Field was removed".to_string()),
            DiffKind::TypeChanged { from, to, .. } => {
                Some(format!("Type changed from {from} to {to}"))
            }
            _ => None,
        }
    }
}

/// A difference suppressed by a tolerance rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToleratedChange {
    pub path: String,
    pub recorded: Value,
    pub replayed: Value,
    #[serde(flatten)]
    pub tolerated: Tolerated,
}

/// All body differences for one interaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyDiff {
    pub records: Vec<DiffRecord>,
    pub tolerated: Vec<ToleratedChange>,
}

impl BodyDiff {
    pub fn total(&self) -> usize {
        self.records.len()
    }

    pub fn count(&self, matches: impl Fn(&DiffKind) -> bool) -> usize {
        self.records.iter().filter(|r| matches(&r.kind)).count()
    }

    pub fn added(&self) -> impl Iterator<Item = &DiffRecord> {
        self.records
            .iter()
            .filter(|r| matches!(r.kind, DiffKind::Added { .. }))
    }

    pub fn removed(&self) -> impl Iterator<Item = &DiffRecord> {
        self.records
            .iter()
            .filter(|r| matches!(r.kind, DiffKind::Removed { .. }))
    }

    pub fn modified(&self) -> impl Iterator<Item = &DiffRecord> {
        self.records
            .iter()
            .filter(|r| matches!(r.kind, DiffKind::Modified { .. }))
    }

    pub fn type_changed(&self) -> impl Iterator<Item = &DiffRecord> {
        self.records
            .iter()
            .filter(|r| matches!(r.kind, DiffKind::TypeChanged { .. }))
    }
}

/// One header-level change; names are lowercased.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderChange {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recorded: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replayed: Option<String>,
}

/// Header differences for one interaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderDiffs {
    pub added: Vec<HeaderChange>,
    pub removed: Vec<HeaderChange>,
    pub modified: Vec<HeaderChange>,
    pub total: usize,
}

/// Diff two response bodies. Both sides are canonicalized and tolerance
/// normalization (array ordering) is applied before the walk.
pub fn diff_bodies(recorded: &Value, replayed: &Value, classifier: &ToleranceClassifier) -> BodyDiff {
    let recorded = classifier.normalize(&canonicalize_body(recorded), "");
    let replayed = classifier.normalize(&canonicalize_body(replayed), "");
    let mut out = BodyDiff::default();
    walk(&recorded, &replayed, "", "", classifier, &mut out);
    out
}

fn is_redacted(value: &Value) -> bool {
    matches!(value, Value::String(s) if s == REDACTION_SENTINEL)
}

fn walk(
    recorded: &Value,
    replayed: &Value,
    path: &str,
    key: &str,
    classifier: &ToleranceClassifier,
    out: &mut BodyDiff,
) {
    if !path.is_empty() && classifier.is_ignored(path) {
        return;
    }
    if is_redacted(recorded) {
        return;
    }

    match (recorded, replayed) {
        (Value::Object(rec), Value::Object(rep)) => {
            let keys: BTreeSet<&String> = rec.keys().chain(rep.keys()).collect();
            for k in keys {
                let child_path = join_path(path, k);
                match (rec.get(k.as_str()), rep.get(k.as_str())) {
                    (Some(a), Some(b)) => walk(a, b, &child_path, k, classifier, out),
                    (Some(a), None) => record_removed(a, &child_path, classifier, out),
                    (None, Some(b)) => record_added(b, &child_path, classifier, out),
                    (None, None) => {}
                }
            }
        }
        (Value::Array(rec), Value::Array(rep)) => {
            let shared = rec.len().min(rep.len());
            for i in 0..shared {
                walk(&rec[i], &rep[i], &format!("{path}[{i}]"), key, classifier, out);
            }
            for (i, item) in rec.iter().enumerate().skip(shared) {
                record_removed(item, &format!("{path}[{i}]"), classifier, out);
            }
            for (i, item) in rep.iter().enumerate().skip(shared) {
                record_added(item, &format!("{path}[{i}]"), classifier, out);
            }
        }
        _ => {
            if leaf_equal(recorded, replayed) {
                return;
            }
            if let Some(tolerated) = classifier.equivalent(key, recorded, replayed) {
                out.tolerated.push(ToleratedChange {
                    path: path.to_string(),
                    recorded: recorded.clone(),
                    replayed: replayed.clone(),
                    tolerated,
                });
                return;
            }
            let from = type_name(recorded);
            let to = type_name(replayed);
            let kind = if from != to {
                DiffKind::TypeChanged {
                    recorded: recorded.clone(),
                    replayed: replayed.clone(),
                    from: from.to_string(),
                    to: to.to_string(),
                }
            } else {
                DiffKind::Modified {
                    recorded: recorded.clone(),
                    replayed: replayed.clone(),
                }
            };
            out.records.push(DiffRecord {
                path: path.to_string(),
                kind,
            });
        }
    }
}

fn record_removed(value: &Value, path: &str, classifier: &ToleranceClassifier, out: &mut BodyDiff) {
    if classifier.is_ignored(path) || is_redacted(value) {
        return;
    }
    out.records.push(DiffRecord {
        path: path.to_string(),
        kind: DiffKind::Removed {
            recorded: value.clone(),
        },
    });
}

fn record_added(value: &Value, path: &str, classifier: &ToleranceClassifier, out: &mut BodyDiff) {
    if classifier.is_ignored(path) {
        return;
    }
    out.records.push(DiffRecord {
        path: path.to_string(),
        kind: DiffKind::Added {
            replayed: value.clone(),
        },
    });
}

/// Diff two header maps. Keys are lowercased; names in the classifier's
/// ignore set are excluded entirely.
pub fn diff_headers(
    recorded: &HashMap<String, String>,
    replayed: &HashMap<String, String>,
    classifier: &ToleranceClassifier,
) -> HeaderDiffs {
    let ignore = &classifier.config().ignore_headers;
    let lower = |map: &HashMap<String, String>| -> HashMap<String, String> {
        map.iter()
            .map(|(k, v)| (k.to_lowercase(), v.clone()))
            .filter(|(k, _)| !ignore.contains(k))
            .collect()
    };
    let rec = lower(recorded);
    let rep = lower(replayed);

    let mut diffs = HeaderDiffs::default();
    let names: BTreeSet<&String> = rec.keys().chain(rep.keys()).collect();
    for name in names {
        match (rec.get(name.as_str()), rep.get(name.as_str())) {
            (Some(a), Some(b)) if a == b => {}
            (Some(a), Some(b)) => diffs.modified.push(HeaderChange {
                name: name.clone(),
                recorded: Some(a.clone()),
                replayed: Some(b.clone()),
            }),
            (Some(a), None) => diffs.removed.push(HeaderChange {
                name: name.clone(),
                recorded: Some(a.clone()),
                replayed: None,
            }),
            (None, Some(b)) => diffs.added.push(HeaderChange {
                name: name.clone(),
                recorded: None,
                replayed: Some(b.clone()),
            }),
            (None, None) => {}
        }
    }
    diffs.total = diffs.added.len() + diffs.removed.len() + diffs.modified.len();
    diffs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tolerance::ToleranceConfig;
    use serde_json::json;

    fn default_classifier() -> ToleranceClassifier {
        ToleranceClassifier::new(ToleranceConfig::default())
    }

    fn strict_classifier() -> ToleranceClassifier {
        ToleranceClassifier::new(ToleranceConfig::strict())
    }

    #[test]
    fn test_identical_bodies_produce_no_diffs() {
        let body = json!({"a": 1, "b": [1, 2], "c": {"d": null}});
        let diff = diff_bodies(&body, &body, &strict_classifier());
        assert!(diff.records.is_empty());
        assert!(diff.tolerated.is_empty());
    }

    #[test]
    fn test_removed_field_reported_with_reason() {
        let recorded = json!({"products": [{"id": 1}], "count": 1});
        let replayed = json!({"products": [{"id": 1}]});
        let diff = diff_bodies(&recorded, &replayed, &strict_classifier());
        let removed: Vec<_> = diff.removed().collect();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].path, "count");
        assert_eq!(removed[0].reason().as_deref(), Some("Field was removed"));
    }

    #[test]
    fn test_added_nested_field_path() {
        let recorded = json!({"products": [{"id": 1}]});
        let replayed = json!({"products": [{"id": 1, "inStock": true}]});
        let diff = diff_bodies(&recorded, &replayed, &strict_classifier());
        let added: Vec<_> = diff.added().collect();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].path, "products[0].inStock");
    }

    #[test]
    fn test_type_change_reason() {
        let recorded = json!({"description": "x"});
        let replayed = json!({"description": {"short": "x"}});
        let diff = diff_bodies(&recorded, &replayed, &strict_classifier());
        let changed: Vec<_> = diff.type_changed().collect();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].path, "description");
        assert_eq!(
            changed[0].reason().as_deref(),
            Some("Type changed from string to object")
        );
    }

    #[test]
    fn test_modified_leaf() {
        let diff = diff_bodies(&json!({"n": 1}), &json!({"n": 2}), &strict_classifier());
        assert_eq!(diff.count(|k| matches!(k, DiffKind::Modified { .. })), 1);
    }

    #[test]
    fn test_array_element_removal_path() {
        let diff = diff_bodies(
            &json!({"items": [1, 2, 3]}),
            &json!({"items": [1, 2]}),
            &strict_classifier(),
        );
        let removed: Vec<_> = diff.removed().collect();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].path, "items[2]");
    }

    #[test]
    fn test_timestamp_drift_is_tolerated() {
        let recorded = json!({"created_at": "2023-01-01T12:00:00Z"});
        let replayed = json!({"created_at": "2023-01-01T12:00:03Z"});
        let diff = diff_bodies(&recorded, &replayed, &default_classifier());
        assert!(diff.records.is_empty());
        assert_eq!(diff.tolerated.len(), 1);
        assert_eq!(diff.tolerated[0].path, "created_at");
    }

    #[test]
    fn test_uuid_normalization_is_tolerated() {
        let recorded = json!({"id": "550e8400-e29b-41d4-a716-446655440000"});
        let replayed = json!({"id": "123e4567-e89b-12d3-a456-426614174000"});
        let diff = diff_bodies(&recorded, &replayed, &default_classifier());
        assert!(diff.records.is_empty());
        assert_eq!(diff.tolerated.len(), 1);
        assert_eq!(diff.tolerated[0].tolerated, Tolerated::UuidNormalized);
    }

    #[test]
    fn test_ignore_dominates_removal() {
        let mut config = ToleranceConfig::strict();
        config.ignore_fields = vec!["count".to_string()];
        let classifier = ToleranceClassifier::new(config);
        let diff = diff_bodies(
            &json!({"products": [], "count": 1}),
            &json!({"products": []}),
            &classifier,
        );
        assert!(diff.records.is_empty());
    }

    #[test]
    fn test_redacted_subtree_never_diffs() {
        let recorded = json!({"token": "[REDACTED]", "n": 1});
        let replayed = json!({"token": "tok_live_1234", "n": 1});
        let diff = diff_bodies(&recorded, &replayed, &strict_classifier());
        assert!(diff.records.is_empty());
    }

    #[test]
    fn test_array_reordering_tolerated_via_sorting() {
        let recorded = json!({"tags": ["a", "b", "c"]});
        let replayed = json!({"tags": ["c", "a", "b"]});
        assert!(diff_bodies(&recorded, &replayed, &default_classifier())
            .records
            .is_empty());
        assert_eq!(
            diff_bodies(&recorded, &replayed, &strict_classifier()).total(),
            3
        );
    }

    #[test]
    fn test_string_json_body_parsed_before_diff() {
        let recorded = json!({"a": 1});
        let replayed = Value::String(r#"{"a": 1}"#.to_string());
        let diff = diff_bodies(&recorded, &replayed, &strict_classifier());
        assert!(diff.records.is_empty());
    }

    #[test]
    fn test_diff_output_deterministic() {
        let recorded = json!({"z": 1, "a": {"x": 1, "m": 2}, "k": [1, 2]});
        let replayed = json!({"a": {"m": 3}, "k": [2], "extra": true});
        let first = diff_bodies(&recorded, &replayed, &strict_classifier());
        let second = diff_bodies(&recorded, &replayed, &strict_classifier());
        assert_eq!(first.records, second.records);
        let paths: Vec<&str> = first.records.iter().map(|r| r.path.as_str()).collect();
        let mut sorted = paths.clone();
        sorted.sort();
        assert_eq!(paths, sorted, "depth-first sorted-key order");
    }

    #[test]
    fn test_header_diffs() {
        let classifier = default_classifier();
        let recorded: HashMap<String, String> = [
            ("Content-Type".to_string(), "application/json".to_string()),
            ("X-Version".to_string(), "1".to_string()),
            ("Date".to_string(), "Mon, 01 Jan 2024 00:00:00 GMT".to_string()),
        ]
        .into_iter()
        .collect();
        let replayed: HashMap<String, String> = [
            ("content-type".to_string(), "application/json".to_string()),
            ("x-version".to_string(), "2".to_string()),
            ("x-new".to_string(), "yes".to_string()),
        ]
        .into_iter()
        .collect();

        let diffs = diff_headers(&recorded, &replayed, &classifier);
        assert_eq!(diffs.added.len(), 1);
        assert_eq!(diffs.added[0].name, "x-new");
        assert_eq!(diffs.modified.len(), 1);
        assert_eq!(diffs.modified[0].name, "x-version");
        // "date" is in the default ignore set.
        assert!(diffs.removed.is_empty());
        assert_eq!(diffs.total, 2);
    }
}
