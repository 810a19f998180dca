//! Compatibility verdicts: per-interaction and per-session.

use super::{BodyDiff, DiffKind, DiffRecord, HeaderDiffs, ToleratedChange};
use crate::tolerance::ComparisonMode;
use serde::{Deserialize, Serialize};

/// Knobs affecting the verdict beyond the tolerance rules themselves.
#[derive(Debug, Clone, Copy)]
pub struct JudgeOptions {
    pub mode: ComparisonMode,
    /// Observed behavior treats added headers as breaking while added body
    /// fields are not; disabling this unifies the two.
    pub treat_added_headers_as_breaking: bool,
}

impl Default for JudgeOptions {
    fn default() -> Self {
        JudgeOptions {
            mode: ComparisonMode::Default,
            treat_added_headers_as_breaking: true,
        }
    }
}

/// Body diff tallies, serialized into the report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyDiffCounts {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
    pub type_changed: usize,
    pub tolerated: usize,
    pub total: usize,
}

impl BodyDiffCounts {
    fn from_diff(diff: &BodyDiff) -> Self {
        BodyDiffCounts {
            added: diff.count(|k| matches!(k, DiffKind::Added { .. })),
            removed: diff.count(|k| matches!(k, DiffKind::Removed { .. })),
            modified: diff.count(|k| matches!(k, DiffKind::Modified { .. })),
            type_changed: diff.count(|k| matches!(k, DiffKind::TypeChanged { .. })),
            tolerated: diff.tolerated.len(),
            total: diff.total(),
        }
    }
}

/// Verdict for a single interaction. Never mutated once emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    pub status_match: bool,
    pub recorded_status: u16,
    pub replayed_status: u16,
    pub header_diffs: HeaderDiffs,
    pub body_diffs: BodyDiffCounts,
    pub changes: Vec<DiffRecord>,
    pub tolerated_changes: Vec<ToleratedChange>,
    pub is_compatible: bool,
    pub is_effectively_compatible: bool,
}

impl ComparisonResult {
    /// All observed changes, including tolerated ones.
    pub fn total_changes(&self) -> usize {
        self.header_diffs.total + self.body_diffs.total + self.body_diffs.tolerated
    }

    pub fn tolerated_count(&self) -> usize {
        self.tolerated_changes.len()
    }

    /// Changes remaining after tolerances.
    pub fn effective_changes(&self) -> usize {
        self.header_diffs.total + self.body_diffs.total
    }
}

/// Judge one interaction from its status codes and diffs.
pub fn judge(
    recorded_status: u16,
    replayed_status: u16,
    header_diffs: HeaderDiffs,
    body_diff: BodyDiff,
    options: &JudgeOptions,
) -> ComparisonResult {
    let status_match = recorded_status == replayed_status;
    let body_counts = BodyDiffCounts::from_diff(&body_diff);

    let headers_ok = header_diffs.removed.is_empty()
        && (!options.treat_added_headers_as_breaking || header_diffs.added.is_empty());
    let base_compatible =
        status_match && headers_ok && body_counts.removed == 0 && body_counts.type_changed == 0;

    let total_changes = header_diffs.total + body_counts.total + body_counts.tolerated;
    let effective_changes = header_diffs.total + body_counts.total;
    // Strict mode reports any deviation at all; the base predicate alone
    // would let modified-only interactions through.
    let is_compatible = base_compatible
        && (options.mode != ComparisonMode::Strict || total_changes == 0);
    // A status mismatch is never tolerable.
    let is_effectively_compatible = status_match && (is_compatible || effective_changes == 0);

    ComparisonResult {
        status_match,
        recorded_status,
        replayed_status,
        header_diffs,
        body_diffs: body_counts,
        changes: body_diff.records,
        tolerated_changes: body_diff.tolerated,
        is_compatible,
        is_effectively_compatible,
    }
}

/// Session-level tallies over all interactions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total: usize,
    pub compatible: usize,
    pub incompatible: usize,
    pub errors: usize,
    pub total_changes: usize,
    pub tolerated_changes: usize,
    pub effective_changes: usize,
    pub compatibility_score: f64,
    pub effective_compatibility_score: f64,
}

/// Aggregate interaction verdicts; `None` entries are interactions that
/// errored during replay.
pub fn summarize<'a, I>(outcomes: I) -> Summary
where
    I: IntoIterator<Item = Option<&'a ComparisonResult>>,
{
    let mut summary = Summary::default();
    let mut effective_compatible = 0usize;

    for outcome in outcomes {
        summary.total += 1;
        match outcome {
            None => summary.errors += 1,
            Some(result) => {
                if result.is_compatible {
                    summary.compatible += 1;
                } else {
                    summary.incompatible += 1;
                }
                if result.is_effectively_compatible {
                    effective_compatible += 1;
                }
                summary.total_changes += result.total_changes();
                summary.tolerated_changes += result.tolerated_count();
            }
        }
    }

    summary.effective_changes = summary.total_changes.saturating_sub(summary.tolerated_changes);
    if summary.total > 0 {
        summary.compatibility_score = 100.0 * summary.compatible as f64 / summary.total as f64;
        summary.effective_compatibility_score =
            100.0 * effective_compatible as f64 / summary.total as f64;
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{diff_bodies, diff_headers};
    use crate::tolerance::{ToleranceClassifier, ToleranceConfig};
    use serde_json::json;
    use std::collections::HashMap;

    fn judge_bodies(
        recorded: &serde_json::Value,
        replayed: &serde_json::Value,
        config: ToleranceConfig,
        options: JudgeOptions,
    ) -> ComparisonResult {
        let classifier = ToleranceClassifier::new(config);
        let headers = HashMap::new();
        judge(
            200,
            200,
            diff_headers(&headers, &headers, &classifier),
            diff_bodies(recorded, replayed, &classifier),
            &options,
        )
    }

    #[test]
    fn test_removed_field_is_incompatible() {
        let result = judge_bodies(
            &json!({"products": [{"id": 1}], "count": 1}),
            &json!({"products": [{"id": 1, "inStock": true}]}),
            ToleranceConfig::default(),
            JudgeOptions::default(),
        );
        assert!(!result.is_compatible);
        assert_eq!(result.body_diffs.removed, 1);
        assert_eq!(result.body_diffs.added, 1);
    }

    #[test]
    fn test_added_body_field_is_compatible() {
        let result = judge_bodies(
            &json!({"a": 1}),
            &json!({"a": 1, "b": 2}),
            ToleranceConfig::default(),
            JudgeOptions::default(),
        );
        assert!(result.is_compatible);
        assert!(result.is_effectively_compatible);
    }

    #[test]
    fn test_type_change_incompatible_in_every_mode() {
        for mode in [
            ComparisonMode::Strict,
            ComparisonMode::Tolerant,
            ComparisonMode::Default,
        ] {
            let config = ToleranceConfig::default().with_mode(mode);
            let result = judge_bodies(
                &json!({"description": "x"}),
                &json!({"description": {"short": "x"}}),
                config,
                JudgeOptions {
                    mode,
                    ..JudgeOptions::default()
                },
            );
            assert!(!result.is_compatible, "mode {mode:?}");
        }
    }

    #[test]
    fn test_uuid_drift_effectively_compatible_in_tolerant_mode() {
        let result = judge_bodies(
            &json!({"id": "550e8400-e29b-41d4-a716-446655440000"}),
            &json!({"id": "123e4567-e89b-12d3-a456-426614174000"}),
            ToleranceConfig::default().with_mode(ComparisonMode::Tolerant),
            JudgeOptions {
                mode: ComparisonMode::Tolerant,
                ..JudgeOptions::default()
            },
        );
        assert!(result.is_compatible);
        assert!(result.is_effectively_compatible);
        assert_eq!(result.tolerated_count(), 1);
        assert_eq!(result.total_changes(), 1);
        assert_eq!(result.effective_changes(), 0);
    }

    #[test]
    fn test_strict_mode_fails_on_modified_value() {
        let result = judge_bodies(
            &json!({"created_at": "2023-01-01T12:00:00Z"}),
            &json!({"created_at": "2023-01-01T12:00:02Z"}),
            ToleranceConfig::strict(),
            JudgeOptions {
                mode: ComparisonMode::Strict,
                ..JudgeOptions::default()
            },
        );
        assert!(!result.is_compatible);
        assert!(!result.is_effectively_compatible);
        assert_eq!(result.tolerated_count(), 0);
    }

    #[test]
    fn test_added_header_breaking_by_default_with_flag_to_unify() {
        let classifier = ToleranceClassifier::new(ToleranceConfig::default());
        let recorded = HashMap::new();
        let replayed: HashMap<String, String> =
            [("x-new".to_string(), "1".to_string())].into_iter().collect();
        let header_diffs = diff_headers(&recorded, &replayed, &classifier);

        let breaking = judge(
            200,
            200,
            header_diffs.clone(),
            BodyDiff::default(),
            &JudgeOptions::default(),
        );
        assert!(!breaking.is_compatible);

        let unified = judge(
            200,
            200,
            header_diffs,
            BodyDiff::default(),
            &JudgeOptions {
                treat_added_headers_as_breaking: false,
                ..JudgeOptions::default()
            },
        );
        assert!(unified.is_compatible);
    }

    #[test]
    fn test_status_mismatch_never_effectively_compatible() {
        let classifier = ToleranceClassifier::new(ToleranceConfig::default());
        let headers = HashMap::new();
        let result = judge(
            200,
            201,
            diff_headers(&headers, &headers, &classifier),
            BodyDiff::default(),
            &JudgeOptions::default(),
        );
        assert!(!result.is_compatible);
        assert!(!result.is_effectively_compatible);
    }

    #[test]
    fn test_summary_invariants() {
        let compatible = judge_bodies(
            &json!({"a": 1}),
            &json!({"a": 1}),
            ToleranceConfig::default(),
            JudgeOptions::default(),
        );
        let incompatible = judge_bodies(
            &json!({"a": 1}),
            &json!({}),
            ToleranceConfig::default(),
            JudgeOptions::default(),
        );

        let summary = summarize([Some(&compatible), Some(&incompatible), None]);
        assert_eq!(summary.total, 3);
        assert_eq!(
            summary.total,
            summary.compatible + summary.incompatible + summary.errors
        );
        assert_eq!(summary.errors, 1);
        assert!(summary.effective_compatibility_score >= summary.compatibility_score);
    }

    #[test]
    fn test_empty_session_scores_zero() {
        let summary = summarize(std::iter::empty());
        assert_eq!(summary.total, 0);
        assert_eq!(summary.compatibility_score, 0.0);
        assert_eq!(summary.effective_compatibility_score, 0.0);
    }

    #[test]
    fn test_strict_scores_coincide() {
        let options = JudgeOptions {
            mode: ComparisonMode::Strict,
            ..JudgeOptions::default()
        };
        let drifted = judge_bodies(
            &json!({"created_at": "2023-01-01T12:00:00Z"}),
            &json!({"created_at": "2023-01-01T12:00:02Z"}),
            ToleranceConfig::strict(),
            options,
        );
        let clean = judge_bodies(
            &json!({"a": 1}),
            &json!({"a": 1}),
            ToleranceConfig::strict(),
            options,
        );

        let summary = summarize([Some(&drifted), Some(&clean)]);
        assert_eq!(summary.tolerated_changes, 0);
        assert_eq!(
            summary.compatibility_score,
            summary.effective_compatibility_score
        );
        assert!(summary.compatibility_score < 100.0);
    }
}
