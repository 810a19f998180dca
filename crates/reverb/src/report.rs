//! Machine-readable result structures.
//!
//! Text and table rendering live in the CLI adapter; this module only
//! produces the structures it (or `--output`) serializes.

use crate::diff::judge::{ComparisonResult, Summary};
use crate::diff::DiffKind;
use crate::replay::filter::{FilteredStats, SessionFilter};
use crate::route::MetricsSnapshot;
use crate::tolerance::Tolerated;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome for one replayed interaction. Exactly one of `comparison` and
/// `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionResult {
    pub endpoint: String,
    pub method: String,
    pub path: String,
    pub request_hash: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison: Option<ComparisonResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate result over one session's replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResult {
    pub summary: Summary,
    pub interaction_results: Vec<InteractionResult>,
    pub comparison_mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<SessionFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filtered_stats: Option<FilteredStats>,
}

/// One entry in the report's breaking-change list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incompatibility {
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub reason: String,
}

/// One entry in the report's tolerated-change list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToleratedEntry {
    pub endpoint: String,
    pub path: String,
    pub recorded: Value,
    pub replayed: Value,
    #[serde(flatten)]
    pub tolerated: Tolerated,
}

/// Per-endpoint verdict row for table rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointRow {
    pub endpoint: String,
    pub status_delta: String,
    pub total_changes: usize,
    pub tolerated_changes: usize,
    pub effective_changes: usize,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Compatible,
    /// Differences exist but all were tolerated.
    Tolerable,
    Incompatible,
    Error,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Compatible => "compatible",
            Verdict::Tolerable => "tolerable",
            Verdict::Incompatible => "incompatible",
            Verdict::Error => "error",
        }
    }
}

/// The full report written by `--output` and `--format json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub session_id: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_file: Option<String>,
    #[serde(flatten)]
    pub result: SessionResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance: Option<MetricsSnapshot>,
    pub incompatibilities: Vec<Incompatibility>,
    pub tolerated_changes: Vec<ToleratedEntry>,
    pub endpoints: Vec<EndpointRow>,
}

/// Assemble the report from a session's replay result.
///
/// `treat_added_headers_as_breaking` must match the judge's setting so the
/// incompatibility list agrees with the per-endpoint verdicts.
pub fn build_report(
    session_id: &str,
    result: SessionResult,
    contract_file: Option<String>,
    performance: Option<MetricsSnapshot>,
    treat_added_headers_as_breaking: bool,
) -> Report {
    let mut incompatibilities = Vec::new();
    let mut tolerated_changes = Vec::new();
    let mut endpoints = Vec::new();

    for interaction in &result.interaction_results {
        let endpoint = interaction.endpoint.clone();
        match (&interaction.comparison, &interaction.error) {
            (Some(comparison), _) => {
                collect_incompatibilities(
                    &endpoint,
                    comparison,
                    treat_added_headers_as_breaking,
                    &mut incompatibilities,
                );
                for change in &comparison.tolerated_changes {
                    tolerated_changes.push(ToleratedEntry {
                        endpoint: endpoint.clone(),
                        path: change.path.clone(),
                        recorded: change.recorded.clone(),
                        replayed: change.replayed.clone(),
                        tolerated: change.tolerated.clone(),
                    });
                }
                endpoints.push(EndpointRow {
                    endpoint,
                    status_delta: format!(
                        "{} -> {}",
                        comparison.recorded_status, comparison.replayed_status
                    ),
                    total_changes: comparison.total_changes(),
                    tolerated_changes: comparison.tolerated_count(),
                    effective_changes: comparison.effective_changes(),
                    verdict: if comparison.is_compatible {
                        Verdict::Compatible
                    } else if comparison.is_effectively_compatible {
                        Verdict::Tolerable
                    } else {
                        Verdict::Incompatible
                    },
                });
            }
            (None, Some(error)) => {
                endpoints.push(EndpointRow {
                    endpoint: endpoint.clone(),
                    status_delta: "-".to_string(),
                    total_changes: 0,
                    tolerated_changes: 0,
                    effective_changes: 0,
                    verdict: Verdict::Error,
                });
                incompatibilities.push(Incompatibility {
                    endpoint,
                    path: None,
                    reason: format!("Replay error: {error}"),
                });
            }
            (None, None) => {}
        }
    }

    Report {
        session_id: session_id.to_string(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        contract_file,
        result,
        performance,
        incompatibilities,
        tolerated_changes,
        endpoints,
    }
}

fn collect_incompatibilities(
    endpoint: &str,
    comparison: &ComparisonResult,
    treat_added_headers_as_breaking: bool,
    out: &mut Vec<Incompatibility>,
) {
    if !comparison.status_match {
        out.push(Incompatibility {
            endpoint: endpoint.to_string(),
            path: None,
            reason: format!(
                "Status changed from {} to {}",
                comparison.recorded_status, comparison.replayed_status
            ),
        });
    }
    for header in &comparison.header_diffs.removed {
        out.push(Incompatibility {
            endpoint: endpoint.to_string(),
            path: Some(header.name.clone()),
            reason: "Header was removed".to_string(),
        });
    }
    if treat_added_headers_as_breaking {
        for header in &comparison.header_diffs.added {
            out.push(Incompatibility {
                endpoint: endpoint.to_string(),
                path: Some(header.name.clone()),
                reason: "Header was added".to_string(),
            });
        }
    }
    for record in &comparison.changes {
        match &record.kind {
            DiffKind::Removed { .. } | DiffKind::TypeChanged { .. } => {
                out.push(Incompatibility {
                    endpoint: endpoint.to_string(),
                    path: Some(record.path.clone()),
                    reason: record.reason().unwrap_or_default(),
                });
            }
            DiffKind::Added { .. } | DiffKind::Modified { .. } => {}
        }
    }
}
