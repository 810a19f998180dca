//! Tolerance rules: timestamp drift, UUID normalization, array ordering,
//! and ignore masks.
//!
//! The classifier is a pure predicate layer over `(path, key, value)`. It
//! runs before differences are tallied so semantically-equivalent values
//! never reach the breaking-change counts.

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Earliest plausible epoch-milliseconds value (2000-01-01T00:00:00Z).
const PLAUSIBLE_MS_MIN: i64 = 946_684_800_000;
/// Numeric values below this are interpreted as epoch seconds (2100-01-01).
const SECONDS_CUTOFF: i64 = 4_102_444_800;

static ISO_TIMESTAMP_RE: OnceLock<Regex> = OnceLock::new();
static UUID_RE: OnceLock<Regex> = OnceLock::new();

fn iso_timestamp_re() -> &'static Regex {
    ISO_TIMESTAMP_RE.get_or_init(|| {
        Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:\d{2})?$").unwrap()
    })
}

fn uuid_re() -> &'static Regex {
    UUID_RE.get_or_init(|| {
        Regex::new(r"^[0-9a-fA-F]{8}-?[0-9a-fA-F]{4}-?[0-9a-fA-F]{4}-?[0-9a-fA-F]{4}-?[0-9a-fA-F]{12}$")
            .unwrap()
    })
}

/// Named tolerance presets controlling the `ToleranceConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonMode {
    /// All tolerances zeroed; any deviation is reported.
    Strict,
    /// All tolerance features force-enabled with defaults.
    Tolerant,
    /// Use the supplied `ToleranceConfig` as-is.
    #[default]
    Default,
}

impl ComparisonMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonMode::Strict => "strict",
            ComparisonMode::Tolerant => "tolerant",
            ComparisonMode::Default => "default",
        }
    }
}

/// Tolerance rules supplied by configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToleranceConfig {
    pub timestamp_drift_seconds: u64,
    pub ignore_uuids: bool,
    pub sort_arrays: bool,
    /// Exact/prefix paths of arrays that may be reordered. Empty means
    /// "all arrays" when `sort_arrays` is on.
    pub array_fields: Vec<String>,
    /// Key-name fragments that mark a field as a timestamp.
    pub timestamp_fields: Vec<String>,
    /// Key-name fragments that mark a field as a UUID carrier.
    pub uuid_fields: Vec<String>,
    /// Paths masked from diffing entirely: exact, dot-prefix, or regex.
    pub ignore_fields: Vec<String>,
    /// Header names (lowercased) excluded from header diffing.
    pub ignore_headers: HashSet<String>,
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        ToleranceConfig {
            timestamp_drift_seconds: 5,
            ignore_uuids: true,
            sort_arrays: true,
            array_fields: Vec::new(),
            timestamp_fields: vec!["created_at".to_string(), "updated_at".to_string()],
            uuid_fields: vec!["orderId".to_string(), "id".to_string()],
            ignore_fields: Vec::new(),
            ignore_headers: ["date", "server", "x-request-id", "content-length", "connection"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl ToleranceConfig {
    /// Zeroed config for strict comparison.
    pub fn strict() -> Self {
        ToleranceConfig {
            timestamp_drift_seconds: 0,
            ignore_uuids: false,
            sort_arrays: false,
            array_fields: Vec::new(),
            timestamp_fields: Vec::new(),
            uuid_fields: Vec::new(),
            ignore_fields: Vec::new(),
            ignore_headers: HashSet::new(),
        }
    }

    /// Apply a comparison mode, returning the effective config.
    pub fn with_mode(&self, mode: ComparisonMode) -> Self {
        match mode {
            ComparisonMode::Strict => ToleranceConfig::strict(),
            ComparisonMode::Tolerant => {
                let defaults = ToleranceConfig::default();
                let mut cfg = self.clone();
                cfg.timestamp_drift_seconds = cfg.timestamp_drift_seconds.max(5);
                cfg.ignore_uuids = true;
                cfg.sort_arrays = true;
                if cfg.timestamp_fields.is_empty() {
                    cfg.timestamp_fields = defaults.timestamp_fields;
                }
                if cfg.uuid_fields.is_empty() {
                    cfg.uuid_fields = defaults.uuid_fields;
                }
                cfg
            }
            ComparisonMode::Default => self.clone(),
        }
    }
}

/// Why a difference was tolerated rather than counted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase", tag = "kind")]
pub enum Tolerated {
    TimestampDrift { drift_ms: i64 },
    UuidNormalized,
}

/// Stateless predicate layer over `(path, key, value)` triples.
pub struct ToleranceClassifier {
    config: ToleranceConfig,
    ignore_regexes: Vec<Regex>,
    /// Upper bound for plausible epoch-ms detection, fixed at build time
    /// so one replay run classifies consistently.
    now_ms: i64,
}

impl ToleranceClassifier {
    pub fn new(config: ToleranceConfig) -> Self {
        let ignore_regexes = config
            .ignore_fields
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok())
            .collect();
        ToleranceClassifier {
            config,
            ignore_regexes,
            now_ms: Utc::now().timestamp_millis(),
        }
    }

    pub fn config(&self) -> &ToleranceConfig {
        &self.config
    }

    /// Interpret a value as epoch milliseconds if it plausibly encodes an
    /// instant: ISO-8601 strings, epoch-second or epoch-millisecond numbers.
    pub fn timestamp_millis(&self, value: &Value) -> Option<i64> {
        match value {
            Value::String(s) => {
                if !iso_timestamp_re().is_match(s) {
                    return None;
                }
                if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                    return Some(dt.timestamp_millis());
                }
                // Offset-free timestamps are taken as UTC.
                NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc().timestamp_millis())
            }
            Value::Number(n) => {
                let raw = n.as_f64()?;
                if raw <= 0.0 {
                    return None;
                }
                let ms = if (raw as i64) < SECONDS_CUTOFF {
                    (raw * 1000.0) as i64
                } else {
                    raw as i64
                };
                (PLAUSIBLE_MS_MIN..=self.now_ms).contains(&ms).then_some(ms)
            }
            _ => None,
        }
    }

    /// Timestamp detection: key fragment match, ISO-8601 shape, or a
    /// plausible epoch value.
    pub fn is_timestamp(&self, key: &str, value: &Value) -> bool {
        let key_lower = key.to_lowercase();
        if self
            .config
            .timestamp_fields
            .iter()
            .any(|fragment| key_lower.contains(&fragment.to_lowercase()))
        {
            return matches!(value, Value::String(_) | Value::Number(_));
        }
        self.timestamp_millis(value).is_some()
    }

    /// UUID detection: key fragment match AND canonical 8-4-4-4-12 shape
    /// (hex, case-insensitive, hyphens optional).
    pub fn is_uuid(&self, key: &str, value: &Value) -> bool {
        let Value::String(s) = value else {
            return false;
        };
        let key_lower = key.to_lowercase();
        self.config
            .uuid_fields
            .iter()
            .any(|fragment| key_lower.contains(&fragment.to_lowercase()))
            && uuid_re().is_match(s)
    }

    /// Whether the array at `path` may be reordered before diffing.
    pub fn should_sort_array(&self, path: &str) -> bool {
        if self.config.array_fields.is_empty() {
            return self.config.sort_arrays;
        }
        self.config.array_fields.iter().any(|field| {
            path == field
                || path.starts_with(&format!("{field}."))
                || path.starts_with(&format!("{field}["))
        })
    }

    /// Whether the path is masked from diffing entirely.
    pub fn is_ignored(&self, path: &str) -> bool {
        if self
            .config
            .ignore_fields
            .iter()
            .any(|field| path == field || path.starts_with(&format!("{field}.")))
        {
            return true;
        }
        self.ignore_regexes.iter().any(|re| re.is_match(path))
    }

    /// Decide whether two differing leaf values are equivalent under the
    /// active tolerances.
    pub fn equivalent(&self, key: &str, recorded: &Value, replayed: &Value) -> Option<Tolerated> {
        if self.is_timestamp(key, recorded) && self.is_timestamp(key, replayed) {
            if let (Some(a), Some(b)) =
                (self.timestamp_millis(recorded), self.timestamp_millis(replayed))
            {
                let drift_ms = (a - b).abs();
                if drift_ms <= self.config.timestamp_drift_seconds as i64 * 1000 {
                    return Some(Tolerated::TimestampDrift { drift_ms });
                }
            }
        }
        if self.config.ignore_uuids && self.is_uuid(key, recorded) && self.is_uuid(key, replayed) {
            return Some(Tolerated::UuidNormalized);
        }
        None
    }

    /// Recursively apply ordering tolerances to a canonical tree: arrays
    /// at sortable paths are reordered by their canonical encoding.
    pub fn normalize(&self, value: &Value, path: &str) -> Value {
        match value {
            Value::Object(map) => {
                let mut out = serde_json::Map::new();
                for (key, v) in map {
                    let child_path = join_path(path, key);
                    out.insert(key.clone(), self.normalize(v, &child_path));
                }
                Value::Object(out)
            }
            Value::Array(items) => {
                let mut normalized: Vec<Value> = items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| self.normalize(v, &format!("{path}[{i}]")))
                    .collect();
                if self.should_sort_array(path) {
                    normalized.sort_by_cached_key(|v| {
                        serde_json::to_string(v).unwrap_or_default()
                    });
                }
                Value::Array(normalized)
            }
            other => other.clone(),
        }
    }
}

/// Join a parent path and key with a dot; the root path is empty.
pub fn join_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}
