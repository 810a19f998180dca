//! Session and interaction wire types, loading, and tagging.
//!
//! A session is an ordered recording of HTTP interactions plus metadata.
//! Sessions are read once and kept immutable in memory during replay;
//! tagging rewrites the file before a replay ever sees it.

use crate::canonical::request_hash;
use crate::error::VerifyError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// One recorded HTTP request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Query mapping; values may be strings or arrays of strings.
    #[serde(default)]
    pub query: serde_json::Map<String, Value>,
    #[serde(default)]
    pub body: Value,
}

impl RecordedRequest {
    /// Canonical fingerprint over method, path, query, and body.
    /// Headers and timing never participate.
    pub fn fingerprint(&self) -> String {
        request_hash(
            &self.method,
            &self.path,
            &Value::Object(self.query.clone()),
            &self.body,
        )
    }
}

/// One recorded HTTP response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedResponse {
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Value,
}

/// One request/response pair within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    pub timestamp: String,
    /// Canonical request fingerprint, computed at record time. Filled on
    /// load when a file predates fingerprinting.
    #[serde(default)]
    pub request_hash: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub request: RecordedRequest,
    pub response: RecordedResponse,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Session-level metadata; arbitrary extra keys are preserved.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Ordered recording of HTTP interactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub timestamp: String,
    #[serde(default)]
    pub metadata: SessionMetadata,
    #[serde(default)]
    pub interactions: Vec<Interaction>,
}

impl Session {
    /// Load a session from a JSON file. Methods are uppercased and missing
    /// request fingerprints computed, so the in-memory session is always
    /// in canonical form.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, VerifyError> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => {}
            other => {
                return Err(VerifyError::input(format!(
                    "unsupported session file extension '{}' (expected .json)",
                    other.unwrap_or("")
                )))
            }
        }
        let contents = std::fs::read_to_string(path)?;
        let mut session: Session = serde_json::from_str(&contents)
            .map_err(|e| VerifyError::input(format!("malformed session file {path:?}: {e}")))?;
        for interaction in &mut session.interactions {
            interaction.request.method = interaction.request.method.to_uppercase();
            if interaction.request_hash.is_empty() {
                interaction.request_hash = interaction.request.fingerprint();
            }
        }
        debug!(
            session_id = %session.session_id,
            interactions = session.interactions.len(),
            "loaded session"
        );
        Ok(session)
    }

    /// Write the session back as pretty-printed JSON.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), VerifyError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| VerifyError::Invariant(format!("session serialization failed: {e}")))?;
        std::fs::write(path.as_ref(), json)?;
        info!(session_id = %self.session_id, "saved session to {:?}", path.as_ref());
        Ok(())
    }

    /// Add tags to the session, or to a single interaction when an index
    /// is given.
    pub fn add_tags(
        &mut self,
        tags: &[String],
        interaction_index: Option<usize>,
    ) -> Result<(), VerifyError> {
        let target = match interaction_index {
            None => &mut self.metadata.tags,
            Some(index) => {
                let len = self.interactions.len();
                let interaction = self.interactions.get_mut(index).ok_or_else(|| {
                    VerifyError::input(format!(
                        "interaction index {index} out of bounds ({len} interactions)"
                    ))
                })?;
                &mut interaction.tags
            }
        };
        for tag in tags {
            if !target.contains(tag) {
                target.push(tag.clone());
            }
        }
        Ok(())
    }
}

/// Brief listing entry for `session list`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionListing {
    pub session_id: String,
    pub timestamp: String,
    pub interactions: usize,
    pub tags: Vec<String>,
    pub description: String,
    pub file: String,
}

/// Enumerate session files in a directory, skipping unreadable ones.
pub fn list_sessions<P: AsRef<Path>>(dir: P) -> Result<Vec<SessionListing>, VerifyError> {
    let mut listings = Vec::new();
    for entry in std::fs::read_dir(dir.as_ref())? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match Session::from_file(&path) {
            Ok(session) => listings.push(SessionListing {
                session_id: session.session_id,
                timestamp: session.timestamp,
                interactions: session.interactions.len(),
                tags: session.metadata.tags,
                description: session.metadata.description,
                file: path.display().to_string(),
            }),
            Err(e) => debug!("skipping {path:?}: {e}"),
        }
    }
    listings.sort_by(|a, b| a.session_id.cmp(&b.session_id));
    Ok(listings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_session_json() -> String {
        json!({
            "sessionId": "session-2024-01-01",
            "timestamp": "2024-01-01T10:00:00Z",
            "metadata": {
                "tags": ["checkout"],
                "description": "baseline capture",
                "environment": "staging",
                "region": "eu-west-1"
            },
            "interactions": [
                {
                    "timestamp": "2024-01-01T10:00:01Z",
                    "tags": ["products"],
                    "request": {
                        "method": "get",
                        "path": "/api/products",
                        "headers": {"Accept": "application/json"},
                        "query": {"page": "1"},
                        "body": null
                    },
                    "response": {
                        "statusCode": 200,
                        "headers": {"Content-Type": "application/json"},
                        "body": {"products": [{"id": 1}], "count": 1}
                    }
                }
            ]
        })
        .to_string()
    }

    #[test]
    fn test_load_uppercases_method_and_fills_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, sample_session_json()).unwrap();

        let session = Session::from_file(&path).unwrap();
        let interaction = &session.interactions[0];
        assert_eq!(interaction.request.method, "GET");
        assert_eq!(interaction.request_hash.len(), 64);
        assert_eq!(interaction.request_hash, interaction.request.fingerprint());
    }

    #[test]
    fn test_roundtrip_preserves_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, sample_session_json()).unwrap();

        let session = Session::from_file(&path).unwrap();
        let original_hash = session.interactions[0].request_hash.clone();

        let copy = dir.path().join("copy.json");
        session.to_file(&copy).unwrap();
        let reloaded = Session::from_file(&copy).unwrap();
        assert_eq!(reloaded.interactions[0].request_hash, original_hash);
    }

    #[test]
    fn test_hash_insensitive_to_headers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, sample_session_json()).unwrap();
        let session = Session::from_file(&path).unwrap();

        let mut request = session.interactions[0].request.clone();
        let baseline = request.fingerprint();
        request
            .headers
            .insert("Authorization".to_string(), "Bearer xyz".to_string());
        assert_eq!(request.fingerprint(), baseline);
    }

    #[test]
    fn test_unsupported_extension_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.yaml");
        std::fs::write(&path, "{}").unwrap();
        let err = Session::from_file(&path).unwrap_err();
        assert!(matches!(err, VerifyError::Input(_)));
    }

    #[test]
    fn test_malformed_session_is_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = Session::from_file(&path).unwrap_err();
        assert!(matches!(err, VerifyError::Input(_)));
    }

    #[test]
    fn test_add_tags_session_and_interaction() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, sample_session_json()).unwrap();
        let mut session = Session::from_file(&path).unwrap();

        session
            .add_tags(&["regression".to_string(), "checkout".to_string()], None)
            .unwrap();
        assert_eq!(session.metadata.tags, vec!["checkout", "regression"]);

        session
            .add_tags(&["slow".to_string()], Some(0))
            .unwrap();
        assert_eq!(session.interactions[0].tags, vec!["products", "slow"]);

        let err = session.add_tags(&["x".to_string()], Some(9)).unwrap_err();
        assert!(matches!(err, VerifyError::Input(_)));
    }

    #[test]
    fn test_metadata_extra_keys_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, sample_session_json()).unwrap();
        let session = Session::from_file(&path).unwrap();
        assert_eq!(
            session.metadata.extra.get("region"),
            Some(&json!("eu-west-1"))
        );
        assert_eq!(session.metadata.environment.as_deref(), Some("staging"));
    }

    #[test]
    fn test_list_sessions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), sample_session_json()).unwrap();
        std::fs::write(dir.path().join("noise.txt"), "ignored").unwrap();
        std::fs::write(dir.path().join("broken.json"), "nope").unwrap();

        let listings = list_sessions(dir.path()).unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].session_id, "session-2024-01-01");
        assert_eq!(listings[0].interactions, 1);
    }
}
