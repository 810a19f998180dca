//! Session filtering: select which interactions replay.
//!
//! Rules are ANDed across categories (methods, route patterns, interaction
//! tags, session tags); within a category any listed value matches. Route
//! patterns support glob-like `*` plus plain substring matching.

use crate::session::{Interaction, Session};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Filter applied to a session before replay.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionFilter {
    pub methods: Vec<String>,
    pub routes: Vec<String>,
    pub tags: Vec<String>,
    pub session_tags: Vec<String>,
}

/// Original vs filtered interaction counts, reported alongside results.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilteredStats {
    pub original_count: usize,
    pub filtered_count: usize,
}

impl SessionFilter {
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
            && self.routes.is_empty()
            && self.tags.is_empty()
            && self.session_tags.is_empty()
    }

    /// Session-level gate: when session tags are listed, the session must
    /// carry at least one of them or every interaction is excluded.
    pub fn matches_session(&self, session: &Session) -> bool {
        self.session_tags.is_empty()
            || self
                .session_tags
                .iter()
                .any(|tag| session.metadata.tags.contains(tag))
    }

    pub fn matches_interaction(&self, interaction: &Interaction) -> bool {
        if !self.methods.is_empty()
            && !self
                .methods
                .iter()
                .any(|m| m.eq_ignore_ascii_case(&interaction.request.method))
        {
            return false;
        }
        if !self.routes.is_empty()
            && !self
                .routes
                .iter()
                .any(|pattern| route_matches(pattern, &interaction.request.path))
        {
            return false;
        }
        if !self.tags.is_empty()
            && !self.tags.iter().any(|tag| interaction.tags.contains(tag))
        {
            return false;
        }
        true
    }

    /// Indices of interactions that survive the filter.
    pub fn apply(&self, session: &Session) -> Vec<usize> {
        if !self.matches_session(session) {
            return Vec::new();
        }
        session
            .interactions
            .iter()
            .enumerate()
            .filter(|(_, interaction)| self.matches_interaction(interaction))
            .map(|(index, _)| index)
            .collect()
    }
}

/// Glob-like matching: `*` wildcards when present, substring otherwise.
fn route_matches(pattern: &str, path: &str) -> bool {
    if pattern.contains('*') {
        let escaped = regex::escape(pattern).replace(r"\*", ".*");
        if let Ok(re) = Regex::new(&format!("^{escaped}$")) {
            return re.is_match(path);
        }
    }
    path.contains(pattern)
}
