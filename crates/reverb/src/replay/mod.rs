//! Replay orchestration.
//!
//! For each interaction in a (possibly filtered) session the engine either
//! synthesizes a response from a template route or issues a live HTTP
//! request, then canonicalizes, diffs, and judges the pair. Interactions
//! replay sequentially in recording order; a single failing interaction is
//! contained and counted under `summary.errors`.

pub mod filter;

use crate::diff::judge::{judge, summarize, ComparisonResult, JudgeOptions};
use crate::diff::{diff_bodies, diff_headers};
use crate::error::VerifyError;
use crate::replay::filter::{FilteredStats, SessionFilter};
use crate::report::{InteractionResult, SessionResult};
use crate::route::context::{ContextBuilder, RenderRequest};
use crate::route::{MetricsSnapshot, RouteResolver};
use crate::session::{RecordedRequest, RecordedResponse, Session};
use crate::template::value_to_text;
use crate::tolerance::{ComparisonMode, ToleranceClassifier, ToleranceConfig};
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Replay behavior knobs.
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub mode: ComparisonMode,
    /// Prefer template routes over live HTTP when one matches.
    pub use_dynamic_responses: bool,
    /// Base URL of the service under verification; required when an
    /// interaction has no matching template route.
    pub target_base_url: Option<String>,
    pub request_timeout: Duration,
    pub preload_templates: bool,
    pub treat_added_headers_as_breaking: bool,
    pub filter: Option<SessionFilter>,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        ReplayOptions {
            mode: ComparisonMode::Default,
            use_dynamic_responses: true,
            target_base_url: None,
            request_timeout: Duration::from_secs(30),
            preload_templates: false,
            treat_added_headers_as_breaking: true,
            filter: None,
        }
    }
}

/// Seam for replaying against a contract instead of a live service.
pub trait TemplateProvider: Send + Sync {
    /// `None` when no route matches; `Some(Err(..))` on a render failure.
    fn synthesize(&self, request: &RecordedRequest)
        -> Option<Result<RecordedResponse, VerifyError>>;

    fn metrics(&self) -> Option<MetricsSnapshot> {
        None
    }

    /// Eagerly compile templates; returns how many were compiled.
    fn preload(&self) -> Result<usize, VerifyError> {
        Ok(0)
    }
}

/// The route-resolver-backed template provider.
pub struct TemplateEngine {
    resolver: RouteResolver,
    context_builder: ContextBuilder,
}

impl TemplateEngine {
    pub fn new(resolver: RouteResolver) -> Self {
        TemplateEngine {
            resolver,
            context_builder: ContextBuilder::new(),
        }
    }

    pub fn with_context_builder(mut self, context_builder: ContextBuilder) -> Self {
        self.context_builder = context_builder;
        self
    }

    pub fn resolver(&self) -> &RouteResolver {
        &self.resolver
    }
}

impl TemplateProvider for TemplateEngine {
    fn synthesize(
        &self,
        request: &RecordedRequest,
    ) -> Option<Result<RecordedResponse, VerifyError>> {
        let matched = self.resolver.resolve(&request.method, &request.path)?;
        let render_request = RenderRequest {
            method: &request.method,
            path: &request.path,
            query: &request.query,
            params: &matched.params,
            body: &request.body,
        };
        let context = self.context_builder.build(&render_request);
        let outcome = self
            .resolver
            .render(&matched, &context)
            .map(|body| RecordedResponse {
                status_code: matched.route.status_code,
                status_message: None,
                headers: matched.route.headers.clone(),
                body,
            })
            .map_err(|e| VerifyError::Render(e.to_string()));
        Some(outcome)
    }

    fn metrics(&self) -> Option<MetricsSnapshot> {
        Some(self.resolver.metrics())
    }

    fn preload(&self) -> Result<usize, VerifyError> {
        self.resolver
            .preload_templates()
            .map_err(|e| VerifyError::Render(e.to_string()))
    }
}

/// Replays sessions and produces `SessionResult`s.
pub struct ReplayEngine {
    templates: Option<Box<dyn TemplateProvider>>,
    tolerances: ToleranceConfig,
    options: ReplayOptions,
    client: reqwest::Client,
    cancel: Arc<AtomicBool>,
}

impl ReplayEngine {
    pub fn new(options: ReplayOptions, tolerances: ToleranceConfig) -> Result<Self, VerifyError> {
        let client = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(|e| VerifyError::Invariant(format!("HTTP client construction failed: {e}")))?;
        Ok(ReplayEngine {
            templates: None,
            tolerances,
            options,
            client,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_template_provider(mut self, provider: impl TemplateProvider + 'static) -> Self {
        self.templates = Some(Box::new(provider));
        self
    }

    /// Cooperative cancellation handle. Setting it is terminal: the
    /// current HTTP call aborts (counted under `errors`) and iteration
    /// stops before the next interaction.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn template_metrics(&self) -> Option<MetricsSnapshot> {
        self.templates.as_ref().and_then(|t| t.metrics())
    }

    /// Replay one session, producing its aggregate result.
    pub async fn replay_session(&self, session: &Session) -> Result<SessionResult, VerifyError> {
        if self.options.preload_templates {
            if let Some(templates) = &self.templates {
                let count = templates.preload()?;
                debug!(count, "preloaded templates before replay");
            }
        }

        let (indices, filtered_stats) = match &self.options.filter {
            Some(filter) if !filter.is_empty() => {
                let kept = filter.apply(session);
                let stats = FilteredStats {
                    original_count: session.interactions.len(),
                    filtered_count: kept.len(),
                };
                (kept, Some(stats))
            }
            _ => ((0..session.interactions.len()).collect(), None),
        };

        let classifier =
            ToleranceClassifier::new(self.tolerances.with_mode(self.options.mode));
        let judge_options = JudgeOptions {
            mode: self.options.mode,
            treat_added_headers_as_breaking: self.options.treat_added_headers_as_breaking,
        };

        info!(
            session_id = %session.session_id,
            interactions = indices.len(),
            mode = self.options.mode.as_str(),
            "replaying session"
        );

        let mut results = Vec::with_capacity(indices.len());
        for index in indices {
            if self.cancel.load(Ordering::Relaxed) {
                info!("replay cancelled, stopping before interaction {index}");
                break;
            }
            let interaction = &session.interactions[index];
            let endpoint = format!(
                "{} {}",
                interaction.request.method, interaction.request.path
            );
            let outcome = self
                .replay_interaction(interaction, &classifier, &judge_options)
                .await;
            let (comparison, error) = match outcome {
                Ok(comparison) => (Some(comparison), None),
                Err(e) => {
                    warn!(%endpoint, "interaction replay failed: {e}");
                    (None, Some(e.to_string()))
                }
            };
            results.push(InteractionResult {
                endpoint,
                method: interaction.request.method.clone(),
                path: interaction.request.path.clone(),
                request_hash: interaction.request_hash.clone(),
                timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                comparison,
                error,
            });
        }

        let summary = summarize(results.iter().map(|r| r.comparison.as_ref()));
        Ok(SessionResult {
            summary,
            interaction_results: results,
            comparison_mode: self.options.mode.as_str().to_string(),
            filter: self.options.filter.clone().filter(|f| !f.is_empty()),
            filtered_stats,
        })
    }

    /// Replay multiple sessions sequentially; per-session state is
    /// independent.
    pub async fn verify_sessions(
        &self,
        sessions: &[Session],
    ) -> Result<Vec<SessionResult>, VerifyError> {
        let mut results = Vec::with_capacity(sessions.len());
        for session in sessions {
            results.push(self.replay_session(session).await?);
        }
        Ok(results)
    }

    async fn replay_interaction(
        &self,
        interaction: &crate::session::Interaction,
        classifier: &ToleranceClassifier,
        judge_options: &JudgeOptions,
    ) -> Result<ComparisonResult, VerifyError> {
        let replayed = self.obtain_response(&interaction.request).await?;
        let header_diffs =
            diff_headers(&interaction.response.headers, &replayed.headers, classifier);
        let body_diff = diff_bodies(&interaction.response.body, &replayed.body, classifier);
        Ok(judge(
            interaction.response.status_code,
            replayed.status_code,
            header_diffs,
            body_diff,
            judge_options,
        ))
    }

    async fn obtain_response(
        &self,
        request: &RecordedRequest,
    ) -> Result<RecordedResponse, VerifyError> {
        if self.options.use_dynamic_responses {
            if let Some(templates) = &self.templates {
                if let Some(outcome) = templates.synthesize(request) {
                    return outcome;
                }
            }
        }
        self.live_replay(request).await
    }

    async fn live_replay(
        &self,
        request: &RecordedRequest,
    ) -> Result<RecordedResponse, VerifyError> {
        let base = self.options.target_base_url.as_deref().ok_or_else(|| {
            VerifyError::input(
                "no matching template route and no target base URL configured",
            )
        })?;
        let url = format!("{}{}", base.trim_end_matches('/'), request.path);
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| VerifyError::input(format!("invalid HTTP method '{}'", request.method)))?;

        let mut builder = self.client.request(method, &url);
        let query_pairs = flatten_query(&request.query);
        if !query_pairs.is_empty() {
            builder = builder.query(&query_pairs);
        }
        for (name, value) in &request.headers {
            let lowered = name.to_lowercase();
            if lowered == "host" || lowered == "content-length" {
                continue;
            }
            builder = builder.header(name, value);
        }
        if !request.body.is_null() {
            builder = builder.json(&request.body);
        }

        let outcome = tokio::select! {
            outcome = builder.send() => outcome,
            _ = self.wait_cancelled() => {
                return Err(VerifyError::Comparison(
                    "replay cancelled during HTTP call".to_string(),
                ))
            }
        };

        let response = match outcome {
            Ok(response) => response,
            Err(e) => return Ok(transport_error_response(&e.to_string())),
        };
        let status_code = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = match response.text().await {
            Ok(text) if text.is_empty() => Value::Null,
            Ok(text) => Value::String(text),
            Err(e) => return Ok(transport_error_response(&e.to_string())),
        };
        Ok(RecordedResponse {
            status_code,
            status_message: None,
            headers,
            body,
        })
    }

    async fn wait_cancelled(&self) {
        while !self.cancel.load(Ordering::Relaxed) {
            sleep(Duration::from_millis(50)).await;
        }
    }
}

/// Flatten the query mapping into pairs; array values repeat the key.
fn flatten_query(query: &serde_json::Map<String, Value>) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (key, value) in query {
        match value {
            Value::Array(items) => {
                for item in items {
                    pairs.push((key.clone(), value_to_text(item)));
                }
            }
            Value::Null => {}
            other => pairs.push((key.clone(), value_to_text(other))),
        }
    }
    pairs
}

fn transport_error_response(message: &str) -> RecordedResponse {
    RecordedResponse {
        status_code: 500,
        status_message: None,
        headers: Default::default(),
        body: serde_json::json!({ "replayError": true, "error": message }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::Route;
    use crate::session::{Interaction, SessionMetadata};
    use serde_json::json;
    use std::collections::HashMap;

    fn template_route(pattern: &str, status: u16, template: Value) -> Route {
        Route {
            pattern: pattern.to_string(),
            method: "GET".to_string(),
            status_code: status,
            headers: HashMap::from([(
                "Content-Type".to_string(),
                "application/json".to_string(),
            )]),
            template,
        }
    }

    fn interaction(path: &str, recorded_body: Value) -> Interaction {
        let request = RecordedRequest {
            method: "GET".to_string(),
            path: path.to_string(),
            headers: HashMap::new(),
            query: serde_json::Map::new(),
            body: json!(null),
        };
        Interaction {
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            request_hash: request.fingerprint(),
            tags: Vec::new(),
            request,
            response: RecordedResponse {
                status_code: 200,
                status_message: None,
                headers: HashMap::from([(
                    "Content-Type".to_string(),
                    "application/json".to_string(),
                )]),
                body: recorded_body,
            },
            duration_ms: None,
        }
    }

    fn session_of(interactions: Vec<Interaction>) -> Session {
        Session {
            session_id: "test".to_string(),
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            metadata: SessionMetadata::default(),
            interactions,
        }
    }

    fn engine_with_routes(routes: Vec<Route>, options: ReplayOptions) -> ReplayEngine {
        let mut resolver = RouteResolver::new();
        for route in routes {
            resolver.register(route);
        }
        ReplayEngine::new(options, ToleranceConfig::default())
            .unwrap()
            .with_template_provider(TemplateEngine::new(resolver))
    }

    #[tokio::test]
    async fn test_template_replay_compatible() {
        let engine = engine_with_routes(
            vec![template_route(
                "/api/items/:id",
                200,
                json!({"id": "{{request.params.id}}"}),
            )],
            ReplayOptions::default(),
        );
        let session = session_of(vec![interaction("/api/items/42", json!({"id": "42"}))]);

        let result = engine.replay_session(&session).await.unwrap();
        assert_eq!(result.summary.total, 1);
        assert_eq!(result.summary.compatible, 1);
        assert_eq!(result.summary.compatibility_score, 100.0);
    }

    #[tokio::test]
    async fn test_render_error_counted_not_fatal() {
        let engine = engine_with_routes(
            vec![
                template_route("/broken", 200, json!("{{request.missing}}")),
                template_route("/ok", 200, json!({"fine": true})),
            ],
            ReplayOptions::default(),
        );
        let session = session_of(vec![
            interaction("/broken", json!({})),
            interaction("/ok", json!({"fine": true})),
        ]);

        let result = engine.replay_session(&session).await.unwrap();
        assert_eq!(result.summary.total, 2);
        assert_eq!(result.summary.errors, 1);
        assert_eq!(result.summary.compatible, 1);
        assert!(result.interaction_results[0].error.is_some());
    }

    #[tokio::test]
    async fn test_no_template_and_no_target_is_error() {
        let engine =
            ReplayEngine::new(ReplayOptions::default(), ToleranceConfig::default()).unwrap();
        let session = session_of(vec![interaction("/api/items/1", json!({}))]);

        let result = engine.replay_session(&session).await.unwrap();
        assert_eq!(result.summary.errors, 1);
    }

    #[tokio::test]
    async fn test_transport_error_becomes_replay_error_response() {
        // Unroutable address: reqwest fails fast with a connect error.
        let options = ReplayOptions {
            target_base_url: Some("http://127.0.0.1:9".to_string()),
            use_dynamic_responses: false,
            request_timeout: Duration::from_secs(2),
            ..ReplayOptions::default()
        };
        let engine = ReplayEngine::new(options, ToleranceConfig::default()).unwrap();
        let session = session_of(vec![interaction("/api/items/1", json!({"a": 1}))]);

        let result = engine.replay_session(&session).await.unwrap();
        let comparison = result.interaction_results[0].comparison.as_ref().unwrap();
        assert_eq!(comparison.replayed_status, 500);
        assert!(!comparison.is_compatible);
    }

    #[tokio::test]
    async fn test_filter_limits_replay() {
        let engine = engine_with_routes(
            vec![template_route("/a", 200, json!({})), template_route("/b", 200, json!({}))],
            ReplayOptions {
                filter: Some(SessionFilter {
                    routes: vec!["/a".to_string()],
                    ..SessionFilter::default()
                }),
                ..ReplayOptions::default()
            },
        );
        let session = session_of(vec![interaction("/a", json!({})), interaction("/b", json!({}))]);

        let result = engine.replay_session(&session).await.unwrap();
        assert_eq!(result.summary.total, 1);
        let stats = result.filtered_stats.unwrap();
        assert_eq!(stats.original_count, 2);
        assert_eq!(stats.filtered_count, 1);
    }

    #[tokio::test]
    async fn test_filter_excluding_everything_yields_empty_result() {
        let engine = engine_with_routes(
            vec![template_route("/a", 200, json!({}))],
            ReplayOptions {
                filter: Some(SessionFilter {
                    methods: vec!["DELETE".to_string()],
                    ..SessionFilter::default()
                }),
                ..ReplayOptions::default()
            },
        );
        let session = session_of(vec![interaction("/a", json!({}))]);

        let result = engine.replay_session(&session).await.unwrap();
        assert_eq!(result.summary.total, 0);
        assert_eq!(result.filtered_stats.unwrap().filtered_count, 0);
    }

    #[tokio::test]
    async fn test_cancellation_stops_iteration() {
        let engine = engine_with_routes(
            vec![template_route("/a", 200, json!({}))],
            ReplayOptions::default(),
        );
        engine.cancel_handle().store(true, Ordering::Relaxed);
        let session = session_of(vec![interaction("/a", json!({})), interaction("/a", json!({}))]);

        let result = engine.replay_session(&session).await.unwrap();
        assert_eq!(result.summary.total, 0);
    }

    #[tokio::test]
    async fn test_no_dynamic_skips_templates() {
        // With dynamic responses disabled and no target, replay errors out
        // even though a matching template exists.
        let engine = engine_with_routes(
            vec![template_route("/a", 200, json!({}))],
            ReplayOptions {
                use_dynamic_responses: false,
                ..ReplayOptions::default()
            },
        );
        let session = session_of(vec![interaction("/a", json!({}))]);
        let result = engine.replay_session(&session).await.unwrap();
        assert_eq!(result.summary.errors, 1);
    }

    #[tokio::test]
    async fn test_batch_verification_sequential() {
        let engine = engine_with_routes(
            vec![template_route("/a", 200, json!({"ok": true}))],
            ReplayOptions::default(),
        );
        let sessions = vec![
            session_of(vec![interaction("/a", json!({"ok": true}))]),
            session_of(vec![interaction("/a", json!({"ok": false}))]),
        ];

        let results = engine.verify_sessions(&sessions).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].summary.compatible, 1);
        assert_eq!(results[1].summary.compatible, 1); // modified bool is non-breaking
        assert_eq!(results[1].summary.total_changes, 1);
    }

    #[test]
    fn test_flatten_query_arrays_repeat_key() {
        let mut query = serde_json::Map::new();
        query.insert("tag".to_string(), json!(["a", "b"]));
        query.insert("page".to_string(), json!("2"));
        let pairs = flatten_query(&query);
        assert!(pairs.contains(&("tag".to_string(), "a".to_string())));
        assert!(pairs.contains(&("tag".to_string(), "b".to_string())));
        assert!(pairs.contains(&("page".to_string(), "2".to_string())));
    }
}
