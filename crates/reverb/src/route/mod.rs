//! Route registration, pattern matching, and the match cache.
//!
//! Routes are insertion-ordered; matching iterates in registration order
//! and the first match wins. Patterns use `:name` for path parameters.
//! Both hits and misses are cached (misses store the absence to prevent
//! repeated scans); `clear_caches` invalidates everything after route
//! registration changes.

pub mod context;

use crate::template::{CompiledTemplate, TemplateCompiler, TemplateError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// A registered route: pattern + method + response template.
#[derive(Debug, Clone)]
pub struct Route {
    pub pattern: String,
    /// Uppercased HTTP method, or `"*"` for any.
    pub method: String,
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    /// Template source; compiled lazily on first use.
    pub template: Value,
}

/// A successful route resolution with extracted path parameters.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<Route>,
    pub params: HashMap<String, String>,
    index: usize,
}

/// Counters tracked by the resolver.
#[derive(Debug, Default)]
pub struct ResolverMetrics {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    template_compilations: AtomicU64,
    template_renders: AtomicU64,
    render_time_ns: AtomicU64,
}

/// Point-in-time metrics view, serialized into the performance report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub template_compilations: u64,
    pub template_renders: u64,
    pub total_render_time_ms: f64,
    pub avg_render_time_ms: f64,
}

impl ResolverMetrics {
    fn snapshot(&self) -> MetricsSnapshot {
        let renders = self.template_renders.load(Ordering::Relaxed);
        let total_ns = self.render_time_ns.load(Ordering::Relaxed);
        let total_ms = total_ns as f64 / 1_000_000.0;
        MetricsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            template_compilations: self.template_compilations.load(Ordering::Relaxed),
            template_renders: renders,
            total_render_time_ms: total_ms,
            avg_render_time_ms: if renders > 0 {
                total_ms / renders as f64
            } else {
                0.0
            },
        }
    }
}

type CachedMatch = Option<(usize, HashMap<String, String>)>;

/// Insertion-ordered route table with memoized resolution and a per-route
/// compiled-template cache.
pub struct RouteResolver {
    routes: Vec<Arc<Route>>,
    match_cache: RwLock<HashMap<String, CachedMatch>>,
    compiled: RwLock<HashMap<usize, Arc<CompiledTemplate>>>,
    compiler: TemplateCompiler,
    metrics: ResolverMetrics,
}

impl Default for RouteResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteResolver {
    pub fn new() -> Self {
        RouteResolver {
            routes: Vec::new(),
            match_cache: RwLock::new(HashMap::new()),
            compiled: RwLock::new(HashMap::new()),
            compiler: TemplateCompiler::new(),
            metrics: ResolverMetrics::default(),
        }
    }

    /// Access the compiler to register custom helpers before replay.
    pub fn compiler_mut(&mut self) -> &mut TemplateCompiler {
        &mut self.compiler
    }

    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    /// Register a route. Invalidates the match caches.
    pub fn register(&mut self, mut route: Route) {
        if route.method != "*" {
            route.method = route.method.to_uppercase();
        }
        debug!(pattern = %route.pattern, method = %route.method, "registered route");
        self.routes.push(Arc::new(route));
        self.clear_caches();
    }

    /// Invalidate match and compiled-template caches.
    pub fn clear_caches(&self) {
        self.match_cache.write().clear();
        self.compiled.write().clear();
        self.compiler.clear_cache();
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Resolve a request to the first matching route, consulting the
    /// positive+negative cache first.
    pub fn resolve(&self, method: &str, path: &str) -> Option<RouteMatch> {
        let key = format!("{}-{}", method.to_uppercase(), path);

        if let Some(cached) = self.match_cache.read().get(&key) {
            self.metrics.cache_hits.fetch_add(1, Ordering::Relaxed);
            return cached.as_ref().map(|(index, params)| RouteMatch {
                route: Arc::clone(&self.routes[*index]),
                params: params.clone(),
                index: *index,
            });
        }
        self.metrics.cache_misses.fetch_add(1, Ordering::Relaxed);

        let found = self.scan(method, path);
        self.match_cache.write().insert(
            key,
            found
                .as_ref()
                .map(|m| (m.index, m.params.clone())),
        );
        found
    }

    fn scan(&self, method: &str, path: &str) -> Option<RouteMatch> {
        for (index, route) in self.routes.iter().enumerate() {
            if route.method != "*" && !route.method.eq_ignore_ascii_case(method) {
                continue;
            }
            if let Some(params) = match_pattern(&route.pattern, path) {
                return Some(RouteMatch {
                    route: Arc::clone(route),
                    params,
                    index,
                });
            }
        }
        None
    }

    /// Render the matched route's template against a context, compiling
    /// lazily and keeping per-route compilations cached.
    pub fn render(&self, matched: &RouteMatch, context: &Value) -> Result<Value, TemplateError> {
        let compiled = {
            let cache = self.compiled.read();
            cache.get(&matched.index).cloned()
        };
        let compiled = match compiled {
            Some(compiled) => compiled,
            None => {
                let (compiled, fresh) = self.compiler.compile(&matched.route.template)?;
                if fresh {
                    self.metrics
                        .template_compilations
                        .fetch_add(1, Ordering::Relaxed);
                }
                self.compiled
                    .write()
                    .insert(matched.index, Arc::clone(&compiled));
                compiled
            }
        };

        let started = Instant::now();
        let rendered = self.compiler.render(&compiled, context)?;
        self.metrics
            .render_time_ns
            .fetch_add(started.elapsed().as_nanos() as u64, Ordering::Relaxed);
        self.metrics.template_renders.fetch_add(1, Ordering::Relaxed);
        Ok(rendered)
    }

    /// Eagerly compile every registered template.
    pub fn preload_templates(&self) -> Result<usize, TemplateError> {
        let mut compiled_count = 0;
        for (index, route) in self.routes.iter().enumerate() {
            if self.compiled.read().contains_key(&index) {
                continue;
            }
            let (compiled, fresh) = self.compiler.compile(&route.template)?;
            if fresh {
                self.metrics
                    .template_compilations
                    .fetch_add(1, Ordering::Relaxed);
            }
            self.compiled.write().insert(index, compiled);
            compiled_count += 1;
        }
        debug!(count = compiled_count, "preloaded templates");
        Ok(compiled_count)
    }
}

/// Match a path against a `:name` pattern, extracting parameters.
fn match_pattern(pattern: &str, path: &str) -> Option<HashMap<String, String>> {
    let pattern_parts: Vec<&str> = pattern.split('/').collect();
    let path_parts: Vec<&str> = path.split('/').collect();
    if pattern_parts.len() != path_parts.len() {
        return None;
    }

    let mut params = HashMap::new();
    for (pattern_part, path_part) in pattern_parts.iter().zip(path_parts.iter()) {
        if let Some(name) = pattern_part.strip_prefix(':') {
            params.insert(name.to_string(), path_part.to_string());
        } else if pattern_part != path_part {
            return None;
        }
    }
    Some(params)
}
