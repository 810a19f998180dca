//! Render-context assembly for matched routes.
//!
//! The default context carries the request's fields, a clock value, and a
//! random block. Registered builders run in registration order and are
//! shallow-merged over the default; a failing builder is logged and its
//! contribution skipped.

use crate::error::VerifyError;
use chrono::Utc;
use rand::Rng;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

/// Request view handed to context builders.
#[derive(Debug)]
pub struct RenderRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub query: &'a Map<String, Value>,
    pub params: &'a HashMap<String, String>,
    pub body: &'a Value,
}

type BuilderFn = Box<dyn Fn(&RenderRequest<'_>) -> Result<Map<String, Value>, VerifyError> + Send + Sync>;

/// Builds the value templates render against.
#[derive(Default)]
pub struct ContextBuilder {
    builders: Vec<BuilderFn>,
}

impl ContextBuilder {
    pub fn new() -> Self {
        ContextBuilder::default()
    }

    /// Register an additional builder; its output overrides earlier keys.
    pub fn register(
        &mut self,
        builder: impl Fn(&RenderRequest<'_>) -> Result<Map<String, Value>, VerifyError>
            + Send
            + Sync
            + 'static,
    ) {
        self.builders.push(Box::new(builder));
    }

    /// Assemble the render context. Building never fails; builder errors
    /// are swallowed after logging.
    pub fn build(&self, request: &RenderRequest<'_>) -> Value {
        let mut context = default_context(request);
        for (index, builder) in self.builders.iter().enumerate() {
            match builder(request) {
                Ok(extra) => {
                    for (key, value) in extra {
                        context.insert(key, value);
                    }
                }
                Err(e) => warn!("context builder {index} failed, skipping: {e}"),
            }
        }
        Value::Object(context)
    }
}

fn default_context(request: &RenderRequest<'_>) -> Map<String, Value> {
    let mut req = Map::new();
    req.insert("method".to_string(), Value::String(request.method.to_string()));
    req.insert("path".to_string(), Value::String(request.path.to_string()));
    req.insert("query".to_string(), Value::Object(request.query.clone()));
    req.insert(
        "params".to_string(),
        Value::Object(
            request
                .params
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        ),
    );
    req.insert("body".to_string(), request.body.clone());

    let mut random = Map::new();
    random.insert("uuid".to_string(), Value::String(Uuid::new_v4().to_string()));
    random.insert(
        "number".to_string(),
        Value::Number(rand::thread_rng().gen_range(0..1000).into()),
    );

    let mut context = Map::new();
    context.insert("request".to_string(), Value::Object(req));
    context.insert(
        "timestamp".to_string(),
        Value::Number(Utc::now().timestamp_millis().into()),
    );
    context.insert("random".to_string(), Value::Object(random));
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_request<'a>(
        query: &'a Map<String, Value>,
        params: &'a HashMap<String, String>,
        body: &'a Value,
    ) -> RenderRequest<'a> {
        RenderRequest {
            method: "GET",
            path: "/api/products/42",
            query,
            params,
            body,
        }
    }

    #[test]
    fn test_default_context_shape() {
        let query: Map<String, Value> =
            [("page".to_string(), json!("1"))].into_iter().collect();
        let params: HashMap<String, String> =
            [("id".to_string(), "42".to_string())].into_iter().collect();
        let body = json!(null);

        let context = ContextBuilder::new().build(&sample_request(&query, &params, &body));

        assert_eq!(context["request"]["method"], json!("GET"));
        assert_eq!(context["request"]["path"], json!("/api/products/42"));
        assert_eq!(context["request"]["params"]["id"], json!("42"));
        assert_eq!(context["request"]["query"]["page"], json!("1"));
        assert!(context["timestamp"].as_i64().unwrap() > 1_600_000_000_000);

        let number = context["random"]["number"].as_i64().unwrap();
        assert!((0..1000).contains(&number));
        assert!(uuid::Uuid::parse_str(context["random"]["uuid"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn test_builders_merge_in_order() {
        let mut builder = ContextBuilder::new();
        builder.register(|_| {
            let mut extra = Map::new();
            extra.insert("env".to_string(), json!("staging"));
            extra.insert("version".to_string(), json!(1));
            Ok(extra)
        });
        builder.register(|_| {
            let mut extra = Map::new();
            extra.insert("version".to_string(), json!(2));
            Ok(extra)
        });

        let query = Map::new();
        let params = HashMap::new();
        let body = json!(null);
        let context = builder.build(&sample_request(&query, &params, &body));
        assert_eq!(context["env"], json!("staging"));
        assert_eq!(context["version"], json!(2));
    }

    #[test]
    fn test_failing_builder_is_skipped() {
        let mut builder = ContextBuilder::new();
        builder.register(|_| Err(VerifyError::render("boom")));
        builder.register(|_| {
            let mut extra = Map::new();
            extra.insert("after".to_string(), json!(true));
            Ok(extra)
        });

        let query = Map::new();
        let params = HashMap::new();
        let body = json!(null);
        let context = builder.build(&sample_request(&query, &params, &body));
        assert_eq!(context["after"], json!(true));
        assert!(context.get("request").is_some());
    }
}
