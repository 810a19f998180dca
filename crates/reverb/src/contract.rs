//! Contract import: turning response examples into template routes.
//!
//! Only the OpenAPI-3 subset
//! `paths.<pattern>.<method>.responses.<status>.{examples|content.application/json.{example,examples}}`
//! is consulted. Each selected 2xx response registers a route keyed
//! `(path, method, status)` with a JSON content type.

use crate::error::VerifyError;
use crate::route::{Route, RouteResolver};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

const HTTP_METHODS: &[&str] = &["get", "post", "put", "patch", "delete", "head", "options"];

/// Which 2xx response supplies the template when an operation lists
/// several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImportStrategy {
    /// First 2xx status seen for the operation (ascending status order).
    #[default]
    FirstSuccess,
    /// Use the given status when the operation defines it, else fall back
    /// to the first 2xx.
    PreferStatus(u16),
}

/// Load a contract document from a JSON or YAML file.
pub fn load_contract<P: AsRef<Path>>(path: P) -> Result<Value, VerifyError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&contents)
            .map_err(|e| VerifyError::input(format!("malformed contract {path:?}: {e}"))),
        Some("yaml") | Some("yml") => serde_yaml::from_str(&contents)
            .map_err(|e| VerifyError::input(format!("malformed contract {path:?}: {e}"))),
        other => Err(VerifyError::input(format!(
            "unsupported contract file extension '{}'",
            other.unwrap_or("")
        ))),
    }
}

/// Walk a contract document and register a template route per operation.
/// Returns the number of routes registered.
pub fn configure_from_contract(
    resolver: &mut RouteResolver,
    contract: &Value,
    strategy: ImportStrategy,
) -> Result<usize, VerifyError> {
    let paths = contract
        .get("paths")
        .and_then(Value::as_object)
        .ok_or_else(|| VerifyError::input("contract has no 'paths' object"))?;

    let mut registered = 0;
    for (pattern, operations) in paths {
        let Some(operations) = operations.as_object() else {
            continue;
        };
        for (method, operation) in operations {
            if !HTTP_METHODS.contains(&method.to_lowercase().as_str()) {
                continue;
            }
            let Some(responses) = operation.get("responses").and_then(Value::as_object) else {
                continue;
            };

            let success: Vec<(u16, &Value)> = responses
                .iter()
                .filter_map(|(status, response)| {
                    let code: u16 = status.parse().ok()?;
                    (200..300).contains(&code).then_some((code, response))
                })
                .collect();
            let chosen = match strategy {
                ImportStrategy::FirstSuccess => success.first(),
                ImportStrategy::PreferStatus(preferred) => success
                    .iter()
                    .find(|(code, _)| *code == preferred)
                    .or_else(|| success.first()),
            };
            let Some((status_code, response)) = chosen else {
                continue;
            };
            let Some(template) = extract_example(response) else {
                debug!(%pattern, %method, "no usable example, skipping");
                continue;
            };

            resolver.register(Route {
                pattern: openapi_pattern_to_route(pattern),
                method: method.to_uppercase(),
                status_code: *status_code,
                headers: HashMap::from([(
                    "Content-Type".to_string(),
                    "application/json".to_string(),
                )]),
                template,
            });
            registered += 1;
        }
    }
    info!(routes = registered, "configured routes from contract");
    Ok(registered)
}

/// Extract an example template from a response object, in priority order.
fn extract_example(response: &Value) -> Option<Value> {
    // 1. `examples` directly on the response.
    if let Some(examples) = response.get("examples").and_then(Value::as_object) {
        if let Some(first) = examples.values().next() {
            return Some(coerce_example(first));
        }
    }

    let json_content = response
        .get("content")
        .and_then(|c| c.get("application/json"));

    // 2. `content["application/json"].example`.
    if let Some(example) = json_content.and_then(|c| c.get("example")) {
        return Some(coerce_example(example));
    }

    // 3. `content["application/json"].examples`, unwrapping `.value`.
    if let Some(examples) = json_content
        .and_then(|c| c.get("examples"))
        .and_then(Value::as_object)
    {
        if let Some(first) = examples.values().next() {
            let unwrapped = first.get("value").unwrap_or(first);
            return Some(coerce_example(unwrapped));
        }
    }

    None
}

/// String examples are JSON-parsed when possible, else wrapped as
/// `{"value": <s>}`. Everything else passes through.
fn coerce_example(example: &Value) -> Value {
    match example {
        Value::String(s) => serde_json::from_str(s)
            .unwrap_or_else(|_| serde_json::json!({ "value": s })),
        other => other.clone(),
    }
}

/// Translate OpenAPI `{name}` path parameters to the resolver's `:name`
/// form; `:name` patterns pass through untouched.
fn openapi_pattern_to_route(pattern: &str) -> String {
    pattern
        .split('/')
        .map(|segment| {
            if segment.starts_with('{') && segment.ends_with('}') && segment.len() > 2 {
                format!(":{}", &segment[1..segment.len() - 1])
            } else {
                segment.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
