//! Template compilation and rendering.
//!
//! Templates are strings (or structured values whose leaf strings) contain
//! `{{...}}` placeholder expressions. Compilation parses each placeholder
//! once into an AST; rendering evaluates the AST against a context value.
//! There is no render-time string re-interpolation and no process-global
//! helper registry: helpers are scoped to a `TemplateCompiler` instance.
//!
//! Supported token forms:
//! - `{{name}}` - helper call or dotted context lookup (`request.params.id`)
//! - `{{name arg1 arg2}}` - helper call with arguments
//! - `{{#if_eq a b}}...{{else}}...{{/if_eq}}` - conditional block

mod helpers;

use parking_lot::RwLock;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

/// Helper implementation: resolved argument values in, value out.
pub type HelperFn = Arc<dyn Fn(&[Value]) -> Result<Value, TemplateError> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("unknown helper '{0}'")]
    UnknownHelper(String),
    #[error("unresolved context path '{0}'")]
    UnresolvedPath(String),
    #[error("malformed template: {0}")]
    Parse(String),
    #[error("helper '{name}' failed: {message}")]
    Helper { name: String, message: String },
}

/// A literal value or a context lookup used as a helper/block argument.
#[derive(Debug, Clone)]
enum Arg {
    Literal(Value),
    Lookup(String),
}

#[derive(Debug, Clone)]
enum Expr {
    Lookup(String),
    Helper { name: String, args: Vec<Arg> },
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Expr(Expr),
    IfEq {
        left: Arg,
        right: Arg,
        then_branch: Vec<Segment>,
        else_branch: Vec<Segment>,
    },
}

#[derive(Debug, Clone)]
enum Node {
    /// Placeholder-free subtree, returned as-is on every render.
    Constant(Value),
    Text(Vec<Segment>),
    Array(Vec<Node>),
    Object(Vec<(String, Node)>),
}

/// A compiled template: a pure function from context to value.
#[derive(Debug)]
pub struct CompiledTemplate {
    root: Node,
    fingerprint: String,
}

impl CompiledTemplate {
    /// Deterministic hash of the template's source form.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// Compiles templates and renders them against a context. Helpers are
/// registered per instance; compiled templates are memoized by source
/// fingerprint.
pub struct TemplateCompiler {
    helpers: HashMap<String, HelperFn>,
    cache: RwLock<HashMap<String, Arc<CompiledTemplate>>>,
}

impl Default for TemplateCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateCompiler {
    /// A compiler with the built-in helper set: `uuid`, `now`, `timestamp`,
    /// `random`, `concat`.
    pub fn new() -> Self {
        let mut compiler = TemplateCompiler {
            helpers: HashMap::new(),
            cache: RwLock::new(HashMap::new()),
        };
        helpers::register_builtins(&mut compiler);
        compiler
    }

    /// Register (or replace) a helper by name.
    pub fn register_helper(
        &mut self,
        name: &str,
        helper: impl Fn(&[Value]) -> Result<Value, TemplateError> + Send + Sync + 'static,
    ) {
        self.helpers.insert(name.to_string(), Arc::new(helper));
    }

    pub fn fingerprint_of(source: &Value) -> String {
        let encoded = serde_json::to_string(source).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(encoded.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Compile a template value, reusing a cached compilation when the
    /// source fingerprint matches. Returns whether this call compiled
    /// fresh (for metrics) alongside the template.
    pub fn compile(&self, source: &Value) -> Result<(Arc<CompiledTemplate>, bool), TemplateError> {
        let fingerprint = Self::fingerprint_of(source);
        if let Some(cached) = self.cache.read().get(&fingerprint) {
            return Ok((Arc::clone(cached), false));
        }
        let root = self.compile_node(source)?;
        let compiled = Arc::new(CompiledTemplate { root, fingerprint });
        self.cache
            .write()
            .insert(compiled.fingerprint.clone(), Arc::clone(&compiled));
        Ok((compiled, true))
    }

    pub fn clear_cache(&self) {
        self.cache.write().clear();
    }

    fn compile_node(&self, source: &Value) -> Result<Node, TemplateError> {
        match source {
            Value::String(s) if s.contains("{{") => Ok(Node::Text(self.parse_segments(s)?)),
            Value::Array(items) => {
                if items.iter().any(contains_placeholder) {
                    let nodes = items
                        .iter()
                        .map(|item| self.compile_node(item))
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(Node::Array(nodes))
                } else {
                    Ok(Node::Constant(source.clone()))
                }
            }
            Value::Object(map) => {
                if map.values().any(contains_placeholder) {
                    let fields = map
                        .iter()
                        .map(|(k, v)| Ok((k.clone(), self.compile_node(v)?)))
                        .collect::<Result<Vec<_>, TemplateError>>()?;
                    Ok(Node::Object(fields))
                } else {
                    Ok(Node::Constant(source.clone()))
                }
            }
            other => Ok(Node::Constant(other.clone())),
        }
    }

    // ===== Parsing =====

    fn parse_segments(&self, input: &str) -> Result<Vec<Segment>, TemplateError> {
        struct BlockFrame {
            left: Arg,
            right: Arg,
            /// Segments preceding the block, restored on close.
            outer: Vec<Segment>,
            /// Set once `{{else}}` is seen.
            then_branch: Option<Vec<Segment>>,
        }

        let mut stack: Vec<BlockFrame> = Vec::new();
        let mut current: Vec<Segment> = Vec::new();
        let mut rest = input;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                current.push(Segment::Literal(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or_else(|| TemplateError::Parse(format!("unterminated '{{{{' in '{input}'")))?;
            let token = after[..end].trim();
            rest = &after[end + 2..];

            if let Some(block) = token.strip_prefix('#') {
                let mut parts = block.split_whitespace();
                match parts.next() {
                    Some("if_eq") => {
                        let (Some(left), Some(right)) = (parts.next(), parts.next()) else {
                            return Err(TemplateError::Parse("if_eq needs two arguments".into()));
                        };
                        stack.push(BlockFrame {
                            left: self.parse_arg(left),
                            right: self.parse_arg(right),
                            outer: std::mem::take(&mut current),
                            then_branch: None,
                        });
                    }
                    other => {
                        return Err(TemplateError::Parse(format!(
                            "unknown block helper '{}'",
                            other.unwrap_or("")
                        )))
                    }
                }
            } else if token == "else" {
                match stack.last_mut() {
                    Some(frame) if frame.then_branch.is_none() => {
                        frame.then_branch = Some(std::mem::take(&mut current));
                    }
                    _ => {
                        return Err(TemplateError::Parse(
                            "'else' outside an if_eq block".into(),
                        ))
                    }
                }
            } else if token == "/if_eq" {
                let frame = stack
                    .pop()
                    .ok_or_else(|| TemplateError::Parse("'/if_eq' without opening block".into()))?;
                let (then_branch, else_branch) = match frame.then_branch {
                    Some(then_branch) => (then_branch, std::mem::take(&mut current)),
                    None => (std::mem::take(&mut current), Vec::new()),
                };
                current = frame.outer;
                current.push(Segment::IfEq {
                    left: frame.left,
                    right: frame.right,
                    then_branch,
                    else_branch,
                });
            } else {
                current.push(Segment::Expr(self.parse_expr(token)?));
            }
        }
        if !rest.is_empty() {
            current.push(Segment::Literal(rest.to_string()));
        }
        if !stack.is_empty() {
            return Err(TemplateError::Parse("unclosed if_eq block".into()));
        }
        Ok(current)
    }

    fn parse_expr(&self, token: &str) -> Result<Expr, TemplateError> {
        let mut parts = token.split_whitespace();
        let name = parts
            .next()
            .ok_or_else(|| TemplateError::Parse("empty placeholder".into()))?;
        let args: Vec<Arg> = parts.map(|t| self.parse_arg(t)).collect();

        if self.helpers.contains_key(name) {
            return Ok(Expr::Helper {
                name: name.to_string(),
                args,
            });
        }
        if args.is_empty() {
            return Ok(Expr::Lookup(name.to_string()));
        }
        Err(TemplateError::UnknownHelper(name.to_string()))
    }

    /// Quoted strings and numeric/boolean/null tokens are literals; tokens
    /// containing `.` are context lookups; any other bare word is a
    /// literal string.
    fn parse_arg(&self, token: &str) -> Arg {
        if (token.starts_with('"') && token.ends_with('"') && token.len() >= 2)
            || (token.starts_with('\'') && token.ends_with('\'') && token.len() >= 2)
        {
            return Arg::Literal(Value::String(token[1..token.len() - 1].to_string()));
        }
        if let Ok(n) = token.parse::<i64>() {
            return Arg::Literal(Value::Number(n.into()));
        }
        if let Ok(f) = token.parse::<f64>() {
            if let Some(n) = serde_json::Number::from_f64(f) {
                return Arg::Literal(Value::Number(n));
            }
        }
        match token {
            "true" => return Arg::Literal(Value::Bool(true)),
            "false" => return Arg::Literal(Value::Bool(false)),
            "null" => return Arg::Literal(Value::Null),
            _ => {}
        }
        if token.contains('.') {
            Arg::Lookup(token.to_string())
        } else {
            Arg::Literal(Value::String(token.to_string()))
        }
    }

    // ===== Rendering =====

    /// Render a compiled template against a context.
    pub fn render(
        &self,
        template: &CompiledTemplate,
        context: &Value,
    ) -> Result<Value, TemplateError> {
        self.render_node(&template.root, context)
    }

    fn render_node(&self, node: &Node, context: &Value) -> Result<Value, TemplateError> {
        match node {
            Node::Constant(value) => Ok(value.clone()),
            Node::Text(segments) => self.render_segments(segments, context),
            Node::Array(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|item| self.render_node(item, context))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            Node::Object(fields) => {
                let mut map = serde_json::Map::new();
                for (key, value) in fields {
                    map.insert(key.clone(), self.render_node(value, context)?);
                }
                Ok(Value::Object(map))
            }
        }
    }

    /// A string that is exactly one expression renders to the expression's
    /// value (which may be non-string); mixed strings concatenate
    /// stringified segments.
    fn render_segments(&self, segments: &[Segment], context: &Value) -> Result<Value, TemplateError> {
        if let [Segment::Expr(expr)] = segments {
            return self.eval_expr(expr, context);
        }
        let mut out = String::new();
        self.render_to_text(segments, context, &mut out)?;
        Ok(Value::String(out))
    }

    fn render_to_text(
        &self,
        segments: &[Segment],
        context: &Value,
        out: &mut String,
    ) -> Result<(), TemplateError> {
        for segment in segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Expr(expr) => {
                    let value = self.eval_expr(expr, context)?;
                    out.push_str(&value_to_text(&value));
                }
                Segment::IfEq {
                    left,
                    right,
                    then_branch,
                    else_branch,
                } => {
                    let l = self.eval_arg(left, context)?;
                    let r = self.eval_arg(right, context)?;
                    let branch = if values_loosely_equal(&l, &r) {
                        then_branch
                    } else {
                        else_branch
                    };
                    self.render_to_text(branch, context, out)?;
                }
            }
        }
        Ok(())
    }

    fn eval_expr(&self, expr: &Expr, context: &Value) -> Result<Value, TemplateError> {
        match expr {
            Expr::Lookup(path) => lookup(context, path)
                .cloned()
                .ok_or_else(|| TemplateError::UnresolvedPath(path.clone())),
            Expr::Helper { name, args } => {
                let helper = self
                    .helpers
                    .get(name)
                    .ok_or_else(|| TemplateError::UnknownHelper(name.clone()))?;
                let resolved = args
                    .iter()
                    .map(|arg| self.eval_arg(arg, context))
                    .collect::<Result<Vec<_>, _>>()?;
                helper(&resolved)
            }
        }
    }

    fn eval_arg(&self, arg: &Arg, context: &Value) -> Result<Value, TemplateError> {
        match arg {
            Arg::Literal(value) => Ok(value.clone()),
            Arg::Lookup(path) => lookup(context, path)
                .cloned()
                .ok_or_else(|| TemplateError::UnresolvedPath(path.clone())),
        }
    }
}

fn contains_placeholder(value: &Value) -> bool {
    match value {
        Value::String(s) => s.contains("{{"),
        Value::Array(items) => items.iter().any(contains_placeholder),
        Value::Object(map) => map.values().any(contains_placeholder),
        _ => false,
    }
}

/// Resolve a dotted path against a context value.
fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = context;
    for part in path.split('.') {
        match current {
            Value::Object(map) => current = map.get(part)?,
            Value::Array(items) => {
                let index: usize = part.parse().ok()?;
                current = items.get(index)?;
            }
            _ => return None,
        }
    }
    Some(current)
}

/// Stringify a value for concatenation into a text template.
pub(crate) fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn values_loosely_equal(a: &Value, b: &Value) -> bool {
    crate::canonical::leaf_equal(a, b) || value_to_text(a) == value_to_text(b)
}
