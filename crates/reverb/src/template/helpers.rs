//! Built-in template helpers.

use super::{value_to_text, TemplateCompiler};
use chrono::{SecondsFormat, Utc};
use rand::Rng;
use serde_json::Value;
use uuid::Uuid;

pub(super) fn register_builtins(compiler: &mut TemplateCompiler) {
    compiler.register_helper("uuid", |_args| {
        Ok(Value::String(Uuid::new_v4().to_string()))
    });

    // `now` with an optional chrono format string; default is ISO-8601
    // with milliseconds and offset.
    compiler.register_helper("now", |args| {
        let now = Utc::now();
        match args.first() {
            None => Ok(Value::String(
                now.to_rfc3339_opts(SecondsFormat::Millis, true),
            )),
            Some(format) => {
                let format = value_to_text(format);
                Ok(Value::String(now.format(&format).to_string()))
            }
        }
    });

    compiler.register_helper("timestamp", |_args| {
        Ok(Value::Number(Utc::now().timestamp_millis().into()))
    });

    // Uniform integer in [min, max]; arguments parse best-effort and
    // default to [0, 100]. The result is a string with integer content.
    compiler.register_helper("random", |args| {
        let min = args.first().map(as_integer).unwrap_or(0);
        let max = args.get(1).map(as_integer).unwrap_or(100);
        let (low, high) = if min <= max { (min, max) } else { (max, min) };
        let n = rand::thread_rng().gen_range(low..=high);
        Ok(Value::String(n.to_string()))
    });

    compiler.register_helper("concat", |args| {
        Ok(Value::String(args.iter().map(value_to_text).collect()))
    });
}

fn as_integer(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}
