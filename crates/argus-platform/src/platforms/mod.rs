pub mod evm;
pub mod http;

use argus_common::types::FactValue;
use serde_json::Value;

/// Convert an extracted JSON node to a fact value. Numbers keep integer
/// precision when they have it; containers degrade to their JSON text.
pub(crate) fn json_to_fact(value: &Value) -> FactValue {
    match value {
        Value::Null => FactValue::Null,
        Value::Bool(b) => FactValue::Bool(*b),
        Value::Number(n) => n
            .as_i64()
            .map(FactValue::Int)
            .or_else(|| n.as_f64().map(FactValue::Float))
            .unwrap_or(FactValue::Null),
        Value::String(s) => FactValue::Str(s.clone()),
        other => FactValue::Str(other.to_string()),
    }
}

/// Walk a dotted path through objects and array indices
/// (`"data.pools.0.apy"`).
pub(crate) fn value_at_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(root, |node, segment| {
        match segment.parse::<usize>() {
            Ok(index) => node.get(index),
            Err(_) => node.get(segment),
        }
    })
}
