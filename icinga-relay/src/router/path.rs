//! Dotted-path helpers over `serde_json::Value`.

use serde_json::{Map, Value};

/// Resolve `a.b.0.c` against `value`. Numeric segments index into arrays.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Merge `append` into `target`.
///
/// Where both sides hold an array the result is their union, first
/// occurrences kept in order. Every other key is overwritten.
pub fn merge_append(target: &mut Map<String, Value>, append: &Map<String, Value>) {
    for (key, value) in append {
        if let (Some(Value::Array(existing)), Value::Array(extra)) = (target.get_mut(key), value) {
            let mut merged: Vec<Value> = Vec::with_capacity(existing.len() + extra.len());
            for item in existing.iter().chain(extra) {
                if !merged.contains(item) {
                    merged.push(item.clone());
                }
            }
            *existing = merged;
            continue;
        }

        target.insert(key.clone(), value.clone());
    }
}

/// Flatten nested filter tables into `(dotted.path, expected)` pairs.
///
/// `{ host = { name = "web1" } }` and `{ "host.name" = "web1" }` are the same
/// filter.
pub fn flatten_filter(filter: &Map<String, Value>) -> Vec<(String, Value)> {
    let mut flat = Vec::new();
    flatten_into(&mut flat, None, filter);
    flat
}

fn flatten_into(flat: &mut Vec<(String, Value)>, prefix: Option<&str>, map: &Map<String, Value>) {
    for (key, value) in map {
        let path = match prefix {
            Some(prefix) => format!("{}.{}", prefix, key),
            None => key.clone(),
        };
        match value {
            Value::Object(nested) => flatten_into(flat, Some(&path), nested),
            other => flat.push((path, other.clone())),
        }
    }
}
