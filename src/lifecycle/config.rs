// src/lifecycle/config.rs

//! Script configuration: deep merge, dotted lookup and environment flattening

use crate::error::{Error, Result};
use crate::registry::ConfigMap;
use serde_json::Value;
use std::collections::BTreeMap;

/// Prefix of every configuration variable handed to scripts
pub const ENV_PREFIX: &str = "quill";

/// Merge `overlay` into `base`; nested objects merge key by key, anything
/// else in `overlay` replaces the value in `base`
pub fn deep_merge(base: &mut ConfigMap, overlay: &ConfigMap) {
    for (key, value) in overlay {
        if let (Some(Value::Object(existing)), Value::Object(incoming)) = (base.get_mut(key), value) {
            deep_merge(existing, incoming);
            continue;
        }
        base.insert(key.clone(), value.clone());
    }
}

/// Look up a dotted key (`db.primary.host`)
pub fn lookup<'a>(config: &'a ConfigMap, dotted: &str) -> Option<&'a Value> {
    let mut parts = dotted.split('.');
    let mut current = config.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Set a dotted key, creating intermediate objects
pub fn set_dotted(config: &mut ConfigMap, dotted: &str, value: Value) -> Result<()> {
    let parts: Vec<&str> = dotted.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(Error::Config(format!("Invalid config key '{}'", dotted)));
    }

    let (last, parents) = parts
        .split_last()
        .ok_or_else(|| Error::Config("Empty config key".to_string()))?;
    let mut current = config;
    for part in parents {
        let slot = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(ConfigMap::new()));
        if !slot.is_object() {
            *slot = Value::Object(ConfigMap::new());
        }
        current = slot
            .as_object_mut()
            .ok_or_else(|| Error::Config(format!("Invalid config key '{}'", dotted)))?;
    }
    current.insert(last.to_string(), value);
    Ok(())
}

/// Parse a `key=value` override; the value is JSON when it parses as JSON,
/// otherwise a plain string
pub fn parse_override(pair: &str) -> Result<(String, Value)> {
    let (key, raw) = pair
        .split_once('=')
        .ok_or_else(|| Error::Config(format!("Expected key=value, got '{}'", pair)))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(Error::Config(format!("Missing key in '{}'", pair)));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

/// Turn a config key path into an environment-safe name
fn env_name(path: &[&str]) -> String {
    std::iter::once(ENV_PREFIX)
        .chain(path.iter().copied())
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Scalar rendering used for both environment values and templates
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Flatten nested config into `quill_`-prefixed variables
///
/// `{"db": {"host": "x"}}` becomes `quill_db_host=x`. Arrays are passed as
/// their JSON text.
pub fn flatten(config: &ConfigMap) -> BTreeMap<String, String> {
    fn walk<'a>(map: &'a ConfigMap, path: &mut Vec<&'a str>, out: &mut BTreeMap<String, String>) {
        for (key, value) in map {
            path.push(key);
            match value {
                Value::Object(nested) => walk(nested, path, out),
                other => {
                    out.insert(env_name(path), render_value(other));
                }
            }
            path.pop();
        }
    }

    let mut out = BTreeMap::new();
    walk(config, &mut Vec::new(), &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> ConfigMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_deep_merge_later_wins() {
        let mut base = map(json!({"db": {"host": "a", "port": 5432}, "name": "x"}));
        deep_merge(&mut base, &map(json!({"db": {"host": "b"}, "tags": [1]})));
        assert_eq!(
            Value::Object(base),
            json!({"db": {"host": "b", "port": 5432}, "name": "x", "tags": [1]})
        );
    }

    #[test]
    fn test_flatten() {
        let env = flatten(&map(json!({
            "db": {"host": "h", "port": 5432},
            "feature-flags": {"beta": true},
            "list": ["a", "b"],
            "empty": null
        })));
        assert_eq!(env["quill_db_host"], "h");
        assert_eq!(env["quill_db_port"], "5432");
        assert_eq!(env["quill_feature_flags_beta"], "true");
        assert_eq!(env["quill_list"], r#"["a","b"]"#);
        assert_eq!(env["quill_empty"], "");
    }

    #[test]
    fn test_lookup_and_set_dotted() {
        let mut config = ConfigMap::new();
        set_dotted(&mut config, "db.primary.host", json!("h")).unwrap();
        set_dotted(&mut config, "port", json!(80)).unwrap();
        assert_eq!(lookup(&config, "db.primary.host"), Some(&json!("h")));
        assert_eq!(lookup(&config, "port"), Some(&json!(80)));
        assert_eq!(lookup(&config, "db.missing"), None);
        assert!(set_dotted(&mut config, "a..b", json!(1)).is_err());
    }

    #[test]
    fn test_parse_override() {
        assert_eq!(parse_override("port=8080").unwrap(), ("port".to_string(), json!(8080)));
        assert_eq!(
            parse_override("name=web server").unwrap(),
            ("name".to_string(), json!("web server"))
        );
        assert!(parse_override("novalue").is_err());
    }
}
