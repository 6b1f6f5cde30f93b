// Layer Merging
// Override semantics applied when folding an ancestor chain into one effective configuration

use crate::config::error::ConfigError;

use serde_json::{Map, Value};

/// Suffix marking a list that appends to the inherited list of the same name
pub const CONCAT_SUFFIX: char = '+';

/// Identifies the unit and layer being merged, for error reporting
#[derive(Debug, Clone, Copy)]
pub struct MergeContext<'a> {
    pub unit: &'a str,
    pub layer: &'a str,
}

/// Fold `overlay` into `base`, with `overlay` being the more specific layer
///
/// Scalars from the overlay win, maps merge key by key and lists replace wholesale unless the
/// overlay key carries the concatenation suffix. A kind change between map, list and scalar is a
/// `MergeConflict`; `null` on either side never conflicts and an overlay `null` clears the value.
pub fn merge_into(
    base: &mut Map<String, Value>,
    overlay: &Map<String, Value>,
    ctx: MergeContext<'_>,
) -> Result<(), ConfigError> {
    let mut path = Vec::new();
    merge_map(base, overlay, ctx, &mut path)
}

fn merge_map(
    base: &mut Map<String, Value>,
    overlay: &Map<String, Value>,
    ctx: MergeContext<'_>,
    path: &mut Vec<String>,
) -> Result<(), ConfigError> {
    // Plain keys first so `name` and `name+` in one layer replace, then append
    let (directives, plain): (Vec<_>, Vec<_>) = overlay
        .iter()
        .partition(|(key, _)| concat_target(key).is_some());

    for (key, value) in plain {
        path.push(key.clone());
        merge_value(base, key, value, ctx, path)?;
        path.pop();
    }

    for (key, value) in directives {
        let Some(target) = concat_target(key) else {
            continue;
        };
        path.push(target.to_string());
        concat_value(base, target, value, ctx, path)?;
        path.pop();
    }

    Ok(())
}

fn merge_value(
    base: &mut Map<String, Value>,
    key: &str,
    incoming: &Value,
    ctx: MergeContext<'_>,
    path: &mut Vec<String>,
) -> Result<(), ConfigError> {
    if incoming.is_null() {
        base.insert(key.to_string(), Value::Null);
        return Ok(());
    }

    match base.get_mut(key) {
        None | Some(Value::Null) => {
            let value = normalize(incoming, ctx, path)?;
            base.insert(key.to_string(), value);
        }
        Some(Value::Object(existing)) => match incoming {
            Value::Object(overlay) => merge_map(existing, overlay, ctx, path)?,
            other => return Err(conflict(ctx, path, "map", kind_of(other))),
        },
        Some(existing) => {
            let existing_kind = kind_of(existing);
            let incoming_kind = kind_of(incoming);
            if existing_kind != incoming_kind {
                return Err(conflict(ctx, path, existing_kind, incoming_kind));
            }
            *existing = normalize(incoming, ctx, path)?;
        }
    }

    Ok(())
}

fn concat_value(
    base: &mut Map<String, Value>,
    key: &str,
    incoming: &Value,
    ctx: MergeContext<'_>,
    path: &mut Vec<String>,
) -> Result<(), ConfigError> {
    let Value::Array(items) = incoming else {
        return Err(ConfigError::invalid_document(
            ctx.layer,
            format!(
                "'{}{}' must be a list, found {}",
                path.join("."),
                CONCAT_SUFFIX,
                kind_of(incoming)
            ),
        ));
    };

    let mut appended = Vec::with_capacity(items.len());
    for item in items {
        appended.push(normalize(item, ctx, path)?);
    }

    match base.get_mut(key) {
        None | Some(Value::Null) => {
            base.insert(key.to_string(), Value::Array(appended));
        }
        Some(Value::Array(existing)) => existing.extend(appended),
        Some(other) => return Err(conflict(ctx, path, kind_of(other), "list")),
    }

    Ok(())
}

/// Resolve directives inside a value that has nothing to merge onto
fn normalize(
    value: &Value,
    ctx: MergeContext<'_>,
    path: &mut Vec<String>,
) -> Result<Value, ConfigError> {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            merge_map(&mut out, map, ctx, path)?;
            Ok(Value::Object(out))
        }
        Value::Array(items) => items
            .iter()
            .map(|item| normalize(item, ctx, path))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}

fn concat_target(key: &str) -> Option<&str> {
    key.strip_suffix(CONCAT_SUFFIX)
        .filter(|target| !target.is_empty())
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Object(_) => "map",
        Value::Array(_) => "list",
        Value::Bool(_) | Value::Number(_) | Value::String(_) => "scalar",
    }
}

fn conflict(
    ctx: MergeContext<'_>,
    path: &[String],
    existing: &'static str,
    incoming: &'static str,
) -> ConfigError {
    ConfigError::MergeConflict {
        unit: ctx.unit.to_string(),
        layer: ctx.layer.to_string(),
        key: path.join("."),
        existing,
        incoming,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CTX: MergeContext<'static> = MergeContext {
        unit: "dev/compute",
        layer: "dev/compute/unit.yaml",
    };

    fn merged(layers: &[Value]) -> Result<Value, ConfigError> {
        let mut base = Map::new();
        for layer in layers {
            merge_into(&mut base, layer.as_object().unwrap(), CTX)?;
        }
        Ok(Value::Object(base))
    }

    #[test]
    fn test_child_scalar_wins() {
        let result = merged(&[
            json!({"inputs": {"machine_type": "e2-medium", "zone": "a"}}),
            json!({"inputs": {"machine_type": "e2-standard-4"}}),
        ])
        .unwrap();

        assert_eq!(result["inputs"]["machine_type"], "e2-standard-4");
        assert_eq!(result["inputs"]["zone"], "a");
    }

    #[test]
    fn test_maps_merge_key_by_key() {
        let result = merged(&[
            json!({"inputs": {"labels": {"env": "dev"}}}),
            json!({"inputs": {"labels": {"team": "platform"}}}),
        ])
        .unwrap();

        assert_eq!(
            result["inputs"]["labels"],
            json!({"env": "dev", "team": "platform"})
        );
    }

    #[test]
    fn test_lists_replace_wholesale() {
        let result = merged(&[
            json!({"tags": ["a", "b"]}),
            json!({"tags": ["c"]}),
        ])
        .unwrap();

        assert_eq!(result["tags"], json!(["c"]));
    }

    #[test]
    fn test_concat_directive_appends() {
        let result = merged(&[
            json!({"inputs": {"tags": ["base"]}}),
            json!({"inputs": {"tags+": ["extra"]}}),
            json!({"inputs": {"tags+": ["leaf"]}}),
        ])
        .unwrap();

        assert_eq!(result["inputs"]["tags"], json!(["base", "extra", "leaf"]));
        assert!(result["inputs"].get("tags+").is_none());
    }

    #[test]
    fn test_concat_without_inherited_list() {
        let result = merged(&[json!({"nested": {"ports+": [80, 443]}})]).unwrap();
        assert_eq!(result["nested"]["ports"], json!([80, 443]));
    }

    #[test]
    fn test_replace_then_append_in_same_layer() {
        let result = merged(&[
            json!({"tags": ["old"]}),
            json!({"tags": ["new"], "tags+": ["more"]}),
        ])
        .unwrap();

        assert_eq!(result["tags"], json!(["new", "more"]));
    }

    #[test]
    fn test_kind_change_is_conflict() {
        let err = merged(&[
            json!({"inputs": {"labels": {"env": "dev"}}}),
            json!({"inputs": {"labels": "dev"}}),
        ])
        .unwrap_err();

        match err {
            ConfigError::MergeConflict {
                key,
                existing,
                incoming,
                ..
            } => {
                assert_eq!(key, "inputs.labels");
                assert_eq!(existing, "map");
                assert_eq!(incoming, "scalar");
            }
            other => panic!("expected merge conflict, got {other:?}"),
        }

        assert!(matches!(
            merged(&[json!({"zones": ["a"]}), json!({"zones": "a"})]),
            Err(ConfigError::MergeConflict { .. })
        ));
    }

    #[test]
    fn test_concat_onto_scalar_is_conflict() {
        let err = merged(&[json!({"tags": "a"}), json!({"tags+": ["b"]})]).unwrap_err();
        assert!(matches!(err, ConfigError::MergeConflict { .. }));

        let err = merged(&[json!({"tags+": "b"})]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDocument { .. }));
    }

    #[test]
    fn test_null_clears_and_never_conflicts() {
        let result = merged(&[
            json!({"inputs": {"labels": {"env": "dev"}}}),
            json!({"inputs": {"labels": null}}),
            json!({"inputs": {"labels": ["now", "a", "list"]}}),
        ])
        .unwrap();

        assert_eq!(result["inputs"]["labels"], json!(["now", "a", "list"]));

        let cleared = merged(&[json!({"a": 1}), json!({"a": null})]).unwrap();
        assert!(cleared["a"].is_null());
    }

    #[test]
    fn test_scalar_types_may_change() {
        let result = merged(&[json!({"count": "2"}), json!({"count": 3})]).unwrap();
        assert_eq!(result["count"], 3);
    }
}
