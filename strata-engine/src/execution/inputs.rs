// Input Rendering
// Substitutes `${local...}` and `${dependency...}` references in a unit's merged inputs

use crate::config::{ConfigError, ResolvedConfig};
use crate::execution::mock::DependencyOutputs;

use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Render a unit's inputs against its locals and resolved dependency outputs
///
/// A string that is exactly one reference takes the referenced value with its type; references
/// embedded in longer strings are stringified.
pub fn render_inputs(
    config: &ResolvedConfig,
    dependencies: &BTreeMap<String, DependencyOutputs>,
) -> Result<Map<String, Value>, ConfigError> {
    let scope = Scope {
        unit: config.unit.to_string(),
        locals: config.locals(),
        dependencies,
    };

    config
        .inputs()
        .into_iter()
        .map(|(key, value)| Ok((key, scope.render(&value)?)))
        .collect()
}

struct Scope<'a> {
    unit: String,
    locals: Map<String, Value>,
    dependencies: &'a BTreeMap<String, DependencyOutputs>,
}

impl Scope<'_> {
    fn render(&self, value: &Value) -> Result<Value, ConfigError> {
        match value {
            Value::String(s) => self.render_string(s),
            Value::Array(items) => items
                .iter()
                .map(|item| self.render(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| Ok((k.clone(), self.render(v)?)))
                .collect::<Result<Map<_, _>, ConfigError>>()
                .map(Value::Object),
            other => Ok(other.clone()),
        }
    }

    fn render_string(&self, s: &str) -> Result<Value, ConfigError> {
        if let Some(reference) = whole_reference(s) {
            return self.lookup(reference).cloned();
        }

        let mut out = String::with_capacity(s.len());
        let mut rest = s;
        while let Some(start) = rest.find("${") {
            let Some(len) = rest[start + 2..].find('}') else {
                break;
            };
            out.push_str(&rest[..start]);

            let reference = rest[start + 2..start + 2 + len].trim();
            match self.lookup(reference)? {
                Value::String(text) => out.push_str(text),
                other => out.push_str(&other.to_string()),
            }
            rest = &rest[start + 3 + len..];
        }
        out.push_str(rest);

        Ok(Value::String(out))
    }

    fn lookup(&self, reference: &str) -> Result<&Value, ConfigError> {
        let unresolved = || ConfigError::UnresolvedReference {
            unit: self.unit.clone(),
            reference: reference.to_string(),
        };

        let parts: Vec<&str> = reference.split('.').map(str::trim).collect();
        let (root, path) = match parts.as_slice() {
            ["local", key, path @ ..] => (self.locals.get(*key), path),
            ["dependency", name, "outputs", key, path @ ..] => {
                let outputs = self
                    .dependencies
                    .get(*name)
                    .and_then(DependencyOutputs::outputs);
                (outputs.and_then(|o| o.get(*key)), path)
            }
            _ => return Err(unresolved()),
        };

        let mut current = root.ok_or_else(unresolved)?;
        for segment in path {
            current = match current {
                Value::Object(map) => map.get(*segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            }
            .ok_or_else(unresolved)?;
        }
        Ok(current)
    }
}

fn whole_reference(s: &str) -> Option<&str> {
    let inner = s.trim().strip_prefix("${")?.strip_suffix('}')?;
    if inner.contains('}') || inner.contains("${") {
        return None;
    }
    Some(inner.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UnitPath;
    use serde_json::json;

    fn config(values: Value) -> ResolvedConfig {
        ResolvedConfig {
            unit: UnitPath::new("dev/compute").unwrap(),
            values: values.as_object().unwrap().clone(),
        }
    }

    fn network(outputs: Value) -> BTreeMap<String, DependencyOutputs> {
        let mut deps = BTreeMap::new();
        deps.insert(
            "network".to_string(),
            DependencyOutputs::Mock(outputs.as_object().unwrap().clone()),
        );
        deps
    }

    #[test]
    fn test_whole_reference_keeps_type() {
        let config = config(json!({
            "locals": {"replicas": 3, "zones": ["a", "b"]},
            "inputs": {
                "count": "${local.replicas}",
                "zones": "${local.zones}",
                "vpc": "${dependency.network.outputs.vpc_id}"
            }
        }));

        let inputs = render_inputs(&config, &network(json!({"vpc_id": "mock-vpc"}))).unwrap();
        assert_eq!(inputs["count"], 3);
        assert_eq!(inputs["zones"], json!(["a", "b"]));
        assert_eq!(inputs["vpc"], "mock-vpc");
    }

    #[test]
    fn test_embedded_references_are_stringified() {
        let config = config(json!({
            "locals": {"project": "demo", "replicas": 3},
            "inputs": {
                "name": "${local.project}-vm-${local.replicas}",
                "nested": {"list": ["prefix-${dependency.network.outputs.vpc_id}"]},
                "untouched": "cost: $5 {literal}"
            }
        }));

        let inputs = render_inputs(&config, &network(json!({"vpc_id": "vpc-123"}))).unwrap();
        assert_eq!(inputs["name"], "demo-vm-3");
        assert_eq!(inputs["nested"]["list"][0], "prefix-vpc-123");
        assert_eq!(inputs["untouched"], "cost: $5 {literal}");
    }

    #[test]
    fn test_nested_output_paths() {
        let config = config(json!({
            "inputs": {
                "subnet": "${dependency.network.outputs.subnets.1.id}"
            }
        }));

        let deps = network(json!({"subnets": [{"id": "s-0"}, {"id": "s-1"}]}));
        let inputs = render_inputs(&config, &deps).unwrap();
        assert_eq!(inputs["subnet"], "s-1");
    }

    #[test]
    fn test_unknown_references_fail() {
        for reference in [
            "${local.missing}",
            "${dependency.database.outputs.host}",
            "${dependency.network.outputs.nope}",
            "${var.region}",
        ] {
            let config = config(json!({"inputs": {"x": reference}}));
            let err = render_inputs(&config, &network(json!({"vpc_id": "v"}))).unwrap_err();
            assert!(
                matches!(err, ConfigError::UnresolvedReference { .. }),
                "{reference} should be unresolved"
            );
        }
    }

    #[test]
    fn test_skipped_outputs_cannot_be_referenced() {
        let mut deps = BTreeMap::new();
        deps.insert("network".to_string(), DependencyOutputs::Skipped);

        let config = config(json!({"inputs": {"vpc": "${dependency.network.outputs.vpc_id}"}}));
        assert!(render_inputs(&config, &deps).is_err());
    }

    #[test]
    fn test_no_inputs() {
        let config = config(json!({"locals": {"a": 1}}));
        assert!(render_inputs(&config, &BTreeMap::new()).unwrap().is_empty());
    }
}
