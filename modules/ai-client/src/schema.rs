//! Strict JSON schema generation for structured output.

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;

/// Types usable as a structured-output reply shape.
///
/// Strict mode on the backend requires:
/// 1. `additionalProperties: false` on every object schema
/// 2. every property listed in `required`, nullable ones included
/// 3. fully inlined schemas (no `$ref`)
pub trait StructuredOutput: JsonSchema + DeserializeOwned {
    /// Generate the strict-mode schema for this type.
    fn strict_schema() -> serde_json::Value {
        let schema = schema_for!(Self);
        let mut value = serde_json::to_value(schema).unwrap_or_default();

        enforce_strict_objects(&mut value);
        inline_definitions(&mut value);

        if let serde_json::Value::Object(map) = &mut value {
            map.remove("definitions");
            map.remove("$schema");
            map.remove("title");
        }

        value
    }

    fn schema_name() -> String {
        <Self as JsonSchema>::schema_name()
    }
}

impl<T: JsonSchema + DeserializeOwned> StructuredOutput for T {}

/// Recursively close every object schema and mark all of its properties
/// required.
fn enforce_strict_objects(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            if map.get("type") == Some(&serde_json::Value::String("object".to_string())) {
                map.insert(
                    "additionalProperties".to_string(),
                    serde_json::Value::Bool(false),
                );
                if let Some(serde_json::Value::Object(props)) = map.get("properties") {
                    let keys: Vec<serde_json::Value> = props
                        .keys()
                        .map(|k| serde_json::Value::String(k.clone()))
                        .collect();
                    map.insert("required".to_string(), serde_json::Value::Array(keys));
                }
            }
            for (_, child) in map.iter_mut() {
                enforce_strict_objects(child);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items.iter_mut() {
                enforce_strict_objects(item);
            }
        }
        _ => {}
    }
}

/// Replace `$ref` references with the referenced definition bodies.
fn inline_definitions(value: &mut serde_json::Value) {
    let definitions = match value {
        serde_json::Value::Object(map) => map.get("definitions").cloned(),
        _ => None,
    };
    if let Some(defs) = definitions {
        inline_refs(value, &defs);
    }
}

fn inline_refs(value: &mut serde_json::Value, definitions: &serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(serde_json::Value::String(path)) = map.get("$ref").cloned() {
                if let Some(name) = path.strip_prefix("#/definitions/") {
                    if let Some(def) = definitions.get(name) {
                        *value = def.clone();
                        inline_refs(value, definitions);
                        return;
                    }
                }
            }

            // schemars wraps referenced enums in single-element allOf blocks.
            if let Some(serde_json::Value::Array(all_of)) = map.get("allOf").cloned() {
                if all_of.len() == 1 {
                    if let Some(inner) = all_of.into_iter().next() {
                        *value = inner;
                        inline_refs(value, definitions);
                        return;
                    }
                }
            }

            for (_, child) in map.iter_mut() {
                inline_refs(child, definitions);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items.iter_mut() {
                inline_refs(item, definitions);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::JsonSchema;
    use serde::Deserialize;

    #[derive(Deserialize, JsonSchema)]
    struct EvidenceEntry {
        violation: String,
        confidence: f64,
    }

    #[derive(Deserialize, JsonSchema)]
    struct ProfileAnalysis {
        username: String,
        evidence: Vec<EvidenceEntry>,
        confidence: f64,
    }

    #[test]
    fn objects_are_closed_and_fully_required() {
        let schema = ProfileAnalysis::strict_schema();
        let obj = schema.as_object().unwrap();

        assert_eq!(obj.get("additionalProperties"), Some(&serde_json::Value::Bool(false)));

        let required: Vec<&str> = obj["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert!(required.contains(&"username"));
        assert!(required.contains(&"evidence"));
        assert!(required.contains(&"confidence"));
    }

    #[test]
    fn nullable_fields_are_still_required() {
        #[derive(Deserialize, JsonSchema)]
        struct WithOptional {
            name: String,
            note: Option<String>,
        }

        let schema = WithOptional::strict_schema();
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required.len(), 2);
    }

    #[test]
    fn nested_definitions_are_inlined() {
        let schema = ProfileAnalysis::strict_schema();
        let rendered = serde_json::to_string(&schema).unwrap();
        assert!(!rendered.contains("$ref"));
        assert!(!schema.as_object().unwrap().contains_key("definitions"));

        let items = &schema["properties"]["evidence"]["items"];
        assert_eq!(items["type"], "object");
        assert_eq!(items["additionalProperties"], false);
    }
}
