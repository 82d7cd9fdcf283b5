use serde_json::{Map, Value, json};

/// Post-processing applied to a successful upstream payload before it is
/// handed back through the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalizer {
    /// Pass the upstream JSON through untouched.
    Identity,
    /// Flatten the nested `Results[0].Result.Paths[*].Technologies[*]`
    /// structure of a domain lookup into one flat technology list.
    TechnologyList,
}

impl Normalizer {
    pub fn apply(self, payload: Value) -> Value {
        match self {
            Normalizer::Identity => payload,
            Normalizer::TechnologyList => flatten_technologies(&payload),
        }
    }
}

const TECHNOLOGY_FIELDS: [&str; 4] = ["Name", "Description", "Tag", "Link"];

/// Visible result when a lookup succeeded but detected nothing. Distinct
/// from an empty list so callers can tell "nothing detected" apart from a
/// structural miss.
fn no_technologies_marker() -> Value {
    json!({ "message": "No technologies found" })
}

fn flatten_technologies(payload: &Value) -> Value {
    let mut technologies = Vec::new();

    if let Some(paths) = payload
        .pointer("/Results/0/Result/Paths")
        .and_then(Value::as_array)
    {
        for path in paths {
            let Some(entries) = path.get("Technologies").and_then(Value::as_array) else {
                continue;
            };
            for entry in entries {
                let mut record = Map::new();
                for field in TECHNOLOGY_FIELDS {
                    let value = entry.get(field).and_then(Value::as_str).unwrap_or("");
                    record.insert(field.to_string(), Value::String(value.to_string()));
                }
                technologies.push(Value::Object(record));
            }
        }
    }

    if technologies.is_empty() {
        return no_technologies_marker();
    }
    Value::Array(technologies)
}
