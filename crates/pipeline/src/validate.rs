//! Structured-output validation against the declared schema.
//!
//! The model's raw text is reduced to a JSON object (stripping markdown
//! fences when present), then every declared field is checked. All problems
//! are reported in one error so the re-prompt can fix them together.

use std::collections::BTreeMap;

use serde_json::Value;

use rowboat_shared::{FieldType, OutputSchema, Result, RowboatError};

/// Validated output columns, keyed by field name, values stringified for
/// the output dataset.
pub type ValidatedOutput = BTreeMap<String, String>;

/// Check `raw` against `schema`, returning the accepted field values.
pub fn validate(raw: &str, schema: &OutputSchema) -> Result<ValidatedOutput> {
    let object = extract_object(raw)?;

    let mut output = ValidatedOutput::new();
    let mut problems: Vec<String> = Vec::new();

    for field in &schema.fields {
        let value = match object.get(&field.name) {
            None | Some(Value::Null) => {
                if field.required {
                    problems.push(format!("missing required field '{}'", field.name));
                }
                continue;
            }
            Some(value) => value,
        };

        match check_field(value, field.kind, &field.options) {
            Ok(stringified) => {
                output.insert(field.name.clone(), stringified);
            }
            Err(problem) => problems.push(format!("field '{}': {problem}", field.name)),
        }
    }

    if problems.is_empty() {
        Ok(output)
    } else {
        Err(RowboatError::validation(problems.join("; ")))
    }
}

/// Reduce raw model text to a JSON object.
fn extract_object(raw: &str) -> Result<serde_json::Map<String, Value>> {
    let candidate = strip_fences(raw);

    let parsed: Value = serde_json::from_str(candidate)
        .or_else(|_| {
            // Prose around the object: take the outermost braces
            let start = candidate.find('{');
            let end = candidate.rfind('}');
            match (start, end) {
                (Some(s), Some(e)) if s < e => serde_json::from_str(&candidate[s..=e]),
                _ => serde_json::from_str(candidate),
            }
        })
        .map_err(|e| RowboatError::validation(format!("response is not valid JSON: {e}")))?;

    match parsed {
        Value::Object(map) => Ok(map),
        other => Err(RowboatError::validation(format!(
            "expected a JSON object, got {}",
            json_type_name(&other)
        ))),
    }
}

/// Strip a surrounding markdown code fence, if any.
fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence line
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches(['\r', '\n']);
    rest.strip_suffix("```").map(str::trim).unwrap_or(trimmed)
}

/// Check one value against its declared type. Exact matches only: enum
/// comparison is case-sensitive and no coercion between JSON types is done.
fn check_field(value: &Value, kind: FieldType, options: &[String]) -> std::result::Result<String, String> {
    match kind {
        FieldType::String => match value {
            Value::String(s) => Ok(s.clone()),
            other => Err(format!("expected string, got {}", json_type_name(other))),
        },
        FieldType::Int => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
            other => Err(format!("expected integer, got {}", json_type_name(other))),
        },
        FieldType::Float => match value {
            Value::Number(n) => Ok(n.to_string()),
            other => Err(format!("expected number, got {}", json_type_name(other))),
        },
        FieldType::Bool => match value {
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(format!("expected boolean, got {}", json_type_name(other))),
        },
        FieldType::Enum => match value {
            Value::String(s) if options.iter().any(|o| o == s) => Ok(s.clone()),
            Value::String(s) => Err(format!(
                "'{s}' is not one of the accepted values [{}]",
                options.join(", ")
            )),
            other => Err(format!("expected string, got {}", json_type_name(other))),
        },
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
