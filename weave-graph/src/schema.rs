//! Validates a node's `data` blob against an optional schema definition
//! attached to a `SYSTEM.schema` node for the same (layer, type).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationErrorKind;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FieldSchema {
    #[serde(default)]
    pub field_type: Option<String>,
    #[serde(default)]
    pub enum_values: Option<Vec<String>>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchemaDef {
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub fields: HashMap<String, FieldSchema>,
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Validates `data` (must be a JSON object) against `schema`: required
/// fields present, declared types matching, enum membership, and numeric
/// min/max bounds where declared.
pub fn validate(data: &Value, schema: &SchemaDef) -> Result<(), ValidationErrorKind> {
    let object = data.as_object();

    for required_field in &schema.required {
        let present = object
            .and_then(|o| o.get(required_field))
            .map(|v| !v.is_null())
            .unwrap_or(false);
        if !present {
            return Err(ValidationErrorKind::MissingRequired(required_field.clone()));
        }
    }

    for (field, field_schema) in &schema.fields {
        let Some(value) = object.and_then(|o| o.get(field)) else {
            continue;
        };
        if value.is_null() {
            continue;
        }

        if let Some(expected) = &field_schema.field_type {
            let actual = type_name(value);
            if actual != expected {
                return Err(ValidationErrorKind::InvalidType {
                    field: field.clone(),
                    expected: expected.clone(),
                });
            }
        }

        if let Some(allowed) = &field_schema.enum_values {
            if let Some(s) = value.as_str() {
                if !allowed.iter().any(|a| a == s) {
                    return Err(ValidationErrorKind::InvalidValue {
                        field: field.clone(),
                        detail: format!("{s} is not one of {allowed:?}"),
                    });
                }
            }
        }

        if let Some(n) = value.as_f64() {
            if let Some(min) = field_schema.min {
                if n < min {
                    return Err(ValidationErrorKind::InvalidValue {
                        field: field.clone(),
                        detail: format!("{n} is below minimum {min}"),
                    });
                }
            }
            if let Some(max) = field_schema.max {
                if n > max {
                    return Err(ValidationErrorKind::InvalidValue {
                        field: field.clone(),
                        detail: format!("{n} is above maximum {max}"),
                    });
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task_schema() -> SchemaDef {
        let mut fields = HashMap::new();
        fields.insert(
            "status".to_string(),
            FieldSchema {
                field_type: Some("string".to_string()),
                enum_values: Some(vec!["open".to_string(), "done".to_string()]),
                ..Default::default()
            },
        );
        fields.insert(
            "priority".to_string(),
            FieldSchema {
                field_type: Some("number".to_string()),
                min: Some(0.0),
                max: Some(10.0),
                ..Default::default()
            },
        );
        SchemaDef {
            required: vec!["status".to_string()],
            fields,
        }
    }

    #[test]
    fn valid_data_passes() {
        let data = json!({"status": "open", "priority": 5});
        assert!(validate(&data, &task_schema()).is_ok());
    }

    #[test]
    fn missing_required_field_fails() {
        let data = json!({"priority": 5});
        assert!(matches!(
            validate(&data, &task_schema()),
            Err(ValidationErrorKind::MissingRequired(_))
        ));
    }

    #[test]
    fn wrong_type_fails() {
        let data = json!({"status": 5});
        assert!(matches!(
            validate(&data, &task_schema()),
            Err(ValidationErrorKind::InvalidType { .. })
        ));
    }

    #[test]
    fn enum_violation_fails() {
        let data = json!({"status": "bogus"});
        assert!(matches!(
            validate(&data, &task_schema()),
            Err(ValidationErrorKind::InvalidValue { .. })
        ));
    }

    #[test]
    fn numeric_out_of_range_fails() {
        let data = json!({"status": "open", "priority": 99});
        assert!(matches!(
            validate(&data, &task_schema()),
            Err(ValidationErrorKind::InvalidValue { .. })
        ));
    }
}
