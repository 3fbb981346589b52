use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::error::{ConfigMergeError, ConfigMergeResult};
use super::value::ConfigValue;

/// Expected shape of a schema node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaKind {
    #[default]
    Any,
    Object,
    Array,
    String,
    Integer,
    Number,
    Boolean,
    Null,
}

impl SchemaKind {
    fn accepts(self, value: &ConfigValue) -> bool {
        match (self, value) {
            (Self::Any, _) => true,
            (Self::Object, ConfigValue::Map(_)) => true,
            (Self::Array, ConfigValue::Sequence(_)) => true,
            (Self::String, ConfigValue::String(_)) => true,
            (Self::Integer, ConfigValue::Integer(_)) => true,
            (Self::Number, ConfigValue::Integer(_) | ConfigValue::Float(_)) => true,
            (Self::Boolean, ConfigValue::Bool(_)) => true,
            (Self::Null, ConfigValue::Null) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Any => "any",
            Self::Object => "object",
            Self::Array => "array",
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Null => "null",
        };
        f.write_str(name)
    }
}

/// Declared shape of a merged configuration
///
/// ```yaml
/// type: object
/// required: [site]
/// properties:
///   site:
///     type: object
///     properties:
///       name: { type: string }
///   collections:
///     type: array
///     items: { type: string }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigSchema {
    #[serde(rename = "type")]
    pub kind: SchemaKind,
    pub required: Vec<String>,
    pub properties: BTreeMap<String, ConfigSchema>,
    pub items: Option<Box<ConfigSchema>>,
    /// Whether keys not listed in `properties` are allowed
    pub allow_additional: bool,
}

impl Default for ConfigSchema {
    fn default() -> Self {
        Self {
            kind: SchemaKind::Any,
            required: Vec::new(),
            properties: BTreeMap::new(),
            items: None,
            allow_additional: true,
        }
    }
}

impl ConfigSchema {
    pub fn of(kind: SchemaKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn property(mut self, name: impl Into<String>, schema: ConfigSchema) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    #[must_use]
    pub fn require(mut self, name: impl Into<String>) -> Self {
        self.required.push(name.into());
        self
    }

    #[must_use]
    pub fn items(mut self, schema: ConfigSchema) -> Self {
        self.items = Some(Box::new(schema));
        self
    }

    #[must_use]
    pub fn closed(mut self) -> Self {
        self.allow_additional = false;
        self
    }

    /// Check a value against this schema; the error names the first offending path
    pub fn validate(&self, value: &ConfigValue) -> ConfigMergeResult<()> {
        self.validate_at(value, "")
    }

    fn validate_at(&self, value: &ConfigValue, path: &str) -> ConfigMergeResult<()> {
        if !self.kind.accepts(value) {
            return Err(violation(path, self.kind.to_string(), value.kind_name()));
        }

        if let ConfigValue::Map(map) = value {
            for key in &self.required {
                if !map.contains_key(key) {
                    return Err(violation(
                        &join_key(path, key),
                        self.properties
                            .get(key)
                            .map(|schema| format!("required {}", schema.kind))
                            .unwrap_or_else(|| "required value".to_string()),
                        "missing",
                    ));
                }
            }
            for (key, child) in map {
                let child_path = join_key(path, key);
                match self.properties.get(key) {
                    Some(schema) => schema.validate_at(child, &child_path)?,
                    None if !self.allow_additional => {
                        return Err(violation(&child_path, "no additional keys", child.kind_name()));
                    }
                    None => {}
                }
            }
        }

        if let (ConfigValue::Sequence(items), Some(schema)) = (value, &self.items) {
            for (index, item) in items.iter().enumerate() {
                schema.validate_at(item, &format!("{path}[{index}]"))?;
            }
        }

        Ok(())
    }
}

fn join_key(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn violation(path: &str, expected: impl Into<String>, found: impl Into<String>) -> ConfigMergeError {
    ConfigMergeError::Validation {
        path: if path.is_empty() {
            "<root>".to_string()
        } else {
            path.to_string()
        },
        expected: expected.into(),
        found: found.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> ConfigSchema {
        ConfigSchema::of(SchemaKind::Object)
            .require("site")
            .property(
                "site",
                ConfigSchema::of(SchemaKind::Object)
                    .property("name", ConfigSchema::of(SchemaKind::String)),
            )
            .property(
                "collections",
                ConfigSchema::of(SchemaKind::Array).items(ConfigSchema::of(SchemaKind::String)),
            )
    }

    #[test]
    fn test_valid_tree_passes() {
        let value = ConfigValue::from(json!({
            "site": {"name": "Latinos"},
            "collections": ["users", "posts"],
            "extra": 1
        }));
        assert!(schema().validate(&value).is_ok());
    }

    #[test]
    fn test_violation_names_path_and_shape() {
        let value = ConfigValue::from(json!({
            "site": {"name": 42}
        }));
        let error = schema().validate(&value).unwrap_err();
        assert_eq!(
            error,
            ConfigMergeError::Validation {
                path: "site.name".to_string(),
                expected: "string".to_string(),
                found: "integer".to_string(),
            }
        );
    }

    #[test]
    fn test_array_items_are_checked() {
        let value = ConfigValue::from(json!({
            "site": {},
            "collections": ["users", true]
        }));
        match schema().validate(&value) {
            Err(ConfigMergeError::Validation { path, .. }) => assert_eq!(path, "collections[1]"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_missing_required_and_closed_objects() {
        let missing = schema().validate(&ConfigValue::empty_map()).unwrap_err();
        assert!(matches!(missing, ConfigMergeError::Validation { ref path, .. } if path == "site"));

        let closed = ConfigSchema::of(SchemaKind::Object)
            .property("a", ConfigSchema::default())
            .closed();
        let error = closed
            .validate(&ConfigValue::from(json!({"a": 1, "b": 2})))
            .unwrap_err();
        assert!(matches!(error, ConfigMergeError::Validation { ref path, .. } if path == "b"));
    }

    #[test]
    fn test_schema_deserializes_from_yaml() {
        let yaml = "type: object\nrequired: [site]\nproperties:\n  site:\n    type: object\n";
        let parsed: ConfigSchema = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(parsed.kind, SchemaKind::Object);
        assert!(parsed.allow_additional);
        assert_eq!(parsed.required, vec!["site".to_string()]);
    }
}
