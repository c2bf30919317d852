/// Schema-driven field extraction
///
/// An agent describes, per entity type, where each unified field lives in its
/// raw payload. The generic mapper walks a raw record against that schema and
/// produces a JSON object keyed by unified field names, which is then
/// deserialized into the typed record.
use super::entities::EntityKind;
use crate::shared::errors::{AppError, AppResult};
use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value};
use std::fmt;

/// Value conversion applied after a path lookup
#[derive(Clone)]
pub enum Transform {
    /// Numbers and numeric strings become numbers
    Number,
    /// Any scalar becomes a string
    Text,
    Lowercase,
    /// A year number, or the leading year of a date string
    Year,
    /// Array of objects -> array of the named field
    Pluck(String),
    /// Array of `{lang: text}` objects (or a single one) -> one `{lang: text}` object
    LocalizedMap,
    /// Scalar or array -> array of strings
    StringList,
    Custom(fn(&Value) -> Option<Value>),
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transform::Number => write!(f, "Number"),
            Transform::Text => write!(f, "Text"),
            Transform::Lowercase => write!(f, "Lowercase"),
            Transform::Year => write!(f, "Year"),
            Transform::Pluck(field) => write!(f, "Pluck({})", field),
            Transform::LocalizedMap => write!(f, "LocalizedMap"),
            Transform::StringList => write!(f, "StringList"),
            Transform::Custom(_) => write!(f, "Custom"),
        }
    }
}

impl Transform {
    pub fn apply(&self, value: &Value) -> Option<Value> {
        match self {
            Transform::Number => to_number(value),
            Transform::Text => to_text(value).map(Value::String),
            Transform::Lowercase => to_text(value).map(|s| Value::String(s.to_lowercase())),
            Transform::Year => to_year(value),
            Transform::Pluck(field) => {
                let items = value.as_array()?;
                let plucked: Vec<Value> = items
                    .iter()
                    .filter_map(|item| resolve_path(item, field))
                    .filter(|v| !v.is_null())
                    .collect();
                Some(Value::Array(plucked))
            }
            Transform::LocalizedMap => {
                let mut merged = Map::new();
                let parts: Vec<&Value> = match value {
                    Value::Array(items) => items.iter().collect(),
                    other => vec![other],
                };
                for part in parts {
                    if let Value::Object(map) = part {
                        for (lang, text) in map {
                            if let Some(text) = to_text(text) {
                                merged.entry(lang.clone()).or_insert(Value::String(text));
                            }
                        }
                    }
                }
                Some(Value::Object(merged))
            }
            Transform::StringList => match value {
                Value::Array(items) => Some(Value::Array(
                    items
                        .iter()
                        .filter_map(to_text)
                        .map(Value::String)
                        .collect(),
                )),
                other => to_text(other).map(|s| Value::Array(vec![Value::String(s)])),
            },
            Transform::Custom(f) => f(value),
        }
    }
}

/// Where a unified field comes from
#[derive(Debug, Clone)]
pub enum FieldSource {
    /// Dotted path; numeric segments index arrays, `*` maps over an array
    Path(String),
    Transform { path: String, transform: Transform },
    Constant(Value),
    /// Array at `path` mapped element-wise with the agent's schema for `kind`
    Nested { path: String, kind: EntityKind },
}

impl FieldSource {
    pub fn path(path: impl Into<String>) -> Self {
        FieldSource::Path(path.into())
    }

    pub fn transform(path: impl Into<String>, transform: Transform) -> Self {
        FieldSource::Transform {
            path: path.into(),
            transform,
        }
    }

    pub fn constant(value: impl Into<Value>) -> Self {
        FieldSource::Constant(value.into())
    }

    pub fn nested(path: impl Into<String>, kind: EntityKind) -> Self {
        FieldSource::Nested {
            path: path.into(),
            kind,
        }
    }
}

/// Mapping unified field -> source for one entity type
#[derive(Debug, Clone, Default)]
pub struct EntitySchema {
    fields: Vec<(String, FieldSource)>,
}

impl EntitySchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, source: FieldSource) -> Self {
        self.fields.push((name.into(), source));
        self
    }

    pub fn fields(&self) -> &[(String, FieldSource)] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Look up a dotted path. Missing segments yield `None`.
pub fn resolve_path(value: &Value, path: &str) -> Option<Value> {
    if path.is_empty() {
        return Some(value.clone());
    }

    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, rest),
        None => (path, ""),
    };

    match (head, value) {
        ("*", Value::Array(items)) => Some(Value::Array(
            items
                .iter()
                .filter_map(|item| resolve_path(item, rest))
                .collect(),
        )),
        (segment, Value::Array(items)) => {
            let index: usize = segment.parse().ok()?;
            resolve_path(items.get(index)?, rest)
        }
        (segment, Value::Object(map)) => resolve_path(map.get(segment)?, rest),
        _ => None,
    }
}

/// Map one raw record into a unified-field object.
///
/// `nested` supplies schemas for `FieldSource::Nested` fields. Fields whose
/// source resolves to nothing are left out so typed defaults apply.
pub fn map_record<F>(raw: &Value, schema: &EntitySchema, nested: &F) -> Value
where
    F: Fn(EntityKind) -> Option<EntitySchema>,
{
    let mut out = Map::new();
    for (name, source) in schema.fields() {
        let value = match source {
            FieldSource::Path(path) => resolve_path(raw, path),
            FieldSource::Transform { path, transform } => {
                resolve_path(raw, path).and_then(|v| transform.apply(&v))
            }
            FieldSource::Constant(value) => Some(value.clone()),
            FieldSource::Nested { path, kind } => {
                let nested_schema = nested(*kind);
                match (resolve_path(raw, path), nested_schema) {
                    (Some(Value::Array(items)), Some(schema)) => Some(Value::Array(
                        items
                            .iter()
                            .map(|item| map_record(item, &schema, nested))
                            .collect(),
                    )),
                    _ => None,
                }
            }
        };

        if let Some(value) = value.filter(|v| !v.is_null()) {
            out.insert(name.clone(), value);
        }
    }
    Value::Object(out)
}

/// Map and deserialize in one go
pub fn map_typed<T, F>(raw: &Value, schema: &EntitySchema, nested: &F) -> AppResult<T>
where
    T: DeserializeOwned,
    F: Fn(EntityKind) -> Option<EntitySchema>,
{
    let mapped = map_record(raw, schema, nested);
    serde_json::from_value(mapped)
        .map_err(|e| AppError::MappingError(format!("Raw record does not fit schema: {}", e)))
}

fn to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn to_number(value: &Value) -> Option<Value> {
    match value {
        Value::Number(_) => Some(value.clone()),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        _ => None,
    }
}

fn to_year(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) => n.as_i64().map(|y| Value::from(y as i32)),
        Value::String(s) => s
            .trim()
            .get(..4)
            .and_then(|y| y.parse::<i32>().ok())
            .map(Value::from),
        Value::Object(map) => map.get("year").and_then(to_year),
        _ => None,
    }
}
