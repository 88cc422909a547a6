/*
Copyright 2024, Zep Software, Inc.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! Declared response shapes and their structural check

use serde_json::{json, Map, Value};
use std::fmt;

use crate::helpers::json_type_name;

/// Shape of one value in an LLM response
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Str,
    Int,
    Float,
    /// Any JSON object, contents unchecked
    Dict,
    Null,
    /// Nested object with ordered, required keys
    Object(Vec<(String, Shape)>),
    /// Accepts any member; a `Null` member also allows the key to be absent
    OneOf(Vec<Shape>),
}

impl Shape {
    pub fn object<K: Into<String>>(fields: impl IntoIterator<Item = (K, Shape)>) -> Self {
        Shape::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn optional(shape: Shape) -> Self {
        match shape {
            Shape::OneOf(mut members) => {
                if !members.contains(&Shape::Null) {
                    members.push(Shape::Null);
                }
                Shape::OneOf(members)
            }
            other => Shape::OneOf(vec![other, Shape::Null]),
        }
    }

    pub fn is_nullable(&self) -> bool {
        match self {
            Shape::Null => true,
            Shape::OneOf(members) => members.iter().any(Shape::is_nullable),
            _ => false,
        }
    }

    /// Check `value` against this shape, reporting the first mismatch.
    ///
    /// Keys are visited in declaration order and nested objects are checked
    /// depth first, so the reported mismatch is always the earliest one.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        self.check_at(value, "top_level")
    }

    fn check_at(&self, value: &Value, at: &str) -> Result<(), String> {
        match self {
            Shape::Object(fields) => {
                let obj = value
                    .as_object()
                    .ok_or_else(|| format!("Expected dict, got {} at {}", json_type_name(value), at))?;
                for (key, shape) in fields {
                    match obj.get(key) {
                        None if shape.is_nullable() => {}
                        None => return Err(format!("Key {} not found at {}", key, at)),
                        Some(v) => shape.check_at(v, key)?,
                    }
                }
                Ok(())
            }
            leaf => {
                if leaf.accepts(value) {
                    Ok(())
                } else {
                    Err(format!(
                        "Expected {}, got {} at {}",
                        leaf,
                        json_type_name(value),
                        at
                    ))
                }
            }
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (Shape::Str, Value::String(_)) => true,
            (Shape::Int, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (Shape::Float, Value::Number(n)) => n.is_f64(),
            (Shape::Dict, Value::Object(_)) => true,
            (Shape::Null, Value::Null) => true,
            (Shape::Object(_), v) => self.check_at(v, "").is_ok(),
            (Shape::OneOf(members), v) => members.iter().any(|m| m.accepts(v)),
            _ => false,
        }
    }

    /// JSON schema for this shape.
    ///
    /// Nested objects deeper than `limit_layers` collapse into a plain object.
    pub fn json_schema(&self, title: &str, description: Option<&str>, limit_layers: Option<usize>) -> Value {
        let mut schema = self.schema_at(title, 1, limit_layers);
        if let (Some(obj), Some(doc)) = (schema.as_object_mut(), description) {
            obj.insert("description".to_string(), Value::String(doc.to_string()));
        }
        schema
    }

    fn schema_at(&self, title: &str, layer: usize, limit_layers: Option<usize>) -> Value {
        match self {
            Shape::Str => json!({"type": "string"}),
            Shape::Int => json!({"type": "integer"}),
            Shape::Float => json!({"type": "number"}),
            Shape::Dict => json!({"type": "object"}),
            Shape::Null => json!({"type": "null"}),
            Shape::OneOf(members) => json!({
                "anyOf": members
                    .iter()
                    .map(|m| m.schema_at(title, layer, limit_layers))
                    .collect::<Vec<_>>()
            }),
            Shape::Object(_) if limit_layers.is_some_and(|limit| layer > limit) => {
                json!({"type": "object"})
            }
            Shape::Object(fields) => {
                let mut properties = Map::new();
                let mut required = Vec::new();
                for (key, shape) in fields {
                    let sub_title = format!("{}_SubSchema", key);
                    properties.insert(key.clone(), shape.schema_at(&sub_title, layer + 1, limit_layers));
                    if !shape.is_nullable() {
                        required.push(Value::String(key.clone()));
                    }
                }
                json!({
                    "title": title,
                    "type": "object",
                    "properties": properties,
                    "required": required,
                })
            }
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Str => f.write_str("str"),
            Shape::Int => f.write_str("int"),
            Shape::Float => f.write_str("float"),
            Shape::Dict | Shape::Object(_) => f.write_str("dict"),
            Shape::Null => f.write_str("None"),
            Shape::OneOf(members) => {
                let names: Vec<String> = members.iter().map(ToString::to_string).collect();
                write!(f, "({})", names.join(", "))
            }
        }
    }
}
