//! JSON model collaborator interface.
//!
//! A `JsonModel` knows how to write itself into a JSON object and how to
//! refresh itself from one. The facade only ever calls those two operations.

use serde_json::{Map, Value};

use crate::error::{RestError, Result};

pub trait JsonModel {
    /// Write this model's fields into `json`.
    fn to_json(&self, json: &mut Map<String, Value>);

    /// Refresh this model's fields from `json`.
    fn update_model(&mut self, json: &Map<String, Value>);

    fn to_json_value(&self) -> Value {
        let mut json = Map::new();
        self.to_json(&mut json);
        Value::Object(json)
    }
}

/// Build a fresh model from a JSON object, e.g. the result of `Response::one`.
pub fn model_from_object<T: JsonModel + Default>(json: &Map<String, Value>) -> T {
    let mut model = T::default();
    model.update_model(json);
    model
}

/// Build one model per element of a JSON array, e.g. the result of
/// `Response::list`. Every element must be an object.
pub fn models_from_array<T: JsonModel + Default>(values: &[Value]) -> Result<Vec<T>> {
    values
        .iter()
        .map(|value| match value {
            Value::Object(json) => Ok(model_from_object(json)),
            other => Err(RestError::UnexpectedJsonShape {
                found: json_kind(other),
            }),
        })
        .collect()
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
