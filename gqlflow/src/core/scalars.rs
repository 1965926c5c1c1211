//! Custom scalar marshaling.
//!
//! Application code works with unmarshaled values (for example a `DateTime`
//! held as epoch milliseconds) while the wire and the cache hold marshaled
//! values. The registry converts between the two guided by the artifact's
//! input type map and selection tree.

use super::{InputObject, Selection, Variables};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A conversion applied to one scalar value.
pub type ScalarFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Marshal and unmarshal functions for one custom scalar type.
#[derive(Clone)]
pub struct ScalarHandler {
    /// Application value to wire value.
    pub marshal: ScalarFn,
    /// Wire value to application value.
    pub unmarshal: ScalarFn,
}

/// Registry of custom scalar handlers keyed by GraphQL type name.
#[derive(Clone, Default)]
pub struct ScalarRegistry {
    handlers: HashMap<String, ScalarHandler>,
}

impl fmt::Debug for ScalarRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("ScalarRegistry").field("types", &types).finish()
    }
}

impl ScalarRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a custom scalar.
    #[must_use]
    pub fn register<M, U>(mut self, type_name: impl Into<String>, marshal: M, unmarshal: U) -> Self
    where
        M: Fn(&Value) -> Value + Send + Sync + 'static,
        U: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.handlers.insert(
            type_name.into(),
            ScalarHandler {
                marshal: Arc::new(marshal),
                unmarshal: Arc::new(unmarshal),
            },
        );
        self
    }

    /// Returns the handler for a type.
    #[must_use]
    pub fn get(&self, type_name: &str) -> Option<&ScalarHandler> {
        self.handlers.get(type_name)
    }

    /// Returns true if no custom scalars are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Marshals document variables: applies defaults, converts custom scalars
    /// and recurses into input object types.
    #[must_use]
    pub fn marshal_inputs(&self, input: Option<&InputObject>, variables: &Variables) -> Variables {
        let Some(input) = input else {
            return variables.clone();
        };

        let mut merged = input.defaults.clone();
        for (key, value) in variables {
            merged.insert(key.clone(), value.clone());
        }

        merged
            .into_iter()
            .map(|(key, value)| {
                let marshaled = match input.fields.get(&key) {
                    Some(type_name) => self.marshal_input_value(input, type_name, &value),
                    None => value,
                };
                (key, marshaled)
            })
            .collect()
    }

    fn marshal_input_value(&self, input: &InputObject, type_name: &str, value: &Value) -> Value {
        match value {
            Value::Null => Value::Null,
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.marshal_input_value(input, type_name, item))
                    .collect(),
            ),
            _ => {
                if let Some(handler) = self.handlers.get(type_name) {
                    return (handler.marshal)(value);
                }
                match (input.types.get(type_name), value) {
                    (Some(fields), Value::Object(object)) => Value::Object(
                        object
                            .iter()
                            .map(|(field, inner)| {
                                let converted = match fields.get(field) {
                                    Some(inner_type) => {
                                        self.marshal_input_value(input, inner_type, inner)
                                    }
                                    None => inner.clone(),
                                };
                                (field.clone(), converted)
                            })
                            .collect(),
                    ),
                    _ => value.clone(),
                }
            }
        }
    }

    /// Converts application values in `data` to wire values.
    #[must_use]
    pub fn marshal_selection(&self, selection: &Selection, data: &Value) -> Value {
        self.walk_selection(selection, data, Direction::Marshal)
    }

    /// Converts wire values in `data` to application values.
    #[must_use]
    pub fn unmarshal_selection(&self, selection: &Selection, data: &Value) -> Value {
        self.walk_selection(selection, data, Direction::Unmarshal)
    }

    fn walk_selection(&self, selection: &Selection, data: &Value, direction: Direction) -> Value {
        if self.handlers.is_empty() {
            return data.clone();
        }
        match data {
            Value::Object(object) => Value::Object(
                object
                    .iter()
                    .map(|(key, value)| {
                        let converted = match selection.fields.get(key) {
                            Some(field) => match &field.selection {
                                Some(inner) => self.walk_selection(inner, value, direction),
                                None => self.convert_scalar(&field.type_name, value, direction),
                            },
                            None => value.clone(),
                        };
                        (key.clone(), converted)
                    })
                    .collect(),
            ),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.walk_selection(selection, item, direction))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn convert_scalar(&self, type_name: &str, value: &Value, direction: Direction) -> Value {
        let Some(handler) = self.handlers.get(type_name) else {
            return value.clone();
        };
        match value {
            Value::Null => Value::Null,
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.convert_scalar(type_name, item, direction))
                    .collect(),
            ),
            _ => match direction {
                Direction::Marshal => (handler.marshal)(value),
                Direction::Unmarshal => (handler.unmarshal)(value),
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Marshal,
    Unmarshal,
}
