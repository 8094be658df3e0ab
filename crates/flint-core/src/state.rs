//! Opaque pre-mutation snapshots.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::InvalidStateBlob;

/// Platform-defined serialized snapshot of a subject's full state.
///
/// The side store only persists strings and objects, so nothing else
/// can be constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct StateBlob(Value);

impl StateBlob {
    pub fn text(serial: impl Into<String>) -> Self {
        Self(Value::String(serial.into()))
    }

    pub fn structured(fields: Map<String, Value>) -> Self {
        Self(Value::Object(fields))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// The string form, when the platform stored one.
    pub fn as_text(&self) -> Option<&str> {
        self.0.as_str()
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl TryFrom<Value> for StateBlob {
    type Error = InvalidStateBlob;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let found = match &value {
            Value::String(_) | Value::Object(_) => return Ok(Self(value)),
            Value::Null => "null",
            Value::Bool(_) => "a boolean",
            Value::Number(_) => "a number",
            Value::Array(_) => "an array",
        };
        Err(InvalidStateBlob { found })
    }
}

impl From<StateBlob> for Value {
    fn from(blob: StateBlob) -> Value {
        blob.0
    }
}
