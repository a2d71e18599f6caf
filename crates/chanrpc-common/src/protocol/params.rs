//! Call parameters.
//!
//! JSON-RPC parameters are either an ordered sequence or a mapping, never a
//! scalar. On the receiving side they are always handed to the implementation
//! as an argument list: a mapping becomes a single argument.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Params {
    Array(Vec<Value>),
    Object(Map<String, Value>),
}

impl Default for Params {
    fn default() -> Self {
        Params::Array(Vec::new())
    }
}

impl Params {
    /// Wraps a JSON value, rejecting scalars.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Array(items) => Some(Params::Array(items)),
            Value::Object(map) => Some(Params::Object(map)),
            _ => None,
        }
    }

    /// Converts the parameters to the argument list passed to a local method.
    pub fn into_args(self) -> Vec<Value> {
        match self {
            Params::Array(items) => items,
            Params::Object(map) => vec![Value::Object(map)],
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Params::Array(items) => items.len(),
            Params::Object(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How caller arguments are laid out on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParameterStructure {
    /// Always send an ordered sequence.
    #[default]
    ByPosition,
    /// Send a lone mapping argument as-is, otherwise fall back to a sequence.
    ByName,
}

impl ParameterStructure {
    pub fn apply(self, mut args: Vec<Value>) -> Params {
        match self {
            ParameterStructure::ByName if args.len() == 1 && args[0].is_object() => {
                match args.pop() {
                    Some(Value::Object(map)) => Params::Object(map),
                    Some(other) => Params::Array(vec![other]),
                    None => Params::Array(Vec::new()),
                }
            }
            _ => Params::Array(args),
        }
    }
}
