//! Feed position tokens.
//!
//! CouchDB has used three shapes for `seq` over its lifetime: a plain
//! integer (1.x), an opaque string (2.x+), and a `[number, "hash"]` array
//! (BigCouch). The checkpoint is always persisted as a string: arrays as
//! their JSON text, scalars as their plain form.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// An opaque, source-assigned feed position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Seq {
    /// Array form used by clustered sources
    Composite(Vec<Value>),
    /// Integer form
    Number(Number),
    /// Opaque string form
    Text(String),
}

impl Seq {
    /// Serialize to the string stored in the checkpoint document.
    pub fn to_checkpoint(&self) -> Result<String, serde_json::Error> {
        match self {
            Seq::Composite(values) => serde_json::to_string(values),
            Seq::Number(n) => Ok(n.to_string()),
            Seq::Text(s) => Ok(s.clone()),
        }
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Seq::Composite(values) => write!(f, "{}", Value::Array(values.clone())),
            Seq::Number(n) => write!(f, "{}", n),
            Seq::Text(s) => f.write_str(s),
        }
    }
}

impl From<u64> for Seq {
    fn from(n: u64) -> Self {
        Seq::Number(n.into())
    }
}

impl From<&str> for Seq {
    fn from(s: &str) -> Self {
        Seq::Text(s.to_string())
    }
}
